//! The plugin host controller, with a shell script for a host and the simulated graph for ports.
mod common;

use std::sync::Arc;
use std::time::{Duration, Instant};

use pretty_assertions::assert_eq;

use carla_harness::graph::simulated::SimulatedGraph;
use carla_harness::*;

use common::*;

fn controller(graph: &SimulatedGraph, config: &HarnessConfig) -> PluginHostController {
    let server = AudioServerManager::new(config, Arc::new(graph.clone())).unwrap();
    PluginHostController::new(config, server).unwrap()
}

/// Poll `condition` every few milliseconds for up to `limit`.
fn eventually(limit: Duration, mut condition: impl FnMut() -> bool) -> bool {
    let deadline = Instant::now() + limit;
    while Instant::now() < deadline {
        if condition() {
            return true;
        }
        std::thread::sleep(Duration::from_millis(5));
    }
    condition()
}

#[test]
fn ready_after_settling() {
    init_logging();
    let dir = tempfile::tempdir().unwrap();
    let config = fast_config(&fake_executable(dir.path(), "fake-host-ready"));

    let graph = SimulatedGraph::with_phantom_host(Default::default());
    let _driver = graph.spawn_driver();
    let mut host = controller(&graph, &config);

    assert!(!host.exists());
    assert_eq!(host.state(), HostState::Stopped);

    let started = Instant::now();
    host.start().unwrap();
    assert!(started.elapsed() >= config.host.min_wait);
    assert_eq!(host.state(), HostState::Ready);
    assert!(host.exists());
    assert!(host.server().is_attached());
    assert!(!host.server().owns_process());

    host.kill().unwrap();
    assert_eq!(host.state(), HostState::Stopped);
    assert!(!host.exists());
}

#[test]
fn gives_up_after_the_restart_budget() {
    init_logging();
    let dir = tempfile::tempdir().unwrap();
    let config = fast_config(&fake_executable(dir.path(), "fake-host-never"));

    // No phantom host, so the expected ports never show up.
    let graph = SimulatedGraph::default();
    let mut host = controller(&graph, &config);

    let started = Instant::now();
    let err = host.start().unwrap_err();
    assert!(err.is_restart_budget_exhausted(), "{err}");
    assert_eq!(host.state(), HostState::Failed);

    // Each launch polls for the whole ceiling, less the sleep after the final poll.
    let attempts = config.host.max_restarts + 1;
    let per_launch = config.host.ready_ceiling - config.host.poll_interval;
    assert!(started.elapsed() >= per_launch * attempts);
    assert!(!host.exists());
}

#[test]
fn missing_host_executable_is_reported() {
    let graph = SimulatedGraph::with_phantom_host(Default::default());
    let dir = tempfile::tempdir().unwrap();
    let config = fast_config(&dir.path().join("not-a-host"));

    let server = AudioServerManager::new(&config, Arc::new(graph)).unwrap();
    let err = PluginHostController::new(&config, server)
        .err()
        .expect("the host should be missing");
    assert!(err.is_dependency_missing());
}

#[test]
fn restarts_a_host_which_disappears() {
    init_logging();
    let dir = tempfile::tempdir().unwrap();
    let mut config = fast_config(&fake_executable(dir.path(), "fake-host-gone"));
    config.host.ready_ceiling = Duration::from_secs(2);

    let graph = SimulatedGraph::with_phantom_host(Default::default());
    let _driver = graph.spawn_driver();
    let mut host = controller(&graph, &config);
    host.start().unwrap();
    assert!(!host.has_error());

    graph.remove_phantom_host();
    assert!(eventually(Duration::from_secs(5), || host.has_error()));
    assert!(eventually(Duration::from_secs(5), || host.state() != HostState::Ready));

    graph.add_phantom_host();
    assert!(eventually(Duration::from_secs(10), || host.state() == HostState::Ready));
    assert!(host.exists());

    host.clear_error();
    assert!(!host.has_error());
}
