//! Shared setup for the integration tests.
#![allow(dead_code)]
use std::os::unix::fs::PermissionsExt;
use std::path::{Path, PathBuf};
use std::time::Duration;

use carla_harness::graph::simulated::SimulatedGraph;
use carla_harness::*;

pub fn init_logging() {
    let _ = env_logger::builder().is_test(true).try_init();
}

/// A stand-in executable which runs until killed.
pub fn fake_executable(dir: &Path, name: &str) -> PathBuf {
    let path = dir.join(name);
    std::fs::write(&path, "#!/bin/sh\nsleep 600\n").unwrap();
    std::fs::set_permissions(&path, std::fs::Permissions::from_mode(0o755)).unwrap();
    path
}

/// Configuration which attaches to whatever graph it is given and launches `host` as the plugin host, with timings
/// short enough for tests.
pub fn fast_config(host: &Path) -> HarnessConfig {
    HarnessConfigBuilder::default()
        .server(
            ServerConfigBuilder::default()
                .executable("")
                .attach_attempts(3u32)
                .attach_backoff(Duration::from_millis(10))
                .build()
                .unwrap(),
        )
        .host(
            HostConfigBuilder::default()
                .executable(host.to_str().unwrap())
                .min_wait(Duration::from_millis(100))
                .ready_ceiling(Duration::from_millis(500))
                .poll_interval(Duration::from_millis(20))
                .max_restarts(1u32)
                .restart_server_on_escalation(false)
                .liveness_period_cycles(2u32)
                .build()
                .unwrap(),
        )
        .retry(
            RetryConfigBuilder::default()
                .kill_attempts(20)
                .kill_backoff(Duration::from_millis(50))
                .term_attempts_before_kill(2)
                .build()
                .unwrap(),
        )
        .build()
        .unwrap()
}

/// Step `graph` by hand until `done`, failing the test if that takes more than `max_cycles`.
pub fn drive(graph: &SimulatedGraph, max_cycles: u64, done: impl FnMut() -> bool) {
    assert!(
        graph.run_until(max_cycles, done),
        "Gave up after {max_cycles} cycles"
    );
}

/// Cycles needed to cover `duration` at the graph's rate, plus a little slack for the barrier.
pub fn cycles_for(graph: &SimulatedGraph, duration: Duration) -> u64 {
    let config = graph.config();
    let frames = duration.as_secs_f64() * config.sample_rate as f64;
    (frames / config.block_size as f64).ceil() as u64 + 4
}
