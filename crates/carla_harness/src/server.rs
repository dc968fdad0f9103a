use std::process::Command;
use std::sync::Arc;

use crate::config::{HarnessConfig, ServerConfig};
use crate::error::{Error, Result};
use crate::graph::{GraphBackend, GraphClient};
use crate::ports::PortPattern;
use crate::process::{find_running, which, ProcessSupervisor};
use crate::retry::Retry;

/// Starts or attaches to the shared audio server and holds a control connection to it.
///
/// If a server with the configured executable name is already running, the manager attaches to it and never kills it.
/// An empty executable means the server is someone else's business entirely: the manager only ever attaches.
pub struct AudioServerManager {
    config: ServerConfig,
    backend: Arc<dyn GraphBackend>,
    process: ProcessSupervisor,
    control: Option<Box<dyn GraphClient>>,
    freewheel: bool,
    owns_process: bool,
}

impl AudioServerManager {
    /// Fails if no server is running and the executable cannot be found, since nothing could ever fix that by waiting.
    pub fn new(config: &HarnessConfig, backend: Arc<dyn GraphBackend>) -> Result<Self> {
        let server = &config.server;
        if !server.executable.is_empty()
            && find_running(&server.executable).is_none()
            && which(&server.executable).is_none()
        {
            return Err(Error::dependency_missing(&server.executable));
        }

        Ok(Self {
            config: server.clone(),
            backend,
            process: ProcessSupervisor::new(server_label(server), config.retry.clone()),
            control: None,
            freewheel: false,
            owns_process: false,
        })
    }

    /// Make sure a server is running and attach to it.  Idempotent.
    pub fn start(&mut self) -> Result<()> {
        assert_not_audio_thread!();

        if self.control.is_some() {
            return Ok(());
        }

        if !self.config.executable.is_empty() && !self.process.is_running() {
            match find_running(&self.config.executable) {
                Some(pid) => {
                    log::info!("Attaching to already running {} (pid {pid})", self.config.executable);
                    self.owns_process = false;
                }
                None => {
                    let mut command = Command::new(&self.config.executable);
                    command.args(&self.config.options);
                    self.process.start(&mut command)?;
                    self.owns_process = true;
                }
            }
        }

        let retry = Retry::new(self.config.attach_attempts, self.config.attach_backoff);
        let client = retry.run("attaching to the audio server", |_| {
            self.backend.open(&self.config.client_name)
        })?;
        log::info!(
            "Attached to the audio server as {} at {} Hz",
            client.name(),
            client.sample_rate()
        );

        self.control = Some(client);
        self.freewheel = false;
        Ok(())
    }

    /// Close the control connection and, if this manager launched the server, stop it.
    pub fn kill(&mut self) -> Result<()> {
        assert_not_audio_thread!();

        if self.freewheel {
            if let Err(e) = self.toggle_freewheel() {
                log::warn!("Could not leave freewheel mode before shutting down: {e}");
            }
        }
        self.control = None;

        if self.owns_process {
            self.process.kill()?;
            self.owns_process = false;
        } else if !self.config.executable.is_empty() {
            log::debug!("Leaving {} running: this harness did not start it", self.config.executable);
        }
        Ok(())
    }

    pub fn restart(&mut self) -> Result<()> {
        log::info!("Restarting the audio server");
        self.kill()?;
        self.start()
    }

    pub fn is_attached(&self) -> bool {
        self.control.is_some()
    }

    /// Whether the server process is ours to kill.
    pub fn owns_process(&self) -> bool {
        self.owns_process
    }

    /// The backend, for clients which need their own connections.
    pub fn backend(&self) -> Arc<dyn GraphBackend> {
        self.backend.clone()
    }

    pub fn sample_rate(&self) -> Option<u32> {
        self.control.as_ref().map(|c| c.sample_rate())
    }

    fn control(&self) -> Result<&dyn GraphClient> {
        self.control
            .as_deref()
            .ok_or_else(|| Error::backend("Not attached to the audio server"))
    }

    /// Every port in the graph.
    pub fn port_names(&self) -> Result<Vec<String>> {
        self.control()?.port_names()
    }

    /// Ports whose full names match the shell-style `pattern`.
    pub fn get_ports(&self, pattern: &str) -> Result<Vec<String>> {
        let pattern = PortPattern::new(pattern)?;
        Ok(self
            .port_names()?
            .into_iter()
            .filter(|p| pattern.matches(p))
            .collect())
    }

    /// Whether this manager last put the graph into freewheel mode.
    pub fn freewheel(&self) -> bool {
        self.freewheel
    }

    /// Flip freewheel mode, returning the new state.
    ///
    /// The flag is graph-wide and only tracked here, so callers pair their toggles.
    pub fn toggle_freewheel(&mut self) -> Result<bool> {
        let enabled = !self.freewheel;
        self.control()?.set_freewheel(enabled)?;
        self.freewheel = enabled;
        log::debug!("Freewheel {}", if enabled { "on" } else { "off" });
        Ok(enabled)
    }
}

fn server_label(config: &ServerConfig) -> String {
    if config.executable.is_empty() {
        "audio server".to_string()
    } else {
        config.executable.clone()
    }
}

impl Drop for AudioServerManager {
    fn drop(&mut self) {
        if let Err(e) = self.kill() {
            log::error!("While shutting down the audio server: {e}");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    use crate::config::{HarnessConfigBuilder, ServerConfigBuilder};
    use crate::graph::simulated::SimulatedGraph;

    fn config(executable: &str) -> HarnessConfig {
        HarnessConfigBuilder::default()
            .server(
                ServerConfigBuilder::default()
                    .executable(executable)
                    .options(vec!["60".to_string()])
                    .attach_attempts(3u32)
                    .attach_backoff(std::time::Duration::from_millis(10))
                    .build()
                    .unwrap(),
            )
            .build()
            .unwrap()
    }

    #[test]
    fn missing_executables_fail_fast() {
        let err = AudioServerManager::new(
            &config("no-such-audio-server"),
            Arc::new(SimulatedGraph::default()),
        )
        .err()
        .unwrap();
        assert!(err.is_dependency_missing());
    }

    #[test]
    fn attach_only() {
        let graph = SimulatedGraph::with_phantom_host(Default::default());
        let mut server = AudioServerManager::new(&config(""), Arc::new(graph.clone())).unwrap();
        assert!(!server.is_attached());

        server.start().unwrap();
        server.start().unwrap();
        assert!(server.is_attached());
        assert!(!server.owns_process());
        assert_eq!(server.sample_rate(), Some(48000));
        assert_eq!(
            server.get_ports("Carla:audio-out*").unwrap(),
            vec!["Carla:audio-out1", "Carla:audio-out2"]
        );

        assert!(server.toggle_freewheel().unwrap());
        assert!(graph.is_freewheeling());
        assert!(!server.toggle_freewheel().unwrap());
        assert!(!graph.is_freewheeling());

        server.kill().unwrap();
        assert!(!server.is_attached());
        assert!(server.get_ports("*").is_err());
    }

    #[test]
    fn spawns_and_kills_its_own_server() {
        let dir = tempfile::tempdir().unwrap();
        let exe = crate::test_support::fake_executable(dir.path(), "fake-srv-spawn");

        let mut server = AudioServerManager::new(
            &config(exe.to_str().unwrap()),
            Arc::new(SimulatedGraph::default()),
        )
        .unwrap();
        server.start().unwrap();
        assert!(server.owns_process());
        assert!(server.process.is_running());
        assert!(find_running("fake-srv-spawn").is_some());

        server.restart().unwrap();
        assert!(server.is_attached());
        assert!(server.process.is_running());

        server.kill().unwrap();
        assert!(!server.process.is_running());
    }

    #[test]
    fn never_kills_a_server_it_did_not_start() {
        let dir = tempfile::tempdir().unwrap();
        let exe = crate::test_support::fake_executable(dir.path(), "fake-srv-extern");
        let mut external = ProcessSupervisor::new("external", Default::default());
        external.start(&mut Command::new(&exe)).unwrap();

        let retry = Retry::new(100, std::time::Duration::from_millis(10));
        retry
            .run("waiting for the external server", |_| {
                find_running("fake-srv-extern").ok_or("not yet")
            })
            .unwrap();

        let mut server = AudioServerManager::new(
            &config(exe.to_str().unwrap()),
            Arc::new(SimulatedGraph::default()),
        )
        .unwrap();
        server.start().unwrap();
        assert!(!server.owns_process());
        server.kill().unwrap();
        assert!(external.is_running());
        external.kill().unwrap();
    }
}
