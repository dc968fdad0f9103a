//! The plugin host: launching it, deciding when it is ready, and keeping it alive.
//!
//! The controller is a small state machine:
//!
//! ```text
//! STOPPED -> STARTING -> WAITING_READY -> READY
//!                ^             |            |
//!                |             v            v
//!           RESTARTING <---- FAILED <-------+
//! ```
//!
//! Leaving WAITING_READY for READY requires the host to look present (process running, every expected port pattern
//! matched) continuously for `min_wait`.  If it does not look present even once for `ready_ceiling`, the host is
//! killed and relaunched, optionally together with the server, at most `max_restarts` times.  While READY a watchdog
//! re-checks presence periodically and restarts the host when it vanishes.
mod liveness;
mod readiness;

pub use readiness::*;

use std::path::PathBuf;
use std::process::Command;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Instant;

use crate::config::{HarnessConfig, HostConfig};
use crate::error::{Error, Result};
use crate::graph::GraphBackend;
use crate::ports::PortPattern;
use crate::process::{which, ProcessSupervisor};
use crate::retry::Retry;
use crate::server::AudioServerManager;
use liveness::LivenessWatchdog;

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, derive_more::Display)]
pub enum HostState {
    #[display(fmt = "STOPPED")]
    Stopped,
    #[display(fmt = "STARTING")]
    Starting,
    #[display(fmt = "WAITING_READY")]
    WaitingReady,
    #[display(fmt = "READY")]
    Ready,
    #[display(fmt = "FAILED")]
    Failed,
    #[display(fmt = "RESTARTING")]
    Restarting,
}

/// State shared with the watchdog thread.
struct HostInner {
    config: HostConfig,
    executable: PathBuf,
    patterns: Vec<PortPattern>,
    liveness_client_name: String,

    server: Mutex<AudioServerManager>,
    process: Mutex<ProcessSupervisor>,
    state: Mutex<HostState>,
    error: AtomicBool,
}

/// Supervises the plugin host.
pub struct PluginHostController {
    inner: Arc<HostInner>,
    watchdog: Option<LivenessWatchdog>,
}

impl HostInner {
    fn state(&self) -> HostState {
        *self.state.lock().unwrap()
    }

    fn set_state(&self, new: HostState) {
        let mut state = self.state.lock().unwrap();
        if *state != new {
            log::info!("Plugin host: {} -> {new}", *state);
            *state = new;
        }
    }

    fn exists(&self) -> bool {
        if !self.process.lock().unwrap().is_running() {
            return false;
        }

        let ports = match self.server.lock().unwrap().port_names() {
            Ok(p) => p,
            Err(e) => {
                log::debug!("Listing ports failed: {e}");
                return false;
            }
        };
        self.patterns
            .iter()
            .all(|pat| ports.iter().any(|p| pat.matches(p)))
    }

    fn project_path(&self) -> Result<PathBuf> {
        let project = &self.config.project;
        if project.as_os_str().is_empty() || project.is_absolute() {
            Ok(project.clone())
        } else {
            Ok(std::env::current_dir()?.join(project))
        }
    }

    fn launch(&self) -> Result<()> {
        self.set_state(HostState::Starting);

        let mut command = Command::new(&self.executable);
        if self.config.headless {
            command.arg("-n");
        }
        command.arg(self.project_path()?);
        self.process.lock().unwrap().start(&mut command)?;

        self.set_state(HostState::WaitingReady);
        Ok(())
    }

    /// Poll until the host settles, or give up if it never even looks present within the ceiling.
    ///
    /// The ceiling counts from the launch or from the last time readiness was lost, whichever is later.
    fn await_ready(&self) -> bool {
        assert_not_audio_thread!();

        let poll = Retry::deadline(self.config.ready_ceiling, self.config.poll_interval);
        let mut debounce = ReadinessDebounce::new(self.config.min_wait);

        loop {
            let present = poll.run("waiting for the plugin host's ports", |_| {
                if self.exists() {
                    Ok(())
                } else {
                    Err("host not running or ports missing")
                }
            });
            if present.is_err() {
                return false;
            }

            let mut observed = debounce.observe(true, Instant::now());
            while let Debounced::Settling { since } = observed {
                log::trace!("Plugin host settling since {:?}", since.elapsed());
                std::thread::sleep(self.config.poll_interval);
                observed = debounce.observe(self.exists(), Instant::now());
            }

            if observed.is_ready() {
                return true;
            }
            log::debug!("Plugin host flapped while settling");
        }
    }

    /// Kill the host, and the server if so configured, after a failed launch.
    fn escalate(&self) -> Result<()> {
        self.set_state(HostState::Failed);
        self.set_state(HostState::Restarting);
        self.process.lock().unwrap().kill()?;
        if self.config.restart_server_on_escalation {
            self.server.lock().unwrap().restart()?;
        }
        Ok(())
    }

    /// Launch the host and wait for it, relaunching up to the restart budget.
    fn bring_up(&self) -> Result<()> {
        self.server.lock().unwrap().start()?;

        let mut restarts = 0;
        loop {
            self.launch()?;
            if self.await_ready() {
                self.set_state(HostState::Ready);
                return Ok(());
            }

            if restarts >= self.config.max_restarts {
                log::error!(
                    "Plugin host never became ready, giving up after {restarts} restarts"
                );
                self.process.lock().unwrap().kill()?;
                self.set_state(HostState::Failed);
                return Err(Error::restart_budget_exhausted(restarts));
            }

            restarts += 1;
            log::warn!(
                "Plugin host not ready after {:?}: restart {restarts} of {}",
                self.config.ready_ceiling,
                self.config.max_restarts
            );
            self.escalate()?;
        }
    }
}

impl PluginHostController {
    /// Fails if the host executable cannot be found or a port pattern is malformed.
    pub fn new(config: &HarnessConfig, server: AudioServerManager) -> Result<Self> {
        config.validate()?;

        let executable = which(&config.host.executable)
            .ok_or_else(|| Error::dependency_missing(&config.host.executable))?;
        let patterns = config
            .ports
            .expected()
            .into_iter()
            .map(PortPattern::new)
            .collect::<Result<Vec<_>>>()?;

        let process = ProcessSupervisor::new(config.host.executable.clone(), config.retry.clone());

        Ok(Self {
            inner: Arc::new(HostInner {
                config: config.host.clone(),
                executable,
                patterns,
                liveness_client_name: format!("{}-liveness", config.server.client_name),
                server: Mutex::new(server),
                process: Mutex::new(process),
                state: Mutex::new(HostState::Stopped),
                error: AtomicBool::new(false),
            }),
            watchdog: None,
        })
    }

    pub fn state(&self) -> HostState {
        self.inner.state()
    }

    /// Whether the host process is running and every expected port is present, right now.
    pub fn exists(&self) -> bool {
        self.inner.exists()
    }

    /// Set when the watchdog found the host gone while it was ready.
    pub fn has_error(&self) -> bool {
        self.inner.error.load(Ordering::Acquire)
    }

    pub fn clear_error(&self) {
        self.inner.error.store(false, Ordering::Release);
    }

    pub fn server(&self) -> MutexGuard<'_, AudioServerManager> {
        self.inner.server.lock().unwrap()
    }

    pub fn backend(&self) -> Arc<dyn GraphBackend> {
        self.server().backend()
    }

    /// Start the server if needed, launch the host, and block until it is ready.
    ///
    /// Fails with a restart-budget error if the host could not be brought up within `max_restarts` relaunches.
    pub fn start(&mut self) -> Result<()> {
        assert_not_audio_thread!();

        self.stop_watchdog();
        self.inner.bring_up()?;
        self.watchdog = Some(LivenessWatchdog::start(self.inner.clone())?);
        Ok(())
    }

    fn stop_watchdog(&mut self) {
        if let Some(w) = self.watchdog.take() {
            w.stop();
        }
    }

    /// Stop the host.  The server keeps running.
    pub fn kill(&mut self) -> Result<()> {
        self.stop_watchdog();
        self.inner.process.lock().unwrap().kill()?;
        self.inner.set_state(HostState::Stopped);
        Ok(())
    }

    /// Stop the host and then the server.
    pub fn kill_server(&mut self) -> Result<()> {
        self.kill()?;
        self.server().kill()
    }

    /// Relaunch the host only.
    pub fn restart_host(&mut self) -> Result<()> {
        self.kill()?;
        self.start()
    }

    /// Relaunch both the server and the host.
    pub fn restart(&mut self) -> Result<()> {
        log::info!("Restarting the audio server and the plugin host");
        self.kill_server()?;
        self.start()
    }

    /// Start the host, then block until the user closes it.  Meant for hosts launched with a GUI.
    pub fn run_until_exit(&mut self) -> Result<()> {
        self.start()?;
        self.stop_watchdog();

        {
            let mut process = self.inner.process.lock().unwrap();
            process.set_expected_duration(None);
            process.wait()?;
        }

        self.kill()
    }
}

impl Drop for PluginHostController {
    fn drop(&mut self) {
        if let Err(e) = self.kill() {
            log::error!("While stopping the plugin host: {e}");
        }
    }
}
