//! Supervision of the external processes the harness launches.
use std::ffi::OsStr;
use std::os::unix::fs::PermissionsExt;
use std::os::unix::process::CommandExt;
use std::path::{Path, PathBuf};
use std::process::{Child, Command, Stdio};
use std::time::{Duration, Instant};

use crate::config::RetryConfig;
use crate::error::{Error, Result};
use crate::retry::Retry;

/// What a supervisor currently holds.
#[derive(Debug, Default, derive_more::IsVariant)]
pub enum ManagedProcess {
    /// Nothing is running.  Every operation is a no-op.
    #[default]
    Placeholder,
    Spawned { child: Child, started: Instant },
}

/// Owns at most one OS process and knows how to get rid of it.
///
/// Processes get their own process group, so that signals reach anything they fork.  Dropping the supervisor kills the
/// process.
#[derive(Debug)]
pub struct ProcessSupervisor {
    name: String,
    process: ManagedProcess,

    /// `None` means the process is expected to run until it exits on its own.
    expected_duration: Option<Duration>,

    retry: RetryConfig,
}

impl ProcessSupervisor {
    pub fn new(name: impl Into<String>, retry: RetryConfig) -> Self {
        Self {
            name: name.into(),
            process: ManagedProcess::Placeholder,
            expected_duration: None,
            retry,
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn set_expected_duration(&mut self, duration: Option<Duration>) {
        self.expected_duration = duration.filter(|d| !d.is_zero());
    }

    /// Launch `command`, killing whatever was running before.
    pub fn start(&mut self, command: &mut Command) -> Result<()> {
        self.kill()?;

        command
            .stdin(Stdio::null())
            .stdout(Stdio::null())
            .stderr(Stdio::null())
            .process_group(0);
        let child = command.spawn()?;
        log::info!("Started {} (pid {})", self.name, child.id());

        self.process = ManagedProcess::Spawned {
            child,
            started: Instant::now(),
        };
        Ok(())
    }

    /// Whether the process is alive.  A process which has exited, including one which had become a zombie, is reaped
    /// here and reported as not running.
    pub fn is_running(&mut self) -> bool {
        let ManagedProcess::Spawned { child, .. } = &mut self.process else {
            return false;
        };

        match child.try_wait() {
            Ok(None) => true,
            Ok(Some(status)) => {
                log::debug!("{} exited with {status}", self.name);
                false
            }
            Err(e) => {
                log::warn!("Could not query {}: {e}", self.name);
                false
            }
        }
    }

    pub fn pid(&self) -> Option<u32> {
        match &self.process {
            ManagedProcess::Spawned { child, .. } => Some(child.id()),
            ManagedProcess::Placeholder => None,
        }
    }

    /// Time since the process was started.
    pub fn elapsed(&self) -> Option<Duration> {
        match &self.process {
            ManagedProcess::Spawned { started, .. } => Some(started.elapsed()),
            ManagedProcess::Placeholder => None,
        }
    }

    /// Block until the process is done.
    ///
    /// With an expected duration, sleep out whatever remains of it and then kill the process.  Without one, wait for
    /// the process to exit by itself.
    pub fn wait(&mut self) -> Result<()> {
        assert_not_audio_thread!();

        let ManagedProcess::Spawned { child, started } = &mut self.process else {
            return Ok(());
        };

        match self.expected_duration {
            Some(expected) => {
                if let Some(remaining) = expected.checked_sub(started.elapsed()) {
                    std::thread::sleep(remaining);
                }
                self.kill()
            }
            None => {
                let status = child.wait()?;
                log::info!("{} exited with {status}", self.name);
                self.process = ManagedProcess::Placeholder;
                Ok(())
            }
        }
    }

    /// Make sure the process is dead.
    ///
    /// The first few attempts ask politely with `SIGTERM`, the rest use `SIGKILL`.  Calling this with nothing running
    /// succeeds.  Failure means the process survived every attempt.
    pub fn kill(&mut self) -> Result<()> {
        assert_not_audio_thread!();

        let Some(pid) = self.pid() else {
            return Ok(());
        };
        let retry = Retry::new(self.retry.kill_attempts, self.retry.kill_backoff);
        let term_attempts = self.retry.term_attempts_before_kill;

        let res = retry.run(&format!("killing {}", self.name), |attempt| {
            if !self.is_running() {
                return Ok(());
            }
            let signal = if attempt < term_attempts {
                libc::SIGTERM
            } else {
                libc::SIGKILL
            };
            signal_group(pid, signal);
            Err(format!("{} (pid {pid}) still running after signal {signal}", self.name))
        });

        if res.is_err() && self.is_running() {
            log::error!("{} (pid {pid}) survived {} kill attempts", self.name, retry.attempts());
            return Err(Error::kill_exhausted(&self.name, pid));
        }

        log::info!("Stopped {} (pid {pid})", self.name);
        self.process = ManagedProcess::Placeholder;
        Ok(())
    }
}

impl Drop for ProcessSupervisor {
    fn drop(&mut self) {
        if let Err(e) = self.kill() {
            log::error!("While dropping the supervisor for {}: {e}", self.name);
        }
    }
}

fn signal_group(pid: u32, signal: libc::c_int) {
    let Ok(pid) = libc::pid_t::try_from(pid) else {
        return;
    };

    // SAFETY: kill(2) has no memory safety requirements.
    unsafe {
        if libc::kill(-pid, signal) != 0 {
            // The group may already be gone while the leader lingers.
            libc::kill(pid, signal);
        }
    }
}

/// Find a live, non-zombie process whose executable is named `executable`, returning its pid.
///
/// Only the file name of `executable` is compared.  The kernel truncates process names to 15 bytes, so longer names
/// are compared by prefix.
pub fn find_running(executable: &str) -> Option<u32> {
    let name = Path::new(executable).file_name()?.to_str()?;
    let truncated = &name.as_bytes()[..name.len().min(15)];

    let entries = std::fs::read_dir("/proc").ok()?;
    for entry in entries.flatten() {
        let Some(pid) = entry.file_name().to_str().and_then(|x| x.parse::<u32>().ok()) else {
            continue;
        };
        let Ok(comm) = std::fs::read(entry.path().join("comm")) else {
            continue;
        };
        if comm.strip_suffix(b"\n").unwrap_or(&comm) != truncated {
            continue;
        }

        // The state field follows the parenthesized name, which may itself contain parentheses.
        let Ok(stat) = std::fs::read_to_string(entry.path().join("stat")) else {
            continue;
        };
        let state = stat.rsplit_once(')').and_then(|x| x.1.trim_start().chars().next());
        if matches!(state, Some('Z') | Some('X') | None) {
            continue;
        }

        return Some(pid);
    }

    None
}

/// Resolve `executable` against `PATH`, or check it directly if it contains a path separator.
pub fn which(executable: impl AsRef<OsStr>) -> Option<PathBuf> {
    let executable = Path::new(executable.as_ref());
    if executable.components().count() > 1 {
        return is_executable(executable).then(|| executable.to_path_buf());
    }

    let path = std::env::var_os("PATH")?;
    std::env::split_paths(&path)
        .map(|dir| dir.join(executable))
        .find(|candidate| is_executable(candidate))
}

fn is_executable(path: &Path) -> bool {
    std::fs::metadata(path)
        .map(|m| m.is_file() && m.permissions().mode() & 0o111 != 0)
        .unwrap_or(false)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn fast_retry() -> RetryConfig {
        RetryConfig {
            kill_attempts: 20,
            kill_backoff: Duration::from_millis(50),
            term_attempts_before_kill: 2,
        }
    }

    fn sleeper(secs: u32) -> Command {
        let mut c = Command::new("sleep");
        c.arg(secs.to_string());
        c
    }

    #[test]
    fn kill_is_idempotent() {
        let mut sup = ProcessSupervisor::new("nothing", fast_retry());
        sup.kill().unwrap();
        sup.kill().unwrap();
        assert!(!sup.is_running());

        sup.start(&mut sleeper(60)).unwrap();
        assert!(sup.is_running());
        assert!(sup.pid().is_some());

        sup.kill().unwrap();
        assert!(!sup.is_running());
        assert_eq!(sup.pid(), None);
        sup.kill().unwrap();
        assert!(!sup.is_running());
    }

    #[test]
    fn exited_processes_are_not_running() {
        let mut sup = ProcessSupervisor::new("true", fast_retry());
        sup.start(&mut Command::new("true")).unwrap();

        let gone = Retry::new(100, Duration::from_millis(10)).run("waiting for exit", |_| {
            if sup.is_running() {
                Err("running")
            } else {
                Ok(())
            }
        });
        assert!(gone.is_ok());
        sup.kill().unwrap();
    }

    #[test]
    fn wait_honors_expected_duration() {
        let mut sup = ProcessSupervisor::new("sleep", fast_retry());
        sup.set_expected_duration(Some(Duration::from_millis(200)));
        sup.start(&mut sleeper(60)).unwrap();

        let began = Instant::now();
        sup.wait().unwrap();
        assert!(began.elapsed() >= Duration::from_millis(150));
        assert!(began.elapsed() < Duration::from_secs(10));
        assert!(!sup.is_running());
    }

    #[test]
    fn wait_without_duration_waits_for_exit() {
        let mut sup = ProcessSupervisor::new("sleep", fast_retry());
        sup.start(&mut sleeper(0)).unwrap();
        sup.wait().unwrap();
        assert!(!sup.is_running());
    }

    #[test]
    fn finds_running_processes_by_name() {
        let mut sup = ProcessSupervisor::new("sleep", fast_retry());
        sup.start(&mut sleeper(60)).unwrap();
        assert!(find_running("sleep").is_some());
        assert!(find_running("/usr/bin/sleep").is_some());
        assert_eq!(find_running("no-such-process-anywhere"), None);
        sup.kill().unwrap();
    }

    #[test]
    fn resolves_executables() {
        assert!(which("sh").is_some());
        assert_eq!(which("no-such-executable-anywhere"), None);
        let sh = which("sh").unwrap();
        assert_eq!(which(&sh), Some(sh));
    }
}
