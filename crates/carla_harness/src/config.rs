//! Configuration for a harness run.
//!
//! Everything has a default matching a stock Linux install of JACK and Carla, so most callers only override the
//! project path.  Configuration can be built in code through the builders or loaded from YAML; durations are written as
//! fractional seconds in YAML.
use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::error::{Error, Result};

/// Serde adapter storing a [Duration] as fractional seconds.
mod seconds {
    use std::time::Duration;

    use serde::{Deserialize, Deserializer, Serializer};

    pub fn serialize<S: Serializer>(value: &Duration, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_f64(value.as_secs_f64())
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(deserializer: D) -> Result<Duration, D::Error> {
        let secs = f64::deserialize(deserializer)?;
        Duration::try_from_secs_f64(secs.max(0.0)).map_err(serde::de::Error::custom)
    }
}

#[derive(Clone, Debug, Default, Serialize, Deserialize, derive_builder::Builder)]
#[builder(pattern = "owned", default)]
#[serde(default)]
pub struct HarnessConfig {
    pub server: ServerConfig,
    pub host: HostConfig,
    pub ports: PortConfig,
    pub retry: RetryConfig,
    pub capture: CaptureConfig,
}

/// How to find or launch the audio server.
#[derive(Clone, Debug, Serialize, Deserialize, derive_builder::Builder)]
#[builder(pattern = "owned", default, setter(into))]
#[serde(default)]
pub struct ServerConfig {
    /// Executable name (looked up on `PATH`) or path.  Also the process name used to detect an already running server.
    pub executable: String,

    /// Arguments, in order, e.g. `["-R", "-d", "alsa", "-p", "1024"]`.
    pub options: Vec<String>,

    /// How many times to try connecting to a freshly spawned server.
    pub attach_attempts: u32,

    #[serde(with = "seconds")]
    pub attach_backoff: Duration,

    /// Name of the harness's own control connection.
    pub client_name: String,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            executable: "jackd".to_string(),
            options: ["-R", "-d", "alsa"].map(String::from).to_vec(),
            attach_attempts: 10,
            attach_backoff: Duration::from_secs(1),
            client_name: "carla_harness".to_string(),
        }
    }
}

/// How to launch the plugin host and decide when it is ready.
#[derive(Clone, Debug, Serialize, Deserialize, derive_builder::Builder)]
#[builder(pattern = "owned", default, setter(into))]
#[serde(default)]
pub struct HostConfig {
    pub executable: String,

    /// Project file to load.  Empty means the host's default project.  Relative paths are made absolute before launch.
    pub project: PathBuf,

    /// Launch without a GUI.
    pub headless: bool,

    /// How long the host must look ready, without interruption, before it counts as ready.
    ///
    /// Large presets keep registering and unregistering ports while they load, so a single good observation is not
    /// enough.
    #[serde(with = "seconds")]
    pub min_wait: Duration,

    /// If the host has not looked ready even once for this long, it is killed and relaunched.
    #[serde(with = "seconds")]
    pub ready_ceiling: Duration,

    #[serde(with = "seconds")]
    pub poll_interval: Duration,

    /// Relaunches allowed by one call to start before giving up.
    pub max_restarts: u32,

    /// Also restart the audio server when relaunching the host after the ceiling.
    pub restart_server_on_escalation: bool,

    /// While ready, check liveness every this many processing cycles.
    pub liveness_period_cycles: u32,
}

impl Default for HostConfig {
    fn default() -> Self {
        Self {
            executable: "Carla".to_string(),
            project: PathBuf::new(),
            headless: true,
            min_wait: Duration::ZERO,
            ready_ceiling: Duration::from_secs(20),
            poll_interval: Duration::from_millis(100),
            max_restarts: 3,
            restart_server_on_escalation: true,
            liveness_period_cycles: 8,
        }
    }
}

/// Glob patterns for the host's ports.
#[derive(Clone, Debug, Serialize, Deserialize, derive_builder::Builder)]
#[builder(pattern = "owned", default, setter(into))]
#[serde(default)]
pub struct PortConfig {
    pub host_events: String,
    pub host_audio: String,
}

impl Default for PortConfig {
    fn default() -> Self {
        Self {
            host_events: "Carla:events-in*".to_string(),
            host_audio: "Carla:audio-out*".to_string(),
        }
    }
}

impl PortConfig {
    /// All patterns which must match before the host counts as present.
    pub fn expected(&self) -> [&str; 2] {
        [&self.host_events, &self.host_audio]
    }
}

/// Budgets for killing processes.
#[derive(Clone, Debug, Serialize, Deserialize, derive_builder::Builder)]
#[builder(pattern = "owned", default)]
#[serde(default)]
pub struct RetryConfig {
    pub kill_attempts: u32,

    #[serde(with = "seconds")]
    pub kill_backoff: Duration,

    /// Attempts which send a polite terminate before escalating to a forced kill.
    pub term_attempts_before_kill: u32,
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            kill_attempts: 10,
            kill_backoff: Duration::from_millis(500),
            term_attempts_before_kill: 3,
        }
    }
}

#[derive(Clone, Debug, Serialize, Deserialize, derive_builder::Builder)]
#[builder(pattern = "owned", default)]
#[serde(default)]
pub struct CaptureConfig {
    /// Space reserved up front for captures which have no target duration.  Going past it allocates on the audio
    /// thread.
    #[serde(with = "seconds")]
    pub reserve: Duration,
}

impl Default for CaptureConfig {
    fn default() -> Self {
        Self {
            reserve: Duration::from_secs(60),
        }
    }
}

impl HarnessConfig {
    pub fn from_yaml_str(yaml: &str) -> Result<Self> {
        let config: HarnessConfig =
            serde_yaml::from_str(yaml).map_err(|e| Error::invalid_config(e.to_string()))?;
        config.validate()?;
        Ok(config)
    }

    pub fn from_yaml_file(path: &Path) -> Result<Self> {
        let text = std::fs::read_to_string(path)?;
        Self::from_yaml_str(&text)
    }

    pub fn to_yaml(&self) -> Result<String> {
        serde_yaml::to_string(self).map_err(|e| Error::invalid_config(e.to_string()))
    }

    /// Reject values that would make a bounded loop unbounded or zero-length.
    pub fn validate(&self) -> Result<()> {
        if self.server.attach_attempts == 0 {
            return Err(Error::invalid_config("server.attach_attempts must be at least 1"));
        }
        if self.retry.kill_attempts == 0 {
            return Err(Error::invalid_config("retry.kill_attempts must be at least 1"));
        }
        if self.host.poll_interval.is_zero() {
            return Err(Error::invalid_config("host.poll_interval must be positive"));
        }
        if self.host.ready_ceiling < self.host.poll_interval {
            return Err(Error::invalid_config(
                "host.ready_ceiling must be at least one poll interval",
            ));
        }
        if self.host.liveness_period_cycles == 0 {
            return Err(Error::invalid_config("host.liveness_period_cycles must be at least 1"));
        }
        for pattern in self.ports.expected() {
            crate::ports::PortPattern::new(pattern)?;
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    use pretty_assertions::assert_eq;

    #[test]
    fn yaml_overrides_only_what_it_names() {
        let config = HarnessConfig::from_yaml_str(
            "
host:
  project: carla_proj/pianoteq0.carxp
  min_wait: 4
server:
  options: ['-R', '-d', 'alsa', '-p', '1024']
",
        )
        .unwrap();

        assert_eq!(config.host.project, PathBuf::from("carla_proj/pianoteq0.carxp"));
        assert_eq!(config.host.min_wait, Duration::from_secs(4));
        assert_eq!(config.host.ready_ceiling, Duration::from_secs(20));
        assert_eq!(config.server.options, vec!["-R", "-d", "alsa", "-p", "1024"]);
        assert_eq!(config.server.executable, "jackd");
    }

    #[test]
    fn yaml_roundtrips_durations_as_seconds() {
        let config = HarnessConfigBuilder::default()
            .host(
                HostConfigBuilder::default()
                    .min_wait(Duration::from_millis(1500))
                    .build()
                    .unwrap(),
            )
            .build()
            .unwrap();
        let yaml = config.to_yaml().unwrap();
        assert!(yaml.contains("min_wait: 1.5"), "{yaml}");
        let back = HarnessConfig::from_yaml_str(&yaml).unwrap();
        assert_eq!(back.host.min_wait, Duration::from_millis(1500));
    }

    #[test]
    fn rejects_zero_attempts() {
        let err = HarnessConfig::from_yaml_str("retry: { kill_attempts: 0 }").unwrap_err();
        assert!(err.is_invalid_config());
    }

    #[test]
    fn rejects_bad_patterns() {
        let err = HarnessConfig::from_yaml_str("ports: { host_audio: 'Carla:[audio' }").unwrap_err();
        assert!(err.is_pattern());
    }
}
