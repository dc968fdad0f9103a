//! Names, kinds, and patterns for ports in the audio graph.
use globset::{Glob, GlobMatcher};
use serde::{Deserialize, Serialize};

use crate::error::Result;

/// Most audio ports one client may own.  Callbacks gather their input slices into fixed-size storage of this size.
pub const MAX_AUDIO_PORTS: usize = 32;

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum PortKind {
    Audio,
    /// MIDI-style timestamped byte messages.
    Event,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum PortDirection {
    Input,
    Output,
}

/// A shell-style wildcard over full port names, e.g. `Carla:audio-out*`.
#[derive(Clone, Debug)]
pub struct PortPattern {
    source: String,
    matcher: GlobMatcher,
}

impl PortPattern {
    pub fn new(pattern: &str) -> Result<Self> {
        let matcher = Glob::new(pattern)?.compile_matcher();
        Ok(Self {
            source: pattern.to_string(),
            matcher,
        })
    }

    pub fn as_str(&self) -> &str {
        &self.source
    }

    pub fn matches(&self, port_name: &str) -> bool {
        self.matcher.is_match(port_name)
    }

    /// The names matching this pattern, in the order given.
    pub fn filter<'a, S: AsRef<str>>(&self, names: &'a [S]) -> Vec<&'a str> {
        names
            .iter()
            .map(|x| x.as_ref())
            .filter(|x| self.matches(x))
            .collect()
    }
}

impl std::fmt::Display for PortPattern {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.source)
    }
}

/// The ports a client asks for when it registers.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct PortLayout {
    /// Short names of audio inputs, in channel order.
    pub audio_inputs: Vec<String>,

    /// Short name of the event output, if any.
    pub event_output: Option<String>,
}

impl PortLayout {
    /// `count` audio inputs named `in_1`, `in_2`, ...
    pub fn audio_inputs(count: usize) -> Self {
        Self {
            audio_inputs: (1..=count).map(|i| format!("in_{i}")).collect(),
            event_output: None,
        }
    }

    pub fn event_output(name: &str) -> Self {
        Self {
            audio_inputs: vec![],
            event_output: Some(name.to_string()),
        }
    }
}

/// Join a client name and a short port name the way graph port names are written.
pub fn full_port_name(client: &str, port: &str) -> String {
    format!("{client}:{port}")
}

/// The client part of a full port name.
pub fn client_of(port_name: &str) -> &str {
    port_name.split_once(':').map(|x| x.0).unwrap_or(port_name)
}

#[cfg(test)]
mod tests {
    use super::*;

    use pretty_assertions::assert_eq;

    #[test]
    fn wildcards_match_port_names() {
        let names = [
            "system:playback_1",
            "Carla:events-in",
            "Carla:audio-out1",
            "Carla:audio-out2",
            "Carla-Rack:audio-out1",
        ];

        let audio = PortPattern::new("Carla:audio-out*").unwrap();
        assert_eq!(audio.filter(&names), vec!["Carla:audio-out1", "Carla:audio-out2"]);

        let events = PortPattern::new("Carla:events*").unwrap();
        assert_eq!(events.filter(&names), vec!["Carla:events-in"]);

        let single = PortPattern::new("Carla:audio-out?").unwrap();
        assert!(single.matches("Carla:audio-out2"));
        assert!(!single.matches("Carla:audio-out12"));
    }

    #[test]
    fn client_part() {
        assert_eq!(client_of("Carla:audio-out1"), "Carla");
        assert_eq!(client_of("nameless"), "nameless");
        assert_eq!(full_port_name("rec", "in_1"), "rec:in_1");
    }
}
