//! Drive a JACK server and a Carla plugin host for testing synthesizers.
//!
//! The pieces, from the bottom up:
//!
//! - [ProcessSupervisor] owns one external process and knows how to kill it.
//! - [AudioServerManager] starts or attaches to the audio server.
//! - [PluginHostController] launches the plugin host and decides when it is ready.
//! - [RealtimeClient] and the two clients built on it, [AudioCaptureClient] and [EventPlaybackClient], exchange audio and
//!   events with the host from inside the engine's callback, starting in lockstep.
//!
//! Everything talks to the engine through [graph::GraphBackend], so the whole stack runs against
//! [graph::simulated::SimulatedGraph] in tests.
#[macro_use]
mod is_audio_thread;

mod client;
mod config;
mod error;
pub mod graph;
mod host;
pub mod midi;
pub mod ports;
pub mod process;
mod retry;
mod server;

#[cfg(test)]
mod test_support;

pub use client::*;
pub use config::*;
pub use error::{Error, Result};
pub use host::{Debounced, HostState, PluginHostController, ReadinessDebounce};
pub use process::{ManagedProcess, ProcessSupervisor};
pub use retry::Retry;
pub use server::AudioServerManager;
