//! The seam between the harness and the audio engine.
//!
//! Everything above this module talks to the engine through [GraphBackend] and [GraphClient], which is what lets the
//! whole harness run against [simulated::SimulatedGraph] in tests.  The real engine is in `jack_backend`.
//!
//! The model is JACK's: a graph of named clients, each owning named ports, and each running at most one callback
//! which the engine invokes once per block on its own thread.  Within a block the engine runs clients in dependency
//! order (producers of events before the host, the host before consumers of audio), but gives no ordering guarantee
//! between clients which do not depend on each other.
#[cfg(feature = "jack-backend")]
mod jack_backend;
pub mod simulated;

#[cfg(feature = "jack-backend")]
pub use jack_backend::JackBackend;

use crate::error::Result;
use crate::ports::PortLayout;

/// Something that can accept timestamped events for the current block.
pub trait EventSink {
    /// Write `bytes` at frame `offset` within the block.  Offsets must be non-decreasing within a block.
    ///
    /// Returns false if the event was dropped, e.g. because the port buffer is full.
    fn write(&mut self, offset: u32, bytes: &[u8]) -> bool;
}

/// Sink for clients without an event output.  Drops everything.
pub struct NullEventSink;

impl EventSink for NullEventSink {
    fn write(&mut self, _offset: u32, _bytes: &[u8]) -> bool {
        false
    }
}

/// Everything a callback may see during one block.
///
/// The slices borrow engine-owned buffers and are only valid for the duration of the callback.
pub struct Cycle<'a> {
    index: u64,
    frames: usize,
    audio_inputs: &'a [&'a [f32]],
    events: &'a mut dyn EventSink,
}

impl<'a> Cycle<'a> {
    pub fn new(
        index: u64,
        frames: usize,
        audio_inputs: &'a [&'a [f32]],
        events: &'a mut dyn EventSink,
    ) -> Self {
        Self {
            index,
            frames,
            audio_inputs,
            events,
        }
    }

    /// The engine's cycle index: the same for every client within a block, strictly increasing across blocks.
    pub fn index(&self) -> u64 {
        self.index
    }

    pub fn frames(&self) -> usize {
        self.frames
    }

    /// One slice per registered audio input, in registration order, each `frames()` long.
    pub fn audio_inputs(&self) -> &[&'a [f32]] {
        self.audio_inputs
    }

    pub fn events(&mut self) -> &mut dyn EventSink {
        &mut *self.events
    }
}

/// The realtime callback.
///
/// Runs on the engine's thread under a deadline shared with every other client.  Implementations must be bounded:
/// no locks, no I/O, no logging, and no allocation in the steady state.  Errors are reported by setting flags.
pub trait Processor: Send + 'static {
    fn process(&mut self, cycle: &mut Cycle<'_>);
}

/// Receives graph notifications.  Called from an engine notification thread, not the realtime one.
pub trait GraphWatcher: Send + 'static {
    fn client_registration(&mut self, client_name: &str, registered: bool);
}

impl<F: FnMut(&str, bool) + Send + 'static> GraphWatcher for F {
    fn client_registration(&mut self, client_name: &str, registered: bool) {
        self(client_name, registered)
    }
}

/// Opens connections to an audio graph.
pub trait GraphBackend: Send + Sync + 'static {
    /// Open a new client connection named `client_name`.  Fails if no engine is listening.
    fn open(&self, client_name: &str) -> Result<Box<dyn GraphClient>>;
}

/// One connection to the graph.
///
/// The lifecycle is `register_ports`, `activate`, `connect`, and finally `deactivate`.  Connecting requires an active
/// client.  Dropping a client deactivates and closes it.
pub trait GraphClient: Send {
    /// The name the engine actually assigned, which may differ from the one requested if it was taken.
    fn name(&self) -> &str;

    fn sample_rate(&self) -> u32;

    /// Frames per block right now.  JACK may change it while running.
    fn buffer_size(&self) -> usize;

    /// Full names of every port in the graph.
    fn port_names(&self) -> Result<Vec<String>>;

    /// Turn the graph-wide freewheel mode on or off.  Affects every client.
    fn set_freewheel(&self, enabled: bool) -> Result<()>;

    /// Register the ports in `layout`, returning their full names: audio inputs in order, then the event output.
    fn register_ports(&mut self, layout: &PortLayout) -> Result<Vec<String>>;

    /// Full names of the ports this client currently owns.
    fn registered_ports(&self) -> Vec<String>;

    fn connect(&self, source: &str, destination: &str) -> Result<()>;

    /// Start calling `processor` once per block.  The processor receives the ports from the last `register_ports`.
    fn activate(&mut self, processor: Box<dyn Processor>, watcher: Box<dyn GraphWatcher>) -> Result<()>;

    fn is_active(&self) -> bool;

    /// Stop the callback and unregister every port this client owns.  Idempotent.
    fn deactivate(&mut self) -> Result<()>;
}
