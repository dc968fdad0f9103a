//! Primitives for synchronization between a realtime audio callback and ordinary control threads.
//!
//! An audio engine calls us back on its own thread once per block, under a deadline that is shared by every client of
//! the graph.  Anything done there must be bounded and must never block, but the control thread still needs to find
//! out when something happened on the audio side.  Everything in this crate is built so that the audio half of a
//! communication never waits: the audio thread sets, increments, or latches, and the control thread is the only party
//! that ever parks.
//!
//! - [WakeCounter] is the building block: a counter that any thread may bump and one thread may sleep on.
//! - [CompletionSignal] is a one-shot flag on top of it, used to say "this operation finished" (or was aborted).
//! - [CycleLatch] records the processing cycle in which something became true, and answers "is it visible yet" with
//!   the one-cycle delay that lets independently-registered callbacks agree on when to start.
mod completion;
mod cycle_latch;
mod sync;
mod wake_counter;

pub use completion::*;
pub use cycle_latch::*;
pub use wake_counter::*;
