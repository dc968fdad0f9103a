use std::time::{Duration, Instant};

use crate::sync::{AtomicBool, Ordering};
use crate::WakeCounter;

/// A one-shot "this is over" flag, set from anywhere and waited on by one control thread.
///
/// Setting is realtime safe and idempotent.  The same signal is used both for natural completion and for forced
/// completion (e.g. a peer disappearing), so waiters which care about the difference must keep a separate flag.
#[derive(Default)]
pub struct CompletionSignal {
    set: AtomicBool,
    counter: WakeCounter,
}

impl CompletionSignal {
    pub fn new() -> Self {
        Self::default()
    }

    /// Set the signal.  Returns true if this call was the one which set it.
    pub fn set(&self) -> bool {
        if self.set.swap(true, Ordering::AcqRel) {
            return false;
        }

        self.counter.increment();
        true
    }

    pub fn is_set(&self) -> bool {
        self.set.load(Ordering::Acquire)
    }

    /// Block until set.
    pub fn wait(&self) {
        if self.is_set() {
            return;
        }
        self.counter.wait(0);
    }

    /// Block until set or `timeout` elapses.  Returns whether the signal is set.
    #[cfg(not(loom))]
    pub fn wait_timeout(&self, timeout: Duration) -> bool {
        if self.is_set() {
            return true;
        }
        self.counter.wait_timeout(0, timeout).is_some() || self.is_set()
    }

    /// Block until set or `deadline` passes.  Returns whether the signal is set.
    #[cfg(not(loom))]
    pub fn wait_deadline(&self, deadline: Instant) -> bool {
        if self.is_set() {
            return true;
        }
        self.counter.wait_deadline(0, deadline).is_some() || self.is_set()
    }
}

impl std::fmt::Debug for CompletionSignal {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CompletionSignal")
            .field("set", &self.is_set())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    use crate::sync::*;

    #[test]
    fn set_from_other_thread_wakes_waiter() {
        wrap_test(|| {
            let signal = Arc::new(CompletionSignal::new());
            let setter = {
                let signal = signal.clone();
                spawn(move || {
                    signal.set();
                })
            };

            signal.wait();
            assert!(signal.is_set());
            setter.join().unwrap();
        });
    }

    #[test]
    fn only_first_set_reports_true() {
        wrap_test(|| {
            let signal = Arc::new(CompletionSignal::new());
            let other = {
                let signal = signal.clone();
                spawn(move || signal.set())
            };
            let mine = signal.set();
            let theirs = other.join().unwrap();
            assert!(mine ^ theirs);
        });
    }
}

#[cfg(all(test, not(loom)))]
mod not_loom_tests {
    use super::*;

    #[test]
    fn timeout_without_set() {
        let signal = CompletionSignal::new();
        assert!(!signal.wait_timeout(Duration::from_millis(30)));
        assert!(!signal.is_set());
    }

    #[test]
    fn set_before_wait() {
        let signal = CompletionSignal::new();
        assert!(signal.set());
        assert!(!signal.set());
        assert!(signal.wait_timeout(Duration::from_millis(1)));
    }
}
