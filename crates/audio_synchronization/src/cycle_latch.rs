use crate::sync::{AtomicU64, Ordering};

/// Records the first processing cycle in which something became true.
///
/// The latch is written by the audio callback of the client that owns it and read by anyone: the control thread, or
/// the callbacks of other clients in the same graph.  A latched value is only reported as ready from the *following*
/// cycle onward.  Within one cycle the engine runs callbacks in an order nobody controls, so "ready in the cycle it was
/// latched" would be seen by some peers and not others; "ready strictly after" is seen by all of them at once.
///
/// Internally 0 means unlatched and anything else is the cycle plus one, so cycle `u64::MAX` cannot be latched.
#[derive(Debug, Default)]
pub struct CycleLatch {
    inner: AtomicU64,
}

impl CycleLatch {
    pub fn new() -> Self {
        Self::default()
    }

    /// Latch `cycle` if nothing has been latched yet.  Returns whether this call latched.
    ///
    /// Realtime safe.
    pub fn latch(&self, cycle: u64) -> bool {
        let encoded = cycle.checked_add(1).expect("Cannot latch cycle u64::MAX");
        self.inner
            .compare_exchange(0, encoded, Ordering::AcqRel, Ordering::Acquire)
            .is_ok()
    }

    pub fn latched_at(&self) -> Option<u64> {
        self.inner.load(Ordering::Acquire).checked_sub(1)
    }

    /// True if a cycle was latched and `cycle` is strictly after it.
    pub fn is_ready_at(&self, cycle: u64) -> bool {
        self.latched_at().is_some_and(|at| at < cycle)
    }

    pub fn reset(&self) {
        self.inner.store(0, Ordering::Release);
    }
}

#[cfg(all(test, not(loom)))]
mod tests {
    use super::*;

    use proptest::prelude::*;

    #[test]
    fn unlatched_is_never_ready() {
        let latch = CycleLatch::new();
        assert_eq!(latch.latched_at(), None);
        assert!(!latch.is_ready_at(0));
        assert!(!latch.is_ready_at(u64::MAX));
    }

    #[test]
    fn first_latch_wins() {
        let latch = CycleLatch::new();
        assert!(latch.latch(5));
        assert!(!latch.latch(7));
        assert_eq!(latch.latched_at(), Some(5));
        latch.reset();
        assert!(latch.latch(0));
        assert_eq!(latch.latched_at(), Some(0));
    }

    proptest! {
        #[test]
        fn ready_strictly_after_latch(latched in 0u64..1_000_000, probe in 0u64..1_000_010) {
            let latch = CycleLatch::new();
            latch.latch(latched);
            prop_assert_eq!(latch.is_ready_at(probe), probe > latched);
        }
    }
}
