use std::cell::UnsafeCell;
use std::mem::MaybeUninit;
use std::time::{Duration, Instant};

use crate::sync::{current, park, spin_loop, AtomicU64, Ordering, Thread};

/// Set once the waiting thread's handle has been published.
const WAITER_BIT: u64 = 1 << 63;
const VALUE_MASK: u64 = !WAITER_BIT;

/// How many times to re-read the counter before going through the parking machinery.
const SPINS_BEFORE_PARK: usize = 3;

/// A counter which any thread may increment and exactly one thread may wait on.
///
/// Incrementing is a single atomic add plus, if a thread is waiting, an unpark.  It never blocks and never allocates,
/// so it may be done from an audio callback.  Waiting parks the calling thread until the value moves away from one the
/// caller saw previously.
///
/// Only one thread may ever wait.  The first waiter's handle is stored inline the first time it waits and is what
/// incrementing threads unpark from then on; a different thread trying to wait afterwards panics, since it would never
/// be woken.
///
/// # Realtime safety of unparking
///
/// Unparking is a futex wake on Linux and the platform equivalent elsewhere.  The audio thread only ever wakes, it is
/// never the party that sleeps, so the priority inversion concerns around futexes do not apply to it.
pub struct WakeCounter {
    /// Low 63 bits are the value, the high bit is [WAITER_BIT].
    state: AtomicU64,

    /// Initialized if and only if [WAITER_BIT] is set in `state`.
    waiter: UnsafeCell<MaybeUninit<Thread>>,
}

unsafe impl Send for WakeCounter {}
unsafe impl Sync for WakeCounter {}

impl Default for WakeCounter {
    fn default() -> Self {
        Self::new()
    }
}

impl WakeCounter {
    pub fn new() -> Self {
        Self {
            state: AtomicU64::new(0),
            waiter: UnsafeCell::new(MaybeUninit::uninit()),
        }
    }

    /// Current value.  Any thread, any time.
    pub fn get(&self) -> u64 {
        self.state.load(Ordering::Acquire) & VALUE_MASK
    }

    /// Add one and wake the waiter, if any.  Returns the new value.
    ///
    /// Safe to call from the audio thread and from any number of threads at once.
    pub fn increment(&self) -> u64 {
        let prev = self.state.fetch_add(1, Ordering::AcqRel);
        debug_assert!(prev & VALUE_MASK < VALUE_MASK, "WakeCounter overflowed");

        if prev & WAITER_BIT != 0 {
            // The waiter bit is published with release ordering after the handle is written, and we acquired it.
            unsafe { self.waiter_handle().unpark() };
        }

        (prev & VALUE_MASK) + 1
    }

    /// Block until the counter differs from `previous`, returning the new value.
    pub fn wait(&self, previous: u64) -> u64 {
        self.wait_with(previous, || {
            park();
            true
        })
        .expect("Waiting without a deadline always produces a value")
    }

    /// Like [WakeCounter::wait], but gives up after `timeout`, returning `None`.
    #[cfg(not(loom))]
    pub fn wait_timeout(&self, previous: u64, timeout: Duration) -> Option<u64> {
        match Instant::now().checked_add(timeout) {
            Some(deadline) => self.wait_deadline(previous, deadline),
            None => Some(self.wait(previous)),
        }
    }

    /// Like [WakeCounter::wait], but gives up at `deadline`, returning `None`.
    #[cfg(not(loom))]
    pub fn wait_deadline(&self, previous: u64, deadline: Instant) -> Option<u64> {
        self.wait_with(previous, || {
            let now = Instant::now();
            if now >= deadline {
                return false;
            }
            std::thread::park_timeout(deadline - now);
            true
        })
    }

    /// `park_once` parks (possibly spuriously) and returns true, or returns false once the caller should give up.
    fn wait_with(&self, previous: u64, mut park_once: impl FnMut() -> bool) -> Option<u64> {
        for _ in 0..SPINS_BEFORE_PARK {
            let value = self.get();
            if value != previous {
                return Some(value);
            }
            spin_loop();
        }

        let mut checked_waiter = false;

        loop {
            let state = self.state.load(Ordering::Acquire);
            let value = state & VALUE_MASK;
            if value != previous {
                return Some(value);
            }

            if state & WAITER_BIT == 0 {
                self.publish_waiter();
                // Re-check: an increment may have slipped in before the bit was visible and not woken us.
                continue;
            }

            if !checked_waiter {
                let waiter = unsafe { self.waiter_handle() };
                assert_eq!(
                    waiter.id(),
                    current().id(),
                    "Only one thread may ever wait on a WakeCounter"
                );
                checked_waiter = true;
            }

            if !park_once() {
                let value = self.get();
                return (value != previous).then_some(value);
            }
        }
    }

    fn publish_waiter(&self) {
        // Only the single waiting thread gets here, and only before the bit is set, so nothing reads the slot yet.
        unsafe {
            (*self.waiter.get()).write(current());
        }
        self.state.fetch_or(WAITER_BIT, Ordering::Release);
    }

    /// # Safety
    ///
    /// [WAITER_BIT] must have been observed with acquire ordering.
    unsafe fn waiter_handle(&self) -> &Thread {
        unsafe { (*self.waiter.get()).assume_init_ref() }
    }
}

impl Drop for WakeCounter {
    fn drop(&mut self) {
        if *self.state.get_mut() & WAITER_BIT != 0 {
            unsafe { self.waiter.get_mut().assume_init_drop() };
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    use crate::sync::*;

    /// Several writers bump the counter; a single reader must see the final total.
    fn writers_reach_total(writers: usize, per_writer: u64) {
        let counter = Arc::new(WakeCounter::new());
        let target = writers as u64 * per_writer;

        let handles = (0..writers)
            .map(|_| {
                let counter = counter.clone();
                spawn(move || {
                    for _ in 0..per_writer {
                        counter.increment();
                    }
                })
            })
            .collect::<Vec<_>>();

        let mut seen = 0;
        while seen < target {
            seen = counter.wait(seen);
        }

        for h in handles {
            h.join().unwrap();
        }

        assert_eq!(counter.get(), target);
    }

    #[test]
    fn one_writer() {
        wrap_test(|| writers_reach_total(1, 2));
    }

    #[test]
    fn two_writers() {
        wrap_test(|| writers_reach_total(2, 2));
    }
}

#[cfg(all(test, not(loom)))]
mod not_loom_tests {
    use super::*;

    #[test]
    fn timeout_returns_none_without_increments() {
        let counter = WakeCounter::new();
        let started = Instant::now();
        assert_eq!(counter.wait_timeout(0, Duration::from_millis(50)), None);
        assert!(started.elapsed() >= Duration::from_millis(50));
    }

    #[test]
    fn already_changed_returns_immediately() {
        let counter = WakeCounter::new();
        counter.increment();
        assert_eq!(counter.wait_timeout(0, Duration::from_secs(5)), Some(1));
    }

    #[test]
    fn woken_from_other_thread() {
        let counter = std::sync::Arc::new(WakeCounter::new());
        let bumper = {
            let counter = counter.clone();
            std::thread::spawn(move || {
                std::thread::sleep(Duration::from_millis(20));
                counter.increment();
            })
        };

        assert_eq!(counter.wait_timeout(0, Duration::from_secs(10)), Some(1));
        bumper.join().unwrap();
    }
}
