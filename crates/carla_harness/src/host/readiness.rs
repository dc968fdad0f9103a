use std::time::{Duration, Instant};

/// Result of feeding one observation to a [ReadinessDebounce].
#[derive(Clone, Copy, Debug, PartialEq, Eq, derive_more::IsVariant)]
pub enum Debounced {
    NotReady,
    /// Ready continuously since `since`, but not for long enough yet.
    Settling { since: Instant },
    Ready,
}

/// Decides readiness from a stream of yes/no observations: ready means yes, without interruption, for at least
/// `min_wait`.
///
/// Hosts loading big presets register and drop ports several times before settling down, so one good observation
/// proves little.  Any no starts the wait over.
#[derive(Clone, Debug)]
pub struct ReadinessDebounce {
    min_wait: Duration,
    since: Option<Instant>,
}

impl ReadinessDebounce {
    pub fn new(min_wait: Duration) -> Self {
        Self {
            min_wait,
            since: None,
        }
    }

    pub fn observe(&mut self, ready: bool, now: Instant) -> Debounced {
        if !ready {
            self.since = None;
            return Debounced::NotReady;
        }

        let since = *self.since.get_or_insert(now);
        if now.saturating_duration_since(since) >= self.min_wait {
            Debounced::Ready
        } else {
            Debounced::Settling { since }
        }
    }

    /// Start of the current uninterrupted run of ready observations.
    pub fn became_ready_at(&self) -> Option<Instant> {
        self.since
    }

    pub fn reset(&mut self) {
        self.since = None;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    use pretty_assertions::assert_eq;

    #[test]
    fn zero_wait_is_ready_at_once() {
        let now = Instant::now();
        let mut d = ReadinessDebounce::new(Duration::ZERO);
        assert_eq!(d.observe(false, now), Debounced::NotReady);
        assert_eq!(d.observe(true, now), Debounced::Ready);
    }

    #[test]
    fn flapping_restarts_the_wait() {
        let t0 = Instant::now();
        let at = |ms| t0 + Duration::from_millis(ms);
        let mut d = ReadinessDebounce::new(Duration::from_millis(500));

        assert_eq!(d.observe(true, at(0)), Debounced::Settling { since: at(0) });
        assert_eq!(d.observe(true, at(400)), Debounced::Settling { since: at(0) });
        assert_eq!(d.observe(false, at(450)), Debounced::NotReady);
        assert_eq!(d.became_ready_at(), None);

        assert_eq!(d.observe(true, at(600)), Debounced::Settling { since: at(600) });
        assert!(d.observe(true, at(1000)).is_settling());
        assert_eq!(d.observe(true, at(1100)), Debounced::Ready);
        assert_eq!(d.became_ready_at(), Some(at(600)));

        d.reset();
        assert!(d.observe(true, at(1200)).is_settling());
    }
}
