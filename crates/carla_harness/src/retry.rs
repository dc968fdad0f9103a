use std::fmt::Display;
use std::time::Duration;

use crate::error::{Error, Result};

/// A bounded retry loop: at most `attempts` tries, sleeping `backoff` after each failure.
///
/// Every place the harness waits on something external (a server starting to listen, a process dying, a host
/// registering its ports) goes through this, so that nothing can retry forever.  Running out of attempts is always an
/// error.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct Retry {
    attempts: u32,
    backoff: Duration,
}

impl Retry {
    /// `attempts` is clamped to at least one.
    pub fn new(attempts: u32, backoff: Duration) -> Self {
        Self {
            attempts: attempts.max(1),
            backoff,
        }
    }

    /// Poll every `poll` for at most `total`.
    pub fn deadline(total: Duration, poll: Duration) -> Self {
        let poll_secs = poll.as_secs_f64().max(f64::EPSILON);
        let attempts = (total.as_secs_f64() / poll_secs).ceil();
        Self::new(attempts.min(u32::MAX as f64) as u32, poll)
    }

    pub fn attempts(&self) -> u32 {
        self.attempts
    }

    pub fn backoff(&self) -> Duration {
        self.backoff
    }

    /// Run `op` until it succeeds or attempts run out.
    ///
    /// `op` receives the zero-based attempt number.  No sleep happens after the final failure.
    pub fn run<T, E: Display>(&self, what: &str, mut op: impl FnMut(u32) -> Result<T, E>) -> Result<T> {
        let mut last = String::new();

        for attempt in 0..self.attempts {
            match op(attempt) {
                Ok(x) => return Ok(x),
                Err(e) => {
                    log::debug!("{what}: attempt {} of {} failed: {e}", attempt + 1, self.attempts);
                    last = e.to_string();
                }
            }

            if attempt + 1 < self.attempts && !self.backoff.is_zero() {
                std::thread::sleep(self.backoff);
            }
        }

        Err(Error::retries_exhausted(what, self.attempts, last))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn succeeds_on_a_later_attempt() {
        let retry = Retry::new(5, Duration::ZERO);
        let got = retry
            .run("counting", |attempt| {
                if attempt < 3 {
                    Err("not yet")
                } else {
                    Ok(attempt)
                }
            })
            .unwrap();
        assert_eq!(got, 3);
    }

    #[test]
    fn exhaustion_carries_the_last_failure() {
        let mut calls = 0;
        let err = Retry::new(4, Duration::ZERO)
            .run("never", |attempt| -> Result<(), String> {
                calls += 1;
                Err(format!("failure {attempt}"))
            })
            .unwrap_err();

        assert_eq!(calls, 4);
        assert!(err.is_retries_exhausted());
        assert!(err.to_string().contains("failure 3"), "{err}");
    }

    #[test]
    fn deadline_rounds_up() {
        let retry = Retry::deadline(Duration::from_millis(250), Duration::from_millis(100));
        assert_eq!(retry.attempts(), 3);
        assert_eq!(Retry::new(0, Duration::ZERO).attempts(), 1);
    }
}
