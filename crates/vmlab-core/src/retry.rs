use crate::CoreError;
use std::time::Duration;
use tracing::warn;
use vmlab_schema::Settings;

pub const DEFAULT_ATTEMPTS: u32 = 10;
pub const DEFAULT_INTERVAL: Duration = Duration::from_secs(3);

/// Fixed-count, fixed-interval retry of transient creation failures.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetryPolicy {
    attempts: u32,
    interval: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            attempts: DEFAULT_ATTEMPTS,
            interval: DEFAULT_INTERVAL,
        }
    }
}

impl RetryPolicy {
    /// At least one attempt is always made.
    pub fn new(attempts: u32, interval: Duration) -> Self {
        Self {
            attempts: attempts.max(1),
            interval,
        }
    }

    /// No sleeping between attempts.
    pub fn immediate(attempts: u32) -> Self {
        Self::new(attempts, Duration::ZERO)
    }

    pub fn from_settings(settings: &Settings) -> Self {
        Self::new(
            settings.retry_attempts,
            Duration::from_secs(settings.retry_interval_secs),
        )
    }

    pub fn attempts(&self) -> u32 {
        self.attempts
    }

    pub fn interval(&self) -> Duration {
        self.interval
    }

    /// Run `op` until it succeeds, fails with a non-transient error, or the
    /// attempt ceiling is reached. The last error is returned.
    ///
    /// `op` receives the 1-based attempt number and must leave nothing behind
    /// when it fails.
    pub fn run<T>(
        &self,
        what: &str,
        mut op: impl FnMut(u32) -> Result<T, CoreError>,
    ) -> Result<T, CoreError> {
        let mut attempt = 1;
        loop {
            match op(attempt) {
                Ok(value) => return Ok(value),
                Err(e) if e.is_transient() && attempt < self.attempts => {
                    warn!(
                        "{what}: attempt {attempt}/{} failed: {e}; retrying",
                        self.attempts
                    );
                    if !self.interval.is_zero() {
                        std::thread::sleep(self.interval);
                    }
                    attempt += 1;
                }
                Err(e) => return Err(e),
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use vmlab_schema::LabSubnet;

    fn transient() -> CoreError {
        CoreError::SubnetConflict(LabSubnet::new(1, 1))
    }

    #[test]
    fn defaults_match_settings_defaults() {
        assert_eq!(RetryPolicy::default(), RetryPolicy::from_settings(&Settings::default()));
        assert_eq!(RetryPolicy::default().attempts(), 10);
        assert_eq!(RetryPolicy::default().interval(), Duration::from_secs(3));
    }

    #[test]
    fn zero_attempts_still_tries_once() {
        assert_eq!(RetryPolicy::immediate(0).attempts(), 1);
    }

    #[test]
    fn succeeds_on_last_attempt() {
        let mut calls = 0;
        let out = RetryPolicy::immediate(10).run("test", |n| {
            calls += 1;
            if n < 10 {
                Err(transient())
            } else {
                Ok(n)
            }
        });
        assert_eq!(out.unwrap(), 10);
        assert_eq!(calls, 10);
    }

    #[test]
    fn exhaustion_returns_last_error() {
        let mut calls = 0;
        let out: Result<(), _> = RetryPolicy::immediate(3).run("test", |_| {
            calls += 1;
            Err(transient())
        });
        assert!(matches!(out, Err(CoreError::SubnetConflict(_))));
        assert_eq!(calls, 3);
    }

    #[test]
    fn fatal_errors_are_not_retried() {
        let mut calls = 0;
        let out: Result<(), _> = RetryPolicy::immediate(10).run("test", |_| {
            calls += 1;
            Err(CoreError::UnmappedKey('~'))
        });
        assert!(out.is_err());
        assert_eq!(calls, 1);
    }
}
