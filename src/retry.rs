//! retry combinator for idempotent I/O actions

use std::time::{Duration, Instant};

use serde::{Deserialize, Serialize};
use tracing::warn;

/// limits for retrying an idempotent action
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct RetryPolicy {
    /// total attempts, including the first
    pub max_tries: u32,
    /// pause between attempts
    #[serde(rename = "period_ms", with = "millis")]
    pub period: Duration,
    /// wall-clock budget across all attempts
    #[serde(
        rename = "max_time_ms",
        default,
        with = "opt_millis",
        skip_serializing_if = "Option::is_none"
    )]
    pub max_time: Option<Duration>,
}

impl RetryPolicy {
    pub fn new(max_tries: u32, period: Duration) -> Self {
        Self {
            max_tries,
            period,
            max_time: None,
        }
    }

    pub fn with_max_time(mut self, max_time: Duration) -> Self {
        self.max_time = Some(max_time);
        self
    }

    /// single attempt, no waiting
    pub fn once() -> Self {
        Self::new(1, Duration::ZERO)
    }
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_tries: 5,
            period: Duration::from_millis(200),
            max_time: Some(Duration::from_secs(30)),
        }
    }
}

/// run `action` until `is_success` accepts its value
///
/// errors matching `should_retry` are retried under the same limits as
/// rejected values; any other error is returned immediately. once the tries
/// or the time budget run out, `Ok(None)` reports the failure instead of the
/// last error.
pub fn retry<T, E, F, S, C>(
    policy: &RetryPolicy,
    mut action: F,
    is_success: S,
    should_retry: C,
) -> Result<Option<T>, E>
where
    F: FnMut() -> Result<T, E>,
    S: Fn(&T) -> bool,
    C: Fn(&E) -> bool,
    E: std::fmt::Display,
{
    let start = Instant::now();
    let max_tries = policy.max_tries.max(1);
    let mut attempt = 0;

    loop {
        attempt += 1;
        match action() {
            Ok(value) if is_success(&value) => return Ok(Some(value)),
            Ok(_) => {
                warn!(attempt, max_tries, "attempt returned an unsuccessful result");
            }
            Err(e) if should_retry(&e) => {
                warn!(attempt, max_tries, error = %e, "attempt failed with retryable error");
            }
            Err(e) => return Err(e),
        }

        if attempt >= max_tries {
            return Ok(None);
        }
        if let Some(max_time) = policy.max_time {
            if start.elapsed() + policy.period > max_time {
                return Ok(None);
            }
        }
        if !policy.period.is_zero() {
            std::thread::sleep(policy.period);
        }
    }
}

mod millis {
    use std::time::Duration;

    use serde::{Deserialize, Deserializer, Serializer};

    pub fn serialize<S: Serializer>(d: &Duration, s: S) -> Result<S::Ok, S::Error> {
        s.serialize_u64(d.as_millis() as u64)
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(d: D) -> Result<Duration, D::Error> {
        Ok(Duration::from_millis(u64::deserialize(d)?))
    }
}

mod opt_millis {
    use std::time::Duration;

    use serde::{Deserialize, Deserializer, Serializer};

    pub fn serialize<S: Serializer>(d: &Option<Duration>, s: S) -> Result<S::Ok, S::Error> {
        match d {
            Some(d) => s.serialize_some(&(d.as_millis() as u64)),
            None => s.serialize_none(),
        }
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(d: D) -> Result<Option<Duration>, D::Error> {
        Ok(Option::<u64>::deserialize(d)?.map(Duration::from_millis))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::cell::Cell;

    #[derive(Debug)]
    struct TestError {
        transient: bool,
    }

    impl std::fmt::Display for TestError {
        fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
            write!(f, "test error (transient: {})", self.transient)
        }
    }

    fn fast(tries: u32) -> RetryPolicy {
        RetryPolicy::new(tries, Duration::ZERO)
    }

    #[test]
    fn test_first_attempt_succeeds() {
        let calls = Cell::new(0);
        let result: Result<Option<u16>, TestError> = retry(
            &fast(3),
            || {
                calls.set(calls.get() + 1);
                Ok(200)
            },
            |s| (200..300).contains(s),
            |e: &TestError| e.transient,
        );
        assert_eq!(result.unwrap(), Some(200));
        assert_eq!(calls.get(), 1);
    }

    #[test]
    fn test_retries_transient_then_succeeds() {
        let calls = Cell::new(0);
        let result: Result<Option<u16>, TestError> = retry(
            &fast(5),
            || {
                calls.set(calls.get() + 1);
                if calls.get() < 3 {
                    Err(TestError { transient: true })
                } else {
                    Ok(201)
                }
            },
            |s| (200..300).contains(s),
            |e| e.transient,
        );
        assert_eq!(result.unwrap(), Some(201));
        assert_eq!(calls.get(), 3);
    }

    #[test]
    fn test_fatal_error_propagates() {
        let calls = Cell::new(0);
        let result: Result<Option<u16>, TestError> = retry(
            &fast(5),
            || {
                calls.set(calls.get() + 1);
                Err(TestError { transient: false })
            },
            |_| true,
            |e| e.transient,
        );
        assert!(result.is_err());
        assert_eq!(calls.get(), 1);
    }

    #[test]
    fn test_exhausted_tries_reports_failure() {
        let calls = Cell::new(0);
        let result: Result<Option<u16>, TestError> = retry(
            &fast(4),
            || {
                calls.set(calls.get() + 1);
                Err(TestError { transient: true })
            },
            |_| true,
            |e| e.transient,
        );
        assert_eq!(result.unwrap(), None);
        assert_eq!(calls.get(), 4);
    }

    #[test]
    fn test_rejected_value_is_retried() {
        let calls = Cell::new(0);
        let result: Result<Option<u16>, TestError> = retry(
            &fast(3),
            || {
                calls.set(calls.get() + 1);
                Ok(500)
            },
            |s| (200..300).contains(s),
            |e: &TestError| e.transient,
        );
        assert_eq!(result.unwrap(), None);
        assert_eq!(calls.get(), 3);
    }

    #[test]
    fn test_max_time_stops_early() {
        let calls = Cell::new(0);
        let policy = RetryPolicy::new(100, Duration::from_millis(20))
            .with_max_time(Duration::from_millis(50));
        let result: Result<Option<u16>, TestError> = retry(
            &policy,
            || {
                calls.set(calls.get() + 1);
                Err(TestError { transient: true })
            },
            |_| true,
            |e| e.transient,
        );
        assert_eq!(result.unwrap(), None);
        assert!(calls.get() < 100);
        assert!(calls.get() >= 2);
    }

    #[test]
    fn test_policy_toml() {
        let policy: RetryPolicy = toml::from_str("max_tries = 3\nperiod_ms = 50\n").unwrap();
        assert_eq!(policy.max_tries, 3);
        assert_eq!(policy.period, Duration::from_millis(50));
        assert_eq!(policy.max_time, None);

        let text = toml::to_string(&RetryPolicy::default()).unwrap();
        let back: RetryPolicy = toml::from_str(&text).unwrap();
        assert_eq!(back, RetryPolicy::default());
    }
}
