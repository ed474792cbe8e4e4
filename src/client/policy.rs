use std::time::Duration;

use serde::{Deserialize, Serialize};

/// Exponential backoff for retryable unary failures (429 / 500 / 503 / 504, connect errors,
/// timeouts). Streams are never retried once the response has started.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RetryPolicy {
    pub max_retries: u32,
    #[serde(with = "millis")]
    pub initial_delay: Duration,
    #[serde(with = "millis")]
    pub max_delay: Duration,
    pub multiplier: f64,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_retries: 3,
            initial_delay: Duration::from_secs(1),
            max_delay: Duration::from_secs(60),
            multiplier: 2.0,
        }
    }
}

impl RetryPolicy {
    /// A policy that never retries.
    pub fn none() -> Self {
        Self {
            max_retries: 0,
            ..Self::default()
        }
    }

    pub fn with_max_retries(mut self, n: u32) -> Self {
        self.max_retries = n;
        self
    }

    pub fn with_initial_delay(mut self, d: Duration) -> Self {
        self.initial_delay = d;
        self
    }

    pub fn with_max_delay(mut self, d: Duration) -> Self {
        self.max_delay = d;
        self
    }

    /// Delay before retry number `attempt` (0-based). A server-provided `Retry-After` wins over
    /// the computed backoff; both are capped at `max_delay`.
    pub fn backoff_delay(&self, attempt: u32, retry_after_ms: Option<u32>) -> Duration {
        let base = if self.initial_delay.is_zero() {
            Duration::ZERO
        } else {
            let factor = self.multiplier.max(1.0).powi(attempt.min(64) as i32);
            let millis = (self.initial_delay.as_millis() as f64 * factor).min(u64::MAX as f64);
            Duration::from_millis(millis as u64)
        };
        let chosen = retry_after_ms
            .map(|ms| Duration::from_millis(ms as u64))
            .unwrap_or(base);
        chosen.min(self.max_delay)
    }
}

mod millis {
    use serde::{Deserialize, Deserializer, Serializer};
    use std::time::Duration;

    pub fn serialize<S: Serializer>(d: &Duration, s: S) -> Result<S::Ok, S::Error> {
        s.serialize_u64(d.as_millis() as u64)
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(d: D) -> Result<Duration, D::Error> {
        Ok(Duration::from_millis(u64::deserialize(d)?))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_backoff_grows_and_caps() {
        let policy = RetryPolicy::default()
            .with_initial_delay(Duration::from_millis(100))
            .with_max_delay(Duration::from_millis(500));
        assert_eq!(policy.backoff_delay(0, None), Duration::from_millis(100));
        assert_eq!(policy.backoff_delay(1, None), Duration::from_millis(200));
        assert_eq!(policy.backoff_delay(2, None), Duration::from_millis(400));
        assert_eq!(policy.backoff_delay(3, None), Duration::from_millis(500));
        assert_eq!(policy.backoff_delay(40, None), Duration::from_millis(500));
    }

    #[test]
    fn test_retry_after_wins_but_is_capped() {
        let policy = RetryPolicy::default().with_max_delay(Duration::from_secs(2));
        assert_eq!(policy.backoff_delay(0, Some(1500)), Duration::from_millis(1500));
        assert_eq!(policy.backoff_delay(0, Some(9000)), Duration::from_secs(2));
    }

    #[test]
    fn test_zero_initial_delay() {
        let policy = RetryPolicy::default().with_initial_delay(Duration::ZERO);
        assert_eq!(policy.backoff_delay(5, None), Duration::ZERO);
    }
}
