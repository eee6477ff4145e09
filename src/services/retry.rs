use std::time::Duration;

use crate::services::handlers::HandlerError;

/// Whether a failed attempt should be re-queued. Fatal errors never
/// retry; transient errors retry until the attempt ceiling.
pub fn should_retry(attempts: i32, max_attempts: i32, error: &HandlerError) -> bool {
    if attempts >= max_attempts {
        return false;
    }
    matches!(error, HandlerError::Transient(_))
}

/// Exponential backoff between retry attempts, capped so a struggling
/// provider is not hammered.
#[derive(Debug, Clone, Copy)]
pub struct RetryPolicy {
    pub base: Duration,
    pub cap: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            base: Duration::from_secs(2),
            cap: Duration::from_secs(300),
        }
    }
}

impl RetryPolicy {
    /// Delay before the next delivery after `attempts` completed attempts:
    /// base * 2^(attempts-1), capped.
    pub fn backoff_delay(&self, attempts: i32) -> Duration {
        let exponent = attempts.saturating_sub(1).clamp(0, 30) as u32;
        let delay = self
            .base
            .checked_mul(1u32 << exponent)
            .unwrap_or(self.cap);
        delay.min(self.cap)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn fatal_errors_never_retry() {
        let err = HandlerError::Fatal("no main image".into());
        assert!(!should_retry(1, 3, &err));
    }

    #[test]
    fn transient_errors_retry_until_ceiling() {
        let err = HandlerError::Transient("timeout".into());
        assert!(should_retry(1, 3, &err));
        assert!(should_retry(2, 3, &err));
        assert!(!should_retry(3, 3, &err));
        assert!(!should_retry(4, 3, &err));
    }

    #[test]
    fn backoff_doubles_and_caps() {
        let policy = RetryPolicy {
            base: Duration::from_secs(2),
            cap: Duration::from_secs(10),
        };
        assert_eq!(policy.backoff_delay(1), Duration::from_secs(2));
        assert_eq!(policy.backoff_delay(2), Duration::from_secs(4));
        assert_eq!(policy.backoff_delay(3), Duration::from_secs(8));
        assert_eq!(policy.backoff_delay(4), Duration::from_secs(10));
        assert_eq!(policy.backoff_delay(60), Duration::from_secs(10));
    }
}
