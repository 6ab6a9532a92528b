//! Named retry policies for the job engine (§4.7 "Retry policies").

use std::time::Duration;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RetryPolicy {
    None,
    Linear,
    Standard,
}

impl RetryPolicy {
    pub fn parse(name: &str) -> Option<Self> {
        match name {
            "none" => Some(Self::None),
            "linear" => Some(Self::Linear),
            "standard" => Some(Self::Standard),
            _ => None,
        }
    }

    pub fn max_attempts(self) -> u32 {
        match self {
            RetryPolicy::None => 1,
            RetryPolicy::Linear => 5,
            RetryPolicy::Standard => 10,
        }
    }

    /// Delay before the *next* attempt, given the 1-indexed attempt number that just failed.
    pub fn backoff(self, attempt: u32) -> Duration {
        match self {
            RetryPolicy::None => Duration::ZERO,
            RetryPolicy::Linear => Duration::from_secs(5),
            RetryPolicy::Standard => Duration::from_secs(1u64.saturating_mul(1 << attempt.min(10))),
        }
    }
}

/// Push jobs always retry with attempts = 3, exponential backoff from 1 s (§4.7).
pub struct PushRetryPolicy;

impl PushRetryPolicy {
    pub const MAX_ATTEMPTS: u32 = 3;

    pub fn backoff(attempt: u32) -> Duration {
        Duration::from_secs(1u64.saturating_mul(1 << attempt.min(10)))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn standard_policy_allows_ten_attempts() {
        assert_eq!(RetryPolicy::Standard.max_attempts(), 10);
    }

    #[test]
    fn linear_policy_backs_off_a_fixed_five_seconds() {
        assert_eq!(RetryPolicy::Linear.backoff(1), Duration::from_secs(5));
        assert_eq!(RetryPolicy::Linear.backoff(4), Duration::from_secs(5));
    }

    #[test]
    fn standard_policy_backs_off_exponentially() {
        assert_eq!(RetryPolicy::Standard.backoff(0), Duration::from_secs(1));
        assert_eq!(RetryPolicy::Standard.backoff(1), Duration::from_secs(2));
        assert_eq!(RetryPolicy::Standard.backoff(3), Duration::from_secs(8));
    }

    #[test]
    fn unknown_policy_name_does_not_parse() {
        assert_eq!(RetryPolicy::parse("exotic"), None);
    }

    #[test]
    fn push_retry_caps_at_three_attempts() {
        assert_eq!(PushRetryPolicy::MAX_ATTEMPTS, 3);
        assert_eq!(PushRetryPolicy::backoff(0), Duration::from_secs(1));
    }
}
