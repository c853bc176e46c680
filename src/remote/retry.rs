//! Bounded retry policy for remote readiness polling

use crate::config::SshConfig;
use std::time::Duration;

/// How often and how long to retry
#[derive(Debug, Clone, PartialEq)]
pub struct RetryPolicy {
    /// Attempts before giving up, at least 1
    pub max_attempts: u32,
    /// Wait after the first failed attempt
    pub interval: Duration,
    /// Growth factor for each further wait
    pub backoff_multiplier: f64,
    /// Upper bound for a single wait
    pub max_interval: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self::from(&SshConfig::default())
    }
}

impl From<&SshConfig> for RetryPolicy {
    fn from(config: &SshConfig) -> Self {
        Self {
            max_attempts: config.max_attempts.max(1),
            interval: Duration::from_millis(config.interval_ms),
            backoff_multiplier: config.backoff_multiplier.max(1.0),
            max_interval: Duration::from_millis(config.max_interval_ms),
        }
    }
}

impl RetryPolicy {
    /// Fixed interval between attempts
    pub fn fixed(max_attempts: u32, interval: Duration) -> Self {
        Self {
            max_attempts: max_attempts.max(1),
            interval,
            backoff_multiplier: 1.0,
            max_interval: interval,
        }
    }

    /// Wait after failed attempt number `attempt` (1-based)
    pub fn delay_after(&self, attempt: u32) -> Duration {
        let exponent = attempt.saturating_sub(1) as i32;
        let scaled = self.interval.as_secs_f64() * self.backoff_multiplier.powi(exponent);
        let capped = scaled.min(self.max_interval.as_secs_f64());
        Duration::from_secs_f64(capped.max(0.0))
    }

    /// Longest total time spent sleeping before the attempt cap is hit
    pub fn worst_case_wait(&self) -> Duration {
        (1..self.max_attempts).map(|a| self.delay_after(a)).sum()
    }
}
