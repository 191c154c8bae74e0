// Backoff calculation for throttled requests

use chrono::{DateTime, Utc};
use rand::Rng;
use std::time::Duration;

/// Computes the wait before retrying a throttled call
#[derive(Debug, Clone)]
pub struct BackoffCalculator {
    /// Wait before the first retry
    base: Duration,

    /// Upper bound for the exponential part
    max_wait: Duration,

    /// Upper bound for the uniform jitter added on top
    jitter_max: Duration,
}

impl BackoffCalculator {
    pub fn new(base: Duration, max_wait: Duration, jitter_max: Duration) -> Self {
        Self {
            base,
            max_wait,
            jitter_max,
        }
    }

    /// Wait before attempt `attempt` (1 = first retry).
    ///
    /// A usable server hint is returned as-is. Otherwise the wait is
    /// `base * 2^(attempt-1)` capped at `max_wait`, plus jitter in `[0, jitter_max]`.
    pub fn wait(&self, attempt: u32, server_hint: Option<&str>) -> Duration {
        if let Some(hint) = server_hint.and_then(parse_retry_after) {
            return hint;
        }

        self.exponential(attempt) + self.jitter()
    }

    /// Capped exponential part without jitter
    pub fn exponential(&self, attempt: u32) -> Duration {
        let exponent = attempt.max(1) - 1;
        2u32.checked_pow(exponent)
            .and_then(|factor| self.base.checked_mul(factor))
            .map_or(self.max_wait, |delay| delay.min(self.max_wait))
    }

    fn jitter(&self) -> Duration {
        if self.jitter_max.is_zero() {
            return Duration::ZERO;
        }
        rand::thread_rng().gen_range(Duration::ZERO..=self.jitter_max)
    }
}

/// Parse a `Retry-After` style hint: delta seconds (integer or fractional) or an HTTP date.
///
/// Negative and non-finite values are rejected. A date in the past means retry now.
pub fn parse_retry_after(raw: &str) -> Option<Duration> {
    let raw = raw.trim();
    if raw.is_empty() {
        return None;
    }

    if let Ok(secs) = raw.parse::<f64>() {
        if secs.is_finite() && secs >= 0.0 {
            return Duration::try_from_secs_f64(secs).ok();
        }
        return None;
    }

    let at = DateTime::parse_from_rfc2822(raw).ok()?.with_timezone(&Utc);
    Some((at - Utc::now()).to_std().unwrap_or(Duration::ZERO))
}
