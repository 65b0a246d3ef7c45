//! Retry/backoff policy.
//!
//! A pure decision function, shared by every stage kind. The delays are
//! configuration, tuned from observed provider latency, not derived from any
//! SLA.

use std::time::Duration;

use animagen_models::ErrorKind;

/// Backoff configuration.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetryPolicy {
    /// Base delay for transient errors.
    pub base_delay: Duration,
    /// Base delay for rate-limited errors; providers under backpressure need
    /// more room than a flaky network call.
    pub rate_limit_delay: Duration,
    /// Upper bound on any computed delay.
    pub max_delay: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            base_delay: Duration::from_secs(5),
            rate_limit_delay: Duration::from_secs(30),
            max_delay: Duration::from_secs(120),
        }
    }
}

/// Outcome of a retry decision.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Decision {
    /// Re-queue the task, eligible after the given delay.
    Retry { after: Duration },
    /// Mark the task failed; no further attempts.
    Fail,
}

impl RetryPolicy {
    /// Decide what to do after a failed attempt.
    ///
    /// `attempt` is the number of attempts completed so far (>= 1). The
    /// delay doubles per attempt: `base * 2^(attempt-1)`, capped at
    /// `max_delay`.
    pub fn decide(&self, attempt: u32, max_attempts: u32, kind: ErrorKind) -> Decision {
        match kind {
            ErrorKind::Permanent | ErrorKind::DependencyFailed => return Decision::Fail,
            ErrorKind::Transient | ErrorKind::RateLimited => {}
        }
        if attempt >= max_attempts {
            return Decision::Fail;
        }
        let base = match kind {
            ErrorKind::RateLimited => self.rate_limit_delay,
            _ => self.base_delay,
        };
        // Exponent is bounded to keep the multiplication from overflowing;
        // max_delay caps the result long before that matters.
        let factor = 2u32.saturating_pow(attempt.saturating_sub(1).min(16));
        let after = base.saturating_mul(factor).min(self.max_delay);
        Decision::Retry { after }
    }
}
