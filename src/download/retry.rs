//! Bounded retry with linear backoff for incomplete transfers.
//!
//! A transfer that ends short of its declared length is resumed from the
//! bytes on disk. The [`ResumePolicy`] decides whether another attempt is
//! allowed and how long to wait first:
//!
//! ```text
//! delay = backoff_base * attempt
//! ```
//!
//! With defaults (10 attempts, 1 s base) the waits are 1 s, 2 s, ... 9 s.
//!
//! ```
//! use packsync_core::download::{ResumeDecision, ResumePolicy};
//!
//! let policy = ResumePolicy::default();
//! match policy.after_incomplete(1) {
//!     ResumeDecision::Retry { delay, .. } => assert_eq!(delay.as_secs(), 1),
//!     ResumeDecision::GiveUp { .. } => unreachable!(),
//! }
//! ```

use std::time::Duration;

use tracing::debug;

use super::constants::{DEFAULT_BACKOFF_BASE, DEFAULT_MAX_ATTEMPTS};

/// Whether another attempt is made after an incomplete one.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ResumeDecision {
    /// Wait `delay`, then make attempt number `attempt`.
    Retry {
        /// How long to wait before resuming.
        delay: Duration,
        /// The attempt about to be made (1-indexed).
        attempt: u32,
    },
    /// All attempts used.
    GiveUp {
        /// Attempts made.
        attempts: u32,
    },
}

/// Attempt bound and backoff base.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ResumePolicy {
    max_attempts: u32,
    backoff_base: Duration,
}

impl Default for ResumePolicy {
    fn default() -> Self {
        Self {
            max_attempts: DEFAULT_MAX_ATTEMPTS,
            backoff_base: DEFAULT_BACKOFF_BASE,
        }
    }
}

impl ResumePolicy {
    /// Creates a policy. `max_attempts` is clamped to at least 1.
    #[must_use]
    pub fn new(max_attempts: u32, backoff_base: Duration) -> Self {
        Self {
            max_attempts: max_attempts.max(1),
            backoff_base,
        }
    }

    /// Returns the maximum number of attempts.
    #[must_use]
    pub fn max_attempts(&self) -> u32 {
        self.max_attempts
    }

    /// Decides what follows attempt number `attempt` (1-indexed) ending
    /// incomplete.
    #[must_use]
    pub fn after_incomplete(&self, attempt: u32) -> ResumeDecision {
        if attempt >= self.max_attempts {
            debug!(attempt, max = self.max_attempts, "max attempts reached");
            return ResumeDecision::GiveUp { attempts: attempt };
        }
        let delay = self.backoff_base.saturating_mul(attempt);
        debug!(attempt, delay_ms = delay.as_millis(), "will resume");
        ResumeDecision::Retry {
            delay,
            attempt: attempt + 1,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_values() {
        let policy = ResumePolicy::default();
        assert_eq!(policy.max_attempts(), 10);
        assert_eq!(policy.backoff_base, Duration::from_secs(1));
    }

    #[test]
    fn test_max_attempts_minimum_is_one() {
        assert_eq!(ResumePolicy::new(0, Duration::ZERO).max_attempts(), 1);
    }

    #[test]
    fn test_backoff_is_linear() {
        let policy = ResumePolicy::default();
        for attempt in 1..10 {
            assert_eq!(
                policy.after_incomplete(attempt),
                ResumeDecision::Retry {
                    delay: Duration::from_secs(u64::from(attempt)),
                    attempt: attempt + 1,
                }
            );
        }
    }

    #[test]
    fn test_gives_up_at_max_attempts() {
        let policy = ResumePolicy::default();
        assert_eq!(
            policy.after_incomplete(10),
            ResumeDecision::GiveUp { attempts: 10 }
        );
    }

    #[test]
    fn test_custom_base() {
        let policy = ResumePolicy::new(3, Duration::from_millis(5));
        assert_eq!(
            policy.after_incomplete(2),
            ResumeDecision::Retry {
                delay: Duration::from_millis(10),
                attempt: 3
            }
        );
        assert_eq!(
            policy.after_incomplete(3),
            ResumeDecision::GiveUp { attempts: 3 }
        );
    }
}
