//! Reconnect policy and timeout utilities.
//!
//! The helpers in this module are transport-agnostic: they decide how many
//! reconnect attempts a connection may spend and how long the worker waits
//! before each one.

use std::future::Future;
use std::time::{Duration, SystemTime, UNIX_EPOCH};

use serde::{Deserialize, Serialize};

/// Delay growth applied between reconnect attempts.
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum Backoff {
    /// Every attempt waits the same base delay.
    #[default]
    Fixed,
    /// The base delay doubles per attempt up to `max_delay_ms`, plus up to
    /// `jitter_ms` of random jitter.
    Exponential {
        /// Upper bound for delay growth, in milliseconds.
        max_delay_ms: u64,
        /// Maximum random jitter added to each delay, in milliseconds.
        jitter_ms: u64,
    },
}

/// Attempt budget and delay strategy for automatic reconnects.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct ReconnectPolicy {
    /// Maximum number of reconnect attempts after an unexpected closure.
    pub max_attempts: u32,
    /// Base delay waited before each reconnect attempt.
    pub delay: Duration,
    /// How the delay evolves across consecutive attempts.
    pub backoff: Backoff,
}

impl ReconnectPolicy {
    /// Constant-interval policy: every attempt waits exactly `delay`.
    pub fn fixed(max_attempts: u32, delay: Duration) -> Self {
        Self {
            max_attempts,
            delay,
            backoff: Backoff::Fixed,
        }
    }

    /// Returns `true` while another attempt may be spent.
    ///
    /// `attempts_so_far` is the current reconnect counter.
    pub fn allows(&self, attempts_so_far: u32) -> bool {
        attempts_so_far < self.max_attempts
    }

    /// Computes the delay to wait before the given reconnect attempt.
    ///
    /// `attempt` is 1-based.
    pub fn delay_for_attempt(&self, attempt: u32) -> Duration {
        match &self.backoff {
            Backoff::Fixed => self.delay,
            Backoff::Exponential {
                max_delay_ms,
                jitter_ms,
            } => {
                let max_delay = Duration::from_millis(*max_delay_ms);
                let mut delay = std::cmp::min(self.delay, max_delay);
                for _ in 1..attempt {
                    delay = std::cmp::min(delay.saturating_mul(2), max_delay);
                }
                delay.saturating_add(jitter_duration(Duration::from_millis(*jitter_ms), attempt))
            }
        }
    }
}

/// Applies a timeout to an async computation.
pub async fn with_timeout<T, Fut>(
    timeout: Duration,
    future: Fut,
) -> Result<T, tokio::time::error::Elapsed>
where
    Fut: Future<Output = T>,
{
    tokio::time::timeout(timeout, future).await
}

fn jitter_duration(max_jitter: Duration, attempt: u32) -> Duration {
    if max_jitter.is_zero() {
        return Duration::ZERO;
    }

    let limit_nanos = max_jitter.as_nanos().min(u64::MAX as u128) as u64;
    let now_nanos = SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .unwrap_or_default()
        .subsec_nanos() as u64;
    let mixed = now_nanos ^ (u64::from(attempt).wrapping_mul(0x9E37_79B9_7F4A_7C15));
    Duration::from_nanos(mixed % limit_nanos.saturating_add(1))
}

#[cfg(test)]
mod tests {
    use std::time::Duration;

    use super::{with_timeout, Backoff, ReconnectPolicy};

    #[test]
    fn fixed_policy_waits_the_same_interval_every_attempt() {
        let policy = ReconnectPolicy::fixed(10, Duration::from_millis(5000));
        for attempt in 1..=10 {
            assert_eq!(policy.delay_for_attempt(attempt), Duration::from_millis(5000));
        }
    }

    #[test]
    fn budget_is_exhausted_at_max_attempts() {
        let policy = ReconnectPolicy::fixed(2, Duration::ZERO);
        assert!(policy.allows(0));
        assert!(policy.allows(1));
        assert!(!policy.allows(2));
        assert!(!ReconnectPolicy::fixed(0, Duration::ZERO).allows(0));
    }

    #[test]
    fn exponential_policy_doubles_and_caps() {
        let policy = ReconnectPolicy {
            max_attempts: 10,
            delay: Duration::from_millis(100),
            backoff: Backoff::Exponential {
                max_delay_ms: 500,
                jitter_ms: 0,
            },
        };
        assert_eq!(policy.delay_for_attempt(1), Duration::from_millis(100));
        assert_eq!(policy.delay_for_attempt(2), Duration::from_millis(200));
        assert_eq!(policy.delay_for_attempt(3), Duration::from_millis(400));
        assert_eq!(policy.delay_for_attempt(4), Duration::from_millis(500));
        assert_eq!(policy.delay_for_attempt(9), Duration::from_millis(500));
    }

    #[test]
    fn exponential_jitter_stays_within_bound() {
        let policy = ReconnectPolicy {
            max_attempts: 3,
            delay: Duration::from_millis(50),
            backoff: Backoff::Exponential {
                max_delay_ms: 50,
                jitter_ms: 20,
            },
        };
        for attempt in 1..=3 {
            let delay = policy.delay_for_attempt(attempt);
            assert!(delay >= Duration::from_millis(50));
            assert!(delay <= Duration::from_millis(70));
        }
    }

    #[test]
    fn oversized_jitter_saturates_instead_of_overflowing() {
        let policy = ReconnectPolicy {
            max_attempts: 3,
            delay: Duration::from_millis(50),
            backoff: Backoff::Exponential {
                max_delay_ms: u64::MAX,
                jitter_ms: u64::MAX,
            },
        };
        for attempt in 1..=3 {
            assert!(policy.delay_for_attempt(attempt) >= Duration::from_millis(50));
        }
    }

    #[test]
    fn timeout_elapses_for_slow_future() {
        let runtime = tokio::runtime::Builder::new_current_thread()
            .enable_time()
            .build()
            .expect("runtime");

        runtime.block_on(async {
            let slow = tokio::time::sleep(Duration::from_secs(5));
            assert!(with_timeout(Duration::from_millis(5), slow).await.is_err());

            let fast = async { 7 };
            assert_eq!(with_timeout(Duration::from_secs(1), fast).await.ok(), Some(7));
        });
    }
}
