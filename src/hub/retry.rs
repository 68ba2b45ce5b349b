//! Reconnection pacing.
//!
//! After a connection failure the transport asks [`RetryState::can_retry`]
//! on every poll. The first attempt of a sequence is immediate; later ones
//! wait for an exponentially growing, jittered delay and never closer than
//! [`MIN_RETRY_INTERVAL`]. When a total time budget is configured and the
//! sequence outlives it, retrying stops for good until the policy is set
//! again.

use crate::time::Instant;
use core::time::Duration;
use rand::rngs::SmallRng;
use rand::{Rng, SeedableRng};

/// Floor between two connection attempts.
pub const MIN_RETRY_INTERVAL: Duration = Duration::from_secs(1);

// 2^30 s is already decades; larger exponents only risk overflow.
const MAX_BACKOFF_EXPONENT: u32 = 30;

/// Retry policies accepted by the client API.
///
/// Only [`RetryPolicy::ExponentialBackoffWithJitter`] has its own behavior;
/// the others are accepted for API compatibility and behave the same way.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum RetryPolicy {
    /// No retry.
    None,
    /// Retry immediately.
    Immediate,
    /// Retry at a fixed interval.
    Interval,
    /// Retry with a linearly growing delay.
    LinearBackoff,
    /// Retry with an exponentially growing delay.
    ExponentialBackoff,
    /// Retry with an exponentially growing, randomized delay.
    #[default]
    ExponentialBackoffWithJitter,
    /// Retry after a random delay.
    Random,
}

/// Bookkeeping for one retry policy.
#[derive(Debug, Clone)]
pub struct RetryState {
    policy: RetryPolicy,
    // Zero means no limit.
    timeout_limit: Duration,
    attempts: u32,
    sequence_start: Option<Instant>,
    last_attempt: Option<Instant>,
    stopped_at: Option<Instant>,
    next_delay: Duration,
    expired: bool,
    rng: SmallRng,
}

impl RetryState {
    /// Creates a fresh state. `timeout_limit_secs == 0` retries forever.
    pub fn new(policy: RetryPolicy, timeout_limit_secs: u64, seed: u64) -> Self {
        if policy != RetryPolicy::ExponentialBackoffWithJitter {
            warn!(
                "retry policy {:?} not implemented, using exponential backoff with jitter",
                policy
            );
        }
        Self {
            policy,
            timeout_limit: Duration::from_secs(timeout_limit_secs),
            attempts: 0,
            sequence_start: None,
            last_attempt: None,
            stopped_at: None,
            next_delay: Duration::ZERO,
            expired: false,
            rng: SmallRng::seed_from_u64(seed),
        }
    }

    /// The configured policy.
    pub fn policy(&self) -> RetryPolicy {
        self.policy
    }

    /// Attempts made in the current sequence.
    pub fn attempts(&self) -> u32 {
        self.attempts
    }

    /// Delay required before the next attempt.
    pub fn next_delay(&self) -> Duration {
        self.next_delay
    }

    /// Whether the budget has been exhausted.
    pub fn is_expired(&self) -> bool {
        self.expired
    }

    /// When the last sequence ended, by success or expiry.
    pub fn stopped_at(&self) -> Option<Instant> {
        self.stopped_at
    }

    /// Decides whether a connection attempt may be made at `now`, and
    /// records it if so.
    pub fn can_retry(&mut self, now: Instant) -> bool {
        if self.expired {
            return false;
        }
        let (Some(start), Some(last)) = (self.sequence_start, self.last_attempt) else {
            self.sequence_start = Some(now);
            self.last_attempt = Some(now);
            self.stopped_at = None;
            self.attempts = 1;
            self.next_delay = self.compute_delay(Duration::ZERO);
            return true;
        };

        let elapsed = now.saturating_duration_since(start);
        if !self.timeout_limit.is_zero() && elapsed > self.timeout_limit {
            warn!(
                "retry budget of {} s exhausted after {} attempts",
                self.timeout_limit.as_secs(),
                self.attempts
            );
            self.expired = true;
            self.stopped_at = Some(now);
            return false;
        }

        let since_last = now.saturating_duration_since(last);
        if since_last < MIN_RETRY_INTERVAL || since_last < self.next_delay {
            return false;
        }

        self.attempts = self.attempts.saturating_add(1);
        self.last_attempt = Some(now);
        self.next_delay = self.compute_delay(elapsed);
        debug!(
            "retry attempt {} allowed, next delay {} ms",
            self.attempts,
            self.next_delay.as_millis() as u64
        );
        true
    }

    /// Ends the current sequence after a successful connection.
    pub fn stop(&mut self, now: Instant) {
        self.sequence_start = None;
        self.last_attempt = None;
        self.attempts = 0;
        self.next_delay = Duration::ZERO;
        self.stopped_at = Some(now);
    }

    /// `((2^n - 1) / 4) + random(0, that / 2)` seconds, clipped to the budget left.
    fn compute_delay(&mut self, elapsed: Duration) -> Duration {
        let exponent = self.attempts.min(MAX_BACKOFF_EXPONENT);
        let base_ms = ((1u64 << exponent) - 1) * 1000 / 4;
        let jitter_ms = self.rng.gen_range(0..=base_ms / 2);
        let delay = Duration::from_millis(base_ms + jitter_ms);
        if self.timeout_limit.is_zero() {
            delay
        } else {
            delay.min(self.timeout_limit.saturating_sub(elapsed))
        }
    }
}

impl Default for RetryState {
    fn default() -> Self {
        Self::new(RetryPolicy::default(), 0, 0)
    }
}
