//! Token bucket admission arithmetic
//!
//! This module provides the per-key [`TokenBucket`] together with the
//! [`BucketConfig`] it is built from and the [`Decision`] every admission
//! attempt returns.

use std::time::{Duration, Instant};

use parking_lot::Mutex;
use serde::Serialize;

use super::Error;

/// Default refill interval when none is given
const DEFAULT_INTERVAL: Duration = Duration::from_secs(1);

/// Immutable bucket parameters
///
/// `refill_rate` tokens are generated per `interval` of elapsed time, and
/// the bucket never holds more than `capacity` tokens.
///
/// # Example
///
/// ```
/// use floodgate::BucketConfig;
/// use std::time::Duration;
///
/// // 100 tokens per minute, bursts up to 500
/// let config = BucketConfig::with_interval(500, 100, Duration::from_secs(60));
/// assert!(config.validate().is_ok());
/// ```
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BucketConfig {
    /// Maximum tokens the bucket can hold
    pub capacity: i64,
    /// Tokens generated per `interval`
    pub refill_rate: i64,
    /// Duration over which `refill_rate` tokens are generated
    pub interval: Duration,
}

impl BucketConfig {
    /// Create a config refilling `refill_rate` tokens per second
    pub fn new(capacity: i64, refill_rate: i64) -> Self {
        Self::with_interval(capacity, refill_rate, DEFAULT_INTERVAL)
    }

    /// Create a config with an explicit refill interval
    pub fn with_interval(capacity: i64, refill_rate: i64, interval: Duration) -> Self {
        BucketConfig {
            capacity,
            refill_rate,
            interval,
        }
    }

    /// Check the config against the constructor rules
    ///
    /// # Errors
    ///
    /// Returns a configuration error when `capacity` or `refill_rate` is
    /// not positive, `interval` is zero, or `refill_rate` exceeds
    /// `capacity`.
    pub fn validate(&self) -> Result<(), Error> {
        if self.capacity <= 0 {
            return Err(Error::InvalidCapacity);
        }
        if self.refill_rate <= 0 {
            return Err(Error::InvalidRefillRate);
        }
        if self.interval.is_zero() {
            return Err(Error::InvalidInterval);
        }
        if self.refill_rate > self.capacity {
            return Err(Error::RefillRateExceedsCapacity);
        }
        Ok(())
    }

    /// Time to generate a single token, rounded up
    pub(crate) fn single_token_wait(&self) -> Duration {
        let interval_ns = self.interval.as_nanos();
        let rate = self.refill_rate as u128;
        let wait_ns = (interval_ns + rate - 1) / rate;
        Duration::from_nanos(u64::try_from(wait_ns).unwrap_or(u64::MAX))
    }
}

/// Result of a single admission attempt
///
/// `remaining` is the token count immediately after the call. When the
/// request is rejected, `retry_after` is the minimum wait until one token
/// is regenerated; it is zero for admitted requests.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Decision {
    /// Whether the request is admitted
    pub allowed: bool,
    /// Tokens left after this call
    pub remaining: i64,
    /// The bucket capacity
    pub limit: i64,
    /// Suggested wait before retrying (zero when admitted)
    pub retry_after: Duration,
}

/// Mutable per-key state, guarded by the bucket lock
struct BucketState {
    tokens: i64,
    last_refill: Instant,
    last_seen: Instant,
}

/// A single-key token bucket
///
/// The bucket starts full and refills fractionally: an admission call
/// first credits `floor(elapsed * refill_rate / interval)` tokens, then
/// consumes one if any are available. All state is guarded by an
/// exclusive lock, so one bucket can serve any number of threads.
///
/// # Example
///
/// ```
/// use floodgate::TokenBucket;
///
/// // 5 tokens, refilling 5 per second
/// let bucket = TokenBucket::new(5, 5)?;
///
/// let decision = bucket.admit();
/// assert!(decision.allowed);
/// assert_eq!(decision.remaining, 4);
/// # Ok::<(), floodgate::Error>(())
/// ```
pub struct TokenBucket {
    config: BucketConfig,
    state: Mutex<BucketState>,
}

impl TokenBucket {
    /// Create a bucket refilling `refill_rate` tokens per second
    ///
    /// # Errors
    ///
    /// Returns a configuration error for invalid parameters, see
    /// [`BucketConfig::validate`].
    pub fn new(capacity: i64, refill_rate: i64) -> Result<Self, Error> {
        Self::from_config(BucketConfig::new(capacity, refill_rate))
    }

    /// Create a bucket with an explicit refill interval
    pub fn with_interval(
        capacity: i64,
        refill_rate: i64,
        interval: Duration,
    ) -> Result<Self, Error> {
        Self::from_config(BucketConfig::with_interval(capacity, refill_rate, interval))
    }

    /// Create a bucket from a prepared config
    pub fn from_config(config: BucketConfig) -> Result<Self, Error> {
        config.validate()?;
        let now = Instant::now();
        Ok(TokenBucket {
            config,
            state: Mutex::new(BucketState {
                tokens: config.capacity,
                last_refill: now,
                last_seen: now,
            }),
        })
    }

    /// Attempt to consume one token
    ///
    /// Never fails once the bucket exists.
    pub fn admit(&self) -> Decision {
        self.admit_at(Instant::now())
    }

    pub(crate) fn admit_at(&self, now: Instant) -> Decision {
        let mut state = self.state.lock();

        if now > state.last_seen {
            state.last_seen = now;
        }
        self.refill(&mut state, now);

        if state.tokens > 0 {
            state.tokens -= 1;
            return Decision {
                allowed: true,
                remaining: state.tokens,
                limit: self.config.capacity,
                retry_after: Duration::ZERO,
            };
        }

        let next_token_at = state.last_refill + self.config.single_token_wait();
        Decision {
            allowed: false,
            remaining: 0,
            limit: self.config.capacity,
            retry_after: next_token_at.saturating_duration_since(now),
        }
    }

    /// Credit tokens for the time elapsed since `last_refill`
    ///
    /// `last_refill` advances by the duration consumed to generate the
    /// credited tokens, not to `now`. The sub-quantum remainder stays
    /// accounted for, so no refill time is ever lost between calls.
    fn refill(&self, state: &mut BucketState, now: Instant) {
        let elapsed = now.saturating_duration_since(state.last_refill);
        let interval_ns = self.config.interval.as_nanos();
        let generated =
            elapsed.as_nanos().saturating_mul(self.config.refill_rate as u128) / interval_ns;
        if generated == 0 {
            return;
        }

        let new_tokens = i64::try_from(generated).unwrap_or(i64::MAX);
        state.tokens = state
            .tokens
            .saturating_add(new_tokens)
            .min(self.config.capacity);

        // generated was floored, so the consumed duration never exceeds elapsed.
        let consumed_ns = generated.saturating_mul(interval_ns) / self.config.refill_rate as u128;
        state.last_refill += Duration::from_nanos(u64::try_from(consumed_ns).unwrap_or(u64::MAX));
    }

    /// Timestamp of the most recent admission call
    pub(crate) fn last_seen(&self) -> Instant {
        self.state.lock().last_seen
    }

    #[cfg(test)]
    pub(crate) fn snapshot(&self) -> (i64, Instant, Instant) {
        let state = self.state.lock();
        (state.tokens, state.last_refill, state.last_seen)
    }
}
