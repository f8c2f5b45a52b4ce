//! Backoff strategies for the retry policies.
//!
//! Counting policies ask a [`CountingBackoff`] how long to sleep before each retry; time-bounded
//! policies ask a [`WaitStrategy`]. In both cases `attempt_count` is the number of attempts already
//! made, so the first retry sees `1`.
//!
//! Randomization spreads retries of many callers sharing the same policy so they do not hammer
//! a recovering server in lock step.

use std::fmt;
use std::time::Duration;

use rand::{Rng, rng};

/// Largest exponent `n` used in `base * 2^n`; later attempts reuse it.
pub const MAX_EXPONENT: u32 = 30;

/// Sleep schedule for count-bounded retries
pub trait CountingBackoff: Send + fmt::Debug {
    fn sleep_time(&mut self, attempt_count: u32) -> Duration;
}

/// Retry immediately
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct NoBackoff;

impl CountingBackoff for NoBackoff {
    fn sleep_time(&mut self, _attempt_count: u32) -> Duration {
        Duration::ZERO
    }
}

/// Sleep the same amount before every retry
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FixedBackoff(pub Duration);

impl CountingBackoff for FixedBackoff {
    fn sleep_time(&mut self, _attempt_count: u32) -> Duration {
        self.0
    }
}

/// Randomized exponential backoff: `base * random[2^n, 2^(n+1))`, capped at `max`
///
/// # Examples
///
/// ```
/// use esox_resourcepool::{CountingBackoff, ExponentialBackoff};
/// use std::time::Duration;
///
/// let mut backoff = ExponentialBackoff::new(Duration::from_millis(10), Duration::from_millis(500));
/// let sleep = backoff.sleep_time(2);
/// assert!(sleep >= Duration::from_millis(40) && sleep < Duration::from_millis(80));
/// assert_eq!(backoff.sleep_time(40), Duration::from_millis(500));
/// ```
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ExponentialBackoff {
    base: Duration,
    max: Duration,
}

impl ExponentialBackoff {
    pub fn new(base: Duration, max: Duration) -> Self {
        Self { base, max }
    }

    pub fn base(&self) -> Duration {
        self.base
    }

    pub fn max(&self) -> Duration {
        self.max
    }

    /// Sleep time drawn from a caller-supplied RNG (for testing)
    pub fn sleep_time_with_rng<R: Rng>(&self, attempt_count: u32, rng: &mut R) -> Duration {
        let low = 1u64 << attempt_count.min(MAX_EXPONENT);
        let multiplier = rng.random_range(low..low << 1);
        let sleep_ms = as_millis_saturated(self.base).saturating_mul(multiplier);
        Duration::from_millis(sleep_ms).min(self.max)
    }
}

impl CountingBackoff for ExponentialBackoff {
    fn sleep_time(&mut self, attempt_count: u32) -> Duration {
        self.sleep_time_with_rng(attempt_count, &mut rng())
    }
}

/// Wait schedule for deadline-bounded retries
pub trait WaitStrategy: Send + fmt::Debug {
    fn next_wait(&mut self, attempt_count: u32) -> Duration;
}

/// Wait the same amount before every retry
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FixedWait(pub Duration);

impl WaitStrategy for FixedWait {
    fn next_wait(&mut self, _attempt_count: u32) -> Duration {
        self.0
    }
}

/// Doubling wait with up to 10% jitter, capped at `max_sleep`
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ExponentialWait {
    next_sleep: Duration,
    max_sleep: Duration,
    skip_initial_sleep: bool,
}

impl ExponentialWait {
    /// `initial_sleep` is raised to at least one millisecond so doubling makes progress
    pub fn new(initial_sleep: Duration, max_sleep: Duration, skip_initial_sleep: bool) -> Self {
        Self {
            next_sleep: initial_sleep.max(Duration::from_millis(1)),
            max_sleep,
            skip_initial_sleep,
        }
    }

    /// Wait drawn from a caller-supplied RNG (for testing)
    pub fn next_wait_with_rng<R: Rng>(&mut self, attempt_count: u32, rng: &mut R) -> Duration {
        if self.skip_initial_sleep && attempt_count <= 1 {
            return Duration::ZERO;
        }
        let next = self.next_sleep;
        self.next_sleep = next.saturating_mul(2).min(self.max_sleep);
        let next_ms = as_millis_saturated(next);
        let jitter = (rng.random_range(0.0..0.1) * next_ms as f64).round() as u64;
        next + Duration::from_millis(jitter)
    }
}

impl WaitStrategy for ExponentialWait {
    fn next_wait(&mut self, attempt_count: u32) -> Duration {
        self.next_wait_with_rng(attempt_count, &mut rng())
    }
}

fn as_millis_saturated(duration: Duration) -> u64 {
    duration.as_millis().try_into().unwrap_or(u64::MAX)
}
