//! Retry policies
//!
//! A policy is created per logical operation and polled with [`RetryPolicy::attempt`] in a loop:
//! the first call returns immediately, later calls sleep according to the policy before
//! permitting another attempt, and `false` means the policy is exhausted.
//!
//! ```
//! use esox_resourcepool::{ExponentialBackoffRetry, RetryPolicy};
//! use std::time::Duration;
//!
//! let mut policy = ExponentialBackoffRetry::new(Duration::ZERO, Duration::ZERO, 2);
//! let mut calls = 0;
//! while policy.attempt() {
//!     calls += 1;
//! }
//! assert_eq!(calls, 3);
//! ```

use std::fmt;
use std::sync::Arc;
use std::time::Duration;

use tracing::warn;

use crate::backoff::{
    CountingBackoff, ExponentialBackoff, ExponentialWait, FixedBackoff, NoBackoff, WaitStrategy,
};
use crate::errors::RetryError;
use crate::sleeper::{Sleeper, ThreadSleeper, TimeContext};

/// Attempt-scoped retry state machine
pub trait RetryPolicy: Send {
    /// Number of attempts permitted so far
    fn attempt_count(&self) -> u32;

    /// Wait for the next attempt; `false` once the policy is exhausted
    fn attempt(&mut self) -> bool;
}

impl<P: RetryPolicy + ?Sized> RetryPolicy for Box<P> {
    fn attempt_count(&self) -> u32 {
        (**self).attempt_count()
    }

    fn attempt(&mut self) -> bool {
        (**self).attempt()
    }
}

/// Retry bounded by a number of retries after the first attempt
pub struct CountingRetry<B> {
    max_retries: u32,
    attempt_count: u32,
    backoff: B,
    sleeper: Arc<dyn Sleeper>,
}

/// Counting retry that never sleeps
pub type InstantCountingRetry = CountingRetry<NoBackoff>;

/// Counting retry with a constant sleep
pub type FixedCountingRetry = CountingRetry<FixedBackoff>;

/// Counting retry with randomized exponential sleeps
pub type ExponentialBackoffRetry = CountingRetry<ExponentialBackoff>;

impl<B: CountingBackoff> CountingRetry<B> {
    /// Create a policy permitting `max_retries` retries after the first attempt
    pub fn with_backoff(max_retries: u32, backoff: B) -> Self {
        Self {
            max_retries,
            attempt_count: 0,
            backoff,
            sleeper: Arc::new(ThreadSleeper),
        }
    }

    /// Replace the sleeper (for testing)
    pub fn with_sleeper(mut self, sleeper: Arc<dyn Sleeper>) -> Self {
        self.sleeper = sleeper;
        self
    }

    pub fn max_retries(&self) -> u32 {
        self.max_retries
    }

    /// Start over as if no attempt had been made
    pub fn reset(&mut self) {
        self.attempt_count = 0;
    }
}

impl InstantCountingRetry {
    pub fn new(max_retries: u32) -> Self {
        Self::with_backoff(max_retries, NoBackoff)
    }
}

impl FixedCountingRetry {
    pub fn new(sleep: Duration, max_retries: u32) -> Self {
        Self::with_backoff(max_retries, FixedBackoff(sleep))
    }
}

impl ExponentialBackoffRetry {
    pub fn new(base_sleep: Duration, max_sleep: Duration, max_retries: u32) -> Self {
        Self::with_backoff(max_retries, ExponentialBackoff::new(base_sleep, max_sleep))
    }
}

impl<B: CountingBackoff> RetryPolicy for CountingRetry<B> {
    fn attempt_count(&self) -> u32 {
        self.attempt_count
    }

    fn attempt(&mut self) -> bool {
        if self.attempt_count > self.max_retries {
            return false;
        }
        if self.attempt_count > 0 {
            let sleep = self.backoff.sleep_time(self.attempt_count);
            self.sleeper.sleep(sleep);
        }
        self.attempt_count += 1;
        true
    }
}

impl<B: fmt::Debug> fmt::Debug for CountingRetry<B> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("CountingRetry")
            .field("max_retries", &self.max_retries)
            .field("attempt_count", &self.attempt_count)
            .field("backoff", &self.backoff)
            .finish()
    }
}

/// Retry bounded by a total duration measured from construction
#[derive(Debug)]
pub struct TimeBoundedRetry<W> {
    time: TimeContext,
    max_duration: Duration,
    end_ms: u64,
    attempt_count: u32,
    wait: W,
}

/// Time-bounded retry with doubling, jittered waits
pub type ExponentialTimeBoundedRetry = TimeBoundedRetry<ExponentialWait>;

impl<W: WaitStrategy> TimeBoundedRetry<W> {
    pub fn new(time: TimeContext, max_duration: Duration, wait: W) -> Self {
        let start_ms = time.clock().now_millis();
        let max_ms = u64::try_from(max_duration.as_millis()).unwrap_or(u64::MAX);
        Self {
            end_ms: start_ms.saturating_add(max_ms),
            time,
            max_duration,
            attempt_count: 0,
            wait,
        }
    }

    pub fn max_duration(&self) -> Duration {
        self.max_duration
    }
}

impl<W: WaitStrategy> RetryPolicy for TimeBoundedRetry<W> {
    fn attempt_count(&self) -> u32 {
        self.attempt_count
    }

    fn attempt(&mut self) -> bool {
        if self.attempt_count == 0 {
            self.attempt_count = 1;
            return true;
        }
        let now = self.time.clock().now_millis();
        if now >= self.end_ms {
            return false;
        }
        let remaining = Duration::from_millis(self.end_ms - now);
        let wait = self.wait.next_wait(self.attempt_count).min(remaining);
        if !wait.is_zero() {
            self.time.sleeper().sleep(wait);
        }
        self.attempt_count += 1;
        true
    }
}

impl ExponentialTimeBoundedRetry {
    pub fn builder() -> ExponentialTimeBoundedRetryBuilder {
        ExponentialTimeBoundedRetryBuilder::default()
    }
}

/// Builder for [`ExponentialTimeBoundedRetry`]
#[derive(Debug, Clone)]
pub struct ExponentialTimeBoundedRetryBuilder {
    time: TimeContext,
    max_duration: Duration,
    initial_sleep: Duration,
    max_sleep: Duration,
    skip_initial_sleep: bool,
}

impl Default for ExponentialTimeBoundedRetryBuilder {
    fn default() -> Self {
        Self {
            time: TimeContext::system(),
            max_duration: Duration::from_secs(30),
            initial_sleep: Duration::from_millis(50),
            max_sleep: Duration::from_secs(3),
            skip_initial_sleep: false,
        }
    }
}

impl ExponentialTimeBoundedRetryBuilder {
    pub fn with_time_context(mut self, time: TimeContext) -> Self {
        self.time = time;
        self
    }

    /// Total time to keep retrying for
    pub fn with_max_duration(mut self, max_duration: Duration) -> Self {
        self.max_duration = max_duration;
        self
    }

    /// Sleep before the first retry
    pub fn with_initial_sleep(mut self, initial_sleep: Duration) -> Self {
        self.initial_sleep = initial_sleep;
        self
    }

    /// Cap for the doubling sleep
    pub fn with_max_sleep(mut self, max_sleep: Duration) -> Self {
        self.max_sleep = max_sleep;
        self
    }

    /// Retry the first time without sleeping
    pub fn with_skip_initial_sleep(mut self) -> Self {
        self.skip_initial_sleep = true;
        self
    }

    pub fn build(self) -> ExponentialTimeBoundedRetry {
        TimeBoundedRetry::new(
            self.time,
            self.max_duration,
            ExponentialWait::new(self.initial_sleep, self.max_sleep, self.skip_initial_sleep),
        )
    }
}

/// Run `f` until it succeeds or `policy` is exhausted
///
/// Every failure is logged; the last one is returned inside [`RetryError::Exhausted`].
///
/// # Examples
///
/// ```
/// use esox_resourcepool::{InstantCountingRetry, retry};
///
/// let mut calls = 0;
/// let value = retry("load", || {
///     calls += 1;
///     if calls < 3 { Err("not yet") } else { Ok(calls) }
/// }, &mut InstantCountingRetry::new(5)).unwrap();
/// assert_eq!(value, 3);
/// ```
pub fn retry<T, E, F, P>(action: &str, mut f: F, policy: &mut P) -> Result<T, RetryError<E>>
where
    F: FnMut() -> Result<T, E>,
    E: fmt::Display,
    P: RetryPolicy + ?Sized,
{
    let mut last_error = None;
    while policy.attempt() {
        match f() {
            Ok(value) => return Ok(value),
            Err(err) => {
                warn!(action, attempt = policy.attempt_count(), error = %err, "Retryable operation failed");
                last_error = Some(err);
            }
        }
    }
    match last_error {
        Some(source) => Err(RetryError::Exhausted {
            action: action.to_string(),
            attempts: policy.attempt_count(),
            source,
        }),
        None => Err(RetryError::NoAttempts { action: action.to_string() }),
    }
}

/// Policy permitting a single attempt
pub fn no_retry_policy() -> InstantCountingRetry {
    InstantCountingRetry::new(0)
}

/// Exponential time-bounded policy used by clients of the storage service
pub fn default_retry(
    max_duration: Duration,
    base_sleep: Duration,
    max_sleep: Duration,
) -> ExponentialTimeBoundedRetry {
    ExponentialTimeBoundedRetry::builder()
        .with_max_duration(max_duration)
        .with_initial_sleep(base_sleep)
        .with_max_sleep(max_sleep)
        .build()
}
