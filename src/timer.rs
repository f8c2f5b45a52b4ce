//! Exponential event timer for pacing long-lived repeated actions such as reconnects

use std::sync::Arc;
use std::time::Duration;

use crate::clock::{Clock, SystemClock};

/// Interval used once doubling would overflow
const OVERFLOW_INTERVAL_MS: u64 = i32::MAX as u64;

/// Outcome of [`ExponentialTimer::tick`]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TimerResult {
    /// The horizon has passed; no further events will fire
    Expired,
    /// The next event is not due yet
    NotReady,
    /// An event fires now
    Ready,
}

/// Timer whose events fire at exponentially growing intervals until an absolute horizon
///
/// # Examples
///
/// ```
/// use esox_resourcepool::{ExponentialTimer, ManualClock, TimerResult};
/// use std::sync::Arc;
/// use std::time::Duration;
///
/// let clock = ManualClock::new(0);
/// let mut timer = ExponentialTimer::with_clock(
///     Duration::from_millis(10),
///     Duration::from_millis(100),
///     Duration::ZERO,
///     Duration::from_secs(1),
///     Arc::new(clock.clone()),
/// );
///
/// assert_eq!(timer.tick(), TimerResult::Ready);
/// assert_eq!(timer.tick(), TimerResult::NotReady);
/// clock.advance(10);
/// assert_eq!(timer.tick(), TimerResult::Ready);
/// ```
#[derive(Debug)]
pub struct ExponentialTimer {
    clock: Arc<dyn Clock>,
    max_interval_ms: u64,
    last_event_horizon_ms: u64,
    num_events: u64,
    next_event_ms: u64,
    interval_ms: u64,
}

impl ExponentialTimer {
    /// Create a timer driven by the system clock
    ///
    /// * `initial_interval` - interval after the first event
    /// * `max_interval` - cap for the doubling interval
    /// * `initial_wait` - delay before the first event may fire
    /// * `max_total_wait` - horizon after which the timer is expired
    pub fn new(
        initial_interval: Duration,
        max_interval: Duration,
        initial_wait: Duration,
        max_total_wait: Duration,
    ) -> Self {
        Self::with_clock(
            initial_interval,
            max_interval,
            initial_wait,
            max_total_wait,
            Arc::new(SystemClock::new()),
        )
    }

    pub fn with_clock(
        initial_interval: Duration,
        max_interval: Duration,
        initial_wait: Duration,
        max_total_wait: Duration,
        clock: Arc<dyn Clock>,
    ) -> Self {
        let now = clock.now_millis();
        let max_interval_ms = millis(max_interval);
        Self {
            max_interval_ms,
            last_event_horizon_ms: now.saturating_add(millis(max_total_wait)),
            next_event_ms: now.saturating_add(millis(initial_wait)),
            interval_ms: millis(initial_interval).min(max_interval_ms),
            num_events: 0,
            clock,
        }
    }

    /// Number of events fired so far
    pub fn num_events(&self) -> u64 {
        self.num_events
    }

    /// Current interval between events
    pub fn interval(&self) -> Duration {
        Duration::from_millis(self.interval_ms)
    }

    /// Check whether an event is due, firing and rescheduling it if so
    pub fn tick(&mut self) -> TimerResult {
        let now = self.clock.now_millis();
        if now >= self.last_event_horizon_ms {
            return TimerResult::Expired;
        }
        if now < self.next_event_ms {
            return TimerResult::NotReady;
        }
        self.next_event_ms = now.saturating_add(self.interval_ms);
        self.interval_ms = match self.interval_ms.checked_mul(2) {
            Some(doubled) => doubled.min(self.max_interval_ms),
            None => OVERFLOW_INTERVAL_MS,
        };
        self.num_events += 1;
        TimerResult::Ready
    }
}

fn millis(duration: Duration) -> u64 {
    u64::try_from(duration.as_millis()).unwrap_or(u64::MAX)
}
