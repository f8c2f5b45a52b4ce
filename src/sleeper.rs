//! Abstraction for sleeping the current thread
//!
//! Enables fast, deterministic retry tests without real time delays

use std::sync::Arc;
use std::time::Duration;

use parking_lot::Mutex;

use crate::clock::{Clock, ManualClock, SystemClock};

/// Abstraction for blocking the calling thread
pub trait Sleeper: Send + Sync + std::fmt::Debug {
    fn sleep(&self, duration: Duration);
}

/// Production sleeper backed by `std::thread::sleep`
#[derive(Debug, Default, Clone, Copy)]
pub struct ThreadSleeper;

impl Sleeper for ThreadSleeper {
    fn sleep(&self, duration: Duration) {
        if !duration.is_zero() {
            std::thread::sleep(duration);
        }
    }
}

/// Test sleeper that advances a [`ManualClock`] instead of sleeping and records every call
#[derive(Debug, Clone, Default)]
pub struct ManualSleeper {
    clock: ManualClock,
    calls: Arc<Mutex<Vec<Duration>>>,
}

impl ManualSleeper {
    pub fn new(clock: ManualClock) -> Self {
        Self { clock, calls: Arc::new(Mutex::new(Vec::new())) }
    }

    pub fn calls(&self) -> Vec<Duration> {
        self.calls.lock().clone()
    }

    pub fn clear(&self) {
        self.calls.lock().clear();
    }
}

impl Sleeper for ManualSleeper {
    fn sleep(&self, duration: Duration) {
        self.calls.lock().push(duration);
        self.clock.advance(u64::try_from(duration.as_millis()).unwrap_or(u64::MAX));
    }
}

/// Clock and sleeper pair handed to time-bounded policies
#[derive(Debug, Clone)]
pub struct TimeContext {
    clock: Arc<dyn Clock>,
    sleeper: Arc<dyn Sleeper>,
}

impl TimeContext {
    pub fn new(clock: Arc<dyn Clock>, sleeper: Arc<dyn Sleeper>) -> Self {
        Self { clock, sleeper }
    }

    /// Real time: a monotonic clock and thread sleeps
    pub fn system() -> Self {
        Self::new(Arc::new(SystemClock::new()), Arc::new(ThreadSleeper))
    }

    /// A manual clock driven by a sleeper that advances it
    pub fn manual(clock: ManualClock) -> (Self, ManualSleeper) {
        let sleeper = ManualSleeper::new(clock.clone());
        (Self::new(Arc::new(clock), Arc::new(sleeper.clone())), sleeper)
    }

    pub fn clock(&self) -> &Arc<dyn Clock> {
        &self.clock
    }

    pub fn sleeper(&self) -> &Arc<dyn Sleeper> {
        &self.sleeper
    }
}

impl Default for TimeContext {
    fn default() -> Self {
        Self::system()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn manual_sleeper_advances_clock() {
        let clock = ManualClock::new(0);
        let sleeper = ManualSleeper::new(clock.clone());

        sleeper.sleep(Duration::from_millis(100));
        sleeper.sleep(Duration::from_millis(250));

        assert_eq!(clock.now_millis(), 350);
        assert_eq!(
            sleeper.calls(),
            vec![Duration::from_millis(100), Duration::from_millis(250)]
        );

        sleeper.clear();
        assert!(sleeper.calls().is_empty());
    }

    #[test]
    fn thread_sleeper_actually_sleeps() {
        let start = std::time::Instant::now();
        ThreadSleeper.sleep(Duration::from_millis(20));
        assert!(start.elapsed() >= Duration::from_millis(15));
    }

    #[test]
    fn manual_context_shares_clock() {
        let (ctx, sleeper) = TimeContext::manual(ManualClock::new(7));
        ctx.sleeper().sleep(Duration::from_millis(3));
        assert_eq!(ctx.clock().now_millis(), 10);
        assert_eq!(sleeper.calls().len(), 1);
    }
}
