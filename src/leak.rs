//! Leak detection for scoped pool handles
//!
//! Ownership already guarantees a [`PooledResource`](crate::PooledResource) is returned when it is
//! dropped, so the detector only has two things left to catch: handles that outlive their pool,
//! and handles that are never dropped at all (`mem::forget`, reference cycles). It is enabled by
//! default in debug builds.

use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};

use tracing::error;

/// Counts outstanding handles of one resource type and reports leaks
#[derive(Debug)]
pub struct LeakDetector {
    resource_type: String,
    enabled: bool,
    exit_on_leak: bool,
    outstanding: AtomicUsize,
    leaked: AtomicUsize,
}

impl LeakDetector {
    pub fn new(resource_type: impl Into<String>) -> Self {
        Self {
            resource_type: resource_type.into(),
            enabled: cfg!(debug_assertions),
            exit_on_leak: false,
            outstanding: AtomicUsize::new(0),
            leaked: AtomicUsize::new(0),
        }
    }

    pub fn with_enabled(mut self, enabled: bool) -> Self {
        self.enabled = enabled;
        self
    }

    /// Terminate the process when a leak is reported
    pub fn with_exit_on_leak(mut self, exit_on_leak: bool) -> Self {
        self.exit_on_leak = exit_on_leak;
        self
    }

    pub fn is_enabled(&self) -> bool {
        self.enabled
    }

    /// Start tracking one handle; `None` when detection is disabled
    pub fn track(self: &Arc<Self>) -> Option<LeakTracker> {
        if !self.enabled {
            return None;
        }
        self.outstanding.fetch_add(1, Ordering::AcqRel);
        Some(LeakTracker { detector: Arc::clone(self) })
    }

    /// Handles currently alive
    pub fn outstanding(&self) -> usize {
        self.outstanding.load(Ordering::Acquire)
    }

    /// Leaks reported so far
    pub fn leaked(&self) -> usize {
        self.leaked.load(Ordering::Acquire)
    }

    /// Report handles still alive when their owner shuts down; returns how many there are
    pub fn check_shutdown(&self, owner: &str) -> usize {
        let outstanding = self.outstanding();
        if outstanding > 0 {
            error!(
                resource_type = %self.resource_type,
                owner,
                outstanding,
                "LEAK: handles still outstanding at shutdown"
            );
            self.fail_fast();
        }
        outstanding
    }

    fn report(&self, owner: &str) {
        self.leaked.fetch_add(1, Ordering::AcqRel);
        error!(
            resource_type = %self.resource_type,
            owner,
            "LEAK: resource outlived the pool it was acquired from"
        );
        self.fail_fast();
    }

    fn fail_fast(&self) {
        if self.exit_on_leak {
            error!("Leak detected with exit-on-leak enabled, shutting down");
            std::process::exit(1);
        }
    }
}

/// Registration of one live handle, released on drop
#[derive(Debug)]
pub struct LeakTracker {
    detector: Arc<LeakDetector>,
}

impl LeakTracker {
    /// Record that the tracked handle leaked from `owner`
    pub fn report_leak(self, owner: &str) {
        self.detector.report(owner);
    }
}

impl Drop for LeakTracker {
    fn drop(&mut self) {
        self.detector.outstanding.fetch_sub(1, Ordering::AcqRel);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_tracks_outstanding_handles() {
        let detector = Arc::new(LeakDetector::new("Client").with_enabled(true));
        let first = detector.track();
        let second = detector.track();
        assert_eq!(detector.outstanding(), 2);
        drop(first);
        assert_eq!(detector.check_shutdown("pool"), 1);
        drop(second);
        assert_eq!(detector.check_shutdown("pool"), 0);
    }

    #[test]
    fn test_forgotten_handle_is_outstanding() {
        let detector = Arc::new(LeakDetector::new("Client").with_enabled(true));
        std::mem::forget(detector.track());
        assert_eq!(detector.outstanding(), 1);
    }

    #[test]
    fn test_report_leak() {
        let detector = Arc::new(LeakDetector::new("Client").with_enabled(true));
        let tracker = detector.track().unwrap();
        tracker.report_leak("pool@0x1");
        assert_eq!(detector.leaked(), 1);
        assert_eq!(detector.outstanding(), 0);
    }

    #[test]
    fn test_disabled_tracks_nothing() {
        let detector = Arc::new(LeakDetector::new("Client").with_enabled(false));
        assert!(detector.track().is_none());
        assert_eq!(detector.outstanding(), 0);
    }
}
