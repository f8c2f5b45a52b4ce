//! Metrics collection and export for resource pools

use std::collections::HashMap;
use std::sync::Arc;
use std::sync::atomic::{AtomicI64, AtomicUsize, Ordering};

/// Counter-style sink receiving the live resource count of a pool
///
/// Pools work with [`NoopCounter`] when no metrics backend is wired in.
pub trait ResourceCounter: Send + Sync {
    fn inc(&self);
    fn dec(&self);
    fn get(&self) -> i64;
}

/// Counter that records nothing
#[derive(Debug, Default, Clone, Copy)]
pub struct NoopCounter;

impl ResourceCounter for NoopCounter {
    fn inc(&self) {}

    fn dec(&self) {}

    fn get(&self) -> i64 {
        0
    }
}

/// In-process counter; clones share the value
#[derive(Debug, Default, Clone)]
pub struct AtomicCounter {
    value: Arc<AtomicI64>,
}

impl AtomicCounter {
    pub fn new() -> Self {
        Self::default()
    }
}

impl ResourceCounter for AtomicCounter {
    fn inc(&self) {
        self.value.fetch_add(1, Ordering::Relaxed);
    }

    fn dec(&self) {
        self.value.fetch_sub(1, Ordering::Relaxed);
    }

    fn get(&self) -> i64 {
        self.value.load(Ordering::Relaxed)
    }
}

#[cfg(feature = "metrics")]
impl ResourceCounter for prometheus::IntGauge {
    fn inc(&self) {
        prometheus::IntGauge::inc(self);
    }

    fn dec(&self) {
        prometheus::IntGauge::dec(self);
    }

    fn get(&self) -> i64 {
        prometheus::IntGauge::get(self)
    }
}

/// Metrics snapshot of a pool
///
/// # Examples
///
/// ```
/// use esox_resourcepool::{DynamicPoolOptions, DynamicResourcePool, ResourceFactory};
/// use std::convert::Infallible;
///
/// #[derive(Debug)]
/// struct Ids(std::sync::atomic::AtomicU32);
///
/// impl ResourceFactory for Ids {
///     type Resource = u32;
///     type Error = Infallible;
///     fn create(&self) -> Result<u32, Infallible> {
///         Ok(self.0.fetch_add(1, std::sync::atomic::Ordering::SeqCst))
///     }
/// }
///
/// let pool = DynamicResourcePool::new(Ids(Default::default()), DynamicPoolOptions::new()).unwrap();
/// let id = pool.acquire().unwrap();
/// let metrics = pool.metrics();
/// assert_eq!(metrics.total_acquired, 1);
/// assert_eq!(metrics.in_use_resources, 1);
/// pool.release(id).unwrap();
/// ```
#[derive(Debug, Clone)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct PoolMetrics {
    /// Total resources handed out
    pub total_acquired: usize,

    /// Total resources returned
    pub total_released: usize,

    /// Total resources created by the factory
    pub total_created: usize,

    /// Resources discarded by the health check
    pub unhealthy_discarded: usize,

    /// Resources closed by background garbage collection
    pub garbage_collected: usize,

    /// Acquisitions that hit their deadline
    pub acquire_timeouts: usize,

    /// Resources currently owned by the pool
    pub live_resources: usize,

    /// Resources waiting in the pool
    pub available_resources: usize,

    /// Resources checked out by callers
    pub in_use_resources: usize,

    /// Maximum pool capacity
    pub max_capacity: usize,

    /// Checked-out share of capacity (0.0 to 1.0)
    pub utilization: f64,
}

impl PoolMetrics {
    /// Export metrics as a HashMap
    pub fn export(&self) -> HashMap<String, String> {
        let mut metrics = HashMap::new();
        metrics.insert("total_acquired".to_string(), self.total_acquired.to_string());
        metrics.insert("total_released".to_string(), self.total_released.to_string());
        metrics.insert("total_created".to_string(), self.total_created.to_string());
        metrics.insert("unhealthy_discarded".to_string(), self.unhealthy_discarded.to_string());
        metrics.insert("garbage_collected".to_string(), self.garbage_collected.to_string());
        metrics.insert("acquire_timeouts".to_string(), self.acquire_timeouts.to_string());
        metrics.insert("live_resources".to_string(), self.live_resources.to_string());
        metrics.insert("available_resources".to_string(), self.available_resources.to_string());
        metrics.insert("in_use_resources".to_string(), self.in_use_resources.to_string());
        metrics.insert("max_capacity".to_string(), self.max_capacity.to_string());
        metrics.insert("utilization".to_string(), format!("{:.2}", self.utilization));
        metrics
    }
}

/// Metrics exporter for Prometheus format
pub struct MetricsExporter;

impl MetricsExporter {
    /// Export metrics in Prometheus exposition format
    pub fn export_prometheus(
        metrics: &PoolMetrics,
        pool_name: &str,
        tags: Option<&HashMap<String, String>>,
    ) -> String {
        let mut output = String::new();
        let labels = Self::format_labels(pool_name, tags);

        let gauges = [
            ("resourcepool_resources_live", "Resources owned by the pool", metrics.live_resources),
            ("resourcepool_resources_available", "Resources waiting in the pool", metrics.available_resources),
            ("resourcepool_resources_in_use", "Resources checked out", metrics.in_use_resources),
        ];
        for (name, help, value) in gauges {
            Self::write_metric(&mut output, name, help, "gauge", &labels, &value.to_string());
        }
        Self::write_metric(
            &mut output,
            "resourcepool_utilization",
            "Checked-out share of capacity",
            "gauge",
            &labels,
            &format!("{:.2}", metrics.utilization),
        );

        let counters = [
            ("resourcepool_acquired_total", "Total resources acquired", metrics.total_acquired),
            ("resourcepool_released_total", "Total resources released", metrics.total_released),
            ("resourcepool_created_total", "Total resources created", metrics.total_created),
            ("resourcepool_unhealthy_total", "Resources discarded as unhealthy", metrics.unhealthy_discarded),
            ("resourcepool_gc_total", "Resources garbage collected", metrics.garbage_collected),
            ("resourcepool_timeouts_total", "Acquisitions that timed out", metrics.acquire_timeouts),
        ];
        for (name, help, value) in counters {
            Self::write_metric(&mut output, name, help, "counter", &labels, &value.to_string());
        }

        output
    }

    fn write_metric(output: &mut String, name: &str, help: &str, kind: &str, labels: &str, value: &str) {
        output.push_str(&format!("# HELP {} {}\n", name, help));
        output.push_str(&format!("# TYPE {} {}\n", name, kind));
        output.push_str(&format!("{}{{{}}} {}\n", name, labels, value));
    }

    fn format_labels(pool_name: &str, tags: Option<&HashMap<String, String>>) -> String {
        let mut labels = vec![format!("pool=\"{}\"", pool_name)];

        if let Some(tags) = tags {
            let mut sorted: Vec<_> = tags.iter().collect();
            sorted.sort();
            for (key, value) in sorted {
                labels.push(format!("{}=\"{}\"", key, value));
            }
        }

        labels.join(",")
    }
}

/// Internal metrics tracker
#[derive(Debug, Default)]
pub(crate) struct MetricsTracker {
    pub total_acquired: AtomicUsize,
    pub total_released: AtomicUsize,
    pub total_created: AtomicUsize,
    pub unhealthy_discarded: AtomicUsize,
    pub garbage_collected: AtomicUsize,
    pub acquire_timeouts: AtomicUsize,
}

impl MetricsTracker {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn record(counter: &AtomicUsize) {
        counter.fetch_add(1, Ordering::Relaxed);
    }

    pub fn get_metrics(&self, live: usize, available: usize, capacity: usize) -> PoolMetrics {
        let in_use = live.saturating_sub(available);
        let utilization = if capacity > 0 {
            in_use as f64 / capacity as f64
        } else {
            0.0
        };

        PoolMetrics {
            total_acquired: self.total_acquired.load(Ordering::Relaxed),
            total_released: self.total_released.load(Ordering::Relaxed),
            total_created: self.total_created.load(Ordering::Relaxed),
            unhealthy_discarded: self.unhealthy_discarded.load(Ordering::Relaxed),
            garbage_collected: self.garbage_collected.load(Ordering::Relaxed),
            acquire_timeouts: self.acquire_timeouts.load(Ordering::Relaxed),
            live_resources: live,
            available_resources: available,
            in_use_resources: in_use,
            max_capacity: capacity,
            utilization,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_atomic_counter_is_shared() {
        let counter = AtomicCounter::new();
        let other = counter.clone();
        counter.inc();
        counter.inc();
        other.dec();
        assert_eq!(counter.get(), 1);
        assert_eq!(NoopCounter.get(), 0);
    }

    #[cfg(feature = "metrics")]
    #[test]
    fn test_prometheus_gauge_counter() {
        let gauge = prometheus::IntGauge::new("pool_size", "live resources").unwrap();
        let sink: &dyn ResourceCounter = &gauge;
        sink.inc();
        sink.inc();
        sink.dec();
        assert_eq!(gauge.get(), 1);
    }

    #[test]
    fn test_snapshot_utilization() {
        let tracker = MetricsTracker::new();
        MetricsTracker::record(&tracker.total_acquired);
        let metrics = tracker.get_metrics(4, 1, 10);
        assert_eq!(metrics.in_use_resources, 3);
        assert!((metrics.utilization - 0.3).abs() < f64::EPSILON);
        assert_eq!(metrics.export()["total_acquired"], "1");
    }

    #[test]
    fn test_prometheus_export() {
        let tracker = MetricsTracker::new();
        let metrics = tracker.get_metrics(2, 2, 4);
        let mut tags = HashMap::new();
        tags.insert("service".to_string(), "master".to_string());

        let output = MetricsExporter::export_prometheus(&metrics, "clients", Some(&tags));
        assert!(output.contains("# TYPE resourcepool_resources_live gauge"));
        assert!(output.contains("resourcepool_resources_live{pool=\"clients\",service=\"master\"} 2"));
        assert!(output.contains("# TYPE resourcepool_timeouts_total counter"));
    }
}
