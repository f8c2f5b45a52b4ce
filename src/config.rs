//! Pool configuration options

use std::fmt;
use std::sync::Arc;
use std::time::Duration;

use crate::clock::{Clock, SystemClock};
use crate::errors::{PoolError, PoolResult};
use crate::eviction::GcPolicy;
use crate::executor::ScheduledExecutor;
use crate::leak::LeakDetector;
use crate::metrics::{NoopCounter, ResourceCounter};

/// Configuration for a [`LockPool`](crate::LockPool)
///
/// The evictor wakes once the pool holds more than `high_watermark` entries and removes
/// unreferenced ones until it is back to `low_watermark`.
///
/// # Examples
///
/// ```
/// use esox_resourcepool::LockPoolOptions;
///
/// let options = LockPoolOptions::new()
///     .with_watermarks(2, 4)
///     .with_concurrency_level(8);
///
/// assert!(options.validate().is_ok());
/// assert_eq!(options.high_watermark, 4);
/// ```
#[derive(Debug, Clone, PartialEq, Eq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct LockPoolOptions {
    /// Capacity reserved for the key map up front
    pub initial_capacity: usize,

    /// Size the evictor shrinks the pool to
    pub low_watermark: usize,

    /// Size above which the evictor is woken
    pub high_watermark: usize,

    /// Expected number of concurrently updating threads, used to size the map's shards
    pub concurrency_level: usize,
}

impl Default for LockPoolOptions {
    fn default() -> Self {
        Self {
            initial_capacity: 1000,
            low_watermark: 500_000,
            high_watermark: 1_000_000,
            concurrency_level: 100,
        }
    }
}

impl LockPoolOptions {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_initial_capacity(mut self, capacity: usize) -> Self {
        self.initial_capacity = capacity;
        self
    }

    pub fn with_watermarks(mut self, low: usize, high: usize) -> Self {
        self.low_watermark = low;
        self.high_watermark = high;
        self
    }

    pub fn with_concurrency_level(mut self, level: usize) -> Self {
        self.concurrency_level = level;
        self
    }

    pub fn validate(&self) -> PoolResult<()> {
        if self.high_watermark == 0 {
            return Err(PoolError::invalid("high watermark must be positive"));
        }
        if self.low_watermark > self.high_watermark {
            return Err(PoolError::invalid(format!(
                "low watermark {} exceeds high watermark {}",
                self.low_watermark, self.high_watermark
            )));
        }
        if self.concurrency_level == 0 {
            return Err(PoolError::invalid("concurrency level must be positive"));
        }
        Ok(())
    }
}

/// Order in which available resources are handed out
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub enum SelectionPolicy {
    /// Hand out the resource that has been idle the longest
    Fifo,

    /// Hand out the most recently released resource, letting the rest go idle and be collected
    #[default]
    Lifo,
}

/// Configuration for a [`DynamicResourcePool`](crate::DynamicResourcePool)
///
/// # Examples
///
/// ```
/// use esox_resourcepool::{DynamicPoolOptions, GcPolicy, SelectionPolicy};
/// use std::time::Duration;
///
/// let options = DynamicPoolOptions::new()
///     .with_capacity(2, 16)
///     .with_gc_policy(GcPolicy::IdleTimeout(Duration::from_secs(300)))
///     .with_selection_policy(SelectionPolicy::Fifo);
///
/// assert!(options.validate().is_ok());
/// assert_eq!(options.max_capacity, 16);
/// ```
#[derive(Clone)]
pub struct DynamicPoolOptions {
    /// Upper bound on resources owned by the pool
    pub max_capacity: usize,

    /// Garbage collection never shrinks the pool below this size
    pub min_capacity: usize,

    pub gc_initial_delay: Duration,

    pub gc_interval: Duration,

    pub selection_policy: SelectionPolicy,

    pub gc_policy: GcPolicy,

    /// Executor running the garbage collection task; a private one is started when absent
    pub gc_executor: Option<Arc<ScheduledExecutor>>,

    /// Sink receiving the live resource count
    pub counter: Arc<dyn ResourceCounter>,

    pub leak_detector: Option<Arc<LeakDetector>>,

    /// Time source for deadlines and resource timestamps
    pub clock: Arc<dyn Clock>,
}

impl Default for DynamicPoolOptions {
    fn default() -> Self {
        Self {
            max_capacity: 1024,
            min_capacity: 1,
            gc_initial_delay: Duration::from_millis(100),
            gc_interval: Duration::from_secs(120),
            selection_policy: SelectionPolicy::default(),
            gc_policy: GcPolicy::default(),
            gc_executor: None,
            counter: Arc::new(NoopCounter),
            leak_detector: None,
            clock: Arc::new(SystemClock::new()),
        }
    }
}

impl DynamicPoolOptions {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_capacity(mut self, min: usize, max: usize) -> Self {
        self.min_capacity = min;
        self.max_capacity = max;
        self
    }

    pub fn with_gc_schedule(mut self, initial_delay: Duration, interval: Duration) -> Self {
        self.gc_initial_delay = initial_delay;
        self.gc_interval = interval;
        self
    }

    pub fn with_selection_policy(mut self, policy: SelectionPolicy) -> Self {
        self.selection_policy = policy;
        self
    }

    pub fn with_gc_policy(mut self, policy: GcPolicy) -> Self {
        self.gc_policy = policy;
        self
    }

    /// Share an executor with other pools
    pub fn with_gc_executor(mut self, executor: Arc<ScheduledExecutor>) -> Self {
        self.gc_executor = Some(executor);
        self
    }

    pub fn with_counter(mut self, counter: Arc<dyn ResourceCounter>) -> Self {
        self.counter = counter;
        self
    }

    pub fn with_leak_detector(mut self, detector: Arc<LeakDetector>) -> Self {
        self.leak_detector = Some(detector);
        self
    }

    pub fn with_clock(mut self, clock: Arc<dyn Clock>) -> Self {
        self.clock = clock;
        self
    }

    pub fn validate(&self) -> PoolResult<()> {
        if self.max_capacity == 0 {
            return Err(PoolError::invalid("max capacity must be positive"));
        }
        if self.min_capacity > self.max_capacity {
            return Err(PoolError::invalid(format!(
                "min capacity {} exceeds max capacity {}",
                self.min_capacity, self.max_capacity
            )));
        }
        if self.gc_interval.is_zero() {
            return Err(PoolError::invalid("gc interval must be positive"));
        }
        Ok(())
    }
}

impl fmt::Debug for DynamicPoolOptions {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("DynamicPoolOptions")
            .field("max_capacity", &self.max_capacity)
            .field("min_capacity", &self.min_capacity)
            .field("gc_initial_delay", &self.gc_initial_delay)
            .field("gc_interval", &self.gc_interval)
            .field("selection_policy", &self.selection_policy)
            .field("gc_policy", &self.gc_policy)
            .field("shared_executor", &self.gc_executor.is_some())
            .field("leak_detector", &self.leak_detector)
            .field("clock", &self.clock)
            .finish()
    }
}
