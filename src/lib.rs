//! # Esox Resource Pool
//!
//! Concurrency building blocks for thread-based storage services: keyed read/write lock
//! pools, blocking resource pools and retry policies with backoff.
//!
//! ## Features
//!
//! - Keyed lock pool with reference counting and watermark-driven background eviction
//! - Scoped lock guards released exactly once via RAII (Drop trait)
//! - Fixed-capacity blocking pool with lazy creation
//! - Elastic pool with health checks, FIFO/LIFO selection and background garbage collection
//! - Scoped pool handles with leak detection
//! - Counting and time-bounded retry policies with randomized exponential backoff
//! - Injectable clocks, sleepers and schedulers for deterministic tests
//! - Metrics snapshots and Prometheus export
//!
//! ## Quick Start
//!
//! ```rust
//! use esox_resourcepool::{LockMode, LockPool, LockPoolOptions};
//!
//! let locks = LockPool::new(LockPoolOptions::default()).unwrap();
//! {
//!     let _guard = locks.get("blob-42".to_string(), LockMode::Write);
//!     // exclusive access to blob-42 until `_guard` goes out of scope
//! }
//! ```

mod backoff;
mod clock;
mod config;
mod dynamic_pool;
mod errors;
mod eviction;
mod executor;
mod leak;
mod lock;
mod lock_pool;
mod metrics;
mod pool;
mod resource_pool;
mod retry;
mod sleeper;
mod thread;
mod timer;

pub use backoff::{
    CountingBackoff, ExponentialBackoff, ExponentialWait, FixedBackoff, FixedWait, MAX_EXPONENT,
    NoBackoff, WaitStrategy,
};
pub use clock::{Clock, ManualClock, SystemClock};
pub use config::{DynamicPoolOptions, LockPoolOptions, SelectionPolicy};
pub use dynamic_pool::DynamicResourcePool;
pub use errors::{PoolError, PoolResult, RetryError};
pub use eviction::{GcPolicy, GcPredicate, ResourceMeta};
pub use executor::{ScheduledExecutor, ScheduledTask};
pub use leak::{LeakDetector, LeakTracker};
pub use lock::{LockMode, LockResource, SharedRwLock};
pub use lock_pool::LockPool;
pub use metrics::{AtomicCounter, MetricsExporter, NoopCounter, PoolMetrics, ResourceCounter};
pub use pool::{FnFactory, Pool, PooledResource, ResourceFactory};
pub use resource_pool::ResourcePool;
pub use retry::{
    CountingRetry, ExponentialBackoffRetry, ExponentialTimeBoundedRetry,
    ExponentialTimeBoundedRetryBuilder, FixedCountingRetry, InstantCountingRetry, RetryPolicy,
    TimeBoundedRetry, default_retry, no_retry_policy, retry,
};
pub use sleeper::{ManualSleeper, Sleeper, ThreadSleeper, TimeContext};
pub use thread::ThreadFactory;
pub use timer::{ExponentialTimer, TimerResult};
