//! Fixed-capacity blocking pool with lazy creation

use std::fmt;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::time::{Duration, Instant};

use crossbeam::queue::SegQueue;
use parking_lot::{Condvar, Mutex};
use tracing::{debug, warn};

use crate::errors::{PoolError, PoolResult};
use crate::leak::LeakDetector;
use crate::metrics::{MetricsTracker, PoolMetrics};
use crate::pool::{Pool, ResourceFactory};

/// Blocking pool that creates resources on demand up to a fixed capacity
///
/// Resources are created lazily the first time the pool runs dry and are never closed until
/// the pool itself is. Waiters block on a condition variable until a resource is released.
///
/// # Examples
///
/// ```
/// use esox_resourcepool::{FnFactory, ResourcePool};
/// use std::convert::Infallible;
/// use std::time::Duration;
///
/// let pool = ResourcePool::new(2, FnFactory::new(|| Ok::<_, Infallible>(String::new()))).unwrap();
/// let first = pool.acquire().unwrap();
/// let second = pool.acquire().unwrap();
/// assert!(pool.acquire_timeout(Duration::from_millis(20)).is_err());
///
/// pool.release(first).unwrap();
/// pool.release(second).unwrap();
/// assert_eq!(pool.size(), 2);
/// ```
pub struct ResourcePool<F: ResourceFactory> {
    factory: F,
    resources: SegQueue<F::Resource>,
    current_capacity: AtomicUsize,
    max_capacity: usize,
    take_lock: Mutex<()>,
    not_empty: Condvar,
    closed: AtomicBool,
    metrics: MetricsTracker,
    leak_detector: Option<Arc<LeakDetector>>,
}

impl<F: ResourceFactory> ResourcePool<F> {
    pub fn new(max_capacity: usize, factory: F) -> PoolResult<Self> {
        if max_capacity == 0 {
            return Err(PoolError::invalid("max capacity must be positive"));
        }
        Ok(Self {
            factory,
            resources: SegQueue::new(),
            current_capacity: AtomicUsize::new(0),
            max_capacity,
            take_lock: Mutex::new(()),
            not_empty: Condvar::new(),
            closed: AtomicBool::new(false),
            metrics: MetricsTracker::new(),
            leak_detector: None,
        })
    }

    pub fn with_leak_detector(mut self, detector: Arc<LeakDetector>) -> Self {
        self.leak_detector = Some(detector);
        self
    }

    /// Acquire a resource, waiting until one is released if the pool is exhausted
    pub fn acquire(&self) -> PoolResult<F::Resource> {
        self.acquire_until(None)
    }

    /// Acquire a resource, failing with `Timeout` once `timeout` has passed
    ///
    /// A timeout too large to represent as a deadline waits forever.
    pub fn acquire_timeout(&self, timeout: Duration) -> PoolResult<F::Resource> {
        let deadline = Instant::now().checked_add(timeout).map(|end| (end, timeout));
        self.acquire_until(deadline)
    }

    /// Take a pooled resource or create one if there is room, without waiting
    pub fn try_acquire(&self) -> PoolResult<Option<F::Resource>> {
        self.ensure_open()?;
        if let Some(resource) = self.resources.pop() {
            MetricsTracker::record(&self.metrics.total_acquired);
            return Ok(Some(resource));
        }
        if self.reserve_slot() {
            return self.create_reserved().map(Some);
        }
        Ok(None)
    }

    /// Give a resource back to the pool, waking one waiter
    pub fn release(&self, resource: F::Resource) -> PoolResult<()> {
        MetricsTracker::record(&self.metrics.total_released);
        // `close` drains under the same lock, so a resource is never pushed after the drain
        let guard = self.take_lock.lock();
        if self.closed.load(Ordering::Acquire) {
            drop(guard);
            self.current_capacity.fetch_sub(1, Ordering::AcqRel);
            self.close_resource(resource);
            return Ok(());
        }
        self.resources.push(resource);
        self.not_empty.notify_one();
        Ok(())
    }

    /// Number of resources created and not yet closed
    pub fn size(&self) -> usize {
        self.current_capacity.load(Ordering::Acquire)
    }

    pub fn available(&self) -> usize {
        self.resources.len()
    }

    pub fn max_capacity(&self) -> usize {
        self.max_capacity
    }

    pub fn is_closed(&self) -> bool {
        self.closed.load(Ordering::Acquire)
    }

    pub fn metrics(&self) -> PoolMetrics {
        self.metrics.get_metrics(self.size(), self.available(), self.max_capacity)
    }

    /// Close every pooled resource and wake all waiters
    ///
    /// Resources still checked out are closed when they are released.
    pub fn close(&self) {
        let drained = {
            let _guard = self.take_lock.lock();
            if self.closed.swap(true, Ordering::AcqRel) {
                return;
            }
            let mut drained = Vec::new();
            while let Some(resource) = self.resources.pop() {
                self.current_capacity.fetch_sub(1, Ordering::AcqRel);
                drained.push(resource);
            }
            self.not_empty.notify_all();
            drained
        };

        let outstanding = self.size();
        if outstanding > 0 {
            warn!(outstanding, "Closing resource pool with resources still checked out");
        }
        debug!(closed = drained.len(), "Resource pool closed");
        for resource in drained {
            self.close_resource(resource);
        }
    }

    fn acquire_until(&self, deadline: Option<(Instant, Duration)>) -> PoolResult<F::Resource> {
        if let Some(resource) = self.try_acquire()? {
            return Ok(resource);
        }

        let mut guard = self.take_lock.lock();
        loop {
            if self.closed.load(Ordering::Acquire) {
                return Err(PoolError::Cancelled);
            }
            if let Some(resource) = self.resources.pop() {
                MetricsTracker::record(&self.metrics.total_acquired);
                return Ok(resource);
            }
            // capacity freed by a failed creation
            if self.reserve_slot() {
                drop(guard);
                return self.create_reserved();
            }
            match deadline {
                Some((end, timeout)) => {
                    if Instant::now() >= end {
                        MetricsTracker::record(&self.metrics.acquire_timeouts);
                        return Err(PoolError::Timeout(timeout));
                    }
                    self.not_empty.wait_until(&mut guard, end);
                }
                None => self.not_empty.wait(&mut guard),
            }
        }
    }

    fn ensure_open(&self) -> PoolResult<()> {
        if self.closed.load(Ordering::Acquire) {
            return Err(PoolError::Closed);
        }
        Ok(())
    }

    fn reserve_slot(&self) -> bool {
        self.current_capacity
            .fetch_update(Ordering::AcqRel, Ordering::Acquire, |current| {
                (current < self.max_capacity).then_some(current + 1)
            })
            .is_ok()
    }

    fn create_reserved(&self) -> PoolResult<F::Resource> {
        match self.factory.create() {
            Ok(resource) => {
                MetricsTracker::record(&self.metrics.total_created);
                MetricsTracker::record(&self.metrics.total_acquired);
                Ok(resource)
            }
            Err(e) => {
                self.current_capacity.fetch_sub(1, Ordering::AcqRel);
                let _guard = self.take_lock.lock();
                self.not_empty.notify_one();
                Err(PoolError::creation(e))
            }
        }
    }

    fn close_resource(&self, resource: F::Resource) {
        if let Err(e) = self.factory.close(resource) {
            warn!(error = %e, "Failed to close pooled resource");
        }
    }
}

impl<F: ResourceFactory> Pool<F::Resource> for ResourcePool<F> {
    fn acquire(&self) -> PoolResult<F::Resource> {
        ResourcePool::acquire(self)
    }

    fn acquire_timeout(&self, timeout: Duration) -> PoolResult<F::Resource> {
        ResourcePool::acquire_timeout(self, timeout)
    }

    fn release(&self, resource: F::Resource) -> PoolResult<()> {
        ResourcePool::release(self, resource)
    }

    fn size(&self) -> usize {
        ResourcePool::size(self)
    }

    fn close(&self) {
        ResourcePool::close(self)
    }

    fn leak_detector(&self) -> Option<&Arc<LeakDetector>> {
        self.leak_detector.as_ref()
    }
}

impl<F: ResourceFactory> Drop for ResourcePool<F> {
    fn drop(&mut self) {
        self.close();
    }
}

impl<F: ResourceFactory> fmt::Debug for ResourcePool<F> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ResourcePool")
            .field("size", &self.size())
            .field("available", &self.available())
            .field("max_capacity", &self.max_capacity)
            .field("closed", &self.is_closed())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::pool::FnFactory;
    use std::convert::Infallible;
    use std::io;
    use std::thread;

    fn counting_pool(capacity: usize) -> ResourcePool<FnFactory<impl Fn() -> Result<usize, Infallible> + Send + Sync + 'static>> {
        let next = AtomicUsize::new(0);
        ResourcePool::new(capacity, FnFactory::new(move || Ok(next.fetch_add(1, Ordering::SeqCst)))).unwrap()
    }

    #[test]
    fn test_creates_lazily_up_to_capacity() {
        let pool = counting_pool(2);
        assert_eq!(pool.size(), 0);
        let a = pool.acquire().unwrap();
        let b = pool.acquire().unwrap();
        assert_ne!(a, b);
        assert_eq!(pool.size(), 2);
        assert!(pool.try_acquire().unwrap().is_none());
    }

    #[test]
    fn test_timeout_when_exhausted() {
        let pool = counting_pool(1);
        let _held = pool.acquire().unwrap();
        let start = Instant::now();
        let result = pool.acquire_timeout(Duration::from_millis(50));
        assert!(matches!(result, Err(PoolError::Timeout(_))));
        assert!(start.elapsed() >= Duration::from_millis(50));
        assert_eq!(pool.metrics().acquire_timeouts, 1);
    }

    #[test]
    fn test_release_wakes_waiter() {
        let pool = Arc::new(counting_pool(1));
        let held = pool.acquire().unwrap();

        let waiter = {
            let pool = Arc::clone(&pool);
            thread::spawn(move || pool.acquire_timeout(Duration::from_secs(5)))
        };
        thread::sleep(Duration::from_millis(20));
        pool.release(held).unwrap();

        assert_eq!(waiter.join().unwrap().unwrap(), held);
        assert_eq!(pool.size(), 1);
    }

    #[test]
    fn test_creation_failure_frees_capacity() {
        let attempts = AtomicUsize::new(0);
        let pool = ResourcePool::new(
            1,
            FnFactory::new(move || {
                if attempts.fetch_add(1, Ordering::SeqCst) == 0 {
                    Err(io::Error::other("refused"))
                } else {
                    Ok(42)
                }
            }),
        )
        .unwrap();

        assert!(matches!(pool.acquire(), Err(PoolError::Creation(_))));
        assert_eq!(pool.size(), 0);
        assert_eq!(pool.acquire().unwrap(), 42);
    }

    #[test]
    fn test_close_cancels_waiters() {
        let pool = Arc::new(counting_pool(1));
        let _held = pool.acquire().unwrap();
        let waiter = {
            let pool = Arc::clone(&pool);
            thread::spawn(move || pool.acquire())
        };
        thread::sleep(Duration::from_millis(20));
        pool.close();
        assert!(matches!(waiter.join().unwrap(), Err(PoolError::Cancelled)));
        assert!(matches!(pool.acquire(), Err(PoolError::Closed)));
    }

    #[test]
    fn test_unrepresentable_timeout_waits_for_release() {
        let pool = Arc::new(counting_pool(1));
        let held = pool.acquire().unwrap();

        let waiter = {
            let pool = Arc::clone(&pool);
            thread::spawn(move || pool.acquire_timeout(Duration::MAX))
        };
        thread::sleep(Duration::from_millis(20));
        pool.release(held).unwrap();
        assert_eq!(waiter.join().unwrap().unwrap(), held);
    }

    #[derive(Default)]
    struct Tally {
        created: AtomicUsize,
        closed: AtomicUsize,
    }

    impl ResourceFactory for Arc<Tally> {
        type Resource = usize;
        type Error = Infallible;

        fn create(&self) -> Result<usize, Infallible> {
            Ok(self.created.fetch_add(1, Ordering::SeqCst))
        }

        fn close(&self, _resource: usize) -> Result<(), Infallible> {
            self.closed.fetch_add(1, Ordering::SeqCst);
            Ok(())
        }
    }

    #[test]
    fn test_close_racing_releases_closes_everything() {
        for _ in 0..50 {
            let tally = Arc::new(Tally::default());
            let pool = Arc::new(ResourcePool::new(4, Arc::clone(&tally)).unwrap());
            let held: Vec<_> = (0..4).map(|_| pool.acquire().unwrap()).collect();

            let releasers: Vec<_> = held
                .into_iter()
                .map(|resource| {
                    let pool = Arc::clone(&pool);
                    thread::spawn(move || pool.release(resource).unwrap())
                })
                .collect();
            pool.close();
            for releaser in releasers {
                releaser.join().unwrap();
            }

            assert_eq!(pool.size(), 0);
            assert_eq!(pool.available(), 0);
            assert_eq!(tally.closed.load(Ordering::SeqCst), tally.created.load(Ordering::SeqCst));
        }
    }

    #[test]
    fn test_release_after_close_closes_resource() {
        let pool = counting_pool(2);
        let held = pool.acquire().unwrap();
        let idle = pool.acquire().unwrap();
        pool.release(idle).unwrap();
        pool.close();
        assert_eq!(pool.size(), 1);
        pool.release(held).unwrap();
        assert_eq!(pool.size(), 0);
    }
}
