//! Elastic resource pool with health checks and background garbage collection

use std::any::type_name;
use std::collections::{HashMap, VecDeque};
use std::fmt;
use std::hash::Hash;
use std::sync::Arc;
use std::time::Duration;

use parking_lot::{Condvar, Mutex};
use tracing::{debug, warn};

use crate::clock::Clock;
use crate::config::{DynamicPoolOptions, SelectionPolicy};
use crate::errors::{PoolError, PoolResult};
use crate::eviction::{GcPolicy, ResourceMeta};
use crate::executor::{ScheduledExecutor, ScheduledTask};
use crate::leak::LeakDetector;
use crate::metrics::{MetricsTracker, PoolMetrics, ResourceCounter};
use crate::pool::{Pool, ResourceFactory};

/// Polling interval of [`DynamicResourcePool::acquire_async`]
const ASYNC_POLL_INTERVAL: Duration = Duration::from_millis(10);

struct Tracked {
    meta: ResourceMeta,
    in_use: bool,
}

struct PoolState<R> {
    /// Front holds the most recently released resource
    available: VecDeque<R>,
    resources: HashMap<R, Tracked>,
    creating: usize,
    closed: bool,
}

enum Wait {
    Forever,
    Until(u64, Duration),
    Never,
}

enum Slot<R> {
    Pooled(R),
    Create,
}

struct Shared<F: ResourceFactory> {
    factory: F,
    state: Mutex<PoolState<F::Resource>>,
    not_empty: Condvar,
    max_capacity: usize,
    min_capacity: usize,
    selection_policy: SelectionPolicy,
    gc_policy: GcPolicy,
    clock: Arc<dyn Clock>,
    counter: Arc<dyn ResourceCounter>,
    metrics: MetricsTracker,
}

/// Resource pool that grows on demand, checks health on reuse and shrinks in the background
///
/// Resources are identified by value, so the resource type must be cheap to clone and
/// hashable (ids, handles, `Arc`s). A resource is either available in the pool or checked out,
/// never both. Idle resources matching the configured [`GcPolicy`] are closed periodically
/// until the pool is back to its minimum capacity.
///
/// # Examples
///
/// ```
/// use esox_resourcepool::{DynamicPoolOptions, DynamicResourcePool, FnFactory};
/// use std::convert::Infallible;
/// use std::sync::atomic::{AtomicU64, Ordering};
/// use std::time::Duration;
///
/// let next = AtomicU64::new(1);
/// let factory = FnFactory::new(move || Ok::<_, Infallible>(next.fetch_add(1, Ordering::SeqCst)));
/// let pool = DynamicResourcePool::new(factory, DynamicPoolOptions::new().with_capacity(0, 1)).unwrap();
///
/// let session = pool.acquire().unwrap();
/// assert!(pool.acquire_timeout(Duration::from_millis(10)).is_err());
/// pool.release(session).unwrap();
/// assert_eq!(pool.acquire().unwrap(), session);
/// ```
pub struct DynamicResourcePool<F>
where
    F: ResourceFactory,
    F::Resource: Clone + Eq + Hash,
{
    shared: Arc<Shared<F>>,
    gc_task: ScheduledTask,
    _gc_executor: Arc<ScheduledExecutor>,
    leak_detector: Option<Arc<LeakDetector>>,
}

impl<F> DynamicResourcePool<F>
where
    F: ResourceFactory,
    F::Resource: Clone + Eq + Hash,
{
    /// Create an empty pool and schedule its garbage collection
    pub fn new(factory: F, options: DynamicPoolOptions) -> PoolResult<Self> {
        options.validate()?;
        let gc_executor = match options.gc_executor {
            Some(executor) => executor,
            None => Arc::new(ScheduledExecutor::new("ResourcePoolGc-%d")?),
        };

        let shared = Arc::new(Shared {
            factory,
            state: Mutex::new(PoolState {
                available: VecDeque::new(),
                resources: HashMap::new(),
                creating: 0,
                closed: false,
            }),
            not_empty: Condvar::new(),
            max_capacity: options.max_capacity,
            min_capacity: options.min_capacity,
            selection_policy: options.selection_policy,
            gc_policy: options.gc_policy,
            clock: options.clock,
            counter: options.counter,
            metrics: MetricsTracker::new(),
        });

        let weak = Arc::downgrade(&shared);
        let gc_task = gc_executor.schedule_at_fixed_rate(
            options.gc_initial_delay,
            options.gc_interval,
            move || {
                if let Some(shared) = weak.upgrade() {
                    shared.collect_garbage();
                }
            },
        );

        Ok(Self {
            shared,
            gc_task,
            _gc_executor: gc_executor,
            leak_detector: options.leak_detector,
        })
    }

    /// Acquire a resource, waiting as long as it takes for one to be released
    pub fn acquire(&self) -> PoolResult<F::Resource> {
        self.shared.acquire(Wait::Forever).and_then(|slot| slot.ok_or(PoolError::Closed))
    }

    /// Acquire a resource, failing once `timeout` has elapsed
    ///
    /// The deadline is fixed up front; unhealthy resources discarded along the way do not
    /// extend it.
    pub fn acquire_timeout(&self, timeout: Duration) -> PoolResult<F::Resource> {
        let deadline = self.shared.clock.now_millis().saturating_add(millis(timeout));
        self.shared
            .acquire(Wait::Until(deadline, timeout))
            .and_then(|slot| slot.ok_or(PoolError::Timeout(timeout)))
    }

    /// Acquire a resource if one is available or can be created without waiting
    pub fn try_acquire(&self) -> PoolResult<Option<F::Resource>> {
        self.shared.acquire(Wait::Never)
    }

    /// Acquire without blocking the async runtime, polling until `timeout`
    pub async fn acquire_async(&self, timeout: Duration) -> PoolResult<F::Resource> {
        tokio::time::timeout(timeout, async {
            loop {
                match self.try_acquire()? {
                    Some(resource) => return Ok(resource),
                    None => {
                        tokio::time::sleep(ASYNC_POLL_INTERVAL).await;
                    }
                }
            }
        })
        .await
        .map_err(|_| {
            MetricsTracker::record(&self.shared.metrics.acquire_timeouts);
            PoolError::Timeout(timeout)
        })?
    }

    /// Return a checked-out resource
    ///
    /// Fails with [`PoolError::InvalidArgument`] for resources this pool does not know or that
    /// are not checked out.
    pub fn release(&self, resource: F::Resource) -> PoolResult<()> {
        self.shared.release(resource)
    }

    /// Resources owned by the pool, checked out or not
    pub fn size(&self) -> usize {
        self.shared.state.lock().resources.len()
    }

    pub fn available(&self) -> usize {
        self.shared.state.lock().available.len()
    }

    pub fn in_use(&self) -> usize {
        let state = self.shared.state.lock();
        state.resources.len() - state.available.len()
    }

    pub fn max_capacity(&self) -> usize {
        self.shared.max_capacity
    }

    pub fn min_capacity(&self) -> usize {
        self.shared.min_capacity
    }

    pub fn is_closed(&self) -> bool {
        self.shared.state.lock().closed
    }

    pub fn metrics(&self) -> PoolMetrics {
        let (live, available) = {
            let state = self.shared.state.lock();
            (state.resources.len(), state.available.len())
        };
        self.shared.metrics.get_metrics(live, available, self.shared.max_capacity)
    }

    /// Run one garbage collection pass now; returns the number of resources closed
    pub fn collect_garbage(&self) -> usize {
        self.shared.collect_garbage()
    }

    /// Close the available resources, wake all waiters and stop garbage collection
    ///
    /// Resources still checked out are not touched; they are closed when released.
    pub fn close(&self) {
        let drained = {
            let mut state = self.shared.state.lock();
            if state.closed {
                return;
            }
            state.closed = true;
            let outstanding = state.resources.len() - state.available.len();
            if outstanding > 0 {
                warn!(outstanding, "Closing resource pool with resources still checked out");
            }
            let drained: Vec<_> = state.available.drain(..).collect();
            for resource in &drained {
                state.resources.remove(resource);
                self.shared.counter.dec();
            }
            self.shared.not_empty.notify_all();
            drained
        };

        debug!(closed = drained.len(), "Resource pool closed");
        for resource in drained {
            self.shared.close_resource(resource);
        }
        self.gc_task.cancel();

        if let Some(detector) = &self.leak_detector {
            detector.check_shutdown(type_name::<Self>());
        }
    }
}

impl<F> Shared<F>
where
    F: ResourceFactory,
    F::Resource: Clone + Eq + Hash,
{
    /// `Ok(None)` only for [`Wait::Never`] and when a deadline passes
    fn acquire(&self, wait: Wait) -> PoolResult<Option<F::Resource>> {
        loop {
            let resource = match self.take_slot(&wait)? {
                None => return Ok(None),
                Some(Slot::Create) => return self.create_reserved().map(Some),
                Some(Slot::Pooled(resource)) => resource,
            };

            if self.factory.is_healthy(&resource) {
                MetricsTracker::record(&self.metrics.total_acquired);
                return Ok(Some(resource));
            }

            debug!("Discarding unhealthy resource");
            self.forget(&resource);
            MetricsTracker::record(&self.metrics.unhealthy_discarded);
            self.close_resource(resource);

            // replacements share the caller's original budget
            if let Wait::Until(deadline, _) = &wait {
                if self.clock.now_millis() >= *deadline {
                    MetricsTracker::record(&self.metrics.acquire_timeouts);
                    return Ok(None);
                }
            }
        }
    }

    fn take_slot(&self, wait: &Wait) -> PoolResult<Option<Slot<F::Resource>>> {
        let mut state = self.state.lock();
        let mut waited = false;
        loop {
            if state.closed {
                return Err(if waited { PoolError::Cancelled } else { PoolError::Closed });
            }
            if let Some(resource) = state.poll(self.selection_policy) {
                return Ok(Some(Slot::Pooled(resource)));
            }
            if state.resources.len() + state.creating < self.max_capacity {
                state.creating += 1;
                return Ok(Some(Slot::Create));
            }

            match *wait {
                Wait::Never => return Ok(None),
                Wait::Forever => self.not_empty.wait(&mut state),
                Wait::Until(deadline, _) => {
                    let now = self.clock.now_millis();
                    if now >= deadline {
                        MetricsTracker::record(&self.metrics.acquire_timeouts);
                        return Ok(None);
                    }
                    self.not_empty
                        .wait_for(&mut state, Duration::from_millis(deadline - now));
                }
            }
            waited = true;
        }
    }

    fn create_reserved(&self) -> PoolResult<F::Resource> {
        let created = self.factory.create();
        let mut state = self.state.lock();
        state.creating -= 1;

        let resource = match created {
            Ok(resource) => resource,
            Err(e) => {
                self.not_empty.notify_one();
                return Err(PoolError::creation(e));
            }
        };
        if state.closed {
            drop(state);
            self.close_resource(resource);
            return Err(PoolError::Closed);
        }
        if state.resources.contains_key(&resource) {
            self.not_empty.notify_one();
            drop(state);
            return Err(PoolError::invalid(
                "factory returned a resource the pool already tracks",
            ));
        }

        let now = self.clock.now_millis();
        state.resources.insert(
            resource.clone(),
            Tracked {
                meta: ResourceMeta::new(now),
                in_use: true,
            },
        );
        self.counter.inc();
        MetricsTracker::record(&self.metrics.total_created);
        MetricsTracker::record(&self.metrics.total_acquired);
        Ok(resource)
    }

    fn release(&self, resource: F::Resource) -> PoolResult<()> {
        let now = self.clock.now_millis();
        let mut state = self.state.lock();
        let Some(tracked) = state.resources.get_mut(&resource) else {
            return Err(PoolError::invalid("resource was not acquired from this pool"));
        };
        if !tracked.in_use {
            return Err(PoolError::invalid("resource is already released"));
        }
        tracked.in_use = false;
        tracked.meta.touch(now);
        MetricsTracker::record(&self.metrics.total_released);

        if state.closed {
            state.resources.remove(&resource);
            self.counter.dec();
            drop(state);
            self.close_resource(resource);
            return Ok(());
        }

        state.available.push_front(resource);
        self.not_empty.notify_one();
        Ok(())
    }

    /// Stop tracking a checked-out resource, freeing its capacity
    fn forget(&self, resource: &F::Resource) {
        let mut state = self.state.lock();
        if state.resources.remove(resource).is_some() {
            self.counter.dec();
        }
        self.not_empty.notify_one();
    }

    fn collect_garbage(&self) -> usize {
        let expired = {
            let mut guard = self.state.lock();
            let state = &mut *guard;
            if state.closed || state.resources.len() <= self.min_capacity {
                return 0;
            }

            let now = self.clock.now_millis();
            let mut expired = Vec::new();
            let mut idx = 0;
            while idx < state.available.len() && state.resources.len() > self.min_capacity {
                let collect = state
                    .resources
                    .get(&state.available[idx])
                    .is_some_and(|tracked| self.gc_policy.should_gc(&tracked.meta, now));
                if !collect {
                    idx += 1;
                    continue;
                }
                if let Some(resource) = state.available.remove(idx) {
                    state.resources.remove(&resource);
                    self.counter.dec();
                    expired.push(resource);
                }
            }
            expired
        };

        let collected = expired.len();
        if collected > 0 {
            debug!(collected, "Garbage collected idle resources");
        }
        for resource in expired {
            MetricsTracker::record(&self.metrics.garbage_collected);
            self.close_resource(resource);
        }
        collected
    }

    fn close_resource(&self, resource: F::Resource) {
        if let Err(e) = self.factory.close(resource) {
            warn!(error = %e, "Failed to close pooled resource");
        }
    }
}

impl<R: Clone + Eq + Hash> PoolState<R> {
    /// Take an available resource and mark it checked out
    fn poll(&mut self, policy: SelectionPolicy) -> Option<R> {
        let resource = match policy {
            SelectionPolicy::Fifo => self.available.pop_back(),
            SelectionPolicy::Lifo => self.available.pop_front(),
        }?;
        if let Some(tracked) = self.resources.get_mut(&resource) {
            tracked.in_use = true;
        }
        Some(resource)
    }
}

impl<F> Pool<F::Resource> for DynamicResourcePool<F>
where
    F: ResourceFactory,
    F::Resource: Clone + Eq + Hash,
{
    fn acquire(&self) -> PoolResult<F::Resource> {
        DynamicResourcePool::acquire(self)
    }

    fn acquire_timeout(&self, timeout: Duration) -> PoolResult<F::Resource> {
        DynamicResourcePool::acquire_timeout(self, timeout)
    }

    fn release(&self, resource: F::Resource) -> PoolResult<()> {
        DynamicResourcePool::release(self, resource)
    }

    fn size(&self) -> usize {
        DynamicResourcePool::size(self)
    }

    fn close(&self) {
        DynamicResourcePool::close(self)
    }

    fn leak_detector(&self) -> Option<&Arc<LeakDetector>> {
        self.leak_detector.as_ref()
    }
}

impl<F> Drop for DynamicResourcePool<F>
where
    F: ResourceFactory,
    F::Resource: Clone + Eq + Hash,
{
    fn drop(&mut self) {
        self.close();
    }
}

impl<F> fmt::Debug for DynamicResourcePool<F>
where
    F: ResourceFactory,
    F::Resource: Clone + Eq + Hash,
{
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let state = self.shared.state.lock();
        f.debug_struct("DynamicResourcePool")
            .field("size", &state.resources.len())
            .field("available", &state.available.len())
            .field("min_capacity", &self.shared.min_capacity)
            .field("max_capacity", &self.shared.max_capacity)
            .field("selection_policy", &self.shared.selection_policy)
            .field("closed", &state.closed)
            .finish()
    }
}

fn millis(duration: Duration) -> u64 {
    u64::try_from(duration.as_millis()).unwrap_or(u64::MAX)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::clock::ManualClock;
    use crate::metrics::AtomicCounter;
    use parking_lot::Mutex as PlMutex;
    use std::collections::HashSet;
    use std::io;
    use std::sync::atomic::{AtomicBool, AtomicU32, Ordering};
    use std::thread;
    use std::time::Instant;

    /// Hands out increasing ids and records health checks and closes
    #[derive(Default)]
    struct Sessions {
        next: AtomicU32,
        unhealthy: PlMutex<HashSet<u32>>,
        closed: PlMutex<Vec<u32>>,
        fail_next: AtomicBool,
        /// Advanced by every health check when set
        slow_checks: PlMutex<Option<(ManualClock, u64)>>,
    }

    impl ResourceFactory for Arc<Sessions> {
        type Resource = u32;
        type Error = io::Error;

        fn create(&self) -> Result<u32, io::Error> {
            if self.fail_next.swap(false, Ordering::SeqCst) {
                return Err(io::Error::other("connection refused"));
            }
            Ok(self.next.fetch_add(1, Ordering::SeqCst))
        }

        fn is_healthy(&self, resource: &u32) -> bool {
            if let Some((clock, cost)) = &*self.slow_checks.lock() {
                clock.advance(*cost);
            }
            !self.unhealthy.lock().contains(resource)
        }

        fn close(&self, resource: u32) -> Result<(), io::Error> {
            self.closed.lock().push(resource);
            Ok(())
        }
    }

    fn options() -> DynamicPoolOptions {
        // keep background collection out of the way; tests call collect_garbage directly
        DynamicPoolOptions::new().with_gc_schedule(Duration::from_secs(3600), Duration::from_secs(3600))
    }

    #[test]
    fn test_capacity_two_times_out_third() {
        let sessions = Arc::new(Sessions::default());
        let pool = DynamicResourcePool::new(Arc::clone(&sessions), options().with_capacity(0, 2)).unwrap();
        let a = pool.acquire().unwrap();
        let b = pool.acquire().unwrap();

        let start = Instant::now();
        let third = pool.acquire_timeout(Duration::from_millis(100));
        assert!(matches!(third, Err(PoolError::Timeout(_))));
        assert!(start.elapsed() >= Duration::from_millis(90));

        pool.release(a).unwrap();
        assert_eq!(pool.acquire_timeout(Duration::from_millis(100)).unwrap(), a);
        pool.release(a).unwrap();
        pool.release(b).unwrap();
        assert_eq!(pool.size(), 2);
        assert_eq!(pool.metrics().acquire_timeouts, 1);
    }

    #[test]
    fn test_release_rejects_unknown_and_double_release() {
        let pool = DynamicResourcePool::new(Arc::new(Sessions::default()), options()).unwrap();
        let id = pool.acquire().unwrap();
        assert!(matches!(pool.release(77), Err(PoolError::InvalidArgument(_))));
        pool.release(id).unwrap();
        assert!(matches!(pool.release(id), Err(PoolError::InvalidArgument(_))));
        assert_eq!(pool.available(), 1);
    }

    #[test]
    fn test_selection_policies() {
        let lifo = DynamicResourcePool::new(Arc::new(Sessions::default()), options()).unwrap();
        let (a, b) = (lifo.acquire().unwrap(), lifo.acquire().unwrap());
        lifo.release(a).unwrap();
        lifo.release(b).unwrap();
        assert_eq!(lifo.acquire().unwrap(), b);

        let fifo = DynamicResourcePool::new(
            Arc::new(Sessions::default()),
            options().with_selection_policy(SelectionPolicy::Fifo),
        )
        .unwrap();
        let (a, b) = (fifo.acquire().unwrap(), fifo.acquire().unwrap());
        fifo.release(a).unwrap();
        fifo.release(b).unwrap();
        assert_eq!(fifo.acquire().unwrap(), a);
    }

    #[test]
    fn test_unhealthy_resource_is_replaced() {
        let sessions = Arc::new(Sessions::default());
        let counter = AtomicCounter::new();
        let pool = DynamicResourcePool::new(
            Arc::clone(&sessions),
            options().with_counter(Arc::new(counter.clone())),
        )
        .unwrap();

        let id = pool.acquire().unwrap();
        pool.release(id).unwrap();
        sessions.unhealthy.lock().insert(id);

        let replacement = pool.acquire().unwrap();
        assert_ne!(replacement, id);
        assert_eq!(*sessions.closed.lock(), vec![id]);
        assert_eq!(pool.size(), 1);
        assert_eq!(counter.get(), 1);
        assert_eq!(pool.metrics().unhealthy_discarded, 1);
    }

    #[test]
    fn test_unhealthy_replacements_stop_at_deadline() {
        let clock = ManualClock::new(0);
        let sessions = Arc::new(Sessions::default());
        let pool = DynamicResourcePool::new(
            Arc::clone(&sessions),
            options().with_capacity(0, 3).with_clock(Arc::new(clock.clone())),
        )
        .unwrap();
        let ids: Vec<_> = (0..3).map(|_| pool.acquire().unwrap()).collect();
        for id in &ids {
            pool.release(*id).unwrap();
        }
        sessions.unhealthy.lock().extend(ids.iter().copied());
        *sessions.slow_checks.lock() = Some((clock.clone(), 40));

        let result = pool.acquire_timeout(Duration::from_millis(100));
        assert!(matches!(result, Err(PoolError::Timeout(_))));
        // third check crossed the 100ms deadline; no fresh resource was created after it
        assert_eq!(clock.now_millis(), 120);
        assert_eq!(sessions.closed.lock().len(), 3);
        assert_eq!(pool.size(), 0);
        assert_eq!(pool.metrics().unhealthy_discarded, 3);
        assert_eq!(pool.metrics().acquire_timeouts, 1);
        assert_eq!(pool.metrics().total_created, 3);
    }

    #[test]
    fn test_unbounded_timeout_and_gc_schedule() {
        let pool = Arc::new(
            DynamicResourcePool::new(
                Arc::new(Sessions::default()),
                DynamicPoolOptions::new()
                    .with_capacity(0, 1)
                    .with_gc_schedule(Duration::MAX, Duration::MAX),
            )
            .unwrap(),
        );
        let held = pool.acquire_timeout(Duration::MAX).unwrap();

        let waiter = {
            let pool = Arc::clone(&pool);
            thread::spawn(move || pool.acquire_timeout(Duration::MAX))
        };
        thread::sleep(Duration::from_millis(20));
        pool.release(held).unwrap();
        assert_eq!(waiter.join().unwrap().unwrap(), held);
    }

    #[test]
    fn test_creation_failure_keeps_capacity() {
        let sessions = Arc::new(Sessions::default());
        let pool = DynamicResourcePool::new(Arc::clone(&sessions), options().with_capacity(0, 1)).unwrap();
        sessions.fail_next.store(true, Ordering::SeqCst);
        assert!(matches!(pool.acquire(), Err(PoolError::Creation(_))));
        assert_eq!(pool.size(), 0);
        assert!(pool.acquire_timeout(Duration::from_millis(50)).is_ok());
    }

    #[test]
    fn test_gc_respects_min_capacity() {
        let clock = ManualClock::new(0);
        let sessions = Arc::new(Sessions::default());
        let pool = DynamicResourcePool::new(
            Arc::clone(&sessions),
            options()
                .with_capacity(1, 8)
                .with_clock(Arc::new(clock.clone()))
                .with_gc_policy(GcPolicy::IdleTimeout(Duration::from_secs(60))),
        )
        .unwrap();

        let ids: Vec<_> = (0..4).map(|_| pool.acquire().unwrap()).collect();
        let held = ids[3];
        for id in &ids[..3] {
            pool.release(*id).unwrap();
        }

        clock.advance(30_000);
        assert_eq!(pool.collect_garbage(), 0);

        clock.advance(31_000);
        assert_eq!(pool.collect_garbage(), 3);
        assert_eq!(pool.size(), 1);
        assert_eq!(pool.in_use(), 1);
        assert_eq!(sessions.closed.lock().len(), 3);

        pool.release(held).unwrap();
        clock.advance(61_000);
        assert_eq!(pool.collect_garbage(), 0);
        assert_eq!(pool.size(), 1);
    }

    #[test]
    fn test_background_gc_runs() {
        let clock = ManualClock::new(0);
        let pool = DynamicResourcePool::new(
            Arc::new(Sessions::default()),
            DynamicPoolOptions::new()
                .with_capacity(0, 4)
                .with_clock(Arc::new(clock.clone()))
                .with_gc_policy(GcPolicy::IdleTimeout(Duration::from_millis(10)))
                .with_gc_schedule(Duration::from_millis(5), Duration::from_millis(5)),
        )
        .unwrap();
        let id = pool.acquire().unwrap();
        pool.release(id).unwrap();
        clock.advance(1_000);

        let deadline = Instant::now() + Duration::from_secs(2);
        while pool.size() > 0 && Instant::now() < deadline {
            thread::sleep(Duration::from_millis(5));
        }
        assert_eq!(pool.size(), 0);
        assert_eq!(pool.metrics().garbage_collected, 1);
    }

    #[test]
    fn test_close_cancels_waiters_and_closes_on_release() {
        let sessions = Arc::new(Sessions::default());
        let pool = Arc::new(
            DynamicResourcePool::new(Arc::clone(&sessions), options().with_capacity(0, 1)).unwrap(),
        );
        let held = pool.acquire().unwrap();

        let waiter = {
            let pool = Arc::clone(&pool);
            thread::spawn(move || pool.acquire())
        };
        thread::sleep(Duration::from_millis(30));
        pool.close();
        assert!(matches!(waiter.join().unwrap(), Err(PoolError::Cancelled)));
        assert!(matches!(pool.acquire(), Err(PoolError::Closed)));

        pool.release(held).unwrap();
        assert_eq!(pool.size(), 0);
        assert_eq!(*sessions.closed.lock(), vec![held]);
    }

    #[test]
    fn test_scoped_handles_release_on_drop() {
        let pool = Arc::new(DynamicResourcePool::new(Arc::new(Sessions::default()), options()).unwrap());
        {
            let session = pool.acquire_scoped().unwrap();
            assert_eq!(pool.in_use(), 1);
            assert_eq!(*session, 0);
        }
        assert_eq!(pool.in_use(), 0);
        assert_eq!(pool.available(), 1);
    }

    #[test]
    fn test_checked_out_never_exceeds_capacity() {
        let sessions = Arc::new(Sessions::default());
        let pool = Arc::new(DynamicResourcePool::new(sessions, options().with_capacity(0, 3)).unwrap());
        let peak = Arc::new(AtomicU32::new(0));

        let workers: Vec<_> = (0..8)
            .map(|_| {
                let pool = Arc::clone(&pool);
                let peak = Arc::clone(&peak);
                thread::spawn(move || {
                    for _ in 0..50 {
                        let id = pool.acquire().unwrap();
                        peak.fetch_max(pool.in_use() as u32, Ordering::SeqCst);
                        pool.release(id).unwrap();
                    }
                })
            })
            .collect();
        for worker in workers {
            worker.join().unwrap();
        }

        assert!(peak.load(Ordering::SeqCst) <= 3);
        assert!(pool.size() <= 3);
        assert_eq!(pool.in_use(), 0);
    }

    #[tokio::test]
    async fn test_acquire_async() {
        let pool = DynamicResourcePool::new(Arc::new(Sessions::default()), options().with_capacity(0, 1)).unwrap();
        let id = pool.acquire_async(Duration::from_millis(100)).await.unwrap();
        let result = pool.acquire_async(Duration::from_millis(50)).await;
        assert!(matches!(result, Err(PoolError::Timeout(_))));
        pool.release(id).unwrap();
    }
}
