//! Keyed pool of read/write locks with watermark eviction

use std::collections::{HashMap, VecDeque};
use std::fmt;
use std::hash::Hash;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicI32, Ordering};
use std::thread::JoinHandle;
use std::time::{Duration, Instant};

use crossbeam::channel::{self, Receiver, RecvTimeoutError};
use dashmap::DashMap;
use dashmap::mapref::entry::Entry;
use parking_lot::{Condvar, Mutex, RwLock};
use tracing::{debug, error, warn};

use crate::config::LockPoolOptions;
use crate::errors::PoolResult;
use crate::lock::{LockMode, LockResource, SharedRwLock};
use crate::thread::ThreadFactory;

/// Reference count of an entry the evictor has claimed
const REMOVING: i32 = i32::MIN;

/// Longest the evictor sleeps before re-checking the pool size
const EVICTION_MAX_AWAIT: Duration = Duration::from_secs(30);

/// Minimum interval between "still over the high watermark" warnings
const EVICTION_WARNING_INTERVAL: Duration = Duration::from_secs(60);

/// Passes over the key set per eviction round
const EVICTION_MAX_ROUNDS: usize = 3;

/// How long `close` waits for the evictor to stop
const EVICTOR_SHUTDOWN_TIMEOUT: Duration = Duration::from_secs(2);

struct LockEntry {
    lock: SharedRwLock,
    ref_count: AtomicI32,
    accessed: AtomicBool,
}

impl LockEntry {
    fn referenced() -> Self {
        Self {
            lock: Arc::new(RwLock::new(())),
            ref_count: AtomicI32::new(1),
            accessed: AtomicBool::new(false),
        }
    }
}

struct Inner<K> {
    pool: DashMap<K, Arc<LockEntry>>,
    low_watermark: usize,
    high_watermark: usize,
    evict_lock: Mutex<()>,
    over_high_watermark: Condvar,
    shutdown: AtomicBool,
}

/// Pool of read/write locks keyed by `K`
///
/// Locks are created on first use and shared by every caller asking for the same key. Each
/// entry counts the guards referencing it; once the pool grows past its high watermark a
/// background evictor removes unreferenced entries, sparing recently used ones once, until the
/// pool is back at its low watermark. An entry is never removed while a guard holds it, so two
/// callers of the same key always synchronize on the same lock.
///
/// # Examples
///
/// ```
/// use esox_resourcepool::{LockMode, LockPool, LockPoolOptions};
///
/// let pool = LockPool::new(LockPoolOptions::new().with_watermarks(2, 4)).unwrap();
/// {
///     let _first = pool.get("user-1", LockMode::Read);
///     let _second = pool.get("user-1", LockMode::Read);
///     assert!(pool.try_get("user-1", LockMode::Write).is_none());
/// }
/// assert!(pool.try_get("user-1", LockMode::Write).is_some());
/// assert_eq!(pool.size(), 1);
/// ```
pub struct LockPool<K>
where
    K: Eq + Hash + Clone + Send + Sync + 'static,
{
    inner: Arc<Inner<K>>,
    evictor: Mutex<Option<JoinHandle<()>>>,
    evictor_done: Receiver<()>,
}

impl<K> LockPool<K>
where
    K: Eq + Hash + Clone + Send + Sync + 'static,
{
    /// Create the pool and start its evictor thread
    pub fn new(options: LockPoolOptions) -> PoolResult<Self> {
        options.validate()?;
        let shard_amount = options.concurrency_level.next_power_of_two().max(2);
        let inner = Arc::new(Inner {
            pool: DashMap::with_capacity_and_shard_amount(options.initial_capacity, shard_amount),
            low_watermark: options.low_watermark,
            high_watermark: options.high_watermark,
            evict_lock: Mutex::new(()),
            over_high_watermark: Condvar::new(),
            shutdown: AtomicBool::new(false),
        });

        let (done_tx, evictor_done) = channel::bounded::<()>(0);
        let evictor = Evictor {
            inner: Arc::clone(&inner),
            cursor: VecDeque::new(),
            last_warning: None,
            stalled: false,
        };
        let handle = ThreadFactory::new("LockPool Evictor").spawn(move || {
            // dropped on exit, which signals `close`
            let _done = done_tx;
            evictor.run();
        })?;

        Ok(Self {
            inner,
            evictor: Mutex::new(Some(handle)),
            evictor_done,
        })
    }

    /// Lock `key` in `mode`, blocking until the lock is granted
    pub fn get(&self, key: K, mode: LockMode) -> LockResource {
        self.get_with(key, mode, false)
    }

    /// Lock `key` in `mode`; with `use_try_lock` the lock is polled instead of parked on
    pub fn get_with(&self, key: K, mode: LockMode, use_try_lock: bool) -> LockResource {
        let entry = self.reference(key);
        LockResource::new(&entry.lock, mode, use_try_lock).on_release(self.unreference(entry))
    }

    /// Lock `key` in `mode` if that is possible without waiting
    pub fn try_get(&self, key: K, mode: LockMode) -> Option<LockResource> {
        let entry = self.reference(key);
        match LockResource::try_new(&entry.lock, mode) {
            Some(resource) => Some(resource.on_release(self.unreference(entry))),
            None => {
                self.unreference(entry)();
                None
            }
        }
    }

    /// The lock currently pooled for `key`, or a fresh unpooled lock
    ///
    /// The returned lock is not reference counted and may be evicted while in use; callers need
    /// to serialize on the key some other way.
    pub fn raw_lock(&self, key: &K) -> SharedRwLock {
        match self.inner.pool.get(key) {
            Some(entry) => Arc::clone(&entry.lock),
            None => Arc::new(RwLock::new(())),
        }
    }

    /// Snapshot of the pooled locks
    pub fn entries(&self) -> HashMap<K, SharedRwLock> {
        self.inner
            .pool
            .iter()
            .map(|entry| (entry.key().clone(), Arc::clone(&entry.value().lock)))
            .collect()
    }

    pub fn contains_key(&self, key: &K) -> bool {
        self.inner.pool.contains_key(key)
    }

    pub fn size(&self) -> usize {
        self.inner.pool.len()
    }

    pub fn low_watermark(&self) -> usize {
        self.inner.low_watermark
    }

    pub fn high_watermark(&self) -> usize {
        self.inner.high_watermark
    }

    /// Stop the evictor, waiting briefly for it to exit
    pub fn close(&self) {
        if self.inner.shutdown.swap(true, Ordering::AcqRel) {
            return;
        }
        {
            let _guard = self.inner.evict_lock.lock();
            self.inner.over_high_watermark.notify_all();
        }

        let Some(handle) = self.evictor.lock().take() else {
            return;
        };
        match self.evictor_done.recv_timeout(EVICTOR_SHUTDOWN_TIMEOUT) {
            Err(RecvTimeoutError::Timeout) => {
                warn!(pool = %self, "Lock pool evictor did not stop in time, detaching it");
            }
            _ => {
                if handle.join().is_err() {
                    error!(pool = %self, "Lock pool evictor panicked");
                }
            }
        }
    }

    /// Find or create the entry for `key` with one more reference
    fn reference(&self, key: K) -> Arc<LockEntry> {
        let entry = match self.inner.pool.entry(key) {
            Entry::Occupied(mut occupied) => {
                let existing = occupied.get();
                if existing.ref_count.fetch_add(1, Ordering::AcqRel) >= 0 {
                    existing.accessed.store(true, Ordering::Release);
                    Arc::clone(existing)
                } else {
                    let fresh = Arc::new(LockEntry::referenced());
                    occupied.insert(Arc::clone(&fresh));
                    fresh
                }
            }
            Entry::Vacant(vacant) => {
                let fresh = Arc::new(LockEntry::referenced());
                vacant.insert(Arc::clone(&fresh));
                fresh
            }
        };

        self.inner.nudge_evictor();
        entry
    }

    /// Action dropping one reference to `entry`
    ///
    /// The last reference going away while the pool is over its high watermark wakes the
    /// evictor, which may be waiting after a round in which every entry was held.
    fn unreference(&self, entry: Arc<LockEntry>) -> impl FnOnce() + Send + use<K> {
        let inner = Arc::clone(&self.inner);
        move || {
            if entry.ref_count.fetch_sub(1, Ordering::AcqRel) == 1 {
                inner.nudge_evictor();
            }
        }
    }
}

impl<K> Inner<K>
where
    K: Eq + Hash,
{
    fn nudge_evictor(&self) {
        if self.pool.len() > self.high_watermark {
            if let Some(_guard) = self.evict_lock.try_lock() {
                self.over_high_watermark.notify_one();
            }
        }
    }
}

impl<K> Drop for LockPool<K>
where
    K: Eq + Hash + Clone + Send + Sync + 'static,
{
    fn drop(&mut self) {
        self.close();
    }
}

impl<K> fmt::Display for LockPool<K>
where
    K: Eq + Hash + Clone + Send + Sync + 'static,
{
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "LockPool {{ low_watermark: {}, high_watermark: {}, size: {} }}",
            self.inner.low_watermark,
            self.inner.high_watermark,
            self.size()
        )
    }
}

impl<K> fmt::Debug for LockPool<K>
where
    K: Eq + Hash + Clone + Send + Sync + 'static,
{
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        fmt::Display::fmt(self, f)
    }
}

/// Background sweeper shrinking the pool from the high to the low watermark
struct Evictor<K> {
    inner: Arc<Inner<K>>,
    /// Keys still to visit; refilled with a snapshot of the pool when exhausted
    cursor: VecDeque<K>,
    last_warning: Option<Instant>,
    /// Set after a round that removed nothing
    stalled: bool,
}

impl<K> Evictor<K>
where
    K: Eq + Hash + Clone + Send + Sync + 'static,
{
    fn run(mut self) {
        while !self.inner.shutdown.load(Ordering::Acquire) {
            self.await_and_evict();
        }
        debug!("Lock pool evictor stopped");
    }

    fn await_and_evict(&mut self) {
        let inner = Arc::clone(&self.inner);
        let mut guard = inner.evict_lock.lock();
        // every lock is in use; wait for a release or acquisition instead of spinning
        if self.stalled && !inner.shutdown.load(Ordering::Acquire) {
            inner.over_high_watermark.wait_for(&mut guard, EVICTION_MAX_AWAIT);
        }
        while inner.pool.len() <= inner.high_watermark {
            if inner.shutdown.load(Ordering::Acquire) {
                return;
            }
            inner.over_high_watermark.wait_for(&mut guard, EVICTION_MAX_AWAIT);
        }
        if inner.shutdown.load(Ordering::Acquire) {
            return;
        }

        let evicted = self.evict(inner.pool.len().saturating_sub(inner.low_watermark));
        self.stalled = evicted == 0;
        drop(guard);

        let size = self.inner.pool.len();
        debug!(evicted, size, "Lock pool eviction round finished");
        if size >= self.inner.high_watermark {
            let now = Instant::now();
            let due = self
                .last_warning
                .is_none_or(|last| now.duration_since(last) >= EVICTION_WARNING_INTERVAL);
            if due {
                self.last_warning = Some(now);
                warn!(
                    size,
                    high_watermark = self.inner.high_watermark,
                    "Lock pool is still over its high watermark after eviction; most locks are in use"
                );
            }
        }
    }

    /// Remove up to `target` unreferenced entries; returns how many were removed
    fn evict(&mut self, target: usize) -> usize {
        let mut evicted = 0;
        let mut refills = 0;
        while evicted < target {
            let Some(key) = self.cursor.pop_front() else {
                if refills == EVICTION_MAX_ROUNDS {
                    break;
                }
                refills += 1;
                self.cursor = self.inner.pool.iter().map(|entry| entry.key().clone()).collect();
                if self.cursor.is_empty() {
                    break;
                }
                continue;
            };

            // recently used entries get a second chance
            let was_accessed = self
                .inner
                .pool
                .get(&key)
                .map(|entry| entry.accessed.swap(false, Ordering::AcqRel));
            if was_accessed != Some(false) {
                continue;
            }

            let removed = self.inner.pool.remove_if(&key, |_, entry| {
                !entry.accessed.load(Ordering::Acquire)
                    && entry
                        .ref_count
                        .compare_exchange(0, REMOVING, Ordering::AcqRel, Ordering::Acquire)
                        .is_ok()
            });
            if removed.is_some() {
                evicted += 1;
            }
        }
        evicted
    }
}
