//! Fixed-rate task scheduler backing the pools' background garbage collection

use std::fmt;
use std::panic::{AssertUnwindSafe, catch_unwind};
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Weak};
use std::thread::JoinHandle;
use std::time::{Duration, Instant};

use parking_lot::{Condvar, Mutex};
use tracing::{debug, error};

use crate::errors::PoolResult;
use crate::thread::ThreadFactory;

type Task = Box<dyn FnMut() + Send>;

struct Scheduled {
    id: u64,
    /// `None` once the schedule runs past what `Instant` can represent
    next_run: Option<Instant>,
    interval: Duration,
    cancelled: Arc<AtomicBool>,
    task: Task,
}

struct Shared {
    queue: Mutex<Vec<Scheduled>>,
    wakeup: Condvar,
    shutdown: AtomicBool,
    next_id: AtomicU64,
}

/// Single worker thread running tasks at a fixed rate
///
/// Pools receive an `Arc<ScheduledExecutor>` so several pools can share one worker; the caller
/// decides how long it lives. Dropping the last handle stops and joins the worker.
///
/// # Examples
///
/// ```
/// use esox_resourcepool::ScheduledExecutor;
/// use std::sync::atomic::{AtomicUsize, Ordering};
/// use std::sync::Arc;
/// use std::time::Duration;
///
/// let executor = ScheduledExecutor::new("example-%d").unwrap();
/// let runs = Arc::new(AtomicUsize::new(0));
/// let counter = Arc::clone(&runs);
/// let task = executor.schedule_at_fixed_rate(Duration::ZERO, Duration::from_millis(5), move || {
///     counter.fetch_add(1, Ordering::SeqCst);
/// });
/// std::thread::sleep(Duration::from_millis(50));
/// task.cancel();
/// assert!(runs.load(Ordering::SeqCst) >= 2);
/// ```
pub struct ScheduledExecutor {
    shared: Arc<Shared>,
    worker: Mutex<Option<JoinHandle<()>>>,
}

impl ScheduledExecutor {
    /// Start the worker thread, named from `name_format` (see [`ThreadFactory`])
    pub fn new(name_format: &str) -> PoolResult<Self> {
        Self::with_thread_factory(&ThreadFactory::new(name_format))
    }

    pub fn with_thread_factory(factory: &ThreadFactory) -> PoolResult<Self> {
        let shared = Arc::new(Shared {
            queue: Mutex::new(Vec::new()),
            wakeup: Condvar::new(),
            shutdown: AtomicBool::new(false),
            next_id: AtomicU64::new(0),
        });
        let worker_shared = Arc::clone(&shared);
        let worker = factory.spawn(move || run_worker(&worker_shared))?;
        Ok(Self {
            shared,
            worker: Mutex::new(Some(worker)),
        })
    }

    /// Run `task` after `initial_delay` and then every `interval`
    ///
    /// A run that overlaps the next slot pushes the schedule back instead of bursting.
    pub fn schedule_at_fixed_rate<F>(
        &self,
        initial_delay: Duration,
        interval: Duration,
        task: F,
    ) -> ScheduledTask
    where
        F: FnMut() + Send + 'static,
    {
        let cancelled = Arc::new(AtomicBool::new(false));
        let id = self.shared.next_id.fetch_add(1, Ordering::Relaxed);
        self.shared.queue.lock().push(Scheduled {
            id,
            next_run: Instant::now().checked_add(initial_delay),
            interval,
            cancelled: Arc::clone(&cancelled),
            task: Box::new(task),
        });
        self.shared.wakeup.notify_one();
        ScheduledTask {
            id,
            cancelled,
            shared: Arc::downgrade(&self.shared),
        }
    }

    /// Number of tasks still scheduled
    pub fn scheduled_count(&self) -> usize {
        self.shared
            .queue
            .lock()
            .iter()
            .filter(|s| !s.cancelled.load(Ordering::Acquire))
            .count()
    }

    pub fn is_shutdown(&self) -> bool {
        self.shared.shutdown.load(Ordering::Acquire)
    }

    /// Stop the worker and wait for a running task to finish
    pub fn shutdown(&self) {
        self.shared.shutdown.store(true, Ordering::Release);
        {
            let _queue = self.shared.queue.lock();
            self.shared.wakeup.notify_all();
        }
        if let Some(worker) = self.worker.lock().take() {
            if worker.thread().id() == std::thread::current().id() {
                return;
            }
            if worker.join().is_err() {
                error!("Scheduled executor worker panicked");
            }
        }
    }
}

impl Drop for ScheduledExecutor {
    fn drop(&mut self) {
        self.shutdown();
    }
}

impl fmt::Debug for ScheduledExecutor {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ScheduledExecutor")
            .field("scheduled", &self.scheduled_count())
            .field("shutdown", &self.is_shutdown())
            .finish()
    }
}

fn run_worker(shared: &Shared) {
    let mut queue = shared.queue.lock();
    loop {
        if shared.shutdown.load(Ordering::Acquire) {
            break;
        }
        queue.retain(|s| !s.cancelled.load(Ordering::Acquire));
        let next = queue
            .iter()
            .enumerate()
            .filter_map(|(idx, s)| s.next_run.map(|at| (idx, at)))
            .min_by_key(|(_, at)| *at);
        let Some((idx, next_run)) = next else {
            shared.wakeup.wait(&mut queue);
            continue;
        };
        if next_run > Instant::now() {
            shared.wakeup.wait_until(&mut queue, next_run);
            continue;
        }

        let mut scheduled = queue.swap_remove(idx);
        drop(queue);
        if catch_unwind(AssertUnwindSafe(|| (scheduled.task)())).is_err() {
            error!(task = scheduled.id, "Scheduled task panicked");
        }
        queue = shared.queue.lock();

        if !scheduled.cancelled.load(Ordering::Acquire) {
            let now = Instant::now();
            scheduled.next_run = scheduled
                .next_run
                .and_then(|at| at.checked_add(scheduled.interval))
                .map(|at| at.max(now));
            queue.push(scheduled);
        }
    }
    debug!("Scheduled executor worker stopped");
}

/// Handle to a task scheduled on a [`ScheduledExecutor`]
#[derive(Debug)]
pub struct ScheduledTask {
    id: u64,
    cancelled: Arc<AtomicBool>,
    shared: Weak<Shared>,
}

impl ScheduledTask {
    /// Stop future runs; a run in progress completes
    pub fn cancel(&self) {
        self.cancelled.store(true, Ordering::Release);
        if let Some(shared) = self.shared.upgrade() {
            let _queue = shared.queue.lock();
            shared.wakeup.notify_all();
        }
    }

    pub fn is_cancelled(&self) -> bool {
        self.cancelled.load(Ordering::Acquire)
    }

    pub fn id(&self) -> u64 {
        self.id
    }
}
