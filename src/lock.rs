//! Scoped read/write lock guards

use std::fmt;
use std::sync::Arc;
use std::thread;
use std::time::Duration;

use parking_lot::lock_api::{ArcRwLockReadGuard, ArcRwLockWriteGuard};
use parking_lot::{RawRwLock, RwLock};

/// Shared read/write lock handed out by the lock pool
pub type SharedRwLock = Arc<RwLock<()>>;

/// How long a spinning acquisition parks between `try_lock` attempts
const SPIN_PARK: Duration = Duration::from_micros(10);

/// Lock mode requested from a [`LockResource`]
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub enum LockMode {
    Read,
    Write,
}

enum Held {
    Read(ArcRwLockReadGuard<RawRwLock, ()>),
    Write(ArcRwLockWriteGuard<RawRwLock, ()>),
    Released,
}

/// A held read or write lock, released exactly once when dropped
///
/// An optional release action runs after the lock has been released, on every exit path.
///
/// # Examples
///
/// ```
/// use esox_resourcepool::{LockMode, LockResource};
/// use parking_lot::RwLock;
/// use std::sync::Arc;
///
/// let lock = Arc::new(RwLock::new(()));
/// {
///     let mut guard = LockResource::new(&lock, LockMode::Write, false);
///     assert!(lock.is_locked_exclusive());
///     assert!(guard.downgrade());
///     assert_eq!(guard.mode(), LockMode::Read);
/// }
/// assert!(!lock.is_locked());
/// ```
pub struct LockResource {
    lock: SharedRwLock,
    held: Held,
    release_action: Option<Box<dyn FnOnce() + Send>>,
}

impl LockResource {
    /// Acquire `lock` in `mode`, blocking until it is available
    ///
    /// With `use_try_lock` the lock is polled with `try_lock`, parking briefly between attempts,
    /// instead of queueing on the lock.
    pub fn new(lock: &SharedRwLock, mode: LockMode, use_try_lock: bool) -> Self {
        let held = match (mode, use_try_lock) {
            (LockMode::Read, false) => Held::Read(lock.read_arc()),
            (LockMode::Write, false) => Held::Write(lock.write_arc()),
            (LockMode::Read, true) => Held::Read(spin(|| lock.try_read_arc())),
            (LockMode::Write, true) => Held::Write(spin(|| lock.try_write_arc())),
        };
        Self::from_held(lock, held)
    }

    /// Acquire `lock` in `mode` only if that is possible without waiting
    pub fn try_new(lock: &SharedRwLock, mode: LockMode) -> Option<Self> {
        let held = match mode {
            LockMode::Read => Held::Read(lock.try_read_arc()?),
            LockMode::Write => Held::Write(lock.try_write_arc()?),
        };
        Some(Self::from_held(lock, held))
    }

    fn from_held(lock: &SharedRwLock, held: Held) -> Self {
        Self {
            lock: Arc::clone(lock),
            held,
            release_action: None,
        }
    }

    /// Run `action` once the lock has been released
    pub fn on_release<F>(mut self, action: F) -> Self
    where
        F: FnOnce() + Send + 'static,
    {
        self.release_action = Some(Box::new(action));
        self
    }

    /// The mode currently held
    pub fn mode(&self) -> LockMode {
        match self.held {
            Held::Write(_) => LockMode::Write,
            _ => LockMode::Read,
        }
    }

    /// Atomically trade a held write lock for a read lock
    ///
    /// Returns `false` when a read lock is held. Upgrading is never supported.
    pub fn downgrade(&mut self) -> bool {
        match std::mem::replace(&mut self.held, Held::Released) {
            Held::Write(guard) => {
                self.held = Held::Read(ArcRwLockWriteGuard::downgrade(guard));
                true
            }
            other => {
                self.held = other;
                false
            }
        }
    }

    /// Whether both guards lock the same underlying lock
    pub fn has_same_lock(&self, other: &LockResource) -> bool {
        Arc::ptr_eq(&self.lock, &other.lock)
    }

    /// Release the lock now
    pub fn close(self) {}
}

fn spin<G>(mut try_lock: impl FnMut() -> Option<G>) -> G {
    loop {
        if let Some(guard) = try_lock() {
            return guard;
        }
        thread::park_timeout(SPIN_PARK);
    }
}

impl Drop for LockResource {
    fn drop(&mut self) {
        self.held = Held::Released;
        if let Some(action) = self.release_action.take() {
            action();
        }
    }
}

impl fmt::Debug for LockResource {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("LockResource")
            .field("mode", &self.mode())
            .field("lock", &Arc::as_ptr(&self.lock))
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};

    fn new_lock() -> SharedRwLock {
        Arc::new(RwLock::new(()))
    }

    #[test]
    fn test_releases_on_drop() {
        let lock = new_lock();
        {
            let _guard = LockResource::new(&lock, LockMode::Write, false);
            assert!(lock.is_locked_exclusive());
        }
        assert!(!lock.is_locked());
    }

    #[test]
    fn test_releases_on_panic() {
        let lock = new_lock();
        let inner = Arc::clone(&lock);
        let result = std::panic::catch_unwind(std::panic::AssertUnwindSafe(move || {
            let _guard = LockResource::new(&inner, LockMode::Write, true);
            panic!("boom");
        }));
        assert!(result.is_err());
        assert!(!lock.is_locked());
    }

    #[test]
    fn test_readers_share() {
        let lock = new_lock();
        let first = LockResource::new(&lock, LockMode::Read, false);
        let second = LockResource::try_new(&lock, LockMode::Read);
        assert!(second.is_some());
        assert!(LockResource::try_new(&lock, LockMode::Write).is_none());
        drop(first);
        drop(second);
        assert!(LockResource::try_new(&lock, LockMode::Write).is_some());
    }

    #[test]
    fn test_release_action_runs_after_unlock() {
        let lock = new_lock();
        let observed_unlocked = Arc::new(AtomicBool::new(false));
        let runs = Arc::new(AtomicUsize::new(0));
        {
            let lock_in_action = Arc::clone(&lock);
            let observed = Arc::clone(&observed_unlocked);
            let runs = Arc::clone(&runs);
            let _guard = LockResource::new(&lock, LockMode::Write, false).on_release(move || {
                observed.store(!lock_in_action.is_locked(), Ordering::SeqCst);
                runs.fetch_add(1, Ordering::SeqCst);
            });
        }
        assert!(observed_unlocked.load(Ordering::SeqCst));
        assert_eq!(runs.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn test_downgrade_keeps_lock_held() {
        let lock = new_lock();
        let mut guard = LockResource::new(&lock, LockMode::Write, false);
        assert!(guard.downgrade());
        assert!(!lock.is_locked_exclusive());
        assert!(lock.is_locked());
        assert!(LockResource::try_new(&lock, LockMode::Read).is_some());
        assert!(LockResource::try_new(&lock, LockMode::Write).is_none());
        assert!(!guard.downgrade());
        guard.close();
        assert!(!lock.is_locked());
    }

    #[test]
    fn test_spin_acquire_waits_for_writer() {
        let lock = new_lock();
        let writer = LockResource::new(&lock, LockMode::Write, false);
        let contender = {
            let lock = Arc::clone(&lock);
            std::thread::spawn(move || {
                let guard = LockResource::new(&lock, LockMode::Write, true);
                guard.mode()
            })
        };
        std::thread::sleep(Duration::from_millis(20));
        assert!(!contender.is_finished());
        drop(writer);
        assert_eq!(contender.join().unwrap(), LockMode::Write);
    }

    #[test]
    fn test_has_same_lock() {
        let lock = new_lock();
        let other = new_lock();
        let a = LockResource::new(&lock, LockMode::Read, false);
        let b = LockResource::new(&lock, LockMode::Read, false);
        let c = LockResource::new(&other, LockMode::Read, false);
        assert!(a.has_same_lock(&b));
        assert!(!a.has_same_lock(&c));
    }
}
