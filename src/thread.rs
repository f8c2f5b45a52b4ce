//! Named background threads

use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::thread::{self, JoinHandle};

use crate::errors::{PoolError, PoolResult};

/// Spawns threads named after a format where `%d` is replaced by a per-factory counter
///
/// # Examples
///
/// ```
/// use esox_resourcepool::ThreadFactory;
///
/// let factory = ThreadFactory::new("pool-gc-%d");
/// let handle = factory
///     .spawn(|| std::thread::current().name().map(str::to_string))
///     .unwrap();
/// assert_eq!(handle.join().unwrap().as_deref(), Some("pool-gc-0"));
/// ```
#[derive(Debug, Clone)]
pub struct ThreadFactory {
    name_format: String,
    counter: Arc<AtomicUsize>,
}

impl ThreadFactory {
    pub fn new(name_format: impl Into<String>) -> Self {
        Self {
            name_format: name_format.into(),
            counter: Arc::new(AtomicUsize::new(0)),
        }
    }

    /// Name the next spawned thread will get
    pub fn next_name(&self) -> String {
        if self.name_format.contains("%d") {
            let n = self.counter.fetch_add(1, Ordering::Relaxed);
            self.name_format.replace("%d", &n.to_string())
        } else {
            self.name_format.clone()
        }
    }

    pub fn spawn<F, T>(&self, f: F) -> PoolResult<JoinHandle<T>>
    where
        F: FnOnce() -> T + Send + 'static,
        T: Send + 'static,
    {
        let name = self.next_name();
        thread::Builder::new()
            .name(name.clone())
            .spawn(f)
            .map_err(|source| PoolError::Spawn {
                name,
                source: Arc::new(source),
            })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_counter_per_factory() {
        let factory = ThreadFactory::new("worker-%d");
        assert_eq!(factory.next_name(), "worker-0");
        assert_eq!(factory.next_name(), "worker-1");
        let copy = factory.clone();
        assert_eq!(copy.next_name(), "worker-2");
        assert_eq!(ThreadFactory::new("worker-%d").next_name(), "worker-0");
    }

    #[test]
    fn test_fixed_name() {
        let factory = ThreadFactory::new("LockPool Evictor");
        assert_eq!(factory.next_name(), "LockPool Evictor");
        let name = factory
            .spawn(|| thread::current().name().map(str::to_string))
            .unwrap()
            .join()
            .unwrap();
        assert_eq!(name.as_deref(), Some("LockPool Evictor"));
    }
}
