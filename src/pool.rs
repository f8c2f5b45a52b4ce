//! The pool contract shared by the blocking pools and its scoped handle

use std::any::type_name;
use std::error::Error as StdError;
use std::fmt;
use std::ops::{Deref, DerefMut};
use std::sync::{Arc, Weak};
use std::time::Duration;

use tracing::warn;

use crate::errors::PoolResult;
use crate::leak::{LeakDetector, LeakTracker};

/// Creates, checks and disposes of pooled resources
///
/// Only `create` is required; resources are healthy by default and are closed by dropping them.
pub trait ResourceFactory: Send + Sync + 'static {
    type Resource: Send + 'static;
    type Error: StdError + Send + Sync + 'static;

    fn create(&self) -> Result<Self::Resource, Self::Error>;

    /// Checked before a pooled resource is handed out again
    fn is_healthy(&self, _resource: &Self::Resource) -> bool {
        true
    }

    fn close(&self, resource: Self::Resource) -> Result<(), Self::Error> {
        drop(resource);
        Ok(())
    }
}

/// [`ResourceFactory`] backed by a closure
///
/// # Examples
///
/// ```
/// use esox_resourcepool::{FnFactory, ResourceFactory};
/// use std::convert::Infallible;
///
/// let factory = FnFactory::new(|| Ok::<_, Infallible>(String::from("conn")));
/// assert_eq!(factory.create().unwrap(), "conn");
/// ```
pub struct FnFactory<F>(F);

impl<F> FnFactory<F> {
    pub fn new(create: F) -> Self {
        Self(create)
    }
}

impl<F, R, E> ResourceFactory for FnFactory<F>
where
    F: Fn() -> Result<R, E> + Send + Sync + 'static,
    R: Send + 'static,
    E: StdError + Send + Sync + 'static,
{
    type Resource = R;
    type Error = E;

    fn create(&self) -> Result<R, E> {
        (self.0)()
    }
}

impl<F> fmt::Debug for FnFactory<F> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_tuple("FnFactory").field(&type_name::<F>()).finish()
    }
}

/// Blocking pool of resources
///
/// Resources acquired from a pool must be given back with [`release`](Pool::release), or
/// acquired through [`acquire_scoped`](Pool::acquire_scoped) so that dropping the handle does it.
pub trait Pool<T>: Send + Sync {
    /// Acquire a resource, waiting as long as it takes
    fn acquire(&self) -> PoolResult<T>;

    /// Acquire a resource, failing with [`PoolError::Timeout`](crate::PoolError::Timeout) once
    /// `timeout` has elapsed
    fn acquire_timeout(&self, timeout: Duration) -> PoolResult<T>;

    fn release(&self, resource: T) -> PoolResult<()>;

    /// Number of resources the pool currently accounts for
    fn size(&self) -> usize;

    fn close(&self);

    /// Detector tracking the scoped handles of this pool
    fn leak_detector(&self) -> Option<&Arc<LeakDetector>> {
        None
    }

    /// Acquire a resource that is released when the handle is dropped
    fn acquire_scoped(self: &Arc<Self>) -> PoolResult<PooledResource<T, Self>>
    where
        Self: Sized,
    {
        let resource = self.acquire()?;
        Ok(PooledResource::new(resource, self))
    }

    fn acquire_scoped_timeout(self: &Arc<Self>, timeout: Duration) -> PoolResult<PooledResource<T, Self>>
    where
        Self: Sized,
    {
        let resource = self.acquire_timeout(timeout)?;
        Ok(PooledResource::new(resource, self))
    }
}

/// A pooled resource that returns to its pool when dropped
///
/// The handle only keeps a weak reference to the pool. If the pool is gone by the time the
/// handle is dropped, the resource is dropped and the leak is reported.
///
/// # Examples
///
/// ```
/// use esox_resourcepool::{FnFactory, Pool, ResourcePool};
/// use std::convert::Infallible;
/// use std::sync::Arc;
///
/// let pool = Arc::new(ResourcePool::new(1, FnFactory::new(|| Ok::<_, Infallible>(vec![0u8; 16]))).unwrap());
/// {
///     let mut buffer = pool.acquire_scoped().unwrap();
///     buffer[0] = 1;
/// }
/// let buffer = pool.acquire().unwrap();
/// assert_eq!(buffer[0], 1);
/// ```
pub struct PooledResource<T, P: Pool<T>> {
    resource: Option<T>,
    pool: Weak<P>,
    pool_description: String,
    tracker: Option<LeakTracker>,
}

impl<T, P: Pool<T>> PooledResource<T, P> {
    fn new(resource: T, pool: &Arc<P>) -> Self {
        let tracker = pool.leak_detector().and_then(LeakDetector::track);
        Self {
            resource: Some(resource),
            pool: Arc::downgrade(pool),
            pool_description: format!("{}@{:p}", type_name::<P>(), Arc::as_ptr(pool)),
            tracker,
        }
    }

    /// Return the resource now, surfacing the pool's answer
    pub fn release(mut self) -> PoolResult<()> {
        match self.resource.take() {
            Some(resource) => self.return_to_pool(resource),
            None => Ok(()),
        }
    }

    /// Detach the resource from the handle; the caller becomes responsible for releasing it
    pub fn into_inner(mut self) -> T {
        self.tracker.take();
        self.resource.take().expect("Value already taken")
    }

    fn return_to_pool(&mut self, resource: T) -> PoolResult<()> {
        let tracker = self.tracker.take();
        match self.pool.upgrade() {
            Some(pool) => pool.release(resource),
            None => {
                warn!(
                    resource_type = type_name::<T>(),
                    pool = %self.pool_description,
                    "Pool was dropped before the resource was released"
                );
                if let Some(tracker) = tracker {
                    tracker.report_leak(&self.pool_description);
                }
                drop(resource);
                Ok(())
            }
        }
    }
}

impl<T, P: Pool<T>> Deref for PooledResource<T, P> {
    type Target = T;

    fn deref(&self) -> &Self::Target {
        self.resource.as_ref().expect("Value already taken")
    }
}

impl<T, P: Pool<T>> DerefMut for PooledResource<T, P> {
    fn deref_mut(&mut self) -> &mut Self::Target {
        self.resource.as_mut().expect("Value already taken")
    }
}

impl<T, P: Pool<T>> Drop for PooledResource<T, P> {
    fn drop(&mut self) {
        if let Some(resource) = self.resource.take() {
            if let Err(e) = self.return_to_pool(resource) {
                warn!(pool = %self.pool_description, error = %e, "Failed to release pooled resource");
            }
        }
    }
}

impl<T: fmt::Debug, P: Pool<T>> fmt::Debug for PooledResource<T, P> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("PooledResource")
            .field("resource", &self.resource)
            .field("pool", &self.pool_description)
            .finish()
    }
}
