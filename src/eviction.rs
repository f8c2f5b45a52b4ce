//! Garbage collection policies for idle pooled resources

use std::fmt;
use std::sync::Arc;
use std::time::Duration;

/// Predicate deciding whether an available resource should be garbage collected
pub type GcPredicate = Arc<dyn Fn(&ResourceMeta, u64) -> bool + Send + Sync>;

/// Garbage collection policy for available pool resources
///
/// Only resources sitting in the pool are candidates, and collection never shrinks the pool
/// below its minimum capacity.
///
/// # Examples
///
/// ```
/// use esox_resourcepool::{GcPolicy, ResourceMeta};
/// use std::time::Duration;
///
/// let policy = GcPolicy::IdleTimeout(Duration::from_secs(60));
/// let meta = ResourceMeta::new(0);
/// assert!(!policy.should_gc(&meta, 60_000));
/// assert!(policy.should_gc(&meta, 60_001));
/// ```
#[derive(Clone, Default)]
pub enum GcPolicy {
    /// Never collect
    #[default]
    None,

    /// Collect resources older than a fixed duration
    TimeToLive(Duration),

    /// Collect resources idle for longer than a duration
    IdleTimeout(Duration),

    /// Collect on either TTL or idle timeout
    Combined {
        ttl: Duration,
        idle_timeout: Duration,
    },

    /// Caller-supplied predicate, called with the metadata and the current time in milliseconds
    Custom(GcPredicate),
}

impl GcPolicy {
    pub fn custom<F>(predicate: F) -> Self
    where
        F: Fn(&ResourceMeta, u64) -> bool + Send + Sync + 'static,
    {
        GcPolicy::Custom(Arc::new(predicate))
    }

    pub fn should_gc(&self, meta: &ResourceMeta, now_ms: u64) -> bool {
        match self {
            GcPolicy::None => false,
            GcPolicy::TimeToLive(ttl) => meta.age_ms(now_ms) > millis(*ttl),
            GcPolicy::IdleTimeout(timeout) => meta.idle_ms(now_ms) > millis(*timeout),
            GcPolicy::Combined { ttl, idle_timeout } => {
                meta.age_ms(now_ms) > millis(*ttl) || meta.idle_ms(now_ms) > millis(*idle_timeout)
            }
            GcPolicy::Custom(predicate) => predicate(meta, now_ms),
        }
    }
}

impl fmt::Debug for GcPolicy {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            GcPolicy::None => write!(f, "None"),
            GcPolicy::TimeToLive(ttl) => f.debug_tuple("TimeToLive").field(ttl).finish(),
            GcPolicy::IdleTimeout(idle) => f.debug_tuple("IdleTimeout").field(idle).finish(),
            GcPolicy::Combined { ttl, idle_timeout } => f
                .debug_struct("Combined")
                .field("ttl", ttl)
                .field("idle_timeout", idle_timeout)
                .finish(),
            GcPolicy::Custom(_) => write!(f, "Custom(..)"),
        }
    }
}

/// Lifecycle metadata of a pooled resource
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ResourceMeta {
    pub created_at_ms: u64,
    pub last_access_ms: u64,
}

impl ResourceMeta {
    pub fn new(now_ms: u64) -> Self {
        Self {
            created_at_ms: now_ms,
            last_access_ms: now_ms,
        }
    }

    pub fn touch(&mut self, now_ms: u64) {
        self.last_access_ms = now_ms;
    }

    pub fn age_ms(&self, now_ms: u64) -> u64 {
        now_ms.saturating_sub(self.created_at_ms)
    }

    pub fn idle_ms(&self, now_ms: u64) -> u64 {
        now_ms.saturating_sub(self.last_access_ms)
    }
}

fn millis(duration: Duration) -> u64 {
    u64::try_from(duration.as_millis()).unwrap_or(u64::MAX)
}
