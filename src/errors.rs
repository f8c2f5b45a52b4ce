//! Error types for the lock and resource pools

use std::error::Error as StdError;
use std::sync::Arc;
use std::time::Duration;

use thiserror::Error;

#[derive(Error, Debug, Clone)]
pub enum PoolError {
    #[error("Operation timed out after {0:?}")]
    Timeout(Duration),

    #[error("Operation was cancelled")]
    Cancelled,

    #[error("Pool is closed")]
    Closed,

    #[error("Invalid argument: {0}")]
    InvalidArgument(String),

    #[error("Failed to create resource: {0}")]
    Creation(#[source] Arc<dyn StdError + Send + Sync>),

    #[error("Failed to spawn thread {name}: {source}")]
    Spawn {
        name: String,
        #[source]
        source: Arc<std::io::Error>,
    },
}

impl PoolError {
    /// Wrap a factory failure
    pub fn creation<E>(err: E) -> Self
    where
        E: StdError + Send + Sync + 'static,
    {
        PoolError::Creation(Arc::new(err))
    }

    pub(crate) fn invalid(msg: impl Into<String>) -> Self {
        PoolError::InvalidArgument(msg.into())
    }

    /// Whether retrying the same call later may succeed
    pub fn is_retryable(&self) -> bool {
        matches!(self, PoolError::Timeout(_) | PoolError::Cancelled)
    }
}

pub type PoolResult<T> = Result<T, PoolError>;

/// Terminal failure of [`retry`](crate::retry::retry)
#[derive(Error, Debug)]
pub enum RetryError<E> {
    #[error("Failed to {action} after {attempts} attempts: {source}")]
    Exhausted {
        action: String,
        attempts: u32,
        #[source]
        source: E,
    },

    #[error("Retry policy for {action} permitted no attempts")]
    NoAttempts { action: String },
}

impl<E> RetryError<E> {
    /// The last failure observed before the policy gave up
    pub fn into_last_error(self) -> Option<E> {
        match self {
            RetryError::Exhausted { source, .. } => Some(source),
            RetryError::NoAttempts { .. } => None,
        }
    }
}
