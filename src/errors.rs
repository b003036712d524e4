//! Error types for the resource pool

use std::error::Error as StdError;
use std::fmt;
use std::sync::Arc;
use thiserror::Error;

/// Boxed error returned by resource factories
pub type BoxError = Box<dyn StdError + Send + Sync>;

#[derive(Error, Debug, Clone)]
pub enum PoolError {
    #[error("Cannot add unhealthy resources to the pool")]
    UnhealthyResource,

    #[error("Wait for a resource was cancelled")]
    Cancelled,

    #[error("Timed out after {0:?} waiting for a resource")]
    Timeout(std::time::Duration),

    #[error("Resource factory failed: {0}")]
    Factory(#[source] Arc<dyn StdError + Send + Sync>),
}

impl PoolError {
    /// Whether the error came from an aborted wait (cancellation or deadline)
    pub fn is_wait_aborted(&self) -> bool {
        matches!(self, PoolError::Cancelled | PoolError::Timeout(_))
    }

    pub(crate) fn factory(err: BoxError) -> Self {
        PoolError::Factory(Arc::from(err))
    }
}

pub type PoolResult<T> = Result<T, PoolError>;

/// A resource rejected by [`Pool::add_resource`](crate::Pool::add_resource)
/// because it reported itself unhealthy.
///
/// The resource was neither queued nor terminated; ownership goes back to
/// the caller through [`into_inner`](UnhealthyResource::into_inner).
#[derive(Error)]
#[error("Cannot add unhealthy resources to the pool")]
pub struct UnhealthyResource<R>(pub(crate) R);

impl<R> UnhealthyResource<R> {
    /// Take back the rejected resource
    pub fn into_inner(self) -> R {
        self.0
    }
}

impl<R> fmt::Debug for UnhealthyResource<R> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("UnhealthyResource").finish_non_exhaustive()
    }
}

impl<R> From<UnhealthyResource<R>> for PoolError {
    fn from(_: UnhealthyResource<R>) -> Self {
        PoolError::UnhealthyResource
    }
}
