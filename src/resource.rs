//! Capabilities a pooled resource and its factory must provide

use async_trait::async_trait;

use crate::errors::BoxError;

/// Anything that can be managed by a [`Pool`](crate::Pool).
///
/// `is_healthy` must not block: it reports state the resource keeps current
/// on its own (for example from a background liveness task). `terminate`
/// consumes the resource and must release every underlying handle.
pub trait Resource: Send + 'static {
    fn is_healthy(&self) -> bool;

    fn terminate(self);
}

/// Produces new resources for a [`Wizard`](crate::Wizard).
///
/// Implemented for every `Fn() -> Result<R, E>` closure, so a plain closure
/// is enough for synchronous construction.
///
/// # Examples
///
/// ```
/// use resourcery::{BoxError, Resource, ResourceFactory};
///
/// struct Conn;
///
/// impl Resource for Conn {
///     fn is_healthy(&self) -> bool { true }
///     fn terminate(self) {}
/// }
///
/// fn assert_factory<F: ResourceFactory>(_: &F) {}
///
/// let factory = || -> Result<Conn, BoxError> { Ok(Conn) };
/// assert_factory(&factory);
/// ```
#[async_trait]
pub trait ResourceFactory: Send + Sync + 'static {
    type Resource: Resource;

    async fn create(&self) -> Result<Self::Resource, BoxError>;
}

#[async_trait]
impl<F, R, E> ResourceFactory for F
where
    F: Fn() -> Result<R, E> + Send + Sync + 'static,
    R: Resource,
    E: Into<BoxError> + 'static,
{
    type Resource = R;

    async fn create(&self) -> Result<R, BoxError> {
        (self)().map_err(Into::into)
    }
}
