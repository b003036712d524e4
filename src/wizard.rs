//! Pool population and best-effort replacement of discarded resources

use crate::config::PoolConfiguration;
use crate::errors::{PoolError, PoolResult};
use crate::health::HealthStatus;
use crate::metrics::MetricsTracker;
use crate::monitor::{self, Action, ActionMsg};
use crate::pool::{Pool, WeakPool};
use crate::resource::{Resource, ResourceFactory};

use std::sync::Arc;
use tracing::{debug, error, info, warn};

/// Manages a pool on top of a [`ResourceFactory`].
///
/// The wizard creates the initial resources and, whenever the pool discards
/// an unhealthy one, asks the factory for a single replacement on a detached
/// task. A replacement that fails is only logged, so a failing factory
/// shrinks the pool for good.
///
/// # Examples
///
/// ```
/// use resourcery::{BoxError, Resource, Wizard};
/// use std::time::Duration;
///
/// struct Conn;
///
/// impl Resource for Conn {
///     fn is_healthy(&self) -> bool { true }
///     fn terminate(self) {}
/// }
///
/// # #[tokio::main]
/// # async fn main() -> Result<(), resourcery::PoolError> {
/// let wizard = Wizard::new(|| -> Result<Conn, BoxError> { Ok(Conn) }, 4).await?;
/// assert_eq!(wizard.pool().size(), 4);
///
/// let conn = wizard.pool().get_resource_timeout(Duration::from_secs(1)).await?;
/// wizard.pool().add_resource(conn)?;
/// # Ok(())
/// # }
/// ```
pub struct Wizard<F: ResourceFactory> {
    pool: Pool<F::Resource>,
    factory: Arc<F>,
    resource_count: usize,
}

impl<F: ResourceFactory> Wizard<F> {
    /// Populate a new pool with `resource_count` resources from `factory`.
    ///
    /// Fails on the first factory error or unhealthy resource. No wizard is
    /// returned then, and the resources inserted before the failure are
    /// terminated along with the unreachable pool.
    pub async fn new(factory: F, resource_count: usize) -> PoolResult<Self> {
        Self::with_configuration(factory, resource_count, PoolConfiguration::default()).await
    }

    pub async fn with_configuration(
        factory: F,
        resource_count: usize,
        config: PoolConfiguration,
    ) -> PoolResult<Self> {
        let factory = Arc::new(factory);
        let pool = Pool::with_configuration(config);
        pool.set_monitor(replacement_monitor(pool.downgrade(), Arc::clone(&factory)));

        if let Err(err) = populate(&pool, factory.as_ref(), resource_count).await {
            warn!(
                pool = %pool.configuration().name,
                error = %err,
                "population failed; shutting down partial pool"
            );
            pool.shutdown();
            return Err(err);
        }

        info!(pool = %pool.configuration().name, resource_count, "pool populated");
        Ok(Self {
            pool,
            factory,
            resource_count,
        })
    }

    /// The managed pool, for borrowing and returning resources.
    ///
    /// The replacement monitor cannot be swapped out through it:
    ///
    /// ```compile_fail
    /// use resourcery::{ActionMsg, Pool, Resource};
    ///
    /// struct Conn;
    ///
    /// impl Resource for Conn {
    ///     fn is_healthy(&self) -> bool { true }
    ///     fn terminate(self) {}
    /// }
    ///
    /// let pool: Pool<Conn> = Pool::new();
    /// pool.set_monitor(|_: ActionMsg| {});
    /// ```
    pub fn pool(&self) -> &Pool<F::Resource> {
        &self.pool
    }

    pub fn factory(&self) -> &F {
        &self.factory
    }

    /// Number of resources the pool was populated with
    pub fn resource_count(&self) -> usize {
        self.resource_count
    }

    /// Health of the managed pool measured against the populated size
    pub fn health_status(&self) -> HealthStatus {
        HealthStatus::new(
            self.pool.size(),
            self.pool.waiting_count(),
            Some(self.resource_count),
        )
    }
}

async fn populate<F: ResourceFactory>(
    pool: &Pool<F::Resource>,
    factory: &F,
    resource_count: usize,
) -> PoolResult<()> {
    for _ in 0..resource_count {
        let resource = factory.create().await.map_err(PoolError::factory)?;
        if let Err(rejected) = pool.add_resource(resource) {
            rejected.into_inner().terminate();
            return Err(PoolError::UnhealthyResource);
        }
    }
    Ok(())
}

fn replacement_monitor<F: ResourceFactory>(
    pool: WeakPool<F::Resource>,
    factory: Arc<F>,
) -> impl Fn(ActionMsg) + Send + Sync + 'static {
    move |msg| {
        if msg.action != Action::UnhealthyResourceTerminated {
            return;
        }
        let pool = pool.clone();
        let factory = Arc::clone(&factory);
        monitor::spawn_detached("replace-resource", replace(pool, factory));
    }
}

/// One replacement attempt; failures are logged, never retried.
async fn replace<F: ResourceFactory>(pool: WeakPool<F::Resource>, factory: Arc<F>) {
    let Some(pool) = pool.upgrade() else {
        debug!("pool dropped before replacement");
        return;
    };
    let name = &pool.configuration().name;

    let resource = match factory.create().await {
        Ok(resource) => resource,
        Err(err) => {
            MetricsTracker::increment(&pool.metrics().replacement_failures);
            error!(pool = %name, error = %err, "error creating replacement resource");
            return;
        }
    };

    match pool.add_resource(resource) {
        Ok(()) => {
            MetricsTracker::increment(&pool.metrics().replacements_created);
            debug!(pool = %name, "replacement resource added");
        }
        Err(rejected) => {
            MetricsTracker::increment(&pool.metrics().replacement_failures);
            error!(pool = %name, error = %rejected, "error adding replacement resource to pool");
            rejected.into_inner().terminate();
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::errors::BoxError;
    use parking_lot::Mutex;
    use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
    use std::time::Duration;

    #[derive(Debug)]
    struct TestResource {
        index: usize,
        healthy: Arc<AtomicBool>,
    }

    impl Resource for TestResource {
        fn is_healthy(&self) -> bool {
            self.healthy.load(Ordering::SeqCst)
        }

        fn terminate(self) {}
    }

    /// Factory that hands out healthy resources for the first `healthy_calls`
    /// invocations and unhealthy ones afterwards.
    struct CountingFactory {
        calls: AtomicUsize,
        healthy_calls: usize,
        handles: Mutex<Vec<Arc<AtomicBool>>>,
    }

    impl CountingFactory {
        fn new(healthy_calls: usize) -> Self {
            Self {
                calls: AtomicUsize::new(0),
                healthy_calls,
                handles: Mutex::new(Vec::new()),
            }
        }

        fn health_of(&self, index: usize) -> Arc<AtomicBool> {
            Arc::clone(&self.handles.lock()[index - 1])
        }
    }

    #[async_trait::async_trait]
    impl ResourceFactory for CountingFactory {
        type Resource = TestResource;

        async fn create(&self) -> Result<TestResource, BoxError> {
            let index = self.calls.fetch_add(1, Ordering::SeqCst) + 1;
            let healthy = Arc::new(AtomicBool::new(index <= self.healthy_calls));
            self.handles.lock().push(Arc::clone(&healthy));
            Ok(TestResource { index, healthy })
        }
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 2)]
    async fn test_wizard_replaces_unhealthy_resource() {
        let wizard = Wizard::new(CountingFactory::new(usize::MAX), 10).await.unwrap();
        assert_eq!(wizard.pool().size(), 10);

        wizard.factory().health_of(3).store(false, Ordering::SeqCst);

        let mut saw_replacement = false;
        for _ in 0..50 {
            let resource = wizard
                .pool()
                .get_resource_timeout(Duration::from_secs(1))
                .await
                .unwrap();
            assert!(resource.is_healthy());
            assert_ne!(resource.index, 3);
            saw_replacement |= resource.index == 11;
            wizard.pool().add_resource(resource).unwrap();
            if saw_replacement {
                break;
            }
            tokio::task::yield_now().await;
        }

        assert!(saw_replacement, "resource 11 never replaced resource 3");
        assert_eq!(wizard.pool().size(), 10);

        // The counter is bumped right after the replacement is queued
        for _ in 0..100 {
            if wizard.pool().get_metrics().replacements_created == 1 {
                break;
            }
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
        assert_eq!(wizard.pool().get_metrics().replacements_created, 1);
    }

    #[tokio::test]
    async fn test_wizard_unhealthy_factory() {
        let result = Wizard::new(CountingFactory::new(0), 1).await;
        assert!(matches!(result, Err(PoolError::UnhealthyResource)));
    }

    #[tokio::test]
    async fn test_wizard_error_factory() {
        let factory = || -> Result<TestResource, BoxError> { Err("bad resource from bad factory".into()) };
        match Wizard::new(factory, 1).await {
            Err(PoolError::Factory(err)) => assert_eq!(err.to_string(), "bad resource from bad factory"),
            Err(other) => panic!("unexpected error {other}"),
            Ok(_) => panic!("construction should fail"),
        }
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 2)]
    async fn test_wizard_unhealthy_replacement_factory() {
        let wizard = Wizard::new(CountingFactory::new(1), 1).await.unwrap();
        wizard.factory().health_of(1).store(false, Ordering::SeqCst);

        let err = wizard
            .pool()
            .get_resource_timeout(Duration::from_millis(50))
            .await
            .unwrap_err();
        assert!(matches!(err, PoolError::Timeout(_)));
        assert_eq!(wizard.pool().size(), 0);
    }

    #[tokio::test]
    async fn test_health_of_populated_pool() {
        let wizard = Wizard::new(CountingFactory::new(usize::MAX), 2).await.unwrap();
        assert!(wizard.health_status().is_healthy());
        assert_eq!(wizard.resource_count(), 2);
    }
}
