//! Health-gated resource pool with blocking retrieval

use crate::config::PoolConfiguration;
use crate::errors::{PoolError, PoolResult, UnhealthyResource};
use crate::health::HealthStatus;
use crate::metrics::{MetricsTracker, PoolMetrics};
use crate::monitor::{self, Action, ActionMsg, MonitorFn};
use crate::resource::Resource;

#[cfg(feature = "metrics")]
use crate::metrics::MetricsExporter;

use crossbeam::queue::SegQueue;
use parking_lot::{Mutex, RwLock};
use std::collections::HashMap;
use std::future;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Weak};
use std::time::Duration;
use tokio::sync::Notify;
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, trace, warn};

/// State shared by every handle to one pool
struct Shared<R> {
    queue: SegQueue<R>,
    available: Notify,
    enqueued: Mutex<usize>,
    waiting: AtomicUsize,
    monitor: RwLock<Option<MonitorFn>>,
    metrics: MetricsTracker,
    config: PoolConfiguration,
}

/// Pool of reusable resources.
///
/// Borrowers take a resource with one of the `get_resource*` methods and give
/// it back with [`add_resource`](Pool::add_resource). Every resource is
/// health-checked on the way in and again on the way out; one that has gone
/// bad while queued is terminated instead of being handed out.
///
/// `Pool` is a cheap handle: clones share the same queue.
///
/// # Examples
///
/// ```
/// use resourcery::{Pool, Resource};
/// use std::time::Duration;
///
/// struct Conn(u32);
///
/// impl Resource for Conn {
///     fn is_healthy(&self) -> bool { true }
///     fn terminate(self) {}
/// }
///
/// # #[tokio::main]
/// # async fn main() {
/// let pool = Pool::new();
/// pool.add_resource(Conn(1)).unwrap();
///
/// let conn = pool.get_resource_timeout(Duration::from_secs(1)).await.unwrap();
/// assert_eq!(conn.0, 1);
/// assert_eq!(pool.size(), 0);
///
/// pool.add_resource(conn).unwrap();
/// assert_eq!(pool.size(), 1);
/// # }
/// ```
pub struct Pool<R> {
    shared: Arc<Shared<R>>,
}

impl<R> Clone for Pool<R> {
    fn clone(&self) -> Self {
        Self {
            shared: Arc::clone(&self.shared),
        }
    }
}

/// Non-owning handle to a pool
pub(crate) struct WeakPool<R> {
    shared: Weak<Shared<R>>,
}

impl<R> Clone for WeakPool<R> {
    fn clone(&self) -> Self {
        Self {
            shared: Weak::clone(&self.shared),
        }
    }
}

impl<R> WeakPool<R> {
    pub(crate) fn upgrade(&self) -> Option<Pool<R>> {
        self.shared.upgrade().map(|shared| Pool { shared })
    }
}

/// How long a single retrieval may wait
struct Wait<'a> {
    cancel: Option<&'a CancellationToken>,
    deadline: Option<(Instant, Duration)>,
}

impl<'a> Wait<'a> {
    fn new(cancel: Option<&'a CancellationToken>, timeout: Option<Duration>) -> Self {
        Self {
            cancel,
            deadline: timeout.map(|timeout| (Instant::now() + timeout, timeout)),
        }
    }

    fn aborted(&self) -> Option<PoolError> {
        if self.cancel.is_some_and(CancellationToken::is_cancelled) {
            return Some(PoolError::Cancelled);
        }
        match self.deadline {
            Some((deadline, timeout)) if Instant::now() >= deadline => Some(PoolError::Timeout(timeout)),
            _ => None,
        }
    }

    async fn cancelled(&self) {
        match self.cancel {
            Some(token) => token.cancelled().await,
            None => future::pending().await,
        }
    }

    async fn expired(&self) -> Duration {
        match self.deadline {
            Some((deadline, timeout)) => {
                tokio::time::sleep_until(deadline).await;
                timeout
            }
            None => future::pending().await,
        }
    }
}

/// Counts a borrower as waiting for as long as its retrieval future lives
struct WaitingGuard<'a>(&'a AtomicUsize);

impl<'a> WaitingGuard<'a> {
    fn enter(counter: &'a AtomicUsize) -> Self {
        counter.fetch_add(1, Ordering::Relaxed);
        Self(counter)
    }
}

impl Drop for WaitingGuard<'_> {
    fn drop(&mut self) {
        self.0.fetch_sub(1, Ordering::Relaxed);
    }
}

impl<R: Resource> Default for Pool<R> {
    fn default() -> Self {
        Self::new()
    }
}

impl<R: Resource> Pool<R> {
    /// Create an unmonitored pool
    pub fn new() -> Self {
        Self::with_configuration(PoolConfiguration::default())
    }

    /// Create a pool that reports lifecycle events to `monitor`
    pub fn with_monitor<M>(monitor: M) -> Self
    where
        M: Fn(ActionMsg) + Send + Sync + 'static,
    {
        let pool = Self::new();
        pool.set_monitor(monitor);
        pool
    }

    pub fn with_configuration(config: PoolConfiguration) -> Self {
        Self {
            shared: Arc::new(Shared {
                queue: SegQueue::new(),
                available: Notify::new(),
                enqueued: Mutex::new(0),
                waiting: AtomicUsize::new(0),
                monitor: RwLock::new(None),
                metrics: MetricsTracker::new(),
                config,
            }),
        }
    }

    /// Install or replace the lifecycle monitor
    pub(crate) fn set_monitor<M>(&self, monitor: M)
    where
        M: Fn(ActionMsg) + Send + Sync + 'static,
    {
        *self.shared.monitor.write() = Some(Arc::new(monitor));
    }

    pub fn configuration(&self) -> &PoolConfiguration {
        &self.shared.config
    }

    /// Put a resource under pool control.
    ///
    /// Unhealthy resources are refused and handed back inside the error,
    /// untouched. Returns without waiting for a borrower.
    pub fn add_resource(&self, resource: R) -> Result<(), UnhealthyResource<R>> {
        if !resource.is_healthy() {
            MetricsTracker::increment(&self.shared.metrics.total_rejected);
            debug!(pool = %self.shared.config.name, "rejected unhealthy resource");
            return Err(UnhealthyResource(resource));
        }

        *self.shared.enqueued.lock() += 1;
        self.notify(Action::ResourceAdded);

        self.shared.queue.push(resource);
        self.shared.available.notify_one();

        MetricsTracker::increment(&self.shared.metrics.total_added);
        trace!(pool = %self.shared.config.name, "resource added");
        Ok(())
    }

    /// Wait for the next healthy resource until one arrives or `cancel` fires
    pub async fn get_resource(&self, cancel: &CancellationToken) -> PoolResult<R> {
        self.retrieve(Wait::new(Some(cancel), None)).await
    }

    /// Wait for the next healthy resource for at most `timeout`
    pub async fn get_resource_timeout(&self, timeout: Duration) -> PoolResult<R> {
        self.retrieve(Wait::new(None, Some(timeout))).await
    }

    /// Wait for the next healthy resource, bounded by the configured operation timeout
    pub async fn get_resource_default(&self) -> PoolResult<R> {
        self.retrieve(Wait::new(None, self.shared.config.operation_timeout))
            .await
    }

    /// Wait until a resource arrives, `cancel` fires, or `timeout` elapses
    pub async fn get_resource_with(&self, cancel: &CancellationToken, timeout: Duration) -> PoolResult<R> {
        self.retrieve(Wait::new(Some(cancel), Some(timeout))).await
    }

    /// Take the next healthy resource if one is queued right now.
    ///
    /// Unhealthy resources dequeued on the way are terminated.
    pub fn try_get_resource(&self) -> Option<R> {
        self.notify(Action::ResourceRequested);
        MetricsTracker::increment(&self.shared.metrics.total_requested);
        self.pop_healthy()
    }

    async fn retrieve(&self, wait: Wait<'_>) -> PoolResult<R> {
        self.notify(Action::ResourceRequested);
        MetricsTracker::increment(&self.shared.metrics.total_requested);

        let _waiting = WaitingGuard::enter(&self.shared.waiting);
        loop {
            if let Some(err) = wait.aborted() {
                return Err(self.abort(err));
            }

            // Register before looking at the queue so a concurrent push
            // cannot slip between the check and the wait.
            let notified = self.shared.available.notified();
            tokio::pin!(notified);
            notified.as_mut().enable();

            if let Some(resource) = self.pop_healthy() {
                return Ok(resource);
            }

            tokio::select! {
                biased;
                _ = wait.cancelled() => return Err(self.abort(PoolError::Cancelled)),
                timeout = wait.expired() => return Err(self.abort(PoolError::Timeout(timeout))),
                _ = &mut notified => {}
            }
        }
    }

    /// Dequeue until a healthy resource turns up or the queue is empty
    fn pop_healthy(&self) -> Option<R> {
        while let Some(resource) = self.shared.queue.pop() {
            self.decrement();

            if resource.is_healthy() {
                MetricsTracker::increment(&self.shared.metrics.total_retrieved);
                trace!(pool = %self.shared.config.name, "resource retrieved");
                return Some(resource);
            }

            self.notify(Action::UnhealthyResourceTerminated);
            resource.terminate();
            MetricsTracker::increment(&self.shared.metrics.unhealthy_terminated);
            warn!(pool = %self.shared.config.name, "terminated unhealthy resource");
        }
        None
    }

    /// Give up a wait, handing any wake-up this waiter consumed to the next one
    fn abort(&self, err: PoolError) -> PoolError {
        // A notification may have woken us just before the abort; without
        // passing it on, a queued resource could sit next to a parked borrower.
        if !self.shared.queue.is_empty() {
            self.shared.available.notify_one();
        }

        let counter = match err {
            PoolError::Timeout(_) => &self.shared.metrics.timed_out_waits,
            _ => &self.shared.metrics.cancelled_waits,
        };
        MetricsTracker::increment(counter);
        debug!(pool = %self.shared.config.name, error = %err, "gave up waiting for a resource");
        err
    }

    /// Terminate every resource currently queued.
    ///
    /// Terminations run on the calling thread, so they have all completed
    /// when this returns. Resources held by borrowers, or pushed by an
    /// `add_resource` racing with this call, are left alone.
    pub fn shutdown(&self) {
        self.notify(Action::Shutdown);

        let mut terminated = 0;
        while let Some(resource) = self.shared.queue.pop() {
            self.decrement();
            resource.terminate();
            terminated += 1;
        }

        self.shared
            .metrics
            .shutdown_terminated
            .fetch_add(terminated, Ordering::Relaxed);
        info!(pool = %self.shared.config.name, terminated, "pool shut down");
    }

    /// Resources currently queued.
    ///
    /// A point-in-time snapshot; concurrent adds and gets may already have
    /// changed it by the time the caller looks.
    pub fn size(&self) -> usize {
        *self.shared.enqueued.lock()
    }

    /// Borrowers currently waiting inside a `get_resource*` call
    pub fn waiting_count(&self) -> usize {
        self.shared.waiting.load(Ordering::Relaxed)
    }

    /// Get health status
    pub fn get_health_status(&self) -> HealthStatus {
        HealthStatus::new(self.size(), self.waiting_count(), None)
    }

    /// Get pool metrics
    pub fn get_metrics(&self) -> PoolMetrics {
        self.shared
            .metrics
            .get_metrics(self.size(), self.waiting_count())
    }

    /// Export metrics
    pub fn export_metrics(&self) -> HashMap<String, String> {
        self.get_metrics().export()
    }

    /// Export metrics in Prometheus format
    #[cfg(feature = "metrics")]
    pub fn export_metrics_prometheus(&self, tags: Option<&HashMap<String, String>>) -> String {
        MetricsExporter::export_prometheus(&self.get_metrics(), &self.shared.config.name, tags)
    }

    pub(crate) fn downgrade(&self) -> WeakPool<R> {
        WeakPool {
            shared: Arc::downgrade(&self.shared),
        }
    }

    pub(crate) fn metrics(&self) -> &MetricsTracker {
        &self.shared.metrics
    }

    fn decrement(&self) {
        let mut enqueued = self.shared.enqueued.lock();
        *enqueued = enqueued.saturating_sub(1);
    }

    fn notify(&self, action: Action) {
        let monitor = self.shared.monitor.read().clone();
        if let Some(monitor) = monitor {
            monitor::dispatch(&monitor, action);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::AtomicBool;
    use tokio::sync::mpsc;

    #[derive(Debug)]
    struct TestResource {
        index: usize,
        healthy: Arc<AtomicBool>,
        terminated: Arc<AtomicUsize>,
    }

    impl TestResource {
        fn new(index: usize) -> Self {
            Self {
                index,
                healthy: Arc::new(AtomicBool::new(true)),
                terminated: Arc::new(AtomicUsize::new(0)),
            }
        }

        fn unhealthy(index: usize) -> Self {
            let resource = Self::new(index);
            resource.healthy.store(false, Ordering::SeqCst);
            resource
        }
    }

    impl Resource for TestResource {
        fn is_healthy(&self) -> bool {
            self.healthy.load(Ordering::SeqCst)
        }

        fn terminate(self) {
            self.terminated.fetch_add(1, Ordering::SeqCst);
        }
    }

    #[test]
    fn test_add_unhealthy_is_rejected() {
        let pool = Pool::new();

        let rejected = pool.add_resource(TestResource::unhealthy(7)).unwrap_err();
        let resource = rejected.into_inner();

        assert_eq!(resource.index, 7);
        assert_eq!(resource.terminated.load(Ordering::SeqCst), 0);
        assert_eq!(pool.size(), 0);
        assert_eq!(pool.get_metrics().total_rejected, 1);
    }

    #[test]
    fn test_rejection_converts_to_pool_error() {
        let pool = Pool::new();
        let err: PoolError = pool.add_resource(TestResource::unhealthy(0)).unwrap_err().into();
        assert!(matches!(err, PoolError::UnhealthyResource));
    }

    #[tokio::test]
    async fn test_resource_gone_bad_in_queue() {
        let pool = Pool::new();
        let bad = TestResource::new(77);
        let bad2 = TestResource::new(88);
        let (bad_health, bad_terminated) = (Arc::clone(&bad.healthy), Arc::clone(&bad.terminated));
        let (bad2_health, bad2_terminated) = (Arc::clone(&bad2.healthy), Arc::clone(&bad2.terminated));

        pool.add_resource(bad).unwrap();
        pool.add_resource(bad2).unwrap();
        bad_health.store(false, Ordering::SeqCst);
        bad2_health.store(false, Ordering::SeqCst);
        pool.add_resource(TestResource::new(99)).unwrap();

        let resource = pool.get_resource_timeout(Duration::from_secs(1)).await.unwrap();
        assert_eq!(resource.index, 99);
        assert_eq!(pool.size(), 0);
        assert_eq!(bad_terminated.load(Ordering::SeqCst), 1);
        assert_eq!(bad2_terminated.load(Ordering::SeqCst), 1);
        assert_eq!(pool.get_metrics().unhealthy_terminated, 2);
    }

    #[tokio::test]
    async fn test_timeout_on_empty_pool() {
        let pool: Pool<TestResource> = Pool::new();

        let err = pool.get_resource_timeout(Duration::from_millis(5)).await.unwrap_err();
        assert!(matches!(err, PoolError::Timeout(d) if d == Duration::from_millis(5)));
        assert_eq!(pool.get_metrics().timed_out_waits, 1);
        assert_eq!(pool.waiting_count(), 0);
    }

    #[tokio::test]
    async fn test_expired_wait_never_touches_queue() {
        let pool = Pool::new();
        pool.add_resource(TestResource::new(1)).unwrap();

        let err = pool.get_resource_timeout(Duration::ZERO).await.unwrap_err();
        assert!(matches!(err, PoolError::Timeout(_)));

        let cancel = CancellationToken::new();
        cancel.cancel();
        let err = pool.get_resource(&cancel).await.unwrap_err();
        assert!(matches!(err, PoolError::Cancelled));
        assert!(err.is_wait_aborted());

        assert_eq!(pool.size(), 1);
        assert!(pool.try_get_resource().is_some());
    }

    #[tokio::test]
    async fn test_cancel_while_waiting_leaves_pool_untouched() {
        let pool: Pool<TestResource> = Pool::new();
        let cancel = CancellationToken::new();

        let waiter = {
            let pool = pool.clone();
            let cancel = cancel.clone();
            tokio::spawn(async move { pool.get_resource(&cancel).await.map(|r| r.index) })
        };

        while pool.waiting_count() == 0 {
            tokio::task::yield_now().await;
        }
        cancel.cancel();

        let result = waiter.await.unwrap();
        assert!(matches!(result, Err(PoolError::Cancelled)));
        assert_eq!(pool.waiting_count(), 0);

        pool.add_resource(TestResource::new(3)).unwrap();
        assert_eq!(pool.size(), 1);
        assert_eq!(pool.get_metrics().cancelled_waits, 1);
    }

    #[tokio::test]
    async fn test_waiter_woken_by_add() {
        let pool: Pool<TestResource> = Pool::new();

        let waiter = {
            let pool = pool.clone();
            tokio::spawn(async move { pool.get_resource_timeout(Duration::from_secs(5)).await.map(|r| r.index) })
        };

        while pool.waiting_count() == 0 {
            tokio::task::yield_now().await;
        }
        assert!(!pool.get_health_status().is_healthy());

        pool.add_resource(TestResource::new(42)).unwrap();
        assert_eq!(waiter.await.unwrap().unwrap(), 42);
        assert_eq!(pool.size(), 0);
    }

    #[tokio::test]
    async fn test_try_get_on_empty_pool() {
        let pool: Pool<TestResource> = Pool::new();
        assert!(pool.try_get_resource().is_none());
        assert_eq!(pool.get_metrics().total_requested, 1);
    }

    #[test]
    fn test_shutdown_terminates_queued() {
        let pool = Pool::new();
        let terminated = Arc::new(AtomicUsize::new(0));
        for index in 0..3 {
            let mut resource = TestResource::new(index);
            resource.terminated = Arc::clone(&terminated);
            pool.add_resource(resource).unwrap();
        }

        pool.shutdown();

        assert_eq!(terminated.load(Ordering::SeqCst), 3);
        assert_eq!(pool.size(), 0);
        assert_eq!(pool.get_metrics().shutdown_terminated, 3);
    }

    #[tokio::test]
    async fn test_monitor_receives_events() {
        let (tx, mut rx) = mpsc::unbounded_channel();
        let pool = Pool::with_monitor(move |msg: ActionMsg| {
            let _ = tx.send(msg.action);
        });

        let resource = TestResource::new(1);
        let health = Arc::clone(&resource.healthy);
        pool.add_resource(resource).unwrap();
        health.store(false, Ordering::SeqCst);
        let _ = pool.get_resource_timeout(Duration::from_millis(10)).await;
        pool.shutdown();

        let mut seen = Vec::new();
        while seen.len() < 4 {
            let action = tokio::time::timeout(Duration::from_secs(1), rx.recv())
                .await
                .unwrap()
                .unwrap();
            seen.push(action);
        }

        for expected in [
            Action::ResourceAdded,
            Action::ResourceRequested,
            Action::UnhealthyResourceTerminated,
            Action::Shutdown,
        ] {
            assert!(seen.contains(&expected), "missing {:?}", expected);
        }
    }

    #[cfg(feature = "metrics")]
    #[test]
    fn test_prometheus_uses_pool_name() {
        let pool: Pool<TestResource> =
            Pool::with_configuration(PoolConfiguration::new().with_name("redis"));
        let output = pool.export_metrics_prometheus(None);
        assert!(output.contains("resourcery_resources_available{pool=\"redis\"} 0"));
    }
}
