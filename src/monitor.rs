//! Lifecycle notifications emitted by a pool

use std::future::Future;
use std::sync::Arc;
use std::time::SystemTime;

#[cfg(feature = "serde")]
use serde::{Deserialize, Serialize};

/// Pool lifecycle event kinds
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
pub enum Action {
    /// A resource was added to the pool
    ResourceAdded,

    /// A resource was requested from the pool
    ResourceRequested,

    /// An unhealthy resource was dequeued and terminated
    UnhealthyResourceTerminated,

    /// The pool is shutting down and terminates every queued resource
    Shutdown,
}

/// Event record handed to a monitor
///
/// # Examples
///
/// ```
/// use resourcery::{Action, ActionMsg};
///
/// let msg = ActionMsg::new(Action::ResourceAdded);
/// assert_eq!(msg.action, Action::ResourceAdded);
/// ```
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
pub struct ActionMsg {
    pub action: Action,
    pub time: SystemTime,
}

impl ActionMsg {
    pub fn new(action: Action) -> Self {
        Self {
            action,
            time: SystemTime::now(),
        }
    }
}

/// Observer invoked on pool lifecycle events.
///
/// Calls are fire-and-forget and may run concurrently and out of order, so
/// a monitor must be cheap and must not assume any ordering.
pub type MonitorFn = Arc<dyn Fn(ActionMsg) + Send + Sync>;

/// Run the monitor on its own task; fall back to the caller outside a runtime.
pub(crate) fn dispatch(monitor: &MonitorFn, action: Action) {
    let msg = ActionMsg::new(action);
    match tokio::runtime::Handle::try_current() {
        Ok(handle) => {
            let monitor = Arc::clone(monitor);
            handle.spawn(async move { monitor(msg) });
        }
        Err(_) => monitor(msg),
    }
}

/// Spawn a task nobody joins. Without a runtime the work is dropped.
pub(crate) fn spawn_detached<F>(task: &'static str, future: F)
where
    F: Future<Output = ()> + Send + 'static,
{
    match tokio::runtime::Handle::try_current() {
        Ok(handle) => {
            handle.spawn(future);
        }
        Err(_) => {
            tracing::warn!(task, "Tokio runtime unavailable; detached task skipped");
        }
    }
}
