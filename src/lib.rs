//! # resourcery
//!
//! Health-gated resource pool with blocking async retrieval and a
//! self-healing "wizard" that keeps it populated.
//!
//! ## Features
//!
//! - Lock-free handoff queue; borrowers park until a resource arrives
//! - Health check on insert and on retrieval; bad resources are terminated
//! - Cancellation tokens and timeouts for every blocking retrieval
//! - Fire-and-forget lifecycle monitor
//! - Wizard: initial population from a factory plus best-effort replacement
//! - Metrics, Prometheus export and health snapshots
//!
//! ## Quick Start
//!
//! ```rust
//! use resourcery::{Pool, Resource};
//! use std::time::Duration;
//!
//! struct Conn;
//!
//! impl Resource for Conn {
//!     fn is_healthy(&self) -> bool { true }
//!     fn terminate(self) {}
//! }
//!
//! # #[tokio::main]
//! # async fn main() {
//! let pool = Pool::new();
//! pool.add_resource(Conn).unwrap();
//! {
//!     let conn = pool.get_resource_timeout(Duration::from_secs(1)).await.unwrap();
//!     // use the connection, then hand it back
//!     pool.add_resource(conn).unwrap();
//! }
//! pool.shutdown();
//! # }
//! ```

mod config;
mod errors;
mod health;
mod metrics;
mod monitor;
mod pool;
mod resource;
mod wizard;

pub use config::PoolConfiguration;
pub use errors::{BoxError, PoolError, PoolResult, UnhealthyResource};
pub use health::HealthStatus;
#[cfg(feature = "metrics")]
pub use metrics::MetricsExporter;
pub use metrics::PoolMetrics;
pub use monitor::{Action, ActionMsg, MonitorFn};
pub use pool::Pool;
pub use resource::{Resource, ResourceFactory};
pub use wizard::Wizard;

// Re-exported so callers can build wait tokens without a direct dependency
pub use tokio_util::sync::CancellationToken;
