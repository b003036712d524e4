//! Metrics collection and export for resource pools

use std::collections::HashMap;
use std::sync::atomic::{AtomicUsize, Ordering};

#[cfg(feature = "serde")]
use serde::{Deserialize, Serialize};

/// Metrics data for a pool
///
/// # Examples
///
/// ```
/// use resourcery::{Pool, Resource};
///
/// struct Conn;
///
/// impl Resource for Conn {
///     fn is_healthy(&self) -> bool { true }
///     fn terminate(self) {}
/// }
///
/// let pool = Pool::new();
/// pool.add_resource(Conn).unwrap();
/// let conn = pool.try_get_resource().unwrap();
///
/// let metrics = pool.get_metrics();
/// assert_eq!(metrics.total_added, 1);
/// assert_eq!(metrics.total_retrieved, 1);
/// assert_eq!(metrics.available_resources, 0);
/// # drop(conn);
/// ```
#[derive(Debug, Clone, Default, PartialEq, Eq)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
pub struct PoolMetrics {
    /// Resources accepted by `add_resource`
    pub total_added: usize,

    /// Unhealthy resources refused by `add_resource`
    pub total_rejected: usize,

    /// Retrieval calls started
    pub total_requested: usize,

    /// Healthy resources handed to borrowers
    pub total_retrieved: usize,

    /// Resources dequeued unhealthy and terminated
    pub unhealthy_terminated: usize,

    /// Resources terminated by `shutdown`
    pub shutdown_terminated: usize,

    /// Waits aborted by a cancellation token
    pub cancelled_waits: usize,

    /// Waits aborted by their deadline
    pub timed_out_waits: usize,

    /// Replacement resources inserted by a wizard
    pub replacements_created: usize,

    /// Replacement attempts that failed
    pub replacement_failures: usize,

    /// Resources currently queued
    pub available_resources: usize,

    /// Borrowers currently parked waiting for a resource
    pub waiting_borrowers: usize,
}

impl PoolMetrics {
    /// Export metrics as a HashMap
    pub fn export(&self) -> HashMap<String, String> {
        let mut metrics = HashMap::new();
        metrics.insert("total_added".to_string(), self.total_added.to_string());
        metrics.insert("total_rejected".to_string(), self.total_rejected.to_string());
        metrics.insert("total_requested".to_string(), self.total_requested.to_string());
        metrics.insert("total_retrieved".to_string(), self.total_retrieved.to_string());
        metrics.insert("unhealthy_terminated".to_string(), self.unhealthy_terminated.to_string());
        metrics.insert("shutdown_terminated".to_string(), self.shutdown_terminated.to_string());
        metrics.insert("cancelled_waits".to_string(), self.cancelled_waits.to_string());
        metrics.insert("timed_out_waits".to_string(), self.timed_out_waits.to_string());
        metrics.insert("replacements_created".to_string(), self.replacements_created.to_string());
        metrics.insert("replacement_failures".to_string(), self.replacement_failures.to_string());
        metrics.insert("available_resources".to_string(), self.available_resources.to_string());
        metrics.insert("waiting_borrowers".to_string(), self.waiting_borrowers.to_string());
        metrics
    }
}

/// Metrics exporter for Prometheus format
#[cfg(feature = "metrics")]
pub struct MetricsExporter;

#[cfg(feature = "metrics")]
impl MetricsExporter {
    /// Export metrics in Prometheus exposition format
    ///
    /// # Examples
    ///
    /// ```
    /// use resourcery::{MetricsExporter, PoolMetrics};
    /// use std::collections::HashMap;
    ///
    /// let metrics = PoolMetrics { available_resources: 4, ..Default::default() };
    ///
    /// let mut tags = HashMap::new();
    /// tags.insert("service".to_string(), "api".to_string());
    ///
    /// let output = MetricsExporter::export_prometheus(&metrics, "db", Some(&tags));
    /// assert!(output.contains("resourcery_resources_available{pool=\"db\",service=\"api\"} 4"));
    /// ```
    pub fn export_prometheus(
        metrics: &PoolMetrics,
        pool_name: &str,
        tags: Option<&HashMap<String, String>>,
    ) -> String {
        let labels = Self::format_labels(pool_name, tags);
        let mut output = String::new();

        let gauges = [
            ("resourcery_resources_available", "Resources currently queued", metrics.available_resources),
            ("resourcery_borrowers_waiting", "Borrowers waiting for a resource", metrics.waiting_borrowers),
        ];
        for (name, help, value) in gauges {
            Self::write_metric(&mut output, name, help, "gauge", &labels, value);
        }

        let counters = [
            ("resourcery_resources_added_total", "Resources added", metrics.total_added),
            ("resourcery_resources_rejected_total", "Unhealthy resources rejected on add", metrics.total_rejected),
            ("resourcery_requests_total", "Resource requests", metrics.total_requested),
            ("resourcery_resources_retrieved_total", "Resources handed to borrowers", metrics.total_retrieved),
            ("resourcery_unhealthy_terminated_total", "Unhealthy resources terminated", metrics.unhealthy_terminated),
            ("resourcery_shutdown_terminated_total", "Resources terminated on shutdown", metrics.shutdown_terminated),
            ("resourcery_waits_cancelled_total", "Waits aborted by cancellation", metrics.cancelled_waits),
            ("resourcery_waits_timed_out_total", "Waits aborted by timeout", metrics.timed_out_waits),
            ("resourcery_replacements_total", "Replacement resources created", metrics.replacements_created),
            ("resourcery_replacement_failures_total", "Failed replacement attempts", metrics.replacement_failures),
        ];
        for (name, help, value) in counters {
            Self::write_metric(&mut output, name, help, "counter", &labels, value);
        }

        output
    }

    fn write_metric(output: &mut String, name: &str, help: &str, kind: &str, labels: &str, value: usize) {
        output.push_str(&format!("# HELP {} {}\n", name, help));
        output.push_str(&format!("# TYPE {} {}\n", name, kind));
        output.push_str(&format!("{}{{{}}} {}\n", name, labels, value));
    }

    fn format_labels(pool_name: &str, tags: Option<&HashMap<String, String>>) -> String {
        let mut labels = vec![format!("pool=\"{}\"", pool_name)];

        if let Some(tags) = tags {
            let mut tags: Vec<_> = tags.iter().collect();
            tags.sort();
            for (key, value) in tags {
                labels.push(format!("{}=\"{}\"", key, value));
            }
        }

        labels.join(",")
    }
}

/// Internal metrics tracker
#[derive(Default)]
pub(crate) struct MetricsTracker {
    pub total_added: AtomicUsize,
    pub total_rejected: AtomicUsize,
    pub total_requested: AtomicUsize,
    pub total_retrieved: AtomicUsize,
    pub unhealthy_terminated: AtomicUsize,
    pub shutdown_terminated: AtomicUsize,
    pub cancelled_waits: AtomicUsize,
    pub timed_out_waits: AtomicUsize,
    pub replacements_created: AtomicUsize,
    pub replacement_failures: AtomicUsize,
}

impl MetricsTracker {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn increment(counter: &AtomicUsize) {
        counter.fetch_add(1, Ordering::Relaxed);
    }

    pub fn get_metrics(&self, available: usize, waiting: usize) -> PoolMetrics {
        PoolMetrics {
            total_added: self.total_added.load(Ordering::Relaxed),
            total_rejected: self.total_rejected.load(Ordering::Relaxed),
            total_requested: self.total_requested.load(Ordering::Relaxed),
            total_retrieved: self.total_retrieved.load(Ordering::Relaxed),
            unhealthy_terminated: self.unhealthy_terminated.load(Ordering::Relaxed),
            shutdown_terminated: self.shutdown_terminated.load(Ordering::Relaxed),
            cancelled_waits: self.cancelled_waits.load(Ordering::Relaxed),
            timed_out_waits: self.timed_out_waits.load(Ordering::Relaxed),
            replacements_created: self.replacements_created.load(Ordering::Relaxed),
            replacement_failures: self.replacement_failures.load(Ordering::Relaxed),
            available_resources: available,
            waiting_borrowers: waiting,
        }
    }
}
