//! Pool configuration options

use std::time::Duration;

#[cfg(feature = "serde")]
use serde::{Deserialize, Serialize};

/// Configuration for pool behavior
///
/// # Examples
///
/// ```
/// use resourcery::PoolConfiguration;
/// use std::time::Duration;
///
/// let config = PoolConfiguration::new()
///     .with_name("postgres")
///     .with_timeout(Duration::from_secs(5));
///
/// assert_eq!(config.name, "postgres");
/// assert_eq!(config.operation_timeout, Some(Duration::from_secs(5)));
/// ```
#[derive(Debug, Clone)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
pub struct PoolConfiguration {
    /// Name attached to log events and exported metrics
    pub name: String,

    /// Timeout used by `get_resource_default`; `None` waits indefinitely
    pub operation_timeout: Option<Duration>,
}

impl Default for PoolConfiguration {
    fn default() -> Self {
        Self {
            name: "default".to_string(),
            operation_timeout: Some(Duration::from_secs(30)),
        }
    }
}

impl PoolConfiguration {
    /// Create a new configuration with default values
    pub fn new() -> Self {
        Self::default()
    }

    /// Set the pool name
    pub fn with_name(mut self, name: impl Into<String>) -> Self {
        self.name = name.into();
        self
    }

    /// Set operation timeout
    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.operation_timeout = Some(timeout);
        self
    }

    /// Wait indefinitely in `get_resource_default`
    ///
    /// ```
    /// use resourcery::PoolConfiguration;
    ///
    /// let config = PoolConfiguration::new().without_timeout();
    /// assert!(config.operation_timeout.is_none());
    /// ```
    pub fn without_timeout(mut self) -> Self {
        self.operation_timeout = None;
        self
    }
}
