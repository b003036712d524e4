//! Health reporting for resource pools

/// Health status of a pool
///
/// # Examples
///
/// ```
/// use resourcery::HealthStatus;
///
/// let health = HealthStatus::new(0, 3, None);
/// assert!(!health.is_healthy());
/// assert_eq!(health.warning_count, 2);
/// ```
#[derive(Debug, Clone)]
pub struct HealthStatus {
    /// Whether the pool is healthy
    pub is_healthy: bool,

    /// Number of warnings detected
    pub warning_count: usize,

    /// Resources currently queued
    pub available_resources: usize,

    /// Borrowers currently waiting for a resource
    pub waiting_borrowers: usize,

    /// Size the pool was populated to, when managed by a wizard
    pub desired_resources: Option<usize>,

    /// Warning messages
    pub warnings: Vec<String>,
}

impl HealthStatus {
    /// Create a new health status
    pub fn new(available: usize, waiting: usize, desired: Option<usize>) -> Self {
        let mut warnings = Vec::new();
        let mut is_healthy = true;

        if available == 0 {
            warnings.push("Pool is empty".to_string());

            // Nothing queued and someone is blocked on it
            if waiting > 0 {
                warnings.push(format!("{} borrower(s) waiting on an empty pool", waiting));
                is_healthy = false;
            }
        }

        if let Some(desired) = desired
            && available < desired
        {
            warnings.push(format!(
                "Pool below desired size: {} of {} available",
                available, desired
            ));
        }

        Self {
            is_healthy,
            warning_count: warnings.len(),
            available_resources: available,
            waiting_borrowers: waiting,
            desired_resources: desired,
            warnings,
        }
    }

    /// Check if the pool is healthy
    pub fn is_healthy(&self) -> bool {
        self.is_healthy
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_idle_full_pool_is_healthy() {
        let health = HealthStatus::new(5, 0, Some(5));
        assert!(health.is_healthy());
        assert!(health.warnings.is_empty());
    }

    #[test]
    fn test_empty_pool_without_waiters_only_warns() {
        let health = HealthStatus::new(0, 0, None);
        assert!(health.is_healthy());
        assert_eq!(health.warnings, vec!["Pool is empty".to_string()]);
    }

    #[test]
    fn test_wizard_pool_below_desired_size_warns() {
        let health = HealthStatus::new(2, 0, Some(4));
        assert!(health.is_healthy());
        assert_eq!(health.warnings, vec!["Pool below desired size: 2 of 4 available".to_string()]);
    }

    #[test]
    fn test_starved_wizard_pool() {
        let health = HealthStatus::new(0, 2, Some(4));
        assert!(!health.is_healthy());
        assert_eq!(health.warning_count, 3);
        assert!(health.warnings[2].contains("0 of 4"));
    }
}
