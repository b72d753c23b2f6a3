//! Resource limits for benchmark containers.
//!
//! Benchmarks differ wildly (a headless browser farm vs. a multiple-choice
//! grader), so every limit is optional and unset limits are left to the runtime.

use serde::{Deserialize, Serialize};

/// Execution resource limits for a container.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ExecutionLimits {
    /// Memory limit in megabytes.
    pub memory_mb: Option<u64>,
    /// CPU cores available (e.g., 0.5, 1.0, 2.0).
    pub cpu_cores: Option<f64>,
    /// Maximum number of processes allowed.
    pub max_processes: Option<u64>,
}

impl ExecutionLimits {
    /// No limits; the runtime defaults apply.
    pub fn unlimited() -> Self {
        Self::default()
    }

    pub fn with_memory_mb(mut self, mb: u64) -> Self {
        self.memory_mb = Some(mb);
        self
    }

    pub fn with_cpu_cores(mut self, cores: f64) -> Self {
        self.cpu_cores = Some(cores);
        self
    }

    pub fn with_max_processes(mut self, max: u64) -> Self {
        self.max_processes = Some(max);
        self
    }

    /// Returns memory limit in bytes.
    pub fn memory_bytes(&self) -> Option<i64> {
        self.memory_mb.map(|mb| (mb * 1024 * 1024) as i64)
    }

    /// Returns CPU period in microseconds (fixed at 100ms).
    pub fn cpu_period(&self) -> i64 {
        100_000
    }

    /// Returns CPU quota based on cores allocated.
    ///
    /// Formula: quota = period * cores
    /// e.g., 1.0 core = 100000 quota (100% of one CPU)
    pub fn cpu_quota(&self) -> Option<i64> {
        self.cpu_cores
            .map(|cores| (self.cpu_period() as f64 * cores) as i64)
    }

    pub fn pids_limit(&self) -> Option<i64> {
        self.max_processes.map(|p| p as i64)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_unlimited_has_no_values() {
        let limits = ExecutionLimits::unlimited();
        assert_eq!(limits.memory_bytes(), None);
        assert_eq!(limits.cpu_quota(), None);
        assert_eq!(limits.pids_limit(), None);
    }

    #[test]
    fn test_memory_bytes_calculation() {
        let limits = ExecutionLimits::unlimited().with_memory_mb(1024);
        assert_eq!(limits.memory_bytes(), Some(1024 * 1024 * 1024));
    }

    #[test]
    fn test_cpu_quota_calculation() {
        let limits = ExecutionLimits::unlimited().with_cpu_cores(1.5);
        assert_eq!(limits.cpu_period(), 100_000);
        assert_eq!(limits.cpu_quota(), Some(150_000));
    }
}
