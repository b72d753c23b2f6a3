//! Process-wide orchestrator settings.
//!
//! Settings are built once (defaults, then `BENCHFLOW_*` environment variables,
//! then CLI flags) and shared read-only through the orchestrator context.

use std::path::PathBuf;
use std::time::Duration;

use crate::error::ConfigError;

/// Configuration for the orchestrator.
#[derive(Debug, Clone)]
pub struct Settings {
    /// Root for persisted results and per-run scratch directories.
    pub work_dir: PathBuf,
    /// Maximum number of runs executed concurrently.
    pub max_workers: usize,
    /// Maximum observation/action pairs per run.
    pub max_steps: usize,
    /// Wall-clock budget per run. `None` uses the benchmark default.
    pub run_timeout: Option<Duration>,
    /// Grace period between SIGTERM and SIGKILL when stopping a container.
    pub stop_grace: Duration,
    /// Timeout for one agent HTTP round trip.
    pub agent_timeout: Duration,
    /// Transport-level retries for connect/timeout failures.
    pub agent_max_retries: u32,
    /// Interface the per-run relay binds to.
    pub relay_bind_host: String,
    /// Host name containers use to reach the relay.
    pub relay_advertise_host: String,
}

impl Default for Settings {
    fn default() -> Self {
        Self {
            work_dir: PathBuf::from("./tmp"),
            max_workers: 1,
            max_steps: 30,
            run_timeout: None,
            stop_grace: Duration::from_secs(10),
            agent_timeout: Duration::from_secs(120),
            agent_max_retries: 2,
            relay_bind_host: "0.0.0.0".to_string(),
            relay_advertise_host: "host.docker.internal".to_string(),
        }
    }
}

impl Settings {
    /// Creates settings with default values.
    pub fn new() -> Self {
        Self::default()
    }

    /// Creates settings from environment variables.
    ///
    /// # Environment Variables
    ///
    /// - `BENCHFLOW_WORK_DIR`: results and scratch root (default: ./tmp)
    /// - `BENCHFLOW_MAX_WORKERS`: concurrent runs (default: 1)
    /// - `BENCHFLOW_MAX_STEPS`: steps per run (default: 30)
    /// - `BENCHFLOW_RUN_TIMEOUT_SECS`: per-run budget (default: benchmark specific)
    /// - `BENCHFLOW_STOP_GRACE_SECS`: container stop grace (default: 10)
    /// - `BENCHFLOW_AGENT_TIMEOUT_SECS`: agent request timeout (default: 120)
    /// - `BENCHFLOW_AGENT_MAX_RETRIES`: agent transport retries (default: 2)
    /// - `BENCHFLOW_RELAY_BIND_HOST`: relay bind address (default: 0.0.0.0)
    /// - `BENCHFLOW_RELAY_ADVERTISE_HOST`: relay host seen by containers
    ///   (default: host.docker.internal)
    ///
    /// # Errors
    ///
    /// Returns `ConfigError` if a variable has an invalid value.
    pub fn from_env() -> Result<Self, ConfigError> {
        let mut settings = Self::default();

        if let Ok(val) = std::env::var("BENCHFLOW_WORK_DIR") {
            settings.work_dir = PathBuf::from(val);
        }

        if let Ok(val) = std::env::var("BENCHFLOW_MAX_WORKERS") {
            settings.max_workers = parse_env_value(&val, "BENCHFLOW_MAX_WORKERS")?;
        }

        if let Ok(val) = std::env::var("BENCHFLOW_MAX_STEPS") {
            settings.max_steps = parse_env_value(&val, "BENCHFLOW_MAX_STEPS")?;
        }

        if let Ok(val) = std::env::var("BENCHFLOW_RUN_TIMEOUT_SECS") {
            let secs: u64 = parse_env_value(&val, "BENCHFLOW_RUN_TIMEOUT_SECS")?;
            settings.run_timeout = Some(Duration::from_secs(secs));
        }

        if let Ok(val) = std::env::var("BENCHFLOW_STOP_GRACE_SECS") {
            let secs: u64 = parse_env_value(&val, "BENCHFLOW_STOP_GRACE_SECS")?;
            settings.stop_grace = Duration::from_secs(secs);
        }

        if let Ok(val) = std::env::var("BENCHFLOW_AGENT_TIMEOUT_SECS") {
            let secs: u64 = parse_env_value(&val, "BENCHFLOW_AGENT_TIMEOUT_SECS")?;
            settings.agent_timeout = Duration::from_secs(secs);
        }

        if let Ok(val) = std::env::var("BENCHFLOW_AGENT_MAX_RETRIES") {
            settings.agent_max_retries = parse_env_value(&val, "BENCHFLOW_AGENT_MAX_RETRIES")?;
        }

        if let Ok(val) = std::env::var("BENCHFLOW_RELAY_BIND_HOST") {
            settings.relay_bind_host = val;
        }

        if let Ok(val) = std::env::var("BENCHFLOW_RELAY_ADVERTISE_HOST") {
            settings.relay_advertise_host = val;
        }

        settings.validate()?;
        Ok(settings)
    }

    /// Validates the settings.
    ///
    /// # Errors
    ///
    /// Returns `ConfigError::ValidationFailed` if any value is out of range.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.max_workers == 0 {
            return Err(ConfigError::ValidationFailed(
                "max_workers must be greater than 0".to_string(),
            ));
        }

        if self.max_steps == 0 {
            return Err(ConfigError::ValidationFailed(
                "max_steps must be greater than 0".to_string(),
            ));
        }

        if matches!(self.run_timeout, Some(t) if t.is_zero()) {
            return Err(ConfigError::ValidationFailed(
                "run_timeout must be greater than 0".to_string(),
            ));
        }

        if self.agent_timeout.is_zero() {
            return Err(ConfigError::ValidationFailed(
                "agent_timeout must be greater than 0".to_string(),
            ));
        }

        if self.relay_bind_host.is_empty() || self.relay_advertise_host.is_empty() {
            return Err(ConfigError::ValidationFailed(
                "relay hosts cannot be empty".to_string(),
            ));
        }

        Ok(())
    }

    /// Directory holding everything persisted for one benchmark.
    pub fn benchmark_dir(&self, benchmark: &str) -> PathBuf {
        self.work_dir.join(benchmark)
    }

    pub fn with_work_dir(mut self, dir: impl Into<PathBuf>) -> Self {
        self.work_dir = dir.into();
        self
    }

    pub fn with_max_workers(mut self, max: usize) -> Self {
        self.max_workers = max;
        self
    }

    pub fn with_max_steps(mut self, max: usize) -> Self {
        self.max_steps = max;
        self
    }

    pub fn with_run_timeout(mut self, timeout: Duration) -> Self {
        self.run_timeout = Some(timeout);
        self
    }

    pub fn with_stop_grace(mut self, grace: Duration) -> Self {
        self.stop_grace = grace;
        self
    }

    pub fn with_agent_timeout(mut self, timeout: Duration) -> Self {
        self.agent_timeout = timeout;
        self
    }

    pub fn with_agent_max_retries(mut self, retries: u32) -> Self {
        self.agent_max_retries = retries;
        self
    }

    /// Sets both the relay bind host and the host advertised to containers.
    pub fn with_relay_host(mut self, bind: impl Into<String>, advertise: impl Into<String>) -> Self {
        self.relay_bind_host = bind.into();
        self.relay_advertise_host = advertise.into();
        self
    }
}

/// Parse an environment variable value into a type.
fn parse_env_value<T: std::str::FromStr>(value: &str, key: &str) -> Result<T, ConfigError> {
    value.parse().map_err(|_| ConfigError::InvalidValue {
        key: key.to_string(),
        message: format!("could not parse '{}'", value),
    })
}
