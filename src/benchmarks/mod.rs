//! Registered benchmark integrations.
//!
//! A [`Benchmark`] describes one containerized evaluation: the image to run, the
//! configuration it needs, where it writes artifacts, and how to turn those
//! artifacts into a loose result object. The orchestrator never interprets
//! benchmark output itself.

pub mod artifacts;
pub mod crag;
pub mod mmlupro;
pub mod swebench;
pub mod taubench;
pub mod webarena;
pub mod webcanvas;

use std::collections::BTreeMap;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::bridge::{BenchmarkAdapter, PassthroughAdapter};
use crate::config::{ConfigSchema, Params};
use crate::error::ResultParseError;
use crate::execution::{ArtifactDirs, ExecutionLimits, ResultPaths};

pub use crag::{CragAdapter, CragBench};
pub use mmlupro::MmluProBench;
pub use swebench::SwebenchBench;
pub use taubench::TauBench;
pub use webarena::WebArenaBench;
pub use webcanvas::WebCanvasBench;

/// Schema plus task-specific overrides for one task.
#[derive(Debug, Clone, Default)]
pub struct BenchmarkConfig {
    pub schema: ConfigSchema,
    /// Values forced for this task; they win over caller params.
    pub overrides: Params,
}

impl BenchmarkConfig {
    pub fn new(schema: ConfigSchema) -> Self {
        Self {
            schema,
            overrides: Params::new(),
        }
    }

    pub fn with_override(mut self, key: impl Into<String>, value: impl Into<crate::config::ConfigValue>) -> Self {
        self.overrides.insert(key.into(), value.into());
        self
    }
}

/// Task ids available for a split.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct TaskListing {
    pub task_ids: Vec<String>,
    pub error_message: Option<String>,
}

impl TaskListing {
    pub fn new(task_ids: Vec<String>) -> Self {
        Self {
            task_ids,
            error_message: None,
        }
    }

    /// `0..count` as string ids.
    pub fn range(count: usize) -> Self {
        Self::new((0..count).map(|i| i.to_string()).collect())
    }

    pub fn failed(message: impl Into<String>) -> Self {
        Self {
            task_ids: Vec::new(),
            error_message: Some(message.into()),
        }
    }
}

/// One benchmark integration.
#[async_trait]
pub trait Benchmark: Send + Sync {
    /// Registry name, also the directory name under the work dir.
    fn name(&self) -> &str;

    /// Configuration schema and overrides for a task.
    fn get_config(&self, task_id: &str) -> BenchmarkConfig;

    fn get_image_name(&self) -> &str;

    /// Absolute container paths for result and log artifacts.
    fn get_result_paths(&self) -> ResultPaths;

    /// Parses the artifacts of a finished run into a loose result object
    /// (`is_resolved`, `score`, `message`, `log`).
    fn get_result(&self, task_id: &str, artifacts: &ArtifactDirs) -> Result<Value, ResultParseError>;

    async fn get_all_tasks(&self, split: &str) -> TaskListing;

    /// Releases benchmark-level resources. Run directories are handled by the
    /// orchestrator.
    async fn cleanup(&self) {}

    fn adapter(&self) -> Arc<dyn BenchmarkAdapter> {
        Arc::new(PassthroughAdapter)
    }

    fn default_timeout(&self) -> Duration {
        Duration::from_secs(30 * 60)
    }

    fn mounts_docker_socket(&self) -> bool {
        false
    }

    fn limits(&self) -> ExecutionLimits {
        ExecutionLimits::unlimited()
    }
}

/// Benchmarks by name.
#[derive(Clone, Default)]
pub struct BenchmarkRegistry {
    benchmarks: BTreeMap<String, Arc<dyn Benchmark>>,
}

impl BenchmarkRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Registry with every built-in integration.
    pub fn with_builtin() -> Self {
        let mut registry = Self::new();
        registry.register(Arc::new(TauBench));
        registry.register(Arc::new(WebArenaBench));
        registry.register(Arc::new(WebCanvasBench));
        registry.register(Arc::new(MmluProBench));
        registry.register(Arc::new(SwebenchBench::new()));
        registry.register(Arc::new(CragBench));
        registry
    }

    /// Adds or replaces a benchmark under its own name.
    pub fn register(&mut self, benchmark: Arc<dyn Benchmark>) {
        self.benchmarks
            .insert(benchmark.name().to_string(), benchmark);
    }

    pub fn get(&self, name: &str) -> Option<Arc<dyn Benchmark>> {
        self.benchmarks.get(&name.to_lowercase()).cloned()
    }

    pub fn names(&self) -> impl Iterator<Item = &str> {
        self.benchmarks.keys().map(String::as_str)
    }
}
