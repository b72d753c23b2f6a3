//! tau-bench: tool-agent-user interaction tasks in retail and airline domains.

use async_trait::async_trait;
use serde_json::{json, Value};

use crate::benchmarks::artifacts::{number_field, read_json};
use crate::benchmarks::{Benchmark, BenchmarkConfig, TaskListing};
use crate::config::ConfigSchema;
use crate::error::ResultParseError;
use crate::execution::{ArtifactDirs, ResultPaths};

const IMAGE: &str = "taubench-benchflow:latest";

/// Reward at or above this counts as resolved.
const RESOLVED_REWARD: f64 = 1.0;

#[derive(Debug, Clone, Copy, Default)]
pub struct TauBench;

/// Task counts per domain for a split. Unknown domains get 50.
fn task_count(split: &str, domain: &str) -> usize {
    match (split, domain) {
        ("train", "retail") => 100,
        ("train", "airline") => 80,
        (_, "retail") => 50,
        (_, "airline") => 40,
        _ => 50,
    }
}

#[async_trait]
impl Benchmark for TauBench {
    fn name(&self) -> &str {
        "taubench"
    }

    fn get_config(&self, task_id: &str) -> BenchmarkConfig {
        let schema = ConfigSchema::new()
            .require("TEST_START_IDX")
            .require("TEST_END_IDX")
            .with_default("RESULTS_DIR", "/app/results");

        // Non-numeric (or last representable) ids leave the range end unset
        // so validation reports it.
        let Ok(idx) = task_id.parse::<u64>() else {
            return BenchmarkConfig::new(schema);
        };
        let config = BenchmarkConfig::new(schema).with_override("TEST_START_IDX", idx);
        match idx.checked_add(1) {
            Some(end) => config.with_override("TEST_END_IDX", end),
            None => config,
        }
    }

    fn get_image_name(&self) -> &str {
        IMAGE
    }

    fn get_result_paths(&self) -> ResultPaths {
        ResultPaths::new("/app/results", "/app/log_files")
    }

    fn get_result(&self, task_id: &str, artifacts: &ArtifactDirs) -> Result<Value, ResultParseError> {
        let task_result = read_json(&artifacts.results_dir.join(format!("{task_id}.json")))?;
        let reward = number_field(&task_result, "reward", 0.0)?;
        let info = task_result.get("info").cloned().unwrap_or_else(|| json!({}));
        let log = serde_json::to_string_pretty(&task_result)
            .map_err(|e| ResultParseError::Other(e.to_string()))?;

        Ok(json!({
            "is_resolved": reward >= RESOLVED_REWARD,
            "score": reward,
            "message": {"details": info},
            "log": log,
        }))
    }

    async fn get_all_tasks(&self, split: &str) -> TaskListing {
        let domain = std::env::var("ENV").unwrap_or_else(|_| "retail".to_string());
        TaskListing::range(task_count(split, &domain))
    }
}
