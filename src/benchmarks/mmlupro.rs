//! MMLU-Pro: multiple-choice knowledge questions, one task per category.

use async_trait::async_trait;
use serde_json::{json, Value};

use crate::benchmarks::artifacts::read_json;
use crate::benchmarks::{Benchmark, BenchmarkConfig, TaskListing};
use crate::config::ConfigSchema;
use crate::error::ResultParseError;
use crate::execution::{ArtifactDirs, ResultPaths};

const IMAGE: &str = "kirk2000/benchflow:mmlu-pro-v1";

/// Distinct categories of the MMLU-Pro test split, sorted.
pub const CATEGORIES: [&str; 14] = [
    "biology",
    "business",
    "chemistry",
    "computer science",
    "economics",
    "engineering",
    "health",
    "history",
    "law",
    "math",
    "other",
    "philosophy",
    "physics",
    "psychology",
];

#[derive(Debug, Clone, Copy, Default)]
pub struct MmluProBench;

#[async_trait]
impl Benchmark for MmluProBench {
    fn name(&self) -> &str {
        "mmlupro"
    }

    fn get_config(&self, _task_id: &str) -> BenchmarkConfig {
        BenchmarkConfig::new(ConfigSchema::new())
    }

    fn get_image_name(&self) -> &str {
        IMAGE
    }

    fn get_result_paths(&self) -> ResultPaths {
        ResultPaths::new("/app/eval_results", "/app/logs")
    }

    fn get_result(&self, task_id: &str, artifacts: &ArtifactDirs) -> Result<Value, ResultParseError> {
        let summary = read_json(&artifacts.results_dir.join(format!("{task_id}_summary.json")))?;
        let answers = read_json(&artifacts.results_dir.join(format!("{task_id}_result.json")))?;

        let accuracy = summary
            .pointer("/total/acc")
            .and_then(Value::as_f64)
            .ok_or_else(|| ResultParseError::InvalidField {
                field: "total.acc".to_string(),
                reason: "missing or not a number".to_string(),
            })?;

        let log = match &answers {
            Value::Array(items) => items.iter().map(Value::to_string).collect::<String>(),
            other => other.to_string(),
        };

        // A category run is complete once it is scored; accuracy is the metric.
        Ok(json!({
            "is_resolved": true,
            "score": accuracy,
            "message": {"details": summary},
            "log": log,
        }))
    }

    async fn get_all_tasks(&self, _split: &str) -> TaskListing {
        TaskListing::new(CATEGORIES.iter().map(|c| c.to_string()).collect())
    }

    fn default_timeout(&self) -> std::time::Duration {
        std::time::Duration::from_secs(2 * 60 * 60)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_result_from_summary() {
        let dir = tempfile::tempdir().unwrap();
        let dirs = ArtifactDirs {
            results_dir: dir.path().to_path_buf(),
            log_dir: dir.path().join("logs"),
        };
        std::fs::write(
            dir.path().join("law_summary.json"),
            r#"{"total": {"acc": 0.42, "corr": 42, "wrong": 58}}"#,
        )
        .unwrap();
        std::fs::write(
            dir.path().join("law_result.json"),
            r#"[{"q": 1, "pred": "A"}, {"q": 2, "pred": "B"}]"#,
        )
        .unwrap();

        let value = MmluProBench.get_result("law", &dirs).unwrap();
        assert_eq!(value["is_resolved"], json!(true));
        assert_eq!(value["score"], json!(0.42));
        assert_eq!(
            value["log"],
            json!(r#"{"pred":"A","q":1}{"pred":"B","q":2}"#)
        );
    }

    #[test]
    fn test_summary_without_accuracy() {
        let dir = tempfile::tempdir().unwrap();
        let dirs = ArtifactDirs {
            results_dir: dir.path().to_path_buf(),
            log_dir: dir.path().join("logs"),
        };
        std::fs::write(dir.path().join("math_summary.json"), r#"{"total": {}}"#).unwrap();
        std::fs::write(dir.path().join("math_result.json"), "[]").unwrap();

        assert!(matches!(
            MmluProBench.get_result("math", &dirs).unwrap_err(),
            ResultParseError::InvalidField { .. }
        ));
    }

    #[tokio::test]
    async fn test_tasks_are_categories() {
        let listing = MmluProBench.get_all_tasks("test").await;
        assert_eq!(listing.task_ids.len(), 14);
        assert_eq!(listing.task_ids[3], "computer science");
    }
}
