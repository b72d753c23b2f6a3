//! WebArena: web navigation tasks scored from the harness's own log files.

use std::path::{Path, PathBuf};

use async_trait::async_trait;
use serde_json::{json, Value};

use crate::benchmarks::artifacts::read_text;
use crate::benchmarks::{Benchmark, BenchmarkConfig, TaskListing};
use crate::config::ConfigSchema;
use crate::error::ResultParseError;
use crate::execution::{ArtifactDirs, ResultPaths};

const IMAGE: &str = "kirk2000/benchflow:webarena-v1";

/// Index file written to the results dir, one log path per line.
const LOG_INDEX: &str = "log_files.txt";

#[derive(Debug, Clone, Copy, Default)]
pub struct WebArenaBench;

#[async_trait]
impl Benchmark for WebArenaBench {
    fn name(&self) -> &str {
        "webarena"
    }

    fn get_config(&self, task_id: &str) -> BenchmarkConfig {
        let end = task_id.parse::<u64>().ok().and_then(|idx| idx.checked_add(1));
        let schema = match end {
            Some(end) => ConfigSchema::new().with_default("TEST_END_IDX", end),
            None => ConfigSchema::new().optional("TEST_END_IDX"),
        };
        BenchmarkConfig::new(schema)
    }

    fn get_image_name(&self) -> &str {
        IMAGE
    }

    fn get_result_paths(&self) -> ResultPaths {
        ResultPaths::new("/app/results", "/app/log_files")
    }

    fn get_result(&self, task_id: &str, artifacts: &ArtifactDirs) -> Result<Value, ResultParseError> {
        let index = read_text(&artifacts.results_dir.join(LOG_INDEX))?;

        let mut log = String::new();
        for line in index.lines().map(str::trim).filter(|l| !l.is_empty()) {
            let path = locate_log(&artifacts.log_dir, task_id, line);
            log.push_str(&read_text(&path)?);
            log.push('\n');
        }

        let (score, passed) = scan_log(&log);
        Ok(json!({
            "is_resolved": passed,
            "score": score,
            "message": {"details": format!("score: {score}, passed: {passed}")},
            "log": log,
        }))
    }

    async fn get_all_tasks(&self, split: &str) -> TaskListing {
        TaskListing::range(if split == "train" { 200 } else { 812 })
    }

    fn default_timeout(&self) -> std::time::Duration {
        std::time::Duration::from_secs(60 * 60)
    }
}

/// Paths in the index are container paths; only the file name is trusted.
fn locate_log(log_dir: &Path, task_id: &str, line: &str) -> PathBuf {
    let name = Path::new(line)
        .file_name()
        .map(PathBuf::from)
        .unwrap_or_else(|| PathBuf::from(line));
    let direct = log_dir.join(&name);
    if direct.exists() {
        direct
    } else {
        log_dir.join(task_id).join(name)
    }
}

/// Last `Average score:` value and whether any `[Result]` line reports a pass.
fn scan_log(log: &str) -> (f64, bool) {
    let mut score = 0.0;
    let mut passed = false;
    for line in log.lines() {
        if line.contains("Average score:") {
            score = line
                .rsplit(':')
                .next()
                .and_then(|s| s.trim().parse::<f64>().ok())
                .unwrap_or(0.0);
        }
        if line.contains("[Result]") && line.contains("(PASS)") {
            passed = true;
        }
    }
    (score, passed)
}
