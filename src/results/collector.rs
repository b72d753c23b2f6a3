//! Reads a stopped container's artifacts and produces its [`RunResult`].

use std::path::Path;
use std::sync::Arc;

use tracing::{debug, warn};
use walkdir::WalkDir;

use crate::benchmarks::Benchmark;
use crate::error::{ResultParseError, RunError};
use crate::execution::ContainerHandle;
use crate::results::result::RunResult;

/// Cap on log text recovered for a degraded result.
pub const LOG_RECOVERY_CAP: usize = 1024 * 1024;

/// Turns benchmark artifacts into validated results.
pub struct ResultCollector {
    benchmark: Arc<dyn Benchmark>,
}

impl ResultCollector {
    pub fn new(benchmark: Arc<dyn Benchmark>) -> Self {
        Self { benchmark }
    }

    /// Parses and validates the run's artifacts.
    ///
    /// Never fails: missing or malformed artifacts degrade to an unresolved
    /// result whose log holds whatever text could be recovered.
    pub async fn collect(&self, handle: &ContainerHandle, task_id: &str) -> RunResult {
        let artifacts = match handle.stopped_artifacts() {
            Ok(artifacts) => artifacts.clone(),
            Err(e) => {
                let err = ResultParseError::Other(e.to_string());
                return self.degrade(handle, task_id, err).await;
            }
        };

        let benchmark = self.benchmark.clone();
        let owned_task = task_id.to_string();
        let parsed =
            tokio::task::spawn_blocking(move || benchmark.get_result(&owned_task, &artifacts))
                .await;

        let value = match parsed {
            Ok(Ok(value)) => value,
            Ok(Err(e)) => return self.degrade(handle, task_id, e).await,
            Err(join) => {
                let err = ResultParseError::Other(format!("result parser panicked: {join}"));
                return self.degrade(handle, task_id, err).await;
            }
        };

        match RunResult::from_value(task_id, &value) {
            Ok(result) => {
                debug!(
                    run_id = %handle.run_id(),
                    task_id = %task_id,
                    is_resolved = result.is_resolved(),
                    score = result.score(),
                    "Collected result"
                );
                result
            }
            Err(e) => self.degrade(handle, task_id, e).await,
        }
    }

    /// Unresolved result for a run that failed before producing artifacts.
    pub async fn collect_failure(
        &self,
        handle: &ContainerHandle,
        task_id: &str,
        error: &RunError,
    ) -> RunResult {
        let log = recover_log(handle).await;
        RunResult::unresolved(task_id, error, log)
    }

    async fn degrade(
        &self,
        handle: &ContainerHandle,
        task_id: &str,
        error: ResultParseError,
    ) -> RunResult {
        warn!(
            run_id = %handle.run_id(),
            task_id = %task_id,
            error = %error,
            "Result artifacts unusable"
        );
        let log = recover_log(handle).await;
        RunResult::unresolved(task_id, &error, log)
    }
}

/// Log text from the run's log directory, falling back to console output.
async fn recover_log(handle: &ContainerHandle) -> String {
    let log_dir = handle.volumes().artifacts().log_dir.clone();
    let text = tokio::task::spawn_blocking(move || read_log_dir(&log_dir, LOG_RECOVERY_CAP))
        .await
        .unwrap_or_default();

    if text.is_empty() {
        handle.console_log().unwrap_or_default().to_string()
    } else {
        text
    }
}

/// Concatenates every file under `dir` (sorted by path), capped at `cap` bytes.
pub fn read_log_dir(dir: &Path, cap: usize) -> String {
    let mut out = String::new();

    for entry in WalkDir::new(dir)
        .sort_by_file_name()
        .into_iter()
        .filter_map(|e| e.ok())
        .filter(|e| e.file_type().is_file())
    {
        let Ok(bytes) = std::fs::read(entry.path()) else {
            continue;
        };
        let rel = entry.path().strip_prefix(dir).unwrap_or(entry.path());
        out.push_str(&format!("==> {} <==\n", rel.display()));
        out.push_str(&String::from_utf8_lossy(&bytes));
        if !out.ends_with('\n') {
            out.push('\n');
        }
        if out.len() >= cap {
            let mut end = cap;
            while !out.is_char_boundary(end) {
                end -= 1;
            }
            out.truncate(end);
            break;
        }
    }

    out
}
