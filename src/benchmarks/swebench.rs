//! SWE-bench Lite: repository-level patch generation, evaluated in nested
//! containers through the host's Docker socket.

use std::time::Duration;

use async_trait::async_trait;
use reqwest::Client;
use serde::Deserialize;
use serde_json::{json, Value};
use tracing::{debug, warn};

use crate::benchmarks::artifacts::{number_field, read_json, read_text};
use crate::benchmarks::{Benchmark, BenchmarkConfig, TaskListing};
use crate::config::ConfigSchema;
use crate::error::ResultParseError;
use crate::execution::{ArtifactDirs, ResultPaths};

const IMAGE: &str = "kirk2000/benchflow:swebench-v1";
const DATASET: &str = "princeton-nlp/SWE-bench_Lite";
const DEFAULT_DATASETS_SERVER: &str = "https://datasets-server.huggingface.co";
const PAGE_SIZE: usize = 100;

#[derive(Debug, Deserialize)]
struct RowsPage {
    rows: Vec<RowEntry>,
    num_rows_total: usize,
}

#[derive(Debug, Deserialize)]
struct RowEntry {
    row: Instance,
}

#[derive(Debug, Deserialize)]
struct Instance {
    instance_id: String,
}

#[derive(Debug, Clone)]
pub struct SwebenchBench {
    http_client: Client,
    datasets_server: String,
}

impl Default for SwebenchBench {
    fn default() -> Self {
        Self::new()
    }
}

impl SwebenchBench {
    pub fn new() -> Self {
        let http_client = Client::builder()
            .timeout(Duration::from_secs(30))
            .build()
            .unwrap_or_default();
        Self {
            http_client,
            datasets_server: DEFAULT_DATASETS_SERVER.to_string(),
        }
    }

    /// Points task listing at another datasets-server compatible endpoint.
    pub fn with_datasets_server(mut self, base_url: impl Into<String>) -> Self {
        self.datasets_server = base_url.into().trim_end_matches('/').to_string();
        self
    }

    async fn fetch_instance_ids(&self, split: &str) -> Result<Vec<String>, String> {
        let mut ids = Vec::new();
        let mut offset = 0;

        loop {
            let url = format!(
                "{}/rows?dataset={}&config=default&split={}&offset={}&length={}",
                self.datasets_server,
                urlencoding::encode(DATASET),
                urlencoding::encode(split),
                offset,
                PAGE_SIZE
            );
            debug!(url = %url, "Fetching SWE-bench instances");

            let response = self
                .http_client
                .get(&url)
                .send()
                .await
                .map_err(|e| format!("request failed: {e}"))?;
            if !response.status().is_success() {
                let status = response.status();
                let body = response.text().await.unwrap_or_default();
                return Err(format!("datasets server returned {status}: {body}"));
            }
            let page: RowsPage = response
                .json()
                .await
                .map_err(|e| format!("unexpected response: {e}"))?;

            let fetched = page.rows.len();
            ids.extend(page.rows.into_iter().map(|r| r.row.instance_id));
            offset += fetched;
            if fetched == 0 || offset >= page.num_rows_total {
                break;
            }
        }

        Ok(ids)
    }
}

#[async_trait]
impl Benchmark for SwebenchBench {
    fn name(&self) -> &str {
        "swebench"
    }

    fn get_config(&self, task_id: &str) -> BenchmarkConfig {
        let schema = ConfigSchema::new()
            .with_default("INSTANCE_IDS", task_id)
            .with_default("MAX_WORKERS", 1i64)
            .with_default("RUN_ID", task_id);
        BenchmarkConfig::new(schema)
    }

    fn get_image_name(&self) -> &str {
        IMAGE
    }

    fn get_result_paths(&self) -> ResultPaths {
        ResultPaths::new("/app/results", "/app/logs")
    }

    fn get_result(&self, task_id: &str, artifacts: &ArtifactDirs) -> Result<Value, ResultParseError> {
        let summary = read_json(&artifacts.results_dir.join(format!("self_model.{task_id}.json")))?;
        let total = number_field(&summary, "total_instances", 1.0)?;
        let resolved = number_field(&summary, "resolved_instances", 0.0)?;
        let pass_rate = if total > 0.0 { resolved / total } else { 0.0 };

        let eval_dir = artifacts
            .log_dir
            .join("run_evaluation")
            .join(task_id)
            .join("self_model")
            .join(task_id);
        // Evaluation artifacts are absent when the patch failed to apply.
        let prediction = read_text(&eval_dir.join("patch.diff")).ok();
        let report = read_json(&eval_dir.join("report.json")).ok();

        Ok(json!({
            "is_resolved": pass_rate > 0.99,
            "score": pass_rate,
            "message": {"details": summary},
            "log": {"prediction": prediction, "report": report},
        }))
    }

    async fn get_all_tasks(&self, split: &str) -> TaskListing {
        match self.fetch_instance_ids(split).await {
            Ok(ids) => TaskListing::new(ids),
            Err(e) => {
                warn!(split = %split, error = %e, "Failed to list SWE-bench instances");
                TaskListing::failed(e)
            }
        }
    }

    fn default_timeout(&self) -> Duration {
        Duration::from_secs(2 * 60 * 60)
    }

    fn mounts_docker_socket(&self) -> bool {
        true
    }
}
