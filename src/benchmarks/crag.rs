//! CRAG: retrieval-augmented question answering, evaluated as a single batch.

use std::sync::Arc;

use async_trait::async_trait;
use serde_json::{json, Value};

use crate::benchmarks::artifacts::{number_field, read_json};
use crate::benchmarks::{Benchmark, BenchmarkConfig, TaskListing};
use crate::bridge::{BenchmarkAdapter, PassthroughAdapter};
use crate::config::ConfigSchema;
use crate::error::{BridgeError, ResultParseError};
use crate::execution::{ArtifactDirs, ResultPaths};

const IMAGE: &str = "danielfang001/benchflow:crag-v1";

#[derive(Debug, Clone, Copy, Default)]
pub struct CragBench;

#[async_trait]
impl Benchmark for CragBench {
    fn name(&self) -> &str {
        "crag"
    }

    fn get_config(&self, _task_id: &str) -> BenchmarkConfig {
        let schema = ConfigSchema::new()
            .require("OPENAI_API_KEY")
            .require("EVALUATION_MODEL_NAME")
            .with_default("BATCH_SIZE", 100i64);
        BenchmarkConfig::new(schema)
    }

    fn get_image_name(&self) -> &str {
        IMAGE
    }

    fn get_result_paths(&self) -> ResultPaths {
        ResultPaths::new("/workspace/results", "/workspace/logs")
    }

    fn get_result(&self, task_id: &str, artifacts: &ArtifactDirs) -> Result<Value, ResultParseError> {
        let results = read_json(&artifacts.results_dir.join(format!("{task_id}_results.json")))?;
        let score = number_field(&results, "score", 0.0)?;

        Ok(json!({
            "is_resolved": score != 0.0,
            "score": score,
            "message": {},
            "log": results,
        }))
    }

    async fn get_all_tasks(&self, _split: &str) -> TaskListing {
        TaskListing::new(vec!["0".to_string()])
    }

    fn adapter(&self) -> Arc<dyn BenchmarkAdapter> {
        Arc::new(CragAdapter)
    }

    fn default_timeout(&self) -> std::time::Duration {
        std::time::Duration::from_secs(60 * 60)
    }
}

/// Shapes CRAG questions into `rag_qa` payloads and normalizes answers.
#[derive(Debug, Clone, Copy, Default)]
pub struct CragAdapter;

impl BenchmarkAdapter for CragAdapter {
    fn prepare_environment(&self, state_update: &Value) -> Result<Value, BridgeError> {
        let state = PassthroughAdapter.prepare_environment(state_update)?;
        let question = state
            .get("question")
            .ok_or_else(|| BridgeError::InvalidObservation("missing 'question'".to_string()))?;

        let documents: Vec<Value> = state
            .get("context")
            .and_then(Value::as_array)
            .map(|docs| {
                docs.iter()
                    .map(|doc| {
                        json!({
                            "content": doc.get("content").cloned().unwrap_or_else(|| json!("")),
                            "metadata": doc.get("metadata").cloned().unwrap_or_else(|| json!({})),
                        })
                    })
                    .collect()
            })
            .unwrap_or_default();

        Ok(json!({
            "query": question,
            "documents": documents,
            "task_type": "rag_qa",
            "metadata": state.get("metadata").cloned().unwrap_or_else(|| json!({})),
        }))
    }

    /// Accepts a plain answer or a JSON object carrying `answer`.
    fn parse_action(&self, raw_action: &str) -> Result<Value, BridgeError> {
        if let Ok(Value::Object(obj)) = serde_json::from_str::<Value>(raw_action) {
            if let Some(answer) = obj.get("answer") {
                return Ok(json!({
                    "answer": answer,
                    "sources": obj.get("sources").cloned().unwrap_or_else(|| json!([])),
                    "reasoning": obj.get("reasoning").cloned().unwrap_or_else(|| json!("")),
                    "confidence": obj.get("confidence").cloned().unwrap_or(Value::Null),
                }));
            }
        }

        Ok(json!({
            "answer": raw_action.trim(),
            "sources": [],
            "reasoning": "",
            "confidence": null,
        }))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_prepare_formats_documents() {
        let state = json!({
            "question": "Who wrote Dune?",
            "context": [{"content": "Frank Herbert wrote Dune.", "metadata": {"src": 1}}, {}],
        });
        let payload = CragAdapter.prepare_environment(&state).unwrap();
        assert_eq!(payload["query"], json!("Who wrote Dune?"));
        assert_eq!(payload["task_type"], json!("rag_qa"));
        assert_eq!(payload["documents"][1], json!({"content": "", "metadata": {}}));
        assert_eq!(payload["metadata"], json!({}));
    }

    #[test]
    fn test_prepare_requires_question() {
        let err = CragAdapter
            .prepare_environment(&json!({"context": []}))
            .unwrap_err();
        assert!(matches!(err, BridgeError::InvalidObservation(_)));
    }

    #[test]
    fn test_parse_plain_and_structured() {
        let plain = CragAdapter.parse_action(" Frank Herbert ").unwrap();
        assert_eq!(plain["answer"], json!("Frank Herbert"));
        assert_eq!(plain["sources"], json!([]));

        let structured = CragAdapter
            .parse_action(r#"{"answer": "Herbert", "sources": ["doc0"], "confidence": 0.9}"#)
            .unwrap();
        assert_eq!(structured["sources"], json!(["doc0"]));
        assert_eq!(structured["confidence"], json!(0.9));
        assert_eq!(structured["reasoning"], json!(""));
    }

    #[test]
    fn test_zero_score_is_unresolved() {
        let dir = tempfile::tempdir().unwrap();
        let dirs = ArtifactDirs {
            results_dir: dir.path().to_path_buf(),
            log_dir: dir.path().join("logs"),
        };
        std::fs::write(dir.path().join("0_results.json"), r#"{"score": 0}"#).unwrap();
        let value = CragBench.get_result("0", &dirs).unwrap();
        assert_eq!(value["is_resolved"], json!(false));

        std::fs::write(dir.path().join("0_results.json"), r#"{"score": 0.6}"#).unwrap();
        let value = CragBench.get_result("0", &dirs).unwrap();
        assert_eq!(value["is_resolved"], json!(true));
        assert_eq!(value["log"]["score"], json!(0.6));
    }
}
