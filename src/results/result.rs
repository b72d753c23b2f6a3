//! The standardized per-task result.

use std::collections::BTreeMap;
use std::fmt;

use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::error::ResultParseError;

/// Key under which failures are reported in [`RunResult::message`].
pub const ERROR_KEY: &str = "error";

/// Outcome of one task run, identical in shape for every benchmark.
///
/// Always fully populated; fields are read-only after construction.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RunResult {
    task_id: String,
    is_resolved: bool,
    score: f64,
    message: BTreeMap<String, String>,
    log: String,
}

impl RunResult {
    /// Builds a result, rejecting non-finite scores.
    pub fn new(
        task_id: impl Into<String>,
        is_resolved: bool,
        score: f64,
        message: BTreeMap<String, String>,
        log: impl Into<String>,
    ) -> Result<Self, ResultParseError> {
        if !score.is_finite() {
            return Err(ResultParseError::InvalidField {
                field: "score".to_string(),
                reason: format!("must be a finite number, got {score}"),
            });
        }
        Ok(Self {
            task_id: task_id.into(),
            is_resolved,
            score,
            message,
            log: log.into(),
        })
    }

    /// An unresolved, zero-score result carrying `error` in its message.
    pub fn unresolved(task_id: impl Into<String>, error: impl fmt::Display, log: impl Into<String>) -> Self {
        let mut message = BTreeMap::new();
        message.insert(ERROR_KEY.to_string(), error.to_string());
        Self {
            task_id: task_id.into(),
            is_resolved: false,
            score: 0.0,
            message,
            log: log.into(),
        }
    }

    /// Validates a loosely-typed benchmark result.
    ///
    /// `is_resolved` must be a bool and `score` a number. `message` must be an
    /// object (absent means empty); non-string values are rendered as JSON. `log`
    /// may be a string or any JSON value. `task_id` is always the run's task id.
    pub fn from_value(task_id: &str, value: &Value) -> Result<Self, ResultParseError> {
        let object = value.as_object().ok_or_else(|| ResultParseError::InvalidField {
            field: "result".to_string(),
            reason: "must be a JSON object".to_string(),
        })?;

        let is_resolved = object
            .get("is_resolved")
            .and_then(Value::as_bool)
            .ok_or_else(|| invalid("is_resolved", "must be a boolean"))?;

        let score = object
            .get("score")
            .and_then(Value::as_f64)
            .ok_or_else(|| invalid("score", "must be a number"))?;

        let message = match object.get("message") {
            None | Some(Value::Null) => BTreeMap::new(),
            Some(Value::Object(map)) => map
                .iter()
                .map(|(k, v)| (k.clone(), render(v)))
                .collect(),
            Some(_) => return Err(invalid("message", "must be an object")),
        };

        let log = match object.get("log") {
            None | Some(Value::Null) => String::new(),
            Some(v) => render(v),
        };

        Self::new(task_id, is_resolved, score, message, log)
    }

    pub fn task_id(&self) -> &str {
        &self.task_id
    }

    pub fn is_resolved(&self) -> bool {
        self.is_resolved
    }

    pub fn score(&self) -> f64 {
        self.score
    }

    pub fn message(&self) -> &BTreeMap<String, String> {
        &self.message
    }

    pub fn log(&self) -> &str {
        &self.log
    }

    /// The failure description, if the run failed.
    pub fn error(&self) -> Option<&str> {
        self.message.get(ERROR_KEY).map(String::as_str)
    }
}

fn invalid(field: &str, reason: &str) -> ResultParseError {
    ResultParseError::InvalidField {
        field: field.to_string(),
        reason: reason.to_string(),
    }
}

fn render(value: &Value) -> String {
    match value {
        Value::String(s) => s.clone(),
        other => other.to_string(),
    }
}
