//! Helpers for reading benchmark artifacts from a run's host directories.

use std::path::Path;

use serde_json::Value;

use crate::error::ResultParseError;

pub fn read_text(path: &Path) -> Result<String, ResultParseError> {
    match std::fs::read(path) {
        Ok(bytes) => Ok(String::from_utf8_lossy(&bytes).into_owned()),
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
            Err(ResultParseError::MissingArtifact(path.display().to_string()))
        }
        Err(e) => Err(ResultParseError::Malformed {
            path: path.display().to_string(),
            reason: e.to_string(),
        }),
    }
}

pub fn read_json(path: &Path) -> Result<Value, ResultParseError> {
    let text = read_text(path)?;
    serde_json::from_str(&text).map_err(|e| ResultParseError::Malformed {
        path: path.display().to_string(),
        reason: e.to_string(),
    })
}

/// A JSON number, or `default` when the field is absent.
pub fn number_field(value: &Value, field: &str, default: f64) -> Result<f64, ResultParseError> {
    match value.get(field) {
        None | Some(Value::Null) => Ok(default),
        Some(v) => v.as_f64().ok_or_else(|| ResultParseError::InvalidField {
            field: field.to_string(),
            reason: format!("expected a number, got {v}"),
        }),
    }
}
