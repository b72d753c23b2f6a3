//! Benchmark-specific translation between container state and agent I/O.

use serde_json::{json, Value};

use crate::error::BridgeError;

/// Pure translation hooks a benchmark can override.
pub trait BenchmarkAdapter: Send + Sync {
    /// Turns the raw state posted by the container into the agent payload.
    fn prepare_environment(&self, state_update: &Value) -> Result<Value, BridgeError>;

    /// Turns the agent's raw action string into the JSON relayed to the container.
    fn parse_action(&self, raw_action: &str) -> Result<Value, BridgeError>;
}

/// Forwards state unchanged and wraps actions as `{"action": raw}`.
#[derive(Debug, Clone, Copy, Default)]
pub struct PassthroughAdapter;

impl BenchmarkAdapter for PassthroughAdapter {
    fn prepare_environment(&self, state_update: &Value) -> Result<Value, BridgeError> {
        // Older images nest the payload under `env_info`.
        match state_update.get("env_info") {
            Some(inner) if state_update.as_object().is_some_and(|o| o.len() == 1) => {
                Ok(inner.clone())
            }
            _ => Ok(state_update.clone()),
        }
    }

    fn parse_action(&self, raw_action: &str) -> Result<Value, BridgeError> {
        Ok(json!({ "action": raw_action }))
    }
}
