//! Agents and the HTTP agent client.
//!
//! An agent receives the benchmark's prepared environment info and answers with
//! a raw action string. Remote agents speak a small JSON contract:
//!
//! ```text
//! POST <endpoint>/action   {"input_data": <env_info>}   →   {"action": "<string>"}
//! ```

use std::time::Duration;

use async_trait::async_trait;
use reqwest::Client;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use tracing::{debug, warn};

use crate::error::AgentError;

/// Decision maker driven by the bridge, one call per turn.
#[async_trait]
pub trait Agent: Send + Sync {
    /// Stable name, used when deriving run ids.
    fn name(&self) -> &str;

    /// Produces the raw action for one observation.
    async fn act(&self, env_info: &Value) -> Result<String, AgentError>;
}

/// Request body of the agent contract.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ActionRequest {
    pub input_data: Value,
}

/// Response body of the agent contract.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ActionResponse {
    pub action: Value,
}

/// Agent reached over HTTP.
#[derive(Debug, Clone)]
pub struct HttpAgent {
    name: String,
    endpoint: String,
    http_client: Client,
    max_retries: u32,
    retry_backoff: Duration,
}

impl HttpAgent {
    /// Creates a client for the agent served at `endpoint`.
    ///
    /// The endpoint doubles as the agent name unless [`with_name`](Self::with_name)
    /// is used.
    pub fn new(endpoint: impl Into<String>, timeout: Duration) -> Result<Self, AgentError> {
        let endpoint = endpoint.into().trim_end_matches('/').to_string();
        let http_client = Client::builder()
            .timeout(timeout)
            .build()
            .map_err(|e| AgentError::Failed(format!("Failed to build HTTP client: {e}")))?;

        Ok(Self {
            name: endpoint.clone(),
            endpoint,
            http_client,
            max_retries: 2,
            retry_backoff: Duration::from_millis(500),
        })
    }

    pub fn with_name(mut self, name: impl Into<String>) -> Self {
        self.name = name.into();
        self
    }

    /// Retries applied to connect and timeout failures only.
    pub fn with_max_retries(mut self, retries: u32) -> Self {
        self.max_retries = retries;
        self
    }

    pub fn with_retry_backoff(mut self, backoff: Duration) -> Self {
        self.retry_backoff = backoff;
        self
    }

    pub fn endpoint(&self) -> &str {
        &self.endpoint
    }

    fn action_url(&self) -> String {
        format!("{}/action", self.endpoint)
    }

    async fn send_with_retry(&self, body: &ActionRequest) -> Result<reqwest::Response, AgentError> {
        let url = self.action_url();
        let mut attempt = 0u32;

        loop {
            match self.http_client.post(&url).json(body).send().await {
                Ok(response) => return Ok(response),
                Err(e) if (e.is_connect() || e.is_timeout()) && attempt < self.max_retries => {
                    attempt += 1;
                    warn!(
                        endpoint = %self.endpoint,
                        attempt,
                        error = %e,
                        "Agent request failed, retrying"
                    );
                    tokio::time::sleep(self.retry_backoff * attempt).await;
                }
                Err(e) => {
                    return Err(AgentError::Unreachable {
                        endpoint: self.endpoint.clone(),
                        reason: e.to_string(),
                    });
                }
            }
        }
    }
}

#[async_trait]
impl Agent for HttpAgent {
    fn name(&self) -> &str {
        &self.name
    }

    async fn act(&self, env_info: &Value) -> Result<String, AgentError> {
        let body = ActionRequest {
            input_data: env_info.clone(),
        };
        let response = self.send_with_retry(&body).await?;

        let status = response.status();
        if !status.is_success() {
            let text = response
                .text()
                .await
                .unwrap_or_else(|_| "Failed to read error response".to_string());
            return Err(AgentError::Status {
                status: status.as_u16(),
                body: truncate(&text, 512),
            });
        }

        let payload: ActionResponse = response
            .json()
            .await
            .map_err(|e| AgentError::MalformedResponse(e.to_string()))?;

        let action = action_to_string(payload.action)?;
        debug!(endpoint = %self.endpoint, action_len = action.len(), "Agent responded");
        Ok(action)
    }
}

/// Normalizes the `action` field to a non-empty string.
///
/// Structured actions are accepted and re-serialized as JSON text.
fn action_to_string(action: Value) -> Result<String, AgentError> {
    let text = match action {
        Value::String(s) => s,
        Value::Null => {
            return Err(AgentError::MalformedResponse(
                "'action' field is null".to_string(),
            ))
        }
        other => other.to_string(),
    };

    if text.trim().is_empty() {
        return Err(AgentError::EmptyAction);
    }
    Ok(text)
}

fn truncate(s: &str, max_len: usize) -> String {
    if s.len() <= max_len {
        return s.to_string();
    }
    let mut end = max_len;
    while !s.is_char_boundary(end) {
        end -= 1;
    }
    format!("{}...", &s[..end])
}
