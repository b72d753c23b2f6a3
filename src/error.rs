//! Error types for benchflow operations.
//!
//! Defines one error type per failure class of a benchmark run:
//! - Configuration validation
//! - Container lifecycle
//! - Agent communication
//! - Interaction relay
//! - Result parsing
//!
//! Task-level failures never escape a run. They are folded into an unresolved
//! [`RunResult`](crate::results::RunResult) through [`RunError`], whose display
//! text always starts with the taxonomy name (`MissingRequired`,
//! `ContainerStartError`, `AgentCommunicationError`, ...).

use std::time::Duration;

use thiserror::Error;

/// Errors raised while validating run configuration or loading schemas.
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("MissingRequired: {0}")]
    MissingRequired(String),

    #[error("InvalidSchema: {0}")]
    InvalidSchema(String),

    #[error("Invalid value for {key}: {message}")]
    InvalidValue { key: String, message: String },

    #[error("Configuration validation failed: {0}")]
    ValidationFailed(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("YAML parsing error: {0}")]
    Yaml(#[from] serde_yaml::Error),
}

/// Errors raised by the container runtime.
#[derive(Debug, Error)]
pub enum ContainerError {
    #[error("ContainerStartError: {0}")]
    Start(String),

    #[error("ContainerRuntimeError: {0}")]
    Runtime(String),

    #[error("ContainerRuntimeError: Docker daemon not available: {0}")]
    DaemonUnavailable(String),

    #[error("ContainerRuntimeError: container '{id}' not found")]
    NotFound { id: String },

    #[error("ContainerRuntimeError: container '{id}' is still running")]
    StillRunning { id: String },

    #[error("ContainerRuntimeError: '{path}' is not a mounted volume path")]
    UnmountedPath { path: String },

    #[error("ContainerRuntimeError: IO error: {0}")]
    Io(#[from] std::io::Error),
}

/// Errors talking to a remote agent endpoint.
#[derive(Debug, Error)]
pub enum AgentError {
    #[error("AgentCommunicationError: agent at {endpoint} is unreachable: {reason}")]
    Unreachable { endpoint: String, reason: String },

    #[error("AgentCommunicationError: agent returned HTTP {status}: {body}")]
    Status { status: u16, body: String },

    #[error("AgentCommunicationError: malformed agent response: {0}")]
    MalformedResponse(String),

    #[error("AgentCommunicationError: agent returned an empty action")]
    EmptyAction,

    #[error("AgentCommunicationError: {0}")]
    Failed(String),
}

/// Errors on the container-facing side of the interaction relay.
#[derive(Debug, Error)]
pub enum BridgeError {
    #[error("BridgeError: failed to bind relay on {addr}: {reason}")]
    RelayBind { addr: String, reason: String },

    #[error("AgentCommunicationError: invalid observation from benchmark: {0}")]
    InvalidObservation(String),

    #[error("AgentCommunicationError: could not parse agent action: {0}")]
    ActionParse(String),
}

/// Errors reading or validating result artifacts.
#[derive(Debug, Error)]
pub enum ResultParseError {
    #[error("ResultParseError: missing artifact {0}")]
    MissingArtifact(String),

    #[error("ResultParseError: malformed artifact {path}: {reason}")]
    Malformed { path: String, reason: String },

    #[error("ResultParseError: field '{field}' {reason}")]
    InvalidField { field: String, reason: String },

    #[error("ResultParseError: {0}")]
    Other(String),
}

/// Any failure that ends a single run.
///
/// Never returned to the batch caller; converted into an unresolved result.
#[derive(Debug, Error)]
pub enum RunError {
    #[error(transparent)]
    Config(#[from] ConfigError),

    #[error(transparent)]
    Container(#[from] ContainerError),

    #[error(transparent)]
    Agent(#[from] AgentError),

    #[error(transparent)]
    Bridge(#[from] BridgeError),

    #[error(transparent)]
    Result(#[from] ResultParseError),

    #[error("StepLimitExceeded: benchmark did not finish within {max_steps} steps")]
    StepLimitExceeded { max_steps: usize },

    #[error("Timeout: run exceeded its wall-clock budget of {}s", .0.as_secs())]
    Timeout(Duration),

    #[error("WorkerPanic: {0}")]
    Panicked(String),
}
