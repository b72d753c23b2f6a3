//! benchflow: containerized benchmark execution for remote agents.
//!
//! Runs benchmark images in isolated containers, relays each observation and
//! action between the benchmark and an HTTP agent, and normalizes whatever the
//! benchmark writes into one [`RunResult`] per run.

pub mod benchmarks;
pub mod bridge;
pub mod cli;
pub mod config;
pub mod error;
pub mod execution;
pub mod orchestrator;
pub mod results;
pub mod runner;
pub mod scheduler;

// Re-export commonly used types
pub use benchmarks::{Benchmark, BenchmarkConfig, BenchmarkRegistry, TaskListing};
pub use bridge::{Agent, AgentServer, BenchmarkAdapter, HttpAgent};
pub use config::{validate, ConfigSchema, ConfigValue, Params, RunConfig, Settings};
pub use error::{
    AgentError, BridgeError, ConfigError, ContainerError, ResultParseError, RunError,
};
pub use orchestrator::{BatchRequest, Orchestrator, OrchestratorContext};
pub use results::{AgentRequirements, ResultStore, RunResult};
pub use scheduler::{SchedulerError, TaskRequest};
