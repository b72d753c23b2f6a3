//! Run pipeline for a single benchmark task.
//!
//! ```text
//! RunJob → RunConfig → container start → AgentBridge loop → stop → ResultCollector → ResultStore
//! ```
//!
//! The relay is bound first so its URL can be injected as `AGENT_URL`. The
//! container is destroyed on every path once it has started.

pub mod executor;

pub use executor::{run_budget, run_params, TaskExecutor, AGENT_URL_KEY, TEST_START_IDX_KEY};
