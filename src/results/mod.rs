//! Result collection, validation and persistence.
//!
//! Every benchmark produces artifacts in its own format. The collector asks the
//! benchmark to parse them, validates the loose JSON it returns, and normalizes
//! it into a [`RunResult`]. Unusable artifacts degrade to an unresolved result
//! instead of failing the run.

pub mod collector;
pub mod result;
pub mod store;

pub use collector::{read_log_dir, ResultCollector, LOG_RECOVERY_CAP};
pub use result::{RunResult, ERROR_KEY};
pub use store::{AgentRequirements, ResultStore, RunManifest};
