//! Configuration for benchflow.
//!
//! - [`schema`]: per-benchmark key/value schemas and the validated [`RunConfig`]
//!   injected into each container.
//! - [`settings`]: process-wide [`Settings`] (work directory, worker count,
//!   timeouts, relay addressing).

pub mod schema;
pub mod settings;

pub use schema::{validate, ConfigSchema, ConfigValue, Params, RunConfig};
pub use settings::Settings;
