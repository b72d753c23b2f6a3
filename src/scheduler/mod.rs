//! Batch scheduling of benchmark runs.
//!
//! - **RunJob**: one (agent, task) run with its params and run id
//! - **WorkerPool**: bounded pool of workers draining a shared in-memory queue
//! - **BatchRunRecord**: per-batch results, shared by workers under a mutex
//!
//! # Architecture
//!
//! ```text
//!                      ┌──────────────┐
//!                      │ Orchestrator │
//!                      └──────┬───────┘
//!                             │ Vec<RunJob>
//!                      ┌──────▼───────┐
//!                      │ Shared queue │
//!                      └──────┬───────┘
//!                             │
//!         ┌───────────────────┼───────────────────┐
//!         ▼                   ▼                   ▼
//!    ┌─────────┐         ┌─────────┐         ┌─────────┐
//!    │ Worker 1│         │ Worker 2│         │ Worker N│
//!    └────┬────┘         └────┬────┘         └────┬────┘
//!         └───────────────────┼───────────────────┘
//!                      ┌──────▼───────┐
//!                      │BatchRunRecord│
//!                      └──────────────┘
//! ```

pub mod job;
pub mod record;
pub mod worker_pool;

pub use job::{derive_run_id, is_valid_run_id, sanitize_id, RunJob, TaskRequest};
pub use record::BatchRunRecord;
pub use worker_pool::{JobExecutor, PoolStats, SchedulerError, WorkerPool};
