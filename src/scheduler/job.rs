//! Job definitions for the scheduler.
//!
//! - `TaskRequest`: a task id submitted by the caller
//! - `RunJob`: one (agent, task) run waiting for a worker
//! - `derive_run_id`: deterministic run ids within a batch

use std::fmt;
use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::bridge::Agent;
use crate::config::Params;
use crate::results::AgentRequirements;

/// Hex characters of the UUIDv5 kept in a derived run id.
const RUN_ID_SUFFIX_LEN: usize = 8;

/// A task submitted to a batch, optionally with its own run id.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TaskRequest {
    pub task_id: String,
    #[serde(default)]
    pub run_id: Option<String>,
}

impl TaskRequest {
    pub fn new(task_id: impl Into<String>) -> Self {
        Self {
            task_id: task_id.into(),
            run_id: None,
        }
    }

    pub fn with_run_id(mut self, run_id: impl Into<String>) -> Self {
        self.run_id = Some(run_id.into());
        self
    }
}

impl From<&str> for TaskRequest {
    fn from(task_id: &str) -> Self {
        Self::new(task_id)
    }
}

impl From<String> for TaskRequest {
    fn from(task_id: String) -> Self {
        Self::new(task_id)
    }
}

/// One scheduled run. Allocates nothing beyond this struct until a worker
/// takes it.
#[derive(Clone)]
pub struct RunJob {
    pub run_id: String,
    pub task_id: String,
    pub agent: Arc<dyn Agent>,
    /// Caller params with secrets merged in.
    pub params: Params,
    pub requirements: AgentRequirements,
    /// Per-run wall-clock budget; `None` uses the benchmark default.
    pub timeout: Option<Duration>,
    pub enqueued_at: DateTime<Utc>,
}

impl RunJob {
    pub fn new(
        run_id: impl Into<String>,
        task_id: impl Into<String>,
        agent: Arc<dyn Agent>,
        params: Params,
    ) -> Self {
        Self {
            run_id: run_id.into(),
            task_id: task_id.into(),
            agent,
            params,
            requirements: AgentRequirements::default(),
            timeout: None,
            enqueued_at: Utc::now(),
        }
    }

    pub fn with_requirements(mut self, requirements: AgentRequirements) -> Self {
        self.requirements = requirements;
        self
    }

    pub fn with_timeout(mut self, timeout: Option<Duration>) -> Self {
        self.timeout = timeout;
        self
    }
}

impl fmt::Debug for RunJob {
    // Params may hold secrets; only their keys are shown.
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("RunJob")
            .field("run_id", &self.run_id)
            .field("task_id", &self.task_id)
            .field("agent", &self.agent.name())
            .field("params", &self.params.keys().collect::<Vec<_>>())
            .field("timeout", &self.timeout)
            .field("enqueued_at", &self.enqueued_at)
            .finish()
    }
}

/// Keeps `[A-Za-z0-9_.-]`, replacing everything else with `_`.
pub fn sanitize_id(raw: &str) -> String {
    let cleaned: String = raw
        .chars()
        .map(|c| {
            if c.is_ascii_alphanumeric() || matches!(c, '-' | '_' | '.') {
                c
            } else {
                '_'
            }
        })
        .collect();
    if cleaned.is_empty() {
        "task".to_string()
    } else {
        cleaned
    }
}

/// Whether `run_id` can name a run directory: non-empty, only
/// `[A-Za-z0-9_.-]`, and not `.` or `..`.
pub fn is_valid_run_id(run_id: &str) -> bool {
    !matches!(run_id, "." | "..") && sanitize_id(run_id) == run_id
}

/// `<sanitized task id>-<8 hex chars>` where the suffix is a UUIDv5 of the
/// agent and task under the batch namespace.
pub fn derive_run_id(batch: &Uuid, agent: &str, task_id: &str) -> String {
    let name = format!("{agent}\n{task_id}");
    let digest = Uuid::new_v5(batch, name.as_bytes()).simple().to_string();
    format!(
        "{}-{}",
        sanitize_id(task_id),
        &digest[..RUN_ID_SUFFIX_LEN]
    )
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_derive_run_id_is_stable_per_batch() {
        let batch = Uuid::new_v4();
        let a = derive_run_id(&batch, "http://agent:9000", "7");
        let b = derive_run_id(&batch, "http://agent:9000", "7");
        assert_eq!(a, b);
        assert!(a.starts_with("7-"));
        assert_eq!(a.len(), "7-".len() + RUN_ID_SUFFIX_LEN);
    }

    #[test]
    fn test_derive_run_id_differs_by_agent_and_batch() {
        let batch = Uuid::new_v4();
        let a = derive_run_id(&batch, "agent-a", "1");
        let b = derive_run_id(&batch, "agent-b", "1");
        let c = derive_run_id(&Uuid::new_v4(), "agent-a", "1");
        assert_ne!(a, b);
        assert_ne!(a, c);
    }

    #[test]
    fn test_sanitize_id() {
        assert_eq!(sanitize_id("computer science"), "computer_science");
        assert_eq!(sanitize_id("django__django-1234"), "django__django-1234");
        assert_eq!(sanitize_id("a/b:c"), "a_b_c");
        assert_eq!(sanitize_id(""), "task");
    }

    #[test]
    fn test_is_valid_run_id() {
        assert!(is_valid_run_id("7-1a2b3c4d"));
        assert!(is_valid_run_id("v1.2_run"));
        assert!(!is_valid_run_id(".."));
        assert!(!is_valid_run_id("."));
        assert!(!is_valid_run_id("../.."));
        assert!(!is_valid_run_id("a b"));
        assert!(!is_valid_run_id(""));
    }

    #[test]
    fn test_task_request_from() {
        let req: TaskRequest = "3".into();
        assert_eq!(req.run_id, None);
        assert_eq!(req.with_run_id("custom").run_id.as_deref(), Some("custom"));
    }
}
