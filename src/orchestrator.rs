//! Caller-facing surface: run batches, read results, list tasks, clean up.

use std::collections::{BTreeMap, BTreeSet};
use std::sync::Arc;
use std::time::Duration;

use tracing::{info, warn};
use uuid::Uuid;

use crate::benchmarks::{Benchmark, TaskListing};
use crate::bridge::Agent;
use crate::config::{Params, Settings};
use crate::error::ContainerError;
use crate::execution::{ContainerManager, ContainerRuntime, DockerClient};
use crate::results::{AgentRequirements, ResultStore, RunResult};
use crate::runner::TaskExecutor;
use crate::scheduler::{derive_run_id, RunJob, SchedulerError, TaskRequest, WorkerPool};

/// Process-wide dependencies, built once and passed explicitly.
#[derive(Clone)]
pub struct OrchestratorContext {
    runtime: Arc<dyn ContainerRuntime>,
    settings: Settings,
}

impl OrchestratorContext {
    pub fn new(runtime: Arc<dyn ContainerRuntime>, settings: Settings) -> Self {
        Self { runtime, settings }
    }

    /// Context backed by the local Docker daemon.
    pub fn with_docker(settings: Settings) -> Result<Self, ContainerError> {
        Ok(Self::new(Arc::new(DockerClient::new()?), settings))
    }

    pub fn runtime(&self) -> &Arc<dyn ContainerRuntime> {
        &self.runtime
    }

    pub fn settings(&self) -> &Settings {
        &self.settings
    }
}

/// One batch submission.
#[derive(Clone, Default)]
pub struct BatchRequest {
    pub tasks: Vec<TaskRequest>,
    pub agents: Vec<Arc<dyn Agent>>,
    pub params: Params,
    pub requirements: AgentRequirements,
    /// Merged into `params`; explicit params win.
    pub api_secrets: Params,
    /// Overrides `Settings::max_workers`.
    pub max_workers: Option<usize>,
    /// Overrides the per-run wall-clock budget.
    pub timeout: Option<Duration>,
}

impl BatchRequest {
    pub fn new<I, T>(tasks: I, agents: Vec<Arc<dyn Agent>>) -> Self
    where
        I: IntoIterator<Item = T>,
        T: Into<TaskRequest>,
    {
        Self {
            tasks: tasks.into_iter().map(Into::into).collect(),
            agents,
            ..Default::default()
        }
    }

    pub fn with_params(mut self, params: Params) -> Self {
        self.params = params;
        self
    }

    pub fn with_api_secrets(mut self, secrets: Params) -> Self {
        self.api_secrets = secrets;
        self
    }

    pub fn with_requirements(mut self, requirements: AgentRequirements) -> Self {
        self.requirements = requirements;
        self
    }

    pub fn with_max_workers(mut self, max_workers: usize) -> Self {
        self.max_workers = Some(max_workers);
        self
    }

    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = Some(timeout);
        self
    }

    fn merged_params(&self) -> Params {
        let mut merged = self.api_secrets.clone();
        merged.extend(self.params.clone());
        merged
    }

    /// One job per (agent, task) pair.
    fn into_jobs(self, batch: &Uuid) -> Vec<RunJob> {
        let params = self.merged_params();
        let mut jobs = Vec::with_capacity(self.tasks.len() * self.agents.len());
        for agent in &self.agents {
            for task in &self.tasks {
                let run_id = task
                    .run_id
                    .clone()
                    .unwrap_or_else(|| derive_run_id(batch, agent.name(), &task.task_id));
                jobs.push(
                    RunJob::new(run_id, &task.task_id, agent.clone(), params.clone())
                        .with_requirements(self.requirements.clone())
                        .with_timeout(self.timeout),
                );
            }
        }
        jobs
    }
}

/// Runs one benchmark's tasks and manages their results.
pub struct Orchestrator {
    ctx: OrchestratorContext,
    benchmark: Arc<dyn Benchmark>,
    store: Arc<ResultStore>,
}

impl Orchestrator {
    pub fn new(ctx: OrchestratorContext, benchmark: Arc<dyn Benchmark>) -> Self {
        let store = Arc::new(ResultStore::new(
            ctx.settings.benchmark_dir(benchmark.name()),
        ));
        Self {
            ctx,
            benchmark,
            store,
        }
    }

    pub fn benchmark(&self) -> &Arc<dyn Benchmark> {
        &self.benchmark
    }

    pub fn store(&self) -> &Arc<ResultStore> {
        &self.store
    }

    /// Runs every (agent, task) pair and returns the run ids.
    ///
    /// Per-run failures are recorded as unresolved results; only scheduler
    /// faults are returned as errors.
    pub async fn run(&self, request: BatchRequest) -> Result<BTreeSet<String>, SchedulerError> {
        if request.agents.is_empty() {
            return Err(SchedulerError::InvalidConfig(
                "at least one agent is required".to_string(),
            ));
        }
        let max_workers = request.max_workers.unwrap_or(self.ctx.settings.max_workers);
        let batch = Uuid::new_v4();
        let jobs = request.into_jobs(&batch);

        info!(
            batch = %batch,
            benchmark = %self.benchmark.name(),
            runs = jobs.len(),
            max_workers = max_workers,
            "Starting batch"
        );

        let executor = Arc::new(TaskExecutor::new(
            self.benchmark.clone(),
            self.ctx.runtime.clone(),
            self.ctx.settings.clone(),
            self.store.clone(),
        ));
        let pool = WorkerPool::new(executor, max_workers)?;
        let (record, stats) = pool.run(jobs).await?;

        // A run whose executor panicked only has its result in the record.
        for (run_id, result) in record.results() {
            if self.store.contains(&run_id) {
                continue;
            }
            if let Err(e) = self.store.save(&run_id, &result) {
                warn!(run_id = %run_id, error = %e, "Failed to persist result");
            }
        }

        info!(
            batch = %batch,
            resolved = stats.runs_resolved,
            total = stats.total_processed(),
            "Batch finished"
        );
        Ok(record.run_ids())
    }

    /// Stored results for the given run ids. Unknown ids are omitted.
    pub fn get_results<S: AsRef<str>>(&self, run_ids: &[S]) -> BTreeMap<String, RunResult> {
        self.store.load_many(run_ids)
    }

    pub async fn get_all_tasks(&self, split: &str) -> TaskListing {
        self.benchmark.get_all_tasks(split).await
    }

    /// Removes persisted runs, leftover scratch directories and any managed
    /// containers still around. Failures are logged.
    pub async fn cleanup(&self) {
        if let Err(e) = self.store.clear() {
            warn!(error = %e, "Failed to remove stored results");
        }

        let scratch = self.store.root().join("scratch");
        match std::fs::remove_dir_all(&scratch) {
            Ok(()) => {}
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {}
            Err(e) => warn!(path = %scratch.display(), error = %e, "Failed to remove scratch"),
        }

        let containers = ContainerManager::new(self.ctx.runtime.clone(), self.ctx.settings.stop_grace);
        if let Err(e) = containers.remove_stale().await {
            warn!(error = %e, "Failed to remove stale containers");
        }

        self.benchmark.cleanup().await;
        info!(benchmark = %self.benchmark.name(), "Cleanup complete");
    }
}
