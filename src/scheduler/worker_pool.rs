//! Bounded worker pool for benchmark runs.
//!
//! Jobs sit in a shared in-memory queue. `min(max_workers, jobs)` workers pull
//! from it; each worker drives one run end-to-end before taking the next.
//!
//! # Features
//!
//! - Panic isolation: every run executes in its own spawned task
//! - No automatic retry
//! - Pool statistics logged at batch end

use std::collections::{HashSet, VecDeque};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

use async_trait::async_trait;
use thiserror::Error;
use tokio::sync::Mutex;
use tokio::task::{JoinError, JoinHandle};
use tracing::{debug, error, info, warn};

use crate::error::RunError;
use crate::results::RunResult;

use super::job::{is_valid_run_id, RunJob};
use super::record::BatchRunRecord;

/// Infrastructure failures of the scheduler itself. Per-run failures are
/// results, not errors.
#[derive(Debug, Error)]
pub enum SchedulerError {
    #[error("SchedulerError: invalid configuration: {0}")]
    InvalidConfig(String),

    #[error("SchedulerError: duplicate run id '{0}' in batch")]
    DuplicateRunId(String),

    #[error("SchedulerError: worker {worker_id} failed: {reason}")]
    WorkerFailed { worker_id: String, reason: String },
}

/// Executes one run end-to-end. Never fails: problems are folded into the
/// returned result.
#[async_trait]
pub trait JobExecutor: Send + Sync + 'static {
    async fn execute(&self, job: RunJob) -> RunResult;
}

/// Statistics about one batch.
#[derive(Debug, Clone, Default)]
pub struct PoolStats {
    pub num_workers: usize,
    pub runs_resolved: u64,
    pub runs_unresolved: u64,
    /// Runs whose result carries an error.
    pub runs_failed: u64,
    /// Highest number of runs in flight at once.
    pub max_active: usize,
    pub average_run_duration: Duration,
}

impl PoolStats {
    pub fn total_processed(&self) -> u64 {
        self.runs_resolved + self.runs_unresolved + self.runs_failed
    }

    /// Resolved runs as a percentage of all runs.
    pub fn resolve_rate(&self) -> f64 {
        let total = self.total_processed();
        if total == 0 {
            return 0.0;
        }
        (self.runs_resolved as f64 / total as f64) * 100.0
    }
}

struct SharedPoolStats {
    runs_resolved: AtomicU64,
    runs_unresolved: AtomicU64,
    runs_failed: AtomicU64,
    total_duration_ms: AtomicU64,
    active: AtomicU64,
    max_active: AtomicU64,
}

impl SharedPoolStats {
    fn new() -> Self {
        Self {
            runs_resolved: AtomicU64::new(0),
            runs_unresolved: AtomicU64::new(0),
            runs_failed: AtomicU64::new(0),
            total_duration_ms: AtomicU64::new(0),
            active: AtomicU64::new(0),
            max_active: AtomicU64::new(0),
        }
    }

    fn increment_active(&self) {
        let now = self.active.fetch_add(1, Ordering::SeqCst) + 1;
        self.max_active.fetch_max(now, Ordering::SeqCst);
    }

    fn decrement_active(&self) {
        self.active.fetch_sub(1, Ordering::SeqCst);
    }

    fn record(&self, result: &RunResult, duration: Duration) {
        let counter = if result.error().is_some() {
            &self.runs_failed
        } else if result.is_resolved() {
            &self.runs_resolved
        } else {
            &self.runs_unresolved
        };
        counter.fetch_add(1, Ordering::SeqCst);
        self.total_duration_ms
            .fetch_add(duration.as_millis() as u64, Ordering::SeqCst);
    }

    fn to_pool_stats(&self, num_workers: usize) -> PoolStats {
        let resolved = self.runs_resolved.load(Ordering::SeqCst);
        let unresolved = self.runs_unresolved.load(Ordering::SeqCst);
        let failed = self.runs_failed.load(Ordering::SeqCst);
        let total_duration_ms = self.total_duration_ms.load(Ordering::SeqCst);

        let total = resolved + unresolved + failed;
        let average = if total > 0 {
            Duration::from_millis(total_duration_ms / total)
        } else {
            Duration::ZERO
        };

        PoolStats {
            num_workers,
            runs_resolved: resolved,
            runs_unresolved: unresolved,
            runs_failed: failed,
            max_active: self.max_active.load(Ordering::SeqCst) as usize,
            average_run_duration: average,
        }
    }
}

type SharedQueue = Arc<Mutex<VecDeque<RunJob>>>;

/// Runs a batch of jobs with bounded parallelism.
pub struct WorkerPool {
    executor: Arc<dyn JobExecutor>,
    max_workers: usize,
}

impl WorkerPool {
    /// Fails with `InvalidConfig` when `max_workers` is zero.
    pub fn new(executor: Arc<dyn JobExecutor>, max_workers: usize) -> Result<Self, SchedulerError> {
        if max_workers == 0 {
            return Err(SchedulerError::InvalidConfig(
                "max_workers must be at least 1".to_string(),
            ));
        }
        Ok(Self {
            executor,
            max_workers,
        })
    }

    pub fn max_workers(&self) -> usize {
        self.max_workers
    }

    /// Runs every job and returns once all of them have a result.
    ///
    /// Duplicate or unusable run ids are rejected before any work starts.
    pub async fn run(&self, jobs: Vec<RunJob>) -> Result<(BatchRunRecord, PoolStats), SchedulerError> {
        let mut seen = HashSet::with_capacity(jobs.len());
        for job in &jobs {
            if !is_valid_run_id(&job.run_id) {
                return Err(SchedulerError::InvalidConfig(format!(
                    "run id '{}' may only contain [A-Za-z0-9_.-] and cannot be '.' or '..'",
                    job.run_id
                )));
            }
            if !seen.insert(job.run_id.as_str()) {
                return Err(SchedulerError::DuplicateRunId(job.run_id.clone()));
            }
        }

        let record = Arc::new(BatchRunRecord::new(jobs.iter().map(|j| j.run_id.clone())));
        let stats = Arc::new(SharedPoolStats::new());
        let num_workers = self.max_workers.min(jobs.len());
        let queue: SharedQueue = Arc::new(Mutex::new(jobs.into_iter().collect()));

        info!(num_workers = num_workers, "Worker pool started");

        let handles: Vec<(String, JoinHandle<()>)> = (0..num_workers)
            .map(|i| {
                let worker = Worker::new(
                    format!("worker-{i}"),
                    Arc::clone(&queue),
                    Arc::clone(&self.executor),
                    Arc::clone(&record),
                    Arc::clone(&stats),
                );
                let id = worker.id.clone();
                (id, tokio::spawn(worker.run()))
            })
            .collect();

        let mut failure = None;
        for (worker_id, handle) in handles {
            if let Err(e) = handle.await {
                error!(worker_id = %worker_id, error = %e, "Worker task panicked");
                failure.get_or_insert(SchedulerError::WorkerFailed {
                    worker_id,
                    reason: e.to_string(),
                });
            }
        }
        if let Some(err) = failure {
            return Err(err);
        }

        let stats = stats.to_pool_stats(num_workers);
        info!(
            resolved = stats.runs_resolved,
            unresolved = stats.runs_unresolved,
            failed = stats.runs_failed,
            max_active = stats.max_active,
            average_ms = stats.average_run_duration.as_millis() as u64,
            "Worker pool finished"
        );

        let record = Arc::try_unwrap(record).map_err(|_| SchedulerError::WorkerFailed {
            worker_id: "pool".to_string(),
            reason: "batch record still referenced after join".to_string(),
        })?;
        Ok((record, stats))
    }
}

/// Pulls jobs from the shared queue until it is empty.
struct Worker {
    id: String,
    queue: SharedQueue,
    executor: Arc<dyn JobExecutor>,
    record: Arc<BatchRunRecord>,
    stats: Arc<SharedPoolStats>,
}

impl Worker {
    fn new(
        id: String,
        queue: SharedQueue,
        executor: Arc<dyn JobExecutor>,
        record: Arc<BatchRunRecord>,
        stats: Arc<SharedPoolStats>,
    ) -> Self {
        Self {
            id,
            queue,
            executor,
            record,
            stats,
        }
    }

    async fn run(self) {
        debug!(worker_id = %self.id, "Worker started");

        loop {
            let next = self.queue.lock().await.pop_front();
            let Some(job) = next else {
                break;
            };
            self.process_job(job).await;
        }

        debug!(worker_id = %self.id, "Worker stopped");
    }

    async fn process_job(&self, job: RunJob) {
        let run_id = job.run_id.clone();
        let task_id = job.task_id.clone();
        let start_time = Instant::now();

        info!(
            worker_id = %self.id,
            run_id = %run_id,
            task_id = %task_id,
            queued_ms = (chrono::Utc::now() - job.enqueued_at).num_milliseconds(),
            "Processing run"
        );

        self.stats.increment_active();
        let executor = Arc::clone(&self.executor);
        let outcome = tokio::spawn(async move { executor.execute(job).await }).await;
        self.stats.decrement_active();

        let result = match outcome {
            Ok(result) => result,
            Err(e) => {
                let reason = panic_message(e);
                error!(
                    worker_id = %self.id,
                    run_id = %run_id,
                    reason = %reason,
                    "Run panicked"
                );
                RunResult::unresolved(&task_id, &RunError::Panicked(reason), "")
            }
        };

        let duration = start_time.elapsed();
        self.stats.record(&result, duration);
        if let Some(err) = result.error() {
            warn!(
                worker_id = %self.id,
                run_id = %run_id,
                error = %err,
                duration_ms = duration.as_millis() as u64,
                "Run finished with error"
            );
        } else {
            info!(
                worker_id = %self.id,
                run_id = %run_id,
                is_resolved = result.is_resolved(),
                score = result.score(),
                duration_ms = duration.as_millis() as u64,
                "Run finished"
            );
        }
        self.record.complete(&run_id, result);
    }
}

fn panic_message(err: JoinError) -> String {
    if !err.is_panic() {
        return err.to_string();
    }
    let payload = err.into_panic();
    if let Some(s) = payload.downcast_ref::<&str>() {
        (*s).to_string()
    } else if let Some(s) = payload.downcast_ref::<String>() {
        s.clone()
    } else {
        "unknown panic payload".to_string()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::bridge::Agent;
    use crate::config::Params;
    use crate::error::AgentError;
    use serde_json::Value;
    use std::collections::BTreeMap;

    struct NullAgent;

    #[async_trait]
    impl Agent for NullAgent {
        fn name(&self) -> &str {
            "null"
        }

        async fn act(&self, _env_info: &Value) -> Result<String, AgentError> {
            Ok(String::new())
        }
    }

    /// Sleeps briefly, tracks concurrency, and panics on task "panic".
    struct CountingExecutor {
        active: AtomicU64,
        peak: AtomicU64,
    }

    impl CountingExecutor {
        fn new() -> Self {
            Self {
                active: AtomicU64::new(0),
                peak: AtomicU64::new(0),
            }
        }
    }

    #[async_trait]
    impl JobExecutor for CountingExecutor {
        async fn execute(&self, job: RunJob) -> RunResult {
            let now = self.active.fetch_add(1, Ordering::SeqCst) + 1;
            self.peak.fetch_max(now, Ordering::SeqCst);
            tokio::time::sleep(Duration::from_millis(30)).await;
            self.active.fetch_sub(1, Ordering::SeqCst);

            if job.task_id == "panic" {
                panic!("executor exploded");
            }
            RunResult::new(job.task_id, true, 1.0, BTreeMap::new(), "").unwrap()
        }
    }

    fn jobs(task_ids: &[&str]) -> Vec<RunJob> {
        task_ids
            .iter()
            .enumerate()
            .map(|(i, t)| RunJob::new(format!("run-{i}"), *t, Arc::new(NullAgent), Params::new()))
            .collect()
    }

    #[tokio::test]
    async fn test_concurrency_is_bounded() {
        let executor = Arc::new(CountingExecutor::new());
        let pool = WorkerPool::new(executor.clone(), 3).unwrap();

        let ids: Vec<String> = (0..10).map(|i| i.to_string()).collect();
        let refs: Vec<&str> = ids.iter().map(String::as_str).collect();
        let (record, stats) = pool.run(jobs(&refs)).await.unwrap();

        assert_eq!(record.len(), 10);
        assert!(record.is_complete());
        assert!(executor.peak.load(Ordering::SeqCst) <= 3);
        assert!(stats.max_active <= 3);
        assert_eq!(stats.num_workers, 3);
        assert_eq!(stats.runs_resolved, 10);
    }

    #[tokio::test]
    async fn test_workers_capped_by_job_count() {
        let pool = WorkerPool::new(Arc::new(CountingExecutor::new()), 8).unwrap();
        let (_, stats) = pool.run(jobs(&["0", "1"])).await.unwrap();
        assert_eq!(stats.num_workers, 2);
    }

    #[tokio::test]
    async fn test_panic_is_isolated() {
        let pool = WorkerPool::new(Arc::new(CountingExecutor::new()), 2).unwrap();
        let (record, stats) = pool.run(jobs(&["0", "panic", "2"])).await.unwrap();

        let results = record.results();
        assert_eq!(results.len(), 3);
        let panicked = &results["run-1"];
        assert!(!panicked.is_resolved());
        assert_eq!(panicked.task_id(), "panic");
        assert!(panicked.error().unwrap().contains("executor exploded"));
        assert!(results["run-0"].is_resolved());
        assert!(results["run-2"].is_resolved());
        assert_eq!(stats.runs_failed, 1);
    }

    #[tokio::test]
    async fn test_duplicate_run_ids_rejected() {
        let pool = WorkerPool::new(Arc::new(CountingExecutor::new()), 2).unwrap();
        let mut batch = jobs(&["0", "1"]);
        batch[1].run_id = batch[0].run_id.clone();

        let err = pool.run(batch).await.unwrap_err();
        assert!(matches!(err, SchedulerError::DuplicateRunId(ref id) if id == "run-0"));
    }

    #[tokio::test]
    async fn test_path_like_run_ids_rejected() {
        let executor = Arc::new(CountingExecutor::new());
        let pool = WorkerPool::new(executor.clone(), 2).unwrap();

        for bad in ["../..", "..", ".", "a/b", ""] {
            let mut batch = jobs(&["0", "1"]);
            batch[1].run_id = bad.to_string();
            let err = pool.run(batch).await.unwrap_err();
            assert!(matches!(err, SchedulerError::InvalidConfig(ref msg) if msg.contains("run id")));
        }
        assert_eq!(executor.peak.load(Ordering::SeqCst), 0);
    }

    #[test]
    fn test_zero_workers_is_invalid() {
        let err = WorkerPool::new(Arc::new(CountingExecutor::new()), 0)
            .err()
            .unwrap();
        assert!(matches!(err, SchedulerError::InvalidConfig(_)));
    }

    #[tokio::test]
    async fn test_empty_batch() {
        let pool = WorkerPool::new(Arc::new(CountingExecutor::new()), 2).unwrap();
        let (record, stats) = pool.run(Vec::new()).await.unwrap();
        assert!(record.is_empty());
        assert_eq!(stats.total_processed(), 0);
    }
}
