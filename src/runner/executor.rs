//! Per-run pipeline: configuration, container, interaction, collection.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use tokio::time::{timeout_at, Instant};
use tracing::{debug, info, warn};

use crate::benchmarks::{Benchmark, BenchmarkConfig};
use crate::bridge::{AgentBridge, ChannelEvent, InteractionChannel, RelayServer, Termination};
use crate::config::{Params, RunConfig, Settings};
use crate::error::{ConfigError, ContainerError, RunError};
use crate::execution::{ContainerManager, ContainerRuntime, RunVolumes};
use crate::results::{ResultCollector, ResultStore, RunManifest, RunResult};
use crate::scheduler::{JobExecutor, RunJob};

/// Env var carrying the relay URL into the container.
pub const AGENT_URL_KEY: &str = "AGENT_URL";
/// Env var carrying the task id into the container.
pub const TEST_START_IDX_KEY: &str = "TEST_START_IDX";

/// Caller params, then the injected task index, then the benchmark's
/// task-specific overrides, then the relay URL.
pub fn run_params(params: &Params, task_id: &str, overrides: Params, agent_url: &str) -> Params {
    let mut raw = params.clone();
    raw.insert(TEST_START_IDX_KEY.to_string(), task_id.into());
    raw.extend(overrides);
    raw.insert(AGENT_URL_KEY.to_string(), agent_url.into());
    raw
}

/// The job's own timeout, then the global setting, then the benchmark default.
pub fn run_budget(job: Option<Duration>, settings: Option<Duration>, benchmark: Duration) -> Duration {
    job.or(settings).unwrap_or(benchmark)
}

/// Executes runs of one benchmark.
pub struct TaskExecutor {
    benchmark: Arc<dyn Benchmark>,
    containers: ContainerManager,
    collector: ResultCollector,
    store: Arc<ResultStore>,
    settings: Settings,
}

impl TaskExecutor {
    pub fn new(
        benchmark: Arc<dyn Benchmark>,
        runtime: Arc<dyn ContainerRuntime>,
        settings: Settings,
        store: Arc<ResultStore>,
    ) -> Self {
        let containers =
            ContainerManager::new(runtime, settings.stop_grace).with_limits(benchmark.limits());
        Self {
            collector: ResultCollector::new(benchmark.clone()),
            benchmark,
            containers,
            store,
            settings,
        }
    }

    fn build_config(&self, job: &RunJob, agent_url: &str) -> Result<RunConfig, ConfigError> {
        let BenchmarkConfig { schema, overrides } = self.benchmark.get_config(&job.task_id);
        let raw = run_params(&job.params, &job.task_id, overrides, agent_url);
        schema.validate(&raw, &job.task_id)
    }

    fn save_manifest(&self, job: &RunJob, config: &RunConfig) {
        let manifest = RunManifest::new(
            &job.run_id,
            &job.task_id,
            self.benchmark.name(),
            job.agent.name(),
            self.benchmark.get_image_name(),
        )
        .with_config_keys(config.keys())
        .with_requirements(&job.requirements);

        if let Err(e) = self.store.save_manifest(&manifest) {
            warn!(run_id = %job.run_id, error = %e, "Failed to save run manifest");
        }
    }

    async fn run(&self, job: &RunJob) -> RunResult {
        let budget = run_budget(
            job.timeout,
            self.settings.run_timeout,
            self.benchmark.default_timeout(),
        );
        let deadline = Instant::now() + budget;

        let mut channel = InteractionChannel::new();
        let relay = match RelayServer::bind(&self.settings.relay_bind_host, channel.sender()).await {
            Ok(relay) => relay,
            Err(e) => return RunResult::unresolved(&job.task_id, &RunError::from(e), ""),
        };
        let agent_url = relay.agent_url(&self.settings.relay_advertise_host);

        let config = match self.build_config(job, &agent_url) {
            Ok(config) => config,
            Err(e) => {
                warn!(run_id = %job.run_id, task_id = %job.task_id, error = %e, "Invalid run configuration");
                relay.shutdown().await;
                return RunResult::unresolved(&job.task_id, &RunError::from(e), "");
            }
        };
        self.save_manifest(job, &config);

        let volumes = match RunVolumes::prepare(
            &self.settings.work_dir,
            self.benchmark.name(),
            &job.run_id,
            &self.benchmark.get_result_paths(),
            self.benchmark.mounts_docker_socket(),
        ) {
            Ok(volumes) => volumes,
            Err(e) => {
                relay.shutdown().await;
                let err = RunError::from(ContainerError::from(e));
                return RunResult::unresolved(&job.task_id, &err, "");
            }
        };

        let mut handle = match self
            .containers
            .start(
                &job.run_id,
                self.benchmark.get_image_name(),
                config.to_env(),
                &volumes,
            )
            .await
        {
            Ok(handle) => handle,
            Err(e) => {
                warn!(run_id = %job.run_id, error = %e, "Container failed to start");
                relay.shutdown().await;
                if let Err(release_err) = volumes.release() {
                    warn!(run_id = %job.run_id, error = %release_err, "Failed to release run volumes");
                }
                return RunResult::unresolved(&job.task_id, &RunError::from(e), "");
            }
        };
        handle.record_host_port(relay.port());

        let exit = self.containers.exit_signal(&handle);
        let events = channel.sender();
        let run_id = job.run_id.clone();
        let watcher = tokio::spawn(async move {
            let code = match exit.await {
                Ok(code) => code,
                Err(e) => {
                    warn!(run_id = %run_id, error = %e, "Lost track of container exit");
                    -1
                }
            };
            let _ = events.send(ChannelEvent::Exited(code)).await;
        });

        let bridge = AgentBridge::new(
            &job.run_id,
            job.agent.clone(),
            self.benchmark.adapter(),
            self.settings.max_steps,
        );
        let outcome = bridge.run(&mut channel, deadline).await;
        watcher.abort();
        relay.shutdown().await;
        drop(channel);

        let failure = match outcome.termination {
            Termination::Completed {
                exit_code: Some(code),
            } => {
                handle.mark_exited(code);
                None
            }
            Termination::Completed { exit_code: None } => {
                // Artifacts are complete only once the benchmark exits.
                match timeout_at(deadline, self.containers.wait_for_exit(&mut handle)).await {
                    Ok(Ok(code)) => {
                        debug!(run_id = %job.run_id, exit_code = code, "Container exited");
                        None
                    }
                    Ok(Err(e)) => {
                        warn!(run_id = %job.run_id, error = %e, "Waiting for container exit failed");
                        None
                    }
                    Err(_) => Some(RunError::Timeout(budget)),
                }
            }
            Termination::StepLimitExceeded { max_steps } => {
                Some(RunError::StepLimitExceeded { max_steps })
            }
            Termination::Timeout => Some(RunError::Timeout(budget)),
            Termination::AgentFailure(e) => Some(e.into()),
            Termination::ProtocolFailure(e) => Some(e.into()),
        };

        self.containers.stop(&mut handle).await;
        let result = match &failure {
            None => self.collector.collect(&handle, &job.task_id).await,
            Some(err) => {
                warn!(run_id = %job.run_id, error = %err, steps = outcome.state.step_count(), "Run failed");
                self.collector.collect_failure(&handle, &job.task_id, err).await
            }
        };
        self.containers.destroy(&mut handle).await;

        result
    }
}

#[async_trait]
impl JobExecutor for TaskExecutor {
    async fn execute(&self, job: RunJob) -> RunResult {
        let result = self.run(&job).await;

        if let Err(e) = self.store.save(&job.run_id, &result) {
            warn!(run_id = %job.run_id, error = %e, "Failed to persist result");
        }
        info!(
            run_id = %job.run_id,
            task_id = %job.task_id,
            benchmark = %self.benchmark.name(),
            is_resolved = result.is_resolved(),
            score = result.score(),
            "Run complete"
        );
        result
    }
}
