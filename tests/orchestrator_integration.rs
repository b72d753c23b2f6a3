//! End-to-end tests of the run pipeline without a Docker daemon.
//!
//! An in-process container runtime plays the benchmark: it talks to the
//! per-run relay over real HTTP, writes tau-bench style artifacts into the
//! run's host bind directory and exits. The agent is a real axum endpoint.

use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use serde_json::{json, Value};
use tokio::sync::watch;
use tokio::task::JoinHandle;

use benchflow::benchmarks::TauBench;
use benchflow::execution::{ArtifactDirs, ContainerRuntime, ContainerSpec, ResultPaths};
use benchflow::{
    Agent, AgentError, AgentServer, BatchRequest, Benchmark, BenchmarkConfig, ContainerError,
    HttpAgent, Orchestrator, OrchestratorContext, ResultParseError, RunResult, SchedulerError,
    Settings, TaskListing, TaskRequest,
};

#[derive(Debug, Clone, Copy)]
enum Script {
    /// Posts this many observations, writes a passing result and exits 0.
    Turns(usize),
    /// Keeps posting until the relay refuses, then exits 1.
    Endless,
    /// Never talks to the relay.
    Hang,
}

struct FakeContainer {
    spec: ContainerSpec,
    exit: watch::Sender<Option<i64>>,
    task: Option<JoinHandle<()>>,
}

struct Inner {
    script: Script,
    containers: Mutex<HashMap<String, FakeContainer>>,
    specs: Mutex<Vec<ContainerSpec>>,
    actions: Mutex<Vec<Value>>,
    created: AtomicUsize,
    running: AtomicUsize,
    peak: AtomicUsize,
}

impl Inner {
    fn exit(&self, id: &str, code: i64) {
        let containers = self.containers.lock().unwrap();
        if let Some(container) = containers.get(id) {
            let exited = container.exit.borrow().is_some();
            if !exited {
                container.exit.send_replace(Some(code));
                self.running.fetch_sub(1, Ordering::SeqCst);
            }
        }
    }
}

struct FakeRuntime {
    inner: Arc<Inner>,
}

impl FakeRuntime {
    fn new(script: Script) -> Arc<Self> {
        Arc::new(Self {
            inner: Arc::new(Inner {
                script,
                containers: Mutex::new(HashMap::new()),
                specs: Mutex::new(Vec::new()),
                actions: Mutex::new(Vec::new()),
                created: AtomicUsize::new(0),
                running: AtomicUsize::new(0),
                peak: AtomicUsize::new(0),
            }),
        })
    }

    fn created(&self) -> usize {
        self.inner.created.load(Ordering::SeqCst)
    }

    fn peak(&self) -> usize {
        self.inner.peak.load(Ordering::SeqCst)
    }

    fn live(&self) -> usize {
        self.inner.containers.lock().unwrap().len()
    }

    fn specs(&self) -> Vec<ContainerSpec> {
        self.inner.specs.lock().unwrap().clone()
    }

    fn actions(&self) -> Vec<Value> {
        self.inner.actions.lock().unwrap().clone()
    }
}

fn host_dir(spec: &ContainerSpec, container_path: &str) -> Option<PathBuf> {
    spec.binds.iter().find_map(|bind| {
        let mut parts = bind.splitn(3, ':');
        let host = parts.next()?;
        let container = parts.next()?;
        (container == container_path).then(|| PathBuf::from(host))
    })
}

async fn play_benchmark(inner: &Inner, spec: &ContainerSpec) -> i64 {
    let (Some(agent_url), Some(task)) = (spec.env_var("AGENT_URL"), spec.env_var("TEST_START_IDX"))
    else {
        return 2;
    };
    let turns = match inner.script {
        Script::Turns(n) => n,
        Script::Endless => 1000,
        Script::Hang => {
            tokio::time::sleep(Duration::from_secs(3600)).await;
            return 0;
        }
    };

    tokio::time::sleep(Duration::from_millis(20)).await;
    let client = reqwest::Client::new();
    for turn in 0..turns {
        let response = client
            .post(format!("{agent_url}/action"))
            .json(&json!({"input_data": {"task": task, "turn": turn}}))
            .send()
            .await;
        let Ok(response) = response else {
            return 1;
        };
        if !response.status().is_success() {
            return 1;
        }
        let Ok(action) = response.json::<Value>().await else {
            return 1;
        };
        inner.actions.lock().unwrap().push(action);
    }

    let (Some(results), Some(logs)) = (
        host_dir(spec, "/app/results"),
        host_dir(spec, "/app/log_files"),
    ) else {
        return 2;
    };
    let result = json!({"reward": 1.0, "info": {"turns": turns}});
    if std::fs::write(results.join(format!("{task}.json")), result.to_string()).is_err() {
        return 3;
    }
    let _ = std::fs::write(logs.join("run.log"), format!("finished {turns} turns\n"));
    0
}

#[async_trait]
impl ContainerRuntime for FakeRuntime {
    async fn ensure_image(&self, _image: &str) -> Result<(), ContainerError> {
        Ok(())
    }

    async fn create_container(&self, spec: &ContainerSpec) -> Result<String, ContainerError> {
        let n = self.inner.created.fetch_add(1, Ordering::SeqCst);
        let id = format!("fake-{n}");
        let (exit, _) = watch::channel(None);
        self.inner.containers.lock().unwrap().insert(
            id.clone(),
            FakeContainer {
                spec: spec.clone(),
                exit,
                task: None,
            },
        );
        self.inner.specs.lock().unwrap().push(spec.clone());
        Ok(id)
    }

    async fn start_container(&self, id: &str) -> Result<(), ContainerError> {
        let mut containers = self.inner.containers.lock().unwrap();
        let container = containers
            .get_mut(id)
            .ok_or_else(|| ContainerError::NotFound { id: id.to_string() })?;

        let now = self.inner.running.fetch_add(1, Ordering::SeqCst) + 1;
        self.inner.peak.fetch_max(now, Ordering::SeqCst);

        let inner = self.inner.clone();
        let spec = container.spec.clone();
        let owned_id = id.to_string();
        container.task = Some(tokio::spawn(async move {
            let code = play_benchmark(&inner, &spec).await;
            inner.exit(&owned_id, code);
        }));
        Ok(())
    }

    async fn wait_container(&self, id: &str) -> Result<i64, ContainerError> {
        let mut rx = {
            let containers = self.inner.containers.lock().unwrap();
            containers
                .get(id)
                .ok_or_else(|| ContainerError::NotFound { id: id.to_string() })?
                .exit
                .subscribe()
        };
        loop {
            let current = *rx.borrow();
            if let Some(code) = current {
                return Ok(code);
            }
            if rx.changed().await.is_err() {
                return Err(ContainerError::NotFound { id: id.to_string() });
            }
        }
    }

    async fn stop_container(&self, id: &str, _grace: Duration) -> Result<(), ContainerError> {
        let task = {
            let mut containers = self.inner.containers.lock().unwrap();
            containers
                .get_mut(id)
                .ok_or_else(|| ContainerError::NotFound { id: id.to_string() })?
                .task
                .take()
        };
        if let Some(task) = task {
            task.abort();
        }
        self.inner.exit(id, 137);
        Ok(())
    }

    async fn remove_container(&self, id: &str) -> Result<(), ContainerError> {
        self.stop_container(id, Duration::ZERO).await?;
        self.inner.containers.lock().unwrap().remove(id);
        Ok(())
    }

    async fn logs(&self, id: &str) -> Result<String, ContainerError> {
        Ok(format!("console of {id}\n"))
    }

    async fn list_labeled(&self, label: &str, value: &str) -> Result<Vec<String>, ContainerError> {
        let containers = self.inner.containers.lock().unwrap();
        Ok(containers
            .iter()
            .filter(|(_, c)| c.spec.labels.get(label).map(String::as_str) == Some(value))
            .map(|(id, _)| id.clone())
            .collect())
    }
}

/// Answers every observation with `action-<n>`.
struct ScriptedAgent {
    calls: AtomicUsize,
}

#[async_trait]
impl Agent for ScriptedAgent {
    fn name(&self) -> &str {
        "scripted"
    }

    async fn act(&self, env_info: &Value) -> Result<String, AgentError> {
        if env_info.get("turn").is_none() {
            return Err(AgentError::Failed("observation without turn".to_string()));
        }
        let n = self.calls.fetch_add(1, Ordering::SeqCst);
        Ok(format!("action-{n}"))
    }
}

async fn spawn_agent() -> (String, Arc<ScriptedAgent>) {
    let agent = Arc::new(ScriptedAgent {
        calls: AtomicUsize::new(0),
    });
    let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    let server = AgentServer::new(agent.clone());
    tokio::spawn(async move {
        let _ = server.serve(listener).await;
    });
    (format!("http://{addr}"), agent)
}

fn http_agent(url: &str) -> Arc<dyn Agent> {
    Arc::new(
        HttpAgent::new(url, Duration::from_secs(5))
            .unwrap()
            .with_max_retries(0),
    )
}

fn settings(work_dir: &Path) -> Settings {
    Settings::new()
        .with_work_dir(work_dir)
        .with_relay_host("127.0.0.1", "127.0.0.1")
        .with_stop_grace(Duration::from_millis(200))
}

fn orchestrator(runtime: &Arc<FakeRuntime>, work_dir: &Path) -> Orchestrator {
    let ctx = OrchestratorContext::new(runtime.clone(), settings(work_dir));
    Orchestrator::new(ctx, Arc::new(TauBench))
}

fn scratch_entries(work_dir: &Path) -> usize {
    std::fs::read_dir(work_dir.join("taubench").join("scratch"))
        .map(|entries| entries.count())
        .unwrap_or(0)
}

#[tokio::test]
async fn test_three_turn_run_resolves() {
    let dir = tempfile::tempdir().unwrap();
    let runtime = FakeRuntime::new(Script::Turns(3));
    let (agent_url, agent) = spawn_agent().await;
    let orch = orchestrator(&runtime, dir.path());

    let run_ids: Vec<String> = orch
        .run(BatchRequest::new(["0"], vec![http_agent(&agent_url)]))
        .await
        .unwrap()
        .into_iter()
        .collect();
    assert_eq!(run_ids.len(), 1);

    let results = orch.get_results(&run_ids);
    let result = &results[&run_ids[0]];
    assert!(result.is_resolved(), "{result:?}");
    assert_eq!(result.score(), 1.0);
    assert_eq!(result.task_id(), "0");
    assert_eq!(result.message()["details"], r#"{"turns":3}"#);
    assert!(result.error().is_none());

    assert_eq!(agent.calls.load(Ordering::SeqCst), 3);
    let actions = runtime.actions();
    assert_eq!(actions.len(), 3);
    assert_eq!(
        actions[2],
        json!({"action": "action-2", "raw_prediction": "action-2"})
    );

    let spec = &runtime.specs()[0];
    assert_eq!(spec.env_var("TEST_START_IDX"), Some("0"));
    assert_eq!(spec.env_var("TEST_END_IDX"), Some("1"));
    assert!(spec
        .env_var("AGENT_URL")
        .unwrap()
        .starts_with("http://127.0.0.1:"));

    let manifest = orch.store().load_manifest(&run_ids[0]).unwrap().unwrap();
    assert_eq!(manifest.benchmark, "taubench");
    assert!(manifest.config_keys.contains(&"AGENT_URL".to_string()));

    assert_eq!(runtime.live(), 0);
    assert_eq!(scratch_entries(dir.path()), 0);
}

#[tokio::test]
async fn test_invalid_config_never_starts_container() {
    let dir = tempfile::tempdir().unwrap();
    let runtime = FakeRuntime::new(Script::Turns(1));
    let (agent_url, agent) = spawn_agent().await;
    let orch = orchestrator(&runtime, dir.path());

    let run_ids: Vec<String> = orch
        .run(BatchRequest::new(["abc"], vec![http_agent(&agent_url)]))
        .await
        .unwrap()
        .into_iter()
        .collect();

    let result = &orch.get_results(&run_ids)[&run_ids[0]];
    assert!(!result.is_resolved());
    assert_eq!(result.score(), 0.0);
    assert_eq!(result.error(), Some("MissingRequired: TEST_END_IDX"));
    assert_eq!(runtime.created(), 0);
    assert_eq!(agent.calls.load(Ordering::SeqCst), 0);
}

#[tokio::test]
async fn test_unreachable_agent_fails_run() {
    let dir = tempfile::tempdir().unwrap();
    let runtime = FakeRuntime::new(Script::Turns(3));
    let orch = orchestrator(&runtime, dir.path());

    let run_ids: Vec<String> = orch
        .run(BatchRequest::new(["2"], vec![http_agent("http://127.0.0.1:1")]))
        .await
        .unwrap()
        .into_iter()
        .collect();

    let result = &orch.get_results(&run_ids)[&run_ids[0]];
    assert!(!result.is_resolved());
    assert!(result
        .error()
        .unwrap()
        .starts_with("AgentCommunicationError"));
    assert_eq!(runtime.created(), 1);
    assert_eq!(runtime.live(), 0);
    assert_eq!(scratch_entries(dir.path()), 0);
}

#[tokio::test]
async fn test_step_limit_stops_endless_benchmark() {
    let dir = tempfile::tempdir().unwrap();
    let runtime = FakeRuntime::new(Script::Endless);
    let (agent_url, agent) = spawn_agent().await;
    let orch = orchestrator(&runtime, dir.path());

    let run_ids: Vec<String> = orch
        .run(BatchRequest::new(["1"], vec![http_agent(&agent_url)]))
        .await
        .unwrap()
        .into_iter()
        .collect();

    let result = &orch.get_results(&run_ids)[&run_ids[0]];
    assert!(!result.is_resolved());
    assert!(result.error().unwrap().starts_with("StepLimitExceeded"));
    assert_eq!(agent.calls.load(Ordering::SeqCst), 30);
    assert_eq!(runtime.live(), 0);
}

#[tokio::test]
async fn test_timeout_force_stops_container() {
    let dir = tempfile::tempdir().unwrap();
    let runtime = FakeRuntime::new(Script::Hang);
    let (agent_url, _agent) = spawn_agent().await;
    let orch = orchestrator(&runtime, dir.path());

    let request = BatchRequest::new(["0"], vec![http_agent(&agent_url)])
        .with_timeout(Duration::from_secs(1));
    let run_ids: Vec<String> = orch.run(request).await.unwrap().into_iter().collect();

    let result = &orch.get_results(&run_ids)[&run_ids[0]];
    assert!(!result.is_resolved());
    assert!(result.error().unwrap().starts_with("Timeout"));
    assert_eq!(result.log(), "console of fake-0\n");
    assert_eq!(runtime.live(), 0);
    assert_eq!(scratch_entries(dir.path()), 0);
}

#[tokio::test]
async fn test_concurrency_is_bounded_by_max_workers() {
    let dir = tempfile::tempdir().unwrap();
    let runtime = FakeRuntime::new(Script::Turns(1));
    let (agent_url, agent) = spawn_agent().await;
    let orch = orchestrator(&runtime, dir.path());

    let request = BatchRequest::new(["0", "1", "2", "3", "4", "5"], vec![http_agent(&agent_url)])
        .with_max_workers(2);
    let run_ids: Vec<String> = orch.run(request).await.unwrap().into_iter().collect();

    assert_eq!(run_ids.len(), 6);
    let results = orch.get_results(&run_ids);
    assert_eq!(results.len(), 6);
    assert!(results.values().all(|r| r.is_resolved()));
    assert_eq!(runtime.created(), 6);
    assert!(runtime.peak() <= 2, "peak {}", runtime.peak());
    assert_eq!(agent.calls.load(Ordering::SeqCst), 6);
    assert_eq!(runtime.live(), 0);
}

#[tokio::test]
async fn test_every_agent_runs_every_task() {
    let dir = tempfile::tempdir().unwrap();
    let runtime = FakeRuntime::new(Script::Turns(1));
    let (url_a, agent_a) = spawn_agent().await;
    let (url_b, agent_b) = spawn_agent().await;
    let orch = orchestrator(&runtime, dir.path());

    let agent = |url: &str, name: &str| -> Arc<dyn Agent> {
        Arc::new(
            HttpAgent::new(url, Duration::from_secs(5))
                .unwrap()
                .with_name(name),
        )
    };
    let request = BatchRequest::new(["0", "1"], vec![agent(&url_a, "a"), agent(&url_b, "b")])
        .with_max_workers(4);
    let run_ids = orch.run(request).await.unwrap();

    assert_eq!(run_ids.len(), 4);
    assert_eq!(agent_a.calls.load(Ordering::SeqCst), 2);
    assert_eq!(agent_b.calls.load(Ordering::SeqCst), 2);
}

#[tokio::test]
async fn test_duplicate_run_ids_rejected_before_work() {
    let dir = tempfile::tempdir().unwrap();
    let runtime = FakeRuntime::new(Script::Turns(1));
    let (agent_url, _agent) = spawn_agent().await;
    let orch = orchestrator(&runtime, dir.path());

    let request = BatchRequest::new(
        vec![
            TaskRequest::new("0").with_run_id("same"),
            TaskRequest::new("1").with_run_id("same"),
        ],
        vec![http_agent(&agent_url)],
    );
    let err = orch.run(request).await.unwrap_err();
    assert!(matches!(err, SchedulerError::DuplicateRunId(ref id) if id == "same"));
    assert_eq!(runtime.created(), 0);
}

#[tokio::test]
async fn test_cleanup_removes_results_and_containers() {
    let dir = tempfile::tempdir().unwrap();
    let runtime = FakeRuntime::new(Script::Turns(1));
    let (agent_url, _agent) = spawn_agent().await;
    let orch = orchestrator(&runtime, dir.path());

    let run_ids: Vec<String> = orch
        .run(BatchRequest::new(["0"], vec![http_agent(&agent_url)]))
        .await
        .unwrap()
        .into_iter()
        .collect();
    assert_eq!(orch.get_results(&run_ids).len(), 1);

    orch.cleanup().await;
    assert!(orch.get_results(&run_ids).is_empty());
    assert!(!dir.path().join("taubench").join("runs").exists());
    assert!(!dir.path().join("taubench").join("scratch").exists());
}

/// tau-bench, except that configuring task "boom" panics.
struct ExplodingBench;

#[async_trait]
impl Benchmark for ExplodingBench {
    fn name(&self) -> &str {
        "taubench"
    }

    fn get_config(&self, task_id: &str) -> BenchmarkConfig {
        if task_id == "boom" {
            panic!("config builder exploded");
        }
        TauBench.get_config(task_id)
    }

    fn get_image_name(&self) -> &str {
        "taubench-benchflow:latest"
    }

    fn get_result_paths(&self) -> ResultPaths {
        TauBench.get_result_paths()
    }

    fn get_result(&self, task_id: &str, artifacts: &ArtifactDirs) -> Result<Value, ResultParseError> {
        TauBench.get_result(task_id, artifacts)
    }

    async fn get_all_tasks(&self, split: &str) -> TaskListing {
        TauBench.get_all_tasks(split).await
    }
}

#[tokio::test]
async fn test_panicking_run_still_has_stored_result() {
    let dir = tempfile::tempdir().unwrap();
    let runtime = FakeRuntime::new(Script::Turns(1));
    let (agent_url, _agent) = spawn_agent().await;
    let ctx = OrchestratorContext::new(runtime.clone(), settings(dir.path()));
    let orch = Orchestrator::new(ctx, Arc::new(ExplodingBench));

    let request = BatchRequest::new(
        vec![
            TaskRequest::new("0").with_run_id("fine"),
            TaskRequest::new("boom").with_run_id("exploded"),
        ],
        vec![http_agent(&agent_url)],
    );
    let run_ids: Vec<String> = orch.run(request).await.unwrap().into_iter().collect();
    assert_eq!(run_ids.len(), 2);

    let results = orch.get_results(&run_ids);
    assert_eq!(results.len(), 2);
    assert!(results["fine"].is_resolved());
    let exploded = &results["exploded"];
    assert!(!exploded.is_resolved());
    assert_eq!(exploded.task_id(), "boom");
    assert!(exploded.error().unwrap().contains("config builder exploded"));

    let reloaded = benchflow::ResultStore::new(dir.path().join("taubench"));
    assert_eq!(reloaded.load("exploded").unwrap(), Some(exploded.clone()));
}

#[tokio::test]
async fn test_path_like_run_id_rejected_and_history_kept() {
    let dir = tempfile::tempdir().unwrap();
    let runtime = FakeRuntime::new(Script::Turns(1));
    let (agent_url, _agent) = spawn_agent().await;
    let orch = orchestrator(&runtime, dir.path());

    let old = RunResult::new("3", true, 1.0, Default::default(), "").unwrap();
    orch.store().save("old-run", &old).unwrap();

    let request = BatchRequest::new(
        vec![TaskRequest::new("0").with_run_id("../..")],
        vec![http_agent(&agent_url)],
    );
    let err = orch.run(request).await.unwrap_err();
    assert!(matches!(err, SchedulerError::InvalidConfig(_)));
    assert_eq!(runtime.created(), 0);
    assert_eq!(orch.get_results(&["old-run"]).len(), 1);
    assert!(dir.path().join("taubench").join("runs").join("old-run").is_dir());
}
