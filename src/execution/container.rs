//! Container lifecycle management.
//!
//! [`ContainerManager`] owns the `start → stop → read volumes → destroy` sequence
//! for one run at a time. The [`ContainerHandle`] it returns belongs to the worker
//! that created it and is destroyed on every exit path.

use std::fmt;
use std::future::Future;
use std::path::Path;
use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tracing::{debug, info, warn};
use uuid::Uuid;

use crate::error::ContainerError;
use crate::execution::resources::ExecutionLimits;
use crate::execution::runtime::{
    ContainerRuntime, ContainerSpec, HOST_GATEWAY, MANAGED_LABEL, RUN_ID_LABEL,
};
use crate::execution::volumes::{ArtifactDirs, RunVolumes};

/// Cap on captured container console output.
pub const CONSOLE_LOG_CAP: usize = 1024 * 1024;

/// Status of a managed container.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ContainerStatus {
    /// Created but not started.
    Pending,
    Running,
    /// Exited with code 0.
    Exited,
    /// Exited non-zero, or lost track of the container.
    Failed,
    Removed,
}

impl fmt::Display for ContainerStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ContainerStatus::Pending => write!(f, "pending"),
            ContainerStatus::Running => write!(f, "running"),
            ContainerStatus::Exited => write!(f, "exited"),
            ContainerStatus::Failed => write!(f, "failed"),
            ContainerStatus::Removed => write!(f, "removed"),
        }
    }
}

/// A started container plus the run-scoped resources attached to it.
pub struct ContainerHandle {
    id: String,
    run_id: String,
    image: String,
    status: ContainerStatus,
    exit_code: Option<i64>,
    host_ports: Vec<u16>,
    volumes: RunVolumes,
    console_log: Option<String>,
    created_at: DateTime<Utc>,
    runtime: Arc<dyn ContainerRuntime>,
}

impl ContainerHandle {
    pub fn id(&self) -> &str {
        &self.id
    }

    pub fn run_id(&self) -> &str {
        &self.run_id
    }

    pub fn image(&self) -> &str {
        &self.image
    }

    pub fn status(&self) -> ContainerStatus {
        self.status
    }

    pub fn exit_code(&self) -> Option<i64> {
        self.exit_code
    }

    pub fn host_ports(&self) -> &[u16] {
        &self.host_ports
    }

    pub fn volumes(&self) -> &RunVolumes {
        &self.volumes
    }

    /// Console output captured when the container stopped.
    pub fn console_log(&self) -> Option<&str> {
        self.console_log.as_deref()
    }

    pub fn created_at(&self) -> DateTime<Utc> {
        self.created_at
    }

    pub fn is_running(&self) -> bool {
        self.status == ContainerStatus::Running
    }

    /// Host artifact directories. Refused while the container is running,
    /// since the benchmark may still be writing.
    pub fn stopped_artifacts(&self) -> Result<&ArtifactDirs, ContainerError> {
        if self.is_running() {
            return Err(ContainerError::StillRunning {
                id: self.id.clone(),
            });
        }
        Ok(self.volumes.artifacts())
    }

    /// Records a host port serving this container (e.g., its relay).
    pub fn record_host_port(&mut self, port: u16) {
        self.host_ports.push(port);
    }

    /// Records the exit code reported by the runtime.
    pub fn mark_exited(&mut self, exit_code: i64) {
        if self.status == ContainerStatus::Removed {
            return;
        }
        self.exit_code = Some(exit_code);
        self.status = if exit_code == 0 {
            ContainerStatus::Exited
        } else {
            ContainerStatus::Failed
        };
    }
}

impl fmt::Debug for ContainerHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ContainerHandle")
            .field("id", &self.id)
            .field("run_id", &self.run_id)
            .field("image", &self.image)
            .field("status", &self.status)
            .field("exit_code", &self.exit_code)
            .field("host_ports", &self.host_ports)
            .field("scratch_dir", &self.volumes.scratch_dir())
            .finish()
    }
}

impl Drop for ContainerHandle {
    fn drop(&mut self) {
        if self.status == ContainerStatus::Removed {
            return;
        }

        warn!(
            run_id = %self.run_id,
            container_id = %self.id,
            status = %self.status,
            "Container handle dropped without destroy; scheduling forced removal"
        );

        let Ok(rt) = tokio::runtime::Handle::try_current() else {
            return;
        };
        let runtime = self.runtime.clone();
        let id = std::mem::take(&mut self.id);
        let volumes = self.volumes.clone();
        rt.spawn(async move {
            if let Err(e) = runtime.remove_container(&id).await {
                warn!(container_id = %id, error = %e, "Forced removal failed");
            }
            if let Err(e) = volumes.release() {
                warn!(container_id = %id, error = %e, "Failed to release run volumes");
            }
        });
    }
}

/// Starts, stops, inspects and destroys benchmark containers.
#[derive(Clone)]
pub struct ContainerManager {
    runtime: Arc<dyn ContainerRuntime>,
    stop_grace: Duration,
    limits: ExecutionLimits,
}

impl ContainerManager {
    pub fn new(runtime: Arc<dyn ContainerRuntime>, stop_grace: Duration) -> Self {
        Self {
            runtime,
            stop_grace,
            limits: ExecutionLimits::default(),
        }
    }

    pub fn with_limits(mut self, limits: ExecutionLimits) -> Self {
        self.limits = limits;
        self
    }

    /// Creates and starts a fresh container for one run.
    ///
    /// The container gets the run's env and bind mounts, the managed labels and a
    /// route to the host gateway. Any half-created container is removed before
    /// the error is returned. The caller keeps ownership of `volumes` on error.
    pub async fn start(
        &self,
        run_id: &str,
        image: &str,
        env: Vec<String>,
        volumes: &RunVolumes,
    ) -> Result<ContainerHandle, ContainerError> {
        let name = container_name(run_id);
        let spec = ContainerSpec::new(&name, image)
            .with_env(env)
            .with_binds(volumes.binds())
            .with_label(MANAGED_LABEL, "true")
            .with_label(RUN_ID_LABEL, run_id)
            .with_extra_host(HOST_GATEWAY)
            .with_limits(self.limits.clone());

        self.runtime.ensure_image(image).await?;
        let id = self.runtime.create_container(&spec).await?;

        let mut handle = ContainerHandle {
            id,
            run_id: run_id.to_string(),
            image: image.to_string(),
            status: ContainerStatus::Pending,
            exit_code: None,
            host_ports: Vec::new(),
            volumes: volumes.clone(),
            console_log: None,
            created_at: Utc::now(),
            runtime: self.runtime.clone(),
        };

        if let Err(e) = self.runtime.start_container(&handle.id).await {
            if let Err(remove_err) = self.runtime.remove_container(&handle.id).await {
                warn!(
                    run_id = %run_id,
                    container_id = %handle.id,
                    error = %remove_err,
                    "Failed to remove container after start failure"
                );
            }
            // Volumes stay with the caller; only the container is gone.
            handle.status = ContainerStatus::Removed;
            return Err(match e {
                ContainerError::Start(_) => e,
                other => ContainerError::Start(other.to_string()),
            });
        }

        handle.status = ContainerStatus::Running;
        info!(run_id = %run_id, container_id = %handle.id, image = %image, "Container started");
        Ok(handle)
    }

    /// Future resolving with the container's exit code once it stops running.
    ///
    /// Detached from the handle so it can run alongside the interaction loop.
    pub fn exit_signal(
        &self,
        handle: &ContainerHandle,
    ) -> impl Future<Output = Result<i64, ContainerError>> + Send + 'static {
        let runtime = self.runtime.clone();
        let id = handle.id.clone();
        async move { runtime.wait_container(&id).await }
    }

    /// Waits for the container to exit on its own.
    pub async fn wait_for_exit(&self, handle: &mut ContainerHandle) -> Result<i64, ContainerError> {
        if let Some(code) = handle.exit_code {
            return Ok(code);
        }
        let code = self.runtime.wait_container(&handle.id).await?;
        handle.mark_exited(code);
        Ok(code)
    }

    /// Graceful stop with a bounded force-kill fallback.
    ///
    /// Records the exit code and captures console output. If the runtime cannot
    /// stop the container it is force-removed so the handle never stays running.
    pub async fn stop(&self, handle: &mut ContainerHandle) {
        if handle.status == ContainerStatus::Running {
            match self.runtime.stop_container(&handle.id, self.stop_grace).await {
                Ok(()) => {
                    let wait = tokio::time::timeout(
                        self.stop_grace + Duration::from_secs(5),
                        self.runtime.wait_container(&handle.id),
                    )
                    .await;
                    match wait {
                        Ok(Ok(code)) => handle.mark_exited(code),
                        Ok(Err(e)) => {
                            warn!(run_id = %handle.run_id, container_id = %handle.id, error = %e, "Could not read exit code after stop");
                            handle.status = ContainerStatus::Failed;
                        }
                        Err(_) => {
                            warn!(run_id = %handle.run_id, container_id = %handle.id, "Container did not report exit after stop");
                            self.capture_console(handle).await;
                            self.force_remove(handle).await;
                        }
                    }
                }
                Err(e) => {
                    warn!(run_id = %handle.run_id, container_id = %handle.id, error = %e, "Graceful stop failed, forcing removal");
                    self.capture_console(handle).await;
                    self.force_remove(handle).await;
                }
            }
        }

        if handle.console_log.is_none() && handle.status != ContainerStatus::Removed {
            self.capture_console(handle).await;
        }

        debug!(
            run_id = %handle.run_id,
            container_id = %handle.id,
            status = %handle.status,
            exit_code = ?handle.exit_code,
            "Container stopped"
        );
    }

    /// Reads a file the benchmark wrote under one of its declared paths.
    ///
    /// Refused while the container is running.
    pub async fn read_volume(
        &self,
        handle: &ContainerHandle,
        container_path: impl AsRef<Path>,
    ) -> Result<Vec<u8>, ContainerError> {
        handle.stopped_artifacts()?;
        let container_path = container_path.as_ref();
        let host_path = handle
            .volumes
            .host_path_for(container_path)
            .ok_or_else(|| ContainerError::UnmountedPath {
                path: container_path.display().to_string(),
            })?;
        Ok(tokio::fs::read(host_path).await?)
    }

    /// Removes the container and releases the run's bind directories.
    ///
    /// Idempotent; failures are logged and never surface as run failures.
    pub async fn destroy(&self, handle: &mut ContainerHandle) {
        if handle.status != ContainerStatus::Removed {
            self.force_remove(handle).await;
        }

        if let Err(e) = handle.volumes.release() {
            warn!(
                run_id = %handle.run_id,
                scratch = %handle.volumes.scratch_dir().display(),
                error = %e,
                "Failed to release run volumes"
            );
        }

        handle.status = ContainerStatus::Removed;
        debug!(run_id = %handle.run_id, container_id = %handle.id, "Container destroyed");
    }

    /// Force-removes every container carrying the managed label.
    ///
    /// Returns the number of containers removed.
    pub async fn remove_stale(&self) -> Result<usize, ContainerError> {
        let ids = self.runtime.list_labeled(MANAGED_LABEL, "true").await?;
        let mut removed = 0;
        for id in ids {
            match self.runtime.remove_container(&id).await {
                Ok(()) | Err(ContainerError::NotFound { .. }) => removed += 1,
                Err(e) => warn!(container_id = %id, error = %e, "Failed to remove stale container"),
            }
        }
        if removed > 0 {
            info!(removed, "Removed stale managed containers");
        }
        Ok(removed)
    }

    async fn force_remove(&self, handle: &mut ContainerHandle) {
        match self.runtime.remove_container(&handle.id).await {
            Ok(()) | Err(ContainerError::NotFound { .. }) => {}
            Err(e) => {
                warn!(run_id = %handle.run_id, container_id = %handle.id, error = %e, "Failed to remove container");
            }
        }
        handle.status = ContainerStatus::Removed;
    }

    async fn capture_console(&self, handle: &mut ContainerHandle) {
        match self.runtime.logs(&handle.id).await {
            Ok(text) => {
                for line in text.lines() {
                    debug!(run_id = %handle.run_id, container_id = %handle.id, "{}", line);
                }
                handle.console_log = Some(truncate_tail(text, CONSOLE_LOG_CAP));
            }
            Err(e) => {
                debug!(run_id = %handle.run_id, container_id = %handle.id, error = %e, "Could not read container logs");
            }
        }
    }
}

/// Docker-safe unique container name for a run.
fn container_name(run_id: &str) -> String {
    let safe: String = run_id
        .chars()
        .map(|c| {
            if c.is_ascii_alphanumeric() || matches!(c, '_' | '.' | '-') {
                c
            } else {
                '-'
            }
        })
        .collect();
    let suffix = Uuid::new_v4().simple().to_string();
    format!("benchflow-{}-{}", safe, &suffix[..8])
}

/// Keeps the last `cap` bytes of `text`, on a char boundary.
fn truncate_tail(text: String, cap: usize) -> String {
    if text.len() <= cap {
        return text;
    }
    let mut start = text.len() - cap;
    while !text.is_char_boundary(start) {
        start += 1;
    }
    text[start..].to_string()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::execution::volumes::ResultPaths;
    use async_trait::async_trait;
    use std::sync::Mutex;

    #[derive(Default)]
    struct RecordingRuntime {
        calls: Mutex<Vec<String>>,
        fail_start: bool,
        fail_stop: bool,
        specs: Mutex<Vec<ContainerSpec>>,
    }

    impl RecordingRuntime {
        fn calls(&self) -> Vec<String> {
            self.calls.lock().unwrap().clone()
        }

        fn record(&self, call: String) {
            self.calls.lock().unwrap().push(call);
        }
    }

    #[async_trait]
    impl ContainerRuntime for RecordingRuntime {
        async fn ensure_image(&self, image: &str) -> Result<(), ContainerError> {
            self.record(format!("ensure {image}"));
            Ok(())
        }

        async fn create_container(&self, spec: &ContainerSpec) -> Result<String, ContainerError> {
            self.record("create".to_string());
            self.specs.lock().unwrap().push(spec.clone());
            Ok("cid-1".to_string())
        }

        async fn start_container(&self, id: &str) -> Result<(), ContainerError> {
            self.record(format!("start {id}"));
            if self.fail_start {
                return Err(ContainerError::Runtime("port already allocated".to_string()));
            }
            Ok(())
        }

        async fn wait_container(&self, id: &str) -> Result<i64, ContainerError> {
            self.record(format!("wait {id}"));
            Ok(0)
        }

        async fn stop_container(&self, id: &str, _grace: Duration) -> Result<(), ContainerError> {
            self.record(format!("stop {id}"));
            if self.fail_stop {
                return Err(ContainerError::Runtime("daemon hiccup".to_string()));
            }
            Ok(())
        }

        async fn remove_container(&self, id: &str) -> Result<(), ContainerError> {
            self.record(format!("remove {id}"));
            Ok(())
        }

        async fn logs(&self, _id: &str) -> Result<String, ContainerError> {
            Ok("line one\nline two\n".to_string())
        }

        async fn list_labeled(&self, _label: &str, _value: &str) -> Result<Vec<String>, ContainerError> {
            Ok(vec!["stale-1".to_string(), "stale-2".to_string()])
        }
    }

    fn volumes(dir: &Path) -> RunVolumes {
        RunVolumes::prepare(
            dir,
            "taubench",
            "7-deadbeef",
            &ResultPaths::new("/app/results", "/app/logs"),
            false,
        )
        .unwrap()
    }

    #[test]
    fn test_container_status_display() {
        assert_eq!(format!("{}", ContainerStatus::Pending), "pending");
        assert_eq!(format!("{}", ContainerStatus::Running), "running");
        assert_eq!(format!("{}", ContainerStatus::Exited), "exited");
        assert_eq!(format!("{}", ContainerStatus::Failed), "failed");
        assert_eq!(format!("{}", ContainerStatus::Removed), "removed");
    }

    #[test]
    fn test_container_name_is_sanitized_and_unique() {
        let a = container_name("task/1 x");
        let b = container_name("task/1 x");
        assert!(a.starts_with("benchflow-task-1-x-"));
        assert_ne!(a, b);
    }

    #[test]
    fn test_truncate_tail_keeps_end() {
        assert_eq!(truncate_tail("abcdef".to_string(), 3), "def");
        assert_eq!(truncate_tail("abc".to_string(), 10), "abc");
        assert_eq!(truncate_tail("aé".to_string(), 1), "");
    }

    #[tokio::test]
    async fn test_start_labels_and_routes_container() {
        let dir = tempfile::tempdir().unwrap();
        let runtime = Arc::new(RecordingRuntime::default());
        let manager = ContainerManager::new(runtime.clone(), Duration::from_secs(1));
        let vols = volumes(dir.path());

        let mut handle = manager
            .start("7-deadbeef", "img:latest", vec!["TEST_START_IDX=7".to_string()], &vols)
            .await
            .unwrap();

        assert_eq!(handle.status(), ContainerStatus::Running);
        let spec = runtime.specs.lock().unwrap()[0].clone();
        assert_eq!(spec.labels.get(MANAGED_LABEL).map(String::as_str), Some("true"));
        assert_eq!(spec.labels.get(RUN_ID_LABEL).map(String::as_str), Some("7-deadbeef"));
        assert_eq!(spec.extra_hosts, vec![HOST_GATEWAY.to_string()]);
        assert_eq!(spec.binds.len(), 2);
        assert_eq!(spec.env_var("TEST_START_IDX"), Some("7"));

        manager.destroy(&mut handle).await;
    }

    #[tokio::test]
    async fn test_start_failure_removes_half_created_container() {
        let dir = tempfile::tempdir().unwrap();
        let runtime = Arc::new(RecordingRuntime {
            fail_start: true,
            ..Default::default()
        });
        let manager = ContainerManager::new(runtime.clone(), Duration::from_secs(1));

        let err = manager
            .start("r", "img", Vec::new(), &volumes(dir.path()))
            .await
            .unwrap_err();

        assert!(err.to_string().starts_with("ContainerStartError"));
        assert!(err.to_string().contains("port already allocated"));
        assert!(runtime.calls().contains(&"remove cid-1".to_string()));
    }

    #[tokio::test]
    async fn test_read_volume_refused_while_running() {
        let dir = tempfile::tempdir().unwrap();
        let runtime = Arc::new(RecordingRuntime::default());
        let manager = ContainerManager::new(runtime, Duration::from_secs(1));
        let vols = volumes(dir.path());
        let mut handle = manager.start("r", "img", Vec::new(), &vols).await.unwrap();

        std::fs::write(vols.artifacts().results_dir.join("7.json"), b"{}").unwrap();

        let err = manager
            .read_volume(&handle, "/app/results/7.json")
            .await
            .unwrap_err();
        assert!(matches!(err, ContainerError::StillRunning { .. }));

        manager.stop(&mut handle).await;
        assert_eq!(handle.status(), ContainerStatus::Exited);
        assert_eq!(handle.exit_code(), Some(0));
        assert!(handle.console_log().unwrap().contains("line two"));

        let bytes = manager
            .read_volume(&handle, "/app/results/7.json")
            .await
            .unwrap();
        assert_eq!(bytes, b"{}");

        let err = manager.read_volume(&handle, "/etc/hosts").await.unwrap_err();
        assert!(matches!(err, ContainerError::UnmountedPath { .. }));

        manager.destroy(&mut handle).await;
    }

    #[tokio::test]
    async fn test_collect_refused_until_stopped() {
        use crate::benchmarks::TauBench;
        use crate::results::ResultCollector;

        let dir = tempfile::tempdir().unwrap();
        let runtime = Arc::new(RecordingRuntime::default());
        let manager = ContainerManager::new(runtime, Duration::from_secs(1));
        let vols = volumes(dir.path());
        let mut handle = manager.start("r", "img", Vec::new(), &vols).await.unwrap();
        std::fs::write(
            vols.artifacts().results_dir.join("7.json"),
            br#"{"reward": 1.0, "info": {}}"#,
        )
        .unwrap();

        assert!(matches!(
            handle.stopped_artifacts(),
            Err(ContainerError::StillRunning { .. })
        ));
        let collector = ResultCollector::new(Arc::new(TauBench));
        let early = collector.collect(&handle, "7").await;
        assert!(!early.is_resolved());
        assert!(early.error().unwrap().starts_with("ResultParseError"));

        manager.stop(&mut handle).await;
        assert!(handle.stopped_artifacts().is_ok());
        let result = collector.collect(&handle, "7").await;
        assert!(result.is_resolved());
        assert_eq!(result.score(), 1.0);

        manager.destroy(&mut handle).await;
    }

    #[tokio::test]
    async fn test_stop_failure_falls_back_to_force_remove() {
        let dir = tempfile::tempdir().unwrap();
        let runtime = Arc::new(RecordingRuntime {
            fail_stop: true,
            ..Default::default()
        });
        let manager = ContainerManager::new(runtime.clone(), Duration::from_secs(1));
        let mut handle = manager
            .start("r", "img", Vec::new(), &volumes(dir.path()))
            .await
            .unwrap();

        manager.stop(&mut handle).await;
        assert_eq!(handle.status(), ContainerStatus::Removed);
        assert!(runtime.calls().contains(&"remove cid-1".to_string()));

        manager.destroy(&mut handle).await;
    }

    #[tokio::test]
    async fn test_destroy_releases_scratch_and_is_idempotent() {
        let dir = tempfile::tempdir().unwrap();
        let runtime = Arc::new(RecordingRuntime::default());
        let manager = ContainerManager::new(runtime.clone(), Duration::from_secs(1));
        let vols = volumes(dir.path());
        let mut handle = manager.start("r", "img", Vec::new(), &vols).await.unwrap();

        manager.destroy(&mut handle).await;
        manager.destroy(&mut handle).await;

        assert_eq!(handle.status(), ContainerStatus::Removed);
        assert!(!vols.scratch_dir().exists());
        let removes = runtime
            .calls()
            .iter()
            .filter(|c| c.starts_with("remove"))
            .count();
        assert_eq!(removes, 1);
    }

    #[tokio::test]
    async fn test_remove_stale_counts_removed() {
        let runtime = Arc::new(RecordingRuntime::default());
        let manager = ContainerManager::new(runtime.clone(), Duration::from_secs(1));
        assert_eq!(manager.remove_stale().await.unwrap(), 2);
        assert!(runtime.calls().contains(&"remove stale-2".to_string()));
    }
}
