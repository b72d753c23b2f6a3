//! Container runtime abstraction.
//!
//! The lifecycle manager talks to containers only through [`ContainerRuntime`].
//! [`DockerClient`](super::DockerClient) is the production implementation; tests
//! substitute an in-process runtime.

use std::collections::HashMap;
use std::time::Duration;

use async_trait::async_trait;

use crate::error::ContainerError;
use crate::execution::resources::ExecutionLimits;

/// Label marking containers created by this orchestrator.
pub const MANAGED_LABEL: &str = "benchflow.managed";
/// Label carrying the run id a container belongs to.
pub const RUN_ID_LABEL: &str = "benchflow.run_id";
/// Extra host entry giving containers a route back to the orchestrator.
pub const HOST_GATEWAY: &str = "host.docker.internal:host-gateway";

/// Everything the runtime needs to create one container.
#[derive(Debug, Clone)]
pub struct ContainerSpec {
    /// Unique container name.
    pub name: String,
    /// Image reference.
    pub image: String,
    /// Environment in `KEY=value` form.
    pub env: Vec<String>,
    /// Bind mounts in `host:container[:ro]` form.
    pub binds: Vec<String>,
    pub labels: HashMap<String, String>,
    pub extra_hosts: Vec<String>,
    pub limits: ExecutionLimits,
    /// Network mode (e.g., "bridge", "host").
    pub network_mode: Option<String>,
}

impl ContainerSpec {
    pub fn new(name: impl Into<String>, image: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            image: image.into(),
            env: Vec::new(),
            binds: Vec::new(),
            labels: HashMap::new(),
            extra_hosts: Vec::new(),
            limits: ExecutionLimits::default(),
            network_mode: None,
        }
    }

    pub fn with_env(mut self, env: Vec<String>) -> Self {
        self.env = env;
        self
    }

    pub fn with_binds(mut self, binds: Vec<String>) -> Self {
        self.binds = binds;
        self
    }

    pub fn with_label(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.labels.insert(key.into(), value.into());
        self
    }

    pub fn with_extra_host(mut self, entry: impl Into<String>) -> Self {
        self.extra_hosts.push(entry.into());
        self
    }

    pub fn with_limits(mut self, limits: ExecutionLimits) -> Self {
        self.limits = limits;
        self
    }

    pub fn with_network_mode(mut self, mode: impl Into<String>) -> Self {
        self.network_mode = Some(mode.into());
        self
    }

    /// Looks up an environment entry by key.
    pub fn env_var(&self, key: &str) -> Option<&str> {
        self.env.iter().find_map(|entry| {
            entry
                .split_once('=')
                .filter(|(k, _)| *k == key)
                .map(|(_, v)| v)
        })
    }
}

/// Operations the lifecycle manager needs from a container runtime.
#[async_trait]
pub trait ContainerRuntime: Send + Sync {
    /// Pulls the image unless it is already present.
    async fn ensure_image(&self, image: &str) -> Result<(), ContainerError>;

    /// Creates a container and returns its id.
    async fn create_container(&self, spec: &ContainerSpec) -> Result<String, ContainerError>;

    async fn start_container(&self, id: &str) -> Result<(), ContainerError>;

    /// Blocks until the container is no longer running and returns its exit code.
    async fn wait_container(&self, id: &str) -> Result<i64, ContainerError>;

    /// Sends SIGTERM, then SIGKILL once `grace` has elapsed.
    async fn stop_container(&self, id: &str, grace: Duration) -> Result<(), ContainerError>;

    /// Force-removes the container and its anonymous volumes.
    async fn remove_container(&self, id: &str) -> Result<(), ContainerError>;

    /// Combined stdout/stderr of the container.
    async fn logs(&self, id: &str) -> Result<String, ContainerError>;

    /// Ids of all containers (running or not) carrying `label=value`.
    async fn list_labeled(&self, label: &str, value: &str) -> Result<Vec<String>, ContainerError>;
}
