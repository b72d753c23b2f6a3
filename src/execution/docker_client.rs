//! Docker API wrapper using the bollard crate.
//!
//! This module provides the production [`ContainerRuntime`] backed by the local
//! Docker daemon.

use std::collections::HashMap;
use std::time::Duration;

use async_trait::async_trait;
use bollard::container::{
    Config, CreateContainerOptions, ListContainersOptions, LogOutput, LogsOptions,
    RemoveContainerOptions, StartContainerOptions, StopContainerOptions, WaitContainerOptions,
};
use bollard::image::CreateImageOptions;
use bollard::models::HostConfig;
use bollard::Docker;
use futures::StreamExt;
use tracing::{debug, info};

use crate::error::ContainerError;
use crate::execution::runtime::{ContainerRuntime, ContainerSpec};

/// Docker client wrapper for container operations.
pub struct DockerClient {
    docker: Docker,
}

impl DockerClient {
    /// Creates a new Docker client connecting to the local Docker daemon.
    ///
    /// # Errors
    ///
    /// Returns `ContainerError::DaemonUnavailable` if the Docker daemon is not accessible.
    pub fn new() -> Result<Self, ContainerError> {
        let docker = Docker::connect_with_local_defaults()
            .map_err(|e| ContainerError::DaemonUnavailable(format!("Failed to connect: {e}")))?;

        Ok(Self { docker })
    }

    /// Creates a new Docker client from an existing bollard Docker instance.
    pub fn from_docker(docker: Docker) -> Self {
        Self { docker }
    }

    /// Checks if an image exists locally.
    pub async fn image_exists(&self, image: &str) -> bool {
        self.docker.inspect_image(image).await.is_ok()
    }

    /// Pulls a Docker image from a registry.
    ///
    /// # Arguments
    ///
    /// * `image` - Image name with optional tag (e.g., "kirk2000/benchflow:webarena-v1")
    pub async fn pull_image(&self, image: &str) -> Result<(), ContainerError> {
        let options = CreateImageOptions {
            from_image: image,
            ..Default::default()
        };

        let mut stream = self.docker.create_image(Some(options), None, None);

        while let Some(result) = stream.next().await {
            result.map_err(|e| ContainerError::Start(format!("Failed to pull image {image}: {e}")))?;
        }

        Ok(())
    }

    fn host_config(spec: &ContainerSpec) -> HostConfig {
        HostConfig {
            memory: spec.limits.memory_bytes(),
            cpu_period: spec.limits.cpu_quota().map(|_| spec.limits.cpu_period()),
            cpu_quota: spec.limits.cpu_quota(),
            pids_limit: spec.limits.pids_limit(),
            network_mode: spec.network_mode.clone(),
            binds: if spec.binds.is_empty() {
                None
            } else {
                Some(spec.binds.clone())
            },
            extra_hosts: if spec.extra_hosts.is_empty() {
                None
            } else {
                Some(spec.extra_hosts.clone())
            },
            ..Default::default()
        }
    }
}

fn is_not_found(err: &bollard::errors::Error) -> bool {
    matches!(
        err,
        bollard::errors::Error::DockerResponseServerError {
            status_code: 404,
            ..
        }
    ) || err.to_string().contains("No such container")
}

#[async_trait]
impl ContainerRuntime for DockerClient {
    async fn ensure_image(&self, image: &str) -> Result<(), ContainerError> {
        if self.image_exists(image).await {
            return Ok(());
        }
        info!(image = %image, "Pulling image");
        self.pull_image(image).await
    }

    async fn create_container(&self, spec: &ContainerSpec) -> Result<String, ContainerError> {
        let container_config = Config {
            image: Some(spec.image.clone()),
            env: if spec.env.is_empty() {
                None
            } else {
                Some(spec.env.clone())
            },
            labels: if spec.labels.is_empty() {
                None
            } else {
                Some(spec.labels.clone())
            },
            host_config: Some(Self::host_config(spec)),
            attach_stdin: Some(false),
            attach_stdout: Some(true),
            attach_stderr: Some(true),
            ..Default::default()
        };

        let options = CreateContainerOptions {
            name: spec.name.clone(),
            platform: None,
        };

        let response = self
            .docker
            .create_container(Some(options), container_config)
            .await
            .map_err(|e| ContainerError::Start(format!("Failed to create container: {e}")))?;

        debug!(container_id = %response.id, name = %spec.name, "Created container");
        Ok(response.id)
    }

    async fn start_container(&self, id: &str) -> Result<(), ContainerError> {
        self.docker
            .start_container(id, None::<StartContainerOptions<String>>)
            .await
            .map_err(|e| ContainerError::Start(format!("Failed to start container: {e}")))?;

        Ok(())
    }

    async fn wait_container(&self, id: &str) -> Result<i64, ContainerError> {
        let options = WaitContainerOptions {
            condition: "not-running",
        };

        let mut stream = self.docker.wait_container(id, Some(options));

        match stream.next().await {
            Some(Ok(response)) => Ok(response.status_code),
            // bollard reports non-zero exits as an error carrying the code.
            Some(Err(bollard::errors::Error::DockerContainerWaitError { code, .. })) => Ok(code),
            Some(Err(e)) if is_not_found(&e) => Err(ContainerError::NotFound { id: id.to_string() }),
            Some(Err(e)) => Err(ContainerError::Runtime(format!(
                "Error waiting for container: {e}"
            ))),
            None => Err(ContainerError::Runtime(
                "Container wait stream ended without a status".to_string(),
            )),
        }
    }

    /// Sends SIGTERM and waits up to `grace` before sending SIGKILL.
    async fn stop_container(&self, id: &str, grace: Duration) -> Result<(), ContainerError> {
        let options = StopContainerOptions {
            t: grace.as_secs() as i64,
        };

        match self.docker.stop_container(id, Some(options)).await {
            Ok(()) => Ok(()),
            // 304: already stopped.
            Err(bollard::errors::Error::DockerResponseServerError {
                status_code: 304, ..
            }) => Ok(()),
            Err(e) if is_not_found(&e) => Err(ContainerError::NotFound { id: id.to_string() }),
            Err(e) => Err(ContainerError::Runtime(format!(
                "Failed to stop container: {e}"
            ))),
        }
    }

    async fn remove_container(&self, id: &str) -> Result<(), ContainerError> {
        let options = RemoveContainerOptions {
            force: true,
            v: true, // Remove volumes
            ..Default::default()
        };

        match self.docker.remove_container(id, Some(options)).await {
            Ok(()) => Ok(()),
            Err(e) if is_not_found(&e) => Err(ContainerError::NotFound { id: id.to_string() }),
            Err(e) => Err(ContainerError::Runtime(format!(
                "Failed to remove container: {e}"
            ))),
        }
    }

    async fn logs(&self, id: &str) -> Result<String, ContainerError> {
        let options = LogsOptions::<String> {
            stdout: true,
            stderr: true,
            follow: false,
            timestamps: false,
            ..Default::default()
        };

        let mut logs = self.docker.logs(id, Some(options));
        let mut output = String::new();

        while let Some(chunk) = logs.next().await {
            match chunk {
                Ok(LogOutput::StdOut { message }) | Ok(LogOutput::StdErr { message }) => {
                    output.push_str(&String::from_utf8_lossy(&message));
                }
                Ok(_) => {}
                Err(e) => {
                    return Err(ContainerError::Runtime(format!("Error reading logs: {e}")));
                }
            }
        }

        Ok(output)
    }

    async fn list_labeled(&self, label: &str, value: &str) -> Result<Vec<String>, ContainerError> {
        let mut filters = HashMap::new();
        filters.insert("label".to_string(), vec![format!("{label}={value}")]);

        let options = ListContainersOptions {
            all: true,
            filters,
            ..Default::default()
        };

        let containers = self
            .docker
            .list_containers(Some(options))
            .await
            .map_err(|e| ContainerError::Runtime(format!("Failed to list containers: {e}")))?;

        Ok(containers.into_iter().filter_map(|c| c.id).collect())
    }
}
