//! Container execution layer.
//!
//! This module manages benchmark containers through a pluggable
//! [`ContainerRuntime`]; the production runtime is [`DockerClient`] (bollard).
//!
//! # Architecture
//!
//! Container states follow this lifecycle:
//! ```text
//! PENDING → RUNNING → EXITED/FAILED → REMOVED
//! ```
//!
//! # Example
//!
//! ```ignore
//! use benchflow::execution::{ContainerManager, DockerClient, ResultPaths, RunVolumes};
//!
//! let manager = ContainerManager::new(Arc::new(DockerClient::new()?), Duration::from_secs(10));
//! let volumes = RunVolumes::prepare(work_dir, "taubench", "0-1a2b3c4d", &paths, false)?;
//!
//! let mut handle = manager.start("0-1a2b3c4d", "taubench-benchflow:latest", env, &volumes).await?;
//! manager.stop(&mut handle).await;
//! let bytes = manager.read_volume(&handle, "/app/results/0.json").await?;
//! manager.destroy(&mut handle).await;
//! ```

pub mod container;
pub mod docker_client;
pub mod resources;
pub mod runtime;
pub mod volumes;

pub use container::{ContainerHandle, ContainerManager, ContainerStatus};
pub use docker_client::DockerClient;
pub use resources::ExecutionLimits;
pub use runtime::{ContainerRuntime, ContainerSpec, MANAGED_LABEL, RUN_ID_LABEL};
pub use volumes::{ArtifactDirs, ResultPaths, RunVolumes, VolumeMount};
