//! Run-scoped volume mounts.
//!
//! Each run gets a private scratch directory on the host
//! (`<work_dir>/<benchmark>/scratch/<run_id>/{results,logs}`) bind-mounted at the
//! container paths the benchmark declares. Nothing is shared between runs.

use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};
use tracing::debug;

/// Host path of the Docker socket, mounted for benchmarks that spawn containers.
pub const DOCKER_SOCKET: &str = "/var/run/docker.sock";

/// Volume mount configuration.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct VolumeMount {
    /// Host path.
    pub host_path: PathBuf,
    /// Container path.
    pub container_path: PathBuf,
    /// Whether the mount is read-only.
    pub readonly: bool,
}

impl VolumeMount {
    /// Creates a new read-write volume mount.
    pub fn new(host: impl Into<PathBuf>, container: impl Into<PathBuf>) -> Self {
        Self {
            host_path: host.into(),
            container_path: container.into(),
            readonly: false,
        }
    }

    /// Returns the Docker bind string (`host:container[:ro]`).
    pub fn to_docker_mount(&self) -> String {
        let ro = if self.readonly { ":ro" } else { "" };
        format!(
            "{}:{}{}",
            self.host_path.display(),
            self.container_path.display(),
            ro
        )
    }
}

/// Absolute container paths where a benchmark writes its artifacts.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ResultPaths {
    pub results_dir: PathBuf,
    pub log_dir: PathBuf,
}

impl ResultPaths {
    pub fn new(results_dir: impl Into<PathBuf>, log_dir: impl Into<PathBuf>) -> Self {
        Self {
            results_dir: results_dir.into(),
            log_dir: log_dir.into(),
        }
    }
}

/// Host-side directories holding a finished run's artifacts.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ArtifactDirs {
    pub results_dir: PathBuf,
    pub log_dir: PathBuf,
}

/// The bind mounts of a single run.
#[derive(Debug, Clone)]
pub struct RunVolumes {
    scratch_dir: PathBuf,
    artifacts: ArtifactDirs,
    mounts: Vec<VolumeMount>,
}

impl RunVolumes {
    /// Creates the run's scratch directories and the mounts that expose them.
    pub fn prepare(
        work_dir: &Path,
        benchmark: &str,
        run_id: &str,
        paths: &ResultPaths,
        mount_docker_socket: bool,
    ) -> std::io::Result<Self> {
        let scratch = work_dir.join(benchmark).join("scratch").join(run_id);
        let results = scratch.join("results");
        let logs = scratch.join("logs");
        std::fs::create_dir_all(&results)?;
        std::fs::create_dir_all(&logs)?;

        // Docker binds need absolute host paths.
        let scratch_dir = scratch.canonicalize()?;
        let artifacts = ArtifactDirs {
            results_dir: scratch_dir.join("results"),
            log_dir: scratch_dir.join("logs"),
        };

        let mut mounts = vec![
            VolumeMount::new(&artifacts.results_dir, &paths.results_dir),
            VolumeMount::new(&artifacts.log_dir, &paths.log_dir),
        ];
        if mount_docker_socket {
            mounts.push(VolumeMount::new(DOCKER_SOCKET, DOCKER_SOCKET));
        }

        debug!(run_id = %run_id, scratch = %scratch_dir.display(), "Prepared run volumes");

        Ok(Self {
            scratch_dir,
            artifacts,
            mounts,
        })
    }

    pub fn scratch_dir(&self) -> &Path {
        &self.scratch_dir
    }

    pub fn mounts(&self) -> &[VolumeMount] {
        &self.mounts
    }

    pub fn artifacts(&self) -> &ArtifactDirs {
        &self.artifacts
    }

    pub fn binds(&self) -> Vec<String> {
        self.mounts.iter().map(VolumeMount::to_docker_mount).collect()
    }

    /// Maps an absolute container path onto the host, using the deepest mount
    /// that contains it.
    pub fn host_path_for(&self, container_path: &Path) -> Option<PathBuf> {
        self.mounts
            .iter()
            .filter_map(|m| {
                container_path
                    .strip_prefix(&m.container_path)
                    .ok()
                    .map(|rest| (m, rest))
            })
            .max_by_key(|(m, _)| m.container_path.components().count())
            .map(|(m, rest)| {
                if rest.as_os_str().is_empty() {
                    m.host_path.clone()
                } else {
                    m.host_path.join(rest)
                }
            })
    }

    /// Removes the scratch directory. Missing directories are not an error.
    pub fn release(&self) -> std::io::Result<()> {
        match std::fs::remove_dir_all(&self.scratch_dir) {
            Ok(()) => Ok(()),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(()),
            Err(e) => Err(e),
        }
    }
}
