//! Persistence of run results and manifests.
//!
//! Layout under the benchmark directory:
//!
//! ```text
//! <work_dir>/<benchmark>/runs/<run_id>/result.json
//! <work_dir>/<benchmark>/runs/<run_id>/manifest.json
//! ```

use std::collections::{BTreeMap, HashMap};
use std::fs;
use std::io;
use std::path::{Path, PathBuf};
use std::sync::RwLock;

use base64::engine::general_purpose::STANDARD as BASE64;
use base64::Engine;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tracing::{debug, warn};

use crate::results::result::RunResult;

const RESULT_FILE: &str = "result.json";
const MANIFEST_FILE: &str = "manifest.json";

/// Agent environment setup scripts attached to a batch.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct AgentRequirements {
    pub requirements_txt: Option<String>,
    pub install_sh: Option<String>,
}

impl AgentRequirements {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_requirements_txt(mut self, text: impl Into<String>) -> Self {
        self.requirements_txt = Some(text.into());
        self
    }

    pub fn with_install_sh(mut self, text: impl Into<String>) -> Self {
        self.install_sh = Some(text.into());
        self
    }
}

/// What was launched for a run. Secret values are never recorded, only keys.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RunManifest {
    pub run_id: String,
    pub task_id: String,
    pub benchmark: String,
    pub agent: String,
    pub image: String,
    pub created_at: DateTime<Utc>,
    pub config_keys: Vec<String>,
    /// Base64 of the agent's requirements.txt.
    pub requirements_txt: Option<String>,
    /// Base64 of the agent's install.sh.
    pub install_sh: Option<String>,
}

impl RunManifest {
    pub fn new(
        run_id: impl Into<String>,
        task_id: impl Into<String>,
        benchmark: impl Into<String>,
        agent: impl Into<String>,
        image: impl Into<String>,
    ) -> Self {
        Self {
            run_id: run_id.into(),
            task_id: task_id.into(),
            benchmark: benchmark.into(),
            agent: agent.into(),
            image: image.into(),
            created_at: Utc::now(),
            config_keys: Vec::new(),
            requirements_txt: None,
            install_sh: None,
        }
    }

    pub fn with_config_keys<'a>(mut self, keys: impl Iterator<Item = &'a str>) -> Self {
        self.config_keys = keys.map(str::to_string).collect();
        self
    }

    pub fn with_requirements(mut self, requirements: &AgentRequirements) -> Self {
        self.requirements_txt = requirements
            .requirements_txt
            .as_ref()
            .map(|t| BASE64.encode(t));
        self.install_sh = requirements.install_sh.as_ref().map(|t| BASE64.encode(t));
        self
    }

    /// Decoded install script, if one was recorded.
    pub fn install_sh_text(&self) -> Option<String> {
        self.install_sh
            .as_ref()
            .and_then(|b| BASE64.decode(b).ok())
            .map(|bytes| String::from_utf8_lossy(&bytes).into_owned())
    }
}

/// File-backed result store with an in-memory index.
#[derive(Debug)]
pub struct ResultStore {
    root: PathBuf,
    cache: RwLock<HashMap<String, RunResult>>,
}

impl ResultStore {
    /// Store rooted at the benchmark directory (`<work_dir>/<benchmark>`).
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self {
            root: root.into(),
            cache: RwLock::new(HashMap::new()),
        }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    pub fn runs_dir(&self) -> PathBuf {
        self.root.join("runs")
    }

    pub fn run_dir(&self, run_id: &str) -> PathBuf {
        self.runs_dir().join(run_id)
    }

    pub fn save(&self, run_id: &str, result: &RunResult) -> io::Result<()> {
        let dir = self.run_dir(run_id);
        fs::create_dir_all(&dir)?;
        let json = serde_json::to_string_pretty(result).map_err(io::Error::other)?;
        fs::write(dir.join(RESULT_FILE), json)?;

        if let Ok(mut cache) = self.cache.write() {
            cache.insert(run_id.to_string(), result.clone());
        }
        debug!(run_id = %run_id, "Saved result");
        Ok(())
    }

    pub fn save_manifest(&self, manifest: &RunManifest) -> io::Result<()> {
        let dir = self.run_dir(&manifest.run_id);
        fs::create_dir_all(&dir)?;
        let json = serde_json::to_string_pretty(manifest).map_err(io::Error::other)?;
        fs::write(dir.join(MANIFEST_FILE), json)
    }

    pub fn load_manifest(&self, run_id: &str) -> io::Result<Option<RunManifest>> {
        read_json(&self.run_dir(run_id).join(MANIFEST_FILE))
    }

    /// Whether a result has been saved for `run_id`.
    pub fn contains(&self, run_id: &str) -> bool {
        if let Ok(cache) = self.cache.read() {
            if cache.contains_key(run_id) {
                return true;
            }
        }
        self.run_dir(run_id).join(RESULT_FILE).is_file()
    }

    /// Loads one result, from memory when possible.
    pub fn load(&self, run_id: &str) -> io::Result<Option<RunResult>> {
        if let Ok(cache) = self.cache.read() {
            if let Some(result) = cache.get(run_id) {
                return Ok(Some(result.clone()));
            }
        }

        let loaded: Option<RunResult> = read_json(&self.run_dir(run_id).join(RESULT_FILE))?;
        if let Some(result) = &loaded {
            if let Ok(mut cache) = self.cache.write() {
                cache.insert(run_id.to_string(), result.clone());
            }
        }
        Ok(loaded)
    }

    /// Results for the given ids; unknown or unreadable ids are omitted.
    pub fn load_many<S: AsRef<str>>(&self, run_ids: &[S]) -> BTreeMap<String, RunResult> {
        let mut results = BTreeMap::new();
        for run_id in run_ids {
            let run_id = run_id.as_ref();
            match self.load(run_id) {
                Ok(Some(result)) => {
                    results.insert(run_id.to_string(), result);
                }
                Ok(None) => debug!(run_id = %run_id, "No result recorded"),
                Err(e) => warn!(run_id = %run_id, error = %e, "Failed to read result"),
            }
        }
        results
    }

    /// Ids of every run with a stored result.
    pub fn run_ids(&self) -> io::Result<Vec<String>> {
        let dir = self.runs_dir();
        if !dir.exists() {
            return Ok(Vec::new());
        }
        let mut ids = Vec::new();
        for entry in fs::read_dir(dir)? {
            let entry = entry?;
            if entry.path().join(RESULT_FILE).is_file() {
                ids.push(entry.file_name().to_string_lossy().into_owned());
            }
        }
        ids.sort();
        Ok(ids)
    }

    /// Deletes all persisted runs and clears the index.
    pub fn clear(&self) -> io::Result<()> {
        if let Ok(mut cache) = self.cache.write() {
            cache.clear();
        }
        match fs::remove_dir_all(self.runs_dir()) {
            Ok(()) => Ok(()),
            Err(e) if e.kind() == io::ErrorKind::NotFound => Ok(()),
            Err(e) => Err(e),
        }
    }
}

fn read_json<T: serde::de::DeserializeOwned>(path: &Path) -> io::Result<Option<T>> {
    let text = match fs::read_to_string(path) {
        Ok(text) => text,
        Err(e) if e.kind() == io::ErrorKind::NotFound => return Ok(None),
        Err(e) => return Err(e),
    };
    serde_json::from_str(&text)
        .map(Some)
        .map_err(|e| io::Error::new(io::ErrorKind::InvalidData, e))
}
