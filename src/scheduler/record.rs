//! Shared per-batch bookkeeping.

use std::collections::{BTreeMap, BTreeSet, HashMap};
use std::sync::{Mutex, MutexGuard};

use crate::results::RunResult;

#[derive(Debug, Default)]
struct RecordInner {
    results: HashMap<String, RunResult>,
    pending: BTreeSet<String>,
}

/// Results of one batch, keyed by run id, plus the runs still outstanding.
#[derive(Debug, Default)]
pub struct BatchRunRecord {
    inner: Mutex<RecordInner>,
}

impl BatchRunRecord {
    /// Record with every run id pending.
    pub fn new<I, S>(run_ids: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self {
            inner: Mutex::new(RecordInner {
                results: HashMap::new(),
                pending: run_ids.into_iter().map(Into::into).collect(),
            }),
        }
    }

    fn lock(&self) -> MutexGuard<'_, RecordInner> {
        // A panicking worker cannot leave the maps half-updated.
        self.inner.lock().unwrap_or_else(|e| e.into_inner())
    }

    /// Stores a run's result and clears it from the pending set.
    pub fn complete(&self, run_id: &str, result: RunResult) {
        let mut inner = self.lock();
        inner.pending.remove(run_id);
        inner.results.insert(run_id.to_string(), result);
    }

    pub fn pending(&self) -> BTreeSet<String> {
        self.lock().pending.clone()
    }

    pub fn is_complete(&self) -> bool {
        self.lock().pending.is_empty()
    }

    pub fn results(&self) -> BTreeMap<String, RunResult> {
        self.lock()
            .results
            .iter()
            .map(|(k, v)| (k.clone(), v.clone()))
            .collect()
    }

    pub fn get(&self, run_id: &str) -> Option<RunResult> {
        self.lock().results.get(run_id).cloned()
    }

    /// Every run id, finished or not.
    pub fn run_ids(&self) -> BTreeSet<String> {
        let inner = self.lock();
        inner
            .results
            .keys()
            .cloned()
            .chain(inner.pending.iter().cloned())
            .collect()
    }

    pub fn len(&self) -> usize {
        self.lock().results.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}
