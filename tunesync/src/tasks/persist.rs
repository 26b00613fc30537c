//! Loading and saving the persisted state document.

use crate::errors::SyncError;
use crate::library::FileStore;
use crate::state::{keys, PipelineState};
use crate::task::{CheckReport, Divergence, Findings, RunContext, Task};
use async_trait::async_trait;
use chrono::Utc;
use serde_json::Value;
use std::sync::Arc;
use tracing::info;

/// Reads the previous run's JSON snapshot into the pipeline state.
///
/// A missing snapshot file is not an error: the run simply starts from
/// a fresh document. Converged when the state already equals the
/// on-disk document, so loading is idempotent. Never needs a prompt.
#[derive(Debug)]
pub struct LoadState {
    store: Arc<dyn FileStore>,
    file_name: String,
}

impl LoadState {
    /// Creates the task for the given snapshot file.
    #[must_use]
    pub fn new(store: Arc<dyn FileStore>, file_name: impl Into<String>) -> Self {
        Self {
            store,
            file_name: file_name.into(),
        }
    }
}

#[async_trait]
impl Task for LoadState {
    fn name(&self) -> &str {
        "load-state"
    }

    async fn check(&self, state: &PipelineState) -> Result<CheckReport, SyncError> {
        let bytes = match self.store.read(&self.file_name).await {
            Ok(bytes) => bytes,
            Err(SyncError::Io(err)) if err.kind() == std::io::ErrorKind::NotFound => {
                info!(file = %self.file_name, "no snapshot yet, starting fresh");
                return Ok(CheckReport::Converged);
            }
            Err(err) => return Err(err),
        };
        let document = PipelineState::from_slice(&bytes)?;
        if document == *state {
            return Ok(CheckReport::Converged);
        }
        Ok(CheckReport::Diverged(
            Divergence::new("snapshot not yet loaded").with_finding("document", &document.to_json())?,
        ))
    }

    // Loading is read-only, so the gate would only be noise.
    async fn confirm(&self, _ctx: &RunContext, _divergence: &Divergence) -> Result<bool, SyncError> {
        Ok(true)
    }

    async fn action(
        &self,
        _state: PipelineState,
        findings: &Findings,
    ) -> Result<PipelineState, SyncError> {
        let document: Value = crate::task::read_finding(findings, "document")?;
        PipelineState::from_json(document)
    }
}

/// Persists the pipeline state as pretty-printed JSON.
///
/// Converged when the file already holds the current document (the
/// `saved_at` stamp aside), so an untouched re-run does not rewrite
/// the snapshot.
#[derive(Debug)]
pub struct SaveState {
    store: Arc<dyn FileStore>,
    file_name: String,
}

impl SaveState {
    /// Creates the task for the given snapshot file.
    #[must_use]
    pub fn new(store: Arc<dyn FileStore>, file_name: impl Into<String>) -> Self {
        Self {
            store,
            file_name: file_name.into(),
        }
    }
}

fn without_stamp(mut document: Value) -> Value {
    if let Some(obj) = document.as_object_mut() {
        obj.remove(keys::SAVED_AT);
    }
    document
}

#[async_trait]
impl Task for SaveState {
    fn name(&self) -> &str {
        "save-state"
    }

    async fn check(&self, state: &PipelineState) -> Result<CheckReport, SyncError> {
        let on_disk = match self.store.read(&self.file_name).await {
            Ok(bytes) => serde_json::from_slice::<Value>(&bytes).ok(),
            Err(SyncError::Io(err)) if err.kind() == std::io::ErrorKind::NotFound => None,
            Err(err) => return Err(err),
        };
        if on_disk.map(without_stamp) == Some(without_stamp(state.to_json())) {
            return Ok(CheckReport::Converged);
        }
        Ok(CheckReport::Diverged(Divergence::new(
            "snapshot on disk is stale",
        )))
    }

    // Persisting the snapshot is local and reversible.
    async fn confirm(&self, _ctx: &RunContext, _divergence: &Divergence) -> Result<bool, SyncError> {
        Ok(true)
    }

    async fn action(
        &self,
        mut state: PipelineState,
        _findings: &Findings,
    ) -> Result<PipelineState, SyncError> {
        state.insert(keys::SAVED_AT, &Utc::now().to_rfc3339())?;
        self.store
            .write(&self.file_name, &state.to_vec_pretty()?)
            .await?;
        info!(file = %self.file_name, "snapshot saved");
        Ok(state)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::task::TaskOutcome;
    use crate::testing::{MemoryStore, ScriptedPrompter};
    use pretty_assertions::assert_eq;
    use serde_json::json;

    fn ctx() -> RunContext {
        RunContext::new(Arc::new(ScriptedPrompter::new()))
    }

    #[tokio::test]
    async fn load_starts_fresh_when_the_file_is_missing() {
        let store = Arc::new(MemoryStore::new());
        let task = LoadState::new(store, "state.json");
        let outcome = task.start(&ctx(), PipelineState::new()).await.unwrap();
        assert_eq!(outcome, TaskOutcome::Advanced(PipelineState::new()));
    }

    #[tokio::test]
    async fn load_replaces_the_state_with_the_snapshot() {
        let store = Arc::new(MemoryStore::new());
        let mut snapshot = PipelineState::new();
        snapshot.insert(keys::CLOUD_LIST, &json!([])).unwrap();
        store.seed("state.json", &snapshot.to_vec_pretty().unwrap());

        let task = LoadState::new(store, "state.json");
        let outcome = task.start(&ctx(), PipelineState::new()).await.unwrap();
        assert_eq!(outcome, TaskOutcome::Advanced(snapshot));
    }

    #[tokio::test]
    async fn load_converges_once_the_snapshot_is_in_the_state() {
        let store = Arc::new(MemoryStore::new());
        let mut snapshot = PipelineState::new();
        snapshot.insert(keys::CLOUD_LIST, &json!([{"songId": 1}])).unwrap();
        store.seed("state.json", &snapshot.to_vec_pretty().unwrap());

        let task = LoadState::new(store, "state.json");
        let outcome = task.start(&ctx(), PipelineState::new()).await.unwrap();
        let TaskOutcome::Advanced(loaded) = outcome else {
            panic!("expected advance");
        };

        // Post-action convergence: an immediate re-check passes.
        assert_eq!(task.check(&loaded).await.unwrap(), CheckReport::Converged);
    }

    #[tokio::test]
    async fn save_writes_then_converges_on_rerun() {
        let store = Arc::new(MemoryStore::new());
        let task = SaveState::new(Arc::clone(&store) as Arc<dyn FileStore>, "state.json");

        let mut state = PipelineState::new();
        state.insert("playlists", &json!([])).unwrap();

        let outcome = task.start(&ctx(), state).await.unwrap();
        let TaskOutcome::Advanced(saved) = outcome else {
            panic!("expected advance");
        };
        assert!(saved.contains(keys::SAVED_AT));
        assert!(store.contents("state.json").is_some());

        // Post-action convergence: an immediate re-check passes.
        assert_eq!(task.check(&saved).await.unwrap(), CheckReport::Converged);
    }
}
