//! Workspace cache and durable storage.
//!
//! The [`WorkspaceDataCache`] holds definitions in memory for trigger-driven
//! runs. The [`DurableStore`] keeps what must outlive a process: run
//! transcripts, metadata records and workflow bodies.

use crate::definition::{WorkflowDefinition, WorkspaceDefinition};
use crate::error::StoreError;
use crate::run::RunStatus;
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use rootcause::Report;
use serde::{Deserialize, Serialize};
use serde_json::Value as JsonValue;
use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex, PoisonError};
use taskloom_core::{RunId, WorkflowId, WorkspaceId};
use tokio::io::AsyncWriteExt;
use tokio::sync::RwLock;

/// Reserved metadata key for the last run's record.
pub const RUN_METADATA_KEY: &str = "__taskloom_run_metadata__";

/// Version of the [`RunMetadata`] record layout.
pub const RUN_METADATA_VERSION: u32 = 1;

/// Record stored under [`RUN_METADATA_KEY`] when a run finishes.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RunMetadata {
    /// Record layout version.
    pub version: u32,
    /// When the run finished.
    pub completed_at: DateTime<Utc>,
    /// The run.
    pub run_id: RunId,
    /// How it ended.
    pub status: RunStatus,
}

impl RunMetadata {
    /// Creates a record stamped with the current time.
    #[must_use]
    pub fn new(run_id: RunId, status: RunStatus) -> Self {
        Self {
            version: RUN_METADATA_VERSION,
            completed_at: Utc::now(),
            run_id,
            status,
        }
    }
}

/// In-memory map of workspace definitions, shared process-wide.
#[derive(Debug, Default)]
pub struct WorkspaceDataCache {
    workspaces: RwLock<HashMap<WorkspaceId, Arc<WorkspaceDefinition>>>,
}

impl WorkspaceDataCache {
    /// Creates an empty cache.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Stores a definition, returning the one it replaced.
    pub async fn insert(&self, workspace: WorkspaceDefinition) -> Option<Arc<WorkspaceDefinition>> {
        self.workspaces
            .write()
            .await
            .insert(workspace.id.clone(), Arc::new(workspace))
    }

    /// Returns a definition.
    pub async fn get(&self, workspace_id: &WorkspaceId) -> Option<Arc<WorkspaceDefinition>> {
        self.workspaces.read().await.get(workspace_id).cloned()
    }

    /// Removes a definition.
    pub async fn remove(&self, workspace_id: &WorkspaceId) -> Option<Arc<WorkspaceDefinition>> {
        self.workspaces.write().await.remove(workspace_id)
    }

    /// Returns true if the workspace is cached.
    pub async fn contains(&self, workspace_id: &WorkspaceId) -> bool {
        self.workspaces.read().await.contains_key(workspace_id)
    }

    /// Returns a workflow with its body, if the cached workspace carries one.
    pub async fn workflow_body(
        &self,
        workspace_id: &WorkspaceId,
        workflow_id: &WorkflowId,
    ) -> Option<WorkflowDefinition> {
        let workspaces = self.workspaces.read().await;
        workspaces
            .get(workspace_id)?
            .workflow(workflow_id)
            .filter(|workflow| workflow.body.is_some())
            .cloned()
    }
}

/// Persistence for what outlives a run.
#[async_trait]
pub trait DurableStore: Send + Sync {
    /// Appends a rendered transcript to the workspace's history.
    ///
    /// # Errors
    ///
    /// Returns an error if the write fails.
    async fn append_transcript(
        &self,
        workspace_id: &WorkspaceId,
        transcript: &str,
    ) -> Result<(), Report<StoreError>>;

    /// Stores a metadata record under `key`, replacing any previous value.
    ///
    /// # Errors
    ///
    /// Returns an error if the write fails.
    async fn put_metadata(
        &self,
        workspace_id: &WorkspaceId,
        key: &str,
        value: &JsonValue,
    ) -> Result<(), Report<StoreError>>;

    /// Reads a metadata record.
    ///
    /// # Errors
    ///
    /// Returns an error if the read fails.
    async fn get_metadata(
        &self,
        workspace_id: &WorkspaceId,
        key: &str,
    ) -> Result<Option<JsonValue>, Report<StoreError>>;

    /// Stores a workflow body.
    ///
    /// # Errors
    ///
    /// Returns an error if the write fails.
    async fn save_workflow(
        &self,
        workspace_id: &WorkspaceId,
        workflow: &WorkflowDefinition,
    ) -> Result<(), Report<StoreError>>;

    /// Loads a workflow body stored by [`DurableStore::save_workflow`].
    ///
    /// # Errors
    ///
    /// Returns an error if the read fails.
    async fn load_workflow(
        &self,
        workspace_id: &WorkspaceId,
        workflow_id: &WorkflowId,
    ) -> Result<Option<WorkflowDefinition>, Report<StoreError>>;
}

/// Store that lays data out under a directory:
///
/// ```text
/// {root}/{workspace}/transcript.log
/// {root}/{workspace}/metadata.json
/// {root}/{workspace}/workflows/{workflow}.json
/// ```
#[derive(Debug, Clone)]
pub struct FsStore {
    root: PathBuf,
    // Serializes metadata read-modify-write cycles.
    metadata_lock: Arc<tokio::sync::Mutex<()>>,
}

impl FsStore {
    /// Creates a store rooted at `root`. Directories are created on demand.
    #[must_use]
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self {
            root: root.into(),
            metadata_lock: Arc::new(tokio::sync::Mutex::new(())),
        }
    }

    /// Returns the root directory.
    #[must_use]
    pub fn root(&self) -> &Path {
        &self.root
    }

    fn workspace_dir(&self, workspace_id: &WorkspaceId) -> Result<PathBuf, Report<StoreError>> {
        Ok(self.root.join(path_component(workspace_id.as_str())?))
    }

    fn workflow_path(
        &self,
        workspace_id: &WorkspaceId,
        workflow_id: &WorkflowId,
    ) -> Result<PathBuf, Report<StoreError>> {
        let file = format!("{}.json", path_component(workflow_id.as_str())?);
        Ok(self.workspace_dir(workspace_id)?.join("workflows").join(file))
    }

    async fn read_metadata(path: &Path) -> Result<serde_json::Map<String, JsonValue>, Report<StoreError>> {
        match tokio::fs::read(path).await {
            Ok(bytes) => Ok(serde_json::from_slice(&bytes).map_err(|e| {
                StoreError::Serialization {
                    reason: e.to_string(),
                }
            })?),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(serde_json::Map::new()),
            Err(e) => Err(io_error(path, &e).into()),
        }
    }
}

fn path_component(key: &str) -> Result<&str, Report<StoreError>> {
    let unsafe_key = key == "."
        || key == ".."
        || key.contains(['/', '\\', '\0']);
    if unsafe_key {
        return Err(StoreError::InvalidKey {
            key: key.to_string(),
        }
        .into());
    }
    Ok(key)
}

fn io_error(path: &Path, error: &std::io::Error) -> StoreError {
    StoreError::Io {
        path: path.display().to_string(),
        reason: error.to_string(),
    }
}

async fn ensure_dir(path: &Path) -> Result<(), Report<StoreError>> {
    tokio::fs::create_dir_all(path)
        .await
        .map_err(|e| io_error(path, &e))?;
    Ok(())
}

#[async_trait]
impl DurableStore for FsStore {
    async fn append_transcript(
        &self,
        workspace_id: &WorkspaceId,
        transcript: &str,
    ) -> Result<(), Report<StoreError>> {
        let dir = self.workspace_dir(workspace_id)?;
        ensure_dir(&dir).await?;

        let path = dir.join("transcript.log");
        let mut file = tokio::fs::OpenOptions::new()
            .create(true)
            .append(true)
            .open(&path)
            .await
            .map_err(|e| io_error(&path, &e))?;

        let mut entry = transcript.to_string();
        if !entry.ends_with('\n') {
            entry.push('\n');
        }
        entry.push('\n');

        file.write_all(entry.as_bytes())
            .await
            .map_err(|e| io_error(&path, &e))?;
        file.flush().await.map_err(|e| io_error(&path, &e))?;
        Ok(())
    }

    async fn put_metadata(
        &self,
        workspace_id: &WorkspaceId,
        key: &str,
        value: &JsonValue,
    ) -> Result<(), Report<StoreError>> {
        let dir = self.workspace_dir(workspace_id)?;
        ensure_dir(&dir).await?;
        let path = dir.join("metadata.json");

        let _guard = self.metadata_lock.lock().await;
        let mut records = Self::read_metadata(&path).await?;
        records.insert(key.to_string(), value.clone());

        let bytes = serde_json::to_vec_pretty(&records).map_err(|e| StoreError::Serialization {
            reason: e.to_string(),
        })?;
        tokio::fs::write(&path, bytes)
            .await
            .map_err(|e| io_error(&path, &e))?;
        Ok(())
    }

    async fn get_metadata(
        &self,
        workspace_id: &WorkspaceId,
        key: &str,
    ) -> Result<Option<JsonValue>, Report<StoreError>> {
        let path = self.workspace_dir(workspace_id)?.join("metadata.json");
        let _guard = self.metadata_lock.lock().await;
        Ok(Self::read_metadata(&path).await?.remove(key))
    }

    async fn save_workflow(
        &self,
        workspace_id: &WorkspaceId,
        workflow: &WorkflowDefinition,
    ) -> Result<(), Report<StoreError>> {
        let path = self.workflow_path(workspace_id, &workflow.id)?;
        if let Some(parent) = path.parent() {
            ensure_dir(parent).await?;
        }

        let bytes = serde_json::to_vec_pretty(workflow).map_err(|e| StoreError::Serialization {
            reason: e.to_string(),
        })?;
        tokio::fs::write(&path, bytes)
            .await
            .map_err(|e| io_error(&path, &e))?;
        Ok(())
    }

    async fn load_workflow(
        &self,
        workspace_id: &WorkspaceId,
        workflow_id: &WorkflowId,
    ) -> Result<Option<WorkflowDefinition>, Report<StoreError>> {
        let path = self.workflow_path(workspace_id, workflow_id)?;
        let bytes = match tokio::fs::read(&path).await {
            Ok(bytes) => bytes,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(None),
            Err(e) => return Err(io_error(&path, &e).into()),
        };

        let workflow = serde_json::from_slice(&bytes).map_err(|e| StoreError::Serialization {
            reason: e.to_string(),
        })?;
        Ok(Some(workflow))
    }
}

/// Store kept entirely in memory. Nothing survives a restart.
#[derive(Debug, Default)]
pub struct MemoryStore {
    transcripts: Mutex<HashMap<WorkspaceId, Vec<String>>>,
    metadata: Mutex<HashMap<(WorkspaceId, String), JsonValue>>,
    workflows: Mutex<HashMap<(WorkspaceId, WorkflowId), WorkflowDefinition>>,
}

impl MemoryStore {
    /// Creates an empty store.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Returns every transcript written for a workspace, oldest first.
    #[must_use]
    pub fn transcripts(&self, workspace_id: &WorkspaceId) -> Vec<String> {
        self.transcripts
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .get(workspace_id)
            .cloned()
            .unwrap_or_default()
    }
}

#[async_trait]
impl DurableStore for MemoryStore {
    async fn append_transcript(
        &self,
        workspace_id: &WorkspaceId,
        transcript: &str,
    ) -> Result<(), Report<StoreError>> {
        self.transcripts
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .entry(workspace_id.clone())
            .or_default()
            .push(transcript.to_string());
        Ok(())
    }

    async fn put_metadata(
        &self,
        workspace_id: &WorkspaceId,
        key: &str,
        value: &JsonValue,
    ) -> Result<(), Report<StoreError>> {
        self.metadata
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .insert((workspace_id.clone(), key.to_string()), value.clone());
        Ok(())
    }

    async fn get_metadata(
        &self,
        workspace_id: &WorkspaceId,
        key: &str,
    ) -> Result<Option<JsonValue>, Report<StoreError>> {
        Ok(self
            .metadata
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .get(&(workspace_id.clone(), key.to_string()))
            .cloned())
    }

    async fn save_workflow(
        &self,
        workspace_id: &WorkspaceId,
        workflow: &WorkflowDefinition,
    ) -> Result<(), Report<StoreError>> {
        self.workflows
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .insert((workspace_id.clone(), workflow.id.clone()), workflow.clone());
        Ok(())
    }

    async fn load_workflow(
        &self,
        workspace_id: &WorkspaceId,
        workflow_id: &WorkflowId,
    ) -> Result<Option<WorkflowDefinition>, Report<StoreError>> {
        Ok(self
            .workflows
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .get(&(workspace_id.clone(), workflow_id.clone()))
            .cloned())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn workspace_id(value: &str) -> WorkspaceId {
        WorkspaceId::new(value).expect("valid workspace id")
    }

    fn workflow(id: &str) -> WorkflowDefinition {
        WorkflowDefinition {
            id: WorkflowId::new(id).expect("valid workflow id"),
            name: id.to_string(),
            description: None,
            body: Some(serde_json::json!({"nodes": []})),
        }
    }

    #[tokio::test]
    async fn cache_replaces_on_insert() {
        let cache = WorkspaceDataCache::new();
        let id = workspace_id("ws");

        assert!(cache.insert(WorkspaceDefinition::new(id.clone(), "one")).await.is_none());
        let previous = cache
            .insert(WorkspaceDefinition::new(id.clone(), "two"))
            .await
            .expect("replaced");

        assert_eq!(previous.name, "one");
        assert_eq!(cache.get(&id).await.expect("cached").name, "two");
    }

    #[tokio::test]
    async fn cache_only_returns_workflows_with_bodies() {
        let cache = WorkspaceDataCache::new();
        let id = workspace_id("ws");
        let mut by_reference = workflow("ref-only");
        by_reference.body = None;

        cache
            .insert(
                WorkspaceDefinition::new(id.clone(), "ws")
                    .with_workflow(workflow("inline"))
                    .with_workflow(by_reference),
            )
            .await;

        let inline = WorkflowId::new("inline").expect("valid");
        let reference = WorkflowId::new("ref-only").expect("valid");
        assert!(cache.workflow_body(&id, &inline).await.is_some());
        assert!(cache.workflow_body(&id, &reference).await.is_none());
    }

    #[tokio::test]
    async fn fs_store_appends_transcripts() {
        let dir = tempfile::tempdir().expect("temp dir");
        let store = FsStore::new(dir.path());
        let id = workspace_id("ws-1");

        store.append_transcript(&id, "first run").await.expect("append");
        store.append_transcript(&id, "second run\n").await.expect("append");

        let text = tokio::fs::read_to_string(dir.path().join("ws-1").join("transcript.log"))
            .await
            .expect("transcript written");
        assert_eq!(text, "first run\n\nsecond run\n\n");
    }

    #[tokio::test]
    async fn fs_store_metadata_replaces_per_key() {
        let dir = tempfile::tempdir().expect("temp dir");
        let store = FsStore::new(dir.path());
        let id = workspace_id("ws");

        store
            .put_metadata(&id, RUN_METADATA_KEY, &serde_json::json!({"version": 1}))
            .await
            .expect("put");
        store
            .put_metadata(&id, "other", &serde_json::json!(true))
            .await
            .expect("put");
        store
            .put_metadata(&id, RUN_METADATA_KEY, &serde_json::json!({"version": 2}))
            .await
            .expect("put");

        let record = store
            .get_metadata(&id, RUN_METADATA_KEY)
            .await
            .expect("get")
            .expect("present");
        assert_eq!(record["version"], 2);
        assert_eq!(
            store.get_metadata(&id, "other").await.expect("get"),
            Some(serde_json::json!(true))
        );
        assert_eq!(store.get_metadata(&id, "missing").await.expect("get"), None);
    }

    #[tokio::test]
    async fn fs_store_workflow_roundtrip() {
        let dir = tempfile::tempdir().expect("temp dir");
        let store = FsStore::new(dir.path());
        let id = workspace_id("ws");

        store.save_workflow(&id, &workflow("wf-1")).await.expect("save");

        let loaded = store
            .load_workflow(&id, &WorkflowId::new("wf-1").expect("valid"))
            .await
            .expect("load")
            .expect("present");
        assert_eq!(loaded, workflow("wf-1"));

        let missing = store
            .load_workflow(&id, &WorkflowId::new("nope").expect("valid"))
            .await
            .expect("load");
        assert!(missing.is_none());
    }

    #[tokio::test]
    async fn fs_store_rejects_path_traversal() {
        let dir = tempfile::tempdir().expect("temp dir");
        let store = FsStore::new(dir.path());

        let err = store
            .append_transcript(&workspace_id("../escape"), "x")
            .await
            .unwrap_err();
        assert!(matches!(err.current_context(), StoreError::InvalidKey { .. }));
    }

    #[test]
    fn run_metadata_wire_format() {
        let record = RunMetadata::new(RunId::new(), RunStatus::Completed);
        let json = serde_json::to_value(&record).expect("serialize");
        assert_eq!(json["version"], RUN_METADATA_VERSION);
        assert_eq!(json["status"], "completed");
        assert!(json["completedAt"].is_string());
        assert!(json["runId"].as_str().is_some_and(|id| id.starts_with("run_")));
    }
}
