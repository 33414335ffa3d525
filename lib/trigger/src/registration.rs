//! Registration bookkeeping shared by all trigger kinds.

use crate::error::RegistrationError;
use async_trait::async_trait;
use rootcause::Report;
use serde::Serialize;
use serde::de::DeserializeOwned;
use std::collections::HashMap;
use taskloom_core::WorkspaceId;
use taskloom_engine::WorkspaceDataCache;
use tokio::sync::RwLock;

/// Registrations of one trigger kind, at most one per workspace.
#[derive(Debug)]
pub struct RegistrationStore<R> {
    entries: RwLock<HashMap<WorkspaceId, R>>,
}

impl<R: Clone> RegistrationStore<R> {
    /// Creates an empty store.
    #[must_use]
    pub fn new() -> Self {
        Self {
            entries: RwLock::new(HashMap::new()),
        }
    }

    /// Stores `registration`, returning the one it replaced.
    pub async fn insert(&self, workspace_id: WorkspaceId, registration: R) -> Option<R> {
        self.entries.write().await.insert(workspace_id, registration)
    }

    /// Removes and returns the registration for `workspace_id`.
    pub async fn remove(&self, workspace_id: &WorkspaceId) -> Option<R> {
        self.entries.write().await.remove(workspace_id)
    }

    /// Returns a copy of the registration for `workspace_id`.
    pub async fn get(&self, workspace_id: &WorkspaceId) -> Option<R> {
        self.entries.read().await.get(workspace_id).cloned()
    }

    /// Returns the number of registered workspaces.
    pub async fn len(&self) -> usize {
        self.entries.read().await.len()
    }

    /// Returns true if nothing is registered.
    pub async fn is_empty(&self) -> bool {
        self.entries.read().await.is_empty()
    }
}

impl<R: Clone> Default for RegistrationStore<R> {
    fn default() -> Self {
        Self::new()
    }
}

/// Answer to a registration request.
///
/// Serializes as `{success, error?, ...info}`.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct RegistrationOutcome<T> {
    /// Whether the trigger is now registered.
    pub success: bool,
    /// Why registration failed.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    /// Kind-specific details of a successful registration.
    #[serde(flatten)]
    pub info: Option<T>,
}

impl<T> RegistrationOutcome<T> {
    /// A successful registration.
    #[must_use]
    pub fn succeeded(info: T) -> Self {
        Self {
            success: true,
            error: None,
            info: Some(info),
        }
    }

    /// A failed registration.
    #[must_use]
    pub fn failed(error: impl Into<String>) -> Self {
        Self {
            success: false,
            error: Some(error.into()),
            info: None,
        }
    }
}

impl<T> From<Result<T, Report<RegistrationError>>> for RegistrationOutcome<T> {
    fn from(result: Result<T, Report<RegistrationError>>) -> Self {
        match result {
            Ok(info) => Self::succeeded(info),
            Err(report) => Self::failed(report.current_context().to_string()),
        }
    }
}

/// Registration surface of a trigger manager.
#[async_trait]
pub trait TriggerManager: Send + Sync {
    /// Kind-specific registration settings.
    type Config: DeserializeOwned + Send + 'static;
    /// Kind-specific details returned on success.
    type Info: Serialize + Send + 'static;

    /// Registers the trigger for `workspace_id`, replacing any previous one.
    ///
    /// Failures are reported in the outcome, never returned as errors.
    async fn register(
        &self,
        workspace_id: &WorkspaceId,
        config: Self::Config,
    ) -> RegistrationOutcome<Self::Info>;

    /// Removes the trigger. Returns false if none was registered.
    async fn unregister(&self, workspace_id: &WorkspaceId) -> bool;
}

/// Fails unless the workspace definition is cached.
pub(crate) async fn require_workspace(
    cache: &WorkspaceDataCache,
    workspace_id: &WorkspaceId,
) -> Result<(), Report<RegistrationError>> {
    if cache.contains(workspace_id).await {
        Ok(())
    } else {
        Err(RegistrationError::UnknownWorkspace {
            workspace_id: workspace_id.clone(),
        }
        .into())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[derive(Debug, Clone, PartialEq, Serialize)]
    #[serde(rename_all = "camelCase")]
    struct Info {
        webhook_url: String,
    }

    fn id(value: &str) -> WorkspaceId {
        WorkspaceId::new(value).expect("valid")
    }

    #[tokio::test]
    async fn reregistration_keeps_one_entry() {
        let store = RegistrationStore::new();
        for n in 0..5 {
            store.insert(id("ws"), n).await;
        }

        assert_eq!(store.len().await, 1);
        assert_eq!(store.get(&id("ws")).await, Some(4));
        assert_eq!(store.remove(&id("ws")).await, Some(4));
        assert!(store.is_empty().await);
    }

    #[test]
    fn outcome_flattens_info() {
        let outcome = RegistrationOutcome::succeeded(Info {
            webhook_url: "https://x/api/webhooks/ws".to_string(),
        });
        assert_eq!(
            serde_json::to_value(&outcome).expect("serializable"),
            json!({"success": true, "webhookUrl": "https://x/api/webhooks/ws"})
        );
    }

    #[test]
    fn failure_carries_report_message() {
        let result: Result<Info, Report<RegistrationError>> =
            Err(RegistrationError::UnknownWorkspace {
                workspace_id: id("ws"),
            }
            .into());
        let outcome = RegistrationOutcome::from(result);
        assert_eq!(
            serde_json::to_value(&outcome).expect("serializable"),
            json!({"success": false, "error": "workspace ws is not loaded"})
        );
    }
}
