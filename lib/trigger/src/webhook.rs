//! Inbound webhook triggers.

use crate::error::{QueueError, RegistrationError};
use crate::queue::{DispatchQueue, Job, JobProcessor};
use crate::registration::{
    RegistrationOutcome, RegistrationStore, TriggerManager, require_workspace,
};
use crate::secret::{generate_secret, secrets_match};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use rootcause::Report;
use serde::{Deserialize, Serialize};
use serde_json::Value as JsonValue;
use std::sync::Arc;
use taskloom_core::{JobId, WorkspaceId};
use taskloom_engine::{
    ExecutionError, TriggerInput, TriggerSource, WorkspaceDataCache, WorkspaceExecutor,
};
use tracing::{info, instrument, warn};

/// Header carrying the webhook secret.
pub const SECRET_HEADER: &str = "x-webhook-secret";

/// Settings for a webhook trigger. Webhooks have none today.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct WebhookConfig {}

/// Details returned for a webhook registration.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct WebhookInfo {
    /// Where callers post payloads.
    pub webhook_url: String,
    /// Secret callers must present.
    pub secret: String,
}

/// A registered webhook.
#[derive(Debug, Clone)]
pub struct WebhookRegistration {
    /// Secret callers must present.
    pub secret: String,
    /// Public URL of the endpoint.
    pub webhook_url: String,
    /// When the trigger was registered.
    pub registered_at: DateTime<Utc>,
}

/// Manages webhook secrets per workspace.
pub struct WebhookTriggerManager {
    registrations: RegistrationStore<WebhookRegistration>,
    cache: Arc<WorkspaceDataCache>,
    executor: Arc<dyn WorkspaceExecutor>,
    queue: DispatchQueue,
    public_base_url: String,
}

impl WebhookTriggerManager {
    /// Creates a manager whose endpoints live under `public_base_url`.
    #[must_use]
    pub fn new(
        cache: Arc<WorkspaceDataCache>,
        executor: Arc<dyn WorkspaceExecutor>,
        queue: DispatchQueue,
        public_base_url: impl Into<String>,
    ) -> Self {
        Self {
            registrations: RegistrationStore::new(),
            cache,
            executor,
            queue,
            public_base_url: public_base_url.into().trim_end_matches('/').to_string(),
        }
    }

    /// Returns the endpoint URL for `workspace_id`.
    #[must_use]
    pub fn webhook_url(&self, workspace_id: &WorkspaceId) -> String {
        format!("{}/api/webhooks/{workspace_id}", self.public_base_url)
    }

    /// Returns the registration if `secret` matches it.
    pub async fn validate(
        &self,
        workspace_id: &WorkspaceId,
        secret: Option<&str>,
    ) -> Option<WebhookRegistration> {
        let provided = secret?;
        self.registrations
            .get(workspace_id)
            .await
            .filter(|registration| secrets_match(&registration.secret, provided))
    }

    /// Queues a run with the raw request payload.
    ///
    /// # Errors
    ///
    /// Returns an error if the queue has stopped.
    pub fn accept(
        &self,
        workspace_id: &WorkspaceId,
        payload: JsonValue,
    ) -> Result<JobId, Report<QueueError>> {
        let input = TriggerInput::new(TriggerSource::Webhook).with_payload(payload);
        self.queue.enqueue(Job::new(workspace_id.clone(), input))
    }

    /// Runs a job immediately, bypassing the queue.
    ///
    /// # Errors
    ///
    /// Returns an error if the run fails to start.
    pub async fn direct_execute(&self, job: Job) -> Result<(), Report<ExecutionError>> {
        let summary = self.executor.execute(&job.workspace_id, job.input).await?;
        info!(
            workspace_id = %job.workspace_id,
            run_id = %summary.run_id,
            status = %summary.status,
            "webhook run finished"
        );
        Ok(())
    }

    async fn try_register(
        &self,
        workspace_id: &WorkspaceId,
    ) -> Result<WebhookInfo, Report<RegistrationError>> {
        require_workspace(&self.cache, workspace_id).await?;
        let secret = generate_secret()?;
        let webhook_url = self.webhook_url(workspace_id);
        self.registrations
            .insert(
                workspace_id.clone(),
                WebhookRegistration {
                    secret: secret.clone(),
                    webhook_url: webhook_url.clone(),
                    registered_at: Utc::now(),
                },
            )
            .await;
        Ok(WebhookInfo {
            webhook_url,
            secret,
        })
    }
}

#[async_trait]
impl TriggerManager for WebhookTriggerManager {
    type Config = WebhookConfig;
    type Info = WebhookInfo;

    #[instrument(skip_all, fields(workspace_id = %workspace_id))]
    async fn register(
        &self,
        workspace_id: &WorkspaceId,
        _config: WebhookConfig,
    ) -> RegistrationOutcome<WebhookInfo> {
        let result = self.try_register(workspace_id).await;
        match &result {
            Ok(info) => info!(url = %info.webhook_url, "webhook trigger registered"),
            Err(report) => warn!(error = %report.current_context(), "webhook registration failed"),
        }
        result.into()
    }

    #[instrument(skip_all, fields(workspace_id = %workspace_id))]
    async fn unregister(&self, workspace_id: &WorkspaceId) -> bool {
        let removed = self.registrations.remove(workspace_id).await.is_some();
        if removed {
            info!("webhook trigger unregistered");
        }
        removed
    }
}

#[async_trait]
impl JobProcessor for WebhookTriggerManager {
    async fn process(&self, job: Job) -> Result<(), Report<ExecutionError>> {
        self.direct_execute(job).await
    }
}
