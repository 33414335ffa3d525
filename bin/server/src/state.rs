//! Shared application state and bootstrap wiring.

use crate::config::ServerConfig;
use crate::error::InboundError;
use crate::inbound::{TriggerKind, TriggerSettings};
use rootcause::Report;
use serde::Serialize;
use serde_json::{Value as JsonValue, json};
use std::sync::Arc;
use taskloom_ai::LlmBackend;
use taskloom_core::WorkspaceId;
use taskloom_engine::{
    Broadcaster, DurableStore, HeadlessRunner, Orchestrator, PlanAgentRuntime, PromptBroker,
    ToolInvoker, WorkflowExecutor, WorkspaceDataCache, WorkspaceDefinition, WorkspaceExecutor,
};
use taskloom_trigger::{
    DispatchQueue, RegistrationOutcome, ScheduledTriggerManager, TelegramClient,
    TelegramTriggerManager, TriggerManager, WebhookTriggerManager,
};
use tracing::{info, warn};

/// External collaborators the state is built around.
pub struct Collaborators {
    /// Language model for assignment, planning and agent reasoning.
    pub llm: Arc<dyn LlmBackend>,
    /// Evaluator used by headless runs.
    pub workflows: Arc<dyn WorkflowExecutor>,
    /// External tool bridge.
    pub tools: Arc<dyn ToolInvoker>,
    /// Transcript and metadata storage.
    pub store: Arc<dyn DurableStore>,
    /// Telegram Bot API client.
    pub telegram: TelegramClient,
}

/// Shared application state.
pub struct AppState {
    /// Loaded workspace definitions.
    pub cache: Arc<WorkspaceDataCache>,
    /// Durable storage.
    pub store: Arc<dyn DurableStore>,
    /// Fan-out of headless run traffic.
    pub broadcaster: Broadcaster,
    /// Runs workspaces.
    pub orchestrator: Arc<Orchestrator>,
    /// Pending interactive prompts.
    pub prompts: Arc<PromptBroker>,
    /// Cron triggers.
    pub scheduled: Arc<ScheduledTriggerManager>,
    /// Webhook triggers.
    pub webhooks: Arc<WebhookTriggerManager>,
    /// Telegram triggers.
    pub telegram: Arc<TelegramTriggerManager>,
}

impl AppState {
    /// Wires the engine, the trigger managers and their queues.
    ///
    /// Must be called inside a tokio runtime: each queue worker is spawned here.
    #[must_use]
    pub fn new(config: &ServerConfig, collaborators: Collaborators) -> Self {
        let Collaborators {
            llm,
            workflows,
            tools,
            store,
            telegram,
        } = collaborators;

        let cache = Arc::new(WorkspaceDataCache::new());
        let broadcaster = Broadcaster::default();
        let prompts = Arc::new(PromptBroker::new());
        let agents = Arc::new(
            PlanAgentRuntime::new(Arc::clone(&llm), Arc::clone(&tools), Arc::clone(&prompts))
                .with_prompt_timeout(config.orchestrator.prompt_timeout()),
        );
        let orchestrator = Arc::new(
            Orchestrator::new(llm, agents, tools, Arc::clone(&store))
                .with_config(config.orchestrator.orchestrator_config()),
        );
        let executor: Arc<dyn WorkspaceExecutor> = Arc::new(HeadlessRunner::new(
            Arc::clone(&orchestrator),
            Arc::clone(&cache),
            Arc::clone(&store),
            workflows,
            broadcaster.clone(),
        ));

        let (scheduled_queue, scheduled_worker) = DispatchQueue::channel("scheduled");
        let scheduled = Arc::new(ScheduledTriggerManager::new(
            Arc::clone(&cache),
            Arc::clone(&executor),
            scheduled_queue,
        ));
        scheduled_worker.spawn(scheduled.clone());

        let (webhook_queue, webhook_worker) = DispatchQueue::channel("webhook");
        let webhooks = Arc::new(WebhookTriggerManager::new(
            Arc::clone(&cache),
            Arc::clone(&executor),
            webhook_queue,
            &config.public_base_url,
        ));
        webhook_worker.spawn(webhooks.clone());

        let (telegram_queue, telegram_worker) = DispatchQueue::channel("telegram");
        let telegram = Arc::new(TelegramTriggerManager::new(
            telegram,
            Arc::clone(&cache),
            executor,
            telegram_queue,
            &config.public_base_url,
        ));
        telegram_worker.spawn(telegram.clone());

        Self {
            cache,
            store,
            broadcaster,
            orchestrator,
            prompts,
            scheduled,
            webhooks,
            telegram,
        }
    }

    /// Caches a workspace and persists its workflow bodies so headless runs
    /// can resolve them later.
    pub async fn load_workspace(&self, workspace: WorkspaceDefinition) {
        for workflow in workspace.workflows.iter().filter(|w| w.body.is_some()) {
            if let Err(report) = self.store.save_workflow(&workspace.id, workflow).await {
                warn!(
                    workspace_id = %workspace.id,
                    workflow_id = %workflow.id,
                    error = %report.current_context(),
                    "could not persist workflow body"
                );
            }
        }
        info!(workspace_id = %workspace.id, "workspace loaded");
        self.cache.insert(workspace).await;
    }

    /// Registers a trigger and returns the `trigger_registered` body.
    ///
    /// # Errors
    ///
    /// Returns an error if the workspace is unknown or the manager refuses.
    pub async fn register_trigger(
        &self,
        workspace_id: &WorkspaceId,
        settings: TriggerSettings,
    ) -> Result<JsonValue, Report<InboundError>> {
        if !self.cache.contains(workspace_id).await {
            return Err(InboundError::UnknownWorkspace {
                workspace_id: workspace_id.clone(),
            }
            .into());
        }
        let kind = settings.kind();
        let body = match settings {
            TriggerSettings::Scheduled(config) => {
                registered(self.scheduled.register(workspace_id, config).await)
            }
            TriggerSettings::Webhook(config) => {
                registered(self.webhooks.register(workspace_id, config).await)
            }
            TriggerSettings::Telegram(config) => {
                registered(self.telegram.register(workspace_id, config).await)
            }
        }?;
        Ok(with_trigger(body, workspace_id, kind))
    }

    /// Removes a trigger and returns the `trigger_unregistered` body.
    pub async fn unregister_trigger(&self, workspace_id: &WorkspaceId, kind: TriggerKind) -> JsonValue {
        let removed = match kind {
            TriggerKind::Scheduled => self.scheduled.unregister(workspace_id).await,
            TriggerKind::Webhook => self.webhooks.unregister(workspace_id).await,
            TriggerKind::Telegram => self.telegram.unregister(workspace_id).await,
        };
        with_trigger(json!({ "removed": removed }), workspace_id, kind)
    }
}

fn registered<T: Serialize>(
    outcome: RegistrationOutcome<T>,
) -> Result<JsonValue, Report<InboundError>> {
    if !outcome.success {
        return Err(InboundError::RegistrationFailed {
            reason: outcome.error.unwrap_or_default(),
        }
        .into());
    }
    serde_json::to_value(&outcome).map_err(|e| {
        InboundError::RegistrationFailed {
            reason: e.to_string(),
        }
        .into()
    })
}

fn with_trigger(mut body: JsonValue, workspace_id: &WorkspaceId, kind: TriggerKind) -> JsonValue {
    if let Some(object) = body.as_object_mut() {
        object.insert("workspaceId".to_string(), json!(workspace_id));
        object.insert("triggerType".to_string(), json!(kind.as_str()));
    }
    body
}


#[cfg(test)]
mod tests {
    use super::testing::{state, workspace};
    use super::*;
    use taskloom_trigger::{ScheduledConfig, WebhookConfig};

    fn id(value: &str) -> WorkspaceId {
        WorkspaceId::new(value).expect("valid")
    }

    #[tokio::test]
    async fn registration_requires_a_loaded_workspace() {
        let state = state("http://127.0.0.1:1");

        let err = state
            .register_trigger(&id("ws"), TriggerSettings::Webhook(WebhookConfig::default()))
            .await
            .unwrap_err();
        assert_eq!(
            err.current_context(),
            &InboundError::UnknownWorkspace {
                workspace_id: id("ws")
            }
        );

        state.load_workspace(workspace("ws")).await;
        let body = state
            .register_trigger(&id("ws"), TriggerSettings::Webhook(WebhookConfig::default()))
            .await
            .expect("registered");
        assert_eq!(body["success"], true);
        assert_eq!(body["triggerType"], "webhook");
        assert_eq!(body["workspaceId"], "ws");
        assert_eq!(body["webhookUrl"], "https://loom.example/api/webhooks/ws");
    }

    #[tokio::test]
    async fn manager_refusals_become_registration_failures() {
        let state = state("http://127.0.0.1:1");
        state.load_workspace(workspace("ws")).await;

        let err = state
            .register_trigger(
                &id("ws"),
                TriggerSettings::Scheduled(ScheduledConfig {
                    cron_expression: "61 * * * *".to_string(),
                    timezone: "UTC".to_string(),
                }),
            )
            .await
            .unwrap_err();

        assert!(matches!(
            err.current_context(),
            InboundError::RegistrationFailed { .. }
        ));
    }

    #[tokio::test]
    async fn unregister_reports_whether_anything_was_removed() {
        let state = state("http://127.0.0.1:1");
        state.load_workspace(workspace("ws")).await;
        state
            .register_trigger(&id("ws"), TriggerSettings::Webhook(WebhookConfig::default()))
            .await
            .expect("registered");

        let body = state.unregister_trigger(&id("ws"), TriggerKind::Webhook).await;
        assert_eq!(body["removed"], true);
        let body = state.unregister_trigger(&id("ws"), TriggerKind::Webhook).await;
        assert_eq!(body["removed"], false);
    }
}
