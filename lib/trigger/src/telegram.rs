//! Telegram bot triggers.
//!
//! Registering a bot points its webhook at
//! `{public_base_url}/api/telegram/{workspace_id}` with a fresh secret token.
//! Inbound updates are checked against that token, filtered, and queued.

pub mod client;
pub mod update;

use crate::error::{QueueError, RegistrationError, TelegramError};
use crate::queue::{DispatchQueue, Job, JobProcessor};
use crate::registration::{
    RegistrationOutcome, RegistrationStore, TriggerManager, require_workspace,
};
use crate::secret::{generate_secret, secrets_match};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use client::{BotInfo, TelegramClient};
use rootcause::Report;
use serde::{Deserialize, Serialize};
use serde_json::Value as JsonValue;
use std::sync::Arc;
use taskloom_core::{JobId, WorkspaceId};
use taskloom_engine::{
    ExecutionError, TriggerInput, TriggerSource, WorkspaceDataCache, WorkspaceExecutor,
};
use tracing::{info, instrument, warn};
use update::{FilterReason, UpdateFilter, UpdateSummary};

/// Header Telegram uses to echo the webhook secret token.
pub const SECRET_TOKEN_HEADER: &str = "x-telegram-bot-api-secret-token";

/// Settings for a Telegram trigger.
#[derive(Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TelegramConfig {
    /// Bot API token from BotFather.
    pub bot_token: String,
    /// Update types the bot receives.
    #[serde(default = "default_allowed_updates")]
    pub allowed_updates: Vec<String>,
    /// Only accept updates from this chat.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub chat_id: Option<i64>,
    /// Only accept updates from chats of this type.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub chat_type: Option<String>,
    /// Send the run's final output back to the chat.
    #[serde(default)]
    pub reply_with_result: bool,
}

fn default_allowed_updates() -> Vec<String> {
    vec!["message".to_string()]
}

impl std::fmt::Debug for TelegramConfig {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TelegramConfig")
            .field("bot_token", &"<redacted>")
            .field("allowed_updates", &self.allowed_updates)
            .field("chat_id", &self.chat_id)
            .field("chat_type", &self.chat_type)
            .field("reply_with_result", &self.reply_with_result)
            .finish()
    }
}

/// Details returned for a Telegram registration.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct TelegramInfo {
    /// Where Telegram delivers updates.
    pub webhook_url: String,
    /// Token Telegram sends back with every update.
    pub secret_token: String,
    /// Identity of the bot.
    pub bot_info: BotInfo,
}

/// A registered bot.
#[derive(Debug, Clone)]
pub struct TelegramRegistration {
    /// Settings as registered.
    pub config: TelegramConfig,
    /// Expected value of [`SECRET_TOKEN_HEADER`].
    pub secret_token: String,
    /// Webhook URL given to Telegram.
    pub webhook_url: String,
    /// Identity returned by `getMe`.
    pub bot_info: BotInfo,
    /// When the trigger was registered.
    pub registered_at: DateTime<Utc>,
}

impl TelegramRegistration {
    fn filter(&self) -> UpdateFilter<'_> {
        UpdateFilter {
            allowed_updates: &self.config.allowed_updates,
            chat_id: self.config.chat_id,
            chat_type: self.config.chat_type.as_deref(),
        }
    }
}

/// What happened to an inbound update.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum UpdateDisposition {
    /// The update was queued as a run.
    Queued(JobId),
    /// The update did not pass the trigger's filters.
    Filtered(FilterReason),
}

/// Manages bot webhooks per workspace.
pub struct TelegramTriggerManager {
    client: TelegramClient,
    registrations: RegistrationStore<TelegramRegistration>,
    cache: Arc<WorkspaceDataCache>,
    executor: Arc<dyn WorkspaceExecutor>,
    queue: DispatchQueue,
    public_base_url: String,
}

impl TelegramTriggerManager {
    /// Creates a manager that registers webhooks under `public_base_url`.
    #[must_use]
    pub fn new(
        client: TelegramClient,
        cache: Arc<WorkspaceDataCache>,
        executor: Arc<dyn WorkspaceExecutor>,
        queue: DispatchQueue,
        public_base_url: impl Into<String>,
    ) -> Self {
        Self {
            client,
            registrations: RegistrationStore::new(),
            cache,
            executor,
            queue,
            public_base_url: public_base_url.into().trim_end_matches('/').to_string(),
        }
    }

    /// Returns the webhook URL for `workspace_id`.
    #[must_use]
    pub fn webhook_url(&self, workspace_id: &WorkspaceId) -> String {
        format!("{}/api/telegram/{workspace_id}", self.public_base_url)
    }

    /// Returns the registration if `secret_token` matches it.
    pub async fn validate(
        &self,
        workspace_id: &WorkspaceId,
        secret_token: Option<&str>,
    ) -> Option<TelegramRegistration> {
        let provided = secret_token?;
        self.registrations
            .get(workspace_id)
            .await
            .filter(|registration| secrets_match(&registration.secret_token, provided))
    }

    /// Filters a validated update and queues it.
    ///
    /// # Errors
    ///
    /// Returns an error if the queue has stopped.
    #[instrument(skip_all, fields(workspace_id = %workspace_id))]
    pub fn accept(
        &self,
        registration: &TelegramRegistration,
        workspace_id: &WorkspaceId,
        update: JsonValue,
    ) -> Result<UpdateDisposition, Report<QueueError>> {
        let checked = UpdateSummary::from_update(&update)
            .ok_or(FilterReason::Malformed)
            .and_then(|summary| registration.filter().check(&summary));
        if let Err(reason) = checked {
            info!(%reason, "telegram update filtered");
            return Ok(UpdateDisposition::Filtered(reason));
        }

        let input = TriggerInput::new(TriggerSource::Telegram).with_payload(update);
        let job_id = self.queue.enqueue(Job::new(workspace_id.clone(), input))?;
        Ok(UpdateDisposition::Queued(job_id))
    }

    /// Runs a job immediately and replies to the chat when configured.
    ///
    /// # Errors
    ///
    /// Returns an error if the run fails to start.
    pub async fn direct_execute(&self, job: Job) -> Result<(), Report<ExecutionError>> {
        let chat_id = job
            .input
            .payload
            .as_ref()
            .and_then(UpdateSummary::from_update)
            .and_then(|summary| summary.chat_id);
        let summary = self.executor.execute(&job.workspace_id, job.input).await?;
        info!(
            workspace_id = %job.workspace_id,
            run_id = %summary.run_id,
            status = %summary.status,
            "telegram run finished"
        );

        let Some(registration) = self.registrations.get(&job.workspace_id).await else {
            return Ok(());
        };
        if !registration.config.reply_with_result {
            return Ok(());
        }
        if let (Some(chat_id), Some(output)) = (chat_id, summary.final_output.as_deref()) {
            if let Err(report) = self
                .client
                .send_message(&registration.config.bot_token, chat_id, output)
                .await
            {
                warn!(
                    workspace_id = %job.workspace_id,
                    chat_id,
                    error = %report.current_context(),
                    "could not send run result to chat"
                );
            }
        }
        Ok(())
    }

    /// Deletes the webhook of a bot this workspace no longer uses.
    async fn release_bot(&self, bot_token: &str) {
        if let Err(report) = self.client.delete_webhook(bot_token).await {
            warn!(error = %report.current_context(), "could not delete previous bot's webhook");
        }
    }

    async fn try_register(
        &self,
        workspace_id: &WorkspaceId,
        config: TelegramConfig,
    ) -> Result<TelegramInfo, Report<RegistrationError>> {
        require_workspace(&self.cache, workspace_id).await?;
        if config.bot_token.trim().is_empty() {
            return Err(RegistrationError::InvalidConfig {
                reason: "botToken is required".to_string(),
            }
            .into());
        }
        if config.allowed_updates.is_empty() {
            return Err(RegistrationError::InvalidConfig {
                reason: "allowedUpdates must not be empty".to_string(),
            }
            .into());
        }

        let provider = |report: Report<TelegramError>| RegistrationError::Provider {
            reason: report.current_context().to_string(),
        };
        let bot_info = self
            .client
            .get_me(&config.bot_token)
            .await
            .map_err(provider)?;

        let previous = self.registrations.get(workspace_id).await;
        if let Some(previous) = previous.as_ref() {
            if previous.config.bot_token != config.bot_token {
                self.release_bot(&previous.config.bot_token).await;
            }
        }
        self.client
            .delete_webhook(&config.bot_token)
            .await
            .map_err(provider)?;

        let secret_token = generate_secret()?;
        let webhook_url = self.webhook_url(workspace_id);
        if let Err(report) = self
            .client
            .set_webhook(
                &config.bot_token,
                &webhook_url,
                &secret_token,
                &config.allowed_updates,
            )
            .await
        {
            // Whatever was registered before no longer has a remote webhook.
            if previous.is_some() {
                self.registrations.remove(workspace_id).await;
            }
            return Err(provider(report).into());
        }

        self.registrations
            .insert(
                workspace_id.clone(),
                TelegramRegistration {
                    config,
                    secret_token: secret_token.clone(),
                    webhook_url: webhook_url.clone(),
                    bot_info: bot_info.clone(),
                    registered_at: Utc::now(),
                },
            )
            .await;

        Ok(TelegramInfo {
            webhook_url,
            secret_token,
            bot_info,
        })
    }
}

#[async_trait]
impl TriggerManager for TelegramTriggerManager {
    type Config = TelegramConfig;
    type Info = TelegramInfo;

    #[instrument(skip_all, fields(workspace_id = %workspace_id))]
    async fn register(
        &self,
        workspace_id: &WorkspaceId,
        config: TelegramConfig,
    ) -> RegistrationOutcome<TelegramInfo> {
        let result = self.try_register(workspace_id, config).await;
        match &result {
            Ok(info) => info!(bot = info.bot_info.id, "telegram trigger registered"),
            Err(report) => warn!(error = %report.current_context(), "telegram registration failed"),
        }
        result.into()
    }

    #[instrument(skip_all, fields(workspace_id = %workspace_id))]
    async fn unregister(&self, workspace_id: &WorkspaceId) -> bool {
        let Some(registration) = self.registrations.remove(workspace_id).await else {
            return false;
        };
        self.release_bot(&registration.config.bot_token).await;
        info!("telegram trigger unregistered");
        true
    }
}

#[async_trait]
impl JobProcessor for TelegramTriggerManager {
    async fn process(&self, job: Job) -> Result<(), Report<ExecutionError>> {
        self.direct_execute(job).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::queue::QueueWorker;
    use mockito::Matcher;
    use serde_json::json;
    use std::sync::Mutex;
    use std::time::Duration;
    use taskloom_engine::{ResultMap, RunStatus, RunSummary, WorkspaceDefinition};

    /// Records runs and answers with a fixed final output.
    #[derive(Default)]
    struct FixedOutput {
        runs: Mutex<Vec<TriggerInput>>,
    }

    #[async_trait]
    impl WorkspaceExecutor for FixedOutput {
        async fn execute(
            &self,
            workspace_id: &WorkspaceId,
            input: TriggerInput,
        ) -> Result<RunSummary, Report<ExecutionError>> {
            self.runs.lock().expect("lock").push(input);
            Ok(RunSummary {
                run_id: taskloom_core::RunId::new(),
                workspace_id: workspace_id.clone(),
                status: RunStatus::Completed,
                results: ResultMap::new(),
                failures: Vec::new(),
                final_output: Some("done".to_string()),
            })
        }
    }

    fn id(value: &str) -> WorkspaceId {
        WorkspaceId::new(value).expect("valid")
    }

    struct Fixture {
        server: mockito::ServerGuard,
        manager: TelegramTriggerManager,
        executor: Arc<FixedOutput>,
        queue: DispatchQueue,
        _worker: QueueWorker,
    }

    async fn fixture() -> Fixture {
        let server = mockito::Server::new_async().await;
        let client = TelegramClient::new(server.url(), Duration::from_secs(5)).expect("client");
        let cache = Arc::new(WorkspaceDataCache::new());
        cache.insert(WorkspaceDefinition::new(id("ws"), "Bot")).await;
        let executor = Arc::new(FixedOutput::default());
        // The worker is held but never started so queued jobs stay visible.
        let (queue, worker) = DispatchQueue::channel("telegram");
        let manager = TelegramTriggerManager::new(
            client,
            cache,
            executor.clone(),
            queue.clone(),
            "https://loom.example/",
        );
        Fixture {
            server,
            manager,
            executor,
            queue,
            _worker: worker,
        }
    }

    fn config() -> TelegramConfig {
        TelegramConfig {
            bot_token: "TOKEN".to_string(),
            allowed_updates: default_allowed_updates(),
            chat_id: None,
            chat_type: None,
            reply_with_result: false,
        }
    }

    /// Mocks `getMe` and `deleteWebhook` for `token`, returning the delete mock.
    async fn mock_bot(
        server: &mut mockito::ServerGuard,
        token: &str,
        deletes: usize,
    ) -> mockito::Mock {
        server
            .mock("POST", format!("/bot{token}/getMe").as_str())
            .with_body(r#"{"ok":true,"result":{"id":42,"is_bot":true,"first_name":"Loom"}}"#)
            .create_async()
            .await;
        server
            .mock("POST", format!("/bot{token}/deleteWebhook").as_str())
            .with_body(r#"{"ok":true,"result":true}"#)
            .expect(deletes)
            .create_async()
            .await
    }

    async fn mock_set_webhook(server: &mut mockito::ServerGuard, token: &str) {
        server
            .mock("POST", format!("/bot{token}/setWebhook").as_str())
            .match_body(Matcher::PartialJson(json!({
                "url": "https://loom.example/api/telegram/ws",
                "allowed_updates": ["message"],
            })))
            .with_body(r#"{"ok":true,"result":true}"#)
            .create_async()
            .await;
    }

    async fn mock_registration(server: &mut mockito::ServerGuard) {
        mock_bot(server, "TOKEN", 1).await;
        mock_set_webhook(server, "TOKEN").await;
    }

    fn with_token(token: &str) -> TelegramConfig {
        TelegramConfig {
            bot_token: token.to_string(),
            ..config()
        }
    }

    fn message(chat_id: i64) -> JsonValue {
        json!({
            "update_id": 1,
            "message": {"message_id": 3, "chat": {"id": chat_id, "type": "private"}, "text": "hi"}
        })
    }

    #[test]
    fn config_defaults_and_redacts_token() {
        let config: TelegramConfig =
            serde_json::from_value(json!({"botToken": "123:abc"})).expect("config");
        assert_eq!(config.allowed_updates, vec!["message".to_string()]);
        assert!(!config.reply_with_result);
        assert!(!format!("{config:?}").contains("123:abc"));
    }

    #[tokio::test]
    async fn registration_sets_webhook_with_fresh_secret() {
        let mut fx = fixture().await;
        mock_registration(&mut fx.server).await;

        let outcome = fx.manager.register(&id("ws"), config()).await;

        assert!(outcome.success, "{:?}", outcome.error);
        let info = outcome.info.expect("info");
        assert_eq!(info.webhook_url, "https://loom.example/api/telegram/ws");
        assert_eq!(info.bot_info.id, 42);
        assert_eq!(info.secret_token.len(), 43);
        assert!(
            fx.manager
                .validate(&id("ws"), Some(info.secret_token.as_str()))
                .await
                .is_some()
        );
    }

    #[tokio::test]
    async fn reregistration_keeps_one_registration() {
        let mut fx = fixture().await;
        mock_registration(&mut fx.server).await;

        let first = fx.manager.register(&id("ws"), config()).await.info.expect("info");
        let second = fx.manager.register(&id("ws"), config()).await.info.expect("info");

        assert_eq!(fx.manager.registrations.len().await, 1);
        assert_ne!(first.secret_token, second.secret_token);
        assert!(
            fx.manager
                .validate(&id("ws"), Some(first.secret_token.as_str()))
                .await
                .is_none()
        );
    }

    #[tokio::test]
    async fn switching_bots_deletes_the_old_webhook() {
        let mut fx = fixture().await;
        // Once when the old bot registers, once when the new one replaces it.
        let old_delete = mock_bot(&mut fx.server, "OLD", 2).await;
        mock_set_webhook(&mut fx.server, "OLD").await;
        let new_delete = mock_bot(&mut fx.server, "NEW", 1).await;
        mock_set_webhook(&mut fx.server, "NEW").await;

        assert!(fx.manager.register(&id("ws"), with_token("OLD")).await.success);
        let info = fx
            .manager
            .register(&id("ws"), with_token("NEW"))
            .await
            .info
            .expect("info");

        old_delete.assert_async().await;
        new_delete.assert_async().await;
        let registration = fx
            .manager
            .validate(&id("ws"), Some(info.secret_token.as_str()))
            .await
            .expect("registered");
        assert_eq!(registration.config.bot_token, "NEW");
    }

    #[tokio::test]
    async fn failed_set_webhook_drops_the_stale_registration() {
        let mut fx = fixture().await;
        mock_bot(&mut fx.server, "OLD", 2).await;
        mock_set_webhook(&mut fx.server, "OLD").await;
        mock_bot(&mut fx.server, "NEW", 1).await;
        fx.server
            .mock("POST", "/botNEW/setWebhook")
            .with_status(400)
            .with_body(r#"{"ok":false,"error_code":400,"description":"Bad Request: bad webhook"}"#)
            .create_async()
            .await;

        let old = fx
            .manager
            .register(&id("ws"), with_token("OLD"))
            .await
            .info
            .expect("info");
        let outcome = fx.manager.register(&id("ws"), with_token("NEW")).await;

        assert!(!outcome.success);
        assert!(outcome.error.is_some_and(|e| e.contains("bad webhook")));
        assert!(fx.manager.registrations.is_empty().await);
        assert!(
            fx.manager
                .validate(&id("ws"), Some(old.secret_token.as_str()))
                .await
                .is_none()
        );
    }

    #[tokio::test]
    async fn rejected_token_is_reported() {
        let mut fx = fixture().await;
        fx.server
            .mock("POST", "/botTOKEN/getMe")
            .with_status(401)
            .with_body(r#"{"ok":false,"error_code":401,"description":"Unauthorized"}"#)
            .create_async()
            .await;

        let outcome = fx.manager.register(&id("ws"), config()).await;

        assert!(!outcome.success);
        assert!(outcome.error.is_some_and(|e| e.contains("Unauthorized")));
        assert!(fx.manager.registrations.is_empty().await);
    }

    #[tokio::test]
    async fn unknown_workspace_and_empty_token_fail_without_api_calls() {
        let fx = fixture().await;

        let outcome = fx.manager.register(&id("other"), config()).await;
        assert_eq!(outcome.error.as_deref(), Some("workspace other is not loaded"));

        let blank = TelegramConfig {
            bot_token: " ".to_string(),
            ..config()
        };
        let outcome = fx.manager.register(&id("ws"), blank).await;
        assert_eq!(
            outcome.error.as_deref(),
            Some("invalid trigger config: botToken is required")
        );
    }

    #[tokio::test]
    async fn wrong_or_missing_secret_never_enqueues() {
        let mut fx = fixture().await;
        mock_registration(&mut fx.server).await;
        fx.manager.register(&id("ws"), config()).await;

        assert!(fx.manager.validate(&id("ws"), None).await.is_none());
        assert!(fx.manager.validate(&id("ws"), Some("guess")).await.is_none());
        assert!(fx.manager.validate(&id("nope"), Some("guess")).await.is_none());
        assert_eq!(fx.queue.pending(), 0);
    }

    #[tokio::test]
    async fn filtered_updates_are_not_queued() {
        let mut fx = fixture().await;
        mock_registration(&mut fx.server).await;
        let restricted = TelegramConfig {
            chat_id: Some(5),
            ..config()
        };
        let info = fx.manager.register(&id("ws"), restricted).await.info.expect("info");
        let registration = fx
            .manager
            .validate(&id("ws"), Some(info.secret_token.as_str()))
            .await
            .expect("valid secret");

        let other_chat = fx
            .manager
            .accept(&registration, &id("ws"), message(9))
            .expect("queue open");
        assert_eq!(
            other_chat,
            UpdateDisposition::Filtered(FilterReason::ChatId { chat_id: Some(9) })
        );
        let garbage = fx
            .manager
            .accept(&registration, &id("ws"), json!([1, 2]))
            .expect("queue open");
        assert_eq!(garbage, UpdateDisposition::Filtered(FilterReason::Malformed));
        assert_eq!(fx.queue.pending(), 0);

        let accepted = fx
            .manager
            .accept(&registration, &id("ws"), message(5))
            .expect("queue open");
        assert!(matches!(accepted, UpdateDisposition::Queued(_)));
        assert_eq!(fx.queue.pending(), 1);
    }

    #[tokio::test]
    async fn final_output_is_sent_back_when_configured() {
        let mut fx = fixture().await;
        mock_registration(&mut fx.server).await;
        let replying = TelegramConfig {
            reply_with_result: true,
            ..config()
        };
        fx.manager.register(&id("ws"), replying).await;
        let reply = fx
            .server
            .mock("POST", "/botTOKEN/sendMessage")
            .match_body(Matcher::PartialJson(json!({"chat_id": 5, "text": "done"})))
            .with_body(r#"{"ok":true,"result":{"message_id":4}}"#)
            .create_async()
            .await;

        let input = TriggerInput::new(TriggerSource::Telegram).with_payload(message(5));
        fx.manager
            .direct_execute(Job::new(id("ws"), input.clone()))
            .await
            .expect("run");

        reply.assert_async().await;
        assert_eq!(fx.executor.runs.lock().expect("lock").as_slice(), [input]);
    }

    #[tokio::test]
    async fn unregister_deletes_the_remote_webhook() {
        let mut fx = fixture().await;
        mock_registration(&mut fx.server).await;
        fx.manager.register(&id("ws"), config()).await;

        assert!(fx.manager.unregister(&id("ws")).await);
        assert!(!fx.manager.unregister(&id("ws")).await);
        assert!(fx.manager.registrations.is_empty().await);
    }
}
