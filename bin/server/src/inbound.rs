//! Validation of client messages.
//!
//! Every inbound envelope is checked for its required fields before anything
//! happens. Rejections become `error` envelopes carrying an [`ErrorCode`].
//!
//! [`ErrorCode`]: taskloom_engine::ErrorCode

use crate::error::InboundError;
use rootcause::Report;
use serde::Deserialize;
use serde::de::DeserializeOwned;
use serde_json::Value as JsonValue;
use std::fmt;
use taskloom_core::WorkspaceId;
use taskloom_engine::envelope::ResolvePrompt;
use taskloom_engine::{Envelope, EnvelopeKind, WorkspaceDefinition};
use taskloom_trigger::{ScheduledConfig, TelegramConfig, WebhookConfig};

/// The trigger kinds a client can register.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TriggerKind {
    /// Cron schedule.
    Scheduled,
    /// Inbound HTTP webhook.
    Webhook,
    /// Telegram bot.
    Telegram,
}

impl TriggerKind {
    /// Returns the wire name.
    #[must_use]
    pub const fn as_str(&self) -> &'static str {
        match self {
            Self::Scheduled => "scheduled",
            Self::Webhook => "webhook",
            Self::Telegram => "telegram",
        }
    }
}

impl fmt::Display for TriggerKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Registration settings for one trigger kind.
#[derive(Debug, Clone, PartialEq)]
pub enum TriggerSettings {
    /// Cron schedule settings.
    Scheduled(ScheduledConfig),
    /// Webhook settings.
    Webhook(WebhookConfig),
    /// Telegram bot settings.
    Telegram(TelegramConfig),
}

impl TriggerSettings {
    /// Returns the kind these settings belong to.
    #[must_use]
    pub fn kind(&self) -> TriggerKind {
        match self {
            Self::Scheduled(_) => TriggerKind::Scheduled,
            Self::Webhook(_) => TriggerKind::Webhook,
            Self::Telegram(_) => TriggerKind::Telegram,
        }
    }
}

/// A validated client message.
#[derive(Debug, Clone, PartialEq)]
pub enum Inbound {
    /// Run a workspace on this connection.
    Run {
        workspace: WorkspaceDefinition,
        payload: Option<JsonValue>,
    },
    /// Abort the connection's active run.
    Abort,
    /// Register a trigger, loading the workspace definition if given.
    RegisterTrigger {
        workspace_id: WorkspaceId,
        workspace: Option<WorkspaceDefinition>,
        settings: TriggerSettings,
    },
    /// Remove a trigger.
    UnregisterTrigger {
        workspace_id: WorkspaceId,
        kind: TriggerKind,
    },
    /// Answer a pending prompt.
    ResolvePrompt(ResolvePrompt),
    /// Reply to a `run_workflow` request; routed to the run's subscribers.
    WorkflowResult(Envelope),
}

/// Parses and validates a text frame.
///
/// # Errors
///
/// Returns an error if the frame is not an envelope, names an outbound-only
/// type, lacks a required field, or has a malformed body.
pub fn parse(text: &str) -> Result<Inbound, Report<InboundError>> {
    let envelope = Envelope::from_json(text).map_err(|e| InboundError::InvalidMessage {
        reason: e.to_string(),
    })?;
    validate(envelope)
}

/// Validates a decoded envelope.
///
/// # Errors
///
/// See [`parse`].
pub fn validate(envelope: Envelope) -> Result<Inbound, Report<InboundError>> {
    let data = &envelope.data;
    match envelope.kind {
        EnvelopeKind::Run => {
            let workspace: WorkspaceDefinition = field(data, "workspace")?;
            let payload = data.get("payload").filter(|p| !p.is_null()).cloned();
            Ok(Inbound::Run { workspace, payload })
        }
        EnvelopeKind::Abort => Ok(Inbound::Abort),
        EnvelopeKind::RegisterTrigger => {
            let workspace_id: WorkspaceId = field(data, "workspaceId")?;
            let kind: TriggerKind = field(data, "triggerType")?;
            let config = data.get("config").cloned().unwrap_or(JsonValue::Null);
            let settings = match kind {
                TriggerKind::Scheduled => TriggerSettings::Scheduled(decode(config, "config")?),
                TriggerKind::Webhook if config.is_null() => {
                    TriggerSettings::Webhook(WebhookConfig::default())
                }
                TriggerKind::Webhook => TriggerSettings::Webhook(decode(config, "config")?),
                TriggerKind::Telegram => TriggerSettings::Telegram(decode(config, "config")?),
            };
            let workspace = match data.get("workspace") {
                None | Some(JsonValue::Null) => None,
                Some(_) => Some(field::<WorkspaceDefinition>(data, "workspace")?),
            };
            if workspace.as_ref().is_some_and(|w| w.id != workspace_id) {
                return Err(InboundError::InvalidMessage {
                    reason: "workspace.id does not match workspaceId".to_string(),
                }
                .into());
            }
            Ok(Inbound::RegisterTrigger {
                workspace_id,
                workspace,
                settings,
            })
        }
        EnvelopeKind::UnregisterTrigger => Ok(Inbound::UnregisterTrigger {
            workspace_id: field(data, "workspaceId")?,
            kind: field(data, "triggerType")?,
        }),
        EnvelopeKind::ResolvePrompt => {
            require(data, "promptId")?;
            require(data, "answer")?;
            Ok(Inbound::ResolvePrompt(decode(data.clone(), "resolve_prompt")?))
        }
        EnvelopeKind::WorkflowResult => {
            require(data, "requestId")?;
            Ok(Inbound::WorkflowResult(envelope))
        }
        kind @ (EnvelopeKind::Event
        | EnvelopeKind::RunWorkflow
        | EnvelopeKind::PromptRequest
        | EnvelopeKind::TriggerRegistered
        | EnvelopeKind::TriggerUnregistered
        | EnvelopeKind::RunCompleted
        | EnvelopeKind::Error) => Err(InboundError::InvalidMessage {
            reason: format!("{kind} cannot be sent by clients"),
        }
        .into()),
    }
}

/// Fails unless `data[name]` is present, non-null and not an empty string.
fn require<'a>(data: &'a JsonValue, name: &'static str) -> Result<&'a JsonValue, Report<InboundError>> {
    match data.get(name) {
        None | Some(JsonValue::Null) => Err(InboundError::MissingField { field: name }.into()),
        Some(JsonValue::String(s)) if s.trim().is_empty() => {
            Err(InboundError::MissingField { field: name }.into())
        }
        Some(value) => Ok(value),
    }
}

fn field<T: DeserializeOwned>(data: &JsonValue, name: &'static str) -> Result<T, Report<InboundError>> {
    decode(require(data, name)?.clone(), name)
}

fn decode<T: DeserializeOwned>(value: JsonValue, name: &str) -> Result<T, Report<InboundError>> {
    serde_json::from_value(value).map_err(|e| {
        InboundError::InvalidMessage {
            reason: format!("{name}: {e}"),
        }
        .into()
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn inbound(kind: &str, data: JsonValue) -> Result<Inbound, Report<InboundError>> {
        parse(&json!({"type": kind, "data": data}).to_string())
    }

    fn rejection(kind: &str, data: JsonValue) -> InboundError {
        inbound(kind, data).unwrap_err().current_context().clone()
    }

    #[test]
    fn run_carries_workspace_and_payload() {
        let message = inbound(
            "run",
            json!({"workspace": {"id": "ws", "name": "Demo"}, "payload": "hello"}),
        )
        .expect("valid");

        let Inbound::Run { workspace, payload } = message else {
            panic!("expected run");
        };
        assert_eq!(workspace.id.as_str(), "ws");
        assert_eq!(payload, Some(json!("hello")));
    }

    #[test]
    fn missing_fields_are_named() {
        assert_eq!(
            rejection("run", json!({})),
            InboundError::MissingField { field: "workspace" }
        );
        assert_eq!(
            rejection("register_trigger", json!({"workspaceId": "", "triggerType": "webhook"})),
            InboundError::MissingField {
                field: "workspaceId"
            }
        );
        assert_eq!(
            rejection("resolve_prompt", json!({"answer": "yes"})),
            InboundError::MissingField { field: "promptId" }
        );
    }

    #[test]
    fn malformed_frames_are_invalid() {
        assert!(matches!(
            parse("not json").unwrap_err().current_context(),
            InboundError::InvalidMessage { .. }
        ));
        assert!(matches!(
            rejection("run_completed", json!({})),
            InboundError::InvalidMessage { reason } if reason.contains("cannot be sent by clients")
        ));
        assert!(matches!(
            rejection("register_trigger", json!({"workspaceId": "ws", "triggerType": "carrier_pigeon"})),
            InboundError::InvalidMessage { .. }
        ));
    }

    #[test]
    fn trigger_settings_follow_the_kind() {
        let scheduled = inbound(
            "register_trigger",
            json!({
                "workspaceId": "ws",
                "triggerType": "scheduled",
                "config": {"cronExpression": "0 9 * * 1-5"}
            }),
        )
        .expect("valid");
        let Inbound::RegisterTrigger { settings, .. } = scheduled else {
            panic!("expected registration");
        };
        assert_eq!(settings.kind(), TriggerKind::Scheduled);

        let webhook = inbound(
            "register_trigger",
            json!({"workspaceId": "ws", "triggerType": "webhook"}),
        )
        .expect("config is optional for webhooks");
        assert!(matches!(
            webhook,
            Inbound::RegisterTrigger {
                settings: TriggerSettings::Webhook(_),
                workspace: None,
                ..
            }
        ));

        assert!(matches!(
            rejection(
                "register_trigger",
                json!({"workspaceId": "ws", "triggerType": "telegram", "config": {}})
            ),
            InboundError::InvalidMessage { reason } if reason.contains("botToken")
        ));
    }

    #[test]
    fn embedded_workspace_must_match() {
        assert!(matches!(
            rejection(
                "register_trigger",
                json!({
                    "workspaceId": "ws",
                    "triggerType": "webhook",
                    "workspace": {"id": "other", "name": "Other"}
                })
            ),
            InboundError::InvalidMessage { .. }
        ));
    }

    #[test]
    fn workflow_results_pass_through() {
        let message = inbound(
            "workflow_result",
            json!({"requestId": "01J0000000000000000000000A", "result": "ok"}),
        )
        .expect("valid");
        assert!(matches!(message, Inbound::WorkflowResult(e) if e.kind == EnvelopeKind::WorkflowResult));
    }
}
