//! Wire envelopes exchanged over channels.
//!
//! Every message, inbound or outbound, travels as `{type, data, timestamp}`.
//! `data` stays raw JSON until a consumer asks for a concrete payload type.

use chrono::{DateTime, Utc};
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use serde_json::Value as JsonValue;
use std::fmt;
use taskloom_core::{PromptId, WorkflowId, WorkflowRequestId};

/// The kind of an envelope.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EnvelopeKind {
    /// Client asks to run a workspace.
    Run,
    /// Client asks to abort the active run.
    Abort,
    /// Client registers a trigger.
    RegisterTrigger,
    /// Client removes a trigger.
    UnregisterTrigger,
    /// Client answers a prompt.
    ResolvePrompt,
    /// A run lifecycle event.
    Event,
    /// Engine asks for a workflow to be executed.
    RunWorkflow,
    /// Reply to `RunWorkflow`.
    WorkflowResult,
    /// Engine asks the user a question.
    PromptRequest,
    /// A trigger was registered.
    TriggerRegistered,
    /// A trigger was removed.
    TriggerUnregistered,
    /// A run finished.
    RunCompleted,
    /// Something was rejected.
    Error,
}

impl EnvelopeKind {
    /// Returns the wire name.
    #[must_use]
    pub const fn as_str(&self) -> &'static str {
        match self {
            Self::Run => "run",
            Self::Abort => "abort",
            Self::RegisterTrigger => "register_trigger",
            Self::UnregisterTrigger => "unregister_trigger",
            Self::ResolvePrompt => "resolve_prompt",
            Self::Event => "event",
            Self::RunWorkflow => "run_workflow",
            Self::WorkflowResult => "workflow_result",
            Self::PromptRequest => "prompt_request",
            Self::TriggerRegistered => "trigger_registered",
            Self::TriggerUnregistered => "trigger_unregistered",
            Self::RunCompleted => "run_completed",
            Self::Error => "error",
        }
    }
}

impl fmt::Display for EnvelopeKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A typed message with a raw JSON body.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Envelope {
    /// What the message is.
    #[serde(rename = "type")]
    pub kind: EnvelopeKind,
    /// Message body.
    #[serde(default)]
    pub data: JsonValue,
    /// When the message was created.
    #[serde(default = "Utc::now")]
    pub timestamp: DateTime<Utc>,
}

impl Envelope {
    /// Creates an envelope stamped with the current time.
    #[must_use]
    pub fn new(kind: EnvelopeKind, data: JsonValue) -> Self {
        Self {
            kind,
            data,
            timestamp: Utc::now(),
        }
    }

    /// Creates an envelope from a serializable payload.
    ///
    /// # Errors
    ///
    /// Returns an error if the payload cannot be serialized.
    pub fn from_payload<T: Serialize>(
        kind: EnvelopeKind,
        payload: &T,
    ) -> Result<Self, serde_json::Error> {
        Ok(Self::new(kind, serde_json::to_value(payload)?))
    }

    /// Decodes the body into `T`.
    ///
    /// # Errors
    ///
    /// Returns an error if the body does not match `T`.
    pub fn payload<T: DeserializeOwned>(&self) -> Result<T, serde_json::Error> {
        T::deserialize(&self.data)
    }

    /// Parses an envelope from JSON text.
    ///
    /// # Errors
    ///
    /// Returns an error if the text is not a valid envelope.
    pub fn from_json(text: &str) -> Result<Self, serde_json::Error> {
        serde_json::from_str(text)
    }

    /// Serializes the envelope to JSON text.
    ///
    /// # Errors
    ///
    /// Returns an error if serialization fails.
    pub fn to_json(&self) -> Result<String, serde_json::Error> {
        serde_json::to_string(self)
    }
}

/// Body of a `run_workflow` envelope.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RunWorkflowRequest {
    /// Correlates the reply.
    pub request_id: WorkflowRequestId,
    /// Workflow to execute.
    pub workflow_id: WorkflowId,
    /// Input context for the workflow.
    pub context: String,
}

/// Body of a `workflow_result` envelope.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct WorkflowResultPayload {
    /// The request being answered.
    pub request_id: WorkflowRequestId,
    /// Workflow output, absent on failure or when nothing was produced.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub result: Option<JsonValue>,
    /// Failure reason.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

/// Body of a `prompt_request` envelope.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PromptRequest {
    /// Prompt to answer with `resolve_prompt`.
    pub prompt_id: PromptId,
    /// The question.
    pub question: String,
    /// Seconds until the prompt expires.
    pub timeout_secs: u64,
}

/// Body of a `resolve_prompt` envelope.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ResolvePrompt {
    /// Prompt being answered.
    pub prompt_id: PromptId,
    /// The user's answer.
    pub answer: String,
}

/// Machine-readable reason carried by an `error` envelope.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ErrorCode {
    /// The message is not a valid envelope.
    InvalidMessage,
    /// A required field is missing or empty.
    MissingField,
    /// The workspace is not loaded.
    UnknownWorkspace,
    /// A run is already active on this connection.
    RunInProgress,
    /// A trigger could not be registered.
    RegistrationFailed,
}

/// Body of an `error` envelope.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ErrorPayload {
    /// What went wrong.
    pub code: ErrorCode,
    /// Human-readable explanation.
    pub message: String,
}

impl ErrorPayload {
    /// Creates an error payload.
    #[must_use]
    pub fn new(code: ErrorCode, message: impl Into<String>) -> Self {
        Self {
            code,
            message: message.into(),
        }
    }

    /// Wraps the payload in an `error` envelope.
    #[must_use]
    pub fn into_envelope(self) -> Envelope {
        Envelope::new(
            EnvelopeKind::Error,
            serde_json::json!({ "code": self.code, "message": self.message }),
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn envelope_wire_format() {
        let envelope = Envelope::new(EnvelopeKind::RunWorkflow, serde_json::json!({"x": 1}));
        let json: JsonValue =
            serde_json::from_str(&envelope.to_json().expect("serialize")).expect("parse");

        assert_eq!(json["type"], "run_workflow");
        assert_eq!(json["data"]["x"], 1);
        assert!(json["timestamp"].is_string());
    }

    #[test]
    fn inbound_envelope_without_timestamp() {
        let envelope =
            Envelope::from_json(r#"{"type": "abort"}"#).expect("timestamp is optional");
        assert_eq!(envelope.kind, EnvelopeKind::Abort);
        assert!(envelope.data.is_null());
    }

    #[test]
    fn unknown_type_is_rejected() {
        assert!(Envelope::from_json(r#"{"type": "launch_rockets", "data": {}}"#).is_err());
    }

    #[test]
    fn typed_payload_access() {
        let request = RunWorkflowRequest {
            request_id: WorkflowRequestId::new(),
            workflow_id: WorkflowId::new("wf").expect("valid"),
            context: "input".to_string(),
        };
        let envelope =
            Envelope::from_payload(EnvelopeKind::RunWorkflow, &request).expect("serialize");

        assert_eq!(envelope.data["workflowId"], "wf");
        let decoded: RunWorkflowRequest = envelope.payload().expect("decode");
        assert_eq!(decoded, request);
    }

    #[test]
    fn error_envelope_shape() {
        let envelope = ErrorPayload::new(ErrorCode::MissingField, "workspaceId is required")
            .into_envelope();
        assert_eq!(envelope.kind, EnvelopeKind::Error);
        assert_eq!(envelope.data["code"], "missing_field");
        assert_eq!(envelope.data["message"], "workspaceId is required");
    }

    #[test]
    fn kind_display_matches_serde() {
        let json = serde_json::to_string(&EnvelopeKind::TriggerRegistered).expect("serialize");
        assert_eq!(json, format!("\"{}\"", EnvelopeKind::TriggerRegistered));
    }
}
