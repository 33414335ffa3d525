//! Run inputs, outcomes and cancellation.

use crate::context::ResultMap;
use serde::{Deserialize, Serialize};
use serde_json::Value as JsonValue;
use std::fmt;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use taskloom_core::{RunId, TaskId, WorkspaceId};

/// What started a run.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TriggerSource {
    /// A user on a live connection.
    Interactive,
    /// A cron schedule.
    Scheduled,
    /// An inbound webhook request.
    Webhook,
    /// A Telegram bot update.
    Telegram,
}

impl TriggerSource {
    /// Returns the wire name.
    #[must_use]
    pub const fn as_str(&self) -> &'static str {
        match self {
            Self::Interactive => "interactive",
            Self::Scheduled => "scheduled",
            Self::Webhook => "webhook",
            Self::Telegram => "telegram",
        }
    }
}

impl fmt::Display for TriggerSource {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// The trigger and its payload, if any.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TriggerInput {
    /// What started the run.
    pub source: TriggerSource,
    /// Raw trigger payload (request body, bot update, ...).
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub payload: Option<JsonValue>,
}

impl TriggerInput {
    /// Creates an input without a payload.
    #[must_use]
    pub fn new(source: TriggerSource) -> Self {
        Self {
            source,
            payload: None,
        }
    }

    /// Attaches a payload.
    #[must_use]
    pub fn with_payload(mut self, payload: JsonValue) -> Self {
        self.payload = Some(payload);
        self
    }

    /// Renders the payload as context text for root tasks.
    ///
    /// A string payload is used as is; anything else is pretty-printed JSON.
    /// Returns `None` when there is no payload.
    #[must_use]
    pub fn render_context(&self) -> Option<String> {
        let payload = match self.payload.as_ref()? {
            JsonValue::Null => return None,
            JsonValue::String(text) => text.clone(),
            other => serde_json::to_string_pretty(other).unwrap_or_else(|_| other.to_string()),
        };
        Some(format!("Trigger context ({}):\n{payload}", self.source))
    }
}

/// How a run ended.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RunStatus {
    /// Every layer was processed.
    Completed,
    /// The run stopped at a layer boundary after an abort request.
    Aborted,
}

impl fmt::Display for RunStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Completed => f.write_str("completed"),
            Self::Aborted => f.write_str("aborted"),
        }
    }
}

/// A task that failed during a run.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TaskFailure {
    /// The failed task.
    pub task_id: TaskId,
    /// Why it failed.
    pub message: String,
}

/// Outcome of a run.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RunSummary {
    /// The run.
    pub run_id: RunId,
    /// The workspace that ran.
    pub workspace_id: WorkspaceId,
    /// How the run ended.
    pub status: RunStatus,
    /// Results of successful tasks.
    pub results: ResultMap,
    /// Failed tasks in execution order.
    pub failures: Vec<TaskFailure>,
    /// Result of the task that ran last, if it succeeded.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub final_output: Option<String>,
}

/// Cooperative cancellation flag shared between a run and whoever may stop it.
#[derive(Debug, Clone, Default)]
pub struct AbortSignal(Arc<AtomicBool>);

impl AbortSignal {
    /// Creates an unset signal.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Requests the run to stop at the next layer boundary.
    pub fn abort(&self) {
        self.0.store(true, Ordering::SeqCst);
    }

    /// Returns true once an abort was requested.
    #[must_use]
    pub fn is_aborted(&self) -> bool {
        self.0.load(Ordering::SeqCst)
    }
}
