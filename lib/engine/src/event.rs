//! Run lifecycle events.
//!
//! Every transition of a run is reported as a [`RunEvent`] wrapped in an
//! `event` envelope on the active channel.

use crate::channel::Channel;
use crate::envelope::{Envelope, EnvelopeKind};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value as JsonValue;
use taskloom_core::RunId;
use tracing::warn;

/// Severity and category of an event.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EventLevel {
    /// Phase transitions.
    System,
    /// Assignment and progress details.
    Info,
    /// A task or the run completed.
    Success,
    /// A task failed or the configuration is invalid.
    Error,
}

/// One event in a run's lifecycle.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RunEvent {
    /// Monotonic within the run, starting at 1.
    pub id: u64,
    /// The run this event belongs to.
    pub run_id: RunId,
    /// Event category.
    pub level: EventLevel,
    /// Human-readable message.
    pub message: String,
    /// Structured details.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub payload: Option<JsonValue>,
    /// When the event was emitted.
    pub timestamp: DateTime<Utc>,
}

/// Emits numbered events for one run over a channel.
///
/// Delivery is best effort: a channel failure is logged and the run goes on.
pub struct EventEmitter<'a> {
    run_id: RunId,
    channel: &'a dyn Channel,
    last_id: u64,
}

impl<'a> EventEmitter<'a> {
    /// Creates an emitter for `run_id`.
    #[must_use]
    pub fn new(run_id: RunId, channel: &'a dyn Channel) -> Self {
        Self {
            run_id,
            channel,
            last_id: 0,
        }
    }

    /// Returns the id of the most recent event, 0 if none was emitted.
    #[must_use]
    pub fn last_id(&self) -> u64 {
        self.last_id
    }

    /// Emits an event without a payload.
    pub async fn emit(&mut self, level: EventLevel, message: impl Into<String>) {
        self.emit_with(level, message, None).await;
    }

    /// Emits an event with an optional payload.
    pub async fn emit_with(
        &mut self,
        level: EventLevel,
        message: impl Into<String>,
        payload: Option<JsonValue>,
    ) {
        self.last_id += 1;
        let event = RunEvent {
            id: self.last_id,
            run_id: self.run_id,
            level,
            message: message.into(),
            payload,
            timestamp: Utc::now(),
        };

        let envelope = match Envelope::from_payload(EnvelopeKind::Event, &event) {
            Ok(envelope) => envelope,
            Err(e) => {
                warn!(run_id = %self.run_id, error = %e, "failed to encode run event");
                return;
            }
        };

        if let Err(report) = self.channel.send(envelope).await {
            warn!(
                run_id = %self.run_id,
                event_id = event.id,
                error = %report.current_context(),
                "failed to deliver run event"
            );
        }
    }
}
