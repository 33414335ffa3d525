//! Inbound Telegram updates and filtering.

use serde_json::Value as JsonValue;
use std::fmt;

/// Update types whose object carries a `chat` directly.
const CHAT_BEARING: &[&str] = &[
    "message",
    "edited_message",
    "channel_post",
    "edited_channel_post",
    "business_message",
    "edited_business_message",
    "my_chat_member",
    "chat_member",
    "chat_join_request",
];

/// The parts of an update the filters look at.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct UpdateSummary {
    /// `update_id` from Telegram.
    pub update_id: i64,
    /// The update type, e.g. `message` or `callback_query`.
    pub kind: String,
    /// Chat the update belongs to, when it has one.
    pub chat_id: Option<i64>,
    /// `private`, `group`, `supergroup` or `channel`.
    pub chat_type: Option<String>,
}

impl UpdateSummary {
    /// Extracts the summary from a raw update.
    ///
    /// Returns `None` if the value is not an update object.
    #[must_use]
    pub fn from_update(update: &JsonValue) -> Option<Self> {
        let object = update.as_object()?;
        let update_id = object.get("update_id")?.as_i64()?;
        let (kind, body) = object.iter().find(|(key, _)| key.as_str() != "update_id")?;

        let chat = if CHAT_BEARING.contains(&kind.as_str()) {
            body.get("chat")
        } else if kind == "callback_query" {
            body.get("message").and_then(|message| message.get("chat"))
        } else {
            None
        };

        Some(Self {
            update_id,
            kind: kind.clone(),
            chat_id: chat.and_then(|chat| chat.get("id")).and_then(JsonValue::as_i64),
            chat_type: chat
                .and_then(|chat| chat.get("type"))
                .and_then(JsonValue::as_str)
                .map(str::to_string),
        })
    }
}

/// Why an update was not turned into a run.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum FilterReason {
    /// The body is not a Telegram update.
    Malformed,
    /// The update type is not in the allow-list.
    UpdateType { kind: String },
    /// The update comes from another chat.
    ChatId { chat_id: Option<i64> },
    /// The chat is of another type.
    ChatType { chat_type: Option<String> },
}

impl fmt::Display for FilterReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Malformed => f.write_str("body is not a Telegram update"),
            Self::UpdateType { kind } => write!(f, "update type {kind} is not allowed"),
            Self::ChatId { chat_id: Some(id) } => write!(f, "chat {id} is not the configured chat"),
            Self::ChatId { chat_id: None } => write!(f, "update has no chat"),
            Self::ChatType {
                chat_type: Some(chat_type),
            } => write!(f, "chat type {chat_type} is not the configured type"),
            Self::ChatType { chat_type: None } => write!(f, "update has no chat type"),
        }
    }
}

/// Accept rules of a Telegram trigger, applied in order: update type, chat
/// id, chat type.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct UpdateFilter<'a> {
    /// Allowed update types.
    pub allowed_updates: &'a [String],
    /// Only this chat, if set.
    pub chat_id: Option<i64>,
    /// Only this chat type, if set.
    pub chat_type: Option<&'a str>,
}

impl UpdateFilter<'_> {
    /// Checks `update` against the rules.
    ///
    /// # Errors
    ///
    /// Returns the first rule the update fails.
    pub fn check(&self, update: &UpdateSummary) -> Result<(), FilterReason> {
        if !self.allowed_updates.iter().any(|kind| *kind == update.kind) {
            return Err(FilterReason::UpdateType {
                kind: update.kind.clone(),
            });
        }
        if self
            .chat_id
            .is_some_and(|expected| update.chat_id != Some(expected))
        {
            return Err(FilterReason::ChatId {
                chat_id: update.chat_id,
            });
        }
        if self
            .chat_type
            .is_some_and(|expected| update.chat_type.as_deref() != Some(expected))
        {
            return Err(FilterReason::ChatType {
                chat_type: update.chat_type.clone(),
            });
        }
        Ok(())
    }
}
