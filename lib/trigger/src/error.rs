//! Error types for the trigger crate.
//!
//! Errors are designed for layered context using rootcause:
//! - `ScheduleError`: cron expressions and timezones
//! - `RegistrationError`: registering a trigger for a workspace
//! - `TelegramError`: calls to the Telegram Bot API
//! - `QueueError`: enqueueing jobs

use std::fmt;
use taskloom_core::WorkspaceId;

/// Errors from parsing schedules.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ScheduleError {
    /// Invalid cron expression.
    InvalidCronExpression { expression: String, reason: String },
    /// Unknown IANA timezone.
    InvalidTimezone { timezone: String },
}

impl fmt::Display for ScheduleError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::InvalidCronExpression { expression, reason } => {
                write!(f, "invalid cron expression '{expression}': {reason}")
            }
            Self::InvalidTimezone { timezone } => write!(f, "invalid timezone: {timezone}"),
        }
    }
}

impl std::error::Error for ScheduleError {}

/// Errors from registering a trigger.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RegistrationError {
    /// The workspace definition has not been loaded.
    UnknownWorkspace { workspace_id: WorkspaceId },
    /// The trigger configuration is unusable.
    InvalidConfig { reason: String },
    /// A secret could not be generated.
    SecretGeneration { reason: String },
    /// The external provider refused or could not be reached.
    Provider { reason: String },
}

impl fmt::Display for RegistrationError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::UnknownWorkspace { workspace_id } => {
                write!(f, "workspace {workspace_id} is not loaded")
            }
            Self::InvalidConfig { reason } => write!(f, "invalid trigger config: {reason}"),
            Self::SecretGeneration { reason } => {
                write!(f, "could not generate secret: {reason}")
            }
            Self::Provider { reason } => write!(f, "provider error: {reason}"),
        }
    }
}

impl std::error::Error for RegistrationError {}

/// Errors from the Telegram Bot API.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TelegramError {
    /// No answer within the configured timeout.
    Timeout,
    /// Telegram answered `ok: false`.
    Rejected {
        error_code: Option<i64>,
        description: String,
    },
    /// The API could not be reached.
    Unreachable { reason: String },
    /// The answer was not a valid API response.
    InvalidResponse { reason: String },
}

impl fmt::Display for TelegramError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Timeout => write!(f, "Telegram API timed out"),
            Self::Rejected {
                error_code: Some(code),
                description,
            } => write!(f, "Telegram API rejected the request ({code}): {description}"),
            Self::Rejected {
                error_code: None,
                description,
            } => write!(f, "Telegram API rejected the request: {description}"),
            Self::Unreachable { reason } => write!(f, "Telegram API unreachable: {reason}"),
            Self::InvalidResponse { reason } => {
                write!(f, "invalid Telegram API response: {reason}")
            }
        }
    }
}

impl std::error::Error for TelegramError {}

/// Errors from dispatch queues.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum QueueError {
    /// The queue worker has stopped.
    Closed { queue: &'static str },
}

impl fmt::Display for QueueError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Closed { queue } => write!(f, "{queue} queue is closed"),
        }
    }
}

impl std::error::Error for QueueError {}
