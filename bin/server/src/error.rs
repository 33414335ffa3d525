//! Domain error types for the server.
//!
//! - `ServerError`: bootstrap and listener failures, fatal to the process
//! - `InboundError`: rejected client messages, answered with an `error` envelope
//! - `ApiError`: rejected HTTP requests, answered with a status code

use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use std::fmt;
use taskloom_core::WorkspaceId;
use taskloom_engine::{Envelope, ErrorCode, ErrorPayload};

/// Errors that stop the server from starting or serving.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ServerError {
    /// Configuration could not be loaded.
    Config { reason: String },
    /// A collaborator could not be constructed.
    Bootstrap { component: &'static str, reason: String },
    /// The listener could not bind.
    Bind { addr: String, reason: String },
    /// The server stopped with an error.
    Serve { reason: String },
}

impl fmt::Display for ServerError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Config { reason } => write!(f, "configuration error: {reason}"),
            Self::Bootstrap { component, reason } => {
                write!(f, "could not initialize {component}: {reason}")
            }
            Self::Bind { addr, reason } => write!(f, "could not bind {addr}: {reason}"),
            Self::Serve { reason } => write!(f, "server error: {reason}"),
        }
    }
}

impl std::error::Error for ServerError {}

/// Errors answering a client message.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum InboundError {
    /// The message is not a valid envelope or has a malformed body.
    InvalidMessage { reason: String },
    /// A required field is missing or empty.
    MissingField { field: &'static str },
    /// The workspace is not loaded.
    UnknownWorkspace { workspace_id: WorkspaceId },
    /// The connection already has an active run.
    RunInProgress,
    /// A trigger could not be registered.
    RegistrationFailed { reason: String },
}

impl fmt::Display for InboundError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::InvalidMessage { reason } => write!(f, "invalid message: {reason}"),
            Self::MissingField { field } => write!(f, "{field} is required"),
            Self::UnknownWorkspace { workspace_id } => {
                write!(f, "workspace {workspace_id} is not loaded")
            }
            Self::RunInProgress => write!(f, "a run is already in progress on this connection"),
            Self::RegistrationFailed { reason } => write!(f, "registration failed: {reason}"),
        }
    }
}

impl std::error::Error for InboundError {}

impl InboundError {
    /// Returns the wire code.
    #[must_use]
    pub fn code(&self) -> ErrorCode {
        match self {
            Self::InvalidMessage { .. } => ErrorCode::InvalidMessage,
            Self::MissingField { .. } => ErrorCode::MissingField,
            Self::UnknownWorkspace { .. } => ErrorCode::UnknownWorkspace,
            Self::RunInProgress => ErrorCode::RunInProgress,
            Self::RegistrationFailed { .. } => ErrorCode::RegistrationFailed,
        }
    }

    /// Builds the `error` envelope sent back to the client.
    #[must_use]
    pub fn to_envelope(&self) -> Envelope {
        ErrorPayload::new(self.code(), self.to_string()).into_envelope()
    }
}

/// Errors answering an HTTP request.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ApiError {
    /// Missing or wrong trigger credential.
    Unauthorized,
    /// Nothing is registered for the workspace.
    NotFound,
    /// The request body is unusable.
    BadRequest { reason: String },
    /// The dispatch queue has stopped.
    QueueUnavailable { reason: String },
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let (status, message) = match self {
            Self::Unauthorized => (StatusCode::UNAUTHORIZED, "Invalid or missing secret".to_string()),
            Self::NotFound => (StatusCode::NOT_FOUND, "No trigger registered".to_string()),
            Self::BadRequest { reason } => (StatusCode::BAD_REQUEST, reason),
            Self::QueueUnavailable { reason } => {
                tracing::error!("Dispatch queue unavailable: {}", reason);
                (
                    StatusCode::SERVICE_UNAVAILABLE,
                    "Trigger queue unavailable".to_string(),
                )
            }
        };

        (status, message).into_response()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn inbound_errors_map_to_wire_codes() {
        let envelope = InboundError::MissingField {
            field: "workspaceId",
        }
        .to_envelope();
        assert_eq!(envelope.data["code"], "missing_field");
        assert_eq!(envelope.data["message"], "workspaceId is required");

        assert_eq!(InboundError::RunInProgress.code(), ErrorCode::RunInProgress);
    }

    #[test]
    fn unauthorized_is_401() {
        let response = ApiError::Unauthorized.into_response();
        assert_eq!(response.status(), StatusCode::UNAUTHORIZED);
    }
}
