//! Error types for the AI crate.
//!
//! Errors are designed for layered context using rootcause. Callers that
//! turn model output into domain decisions add their own context on top.

use std::fmt;

/// Errors from language-model backend operations.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum LlmError {
    /// Provider could not be reached.
    ProviderUnavailable { provider: String, reason: String },
    /// Provider answered with a failure.
    RequestFailed { reason: String },
    /// Response body could not be understood.
    ResponseParseFailed { reason: String },
    /// The model answered in prose where a JSON document was required.
    NoJsonFound { excerpt: String },
    /// The model's JSON did not have the requested shape.
    UnexpectedShape { reason: String },
    /// Timeout waiting for response.
    Timeout,
    /// Rate limit exceeded.
    RateLimited { retry_after_secs: Option<u64> },
    /// Invalid configuration.
    InvalidConfig { reason: String },
}

impl fmt::Display for LlmError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::ProviderUnavailable { provider, reason } => {
                write!(f, "LLM provider '{provider}' unavailable: {reason}")
            }
            Self::RequestFailed { reason } => {
                write!(f, "LLM request failed: {reason}")
            }
            Self::ResponseParseFailed { reason } => {
                write!(f, "failed to parse LLM response: {reason}")
            }
            Self::NoJsonFound { excerpt } => {
                write!(f, "model answer contains no JSON document: {excerpt:?}")
            }
            Self::UnexpectedShape { reason } => {
                write!(f, "model JSON has an unexpected shape: {reason}")
            }
            Self::Timeout => write!(f, "LLM request timed out"),
            Self::RateLimited { retry_after_secs } => {
                if let Some(secs) = retry_after_secs {
                    write!(f, "rate limited, retry after {secs}s")
                } else {
                    write!(f, "rate limited")
                }
            }
            Self::InvalidConfig { reason } => {
                write!(f, "invalid LLM configuration: {reason}")
            }
        }
    }
}

impl std::error::Error for LlmError {}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn llm_error_display() {
        let err = LlmError::ProviderUnavailable {
            provider: "openai".to_string(),
            reason: "connection refused".to_string(),
        };
        assert!(err.to_string().contains("openai"));
        assert!(err.to_string().contains("connection refused"));
    }

    #[test]
    fn no_json_display_quotes_the_excerpt() {
        let err = LlmError::NoJsonFound {
            excerpt: "I cannot".to_string(),
        };
        assert_eq!(
            err.to_string(),
            "model answer contains no JSON document: \"I cannot\""
        );
    }

    #[test]
    fn rate_limited_display() {
        let err = LlmError::RateLimited {
            retry_after_secs: Some(30),
        };
        assert_eq!(err.to_string(), "rate limited, retry after 30s");
        assert_eq!(
            LlmError::RateLimited {
                retry_after_secs: None
            }
            .to_string(),
            "rate limited"
        );
    }
}
