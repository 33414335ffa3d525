//! LLM backend abstraction.
//!
//! Every caller in the engine talks to a model through [`LlmBackend`]: a
//! prompt goes in, raw text comes out. Turning that text into structure is the
//! caller's job (see [`ask_json`]).

use crate::error::LlmError;
use crate::json::extract_json;
use async_trait::async_trait;
use rootcause::Report;
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};

/// Configuration for an LLM backend.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LlmBackendConfig {
    /// Base URL for the API.
    pub base_url: String,
    /// Model identifier.
    pub model: String,
    /// API key (if required).
    #[serde(default)]
    pub api_key: Option<String>,
    /// Request timeout in seconds.
    #[serde(default = "default_timeout_seconds")]
    pub timeout_seconds: u64,
}

fn default_timeout_seconds() -> u64 {
    120
}

impl LlmBackendConfig {
    /// Creates a configuration for an OpenAI-compatible endpoint.
    #[must_use]
    pub fn new(base_url: impl Into<String>, model: impl Into<String>) -> Self {
        Self {
            base_url: base_url.into(),
            model: model.into(),
            api_key: None,
            timeout_seconds: default_timeout_seconds(),
        }
    }

    /// Sets the API key.
    #[must_use]
    pub fn with_api_key(mut self, api_key: impl Into<String>) -> Self {
        self.api_key = Some(api_key.into());
        self
    }

    /// Sets the request timeout.
    #[must_use]
    pub fn with_timeout_seconds(mut self, timeout_seconds: u64) -> Self {
        self.timeout_seconds = timeout_seconds;
        self
    }
}

/// A request to an LLM.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LlmRequest {
    /// The user prompt.
    pub prompt: String,
    /// System prompt, if any.
    pub system: Option<String>,
    /// Temperature for sampling (0.0 - 1.0).
    pub temperature: Option<f32>,
    /// Maximum tokens to generate.
    pub max_tokens: Option<u32>,
}

impl LlmRequest {
    /// Creates a new simple request with just a prompt.
    #[must_use]
    pub fn new(prompt: impl Into<String>) -> Self {
        Self {
            prompt: prompt.into(),
            system: None,
            temperature: None,
            max_tokens: None,
        }
    }

    /// Adds a system prompt.
    #[must_use]
    pub fn with_system(mut self, system: impl Into<String>) -> Self {
        self.system = Some(system.into());
        self
    }

    /// Sets the temperature.
    #[must_use]
    pub fn with_temperature(mut self, temperature: f32) -> Self {
        self.temperature = Some(temperature);
        self
    }

    /// Sets the max tokens.
    #[must_use]
    pub fn with_max_tokens(mut self, max_tokens: u32) -> Self {
        self.max_tokens = Some(max_tokens);
        self
    }
}

/// A response from an LLM.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LlmResponse {
    /// The generated content.
    pub content: String,
    /// Token usage statistics.
    pub usage: TokenUsage,
    /// Model that generated the response.
    pub model: String,
}

/// Token usage statistics.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct TokenUsage {
    /// Number of input tokens.
    pub input_tokens: u32,
    /// Number of output tokens.
    pub output_tokens: u32,
}

impl TokenUsage {
    /// Returns the total number of tokens.
    #[must_use]
    pub fn total(&self) -> u32 {
        self.input_tokens + self.output_tokens
    }
}

/// Trait for LLM backends.
#[async_trait]
pub trait LlmBackend: Send + Sync {
    /// Generates a response for the given request.
    ///
    /// # Errors
    ///
    /// Returns an error if the LLM call fails.
    async fn generate(&self, request: &LlmRequest) -> Result<LlmResponse, Report<LlmError>>;

    /// Returns the model name.
    fn model(&self) -> &str;

    /// Sends a single prompt and returns the raw text answer.
    ///
    /// # Errors
    ///
    /// Returns an error if the LLM call fails.
    async fn ask(&self, request: &LlmRequest) -> Result<String, Report<LlmError>> {
        Ok(self.generate(request).await?.content)
    }
}

/// How much of a prose answer is kept in [`LlmError::NoJsonFound`].
const EXCERPT_CHARS: usize = 120;

/// Asks the model and parses its answer as JSON into `T`.
///
/// The raw answer may wrap the JSON in prose or a fenced code block; the first
/// balanced JSON object or array is used. A missing or malformed document is
/// a hard error, never a silent default.
///
/// # Errors
///
/// Returns an error if the call fails or the answer does not parse into `T`.
pub async fn ask_json<T: DeserializeOwned>(
    backend: &dyn LlmBackend,
    request: &LlmRequest,
) -> Result<T, Report<LlmError>> {
    let raw = backend.ask(request).await?;
    let document = extract_json(&raw).ok_or_else(|| LlmError::NoJsonFound {
        excerpt: raw.chars().take(EXCERPT_CHARS).collect(),
    })?;
    let parsed = serde_json::from_str(document).map_err(|e| LlmError::UnexpectedShape {
        reason: e.to_string(),
    })?;
    Ok(parsed)
}
