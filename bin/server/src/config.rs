//! Centralized server configuration.
//!
//! Loaded via the `config` crate from environment variables, with `__`
//! separating nested sections (for example `LLM__BASE_URL` or
//! `ORCHESTRATOR__WORKFLOW_TIMEOUT_SECONDS`). Every field has a default so
//! an empty environment yields a runnable local server.

use serde::Deserialize;
use std::path::PathBuf;
use std::time::Duration;
use taskloom_ai::LlmBackendConfig;
use taskloom_engine::OrchestratorConfig;

/// Server configuration composed from library configs.
#[derive(Debug, Clone, Deserialize)]
pub struct ServerConfig {
    /// Address the HTTP listener binds to.
    #[serde(default = "default_bind_addr")]
    pub bind_addr: String,

    /// Externally reachable base URL, used in webhook URLs.
    #[serde(default = "default_public_base_url")]
    pub public_base_url: String,

    /// Directory for transcripts, metadata and workflow bodies.
    #[serde(default = "default_data_dir")]
    pub data_dir: PathBuf,

    /// Language-model backend.
    #[serde(default)]
    pub llm: LlmConfig,

    /// Telegram Bot API access.
    #[serde(default)]
    pub telegram: TelegramApiConfig,

    /// Remote workflow evaluator and tool bridge.
    #[serde(default)]
    pub collaborators: CollaboratorsConfig,

    /// Run loop tuning.
    #[serde(default)]
    pub orchestrator: OrchestratorSettings,
}

/// OpenAI-compatible model endpoint.
#[derive(Debug, Clone, Deserialize)]
pub struct LlmConfig {
    /// Base URL of the chat-completions API.
    #[serde(default = "default_llm_base_url")]
    pub base_url: String,
    /// Model identifier.
    #[serde(default = "default_llm_model")]
    pub model: String,
    /// API key, if the endpoint needs one.
    #[serde(default)]
    pub api_key: Option<String>,
    /// Per-request timeout.
    #[serde(default = "default_llm_timeout_seconds")]
    pub timeout_seconds: u64,
}

/// Telegram Bot API endpoint.
#[derive(Debug, Clone, Deserialize)]
pub struct TelegramApiConfig {
    /// Bot API base URL.
    #[serde(default = "default_telegram_api_base_url")]
    pub api_base_url: String,
    /// Per-request timeout.
    #[serde(default = "default_telegram_timeout_seconds")]
    pub timeout_seconds: u64,
}

/// Where external collaborators live. Unset means unavailable.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct CollaboratorsConfig {
    /// Endpoint that evaluates workflow node graphs.
    #[serde(default)]
    pub workflow_evaluator_url: Option<String>,
    /// Endpoint that invokes external tools.
    #[serde(default)]
    pub tool_bridge_url: Option<String>,
}

/// Orchestrator settings.
#[derive(Debug, Clone, Deserialize)]
pub struct OrchestratorSettings {
    /// Separator between upstream results.
    #[serde(default = "default_context_separator")]
    pub context_separator: String,
    /// Deadline for workflow replies.
    #[serde(default = "default_workflow_timeout_seconds")]
    pub workflow_timeout_seconds: u64,
    /// Deadline for interactive prompt answers.
    #[serde(default = "default_prompt_timeout_seconds")]
    pub prompt_timeout_seconds: u64,
    /// Assignments below this confidence are reported.
    #[serde(default = "default_low_confidence_threshold")]
    pub low_confidence_threshold: f64,
}

fn default_bind_addr() -> String {
    "0.0.0.0:3000".to_string()
}

fn default_public_base_url() -> String {
    "http://localhost:3000".to_string()
}

fn default_data_dir() -> PathBuf {
    PathBuf::from("data")
}

fn default_llm_base_url() -> String {
    "http://localhost:11434/v1".to_string()
}

fn default_llm_model() -> String {
    "llama3.1".to_string()
}

fn default_llm_timeout_seconds() -> u64 {
    120
}

fn default_telegram_api_base_url() -> String {
    taskloom_trigger::telegram::client::DEFAULT_API_BASE_URL.to_string()
}

fn default_telegram_timeout_seconds() -> u64 {
    10
}

fn default_context_separator() -> String {
    OrchestratorConfig::default().context_separator
}

fn default_workflow_timeout_seconds() -> u64 {
    OrchestratorConfig::default().workflow_timeout.as_secs()
}

fn default_prompt_timeout_seconds() -> u64 {
    taskloom_engine::agent::DEFAULT_PROMPT_TIMEOUT.as_secs()
}

fn default_low_confidence_threshold() -> f64 {
    OrchestratorConfig::default().low_confidence_threshold
}

impl Default for LlmConfig {
    fn default() -> Self {
        Self {
            base_url: default_llm_base_url(),
            model: default_llm_model(),
            api_key: None,
            timeout_seconds: default_llm_timeout_seconds(),
        }
    }
}

impl Default for TelegramApiConfig {
    fn default() -> Self {
        Self {
            api_base_url: default_telegram_api_base_url(),
            timeout_seconds: default_telegram_timeout_seconds(),
        }
    }
}

impl Default for OrchestratorSettings {
    fn default() -> Self {
        Self {
            context_separator: default_context_separator(),
            workflow_timeout_seconds: default_workflow_timeout_seconds(),
            prompt_timeout_seconds: default_prompt_timeout_seconds(),
            low_confidence_threshold: default_low_confidence_threshold(),
        }
    }
}

impl LlmConfig {
    /// Converts to the backend's configuration.
    #[must_use]
    pub fn backend_config(&self) -> LlmBackendConfig {
        let config = LlmBackendConfig::new(&self.base_url, &self.model)
            .with_timeout_seconds(self.timeout_seconds);
        match &self.api_key {
            Some(key) => config.with_api_key(key),
            None => config,
        }
    }
}

impl OrchestratorSettings {
    /// Converts to the orchestrator's configuration.
    #[must_use]
    pub fn orchestrator_config(&self) -> OrchestratorConfig {
        OrchestratorConfig {
            context_separator: self.context_separator.clone(),
            workflow_timeout: Duration::from_secs(self.workflow_timeout_seconds),
            low_confidence_threshold: self.low_confidence_threshold,
        }
    }

    /// Returns the prompt timeout.
    #[must_use]
    pub fn prompt_timeout(&self) -> Duration {
        Duration::from_secs(self.prompt_timeout_seconds)
    }
}

impl ServerConfig {
    /// Loads configuration from environment variables.
    ///
    /// # Errors
    ///
    /// Returns an error if a variable is present but invalid.
    pub fn from_env() -> Result<Self, config::ConfigError> {
        Self::from_source(
            config::Environment::default()
                .separator("__")
                .try_parsing(true),
        )
    }

    fn from_source(
        source: impl config::Source + Send + Sync + 'static,
    ) -> Result<Self, config::ConfigError> {
        config::Config::builder()
            .add_source(source)
            .build()?
            .try_deserialize()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    fn from_vars(vars: &[(&str, &str)]) -> ServerConfig {
        let source: HashMap<String, String> = vars
            .iter()
            .map(|(k, v)| ((*k).to_string(), (*v).to_string()))
            .collect();
        ServerConfig::from_source(
            config::Environment::default()
                .separator("__")
                .try_parsing(true)
                .source(Some(source)),
        )
        .expect("config")
    }

    #[test]
    fn empty_environment_uses_defaults() {
        let config = from_vars(&[]);
        assert_eq!(config.bind_addr, "0.0.0.0:3000");
        assert_eq!(config.telegram.api_base_url, "https://api.telegram.org");
        assert_eq!(config.orchestrator.context_separator, "\n\n---\n\n");
        assert_eq!(config.orchestrator.workflow_timeout_seconds, 300);
        assert!(config.collaborators.workflow_evaluator_url.is_none());
    }

    #[test]
    fn nested_sections_use_double_underscore() {
        let config = from_vars(&[
            ("PUBLIC_BASE_URL", "https://loom.example"),
            ("LLM__MODEL", "gpt-4o-mini"),
            ("LLM__API_KEY", "sk-test"),
            ("ORCHESTRATOR__WORKFLOW_TIMEOUT_SECONDS", "30"),
            ("COLLABORATORS__TOOL_BRIDGE_URL", "http://tools:8080"),
        ]);

        assert_eq!(config.public_base_url, "https://loom.example");
        assert_eq!(config.llm.model, "gpt-4o-mini");
        assert_eq!(config.llm.backend_config().api_key.as_deref(), Some("sk-test"));
        assert_eq!(
            config.orchestrator.orchestrator_config().workflow_timeout,
            Duration::from_secs(30)
        );
        assert_eq!(
            config.collaborators.tool_bridge_url.as_deref(),
            Some("http://tools:8080")
        );
    }
}
