//! HTTP-forwarding collaborators.
//!
//! The server does not evaluate workflow graphs or speak tool protocols.
//! When an evaluator or tool bridge URL is configured, calls are forwarded
//! there as JSON; otherwise they fail as unavailable.

use async_trait::async_trait;
use rootcause::Report;
use serde::{Deserialize, Serialize};
use serde_json::Value as JsonValue;
use std::time::Duration;
use taskloom_core::ToolId;
use taskloom_engine::{CollaboratorError, ToolInvoker, WorkflowDefinition, WorkflowExecutor};
use tracing::{debug, instrument};

const WORKFLOW_EVALUATOR: &str = "workflow evaluator";
const TOOL_BRIDGE: &str = "tool bridge";

#[derive(Debug, Serialize)]
struct EvaluateRequest<'a> {
    workflow: &'a WorkflowDefinition,
    context: &'a str,
}

#[derive(Debug, Deserialize)]
struct EvaluateResponse {
    #[serde(default)]
    result: Option<JsonValue>,
    #[serde(default)]
    error: Option<String>,
}

#[derive(Debug, Serialize)]
struct InvokeRequest<'a> {
    input: &'a str,
}

#[derive(Debug, Deserialize)]
struct InvokeResponse {
    #[serde(default)]
    output: Option<String>,
    #[serde(default)]
    error: Option<String>,
}

fn build_client(
    collaborator: &'static str,
    timeout: Duration,
) -> Result<reqwest::Client, Report<CollaboratorError>> {
    reqwest::Client::builder()
        .timeout(timeout)
        .build()
        .map_err(|e| {
            CollaboratorError::Unavailable {
                collaborator,
                reason: format!("HTTP client error: {e}"),
            }
            .into()
        })
}

fn not_configured(collaborator: &'static str) -> Report<CollaboratorError> {
    CollaboratorError::Unavailable {
        collaborator,
        reason: "not configured".to_string(),
    }
    .into()
}

fn transport_error(collaborator: &'static str, error: &reqwest::Error) -> CollaboratorError {
    if error.is_timeout() {
        CollaboratorError::Timeout
    } else {
        CollaboratorError::Unavailable {
            collaborator,
            reason: error.to_string(),
        }
    }
}

async fn post_json<B: Serialize + Sync, R: serde::de::DeserializeOwned>(
    http: &reqwest::Client,
    collaborator: &'static str,
    url: &str,
    body: &B,
) -> Result<R, Report<CollaboratorError>> {
    let response = http
        .post(url)
        .json(body)
        .send()
        .await
        .map_err(|e| transport_error(collaborator, &e))?;
    let status = response.status();
    if !status.is_success() {
        let text = response.text().await.unwrap_or_default();
        return Err(CollaboratorError::Failed {
            reason: format!("{collaborator} returned {status}: {text}"),
        }
        .into());
    }
    response.json().await.map_err(|e| {
        CollaboratorError::Failed {
            reason: format!("{collaborator} sent an invalid response: {e}"),
        }
        .into()
    })
}

/// Forwards workflow evaluation to `POST {url}`.
#[derive(Debug, Clone)]
pub struct RemoteWorkflowExecutor {
    http: reqwest::Client,
    url: Option<String>,
}

impl RemoteWorkflowExecutor {
    /// Creates an executor. `None` makes every call fail as unavailable.
    ///
    /// # Errors
    ///
    /// Returns an error if the HTTP client cannot be built.
    pub fn new(url: Option<String>, timeout: Duration) -> Result<Self, Report<CollaboratorError>> {
        Ok(Self {
            http: build_client(WORKFLOW_EVALUATOR, timeout)?,
            url,
        })
    }
}

#[async_trait]
impl WorkflowExecutor for RemoteWorkflowExecutor {
    #[instrument(skip_all, fields(workflow_id = %workflow.id))]
    async fn execute(
        &self,
        workflow: &WorkflowDefinition,
        context: &str,
    ) -> Result<Option<JsonValue>, Report<CollaboratorError>> {
        let url = self
            .url
            .as_deref()
            .ok_or_else(|| not_configured(WORKFLOW_EVALUATOR))?;
        let response: EvaluateResponse = post_json(
            &self.http,
            WORKFLOW_EVALUATOR,
            url,
            &EvaluateRequest { workflow, context },
        )
        .await?;
        if let Some(reason) = response.error {
            return Err(CollaboratorError::Failed { reason }.into());
        }
        debug!("workflow evaluated");
        Ok(response.result.filter(|result| !result.is_null()))
    }
}

/// Forwards tool calls to `POST {url}/tools/{tool_id}`.
#[derive(Debug, Clone)]
pub struct RemoteToolInvoker {
    http: reqwest::Client,
    url: Option<String>,
}

impl RemoteToolInvoker {
    /// Creates an invoker. `None` makes every call fail as unavailable.
    ///
    /// # Errors
    ///
    /// Returns an error if the HTTP client cannot be built.
    pub fn new(url: Option<String>, timeout: Duration) -> Result<Self, Report<CollaboratorError>> {
        Ok(Self {
            http: build_client(TOOL_BRIDGE, timeout)?,
            url: url.map(|u| u.trim_end_matches('/').to_string()),
        })
    }
}

#[async_trait]
impl ToolInvoker for RemoteToolInvoker {
    #[instrument(skip_all, fields(tool_id = %tool))]
    async fn invoke(&self, tool: &ToolId, input: &str) -> Result<String, Report<CollaboratorError>> {
        let base = self
            .url
            .as_deref()
            .ok_or_else(|| not_configured(TOOL_BRIDGE))?;
        let response: InvokeResponse = post_json(
            &self.http,
            TOOL_BRIDGE,
            &format!("{base}/tools/{tool}"),
            &InvokeRequest { input },
        )
        .await?;
        match (response.output, response.error) {
            (_, Some(reason)) => Err(CollaboratorError::Failed { reason }.into()),
            (Some(output), None) => Ok(output),
            (None, None) => Err(CollaboratorError::Failed {
                reason: format!("tool {tool} returned no output"),
            }
            .into()),
        }
    }
}
