//! Executor assignment for agentic tasks.
//!
//! The language model sees the task and the workspace catalog and answers
//! with `{type, id, confidence, reasoning}`. The answer is trusted only as
//! far as the catalog allows: an unknown kind or id fails the task, a low
//! confidence is merely reported.

use crate::definition::{TaskDefinition, WorkspaceDefinition};
use crate::error::TaskError;
use crate::executor::Executor;
use rootcause::Report;
use serde::{Deserialize, Serialize};
use taskloom_ai::{LlmBackend, LlmRequest, ask_json};
use tracing::{debug, instrument};

/// Confidence below which an assignment is reported as uncertain.
pub const DEFAULT_LOW_CONFIDENCE_THRESHOLD: f64 = 0.5;

pub(crate) const ASSIGNMENT_SYSTEM_PROMPT: &str = "You route tasks to executors. \
Choose exactly one executor from the catalog for the task. Answer with a single JSON \
object: {\"type\": \"workflow\" | \"agent\" | \"external-tool\", \"id\": \"<catalog id>\", \
\"confidence\": <number between 0 and 1>, \"reasoning\": \"<one sentence>\"}.";

/// The model's choice of executor.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct Assignment {
    /// The chosen executor.
    pub executor: Executor,
    /// Model confidence, clamped to `[0, 1]`.
    pub confidence: f64,
    /// The model's explanation.
    pub reasoning: String,
}

impl Assignment {
    /// Returns true if the confidence is below `threshold`.
    #[must_use]
    pub fn is_low_confidence(&self, threshold: f64) -> bool {
        self.confidence < threshold
    }
}

#[derive(Debug, Deserialize)]
struct RawAssignment {
    #[serde(rename = "type")]
    kind: String,
    #[serde(default)]
    id: Option<String>,
    #[serde(default)]
    confidence: Option<f64>,
    #[serde(default)]
    reasoning: String,
}

#[derive(Serialize)]
struct CatalogEntry<'a> {
    id: &'a str,
    name: &'a str,
    #[serde(skip_serializing_if = "Option::is_none")]
    description: Option<&'a str>,
}

#[derive(Serialize)]
struct Catalog<'a> {
    workflows: Vec<CatalogEntry<'a>>,
    agents: Vec<CatalogEntry<'a>>,
    #[serde(rename = "external-tools")]
    tools: Vec<CatalogEntry<'a>>,
}

fn catalog(workspace: &WorkspaceDefinition) -> Catalog<'_> {
    Catalog {
        workflows: workspace
            .workflows
            .iter()
            .map(|w| CatalogEntry {
                id: w.id.as_str(),
                name: &w.name,
                description: w.description.as_deref(),
            })
            .collect(),
        agents: workspace
            .agents
            .iter()
            .map(|a| CatalogEntry {
                id: a.id.as_str(),
                name: &a.name,
                description: Some(a.instructions.as_str()).filter(|i| !i.is_empty()),
            })
            .collect(),
        tools: workspace
            .tools
            .iter()
            .map(|t| CatalogEntry {
                id: t.id.as_str(),
                name: &t.name,
                description: t.description.as_deref(),
            })
            .collect(),
    }
}

fn assignment_request(task: &TaskDefinition, workspace: &WorkspaceDefinition) -> LlmRequest {
    let catalog = serde_json::to_string_pretty(&catalog(workspace)).unwrap_or_default();
    let prompt = format!(
        "Task: {}\nDescription: {}\nExpected output: {}\n\nCatalog:\n{catalog}",
        task.title, task.description, task.expected_output
    );
    LlmRequest::new(prompt)
        .with_system(ASSIGNMENT_SYSTEM_PROMPT)
        .with_temperature(0.0)
}

/// Asks the model which executor should run `task`.
///
/// # Errors
///
/// Returns an error if the model call fails, the answer is not valid JSON,
/// or it names an executor missing from the workspace.
#[instrument(skip_all, fields(task_id = %task.id))]
pub async fn assign_executor(
    llm: &dyn LlmBackend,
    task: &TaskDefinition,
    workspace: &WorkspaceDefinition,
) -> Result<Assignment, Report<TaskError>> {
    let raw: RawAssignment = ask_json(llm, &assignment_request(task, workspace))
        .await
        .map_err(|report| TaskError::AssignmentFailed {
            task_id: task.id.clone(),
            reason: report.current_context().to_string(),
        })?;

    let executor_id = raw
        .id
        .as_deref()
        .filter(|id| !id.trim().is_empty())
        .ok_or_else(|| TaskError::AssignmentFailed {
            task_id: task.id.clone(),
            reason: "model did not name an executor".to_string(),
        })?;
    let executor = Executor::from_catalog(&raw.kind, executor_id, task, workspace)?;

    let confidence = raw
        .confidence
        .filter(|c| c.is_finite())
        .unwrap_or(0.0)
        .clamp(0.0, 1.0);
    debug!(%executor, confidence, "executor assigned");

    Ok(Assignment {
        executor,
        confidence,
        reasoning: raw.reasoning,
    })
}
