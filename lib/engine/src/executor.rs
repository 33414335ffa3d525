//! Executor kinds and static resolution.

use crate::definition::{TaskDefinition, TaskType, WorkspaceDefinition};
use crate::error::TaskError;
use rootcause::Report;
use serde::Serialize;
use std::fmt;
use taskloom_core::{AgentId, ToolId, WorkflowId};

/// The mechanism that carries out a task.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize)]
#[serde(tag = "type", content = "id", rename_all = "kebab-case")]
pub enum Executor {
    /// A workflow, executed through the active channel.
    Workflow(WorkflowId),
    /// An agent, run after analysis and planning.
    Agent(AgentId),
    /// An external tool.
    #[serde(rename = "external-tool")]
    Tool(ToolId),
}

impl Executor {
    /// Returns the kind name used in messages and model answers.
    #[must_use]
    pub const fn kind(&self) -> &'static str {
        match self {
            Self::Workflow(_) => "workflow",
            Self::Agent(_) => "agent",
            Self::Tool(_) => "external-tool",
        }
    }

    /// Resolves the executor of a statically-typed task.
    ///
    /// Returns `Ok(None)` for agentic tasks, which need assignment.
    ///
    /// # Errors
    ///
    /// Returns an error if the executor id is missing, malformed, or not in
    /// the workspace catalog.
    pub fn for_task(
        task: &TaskDefinition,
        workspace: &WorkspaceDefinition,
    ) -> Result<Option<Self>, Report<TaskError>> {
        let kind = match task.task_type {
            TaskType::Agentic => return Ok(None),
            TaskType::Workflow => "workflow",
            TaskType::SpecificAgent => "agent",
            TaskType::Mcp => "external-tool",
        };

        let executor_id = task
            .executor_id
            .as_deref()
            .filter(|id| !id.trim().is_empty())
            .ok_or_else(|| TaskError::MissingExecutor {
                task_id: task.id.clone(),
            })?;

        Self::from_catalog(kind, executor_id, task, workspace).map(Some)
    }

    /// Builds an executor of `kind` and checks it exists in the workspace.
    ///
    /// # Errors
    ///
    /// Returns an error if `kind` is unknown or the id is dangling.
    pub fn from_catalog(
        kind: &str,
        executor_id: &str,
        task: &TaskDefinition,
        workspace: &WorkspaceDefinition,
    ) -> Result<Self, Report<TaskError>> {
        let unknown = |kind: &'static str| TaskError::UnknownExecutor {
            task_id: task.id.clone(),
            kind,
            executor_id: executor_id.to_string(),
        };

        let executor = match kind {
            "workflow" => WorkflowId::new(executor_id)
                .ok()
                .filter(|id| workspace.workflow(id).is_some())
                .map(Self::Workflow)
                .ok_or_else(|| unknown("workflow"))?,
            "agent" => AgentId::new(executor_id)
                .ok()
                .filter(|id| workspace.agent(id).is_some())
                .map(Self::Agent)
                .ok_or_else(|| unknown("agent"))?,
            "external-tool" | "tool" | "mcp" => ToolId::new(executor_id)
                .ok()
                .filter(|id| workspace.tool(id).is_some())
                .map(Self::Tool)
                .ok_or_else(|| unknown("external-tool"))?,
            _ => return Err(unknown("executor").into()),
        };
        Ok(executor)
    }
}

impl fmt::Display for Executor {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Workflow(id) => write!(f, "workflow {id}"),
            Self::Agent(id) => write!(f, "agent {id}"),
            Self::Tool(id) => write!(f, "external-tool {id}"),
        }
    }
}
