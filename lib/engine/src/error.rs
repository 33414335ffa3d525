//! Error types for the engine crate.
//!
//! Errors are layered the same way the run is:
//! - `GraphError`: the task graph itself is invalid (fatal to the run)
//! - `TaskError`: one task failed (recorded, the run continues)
//! - `CollaboratorError`, `AgentError`, `PromptError`: failures reported by
//!   the pieces a task delegates to
//! - `ChannelError`, `StoreError`: transport and persistence failures
//! - `OrchestratorError`, `ExecutionError`: run-level failures

use std::fmt;
use taskloom_core::{AgentId, PromptId, TaskId, ToolId, WorkflowId, WorkspaceId};

/// Errors from task graph linearization.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum GraphError {
    /// Two tasks share the same id.
    DuplicateTask { task_id: TaskId },
    /// A connection references a task that does not exist.
    UnknownTask { task_id: TaskId },
    /// The connections contain a cycle passing through the named task.
    CycleDetected { task_id: TaskId },
}

impl fmt::Display for GraphError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::DuplicateTask { task_id } => write!(f, "duplicate task id: {task_id}"),
            Self::UnknownTask { task_id } => {
                write!(f, "connection references unknown task: {task_id}")
            }
            Self::CycleDetected { task_id } => {
                write!(f, "task graph contains a cycle through task {task_id}")
            }
        }
    }
}

impl std::error::Error for GraphError {}

/// Why a single task failed.
///
/// A task failure never aborts the run; the orchestrator records the message
/// and moves on to the next task.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TaskError {
    /// A statically-typed task has no executor id.
    MissingExecutor { task_id: TaskId },
    /// The executor id does not name anything in the workspace catalog.
    UnknownExecutor {
        task_id: TaskId,
        kind: &'static str,
        executor_id: String,
    },
    /// The language model could not classify the task.
    AssignmentFailed { task_id: TaskId, reason: String },
    /// Core analysis or step planning failed.
    PlanningFailed { task_id: TaskId, reason: String },
    /// The workflow collaborator reported an error.
    WorkflowFailed {
        workflow_id: WorkflowId,
        reason: String,
    },
    /// No workflow reply arrived in time.
    WorkflowTimedOut {
        workflow_id: WorkflowId,
        timeout_secs: u64,
    },
    /// The workflow finished without producing a result.
    EmptyWorkflowResult { workflow_id: WorkflowId },
    /// The agent runtime failed.
    AgentFailed { agent_id: AgentId, reason: String },
    /// The external tool failed.
    ToolFailed { tool_id: ToolId, reason: String },
    /// The active channel could not carry a request.
    Channel { reason: String },
}

impl fmt::Display for TaskError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::MissingExecutor { task_id } => {
                write!(f, "task {task_id} has no executor configured")
            }
            Self::UnknownExecutor {
                task_id,
                kind,
                executor_id,
            } => write!(
                f,
                "task {task_id} references unknown {kind} '{executor_id}'"
            ),
            Self::AssignmentFailed { task_id, reason } => {
                write!(f, "executor assignment failed for task {task_id}: {reason}")
            }
            Self::PlanningFailed { task_id, reason } => {
                write!(f, "planning failed for task {task_id}: {reason}")
            }
            Self::WorkflowFailed {
                workflow_id,
                reason,
            } => write!(f, "workflow {workflow_id} failed: {reason}"),
            Self::WorkflowTimedOut {
                workflow_id,
                timeout_secs,
            } => write!(
                f,
                "workflow {workflow_id} did not reply within {timeout_secs}s"
            ),
            Self::EmptyWorkflowResult { workflow_id } => {
                write!(f, "workflow {workflow_id} returned no result")
            }
            Self::AgentFailed { agent_id, reason } => {
                write!(f, "agent {agent_id} failed: {reason}")
            }
            Self::ToolFailed { tool_id, reason } => write!(f, "tool {tool_id} failed: {reason}"),
            Self::Channel { reason } => write!(f, "channel error: {reason}"),
        }
    }
}

impl std::error::Error for TaskError {}

/// Errors reported by external collaborators (workflow evaluator, tool bridge).
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CollaboratorError {
    /// The collaborator is not configured or cannot be reached.
    Unavailable {
        collaborator: &'static str,
        reason: String,
    },
    /// The collaborator ran and reported a failure.
    Failed { reason: String },
    /// The collaborator did not answer in time.
    Timeout,
}

impl fmt::Display for CollaboratorError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Unavailable {
                collaborator,
                reason,
            } => write!(f, "{collaborator} unavailable: {reason}"),
            Self::Failed { reason } => f.write_str(reason),
            Self::Timeout => write!(f, "collaborator timed out"),
        }
    }
}

impl std::error::Error for CollaboratorError {}

/// Errors from an agent runtime.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum AgentError {
    /// The plan has no steps to run.
    EmptyPlan,
    /// A tool step did not name a tool.
    MissingTool { step_id: String },
    /// A step failed.
    StepFailed { step_id: String, reason: String },
}

impl fmt::Display for AgentError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::EmptyPlan => write!(f, "plan contains no steps"),
            Self::MissingTool { step_id } => write!(f, "step {step_id} names no tool"),
            Self::StepFailed { step_id, reason } => write!(f, "step {step_id} failed: {reason}"),
        }
    }
}

impl std::error::Error for AgentError {}

/// Errors from interactive prompts.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PromptError {
    /// Nobody answered before the deadline.
    TimedOut { prompt_id: PromptId },
    /// The prompt was dropped without an answer.
    Cancelled { prompt_id: PromptId },
    /// The question could not be delivered.
    Undeliverable { reason: String },
}

impl fmt::Display for PromptError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::TimedOut { prompt_id } => write!(f, "prompt {prompt_id} timed out"),
            Self::Cancelled { prompt_id } => write!(f, "prompt {prompt_id} was cancelled"),
            Self::Undeliverable { reason } => write!(f, "prompt could not be sent: {reason}"),
        }
    }
}

impl std::error::Error for PromptError {}

/// Errors from sending on a channel.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ChannelError {
    /// The peer has gone away.
    Closed,
    /// The envelope could not be encoded or delivered.
    SendFailed { reason: String },
}

impl fmt::Display for ChannelError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Closed => write!(f, "channel closed"),
            Self::SendFailed { reason } => write!(f, "send failed: {reason}"),
        }
    }
}

impl std::error::Error for ChannelError {}

/// Errors from durable storage.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum StoreError {
    /// An id cannot be used as a storage path component.
    InvalidKey { key: String },
    /// Reading or writing failed.
    Io { path: String, reason: String },
    /// Stored data could not be encoded or decoded.
    Serialization { reason: String },
}

impl fmt::Display for StoreError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::InvalidKey { key } => write!(f, "invalid storage key: {key}"),
            Self::Io { path, reason } => write!(f, "I/O error on {path}: {reason}"),
            Self::Serialization { reason } => write!(f, "serialization error: {reason}"),
        }
    }
}

impl std::error::Error for StoreError {}

/// Errors that stop a run before any task executes.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum OrchestratorError {
    /// The workspace configuration is invalid.
    InvalidConfiguration {
        workspace_id: WorkspaceId,
        reason: String,
    },
}

impl fmt::Display for OrchestratorError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::InvalidConfiguration {
                workspace_id,
                reason,
            } => write!(
                f,
                "invalid configuration for workspace {workspace_id}: {reason}"
            ),
        }
    }
}

impl std::error::Error for OrchestratorError {}

/// Errors from headless (trigger-driven) execution.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ExecutionError {
    /// The workspace definition is not cached.
    UnknownWorkspace { workspace_id: WorkspaceId },
    /// The run could not start.
    RunFailed {
        workspace_id: WorkspaceId,
        reason: String,
    },
}

impl fmt::Display for ExecutionError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::UnknownWorkspace { workspace_id } => {
                write!(f, "workspace {workspace_id} is not loaded")
            }
            Self::RunFailed {
                workspace_id,
                reason,
            } => write!(f, "run for workspace {workspace_id} failed: {reason}"),
        }
    }
}

impl std::error::Error for ExecutionError {}

#[cfg(test)]
mod tests {
    use super::*;

    fn task(id: &str) -> TaskId {
        TaskId::new(id).expect("valid task id")
    }

    #[test]
    fn graph_error_names_the_task() {
        let err = GraphError::CycleDetected { task_id: task("B") };
        assert_eq!(err.to_string(), "task graph contains a cycle through task B");
    }

    #[test]
    fn unknown_executor_display() {
        let err = TaskError::UnknownExecutor {
            task_id: task("A"),
            kind: "agent",
            executor_id: "ghost".to_string(),
        };
        assert_eq!(err.to_string(), "task A references unknown agent 'ghost'");
    }

    #[test]
    fn workflow_timeout_display() {
        let err = TaskError::WorkflowTimedOut {
            workflow_id: WorkflowId::new("wf").expect("valid"),
            timeout_secs: 30,
        };
        assert!(err.to_string().contains("30s"));
    }

    #[test]
    fn collaborator_failure_is_bare_reason() {
        let err = CollaboratorError::Failed {
            reason: "node exploded".to_string(),
        };
        assert_eq!(err.to_string(), "node exploded");
    }
}
