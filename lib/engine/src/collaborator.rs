//! External collaborators the engine delegates to.
//!
//! The engine never evaluates a workflow graph or speaks a tool protocol
//! itself. These traits are the seams; the server wires real
//! implementations and tests wire fakes.

use crate::definition::WorkflowDefinition;
use crate::error::CollaboratorError;
use async_trait::async_trait;
use rootcause::Report;
use serde_json::Value as JsonValue;
use taskloom_core::ToolId;

/// Evaluates workflow node graphs.
#[async_trait]
pub trait WorkflowExecutor: Send + Sync {
    /// Runs `workflow` with `context` as its input.
    ///
    /// Returns `None` when the workflow finished without producing output.
    ///
    /// # Errors
    ///
    /// Returns an error if evaluation fails.
    async fn execute(
        &self,
        workflow: &WorkflowDefinition,
        context: &str,
    ) -> Result<Option<JsonValue>, Report<CollaboratorError>>;
}

/// Calls external (MCP) tools.
#[async_trait]
pub trait ToolInvoker: Send + Sync {
    /// Invokes `tool` with `input` and returns its textual output.
    ///
    /// # Errors
    ///
    /// Returns an error if the tool is unavailable or fails.
    async fn invoke(&self, tool: &ToolId, input: &str) -> Result<String, Report<CollaboratorError>>;
}
