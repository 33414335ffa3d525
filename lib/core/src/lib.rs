//! Core identifiers and error handling for taskloom.
//!
//! This crate provides the foundational types shared by the orchestration
//! engine, the trigger layer and the server binary.

pub mod error;
pub mod id;

pub use error::Result;
pub use id::{
    AgentId, JobId, ParseIdError, PromptId, RunId, TaskId, ToolId, WorkflowId, WorkflowRequestId,
    WorkspaceId,
};
