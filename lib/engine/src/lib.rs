//! Orchestration engine for taskloom workspaces.
//!
//! This crate provides:
//!
//! - **Definitions**: workspaces, tasks, connections and the executor catalog
//! - **Graph**: linearization of a task graph into dependency layers
//! - **Assignment**: model-driven executor choice for agentic tasks
//! - **Orchestrator**: layer-by-layer execution with context passing
//! - **Channels**: the envelope protocol, interactive and emulated transports
//! - **Storage**: the workspace cache, transcripts and run metadata
//!
//! Trigger managers and transports live in other crates and reach the
//! orchestrator through [`WorkspaceExecutor`] and [`Channel`].

pub mod agent;
pub mod assignment;
pub mod channel;
pub mod collaborator;
pub mod context;
pub mod definition;
pub mod emulated;
pub mod envelope;
pub mod error;
pub mod event;
pub mod executor;
pub mod graph;
pub mod headless;
pub mod orchestrator;
pub mod planning;
pub mod prompt;
pub mod run;
pub mod store;
pub mod transcript;

pub use agent::{AgentInvocation, AgentRuntime, PlanAgentRuntime};
pub use assignment::{Assignment, assign_executor};
pub use channel::{Broadcaster, Channel, EnvelopeHandler, Subscribers, SubscriptionId};
pub use collaborator::{ToolInvoker, WorkflowExecutor};
pub use context::{ResultMap, build_context};
pub use definition::{
    AgentDefinition, Connection, TaskDefinition, TaskType, ToolDefinition, WorkflowDefinition,
    WorkspaceDefinition,
};
pub use emulated::EmulatedChannel;
pub use envelope::{Envelope, EnvelopeKind, ErrorCode, ErrorPayload};
pub use error::{
    AgentError, ChannelError, CollaboratorError, ExecutionError, GraphError, OrchestratorError,
    PromptError, StoreError, TaskError,
};
pub use event::{EventEmitter, EventLevel, RunEvent};
pub use executor::Executor;
pub use graph::{ExecutionLayer, ExecutionPlan, PlannedTask, linearize};
pub use headless::{HeadlessRunner, WorkspaceExecutor};
pub use orchestrator::{Orchestrator, OrchestratorConfig};
pub use prompt::PromptBroker;
pub use run::{AbortSignal, RunStatus, RunSummary, TaskFailure, TriggerInput, TriggerSource};
pub use store::{DurableStore, FsStore, MemoryStore, WorkspaceDataCache};
pub use transcript::Transcript;
