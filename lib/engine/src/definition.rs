//! Workspace definitions.
//!
//! A workspace is authored elsewhere (the editor UI) and handed to the engine
//! as JSON. The engine never mutates it during a run.

use serde::{Deserialize, Serialize};
use serde_json::Value as JsonValue;
use taskloom_core::{AgentId, TaskId, ToolId, WorkflowId, WorkspaceId};

/// A complete workspace: tasks, their wiring and the executors they may use.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct WorkspaceDefinition {
    /// Workspace identifier.
    pub id: WorkspaceId,
    /// Human-readable name, used in transcripts.
    pub name: String,
    /// Tasks in declaration order.
    #[serde(default)]
    pub tasks: Vec<TaskDefinition>,
    /// Dependency edges between tasks.
    #[serde(default)]
    pub connections: Vec<Connection>,
    /// Configured agents.
    #[serde(default)]
    pub agents: Vec<AgentDefinition>,
    /// Reusable workflows.
    #[serde(default)]
    pub workflows: Vec<WorkflowDefinition>,
    /// External (MCP) tools.
    #[serde(default)]
    pub tools: Vec<ToolDefinition>,
}

impl WorkspaceDefinition {
    /// Creates an empty workspace.
    #[must_use]
    pub fn new(id: WorkspaceId, name: impl Into<String>) -> Self {
        Self {
            id,
            name: name.into(),
            tasks: Vec::new(),
            connections: Vec::new(),
            agents: Vec::new(),
            workflows: Vec::new(),
            tools: Vec::new(),
        }
    }

    /// Adds a task.
    #[must_use]
    pub fn with_task(mut self, task: TaskDefinition) -> Self {
        self.tasks.push(task);
        self
    }

    /// Adds a connection `from -> to`.
    #[must_use]
    pub fn with_connection(mut self, from: TaskId, to: TaskId) -> Self {
        self.connections.push(Connection {
            from_task_id: from,
            to_task_id: to,
        });
        self
    }

    /// Adds an agent.
    #[must_use]
    pub fn with_agent(mut self, agent: AgentDefinition) -> Self {
        self.agents.push(agent);
        self
    }

    /// Adds a workflow.
    #[must_use]
    pub fn with_workflow(mut self, workflow: WorkflowDefinition) -> Self {
        self.workflows.push(workflow);
        self
    }

    /// Adds a tool.
    #[must_use]
    pub fn with_tool(mut self, tool: ToolDefinition) -> Self {
        self.tools.push(tool);
        self
    }

    /// Looks up a task by id.
    #[must_use]
    pub fn task(&self, id: &TaskId) -> Option<&TaskDefinition> {
        self.tasks.iter().find(|task| &task.id == id)
    }

    /// Looks up an agent by id.
    #[must_use]
    pub fn agent(&self, id: &AgentId) -> Option<&AgentDefinition> {
        self.agents.iter().find(|agent| &agent.id == id)
    }

    /// Looks up a workflow by id.
    #[must_use]
    pub fn workflow(&self, id: &WorkflowId) -> Option<&WorkflowDefinition> {
        self.workflows.iter().find(|workflow| &workflow.id == id)
    }

    /// Looks up a tool by id.
    #[must_use]
    pub fn tool(&self, id: &ToolId) -> Option<&ToolDefinition> {
        self.tools.iter().find(|tool| &tool.id == id)
    }
}

/// How a task picks its executor.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum TaskType {
    /// Runs the workflow named by `executorId`.
    Workflow,
    /// Runs the agent named by `executorId`.
    SpecificAgent,
    /// Lets the language model choose an executor at run time.
    Agentic,
    /// Calls the external tool named by `executorId`.
    Mcp,
}

impl TaskType {
    /// Returns the wire name of the type.
    #[must_use]
    pub const fn as_str(&self) -> &'static str {
        match self {
            Self::Workflow => "workflow",
            Self::SpecificAgent => "specific-agent",
            Self::Agentic => "agentic",
            Self::Mcp => "mcp",
        }
    }
}

/// A unit of work in a workspace.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TaskDefinition {
    /// Task identifier.
    pub id: TaskId,
    /// Short title.
    pub title: String,
    /// What the task should accomplish.
    #[serde(default)]
    pub description: String,
    /// What a good result looks like.
    #[serde(default)]
    pub expected_output: String,
    /// Executor selection mode.
    #[serde(rename = "type")]
    pub task_type: TaskType,
    /// Executor reference for statically-typed tasks.
    #[serde(default)]
    pub executor_id: Option<String>,
}

impl TaskDefinition {
    /// Creates a task with empty description and expected output.
    #[must_use]
    pub fn new(id: TaskId, title: impl Into<String>, task_type: TaskType) -> Self {
        Self {
            id,
            title: title.into(),
            description: String::new(),
            expected_output: String::new(),
            task_type,
            executor_id: None,
        }
    }

    /// Sets the description.
    #[must_use]
    pub fn with_description(mut self, description: impl Into<String>) -> Self {
        self.description = description.into();
        self
    }

    /// Sets the expected output.
    #[must_use]
    pub fn with_expected_output(mut self, expected_output: impl Into<String>) -> Self {
        self.expected_output = expected_output.into();
        self
    }

    /// Sets the executor reference.
    #[must_use]
    pub fn with_executor(mut self, executor_id: impl Into<String>) -> Self {
        self.executor_id = Some(executor_id.into());
        self
    }
}

/// A dependency edge: `to` consumes the result of `from`.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Connection {
    /// Upstream task.
    pub from_task_id: TaskId,
    /// Downstream task.
    pub to_task_id: TaskId,
}

/// A configured agent.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AgentDefinition {
    /// Agent identifier.
    pub id: AgentId,
    /// Display name.
    pub name: String,
    /// System instructions given to the model when the agent reasons.
    #[serde(default)]
    pub instructions: String,
    /// Preferred model, if any.
    #[serde(default)]
    pub model: Option<String>,
}

/// A reusable workflow.
///
/// `body` is the opaque node graph evaluated by the workflow collaborator; it
/// is absent when the workspace only references the workflow by id.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct WorkflowDefinition {
    /// Workflow identifier.
    pub id: WorkflowId,
    /// Display name.
    pub name: String,
    /// What the workflow does.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
    /// Node graph.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub body: Option<JsonValue>,
}

/// An external tool reachable through the tool bridge.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ToolDefinition {
    /// Tool identifier.
    pub id: ToolId,
    /// Display name.
    pub name: String,
    /// What the tool does.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn deserializes_camel_case_workspace() {
        let json = r#"{
            "id": "ws-1",
            "name": "Research",
            "tasks": [
                {"id": "A", "title": "Fetch", "type": "workflow", "executorId": "wf-fetch"},
                {"id": "B", "title": "Summarize", "description": "sum it up",
                 "expectedOutput": "a paragraph", "type": "agentic", "executorId": null}
            ],
            "connections": [{"fromTaskId": "A", "toTaskId": "B"}],
            "agents": [{"id": "writer", "name": "Writer", "instructions": "Be concise."}],
            "workflows": [{"id": "wf-fetch", "name": "Fetch"}]
        }"#;

        let workspace: WorkspaceDefinition = serde_json::from_str(json).expect("valid workspace");

        assert_eq!(workspace.tasks.len(), 2);
        assert_eq!(workspace.tasks[0].task_type, TaskType::Workflow);
        assert_eq!(workspace.tasks[0].executor_id.as_deref(), Some("wf-fetch"));
        assert_eq!(workspace.tasks[1].task_type, TaskType::Agentic);
        assert_eq!(workspace.tasks[1].expected_output, "a paragraph");
        assert_eq!(workspace.connections[0].to_task_id.as_str(), "B");
        assert!(workspace.tools.is_empty());
        assert!(workspace.workflows[0].body.is_none());
    }

    #[test]
    fn task_type_wire_names() {
        let json = serde_json::to_string(&TaskType::SpecificAgent).expect("serialize");
        assert_eq!(json, "\"specific-agent\"");
        assert_eq!(TaskType::Mcp.as_str(), "mcp");
    }

    #[test]
    fn rejects_unknown_task_type() {
        let json = r#"{"id": "A", "title": "x", "type": "magic"}"#;
        assert!(serde_json::from_str::<TaskDefinition>(json).is_err());
    }

    #[test]
    fn lookups_by_id() {
        let workspace = WorkspaceDefinition::new(WorkspaceId::new("ws").expect("valid"), "ws")
            .with_tool(ToolDefinition {
                id: ToolId::new("search").expect("valid"),
                name: "Search".to_string(),
                description: None,
            });

        assert!(workspace.tool(&ToolId::new("search").expect("valid")).is_some());
        assert!(workspace.tool(&ToolId::new("other").expect("valid")).is_none());
    }
}
