//! Core analysis and step planning for agent-executed tasks.
//!
//! Before an agent runs, the model is asked twice: once to distil the task
//! into a [`CoreAnalysis`], then to break it into a sequential [`StepPlan`]
//! the agent runtime can follow.

use crate::definition::{AgentDefinition, TaskDefinition};
use rootcause::Report;
use serde::{Deserialize, Serialize};
use taskloom_ai::{LlmBackend, LlmError, LlmRequest, ask_json};
use taskloom_core::ToolId;
use tracing::instrument;

pub(crate) const ANALYSIS_SYSTEM_PROMPT: &str = "You analyse tasks before they are \
executed. Answer with a single JSON object: {\"objective\": \"...\", \"keyRequirements\": \
[\"...\"], \"constraints\": [\"...\"], \"successCriteria\": [\"...\"]}.";

pub(crate) const PLAN_SYSTEM_PROMPT: &str = "You plan how an agent completes a task. \
Answer with a single JSON object: {\"steps\": [{\"id\": \"1\", \"description\": \"...\", \
\"action\": \"reason\" | \"tool\" | \"ask_user\", \"tool\": \"<tool id, for tool steps>\", \
\"input\": \"<optional input>\"}]}. Steps run in order and each sees the previous \
step's output.";

/// Structured understanding of a task.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CoreAnalysis {
    /// What the task is for.
    pub objective: String,
    /// What the result must contain.
    #[serde(default)]
    pub key_requirements: Vec<String>,
    /// Limits to respect.
    #[serde(default)]
    pub constraints: Vec<String>,
    /// How to tell the task succeeded.
    #[serde(default)]
    pub success_criteria: Vec<String>,
}

/// What a plan step does.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum StepAction {
    /// Ask the model, in the agent's voice.
    Reason,
    /// Call an external tool.
    Tool,
    /// Ask the interactive user.
    AskUser,
}

/// One step of a plan.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PlanStep {
    /// Step label.
    pub id: String,
    /// What the step should achieve.
    pub description: String,
    /// How the step is carried out.
    pub action: StepAction,
    /// Tool to call, for tool steps.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub tool: Option<ToolId>,
    /// Explicit input; defaults to the previous step's output.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub input: Option<String>,
}

/// Ordered steps for an agent to follow.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct StepPlan {
    /// Steps in execution order.
    #[serde(default)]
    pub steps: Vec<PlanStep>,
}

fn task_brief(task: &TaskDefinition, context: &str) -> String {
    let mut brief = format!(
        "Task: {}\nDescription: {}\nExpected output: {}",
        task.title, task.description, task.expected_output
    );
    if !context.is_empty() {
        brief.push_str("\n\nContext:\n");
        brief.push_str(context);
    }
    brief
}

/// Asks the model for a core analysis of `task`.
///
/// # Errors
///
/// Returns an error if the call fails or the answer does not parse.
#[instrument(skip_all, fields(task_id = %task.id))]
pub async fn analyze_task(
    llm: &dyn LlmBackend,
    task: &TaskDefinition,
    context: &str,
) -> Result<CoreAnalysis, Report<LlmError>> {
    let request = LlmRequest::new(task_brief(task, context))
        .with_system(ANALYSIS_SYSTEM_PROMPT)
        .with_temperature(0.2);
    ask_json(llm, &request).await
}

/// Asks the model for a step plan executing `analysis` with `agent`.
///
/// # Errors
///
/// Returns an error if the call fails or the answer does not parse.
#[instrument(skip_all, fields(task_id = %task.id, agent_id = %agent.id))]
pub async fn plan_steps(
    llm: &dyn LlmBackend,
    task: &TaskDefinition,
    agent: &AgentDefinition,
    analysis: &CoreAnalysis,
) -> Result<StepPlan, Report<LlmError>> {
    let analysis_json = serde_json::to_string_pretty(analysis).unwrap_or_default();
    let prompt = format!(
        "{}\n\nAgent: {}\nAgent instructions: {}\n\nAnalysis:\n{analysis_json}",
        task_brief(task, ""),
        agent.name,
        agent.instructions
    );
    let request = LlmRequest::new(prompt)
        .with_system(PLAN_SYSTEM_PROMPT)
        .with_temperature(0.2);
    ask_json(llm, &request).await
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn plan_parses_all_actions() {
        let json = r#"{"steps": [
            {"id": "1", "description": "look things up", "action": "tool", "tool": "search"},
            {"id": "2", "description": "confirm scope", "action": "ask_user"},
            {"id": "3", "description": "write it", "action": "reason", "input": "draft"}
        ]}"#;

        let plan: StepPlan = serde_json::from_str(json).expect("valid plan");

        assert_eq!(plan.steps.len(), 3);
        assert_eq!(plan.steps[0].action, StepAction::Tool);
        assert_eq!(plan.steps[0].tool.as_ref().map(ToolId::as_str), Some("search"));
        assert_eq!(plan.steps[1].action, StepAction::AskUser);
        assert_eq!(plan.steps[2].input.as_deref(), Some("draft"));
    }

    #[test]
    fn analysis_lists_default_to_empty() {
        let analysis: CoreAnalysis =
            serde_json::from_str(r#"{"objective": "ship it"}"#).expect("valid analysis");
        assert_eq!(analysis.objective, "ship it");
        assert!(analysis.key_requirements.is_empty());
        assert!(analysis.success_criteria.is_empty());
    }

    #[test]
    fn brief_includes_context_only_when_present() {
        let task = TaskDefinition::new(
            taskloom_core::TaskId::new("A").expect("valid"),
            "Title",
            crate::definition::TaskType::Agentic,
        );
        assert!(!task_brief(&task, "").contains("Context:"));
        assert!(task_brief(&task, "upstream").ends_with("Context:\nupstream"));
    }
}
