//! Agent runtime.
//!
//! An agent receives a task, its upstream context, the core analysis and a
//! step plan, and produces a single string result. [`PlanAgentRuntime`]
//! follows the plan step by step, threading each step's output into the
//! next.

use crate::channel::Channel;
use crate::collaborator::ToolInvoker;
use crate::definition::{AgentDefinition, TaskDefinition};
use crate::error::AgentError;
use crate::planning::{CoreAnalysis, PlanStep, StepAction, StepPlan};
use crate::prompt::PromptBroker;
use async_trait::async_trait;
use rootcause::Report;
use std::sync::Arc;
use std::time::Duration;
use taskloom_ai::{LlmBackend, LlmRequest};
use tracing::{debug, info, instrument};

/// Default time an `ask_user` step waits for an answer.
pub const DEFAULT_PROMPT_TIMEOUT: Duration = Duration::from_secs(300);

/// Everything an agent needs to run one task.
pub struct AgentInvocation<'a> {
    /// The agent doing the work.
    pub agent: &'a AgentDefinition,
    /// The task.
    pub task: &'a TaskDefinition,
    /// Joined upstream results.
    pub context: &'a str,
    /// Core analysis of the task.
    pub analysis: &'a CoreAnalysis,
    /// Steps to follow.
    pub plan: &'a StepPlan,
    /// The run's channel, for interactive prompts.
    pub channel: &'a dyn Channel,
}

/// Runs agents.
#[async_trait]
pub trait AgentRuntime: Send + Sync {
    /// Runs the invocation and returns the agent's result.
    ///
    /// # Errors
    ///
    /// Returns an error if any step fails.
    async fn run(&self, invocation: AgentInvocation<'_>) -> Result<String, Report<AgentError>>;
}

/// Agent runtime that executes a step plan sequentially.
pub struct PlanAgentRuntime {
    llm: Arc<dyn LlmBackend>,
    tools: Arc<dyn ToolInvoker>,
    prompts: Arc<PromptBroker>,
    prompt_timeout: Duration,
}

impl PlanAgentRuntime {
    /// Creates a runtime.
    #[must_use]
    pub fn new(
        llm: Arc<dyn LlmBackend>,
        tools: Arc<dyn ToolInvoker>,
        prompts: Arc<PromptBroker>,
    ) -> Self {
        Self {
            llm,
            tools,
            prompts,
            prompt_timeout: DEFAULT_PROMPT_TIMEOUT,
        }
    }

    /// Sets how long `ask_user` steps wait.
    #[must_use]
    pub fn with_prompt_timeout(mut self, prompt_timeout: Duration) -> Self {
        self.prompt_timeout = prompt_timeout;
        self
    }

    async fn reason(
        &self,
        invocation: &AgentInvocation<'_>,
        step: &PlanStep,
        input: &str,
    ) -> Result<String, Report<AgentError>> {
        let system = if invocation.agent.instructions.trim().is_empty() {
            format!("You are {}.", invocation.agent.name)
        } else {
            invocation.agent.instructions.clone()
        };
        let prompt = format!(
            "Task: {}\nObjective: {}\nExpected output: {}\n\nCurrent step: {}\n\nInput:\n{input}",
            invocation.task.title,
            invocation.analysis.objective,
            invocation.task.expected_output,
            step.description
        );

        self.llm
            .ask(&LlmRequest::new(prompt).with_system(system))
            .await
            .map_err(|report| step_failed(step, report.current_context()).into())
    }

    async fn ask_user(
        &self,
        invocation: &AgentInvocation<'_>,
        step: &PlanStep,
        input: &str,
    ) -> Result<String, Report<AgentError>> {
        if !invocation.channel.is_interactive() {
            info!(step_id = %step.id, "no interactive user, skipping question");
            return Ok(format!(
                "{input}\n\n(Step {} skipped: no interactive user to answer \"{}\")",
                step.id, step.description
            ));
        }

        let answer = self
            .prompts
            .ask(invocation.channel, &step.description, self.prompt_timeout)
            .await
            .map_err(|report| step_failed(step, report.current_context()))?;
        Ok(format!(
            "{input}\n\nUser answer to \"{}\": {answer}",
            step.description
        ))
    }
}

fn step_failed(step: &PlanStep, reason: impl ToString) -> AgentError {
    AgentError::StepFailed {
        step_id: step.id.clone(),
        reason: reason.to_string(),
    }
}

#[async_trait]
impl AgentRuntime for PlanAgentRuntime {
    #[instrument(skip_all, fields(agent_id = %invocation.agent.id, task_id = %invocation.task.id))]
    async fn run(&self, invocation: AgentInvocation<'_>) -> Result<String, Report<AgentError>> {
        if invocation.plan.steps.is_empty() {
            return Err(AgentError::EmptyPlan.into());
        }

        let mut output = invocation.context.to_string();
        for step in &invocation.plan.steps {
            let input = step.input.clone().unwrap_or_else(|| output.clone());
            debug!(step_id = %step.id, action = ?step.action, "running plan step");

            output = match step.action {
                StepAction::Reason => self.reason(&invocation, step, &input).await?,
                StepAction::Tool => {
                    let tool = step.tool.as_ref().ok_or_else(|| AgentError::MissingTool {
                        step_id: step.id.clone(),
                    })?;
                    self.tools
                        .invoke(tool, &input)
                        .await
                        .map_err(|report| step_failed(step, report.current_context()))?
                }
                StepAction::AskUser => self.ask_user(&invocation, step, &input).await?,
            };
        }

        Ok(output)
    }
}
