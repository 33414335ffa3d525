//! Workspace orchestrator.
//!
//! One call to [`Orchestrator::run`] executes one workspace run:
//! 1. Linearize the task graph (an invalid graph stops the run here)
//! 2. Walk the layers in order, tasks within a layer in declaration order
//! 3. For each task: build its context, resolve or assign an executor,
//!    dispatch, record the result or the failure
//! 4. Finalize: completion event, transcript, metadata record
//!
//! A failed task never stops the run. Cancellation is cooperative and only
//! observed between layers.

use crate::agent::{AgentInvocation, AgentRuntime};
use crate::assignment::{DEFAULT_LOW_CONFIDENCE_THRESHOLD, assign_executor};
use crate::channel::{Channel, EnvelopeHandler};
use crate::collaborator::ToolInvoker;
use crate::context::{DEFAULT_CONTEXT_SEPARATOR, ResultMap, build_context};
use crate::definition::{TaskDefinition, WorkspaceDefinition};
use crate::envelope::{Envelope, EnvelopeKind, RunWorkflowRequest, WorkflowResultPayload};
use crate::error::{OrchestratorError, TaskError};
use crate::event::{EventEmitter, EventLevel};
use crate::executor::Executor;
use crate::graph::{ExecutionPlan, PlannedTask, linearize};
use crate::planning::{analyze_task, plan_steps};
use crate::run::{AbortSignal, RunStatus, RunSummary, TaskFailure, TriggerInput};
use crate::store::{DurableStore, RUN_METADATA_KEY, RunMetadata};
use crate::transcript::{TaskOutcome, Transcript};
use rootcause::Report;
use serde_json::{Value as JsonValue, json};
use std::collections::HashMap;
use std::sync::{Arc, Mutex, PoisonError};
use std::time::Duration;
use taskloom_ai::{LlmBackend, LlmError};
use taskloom_core::{AgentId, RunId, TaskId, WorkflowId, WorkflowRequestId};
use tokio::sync::oneshot;
use tracing::{error, info, instrument, warn};

/// How long a workflow may take before its task fails.
pub const DEFAULT_WORKFLOW_TIMEOUT: Duration = Duration::from_secs(300);

/// Orchestrator tuning.
#[derive(Debug, Clone, PartialEq)]
pub struct OrchestratorConfig {
    /// Placed between upstream results in a task's context.
    pub context_separator: String,
    /// Deadline for a `workflow_result` reply.
    pub workflow_timeout: Duration,
    /// Assignments below this confidence are reported.
    pub low_confidence_threshold: f64,
}

impl Default for OrchestratorConfig {
    fn default() -> Self {
        Self {
            context_separator: DEFAULT_CONTEXT_SEPARATOR.to_string(),
            workflow_timeout: DEFAULT_WORKFLOW_TIMEOUT,
            low_confidence_threshold: DEFAULT_LOW_CONFIDENCE_THRESHOLD,
        }
    }
}

/// Executes workspace runs.
pub struct Orchestrator {
    llm: Arc<dyn LlmBackend>,
    agents: Arc<dyn AgentRuntime>,
    tools: Arc<dyn ToolInvoker>,
    store: Arc<dyn DurableStore>,
    config: OrchestratorConfig,
}

impl Orchestrator {
    /// Creates an orchestrator with default configuration.
    #[must_use]
    pub fn new(
        llm: Arc<dyn LlmBackend>,
        agents: Arc<dyn AgentRuntime>,
        tools: Arc<dyn ToolInvoker>,
        store: Arc<dyn DurableStore>,
    ) -> Self {
        Self {
            llm,
            agents,
            tools,
            store,
            config: OrchestratorConfig::default(),
        }
    }

    /// Replaces the configuration.
    #[must_use]
    pub fn with_config(mut self, config: OrchestratorConfig) -> Self {
        self.config = config;
        self
    }

    /// Returns the configuration.
    #[must_use]
    pub fn config(&self) -> &OrchestratorConfig {
        &self.config
    }

    /// Runs `workspace` over `channel`.
    ///
    /// # Errors
    ///
    /// Returns an error only if the task graph is invalid; task failures are
    /// reported in the summary.
    #[instrument(skip_all, fields(workspace_id = %workspace.id, source = %input.source))]
    pub async fn run(
        &self,
        workspace: &WorkspaceDefinition,
        input: &TriggerInput,
        channel: &dyn Channel,
        abort: &AbortSignal,
    ) -> Result<RunSummary, Report<OrchestratorError>> {
        let run_id = RunId::new();
        let mut events = EventEmitter::new(run_id, channel);
        info!(%run_id, "run started");
        events
            .emit_with(
                EventLevel::System,
                format!("Run started for workspace {}", workspace.name),
                Some(json!({ "workspaceId": workspace.id, "source": input.source })),
            )
            .await;

        let plan = match linearize(&workspace.tasks, &workspace.connections) {
            Ok(plan) => plan,
            Err(report) => {
                let reason = report.current_context().to_string();
                error!(%run_id, %reason, "invalid task graph");
                events
                    .emit(EventLevel::Error, format!("Configuration error: {reason}"))
                    .await;
                return Err(OrchestratorError::InvalidConfiguration {
                    workspace_id: workspace.id.clone(),
                    reason,
                }
                .into());
            }
        };
        events
            .emit_with(
                EventLevel::System,
                format!(
                    "Execution plan ready: {} tasks in {} layers",
                    plan.task_count(),
                    plan.layer_count()
                ),
                serde_json::to_value(&plan).ok(),
            )
            .await;

        let trigger_context = input.render_context();
        let mut results = ResultMap::new();
        let mut failures = Vec::new();
        let mut outcomes: HashMap<TaskId, TaskOutcome> = HashMap::new();
        let mut status = RunStatus::Completed;

        for layer in plan.layers() {
            if abort.is_aborted() {
                status = RunStatus::Aborted;
                warn!(%run_id, layer = layer.index, "run aborted");
                events
                    .emit(
                        EventLevel::System,
                        format!("Run aborted before layer {}", layer.index + 1),
                    )
                    .await;
                break;
            }

            let titles: Vec<&str> = layer
                .tasks
                .iter()
                .filter_map(|planned| workspace.task(&planned.task_id))
                .map(|task| task.title.as_str())
                .collect();
            events
                .emit(
                    EventLevel::System,
                    format!(
                        "Layer {}/{}: {}",
                        layer.index + 1,
                        plan.layer_count(),
                        titles.join(", ")
                    ),
                )
                .await;

            for planned in &layer.tasks {
                let Some(task) = workspace.task(&planned.task_id) else {
                    continue;
                };
                let context = self.task_context(planned, &results, trigger_context.as_deref());

                events
                    .emit_with(
                        EventLevel::Info,
                        format!("Running task {}", task.title),
                        Some(json!({ "taskId": task.id })),
                    )
                    .await;

                match self
                    .run_task(task, workspace, &context, channel, &mut events)
                    .await
                {
                    Ok(result) => {
                        info!(%run_id, task_id = %task.id, "task completed");
                        events
                            .emit_with(
                                EventLevel::Success,
                                format!("Task {} completed", task.title),
                                Some(json!({ "taskId": task.id, "result": result })),
                            )
                            .await;
                        outcomes.insert(task.id.clone(), TaskOutcome::Completed(result.clone()));
                        results.insert(task.id.clone(), result);
                    }
                    Err(report) => {
                        let message = report.current_context().to_string();
                        warn!(%run_id, task_id = %task.id, error = %message, "task failed");
                        events
                            .emit_with(
                                EventLevel::Error,
                                format!("Task {} failed: {message}", task.title),
                                Some(json!({ "taskId": task.id, "error": message })),
                            )
                            .await;
                        outcomes.insert(task.id.clone(), TaskOutcome::Failed(message.clone()));
                        failures.push(TaskFailure {
                            task_id: task.id.clone(),
                            message,
                        });
                    }
                }
            }
        }

        let final_task = plan.final_task().map(|planned| &planned.task_id);
        let final_output = match status {
            RunStatus::Completed => final_task
                .and_then(|task_id| results.get(task_id))
                .map(str::to_string),
            RunStatus::Aborted => None,
        };
        let summary = RunSummary {
            run_id,
            workspace_id: workspace.id.clone(),
            status,
            results,
            failures,
            final_output,
        };

        let completion = match (&summary.final_output, final_task) {
            (Some(result), Some(task_id)) => json!({ "taskId": task_id, "result": result }),
            _ => json!({ "results": summary.results }),
        };
        match status {
            RunStatus::Completed => {
                events
                    .emit_with(EventLevel::Success, "Run completed", Some(completion))
                    .await;
            }
            RunStatus::Aborted => {
                events
                    .emit_with(EventLevel::System, "Run aborted", Some(completion))
                    .await;
            }
        }

        let transcript = build_transcript(workspace, &plan, &mut outcomes, &summary);
        self.persist(workspace, &transcript, &summary, &mut events)
            .await;

        match Envelope::from_payload(EnvelopeKind::RunCompleted, &summary) {
            Ok(envelope) => {
                if let Err(report) = channel.send(envelope).await {
                    warn!(%run_id, error = %report.current_context(), "failed to announce run completion");
                }
            }
            Err(e) => warn!(%run_id, error = %e, "failed to encode run summary"),
        }

        info!(
            %run_id,
            %status,
            completed = summary.results.len(),
            failed = summary.failures.len(),
            "run finished"
        );
        Ok(summary)
    }

    fn task_context(
        &self,
        planned: &PlannedTask,
        results: &ResultMap,
        trigger_context: Option<&str>,
    ) -> String {
        match trigger_context {
            Some(trigger) if planned.upstream_ids.is_empty() => trigger.to_string(),
            _ => build_context(
                &planned.upstream_ids,
                results,
                &self.config.context_separator,
            ),
        }
    }

    async fn run_task(
        &self,
        task: &TaskDefinition,
        workspace: &WorkspaceDefinition,
        context: &str,
        channel: &dyn Channel,
        events: &mut EventEmitter<'_>,
    ) -> Result<String, Report<TaskError>> {
        let executor = match Executor::for_task(task, workspace)? {
            Some(executor) => executor,
            None => {
                let assignment = assign_executor(self.llm.as_ref(), task, workspace).await?;
                events
                    .emit_with(
                        EventLevel::Info,
                        format!(
                            "Task {} assigned to {} (confidence {:.2}): {}",
                            task.title,
                            assignment.executor,
                            assignment.confidence,
                            assignment.reasoning
                        ),
                        serde_json::to_value(&assignment).ok(),
                    )
                    .await;

                if assignment.is_low_confidence(self.config.low_confidence_threshold) {
                    warn!(
                        task_id = %task.id,
                        executor = %assignment.executor,
                        confidence = assignment.confidence,
                        "low-confidence executor assignment"
                    );
                    events
                        .emit(
                            EventLevel::Info,
                            format!(
                                "Low-confidence assignment for task {}: proceeding with {}",
                                task.title, assignment.executor
                            ),
                        )
                        .await;
                }
                assignment.executor
            }
        };

        match executor {
            Executor::Workflow(workflow_id) => self.run_workflow(&workflow_id, context, channel).await,
            Executor::Agent(agent_id) => {
                self.run_agent(&agent_id, task, workspace, context, channel, events)
                    .await
            }
            Executor::Tool(tool_id) => {
                self.tools
                    .invoke(&tool_id, context)
                    .await
                    .map_err(|report| {
                        TaskError::ToolFailed {
                            tool_id: tool_id.clone(),
                            reason: report.current_context().to_string(),
                        }
                        .into()
                    })
            }
        }
    }

    /// Sends `run_workflow` over the channel and waits for the matching reply.
    async fn run_workflow(
        &self,
        workflow_id: &WorkflowId,
        context: &str,
        channel: &dyn Channel,
    ) -> Result<String, Report<TaskError>> {
        let request = RunWorkflowRequest {
            request_id: WorkflowRequestId::new(),
            workflow_id: workflow_id.clone(),
            context: context.to_string(),
        };
        let envelope = Envelope::from_payload(EnvelopeKind::RunWorkflow, &request).map_err(|e| {
            TaskError::Channel {
                reason: e.to_string(),
            }
        })?;

        let (sender, receiver) = oneshot::channel::<WorkflowResultPayload>();
        let sender = Mutex::new(Some(sender));
        let request_id = request.request_id;
        let handler: EnvelopeHandler = Arc::new(move |envelope: &Envelope| {
            let Ok(reply) = envelope.payload::<WorkflowResultPayload>() else {
                return;
            };
            if reply.request_id != request_id {
                return;
            }
            if let Some(sender) = sender.lock().unwrap_or_else(PoisonError::into_inner).take() {
                let _ = sender.send(reply);
            }
        });
        let subscription = channel.subscribe(EnvelopeKind::WorkflowResult, handler);

        let exchange = async {
            match channel.send(envelope).await {
                Ok(()) => receiver.await.map_err(|_| TaskError::Channel {
                    reason: "workflow reply was dropped".to_string(),
                }),
                Err(report) => Err(TaskError::Channel {
                    reason: report.current_context().to_string(),
                }),
            }
        };
        let outcome = tokio::time::timeout(self.config.workflow_timeout, exchange).await;
        channel.unsubscribe(EnvelopeKind::WorkflowResult, subscription);

        let reply = match outcome {
            Ok(reply) => reply?,
            Err(_) => {
                return Err(TaskError::WorkflowTimedOut {
                    workflow_id: workflow_id.clone(),
                    timeout_secs: self.config.workflow_timeout.as_secs(),
                }
                .into());
            }
        };

        if let Some(reason) = reply.error {
            return Err(TaskError::WorkflowFailed {
                workflow_id: workflow_id.clone(),
                reason,
            }
            .into());
        }
        match reply.result {
            None | Some(JsonValue::Null) => Err(TaskError::EmptyWorkflowResult {
                workflow_id: workflow_id.clone(),
            }
            .into()),
            Some(JsonValue::String(text)) => Ok(text),
            Some(structured) => Ok(structured.to_string()),
        }
    }

    /// Analysis, planning, then the agent runtime.
    async fn run_agent(
        &self,
        agent_id: &AgentId,
        task: &TaskDefinition,
        workspace: &WorkspaceDefinition,
        context: &str,
        channel: &dyn Channel,
        events: &mut EventEmitter<'_>,
    ) -> Result<String, Report<TaskError>> {
        let agent = workspace
            .agent(agent_id)
            .ok_or_else(|| TaskError::UnknownExecutor {
                task_id: task.id.clone(),
                kind: "agent",
                executor_id: agent_id.to_string(),
            })?;
        let planning_failed = |report: Report<LlmError>| TaskError::PlanningFailed {
            task_id: task.id.clone(),
            reason: report.current_context().to_string(),
        };

        let analysis = analyze_task(self.llm.as_ref(), task, context)
            .await
            .map_err(planning_failed)?;
        events
            .emit_with(
                EventLevel::Info,
                format!("Analysis ready for task {}: {}", task.title, analysis.objective),
                serde_json::to_value(&analysis).ok(),
            )
            .await;

        let plan = plan_steps(self.llm.as_ref(), task, agent, &analysis)
            .await
            .map_err(planning_failed)?;
        events
            .emit_with(
                EventLevel::Info,
                format!(
                    "Plan ready for task {}: {} steps with agent {}",
                    task.title,
                    plan.steps.len(),
                    agent.name
                ),
                serde_json::to_value(&plan).ok(),
            )
            .await;

        self.agents
            .run(AgentInvocation {
                agent,
                task,
                context,
                analysis: &analysis,
                plan: &plan,
                channel,
            })
            .await
            .map_err(|report| {
                TaskError::AgentFailed {
                    agent_id: agent_id.clone(),
                    reason: report.current_context().to_string(),
                }
                .into()
            })
    }

    /// Writes the transcript and metadata record. Failures are reported, not
    /// returned.
    async fn persist(
        &self,
        workspace: &WorkspaceDefinition,
        transcript: &Transcript,
        summary: &RunSummary,
        events: &mut EventEmitter<'_>,
    ) {
        if let Err(report) = self
            .store
            .append_transcript(&workspace.id, &transcript.render())
            .await
        {
            error!(run_id = %summary.run_id, error = %report.current_context(), "failed to write transcript");
            events
                .emit(
                    EventLevel::Error,
                    format!("Failed to write transcript: {}", report.current_context()),
                )
                .await;
        }

        let metadata = RunMetadata::new(summary.run_id, summary.status);
        let stored = match serde_json::to_value(&metadata) {
            Ok(value) => self
                .store
                .put_metadata(&workspace.id, RUN_METADATA_KEY, &value)
                .await
                .map_err(|report| report.current_context().to_string()),
            Err(e) => Err(e.to_string()),
        };
        if let Err(reason) = stored {
            error!(run_id = %summary.run_id, error = %reason, "failed to store run metadata");
            events
                .emit(
                    EventLevel::Error,
                    format!("Failed to store run metadata: {reason}"),
                )
                .await;
        }
    }
}

fn build_transcript(
    workspace: &WorkspaceDefinition,
    plan: &ExecutionPlan,
    outcomes: &mut HashMap<TaskId, TaskOutcome>,
    summary: &RunSummary,
) -> Transcript {
    let mut transcript = Transcript::new(&workspace.name, summary.run_id, summary.status);
    for planned in plan.tasks() {
        let title = workspace
            .task(&planned.task_id)
            .map_or_else(|| planned.task_id.to_string(), |task| task.title.clone());
        let outcome = outcomes
            .remove(&planned.task_id)
            .unwrap_or(TaskOutcome::NotRun);
        transcript.push(planned.task_id.clone(), title, outcome);
    }
    transcript
}
