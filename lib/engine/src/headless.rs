//! Headless workspace execution.
//!
//! Trigger managers hold a [`WorkspaceExecutor`] and never see the
//! orchestrator directly. [`HeadlessRunner`] runs the cached workspace over
//! an [`EmulatedChannel`] so that workflows execute in-process.

use crate::channel::Broadcaster;
use crate::collaborator::WorkflowExecutor;
use crate::emulated::EmulatedChannel;
use crate::error::ExecutionError;
use crate::orchestrator::Orchestrator;
use crate::run::{AbortSignal, RunSummary, TriggerInput};
use crate::store::{DurableStore, WorkspaceDataCache};
use async_trait::async_trait;
use rootcause::Report;
use std::sync::Arc;
use taskloom_core::WorkspaceId;
use tracing::{info, instrument};

/// Runs a workspace without a connected client.
#[async_trait]
pub trait WorkspaceExecutor: Send + Sync {
    /// Runs `workspace_id` with `input`.
    ///
    /// # Errors
    ///
    /// Returns an error if the workspace is not loaded or its graph is
    /// invalid.
    async fn execute(
        &self,
        workspace_id: &WorkspaceId,
        input: TriggerInput,
    ) -> Result<RunSummary, Report<ExecutionError>>;
}

/// [`WorkspaceExecutor`] backed by the orchestrator and an emulated channel.
pub struct HeadlessRunner {
    orchestrator: Arc<Orchestrator>,
    cache: Arc<WorkspaceDataCache>,
    store: Arc<dyn DurableStore>,
    workflows: Arc<dyn WorkflowExecutor>,
    broadcaster: Broadcaster,
}

impl HeadlessRunner {
    /// Creates a runner.
    #[must_use]
    pub fn new(
        orchestrator: Arc<Orchestrator>,
        cache: Arc<WorkspaceDataCache>,
        store: Arc<dyn DurableStore>,
        workflows: Arc<dyn WorkflowExecutor>,
        broadcaster: Broadcaster,
    ) -> Self {
        Self {
            orchestrator,
            cache,
            store,
            workflows,
            broadcaster,
        }
    }
}

#[async_trait]
impl WorkspaceExecutor for HeadlessRunner {
    #[instrument(skip_all, fields(workspace_id = %workspace_id, source = %input.source))]
    async fn execute(
        &self,
        workspace_id: &WorkspaceId,
        input: TriggerInput,
    ) -> Result<RunSummary, Report<ExecutionError>> {
        let workspace =
            self.cache
                .get(workspace_id)
                .await
                .ok_or_else(|| ExecutionError::UnknownWorkspace {
                    workspace_id: workspace_id.clone(),
                })?;

        let channel = EmulatedChannel::new(
            workspace_id.clone(),
            Arc::clone(&self.cache),
            Arc::clone(&self.store),
            Arc::clone(&self.workflows),
            self.broadcaster.clone(),
        );
        info!("starting headless run");

        self.orchestrator
            .run(&workspace, &input, &channel, &AbortSignal::new())
            .await
            .map_err(|report| {
                ExecutionError::RunFailed {
                    workspace_id: workspace_id.clone(),
                    reason: report.current_context().to_string(),
                }
                .into()
            })
    }
}
