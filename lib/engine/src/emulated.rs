//! In-process channel for headless runs.
//!
//! Scheduled, webhook and bot-triggered runs have no client to execute
//! workflows. The emulated channel plays that client: it answers
//! `run_workflow` requests itself and forwards everything else to the
//! broadcaster, so live observers still see the run.

use crate::channel::{Broadcaster, Channel, EnvelopeHandler, Subscribers, SubscriptionId};
use crate::collaborator::WorkflowExecutor;
use crate::definition::WorkflowDefinition;
use crate::envelope::{Envelope, EnvelopeKind, RunWorkflowRequest, WorkflowResultPayload};
use crate::error::ChannelError;
use crate::store::{DurableStore, WorkspaceDataCache};
use async_trait::async_trait;
use rootcause::Report;
use std::sync::Arc;
use taskloom_core::WorkspaceId;
use tracing::{debug, warn};

/// Channel that executes workflows in-process.
pub struct EmulatedChannel {
    workspace_id: WorkspaceId,
    cache: Arc<WorkspaceDataCache>,
    store: Arc<dyn DurableStore>,
    executor: Arc<dyn WorkflowExecutor>,
    broadcaster: Broadcaster,
    subscribers: Subscribers,
}

impl EmulatedChannel {
    /// Creates a channel for runs of `workspace_id`.
    #[must_use]
    pub fn new(
        workspace_id: WorkspaceId,
        cache: Arc<WorkspaceDataCache>,
        store: Arc<dyn DurableStore>,
        executor: Arc<dyn WorkflowExecutor>,
        broadcaster: Broadcaster,
    ) -> Self {
        Self {
            workspace_id,
            cache,
            store,
            executor,
            broadcaster,
            subscribers: Subscribers::new(),
        }
    }

    /// Finds a workflow body in the cache, then in durable storage.
    async fn resolve(&self, request: &RunWorkflowRequest) -> Result<WorkflowDefinition, String> {
        if let Some(workflow) = self
            .cache
            .workflow_body(&self.workspace_id, &request.workflow_id)
            .await
        {
            return Ok(workflow);
        }

        match self
            .store
            .load_workflow(&self.workspace_id, &request.workflow_id)
            .await
        {
            Ok(Some(workflow)) if workflow.body.is_some() => Ok(workflow),
            Ok(_) => Err(format!(
                "workflow {} could not be resolved",
                request.workflow_id
            )),
            Err(report) => Err(format!(
                "workflow {} could not be loaded: {}",
                request.workflow_id,
                report.current_context()
            )),
        }
    }

    async fn run_workflow(&self, request: RunWorkflowRequest) -> WorkflowResultPayload {
        let outcome = match self.resolve(&request).await {
            Ok(workflow) => self
                .executor
                .execute(&workflow, &request.context)
                .await
                .map_err(|report| report.current_context().to_string()),
            Err(reason) => Err(reason),
        };

        match outcome {
            Ok(result) => WorkflowResultPayload {
                request_id: request.request_id,
                result,
                error: None,
            },
            Err(reason) => {
                warn!(
                    workspace_id = %self.workspace_id,
                    workflow_id = %request.workflow_id,
                    %reason,
                    "in-process workflow failed"
                );
                WorkflowResultPayload {
                    request_id: request.request_id,
                    result: None,
                    error: Some(reason),
                }
            }
        }
    }
}

#[async_trait]
impl Channel for EmulatedChannel {
    async fn send(&self, envelope: Envelope) -> Result<(), Report<ChannelError>> {
        if envelope.kind != EnvelopeKind::RunWorkflow {
            self.broadcaster.publish(envelope);
            return Ok(());
        }

        let request: RunWorkflowRequest =
            envelope.payload().map_err(|e| ChannelError::SendFailed {
                reason: format!("malformed run_workflow request: {e}"),
            })?;
        debug!(
            workspace_id = %self.workspace_id,
            workflow_id = %request.workflow_id,
            "executing workflow in-process"
        );

        let reply = self.run_workflow(request).await;
        let reply = Envelope::from_payload(EnvelopeKind::WorkflowResult, &reply).map_err(|e| {
            ChannelError::SendFailed {
                reason: e.to_string(),
            }
        })?;
        self.subscribers.dispatch(&reply);
        Ok(())
    }

    fn subscribe(&self, kind: EnvelopeKind, handler: EnvelopeHandler) -> SubscriptionId {
        self.subscribers.subscribe(kind, handler)
    }

    fn unsubscribe(&self, kind: EnvelopeKind, id: SubscriptionId) -> bool {
        self.subscribers.unsubscribe(kind, id)
    }

    fn is_interactive(&self) -> bool {
        false
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::definition::WorkspaceDefinition;
    use crate::error::CollaboratorError;
    use crate::store::MemoryStore;
    use serde_json::Value as JsonValue;
    use std::sync::Mutex;
    use taskloom_core::{WorkflowId, WorkflowRequestId};

    /// Echoes the workflow name and context.
    struct EchoExecutor;

    #[async_trait]
    impl WorkflowExecutor for EchoExecutor {
        async fn execute(
            &self,
            workflow: &WorkflowDefinition,
            context: &str,
        ) -> Result<Option<JsonValue>, Report<CollaboratorError>> {
            Ok(Some(JsonValue::String(format!("{}:{context}", workflow.name))))
        }
    }

    fn workflow(id: &str, with_body: bool) -> WorkflowDefinition {
        WorkflowDefinition {
            id: WorkflowId::new(id).expect("valid"),
            name: id.to_string(),
            description: None,
            body: with_body.then(|| serde_json::json!({"nodes": []})),
        }
    }

    async fn channel(store: Arc<MemoryStore>, broadcaster: Broadcaster) -> EmulatedChannel {
        let workspace_id = WorkspaceId::new("ws").expect("valid");
        let cache = Arc::new(WorkspaceDataCache::new());
        cache
            .insert(
                WorkspaceDefinition::new(workspace_id.clone(), "ws")
                    .with_workflow(workflow("cached", true))
                    .with_workflow(workflow("stored", false)),
            )
            .await;
        EmulatedChannel::new(workspace_id, cache, store, Arc::new(EchoExecutor), broadcaster)
    }

    fn capture_replies(channel: &EmulatedChannel) -> Arc<Mutex<Vec<WorkflowResultPayload>>> {
        let replies = Arc::new(Mutex::new(Vec::new()));
        let sink = Arc::clone(&replies);
        channel.subscribe(
            EnvelopeKind::WorkflowResult,
            Arc::new(move |envelope: &Envelope| {
                sink.lock()
                    .expect("lock")
                    .push(envelope.payload().expect("workflow result"));
            }),
        );
        replies
    }

    async fn request(channel: &EmulatedChannel, workflow_id: &str) -> WorkflowRequestId {
        let request = RunWorkflowRequest {
            request_id: WorkflowRequestId::new(),
            workflow_id: WorkflowId::new(workflow_id).expect("valid"),
            context: "ctx".to_string(),
        };
        channel
            .send(Envelope::from_payload(EnvelopeKind::RunWorkflow, &request).expect("encode"))
            .await
            .expect("send");
        request.request_id
    }

    #[tokio::test]
    async fn executes_cached_workflow_and_replies_locally() {
        let broadcaster = Broadcaster::new(8);
        let mut observer = broadcaster.subscribe();
        let channel = channel(Arc::new(MemoryStore::new()), broadcaster).await;
        let replies = capture_replies(&channel);

        let request_id = request(&channel, "cached").await;

        let replies = replies.lock().expect("lock");
        assert_eq!(replies.len(), 1);
        assert_eq!(replies[0].request_id, request_id);
        assert_eq!(replies[0].result, Some(JsonValue::String("cached:ctx".into())));
        assert!(observer.try_recv().is_err(), "replies are not broadcast");
    }

    #[tokio::test]
    async fn falls_back_to_durable_store() {
        let store = Arc::new(MemoryStore::new());
        store
            .save_workflow(&WorkspaceId::new("ws").expect("valid"), &workflow("stored", true))
            .await
            .expect("save");
        let channel = channel(store, Broadcaster::default()).await;
        let replies = capture_replies(&channel);

        request(&channel, "stored").await;

        let replies = replies.lock().expect("lock");
        assert_eq!(replies[0].result, Some(JsonValue::String("stored:ctx".into())));
    }

    #[tokio::test]
    async fn unresolvable_workflow_replies_with_error() {
        let channel = channel(Arc::new(MemoryStore::new()), Broadcaster::default()).await;
        let replies = capture_replies(&channel);

        request(&channel, "stored").await;

        let replies = replies.lock().expect("lock");
        assert!(replies[0].result.is_none());
        assert!(
            replies[0]
                .error
                .as_deref()
                .is_some_and(|e| e.contains("could not be resolved"))
        );
    }

    #[tokio::test]
    async fn other_envelopes_are_broadcast() {
        let broadcaster = Broadcaster::new(8);
        let mut observer = broadcaster.subscribe();
        let channel = channel(Arc::new(MemoryStore::new()), broadcaster).await;

        channel
            .send(Envelope::new(EnvelopeKind::Event, serde_json::json!({"id": 1})))
            .await
            .expect("send");

        let seen = observer.recv().await.expect("broadcast");
        assert_eq!(seen.kind, EnvelopeKind::Event);
        assert!(!channel.is_interactive());
    }
}
