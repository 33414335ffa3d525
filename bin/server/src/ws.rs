//! Live client connections.
//!
//! Each WebSocket connection gets a [`SocketChannel`] for its interactive
//! runs and also receives every envelope published on the broadcaster, so a
//! connected client sees headless runs as they happen.

use crate::error::InboundError;
use crate::inbound::{self, Inbound};
use crate::state::AppState;
use async_trait::async_trait;
use axum::extract::State;
use axum::extract::ws::{Message, WebSocket, WebSocketUpgrade};
use axum::response::IntoResponse;
use futures::{SinkExt, StreamExt};
use rootcause::Report;
use serde_json::Value as JsonValue;
use std::sync::Arc;
use taskloom_engine::envelope::ResolvePrompt;
use taskloom_engine::{
    AbortSignal, Channel, ChannelError, Envelope, EnvelopeHandler, EnvelopeKind, Subscribers,
    SubscriptionId, TriggerInput, TriggerSource, WorkspaceDefinition,
};
use tokio::sync::broadcast::error::RecvError;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

/// Channel backed by one client connection.
pub struct SocketChannel {
    outbound: mpsc::UnboundedSender<Envelope>,
    subscribers: Subscribers,
}

impl SocketChannel {
    /// Creates a channel and the receiver its writer drains.
    #[must_use]
    pub fn new() -> (Self, mpsc::UnboundedReceiver<Envelope>) {
        let (outbound, receiver) = mpsc::unbounded_channel();
        (
            Self {
                outbound,
                subscribers: Subscribers::new(),
            },
            receiver,
        )
    }

    /// Hands a client reply to this channel's subscribers.
    pub fn deliver(&self, envelope: &Envelope) -> usize {
        self.subscribers.dispatch(envelope)
    }

    /// Queues an envelope for the client, dropping it if the writer is gone.
    fn push(&self, envelope: Envelope) {
        if self.outbound.send(envelope).is_err() {
            debug!("connection writer closed, dropping envelope");
        }
    }
}

#[async_trait]
impl Channel for SocketChannel {
    async fn send(&self, envelope: Envelope) -> Result<(), Report<ChannelError>> {
        self.outbound
            .send(envelope)
            .map_err(|_| ChannelError::Closed.into())
    }

    fn subscribe(&self, kind: EnvelopeKind, handler: EnvelopeHandler) -> SubscriptionId {
        self.subscribers.subscribe(kind, handler)
    }

    fn unsubscribe(&self, kind: EnvelopeKind, id: SubscriptionId) -> bool {
        self.subscribers.unsubscribe(kind, id)
    }

    fn is_interactive(&self) -> bool {
        true
    }
}

struct ActiveRun {
    abort: AbortSignal,
    handle: JoinHandle<()>,
}

/// Per-connection message handling. At most one run is active at a time.
pub(crate) struct Session {
    state: Arc<AppState>,
    channel: Arc<SocketChannel>,
    active: Option<ActiveRun>,
}

impl Session {
    pub(crate) fn new(state: Arc<AppState>, channel: Arc<SocketChannel>) -> Self {
        Self {
            state,
            channel,
            active: None,
        }
    }

    /// Handles one text frame. Rejections are answered with an `error` envelope.
    pub(crate) async fn handle(&mut self, text: &str) {
        let outcome = match inbound::parse(text) {
            Ok(message) => self.dispatch(message).await,
            Err(report) => Err(report),
        };
        if let Err(report) = outcome {
            let error = report.current_context();
            debug!(code = ?error.code(), %error, "client message rejected");
            self.channel.push(error.to_envelope());
        }
    }

    async fn dispatch(&mut self, message: Inbound) -> Result<(), Report<InboundError>> {
        match message {
            Inbound::Run { workspace, payload } => self.start_run(workspace, payload).await,
            Inbound::Abort => {
                match &self.active {
                    Some(run) if !run.handle.is_finished() => {
                        info!("interactive run abort requested");
                        run.abort.abort();
                    }
                    _ => debug!("abort without an active run"),
                }
                Ok(())
            }
            Inbound::RegisterTrigger {
                workspace_id,
                workspace,
                settings,
            } => {
                if let Some(workspace) = workspace {
                    self.state.load_workspace(workspace).await;
                }
                let body = self.state.register_trigger(&workspace_id, settings).await?;
                self.channel
                    .push(Envelope::new(EnvelopeKind::TriggerRegistered, body));
                Ok(())
            }
            Inbound::UnregisterTrigger { workspace_id, kind } => {
                let body = self.state.unregister_trigger(&workspace_id, kind).await;
                self.channel
                    .push(Envelope::new(EnvelopeKind::TriggerUnregistered, body));
                Ok(())
            }
            Inbound::ResolvePrompt(ResolvePrompt { prompt_id, answer }) => {
                if self
                    .state
                    .prompts
                    .resolve(self.channel.as_ref(), prompt_id, answer)
                {
                    Ok(())
                } else {
                    Err(InboundError::InvalidMessage {
                        reason: format!("prompt {prompt_id} is not pending on this connection"),
                    }
                    .into())
                }
            }
            Inbound::WorkflowResult(envelope) => {
                if self.channel.deliver(&envelope) == 0 {
                    debug!("workflow result with no waiting run");
                }
                Ok(())
            }
        }
    }

    async fn start_run(
        &mut self,
        workspace: WorkspaceDefinition,
        payload: Option<JsonValue>,
    ) -> Result<(), Report<InboundError>> {
        if self
            .active
            .as_ref()
            .is_some_and(|run| !run.handle.is_finished())
        {
            return Err(InboundError::RunInProgress.into());
        }
        self.state.load_workspace(workspace.clone()).await;

        let input = match payload {
            Some(payload) => TriggerInput::new(TriggerSource::Interactive).with_payload(payload),
            None => TriggerInput::new(TriggerSource::Interactive),
        };
        let abort = AbortSignal::new();
        let signal = abort.clone();
        let orchestrator = Arc::clone(&self.state.orchestrator);
        let channel = Arc::clone(&self.channel);
        let handle = tokio::spawn(async move {
            if let Err(report) = orchestrator
                .run(&workspace, &input, channel.as_ref(), &signal)
                .await
            {
                let reason = report.current_context().to_string();
                warn!(workspace_id = %workspace.id, %reason, "interactive run rejected");
                channel.push(InboundError::InvalidMessage { reason }.to_envelope());
            }
        });
        self.active = Some(ActiveRun { abort, handle });
        Ok(())
    }

    /// Stops the active run at its next layer boundary.
    pub(crate) fn close(&mut self) {
        if let Some(run) = self.active.take() {
            run.abort.abort();
        }
    }
}

/// WebSocket upgrade handler.
pub async fn handler(
    ws: WebSocketUpgrade,
    State(state): State<Arc<AppState>>,
) -> impl IntoResponse {
    ws.on_upgrade(|socket| handle_socket(socket, state))
}

async fn handle_socket(socket: WebSocket, state: Arc<AppState>) {
    let (mut sink, mut stream) = socket.split();
    let (channel, mut outbound) = SocketChannel::new();
    let mut broadcast = state.broadcaster.subscribe();
    info!("client connected");

    let writer = tokio::spawn(async move {
        loop {
            let envelope = tokio::select! {
                Some(envelope) = outbound.recv() => envelope,
                received = broadcast.recv() => match received {
                    Ok(envelope) => envelope,
                    Err(RecvError::Lagged(skipped)) => {
                        warn!(skipped, "client fell behind the broadcaster");
                        continue;
                    }
                    Err(RecvError::Closed) => break,
                },
            };
            let text = match envelope.to_json() {
                Ok(text) => text,
                Err(e) => {
                    warn!(error = %e, kind = %envelope.kind, "failed to encode envelope");
                    continue;
                }
            };
            if sink.send(Message::Text(text.into())).await.is_err() {
                break;
            }
        }
    });

    let mut session = Session::new(state, Arc::new(channel));
    while let Some(message) = stream.next().await {
        match message {
            Ok(Message::Text(text)) => session.handle(text.as_str()).await,
            Ok(Message::Close(_)) | Err(_) => break,
            Ok(_) => {}
        }
    }

    session.close();
    writer.abort();
    info!("client disconnected");
}
