//! Questions to the interactive user.
//!
//! An agent step may need a person's answer. The broker sends a
//! `prompt_request` over the channel, parks a single-shot receiver, and the
//! live connection completes it when a `resolve_prompt` arrives. Only the
//! channel a prompt was asked on can answer it.

use crate::channel::Channel;
use crate::envelope::{Envelope, EnvelopeKind, PromptRequest};
use crate::error::PromptError;
use rootcause::Report;
use std::collections::HashMap;
use std::sync::{Mutex, PoisonError};
use std::time::Duration;
use taskloom_core::PromptId;
use tokio::sync::oneshot;
use tracing::debug;

/// Identity of the channel a prompt was asked on.
///
/// `ask` borrows the channel until its entry is removed, so the address
/// cannot be reused by another channel while the entry exists.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
struct ChannelKey(usize);

impl ChannelKey {
    fn of(channel: &dyn Channel) -> Self {
        Self(std::ptr::from_ref(channel).cast::<()>() as usize)
    }
}

#[derive(Debug)]
struct Pending {
    channel: ChannelKey,
    answer: oneshot::Sender<String>,
}

/// Pending prompts awaiting an answer.
#[derive(Debug, Default)]
pub struct PromptBroker {
    pending: Mutex<HashMap<PromptId, Pending>>,
}

/// Removes a prompt from the broker however `ask` ends.
struct PendingGuard<'a> {
    broker: &'a PromptBroker,
    prompt_id: PromptId,
}

impl Drop for PendingGuard<'_> {
    fn drop(&mut self) {
        self.broker.take(self.prompt_id);
    }
}

impl PromptBroker {
    /// Creates an empty broker.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Asks `question` over `channel` and waits for the answer.
    ///
    /// # Errors
    ///
    /// Returns an error if the question cannot be sent, nobody answers within
    /// `timeout`, or the prompt is dropped.
    pub async fn ask(
        &self,
        channel: &dyn Channel,
        question: &str,
        timeout: Duration,
    ) -> Result<String, Report<PromptError>> {
        let prompt_id = PromptId::new();
        let (sender, receiver) = oneshot::channel();
        self.pending
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .insert(
                prompt_id,
                Pending {
                    channel: ChannelKey::of(channel),
                    answer: sender,
                },
            );
        let _guard = PendingGuard {
            broker: self,
            prompt_id,
        };

        let request = PromptRequest {
            prompt_id,
            question: question.to_string(),
            timeout_secs: timeout.as_secs(),
        };
        let envelope = Envelope::from_payload(EnvelopeKind::PromptRequest, &request).map_err(
            |e| PromptError::Undeliverable {
                reason: e.to_string(),
            },
        )?;
        channel
            .send(envelope)
            .await
            .map_err(|report| PromptError::Undeliverable {
                reason: report.current_context().to_string(),
            })?;
        debug!(%prompt_id, "waiting for prompt answer");

        match tokio::time::timeout(timeout, receiver).await {
            Ok(Ok(answer)) => Ok(answer),
            Ok(Err(_)) => Err(PromptError::Cancelled { prompt_id }.into()),
            Err(_) => Err(PromptError::TimedOut { prompt_id }.into()),
        }
    }

    /// Delivers an answer arriving on `channel`.
    ///
    /// Returns false if the prompt is unknown, expired, or was asked on a
    /// different channel. A rejected answer leaves the prompt pending.
    pub fn resolve(
        &self,
        channel: &dyn Channel,
        prompt_id: PromptId,
        answer: impl Into<String>,
    ) -> bool {
        let entry = {
            let mut pending = self.pending.lock().unwrap_or_else(PoisonError::into_inner);
            let asked_here = pending
                .get(&prompt_id)
                .map(|entry| entry.channel == ChannelKey::of(channel));
            match asked_here {
                Some(true) => pending.remove(&prompt_id),
                Some(false) => {
                    debug!(%prompt_id, "answer from a channel that was not asked");
                    None
                }
                None => None,
            }
        };
        entry.is_some_and(|entry| entry.answer.send(answer.into()).is_ok())
    }

    /// Returns the number of unanswered prompts.
    #[must_use]
    pub fn pending(&self) -> usize {
        self.pending
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .len()
    }

    fn take(&self, prompt_id: PromptId) {
        self.pending
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .remove(&prompt_id);
    }
}
