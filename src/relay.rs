use crate::conversation_store::ConversationStore;
use crate::error::{RelayError, UpstreamError};
use crate::upstream::{CompletionClient, CompletionRequest, StreamEvent};
use bytes::Bytes;
use dashmap::DashMap;
use futures::{Stream, StreamExt, future, stream};
use std::pin::Pin;
use std::sync::Arc;
use tokio::sync::{Mutex, OwnedMutexGuard};

pub const DEFAULT_MODEL: &str = "gpt-4o-mini";
pub const DEFAULT_TEMPERATURE: f32 = 0.2;
pub const DEFAULT_MAX_OUTPUT_TOKENS: u32 = 150;

/// Sampling parameters fixed at startup and applied to every upstream call.
#[derive(Debug, Clone, PartialEq)]
pub struct SamplingConfig {
    pub model: String,
    pub temperature: f32,
    pub max_output_tokens: u32,
}

impl Default for SamplingConfig {
    fn default() -> Self {
        Self {
            model: DEFAULT_MODEL.to_string(),
            temperature: DEFAULT_TEMPERATURE,
            max_output_tokens: DEFAULT_MAX_OUTPUT_TOKENS,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ChatReply {
    /// Continuation token now bound to the conversation.
    pub id: String,
    pub message: String,
}

pub type ReplyStream = Pin<Box<dyn Stream<Item = Result<Bytes, RelayError>> + Send>>;

/// One async lock per conversation id that currently has a request in flight.
#[derive(Debug, Default)]
struct ConversationLocks {
    locks: DashMap<String, Arc<Mutex<()>>>,
}

impl ConversationLocks {
    async fn acquire(self: &Arc<Self>, conversation_id: &str) -> ConversationGuard {
        // created before waiting so a cancelled waiter still cleans up its entry
        let mut pending = ConversationGuard {
            locks: self.clone(),
            conversation_id: conversation_id.to_string(),
            guard: None,
        };
        let lock = self
            .locks
            .entry(conversation_id.to_string())
            .or_default()
            .clone();
        pending.guard = Some(lock.lock_owned().await);
        pending
    }

    fn len(&self) -> usize {
        self.locks.len()
    }
}

struct ConversationGuard {
    locks: Arc<ConversationLocks>,
    conversation_id: String,
    guard: Option<OwnedMutexGuard<()>>,
}

impl Drop for ConversationGuard {
    fn drop(&mut self) {
        self.guard.take();
        // the map holds one reference; anything above that is a waiter
        self.locks
            .locks
            .remove_if(&self.conversation_id, |_, lock| Arc::strong_count(lock) == 1);
    }
}

/// Relays prompts to the completion API and threads each conversation's
/// continuation token through the store.
///
/// Without serialization two overlapping requests for the same conversation
/// can read the same prior token and the later write wins. With
/// `serialize_conversations` the lookup, upstream call and write of one
/// request complete before the next request for that conversation starts.
#[derive(Clone)]
pub struct ChatRelay {
    store: Arc<dyn ConversationStore>,
    client: Arc<dyn CompletionClient>,
    sampling: SamplingConfig,
    locks: Option<Arc<ConversationLocks>>,
}

impl ChatRelay {
    pub fn new(
        store: Arc<dyn ConversationStore>,
        client: Arc<dyn CompletionClient>,
        sampling: SamplingConfig,
    ) -> Self {
        Self {
            store,
            client,
            sampling,
            locks: None,
        }
    }

    pub fn with_serialized_conversations(mut self, enabled: bool) -> Self {
        self.locks = enabled.then(Arc::default);
        self
    }

    pub fn store(&self) -> &Arc<dyn ConversationStore> {
        &self.store
    }

    pub fn sampling(&self) -> &SamplingConfig {
        &self.sampling
    }

    pub fn is_serialized(&self) -> bool {
        self.locks.is_some()
    }

    /// Conversations currently holding or waiting on a lock. Always zero when
    /// serialization is off.
    pub fn locked_conversations(&self) -> usize {
        self.locks.as_ref().map_or(0, |l| l.len())
    }

    async fn lock(&self, conversation_id: &str) -> Option<ConversationGuard> {
        match &self.locks {
            Some(locks) => Some(locks.acquire(conversation_id).await),
            None => None,
        }
    }

    fn build_request(
        &self,
        prompt: &str,
        previous_response_id: Option<String>,
    ) -> CompletionRequest {
        CompletionRequest {
            model: self.sampling.model.clone(),
            input: prompt.to_string(),
            temperature: self.sampling.temperature,
            max_output_tokens: self.sampling.max_output_tokens,
            previous_response_id,
            stream: false,
        }
    }

    pub async fn send_message(
        &self,
        prompt: &str,
        conversation_id: &str,
    ) -> Result<ChatReply, RelayError> {
        let _guard = self.lock(conversation_id).await;

        let previous = self.store.get(conversation_id);
        log::debug!(
            "Conversation {} continues from {:?}",
            conversation_id,
            previous
        );

        let request = self.build_request(prompt, previous);
        let response = self.client.create_response(request).await.map_err(|e| {
            log::error!("Completion failed for conversation {}: {}", conversation_id, e);
            e
        })?;

        self.store.set(conversation_id, response.id.clone());
        log::info!(
            "Conversation {} advanced to {}",
            conversation_id,
            response.id
        );

        Ok(ChatReply {
            id: response.id,
            message: response.output_text,
        })
    }

    /// Streams completion text as it arrives. The continuation token is stored
    /// only once the upstream reports the response as completed; an upstream
    /// stream that ends before that yields an error as its last item.
    pub async fn send_message_stream(
        &self,
        prompt: &str,
        conversation_id: &str,
    ) -> Result<ReplyStream, RelayError> {
        let mut guard = self.lock(conversation_id).await;

        let previous = self.store.get(conversation_id);
        log::debug!(
            "Conversation {} streams from {:?}",
            conversation_id,
            previous
        );

        let mut request = self.build_request(prompt, previous);
        request.stream = true;
        let events = self
            .client
            .create_response_stream(request)
            .await
            .map_err(|e| {
                log::error!(
                    "Completion stream failed for conversation {}: {}",
                    conversation_id,
                    e
                );
                e
            })?;

        let store = self.store.clone();
        let conversation_id = conversation_id.to_string();
        let body = events
            .map(Some)
            .chain(stream::once(future::ready(None)))
            .scan(false, move |finished, event| {
                if *finished {
                    return future::ready(None);
                }
                let err = match event {
                    Some(Ok(StreamEvent::Delta(text))) => {
                        return future::ready(Some(Some(Ok(Bytes::from(text)))));
                    }
                    Some(Ok(StreamEvent::Completed { id })) => {
                        store.set(&conversation_id, id.clone());
                        log::info!("Conversation {} advanced to {}", conversation_id, id);
                        *finished = true;
                        guard.take();
                        return future::ready(Some(None));
                    }
                    Some(Err(e)) => e,
                    None => UpstreamError::Stream("stream ended before completion".to_string()),
                };
                log::error!(
                    "Completion stream failed for conversation {}: {}",
                    conversation_id,
                    err
                );
                *finished = true;
                guard.take();
                future::ready(Some(Some(Err(RelayError::from(err)))))
            })
            .filter_map(future::ready);
        Ok(Box::pin(body))
    }
}
