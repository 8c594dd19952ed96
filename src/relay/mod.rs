//! Relay orchestrator for conversation turns
//!
//! The state machine at the center of the service: validate ownership,
//! persist the user's turn, assemble context, invoke the compute service
//! (blocking or streaming), persist the assistant's turn. The user's
//! utterance is persisted unconditionally once ownership is confirmed, so
//! it survives upstream failures; a failed turn is recorded as an
//! assistant message whose metadata marks the error.

use std::sync::Arc;

use serde::Serialize;
use tokio::sync::mpsc;

use crate::context::ContextBuilder;
use crate::db::{ConversationRepo, Message, MessageRole, NewSource, Source};
use crate::upstream::{ComputeRequest, ComputeService, StreamDecoder, UpstreamEvent};
use crate::{Error, Result};

/// Apology persisted (and shown) when a turn cannot be completed.
/// Internal error detail never reaches persisted content or the client.
const FAILURE_TEXT: &str =
    "Sorry, I wasn't able to complete that research request. Please try again.";

/// Buffered event capacity between the relay and one client
const EVENT_CHANNEL_CAPACITY: usize = 32;

/// A completed blocking turn
#[derive(Debug, Clone)]
pub struct Turn {
    pub user_message: Message,
    pub assistant_message: Message,
}

/// A message as serialized for the web client
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct MessageDto {
    pub id: String,
    pub thread_id: String,
    pub role: String,
    pub content: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub thinking_trace: Option<serde_json::Value>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub metadata: Option<serde_json::Value>,
    pub created_at: String,
    pub sources: Vec<Source>,
}

impl From<&Message> for MessageDto {
    fn from(message: &Message) -> Self {
        Self {
            id: message.id.clone(),
            thread_id: message.thread_id.clone(),
            role: message.role.to_string(),
            content: message.content.clone(),
            thinking_trace: message.thinking_trace.clone(),
            metadata: message.metadata.clone(),
            created_at: message.created_at.to_rfc3339(),
            sources: message.sources.clone(),
        }
    }
}

/// Event emitted to the connected client on the streaming path.
///
/// Every invocation produces exactly one terminal event (`complete` with
/// the assistant message, or `error`); the `complete` emitted up front
/// carries the already-persisted user message.
#[derive(Debug, Clone, Serialize)]
#[serde(tag = "type", rename_all = "lowercase")]
pub enum RelayEvent {
    Token {
        content: String,
    },
    Thinking {
        data: serde_json::Value,
    },
    Source {
        data: serde_json::Value,
    },
    Complete {
        #[serde(rename = "messageId")]
        message_id: String,
        #[serde(skip_serializing_if = "Option::is_none")]
        data: Option<MessageDto>,
    },
    Error {
        content: String,
    },
}

/// What consuming the upstream stream ended with
enum StreamOutcome {
    /// Upstream closed cleanly; buffers hold the full response
    Completed,
    /// The client went away; upstream was aborted
    Disconnected,
    /// Transport failure or upstream-reported error (internal detail, logs only)
    Failed(String),
}

/// Accumulation buffers for a streaming turn
#[derive(Default)]
struct StreamBuffers {
    /// Concatenation of every token event, in emission order
    content: String,
    /// Last thinking event payload (overwrite semantics)
    thinking: Option<serde_json::Value>,
    /// Every source event, in emission order
    sources: Vec<serde_json::Value>,
}

/// Relay orchestrator
#[derive(Clone)]
pub struct Relay {
    conversations: ConversationRepo,
    context: ContextBuilder,
    compute: Arc<dyn ComputeService>,
}

impl Relay {
    /// Create a new relay
    #[must_use]
    pub fn new(
        conversations: ConversationRepo,
        context: ContextBuilder,
        compute: Arc<dyn ComputeService>,
    ) -> Self {
        Self {
            conversations,
            context,
            compute,
        }
    }

    /// Process one turn against the blocking compute endpoint.
    ///
    /// Success and upstream failure both leave exactly one user and one
    /// assistant message persisted and the thread touched once.
    ///
    /// # Errors
    ///
    /// Returns [`Error::AccessDenied`] if the caller does not own the
    /// thread (nothing is persisted), [`Error::UpstreamUnavailable`] if the
    /// compute service failed (the failed turn is persisted first), or a
    /// persistence error if the store cannot write.
    pub async fn send_message(
        &self,
        user_id: &str,
        thread_id: &str,
        content: &str,
        metadata: Option<serde_json::Value>,
    ) -> Result<Turn> {
        if !self.conversations.is_owned_by(thread_id, user_id)? {
            return Err(Error::AccessDenied);
        }

        let user_message = self.conversations.append_message(
            thread_id,
            MessageRole::User,
            content,
            None,
            metadata.as_ref(),
            &[],
        )?;

        let request = self.build_request(user_id, thread_id, content, metadata)?;

        match self.compute.execute(&request).await {
            Ok(response) => {
                let sources: Vec<NewSource> = response
                    .sources
                    .iter()
                    .filter_map(source_from_payload)
                    .collect();

                let assistant_message = self.conversations.append_message(
                    thread_id,
                    MessageRole::Assistant,
                    &response.content,
                    response.thinking_trace.as_ref(),
                    response.metadata.as_ref(),
                    &sources,
                )?;
                self.conversations.touch_thread(thread_id)?;

                tracing::info!(
                    thread_id,
                    message_id = %assistant_message.id,
                    sources = assistant_message.sources.len(),
                    "turn completed"
                );

                Ok(Turn {
                    user_message,
                    assistant_message,
                })
            }
            Err(e) => {
                tracing::error!(thread_id, error = %e, "compute service call failed");

                let assistant_message = self.persist_failed_turn(thread_id)?;
                self.conversations.touch_thread(thread_id)?;

                Err(Error::UpstreamUnavailable(format!(
                    "research request failed (reference {})",
                    assistant_message.id
                )))
            }
        }
    }

    /// Process one turn against the streaming compute endpoint.
    ///
    /// Returns a receiver of [`RelayEvent`]s: an immediate `complete` with
    /// the persisted user message, then upstream events re-emitted as they
    /// decode, then exactly one terminal event. Dropping the receiver
    /// aborts the upstream call; content already streamed is kept as a
    /// best-effort partial record.
    ///
    /// # Errors
    ///
    /// Returns [`Error::AccessDenied`] if the caller does not own the
    /// thread, or a persistence error if the user's turn cannot be written.
    pub async fn stream_message(
        &self,
        user_id: &str,
        thread_id: &str,
        content: &str,
        metadata: Option<serde_json::Value>,
    ) -> Result<mpsc::Receiver<RelayEvent>> {
        if !self.conversations.is_owned_by(thread_id, user_id)? {
            return Err(Error::AccessDenied);
        }

        let user_message = self.conversations.append_message(
            thread_id,
            MessageRole::User,
            content,
            None,
            metadata.as_ref(),
            &[],
        )?;

        let request = self.build_request(user_id, thread_id, content, metadata)?;

        let (tx, rx) = mpsc::channel(EVENT_CHANNEL_CAPACITY);

        // The client can render its own turn without waiting on the
        // compute round trip
        let _ = tx
            .send(RelayEvent::Complete {
                message_id: user_message.id.clone(),
                data: Some(MessageDto::from(&user_message)),
            })
            .await;

        let relay = self.clone();
        let thread = thread_id.to_string();
        tokio::spawn(async move {
            relay.run_stream(&tx, &request, &thread).await;
        });

        Ok(rx)
    }

    /// Drive one streaming turn to its terminal event
    async fn run_stream(
        &self,
        tx: &mpsc::Sender<RelayEvent>,
        request: &ComputeRequest,
        thread_id: &str,
    ) {
        let mut buffers = StreamBuffers::default();

        match self.consume_stream(tx, request, &mut buffers).await {
            StreamOutcome::Completed => {
                let sources: Vec<NewSource> = buffers
                    .sources
                    .iter()
                    .filter_map(source_from_payload)
                    .collect();

                let persisted = self
                    .conversations
                    .append_message(
                        thread_id,
                        MessageRole::Assistant,
                        &buffers.content,
                        buffers.thinking.as_ref(),
                        None,
                        &sources,
                    )
                    .and_then(|message| {
                        self.conversations.touch_thread(thread_id)?;
                        Ok(message)
                    });

                match persisted {
                    Ok(message) => {
                        tracing::info!(
                            thread_id,
                            message_id = %message.id,
                            sources = message.sources.len(),
                            "streamed turn completed"
                        );
                        let _ = tx
                            .send(RelayEvent::Complete {
                                message_id: message.id.clone(),
                                data: Some(MessageDto::from(&message)),
                            })
                            .await;
                    }
                    Err(e) => {
                        tracing::error!(thread_id, error = %e, "failed to persist streamed turn");
                        let _ = tx
                            .send(RelayEvent::Error {
                                content: FAILURE_TEXT.to_string(),
                            })
                            .await;
                    }
                }
            }
            StreamOutcome::Disconnected => {
                tracing::info!(thread_id, "client disconnected, aborting upstream stream");
                if !buffers.content.is_empty() {
                    self.persist_partial(thread_id, &buffers, false);
                }
            }
            StreamOutcome::Failed(detail) => {
                tracing::error!(thread_id, error = %detail, "streamed turn failed");

                let persisted = if buffers.content.is_empty() {
                    self.persist_failed_turn(thread_id)
                        .and_then(|message| {
                            self.conversations.touch_thread(thread_id)?;
                            Ok(message.id)
                        })
                        .ok()
                } else {
                    self.persist_partial(thread_id, &buffers, true)
                };

                let content = persisted.map_or_else(
                    || FAILURE_TEXT.to_string(),
                    |reference| format!("{FAILURE_TEXT} (reference {reference})"),
                );
                let _ = tx.send(RelayEvent::Error { content }).await;
            }
        }
    }

    /// Re-emit upstream events while accumulating them into `buffers`
    async fn consume_stream(
        &self,
        tx: &mpsc::Sender<RelayEvent>,
        request: &ComputeRequest,
        buffers: &mut StreamBuffers,
    ) -> StreamOutcome {
        use futures::StreamExt;

        let mut stream = match self.compute.open_stream(request).await {
            Ok(stream) => stream,
            Err(e) => return StreamOutcome::Failed(e.to_string()),
        };

        let mut decoder = StreamDecoder::new();

        loop {
            // Notice client disconnects promptly, even while the upstream
            // is silent, so the in-flight call is aborted instead of
            // idling until the timeout
            let next = tokio::select! {
                () = tx.closed() => return StreamOutcome::Disconnected,
                next = stream.next() => next,
            };

            let chunk = match next {
                None => break,
                Some(Ok(chunk)) => chunk,
                Some(Err(e)) => return StreamOutcome::Failed(e.to_string()),
            };

            for event in decoder.feed(&chunk) {
                match event {
                    UpstreamEvent::Token { content } => {
                        buffers.content.push_str(&content);
                        if tx.send(RelayEvent::Token { content }).await.is_err() {
                            return StreamOutcome::Disconnected;
                        }
                    }
                    UpstreamEvent::Thinking { data } => {
                        buffers.thinking = Some(data.clone());
                        if tx.send(RelayEvent::Thinking { data }).await.is_err() {
                            return StreamOutcome::Disconnected;
                        }
                    }
                    UpstreamEvent::Source { data } => {
                        buffers.sources.push(data.clone());
                        if tx.send(RelayEvent::Source { data }).await.is_err() {
                            return StreamOutcome::Disconnected;
                        }
                    }
                    // Advisory only: the transport closing is the
                    // authoritative end-of-stream signal
                    UpstreamEvent::Complete { .. } => {}
                    UpstreamEvent::Error { content } => {
                        return StreamOutcome::Failed(format!("upstream reported: {content}"));
                    }
                }
            }
        }

        StreamOutcome::Completed
    }

    /// Assemble the compute request for a turn
    fn build_request(
        &self,
        user_id: &str,
        thread_id: &str,
        content: &str,
        metadata: Option<serde_json::Value>,
    ) -> Result<ComputeRequest> {
        let conversation_history = self.context.build(&self.conversations, thread_id)?;

        Ok(ComputeRequest {
            message: content.to_string(),
            thread_id: thread_id.to_string(),
            user_id: user_id.to_string(),
            conversation_history,
            metadata: metadata.unwrap_or_else(|| serde_json::Value::Object(serde_json::Map::new())),
        })
    }

    /// Persist the apology message that records a failed turn.
    ///
    /// The thread is not touched here; callers touch it once per turn.
    fn persist_failed_turn(&self, thread_id: &str) -> Result<Message> {
        let metadata = serde_json::json!({"error": true});

        self.conversations.append_message(
            thread_id,
            MessageRole::Assistant,
            FAILURE_TEXT,
            None,
            Some(&metadata),
            &[],
        )
    }

    /// Best-effort persistence of partially streamed content.
    ///
    /// Returns the persisted message id, or `None` if the write failed
    /// (logged, not propagated: there is no caller left to tell).
    fn persist_partial(&self, thread_id: &str, buffers: &StreamBuffers, errored: bool) -> Option<String> {
        let metadata = if errored {
            serde_json::json!({"error": true, "partial": true})
        } else {
            serde_json::json!({"partial": true})
        };
        let sources: Vec<NewSource> = buffers
            .sources
            .iter()
            .filter_map(source_from_payload)
            .collect();

        let result = self
            .conversations
            .append_message(
                thread_id,
                MessageRole::Assistant,
                &buffers.content,
                buffers.thinking.as_ref(),
                Some(&metadata),
                &sources,
            )
            .and_then(|message| {
                self.conversations.touch_thread(thread_id)?;
                Ok(message)
            });

        match result {
            Ok(message) => Some(message.id),
            Err(e) => {
                tracing::error!(thread_id, error = %e, "failed to persist partial turn");
                None
            }
        }
    }
}

/// Map one upstream source payload to a citation row input.
///
/// Payloads without a `url` are skipped: a citation that points nowhere is
/// not worth a row.
fn source_from_payload(payload: &serde_json::Value) -> Option<NewSource> {
    let object = payload.as_object()?;
    let url = object.get("url").and_then(serde_json::Value::as_str)?;

    let text = |key: &str| {
        object
            .get(key)
            .and_then(serde_json::Value::as_str)
            .map(str::to_string)
    };

    Some(NewSource {
        url: url.to_string(),
        title: text("title"),
        snippet: text("snippet"),
        domain: text("domain"),
        metadata: object.get("metadata").cloned(),
    })
}
