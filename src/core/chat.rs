//! Chat engine
//!
//! The ChatEngine turns one user submission into one assistant reply:
//! 1. Records the user turn and builds the inference request
//! 2. Calls the endpoint, whole or streamed
//! 3. Re-renders the growing buffer after every fragment
//! 4. Renders the final buffer, flagging a truncated reply
//! 5. Commits the raw reply to the conversation
//!
//! Failures leave the conversation with the user turn and no reply.

use std::sync::Arc;
use std::time::Instant;

use futures::{Stream, StreamExt};
use serde::{Deserialize, Serialize};

use crate::format::{self, RenderPhase};
use crate::providers::{InferenceClient, InferenceRequest, ProviderError};
use crate::session::SessionState;

/// A finished assistant reply
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Reply {
    /// Text as the model produced it, markers included
    pub raw: String,

    /// Display form of `raw`
    pub rendered: String,

    /// A section was opened and never closed
    pub truncated: bool,
}

impl Reply {
    pub fn finish(raw: String, tagged: bool) -> Self {
        let rendered = format::render(&raw, tagged, RenderPhase::Complete);
        let truncated = format::is_truncated(&raw, tagged);
        Self {
            raw,
            rendered,
            truncated,
        }
    }
}

/// Progress of a streamed reply
#[derive(Debug, Clone, PartialEq)]
pub enum ReplyEvent {
    /// The buffer so far, rendered with the streaming cursor
    Partial(String),

    /// The stream closed normally
    Completed(Reply),
}

/// Errors from the chat engine
#[derive(Debug, thiserror::Error)]
pub enum ChatError {
    /// The endpoint client cannot be used until it is reconfigured
    #[error("Configuration error: {0}")]
    Configuration(ProviderError),

    /// The call failed or the stream broke off
    #[error("Request failed: {0}")]
    Request(ProviderError),
}

impl From<ProviderError> for ChatError {
    fn from(error: ProviderError) -> Self {
        match error {
            ProviderError::NotConfigured(_) => ChatError::Configuration(error),
            other => ChatError::Request(other),
        }
    }
}

/// The core chat engine
pub struct ChatEngine {
    client: Arc<dyn InferenceClient>,
}

impl ChatEngine {
    /// Create a new chat engine
    pub fn new(client: Arc<dyn InferenceClient>) -> Self {
        Self { client }
    }

    /// Generate a whole reply for a prepared request
    pub async fn reply(
        &self,
        request: &InferenceRequest,
        tagged: bool,
    ) -> Result<Reply, ChatError> {
        let started = Instant::now();
        tracing::info!(
            "Requesting reply from {} via {} ({} turns)",
            request.model_id,
            self.client.name(),
            request.turns.len()
        );

        let raw = self.client.converse(request).await.map_err(|e| {
            tracing::error!("Reply from {} failed: {}", request.model_id, e);
            ChatError::from(e)
        })?;

        let reply = Reply::finish(raw, tagged);
        tracing::info!(
            "Reply from {} finished in {:?} ({} chars, truncated: {})",
            request.model_id,
            started.elapsed(),
            reply.raw.len(),
            reply.truncated
        );
        Ok(reply)
    }

    /// Stream a reply for a prepared request.
    ///
    /// Yields one `Partial` frame per fragment, then a single `Completed`.
    /// An error ends the stream; nothing after it is produced.
    pub fn reply_stream(
        &self,
        request: InferenceRequest,
        tagged: bool,
    ) -> impl Stream<Item = Result<ReplyEvent, ChatError>> + Send + 'static {
        let client = Arc::clone(&self.client);

        async_stream::stream! {
            let started = Instant::now();
            tracing::info!(
                "Streaming reply from {} via {} ({} turns)",
                request.model_id,
                client.name(),
                request.turns.len()
            );

            let mut fragments = match client.converse_stream(&request).await {
                Ok(fragments) => fragments,
                Err(e) => {
                    tracing::error!("Stream from {} failed to start: {}", request.model_id, e);
                    yield Err(ChatError::from(e));
                    return;
                }
            };

            let mut buffer = String::new();
            let mut count = 0usize;
            while let Some(fragment) = fragments.next().await {
                match fragment {
                    Ok(text) => {
                        count += 1;
                        buffer.push_str(&text);
                        yield Ok(ReplyEvent::Partial(format::render(
                            &buffer,
                            tagged,
                            RenderPhase::Streaming,
                        )));
                    }
                    Err(e) => {
                        tracing::error!(
                            "Stream from {} broke after {} fragments: {}",
                            request.model_id,
                            count,
                            e
                        );
                        yield Err(ChatError::from(e));
                        return;
                    }
                }
            }

            let reply = Reply::finish(buffer, tagged);
            tracing::info!(
                "Stream from {} finished in {:?} ({} fragments, truncated: {})",
                request.model_id,
                started.elapsed(),
                count,
                reply.truncated
            );
            yield Ok(ReplyEvent::Completed(reply));
        }
    }

    /// Submit a message and wait for the whole reply
    pub async fn converse(
        &self,
        session: &mut SessionState,
        message: &str,
    ) -> Result<Reply, ChatError> {
        let request = session.begin_turn(message);
        let reply = self.reply(&request, session.tagged_format).await?;
        session.commit_reply(&reply.raw);
        Ok(reply)
    }

    /// Submit a message and stream the reply.
    ///
    /// `render` is called with every partial frame and finally with the
    /// completed rendering.
    pub async fn converse_stream<F>(
        &self,
        session: &mut SessionState,
        message: &str,
        mut render: F,
    ) -> Result<Reply, ChatError>
    where
        F: FnMut(&str),
    {
        let request = session.begin_turn(message);
        let updates = self.reply_stream(request, session.tagged_format);
        futures::pin_mut!(updates);

        while let Some(update) = updates.next().await {
            match update? {
                ReplyEvent::Partial(frame) => render(&frame),
                ReplyEvent::Completed(reply) => {
                    render(&reply.rendered);
                    session.commit_reply(&reply.raw);
                    return Ok(reply);
                }
            }
        }

        Err(ChatError::Request(ProviderError::Stream(
            "reply stream ended without completing".to_string(),
        )))
    }
}
