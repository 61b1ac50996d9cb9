//! Inference endpoint integrations

pub mod bedrock;
mod eventstream;

use async_trait::async_trait;
use futures::stream::BoxStream;
use serde::Serialize;
use thiserror::Error;

use crate::config::InferenceParams;
use crate::conversation::Turn;

pub use bedrock::BedrockClient;

#[derive(Debug, Error)]
pub enum ProviderError {
    #[error("Provider not configured: {0}")]
    NotConfigured(String),

    #[error("Request failed: {0}")]
    RequestFailed(#[from] reqwest::Error),

    #[error("Invalid response: {0}")]
    InvalidResponse(String),

    #[error("API error ({status}): {message}")]
    Api { status: u16, message: String },

    #[error("Stream error: {0}")]
    Stream(String),
}

/// Everything the endpoint needs for one assistant reply
#[derive(Debug, Clone, Serialize)]
pub struct InferenceRequest {
    pub model_id: String,
    pub system_instruction: String,
    pub turns: Vec<Turn>,
    pub params: InferenceParams,
}

/// Text deltas of one reply, in arrival order.
///
/// Finite and not restartable: a retry needs a new request.
pub type FragmentStream = BoxStream<'static, Result<String, ProviderError>>;

/// A hosted model that can hold a conversation
#[async_trait]
pub trait InferenceClient: Send + Sync {
    /// Short name for logs
    fn name(&self) -> &str;

    /// Generate the whole reply before returning it
    async fn converse(&self, request: &InferenceRequest) -> Result<String, ProviderError>;

    /// Start a reply and hand back its fragments as they arrive
    async fn converse_stream(
        &self,
        request: &InferenceRequest,
    ) -> Result<FragmentStream, ProviderError>;
}
