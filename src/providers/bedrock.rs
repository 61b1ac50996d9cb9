//! Amazon Bedrock runtime provider
//!
//! Talks to the Converse and ConverseStream operations over HTTPS with a
//! Bedrock API key (bearer token).
//!
//! # Configuration
//!
//! ```toml
//! [endpoint]
//! region = "us-east-1"
//! connect_timeout_secs = 600
//! read_timeout_secs = 10000
//! max_attempts = 3
//! ```
//!
//! The key itself comes from `AWS_BEARER_TOKEN_BEDROCK`.

use std::time::Duration;

use async_trait::async_trait;
use futures::StreamExt;
use reqwest::{Client, Response, StatusCode, Url};
use serde::{Deserialize, Serialize};

use crate::config::EndpointConfig;
use crate::conversation::Turn;

use super::eventstream::EventStreamDecoder;
use super::{FragmentStream, InferenceClient, InferenceRequest, ProviderError};

const RETRY_BASE_DELAY_MS: u64 = 250;
const RETRY_MAX_DELAY_MS: u64 = 30_000;

/// Converse request body
#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct ConverseBody<'a> {
    messages: Vec<WireMessage<'a>>,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    system: Vec<TextBlock<'a>>,
    inference_config: WireInferenceConfig,
    additional_model_request_fields: AdditionalFields,
}

#[derive(Debug, Serialize)]
struct WireMessage<'a> {
    role: &'static str,
    content: Vec<TextBlock<'a>>,
}

#[derive(Debug, Serialize)]
struct TextBlock<'a> {
    text: &'a str,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct WireInferenceConfig {
    max_tokens: u32,
    top_p: f32,
    temperature: f32,
}

/// Vendor extension carrying top-k
#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct AdditionalFields {
    inference_config: TopK,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct TopK {
    top_k: u32,
}

impl<'a> ConverseBody<'a> {
    fn from_request(request: &'a InferenceRequest) -> Self {
        let system = if request.system_instruction.trim().is_empty() {
            Vec::new()
        } else {
            vec![TextBlock {
                text: &request.system_instruction,
            }]
        };

        Self {
            messages: wire_messages(&request.turns),
            system,
            inference_config: WireInferenceConfig {
                max_tokens: request.params.max_tokens,
                top_p: request.params.top_p,
                temperature: request.params.temperature,
            },
            additional_model_request_fields: AdditionalFields {
                inference_config: TopK {
                    top_k: request.params.top_k,
                },
            },
        }
    }
}

/// Map turns to wire messages.
///
/// The endpoint wants roles to alternate. A failed submission leaves two
/// user turns in a row, so consecutive same-role turns share one message.
fn wire_messages(turns: &[Turn]) -> Vec<WireMessage<'_>> {
    let mut messages: Vec<WireMessage<'_>> = Vec::with_capacity(turns.len());

    for turn in turns {
        let block = TextBlock {
            text: &turn.content,
        };
        match messages.last_mut() {
            Some(last) if last.role == turn.role.as_str() => last.content.push(block),
            _ => messages.push(WireMessage {
                role: turn.role.as_str(),
                content: vec![block],
            }),
        }
    }

    messages
}

/// Converse response
#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct ConverseResponse {
    output: ConverseOutput,
    #[serde(default)]
    stop_reason: Option<String>,
}

#[derive(Debug, Deserialize)]
struct ConverseOutput {
    message: OutputMessage,
}

#[derive(Debug, Deserialize)]
struct OutputMessage {
    content: Vec<ContentBlock>,
}

#[derive(Debug, Deserialize)]
struct ContentBlock {
    #[serde(default)]
    text: Option<String>,
}

/// `contentBlockDelta` stream event
#[derive(Debug, Deserialize)]
struct ContentBlockDeltaEvent {
    delta: Delta,
}

#[derive(Debug, Deserialize)]
struct Delta {
    #[serde(default)]
    text: Option<String>,
}

/// `messageStop` stream event
#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct MessageStopEvent {
    #[serde(default)]
    stop_reason: Option<String>,
}

/// Error response from API
#[derive(Debug, Deserialize)]
struct ErrorBody {
    #[serde(alias = "Message")]
    message: String,
}

/// Bedrock runtime client
pub struct BedrockClient {
    client: Client,
    base_url: Url,
    api_key: String,
    max_attempts: u32,
}

impl BedrockClient {
    /// Create a client for the configured endpoint.
    ///
    /// Fails with `NotConfigured` when the key is missing or the endpoint
    /// URL is unusable.
    pub fn new(endpoint: &EndpointConfig, api_key: Option<String>) -> Result<Self, ProviderError> {
        let api_key = api_key
            .filter(|key| !key.trim().is_empty())
            .ok_or_else(|| {
                ProviderError::NotConfigured("AWS_BEARER_TOKEN_BEDROCK is not set".to_string())
            })?;

        let base_url = Url::parse(&endpoint.base_url()).map_err(|e| {
            ProviderError::NotConfigured(format!("invalid endpoint URL {}: {}", endpoint.base_url(), e))
        })?;
        if base_url.cannot_be_a_base() {
            return Err(ProviderError::NotConfigured(format!(
                "endpoint URL {} cannot hold a path",
                base_url
            )));
        }

        let client = Client::builder()
            .connect_timeout(Duration::from_secs(endpoint.connect_timeout_secs))
            .read_timeout(Duration::from_secs(endpoint.read_timeout_secs))
            .build()
            .map_err(|e| ProviderError::NotConfigured(format!("HTTP client: {}", e)))?;

        Ok(Self {
            client,
            base_url,
            api_key,
            max_attempts: endpoint.max_attempts.max(1),
        })
    }

    /// `{base}/model/{model_id}/{operation}`, with the id percent-encoded
    fn operation_url(&self, model_id: &str, operation: &str) -> Url {
        let mut url = self.base_url.clone();
        if let Ok(mut segments) = url.path_segments_mut() {
            segments.pop_if_empty().extend(["model", model_id, operation]);
        }
        url
    }

    /// POST with retries on connection failures, throttling and 5xx
    async fn send(&self, url: Url, body: &ConverseBody<'_>) -> Result<Response, ProviderError> {
        let mut attempt = 1;

        loop {
            let result = self
                .client
                .post(url.clone())
                .bearer_auth(&self.api_key)
                .json(body)
                .send()
                .await;

            let retry_reason = match result {
                Ok(response) if response.status().is_success() => return Ok(response),
                Ok(response) => {
                    let status = response.status();
                    if !is_retryable(status) || attempt >= self.max_attempts {
                        return Err(api_error(response).await);
                    }
                    format!("HTTP {}", status)
                }
                Err(e) => {
                    if !(e.is_connect() || e.is_timeout()) || attempt >= self.max_attempts {
                        return Err(e.into());
                    }
                    e.to_string()
                }
            };

            let delay = retry_delay(attempt);
            tracing::warn!(
                "Bedrock attempt {}/{} failed ({}), retrying in {:?}",
                attempt,
                self.max_attempts,
                retry_reason,
                delay
            );
            tokio::time::sleep(delay).await;
            attempt += 1;
        }
    }
}

/// Exponential backoff after the given failed attempt, capped
fn retry_delay(attempt: u32) -> Duration {
    let ms = 1u64
        .checked_shl(attempt.saturating_sub(1))
        .and_then(|factor| RETRY_BASE_DELAY_MS.checked_mul(factor))
        .unwrap_or(RETRY_MAX_DELAY_MS);
    Duration::from_millis(ms.min(RETRY_MAX_DELAY_MS))
}

fn is_retryable(status: StatusCode) -> bool {
    status == StatusCode::TOO_MANY_REQUESTS || status.is_server_error()
}

async fn api_error(response: Response) -> ProviderError {
    let status = response.status();
    let body = response.text().await.unwrap_or_default();
    let message = serde_json::from_str::<ErrorBody>(&body)
        .map(|e| e.message)
        .unwrap_or(body);

    ProviderError::Api {
        status: status.as_u16(),
        message,
    }
}

/// Pull every complete frame out of the decoder and keep the text deltas
fn decode_fragments(
    decoder: &mut EventStreamDecoder,
    model_id: &str,
) -> Result<Vec<String>, ProviderError> {
    let mut texts = Vec::new();

    while let Some(message) = decoder.next_message()? {
        if matches!(message.header_str(":message-type"), Some("exception" | "error")) {
            let kind = message
                .header_str(":exception-type")
                .or_else(|| message.header_str(":error-code"))
                .unwrap_or("unknown");
            let detail = serde_json::from_slice::<ErrorBody>(&message.payload)
                .map(|e| e.message)
                .unwrap_or_else(|_| String::from_utf8_lossy(&message.payload).into_owned());
            return Err(ProviderError::Stream(format!("{}: {}", kind, detail)));
        }

        match message.header_str(":event-type") {
            Some("contentBlockDelta") => {
                let event: ContentBlockDeltaEvent = serde_json::from_slice(&message.payload)
                    .map_err(|e| ProviderError::InvalidResponse(format!("bad delta event: {}", e)))?;
                if let Some(text) = event.delta.text.filter(|t| !t.is_empty()) {
                    texts.push(text);
                }
            }
            Some("messageStop") => {
                let stop: MessageStopEvent = serde_json::from_slice(&message.payload)
                    .unwrap_or(MessageStopEvent { stop_reason: None });
                log_stop_reason(model_id, stop.stop_reason.as_deref());
            }
            Some(other) => tracing::trace!("Skipping {} event", other),
            None => {}
        }
    }

    Ok(texts)
}

fn log_stop_reason(model_id: &str, stop_reason: Option<&str>) {
    match stop_reason {
        Some("max_tokens") => {
            tracing::warn!("{} stopped at the max_tokens limit", model_id)
        }
        reason => tracing::debug!("{} stopped: {}", model_id, reason.unwrap_or("unknown")),
    }
}

#[async_trait]
impl InferenceClient for BedrockClient {
    fn name(&self) -> &str {
        "bedrock"
    }

    async fn converse(&self, request: &InferenceRequest) -> Result<String, ProviderError> {
        let url = self.operation_url(&request.model_id, "converse");
        let body = ConverseBody::from_request(request);

        let response = self.send(url, &body).await?;
        let text = response.text().await?;

        let converse: ConverseResponse = serde_json::from_str(&text).map_err(|e| {
            ProviderError::InvalidResponse(format!("Failed to parse response: {} - Body: {}", e, text))
        })?;
        log_stop_reason(&request.model_id, converse.stop_reason.as_deref());

        Ok(converse
            .output
            .message
            .content
            .into_iter()
            .filter_map(|block| block.text)
            .collect())
    }

    async fn converse_stream(
        &self,
        request: &InferenceRequest,
    ) -> Result<FragmentStream, ProviderError> {
        let url = self.operation_url(&request.model_id, "converse-stream");
        let body = ConverseBody::from_request(request);

        let response = self.send(url, &body).await?;
        let model_id = request.model_id.clone();

        let stream = async_stream::stream! {
            let mut bytes = response.bytes_stream();
            let mut decoder = EventStreamDecoder::new();

            while let Some(chunk) = bytes.next().await {
                let decoded = chunk.map_err(ProviderError::from).and_then(|chunk| {
                    decoder.push(&chunk);
                    decode_fragments(&mut decoder, &model_id)
                });

                match decoded {
                    Ok(texts) => {
                        for text in texts {
                            yield Ok(text);
                        }
                    }
                    Err(e) => {
                        yield Err(e);
                        return;
                    }
                }
            }

            if decoder.pending() > 0 {
                yield Err(ProviderError::Stream(format!(
                    "stream closed inside a frame ({} bytes pending)",
                    decoder.pending()
                )));
            }
        };

        Ok(Box::pin(stream))
    }
}
