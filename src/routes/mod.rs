//! API routes

use std::convert::Infallible;

use axum::{
    extract::{Path, State},
    http::StatusCode,
    response::{
        sse::{Event, KeepAlive, Sse},
        IntoResponse, Json, Response,
    },
    routing::{get, post, put},
    Router,
};
use futures::{Stream, StreamExt};
use serde::{Deserialize, Serialize};
use serde_json::json;
use uuid::Uuid;

use crate::config::prompts::DEFAULT_PRESET;
use crate::config::{CatalogConfig, ConfigError, InferenceParams, ModelOption, PromptLibrary};
use crate::conversation::Role;
use crate::core::{ChatError, Reply, ReplyEvent};
use crate::format::{self, RenderPhase};
use crate::session::{SessionError, SessionState};
use crate::AppState;

/// Error body returned by every route
#[derive(Debug)]
pub struct ApiError {
    status: StatusCode,
    message: String,
}

impl ApiError {
    fn new(status: StatusCode, message: impl Into<String>) -> Self {
        Self {
            status,
            message: message.into(),
        }
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        (self.status, Json(json!({ "error": self.message }))).into_response()
    }
}

impl From<SessionError> for ApiError {
    fn from(error: SessionError) -> Self {
        let status = match error {
            SessionError::NotFound(_) => StatusCode::NOT_FOUND,
            SessionError::Busy(_) => StatusCode::CONFLICT,
            SessionError::Invalid(_) => StatusCode::BAD_REQUEST,
        };
        Self::new(status, error.to_string())
    }
}

impl From<ConfigError> for ApiError {
    fn from(error: ConfigError) -> Self {
        Self::new(StatusCode::BAD_REQUEST, error.to_string())
    }
}

impl From<ChatError> for ApiError {
    fn from(error: ChatError) -> Self {
        let status = match error {
            ChatError::Configuration(_) => StatusCode::SERVICE_UNAVAILABLE,
            ChatError::Request(_) => StatusCode::BAD_GATEWAY,
        };
        Self::new(status, error.to_string())
    }
}

type ApiResult<T> = Result<Json<T>, ApiError>;

#[derive(Debug, Serialize)]
struct HealthResponse {
    status: &'static str,
    version: &'static str,
}

#[derive(Debug, Serialize)]
struct ModelsResponse {
    default_model: String,
    models: Vec<ModelOption>,
}

#[derive(Debug, Serialize)]
struct PresetSummary {
    key: String,
    name: String,
    description: String,
    tagged: bool,
}

/// Partial inference parameter change
#[derive(Debug, Default, Deserialize)]
pub struct ParamsUpdate {
    pub max_tokens: Option<u32>,
    pub top_p: Option<f32>,
    pub temperature: Option<f32>,
    pub top_k: Option<u32>,
}

impl ParamsUpdate {
    fn apply(&self, current: InferenceParams) -> InferenceParams {
        InferenceParams {
            max_tokens: self.max_tokens.unwrap_or(current.max_tokens),
            top_p: self.top_p.unwrap_or(current.top_p),
            temperature: self.temperature.unwrap_or(current.temperature),
            top_k: self.top_k.unwrap_or(current.top_k),
        }
    }
}

/// Session configuration change; omitted fields stay as they are
#[derive(Debug, Default, Deserialize)]
pub struct ConfigUpdate {
    /// Model label, id, or deployment ARN
    #[serde(default)]
    pub model: Option<String>,

    /// Preset key (e.g., "reasoning")
    #[serde(default)]
    pub preset: Option<String>,

    /// Free-text system instruction, overrides any preset
    #[serde(default)]
    pub system_prompt: Option<String>,

    #[serde(default)]
    pub params: Option<ParamsUpdate>,
}

impl ConfigUpdate {
    fn apply(
        &self,
        mut state: SessionState,
        catalog: &CatalogConfig,
        prompts: &PromptLibrary,
    ) -> Result<SessionState, ConfigError> {
        if let Some(selector) = &self.model {
            let model = catalog
                .resolve_model(selector)
                .ok_or_else(|| ConfigError::Validation(format!("unknown model '{}'", selector)))?;
            state = state.with_model(model);
        }

        match (&self.preset, &self.system_prompt) {
            (Some(_), Some(_)) => {
                return Err(ConfigError::Validation(
                    "give either preset or system_prompt, not both".into(),
                ))
            }
            (Some(key), None) => state = state.with_preset(key, prompts)?,
            (None, Some(text)) => state = state.with_system_instruction(text.clone()),
            (None, None) => {}
        }

        if let Some(params) = &self.params {
            let next = params.apply(state.params);
            state = state.with_params(next)?;
        }

        Ok(state)
    }
}

#[derive(Debug, Serialize)]
struct TurnView {
    role: Role,
    content: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    rendered: Option<String>,
}

#[derive(Debug, Serialize)]
struct SessionView {
    id: Uuid,
    model: ModelOption,
    preset: Option<String>,
    system_instruction: String,
    tagged_format: bool,
    params: InferenceParams,
    turns: Vec<TurnView>,
}

impl SessionView {
    fn new(id: Uuid, state: SessionState) -> Self {
        let tagged = state.tagged_format;
        let turns = state
            .conversation
            .turns()
            .iter()
            .map(|turn| TurnView {
                role: turn.role,
                content: turn.content.clone(),
                rendered: (turn.role == Role::Assistant)
                    .then(|| format::render(&turn.content, tagged, RenderPhase::Complete)),
            })
            .collect();

        Self {
            id,
            model: state.model,
            preset: state.preset,
            system_instruction: state.system_instruction,
            tagged_format: state.tagged_format,
            params: state.params,
            turns,
        }
    }
}

#[derive(Debug, Serialize)]
struct ConfigResponse {
    session: SessionView,
    history_cleared: bool,
}

#[derive(Debug, Deserialize)]
pub struct ChatRequest {
    pub message: String,
}

#[derive(Debug, Serialize)]
pub struct ChatResponse {
    pub reply: Reply,
}

async fn health() -> Json<HealthResponse> {
    Json(HealthResponse {
        status: "ok",
        version: env!("CARGO_PKG_VERSION"),
    })
}

async fn list_models(State(state): State<AppState>) -> Json<ModelsResponse> {
    Json(ModelsResponse {
        default_model: state.catalog.default_model.clone(),
        models: state.catalog.models.clone(),
    })
}

async fn list_prompts(State(state): State<AppState>) -> Json<Vec<PresetSummary>> {
    Json(
        state
            .prompts
            .iter()
            .map(|(key, preset)| PresetSummary {
                key: key.clone(),
                name: preset.preset.name.clone(),
                description: preset.preset.description.clone(),
                tagged: preset.preset.tagged,
            })
            .collect(),
    )
}

async fn create_session(
    State(state): State<AppState>,
    update: Option<Json<ConfigUpdate>>,
) -> Result<(StatusCode, Json<SessionView>), ApiError> {
    let mut session = SessionState::from_catalog(&state.catalog, &state.prompts, DEFAULT_PRESET)?;
    if let Some(Json(update)) = update {
        session = update.apply(session, &state.catalog, &state.prompts)?;
    }

    let id = state.sessions.create(session.clone()).await;
    Ok((StatusCode::CREATED, Json(SessionView::new(id, session))))
}

async fn get_session(State(state): State<AppState>, Path(id): Path<Uuid>) -> ApiResult<SessionView> {
    let session = state.sessions.get(id).await?;
    Ok(Json(SessionView::new(id, session)))
}

async fn delete_session(
    State(state): State<AppState>,
    Path(id): Path<Uuid>,
) -> Result<StatusCode, ApiError> {
    state.sessions.remove(id).await?;
    tracing::info!("Closed session {}", id);
    Ok(StatusCode::NO_CONTENT)
}

async fn update_config(
    State(state): State<AppState>,
    Path(id): Path<Uuid>,
    Json(update): Json<ConfigUpdate>,
) -> ApiResult<ConfigResponse> {
    let mut history_cleared = false;
    let session = state
        .sessions
        .update(id, |current| {
            let had_history = !current.conversation.is_empty();
            let next = update.apply(current, &state.catalog, &state.prompts)?;
            history_cleared = had_history && next.conversation.is_empty();
            Ok(next)
        })
        .await?;

    if history_cleared {
        tracing::info!("Session {} reconfigured, chat history cleared", id);
    }

    Ok(Json(ConfigResponse {
        session: SessionView::new(id, session),
        history_cleared,
    }))
}

fn check_message(message: &str) -> Result<(), ApiError> {
    if message.trim().is_empty() {
        return Err(ApiError::new(StatusCode::BAD_REQUEST, "message is empty"));
    }
    Ok(())
}

async fn chat(
    State(state): State<AppState>,
    Path(id): Path<Uuid>,
    Json(request): Json<ChatRequest>,
) -> ApiResult<ChatResponse> {
    check_message(&request.message)?;
    let (inference, tagged) = state.sessions.begin_turn(id, &request.message).await?;

    // Runs to completion even if the caller goes away
    let sessions = state.sessions.clone();
    let engine = state.chat_engine.clone();
    let result = tokio::spawn(async move {
        let result = engine.reply(&inference, tagged).await;
        sessions
            .finish_turn(id, result.as_ref().ok().map(|reply| reply.raw.as_str()))
            .await;
        result
    })
    .await
    .map_err(|e| ApiError::new(StatusCode::INTERNAL_SERVER_ERROR, e.to_string()))?;

    Ok(Json(ChatResponse { reply: result? }))
}

fn json_event(name: &str, value: &impl Serialize) -> Event {
    Event::default()
        .event(name)
        .json_data(value)
        .unwrap_or_else(|e| Event::default().event("error").data(e.to_string()))
}

/// Server-sent events: `partial` per fragment, then `done` or `error`
async fn chat_stream(
    State(state): State<AppState>,
    Path(id): Path<Uuid>,
    Json(request): Json<ChatRequest>,
) -> Result<Sse<impl Stream<Item = Result<Event, Infallible>>>, ApiError> {
    check_message(&request.message)?;
    let (inference, tagged) = state.sessions.begin_turn(id, &request.message).await?;

    let (tx, mut rx) = tokio::sync::mpsc::channel::<Event>(32);
    let sessions = state.sessions.clone();
    let engine = state.chat_engine.clone();

    // Generation is not cancellable: it finishes and commits even if the
    // client disconnects
    tokio::spawn(async move {
        let updates = engine.reply_stream(inference, tagged);
        futures::pin_mut!(updates);
        let mut finished = false;

        while let Some(update) = updates.next().await {
            let event = match update {
                Ok(ReplyEvent::Partial(frame)) => json_event("partial", &json!({ "rendered": frame })),
                Ok(ReplyEvent::Completed(reply)) => {
                    sessions.finish_turn(id, Some(&reply.raw)).await;
                    finished = true;
                    json_event("done", &reply)
                }
                Err(e) => {
                    sessions.finish_turn(id, None).await;
                    finished = true;
                    json_event("error", &json!({ "error": e.to_string() }))
                }
            };
            // The receiver is gone when the client disconnected
            let _ = tx.send(event).await;
        }

        if !finished {
            sessions.finish_turn(id, None).await;
        }
    });

    let stream = async_stream::stream! {
        while let Some(event) = rx.recv().await {
            yield Ok::<_, Infallible>(event);
        }
    };

    Ok(Sse::new(stream).keep_alive(KeepAlive::default()))
}

pub fn router() -> Router<AppState> {
    Router::new()
        .route("/health", get(health))
        .route("/v1/models", get(list_models))
        .route("/v1/prompts", get(list_prompts))
        .route("/v1/sessions", post(create_session))
        .route("/v1/sessions/:id", get(get_session).delete(delete_session))
        .route("/v1/sessions/:id/config", put(update_config))
        .route("/v1/sessions/:id/chat", post(chat))
        .route("/v1/sessions/:id/chat/stream", post(chat_stream))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::ChatEngine;
    use crate::providers::testing::{Script, ScriptedClient};
    use crate::session::SessionStore;
    use axum::body::{to_bytes, Body};
    use axum::http::{header, Method, Request};
    use serde_json::Value;
    use std::sync::Arc;
    use tower::ServiceExt;

    fn app(scripts: Vec<Script>) -> (Router, AppState) {
        let state = AppState {
            catalog: Arc::new(CatalogConfig::default()),
            prompts: Arc::new(PromptLibrary::builtin()),
            sessions: Arc::new(SessionStore::new()),
            chat_engine: Arc::new(ChatEngine::new(Arc::new(ScriptedClient::new(scripts)))),
        };
        (router().with_state(state.clone()), state)
    }

    async fn send(router: &Router, method: Method, uri: &str, body: Option<Value>) -> (StatusCode, String) {
        let mut builder = Request::builder().method(method).uri(uri);
        let body = match body {
            Some(value) => {
                builder = builder.header(header::CONTENT_TYPE, "application/json");
                Body::from(value.to_string())
            }
            None => Body::empty(),
        };

        let response = router
            .clone()
            .oneshot(builder.body(body).unwrap())
            .await
            .unwrap();
        let status = response.status();
        let bytes = to_bytes(response.into_body(), usize::MAX).await.unwrap();
        (status, String::from_utf8(bytes.to_vec()).unwrap())
    }

    async fn create(router: &Router) -> String {
        let (status, body) = send(router, Method::POST, "/v1/sessions", None).await;
        assert_eq!(status, StatusCode::CREATED);
        let view: Value = serde_json::from_str(&body).unwrap();
        view["id"].as_str().unwrap().to_string()
    }

    #[tokio::test]
    async fn test_health() {
        let (router, _) = app(vec![]);
        let (status, body) = send(&router, Method::GET, "/health", None).await;
        assert_eq!(status, StatusCode::OK);
        assert!(body.contains("\"ok\""));
    }

    #[tokio::test]
    async fn test_models_and_prompts() {
        let (router, _) = app(vec![]);

        let (_, body) = send(&router, Method::GET, "/v1/models", None).await;
        let models: Value = serde_json::from_str(&body).unwrap();
        assert_eq!(models["default_model"], "Nova Lite Reasoning");
        assert_eq!(models["models"].as_array().unwrap().len(), 4);

        let (_, body) = send(&router, Method::GET, "/v1/prompts", None).await;
        let prompts: Value = serde_json::from_str(&body).unwrap();
        assert_eq!(prompts.as_array().unwrap().len(), 2);
    }

    #[tokio::test]
    async fn test_chat_round_trip() {
        let (router, _) = app(vec![Script::reply(&[
            "<|begin_of_thought|>step one<|end_of_thought|><|begin_of_solution|>42<|end_of_solution|>",
        ])]);
        let id = create(&router).await;

        let (status, body) = send(
            &router,
            Method::POST,
            &format!("/v1/sessions/{}/chat", id),
            Some(json!({ "message": "6 x 7?" })),
        )
        .await;
        assert_eq!(status, StatusCode::OK);
        let response: Value = serde_json::from_str(&body).unwrap();
        assert_eq!(
            response["reply"]["rendered"],
            "### Thought\n\nstep one\n\n### Solution\n\n42"
        );

        let (_, body) = send(&router, Method::GET, &format!("/v1/sessions/{}", id), None).await;
        let view: Value = serde_json::from_str(&body).unwrap();
        assert_eq!(view["turns"].as_array().unwrap().len(), 2);
        assert_eq!(view["turns"][1]["rendered"], response["reply"]["rendered"]);
    }

    #[tokio::test]
    async fn test_chat_failure_is_bad_gateway() {
        let (router, state) = app(vec![Script::Fail("throttled".into())]);
        let id = create(&router).await;

        let (status, body) = send(
            &router,
            Method::POST,
            &format!("/v1/sessions/{}/chat", id),
            Some(json!({ "message": "hi" })),
        )
        .await;
        assert_eq!(status, StatusCode::BAD_GATEWAY);
        assert!(body.contains("throttled"));

        let session = state.sessions.get(id.parse().unwrap()).await.unwrap();
        assert_eq!(session.conversation.len(), 1);
    }

    #[tokio::test]
    async fn test_chat_stream_events() {
        let (router, state) = app(vec![Script::reply(&["<|begin_of_thought|>", "still thinking"])]);
        let id = create(&router).await;

        let (status, body) = send(
            &router,
            Method::POST,
            &format!("/v1/sessions/{}/chat/stream", id),
            Some(json!({ "message": "hard one" })),
        )
        .await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body.matches("event: partial").count(), 2);
        assert!(body.contains("event: done"));
        assert!(body.contains("\"truncated\":true"));

        let session = state.sessions.get(id.parse().unwrap()).await.unwrap();
        assert_eq!(session.conversation.len(), 2);
    }

    #[tokio::test]
    async fn test_chat_stream_error_event() {
        let (router, state) = app(vec![Script::BreakAfter(vec!["par".into()])]);
        let id = create(&router).await;

        let (_, body) = send(
            &router,
            Method::POST,
            &format!("/v1/sessions/{}/chat/stream", id),
            Some(json!({ "message": "hi" })),
        )
        .await;
        assert!(body.contains("event: partial"));
        assert!(body.contains("event: error"));

        let session = state.sessions.get(id.parse().unwrap()).await.unwrap();
        assert_eq!(session.conversation.len(), 1);
    }

    #[tokio::test]
    async fn test_config_change_clears_history() {
        let (router, _) = app(vec![Script::reply(&["hello"])]);
        let id = create(&router).await;

        send(
            &router,
            Method::POST,
            &format!("/v1/sessions/{}/chat", id),
            Some(json!({ "message": "hi" })),
        )
        .await;

        let uri = format!("/v1/sessions/{}/config", id);
        let (status, body) = send(&router, Method::PUT, &uri, Some(json!({ "params": { "top_k": 40 } }))).await;
        assert_eq!(status, StatusCode::OK);
        let response: Value = serde_json::from_str(&body).unwrap();
        assert_eq!(response["history_cleared"], false);
        assert_eq!(response["session"]["params"]["top_k"], 40);

        let (_, body) = send(&router, Method::PUT, &uri, Some(json!({ "model": "Nova Pro" }))).await;
        let response: Value = serde_json::from_str(&body).unwrap();
        assert_eq!(response["history_cleared"], true);
        assert_eq!(response["session"]["turns"].as_array().unwrap().len(), 0);
    }

    #[tokio::test]
    async fn test_config_validation() {
        let (router, _) = app(vec![]);
        let id = create(&router).await;
        let uri = format!("/v1/sessions/{}/config", id);

        let (status, _) = send(&router, Method::PUT, &uri, Some(json!({ "model": "gpt-4o" }))).await;
        assert_eq!(status, StatusCode::BAD_REQUEST);

        let (status, _) = send(&router, Method::PUT, &uri, Some(json!({ "params": { "top_k": 500 } }))).await;
        assert_eq!(status, StatusCode::BAD_REQUEST);

        let (status, _) = send(
            &router,
            Method::PUT,
            &uri,
            Some(json!({ "preset": "default", "system_prompt": "x" })),
        )
        .await;
        assert_eq!(status, StatusCode::BAD_REQUEST);
    }

    #[tokio::test]
    async fn test_unknown_session_and_empty_message() {
        let (router, _) = app(vec![]);

        let (status, _) = send(&router, Method::GET, &format!("/v1/sessions/{}", Uuid::new_v4()), None).await;
        assert_eq!(status, StatusCode::NOT_FOUND);

        let id = create(&router).await;
        let (status, _) = send(
            &router,
            Method::POST,
            &format!("/v1/sessions/{}/chat", id),
            Some(json!({ "message": "   " })),
        )
        .await;
        assert_eq!(status, StatusCode::BAD_REQUEST);

        let (status, _) = send(&router, Method::DELETE, &format!("/v1/sessions/{}", id), None).await;
        assert_eq!(status, StatusCode::NO_CONTENT);
    }
}
