//! Reasoning Chat - chat API for reasoning models on Amazon Bedrock
//!
//! Keeps per-session conversations, sends them to a hosted model, and
//! renders replies that arrive in the thought/solution tag format.

use std::net::SocketAddr;
use std::sync::Arc;

use axum::Router;
use tower_http::{cors::CorsLayer, trace::TraceLayer};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

mod config;
mod conversation;
mod core;
mod format;
mod providers;
mod routes;
mod session;

use config::{CatalogConfig, Config, PromptLibrary};
use crate::core::ChatEngine;
use providers::BedrockClient;
use session::SessionStore;

/// Application state shared across handlers
#[derive(Clone)]
pub struct AppState {
    pub catalog: Arc<CatalogConfig>,
    pub prompts: Arc<PromptLibrary>,
    pub sessions: Arc<SessionStore>,
    pub chat_engine: Arc<ChatEngine>,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    dotenvy::dotenv().ok();

    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "reasoning_chat=debug,tower_http=debug".into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    let config = Config::from_env()?;
    let addr: SocketAddr = format!("{}:{}", config.host, config.port).parse()?;

    let catalog = config.load_catalog()?;
    tracing::info!(
        "📋 {} model(s) available, default {}",
        catalog.models.len(),
        catalog.default_model
    );

    let mut prompts = PromptLibrary::builtin();
    if let Some(dir) = &config.prompts_dir {
        let loaded = prompts.load_dir(dir).await?;
        tracing::info!("📝 Loaded {} prompt preset(s) from {}", loaded, dir.display());
    }

    let client = BedrockClient::new(&catalog.endpoint, config.bedrock_api_key.clone())
        .map_err(|e| {
            tracing::error!("Bedrock client unavailable: {}", e);
            e
        })?;
    tracing::info!("🔌 Bedrock endpoint {}", catalog.endpoint.base_url());

    let state = AppState {
        catalog: Arc::new(catalog),
        prompts: Arc::new(prompts),
        sessions: Arc::new(SessionStore::new()),
        chat_engine: Arc::new(ChatEngine::new(Arc::new(client))),
    };

    let app = Router::new()
        .merge(routes::router())
        .layer(CorsLayer::permissive())
        .layer(TraceLayer::new_for_http())
        .with_state(state);

    tracing::info!("🧠 Reasoning chat API running at http://{}", addr);

    let listener = tokio::net::TcpListener::bind(addr).await?;
    axum::serve(listener, app).await?;

    Ok(())
}
