pub mod config;
pub mod routes;
pub mod state;
pub mod upstream;

use axum::Router;
use cryptocoach_exchange::GatewayRegistry;
use std::sync::Arc;
use tower_http::cors::CorsLayer;
use tower_http::trace::TraceLayer;

pub use config::ServerConfig;
pub use upstream::{ChatUpstreamConfig, CompletionSource, OpenAiUpstream};

/// Build the Axum application router.
pub fn build_router(config: &ServerConfig) -> Router {
    let app_state = Arc::new(state::AppState::new(
        Arc::new(OpenAiUpstream::new(config.chat.clone())),
        GatewayRegistry::new(config.exchange.clone()),
    ));

    Router::new()
        .nest("/api", routes::api_routes())
        .layer(CorsLayer::permissive())
        .layer(TraceLayer::new_for_http())
        .with_state(app_state)
}

/// Start the API server.
pub async fn start_server(config: ServerConfig) -> anyhow::Result<()> {
    if config.chat.api_key.is_none() {
        tracing::warn!("No chat API key configured; /api/chat will return errors");
    }
    let app = build_router(&config);
    let listener = tokio::net::TcpListener::bind(&config.bind).await?;
    tracing::info!("API server listening on {}", config.bind);
    axum::serve(listener, app).await?;
    Ok(())
}
