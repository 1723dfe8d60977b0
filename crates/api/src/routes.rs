use crate::state::AppState;
use axum::{
    body::{Body, Bytes},
    extract::State,
    http::{header, StatusCode},
    response::{IntoResponse, Response},
    routing::{get, post},
    Json, Router,
};
use cryptocoach_core::{ChatRequest, MarketDataKind, MarketDataRequest};
use cryptocoach_exchange::ExchangeError;
use std::sync::Arc;
use tracing::{error, info, warn};

pub fn api_routes() -> Router<Arc<AppState>> {
    Router::new()
        // Health
        .route("/health", get(health_check))
        // Chat
        .route("/chat", post(chat))
        // Market data
        .route("/market-data", post(market_data).get(method_not_allowed))
}

fn json_error(status: StatusCode, body: serde_json::Value) -> Response {
    (status, Json(body)).into_response()
}

// ---------------------------------------------------------------------------
// Health
// ---------------------------------------------------------------------------

async fn health_check() -> impl IntoResponse {
    Json(serde_json::json!({
        "status": "ok",
        "version": env!("CARGO_PKG_VERSION"),
    }))
}

// ---------------------------------------------------------------------------
// Chat
// ---------------------------------------------------------------------------

async fn chat(State(state): State<Arc<AppState>>, body: Bytes) -> Response {
    let req: ChatRequest = match serde_json::from_slice(&body) {
        Ok(req) => req,
        Err(e) => {
            warn!(error = %e, "Rejected chat request body");
            return json_error(
                StatusCode::BAD_REQUEST,
                serde_json::json!({"error": "Invalid request body"}),
            );
        }
    };

    match state.completions.stream_reply(req.messages).await {
        Ok(stream) => (
            [(header::CONTENT_TYPE, "text/plain; charset=utf-8")],
            Body::from_stream(stream),
        )
            .into_response(),
        Err(e) => {
            error!(error = %e, "Error in chat API");
            json_error(
                StatusCode::INTERNAL_SERVER_ERROR,
                serde_json::json!({"error": "Error processing your request"}),
            )
        }
    }
}

// ---------------------------------------------------------------------------
// Market data
// ---------------------------------------------------------------------------

const REQUEST_TYPES: [&str; 3] = ["ticker", "orderbook", "ohlcv"];

async fn market_data(State(state): State<Arc<AppState>>, body: Bytes) -> Response {
    let value: serde_json::Value = match serde_json::from_slice(&body) {
        Ok(value) => value,
        Err(e) => {
            return json_error(
                StatusCode::BAD_REQUEST,
                serde_json::json!({"error": "Invalid request body", "details": e.to_string()}),
            );
        }
    };

    let kind = value.get("type").and_then(|t| t.as_str());
    if !kind.is_some_and(|k| REQUEST_TYPES.contains(&k)) {
        return json_error(
            StatusCode::BAD_REQUEST,
            serde_json::json!({"error": "Invalid request type"}),
        );
    }

    let req: MarketDataRequest = match serde_json::from_value(value) {
        Ok(req) => req,
        Err(e) => {
            return json_error(
                StatusCode::BAD_REQUEST,
                serde_json::json!({"error": "Invalid request body", "details": e.to_string()}),
            );
        }
    };

    match fetch_market_data(&state, &req).await {
        Ok(response) => response,
        Err(e) => {
            error!(symbol = %req.symbol, kind = ?req.kind, error = %e, "Market data error");
            json_error(
                StatusCode::INTERNAL_SERVER_ERROR,
                serde_json::json!({
                    "error": "Failed to fetch market data",
                    "details": e.to_string(),
                }),
            )
        }
    }
}

async fn fetch_market_data(
    state: &AppState,
    req: &MarketDataRequest,
) -> Result<Response, ExchangeError> {
    let gateway = state.gateways.get(req.exchange()).await?;
    info!(exchange = req.exchange(), symbol = %req.symbol, kind = ?req.kind, "Market data request");

    let response = match req.kind {
        MarketDataKind::Ticker => Json(gateway.get_ticker(&req.symbol).await?).into_response(),
        MarketDataKind::Orderbook => {
            Json(gateway.get_order_book(&req.symbol, req.limit()).await?).into_response()
        }
        MarketDataKind::Ohlcv => Json(
            gateway
                .get_ohlcv(&req.symbol, req.timeframe(), req.since(), req.limit())
                .await?,
        )
        .into_response(),
    };
    Ok(response)
}

async fn method_not_allowed() -> Response {
    json_error(
        StatusCode::METHOD_NOT_ALLOWED,
        serde_json::json!({"error": "Method not allowed"}),
    )
}
