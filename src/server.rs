use crate::config::ShimConfig;
use crate::intercept::{
    chat_middleware, completions_middleware, embeddings_middleware, list_middleware,
    retrieve_middleware,
};
use crate::logging::{Exchange, SharedExchangeLog};
use crate::upstream;

use axum::extract::{Query, State};
use axum::middleware;
use axum::routing::{get, post};
use axum::{Json, Router};
use serde::Deserialize;
use std::sync::Arc;
use tower_http::cors::{Any, CorsLayer};
use tower_http::trace::TraceLayer;

#[derive(Clone)]
pub struct AppState {
    pub config: ShimConfig,
    pub client: reqwest::Client,
    pub exchanges: SharedExchangeLog,
}

pub fn build_router(state: Arc<AppState>) -> Router {
    let cors = CorsLayer::new()
        .allow_origin(Any)
        .allow_methods(Any)
        .allow_headers(Any);

    Router::new()
        .route(
            "/v1/chat/completions",
            post(upstream::native_chat).layer(middleware::from_fn(chat_middleware)),
        )
        .route(
            "/v1/completions",
            post(upstream::native_chat).layer(middleware::from_fn(completions_middleware)),
        )
        .route(
            "/v1/embeddings",
            post(upstream::native_embeddings).layer(middleware::from_fn(embeddings_middleware)),
        )
        .route(
            "/v1/models",
            get(upstream::native_tags).layer(middleware::from_fn(list_middleware)),
        )
        .route(
            "/v1/models/:model",
            get(upstream::native_show).layer(middleware::from_fn(retrieve_middleware)),
        )
        .route("/health", get(handle_health))
        .route("/exchanges", get(handle_exchanges))
        .layer(cors)
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}

async fn handle_health() -> Json<serde_json::Value> {
    Json(serde_json::json!({
        "status": "ok",
        "version": env!("CARGO_PKG_VERSION"),
    }))
}

#[derive(Debug, Deserialize)]
struct ExchangesQuery {
    #[serde(default = "default_exchange_limit")]
    limit: usize,
}

fn default_exchange_limit() -> usize {
    50
}

async fn handle_exchanges(
    State(state): State<Arc<AppState>>,
    Query(query): Query<ExchangesQuery>,
) -> Json<Vec<Exchange>> {
    Json(state.exchanges.recent(query.limit))
}
