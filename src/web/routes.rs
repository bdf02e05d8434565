use std::sync::Arc;

use axum::routing::{any, get, post};
use axum::Router;
use tower_http::cors::{Any, CorsLayer};
use tower_http::services::ServeDir;
use tower_http::trace::TraceLayer;

use super::handlers;
use super::ws;
use crate::state::AppState;

/// Create the relay router: upstream signaling socket, downstream offer
/// exchange, advisory endpoints, and the consumer page.
pub fn create_router(state: Arc<AppState>) -> Router {
    let cors = CorsLayer::new()
        .allow_origin(Any)
        .allow_methods(Any)
        .allow_headers(Any);

    let static_files =
        ServeDir::new(&state.config.static_dir).append_index_html_on_directories(true);

    Router::new()
        .route("/ws", any(ws::ws_handler))
        .route("/offer", post(handlers::offer).options(preflight))
        .route("/config", get(handlers::config))
        .route("/health", get(handlers::health))
        .fallback_service(static_files)
        .layer(TraceLayer::new_for_http())
        .layer(cors)
        .with_state(state)
}

/// Bare 200 for preflight; the CORS layer attaches the headers.
async fn preflight() {}
