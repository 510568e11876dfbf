//! Server setup and routing.

use axum::{
    routing::{get, post},
    Router,
};
use tower_http::{cors::CorsLayer, trace::TraceLayer};

use crate::{handlers, state::AppState};

/// Create the API router with all routes.
pub fn create_router(state: AppState) -> Router {
    Router::new()
        .route(
            "/v1/chat/completions",
            post(handlers::chat::handle_chat_completion),
        )
        .route(
            "/v1/embeddings",
            post(handlers::embeddings::handle_embeddings),
        )
        .route("/v1/models", get(handlers::models::handle_list_models))
        .route("/health", get(handlers::health::handle_health))
        .route("/v1/health", get(handlers::health::handle_health))
        .layer(TraceLayer::new_for_http())
        .layer(CorsLayer::permissive())
        .with_state(state)
}
