//! HTTP route handlers.
//!
//! Static assets get a long Cache-Control, the health probe is never cached.
//! `/chat` and `/rag/knowledge` call paid upstream APIs and sit behind the
//! per-client rate limiter.
//!
//! Request tracing is enabled via middleware that generates a unique request ID
//! for each incoming request, allowing correlation of all logs within a request.

pub mod agents;
pub mod chat;
pub mod health;
pub mod home;
pub mod rag;

use axum::{
    middleware,
    routing::{get, post},
    Router,
};
use axum::http::header::{HeaderValue, CACHE_CONTROL};
use tower_http::cors::{Any, CorsLayer};
use tower_http::services::ServeDir;
use tower_http::set_header::SetResponseHeaderLayer;
use tower_http::trace::TraceLayer;

use crate::config::{CACHE_CONTROL_NO_STORE, CACHE_CONTROL_STATIC, STATIC_DIR};
use crate::error::AppError;
use crate::middleware::{rate_limit_layer, request_id_layer};
use crate::state::AppState;

/// Creates the Axum router with all routes, cache headers and middleware.
pub fn create_router(state: AppState) -> Router {
    // Static files - long cache with immutable hint
    let static_routes = Router::new()
        .nest_service("/static", ServeDir::new(STATIC_DIR))
        .layer(SetResponseHeaderLayer::if_not_present(
            CACHE_CONTROL,
            HeaderValue::from_static(CACHE_CONTROL_STATIC),
        ));

    // Health check - always fresh for liveness probes
    let health_routes = Router::new()
        .route("/health", get(health::health))
        .layer(SetResponseHeaderLayer::overriding(
            CACHE_CONTROL,
            HeaderValue::from_static(CACHE_CONTROL_NO_STORE),
        ));

    let page_routes = Router::new().route("/", get(home::index));

    let agent_routes = Router::new()
        .route("/agents/info", get(agents::info))
        .route("/agents/status", get(agents::status))
        .route("/agents/mcp/tools", get(agents::mcp_tools))
        .route("/agents/{agent_type}/reset", post(agents::reset));

    // Upstream-backed endpoints - rate limited per client
    let limited_routes = Router::new()
        .route("/chat", post(chat::chat))
        .route("/rag/knowledge", post(rag::add_knowledge))
        .route_layer(middleware::from_fn_with_state(state.clone(), rate_limit_layer));

    Router::new()
        .merge(page_routes)
        .merge(health_routes)
        .merge(agent_routes)
        .merge(limited_routes)
        .merge(static_routes)
        .fallback(not_found)
        .with_state(state)
        .layer(TraceLayer::new_for_http())
        .layer(
            CorsLayer::new()
                .allow_origin(Any)
                .allow_methods(Any)
                .allow_headers(Any),
        )
        // Request ID middleware - creates root span with request_id for correlation
        .layer(middleware::from_fn(request_id_layer))
}

async fn not_found() -> AppError {
    AppError::NotFound("Not Found".to_string())
}
