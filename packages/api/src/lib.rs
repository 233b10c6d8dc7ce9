// ABOUTME: HTTP API layer for Sorobox: action dispatch, event stream and health
// ABOUTME: Every sandbox operation is reached through the single action endpoint

use axum::{
    body::Bytes,
    extract::State,
    http::{HeaderValue, Method},
    response::{IntoResponse, Response},
    routing::{get, post},
    Router,
};
use std::any::Any;
use tower_http::{
    catch_panic::CatchPanicLayer,
    cors::{self, CorsLayer},
    trace::TraceLayer,
};
use tracing::warn;

pub mod action;
pub mod dispatch;
pub mod health;
pub mod response;
pub mod signatures;
pub mod sse;
pub mod state;

pub use action::{Action, Content, ContentEncoding};
pub use response::{ActionReply, ApiError};
pub use signatures::{SignatureBroker, SignatureResponse};
pub use state::AppState;

/// `POST /api/docker` and `POST /api/actions`
pub async fn handle_action(State(state): State<AppState>, body: Bytes) -> Response {
    let action = match Action::from_slice(&body) {
        Ok(action) => action,
        Err(e) => return e.into_response(),
    };
    match dispatch::dispatch(&state, action).await {
        Ok(reply) => reply.into_response(),
        Err(e) => e.into_response(),
    }
}

fn handle_panic(panic: Box<dyn Any + Send + 'static>) -> Response {
    let details = if let Some(s) = panic.downcast_ref::<String>() {
        s.clone()
    } else if let Some(s) = panic.downcast_ref::<&str>() {
        s.to_string()
    } else {
        "handler panicked".to_string()
    };
    response::internal_error(details)
}

fn cors_layer(origin: &str) -> CorsLayer {
    let layer = CorsLayer::new()
        .allow_methods([Method::GET, Method::POST, Method::OPTIONS])
        .allow_headers(cors::Any);
    match origin.parse::<HeaderValue>() {
        Ok(origin) if origin != "*" => layer.allow_origin(origin),
        Ok(_) => layer.allow_origin(cors::Any),
        Err(e) => {
            warn!(origin, "Invalid CORS origin, allowing any: {}", e);
            layer.allow_origin(cors::Any)
        }
    }
}

pub fn create_router(state: AppState) -> Router {
    let cors = cors_layer(&state.settings.server.cors_origin);
    Router::new()
        .route("/api/docker", post(handle_action))
        .route("/api/actions", post(handle_action))
        .route("/api/events", get(sse::stream_events))
        .route("/api/health", get(health::health_check))
        .with_state(state)
        .layer(CatchPanicLayer::custom(handle_panic))
        .layer(TraceLayer::new_for_http())
        .layer(cors)
}
