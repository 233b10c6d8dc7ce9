// ABOUTME: Liveness endpoint reporting service identity and version
// ABOUTME: Does not touch Docker so it stays cheap for load balancers

use axum::{extract::State, Json};
use chrono::Utc;
use serde_json::{json, Value};

use crate::state::AppState;

pub async fn health_check(State(state): State<AppState>) -> Json<Value> {
    Json(json!({
        "status": "healthy",
        "service": "sorobox-api",
        "version": env!("CARGO_PKG_VERSION"),
        "timestamp": Utc::now().to_rfc3339(),
        "network": state.settings.network.network,
        "pendingSignatures": state.signatures.pending_count(),
    }))
}
