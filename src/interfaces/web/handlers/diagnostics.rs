use axum::{Json, extract::State};
use chrono::Utc;
use serde_json::json;

use super::super::AppState;

pub async fn root() -> Json<serde_json::Value> {
    Json(json!({
        "message": "Alchemy N8N Gateway",
        "version": env!("CARGO_PKG_VERSION"),
        "status": "running"
    }))
}

pub async fn health(State(state): State<AppState>) -> Json<serde_json::Value> {
    let uptime = (Utc::now() - state.started_at).num_seconds();
    Json(json!({
        "status": "healthy",
        "timestamp": Utc::now().to_rfc3339(),
        "uptime_secs": uptime,
        "components": {
            "security": "active",
            "webhook_handler": "active",
            "agents": "active"
        }
    }))
}

pub async fn security_status(State(state): State<AppState>) -> Json<serde_json::Value> {
    Json(json!({
        "success": true,
        "security": state.gate.status().await
    }))
}
