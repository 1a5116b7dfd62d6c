use axum::{
    Json,
    extract::{Path, Query, State, rejection::JsonRejection},
    http::StatusCode,
    response::{IntoResponse, Response},
};
use serde_json::json;

use super::super::AppState;
use super::{LimitQuery, invalid_body};
use crate::core::webhook::{Payload, WebhookKind};

/// `POST /webhook/{topic}`: accepted immediately, processed by the dispatcher later.
pub async fn receive_webhook(
    State(state): State<AppState>,
    Path(topic): Path<String>,
    payload: Result<Json<Payload>, JsonRejection>,
) -> Response {
    let payload = match payload {
        Ok(Json(payload)) => payload,
        Err(rejection) => return invalid_body(rejection),
    };
    let Some(kind) = WebhookKind::from_topic(&topic) else {
        return (
            StatusCode::NOT_FOUND,
            Json(json!({
                "success": false,
                "error": format!("Unknown webhook topic: {}", topic),
                "kind": "not_found"
            })),
        )
            .into_response();
    };

    let receipt = state.ingress.submit(kind, &topic, payload).await;
    Json(receipt).into_response()
}

pub async fn webhook_history(
    State(state): State<AppState>,
    Query(query): Query<LimitQuery>,
) -> Json<serde_json::Value> {
    let history = state.ingress.history(query.limit.unwrap_or(100)).await;
    Json(json!({
        "success": true,
        "webhooks": history,
        "total": history.len()
    }))
}

pub async fn webhook_stats(State(state): State<AppState>) -> Json<serde_json::Value> {
    Json(json!({
        "success": true,
        "statistics": state.ingress.stats().await
    }))
}

/// `GET /api/webhooks/{id}`: one record, for callers polling a receipt.
pub async fn get_webhook(State(state): State<AppState>, Path(id): Path<String>) -> Response {
    match state.ingress.get(&id).await {
        Some(record) => Json(json!({ "success": true, "webhook": record })).into_response(),
        None => (
            StatusCode::NOT_FOUND,
            Json(json!({
                "success": false,
                "error": format!("Webhook {} not found", id),
                "kind": "not_found"
            })),
        )
            .into_response(),
    }
}
