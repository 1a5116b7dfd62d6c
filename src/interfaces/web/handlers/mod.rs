pub mod agents;
pub mod diagnostics;
pub mod webhooks;

use axum::{
    Json,
    extract::rejection::JsonRejection,
    response::{IntoResponse, Response},
};
use serde::Deserialize;
use serde_json::json;
use tracing::warn;

/// `?limit=` on history endpoints.
#[derive(Debug, Deserialize)]
pub struct LimitQuery {
    pub limit: Option<usize>,
}

/// A body the `Json` extractor refused, in the same shape as every other error.
fn invalid_body(rejection: JsonRejection) -> Response {
    warn!("Rejected request body: {}", rejection.body_text());
    (
        rejection.status(),
        Json(json!({
            "success": false,
            "error": rejection.body_text(),
            "kind": "invalid_body"
        })),
    )
        .into_response()
}
