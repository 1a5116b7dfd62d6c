use axum::{
    Json,
    http::StatusCode,
    response::{IntoResponse, Response},
};
use thiserror::Error;

/// Failures surfaced by the security gate, the agent registry and the dispatch facade.
///
/// A run that reaches the agent never produces one of these; its failure travels
/// inside the report as `TaskResult::Failure`.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum GatewayError {
    #[error("Invalid API key")]
    Unauthorized,

    #[error("IP address {0} not authorized")]
    Forbidden(String),

    #[error("Rate limit exceeded. Maximum {max} requests per {window_secs} seconds.")]
    RateLimited { max: usize, window_secs: u64 },

    #[error("Agent {0} not found")]
    NotFound(String),

    #[error("Agent {0} is disabled")]
    Disabled(String),

    #[error("Invalid parameters for agent {0}")]
    InvalidParameters(String),
}

impl GatewayError {
    pub fn kind(&self) -> &'static str {
        match self {
            GatewayError::Unauthorized => "unauthorized",
            GatewayError::Forbidden(_) => "forbidden",
            GatewayError::RateLimited { .. } => "rate_limited",
            GatewayError::NotFound(_) => "not_found",
            GatewayError::Disabled(_) => "disabled",
            GatewayError::InvalidParameters(_) => "invalid_parameters",
        }
    }

    pub fn status_code(&self) -> StatusCode {
        match self {
            GatewayError::Unauthorized => StatusCode::UNAUTHORIZED,
            GatewayError::Forbidden(_) => StatusCode::FORBIDDEN,
            GatewayError::RateLimited { .. } => StatusCode::TOO_MANY_REQUESTS,
            GatewayError::NotFound(_) => StatusCode::NOT_FOUND,
            GatewayError::Disabled(_) => StatusCode::CONFLICT,
            GatewayError::InvalidParameters(_) => StatusCode::UNPROCESSABLE_ENTITY,
        }
    }
}

impl IntoResponse for GatewayError {
    fn into_response(self) -> Response {
        (
            self.status_code(),
            Json(serde_json::json!({
                "success": false,
                "error": self.to_string(),
                "kind": self.kind(),
            })),
        )
            .into_response()
    }
}

pub type GatewayResult<T> = std::result::Result<T, GatewayError>;
