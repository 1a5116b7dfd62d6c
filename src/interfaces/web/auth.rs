use axum::{
    body::Body,
    extract::{ConnectInfo, State},
    http::Request,
    middleware::Next,
    response::{IntoResponse, Response},
};
use std::net::SocketAddr;

use super::AppState;

/// Name of the API key that authorized the request, for handlers that want it.
#[derive(Debug, Clone)]
pub struct KeyName(pub String);

/// Runs the security gate (origin, bearer key, rate window) before any protected handler.
pub async fn require_auth(
    State(state): State<AppState>,
    ConnectInfo(peer): ConnectInfo<SocketAddr>,
    mut req: Request<Body>,
    next: Next,
) -> Response {
    let token = bearer_token(&req).unwrap_or_default();

    match state.gate.authorize(peer.ip(), &token).await {
        Ok(key_name) => {
            req.extensions_mut().insert(KeyName(key_name));
            next.run(req).await
        }
        Err(e) => e.into_response(),
    }
}

fn bearer_token(req: &Request<Body>) -> Option<String> {
    req.headers()
        .get("authorization")
        .and_then(|v| v.to_str().ok())
        .and_then(|s| s.strip_prefix("Bearer "))
        .map(|s| s.trim().to_string())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn request(header: Option<&str>) -> Request<Body> {
        let mut builder = Request::builder().uri("/api/agents/status");
        if let Some(value) = header {
            builder = builder.header("authorization", value);
        }
        builder.body(Body::empty()).unwrap()
    }

    #[test]
    fn bearer_prefix_is_required() {
        assert_eq!(
            bearer_token(&request(Some("Bearer ak_123"))).as_deref(),
            Some("ak_123")
        );
        assert_eq!(bearer_token(&request(Some("Token ak_123"))), None);
        assert_eq!(bearer_token(&request(Some("ak_123"))), None);
        assert_eq!(bearer_token(&request(None)), None);
    }
}
