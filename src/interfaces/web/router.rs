use axum::{
    Router,
    body::Body,
    http::{HeaderValue, Method, Request, header},
    middleware,
    middleware::Next,
    routing::{get, post},
};
use tower_http::cors::{Any, CorsLayer};

use super::AppState;
use super::auth;
use super::handlers::{agents, diagnostics, webhooks};

/// N8N and other automation callers post from arbitrary origins.
fn build_cors() -> CorsLayer {
    CorsLayer::new()
        .allow_origin(Any)
        .allow_methods([Method::GET, Method::POST, Method::OPTIONS])
        .allow_headers(Any)
}

pub fn build_api_router(state: AppState) -> Router {
    let public_routes = Router::new()
        .route("/", get(diagnostics::root))
        .route("/health", get(diagnostics::health))
        .with_state(state.clone());

    let authed_routes = Router::new()
        .route("/webhook/{topic}", post(webhooks::receive_webhook))
        .route("/api/agents/status", get(agents::get_status))
        .route("/api/agents/summary", get(agents::get_summary))
        .route("/api/agents/history", get(agents::get_history))
        .route("/api/agents/capabilities", get(agents::get_all_capabilities))
        .route("/api/agents/{agent}/trigger", post(agents::trigger_agent))
        .route("/api/agents/{agent}/enable", post(agents::enable_agent))
        .route("/api/agents/{agent}/disable", post(agents::disable_agent))
        .route(
            "/api/agents/{agent}/capabilities",
            get(agents::get_capabilities),
        )
        .route("/api/agents/{agent}/triggers", post(agents::add_trigger))
        .route("/api/webhooks/history", get(webhooks::webhook_history))
        .route("/api/webhooks/stats", get(webhooks::webhook_stats))
        .route("/api/webhooks/{id}", get(webhooks::get_webhook))
        .route("/api/security/status", get(diagnostics::security_status))
        .layer(middleware::from_fn_with_state(
            state.clone(),
            auth::require_auth,
        ))
        .with_state(state);

    public_routes
        .merge(authed_routes)
        .layer(middleware::from_fn(security_headers))
        .layer(build_cors())
}

async fn security_headers(req: Request<Body>, next: Next) -> axum::response::Response {
    let mut response = next.run(req).await;
    let headers = response.headers_mut();
    headers.insert(
        header::X_CONTENT_TYPE_OPTIONS,
        HeaderValue::from_static("nosniff"),
    );
    headers.insert(header::X_FRAME_OPTIONS, HeaderValue::from_static("DENY"));
    response
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::agent::{AgentDispatchFacade, AgentRegistry, FileOrganizationAgent};
    use crate::core::config::SecurityConfig;
    use crate::core::security::SecurityGate;
    use crate::core::webhook::{WebhookIngress, WebhookQueue};
    use axum::extract::connect_info::MockConnectInfo;
    use axum::http::StatusCode;
    use serde_json::{Value, json};
    use std::net::SocketAddr;
    use std::sync::Arc;
    use tempfile::TempDir;
    use tower::util::ServiceExt;

    const KEY: &str = "ak_router_test";

    struct Harness {
        state: AppState,
        _queue: WebhookQueue,
        _tmp: TempDir,
    }

    async fn harness(max_requests: usize) -> Harness {
        let mut security = SecurityConfig::default();
        security.api_keys.insert("n8n_main".into(), KEY.into());
        security.rate_limit_max_requests = max_requests;
        let gate = Arc::new(SecurityGate::new(&security));

        let (ingress, queue) = WebhookIngress::new(1000);

        let tmp = TempDir::new().unwrap();
        let registry = Arc::new(AgentRegistry::new());
        registry
            .register(
                "file_organization",
                Arc::new(FileOrganizationAgent::new(
                    tmp.path().join("documents"),
                    tmp.path().join("reports"),
                )),
            )
            .await;
        let facade = Arc::new(AgentDispatchFacade::new(registry, 1000));

        Harness {
            state: AppState::new(gate, ingress, facade),
            _queue: queue,
            _tmp: tmp,
        }
    }

    fn app(state: &AppState, peer: &str) -> Router {
        let peer: SocketAddr = peer.parse().unwrap();
        build_api_router(state.clone()).layer(MockConnectInfo(peer))
    }

    async fn call(
        app: Router,
        method: Method,
        path: &str,
        body: Option<Value>,
        token: Option<&str>,
    ) -> (StatusCode, Value) {
        let mut builder = Request::builder()
            .method(method)
            .uri(path)
            .header("content-type", "application/json");
        if let Some(token) = token {
            builder = builder.header("authorization", format!("Bearer {}", token));
        }
        let body = match body {
            Some(json) => Body::from(serde_json::to_string(&json).unwrap()),
            None => Body::empty(),
        };
        let resp = app.oneshot(builder.body(body).unwrap()).await.unwrap();
        let status = resp.status();
        let bytes = axum::body::to_bytes(resp.into_body(), 1024 * 1024)
            .await
            .unwrap();
        let json = serde_json::from_slice(&bytes).unwrap_or(json!({}));
        (status, json)
    }

    const LOCAL: &str = "127.0.0.1:40000";

    #[tokio::test]
    async fn public_routes_need_no_key() {
        let h = harness(100).await;
        let (status, body) = call(app(&h.state, LOCAL), Method::GET, "/", None, None).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["status"], "running");

        let (status, body) = call(app(&h.state, LOCAL), Method::GET, "/health", None, None).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["status"], "healthy");
    }

    #[tokio::test]
    async fn security_headers_present_on_responses() {
        let h = harness(100).await;
        let req = Request::builder()
            .uri("/api/agents/status")
            .body(Body::empty())
            .unwrap();
        let resp = app(&h.state, LOCAL).oneshot(req).await.unwrap();
        assert_eq!(resp.status(), StatusCode::UNAUTHORIZED);
        assert_eq!(
            resp.headers().get("x-content-type-options").unwrap(),
            "nosniff"
        );
        assert_eq!(resp.headers().get("x-frame-options").unwrap(), "DENY");
    }

    #[tokio::test]
    async fn missing_or_wrong_key_is_unauthorized() {
        let h = harness(100).await;
        for token in [None, Some("ak_wrong")] {
            let (status, body) = call(
                app(&h.state, LOCAL),
                Method::POST,
                "/webhook/system-alert",
                Some(json!({ "message": "hi" })),
                token,
            )
            .await;
            assert_eq!(status, StatusCode::UNAUTHORIZED);
            assert_eq!(body["success"], false);
            assert_eq!(body["kind"], "unauthorized");
        }
    }

    #[tokio::test]
    async fn foreign_origin_is_forbidden_even_with_a_valid_key() {
        let h = harness(100).await;
        let (status, body) = call(
            app(&h.state, "203.0.113.9:5555"),
            Method::GET,
            "/api/agents/status",
            None,
            Some(KEY),
        )
        .await;
        assert_eq!(status, StatusCode::FORBIDDEN);
        assert_eq!(body["kind"], "forbidden");
    }

    #[tokio::test]
    async fn request_over_the_limit_is_rate_limited() {
        let h = harness(2).await;
        for _ in 0..2 {
            let (status, _) = call(
                app(&h.state, LOCAL),
                Method::GET,
                "/api/webhooks/stats",
                None,
                Some(KEY),
            )
            .await;
            assert_eq!(status, StatusCode::OK);
        }
        let (status, body) = call(
            app(&h.state, LOCAL),
            Method::GET,
            "/api/webhooks/stats",
            None,
            Some(KEY),
        )
        .await;
        assert_eq!(status, StatusCode::TOO_MANY_REQUESTS);
        assert_eq!(body["kind"], "rate_limited");
    }

    #[tokio::test]
    async fn webhook_is_accepted_and_visible_in_history() {
        let h = harness(100).await;
        let (status, body) = call(
            app(&h.state, LOCAL),
            Method::POST,
            "/webhook/productivity",
            Some(json!({ "task": "review inbox" })),
            Some(KEY),
        )
        .await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["success"], true);
        assert_eq!(body["status"], "accepted");
        let id = body["webhook_id"].as_str().unwrap().to_string();

        let (_, body) = call(
            app(&h.state, LOCAL),
            Method::GET,
            "/api/webhooks/history?limit=10",
            None,
            Some(KEY),
        )
        .await;
        let stored = &body["webhooks"][0];
        assert_eq!(stored["id"], id.as_str());
        assert_eq!(stored["type"], "generic");
        assert_eq!(stored["topic"], "productivity");
        assert_eq!(stored["outcome"]["state"], "pending");

        let (_, body) = call(
            app(&h.state, LOCAL),
            Method::GET,
            "/api/webhooks/stats",
            None,
            Some(KEY),
        )
        .await;
        assert_eq!(body["statistics"]["total"], 1);
        assert_eq!(body["statistics"]["pending"], 1);
        assert_eq!(body["statistics"]["failed"], 0);

        let (status, body) = call(
            app(&h.state, LOCAL),
            Method::GET,
            &format!("/api/webhooks/{}", id),
            None,
            Some(KEY),
        )
        .await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["webhook"]["payload"]["task"], "review inbox");

        let (status, _) = call(
            app(&h.state, LOCAL),
            Method::GET,
            "/api/webhooks/webhook_19700101_000000_000000",
            None,
            Some(KEY),
        )
        .await;
        assert_eq!(status, StatusCode::NOT_FOUND);
    }

    #[tokio::test]
    async fn unknown_webhook_topic_is_not_found() {
        let h = harness(100).await;
        let (status, body) = call(
            app(&h.state, LOCAL),
            Method::POST,
            "/webhook/payroll",
            Some(json!({})),
            Some(KEY),
        )
        .await;
        assert_eq!(status, StatusCode::NOT_FOUND);
        assert_eq!(body["success"], false);
    }

    #[tokio::test]
    async fn refused_bodies_answer_with_json_errors() {
        let h = harness(100).await;
        for path in [
            "/webhook/system-alert",
            "/api/agents/file_organization/trigger",
            "/api/agents/file_organization/triggers",
        ] {
            let (status, body) = call(
                app(&h.state, LOCAL),
                Method::POST,
                path,
                Some(json!([1, 2, 3])),
                Some(KEY),
            )
            .await;
            assert_eq!(status, StatusCode::UNPROCESSABLE_ENTITY, "{}", path);
            assert_eq!(body["success"], false);
            assert_eq!(body["kind"], "invalid_body");
            assert!(body["error"].is_string());
        }

        let req = Request::builder()
            .method(Method::POST)
            .uri("/webhook/system-alert")
            .header("authorization", format!("Bearer {}", KEY))
            .body(Body::from(r#"{"message":"disk"}"#))
            .unwrap();
        let resp = app(&h.state, LOCAL).oneshot(req).await.unwrap();
        assert_eq!(resp.status(), StatusCode::UNSUPPORTED_MEDIA_TYPE);
        let bytes = axum::body::to_bytes(resp.into_body(), 1024 * 1024)
            .await
            .unwrap();
        let body: Value = serde_json::from_slice(&bytes).unwrap();
        assert_eq!(body["kind"], "invalid_body");

        let (_, stats) = call(
            app(&h.state, LOCAL),
            Method::GET,
            "/api/webhooks/stats",
            None,
            Some(KEY),
        )
        .await;
        assert_eq!(stats["statistics"]["total"], 0);
    }

    #[tokio::test]
    async fn trigger_runs_agent_and_returns_augmented_result() {
        let h = harness(100).await;
        let (status, body) = call(
            app(&h.state, LOCAL),
            Method::POST,
            "/api/agents/file_organization/trigger",
            Some(json!({ "operation": "add_test_files" })),
            Some(KEY),
        )
        .await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["success"], true);
        assert_eq!(body["files_created"], 9);
        assert_eq!(body["agent_name"], "file_organization");
        assert_eq!(body["agent_status"], "completed");

        let (_, body) = call(
            app(&h.state, LOCAL),
            Method::GET,
            "/api/agents/history?agent_name=file_organization",
            None,
            Some(KEY),
        )
        .await;
        assert_eq!(body["total_entries"], 1);
        assert_eq!(body["history"][0]["success"], true);
    }

    #[tokio::test]
    async fn trigger_error_statuses_follow_the_taxonomy() {
        let h = harness(100).await;
        let (status, _) = call(
            app(&h.state, LOCAL),
            Method::POST,
            "/api/agents/ghost/trigger",
            Some(json!({})),
            Some(KEY),
        )
        .await;
        assert_eq!(status, StatusCode::NOT_FOUND);

        let (status, body) = call(
            app(&h.state, LOCAL),
            Method::POST,
            "/api/agents/file_organization/trigger",
            Some(json!({ "operation": 5 })),
            Some(KEY),
        )
        .await;
        assert_eq!(status, StatusCode::UNPROCESSABLE_ENTITY);
        assert_eq!(body["kind"], "invalid_parameters");

        let (status, body) = call(
            app(&h.state, LOCAL),
            Method::POST,
            "/api/agents/file_organization/disable",
            None,
            Some(KEY),
        )
        .await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["agent_status"]["status"], "disabled");

        let (status, body) = call(
            app(&h.state, LOCAL),
            Method::POST,
            "/api/agents/file_organization/trigger",
            Some(json!({})),
            Some(KEY),
        )
        .await;
        assert_eq!(status, StatusCode::CONFLICT);
        assert_eq!(body["kind"], "disabled");
    }

    #[tokio::test]
    async fn unknown_agent_enable_is_not_found() {
        let h = harness(100).await;
        let (status, body) = call(
            app(&h.state, LOCAL),
            Method::POST,
            "/api/agents/ghost/enable",
            None,
            Some(KEY),
        )
        .await;
        assert_eq!(status, StatusCode::NOT_FOUND);
        assert_eq!(body["error"], "Agent ghost not found");
    }

    #[tokio::test]
    async fn status_summary_and_capabilities_are_reported() {
        let h = harness(100).await;
        let (_, body) = call(
            app(&h.state, LOCAL),
            Method::GET,
            "/api/agents/status",
            None,
            Some(KEY),
        )
        .await;
        assert_eq!(body["success"], true);
        assert_eq!(body["total_agents"], 1);
        assert_eq!(body["agents"]["file_organization"]["status"], "idle");

        let (_, body) = call(
            app(&h.state, LOCAL),
            Method::GET,
            "/api/agents/status?agent_name=file_organization",
            None,
            Some(KEY),
        )
        .await;
        assert_eq!(body["agent"]["name"], "file_organization");

        let (_, body) = call(
            app(&h.state, LOCAL),
            Method::GET,
            "/api/agents/summary",
            None,
            Some(KEY),
        )
        .await;
        assert_eq!(body["enabled_agents"], 1);

        let (status, _) = call(
            app(&h.state, LOCAL),
            Method::POST,
            "/api/agents/file_organization/triggers",
            Some(json!({ "name": "on_upload", "config": { "type": "webhook" } })),
            Some(KEY),
        )
        .await;
        assert_eq!(status, StatusCode::OK);

        let (_, body) = call(
            app(&h.state, LOCAL),
            Method::GET,
            "/api/agents/file_organization/capabilities",
            None,
            Some(KEY),
        )
        .await;
        assert_eq!(body["success"], true);
        assert_eq!(body["workflow_triggers"][0]["name"], "on_upload");
        assert!(body["capabilities"]["operations"].is_array());

        let (_, body) = call(
            app(&h.state, LOCAL),
            Method::GET,
            "/api/agents/capabilities",
            None,
            Some(KEY),
        )
        .await;
        assert!(
            body["capabilities"]["file_organization"]["capabilities"]["operations"].is_array()
        );
    }

    #[tokio::test]
    async fn security_status_never_exposes_raw_keys() {
        let h = harness(100).await;
        let (status, body) = call(
            app(&h.state, LOCAL),
            Method::GET,
            "/api/security/status",
            None,
            Some(KEY),
        )
        .await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["security"]["api_keys_configured"], 1);
        assert_eq!(body["security"]["active_requests"]["n8n_main"], 1);
        assert!(!body.to_string().contains(KEY));
    }
}
