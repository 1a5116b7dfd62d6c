use anyhow::{Result, anyhow};
use async_trait::async_trait;
use serde_json::{Value, json};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::core::agent::StatusEvent;
use crate::core::config::N8nConfig;
use crate::core::lifecycle::LifecycleComponent;

/// Outbound JSON client for the N8N instance's own webhook endpoints.
pub struct N8nClient {
    http: reqwest::Client,
    base_url: String,
}

impl N8nClient {
    pub fn new(config: &N8nConfig) -> Result<Self> {
        let http = reqwest::Client::builder()
            .timeout(Duration::from_secs(config.timeout_secs))
            .build()?;
        Ok(Self {
            http,
            base_url: config.webhook_url.trim_end_matches('/').to_string(),
        })
    }

    pub fn endpoint_url(&self, endpoint: &str) -> String {
        format!("{}/{}", self.base_url, endpoint.trim_start_matches('/'))
    }

    /// Posts `payload` to `endpoint`. Any transport error or non-2xx reply yields `false`.
    pub async fn send(&self, endpoint: &str, payload: &Value) -> bool {
        let url = self.endpoint_url(endpoint);
        match self.http.post(&url).json(payload).send().await {
            Ok(resp) if resp.status().is_success() => {
                debug!("N8N webhook sent: {}", url);
                true
            }
            Ok(resp) => {
                warn!("N8N webhook {} answered {}", url, resp.status());
                false
            }
            Err(e) => {
                warn!("N8N webhook {} failed: {}", url, e);
                false
            }
        }
    }

    pub async fn send_system_alert(&self, alert_type: &str, message: &str, severity: &str) -> bool {
        let payload = json!({
            "alert_type": alert_type,
            "message": message,
            "severity": severity,
            "timestamp": chrono::Utc::now().to_rfc3339(),
            "source": "alchemy-gateway"
        });
        self.send("system-alert", &payload).await
    }
}

/// Forwards agent status transitions to N8N as `agent_status_change` alerts.
pub struct N8nNotifier {
    client: Arc<N8nClient>,
    events: Option<mpsc::UnboundedReceiver<StatusEvent>>,
    cancel: CancellationToken,
    task: Option<JoinHandle<()>>,
}

impl N8nNotifier {
    pub fn new(client: N8nClient, events: mpsc::UnboundedReceiver<StatusEvent>) -> Self {
        Self {
            client: Arc::new(client),
            events: Some(events),
            cancel: CancellationToken::new(),
            task: None,
        }
    }
}

#[async_trait]
impl LifecycleComponent for N8nNotifier {
    async fn on_start(&mut self) -> Result<()> {
        let mut events = self
            .events
            .take()
            .ok_or_else(|| anyhow!("N8N notifier already started"))?;
        let client = self.client.clone();
        let cancel = self.cancel.clone();

        info!("N8N notifier forwarding to {}", client.endpoint_url("system-alert"));
        self.task = Some(tokio::spawn(async move {
            loop {
                let event = tokio::select! {
                    _ = cancel.cancelled() => break,
                    next = events.recv() => match next {
                        Some(event) => event,
                        None => break,
                    },
                };
                let message = format!(
                    "Agent {}: {} - {}",
                    event.agent_name,
                    event.status.as_str(),
                    event.message
                );
                client
                    .send_system_alert("agent_status_change", &message, "info")
                    .await;
            }
        }));
        Ok(())
    }

    async fn on_shutdown(&mut self) -> Result<()> {
        self.cancel.cancel();
        if let Some(task) = self.task.take() {
            let _ = task.await;
        }
        info!("N8N notifier stopped");
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::agent::AgentStatus;
    use axum::{Json, Router, extract::State, http::StatusCode, routing::post};
    use tokio::sync::Mutex;

    type Inbox = Arc<Mutex<Vec<Value>>>;

    async fn capture(State(inbox): State<Inbox>, Json(body): Json<Value>) -> StatusCode {
        inbox.lock().await.push(body);
        StatusCode::OK
    }

    /// Local stand-in for N8N; `None` when the sandbox refuses to bind.
    async fn fake_n8n() -> Option<(String, Inbox)> {
        let inbox: Inbox = Arc::new(Mutex::new(Vec::new()));
        let app = Router::new()
            .route("/system-alert", post(capture))
            .route("/broken", post(|| async { StatusCode::INTERNAL_SERVER_ERROR }))
            .with_state(inbox.clone());
        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.ok()?;
        let addr = listener.local_addr().ok()?;
        tokio::spawn(async move {
            let _ = axum::serve(listener, app).await;
        });
        Some((format!("http://{}", addr), inbox))
    }

    fn client(url: &str) -> N8nClient {
        N8nClient::new(&N8nConfig {
            enabled: true,
            webhook_url: url.to_string(),
            timeout_secs: 2,
        })
        .unwrap()
    }

    #[test]
    fn endpoint_url_joins_without_double_slashes() {
        let c = client("http://localhost:5678/webhook/");
        assert_eq!(
            c.endpoint_url("/system-alert"),
            "http://localhost:5678/webhook/system-alert"
        );
    }

    #[tokio::test]
    async fn send_reports_delivery_status() {
        let Some((url, inbox)) = fake_n8n().await else {
            return;
        };
        let c = client(&url);
        assert!(c.send_system_alert("disk", "90% full", "warning").await);
        assert!(!c.send("broken", &json!({})).await);

        let received = inbox.lock().await;
        assert_eq!(received.len(), 1);
        assert_eq!(received[0]["alert_type"], "disk");
        assert_eq!(received[0]["severity"], "warning");
    }

    #[tokio::test]
    async fn unreachable_n8n_is_a_soft_failure() {
        let Ok(listener) = std::net::TcpListener::bind("127.0.0.1:0") else {
            return;
        };
        let addr = listener.local_addr().unwrap();
        drop(listener);
        assert!(!client(&format!("http://{}", addr)).send("system-alert", &json!({})).await);
    }

    #[tokio::test]
    async fn notifier_forwards_status_events() {
        let Some((url, inbox)) = fake_n8n().await else {
            return;
        };
        let (tx, rx) = mpsc::unbounded_channel();
        let mut notifier = N8nNotifier::new(client(&url), rx);
        notifier.on_start().await.unwrap();

        tx.send(StatusEvent {
            agent_name: "file_organization".into(),
            status: AgentStatus::Running,
            message: "Executing task".into(),
        })
        .unwrap();

        let deadline = tokio::time::Instant::now() + Duration::from_secs(5);
        while inbox.lock().await.is_empty() {
            assert!(tokio::time::Instant::now() < deadline, "alert never arrived");
            tokio::time::sleep(Duration::from_millis(20)).await;
        }
        notifier.on_shutdown().await.unwrap();

        let received = inbox.lock().await;
        assert_eq!(received[0]["alert_type"], "agent_status_change");
        assert_eq!(
            received[0]["message"],
            "Agent file_organization: running - Executing task"
        );
    }
}
