use anyhow::{Result, bail};
use async_trait::async_trait;
use serde_json::{Value, json};
use std::collections::HashMap;
use std::sync::Arc;
use tracing::{error, info, warn};

use super::{Payload, WebhookKind, WebhookRecord};

/// Processes one queued webhook. An `Err` marks the record failed; the consumer keeps going.
#[async_trait]
pub trait WebhookHandler: Send + Sync {
    async fn handle(&self, record: WebhookRecord) -> Result<Payload>;
}

/// Per-kind routing table with a generic fallback.
#[derive(Clone)]
pub struct HandlerTable {
    routes: HashMap<WebhookKind, Arc<dyn WebhookHandler>>,
    fallback: Arc<dyn WebhookHandler>,
}

impl Default for HandlerTable {
    fn default() -> Self {
        let mut routes: HashMap<WebhookKind, Arc<dyn WebhookHandler>> = HashMap::new();
        routes.insert(WebhookKind::SystemAlert, Arc::new(SystemAlertHandler));
        routes.insert(WebhookKind::FileOrganization, Arc::new(FileOrganizationHandler));
        routes.insert(WebhookKind::ContentAnalysis, Arc::new(ContentAnalysisHandler));
        routes.insert(WebhookKind::AgentStatus, Arc::new(AgentStatusHandler));
        Self {
            routes,
            fallback: Arc::new(GenericHandler),
        }
    }
}

impl HandlerTable {
    #[cfg(test)]
    pub fn with_handler(mut self, kind: WebhookKind, handler: Arc<dyn WebhookHandler>) -> Self {
        self.routes.insert(kind, handler);
        self
    }

    pub fn route(&self, kind: WebhookKind) -> Arc<dyn WebhookHandler> {
        self.routes
            .get(&kind)
            .cloned()
            .unwrap_or_else(|| self.fallback.clone())
    }
}

/// Reads an optional string field, rejecting any other JSON type.
fn text_field<'a>(payload: &'a Payload, key: &str, default: &'a str) -> Result<&'a str> {
    match payload.get(key) {
        None | Some(Value::Null) => Ok(default),
        Some(Value::String(s)) => Ok(s.as_str()),
        Some(other) => bail!("field '{}' must be a string, got {}", key, other),
    }
}

fn into_payload(value: Value) -> Payload {
    match value {
        Value::Object(map) => map,
        _ => Payload::new(),
    }
}

struct SystemAlertHandler;

#[async_trait]
impl WebhookHandler for SystemAlertHandler {
    async fn handle(&self, record: WebhookRecord) -> Result<Payload> {
        let alert_type = text_field(&record.payload, "alert_type", "info")?;
        let message = text_field(&record.payload, "message", "")?;
        let severity = text_field(&record.payload, "severity", "info")?.to_lowercase();

        match severity.as_str() {
            "critical" | "error" => error!("System Alert [{}]: {}", severity.to_uppercase(), message),
            "warning" | "warn" => warn!("System Alert [{}]: {}", severity.to_uppercase(), message),
            _ => info!("System Alert [{}]: {}", severity.to_uppercase(), message),
        }

        Ok(into_payload(json!({
            "status": "processed",
            "alert_type": alert_type,
            "severity": severity,
            "action": "logged"
        })))
    }
}

struct FileOrganizationHandler;

#[async_trait]
impl WebhookHandler for FileOrganizationHandler {
    async fn handle(&self, record: WebhookRecord) -> Result<Payload> {
        let action = match text_field(&record.payload, "action", "")? {
            "" => text_field(&record.payload, "operation", "unknown")?,
            action => action,
        };
        let file_path = text_field(&record.payload, "file_path", "")?;

        info!("File Organization: {} - {}", action, file_path);

        Ok(into_payload(json!({
            "status": "processed",
            "action": action,
            "file_path": file_path,
            "result": "acknowledged"
        })))
    }
}

struct ContentAnalysisHandler;

#[async_trait]
impl WebhookHandler for ContentAnalysisHandler {
    async fn handle(&self, record: WebhookRecord) -> Result<Payload> {
        let content_type = text_field(&record.payload, "content_type", "unknown")?;
        let content_id = text_field(&record.payload, "content_id", "")?;

        info!("Content Analysis: {} - {}", content_type, content_id);

        Ok(into_payload(json!({
            "status": "processed",
            "content_type": content_type,
            "content_id": content_id,
            "result": "acknowledged"
        })))
    }
}

struct AgentStatusHandler;

#[async_trait]
impl WebhookHandler for AgentStatusHandler {
    async fn handle(&self, record: WebhookRecord) -> Result<Payload> {
        let agent_name = text_field(&record.payload, "agent_name", "unknown")?;
        let reported = text_field(&record.payload, "status", "unknown")?;

        info!("Agent Status: {} - {}", agent_name, reported);

        Ok(into_payload(json!({
            "status": "processed",
            "agent_name": agent_name,
            "reported_status": reported,
            "result": "acknowledged"
        })))
    }
}

struct GenericHandler;

#[async_trait]
impl WebhookHandler for GenericHandler {
    async fn handle(&self, record: WebhookRecord) -> Result<Payload> {
        info!("Generic webhook received on topic '{}'", record.topic);

        Ok(into_payload(json!({
            "status": "processed",
            "type": "generic",
            "topic": record.topic,
            "result": "acknowledged"
        })))
    }
}
