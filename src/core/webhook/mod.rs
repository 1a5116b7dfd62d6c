mod dispatcher;
mod handlers;
mod ingress;

pub use dispatcher::WebhookDispatcher;
pub use handlers::HandlerTable;
pub use ingress::{WebhookIngress, WebhookQueue};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

pub type Payload = serde_json::Map<String, serde_json::Value>;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum WebhookKind {
    SystemAlert,
    FileOrganization,
    ContentAnalysis,
    AgentStatus,
    Generic,
}

impl WebhookKind {
    pub fn as_str(self) -> &'static str {
        match self {
            WebhookKind::SystemAlert => "system_alert",
            WebhookKind::FileOrganization => "file_organization",
            WebhookKind::ContentAnalysis => "content_analysis",
            WebhookKind::AgentStatus => "agent_status",
            WebhookKind::Generic => "generic",
        }
    }

    /// Maps a `/webhook/{topic}` path segment to the kind it is routed as.
    pub fn from_topic(topic: &str) -> Option<Self> {
        match topic {
            "system-alert" => Some(WebhookKind::SystemAlert),
            "file-organization" => Some(WebhookKind::FileOrganization),
            "content-analysis" => Some(WebhookKind::ContentAnalysis),
            "agent-status" => Some(WebhookKind::AgentStatus),
            "productivity" => Some(WebhookKind::Generic),
            _ => None,
        }
    }
}

/// Result of the background consumer for one record.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "state", rename_all = "snake_case")]
pub enum ProcessingOutcome {
    Pending,
    Succeeded { result: Payload },
    Failed { error: String },
}

#[derive(Debug, Clone, Serialize)]
pub struct WebhookRecord {
    pub id: String,
    #[serde(rename = "type")]
    pub kind: WebhookKind,
    pub topic: String,
    pub source: String,
    pub payload: Payload,
    pub received_at: DateTime<Utc>,
    pub processed: bool,
    pub processed_at: Option<DateTime<Utc>>,
    pub outcome: ProcessingOutcome,
}

impl WebhookRecord {
    pub fn is_failed(&self) -> bool {
        matches!(self.outcome, ProcessingOutcome::Failed { .. })
    }
}
