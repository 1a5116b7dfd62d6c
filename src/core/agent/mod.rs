mod dispatch;
mod file_organization;
mod registry;
mod triggers;

#[cfg(test)]
mod tests;

pub use dispatch::{AgentDispatchFacade, DispatchReport, StatusEvent};
pub use file_organization::FileOrganizationAgent;
pub use registry::AgentRegistry;
pub use triggers::schedule_workflow_triggers;

use anyhow::Result;
use chrono::{DateTime, Utc};
use serde::ser::{Serialize, SerializeMap, Serializer};
use serde_json::Value;

pub type Params = serde_json::Map<String, Value>;

/// A named unit of work reachable through the dispatch facade.
///
/// `execute` is called from a blocking worker thread, so implementations may do
/// synchronous file or network I/O. Returning `Err` or panicking is recorded as a failed run.
pub trait Agent: Send + Sync {
    fn execute(&self, params: &Params) -> Result<TaskResult>;

    /// Agent-specific state, reported next to the registry's descriptor.
    fn status(&self) -> Value;

    fn capabilities(&self) -> Value;

    fn validate_parameters(&self, _params: &Params) -> bool {
        true
    }
}

/// Outcome of one `execute` call.
///
/// Serializes flat, as `{"success": true, ...payload}` or
/// `{"success": false, "error": ..., ...details}`.
#[derive(Debug, Clone, PartialEq)]
pub enum TaskResult {
    Success(Params),
    Failure { error: String, details: Params },
}

impl TaskResult {
    pub fn success(payload: Value) -> Self {
        match payload {
            Value::Object(map) => TaskResult::Success(map),
            Value::Null => TaskResult::Success(Params::new()),
            other => {
                let mut map = Params::new();
                map.insert("result".into(), other);
                TaskResult::Success(map)
            }
        }
    }

    pub fn failure(error: impl Into<String>) -> Self {
        TaskResult::Failure {
            error: error.into(),
            details: Params::new(),
        }
    }

    pub fn failure_with(error: impl Into<String>, details: Value) -> Self {
        TaskResult::Failure {
            error: error.into(),
            details: match details {
                Value::Object(map) => map,
                _ => Params::new(),
            },
        }
    }

    pub fn is_success(&self) -> bool {
        matches!(self, TaskResult::Success(_))
    }

    pub fn error(&self) -> Option<&str> {
        match self {
            TaskResult::Failure { error, .. } => Some(error),
            TaskResult::Success(_) => None,
        }
    }

    pub fn get(&self, key: &str) -> Option<&Value> {
        match self {
            TaskResult::Success(payload) => payload.get(key),
            TaskResult::Failure { details, .. } => details.get(key),
        }
    }
}

impl Serialize for TaskResult {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        let mut map = serializer.serialize_map(None)?;
        match self {
            TaskResult::Success(payload) => {
                map.serialize_entry("success", &true)?;
                for (k, v) in payload.iter().filter(|(k, _)| k.as_str() != "success") {
                    map.serialize_entry(k, v)?;
                }
            }
            TaskResult::Failure { error, details } => {
                map.serialize_entry("success", &false)?;
                map.serialize_entry("error", error)?;
                for (k, v) in details
                    .iter()
                    .filter(|(k, _)| !matches!(k.as_str(), "success" | "error"))
                {
                    map.serialize_entry(k, v)?;
                }
            }
        }
        map.end()
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, serde::Serialize, serde::Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AgentStatus {
    Idle,
    Running,
    Completed,
    Failed,
    Disabled,
}

impl AgentStatus {
    pub fn as_str(self) -> &'static str {
        match self {
            AgentStatus::Idle => "idle",
            AgentStatus::Running => "running",
            AgentStatus::Completed => "completed",
            AgentStatus::Failed => "failed",
            AgentStatus::Disabled => "disabled",
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, serde::Serialize)]
pub struct AgentStats {
    pub completed: u64,
    pub failed: u64,
    pub total_time: f64,
    pub last_task_time: Option<f64>,
}

#[derive(Debug, Clone, PartialEq, serde::Serialize)]
pub struct WorkflowTrigger {
    pub name: String,
    pub config: Value,
    pub added_at: DateTime<Utc>,
}

/// Registry-owned view of an agent: lifecycle state, counters and triggers.
#[derive(Debug, Clone, PartialEq, serde::Serialize)]
pub struct AgentDescriptor {
    pub name: String,
    pub status: AgentStatus,
    pub enabled: bool,
    pub last_activity: Option<DateTime<Utc>>,
    pub stats: AgentStats,
    pub workflow_triggers: Vec<WorkflowTrigger>,
}

impl AgentDescriptor {
    pub fn new(name: &str) -> Self {
        Self {
            name: name.to_string(),
            status: AgentStatus::Idle,
            enabled: true,
            last_activity: None,
            stats: AgentStats::default(),
            workflow_triggers: Vec::new(),
        }
    }
}
