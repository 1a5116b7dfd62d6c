use chrono::{DateTime, Utc};
use serde::Serialize;
use std::collections::VecDeque;
use std::sync::Arc;
use std::time::Instant;
use tokio::sync::{Mutex, mpsc};
use tracing::{error, info, warn};

use super::{AgentRegistry, AgentStatus, Params, TaskResult};
use crate::core::error::GatewayResult;

/// Status transition announced to the outbound notifier.
#[derive(Debug, Clone, PartialEq)]
pub struct StatusEvent {
    pub agent_name: String,
    pub status: AgentStatus,
    pub message: String,
}

#[derive(Debug, Clone, Serialize)]
pub struct ResultSummary {
    pub status: String,
    pub message: String,
    pub error: String,
}

#[derive(Debug, Clone, Serialize)]
pub struct ExecutionHistoryEntry {
    pub agent_name: String,
    pub timestamp: DateTime<Utc>,
    pub execution_time: f64,
    pub success: bool,
    pub result_summary: ResultSummary,
}

/// The agent's own result plus the run metadata the facade adds.
#[derive(Debug, Clone, Serialize)]
pub struct DispatchReport {
    #[serde(flatten)]
    pub outcome: TaskResult,
    pub agent_name: String,
    pub execution_time: f64,
    pub timestamp: DateTime<Utc>,
    pub agent_status: AgentStatus,
}

/// Runs registered agents and keeps a bounded log of every run.
pub struct AgentDispatchFacade {
    registry: Arc<AgentRegistry>,
    history: Mutex<VecDeque<ExecutionHistoryEntry>>,
    max_history: usize,
    events: Option<mpsc::UnboundedSender<StatusEvent>>,
}

impl AgentDispatchFacade {
    pub fn new(registry: Arc<AgentRegistry>, max_history: usize) -> Self {
        Self {
            registry,
            history: Mutex::new(VecDeque::new()),
            max_history,
            events: None,
        }
    }

    /// Publishes every status transition on `events`. Sends never block a dispatch.
    pub fn with_status_events(mut self, events: mpsc::UnboundedSender<StatusEvent>) -> Self {
        self.events = Some(events);
        self
    }

    pub fn registry(&self) -> &Arc<AgentRegistry> {
        &self.registry
    }

    /// Runs `name` with `params`.
    ///
    /// Unknown, disabled or rejected-parameter calls fail before anything is recorded.
    /// Once the agent is running, every outcome (including an `Err` or a panic inside
    /// `execute`) comes back as a report, with exactly one stats update and one history row.
    /// Runs of the same agent are serialized: a second call waits until the first is booked.
    pub async fn dispatch(&self, name: &str, params: Params) -> GatewayResult<DispatchReport> {
        let run_lock = self.registry.run_lock(name).await?;
        let _running = run_lock.lock().await;
        let agent = self.registry.begin_run(name, &params).await?;
        self.announce(name, AgentStatus::Running, "Executing task");

        let start = Instant::now();
        let outcome = match tokio::task::spawn_blocking(move || agent.execute(&params)).await {
            Ok(Ok(result)) => result,
            Ok(Err(e)) => {
                error!("Error executing agent {}: {}", name, e);
                TaskResult::failure(e.to_string())
            }
            Err(e) if e.is_panic() => {
                let message = panic_message(e.into_panic());
                error!("Agent {} panicked: {}", name, message);
                TaskResult::failure(message)
            }
            Err(e) => {
                error!("Agent {} was cancelled: {}", name, e);
                TaskResult::failure("execution cancelled")
            }
        };
        let execution_time = start.elapsed().as_secs_f64();

        let success = outcome.is_success();
        let agent_status = self
            .registry
            .finish_run(name, success, execution_time)
            .await?;
        self.record(name, &outcome, execution_time).await;

        if success {
            info!("Agent {} executed successfully in {:.2}s", name, execution_time);
            self.announce(name, agent_status, "Task completed successfully");
        } else {
            let reason = outcome.error().unwrap_or("Unknown error");
            warn!("Agent {} failed after {:.2}s: {}", name, execution_time, reason);
            self.announce(name, agent_status, &format!("Task failed: {}", reason));
        }

        Ok(DispatchReport {
            outcome,
            agent_name: name.to_string(),
            execution_time,
            timestamp: Utc::now(),
            agent_status,
        })
    }

    /// Most recent `limit` runs, oldest first; `limit == 0` returns everything.
    pub async fn get_execution_history(
        &self,
        agent_name: Option<&str>,
        limit: usize,
    ) -> Vec<ExecutionHistoryEntry> {
        let history = self.history.lock().await;
        let filtered: Vec<&ExecutionHistoryEntry> = history
            .iter()
            .filter(|e| agent_name.is_none_or(|name| e.agent_name == name))
            .collect();
        let skip = if limit > 0 {
            filtered.len().saturating_sub(limit)
        } else {
            0
        };
        filtered.into_iter().skip(skip).cloned().collect()
    }

    async fn record(&self, name: &str, outcome: &TaskResult, execution_time: f64) {
        let text = |key: &str| {
            outcome
                .get(key)
                .and_then(|v| v.as_str())
                .unwrap_or_default()
                .to_string()
        };
        let entry = ExecutionHistoryEntry {
            agent_name: name.to_string(),
            timestamp: Utc::now(),
            execution_time,
            success: outcome.is_success(),
            result_summary: ResultSummary {
                status: match text("status") {
                    s if s.is_empty() => "unknown".to_string(),
                    s => s,
                },
                message: text("message"),
                error: outcome.error().unwrap_or_default().to_string(),
            },
        };

        let mut history = self.history.lock().await;
        history.push_back(entry);
        while history.len() > self.max_history {
            history.pop_front();
        }
    }

    fn announce(&self, name: &str, status: AgentStatus, message: &str) {
        if let Some(events) = &self.events {
            let _ = events.send(StatusEvent {
                agent_name: name.to_string(),
                status,
                message: message.to_string(),
            });
        }
    }
}

fn panic_message(payload: Box<dyn std::any::Any + Send>) -> String {
    if let Some(s) = payload.downcast_ref::<&str>() {
        s.to_string()
    } else if let Some(s) = payload.downcast_ref::<String>() {
        s.clone()
    } else {
        "agent panicked".to_string()
    }
}
