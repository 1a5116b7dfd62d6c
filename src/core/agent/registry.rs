use chrono::{DateTime, Utc};
use serde::Serialize;
use serde_json::Value;
use std::collections::BTreeMap;
use std::sync::Arc;
use tokio::sync::Mutex;
use tracing::{info, warn};

use super::{Agent, AgentDescriptor, AgentStatus, Params, WorkflowTrigger};
use crate::core::error::{GatewayError, GatewayResult};

struct Entry {
    agent: Arc<dyn Agent>,
    descriptor: AgentDescriptor,
    /// Held by the dispatcher for the whole of a run.
    run_lock: Arc<Mutex<()>>,
}

/// Named agents plus the descriptor the gateway keeps for each of them.
#[derive(Default)]
pub struct AgentRegistry {
    entries: Mutex<BTreeMap<String, Entry>>,
}

/// Descriptor merged with the agent's own status report.
#[derive(Debug, Clone, Serialize)]
pub struct AgentSnapshot {
    #[serde(flatten)]
    pub descriptor: AgentDescriptor,
    pub details: Value,
}

#[derive(Debug, Clone, Serialize)]
#[serde(untagged)]
pub enum StatusSnapshot {
    Single {
        agent: AgentSnapshot,
    },
    All {
        agents: BTreeMap<String, AgentSnapshot>,
        total_agents: usize,
        active_agents: usize,
    },
}

#[derive(Debug, Clone, Serialize)]
pub struct CapabilityReport {
    pub capabilities: Value,
    pub workflow_triggers: Vec<WorkflowTrigger>,
}

#[derive(Debug, Clone, Serialize)]
#[serde(untagged)]
pub enum CapabilitySnapshot {
    Single(CapabilityReport),
    All {
        capabilities: BTreeMap<String, CapabilityReport>,
    },
}

#[derive(Debug, Clone, Serialize)]
pub struct AgentSummaryRow {
    pub status: AgentStatus,
    pub enabled: bool,
    pub last_activity: Option<DateTime<Utc>>,
    pub tasks_completed: u64,
    pub tasks_failed: u64,
}

#[derive(Debug, Clone, Default, Serialize)]
pub struct AgentSummary {
    pub total_agents: usize,
    pub enabled_agents: usize,
    pub running_agents: usize,
    pub idle_agents: usize,
    pub failed_agents: usize,
    pub total_tasks_completed: u64,
    pub total_tasks_failed: u64,
    pub agents: BTreeMap<String, AgentSummaryRow>,
}

impl AgentRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Adds an agent with a fresh descriptor. Re-registering a name replaces it.
    pub async fn register(&self, name: &str, agent: Arc<dyn Agent>) {
        let mut entries = self.entries.lock().await;
        if entries.contains_key(name) {
            warn!("Agent {} re-registered; previous instance and stats dropped", name);
        }
        entries.insert(
            name.to_string(),
            Entry {
                agent,
                descriptor: AgentDescriptor::new(name),
                run_lock: Arc::new(Mutex::new(())),
            },
        );
        info!("Registered agent: {}", name);
    }

    pub async fn enable(&self, name: &str) -> GatewayResult<AgentDescriptor> {
        self.set_enabled(name, true).await
    }

    pub async fn disable(&self, name: &str) -> GatewayResult<AgentDescriptor> {
        self.set_enabled(name, false).await
    }

    async fn set_enabled(&self, name: &str, enabled: bool) -> GatewayResult<AgentDescriptor> {
        let mut entries = self.entries.lock().await;
        let entry = entries
            .get_mut(name)
            .ok_or_else(|| not_found(name))?;
        entry.descriptor.enabled = enabled;
        entry.descriptor.status = if enabled {
            AgentStatus::Idle
        } else {
            AgentStatus::Disabled
        };
        entry.descriptor.last_activity = Some(Utc::now());
        info!(
            "Agent {} {}",
            name,
            if enabled { "enabled" } else { "disabled" }
        );
        Ok(entry.descriptor.clone())
    }

    pub async fn status(&self, name: Option<&str>) -> GatewayResult<StatusSnapshot> {
        let entries = self.entries.lock().await;
        match name {
            Some(name) => {
                let entry = entries.get(name).ok_or_else(|| not_found(name))?;
                Ok(StatusSnapshot::Single {
                    agent: snapshot(entry),
                })
            }
            None => Ok(StatusSnapshot::All {
                agents: entries
                    .iter()
                    .map(|(name, entry)| (name.clone(), snapshot(entry)))
                    .collect(),
                total_agents: entries.len(),
                active_agents: entries.values().filter(|e| e.descriptor.enabled).count(),
            }),
        }
    }

    pub async fn capabilities(&self, name: Option<&str>) -> GatewayResult<CapabilitySnapshot> {
        let entries = self.entries.lock().await;
        match name {
            Some(name) => {
                let entry = entries.get(name).ok_or_else(|| not_found(name))?;
                Ok(CapabilitySnapshot::Single(capability_report(entry)))
            }
            None => Ok(CapabilitySnapshot::All {
                capabilities: entries
                    .iter()
                    .map(|(name, entry)| (name.clone(), capability_report(entry)))
                    .collect(),
            }),
        }
    }

    pub async fn add_workflow_trigger(
        &self,
        name: &str,
        trigger_name: &str,
        config: Value,
    ) -> GatewayResult<WorkflowTrigger> {
        let mut entries = self.entries.lock().await;
        let entry = entries.get_mut(name).ok_or_else(|| not_found(name))?;
        let trigger = WorkflowTrigger {
            name: trigger_name.to_string(),
            config,
            added_at: Utc::now(),
        };
        entry.descriptor.workflow_triggers.push(trigger.clone());
        info!("Added workflow trigger '{}' to agent {}", trigger_name, name);
        Ok(trigger)
    }

    /// Every `(agent, trigger)` pair, in registry order.
    pub async fn workflow_triggers(&self) -> Vec<(String, WorkflowTrigger)> {
        let entries = self.entries.lock().await;
        entries
            .iter()
            .flat_map(|(name, entry)| {
                entry
                    .descriptor
                    .workflow_triggers
                    .iter()
                    .map(move |t| (name.clone(), t.clone()))
            })
            .collect()
    }

    /// Recomputed on every call.
    pub async fn summary(&self) -> AgentSummary {
        let entries = self.entries.lock().await;
        let mut summary = AgentSummary {
            total_agents: entries.len(),
            ..AgentSummary::default()
        };

        for (name, entry) in entries.iter() {
            let d = &entry.descriptor;
            if d.enabled {
                summary.enabled_agents += 1;
                match d.status {
                    AgentStatus::Running => summary.running_agents += 1,
                    AgentStatus::Idle => summary.idle_agents += 1,
                    AgentStatus::Failed => summary.failed_agents += 1,
                    _ => {}
                }
            }
            summary.total_tasks_completed += d.stats.completed;
            summary.total_tasks_failed += d.stats.failed;
            summary.agents.insert(
                name.clone(),
                AgentSummaryRow {
                    status: d.status,
                    enabled: d.enabled,
                    last_activity: d.last_activity,
                    tasks_completed: d.stats.completed,
                    tasks_failed: d.stats.failed,
                },
            );
        }
        summary
    }

    /// Lock that serializes runs of `name`.
    pub(crate) async fn run_lock(&self, name: &str) -> GatewayResult<Arc<Mutex<()>>> {
        let entries = self.entries.lock().await;
        let entry = entries.get(name).ok_or_else(|| not_found(name))?;
        Ok(entry.run_lock.clone())
    }

    /// Admission checks for a run, then moves the agent to `running`.
    pub(crate) async fn begin_run(
        &self,
        name: &str,
        params: &Params,
    ) -> GatewayResult<Arc<dyn Agent>> {
        let mut entries = self.entries.lock().await;
        let entry = entries.get_mut(name).ok_or_else(|| not_found(name))?;
        if !entry.descriptor.enabled {
            return Err(GatewayError::Disabled(name.to_string()));
        }
        if !entry.agent.validate_parameters(params) {
            return Err(GatewayError::InvalidParameters(name.to_string()));
        }
        entry.descriptor.status = AgentStatus::Running;
        entry.descriptor.last_activity = Some(Utc::now());
        Ok(entry.agent.clone())
    }

    /// Books a finished run and returns the status the agent ended in.
    pub(crate) async fn finish_run(
        &self,
        name: &str,
        success: bool,
        execution_time: f64,
    ) -> GatewayResult<AgentStatus> {
        let mut entries = self.entries.lock().await;
        let entry = entries.get_mut(name).ok_or_else(|| not_found(name))?;
        let d = &mut entry.descriptor;
        if success {
            d.stats.completed += 1;
            d.status = AgentStatus::Completed;
        } else {
            d.stats.failed += 1;
            d.status = AgentStatus::Failed;
        }
        d.stats.total_time += execution_time;
        d.stats.last_task_time = Some(execution_time);
        d.last_activity = Some(Utc::now());
        Ok(d.status)
    }
}

fn not_found(name: &str) -> GatewayError {
    GatewayError::NotFound(name.to_string())
}

fn snapshot(entry: &Entry) -> AgentSnapshot {
    AgentSnapshot {
        descriptor: entry.descriptor.clone(),
        details: entry.agent.status(),
    }
}

fn capability_report(entry: &Entry) -> CapabilityReport {
    CapabilityReport {
        capabilities: entry.agent.capabilities(),
        workflow_triggers: entry.descriptor.workflow_triggers.clone(),
    }
}
