
use anyhow::Result;
use serde_json::{Value, json};
use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Duration;

use super::registry::StatusSnapshot;
use super::{Agent, AgentDescriptor, AgentDispatchFacade, AgentRegistry, Params, TaskResult};

/// What a `StubAgent` does when executed.
#[derive(Clone)]
pub(super) enum Behavior {
    Succeed(Value),
    Fail(&'static str),
    Error(&'static str),
    Panic(&'static str),
    Sleep(Duration),
}

/// Counts `execute` calls and plays back a fixed behavior.
pub(super) struct StubAgent {
    behavior: Behavior,
    pub(super) calls: AtomicUsize,
    active: AtomicUsize,
    peak: AtomicUsize,
    reject_params: bool,
}

impl StubAgent {
    pub(super) fn new(behavior: Behavior) -> Arc<Self> {
        Arc::new(Self {
            behavior,
            calls: AtomicUsize::new(0),
            active: AtomicUsize::new(0),
            peak: AtomicUsize::new(0),
            reject_params: false,
        })
    }

    pub(super) fn rejecting() -> Arc<Self> {
        Arc::new(Self {
            behavior: Behavior::Succeed(json!({})),
            calls: AtomicUsize::new(0),
            active: AtomicUsize::new(0),
            peak: AtomicUsize::new(0),
            reject_params: true,
        })
    }

    pub(super) fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }

    /// Highest number of `execute` calls seen in flight at once.
    pub(super) fn peak_concurrency(&self) -> usize {
        self.peak.load(Ordering::SeqCst)
    }
}

impl Agent for StubAgent {
    fn execute(&self, _params: &Params) -> Result<TaskResult> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        match &self.behavior {
            Behavior::Succeed(payload) => Ok(TaskResult::success(payload.clone())),
            Behavior::Fail(msg) => Ok(TaskResult::failure(*msg)),
            Behavior::Error(msg) => anyhow::bail!("{}", msg),
            Behavior::Panic(msg) => panic!("{}", msg),
            Behavior::Sleep(pause) => {
                let in_flight = self.active.fetch_add(1, Ordering::SeqCst) + 1;
                self.peak.fetch_max(in_flight, Ordering::SeqCst);
                std::thread::sleep(*pause);
                self.active.fetch_sub(1, Ordering::SeqCst);
                Ok(TaskResult::success(json!({ "slept_ms": pause.as_millis() as u64 })))
            }
        }
    }

    fn status(&self) -> Value {
        json!({ "calls": self.calls() })
    }

    fn capabilities(&self) -> Value {
        json!({ "operations": ["stub"] })
    }

    fn validate_parameters(&self, _params: &Params) -> bool {
        !self.reject_params
    }
}

pub(super) fn params(value: Value) -> Params {
    match value {
        Value::Object(map) => map,
        _ => Params::new(),
    }
}

pub(super) async fn facade_with(
    name: &str,
    agent: Arc<StubAgent>,
    max_history: usize,
) -> AgentDispatchFacade {
    let registry = Arc::new(AgentRegistry::new());
    registry.register(name, agent).await;
    AgentDispatchFacade::new(registry, max_history)
}

pub(super) async fn descriptor(registry: &AgentRegistry, name: &str) -> AgentDescriptor {
    match registry.status(Some(name)).await.unwrap() {
        StatusSnapshot::Single { agent } => agent.descriptor,
        StatusSnapshot::All { .. } => panic!("expected a single-agent snapshot"),
    }
}
