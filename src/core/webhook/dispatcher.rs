use anyhow::{Result, anyhow};
use async_trait::async_trait;
use std::sync::Arc;
use std::time::Duration;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{error, info, warn};

use super::{HandlerTable, ProcessingOutcome, WebhookIngress, WebhookQueue};
use crate::core::lifecycle::LifecycleComponent;

/// Single background consumer of the webhook queue. Records are handled one at a time,
/// in submission order.
pub struct WebhookDispatcher {
    ingress: Arc<WebhookIngress>,
    queue: Option<WebhookQueue>,
    handlers: Arc<HandlerTable>,
    pause: Duration,
    cancel: CancellationToken,
    task: Option<JoinHandle<()>>,
}

impl WebhookDispatcher {
    pub fn new(
        ingress: Arc<WebhookIngress>,
        queue: WebhookQueue,
        handlers: HandlerTable,
        pause: Duration,
    ) -> Self {
        Self {
            ingress,
            queue: Some(queue),
            handlers: Arc::new(handlers),
            pause,
            cancel: CancellationToken::new(),
            task: None,
        }
    }

    /// Starts the consumer task. The queue can only be taken once.
    pub fn spawn(&mut self) -> Result<()> {
        let queue = self
            .queue
            .take()
            .ok_or_else(|| anyhow!("webhook dispatcher already started"))?;
        let ingress = self.ingress.clone();
        let handlers = self.handlers.clone();
        let cancel = self.cancel.clone();
        let pause = self.pause;

        self.task = Some(tokio::spawn(async move {
            run(ingress, queue, handlers, pause, cancel).await;
        }));
        Ok(())
    }

    pub async fn stop(&mut self) {
        self.cancel.cancel();
        if let Some(task) = self.task.take() {
            if let Err(e) = task.await {
                warn!("Webhook dispatcher task ended abnormally: {}", e);
            }
        }
    }
}

async fn run(
    ingress: Arc<WebhookIngress>,
    mut queue: WebhookQueue,
    handlers: Arc<HandlerTable>,
    pause: Duration,
    cancel: CancellationToken,
) {
    info!("Webhook dispatcher started");
    loop {
        let record = tokio::select! {
            _ = cancel.cancelled() => break,
            next = queue.recv() => match next {
                Some(record) => record,
                None => break,
            },
        };
        ingress.mark_dequeued();

        let id = record.id.clone();
        let kind = record.kind;
        let handler = handlers.route(kind);

        // Spawned so a panicking handler is contained to this record.
        let outcome = match tokio::spawn(async move { handler.handle(record).await }).await {
            Ok(Ok(result)) => ProcessingOutcome::Succeeded { result },
            Ok(Err(e)) => {
                error!("Error processing webhook {} ({}): {}", id, kind.as_str(), e);
                ProcessingOutcome::Failed {
                    error: e.to_string(),
                }
            }
            Err(e) => {
                error!("Webhook handler for {} panicked: {}", id, e);
                ProcessingOutcome::Failed {
                    error: "handler panicked".to_string(),
                }
            }
        };
        ingress.complete(&id, outcome).await;

        if pause.is_zero() {
            tokio::task::yield_now().await;
        } else {
            tokio::select! {
                _ = cancel.cancelled() => break,
                _ = tokio::time::sleep(pause) => {}
            }
        }
    }
    info!("Webhook dispatcher stopped");
}

#[async_trait]
impl LifecycleComponent for WebhookDispatcher {
    async fn on_start(&mut self) -> Result<()> {
        self.spawn()
    }

    async fn on_shutdown(&mut self) -> Result<()> {
        self.stop().await;
        Ok(())
    }
}
