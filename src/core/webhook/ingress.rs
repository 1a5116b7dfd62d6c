use chrono::{DateTime, Utc};
use serde::Serialize;
use std::collections::VecDeque;
use std::sync::Arc;
use std::sync::atomic::{AtomicI64, AtomicUsize, Ordering};
use tokio::sync::{Mutex, mpsc};
use tracing::{debug, error, info};

use super::{Payload, ProcessingOutcome, WebhookKind, WebhookRecord};

/// Receiving end of the processing queue, handed to the dispatcher.
pub type WebhookQueue = mpsc::UnboundedReceiver<WebhookRecord>;

/// Accepts webhooks, keeps a bounded history and feeds the processing queue.
pub struct WebhookIngress {
    history: Mutex<VecDeque<WebhookRecord>>,
    max_history: usize,
    queue: mpsc::UnboundedSender<WebhookRecord>,
    pending: AtomicUsize,
    last_id_micros: AtomicI64,
}

#[derive(Debug, Clone, Serialize)]
pub struct SubmitReceipt {
    pub success: bool,
    pub status: &'static str,
    pub webhook_id: String,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct WebhookStats {
    pub total: usize,
    pub processed: usize,
    pub failed: usize,
    pub pending: usize,
    pub success_rate: f64,
}

impl WebhookIngress {
    pub fn new(max_history: usize) -> (Arc<Self>, WebhookQueue) {
        let (tx, rx) = mpsc::unbounded_channel();
        let ingress = Arc::new(Self {
            history: Mutex::new(VecDeque::with_capacity(max_history.min(1024))),
            max_history,
            queue: tx,
            pending: AtomicUsize::new(0),
            last_id_micros: AtomicI64::new(0),
        });
        (ingress, rx)
    }

    /// Stores the record and queues it. Always accepted; processing happens later.
    pub async fn submit(&self, kind: WebhookKind, topic: &str, payload: Payload) -> SubmitReceipt {
        let (id, received_at) = self.next_id();
        let record = WebhookRecord {
            id: id.clone(),
            kind,
            topic: topic.to_string(),
            source: "n8n".to_string(),
            payload,
            received_at,
            processed: false,
            processed_at: None,
            outcome: ProcessingOutcome::Pending,
        };

        {
            let mut history = self.history.lock().await;
            history.push_back(record.clone());
            while history.len() > self.max_history {
                history.pop_front();
            }
        }

        self.pending.fetch_add(1, Ordering::SeqCst);
        if self.queue.send(record).is_err() {
            self.pending.fetch_sub(1, Ordering::SeqCst);
            error!("Webhook dispatcher is gone; {} will not be processed", id);
            self.complete(
                &id,
                ProcessingOutcome::Failed {
                    error: "dispatcher unavailable".to_string(),
                },
            )
            .await;
        } else {
            info!("Webhook queued for processing: {} ({})", id, kind.as_str());
        }

        SubmitReceipt {
            success: true,
            status: "accepted",
            webhook_id: id,
        }
    }

    /// Last `limit` records, oldest first; `limit == 0` returns everything.
    pub async fn history(&self, limit: usize) -> Vec<WebhookRecord> {
        let history = self.history.lock().await;
        let skip = if limit > 0 {
            history.len().saturating_sub(limit)
        } else {
            0
        };
        history.iter().skip(skip).cloned().collect()
    }

    pub async fn get(&self, id: &str) -> Option<WebhookRecord> {
        let history = self.history.lock().await;
        history.iter().rev().find(|r| r.id == id).cloned()
    }

    pub async fn stats(&self) -> WebhookStats {
        let history = self.history.lock().await;
        let total = history.len();
        let processed = history.iter().filter(|r| r.processed).count();
        let failed = history.iter().filter(|r| r.is_failed()).count();
        WebhookStats {
            total,
            processed,
            failed,
            pending: self.pending.load(Ordering::SeqCst),
            success_rate: if total > 0 {
                (processed - failed) as f64 / total as f64 * 100.0
            } else {
                0.0
            },
        }
    }

    pub(crate) fn mark_dequeued(&self) {
        let _ = self
            .pending
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1));
    }

    /// Records the outcome on the stored record; evicted records are skipped.
    pub(crate) async fn complete(&self, id: &str, outcome: ProcessingOutcome) {
        let mut history = self.history.lock().await;
        match history.iter_mut().rev().find(|r| r.id == id) {
            Some(record) => {
                record.processed = true;
                record.processed_at = Some(Utc::now());
                record.outcome = outcome;
            }
            None => debug!("Webhook {} left history before processing finished", id),
        }
    }

    /// `webhook_<date>_<time>_<micros>`, bumped by one microsecond on collision.
    fn next_id(&self) -> (String, DateTime<Utc>) {
        let now = Utc::now();
        let wall = now.timestamp_micros();
        let previous = self
            .last_id_micros
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |last| {
                Some(if wall > last { wall } else { last + 1 })
            })
            .unwrap_or_else(|v| v);
        let micros = if wall > previous { wall } else { previous + 1 };
        let stamp = DateTime::<Utc>::from_timestamp_micros(micros).unwrap_or(now);
        (
            format!("webhook_{}", stamp.format("%Y%m%d_%H%M%S_%6f")),
            now,
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashSet;

    fn payload(n: usize) -> Payload {
        let mut p = Payload::new();
        p.insert("n".into(), n.into());
        p
    }

    #[tokio::test]
    async fn submit_returns_accepted_receipt_and_queues() {
        let (ingress, mut queue) = WebhookIngress::new(10);
        let receipt = ingress
            .submit(WebhookKind::SystemAlert, "system-alert", payload(1))
            .await;
        assert!(receipt.success);
        assert_eq!(receipt.status, "accepted");
        assert!(receipt.webhook_id.starts_with("webhook_"));

        let queued = queue.recv().await.unwrap();
        assert_eq!(queued.id, receipt.webhook_id);
        assert_eq!(queued.kind, WebhookKind::SystemAlert);

        let stored = ingress.get(&receipt.webhook_id).await.unwrap();
        assert!(!stored.processed);
        assert_eq!(stored.outcome, ProcessingOutcome::Pending);
        assert_eq!(stored.source, "n8n");
    }

    #[tokio::test]
    async fn ids_are_unique_under_rapid_submission() {
        let (ingress, _queue) = WebhookIngress::new(5000);
        let mut seen = HashSet::new();
        for i in 0..2000 {
            let receipt = ingress
                .submit(WebhookKind::Generic, "productivity", payload(i))
                .await;
            assert!(seen.insert(receipt.webhook_id), "duplicate id at {}", i);
        }
    }

    #[tokio::test]
    async fn history_is_capped_with_oldest_first_eviction() {
        let (ingress, _queue) = WebhookIngress::new(1000);
        let mut first_id = None;
        for i in 0..1001 {
            let receipt = ingress
                .submit(WebhookKind::FileOrganization, "file-organization", payload(i))
                .await;
            if i == 0 {
                first_id = Some(receipt.webhook_id);
            }
        }

        let history = ingress.history(usize::MAX).await;
        assert_eq!(history.len(), 1000);
        assert!(ingress.get(first_id.as_deref().unwrap()).await.is_none());
        assert_eq!(history.first().unwrap().payload["n"], 1);
        assert_eq!(history.last().unwrap().payload["n"], 1000);
    }

    #[tokio::test]
    async fn history_limit_returns_most_recent() {
        let (ingress, _queue) = WebhookIngress::new(100);
        for i in 0..5 {
            ingress.submit(WebhookKind::Generic, "productivity", payload(i)).await;
        }
        let recent = ingress.history(2).await;
        assert_eq!(recent.len(), 2);
        assert_eq!(recent[0].payload["n"], 3);
        assert_eq!(recent[1].payload["n"], 4);

        let everything = ingress.history(0).await;
        assert_eq!(everything.len(), 5);
        assert_eq!(everything[0].payload["n"], 0);
    }

    #[tokio::test]
    async fn stats_track_pending_and_processed() {
        let (ingress, _queue) = WebhookIngress::new(100);
        let a = ingress.submit(WebhookKind::Generic, "productivity", payload(0)).await;
        let b = ingress.submit(WebhookKind::Generic, "productivity", payload(1)).await;

        let stats = ingress.stats().await;
        assert_eq!(stats.total, 2);
        assert_eq!(stats.pending, 2);
        assert_eq!(stats.processed, 0);
        assert_eq!(stats.success_rate, 0.0);

        ingress.mark_dequeued();
        ingress
            .complete(
                &a.webhook_id,
                ProcessingOutcome::Succeeded {
                    result: Payload::new(),
                },
            )
            .await;
        ingress.mark_dequeued();
        ingress
            .complete(
                &b.webhook_id,
                ProcessingOutcome::Failed {
                    error: "bad shape".into(),
                },
            )
            .await;

        let stats = ingress.stats().await;
        assert_eq!(stats.pending, 0);
        assert_eq!(stats.processed, 2);
        assert_eq!(stats.failed, 1);
        assert_eq!(stats.success_rate, 50.0);
    }

    #[tokio::test]
    async fn closed_queue_marks_record_failed() {
        let (ingress, queue) = WebhookIngress::new(10);
        drop(queue);
        let receipt = ingress.submit(WebhookKind::Generic, "productivity", payload(0)).await;
        assert_eq!(receipt.status, "accepted");

        let stored = ingress.get(&receipt.webhook_id).await.unwrap();
        assert!(stored.processed);
        assert!(stored.is_failed());
        assert_eq!(ingress.stats().await.pending, 0);
    }
}
