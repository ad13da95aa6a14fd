//! Webhook event emission.
//!
//! Emission turns one occurrence (a transition, a test action) into durable
//! delivery obligations, one row per target endpoint, and hands their ids to
//! the delivery worker. Emission never waits on a merchant endpoint.

use std::sync::Arc;

use tokio::sync::mpsc;

use sbtc_types::{
    GatewayRepository, MerchantId, RepoError, WebhookEndpoint, WebhookEvent, WebhookEventId,
};

/// A request for one immediate delivery attempt.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DeliveryJob {
    pub event_id: WebhookEventId,
    /// Operator-triggered; ignores the retry ceiling for this one attempt.
    pub manual: bool,
}

/// Sending half of the delivery channel.
///
/// Enqueueing is best effort: a full or closed channel only delays the
/// attempt until the next sweep, since the event row is already stored.
#[derive(Debug, Clone)]
pub struct DeliveryQueue {
    tx: mpsc::Sender<DeliveryJob>,
}

impl DeliveryQueue {
    pub fn channel(capacity: usize) -> (Self, mpsc::Receiver<DeliveryJob>) {
        let (tx, rx) = mpsc::channel(capacity.max(1));
        (Self { tx }, rx)
    }

    pub fn enqueue(&self, job: DeliveryJob) {
        match self.tx.try_send(job) {
            Ok(()) => {}
            Err(mpsc::error::TrySendError::Full(job)) => {
                tracing::debug!(event_id = %job.event_id, "delivery queue full, leaving event to the sweep");
            }
            Err(mpsc::error::TrySendError::Closed(job)) => {
                tracing::debug!(event_id = %job.event_id, "delivery worker gone, leaving event to the sweep");
            }
        }
    }
}

/// Who receives an emitted event.
#[derive(Debug, Clone)]
pub enum EmitTarget {
    /// Every active endpoint of the merchant subscribed to the type.
    Subscribed,
    /// Exactly this endpoint, regardless of its subscriptions.
    Endpoint(WebhookEndpoint),
}

/// Materializes events and dispatches them for delivery.
pub struct EventEmitter<R: GatewayRepository> {
    repo: Arc<R>,
    queue: Option<DeliveryQueue>,
}

impl<R: GatewayRepository> EventEmitter<R> {
    pub fn new(repo: Arc<R>, queue: Option<DeliveryQueue>) -> Self {
        Self { repo, queue }
    }

    /// Builds one event per target endpoint without storing anything.
    ///
    /// Callers that must persist the events atomically with another write
    /// (state transitions) store them themselves and call [`Self::dispatch`]
    /// after the commit.
    pub async fn materialize(
        &self,
        merchant_id: &MerchantId,
        event_type: &str,
        resource_id: Option<&str>,
        payload: &serde_json::Value,
        target: EmitTarget,
    ) -> Result<Vec<WebhookEvent>, RepoError> {
        let endpoints = match target {
            EmitTarget::Subscribed => {
                self.repo
                    .list_subscribed_endpoints(merchant_id, event_type)
                    .await?
            }
            EmitTarget::Endpoint(endpoint) => vec![endpoint],
        };

        Ok(endpoints
            .into_iter()
            .map(|endpoint| {
                WebhookEvent::new(
                    merchant_id.clone(),
                    endpoint.id,
                    event_type,
                    resource_id.map(str::to_string),
                    payload.clone(),
                )
            })
            .collect())
    }

    /// Materializes, stores, and dispatches. Returns the created event ids.
    #[tracing::instrument(skip(self, payload, target), fields(merchant_id = %merchant_id))]
    pub async fn emit(
        &self,
        merchant_id: &MerchantId,
        event_type: &str,
        resource_id: Option<&str>,
        payload: &serde_json::Value,
        target: EmitTarget,
    ) -> Result<Vec<WebhookEventId>, RepoError> {
        let events = self
            .materialize(merchant_id, event_type, resource_id, payload, target)
            .await?;
        if events.is_empty() {
            tracing::debug!(event_type, "no subscribed endpoints, nothing emitted");
            return Ok(Vec::new());
        }

        self.repo.insert_webhook_events(&events).await?;
        self.dispatch(&events);
        Ok(events.into_iter().map(|e| e.id).collect())
    }

    /// Requests an immediate attempt for already stored events.
    pub fn dispatch(&self, events: &[WebhookEvent]) {
        for event in events {
            self.enqueue(event.id.clone(), false);
        }
    }

    /// Requests an operator-triggered attempt.
    pub fn dispatch_manual(&self, event_id: &WebhookEventId) {
        self.enqueue(event_id.clone(), true);
    }

    fn enqueue(&self, event_id: WebhookEventId, manual: bool) {
        if let Some(queue) = &self.queue {
            queue.enqueue(DeliveryJob { event_id, manual });
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_enqueue_delivers_jobs_in_order() {
        let (queue, mut rx) = DeliveryQueue::channel(4);
        let first = WebhookEventId::new();
        let second = WebhookEventId::new();

        queue.enqueue(DeliveryJob {
            event_id: first.clone(),
            manual: false,
        });
        queue.enqueue(DeliveryJob {
            event_id: second.clone(),
            manual: true,
        });

        assert_eq!(rx.recv().await.unwrap().event_id, first);
        let job = rx.recv().await.unwrap();
        assert_eq!(job.event_id, second);
        assert!(job.manual);
    }

    #[tokio::test]
    async fn test_full_queue_drops_without_blocking() {
        let (queue, mut rx) = DeliveryQueue::channel(1);

        for _ in 0..3 {
            queue.enqueue(DeliveryJob {
                event_id: WebhookEventId::new(),
                manual: false,
            });
        }

        assert!(rx.recv().await.is_some());
        assert!(rx.try_recv().is_err());
    }

    #[tokio::test]
    async fn test_closed_queue_is_ignored() {
        let (queue, rx) = DeliveryQueue::channel(1);
        drop(rx);

        queue.enqueue(DeliveryJob {
            event_id: WebhookEventId::new(),
            manual: false,
        });
    }
}
