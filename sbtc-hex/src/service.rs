//! Payment Application Service
//!
//! Orchestrates domain operations through the repository port: the
//! payment-intent state machine, webhook endpoint management, and the
//! operator actions over stored events.
//! Contains NO infrastructure logic - pure business orchestration.

use std::sync::Arc;

use chrono::Utc;
use serde_json::json;

use sbtc_types::{
    AppError, CreateMerchantRequest, CreatePaymentIntentRequest, GatewayRepository, Merchant,
    MerchantId, Metadata, Money, PaymentIntent, PaymentIntentId, PaymentIntentStatus,
    RegisterWebhookRequest, RepoError, Transition, UpdateWebhookRequest, WebhookEndpoint,
    WebhookEndpointId, WebhookEventId, WebhookEventView, event_types,
};

use crate::emitter::{DeliveryQueue, EmitTarget, EventEmitter};

pub const DEFAULT_EVENT_LIST_LIMIT: i64 = 50;
pub const MAX_EVENT_LIST_LIMIT: i64 = 500;

/// Knobs the service needs from configuration.
#[derive(Debug, Clone)]
pub struct ServiceConfig {
    /// Event type emitted by `confirm`.
    pub confirm_event_type: String,
    /// Retry ceiling, used to derive the delivery state of listed events.
    pub max_attempts: i32,
}

impl Default for ServiceConfig {
    fn default() -> Self {
        Self {
            confirm_event_type: event_types::PAYMENT_INTENT_CREATED.to_string(),
            max_attempts: 5,
        }
    }
}

/// Application service for payment operations.
///
/// Generic over `R: GatewayRepository` - the adapter is injected at compile time.
pub struct PaymentService<R: GatewayRepository> {
    repo: Arc<R>,
    emitter: EventEmitter<R>,
    config: ServiceConfig,
}

impl<R: GatewayRepository> PaymentService<R> {
    /// Creates a service that stores events but never triggers immediate
    /// attempts; the delivery sweep picks them up.
    pub fn new(repo: Arc<R>) -> Self {
        Self {
            emitter: EventEmitter::new(repo.clone(), None),
            repo,
            config: ServiceConfig::default(),
        }
    }

    pub fn with_config(mut self, config: ServiceConfig) -> Self {
        self.config = config;
        self
    }

    /// Emitted events are also pushed to `queue` for an immediate attempt.
    pub fn with_delivery_queue(mut self, queue: DeliveryQueue) -> Self {
        self.emitter = EventEmitter::new(self.repo.clone(), Some(queue));
        self
    }

    /// Returns a reference to the underlying repository.
    pub fn repo(&self) -> &Arc<R> {
        &self.repo
    }

    pub fn config(&self) -> &ServiceConfig {
        &self.config
    }

    // ─────────────────────────────────────────────────────────────────────────────
    // Merchants
    // ─────────────────────────────────────────────────────────────────────────────

    pub async fn create_merchant(&self, req: CreateMerchantRequest) -> Result<Merchant, AppError> {
        let merchant = Merchant::new(req.name, req.default_address, req.recipient_address)?;
        Ok(self.repo.create_merchant(merchant).await?)
    }

    pub async fn get_merchant(&self, id: &MerchantId) -> Result<Merchant, AppError> {
        self.repo
            .get_merchant(id)
            .await?
            .ok_or_else(|| AppError::NotFound(format!("Merchant {}", id)))
    }

    // ─────────────────────────────────────────────────────────────────────────────
    // Payment intents
    // ─────────────────────────────────────────────────────────────────────────────

    /// Creates an intent in the `created` state. Emits nothing.
    #[tracing::instrument(skip(self, req), fields(merchant_id = %req.merchant_id, amount = req.amount))]
    pub async fn create_payment_intent(
        &self,
        req: CreatePaymentIntentRequest,
    ) -> Result<PaymentIntent, AppError> {
        self.get_merchant(&req.merchant_id).await?;

        let amount = Money::positive(req.amount, req.currency)?;
        let intent = PaymentIntent::new(
            req.merchant_id,
            amount,
            req.description,
            req.customer_email,
            req.metadata,
            req.amount_usd_cents,
        )?;

        let intent = self.repo.insert_payment_intent(intent).await?;
        tracing::info!(intent_id = %intent.id, "payment intent created");
        Ok(intent)
    }

    pub async fn get_payment_intent(&self, id: &PaymentIntentId) -> Result<PaymentIntent, AppError> {
        self.repo
            .get_payment_intent(id)
            .await?
            .ok_or_else(|| AppError::NotFound(format!("Payment intent {}", id)))
    }

    /// Newest first.
    pub async fn list_payment_intents(
        &self,
        merchant_id: &MerchantId,
    ) -> Result<Vec<PaymentIntent>, AppError> {
        self.get_merchant(merchant_id).await?;
        Ok(self.repo.list_payment_intents(merchant_id).await?)
    }

    /// Least recently updated first, so repeated passes rotate through the backlog.
    pub async fn list_payment_intents_by_status(
        &self,
        status: PaymentIntentStatus,
        limit: i64,
    ) -> Result<Vec<PaymentIntent>, AppError> {
        Ok(self
            .repo
            .list_payment_intents_by_status(status, limit)
            .await?)
    }

    /// Additive merge; allowed in every state.
    #[tracing::instrument(skip(self, patch), fields(intent_id = %id, keys = patch.len()))]
    pub async fn update_metadata(
        &self,
        id: &PaymentIntentId,
        patch: &Metadata,
    ) -> Result<PaymentIntent, AppError> {
        self.repo
            .merge_payment_intent_metadata(id, patch)
            .await
            .map_err(|e| match e {
                RepoError::NotFound => AppError::NotFound(format!("Payment intent {}", id)),
                e => e.into(),
            })
    }

    // ─────────────────────────────────────────────────────────────────────────────
    // State machine
    // ─────────────────────────────────────────────────────────────────────────────

    /// `created → pending`.
    pub async fn confirm(
        &self,
        id: &PaymentIntentId,
        customer_address: Option<String>,
    ) -> Result<PaymentIntent, AppError> {
        self.transition(id, Transition::Confirm { customer_address })
            .await
    }

    /// `created | pending → succeeded`, attaching the settlement transaction.
    pub async fn settle(
        &self,
        id: &PaymentIntentId,
        tx_id: String,
        customer_address: Option<String>,
    ) -> Result<PaymentIntent, AppError> {
        self.transition(
            id,
            Transition::Settle {
                tx_id,
                customer_address,
            },
        )
        .await
    }

    /// `created | pending → failed`, recording `reason` in metadata.
    pub async fn fail(&self, id: &PaymentIntentId, reason: String) -> Result<PaymentIntent, AppError> {
        if reason.trim().is_empty() {
            return Err(AppError::BadRequest("Failure reason cannot be empty".into()));
        }
        self.transition(id, Transition::Fail { reason }).await
    }

    /// `created | pending → canceled`.
    pub async fn cancel(&self, id: &PaymentIntentId) -> Result<PaymentIntent, AppError> {
        self.transition(id, Transition::Cancel).await
    }

    fn event_type_for(&self, transition: &Transition) -> &str {
        match transition {
            Transition::Confirm { .. } => &self.config.confirm_event_type,
            Transition::Settle { .. } => event_types::PAYMENT_INTENT_SUCCEEDED,
            Transition::Fail { .. } => event_types::PAYMENT_INTENT_FAILED,
            Transition::Cancel => event_types::PAYMENT_INTENT_CANCELED,
        }
    }

    /// Applies `transition` and stores the new state together with its events.
    ///
    /// The write is guarded on the status that was read; if another writer got
    /// there first nothing is stored and nothing is emitted.
    #[tracing::instrument(skip(self, transition), fields(intent_id = %id, transition = transition.name()))]
    async fn transition(
        &self,
        id: &PaymentIntentId,
        transition: Transition,
    ) -> Result<PaymentIntent, AppError> {
        let current = self.get_payment_intent(id).await?;
        let next = current.apply(&transition, Utc::now())?;

        let payload =
            serde_json::to_value(&next).map_err(|e| AppError::Internal(e.to_string()))?;
        let events = self
            .emitter
            .materialize(
                &next.merchant_id,
                self.event_type_for(&transition),
                Some(next.id.as_str()),
                &payload,
                EmitTarget::Subscribed,
            )
            .await?;

        let stored = match self
            .repo
            .commit_transition(&next, current.status, &transition.metadata_patch(), &events)
            .await
        {
            Ok(stored) => stored,
            Err(RepoError::Conflict(_)) => {
                let latest = self.get_payment_intent(id).await?;
                tracing::info!(status = %latest.status, "lost transition race");
                return Err(AppError::InvalidState(format!(
                    "Payment intent {} is {}, cannot {}",
                    id,
                    latest.status,
                    transition.name()
                )));
            }
            Err(RepoError::NotFound) => {
                return Err(AppError::NotFound(format!("Payment intent {}", id)));
            }
            Err(e) => return Err(e.into()),
        };

        self.emitter.dispatch(&events);
        tracing::info!(
            from = %current.status,
            to = %stored.status,
            events = events.len(),
            "payment intent transitioned"
        );
        Ok(stored)
    }

    // ─────────────────────────────────────────────────────────────────────────────
    // Webhook endpoints
    // ─────────────────────────────────────────────────────────────────────────────

    #[tracing::instrument(skip(self, req), fields(merchant_id = %req.merchant_id, url = %req.url))]
    pub async fn register_endpoint(
        &self,
        req: RegisterWebhookRequest,
    ) -> Result<WebhookEndpoint, AppError> {
        self.get_merchant(&req.merchant_id).await?;
        Ok(self
            .repo
            .register_webhook_endpoint(&req.merchant_id, &req.url, &req.events)
            .await?)
    }

    pub async fn get_endpoint(&self, id: &WebhookEndpointId) -> Result<WebhookEndpoint, AppError> {
        self.repo
            .get_webhook_endpoint(id)
            .await?
            .ok_or_else(|| AppError::NotFound(format!("Webhook endpoint {}", id)))
    }

    pub async fn list_endpoints(
        &self,
        merchant_id: &MerchantId,
    ) -> Result<Vec<WebhookEndpoint>, AppError> {
        Ok(self.repo.list_webhook_endpoints(merchant_id).await?)
    }

    /// Partial update. The secret never changes.
    #[tracing::instrument(skip(self, update), fields(endpoint_id = %id))]
    pub async fn update_endpoint(
        &self,
        id: &WebhookEndpointId,
        update: &UpdateWebhookRequest,
    ) -> Result<WebhookEndpoint, AppError> {
        self.repo
            .update_webhook_endpoint(id, update)
            .await
            .map_err(|e| match e {
                RepoError::NotFound => AppError::NotFound(format!("Webhook endpoint {}", id)),
                e => e.into(),
            })
    }

    /// Deletes the endpoint and its undelivered events.
    #[tracing::instrument(skip(self), fields(endpoint_id = %id))]
    pub async fn delete_endpoint(&self, id: &WebhookEndpointId) -> Result<(), AppError> {
        if self.repo.delete_webhook_endpoint(id).await? {
            Ok(())
        } else {
            Err(AppError::NotFound(format!("Webhook endpoint {}", id)))
        }
    }

    // ─────────────────────────────────────────────────────────────────────────────
    // Operator actions over events
    // ─────────────────────────────────────────────────────────────────────────────

    /// Sends a synthetic event to one endpoint, bypassing the state machine.
    #[tracing::instrument(skip(self))]
    pub async fn send_test_event(
        &self,
        endpoint_id: &WebhookEndpointId,
        event_type: Option<String>,
    ) -> Result<Vec<WebhookEventId>, AppError> {
        let endpoint = self.get_endpoint(endpoint_id).await?;
        let event_type =
            event_type.unwrap_or_else(|| event_types::PAYMENT_INTENT_SUCCEEDED.to_string());
        if !event_types::is_known(&event_type) {
            return Err(AppError::BadRequest(format!(
                "Unknown event type: {}",
                event_type
            )));
        }

        let payload = test_payload(&endpoint.merchant_id, &event_type);
        let resource_id = payload["id"].as_str().map(str::to_string);
        let merchant_id = endpoint.merchant_id.clone();

        Ok(self
            .emitter
            .emit(
                &merchant_id,
                &event_type,
                resource_id.as_deref(),
                &payload,
                EmitTarget::Endpoint(endpoint),
            )
            .await?)
    }

    /// Most recent first; `limit` defaults to 50 and is capped at 500.
    pub async fn list_events(
        &self,
        merchant_id: &MerchantId,
        limit: Option<i64>,
    ) -> Result<Vec<WebhookEventView>, AppError> {
        let limit = limit
            .unwrap_or(DEFAULT_EVENT_LIST_LIMIT)
            .clamp(1, MAX_EVENT_LIST_LIMIT);
        let events = self.repo.list_webhook_events(merchant_id, limit).await?;
        Ok(events
            .into_iter()
            .map(|e| WebhookEventView::from_event(e, self.config.max_attempts))
            .collect())
    }

    pub async fn get_event(&self, id: &WebhookEventId) -> Result<WebhookEventView, AppError> {
        let event = self
            .repo
            .get_webhook_event(id)
            .await?
            .ok_or_else(|| AppError::NotFound(format!("Webhook event {}", id)))?;
        Ok(WebhookEventView::from_event(event, self.config.max_attempts))
    }

    /// Makes the event eligible immediately and requests one attempt.
    ///
    /// Never touches `attempts` or `delivered`.
    #[tracing::instrument(skip(self), fields(event_id = %id))]
    pub async fn retry_event(&self, id: &WebhookEventId) -> Result<WebhookEventView, AppError> {
        let event = self.get_event(id).await?;
        if event.delivered {
            return Err(AppError::InvalidState(format!(
                "Webhook event {} was already delivered",
                id
            )));
        }

        if !self.repo.reset_webhook_retry(id).await? {
            return Err(AppError::InvalidState(format!(
                "Webhook event {} was delivered concurrently",
                id
            )));
        }

        self.emitter.dispatch_manual(id);
        tracing::info!(attempts = event.attempts, "manual retry scheduled");
        self.get_event(id).await
    }
}

/// Synthetic payment-intent snapshot for test deliveries.
fn test_payload(merchant_id: &MerchantId, event_type: &str) -> serde_json::Value {
    let status = match event_type {
        event_types::PAYMENT_INTENT_CREATED => PaymentIntentStatus::Created,
        event_types::PAYMENT_INTENT_PENDING => PaymentIntentStatus::Pending,
        event_types::PAYMENT_INTENT_FAILED => PaymentIntentStatus::Failed,
        event_types::PAYMENT_INTENT_CANCELED => PaymentIntentStatus::Canceled,
        _ => PaymentIntentStatus::Succeeded,
    };
    let now = Utc::now();

    json!({
        "id": PaymentIntentId::new(),
        "object": "payment_intent",
        "merchant_id": merchant_id,
        "amount": 10_000,
        "currency": "sbtc",
        "status": status,
        "description": "Test event",
        "metadata": {},
        "livemode": false,
        "created_at": now,
        "updated_at": now,
    })
}
