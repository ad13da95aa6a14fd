//! Repository port trait.
//!
//! This is the primary port in our hexagonal architecture.
//! Adapters (Postgres, SQLite, in-memory mocks) implement this trait.

use chrono::{DateTime, Utc};

use crate::domain::{
    AttemptRecord, Merchant, MerchantId, Metadata, PaymentIntent, PaymentIntentId,
    PaymentIntentStatus, WebhookEndpoint, WebhookEndpointId, WebhookEvent, WebhookEventId,
};
use crate::dto::UpdateWebhookRequest;
use crate::error::RepoError;

/// Storage collaborator for the confirmation and delivery pipeline.
///
/// Status changes and the events they emit MUST be written atomically.
/// Event delivery bookkeeping goes through the claim/record pair only.
#[async_trait::async_trait]
pub trait GatewayRepository: Send + Sync + 'static {
    // ─────────────────────────────────────────────────────────────────────────────
    // Merchants
    // ─────────────────────────────────────────────────────────────────────────────

    async fn create_merchant(&self, merchant: Merchant) -> Result<Merchant, RepoError>;

    async fn get_merchant(&self, id: &MerchantId) -> Result<Option<Merchant>, RepoError>;

    // ─────────────────────────────────────────────────────────────────────────────
    // Payment intents
    // ─────────────────────────────────────────────────────────────────────────────

    async fn insert_payment_intent(&self, intent: PaymentIntent)
    -> Result<PaymentIntent, RepoError>;

    async fn get_payment_intent(
        &self,
        id: &PaymentIntentId,
    ) -> Result<Option<PaymentIntent>, RepoError>;

    /// Newest first.
    async fn list_payment_intents(
        &self,
        merchant_id: &MerchantId,
    ) -> Result<Vec<PaymentIntent>, RepoError>;

    /// Least recently updated first, so repeated passes rotate through.
    async fn list_payment_intents_by_status(
        &self,
        status: PaymentIntentStatus,
        limit: i64,
    ) -> Result<Vec<PaymentIntent>, RepoError>;

    /// Writes the status, `tx_id` and `customer_address` of `updated` only if
    /// the stored status is still `expected`, merges `metadata_patch` into the
    /// stored metadata, and inserts `events`, all in one transaction.
    /// `updated.metadata` is not written. Returns the stored intent.
    ///
    /// Returns [`RepoError::Conflict`] when the guard fails; nothing is
    /// written in that case.
    async fn commit_transition(
        &self,
        updated: &PaymentIntent,
        expected: PaymentIntentStatus,
        metadata_patch: &Metadata,
        events: &[WebhookEvent],
    ) -> Result<PaymentIntent, RepoError>;

    /// Additive merge into the stored metadata. Allowed in every status.
    async fn merge_payment_intent_metadata(
        &self,
        id: &PaymentIntentId,
        patch: &Metadata,
    ) -> Result<PaymentIntent, RepoError>;

    // ─────────────────────────────────────────────────────────────────────────────
    // Webhook endpoints
    // ─────────────────────────────────────────────────────────────────────────────

    /// Creates an endpoint with a freshly generated signing secret.
    async fn register_webhook_endpoint(
        &self,
        merchant_id: &MerchantId,
        url: &str,
        events: &[String],
    ) -> Result<WebhookEndpoint, RepoError>;

    async fn get_webhook_endpoint(
        &self,
        id: &WebhookEndpointId,
    ) -> Result<Option<WebhookEndpoint>, RepoError>;

    async fn list_webhook_endpoints(
        &self,
        merchant_id: &MerchantId,
    ) -> Result<Vec<WebhookEndpoint>, RepoError>;

    /// Active endpoints of `merchant_id` subscribed to `event_type`
    /// (directly or through the wildcard).
    async fn list_subscribed_endpoints(
        &self,
        merchant_id: &MerchantId,
        event_type: &str,
    ) -> Result<Vec<WebhookEndpoint>, RepoError>;

    /// Applies a partial update. Never touches the secret.
    async fn update_webhook_endpoint(
        &self,
        id: &WebhookEndpointId,
        update: &UpdateWebhookRequest,
    ) -> Result<WebhookEndpoint, RepoError>;

    /// Deletes the endpoint and its undelivered events. Returns `false` if
    /// no such endpoint existed.
    async fn delete_webhook_endpoint(&self, id: &WebhookEndpointId) -> Result<bool, RepoError>;

    // ─────────────────────────────────────────────────────────────────────────────
    // Webhook events
    // ─────────────────────────────────────────────────────────────────────────────

    /// Inserts standalone events (test sends). Transition events go through
    /// [`GatewayRepository::commit_transition`].
    async fn insert_webhook_events(&self, events: &[WebhookEvent]) -> Result<(), RepoError>;

    async fn get_webhook_event(
        &self,
        id: &WebhookEventId,
    ) -> Result<Option<WebhookEvent>, RepoError>;

    /// Newest first.
    async fn list_webhook_events(
        &self,
        merchant_id: &MerchantId,
        limit: i64,
    ) -> Result<Vec<WebhookEvent>, RepoError>;

    /// Undelivered events below `max_attempts` whose retry time has passed
    /// (or was never set), oldest first.
    async fn list_due_webhook_events(
        &self,
        now: DateTime<Utc>,
        max_attempts: i32,
        limit: i64,
    ) -> Result<Vec<WebhookEvent>, RepoError>;

    /// Compare-and-swap claim: moves `next_retry_at` to `lease_until` only
    /// if the event is undelivered, due at `now`, and (when `ceiling` is
    /// set) below that attempt count. Returns the claimed row, or `None` if
    /// someone else holds it or it is no longer eligible.
    async fn claim_webhook_event(
        &self,
        id: &WebhookEventId,
        now: DateTime<Utc>,
        lease_until: DateTime<Utc>,
        ceiling: Option<i32>,
    ) -> Result<Option<WebhookEvent>, RepoError>;

    /// Records one attempt. `attempts` grows by one but never past
    /// `max_attempts`; a delivered event is never written again
    /// ([`RepoError::Conflict`]).
    async fn record_webhook_attempt(
        &self,
        id: &WebhookEventId,
        record: &AttemptRecord,
        max_attempts: i32,
    ) -> Result<WebhookEvent, RepoError>;

    /// Clears `next_retry_at` on an undelivered event. Leaves `attempts`
    /// and `delivered` alone. Returns `false` if nothing matched.
    async fn reset_webhook_retry(&self, id: &WebhookEventId) -> Result<bool, RepoError>;
}
