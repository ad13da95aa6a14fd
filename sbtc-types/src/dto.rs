//! Data Transfer Objects (DTOs) for requests and responses.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use utoipa::{IntoParams, ToSchema};

use crate::domain::{
    Currency, DeliveryState, Metadata, MerchantId, PaymentIntent, WebhookEndpoint,
    WebhookEndpointId, WebhookEvent, WebhookEventId,
};

// ─────────────────────────────────────────────────────────────────────────────
// Merchant DTOs
// ─────────────────────────────────────────────────────────────────────────────

/// Request to create a merchant.
#[derive(Debug, Clone, Serialize, Deserialize, ToSchema)]
pub struct CreateMerchantRequest {
    #[schema(example = "Satoshi's Coffee")]
    pub name: String,
    /// Address derived from the merchant's wallet
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub default_address: Option<String>,
    /// Overrides `default_address` as the payment destination
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub recipient_address: Option<String>,
}

/// Query parameter scoping a listing to one merchant.
#[derive(Debug, Clone, Serialize, Deserialize, IntoParams, ToSchema)]
#[into_params(parameter_in = Query)]
pub struct MerchantQuery {
    pub merchant_id: MerchantId,
}

// ─────────────────────────────────────────────────────────────────────────────
// Payment intent DTOs
// ─────────────────────────────────────────────────────────────────────────────

/// Request to create a payment intent.
#[derive(Debug, Clone, Serialize, Deserialize, ToSchema)]
pub struct CreatePaymentIntentRequest {
    pub merchant_id: MerchantId,
    /// Amount in base units (satoshis for sBTC)
    #[schema(example = 50000)]
    pub amount: i64,
    #[serde(default)]
    pub currency: Currency,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub customer_email: Option<String>,
    #[serde(default)]
    pub metadata: Metadata,
    /// Optional USD shadow amount in cents
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub amount_usd_cents: Option<i64>,
}

/// Moves a `created` intent to `pending`.
#[derive(Debug, Clone, Default, Serialize, Deserialize, ToSchema)]
pub struct ConfirmPaymentIntentRequest {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub customer_address: Option<String>,
}

/// Marks an intent as paid by `tx_id`.
#[derive(Debug, Clone, Serialize, Deserialize, ToSchema)]
pub struct SettlePaymentIntentRequest {
    #[schema(example = "0x3f5e...")]
    pub tx_id: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub customer_address: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize, ToSchema)]
pub struct FailPaymentIntentRequest {
    #[schema(example = "expired")]
    pub reason: String,
}

/// Keys to merge into the intent's metadata.
#[derive(Debug, Clone, Serialize, Deserialize, ToSchema)]
pub struct UpdateMetadataRequest {
    pub metadata: Metadata,
}

/// How a reconcile call ended.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, ToSchema)]
#[serde(rename_all = "snake_case")]
pub enum ReconcileStatus {
    /// The intent had already succeeded; nothing was done.
    AlreadySucceeded,
    /// A matching transfer was found and the intent settled.
    Settled,
    /// No matching transfer yet.
    Pending,
}

#[derive(Debug, Clone, Serialize, Deserialize, ToSchema)]
pub struct ReconcileResponse {
    pub status: ReconcileStatus,
    pub payment_intent: PaymentIntent,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub tx_id: Option<String>,
    /// Candidate transfers inspected when no match was found
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub candidates_examined: Option<usize>,
}

// ─────────────────────────────────────────────────────────────────────────────
// Webhook DTOs
// ─────────────────────────────────────────────────────────────────────────────

/// Request to register a webhook endpoint.
#[derive(Debug, Clone, Serialize, Deserialize, ToSchema)]
pub struct RegisterWebhookRequest {
    pub merchant_id: MerchantId,
    /// The URL to receive webhook notifications
    #[schema(example = "https://example.com/webhook")]
    pub url: String,
    /// Event types to subscribe to; `*` subscribes to all of them
    #[schema(example = json!(["payment_intent.succeeded", "payment_intent.failed"]))]
    pub events: Vec<String>,
}

/// Partial update of an endpoint. The secret is not updatable.
#[derive(Debug, Clone, Default, Serialize, Deserialize, ToSchema)]
pub struct UpdateWebhookRequest {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub url: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub events: Option<Vec<String>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub is_active: Option<bool>,
}

/// A webhook endpoint as returned by the API.
#[derive(Debug, Clone, Serialize, Deserialize, ToSchema)]
pub struct WebhookResponse {
    /// Unique webhook endpoint identifier
    pub id: WebhookEndpointId,
    pub merchant_id: MerchantId,
    /// The registered webhook URL
    #[schema(example = "https://example.com/webhook")]
    pub url: String,
    /// Secret key for verifying webhook signatures (HMAC-SHA256)
    pub secret: String,
    /// List of subscribed event types
    pub events: Vec<String>,
    /// Whether the webhook is active
    pub is_active: bool,
    pub created_at: DateTime<Utc>,
}

impl From<WebhookEndpoint> for WebhookResponse {
    fn from(endpoint: WebhookEndpoint) -> Self {
        Self {
            id: endpoint.id,
            merchant_id: endpoint.merchant_id,
            url: endpoint.url,
            secret: endpoint.secret,
            events: endpoint.events,
            is_active: endpoint.is_active,
            created_at: endpoint.created_at,
        }
    }
}

/// Request to send a synthetic event to one endpoint.
#[derive(Debug, Clone, Default, Serialize, Deserialize, ToSchema)]
pub struct SendTestEventRequest {
    /// Defaults to `payment_intent.succeeded`
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub event_type: Option<String>,
}

/// Ids of the events an operation created.
#[derive(Debug, Clone, Serialize, Deserialize, ToSchema)]
pub struct EmittedEventsResponse {
    pub event_ids: Vec<WebhookEventId>,
}

/// Query for the operator event listing.
#[derive(Debug, Clone, Serialize, Deserialize, IntoParams, ToSchema)]
#[into_params(parameter_in = Query)]
pub struct EventListQuery {
    pub merchant_id: MerchantId,
    /// Most recent first; defaults to 50
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub limit: Option<i64>,
}

/// Operator view of a delivery obligation.
#[derive(Debug, Clone, Serialize, Deserialize, ToSchema)]
pub struct WebhookEventView {
    pub id: WebhookEventId,
    pub merchant_id: MerchantId,
    pub endpoint_id: WebhookEndpointId,
    pub event_type: String,
    pub resource_id: Option<String>,
    #[schema(value_type = Object)]
    pub payload: serde_json::Value,
    pub state: DeliveryState,
    pub delivered: bool,
    pub attempts: i32,
    pub last_attempted_at: Option<DateTime<Utc>>,
    pub next_retry_at: Option<DateTime<Utc>>,
    pub response_status: Option<i32>,
    pub response_body: Option<String>,
    pub created_at: DateTime<Utc>,
}

impl WebhookEventView {
    pub fn from_event(event: WebhookEvent, max_attempts: i32) -> Self {
        Self {
            state: event.state(max_attempts),
            id: event.id,
            merchant_id: event.merchant_id,
            endpoint_id: event.endpoint_id,
            event_type: event.event_type,
            resource_id: event.resource_id,
            payload: event.payload,
            delivered: event.delivered,
            attempts: event.attempts,
            last_attempted_at: event.last_attempted_at,
            next_retry_at: event.next_retry_at,
            response_status: event.response_status,
            response_body: event.response_body,
            created_at: event.created_at,
        }
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Misc
// ─────────────────────────────────────────────────────────────────────────────

#[derive(Debug, Clone, Serialize, Deserialize, ToSchema)]
pub struct HealthResponse {
    #[schema(example = "ok")]
    pub status: String,
    pub version: String,
}

/// Error body returned by every failing endpoint.
#[derive(Debug, Clone, Serialize, Deserialize, ToSchema)]
pub struct ErrorResponse {
    pub error: String,
    #[schema(example = "invalid_state")]
    pub code: String,
}
