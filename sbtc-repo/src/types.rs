//! Database row types shared by the SQLite and PostgreSQL adapters.
//!
//! Ids are stored as their prefixed string form, JSON columns go through
//! `sqlx::types::Json`, timestamps through chrono.

use chrono::{DateTime, Utc};
use sqlx::FromRow;
use sqlx::types::Json;

use sbtc_types::{
    Currency, Merchant, MerchantId, Metadata, Money, PaymentIntent, PaymentIntentId,
    PaymentIntentStatus, RepoError, WebhookEndpoint, WebhookEndpointId, WebhookEvent,
    WebhookEventId,
};

pub const MERCHANT_COLUMNS: &str =
    "id, name, default_address, recipient_address, created_at";

pub const INTENT_COLUMNS: &str = "id, merchant_id, amount, currency, amount_usd_cents, \
     description, customer_address, customer_email, metadata, tx_id, status, created_at, updated_at";

pub const ENDPOINT_COLUMNS: &str =
    "id, merchant_id, url, secret, events, is_active, created_at, updated_at";

pub const EVENT_COLUMNS: &str = "id, merchant_id, endpoint_id, event_type, resource_id, payload, \
     delivered, attempts, last_attempted_at, next_retry_at, response_status, response_body, created_at";

pub fn db_error(err: sqlx::Error) -> RepoError {
    RepoError::Database(err.to_string())
}

pub fn tx_error(err: sqlx::Error) -> RepoError {
    RepoError::Transaction(err.to_string())
}

// ─────────────────────────────────────────────────────────────────────────────
// Database row structs (derive FromRow for automatic mapping)
// ─────────────────────────────────────────────────────────────────────────────

#[derive(FromRow)]
pub struct DbMerchant {
    pub id: String,
    pub name: String,
    pub default_address: Option<String>,
    pub recipient_address: Option<String>,
    pub created_at: DateTime<Utc>,
}

#[derive(FromRow)]
pub struct DbPaymentIntent {
    pub id: String,
    pub merchant_id: String,
    pub amount: i64,
    pub currency: String,
    pub amount_usd_cents: Option<i64>,
    pub description: Option<String>,
    pub customer_address: Option<String>,
    pub customer_email: Option<String>,
    pub metadata: Json<Metadata>,
    pub tx_id: Option<String>,
    pub status: String,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

#[derive(FromRow)]
pub struct DbWebhookEndpoint {
    pub id: String,
    pub merchant_id: String,
    pub url: String,
    pub secret: String,
    pub events: Json<Vec<String>>,
    pub is_active: bool,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

#[derive(FromRow)]
pub struct DbWebhookEvent {
    pub id: String,
    pub merchant_id: String,
    pub endpoint_id: String,
    pub event_type: String,
    pub resource_id: Option<String>,
    pub payload: Json<serde_json::Value>,
    pub delivered: bool,
    pub attempts: i32,
    pub last_attempted_at: Option<DateTime<Utc>>,
    pub next_retry_at: Option<DateTime<Utc>>,
    pub response_status: Option<i32>,
    pub response_body: Option<String>,
    pub created_at: DateTime<Utc>,
}

/// Metadata row used by read-merge-write.
#[derive(FromRow)]
pub struct DbMetadata {
    pub metadata: Json<Metadata>,
}

// ─────────────────────────────────────────────────────────────────────────────
// Domain conversion
// ─────────────────────────────────────────────────────────────────────────────

impl DbMerchant {
    pub fn into_domain(self) -> Merchant {
        Merchant {
            id: MerchantId::from_raw(self.id),
            name: self.name,
            default_address: self.default_address,
            recipient_address: self.recipient_address,
            created_at: self.created_at,
        }
    }
}

impl DbPaymentIntent {
    pub fn into_domain(self) -> Result<PaymentIntent, RepoError> {
        let currency: Currency = self
            .currency
            .parse()
            .map_err(|e: sbtc_types::DomainError| RepoError::Database(e.to_string()))?;
        let status: PaymentIntentStatus = self
            .status
            .parse()
            .map_err(|e: sbtc_types::DomainError| RepoError::Database(e.to_string()))?;
        let amount = Money::positive(self.amount, currency).map_err(RepoError::Domain)?;

        Ok(PaymentIntent {
            id: PaymentIntentId::from_raw(self.id),
            merchant_id: MerchantId::from_raw(self.merchant_id),
            amount,
            amount_usd_cents: self.amount_usd_cents,
            description: self.description,
            customer_address: self.customer_address,
            customer_email: self.customer_email,
            metadata: self.metadata.0,
            tx_id: self.tx_id,
            status,
            created_at: self.created_at,
            updated_at: self.updated_at,
        })
    }
}

impl DbWebhookEndpoint {
    pub fn into_domain(self) -> WebhookEndpoint {
        WebhookEndpoint {
            id: WebhookEndpointId::from_raw(self.id),
            merchant_id: MerchantId::from_raw(self.merchant_id),
            url: self.url,
            secret: self.secret,
            events: self.events.0,
            is_active: self.is_active,
            created_at: self.created_at,
            updated_at: self.updated_at,
        }
    }
}

impl DbWebhookEvent {
    pub fn into_domain(self) -> WebhookEvent {
        WebhookEvent {
            id: WebhookEventId::from_raw(self.id),
            merchant_id: MerchantId::from_raw(self.merchant_id),
            endpoint_id: WebhookEndpointId::from_raw(self.endpoint_id),
            event_type: self.event_type,
            resource_id: self.resource_id,
            payload: self.payload.0,
            delivered: self.delivered,
            attempts: self.attempts,
            last_attempted_at: self.last_attempted_at,
            next_retry_at: self.next_retry_at,
            response_status: self.response_status,
            response_body: self.response_body,
            created_at: self.created_at,
        }
    }
}

/// Applies a partial endpoint update in memory, validating what changes.
pub fn apply_endpoint_update(
    endpoint: &mut WebhookEndpoint,
    update: &sbtc_types::UpdateWebhookRequest,
    now: DateTime<Utc>,
) -> Result<(), RepoError> {
    if let Some(url) = &update.url {
        sbtc_types::domain::webhook::validate_url(url)?;
        endpoint.url = url.clone();
    }
    if let Some(events) = &update.events {
        sbtc_types::domain::webhook::validate_events(events)?;
        endpoint.events = events.clone();
    }
    if let Some(is_active) = update.is_active {
        endpoint.is_active = is_active;
    }
    endpoint.updated_at = now;
    Ok(())
}
