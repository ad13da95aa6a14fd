//! SQLite repository adapter.
#![allow(clippy::collapsible_if)]

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use sqlx::sqlite::{SqliteConnectOptions, SqlitePoolOptions};
use sqlx::types::Json;
use sqlx::{SqliteConnection, SqlitePool};
use std::str::FromStr;

use sbtc_types::{
    AttemptRecord, GatewayRepository, Merchant, MerchantId, Metadata, PaymentIntent,
    PaymentIntentId, PaymentIntentStatus, RepoError, UpdateWebhookRequest, WebhookEndpoint,
    WebhookEndpointId, WebhookEvent, WebhookEventId,
};

use crate::security::generate_webhook_secret;
use crate::types::{
    DbMerchant, DbMetadata, DbPaymentIntent, DbWebhookEndpoint, DbWebhookEvent, ENDPOINT_COLUMNS,
    EVENT_COLUMNS, INTENT_COLUMNS, MERCHANT_COLUMNS, apply_endpoint_update, db_error, tx_error,
};

// ─────────────────────────────────────────────────────────────────────────────
// SQLite Repository
// ─────────────────────────────────────────────────────────────────────────────

/// SQLite repository implementation.
pub struct SqliteRepo {
    pool: SqlitePool,
}

impl SqliteRepo {
    /// Creates a new SQLite repository with automatic migration.
    pub async fn new(database_url: &str) -> anyhow::Result<Self> {
        let in_memory = database_url.contains(":memory:");

        // Ensure on-disk SQLite target directory exists (no-op for in-memory).
        if let Some(path) = database_url.strip_prefix("sqlite://") {
            let path = path.split('?').next().unwrap_or(path);
            if !in_memory {
                let p = std::path::Path::new(path);
                if let Some(parent) = p.parent() {
                    if !parent.as_os_str().is_empty() {
                        tokio::fs::create_dir_all(parent).await?;
                    }
                }
            }
        }

        let options = SqliteConnectOptions::from_str(database_url)?
            .create_if_missing(true)
            .foreign_keys(true);

        // A shared-cache in-memory database reports table locks instead of
        // waiting, and vanishes with its last connection: keep exactly one.
        let pool = if in_memory {
            SqlitePoolOptions::new()
                .max_connections(1)
                .idle_timeout(None)
                .max_lifetime(None)
                .connect_with(options)
                .await?
        } else {
            SqlitePool::connect_with(options).await?
        };

        let repo = Self { pool };
        repo.create_schema().await?;
        Ok(repo)
    }

    /// Returns a reference to the connection pool.
    pub fn pool(&self) -> &SqlitePool {
        &self.pool
    }

    /// Creates the database schema. Idempotent.
    pub async fn create_schema(&self) -> Result<(), RepoError> {
        sqlx::query(include_str!("../migrations/0001_create_tables.sql"))
            .execute(&self.pool)
            .await
            .map_err(db_error)?;

        sqlx::query(include_str!("../migrations/0002_create_webhooks.sql"))
            .execute(&self.pool)
            .await
            .map_err(db_error)?;

        Ok(())
    }

    async fn fetch_intent(
        conn: &mut SqliteConnection,
        id: &PaymentIntentId,
    ) -> Result<Option<PaymentIntent>, RepoError> {
        let row: Option<DbPaymentIntent> = sqlx::query_as(&format!(
            "SELECT {INTENT_COLUMNS} FROM payment_intents WHERE id = ?"
        ))
        .bind(id.as_str())
        .fetch_optional(&mut *conn)
        .await
        .map_err(db_error)?;

        row.map(DbPaymentIntent::into_domain).transpose()
    }

    async fn insert_event(
        conn: &mut SqliteConnection,
        event: &WebhookEvent,
    ) -> Result<(), RepoError> {
        sqlx::query(
            r#"INSERT INTO webhook_events
               (id, merchant_id, endpoint_id, event_type, resource_id, payload, delivered,
                attempts, last_attempted_at, next_retry_at, response_status, response_body, created_at)
               VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?)"#,
        )
        .bind(event.id.as_str())
        .bind(event.merchant_id.as_str())
        .bind(event.endpoint_id.as_str())
        .bind(&event.event_type)
        .bind(&event.resource_id)
        .bind(Json(&event.payload))
        .bind(event.delivered)
        .bind(event.attempts)
        .bind(event.last_attempted_at)
        .bind(event.next_retry_at)
        .bind(event.response_status)
        .bind(&event.response_body)
        .bind(event.created_at)
        .execute(&mut *conn)
        .await
        .map_err(db_error)?;
        Ok(())
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Repository implementation
// ─────────────────────────────────────────────────────────────────────────────

#[async_trait]
impl GatewayRepository for SqliteRepo {
    async fn create_merchant(&self, merchant: Merchant) -> Result<Merchant, RepoError> {
        sqlx::query(
            r#"INSERT INTO merchants (id, name, default_address, recipient_address, created_at)
               VALUES (?, ?, ?, ?, ?)"#,
        )
        .bind(merchant.id.as_str())
        .bind(&merchant.name)
        .bind(&merchant.default_address)
        .bind(&merchant.recipient_address)
        .bind(merchant.created_at)
        .execute(&self.pool)
        .await
        .map_err(db_error)?;

        Ok(merchant)
    }

    async fn get_merchant(&self, id: &MerchantId) -> Result<Option<Merchant>, RepoError> {
        let row: Option<DbMerchant> =
            sqlx::query_as(&format!("SELECT {MERCHANT_COLUMNS} FROM merchants WHERE id = ?"))
                .bind(id.as_str())
                .fetch_optional(&self.pool)
                .await
                .map_err(db_error)?;

        Ok(row.map(DbMerchant::into_domain))
    }

    async fn insert_payment_intent(
        &self,
        intent: PaymentIntent,
    ) -> Result<PaymentIntent, RepoError> {
        sqlx::query(
            r#"INSERT INTO payment_intents
               (id, merchant_id, amount, currency, amount_usd_cents, description, customer_address,
                customer_email, metadata, tx_id, status, created_at, updated_at)
               VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?)"#,
        )
        .bind(intent.id.as_str())
        .bind(intent.merchant_id.as_str())
        .bind(intent.amount.amount())
        .bind(intent.amount.currency().as_str())
        .bind(intent.amount_usd_cents)
        .bind(&intent.description)
        .bind(&intent.customer_address)
        .bind(&intent.customer_email)
        .bind(Json(&intent.metadata))
        .bind(&intent.tx_id)
        .bind(intent.status.as_str())
        .bind(intent.created_at)
        .bind(intent.updated_at)
        .execute(&self.pool)
        .await
        .map_err(db_error)?;

        Ok(intent)
    }

    async fn get_payment_intent(
        &self,
        id: &PaymentIntentId,
    ) -> Result<Option<PaymentIntent>, RepoError> {
        let mut conn = self.pool.acquire().await.map_err(db_error)?;
        Self::fetch_intent(&mut conn, id).await
    }

    async fn list_payment_intents(
        &self,
        merchant_id: &MerchantId,
    ) -> Result<Vec<PaymentIntent>, RepoError> {
        let rows: Vec<DbPaymentIntent> = sqlx::query_as(&format!(
            "SELECT {INTENT_COLUMNS} FROM payment_intents WHERE merchant_id = ? ORDER BY created_at DESC"
        ))
        .bind(merchant_id.as_str())
        .fetch_all(&self.pool)
        .await
        .map_err(db_error)?;

        rows.into_iter().map(DbPaymentIntent::into_domain).collect()
    }

    async fn list_payment_intents_by_status(
        &self,
        status: PaymentIntentStatus,
        limit: i64,
    ) -> Result<Vec<PaymentIntent>, RepoError> {
        let rows: Vec<DbPaymentIntent> = sqlx::query_as(&format!(
            "SELECT {INTENT_COLUMNS} FROM payment_intents WHERE status = ? ORDER BY updated_at ASC LIMIT ?"
        ))
        .bind(status.as_str())
        .bind(limit)
        .fetch_all(&self.pool)
        .await
        .map_err(db_error)?;

        rows.into_iter().map(DbPaymentIntent::into_domain).collect()
    }

    async fn commit_transition(
        &self,
        updated: &PaymentIntent,
        expected: PaymentIntentStatus,
        metadata_patch: &Metadata,
        events: &[WebhookEvent],
    ) -> Result<PaymentIntent, RepoError> {
        let mut db_tx = self.pool.begin().await.map_err(tx_error)?;

        let result = sqlx::query(
            r#"UPDATE payment_intents
               SET status = ?, tx_id = ?, customer_address = ?, updated_at = ?
               WHERE id = ? AND status = ?"#,
        )
        .bind(updated.status.as_str())
        .bind(&updated.tx_id)
        .bind(&updated.customer_address)
        .bind(updated.updated_at)
        .bind(updated.id.as_str())
        .bind(expected.as_str())
        .execute(&mut *db_tx)
        .await
        .map_err(db_error)?;

        if result.rows_affected() == 0 {
            return match Self::fetch_intent(&mut db_tx, &updated.id).await? {
                None => Err(RepoError::NotFound),
                Some(current) => {
                    tracing::debug!(
                        intent_id = %updated.id,
                        expected = %expected,
                        current = %current.status,
                        "transition guard rejected write"
                    );
                    Err(RepoError::Conflict(format!(
                        "payment intent {} is {}, expected {}",
                        updated.id, current.status, expected
                    )))
                }
            };
        }

        // The guarded UPDATE holds the row, so this read sees every
        // committed metadata merge.
        if !metadata_patch.is_empty() {
            let row: DbMetadata = sqlx::query_as(r#"SELECT metadata FROM payment_intents WHERE id = ?"#)
                .bind(updated.id.as_str())
                .fetch_one(&mut *db_tx)
                .await
                .map_err(db_error)?;
            let mut metadata = row.metadata.0;
            metadata.merge(metadata_patch);

            sqlx::query(r#"UPDATE payment_intents SET metadata = ? WHERE id = ?"#)
                .bind(Json(&metadata))
                .bind(updated.id.as_str())
                .execute(&mut *db_tx)
                .await
                .map_err(db_error)?;
        }

        for event in events {
            Self::insert_event(&mut db_tx, event).await?;
        }

        let stored = Self::fetch_intent(&mut db_tx, &updated.id)
            .await?
            .ok_or(RepoError::NotFound)?;
        db_tx.commit().await.map_err(tx_error)?;
        Ok(stored)
    }

    async fn merge_payment_intent_metadata(
        &self,
        id: &PaymentIntentId,
        patch: &Metadata,
    ) -> Result<PaymentIntent, RepoError> {
        let mut db_tx = self.pool.begin().await.map_err(tx_error)?;

        let row: Option<DbMetadata> =
            sqlx::query_as(r#"SELECT metadata FROM payment_intents WHERE id = ?"#)
                .bind(id.as_str())
                .fetch_optional(&mut *db_tx)
                .await
                .map_err(db_error)?;
        let mut metadata = row.ok_or(RepoError::NotFound)?.metadata.0;
        metadata.merge(patch);

        sqlx::query(r#"UPDATE payment_intents SET metadata = ?, updated_at = ? WHERE id = ?"#)
            .bind(Json(&metadata))
            .bind(Utc::now())
            .bind(id.as_str())
            .execute(&mut *db_tx)
            .await
            .map_err(db_error)?;

        let intent = Self::fetch_intent(&mut db_tx, id)
            .await?
            .ok_or(RepoError::NotFound)?;
        db_tx.commit().await.map_err(tx_error)?;
        Ok(intent)
    }

    async fn register_webhook_endpoint(
        &self,
        merchant_id: &MerchantId,
        url: &str,
        events: &[String],
    ) -> Result<WebhookEndpoint, RepoError> {
        let endpoint = WebhookEndpoint::new(
            merchant_id.clone(),
            url,
            events.to_vec(),
            generate_webhook_secret(),
        )?;

        sqlx::query(
            r#"INSERT INTO webhook_endpoints
               (id, merchant_id, url, secret, events, is_active, created_at, updated_at)
               VALUES (?, ?, ?, ?, ?, ?, ?, ?)"#,
        )
        .bind(endpoint.id.as_str())
        .bind(endpoint.merchant_id.as_str())
        .bind(&endpoint.url)
        .bind(&endpoint.secret)
        .bind(Json(&endpoint.events))
        .bind(endpoint.is_active)
        .bind(endpoint.created_at)
        .bind(endpoint.updated_at)
        .execute(&self.pool)
        .await
        .map_err(db_error)?;

        Ok(endpoint)
    }

    async fn get_webhook_endpoint(
        &self,
        id: &WebhookEndpointId,
    ) -> Result<Option<WebhookEndpoint>, RepoError> {
        let row: Option<DbWebhookEndpoint> = sqlx::query_as(&format!(
            "SELECT {ENDPOINT_COLUMNS} FROM webhook_endpoints WHERE id = ?"
        ))
        .bind(id.as_str())
        .fetch_optional(&self.pool)
        .await
        .map_err(db_error)?;

        Ok(row.map(DbWebhookEndpoint::into_domain))
    }

    async fn list_webhook_endpoints(
        &self,
        merchant_id: &MerchantId,
    ) -> Result<Vec<WebhookEndpoint>, RepoError> {
        let rows: Vec<DbWebhookEndpoint> = sqlx::query_as(&format!(
            "SELECT {ENDPOINT_COLUMNS} FROM webhook_endpoints WHERE merchant_id = ? ORDER BY created_at ASC"
        ))
        .bind(merchant_id.as_str())
        .fetch_all(&self.pool)
        .await
        .map_err(db_error)?;

        Ok(rows.into_iter().map(DbWebhookEndpoint::into_domain).collect())
    }

    async fn list_subscribed_endpoints(
        &self,
        merchant_id: &MerchantId,
        event_type: &str,
    ) -> Result<Vec<WebhookEndpoint>, RepoError> {
        let rows: Vec<DbWebhookEndpoint> = sqlx::query_as(&format!(
            "SELECT {ENDPOINT_COLUMNS} FROM webhook_endpoints \
             WHERE merchant_id = ? AND is_active = 1 ORDER BY created_at ASC"
        ))
        .bind(merchant_id.as_str())
        .fetch_all(&self.pool)
        .await
        .map_err(db_error)?;

        Ok(rows
            .into_iter()
            .map(DbWebhookEndpoint::into_domain)
            .filter(|endpoint| endpoint.is_subscribed(event_type))
            .collect())
    }

    async fn update_webhook_endpoint(
        &self,
        id: &WebhookEndpointId,
        update: &UpdateWebhookRequest,
    ) -> Result<WebhookEndpoint, RepoError> {
        let mut db_tx = self.pool.begin().await.map_err(tx_error)?;

        let row: Option<DbWebhookEndpoint> = sqlx::query_as(&format!(
            "SELECT {ENDPOINT_COLUMNS} FROM webhook_endpoints WHERE id = ?"
        ))
        .bind(id.as_str())
        .fetch_optional(&mut *db_tx)
        .await
        .map_err(db_error)?;
        let mut endpoint = row.ok_or(RepoError::NotFound)?.into_domain();
        apply_endpoint_update(&mut endpoint, update, Utc::now())?;

        sqlx::query(
            r#"UPDATE webhook_endpoints SET url = ?, events = ?, is_active = ?, updated_at = ?
               WHERE id = ?"#,
        )
        .bind(&endpoint.url)
        .bind(Json(&endpoint.events))
        .bind(endpoint.is_active)
        .bind(endpoint.updated_at)
        .bind(id.as_str())
        .execute(&mut *db_tx)
        .await
        .map_err(db_error)?;

        db_tx.commit().await.map_err(tx_error)?;
        Ok(endpoint)
    }

    async fn delete_webhook_endpoint(&self, id: &WebhookEndpointId) -> Result<bool, RepoError> {
        let mut db_tx = self.pool.begin().await.map_err(tx_error)?;

        sqlx::query(r#"DELETE FROM webhook_events WHERE endpoint_id = ? AND delivered = 0"#)
            .bind(id.as_str())
            .execute(&mut *db_tx)
            .await
            .map_err(db_error)?;

        let result = sqlx::query(r#"DELETE FROM webhook_endpoints WHERE id = ?"#)
            .bind(id.as_str())
            .execute(&mut *db_tx)
            .await
            .map_err(db_error)?;

        db_tx.commit().await.map_err(tx_error)?;
        Ok(result.rows_affected() > 0)
    }

    async fn insert_webhook_events(&self, events: &[WebhookEvent]) -> Result<(), RepoError> {
        let mut db_tx = self.pool.begin().await.map_err(tx_error)?;
        for event in events {
            Self::insert_event(&mut db_tx, event).await?;
        }
        db_tx.commit().await.map_err(tx_error)?;
        Ok(())
    }

    async fn get_webhook_event(
        &self,
        id: &WebhookEventId,
    ) -> Result<Option<WebhookEvent>, RepoError> {
        let row: Option<DbWebhookEvent> =
            sqlx::query_as(&format!("SELECT {EVENT_COLUMNS} FROM webhook_events WHERE id = ?"))
                .bind(id.as_str())
                .fetch_optional(&self.pool)
                .await
                .map_err(db_error)?;

        Ok(row.map(DbWebhookEvent::into_domain))
    }

    async fn list_webhook_events(
        &self,
        merchant_id: &MerchantId,
        limit: i64,
    ) -> Result<Vec<WebhookEvent>, RepoError> {
        let rows: Vec<DbWebhookEvent> = sqlx::query_as(&format!(
            "SELECT {EVENT_COLUMNS} FROM webhook_events WHERE merchant_id = ? \
             ORDER BY created_at DESC LIMIT ?"
        ))
        .bind(merchant_id.as_str())
        .bind(limit)
        .fetch_all(&self.pool)
        .await
        .map_err(db_error)?;

        Ok(rows.into_iter().map(DbWebhookEvent::into_domain).collect())
    }

    async fn list_due_webhook_events(
        &self,
        now: DateTime<Utc>,
        max_attempts: i32,
        limit: i64,
    ) -> Result<Vec<WebhookEvent>, RepoError> {
        let rows: Vec<DbWebhookEvent> = sqlx::query_as(&format!(
            "SELECT {EVENT_COLUMNS} FROM webhook_events \
             WHERE delivered = 0 AND attempts < ? AND (next_retry_at IS NULL OR next_retry_at <= ?) \
             ORDER BY created_at ASC LIMIT ?"
        ))
        .bind(max_attempts)
        .bind(now)
        .bind(limit)
        .fetch_all(&self.pool)
        .await
        .map_err(db_error)?;

        Ok(rows.into_iter().map(DbWebhookEvent::into_domain).collect())
    }

    async fn claim_webhook_event(
        &self,
        id: &WebhookEventId,
        now: DateTime<Utc>,
        lease_until: DateTime<Utc>,
        ceiling: Option<i32>,
    ) -> Result<Option<WebhookEvent>, RepoError> {
        let row: Option<DbWebhookEvent> = sqlx::query_as(&format!(
            "UPDATE webhook_events SET next_retry_at = ? \
             WHERE id = ? AND delivered = 0 \
               AND (next_retry_at IS NULL OR next_retry_at <= ?) \
               AND (? IS NULL OR attempts < ?) \
             RETURNING {EVENT_COLUMNS}"
        ))
        .bind(lease_until)
        .bind(id.as_str())
        .bind(now)
        .bind(ceiling)
        .bind(ceiling)
        .fetch_optional(&self.pool)
        .await
        .map_err(db_error)?;

        Ok(row.map(DbWebhookEvent::into_domain))
    }

    async fn record_webhook_attempt(
        &self,
        id: &WebhookEventId,
        record: &AttemptRecord,
        max_attempts: i32,
    ) -> Result<WebhookEvent, RepoError> {
        let row: Option<DbWebhookEvent> = sqlx::query_as(&format!(
            "UPDATE webhook_events SET \
               delivered = ?, \
               attempts = CASE WHEN attempts < ? THEN attempts + 1 ELSE attempts END, \
               last_attempted_at = ?, \
               next_retry_at = CASE WHEN attempts + 1 >= ? THEN NULL ELSE ? END, \
               response_status = ?, response_body = ? \
             WHERE id = ? AND delivered = 0 \
             RETURNING {EVENT_COLUMNS}"
        ))
        .bind(record.delivered)
        .bind(max_attempts)
        .bind(record.attempted_at)
        .bind(max_attempts)
        .bind(record.next_retry_at)
        .bind(record.response_status)
        .bind(&record.response_body)
        .bind(id.as_str())
        .fetch_optional(&self.pool)
        .await
        .map_err(db_error)?;

        match row {
            Some(row) => Ok(row.into_domain()),
            None => match self.get_webhook_event(id).await? {
                None => Err(RepoError::NotFound),
                Some(_) => Err(RepoError::Conflict(format!(
                    "webhook event {} already delivered",
                    id
                ))),
            },
        }
    }

    async fn reset_webhook_retry(&self, id: &WebhookEventId) -> Result<bool, RepoError> {
        let result = sqlx::query(
            r#"UPDATE webhook_events SET next_retry_at = NULL WHERE id = ? AND delivered = 0"#,
        )
        .bind(id.as_str())
        .execute(&self.pool)
        .await
        .map_err(db_error)?;

        Ok(result.rows_affected() > 0)
    }
}
