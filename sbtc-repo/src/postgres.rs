//! PostgreSQL repository adapter.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use sqlx::types::Json;
use sqlx::{PgConnection, PgPool};

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
// PostgreSQL Repository
// ─────────────────────────────────────────────────────────────────────────────

/// PostgreSQL repository with row-level locking.
pub struct PostgresRepo {
    pool: PgPool,
}

/// Executes SQL statements from a migration file, splitting by semicolons.
async fn execute_migration(pool: &PgPool, sql: &str, name: &str) -> Result<(), anyhow::Error> {
    for statement in sql.split(';') {
        let stmt = statement.trim();
        if !stmt.is_empty() {
            sqlx::query(stmt)
                .execute(pool)
                .await
                .map_err(|e| anyhow::anyhow!("Migration {} failed: {}", name, e))?;
        }
    }
    Ok(())
}

/// Runs all database migrations.
async fn run_migrations(pool: &PgPool) -> Result<(), anyhow::Error> {
    execute_migration(
        pool,
        include_str!("../migrations/0001_create_tables_pg.sql"),
        "0001",
    )
    .await?;

    execute_migration(
        pool,
        include_str!("../migrations/0002_create_webhooks_pg.sql"),
        "0002",
    )
    .await?;

    Ok(())
}

impl PostgresRepo {
    /// Creates a new PostgreSQL repository with automatic migration.
    pub async fn new(database_url: &str) -> anyhow::Result<Self> {
        let pool = PgPool::connect(database_url).await?;
        run_migrations(&pool).await?;
        Ok(Self { pool })
    }

    /// Returns a reference to the connection pool.
    pub fn pool(&self) -> &PgPool {
        &self.pool
    }

    async fn fetch_intent(
        conn: &mut PgConnection,
        id: &PaymentIntentId,
    ) -> Result<Option<PaymentIntent>, RepoError> {
        let row: Option<DbPaymentIntent> = sqlx::query_as(&format!(
            "SELECT {INTENT_COLUMNS} FROM payment_intents WHERE id = $1"
        ))
        .bind(id.as_str())
        .fetch_optional(&mut *conn)
        .await
        .map_err(db_error)?;

        row.map(DbPaymentIntent::into_domain).transpose()
    }

    async fn insert_event(conn: &mut PgConnection, event: &WebhookEvent) -> Result<(), RepoError> {
        sqlx::query(
            r#"INSERT INTO webhook_events
               (id, merchant_id, endpoint_id, event_type, resource_id, payload, delivered,
                attempts, last_attempted_at, next_retry_at, response_status, response_body, created_at)
               VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11, $12, $13)"#,
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
impl GatewayRepository for PostgresRepo {
    async fn create_merchant(&self, merchant: Merchant) -> Result<Merchant, RepoError> {
        sqlx::query(
            r#"INSERT INTO merchants (id, name, default_address, recipient_address, created_at)
               VALUES ($1, $2, $3, $4, $5)"#,
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
            sqlx::query_as(&format!("SELECT {MERCHANT_COLUMNS} FROM merchants WHERE id = $1"))
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
               VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11, $12, $13)"#,
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
            "SELECT {INTENT_COLUMNS} FROM payment_intents WHERE merchant_id = $1 ORDER BY created_at DESC"
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
            "SELECT {INTENT_COLUMNS} FROM payment_intents WHERE status = $1 ORDER BY updated_at ASC LIMIT $2"
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
               SET status = $1, tx_id = $2, customer_address = $3, updated_at = $4
               WHERE id = $5 AND status = $6"#,
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
            let row: DbMetadata = sqlx::query_as(r#"SELECT metadata FROM payment_intents WHERE id = $1"#)
                .bind(updated.id.as_str())
                .fetch_one(&mut *db_tx)
                .await
                .map_err(db_error)?;
            let mut metadata = row.metadata.0;
            metadata.merge(metadata_patch);

            sqlx::query(r#"UPDATE payment_intents SET metadata = $1 WHERE id = $2"#)
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
            sqlx::query_as(r#"SELECT metadata FROM payment_intents WHERE id = $1 FOR UPDATE"#)
                .bind(id.as_str())
                .fetch_optional(&mut *db_tx)
                .await
                .map_err(db_error)?;
        let mut metadata = row.ok_or(RepoError::NotFound)?.metadata.0;
        metadata.merge(patch);

        sqlx::query(r#"UPDATE payment_intents SET metadata = $1, updated_at = $2 WHERE id = $3"#)
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
               VALUES ($1, $2, $3, $4, $5, $6, $7, $8)"#,
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
            "SELECT {ENDPOINT_COLUMNS} FROM webhook_endpoints WHERE id = $1"
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
            "SELECT {ENDPOINT_COLUMNS} FROM webhook_endpoints WHERE merchant_id = $1 ORDER BY created_at ASC"
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
             WHERE merchant_id = $1 AND is_active = TRUE \
               AND (events ? $2 OR events ? '*') \
             ORDER BY created_at ASC"
        ))
        .bind(merchant_id.as_str())
        .bind(event_type)
        .fetch_all(&self.pool)
        .await
        .map_err(db_error)?;

        Ok(rows.into_iter().map(DbWebhookEndpoint::into_domain).collect())
    }

    async fn update_webhook_endpoint(
        &self,
        id: &WebhookEndpointId,
        update: &UpdateWebhookRequest,
    ) -> Result<WebhookEndpoint, RepoError> {
        let mut db_tx = self.pool.begin().await.map_err(tx_error)?;

        let row: Option<DbWebhookEndpoint> = sqlx::query_as(&format!(
            "SELECT {ENDPOINT_COLUMNS} FROM webhook_endpoints WHERE id = $1 FOR UPDATE"
        ))
        .bind(id.as_str())
        .fetch_optional(&mut *db_tx)
        .await
        .map_err(db_error)?;
        let mut endpoint = row.ok_or(RepoError::NotFound)?.into_domain();
        apply_endpoint_update(&mut endpoint, update, Utc::now())?;

        sqlx::query(
            r#"UPDATE webhook_endpoints SET url = $1, events = $2, is_active = $3, updated_at = $4
               WHERE id = $5"#,
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

        sqlx::query(r#"DELETE FROM webhook_events WHERE endpoint_id = $1 AND delivered = FALSE"#)
            .bind(id.as_str())
            .execute(&mut *db_tx)
            .await
            .map_err(db_error)?;

        let result = sqlx::query(r#"DELETE FROM webhook_endpoints WHERE id = $1"#)
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
            sqlx::query_as(&format!("SELECT {EVENT_COLUMNS} FROM webhook_events WHERE id = $1"))
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
            "SELECT {EVENT_COLUMNS} FROM webhook_events WHERE merchant_id = $1 \
             ORDER BY created_at DESC LIMIT $2"
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
             WHERE delivered = FALSE AND attempts < $1 \
               AND (next_retry_at IS NULL OR next_retry_at <= $2) \
             ORDER BY created_at ASC LIMIT $3"
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
            "UPDATE webhook_events SET next_retry_at = $1 \
             WHERE id = $2 AND delivered = FALSE \
               AND (next_retry_at IS NULL OR next_retry_at <= $3) \
               AND ($4::INTEGER IS NULL OR attempts < $4) \
             RETURNING {EVENT_COLUMNS}"
        ))
        .bind(lease_until)
        .bind(id.as_str())
        .bind(now)
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
               delivered = $1, \
               attempts = CASE WHEN attempts < $2 THEN attempts + 1 ELSE attempts END, \
               last_attempted_at = $3, \
               next_retry_at = CASE WHEN attempts + 1 >= $2 THEN NULL ELSE $4 END, \
               response_status = $5, response_body = $6 \
             WHERE id = $7 AND delivered = FALSE \
             RETURNING {EVENT_COLUMNS}"
        ))
        .bind(record.delivered)
        .bind(max_attempts)
        .bind(record.attempted_at)
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
            r#"UPDATE webhook_events SET next_retry_at = NULL WHERE id = $1 AND delivered = FALSE"#,
        )
        .bind(id.as_str())
        .execute(&self.pool)
        .await
        .map_err(db_error)?;

        Ok(result.rows_affected() > 0)
    }
}
