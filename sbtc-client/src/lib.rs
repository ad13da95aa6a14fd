//! # sBTC Client SDK
//!
//! A typed Rust client for the sBTC payment gateway API.

use reqwest::{Client, Method, StatusCode};
use serde::Serialize;
use serde::de::DeserializeOwned;

use sbtc_types::{
    ConfirmPaymentIntentRequest, CreateMerchantRequest, CreatePaymentIntentRequest,
    EmittedEventsResponse, FailPaymentIntentRequest, HealthResponse, Merchant, MerchantId,
    Metadata, PaymentIntent, PaymentIntentId, ReconcileResponse, RegisterWebhookRequest,
    SendTestEventRequest, SettlePaymentIntentRequest, UpdateMetadataRequest,
    UpdateWebhookRequest, WebhookEndpointId, WebhookEventId, WebhookEventView, WebhookResponse,
};

/// Error type for client operations.
#[derive(Debug, thiserror::Error)]
pub enum ClientError {
    #[error("HTTP error: {0}")]
    Http(#[from] reqwest::Error),

    #[error("API error: {status} - {message}")]
    Api {
        status: u16,
        /// Machine-readable error code, e.g. `invalid_state`.
        code: Option<String>,
        message: String,
    },

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),
}

impl ClientError {
    /// HTTP status of an API error.
    pub fn status(&self) -> Option<u16> {
        match self {
            ClientError::Api { status, .. } => Some(*status),
            _ => None,
        }
    }
}

/// Gateway API client.
pub struct SbtcClient {
    base_url: String,
    http: Client,
}

impl SbtcClient {
    /// Creates a new client.
    pub fn new(base_url: impl Into<String>) -> Self {
        Self {
            base_url: base_url.into().trim_end_matches('/').to_string(),
            http: Client::new(),
        }
    }

    pub fn base_url(&self) -> &str {
        &self.base_url
    }

    pub async fn health(&self) -> Result<HealthResponse, ClientError> {
        self.get("/health").await
    }

    // ─────────────────────────────────────────────────────────────────────────
    // Merchants
    // ─────────────────────────────────────────────────────────────────────────

    pub async fn create_merchant(
        &self,
        req: &CreateMerchantRequest,
    ) -> Result<Merchant, ClientError> {
        self.post("/api/merchants", req).await
    }

    pub async fn get_merchant(&self, id: &MerchantId) -> Result<Merchant, ClientError> {
        self.get(&format!("/api/merchants/{}", id)).await
    }

    // ─────────────────────────────────────────────────────────────────────────
    // Payment intents
    // ─────────────────────────────────────────────────────────────────────────

    pub async fn create_payment_intent(
        &self,
        req: &CreatePaymentIntentRequest,
    ) -> Result<PaymentIntent, ClientError> {
        self.post("/api/payment_intents", req).await
    }

    pub async fn get_payment_intent(
        &self,
        id: &PaymentIntentId,
    ) -> Result<PaymentIntent, ClientError> {
        self.get(&format!("/api/payment_intents/{}", id)).await
    }

    pub async fn list_payment_intents(
        &self,
        merchant_id: &MerchantId,
    ) -> Result<Vec<PaymentIntent>, ClientError> {
        self.get(&format!("/api/payment_intents?merchant_id={}", merchant_id))
            .await
    }

    pub async fn confirm(
        &self,
        id: &PaymentIntentId,
        customer_address: Option<String>,
    ) -> Result<PaymentIntent, ClientError> {
        self.post(
            &format!("/api/payment_intents/{}/confirm", id),
            &ConfirmPaymentIntentRequest { customer_address },
        )
        .await
    }

    pub async fn settle(
        &self,
        id: &PaymentIntentId,
        tx_id: impl Into<String>,
        customer_address: Option<String>,
    ) -> Result<PaymentIntent, ClientError> {
        self.post(
            &format!("/api/payment_intents/{}/settle", id),
            &SettlePaymentIntentRequest {
                tx_id: tx_id.into(),
                customer_address,
            },
        )
        .await
    }

    pub async fn fail(
        &self,
        id: &PaymentIntentId,
        reason: impl Into<String>,
    ) -> Result<PaymentIntent, ClientError> {
        self.post(
            &format!("/api/payment_intents/{}/fail", id),
            &FailPaymentIntentRequest {
                reason: reason.into(),
            },
        )
        .await
    }

    pub async fn cancel(&self, id: &PaymentIntentId) -> Result<PaymentIntent, ClientError> {
        self.send(Method::POST, &format!("/api/payment_intents/{}/cancel", id), None::<&()>)
            .await
    }

    pub async fn update_metadata(
        &self,
        id: &PaymentIntentId,
        metadata: Metadata,
    ) -> Result<PaymentIntent, ClientError> {
        self.send(
            Method::PATCH,
            &format!("/api/payment_intents/{}/metadata", id),
            Some(&UpdateMetadataRequest { metadata }),
        )
        .await
    }

    /// Asks the gateway to look for a settling transfer on chain.
    pub async fn reconcile(&self, id: &PaymentIntentId) -> Result<ReconcileResponse, ClientError> {
        self.send(
            Method::POST,
            &format!("/api/payment_intents/{}/reconcile", id),
            None::<&()>,
        )
        .await
    }

    // ─────────────────────────────────────────────────────────────────────────
    // Webhooks
    // ─────────────────────────────────────────────────────────────────────────

    /// Registers an endpoint. The response carries the signing secret.
    pub async fn register_webhook(
        &self,
        req: &RegisterWebhookRequest,
    ) -> Result<WebhookResponse, ClientError> {
        self.post("/api/webhooks", req).await
    }

    pub async fn list_webhooks(
        &self,
        merchant_id: &MerchantId,
    ) -> Result<Vec<WebhookResponse>, ClientError> {
        self.get(&format!("/api/webhooks?merchant_id={}", merchant_id))
            .await
    }

    pub async fn update_webhook(
        &self,
        id: &WebhookEndpointId,
        req: &UpdateWebhookRequest,
    ) -> Result<WebhookResponse, ClientError> {
        self.send(Method::PATCH, &format!("/api/webhooks/{}", id), Some(req))
            .await
    }

    pub async fn delete_webhook(&self, id: &WebhookEndpointId) -> Result<(), ClientError> {
        let resp = self
            .http
            .delete(format!("{}/api/webhooks/{}", self.base_url, id))
            .send()
            .await?;
        if resp.status().is_success() {
            Ok(())
        } else {
            Err(api_error(resp.status(), &resp.text().await.unwrap_or_default()))
        }
    }

    pub async fn send_test_event(
        &self,
        id: &WebhookEndpointId,
        event_type: Option<String>,
    ) -> Result<Vec<WebhookEventId>, ClientError> {
        let resp: EmittedEventsResponse = self
            .post(
                &format!("/api/webhooks/{}/test", id),
                &SendTestEventRequest { event_type },
            )
            .await?;
        Ok(resp.event_ids)
    }

    // ─────────────────────────────────────────────────────────────────────────
    // Webhook events
    // ─────────────────────────────────────────────────────────────────────────

    pub async fn list_events(
        &self,
        merchant_id: &MerchantId,
        limit: Option<i64>,
    ) -> Result<Vec<WebhookEventView>, ClientError> {
        let mut path = format!("/api/webhook_events?merchant_id={}", merchant_id);
        if let Some(limit) = limit {
            path.push_str(&format!("&limit={}", limit));
        }
        self.get(&path).await
    }

    pub async fn get_event(&self, id: &WebhookEventId) -> Result<WebhookEventView, ClientError> {
        self.get(&format!("/api/webhook_events/{}", id)).await
    }

    /// Schedules one more delivery attempt for an undelivered event.
    pub async fn retry_event(&self, id: &WebhookEventId) -> Result<WebhookEventView, ClientError> {
        self.send(
            Method::POST,
            &format!("/api/webhook_events/{}/retry", id),
            None::<&()>,
        )
        .await
    }

    async fn get<T: DeserializeOwned>(&self, path: &str) -> Result<T, ClientError> {
        self.send(Method::GET, path, None::<&()>).await
    }

    async fn post<T: DeserializeOwned, B: Serialize>(
        &self,
        path: &str,
        body: &B,
    ) -> Result<T, ClientError> {
        self.send(Method::POST, path, Some(body)).await
    }

    async fn send<T: DeserializeOwned, B: Serialize>(
        &self,
        method: Method,
        path: &str,
        body: Option<&B>,
    ) -> Result<T, ClientError> {
        let mut req = self
            .http
            .request(method, format!("{}{}", self.base_url, path));
        if let Some(body) = body {
            req = req.json(body);
        }
        let resp = req.send().await?;
        self.handle_response(resp).await
    }

    async fn handle_response<T: DeserializeOwned>(
        &self,
        resp: reqwest::Response,
    ) -> Result<T, ClientError> {
        let status = resp.status();
        if status.is_success() {
            let body = resp.text().await?;
            Ok(serde_json::from_str(&body)?)
        } else {
            let body = resp.text().await.unwrap_or_default();
            Err(api_error(status, &body))
        }
    }
}

/// Reads the gateway's `{error, code}` body, falling back to the raw text.
fn api_error(status: StatusCode, body: &str) -> ClientError {
    let parsed = serde_json::from_str::<serde_json::Value>(body).ok();
    let field = |name: &str| {
        parsed
            .as_ref()
            .and_then(|v| v.get(name))
            .and_then(|v| v.as_str())
            .map(String::from)
    };

    ClientError::Api {
        status: status.as_u16(),
        code: field("code"),
        message: field("error").unwrap_or_else(|| body.to_string()),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    use axum::{Json, Router, http::StatusCode as AxumStatus, routing::post};
    use serde_json::json;

    #[test]
    fn test_client_creation() {
        let client = SbtcClient::new("http://localhost:3000");
        assert_eq!(client.base_url(), "http://localhost:3000");
    }

    #[test]
    fn test_client_with_trailing_slash() {
        let client = SbtcClient::new("http://localhost:3000/");
        assert_eq!(client.base_url(), "http://localhost:3000");
    }

    #[test]
    fn test_api_error_reads_code() {
        let err = api_error(
            StatusCode::CONFLICT,
            r#"{"error":"Invalid state: already succeeded","code":"invalid_state"}"#,
        );
        match err {
            ClientError::Api {
                status,
                code,
                message,
            } => {
                assert_eq!(status, 409);
                assert_eq!(code.as_deref(), Some("invalid_state"));
                assert!(message.contains("already succeeded"));
            }
            other => panic!("unexpected error: {:?}", other),
        }
    }

    #[test]
    fn test_api_error_falls_back_to_body() {
        let err = api_error(StatusCode::BAD_GATEWAY, "upstream down");
        assert_eq!(err.status(), Some(502));
        assert!(err.to_string().contains("upstream down"));
    }

    #[tokio::test]
    async fn test_retry_conflict_surfaces_as_api_error() {
        let app = Router::new().route(
            "/api/webhook_events/{id}/retry",
            post(|| async {
                (
                    AxumStatus::CONFLICT,
                    Json(json!({"error": "already delivered", "code": "invalid_state"})),
                )
            }),
        );
        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        tokio::spawn(async move {
            axum::serve(listener, app).await.unwrap();
        });

        let client = SbtcClient::new(format!("http://{}", addr));
        let err = client
            .retry_event(&WebhookEventId::from_raw("evt_1"))
            .await
            .unwrap_err();
        assert_eq!(err.status(), Some(409));
    }
}
