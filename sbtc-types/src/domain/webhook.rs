//! Webhook endpoints, events, and delivery bookkeeping.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use utoipa::ToSchema;

use super::ids::{MerchantId, WebhookEndpointId, WebhookEventId};
use crate::error::DomainError;

/// Event type names emitted by the gateway.
pub mod event_types {
    pub const PAYMENT_INTENT_CREATED: &str = "payment_intent.created";
    pub const PAYMENT_INTENT_PENDING: &str = "payment_intent.pending";
    pub const PAYMENT_INTENT_SUCCEEDED: &str = "payment_intent.succeeded";
    pub const PAYMENT_INTENT_FAILED: &str = "payment_intent.failed";
    pub const PAYMENT_INTENT_CANCELED: &str = "payment_intent.canceled";

    /// Subscribes an endpoint to every type.
    pub const WILDCARD: &str = "*";

    pub const ALL: &[&str] = &[
        PAYMENT_INTENT_CREATED,
        PAYMENT_INTENT_PENDING,
        PAYMENT_INTENT_SUCCEEDED,
        PAYMENT_INTENT_FAILED,
        PAYMENT_INTENT_CANCELED,
    ];

    pub fn is_known(event_type: &str) -> bool {
        ALL.contains(&event_type)
    }
}

/// Upper bound on the stored copy of a merchant's response body.
pub const MAX_RESPONSE_BODY_BYTES: usize = 1000;

/// Cuts `body` to at most [`MAX_RESPONSE_BODY_BYTES`] without splitting a
/// UTF-8 sequence.
pub fn truncate_body(body: &str) -> String {
    if body.len() <= MAX_RESPONSE_BODY_BYTES {
        return body.to_string();
    }
    let mut end = MAX_RESPONSE_BODY_BYTES;
    while !body.is_char_boundary(end) {
        end -= 1;
    }
    body[..end].to_string()
}

/// A merchant-owned delivery target.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, ToSchema)]
pub struct WebhookEndpoint {
    pub id: WebhookEndpointId,
    pub merchant_id: MerchantId,
    pub url: String,
    /// Signing secret. Generated once, never rotated in place.
    pub secret: String,
    pub events: Vec<String>,
    pub is_active: bool,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl WebhookEndpoint {
    pub fn new(
        merchant_id: MerchantId,
        url: impl Into<String>,
        events: Vec<String>,
        secret: impl Into<String>,
    ) -> Result<Self, DomainError> {
        let url = url.into();
        validate_url(&url)?;
        validate_events(&events)?;

        let now = Utc::now();
        Ok(Self {
            id: WebhookEndpointId::new(),
            merchant_id,
            url,
            secret: secret.into(),
            events,
            is_active: true,
            created_at: now,
            updated_at: now,
        })
    }

    pub fn is_subscribed(&self, event_type: &str) -> bool {
        self.events
            .iter()
            .any(|e| e == event_type || e == event_types::WILDCARD)
    }

    /// Active and subscribed to `event_type`.
    pub fn accepts(&self, event_type: &str) -> bool {
        self.is_active && self.is_subscribed(event_type)
    }
}

/// Endpoint URLs must be absolute http(s) URLs with a host.
pub fn validate_url(url: &str) -> Result<(), DomainError> {
    let rest = url
        .strip_prefix("https://")
        .or_else(|| url.strip_prefix("http://"))
        .ok_or_else(|| {
            DomainError::ValidationError(format!("Webhook URL must be http(s): {}", url))
        })?;
    if rest.is_empty() || rest.starts_with('/') {
        return Err(DomainError::ValidationError(format!(
            "Webhook URL has no host: {}",
            url
        )));
    }
    Ok(())
}

/// At least one subscription, each a known type or the wildcard.
pub fn validate_events(events: &[String]) -> Result<(), DomainError> {
    if events.is_empty() {
        return Err(DomainError::ValidationError(
            "Webhook endpoint must subscribe to at least one event type".into(),
        ));
    }
    if let Some(unknown) = events
        .iter()
        .find(|e| e.as_str() != event_types::WILDCARD && !event_types::is_known(e))
    {
        return Err(DomainError::ValidationError(format!(
            "Unknown event type: {}",
            unknown
        )));
    }
    Ok(())
}

/// Derived delivery state of an event.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, ToSchema)]
#[serde(rename_all = "snake_case")]
pub enum DeliveryState {
    Pending,
    Delivered,
    /// Retry ceiling reached without success.
    Abandoned,
}

impl DeliveryState {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Pending => "pending",
            Self::Delivered => "delivered",
            Self::Abandoned => "abandoned",
        }
    }
}

impl std::fmt::Display for DeliveryState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// One delivery obligation: a payload snapshot bound to one endpoint.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, ToSchema)]
pub struct WebhookEvent {
    pub id: WebhookEventId,
    pub merchant_id: MerchantId,
    pub endpoint_id: WebhookEndpointId,
    pub event_type: String,
    /// Id of the resource the payload describes, when there is one.
    pub resource_id: Option<String>,
    /// Snapshot taken at emission time. Never re-read from the resource.
    #[schema(value_type = Object)]
    pub payload: serde_json::Value,
    pub delivered: bool,
    pub attempts: i32,
    pub last_attempted_at: Option<DateTime<Utc>>,
    pub next_retry_at: Option<DateTime<Utc>>,
    pub response_status: Option<i32>,
    pub response_body: Option<String>,
    pub created_at: DateTime<Utc>,
}

impl WebhookEvent {
    pub fn new(
        merchant_id: MerchantId,
        endpoint_id: WebhookEndpointId,
        event_type: impl Into<String>,
        resource_id: Option<String>,
        payload: serde_json::Value,
    ) -> Self {
        Self {
            id: WebhookEventId::new(),
            merchant_id,
            endpoint_id,
            event_type: event_type.into(),
            resource_id,
            payload,
            delivered: false,
            attempts: 0,
            last_attempted_at: None,
            next_retry_at: None,
            response_status: None,
            response_body: None,
            created_at: Utc::now(),
        }
    }

    pub fn state(&self, max_attempts: i32) -> DeliveryState {
        if self.delivered {
            DeliveryState::Delivered
        } else if self.attempts >= max_attempts {
            DeliveryState::Abandoned
        } else {
            DeliveryState::Pending
        }
    }

    /// Eligible for an automatic attempt at `now`.
    pub fn is_due(&self, now: DateTime<Utc>, max_attempts: i32) -> bool {
        !self.delivered
            && self.attempts < max_attempts
            && self.next_retry_at.is_none_or(|at| at <= now)
    }

    /// The outbound request body.
    pub fn envelope(&self) -> WebhookEnvelope {
        WebhookEnvelope {
            id: self.id.clone(),
            event_type: self.event_type.clone(),
            data: self.payload.clone(),
            created: self.created_at.timestamp(),
        }
    }
}

/// JSON body POSTed to merchant endpoints.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, ToSchema)]
pub struct WebhookEnvelope {
    pub id: WebhookEventId,
    #[serde(rename = "type")]
    pub event_type: String,
    #[schema(value_type = Object)]
    pub data: serde_json::Value,
    /// Unix seconds.
    pub created: i64,
}

/// Result of a single delivery attempt.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DeliveryOutcome {
    /// 2xx response.
    Delivered { status: u16, body: String },
    /// Any other HTTP status.
    Rejected { status: u16, body: String },
    /// Timeout, connection failure, or similar.
    TransportError(String),
    EndpointInactive,
    EndpointMissing,
}

impl DeliveryOutcome {
    pub fn is_success(&self) -> bool {
        matches!(self, DeliveryOutcome::Delivered { .. })
    }

    pub fn response_status(&self) -> Option<i32> {
        match self {
            DeliveryOutcome::Delivered { status, .. } | DeliveryOutcome::Rejected { status, .. } => {
                Some(i32::from(*status))
            }
            _ => None,
        }
    }

    /// Diagnostic text stored on the event, already truncated.
    pub fn response_body(&self) -> Option<String> {
        match self {
            DeliveryOutcome::Delivered { body, .. } | DeliveryOutcome::Rejected { body, .. } => {
                Some(truncate_body(body))
            }
            DeliveryOutcome::TransportError(err) => Some(truncate_body(err)),
            DeliveryOutcome::EndpointInactive => Some("endpoint inactive".into()),
            DeliveryOutcome::EndpointMissing => Some("endpoint deleted".into()),
        }
    }
}

/// Row update written after an attempt.
#[derive(Debug, Clone, PartialEq)]
pub struct AttemptRecord {
    pub delivered: bool,
    pub attempted_at: DateTime<Utc>,
    /// `None` once delivered or abandoned.
    pub next_retry_at: Option<DateTime<Utc>>,
    pub response_status: Option<i32>,
    pub response_body: Option<String>,
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Duration;
    use serde_json::json;

    fn endpoint(events: &[&str]) -> WebhookEndpoint {
        WebhookEndpoint::new(
            MerchantId::new(),
            "https://merchant.example/hooks",
            events.iter().map(|e| e.to_string()).collect(),
            "whsec_test",
        )
        .unwrap()
    }

    #[test]
    fn test_endpoint_requires_events() {
        let result = WebhookEndpoint::new(
            MerchantId::new(),
            "https://merchant.example/hooks",
            vec![],
            "whsec_test",
        );
        assert!(matches!(result, Err(DomainError::ValidationError(_))));
    }

    #[test]
    fn test_endpoint_rejects_unknown_event_and_bad_url() {
        assert!(validate_events(&["charge.refunded".to_string()]).is_err());
        assert!(validate_url("ftp://merchant.example").is_err());
        assert!(validate_url("https://").is_err());
        assert!(validate_url("http://localhost:8080/hook").is_ok());
    }

    #[test]
    fn test_subscription_and_wildcard() {
        let ep = endpoint(&[event_types::PAYMENT_INTENT_SUCCEEDED]);
        assert!(ep.accepts(event_types::PAYMENT_INTENT_SUCCEEDED));
        assert!(!ep.accepts(event_types::PAYMENT_INTENT_FAILED));

        let mut all = endpoint(&[event_types::WILDCARD]);
        assert!(all.accepts(event_types::PAYMENT_INTENT_FAILED));
        all.is_active = false;
        assert!(!all.accepts(event_types::PAYMENT_INTENT_FAILED));
    }

    #[test]
    fn test_event_state_derivation() {
        let mut event = WebhookEvent::new(
            MerchantId::new(),
            WebhookEndpointId::new(),
            event_types::PAYMENT_INTENT_CREATED,
            None,
            json!({}),
        );
        assert_eq!(event.state(5), DeliveryState::Pending);
        event.attempts = 5;
        assert_eq!(event.state(5), DeliveryState::Abandoned);
        event.delivered = true;
        assert_eq!(event.state(5), DeliveryState::Delivered);
    }

    #[test]
    fn test_event_due() {
        let now = Utc::now();
        let mut event = WebhookEvent::new(
            MerchantId::new(),
            WebhookEndpointId::new(),
            event_types::PAYMENT_INTENT_CREATED,
            None,
            json!({}),
        );
        assert!(event.is_due(now, 5));
        event.next_retry_at = Some(now + Duration::seconds(30));
        assert!(!event.is_due(now, 5));
        event.next_retry_at = Some(now - Duration::seconds(1));
        assert!(event.is_due(now, 5));
        event.attempts = 5;
        assert!(!event.is_due(now, 5));
    }

    #[test]
    fn test_envelope_shape() {
        let event = WebhookEvent::new(
            MerchantId::new(),
            WebhookEndpointId::new(),
            event_types::PAYMENT_INTENT_SUCCEEDED,
            Some("pi_1".into()),
            json!({"id": "pi_1", "status": "succeeded"}),
        );
        let body = serde_json::to_value(event.envelope()).unwrap();
        assert_eq!(body["id"], json!(event.id.as_str()));
        assert_eq!(body["type"], json!("payment_intent.succeeded"));
        assert_eq!(body["data"]["status"], json!("succeeded"));
        assert_eq!(body["created"], json!(event.created_at.timestamp()));
    }

    #[test]
    fn test_truncate_body_respects_char_boundaries() {
        let short = "ok";
        assert_eq!(truncate_body(short), "ok");

        let long = "é".repeat(MAX_RESPONSE_BODY_BYTES);
        let cut = truncate_body(&long);
        assert!(cut.len() <= MAX_RESPONSE_BODY_BYTES);
        assert_eq!(cut.len(), MAX_RESPONSE_BODY_BYTES);
        assert!(cut.chars().all(|c| c == 'é'));

        let odd = format!("a{}", "é".repeat(MAX_RESPONSE_BODY_BYTES));
        assert_eq!(truncate_body(&odd).len(), MAX_RESPONSE_BODY_BYTES - 1);
    }

    #[test]
    fn test_outcome_diagnostics() {
        let rejected = DeliveryOutcome::Rejected {
            status: 500,
            body: "boom".into(),
        };
        assert!(!rejected.is_success());
        assert_eq!(rejected.response_status(), Some(500));
        assert_eq!(rejected.response_body().as_deref(), Some("boom"));

        let err = DeliveryOutcome::TransportError("timed out".into());
        assert_eq!(err.response_status(), None);
        assert_eq!(err.response_body().as_deref(), Some("timed out"));
    }
}
