//! OpenAPI specification and documentation.

#![allow(dead_code)] // Path functions are only used by utoipa for documentation generation

use sbtc_types::domain::{
    Currency, DeliveryState, Merchant, MerchantId, Metadata, PaymentIntent, PaymentIntentId,
    PaymentIntentStatus, WebhookEndpointId, WebhookEventId,
};
use sbtc_types::dto::{
    ConfirmPaymentIntentRequest, CreateMerchantRequest, CreatePaymentIntentRequest,
    EmittedEventsResponse, ErrorResponse, EventListQuery, FailPaymentIntentRequest,
    HealthResponse, MerchantQuery, ReconcileResponse, ReconcileStatus, RegisterWebhookRequest,
    SendTestEventRequest, SettlePaymentIntentRequest, UpdateMetadataRequest, UpdateWebhookRequest,
    WebhookEventView, WebhookResponse,
};
use utoipa::OpenApi;

// Dummy functions to generate path documentation

/// Health check endpoint
#[utoipa::path(
    get,
    path = "/health",
    tag = "health",
    responses(
        (status = 200, description = "Service is healthy", body = HealthResponse)
    )
)]
async fn health() {}

#[utoipa::path(
    post,
    path = "/api/merchants",
    tag = "merchants",
    request_body = CreateMerchantRequest,
    responses(
        (status = 201, description = "Merchant created", body = Merchant),
        (status = 400, description = "Invalid request", body = ErrorResponse)
    )
)]
async fn create_merchant() {}

#[utoipa::path(
    get,
    path = "/api/merchants/{id}",
    tag = "merchants",
    params(("id" = MerchantId, Path, description = "Merchant ID")),
    responses(
        (status = 200, description = "Merchant details", body = Merchant),
        (status = 404, description = "Merchant not found", body = ErrorResponse)
    )
)]
async fn get_merchant() {}

/// Create a payment intent in `created` status
#[utoipa::path(
    post,
    path = "/api/payment_intents",
    tag = "payment_intents",
    request_body = CreatePaymentIntentRequest,
    responses(
        (status = 201, description = "Payment intent created", body = PaymentIntent),
        (status = 400, description = "Invalid amount", body = ErrorResponse),
        (status = 404, description = "Merchant not found", body = ErrorResponse)
    )
)]
async fn create_payment_intent() {}

#[utoipa::path(
    get,
    path = "/api/payment_intents",
    tag = "payment_intents",
    params(MerchantQuery),
    responses(
        (status = 200, description = "Payment intents, newest first", body = Vec<PaymentIntent>)
    )
)]
async fn list_payment_intents() {}

#[utoipa::path(
    get,
    path = "/api/payment_intents/{id}",
    tag = "payment_intents",
    params(("id" = PaymentIntentId, Path, description = "Payment intent ID")),
    responses(
        (status = 200, description = "Payment intent", body = PaymentIntent),
        (status = 404, description = "Payment intent not found", body = ErrorResponse)
    )
)]
async fn get_payment_intent() {}

/// Move a payment intent from `created` to `pending`
#[utoipa::path(
    post,
    path = "/api/payment_intents/{id}/confirm",
    tag = "payment_intents",
    params(("id" = PaymentIntentId, Path, description = "Payment intent ID")),
    request_body(content = ConfirmPaymentIntentRequest, description = "Optional"),
    responses(
        (status = 200, description = "Payment intent confirmed", body = PaymentIntent),
        (status = 409, description = "Not in `created` status", body = ErrorResponse)
    )
)]
async fn confirm_payment_intent() {}

/// Mark a payment intent as paid
#[utoipa::path(
    post,
    path = "/api/payment_intents/{id}/settle",
    tag = "payment_intents",
    params(("id" = PaymentIntentId, Path, description = "Payment intent ID")),
    request_body = SettlePaymentIntentRequest,
    responses(
        (status = 200, description = "Payment intent succeeded", body = PaymentIntent),
        (status = 409, description = "Already terminal", body = ErrorResponse)
    )
)]
async fn settle_payment_intent() {}

#[utoipa::path(
    post,
    path = "/api/payment_intents/{id}/fail",
    tag = "payment_intents",
    params(("id" = PaymentIntentId, Path, description = "Payment intent ID")),
    request_body = FailPaymentIntentRequest,
    responses(
        (status = 200, description = "Payment intent failed", body = PaymentIntent),
        (status = 409, description = "Already terminal", body = ErrorResponse)
    )
)]
async fn fail_payment_intent() {}

#[utoipa::path(
    post,
    path = "/api/payment_intents/{id}/cancel",
    tag = "payment_intents",
    params(("id" = PaymentIntentId, Path, description = "Payment intent ID")),
    responses(
        (status = 200, description = "Payment intent canceled", body = PaymentIntent),
        (status = 409, description = "Not in `created` status", body = ErrorResponse)
    )
)]
async fn cancel_payment_intent() {}

/// Merge keys into the payment intent's metadata
#[utoipa::path(
    patch,
    path = "/api/payment_intents/{id}/metadata",
    tag = "payment_intents",
    params(("id" = PaymentIntentId, Path, description = "Payment intent ID")),
    request_body = UpdateMetadataRequest,
    responses(
        (status = 200, description = "Updated payment intent", body = PaymentIntent),
        (status = 404, description = "Payment intent not found", body = ErrorResponse)
    )
)]
async fn update_metadata() {}

/// Look for a matching on-chain transfer and settle on the first match
#[utoipa::path(
    post,
    path = "/api/payment_intents/{id}/reconcile",
    tag = "payment_intents",
    params(("id" = PaymentIntentId, Path, description = "Payment intent ID")),
    responses(
        (status = 200, description = "Reconcile result", body = ReconcileResponse),
        (status = 409, description = "Intent failed or canceled", body = ErrorResponse),
        (status = 422, description = "Merchant has no receiving address", body = ErrorResponse),
        (status = 502, description = "Block explorer unavailable", body = ErrorResponse)
    )
)]
async fn reconcile_payment_intent() {}

/// Register a webhook endpoint
#[utoipa::path(
    post,
    path = "/api/webhooks",
    tag = "webhooks",
    request_body = RegisterWebhookRequest,
    responses(
        (status = 201, description = "Webhook registered successfully", body = WebhookResponse),
        (status = 400, description = "Invalid request", body = ErrorResponse)
    )
)]
async fn register_webhook() {}

#[utoipa::path(
    get,
    path = "/api/webhooks",
    tag = "webhooks",
    params(MerchantQuery),
    responses(
        (status = 200, description = "Webhook endpoints of the merchant", body = Vec<WebhookResponse>)
    )
)]
async fn list_webhooks() {}

#[utoipa::path(
    patch,
    path = "/api/webhooks/{id}",
    tag = "webhooks",
    params(("id" = WebhookEndpointId, Path, description = "Webhook endpoint ID")),
    request_body = UpdateWebhookRequest,
    responses(
        (status = 200, description = "Webhook updated", body = WebhookResponse),
        (status = 404, description = "Webhook not found", body = ErrorResponse)
    )
)]
async fn update_webhook() {}

#[utoipa::path(
    delete,
    path = "/api/webhooks/{id}",
    tag = "webhooks",
    params(("id" = WebhookEndpointId, Path, description = "Webhook endpoint ID")),
    responses(
        (status = 204, description = "Webhook deleted"),
        (status = 404, description = "Webhook not found", body = ErrorResponse)
    )
)]
async fn delete_webhook() {}

/// Send a synthetic event to one endpoint
#[utoipa::path(
    post,
    path = "/api/webhooks/{id}/test",
    tag = "webhooks",
    params(("id" = WebhookEndpointId, Path, description = "Webhook endpoint ID")),
    request_body(content = SendTestEventRequest, description = "Optional"),
    responses(
        (status = 202, description = "Test event queued", body = EmittedEventsResponse),
        (status = 400, description = "Unknown event type", body = ErrorResponse),
        (status = 404, description = "Webhook not found", body = ErrorResponse)
    )
)]
async fn send_test_webhook() {}

#[utoipa::path(
    get,
    path = "/api/webhook_events",
    tag = "webhook_events",
    params(EventListQuery),
    responses(
        (status = 200, description = "Delivery obligations, newest first", body = Vec<WebhookEventView>)
    )
)]
async fn list_webhook_events() {}

#[utoipa::path(
    get,
    path = "/api/webhook_events/{id}",
    tag = "webhook_events",
    params(("id" = WebhookEventId, Path, description = "Webhook event ID")),
    responses(
        (status = 200, description = "Delivery obligation", body = WebhookEventView),
        (status = 404, description = "Event not found", body = ErrorResponse)
    )
)]
async fn get_webhook_event() {}

/// Schedule one more delivery attempt for an undelivered event
#[utoipa::path(
    post,
    path = "/api/webhook_events/{id}/retry",
    tag = "webhook_events",
    params(("id" = WebhookEventId, Path, description = "Webhook event ID")),
    responses(
        (status = 202, description = "Retry scheduled", body = WebhookEventView),
        (status = 404, description = "Event not found", body = ErrorResponse),
        (status = 409, description = "Event already delivered", body = ErrorResponse)
    )
)]
async fn retry_webhook_event() {}

/// OpenAPI documentation for the gateway API.
#[derive(OpenApi)]
#[openapi(
    info(
        title = "sBTC Payment Gateway API",
        version = "1.0.0",
        description = "Payment intents settled in sBTC, with signed webhook notifications.\n\n## Webhook signatures\n\nEvery delivery carries `X-Webhook-Signature: t=<unix seconds>,v1=<hex>` where `v1` is HMAC-SHA256 over `<t>.<raw body>` keyed by the endpoint secret.",
        license(name = "MIT"),
    ),
    paths(
        health,
        create_merchant,
        get_merchant,
        create_payment_intent,
        list_payment_intents,
        get_payment_intent,
        confirm_payment_intent,
        settle_payment_intent,
        fail_payment_intent,
        cancel_payment_intent,
        update_metadata,
        reconcile_payment_intent,
        register_webhook,
        list_webhooks,
        update_webhook,
        delete_webhook,
        send_test_webhook,
        list_webhook_events,
        get_webhook_event,
        retry_webhook_event,
    ),
    components(
        schemas(
            CreateMerchantRequest,
            Merchant,
            CreatePaymentIntentRequest,
            ConfirmPaymentIntentRequest,
            SettlePaymentIntentRequest,
            FailPaymentIntentRequest,
            UpdateMetadataRequest,
            PaymentIntent,
            PaymentIntentStatus,
            Metadata,
            Currency,
            ReconcileResponse,
            ReconcileStatus,
            RegisterWebhookRequest,
            UpdateWebhookRequest,
            WebhookResponse,
            SendTestEventRequest,
            EmittedEventsResponse,
            WebhookEventView,
            DeliveryState,
            HealthResponse,
            ErrorResponse,
            MerchantId,
            PaymentIntentId,
            WebhookEndpointId,
            WebhookEventId,
        )
    ),
    tags(
        (name = "health", description = "Health check endpoints"),
        (name = "merchants", description = "Merchant records"),
        (name = "payment_intents", description = "Payment intent lifecycle"),
        (name = "webhooks", description = "Webhook endpoint management"),
        (name = "webhook_events", description = "Webhook delivery inspection and retry"),
    )
)]
pub struct ApiDoc;
