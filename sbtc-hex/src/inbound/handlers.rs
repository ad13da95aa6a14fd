//! HTTP request handlers.

use std::str::FromStr;
use std::sync::Arc;

use axum::{
    Json,
    extract::{Path, Query, State},
    http::StatusCode,
    response::{IntoResponse, Response},
};

use sbtc_types::{
    AppError, ConfirmPaymentIntentRequest, CreateMerchantRequest, CreatePaymentIntentRequest,
    DomainError, EmittedEventsResponse, ErrorResponse, EventListQuery, FailPaymentIntentRequest,
    GatewayRepository, HealthResponse, MerchantId, MerchantQuery, PaymentIntentId,
    ReconcileResponse, RegisterWebhookRequest, SendTestEventRequest, SettlePaymentIntentRequest,
    UpdateMetadataRequest, UpdateWebhookRequest, WebhookEndpointId, WebhookEventId,
    WebhookResponse,
};

use crate::{PaymentService, Reconciler};

/// Application state shared across handlers.
pub struct AppState<R: GatewayRepository> {
    pub service: Arc<PaymentService<R>>,
    pub reconciler: Arc<Reconciler<R>>,
}

/// Wrapper to implement IntoResponse for AppError (orphan rule workaround).
pub struct ApiError(pub AppError);

impl From<AppError> for ApiError {
    fn from(err: AppError) -> Self {
        ApiError(err)
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let (status, code) = match &self.0 {
            AppError::BadRequest(_) => (StatusCode::BAD_REQUEST, "bad_request"),
            AppError::NotFound(_) => (StatusCode::NOT_FOUND, "not_found"),
            AppError::InvalidState(_) => (StatusCode::CONFLICT, "invalid_state"),
            AppError::Configuration(_) => (StatusCode::UNPROCESSABLE_ENTITY, "configuration_error"),
            AppError::Upstream(_) => (StatusCode::BAD_GATEWAY, "upstream_error"),
            AppError::Internal(_) => (StatusCode::INTERNAL_SERVER_ERROR, "internal_error"),
        };

        if status.is_server_error() {
            tracing::error!(error = %self.0, "request failed");
        }

        let body = ErrorResponse {
            error: self.0.to_string(),
            code: code.to_string(),
        };

        (status, Json(body)).into_response()
    }
}

fn parse_id<T>(raw: &str) -> Result<T, ApiError>
where
    T: FromStr<Err = DomainError>,
{
    raw.parse().map_err(|e: DomainError| ApiError(e.into()))
}

/// Health check endpoint.
pub async fn health() -> impl IntoResponse {
    Json(HealthResponse {
        status: "ok".into(),
        version: env!("CARGO_PKG_VERSION").into(),
    })
}

// ─────────────────────────────────────────────────────────────────────────────
// Merchants
// ─────────────────────────────────────────────────────────────────────────────

#[tracing::instrument(skip(state, req), fields(name = %req.name))]
pub async fn create_merchant<R: GatewayRepository>(
    State(state): State<Arc<AppState<R>>>,
    Json(req): Json<CreateMerchantRequest>,
) -> Result<impl IntoResponse, ApiError> {
    let merchant = state.service.create_merchant(req).await?;
    Ok((StatusCode::CREATED, Json(merchant)))
}

#[tracing::instrument(skip(state))]
pub async fn get_merchant<R: GatewayRepository>(
    State(state): State<Arc<AppState<R>>>,
    Path(id): Path<String>,
) -> Result<impl IntoResponse, ApiError> {
    let id: MerchantId = parse_id(&id)?;
    Ok(Json(state.service.get_merchant(&id).await?))
}

// ─────────────────────────────────────────────────────────────────────────────
// Payment intents
// ─────────────────────────────────────────────────────────────────────────────

#[tracing::instrument(skip(state, req), fields(merchant_id = %req.merchant_id, amount = req.amount))]
pub async fn create_payment_intent<R: GatewayRepository>(
    State(state): State<Arc<AppState<R>>>,
    Json(req): Json<CreatePaymentIntentRequest>,
) -> Result<impl IntoResponse, ApiError> {
    let intent = state.service.create_payment_intent(req).await?;
    Ok((StatusCode::CREATED, Json(intent)))
}

#[tracing::instrument(skip(state))]
pub async fn list_payment_intents<R: GatewayRepository>(
    State(state): State<Arc<AppState<R>>>,
    Query(query): Query<MerchantQuery>,
) -> Result<impl IntoResponse, ApiError> {
    Ok(Json(
        state.service.list_payment_intents(&query.merchant_id).await?,
    ))
}

#[tracing::instrument(skip(state))]
pub async fn get_payment_intent<R: GatewayRepository>(
    State(state): State<Arc<AppState<R>>>,
    Path(id): Path<String>,
) -> Result<impl IntoResponse, ApiError> {
    let id: PaymentIntentId = parse_id(&id)?;
    Ok(Json(state.service.get_payment_intent(&id).await?))
}

/// `created → pending`. The body is optional.
#[tracing::instrument(skip(state, req))]
pub async fn confirm_payment_intent<R: GatewayRepository>(
    State(state): State<Arc<AppState<R>>>,
    Path(id): Path<String>,
    req: Option<Json<ConfirmPaymentIntentRequest>>,
) -> Result<impl IntoResponse, ApiError> {
    let id: PaymentIntentId = parse_id(&id)?;
    let req = req.map(|Json(req)| req).unwrap_or_default();
    Ok(Json(
        state.service.confirm(&id, req.customer_address).await?,
    ))
}

#[tracing::instrument(skip(state, req), fields(tx_id = %req.tx_id))]
pub async fn settle_payment_intent<R: GatewayRepository>(
    State(state): State<Arc<AppState<R>>>,
    Path(id): Path<String>,
    Json(req): Json<SettlePaymentIntentRequest>,
) -> Result<impl IntoResponse, ApiError> {
    let id: PaymentIntentId = parse_id(&id)?;
    Ok(Json(
        state
            .service
            .settle(&id, req.tx_id, req.customer_address)
            .await?,
    ))
}

#[tracing::instrument(skip(state, req))]
pub async fn fail_payment_intent<R: GatewayRepository>(
    State(state): State<Arc<AppState<R>>>,
    Path(id): Path<String>,
    Json(req): Json<FailPaymentIntentRequest>,
) -> Result<impl IntoResponse, ApiError> {
    let id: PaymentIntentId = parse_id(&id)?;
    Ok(Json(state.service.fail(&id, req.reason).await?))
}

#[tracing::instrument(skip(state))]
pub async fn cancel_payment_intent<R: GatewayRepository>(
    State(state): State<Arc<AppState<R>>>,
    Path(id): Path<String>,
) -> Result<impl IntoResponse, ApiError> {
    let id: PaymentIntentId = parse_id(&id)?;
    Ok(Json(state.service.cancel(&id).await?))
}

#[tracing::instrument(skip(state, req))]
pub async fn update_metadata<R: GatewayRepository>(
    State(state): State<Arc<AppState<R>>>,
    Path(id): Path<String>,
    Json(req): Json<UpdateMetadataRequest>,
) -> Result<impl IntoResponse, ApiError> {
    let id: PaymentIntentId = parse_id(&id)?;
    Ok(Json(state.service.update_metadata(&id, &req.metadata).await?))
}

#[tracing::instrument(skip(state))]
pub async fn reconcile_payment_intent<R: GatewayRepository>(
    State(state): State<Arc<AppState<R>>>,
    Path(id): Path<String>,
) -> Result<impl IntoResponse, ApiError> {
    let id: PaymentIntentId = parse_id(&id)?;
    let outcome = state.reconciler.reconcile(&id).await?;
    Ok(Json(ReconcileResponse::from(outcome)))
}

// ─────────────────────────────────────────────────────────────────────────────
// Webhooks
// ─────────────────────────────────────────────────────────────────────────────

/// Register a new webhook endpoint. The response carries the signing secret.
#[tracing::instrument(skip(state, req), fields(merchant_id = %req.merchant_id, url = %req.url))]
pub async fn register_webhook<R: GatewayRepository>(
    State(state): State<Arc<AppState<R>>>,
    Json(req): Json<RegisterWebhookRequest>,
) -> Result<impl IntoResponse, ApiError> {
    let endpoint = state.service.register_endpoint(req).await?;
    Ok((StatusCode::CREATED, Json(WebhookResponse::from(endpoint))))
}

#[tracing::instrument(skip(state))]
pub async fn list_webhooks<R: GatewayRepository>(
    State(state): State<Arc<AppState<R>>>,
    Query(query): Query<MerchantQuery>,
) -> Result<impl IntoResponse, ApiError> {
    let endpoints = state.service.list_endpoints(&query.merchant_id).await?;
    let response: Vec<WebhookResponse> = endpoints.into_iter().map(Into::into).collect();
    Ok(Json(response))
}

#[tracing::instrument(skip(state, req))]
pub async fn update_webhook<R: GatewayRepository>(
    State(state): State<Arc<AppState<R>>>,
    Path(id): Path<String>,
    Json(req): Json<UpdateWebhookRequest>,
) -> Result<impl IntoResponse, ApiError> {
    let id: WebhookEndpointId = parse_id(&id)?;
    let endpoint = state.service.update_endpoint(&id, &req).await?;
    Ok(Json(WebhookResponse::from(endpoint)))
}

#[tracing::instrument(skip(state))]
pub async fn delete_webhook<R: GatewayRepository>(
    State(state): State<Arc<AppState<R>>>,
    Path(id): Path<String>,
) -> Result<impl IntoResponse, ApiError> {
    let id: WebhookEndpointId = parse_id(&id)?;
    state.service.delete_endpoint(&id).await?;
    Ok(StatusCode::NO_CONTENT)
}

#[tracing::instrument(skip(state, req))]
pub async fn send_test_webhook<R: GatewayRepository>(
    State(state): State<Arc<AppState<R>>>,
    Path(id): Path<String>,
    req: Option<Json<SendTestEventRequest>>,
) -> Result<impl IntoResponse, ApiError> {
    let id: WebhookEndpointId = parse_id(&id)?;
    let req = req.map(|Json(req)| req).unwrap_or_default();
    let event_ids = state.service.send_test_event(&id, req.event_type).await?;
    Ok((
        StatusCode::ACCEPTED,
        Json(EmittedEventsResponse { event_ids }),
    ))
}

// ─────────────────────────────────────────────────────────────────────────────
// Webhook events (operator view)
// ─────────────────────────────────────────────────────────────────────────────

#[tracing::instrument(skip(state))]
pub async fn list_webhook_events<R: GatewayRepository>(
    State(state): State<Arc<AppState<R>>>,
    Query(query): Query<EventListQuery>,
) -> Result<impl IntoResponse, ApiError> {
    Ok(Json(
        state
            .service
            .list_events(&query.merchant_id, query.limit)
            .await?,
    ))
}

#[tracing::instrument(skip(state))]
pub async fn get_webhook_event<R: GatewayRepository>(
    State(state): State<Arc<AppState<R>>>,
    Path(id): Path<String>,
) -> Result<impl IntoResponse, ApiError> {
    let id: WebhookEventId = parse_id(&id)?;
    Ok(Json(state.service.get_event(&id).await?))
}

#[tracing::instrument(skip(state))]
pub async fn retry_webhook_event<R: GatewayRepository>(
    State(state): State<Arc<AppState<R>>>,
    Path(id): Path<String>,
) -> Result<impl IntoResponse, ApiError> {
    let id: WebhookEventId = parse_id(&id)?;
    let event = state.service.retry_event(&id).await?;
    Ok((StatusCode::ACCEPTED, Json(event)))
}
