//! HTTP Server configuration and startup.

use std::future::Future;
use std::sync::Arc;

use axum::{
    Router,
    routing::{get, patch, post},
};
use tower_http::trace::TraceLayer;
use utoipa::OpenApi;
use utoipa_swagger_ui::SwaggerUi;

use sbtc_types::GatewayRepository;

use super::handlers::{self, AppState};
use crate::openapi::ApiDoc;
use crate::{PaymentService, Reconciler};

/// HTTP Server for the gateway API.
pub struct HttpServer<R: GatewayRepository> {
    state: Arc<AppState<R>>,
}

impl<R: GatewayRepository> HttpServer<R> {
    pub fn new(service: Arc<PaymentService<R>>, reconciler: Arc<Reconciler<R>>) -> Self {
        Self {
            state: Arc::new(AppState {
                service,
                reconciler,
            }),
        }
    }

    /// Builds the Axum router with all routes.
    pub fn router(&self) -> Router {
        // Build HTTP metrics layer (uses globally set MeterProvider)
        let metrics = axum_otel_metrics::HttpMetricsLayerBuilder::new().build();

        Router::new()
            .route("/health", get(handlers::health))
            .route("/api/merchants", post(handlers::create_merchant::<R>))
            .route("/api/merchants/{id}", get(handlers::get_merchant::<R>))
            .route(
                "/api/payment_intents",
                post(handlers::create_payment_intent::<R>).get(handlers::list_payment_intents::<R>),
            )
            .route(
                "/api/payment_intents/{id}",
                get(handlers::get_payment_intent::<R>),
            )
            .route(
                "/api/payment_intents/{id}/confirm",
                post(handlers::confirm_payment_intent::<R>),
            )
            .route(
                "/api/payment_intents/{id}/settle",
                post(handlers::settle_payment_intent::<R>),
            )
            .route(
                "/api/payment_intents/{id}/fail",
                post(handlers::fail_payment_intent::<R>),
            )
            .route(
                "/api/payment_intents/{id}/cancel",
                post(handlers::cancel_payment_intent::<R>),
            )
            .route(
                "/api/payment_intents/{id}/metadata",
                patch(handlers::update_metadata::<R>),
            )
            .route(
                "/api/payment_intents/{id}/reconcile",
                post(handlers::reconcile_payment_intent::<R>),
            )
            .route(
                "/api/webhooks",
                post(handlers::register_webhook::<R>).get(handlers::list_webhooks::<R>),
            )
            .route(
                "/api/webhooks/{id}",
                patch(handlers::update_webhook::<R>).delete(handlers::delete_webhook::<R>),
            )
            .route(
                "/api/webhooks/{id}/test",
                post(handlers::send_test_webhook::<R>),
            )
            .route(
                "/api/webhook_events",
                get(handlers::list_webhook_events::<R>),
            )
            .route(
                "/api/webhook_events/{id}",
                get(handlers::get_webhook_event::<R>),
            )
            .route(
                "/api/webhook_events/{id}/retry",
                post(handlers::retry_webhook_event::<R>),
            )
            .layer(metrics)
            .layer(TraceLayer::new_for_http())
            .with_state(self.state.clone())
            .merge(SwaggerUi::new("/swagger-ui").url("/api-docs/openapi.json", ApiDoc::openapi()))
    }

    /// Serves on `addr` until `shutdown` resolves, then drains in-flight requests.
    pub async fn run<F>(self, addr: &str, shutdown: F) -> anyhow::Result<()>
    where
        F: Future<Output = ()> + Send + 'static,
    {
        let listener = tokio::net::TcpListener::bind(addr).await?;
        tracing::info!("Server listening on {}", listener.local_addr()?);

        axum::serve(listener, self.router())
            .with_graceful_shutdown(shutdown)
            .await?;

        Ok(())
    }
}

/// Resolves on Ctrl+C or SIGTERM.
pub async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = tokio::signal::ctrl_c().await {
            tracing::error!(error = %e, "failed to install Ctrl+C handler");
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate()) {
            Ok(mut signal) => {
                signal.recv().await;
            }
            Err(e) => {
                tracing::error!(error = %e, "failed to install SIGTERM handler");
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {},
        _ = terminate => {},
    }

    tracing::info!("Shutdown signal received, starting graceful shutdown...");
}
