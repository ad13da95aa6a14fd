//! # sBTC Gateway
//!
//! Binary that wires together all the components:
//! - Load configuration from environment
//! - Initialize the repository adapter and the block explorer client
//! - Create the payment service, reconciler and delivery engine
//! - Start the background workers and the HTTP server

mod config;

use std::sync::Arc;

use opentelemetry::global;
use opentelemetry_otlp::WithExportConfig;
use opentelemetry_sdk::{propagation::TraceContextPropagator, trace as sdktrace};
use tokio::sync::watch;
use tracing_subscriber::{Layer, layer::SubscriberExt, util::SubscriberInitExt};

use sbtc_hex::{
    DeliveryEngine, DeliveryQueue, DeliveryWorker, PaymentService, ReconcileWorker, Reconciler,
    inbound::{HttpServer, shutdown_signal},
};
use sbtc_repo::build_repo;
use stacks_explorer::HiroExplorer;

use config::{Config, LogFormat};

/// Immediate-attempt jobs buffered before the sweep takes over.
const DELIVERY_QUEUE_CAPACITY: usize = 1024;

fn init_tracer(endpoint: &str) -> anyhow::Result<(sdktrace::Tracer, sdktrace::SdkTracerProvider)> {
    global::set_text_map_propagator(TraceContextPropagator::new());

    // Use gRPC exporter with batch processing (non-blocking)
    let exporter = opentelemetry_otlp::SpanExporter::builder()
        .with_tonic()
        .with_endpoint(endpoint)
        .build()?;

    let provider = sdktrace::SdkTracerProvider::builder()
        .with_batch_exporter(exporter)
        .build();

    global::set_tracer_provider(provider.clone());

    use opentelemetry::trace::TracerProvider as _;
    Ok((provider.tracer("sbtc-gateway"), provider))
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Load environment variables
    dotenvy::dotenv().ok();

    let config = Config::from_env()?;

    // Span export only when a collector is configured
    let (otel_tracer, otel_provider) = match &config.otlp_endpoint {
        Some(endpoint) => {
            let (tracer, provider) = init_tracer(endpoint)?;
            (Some(tracer), Some(provider))
        }
        None => (None, None),
    };
    let telemetry = otel_tracer.map(|tracer| tracing_opentelemetry::layer().with_tracer(tracer));

    let fmt_layer = match config.log_format {
        LogFormat::Json => tracing_subscriber::fmt::layer().json().boxed(),
        LogFormat::Pretty => tracing_subscriber::fmt::layer().boxed(),
    };

    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "info,sbtc_app=debug,sbtc_hex=debug".into()),
        )
        .with(fmt_layer)
        .with(telemetry)
        .init();

    tracing::info!("Starting sBTC gateway on port {}", config.port);
    tracing::info!(
        explorer = %config.explorer.base_url,
        contract = %config.reconciler.contract_id,
        confirm_event = %config.service.confirm_event_type,
        "gateway configured"
    );

    // Build repository (handles connection and migration)
    let repo = Arc::new(build_repo(&config.database_url).await?);

    let (queue, jobs) = DeliveryQueue::channel(DELIVERY_QUEUE_CAPACITY);
    let service = Arc::new(
        PaymentService::new(repo.clone())
            .with_config(config.service.clone())
            .with_delivery_queue(queue),
    );

    let explorer = HiroExplorer::new(config.explorer.clone())?;
    let reconciler = Arc::new(Reconciler::new(
        service.clone(),
        Arc::new(explorer),
        config.reconciler.clone(),
    ));
    let engine = Arc::new(DeliveryEngine::new(repo, config.delivery.clone())?);

    // Background workers stop when the flag flips or the sender drops
    let (shutdown_tx, shutdown_rx) = watch::channel(false);
    let delivery_worker = tokio::spawn(DeliveryWorker::new(engine, jobs).run(shutdown_rx.clone()));
    let reconcile_worker =
        tokio::spawn(ReconcileWorker::new(reconciler.clone()).run(shutdown_rx));

    // Create and run the HTTP server
    let server = HttpServer::new(service, reconciler);
    let addr = format!("0.0.0.0:{}", config.port);

    let served = server
        .run(&addr, async move {
            shutdown_signal().await;
            let _ = shutdown_tx.send(true);
        })
        .await;

    let (delivery, reconcile) = tokio::join!(delivery_worker, reconcile_worker);
    if let Err(e) = delivery {
        tracing::error!(error = %e, "delivery worker panicked");
    }
    if let Err(e) = reconcile {
        tracing::error!(error = %e, "reconcile worker panicked");
    }

    // Ensure traces are flushed before exit
    if let Some(provider) = otel_provider {
        let _ = provider.shutdown();
    }
    served
}
