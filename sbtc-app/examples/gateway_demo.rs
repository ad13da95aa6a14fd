//! End-to-end walk through the gateway against a locally started server.
//!
//! Run with: cargo run -p sbtc-app --example gateway_demo --no-default-features --features sqlite

use std::sync::Arc;

use axum::{Router, http::HeaderMap, routing::post};
use tempfile::tempdir;
use tokio::net::TcpListener;
use tokio::sync::mpsc;

use sbtc_client::SbtcClient;
use sbtc_hex::{
    DeliveryConfig, DeliveryEngine, PaymentService, Reconciler, ReconcilerConfig,
    inbound::HttpServer,
};
use sbtc_repo::build_repo;
use sbtc_types::{
    CreateMerchantRequest, CreatePaymentIntentRequest, Currency, Metadata,
    RegisterWebhookRequest, event_types,
    signature::{SIGNATURE_HEADER, verify},
};
use stacks_explorer::{ExplorerConfig, HiroExplorer};

const MERCHANT_ADDRESS: &str = "SP2J6ZY48GV1EZ5V2V5RB9MP66SW86PYKKNRV9EJ7";

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt().with_env_filter("info").init();

    // Use a temp file-backed SQLite DB
    let tmp = tempdir()?;
    let db_path = tmp.path().join("gateway.db");
    let db_url = format!("sqlite://{}?mode=rwc", db_path.display());

    // Local receiver standing in for the merchant's webhook endpoint
    let (deliveries_tx, mut deliveries) = mpsc::unbounded_channel::<(HeaderMap, String)>();
    let receiver = Router::new().route(
        "/hook",
        post(move |headers: HeaderMap, body: String| {
            let deliveries_tx = deliveries_tx.clone();
            async move {
                let _ = deliveries_tx.send((headers, body));
                "ok"
            }
        }),
    );
    let receiver_listener = TcpListener::bind("127.0.0.1:0").await?;
    let hook_url = format!("http://{}/hook", receiver_listener.local_addr()?);
    tokio::spawn(async move { axum::serve(receiver_listener, receiver).await });

    println!("🚀 Starting gateway");
    println!("   Database: {db_url}");

    let repo = Arc::new(build_repo(&db_url).await?);
    let service = Arc::new(PaymentService::new(repo.clone()));
    let reconciler = Arc::new(Reconciler::new(
        service.clone(),
        Arc::new(HiroExplorer::new(ExplorerConfig::default())?),
        ReconcilerConfig::default(),
    ));
    let engine = Arc::new(DeliveryEngine::new(repo, DeliveryConfig::default())?);

    let listener = TcpListener::bind("127.0.0.1:0").await?;
    let base_url = format!("http://{}", listener.local_addr()?);
    let router = HttpServer::new(service, reconciler).router();
    tokio::spawn(async move { axum::serve(listener, router).await });

    let client = SbtcClient::new(&base_url);
    let health = client.health().await?;
    println!("✓ Gateway {} is {}", health.version, health.status);

    // ─────────────────────────────────────────────────────────────────────────
    // Merchant and webhook endpoint
    // ─────────────────────────────────────────────────────────────────────────

    let merchant = client
        .create_merchant(&CreateMerchantRequest {
            name: "Satoshi's Coffee".into(),
            default_address: None,
            recipient_address: Some(MERCHANT_ADDRESS.into()),
        })
        .await?;
    println!("✓ Merchant {} ({})", merchant.name, merchant.id);

    let webhook = client
        .register_webhook(&RegisterWebhookRequest {
            merchant_id: merchant.id.clone(),
            url: hook_url,
            events: vec![event_types::WILDCARD.into()],
        })
        .await?;
    println!("✓ Webhook {} -> {}", webhook.id, webhook.url);

    // ─────────────────────────────────────────────────────────────────────────
    // Payment intent lifecycle
    // ─────────────────────────────────────────────────────────────────────────

    let mut metadata = Metadata::new();
    metadata.insert("order_id", "A-1001");
    let intent = client
        .create_payment_intent(&CreatePaymentIntentRequest {
            merchant_id: merchant.id.clone(),
            amount: 50_000,
            currency: Currency::Sbtc,
            description: Some("Two flat whites".into()),
            customer_email: None,
            metadata,
            amount_usd_cents: None,
        })
        .await?;
    println!("✓ Intent {} created for {}", intent.id, intent.amount);

    let intent = client.confirm(&intent.id, None).await?;
    println!("✓ Intent {} is {}", intent.id, intent.status);

    let intent = client
        .settle(&intent.id, "0xdemo-settlement-tx", Some("SP000DEMO".into()))
        .await?;
    println!("✓ Intent {} is {} (tx {:?})", intent.id, intent.status, intent.tx_id);

    match client.cancel(&intent.id).await {
        Err(e) => println!("✓ Cancel after settle rejected: {e}"),
        Ok(_) => anyhow::bail!("cancel after settle should be rejected"),
    }

    // ─────────────────────────────────────────────────────────────────────────
    // Delivery
    // ─────────────────────────────────────────────────────────────────────────

    let report = engine.sweep().await?;
    println!(
        "✓ Delivery sweep: {} attempted, {} delivered",
        report.attempted, report.delivered
    );

    while let Ok((headers, body)) = deliveries.try_recv() {
        let header = headers
            .get(SIGNATURE_HEADER)
            .and_then(|v| v.to_str().ok())
            .unwrap_or_default();
        let valid = verify(body.as_bytes(), header, &webhook.secret);
        println!("   received {} bytes, signature valid: {valid}", body.len());
    }

    for event in client.list_events(&merchant.id, None).await? {
        println!(
            "   {} {} attempts={} state={:?}",
            event.id, event.event_type, event.attempts, event.state
        );
    }

    println!("🎉 Demo complete");
    Ok(())
}
