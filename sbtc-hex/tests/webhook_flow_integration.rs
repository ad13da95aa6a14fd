//! End-to-end tests over the HTTP router with a real SQLite repository.
//!
//! A local axum app stands in for the Hiro API and another for the merchant's
//! webhook receiver.
//!
//! This test requires the `sqlite` feature flag.

#![cfg(feature = "sqlite")]

use std::sync::{Arc, Mutex};
use std::time::Duration;

use axum::{
    Json, Router,
    body::{Body, Bytes},
    extract::State,
    http::{HeaderMap, Method, Request, StatusCode},
    routing::{get, post},
};
use http_body_util::BodyExt;
use sbtc_hex::{
    DeliveryConfig, DeliveryEngine, PaymentService, Reconciler, ReconcilerConfig,
    inbound::HttpServer, reconciler::DEFAULT_SBTC_CONTRACT_ID,
};
use sbtc_repo::SqliteRepo;
use sbtc_types::signature::{self, SIGNATURE_HEADER};
use sbtc_types::{ChainTransaction, ContractCall, FunctionArg};
use serde_json::{Value, json};
use stacks_explorer::{ExplorerConfig, HiroExplorer};
use tower::ServiceExt;

const MERCHANT_ADDR: &str = "SP2MERCHANT000000000000000000000000000";
const CUSTOMER_ADDR: &str = "SP3CUSTOMER000000000000000000000000000";

type Received = Arc<Mutex<Vec<(HeaderMap, Bytes)>>>;

struct Gateway {
    app: Router,
    repo: Arc<SqliteRepo>,
    chain: Arc<Mutex<Vec<ChainTransaction>>>,
    received: Received,
    hook_url: String,
}

async fn serve(app: Router) -> String {
    let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    tokio::spawn(async move {
        axum::serve(listener, app).await.unwrap();
    });
    format!("http://{}", addr)
}

async fn address_transactions(
    State(chain): State<Arc<Mutex<Vec<ChainTransaction>>>>,
) -> Json<Value> {
    let results = chain.lock().unwrap().clone();
    Json(json!({ "limit": 50, "offset": 0, "total": results.len(), "results": results }))
}

async fn webhook_receiver(
    State(received): State<Received>,
    headers: HeaderMap,
    body: Bytes,
) -> StatusCode {
    received.lock().unwrap().push((headers, body));
    StatusCode::OK
}

/// Helper to create a gateway backed by in-memory SQLite and local fakes.
async fn create_gateway() -> Gateway {
    let chain: Arc<Mutex<Vec<ChainTransaction>>> = Arc::default();
    let explorer_url = serve(
        Router::new()
            .route(
                "/extended/v1/address/{address}/transactions",
                get(address_transactions),
            )
            .with_state(chain.clone()),
    )
    .await;

    let received: Received = Arc::default();
    let receiver_url = serve(
        Router::new()
            .route("/hook", post(webhook_receiver))
            .with_state(received.clone()),
    )
    .await;

    let repo = Arc::new(SqliteRepo::new("sqlite::memory:").await.unwrap());
    let service = Arc::new(PaymentService::new(repo.clone()));
    let explorer = HiroExplorer::new(ExplorerConfig {
        base_url: explorer_url,
        requests_per_second: 100,
        ..ExplorerConfig::default()
    })
    .unwrap();
    let reconciler = Arc::new(Reconciler::new(
        service.clone(),
        Arc::new(explorer),
        ReconcilerConfig::default(),
    ));

    Gateway {
        app: HttpServer::new(service, reconciler).router(),
        repo,
        chain,
        received,
        hook_url: format!("{}/hook", receiver_url),
    }
}

fn json_request(method: Method, uri: &str, body: Value) -> Request<Body> {
    Request::builder()
        .method(method)
        .uri(uri)
        .header("Content-Type", "application/json")
        .body(Body::from(body.to_string()))
        .unwrap()
}

fn empty_request(method: Method, uri: &str) -> Request<Body> {
    Request::builder()
        .method(method)
        .uri(uri)
        .body(Body::empty())
        .unwrap()
}

async fn call(app: &Router, request: Request<Body>) -> (StatusCode, Value) {
    let response = app.clone().oneshot(request).await.unwrap();
    let status = response.status();
    let body = response.into_body().collect().await.unwrap().to_bytes();
    let json = if body.is_empty() {
        Value::Null
    } else {
        serde_json::from_slice(&body).unwrap()
    };
    (status, json)
}

async fn create_merchant(app: &Router, recipient_address: Option<&str>) -> String {
    let (status, merchant) = call(
        app,
        json_request(
            Method::POST,
            "/api/merchants",
            json!({ "name": "Satoshi's Coffee", "recipient_address": recipient_address }),
        ),
    )
    .await;
    assert_eq!(status, StatusCode::CREATED);
    merchant["id"].as_str().unwrap().to_string()
}

async fn create_intent(app: &Router, merchant_id: &str) -> String {
    let (status, intent) = call(
        app,
        json_request(
            Method::POST,
            "/api/payment_intents",
            json!({ "merchant_id": merchant_id, "amount": 50000, "description": "Order #1" }),
        ),
    )
    .await;
    assert_eq!(status, StatusCode::CREATED);
    assert_eq!(intent["status"], "created");
    intent["id"].as_str().unwrap().to_string()
}

fn transfer(tx_id: &str, amount: u128, memo: &str) -> ChainTransaction {
    let arg = |name: &str, hex: String, repr: String, type_name: &str| FunctionArg {
        name: name.into(),
        hex,
        repr,
        type_name: type_name.into(),
    };
    let memo_bytes: String = memo.bytes().map(|b| format!("{:02x}", b)).collect();

    ChainTransaction {
        tx_id: tx_id.into(),
        tx_status: "success".into(),
        tx_type: "contract_call".into(),
        block_height: Some(170_000),
        sender_address: CUSTOMER_ADDR.into(),
        contract_call: Some(ContractCall {
            contract_id: DEFAULT_SBTC_CONTRACT_ID.into(),
            function_name: "transfer".into(),
            function_args: vec![
                arg("amount", format!("0x01{:032x}", amount), format!("u{}", amount), "uint"),
                arg("sender", "0x05".into(), format!("'{}", CUSTOMER_ADDR), "principal"),
                arg("recipient", "0x05".into(), format!("'{}", MERCHANT_ADDR), "principal"),
                arg(
                    "memo",
                    format!("0x0a02{:08x}{}", memo.len(), memo_bytes),
                    "(some 0x)".into(),
                    "(optional (buff 34))",
                ),
            ],
        }),
    }
}

#[tokio::test]
async fn test_health() {
    let gateway = create_gateway().await;
    let (status, body) = call(&gateway.app, empty_request(Method::GET, "/health")).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["status"], "ok");
}

#[tokio::test]
async fn test_confirm_reconcile_and_deliver() {
    let gateway = create_gateway().await;
    let app = &gateway.app;
    let merchant_id = create_merchant(app, Some(MERCHANT_ADDR)).await;

    let (status, webhook) = call(
        app,
        json_request(
            Method::POST,
            "/api/webhooks",
            json!({ "merchant_id": merchant_id, "url": gateway.hook_url, "events": ["*"] }),
        ),
    )
    .await;
    assert_eq!(status, StatusCode::CREATED);
    let secret = webhook["secret"].as_str().unwrap().to_string();
    assert!(secret.starts_with("whsec_"));

    let intent_id = create_intent(app, &merchant_id).await;

    let (status, confirmed) = call(
        app,
        empty_request(
            Method::POST,
            &format!("/api/payment_intents/{}/confirm", intent_id),
        ),
    )
    .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(confirmed["status"], "pending");

    // Nothing on chain yet.
    let reconcile_uri = format!("/api/payment_intents/{}/reconcile", intent_id);
    let (status, result) = call(app, empty_request(Method::POST, &reconcile_uri)).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(result["status"], "pending");
    assert_eq!(result["payment_intent"]["status"], "pending");

    gateway
        .chain
        .lock()
        .unwrap()
        .extend([transfer("0xshort", 49_999, &intent_id), transfer("0xpaid", 50_000, &intent_id)]);

    let (status, result) = call(app, empty_request(Method::POST, &reconcile_uri)).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(result["status"], "settled");
    assert_eq!(result["tx_id"], "0xpaid");
    assert_eq!(result["payment_intent"]["status"], "succeeded");
    assert_eq!(result["payment_intent"]["customer_address"], CUSTOMER_ADDR);

    let (_, again) = call(app, empty_request(Method::POST, &reconcile_uri)).await;
    assert_eq!(again["status"], "already_succeeded");

    let events_uri = format!("/api/webhook_events?merchant_id={}", merchant_id);
    let (status, events) = call(app, empty_request(Method::GET, &events_uri)).await;
    assert_eq!(status, StatusCode::OK);
    let events = events.as_array().unwrap().clone();
    assert_eq!(events.len(), 2);
    assert!(events.iter().all(|e| e["state"] == "pending"));

    let engine = Arc::new(
        DeliveryEngine::new(
            gateway.repo.clone(),
            DeliveryConfig {
                timeout: Duration::from_secs(5),
                ..DeliveryConfig::default()
            },
        )
        .unwrap(),
    );
    let report = engine.sweep().await.unwrap();
    assert_eq!(report.delivered, 2);

    {
        let received = gateway.received.lock().unwrap();
        assert_eq!(received.len(), 2);
        for (headers, body) in received.iter() {
            let header = headers[SIGNATURE_HEADER].to_str().unwrap();
            assert!(signature::verify(body, header, &secret));
        }
    }

    let (_, events) = call(app, empty_request(Method::GET, &events_uri)).await;
    for event in events.as_array().unwrap() {
        assert_eq!(event["state"], "delivered");
        assert_eq!(event["attempts"], 1);
        assert_eq!(event["response_status"], 200);

        let retry_uri = format!("/api/webhook_events/{}/retry", event["id"].as_str().unwrap());
        let (status, body) = call(app, empty_request(Method::POST, &retry_uri)).await;
        assert_eq!(status, StatusCode::CONFLICT);
        assert_eq!(body["code"], "invalid_state");
    }
}

#[tokio::test]
async fn test_error_responses() {
    let gateway = create_gateway().await;
    let app = &gateway.app;

    let (status, body) = call(app, empty_request(Method::GET, "/api/payment_intents/bogus")).await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert_eq!(body["code"], "bad_request");

    let (status, body) = call(
        app,
        empty_request(Method::GET, "/api/payment_intents/pi_doesnotexist"),
    )
    .await;
    assert_eq!(status, StatusCode::NOT_FOUND);
    assert_eq!(body["code"], "not_found");

    let merchant_id = create_merchant(app, None).await;
    let intent_id = create_intent(app, &merchant_id).await;

    let (status, body) = call(
        app,
        empty_request(
            Method::POST,
            &format!("/api/payment_intents/{}/reconcile", intent_id),
        ),
    )
    .await;
    assert_eq!(status, StatusCode::UNPROCESSABLE_ENTITY);
    assert_eq!(body["code"], "configuration_error");

    let (status, body) = call(
        app,
        json_request(
            Method::POST,
            &format!("/api/payment_intents/{}/fail", intent_id),
            json!({ "reason": "" }),
        ),
    )
    .await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert_eq!(body["code"], "bad_request");

    let settle_uri = format!("/api/payment_intents/{}/settle", intent_id);
    let (status, _) = call(
        app,
        json_request(Method::POST, &settle_uri, json!({ "tx_id": "0xfirst" })),
    )
    .await;
    assert_eq!(status, StatusCode::OK);

    let (status, body) = call(
        app,
        json_request(Method::POST, &settle_uri, json!({ "tx_id": "0xsecond" })),
    )
    .await;
    assert_eq!(status, StatusCode::CONFLICT);
    assert_eq!(body["code"], "invalid_state");

    let (_, intent) = call(
        app,
        empty_request(Method::GET, &format!("/api/payment_intents/{}", intent_id)),
    )
    .await;
    assert_eq!(intent["tx_id"], "0xfirst");
}

#[tokio::test]
async fn test_webhook_management() {
    let gateway = create_gateway().await;
    let app = &gateway.app;
    let merchant_id = create_merchant(app, Some(MERCHANT_ADDR)).await;

    let (status, _) = call(
        app,
        json_request(
            Method::POST,
            "/api/webhooks",
            json!({ "merchant_id": merchant_id, "url": gateway.hook_url, "events": ["invoice.paid"] }),
        ),
    )
    .await;
    assert_eq!(status, StatusCode::BAD_REQUEST);

    let (_, webhook) = call(
        app,
        json_request(
            Method::POST,
            "/api/webhooks",
            json!({ "merchant_id": merchant_id, "url": gateway.hook_url, "events": ["payment_intent.succeeded"] }),
        ),
    )
    .await;
    let webhook_id = webhook["id"].as_str().unwrap().to_string();
    let webhook_uri = format!("/api/webhooks/{}", webhook_id);

    let (status, updated) = call(
        app,
        json_request(Method::PATCH, &webhook_uri, json!({ "is_active": false })),
    )
    .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(updated["is_active"], false);
    assert_eq!(updated["secret"], webhook["secret"]);

    let (status, sent) = call(
        app,
        json_request(
            Method::POST,
            &format!("{}/test", webhook_uri),
            json!({ "event_type": "payment_intent.failed" }),
        ),
    )
    .await;
    assert_eq!(status, StatusCode::ACCEPTED);
    let event_id = sent["event_ids"][0].as_str().unwrap().to_string();

    let (status, event) = call(
        app,
        empty_request(Method::GET, &format!("/api/webhook_events/{}", event_id)),
    )
    .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(event["event_type"], "payment_intent.failed");
    assert_eq!(event["endpoint_id"], webhook_id.as_str());

    let (_, listed) = call(
        app,
        empty_request(Method::GET, &format!("/api/webhooks?merchant_id={}", merchant_id)),
    )
    .await;
    assert_eq!(listed.as_array().unwrap().len(), 1);

    let (status, _) = call(app, empty_request(Method::DELETE, &webhook_uri)).await;
    assert_eq!(status, StatusCode::NO_CONTENT);
    let (status, _) = call(app, empty_request(Method::DELETE, &webhook_uri)).await;
    assert_eq!(status, StatusCode::NOT_FOUND);

    // Undelivered events go with their endpoint.
    let (status, _) = call(
        app,
        empty_request(Method::GET, &format!("/api/webhook_events/{}", event_id)),
    )
    .await;
    assert_eq!(status, StatusCode::NOT_FOUND);
}
