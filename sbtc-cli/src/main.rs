//! sBTC CLI
//!
//! Command-line interface for the sBTC payment gateway API.

use std::sync::Arc;

use anyhow::Result;
use axum::{
    body::Bytes,
    extract::State,
    http::{HeaderMap, StatusCode},
};
use clap::{Parser, Subcommand};
use serde_json::Value;

use sbtc_client::SbtcClient;
use sbtc_types::{
    CreateMerchantRequest, CreatePaymentIntentRequest, Currency, MerchantId, Metadata,
    PaymentIntentId, RegisterWebhookRequest, UpdateWebhookRequest, WebhookEndpointId,
    WebhookEventId,
    signature::{EVENT_ID_HEADER, EVENT_TYPE_HEADER, SIGNATURE_HEADER, verify_fresh},
};

/// Accepted clock skew between the gateway and the listener.
const SIGNATURE_TOLERANCE_SECS: i64 = 300;

#[derive(Parser)]
#[command(name = "sbtc")]
#[command(author, version, about = "sBTC payment gateway CLI client", long_about = None)]
struct Cli {
    /// Base URL of the gateway API
    #[arg(long, env = "SBTC_API_URL", default_value = "http://localhost:3000")]
    api_url: String,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Merchant operations
    Merchant {
        #[command(subcommand)]
        action: MerchantCommands,
    },
    /// Payment intent operations
    Intent {
        #[command(subcommand)]
        action: IntentCommands,
    },
    /// Webhook endpoint operations
    Webhook {
        #[command(subcommand)]
        action: WebhookCommands,
    },
    /// Webhook delivery inspection
    Event {
        #[command(subcommand)]
        action: EventCommands,
    },
    /// Check API health
    Health,
}

#[derive(Subcommand)]
enum MerchantCommands {
    /// Create a merchant
    Create {
        name: String,
        /// Stacks address that receives settlements
        #[arg(long)]
        recipient_address: Option<String>,
        /// Fallback receiving address
        #[arg(long)]
        default_address: Option<String>,
    },
    /// Get merchant details
    Get { id: String },
}

#[derive(Subcommand)]
enum IntentCommands {
    /// Create a payment intent
    Create {
        #[arg(long)]
        merchant: String,
        /// Amount in base units (satoshis for sBTC)
        #[arg(long)]
        amount: i64,
        /// Currency (sbtc, usd)
        #[arg(long, default_value = "sbtc")]
        currency: String,
        #[arg(long)]
        description: Option<String>,
        #[arg(long)]
        customer_email: Option<String>,
        /// Metadata entries as key=value
        #[arg(long = "meta", value_parser = parse_entry)]
        metadata: Vec<(String, Value)>,
    },
    /// Get a payment intent
    Get { id: String },
    /// List a merchant's payment intents
    List {
        #[arg(long)]
        merchant: String,
    },
    /// Move an intent to pending
    Confirm {
        id: String,
        #[arg(long)]
        customer_address: Option<String>,
    },
    /// Mark an intent as paid by a transaction
    Settle {
        id: String,
        #[arg(long)]
        tx_id: String,
        #[arg(long)]
        customer_address: Option<String>,
    },
    /// Mark an intent as failed
    Fail {
        id: String,
        #[arg(long)]
        reason: String,
    },
    /// Cancel an intent
    Cancel { id: String },
    /// Look for a settling transfer on chain
    Reconcile { id: String },
    /// Merge metadata entries (key=value) into an intent
    Metadata {
        id: String,
        #[arg(required = true, value_parser = parse_entry)]
        entries: Vec<(String, Value)>,
    },
}

#[derive(Subcommand)]
enum WebhookCommands {
    /// Register a new webhook endpoint
    Register {
        #[arg(long)]
        merchant: String,
        /// URL to receive webhooks
        #[arg(long)]
        url: String,
        /// Event types to subscribe to (comma-separated, `*` for all)
        #[arg(long, value_delimiter = ',', default_value = "*")]
        events: Vec<String>,
    },
    /// List a merchant's webhook endpoints
    List {
        #[arg(long)]
        merchant: String,
    },
    /// Change an endpoint's URL, subscriptions or active flag
    Update {
        id: String,
        #[arg(long)]
        url: Option<String>,
        #[arg(long, value_delimiter = ',')]
        events: Option<Vec<String>>,
        #[arg(long)]
        active: Option<bool>,
    },
    /// Delete an endpoint
    Delete { id: String },
    /// Send a synthetic event to one endpoint
    Test {
        id: String,
        #[arg(long)]
        event_type: Option<String>,
    },
    /// Start a local webhook listener
    Listen {
        /// Port to listen on
        #[arg(long, default_value = "4000")]
        port: u16,
        /// Endpoint secret; deliveries with a bad signature get 401
        #[arg(long, env = "SBTC_WEBHOOK_SECRET")]
        secret: Option<String>,
    },
}

#[derive(Subcommand)]
enum EventCommands {
    /// List a merchant's webhook events, newest first
    List {
        #[arg(long)]
        merchant: String,
        #[arg(long)]
        limit: Option<i64>,
    },
    /// Get one webhook event
    Get { id: String },
    /// Schedule one more delivery attempt
    Retry { id: String },
}

fn parse_currency(s: &str) -> Result<Currency> {
    match s.to_lowercase().as_str() {
        "sbtc" => Ok(Currency::Sbtc),
        "usd" => Ok(Currency::Usd),
        _ => anyhow::bail!("Unknown currency: {}. Supported: sbtc, usd", s),
    }
}

/// `key=value`; the value is read as JSON when it parses, else as a string.
fn parse_entry(s: &str) -> Result<(String, Value), String> {
    let (key, raw) = s
        .split_once('=')
        .ok_or_else(|| format!("expected key=value, got `{}`", s))?;
    if key.is_empty() {
        return Err(format!("empty key in `{}`", s));
    }
    let value = serde_json::from_str(raw).unwrap_or_else(|_| Value::String(raw.to_string()));
    Ok((key.to_string(), value))
}

fn to_metadata(entries: Vec<(String, Value)>) -> Metadata {
    let mut metadata = Metadata::new();
    for (key, value) in entries {
        metadata.insert(key, value);
    }
    metadata
}

fn print_json<T: serde::Serialize>(value: &T) -> Result<()> {
    println!("{}", serde_json::to_string_pretty(value)?);
    Ok(())
}

#[tokio::main]
async fn main() -> Result<()> {
    dotenvy::dotenv().ok();

    let cli = Cli::parse();
    let client = SbtcClient::new(&cli.api_url);

    match cli.command {
        Commands::Health => match client.health().await {
            Ok(health) => println!("✓ API is {} (version {})", health.status, health.version),
            Err(e) => {
                println!("✗ API is not healthy: {}", e);
                std::process::exit(1);
            }
        },

        Commands::Merchant { action } => match action {
            MerchantCommands::Create {
                name,
                recipient_address,
                default_address,
            } => {
                let merchant = client
                    .create_merchant(&CreateMerchantRequest {
                        name,
                        default_address,
                        recipient_address,
                    })
                    .await?;
                print_json(&merchant)?;
            }
            MerchantCommands::Get { id } => {
                let id: MerchantId = id.parse()?;
                print_json(&client.get_merchant(&id).await?)?;
            }
        },

        Commands::Intent { action } => match action {
            IntentCommands::Create {
                merchant,
                amount,
                currency,
                description,
                customer_email,
                metadata,
            } => {
                let intent = client
                    .create_payment_intent(&CreatePaymentIntentRequest {
                        merchant_id: merchant.parse()?,
                        amount,
                        currency: parse_currency(&currency)?,
                        description,
                        customer_email,
                        metadata: to_metadata(metadata),
                        amount_usd_cents: None,
                    })
                    .await?;
                print_json(&intent)?;
            }
            IntentCommands::Get { id } => {
                let id: PaymentIntentId = id.parse()?;
                print_json(&client.get_payment_intent(&id).await?)?;
            }
            IntentCommands::List { merchant } => {
                let merchant: MerchantId = merchant.parse()?;
                print_json(&client.list_payment_intents(&merchant).await?)?;
            }
            IntentCommands::Confirm {
                id,
                customer_address,
            } => {
                let id: PaymentIntentId = id.parse()?;
                print_json(&client.confirm(&id, customer_address).await?)?;
            }
            IntentCommands::Settle {
                id,
                tx_id,
                customer_address,
            } => {
                let id: PaymentIntentId = id.parse()?;
                print_json(&client.settle(&id, tx_id, customer_address).await?)?;
            }
            IntentCommands::Fail { id, reason } => {
                let id: PaymentIntentId = id.parse()?;
                print_json(&client.fail(&id, reason).await?)?;
            }
            IntentCommands::Cancel { id } => {
                let id: PaymentIntentId = id.parse()?;
                print_json(&client.cancel(&id).await?)?;
            }
            IntentCommands::Reconcile { id } => {
                let id: PaymentIntentId = id.parse()?;
                print_json(&client.reconcile(&id).await?)?;
            }
            IntentCommands::Metadata { id, entries } => {
                let id: PaymentIntentId = id.parse()?;
                print_json(&client.update_metadata(&id, to_metadata(entries)).await?)?;
            }
        },

        Commands::Webhook { action } => match action {
            WebhookCommands::Register {
                merchant,
                url,
                events,
            } => {
                let events: Vec<String> = events.into_iter().filter(|e| !e.is_empty()).collect();
                let webhook = client
                    .register_webhook(&RegisterWebhookRequest {
                        merchant_id: merchant.parse()?,
                        url,
                        events,
                    })
                    .await?;
                print_json(&webhook)?;
            }
            WebhookCommands::List { merchant } => {
                let merchant: MerchantId = merchant.parse()?;
                print_json(&client.list_webhooks(&merchant).await?)?;
            }
            WebhookCommands::Update {
                id,
                url,
                events,
                active,
            } => {
                let id: WebhookEndpointId = id.parse()?;
                let req = UpdateWebhookRequest {
                    url,
                    events,
                    is_active: active,
                };
                print_json(&client.update_webhook(&id, &req).await?)?;
            }
            WebhookCommands::Delete { id } => {
                let id: WebhookEndpointId = id.parse()?;
                client.delete_webhook(&id).await?;
                println!("✓ Webhook deleted");
            }
            WebhookCommands::Test { id, event_type } => {
                let id: WebhookEndpointId = id.parse()?;
                print_json(&client.send_test_event(&id, event_type).await?)?;
            }
            WebhookCommands::Listen { port, secret } => {
                if secret.is_none() {
                    println!("No secret given, signatures will not be checked");
                }
                let app = axum::Router::new()
                    .route("/webhook", axum::routing::post(handle_webhook))
                    .with_state(Arc::new(secret));
                let addr = std::net::SocketAddr::from(([127, 0, 0, 1], port));
                println!("Listening for webhooks on http://{}/webhook", addr);
                let listener = tokio::net::TcpListener::bind(&addr).await?;
                axum::serve(listener, app).await?;
            }
        },

        Commands::Event { action } => match action {
            EventCommands::List { merchant, limit } => {
                let merchant: MerchantId = merchant.parse()?;
                print_json(&client.list_events(&merchant, limit).await?)?;
            }
            EventCommands::Get { id } => {
                let id: WebhookEventId = id.parse()?;
                print_json(&client.get_event(&id).await?)?;
            }
            EventCommands::Retry { id } => {
                let id: WebhookEventId = id.parse()?;
                print_json(&client.retry_event(&id).await?)?;
            }
        },
    }

    Ok(())
}

/// Status to answer a delivery with: 401 when a secret is set and the
/// signature is missing, wrong or stale.
fn check_delivery(headers: &HeaderMap, body: &[u8], secret: Option<&str>, now: i64) -> StatusCode {
    let Some(secret) = secret else {
        return StatusCode::OK;
    };
    let header = headers
        .get(SIGNATURE_HEADER)
        .and_then(|v| v.to_str().ok())
        .unwrap_or_default();
    if verify_fresh(body, header, secret, now, SIGNATURE_TOLERANCE_SECS) {
        StatusCode::OK
    } else {
        StatusCode::UNAUTHORIZED
    }
}

async fn handle_webhook(
    State(secret): State<Arc<Option<String>>>,
    headers: HeaderMap,
    body: Bytes,
) -> StatusCode {
    let status = check_delivery(
        &headers,
        &body,
        secret.as_deref(),
        chrono::Utc::now().timestamp(),
    );

    let header = |name: &str| {
        headers
            .get(name)
            .and_then(|v| v.to_str().ok())
            .unwrap_or("-")
            .to_string()
    };
    println!(
        "POST /webhook {} {} -> {}",
        header(EVENT_TYPE_HEADER),
        header(EVENT_ID_HEADER),
        status
    );
    if status != StatusCode::OK {
        println!("signature rejected, body discarded");
        println!("----------------------------------------");
        return status;
    }
    match serde_json::from_slice::<Value>(&body) {
        Ok(json) => println!(
            "{}",
            serde_json::to_string_pretty(&json).unwrap_or_default()
        ),
        Err(_) => println!("{}", String::from_utf8_lossy(&body)),
    }
    println!("----------------------------------------");
    status
}

#[cfg(test)]
mod tests {
    use super::*;

    use axum::http::HeaderValue;
    use sbtc_types::signature::sign;

    const SECRET: &str = "whsec_listener";
    const BODY: &[u8] = br#"{"type":"payment_intent.succeeded"}"#;
    const NOW: i64 = 1_700_000_000;

    fn signed_headers(secret: &str, timestamp: i64) -> HeaderMap {
        let mut headers = HeaderMap::new();
        let value = HeaderValue::from_str(&sign(BODY, secret, timestamp)).unwrap();
        headers.insert(SIGNATURE_HEADER, value);
        headers
    }

    #[test]
    fn test_listener_accepts_valid_signature() {
        let headers = signed_headers(SECRET, NOW);
        assert_eq!(check_delivery(&headers, BODY, Some(SECRET), NOW), StatusCode::OK);
    }

    #[test]
    fn test_listener_rejects_bad_or_missing_signature() {
        let wrong = signed_headers("whsec_other", NOW);
        assert_eq!(
            check_delivery(&wrong, BODY, Some(SECRET), NOW),
            StatusCode::UNAUTHORIZED
        );
        assert_eq!(
            check_delivery(&HeaderMap::new(), BODY, Some(SECRET), NOW),
            StatusCode::UNAUTHORIZED
        );
    }

    #[test]
    fn test_listener_rejects_stale_signature() {
        let headers = signed_headers(SECRET, NOW - SIGNATURE_TOLERANCE_SECS - 1);
        assert_eq!(
            check_delivery(&headers, BODY, Some(SECRET), NOW),
            StatusCode::UNAUTHORIZED
        );
    }

    #[test]
    fn test_listener_rejects_out_of_range_timestamp() {
        let mut headers = HeaderMap::new();
        let value = HeaderValue::from_str(&format!("t={},v1=00", i64::MIN)).unwrap();
        headers.insert(SIGNATURE_HEADER, value);
        assert_eq!(
            check_delivery(&headers, BODY, Some(SECRET), NOW),
            StatusCode::UNAUTHORIZED
        );
    }

    #[test]
    fn test_listener_without_secret_accepts_everything() {
        assert_eq!(
            check_delivery(&HeaderMap::new(), BODY, None, NOW),
            StatusCode::OK
        );
    }

    #[test]
    fn test_parse_entry_reads_json_values() {
        assert_eq!(
            parse_entry("qty=3").unwrap(),
            ("qty".to_string(), serde_json::json!(3))
        );
        assert_eq!(
            parse_entry("order=A-1").unwrap(),
            ("order".to_string(), Value::String("A-1".into()))
        );
        assert!(parse_entry("novalue").is_err());
        assert!(parse_entry("=x").is_err());
    }
}
