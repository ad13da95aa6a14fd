//! Hiro Stacks API client.
//!
//! Implements the [`BlockExplorer`] port against
//! `GET {base}/extended/v1/address/{principal}/transactions`. The public API
//! is rate-limited, so every client carries its own token bucket and a hard
//! page-size ceiling.
//!
//! # Example
//! ```no_run
//! use sbtc_types::BlockExplorer;
//! use stacks_explorer::{ExplorerConfig, HiroExplorer};
//!
//! # async fn run() -> Result<(), sbtc_types::ExplorerError> {
//! let explorer = HiroExplorer::new(ExplorerConfig::default())?;
//! let txs = explorer.recent_transactions("SP2J6ZY48GV1EZ5V2V5RB9MP66SW86PYKKNRV9EJ7", 20).await?;
//! println!("{} transactions", txs.len());
//! # Ok(())
//! # }
//! ```

use std::num::NonZeroU32;
use std::time::Duration;

use async_trait::async_trait;
use governor::{
    Quota, RateLimiter,
    clock::DefaultClock,
    state::{InMemoryState, NotKeyed},
};
use reqwest::{Client, StatusCode};
use serde::Deserialize;

use sbtc_types::{BlockExplorer, ChainTransaction, ExplorerError};

pub const DEFAULT_BASE_URL: &str = "https://api.hiro.so";

/// Largest page the address transactions endpoint serves.
pub const MAX_PAGE_SIZE: u32 = 50;

/// Connection settings for [`HiroExplorer`].
#[derive(Debug, Clone)]
pub struct ExplorerConfig {
    pub base_url: String,
    /// Upper bound on transactions fetched per call, clamped to `1..=MAX_PAGE_SIZE`.
    pub page_size: u32,
    pub timeout: Duration,
    pub requests_per_second: u32,
}

impl Default for ExplorerConfig {
    fn default() -> Self {
        Self {
            base_url: DEFAULT_BASE_URL.to_string(),
            page_size: MAX_PAGE_SIZE,
            timeout: Duration::from_secs(10),
            requests_per_second: 5,
        }
    }
}

/// Block explorer backed by the Hiro Stacks API.
pub struct HiroExplorer {
    base_url: String,
    page_size: u32,
    http: Client,
    limiter: RateLimiter<NotKeyed, InMemoryState, DefaultClock>,
}

#[derive(Deserialize)]
struct TransactionPage {
    #[serde(default)]
    results: Vec<ChainTransaction>,
}

impl HiroExplorer {
    pub fn new(config: ExplorerConfig) -> Result<Self, ExplorerError> {
        let http = Client::builder()
            .timeout(config.timeout)
            .build()
            .map_err(|e| ExplorerError::Request(e.to_string()))?;

        let rps = NonZeroU32::new(config.requests_per_second).unwrap_or(NonZeroU32::MIN);

        Ok(Self {
            base_url: config.base_url.trim_end_matches('/').to_string(),
            page_size: config.page_size.clamp(1, MAX_PAGE_SIZE),
            http,
            limiter: RateLimiter::direct(Quota::per_second(rps)),
        })
    }

    /// Effective page-size ceiling.
    pub fn page_size(&self) -> u32 {
        self.page_size
    }

    fn transactions_url(&self, address: &str) -> String {
        format!(
            "{}/extended/v1/address/{}/transactions",
            self.base_url, address
        )
    }
}

#[async_trait]
impl BlockExplorer for HiroExplorer {
    async fn recent_transactions(
        &self,
        address: &str,
        limit: u32,
    ) -> Result<Vec<ChainTransaction>, ExplorerError> {
        let limit = limit.clamp(1, self.page_size);

        // Wait for a token rather than failing: the reconciler is a background job.
        self.limiter.until_ready().await;

        tracing::debug!(address, limit, "fetching address transactions");

        let response = self
            .http
            .get(self.transactions_url(address))
            .query(&[("limit", limit)])
            .send()
            .await
            .map_err(|e| ExplorerError::Request(e.to_string()))?;

        let status = response.status();
        if status == StatusCode::TOO_MANY_REQUESTS {
            tracing::warn!(address, "explorer rate limit hit");
            return Err(ExplorerError::RateLimited);
        }
        if !status.is_success() {
            let message = response.text().await.unwrap_or_default();
            return Err(ExplorerError::Status {
                status: status.as_u16(),
                message,
            });
        }

        let page: TransactionPage = response
            .json()
            .await
            .map_err(|e| ExplorerError::Decode(e.to_string()))?;

        Ok(page.results)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::{
        Json, Router,
        extract::{Path, Query},
        http::StatusCode as AxumStatus,
        routing::get,
    };
    use serde_json::{Value, json};
    use std::collections::HashMap;

    async fn serve(router: Router) -> String {
        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        tokio::spawn(async move {
            axum::serve(listener, router).await.unwrap();
        });
        format!("http://{}", addr)
    }

    fn explorer(base_url: String) -> HiroExplorer {
        HiroExplorer::new(ExplorerConfig {
            base_url,
            requests_per_second: 100,
            ..Default::default()
        })
        .unwrap()
    }

    async fn page(
        Path(address): Path<String>,
        Query(params): Query<HashMap<String, String>>,
    ) -> Json<Value> {
        let limit = params.get("limit").cloned().unwrap_or_default();
        Json(json!({
            "limit": 50,
            "offset": 0,
            "total": 2,
            "results": [
                {
                    "tx_id": format!("0xlimit{}", limit),
                    "tx_status": "success",
                    "tx_type": "contract_call",
                    "block_height": 150_000,
                    "sender_address": "SP_SENDER",
                    "fee_rate": "3000",
                    "contract_call": {
                        "contract_id": "SM3VDXK3WZZSA84XXFKAFAF15NNZX32CTSG82JFQ4.sbtc-token",
                        "function_name": "transfer",
                        "function_signature": "(define-public (transfer ...))",
                        "function_args": [
                            {"hex": "0x01000000000000000000000000000003e8", "repr": "u1000", "name": "amount", "type": "uint"},
                            {"hex": "0x05", "repr": "'SP_SENDER", "name": "sender", "type": "principal"},
                            {"hex": "0x05", "repr": format!("'{}", address), "name": "recipient", "type": "principal"}
                        ]
                    }
                },
                {
                    "tx_id": "0xtoken_transfer",
                    "tx_status": "pending",
                    "tx_type": "token_transfer",
                    "sender_address": "SP_OTHER"
                }
            ]
        }))
    }

    #[tokio::test]
    async fn test_decodes_transaction_page() {
        let base = serve(Router::new().route(
            "/extended/v1/address/{address}/transactions",
            get(page),
        ))
        .await;

        let txs = explorer(base)
            .recent_transactions("SP_MERCHANT", 20)
            .await
            .unwrap();

        assert_eq!(txs.len(), 2);
        assert_eq!(txs[0].tx_id, "0xlimit20");
        assert_eq!(txs[0].block_height, Some(150_000));
        let call = txs[0].contract_call.as_ref().unwrap();
        assert_eq!(call.function_name, "transfer");
        assert_eq!(call.function_args.len(), 3);
        assert_eq!(call.function_args[2].repr, "'SP_MERCHANT");

        assert_eq!(txs[1].block_height, None);
        assert!(txs[1].contract_call.is_none());
    }

    #[tokio::test]
    async fn test_limit_is_clamped_to_page_size() {
        let base = serve(Router::new().route(
            "/extended/v1/address/{address}/transactions",
            get(page),
        ))
        .await;
        let explorer = explorer(base);

        let txs = explorer.recent_transactions("SP_MERCHANT", 500).await.unwrap();
        assert_eq!(txs[0].tx_id, "0xlimit50");

        let txs = explorer.recent_transactions("SP_MERCHANT", 0).await.unwrap();
        assert_eq!(txs[0].tx_id, "0xlimit1");
    }

    #[tokio::test]
    async fn test_configured_page_size_is_bounded() {
        let small = HiroExplorer::new(ExplorerConfig {
            page_size: 10,
            ..Default::default()
        })
        .unwrap();
        assert_eq!(small.page_size(), 10);

        let large = HiroExplorer::new(ExplorerConfig {
            page_size: 1_000,
            ..Default::default()
        })
        .unwrap();
        assert_eq!(large.page_size(), MAX_PAGE_SIZE);
    }

    #[tokio::test]
    async fn test_rate_limited_response() {
        let base = serve(Router::new().route(
            "/extended/v1/address/{address}/transactions",
            get(|| async { (AxumStatus::TOO_MANY_REQUESTS, "slow down") }),
        ))
        .await;

        let result = explorer(base).recent_transactions("SP_MERCHANT", 10).await;

        assert!(matches!(result, Err(ExplorerError::RateLimited)));
    }

    #[tokio::test]
    async fn test_upstream_error_status() {
        let base = serve(Router::new().route(
            "/extended/v1/address/{address}/transactions",
            get(|| async { (AxumStatus::BAD_GATEWAY, "upstream down") }),
        ))
        .await;

        let result = explorer(base).recent_transactions("SP_MERCHANT", 10).await;

        match result {
            Err(ExplorerError::Status { status, message }) => {
                assert_eq!(status, 502);
                assert_eq!(message, "upstream down");
            }
            other => panic!("expected status error, got {:?}", other.map(|t| t.len())),
        }
    }

    #[tokio::test]
    async fn test_malformed_body() {
        let base = serve(Router::new().route(
            "/extended/v1/address/{address}/transactions",
            get(|| async { "not json" }),
        ))
        .await;

        let result = explorer(base).recent_transactions("SP_MERCHANT", 10).await;

        assert!(matches!(result, Err(ExplorerError::Decode(_))));
    }

    #[tokio::test]
    async fn test_unreachable_host() {
        let explorer = HiroExplorer::new(ExplorerConfig {
            base_url: "http://127.0.0.1:1".into(),
            timeout: Duration::from_secs(2),
            ..Default::default()
        })
        .unwrap();

        let result = explorer.recent_transactions("SP_MERCHANT", 10).await;

        assert!(matches!(result, Err(ExplorerError::Request(_))));
    }
}
