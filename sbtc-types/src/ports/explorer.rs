//! Block explorer port.
//!
//! The reconciler reads recent on-chain activity through this trait.
//! Implementations can be HTTP clients, mock providers, etc.

use crate::domain::ChainTransaction;

/// Error type for block explorer operations.
#[derive(Debug, thiserror::Error)]
pub enum ExplorerError {
    #[error("Explorer request failed: {0}")]
    Request(String),

    #[error("Explorer returned {status}: {message}")]
    Status { status: u16, message: String },

    #[error("Explorer rate limit exceeded")]
    RateLimited,

    #[error("Malformed explorer response: {0}")]
    Decode(String),
}

/// Port trait for block explorer collaborators.
#[async_trait::async_trait]
pub trait BlockExplorer: Send + Sync {
    /// Most recent transactions touching `address`, newest first.
    /// Implementations cap `limit` at their own page size.
    async fn recent_transactions(
        &self,
        address: &str,
        limit: u32,
    ) -> Result<Vec<ChainTransaction>, ExplorerError>;
}
