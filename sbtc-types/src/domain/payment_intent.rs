//! Payment intent domain model and its lifecycle.
//!
//! ```text
//! created ──confirm──▶ pending ──settle──▶ succeeded
//!    │                   │  └────fail────▶ failed
//!    │                   └─────cancel────▶ canceled
//!    ├──settle / fail / cancel (direct)
//! ```
//!
//! `succeeded`, `failed` and `canceled` are terminal.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use utoipa::ToSchema;

use super::ids::{MerchantId, PaymentIntentId};
use super::money::Money;
use crate::error::DomainError;

/// Metadata key under which `fail` records its reason.
pub const FAILURE_REASON_KEY: &str = "failure_reason";

/// Lifecycle state of a payment intent.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, ToSchema)]
#[serde(rename_all = "snake_case")]
pub enum PaymentIntentStatus {
    Created,
    Pending,
    Succeeded,
    Failed,
    Canceled,
}

impl PaymentIntentStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Created => "created",
            Self::Pending => "pending",
            Self::Succeeded => "succeeded",
            Self::Failed => "failed",
            Self::Canceled => "canceled",
        }
    }

    /// No transition leaves a terminal state.
    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::Succeeded | Self::Failed | Self::Canceled)
    }
}

impl std::fmt::Display for PaymentIntentStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl std::str::FromStr for PaymentIntentStatus {
    type Err = DomainError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "created" => Ok(Self::Created),
            "pending" => Ok(Self::Pending),
            "succeeded" => Ok(Self::Succeeded),
            "failed" => Ok(Self::Failed),
            "canceled" => Ok(Self::Canceled),
            other => Err(DomainError::ValidationError(format!(
                "Unknown payment intent status: {}",
                other
            ))),
        }
    }
}

/// Open key/value map attached to an intent.
///
/// Updates merge into the existing map: keys present in a patch overwrite
/// their previous value, every other key is kept. Nothing is ever removed.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize, ToSchema)]
#[serde(transparent)]
#[schema(value_type = Object)]
pub struct Metadata(Map<String, Value>);

impl Metadata {
    pub fn new() -> Self {
        Self(Map::new())
    }

    pub fn get(&self, key: &str) -> Option<&Value> {
        self.0.get(key)
    }

    pub fn insert(&mut self, key: impl Into<String>, value: impl Into<Value>) {
        self.0.insert(key.into(), value.into());
    }

    /// Additive merge of `patch` into `self`.
    pub fn merge(&mut self, patch: &Metadata) {
        for (key, value) in &patch.0 {
            self.0.insert(key.clone(), value.clone());
        }
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }
}

impl From<Map<String, Value>> for Metadata {
    fn from(map: Map<String, Value>) -> Self {
        Self(map)
    }
}

/// A lifecycle transition with the data it carries.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Transition {
    Confirm {
        customer_address: Option<String>,
    },
    Settle {
        tx_id: String,
        customer_address: Option<String>,
    },
    Fail {
        reason: String,
    },
    Cancel,
}

impl Transition {
    /// The state the intent ends up in.
    pub fn target(&self) -> PaymentIntentStatus {
        match self {
            Transition::Confirm { .. } => PaymentIntentStatus::Pending,
            Transition::Settle { .. } => PaymentIntentStatus::Succeeded,
            Transition::Fail { .. } => PaymentIntentStatus::Failed,
            Transition::Cancel => PaymentIntentStatus::Canceled,
        }
    }

    /// Source states this transition may start from.
    pub fn allowed_from(&self) -> &'static [PaymentIntentStatus] {
        use PaymentIntentStatus::*;
        match self {
            Transition::Confirm { .. } => &[Created],
            Transition::Settle { .. } | Transition::Fail { .. } | Transition::Cancel => {
                &[Created, Pending]
            }
        }
    }

    pub fn permits(&self, from: PaymentIntentStatus) -> bool {
        self.allowed_from().contains(&from)
    }

    /// Metadata keys the transition adds. Merged into the stored map, never
    /// written over it.
    pub fn metadata_patch(&self) -> Metadata {
        let mut patch = Metadata::new();
        if let Transition::Fail { reason } = self {
            patch.insert(FAILURE_REASON_KEY, reason.clone());
        }
        patch
    }

    pub fn name(&self) -> &'static str {
        match self {
            Transition::Confirm { .. } => "confirm",
            Transition::Settle { .. } => "settle",
            Transition::Fail { .. } => "fail",
            Transition::Cancel => "cancel",
        }
    }
}

/// A merchant's request to receive a specific amount from a customer.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, ToSchema)]
pub struct PaymentIntent {
    pub id: PaymentIntentId,
    pub merchant_id: MerchantId,
    /// Amount in base units plus its currency tag.
    #[serde(flatten)]
    pub amount: Money,
    /// Optional USD shadow amount, in cents.
    pub amount_usd_cents: Option<i64>,
    pub description: Option<String>,
    pub customer_address: Option<String>,
    pub customer_email: Option<String>,
    pub metadata: Metadata,
    /// Settlement transaction id, attached by `settle`.
    pub tx_id: Option<String>,
    pub status: PaymentIntentStatus,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl PaymentIntent {
    /// Creates a new intent in the `created` state.
    ///
    /// `amount` must already be a validated positive [`Money`].
    pub fn new(
        merchant_id: MerchantId,
        amount: Money,
        description: Option<String>,
        customer_email: Option<String>,
        metadata: Metadata,
        amount_usd_cents: Option<i64>,
    ) -> Result<Self, DomainError> {
        if amount.amount() <= 0 {
            return Err(DomainError::NonPositiveAmount);
        }
        if amount_usd_cents.is_some_and(|cents| cents < 0) {
            return Err(DomainError::NegativeAmount);
        }

        let now = Utc::now();
        Ok(Self {
            id: PaymentIntentId::new(),
            merchant_id,
            amount,
            amount_usd_cents,
            description,
            customer_address: None,
            customer_email,
            metadata,
            tx_id: None,
            status: PaymentIntentStatus::Created,
            created_at: now,
            updated_at: now,
        })
    }

    /// Computes the intent after `transition`, leaving `self` untouched.
    ///
    /// Fails with [`DomainError::InvalidState`] when the current status is
    /// not an allowed source for the transition.
    pub fn apply(&self, transition: &Transition, now: DateTime<Utc>) -> Result<Self, DomainError> {
        if !transition.permits(self.status) {
            return Err(DomainError::InvalidState {
                from: self.status,
                to: transition.target(),
            });
        }

        let mut next = self.clone();
        match transition {
            Transition::Confirm { customer_address } => {
                if let Some(address) = customer_address {
                    next.customer_address = Some(address.clone());
                }
            }
            Transition::Settle {
                tx_id,
                customer_address,
            } => {
                if tx_id.trim().is_empty() {
                    return Err(DomainError::ValidationError(
                        "Settlement transaction id cannot be empty".into(),
                    ));
                }
                next.tx_id = Some(tx_id.clone());
                if let Some(address) = customer_address {
                    next.customer_address = Some(address.clone());
                }
            }
            Transition::Fail { .. } | Transition::Cancel => {}
        }
        next.metadata.merge(&transition.metadata_patch());
        next.status = transition.target();
        next.updated_at = now;
        Ok(next)
    }
}
