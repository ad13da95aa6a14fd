//! Type-safe monetary value with embedded currency.

use serde::{Deserialize, Serialize};
use std::fmt;
use utoipa::ToSchema;

use crate::error::DomainError;

/// Currencies a payment intent can be denominated in.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize, ToSchema)]
#[serde(rename_all = "lowercase")]
pub enum Currency {
    /// sBTC, settled on Stacks. Base unit is the satoshi.
    #[default]
    Sbtc,
    Usd,
}

impl Currency {
    /// Returns the number of decimal places for this currency.
    pub fn decimal_places(&self) -> u32 {
        match self {
            Currency::Sbtc => 8,
            Currency::Usd => 2,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Currency::Sbtc => "sbtc",
            Currency::Usd => "usd",
        }
    }
}

impl fmt::Display for Currency {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl std::str::FromStr for Currency {
    type Err = DomainError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "sbtc" => Ok(Currency::Sbtc),
            "usd" => Ok(Currency::Usd),
            other => Err(DomainError::ValidationError(format!(
                "Unknown currency: {}",
                other
            ))),
        }
    }
}

/// Type-safe money representation with embedded currency.
///
/// Amount is stored in the smallest unit of the currency (satoshis, cents)
/// to avoid floating-point precision issues.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, ToSchema)]
pub struct Money {
    amount: i64,
    currency: Currency,
}

impl Money {
    /// Creates a new Money value.
    pub fn new(amount: i64, currency: Currency) -> Result<Self, DomainError> {
        if amount < 0 {
            return Err(DomainError::NegativeAmount);
        }
        Ok(Self { amount, currency })
    }

    /// Creates a strictly positive Money value, as required for payment amounts.
    pub fn positive(amount: i64, currency: Currency) -> Result<Self, DomainError> {
        if amount <= 0 {
            return Err(DomainError::NonPositiveAmount);
        }
        Ok(Self { amount, currency })
    }

    /// Returns the amount in base units.
    pub fn amount(&self) -> i64 {
        self.amount
    }

    /// Returns the currency.
    pub fn currency(&self) -> Currency {
        self.currency
    }

    /// True when `base_units` is exactly this amount. No tolerance either way.
    pub fn equals_base_units(&self, base_units: u128) -> bool {
        u128::try_from(self.amount).is_ok_and(|amount| amount == base_units)
    }
}

impl fmt::Display for Money {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let places = self.currency.decimal_places();
        let scale = 10_i64.pow(places);
        let major = self.amount / scale;
        let minor = self.amount % scale;
        write!(
            f,
            "{}.{:0width$} {}",
            major,
            minor,
            self.currency.as_str().to_uppercase(),
            width = places as usize
        )
    }
}
