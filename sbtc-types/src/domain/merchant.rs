//! Merchant domain model.
//!
//! Only the fields the confirmation pipeline needs; onboarding and profile
//! data live elsewhere.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use utoipa::ToSchema;

use super::ids::MerchantId;
use crate::error::DomainError;

/// A merchant receiving sBTC payments.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, ToSchema)]
pub struct Merchant {
    pub id: MerchantId,
    pub name: String,
    /// Address derived from the merchant's wallet at onboarding.
    pub default_address: Option<String>,
    /// Explicit override for where payments should land.
    pub recipient_address: Option<String>,
    pub created_at: DateTime<Utc>,
}

impl Merchant {
    /// Creates a new merchant.
    ///
    /// # Validation
    /// - Name cannot be empty
    pub fn new(
        name: String,
        default_address: Option<String>,
        recipient_address: Option<String>,
    ) -> Result<Self, DomainError> {
        if name.trim().is_empty() {
            return Err(DomainError::ValidationError(
                "Merchant name cannot be empty".into(),
            ));
        }

        Ok(Self {
            id: MerchantId::new(),
            name,
            default_address: non_blank(default_address),
            recipient_address: non_blank(recipient_address),
            created_at: Utc::now(),
        })
    }

    /// The address payments are expected at: the recipient override if set,
    /// otherwise the default address.
    pub fn receiving_address(&self) -> Option<&str> {
        self.recipient_address
            .as_deref()
            .or(self.default_address.as_deref())
            .map(str::trim)
            .filter(|a| !a.is_empty())
    }
}

fn non_blank(value: Option<String>) -> Option<String> {
    value
        .map(|v| v.trim().to_string())
        .filter(|v| !v.is_empty())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_recipient_override_wins() {
        let merchant = Merchant::new(
            "Shop".into(),
            Some("SP_DEFAULT".into()),
            Some("SP_OVERRIDE".into()),
        )
        .unwrap();
        assert_eq!(merchant.receiving_address(), Some("SP_OVERRIDE"));
    }

    #[test]
    fn test_falls_back_to_default_address() {
        let merchant = Merchant::new("Shop".into(), Some("SP_DEFAULT".into()), Some("  ".into()))
            .unwrap();
        assert_eq!(merchant.receiving_address(), Some("SP_DEFAULT"));
    }

    #[test]
    fn test_no_address_configured() {
        let merchant = Merchant::new("Shop".into(), None, None).unwrap();
        assert_eq!(merchant.receiving_address(), None);
    }

    #[test]
    fn test_empty_name_fails() {
        let result = Merchant::new(" ".into(), None, None);
        assert!(matches!(result, Err(DomainError::ValidationError(_))));
    }
}
