//! Prefixed, globally unique identifiers.
//!
//! Every id renders as `<prefix>_<uuid-v4 simple>`, e.g. `pi_3f2a...`.

macro_rules! prefixed_id {
    ($(#[$meta:meta])* $name:ident, $prefix:literal) => {
        $(#[$meta])*
        #[derive(
            Debug,
            Clone,
            PartialEq,
            Eq,
            Hash,
            PartialOrd,
            Ord,
            serde::Serialize,
            serde::Deserialize,
            utoipa::ToSchema,
        )]
        #[serde(transparent)]
        pub struct $name(String);

        impl $name {
            /// Id prefix, without the trailing underscore.
            pub const PREFIX: &'static str = $prefix;

            /// Creates a new random id.
            pub fn new() -> Self {
                Self(format!("{}_{}", $prefix, uuid::Uuid::new_v4().simple()))
            }

            /// Rebuilds an id from a stored value without validation.
            pub fn from_raw(raw: impl Into<String>) -> Self {
                Self(raw.into())
            }

            pub fn as_str(&self) -> &str {
                &self.0
            }

            pub fn into_string(self) -> String {
                self.0
            }
        }

        impl Default for $name {
            fn default() -> Self {
                Self::new()
            }
        }

        impl AsRef<str> for $name {
            fn as_ref(&self) -> &str {
                &self.0
            }
        }

        impl std::fmt::Display for $name {
            fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
                write!(f, "{}", self.0)
            }
        }

        impl std::str::FromStr for $name {
            type Err = $crate::error::DomainError;

            fn from_str(s: &str) -> Result<Self, Self::Err> {
                match s.strip_prefix(concat!($prefix, "_")) {
                    Some(rest) if !rest.is_empty() => Ok(Self(s.to_string())),
                    _ => Err($crate::error::DomainError::InvalidId {
                        kind: stringify!($name),
                        value: s.to_string(),
                    }),
                }
            }
        }
    };
}

prefixed_id!(
    /// Unique identifier for a Merchant.
    MerchantId,
    "mer"
);

prefixed_id!(
    /// Unique identifier for a PaymentIntent.
    PaymentIntentId,
    "pi"
);

prefixed_id!(
    /// Unique identifier for a webhook endpoint.
    WebhookEndpointId,
    "we"
);

prefixed_id!(
    /// Unique identifier for a single webhook delivery obligation.
    WebhookEventId,
    "evt"
);
