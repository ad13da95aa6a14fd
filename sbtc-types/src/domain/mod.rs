//! Domain models for the payment gateway.

pub mod chain;
pub mod ids;
pub mod merchant;
pub mod money;
pub mod payment_intent;
pub mod webhook;

pub use chain::{ChainTransaction, ContractCall, DecodeError, FunctionArg, TransferCall};
pub use ids::{MerchantId, PaymentIntentId, WebhookEndpointId, WebhookEventId};
pub use merchant::Merchant;
pub use money::{Currency, Money};
pub use payment_intent::{Metadata, PaymentIntent, PaymentIntentStatus, Transition};
pub use webhook::{
    AttemptRecord, DeliveryOutcome, DeliveryState, WebhookEndpoint, WebhookEnvelope,
    WebhookEvent, event_types,
};
