//! # sBTC Types
//!
//! Domain types and port traits for the sBTC payment gateway.
//! This crate has ZERO external IO dependencies - only data structures,
//! business rules, and trait definitions.
//!
//! ## Architecture
//!
//! This crate represents the **innermost core** of the hexagonal architecture:
//! - `domain/` - Pure domain types (PaymentIntent, Merchant, webhooks, chain records)
//! - `signature` - Webhook signer / verifier
//! - `ports/` - Trait definitions that adapters must implement
//! - `dto/` - Data Transfer Objects for API boundaries
//! - `error/` - Domain and application error types

pub mod domain;
pub mod dto;
pub mod error;
pub mod ports;
pub mod signature;

// Re-export commonly used types
pub use domain::{
    AttemptRecord, ChainTransaction, ContractCall, Currency, DecodeError, DeliveryOutcome,
    DeliveryState, FunctionArg, Merchant, MerchantId, Metadata, Money, PaymentIntent,
    PaymentIntentId, PaymentIntentStatus, TransferCall, Transition, WebhookEndpoint,
    WebhookEndpointId, WebhookEnvelope, WebhookEvent, WebhookEventId, event_types,
};
pub use dto::*;
pub use error::{AppError, DomainError, RepoError};
pub use ports::{BlockExplorer, ExplorerError, GatewayRepository};
