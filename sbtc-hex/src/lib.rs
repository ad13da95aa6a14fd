//! # sBTC Hex
//!
//! Application layer and HTTP adapter for the sBTC payment gateway.
//!
//! ## Architecture
//!
//! - `service` - Payment intent state machine and webhook administration
//! - `emitter` - Turns transitions into stored delivery obligations
//! - `delivery` - Signs and POSTs events, retries with backoff
//! - `reconciler` - Settles intents from on-chain transfers
//! - `inbound/` - HTTP adapter (Axum server)
//!
//! Everything is generic over `R: GatewayRepository`, allowing
//! different repository implementations to be injected.

pub mod delivery;
pub mod emitter;
pub mod inbound;
pub mod openapi;
pub mod reconciler;
pub mod service;


pub use delivery::{DeliveryConfig, DeliveryEngine, DeliveryWorker, SweepReport, backoff_delay};
pub use emitter::{DeliveryJob, DeliveryQueue, EmitTarget, EventEmitter};
pub use reconciler::{ReconcileOutcome, ReconcileWorker, Reconciler, ReconcilerConfig};
pub use service::{PaymentService, ServiceConfig};
