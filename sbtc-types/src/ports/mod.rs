//! Port traits (interfaces for adapters).
//!
//! These are the contracts that adapters must implement.
//! The application layer depends on these traits, not concrete implementations.

mod explorer;
mod repository;

pub use explorer::{BlockExplorer, ExplorerError};
pub use repository::GatewayRepository;
