//! Core types for the protocol engine.
//!
//! This module provides foundational types used throughout the system:
//! - **IDs**: Strongly-typed identifiers (EventId, SubscriptionId)
//! - **Errors**: Application error types with thiserror derives
//! - **Config**: Relays, coordinator key, timeouts and envelope parameters

mod config;
mod errors;
mod ids;

pub use config::{
    Config, EnvelopeConfig, ObservabilityConfig, SubscriptionConfig, TimeoutConfig,
};
pub use errors::{Error, Result};
pub use ids::{EventId, SubscriptionId};
