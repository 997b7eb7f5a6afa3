//! # Mostro Client - P2P Trade Protocol Engine
//!
//! Client side of the Mostro peer-to-peer trading protocol over Nostr relays:
//! - Three-layer private envelopes (rumor → seal → gift wrap)
//! - Per-subscription reordering of stored events before live dispatch
//! - Request/reply correlation by `request_id` with per-request timeouts
//! - Waiters for coordinator messages matched by `(action, order id)`
//! - Decoding of the coordinator's public order, info and dispute records
//!
//! ## Architecture
//!
//! The [`Mostro`] facade owns all protocol state for one party. Relay I/O sits
//! behind the [`RelayTransport`] trait:
//! ```text
//!                     ┌──────────────────────────────────────┐
//!   builders ───────► │               Mostro                 │ ──► publish
//!                     │  ┌───────────┐  ┌──────────────────┐ │
//!                     │  │Correlation│  │   ActionWaiter   │ │
//!                     │  │   Table   │  │                  │ │
//!                     │  └───────────┘  └──────────────────┘ │
//!   subscriptions ──► │  ┌───────────┐  ┌──────────────────┐ │ ──► notifications
//!                     │  │  Event    │  │ Envelope / Order │ │
//!                     │  │  Orderer  │  │     codecs       │ │
//!                     │  └───────────┘  └──────────────────┘ │
//!                     └──────────────────────────────────────┘
//! ```

// Enforce strict safety at compile time
#![deny(unsafe_code)]
#![warn(missing_debug_implementations)]
#![warn(rust_2018_idioms)]

// Re-export public API
pub mod client;
pub mod correlation;
pub mod envelope;
pub mod events;
pub mod nostr;
pub mod notify;
pub mod protocol;
pub mod transport;
pub mod types;

// Internal utilities
pub mod observability;
pub mod validation;

pub use client::{ClientStats, Mostro};
pub use correlation::Reply;
pub use transport::{MemoryRelay, RelayTransport};
pub use types::{Config, Error, Result};
