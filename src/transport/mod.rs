//! Relay transport seam.
//!
//! The engine never talks to sockets. It consumes subscriptions (a stream of
//! events followed by an end-of-stored-events marker, then live events) and
//! publishes signed events, getting back a per-relay receipt.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use tokio::sync::mpsc;

use crate::nostr::{Event, Filter};
use crate::types::{Error, Result, SubscriptionId};

pub mod memory;

pub use memory::MemoryRelay;

/// Item delivered on a subscription stream.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RelayMessage {
    Event(Event),
    /// Stored events have all been sent; everything after this is live.
    EndOfStoredEvents,
}

/// Per-relay outcome of a publish.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct PublishReceipt {
    pub accepted: Vec<String>,
    /// `(relay url, reason)`
    pub rejected: Vec<(String, String)>,
}

impl PublishReceipt {
    pub fn is_success(&self) -> bool {
        !self.accepted.is_empty()
    }

    /// `PublishFailure` unless at least one relay accepted.
    pub fn ensure_accepted(self) -> Result<Self> {
        if self.is_success() {
            return Ok(self);
        }
        let reasons: Vec<String> = self
            .rejected
            .iter()
            .map(|(relay, reason)| format!("{}: {}", relay, reason))
            .collect();
        Err(Error::publish_failure(if reasons.is_empty() {
            "no relay accepted the event".to_string()
        } else {
            reasons.join("; ")
        }))
    }
}

#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait RelayTransport: Send + Sync {
    /// Resolve once the transport can subscribe and publish.
    async fn connect(&self) -> Result<()>;

    async fn subscribe(
        &self,
        id: &SubscriptionId,
        filter: Filter,
    ) -> Result<mpsc::UnboundedReceiver<RelayMessage>>;

    async fn unsubscribe(&self, id: &SubscriptionId) -> Result<()>;

    async fn publish(&self, event: &Event) -> Result<PublishReceipt>;
}
