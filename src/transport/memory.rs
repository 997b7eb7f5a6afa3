//! In-process relay.
//!
//! Stores published events, replays matching ones to new subscriptions
//! followed by end of stored events, then fans out live events. Addressable
//! public state (`ORDER_STATE`) is replaced per `(author, d tag)`.

use std::collections::HashMap;

use async_trait::async_trait;
use tokio::sync::{mpsc, Mutex};

use super::{PublishReceipt, RelayMessage, RelayTransport};
use crate::nostr::{kind, Event, Filter};
use crate::types::{Error, Result, SubscriptionId};

#[derive(Debug)]
struct LiveSubscription {
    filter: Filter,
    tx: mpsc::UnboundedSender<RelayMessage>,
}

#[derive(Debug, Default)]
struct RelayState {
    connected: bool,
    reject_publish: Option<String>,
    events: Vec<Event>,
    subscriptions: HashMap<SubscriptionId, LiveSubscription>,
}

#[derive(Debug)]
pub struct MemoryRelay {
    url: String,
    state: Mutex<RelayState>,
}

impl Default for MemoryRelay {
    fn default() -> Self {
        Self::new("memory://relay")
    }
}

impl MemoryRelay {
    pub fn new(url: &str) -> Self {
        Self {
            url: url.to_string(),
            state: Mutex::new(RelayState::default()),
        }
    }

    pub fn url(&self) -> &str {
        &self.url
    }

    /// Reject every publish with `reason` until cleared with `None`.
    pub async fn set_reject_publish(&self, reason: Option<&str>) {
        self.state.lock().await.reject_publish = reason.map(str::to_string);
    }

    /// Store an event without delivering it to live subscriptions.
    pub async fn seed(&self, event: Event) {
        let mut state = self.state.lock().await;
        store(&mut state.events, event);
    }

    pub async fn stored_events(&self) -> Vec<Event> {
        self.state.lock().await.events.clone()
    }

    pub async fn subscription_ids(&self) -> Vec<SubscriptionId> {
        self.state.lock().await.subscriptions.keys().cloned().collect()
    }
}

/// Returns false for duplicates and superseded addressable events.
fn store(events: &mut Vec<Event>, event: Event) -> bool {
    if events.iter().any(|e| e.id == event.id) {
        return false;
    }
    if event.kind == kind::ORDER_STATE {
        let d = event.tags.first_value("d").map(str::to_string);
        if let Some(pos) = events.iter().position(|e| {
            e.kind == event.kind && e.pubkey == event.pubkey && e.tags.first_value("d") == d.as_deref()
        }) {
            if events[pos].created_at > event.created_at {
                return false;
            }
            events.remove(pos);
        }
    }
    events.push(event);
    true
}

#[async_trait]
impl RelayTransport for MemoryRelay {
    async fn connect(&self) -> Result<()> {
        self.state.lock().await.connected = true;
        tracing::info!("connected to {}", self.url);
        Ok(())
    }

    async fn subscribe(
        &self,
        id: &SubscriptionId,
        filter: Filter,
    ) -> Result<mpsc::UnboundedReceiver<RelayMessage>> {
        let mut state = self.state.lock().await;
        if !state.connected {
            return Err(Error::not_connected(self.url.clone()));
        }

        let (tx, rx) = mpsc::unbounded_channel();
        for event in state.events.iter().filter(|e| filter.matches(e)) {
            let _ = tx.send(RelayMessage::Event(event.clone()));
        }
        let _ = tx.send(RelayMessage::EndOfStoredEvents);

        // Re-using an id replaces the old subscription, as relays do
        state
            .subscriptions
            .insert(id.clone(), LiveSubscription { filter, tx });
        tracing::debug!("{} opened subscription {}", self.url, id);
        Ok(rx)
    }

    async fn unsubscribe(&self, id: &SubscriptionId) -> Result<()> {
        if self.state.lock().await.subscriptions.remove(id).is_some() {
            tracing::debug!("{} closed subscription {}", self.url, id);
        }
        Ok(())
    }

    async fn publish(&self, event: &Event) -> Result<PublishReceipt> {
        let mut state = self.state.lock().await;
        if !state.connected {
            return Err(Error::not_connected(self.url.clone()));
        }

        let mut receipt = PublishReceipt::default();
        if let Some(reason) = &state.reject_publish {
            receipt.rejected.push((self.url.clone(), reason.clone()));
            return Ok(receipt);
        }
        if let Err(e) = event.verify() {
            receipt.rejected.push((self.url.clone(), format!("invalid: {}", e)));
            return Ok(receipt);
        }

        receipt.accepted.push(self.url.clone());
        if !store(&mut state.events, event.clone()) {
            return Ok(receipt);
        }

        state.subscriptions.retain(|_, sub| !sub.tx.is_closed());
        for sub in state.subscriptions.values() {
            if sub.filter.matches(event) {
                let _ = sub.tx.send(RelayMessage::Event(event.clone()));
            }
        }
        Ok(receipt)
    }
}
