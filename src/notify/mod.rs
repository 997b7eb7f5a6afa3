//! Typed notification topics.
//!
//! One [`Topic`] per kind of update. Each listener gets its own unbounded
//! channel; [`Topic::emit`] fans out to all of them and prunes listeners whose
//! receiving side has been dropped or closed.

use std::pin::Pin;
use std::sync::atomic::{AtomicU64, Ordering};
use std::task::{Context, Poll};

use futures::Stream;
use serde::{Deserialize, Serialize};
use tokio::sync::{mpsc, RwLock};

use crate::nostr::PublicKey;
use crate::protocol::{Dispute, Message, MostroInfo, Order};
use crate::types::EventId;

// =============================================================================
// Payloads
// =============================================================================

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum OrderChange {
    Created,
    Updated,
}

#[derive(Debug, Clone, PartialEq)]
pub struct OrderUpdate {
    pub change: OrderChange,
    pub order: Order,
    /// Public event that carried this version of the order.
    pub event_id: EventId,
}

/// A decoded private message from the coordinator.
#[derive(Debug, Clone, PartialEq)]
pub struct InboundMessage {
    pub message: Message,
    pub sender: PublicKey,
    /// Rumor timestamp, not the jittered wrap timestamp.
    pub created_at: u64,
    pub rumor_id: EventId,
}

/// A chat message from another party, outside the coordinator protocol.
#[derive(Debug, Clone, PartialEq)]
pub struct DirectMessage {
    pub sender: PublicKey,
    pub content: String,
    pub created_at: u64,
    pub rumor_id: EventId,
    /// Rumor this one answers, from its `e` tag.
    pub reply_to: Option<EventId>,
}

// =============================================================================
// Topic
// =============================================================================

#[derive(Debug)]
struct Subscriber<T> {
    id: u64,
    tx: mpsc::UnboundedSender<T>,
}

#[derive(Debug)]
pub struct Topic<T> {
    name: &'static str,
    next_id: AtomicU64,
    subscribers: RwLock<Vec<Subscriber<T>>>,
}

impl<T: Clone> Topic<T> {
    pub fn new(name: &'static str) -> Self {
        Self {
            name,
            next_id: AtomicU64::new(1),
            subscribers: RwLock::new(Vec::new()),
        }
    }

    pub fn name(&self) -> &'static str {
        self.name
    }

    pub async fn subscribe(&self) -> Listener<T> {
        let id = self.next_id.fetch_add(1, Ordering::Relaxed);
        let (tx, rx) = mpsc::unbounded_channel();
        self.subscribers.write().await.push(Subscriber { id, tx });
        tracing::debug!("listener {} registered on {}", id, self.name);
        Listener { id, rx }
    }

    /// Remove a listener by id. Its receiver sees the end of the stream.
    pub async fn unsubscribe(&self, listener_id: u64) -> bool {
        let mut subscribers = self.subscribers.write().await;
        let before = subscribers.len();
        subscribers.retain(|s| s.id != listener_id);
        before != subscribers.len()
    }

    /// Deliver `value` to every live listener. Returns the delivery count.
    pub async fn emit(&self, value: T) -> usize {
        let mut subscribers = self.subscribers.write().await;
        subscribers.retain(|s| !s.tx.is_closed());

        let mut delivered = 0;
        for subscriber in subscribers.iter() {
            if subscriber.tx.send(value.clone()).is_ok() {
                delivered += 1;
            }
        }
        tracing::trace!("{} delivered to {} listeners", self.name, delivered);
        delivered
    }

    pub async fn listener_count(&self) -> usize {
        self.subscribers
            .read()
            .await
            .iter()
            .filter(|s| !s.tx.is_closed())
            .count()
    }

    /// Drop every listener; their streams end.
    pub async fn close(&self) {
        self.subscribers.write().await.clear();
    }
}

/// Receiving side of one topic subscription.
#[derive(Debug)]
pub struct Listener<T> {
    id: u64,
    rx: mpsc::UnboundedReceiver<T>,
}

impl<T> Listener<T> {
    pub fn id(&self) -> u64 {
        self.id
    }

    pub async fn recv(&mut self) -> Option<T> {
        self.rx.recv().await
    }

    pub fn try_recv(&mut self) -> Option<T> {
        self.rx.try_recv().ok()
    }

    /// Stop receiving. The topic prunes this listener on its next emit.
    pub fn close(&mut self) {
        self.rx.close();
    }
}

impl<T> Stream for Listener<T> {
    type Item = T;

    fn poll_next(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Option<T>> {
        self.rx.poll_recv(cx)
    }
}

// =============================================================================
// Notifications
// =============================================================================

/// All topics a client exposes.
#[derive(Debug)]
pub struct Notifications {
    pub orders: Topic<OrderUpdate>,
    pub info: Topic<MostroInfo>,
    pub disputes: Topic<Dispute>,
    pub messages: Topic<InboundMessage>,
    pub direct_messages: Topic<DirectMessage>,
}

impl Default for Notifications {
    fn default() -> Self {
        Self::new()
    }
}

impl Notifications {
    pub fn new() -> Self {
        Self {
            orders: Topic::new("orders"),
            info: Topic::new("info"),
            disputes: Topic::new("disputes"),
            messages: Topic::new("messages"),
            direct_messages: Topic::new("direct_messages"),
        }
    }

    pub async fn close_all(&self) {
        self.orders.close().await;
        self.info.close().await;
        self.disputes.close().await;
        self.messages.close().await;
        self.direct_messages.close().await;
    }
}
