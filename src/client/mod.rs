//! Protocol facade.
//!
//! `Mostro` owns all protocol state for one party: the active identity, the
//! correlation table, the action waiters, the order working window and the
//! notification topics. Two subscriptions feed it:
//!
//! ```text
//!   public  (ORDER_STATE by coordinator) ─► orderer ─► decode ─► orders/info/disputes
//!   private (GIFT_WRAP #p me) ─► unwrap ─► orderer ─┬► Message ─► table + waiters + messages
//!                                                   └► peer chat ─► direct_messages
//! ```
//!
//! Outbound: builder → `send_request` → table.register → wrap → publish.

use std::collections::HashMap;
use std::fmt;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use serde::{Deserialize, Serialize};
use tokio::sync::{Mutex, RwLock};
use tokio_util::sync::CancellationToken;

use crate::correlation::{ActionWaiter, CorrelationTable, Reply};
use crate::envelope::{EnvelopeCodec, Rumor, UnwrappedMessage};
use crate::events::{self, PublicRecord};
use crate::notify::{DirectMessage, InboundMessage, Notifications, OrderChange, OrderUpdate};
use crate::nostr::{
    kind, unix_now, Event, Filter, Keys, PublicKey, SecretKey, Tags, UnsignedEvent,
};
use crate::protocol::{
    Action, Content, Message, MostroInfo, NewOrder, Order, OrderKind, MAX_RATING, MIN_RATING,
};
use crate::transport::{PublishReceipt, RelayTransport};
use crate::types::{Config, Error, EventId, Result, SubscriptionId};
use crate::validation::{validate_invoice, validate_non_empty, validate_range};

mod pump;

use pump::Pump;

// =============================================================================
// Statistics
// =============================================================================

/// Snapshot of client counters.
#[derive(Debug, Default, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ClientStats {
    pub requests_sent: u64,
    pub replies_matched: u64,
    pub unsolicited_replies: u64,
    pub request_timeouts: u64,
    pub events_dropped: u64,
    pub direct_messages_received: u64,
    pub pending_requests: usize,
    pub pending_waiters: usize,
}

#[derive(Debug, Default)]
struct Counters {
    requests_sent: AtomicU64,
    replies_matched: AtomicU64,
    unsolicited_replies: AtomicU64,
    events_dropped: AtomicU64,
    direct_messages_received: AtomicU64,
}

impl Counters {
    fn bump(counter: &AtomicU64) {
        counter.fetch_add(1, Ordering::Relaxed);
    }
}

// =============================================================================
// Facade
// =============================================================================

#[derive(Debug, Default)]
struct Subscriptions {
    public: Option<Pump>,
    private: Option<Pump>,
}

struct Inner {
    config: Config,
    transport: Arc<dyn RelayTransport>,
    mostro_pubkey: PublicKey,
    codec: EnvelopeCodec,
    identity: RwLock<Option<Keys>>,
    requests: CorrelationTable,
    waiters: ActionWaiter,
    /// order id → id of the last public event seen for it
    order_events: Mutex<HashMap<String, EventId>>,
    orders: RwLock<HashMap<String, Order>>,
    info: RwLock<Option<MostroInfo>>,
    notifications: Notifications,
    counters: Counters,
    subscriptions: Mutex<Subscriptions>,
    connected: AtomicBool,
    shutdown: CancellationToken,
}

/// Client-side protocol engine for one party talking to one coordinator.
pub struct Mostro {
    inner: Arc<Inner>,
}

impl fmt::Debug for Mostro {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Mostro")
            .field("mostro_pubkey", &self.inner.mostro_pubkey)
            .field("connected", &self.inner.connected.load(Ordering::Relaxed))
            .finish_non_exhaustive()
    }
}

impl Drop for Mostro {
    fn drop(&mut self) {
        let inner = &self.inner;
        inner.shutdown.cancel();
        inner.connected.store(false, Ordering::Relaxed);
        // Pump tasks keep `Inner` alive until they observe the cancellation
        inner.requests.cancel_all("client dropped");
        inner.waiters.cancel_all("client dropped");
    }
}

impl Mostro {
    pub fn new(config: Config, transport: Arc<dyn RelayTransport>) -> Result<Self> {
        config.validate()?;
        let mostro_pubkey = PublicKey::from_hex(&config.mostro_pubkey)?;
        let codec = EnvelopeCodec::new(config.envelope.gift_wrap_time_window);
        let requests = CorrelationTable::new(config.timeouts.request);

        Ok(Self {
            inner: Arc::new(Inner {
                config,
                transport,
                mostro_pubkey,
                codec,
                identity: RwLock::new(None),
                requests,
                waiters: ActionWaiter::new(),
                order_events: Mutex::new(HashMap::new()),
                orders: RwLock::new(HashMap::new()),
                info: RwLock::new(None),
                notifications: Notifications::new(),
                counters: Counters::default(),
                subscriptions: Mutex::new(Subscriptions::default()),
                connected: AtomicBool::new(false),
                shutdown: CancellationToken::new(),
            }),
        })
    }

    // =========================================================================
    // Lifecycle
    // =========================================================================

    /// Connect the transport and open the public and (if an identity is set)
    /// private subscriptions.
    pub async fn connect(&self) -> Result<()> {
        let inner = &self.inner;
        if inner.shutdown.is_cancelled() {
            return Err(Error::cancelled("client has been shut down"));
        }
        inner.transport.connect().await?;
        inner.connected.store(true, Ordering::Relaxed);

        self.subscribe_public().await?;
        let identity = inner.identity.read().await.clone();
        if let Some(keys) = identity {
            self.subscribe_private(keys).await?;
        }
        tracing::info!("connected to coordinator {}", inner.mostro_pubkey);
        Ok(())
    }

    /// Stop both subscriptions and reject everything still pending with `Cancelled`.
    pub async fn shutdown(&self) {
        let inner = &self.inner;
        inner.shutdown.cancel();
        inner.connected.store(false, Ordering::Relaxed);

        let (public, private) = {
            let mut subs = inner.subscriptions.lock().await;
            (subs.public.take(), subs.private.take())
        };
        for pump in [public, private].into_iter().flatten() {
            self.close_subscription(pump).await;
        }

        let requests = inner.requests.sweep("client shut down").await;
        let waiters = inner.waiters.sweep("client shut down").await;
        inner.notifications.close_all().await;
        tracing::info!(
            "client shut down ({} requests, {} waiters cancelled)",
            requests,
            waiters
        );
    }

    pub fn is_connected(&self) -> bool {
        self.inner.connected.load(Ordering::Relaxed)
    }

    // =========================================================================
    // Identity
    // =========================================================================

    /// Replace the active identity and move the private subscription to it.
    pub async fn set_identity(&self, secret: SecretKey) -> Result<PublicKey> {
        let keys = Keys::new(secret);
        let public_key = keys.public_key();
        let previous = self.inner.identity.write().await.replace(keys.clone());

        if previous.map(|k| k.public_key()) == Some(public_key) {
            tracing::debug!("identity unchanged ({})", public_key);
            return Ok(public_key);
        }
        tracing::info!("identity set to {}", public_key);

        if self.is_connected() {
            self.subscribe_private(keys).await?;
        }
        Ok(public_key)
    }

    /// Forget the identity and close the private subscription.
    pub async fn clear_identity(&self) {
        if self.inner.identity.write().await.take().is_none() {
            return;
        }
        tracing::info!("identity cleared");
        let previous = self.inner.subscriptions.lock().await.private.take();
        if let Some(pump) = previous {
            self.close_subscription(pump).await;
        }
    }

    pub async fn public_key(&self) -> Option<PublicKey> {
        self.inner
            .identity
            .read()
            .await
            .as_ref()
            .map(Keys::public_key)
    }

    pub fn mostro_pubkey(&self) -> PublicKey {
        self.inner.mostro_pubkey
    }

    // =========================================================================
    // Requests
    // =========================================================================

    /// Wrap `action` for the coordinator under a fresh request id and publish it.
    ///
    /// The returned [`Reply`] carries the request id and resolves with the
    /// coordinator's answer, `RequestTimeout`, or `Cancelled` on shutdown.
    pub async fn send_request(
        &self,
        action: Action,
        order_id: Option<String>,
        content: Option<Content>,
    ) -> Result<Reply> {
        let inner = &self.inner;
        let keys = inner
            .identity
            .read()
            .await
            .clone()
            .ok_or(Error::NoIdentity)?;

        let message = Message::new(action, order_id, content);
        message
            .validate()
            .map_err(|e| Error::validation(e.to_string()))?;

        let reply = inner.requests.register().await;
        let request_id = reply.id();
        let message = message.with_request_id(request_id);

        match self.publish_message(&keys, &message).await {
            Ok(receipt) => {
                Counters::bump(&inner.counters.requests_sent);
                tracing::debug!(
                    "sent {} request {} (accepted by {} relays)",
                    message.action,
                    request_id,
                    receipt.accepted.len()
                );
                Ok(reply)
            }
            Err(e) => {
                tracing::error!("request {} ({}) not sent: {}", request_id, message.action, e);
                inner
                    .requests
                    .fail(request_id, Error::cancelled("request was never published"))
                    .await;
                Err(e)
            }
        }
    }

    async fn publish_message(&self, keys: &Keys, message: &Message) -> Result<PublishReceipt> {
        let rumor = Rumor::new(keys.public_key(), &self.inner.mostro_pubkey, message.to_json()?)?;
        self.publish_rumor(&rumor, keys, &self.inner.mostro_pubkey)
            .await
    }

    async fn publish_rumor(
        &self,
        rumor: &Rumor,
        keys: &Keys,
        recipient: &PublicKey,
    ) -> Result<PublishReceipt> {
        let inner = &self.inner;
        let wrap = inner.codec.wrap(rumor, keys, recipient)?;
        inner
            .transport
            .publish(wrap.event())
            .await?
            .ensure_accepted()
    }

    /// Gift-wrap a chat message to another party. Returns the rumor id, which
    /// the peer can quote as `reply_to`.
    ///
    /// Chat bypasses the correlation table: nothing is awaited.
    pub async fn send_direct_message(
        &self,
        peer: &PublicKey,
        text: &str,
        reply_to: Option<&EventId>,
    ) -> Result<EventId> {
        validate_non_empty(text, "message")?;
        let keys = self
            .inner
            .identity
            .read()
            .await
            .clone()
            .ok_or(Error::NoIdentity)?;

        let mut tags = Tags::new().with("p", [peer.to_hex()]);
        if let Some(parent) = reply_to {
            tags.push("e", [parent.as_str(), "", "reply"]);
        }
        let rumor = Rumor::from_unsigned(UnsignedEvent::new(
            keys.public_key(),
            unix_now(),
            kind::PRIVATE_DIRECT_MESSAGE,
            tags,
            text.to_string(),
        ))?;

        let receipt = self.publish_rumor(&rumor, &keys, peer).await.map_err(|e| {
            tracing::error!("direct message to {} not sent: {}", peer, e);
            e
        })?;
        tracing::debug!(
            "sent direct message {} to {} (accepted by {} relays)",
            rumor.id,
            peer,
            receipt.accepted.len()
        );
        Ok(rumor.id)
    }

    /// Resolve on the first inbound message with `action` about `order_id`.
    ///
    /// Defaults to the configured action wait timeout.
    pub async fn wait_for_action(
        &self,
        action: Action,
        order_id: &str,
        timeout: Option<Duration>,
    ) -> Reply {
        let timeout = timeout.unwrap_or(self.inner.config.timeouts.action_wait);
        self.inner.waiters.wait(action, order_id, timeout).await
    }

    pub async fn submit_order(&self, order: NewOrder) -> Result<Reply> {
        order.validate()?;
        self.send_request(Action::NewOrder, None, Some(Content::Order(order)))
            .await
    }

    /// Take a sell order, optionally choosing an amount inside its range.
    pub async fn take_sell(&self, order: &Order, amount: Option<i64>) -> Result<Reply> {
        expect_kind(order, OrderKind::Sell)?;
        self.send_request(
            Action::TakeSell,
            Some(order.id.clone()),
            amount.map(Content::Amount),
        )
        .await
    }

    pub async fn take_buy(&self, order: &Order, amount: Option<i64>) -> Result<Reply> {
        expect_kind(order, OrderKind::Buy)?;
        self.send_request(
            Action::TakeBuy,
            Some(order.id.clone()),
            amount.map(Content::Amount),
        )
        .await
    }

    pub async fn add_invoice(
        &self,
        order_id: &str,
        invoice: &str,
        amount: Option<i64>,
    ) -> Result<Reply> {
        validate_invoice(invoice)?;
        self.send_request(
            Action::AddInvoice,
            Some(subject(order_id)?),
            Some(Content::PaymentRequest(None, invoice.to_string(), amount)),
        )
        .await
    }

    pub async fn release(&self, order_id: &str) -> Result<Reply> {
        self.send_request(Action::Release, Some(subject(order_id)?), None)
            .await
    }

    pub async fn fiat_sent(&self, order_id: &str) -> Result<Reply> {
        self.send_request(Action::FiatSent, Some(subject(order_id)?), None)
            .await
    }

    pub async fn rate_user(&self, order_id: &str, rating: u8) -> Result<Reply> {
        validate_range(rating, MIN_RATING, MAX_RATING, "rating")?;
        self.send_request(
            Action::RateUser,
            Some(subject(order_id)?),
            Some(Content::RatingUser(rating)),
        )
        .await
    }

    pub async fn dispute(&self, order_id: &str) -> Result<Reply> {
        self.send_request(Action::Dispute, Some(subject(order_id)?), None)
            .await
    }

    pub async fn cancel(&self, order_id: &str) -> Result<Reply> {
        self.send_request(Action::Cancel, Some(subject(order_id)?), None)
            .await
    }

    // =========================================================================
    // State
    // =========================================================================

    pub fn notifications(&self) -> &Notifications {
        &self.inner.notifications
    }

    /// Latest known version of every order, oldest first.
    pub async fn orders(&self) -> Vec<Order> {
        let mut orders: Vec<Order> = self.inner.orders.read().await.values().cloned().collect();
        orders.sort_by(|a, b| a.created_at.cmp(&b.created_at).then_with(|| a.id.cmp(&b.id)));
        orders
    }

    pub async fn order(&self, order_id: &str) -> Option<Order> {
        self.inner.orders.read().await.get(order_id).cloned()
    }

    pub async fn mostro_info(&self) -> Option<MostroInfo> {
        self.inner.info.read().await.clone()
    }

    pub async fn stats(&self) -> ClientStats {
        let inner = &self.inner;
        let c = &inner.counters;
        ClientStats {
            requests_sent: c.requests_sent.load(Ordering::Relaxed),
            replies_matched: c.replies_matched.load(Ordering::Relaxed),
            unsolicited_replies: c.unsolicited_replies.load(Ordering::Relaxed),
            request_timeouts: inner.requests.timed_out(),
            events_dropped: c.events_dropped.load(Ordering::Relaxed),
            direct_messages_received: c.direct_messages_received.load(Ordering::Relaxed),
            pending_requests: inner.requests.len().await,
            pending_waiters: inner.waiters.len().await,
        }
    }

    // =========================================================================
    // Subscriptions
    // =========================================================================

    async fn subscribe_public(&self) -> Result<()> {
        let inner = &self.inner;
        let mut subs = inner.subscriptions.lock().await;
        if subs.public.is_some() {
            tracing::warn!("already subscribed to public orders");
            return Ok(());
        }

        let filter = Filter::new()
            .kind(kind::ORDER_STATE)
            .author(inner.mostro_pubkey)
            .since(self.interest_since());
        let id = SubscriptionId::new("orders");
        let rx = inner.transport.subscribe(&id, filter).await?;

        let handler = Arc::clone(inner);
        subs.public = Some(Pump::spawn(
            id.clone(),
            rx,
            inner.shutdown.child_token(),
            Some,
            move |event: Event| {
                let inner = Arc::clone(&handler);
                async move { inner.handle_public_event(event).await }
            },
        ));
        tracing::info!("subscribed to public orders ({})", id);
        Ok(())
    }

    async fn subscribe_private(&self, keys: Keys) -> Result<()> {
        let inner = &self.inner;
        let previous = inner.subscriptions.lock().await.private.take();
        if let Some(pump) = previous {
            self.close_subscription(pump).await;
        }

        let public_key = keys.public_key();
        let filter = Filter::new()
            .kind(kind::GIFT_WRAP)
            .pubkey(public_key)
            .since(self.interest_since());
        let hex = public_key.to_hex();
        let id = SubscriptionId::from_string(format!("giftwraps-{}", &hex[..16]))
            .map_err(Error::validation)?;
        let rx = inner.transport.subscribe(&id, filter).await?;

        let codec = inner.codec.clone();
        let unwrapper = Arc::clone(inner);
        let handler = Arc::clone(inner);
        let pump = Pump::spawn(
            id.clone(),
            rx,
            inner.shutdown.child_token(),
            move |event: Event| match codec.unwrap(&event, &keys) {
                Ok(unwrapped) => Some(unwrapped),
                Err(e) => {
                    tracing::warn!("dropping gift wrap {}: {}", event.id, e);
                    Counters::bump(&unwrapper.counters.events_dropped);
                    None
                }
            },
            move |unwrapped: UnwrappedMessage| {
                let inner = Arc::clone(&handler);
                async move { inner.handle_private_message(unwrapped).await }
            },
        );
        let displaced = inner.subscriptions.lock().await.private.replace(pump);
        if let Some(pump) = displaced {
            self.close_subscription(pump).await;
        }
        tracing::info!("subscribed to gift wraps for {} ({})", public_key, id);
        Ok(())
    }

    async fn close_subscription(&self, pump: Pump) {
        if let Err(e) = self.inner.transport.unsubscribe(&pump.id).await {
            tracing::warn!("unsubscribe {} failed: {}", pump.id, e);
        }
        tracing::debug!("closed subscription {}", pump.id);
        pump.stop().await;
    }

    fn interest_since(&self) -> u64 {
        unix_now().saturating_sub(self.inner.config.subscriptions.event_interest_window.as_secs())
    }
}

// =============================================================================
// Inbound dispatch
// =============================================================================

impl Inner {
    async fn handle_private_message(&self, unwrapped: UnwrappedMessage) {
        let sender = unwrapped.sender();
        if unwrapped.rumor.kind == kind::PRIVATE_DIRECT_MESSAGE {
            self.handle_direct_message(unwrapped).await;
            return;
        }
        if sender != self.mostro_pubkey {
            tracing::warn!(
                "dropping kind {} rumor from non-coordinator {}",
                unwrapped.rumor.kind,
                sender
            );
            Counters::bump(&self.counters.events_dropped);
            return;
        }

        let message = match Message::from_json(&unwrapped.rumor.content) {
            Ok(message) => message,
            Err(e) => {
                tracing::warn!("dropping rumor {}: {}", unwrapped.rumor.id, e);
                Counters::bump(&self.counters.events_dropped);
                return;
            }
        };
        tracing::debug!(
            "received {} for order {:?} (request {:?})",
            message.action,
            message.id,
            message.request_id
        );

        if let Some(request_id) = message.request_id {
            if self.requests.complete(request_id, message.clone()).await {
                Counters::bump(&self.counters.replies_matched);
            } else {
                Counters::bump(&self.counters.unsolicited_replies);
            }
        }

        self.waiters.dispatch(&message).await;
        self.notifications
            .messages
            .emit(InboundMessage {
                message,
                sender,
                created_at: unwrapped.rumor.created_at,
                rumor_id: unwrapped.rumor.id,
            })
            .await;
    }

    /// Peer chat never reaches the correlation table or the waiters.
    async fn handle_direct_message(&self, unwrapped: UnwrappedMessage) {
        let rumor = unwrapped.rumor;
        let reply_to = match rumor.tags.find("e") {
            Some(tag) if tag.get(3).map(String::as_str) == Some("reply") => {
                tag.get(1).and_then(|id| EventId::from_hex(id).ok())
            }
            _ => None,
        };
        tracing::debug!("direct message {} from {}", rumor.id, rumor.pubkey);
        Counters::bump(&self.counters.direct_messages_received);
        self.notifications
            .direct_messages
            .emit(DirectMessage {
                sender: rumor.pubkey,
                content: rumor.content,
                created_at: rumor.created_at,
                rumor_id: rumor.id,
                reply_to,
            })
            .await;
    }

    async fn handle_public_event(&self, event: Event) {
        if event.pubkey != self.mostro_pubkey {
            tracing::warn!("dropping public event {} from {}", event.id, event.pubkey);
            Counters::bump(&self.counters.events_dropped);
            return;
        }
        if let Err(e) = event.verify() {
            tracing::warn!("dropping public event {}: {}", event.id, e);
            Counters::bump(&self.counters.events_dropped);
            return;
        }

        match events::decode(&event) {
            Ok(Some(PublicRecord::Order(order))) => self.apply_order(order, event.id).await,
            Ok(Some(PublicRecord::Info(info))) => {
                tracing::debug!("coordinator info updated (version {:?})", info.mostro_version);
                *self.info.write().await = Some(info.clone());
                self.notifications.info.emit(info).await;
            }
            Ok(Some(PublicRecord::Dispute(dispute))) => {
                tracing::debug!("dispute {} is {}", dispute.id, dispute.status);
                self.notifications.disputes.emit(dispute).await;
            }
            Ok(None) => {
                tracing::debug!(
                    "ignoring public event {} with z={:?}",
                    event.id,
                    event.tags.first_value("z")
                );
            }
            Err(e) => {
                tracing::warn!("dropping public event {}: {}", event.id, e);
                Counters::bump(&self.counters.events_dropped);
            }
        }
    }

    /// Only a version that is both new and not older than the stored one
    /// moves the recorded event id.
    async fn apply_order(&self, order: Order, event_id: EventId) {
        let change = {
            let mut orders = self.orders.write().await;
            let mut seen = self.order_events.lock().await;
            if seen.get(&order.id) == Some(&event_id) {
                tracing::trace!("order {} resighted with same event {}", order.id, event_id);
                return;
            }
            if let Some(current) = orders.get(&order.id) {
                if current.created_at > order.created_at {
                    tracing::debug!("ignoring stale version of order {}", order.id);
                    return;
                }
            }
            let change = match seen.insert(order.id.clone(), event_id.clone()) {
                Some(_) => OrderChange::Updated,
                None => OrderChange::Created,
            };
            orders.insert(order.id.clone(), order.clone());
            change
        };

        tracing::debug!("order {} {:?} ({})", order.id, change, order.status);
        self.notifications
            .orders
            .emit(OrderUpdate {
                change,
                order,
                event_id,
            })
            .await;
    }
}

fn subject(order_id: &str) -> Result<String> {
    validate_non_empty(order_id, "order id")?;
    Ok(order_id.to_string())
}

fn expect_kind(order: &Order, kind: OrderKind) -> Result<()> {
    if order.kind != kind {
        return Err(Error::validation(format!(
            "order {} is a {} order, expected {}",
            order.id, order.kind, kind
        )));
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    use tokio::sync::mpsc;
    use tokio::task::JoinHandle;
    use tokio::time::timeout;

    use crate::nostr::{Tags, UnsignedEvent};
    use crate::protocol::STATUS_PENDING;
    use crate::transport::{MemoryRelay, MockRelayTransport, RelayMessage};

    const WAIT: Duration = Duration::from_secs(5);

    /// Scripted coordinator sharing the client's relay.
    struct Coordinator {
        keys: Keys,
        relay: Arc<MemoryRelay>,
        codec: EnvelopeCodec,
    }

    impl Coordinator {
        fn new(relay: Arc<MemoryRelay>) -> Self {
            Self {
                keys: Keys::generate(),
                relay,
                codec: EnvelopeCodec::default(),
            }
        }

        fn config(&self) -> Config {
            Config {
                mostro_pubkey: self.keys.public_key().to_hex(),
                ..Config::default()
            }
        }

        async fn send(&self, to: &PublicKey, message: &Message) {
            send_as(&self.keys, &self.codec, &self.relay, to, message).await;
        }

        /// Answer every request with the same action, order id and content.
        async fn spawn_echo(&self) -> JoinHandle<()> {
            let mut rx = self
                .relay
                .subscribe(
                    &SubscriptionId::new("coordinator"),
                    Filter::new().kind(kind::GIFT_WRAP).pubkey(self.keys.public_key()),
                )
                .await
                .unwrap();
            let keys = self.keys.clone();
            let codec = self.codec.clone();
            let relay = Arc::clone(&self.relay);

            tokio::spawn(async move {
                while let Some(item) = rx.recv().await {
                    let RelayMessage::Event(event) = item else { continue };
                    let request = codec.unwrap(&event, &keys).unwrap();
                    let message = Message::from_json(&request.rumor.content).unwrap();
                    let mut reply = Message::new(message.action, message.id, message.content);
                    reply.request_id = message.request_id;
                    send_as(&keys, &codec, &relay, &request.sender(), &reply).await;
                }
            })
        }

        async fn publish_order(&self, d: &str, status: &str, created_at: u64) -> Event {
            let event = self.order_event(d, status, created_at);
            self.relay.publish(&event).await.unwrap();
            event
        }

        fn order_event(&self, d: &str, status: &str, created_at: u64) -> Event {
            let tags = Tags::new()
                .with("d", [d])
                .with("k", ["sell"])
                .with("s", [status])
                .with("pm", ["cashapp"])
                .with("premium", ["2"])
                .with("f", ["USD"])
                .with("fa", ["50"])
                .with("z", ["order"]);
            Event::sign(
                UnsignedEvent::new(
                    self.keys.public_key(),
                    created_at,
                    kind::ORDER_STATE,
                    tags,
                    String::new(),
                ),
                &self.keys,
            )
            .unwrap()
        }

        /// Store a wrap whose rumor, seal and wrap carry chosen timestamps.
        async fn store_message_at(&self, to: &PublicKey, message: &Message, rumor_at: u64, wrap_at: u64) {
            let rumor = Rumor::from_unsigned(UnsignedEvent::new(
                self.keys.public_key(),
                rumor_at,
                kind::TEXT_NOTE,
                Tags::new().with("p", [to.to_hex()]),
                message.to_json().unwrap(),
            ))
            .unwrap();
            let seal = self.codec.seal(&rumor, &self.keys, to, wrap_at).unwrap();
            let wrap = self.codec.gift_wrap(&seal, to, wrap_at).unwrap();
            self.relay.publish(wrap.event()).await.unwrap();
        }
    }

    async fn send_as(
        keys: &Keys,
        codec: &EnvelopeCodec,
        relay: &MemoryRelay,
        to: &PublicKey,
        message: &Message,
    ) {
        let rumor = Rumor::new(keys.public_key(), to, message.to_json().unwrap()).unwrap();
        let wrap = codec.wrap(&rumor, keys, to).unwrap();
        relay
            .publish(wrap.event())
            .await
            .unwrap()
            .ensure_accepted()
            .unwrap();
    }

    async fn setup() -> (Mostro, Coordinator, Arc<MemoryRelay>) {
        let relay = Arc::new(MemoryRelay::default());
        relay.connect().await.unwrap();
        let coordinator = Coordinator::new(Arc::clone(&relay));
        let client = Mostro::new(coordinator.config(), relay.clone()).unwrap();
        (client, coordinator, relay)
    }

    async fn connected_with_identity() -> (Mostro, Coordinator, Arc<MemoryRelay>, PublicKey) {
        let (client, coordinator, relay) = setup().await;
        let me = client.set_identity(SecretKey::generate()).await.unwrap();
        client.connect().await.unwrap();
        (client, coordinator, relay, me)
    }

    fn sell_order(id: &str) -> Order {
        Order {
            id: id.to_string(),
            kind: OrderKind::Sell,
            status: STATUS_PENDING.to_string(),
            fiat_code: "USD".to_string(),
            fiat_amount: 50.0,
            min_amount: None,
            max_amount: None,
            payment_method: "cashapp".to_string(),
            premium: 0.0,
            created_at: 1,
            amount: 0,
            counterparty_id: Keys::generate().public_key(),
        }
    }

    fn empty_channel() -> Result<mpsc::UnboundedReceiver<RelayMessage>> {
        let (_tx, rx) = mpsc::unbounded_channel();
        Ok(rx)
    }

    // =============================================================================
    // Construction and identity
    // =============================================================================

    #[test]
    fn test_new_rejects_missing_coordinator_key() {
        let relay = Arc::new(MemoryRelay::default());
        let err = Mostro::new(Config::default(), relay).unwrap_err();
        assert!(matches!(err, Error::Config(_)));
    }

    #[tokio::test]
    async fn test_request_without_identity_fails() {
        let (client, _coordinator, _relay) = setup().await;
        let err = client.release("abc").await.unwrap_err();
        assert!(matches!(err, Error::NoIdentity));
        assert_eq!(client.stats().await.requests_sent, 0);
    }

    #[tokio::test]
    async fn test_set_identity_moves_private_subscription() {
        let (client, _coordinator, relay, first) = connected_with_identity().await;
        let prefix = |pk: &PublicKey| format!("giftwraps-{}", &pk.to_hex()[..16]);

        let ids: Vec<String> = relay
            .subscription_ids()
            .await
            .iter()
            .map(|id| id.to_string())
            .collect();
        assert!(ids.contains(&prefix(&first)));

        let second = client.set_identity(SecretKey::generate()).await.unwrap();
        let ids: Vec<String> = relay
            .subscription_ids()
            .await
            .iter()
            .map(|id| id.to_string())
            .collect();
        assert!(ids.contains(&prefix(&second)));
        assert!(!ids.contains(&prefix(&first)));
        assert_eq!(client.public_key().await, Some(second));

        client.clear_identity().await;
        assert_eq!(client.public_key().await, None);
        assert_eq!(relay.subscription_ids().await.len(), 1);
    }

    // =============================================================================
    // Requests
    // =============================================================================

    #[tokio::test]
    async fn test_submit_order_round_trip() {
        let (client, coordinator, _relay, _me) = connected_with_identity().await;
        let _echo = coordinator.spawn_echo().await;

        let order = NewOrder::fixed(OrderKind::Sell, "USD", 50.0, "cashapp");
        let reply = client.submit_order(order.clone()).await.unwrap();
        assert_eq!(reply.id(), 1);

        let message = timeout(WAIT, reply).await.unwrap().unwrap();
        assert_eq!(message.action, Action::NewOrder);
        assert_eq!(message.request_id, Some(1));
        assert_eq!(message.content, Some(Content::Order(order)));

        let stats = client.stats().await;
        assert_eq!(stats.requests_sent, 1);
        assert_eq!(stats.replies_matched, 1);
        assert_eq!(stats.pending_requests, 0);
    }

    #[tokio::test(start_paused = true)]
    async fn test_unanswered_request_times_out_and_is_removed() {
        let (client, _coordinator, _relay, _me) = connected_with_identity().await;

        let reply = client.release("abc").await.unwrap();
        assert_eq!(reply.id(), 1);
        assert!(client.inner.requests.contains(1).await);

        let err = reply.await.unwrap_err();
        assert!(matches!(err, Error::RequestTimeout(_)));
        assert!(!client.inner.requests.contains(1).await);

        let stats = client.stats().await;
        assert_eq!(stats.request_timeouts, 1);
        assert_eq!(stats.pending_requests, 0);
    }

    #[tokio::test]
    async fn test_rejected_publish_clears_the_entry() {
        let (client, _coordinator, relay, _me) = connected_with_identity().await;
        relay.set_reject_publish(Some("rate-limited")).await;

        let err = client.fiat_sent("abc").await.unwrap_err();
        assert!(matches!(err, Error::PublishFailure(_)));
        assert!(err.to_string().contains("rate-limited"));

        let stats = client.stats().await;
        assert_eq!(stats.requests_sent, 0);
        assert_eq!(stats.pending_requests, 0);
    }

    #[tokio::test]
    async fn test_builders_validate_before_sending() {
        let (client, _coordinator, _relay, _me) = connected_with_identity().await;

        let err = client.take_buy(&sell_order("abc"), None).await.unwrap_err();
        assert!(matches!(err, Error::Validation(_)));
        assert!(matches!(
            client.rate_user("abc", 6).await,
            Err(Error::Validation(_))
        ));
        assert!(matches!(
            client.add_invoice("abc", " ", None).await,
            Err(Error::Validation(_))
        ));
        assert!(matches!(client.cancel("").await, Err(Error::Validation(_))));
        assert!(matches!(
            client.send_request(Action::NewOrder, None, None).await,
            Err(Error::Validation(_))
        ));
        assert_eq!(client.stats().await.pending_requests, 0);
    }

    #[tokio::test]
    async fn test_shutdown_cancels_pending_work() {
        let (client, _coordinator, relay, _me) = connected_with_identity().await;

        let request = client.dispute("abc").await.unwrap();
        let waiter = client
            .wait_for_action(Action::BuyerTookOrder, "abc", None)
            .await;

        client.shutdown().await;
        assert!(matches!(request.await, Err(Error::Cancelled(_))));
        assert!(matches!(waiter.await, Err(Error::Cancelled(_))));
        assert!(relay.subscription_ids().await.is_empty());
        assert!(!client.is_connected());
        assert!(matches!(client.connect().await, Err(Error::Cancelled(_))));
    }

    #[tokio::test]
    async fn test_dropping_client_cancels_pending_work() {
        let (client, _coordinator, _relay, _me) = connected_with_identity().await;

        let request = client.dispute("abc").await.unwrap();
        let waiter = client
            .wait_for_action(Action::BuyerTookOrder, "abc", None)
            .await;

        drop(client);
        let request = timeout(WAIT, request).await.unwrap();
        let waiter = timeout(WAIT, waiter).await.unwrap();
        assert!(matches!(request, Err(Error::Cancelled(_))));
        assert!(matches!(waiter, Err(Error::Cancelled(_))));
    }

    // =============================================================================
    // Inbound
    // =============================================================================

    #[tokio::test]
    async fn test_wait_for_action_only_resolves_matching_order() {
        let (client, coordinator, _relay, me) = connected_with_identity().await;

        let wanted = client
            .wait_for_action(Action::PayInvoice, "abc", None)
            .await;
        let _other = client
            .wait_for_action(Action::PayInvoice, "xyz", None)
            .await;

        let notice = Message::new(
            Action::PayInvoice,
            Some("abc".to_string()),
            Some(Content::PaymentRequest(None, "lnbc1invoice".to_string(), None)),
        );
        coordinator.send(&me, &notice).await;

        let message = timeout(WAIT, wanted).await.unwrap().unwrap();
        assert_eq!(message.id.as_deref(), Some("abc"));
        assert_eq!(client.stats().await.pending_waiters, 1);
    }

    #[tokio::test]
    async fn test_protocol_messages_from_strangers_are_dropped() {
        let (client, coordinator, relay, me) = connected_with_identity().await;
        let mut messages = client.notifications().messages.subscribe().await;
        let waiter = client.wait_for_action(Action::Release, "abc", None).await;

        let stranger = Keys::generate();
        let forged = Message::new(Action::Release, Some("abc".to_string()), None).with_request_id(1);
        send_as(&stranger, &EnvelopeCodec::default(), &relay, &me, &forged).await;

        let genuine = Message::new(Action::Cancel, Some("abc".to_string()), None);
        coordinator.send(&me, &genuine).await;

        let inbound = timeout(WAIT, messages.recv()).await.unwrap().unwrap();
        assert_eq!(inbound.sender, coordinator.keys.public_key());
        assert_eq!(inbound.message.action, Action::Cancel);

        let stats = client.stats().await;
        assert_eq!(stats.events_dropped, 1);
        assert_eq!(stats.unsolicited_replies, 0);
        assert_eq!(stats.pending_waiters, 1);
        drop(waiter);
    }

    #[tokio::test]
    async fn test_direct_messages_between_parties() {
        let (alice, coordinator, relay, alice_pk) = connected_with_identity().await;
        let bob = Mostro::new(coordinator.config(), relay.clone()).unwrap();
        let bob_pk = bob.set_identity(SecretKey::generate()).await.unwrap();
        bob.connect().await.unwrap();

        let mut bob_chat = bob.notifications().direct_messages.subscribe().await;
        let mut bob_messages = bob.notifications().messages.subscribe().await;
        let mut alice_chat = alice.notifications().direct_messages.subscribe().await;

        let first = alice
            .send_direct_message(&bob_pk, "sent the fiat", None)
            .await
            .unwrap();
        let received = timeout(WAIT, bob_chat.recv()).await.unwrap().unwrap();
        assert_eq!(received.sender, alice_pk);
        assert_eq!(received.content, "sent the fiat");
        assert_eq!(received.rumor_id, first);
        assert_eq!(received.reply_to, None);

        bob.send_direct_message(&alice_pk, "got it", Some(&first))
            .await
            .unwrap();
        let answer = timeout(WAIT, alice_chat.recv()).await.unwrap().unwrap();
        assert_eq!(answer.sender, bob_pk);
        assert_eq!(answer.reply_to, Some(first));

        // Chat never touches protocol state
        assert_eq!(bob_messages.try_recv(), None);
        let stats = bob.stats().await;
        assert_eq!(stats.direct_messages_received, 1);
        assert_eq!(stats.requests_sent, 0);
        assert_eq!(stats.unsolicited_replies, 0);
        assert_eq!(stats.events_dropped, 0);
    }

    #[tokio::test]
    async fn test_direct_message_validation() {
        let (client, _coordinator, _relay) = setup().await;
        let peer = Keys::generate().public_key();
        assert!(matches!(
            client.send_direct_message(&peer, "hi", None).await,
            Err(Error::NoIdentity)
        ));

        client.set_identity(SecretKey::generate()).await.unwrap();
        assert!(matches!(
            client.send_direct_message(&peer, "  ", None).await,
            Err(Error::Validation(_))
        ));
    }

    #[tokio::test]
    async fn test_stored_private_messages_follow_rumor_time() {
        let (client, coordinator, _relay) = setup().await;
        let me = client.set_identity(SecretKey::generate()).await.unwrap();

        // Stored in order a, b, c with wrap times that disagree with rumor times
        let now = unix_now();
        for (order_id, rumor_at, wrap_at) in [
            ("a", now - 100, now - 1000),
            ("b", now - 300, now - 10),
            ("c", now - 200, now - 500),
        ] {
            let message = Message::new(Action::Cancel, Some(order_id.to_string()), None);
            coordinator
                .store_message_at(&me, &message, rumor_at, wrap_at)
                .await;
        }

        let mut messages = client.notifications().messages.subscribe().await;
        client.connect().await.unwrap();

        let mut seen = Vec::new();
        for _ in 0..3 {
            let inbound = timeout(WAIT, messages.recv()).await.unwrap().unwrap();
            seen.push((inbound.message.id.unwrap(), inbound.created_at));
        }
        assert_eq!(
            seen,
            vec![
                ("b".to_string(), now - 300),
                ("c".to_string(), now - 200),
                ("a".to_string(), now - 100),
            ]
        );
    }

    #[tokio::test]
    async fn test_unsolicited_reply_is_counted_and_still_delivered() {
        let (client, coordinator, _relay, me) = connected_with_identity().await;
        let mut messages = client.notifications().messages.subscribe().await;

        let stray = Message::new(Action::Cancel, Some("abc".to_string()), None).with_request_id(42);
        coordinator.send(&me, &stray).await;

        let inbound = timeout(WAIT, messages.recv()).await.unwrap().unwrap();
        assert_eq!(inbound.message.request_id, Some(42));
        assert_eq!(client.stats().await.unsolicited_replies, 1);
    }

    #[tokio::test]
    async fn test_public_orders_are_created_then_updated() {
        let (client, coordinator, _relay) = setup().await;
        client.connect().await.unwrap();
        let mut updates = client.notifications().orders.subscribe().await;

        let now = unix_now();
        let first = coordinator.publish_order("abc", "pending", now).await;
        let update = timeout(WAIT, updates.recv()).await.unwrap().unwrap();
        assert_eq!(update.change, OrderChange::Created);
        assert_eq!(update.event_id, first.id);
        assert_eq!(update.order.counterparty_id, coordinator.keys.public_key());

        coordinator.publish_order("abc", "active", now + 1).await;
        let update = timeout(WAIT, updates.recv()).await.unwrap().unwrap();
        assert_eq!(update.change, OrderChange::Updated);

        let orders = client.orders().await;
        assert_eq!(orders.len(), 1);
        assert_eq!(orders[0].status, "active");
        assert_eq!(client.order("abc").await.map(|o| o.fiat_amount), Some(50.0));
    }

    #[tokio::test]
    async fn test_stale_order_version_leaves_recorded_event() {
        let (client, coordinator, _relay) = setup().await;
        let mut updates = client.notifications().orders.subscribe().await;

        let newer = coordinator.order_event("abc", "active", 20);
        let older = coordinator.order_event("abc", "pending", 10);
        for event in [&newer, &older, &newer] {
            client.inner.handle_public_event(event.clone()).await;
        }

        let update = updates.try_recv().unwrap();
        assert_eq!(update.change, OrderChange::Created);
        assert_eq!(update.event_id, newer.id);
        assert_eq!(updates.try_recv(), None);

        assert_eq!(
            client.inner.order_events.lock().await.get("abc"),
            Some(&newer.id)
        );
        assert_eq!(client.order("abc").await.map(|o| o.status), Some("active".to_string()));
    }

    #[tokio::test]
    async fn test_stored_orders_replay_oldest_first() {
        let (client, coordinator, _relay) = setup().await;
        let now = unix_now();
        coordinator.publish_order("c", "pending", now - 1).await;
        coordinator.publish_order("a", "pending", now - 3).await;
        coordinator.publish_order("b", "pending", now - 2).await;

        let mut updates = client.notifications().orders.subscribe().await;
        client.connect().await.unwrap();

        let mut seen = Vec::new();
        for _ in 0..3 {
            let update = timeout(WAIT, updates.recv()).await.unwrap().unwrap();
            seen.push(update.order.id);
        }
        assert_eq!(seen, vec!["a", "b", "c"]);
    }

    // =============================================================================
    // Transport interaction
    // =============================================================================

    #[tokio::test]
    async fn test_connect_without_identity_opens_public_subscription_only() {
        let coordinator = Keys::generate().public_key();
        let mut transport = MockRelayTransport::new();
        transport.expect_connect().times(1).returning(|| Ok(()));
        transport
            .expect_subscribe()
            .withf(move |id, filter| {
                id.as_str().starts_with("orders")
                    && filter.kinds == vec![kind::ORDER_STATE]
                    && filter.authors == vec![coordinator]
                    && filter.p_tags.is_empty()
                    && filter.since.is_some()
            })
            .times(1)
            .returning(|_, _| empty_channel());

        let config = Config {
            mostro_pubkey: coordinator.to_hex(),
            ..Config::default()
        };
        let client = Mostro::new(config, Arc::new(transport)).unwrap();
        client.connect().await.unwrap();
        assert!(client.is_connected());
    }

    #[tokio::test]
    async fn test_connect_failure_propagates() {
        let mut transport = MockRelayTransport::new();
        transport
            .expect_connect()
            .returning(|| Err(Error::not_connected("wss://relay.example")));
        transport.expect_subscribe().never();

        let config = Config {
            mostro_pubkey: Keys::generate().public_key().to_hex(),
            ..Config::default()
        };
        let client = Mostro::new(config, Arc::new(transport)).unwrap();
        assert!(matches!(client.connect().await, Err(Error::NotConnected(_))));
        assert!(!client.is_connected());
    }

    #[tokio::test]
    async fn test_request_is_gift_wrapped_for_coordinator() {
        let coordinator = Keys::generate();
        let coordinator_pk = coordinator.public_key();
        let mut transport = MockRelayTransport::new();
        transport
            .expect_publish()
            .withf(move |event| {
                event.kind == kind::GIFT_WRAP
                    && event.tags.public_keys().collect::<Vec<_>>() == vec![coordinator_pk]
            })
            .times(1)
            .returning(|_| {
                Ok(PublishReceipt {
                    accepted: vec!["wss://relay.example".to_string()],
                    rejected: vec![],
                })
            });

        let config = Config {
            mostro_pubkey: coordinator_pk.to_hex(),
            ..Config::default()
        };
        let client = Mostro::new(config, Arc::new(transport)).unwrap();
        client.set_identity(SecretKey::generate()).await.unwrap();

        let reply = client.take_sell(&sell_order("abc"), Some(20_000)).await.unwrap();
        assert_eq!(reply.id(), 1);
        assert!(client.inner.requests.contains(1).await);
    }

    #[tokio::test]
    #[tracing_test::traced_test]
    async fn test_failed_publish_is_logged() {
        let (client, _coordinator, relay, _me) = connected_with_identity().await;
        relay.set_reject_publish(Some("blocked")).await;

        assert!(client.release("abc").await.is_err());
        assert!(logs_contain("request 1 (Release) not sent"));
    }
}
