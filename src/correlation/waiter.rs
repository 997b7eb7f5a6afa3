//! Predicate waiters keyed by `(action, order id)`.

use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Duration;

use tokio::sync::oneshot;
use tokio::task::AbortHandle;

use super::{Reply, ReplySender};
use crate::protocol::{Action, Message};
use crate::types::Error;

#[derive(Debug)]
struct Waiter {
    action: Action,
    order_id: String,
    sender: ReplySender,
    timer: AbortHandle,
}

/// Waiters for inbound messages recognised by shape rather than request id.
///
/// Each waiter resolves on its first match; messages it does not match are
/// left for other waiters.
#[derive(Debug)]
pub struct ActionWaiter {
    next_id: AtomicU64,
    waiters: Arc<Mutex<HashMap<u64, Waiter>>>,
}

impl Default for ActionWaiter {
    fn default() -> Self {
        Self::new()
    }
}

impl ActionWaiter {
    pub fn new() -> Self {
        Self {
            next_id: AtomicU64::new(1),
            waiters: Arc::new(Mutex::new(HashMap::new())),
        }
    }

    /// Resolve with the first inbound message with `action` about `order_id`.
    pub async fn wait(&self, action: Action, order_id: &str, timeout: Duration) -> Reply {
        let id = self.next_id.fetch_add(1, Ordering::Relaxed);
        let (tx, rx) = oneshot::channel();

        let mut waiters = self.lock();
        let timer = self.arm_timer(id, timeout);
        tracing::debug!("waiting for {} on order {} (waiter {})", action, order_id, id);
        waiters.insert(
            id,
            Waiter {
                action,
                order_id: order_id.to_string(),
                sender: tx,
                timer,
            },
        );
        drop(waiters);

        Reply::new(id, rx)
    }

    /// Offer `message` to every waiter. Returns how many it resolved.
    pub async fn dispatch(&self, message: &Message) -> usize {
        let Some(order_id) = message.id.as_deref() else {
            return 0;
        };

        let mut waiters = self.lock();
        let matched: Vec<u64> = waiters
            .iter()
            .filter(|(_, w)| w.action == message.action && w.order_id == order_id)
            .map(|(id, _)| *id)
            .collect();

        for id in &matched {
            if let Some(waiter) = waiters.remove(id) {
                waiter.timer.abort();
                let _ = waiter.sender.send(Ok(message.clone()));
            }
        }

        if matched.is_empty() && !waiters.is_empty() {
            tracing::trace!(
                "{} on order {} matched none of {} waiters",
                message.action,
                order_id,
                waiters.len()
            );
        }
        matched.len()
    }

    /// Reject every waiter with `Cancelled`.
    pub async fn sweep(&self, reason: &str) -> usize {
        self.cancel_all(reason)
    }

    /// Synchronous form of [`sweep`](Self::sweep), usable from `Drop`.
    pub fn cancel_all(&self, reason: &str) -> usize {
        let drained: Vec<Waiter> = self.lock().drain().map(|(_, w)| w).collect();
        let count = drained.len();
        for waiter in drained {
            waiter.timer.abort();
            let _ = waiter.sender.send(Err(Error::cancelled(format!(
                "waiting for {} on order {}: {}",
                waiter.action, waiter.order_id, reason
            ))));
        }
        if count > 0 {
            tracing::info!("swept {} action waiters: {}", count, reason);
        }
        count
    }

    pub async fn len(&self) -> usize {
        self.lock().len()
    }

    pub async fn is_empty(&self) -> bool {
        self.len().await == 0
    }

    fn lock(&self) -> MutexGuard<'_, HashMap<u64, Waiter>> {
        self.waiters.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn arm_timer(&self, id: u64, timeout: Duration) -> AbortHandle {
        let waiters = Arc::clone(&self.waiters);
        tokio::spawn(async move {
            tokio::time::sleep(timeout).await;
            let waiter = waiters
                .lock()
                .unwrap_or_else(PoisonError::into_inner)
                .remove(&id);
            if let Some(waiter) = waiter {
                tracing::warn!(
                    "timed out waiting for {} on order {}",
                    waiter.action,
                    waiter.order_id
                );
                let _ = waiter.sender.send(Err(Error::request_timeout(format!(
                    "no {} for order {} within {:?}",
                    waiter.action, waiter.order_id, timeout
                ))));
            }
        })
        .abort_handle()
    }
}

impl Drop for ActionWaiter {
    fn drop(&mut self) {
        self.cancel_all("action waiter dropped");
    }
}
