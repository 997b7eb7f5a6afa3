//! Id-keyed pending request table.

use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Duration;

use tokio::sync::oneshot;
use tokio::task::AbortHandle;

use super::{Reply, ReplySender};
use crate::protocol::Message;
use crate::types::Error;

#[derive(Debug)]
struct PendingRequest {
    sender: ReplySender,
    timer: AbortHandle,
}

/// Outstanding requests keyed by `request_id`.
///
/// Ids start at 1 and only grow. At most one live entry per id. Dropping the
/// table rejects whatever is still pending.
#[derive(Debug)]
pub struct CorrelationTable {
    next_id: AtomicU64,
    timeout: Duration,
    pending: Arc<Mutex<HashMap<u64, PendingRequest>>>,
    timed_out: Arc<AtomicU64>,
}

impl CorrelationTable {
    pub fn new(timeout: Duration) -> Self {
        Self {
            next_id: AtomicU64::new(1),
            timeout,
            pending: Arc::new(Mutex::new(HashMap::new())),
            timed_out: Arc::new(AtomicU64::new(0)),
        }
    }

    pub fn timeout(&self) -> Duration {
        self.timeout
    }

    /// Allocate the next id and arm its timeout.
    pub async fn register(&self) -> Reply {
        let id = self.next_id.fetch_add(1, Ordering::Relaxed);
        let (tx, rx) = oneshot::channel();

        let mut pending = self.lock();
        let timer = self.arm_timer(id);
        pending.insert(id, PendingRequest { sender: tx, timer });
        drop(pending);

        tracing::debug!("registered request {} (timeout {:?})", id, self.timeout);
        Reply::new(id, rx)
    }

    /// Resolve the entry for `id`. Returns false for unknown or expired ids.
    pub async fn complete(&self, id: u64, message: Message) -> bool {
        let entry = self.lock().remove(&id);
        match entry {
            Some(entry) => {
                entry.timer.abort();
                if entry.sender.send(Ok(message)).is_err() {
                    tracing::debug!("reply for request {} arrived after caller went away", id);
                }
                true
            }
            None => {
                tracing::debug!("unsolicited reply for request {} ignored", id);
                false
            }
        }
    }

    /// Drop the entry for `id` with an error, as when its publish failed.
    pub async fn fail(&self, id: u64, error: Error) -> bool {
        let entry = self.lock().remove(&id);
        match entry {
            Some(entry) => {
                entry.timer.abort();
                let _ = entry.sender.send(Err(error));
                true
            }
            None => false,
        }
    }

    /// Reject every pending entry with `Cancelled`. Returns how many were swept.
    pub async fn sweep(&self, reason: &str) -> usize {
        self.cancel_all(reason)
    }

    /// Synchronous form of [`sweep`](Self::sweep), usable from `Drop`.
    pub fn cancel_all(&self, reason: &str) -> usize {
        let drained: Vec<(u64, PendingRequest)> = self.lock().drain().collect();
        let count = drained.len();
        for (id, entry) in drained {
            entry.timer.abort();
            let _ = entry
                .sender
                .send(Err(Error::cancelled(format!("request {}: {}", id, reason))));
        }
        if count > 0 {
            tracing::info!("swept {} pending requests: {}", count, reason);
        }
        count
    }

    /// How many entries expired without a reply.
    pub fn timed_out(&self) -> u64 {
        self.timed_out.load(Ordering::Relaxed)
    }

    pub async fn contains(&self, id: u64) -> bool {
        self.lock().contains_key(&id)
    }

    pub async fn len(&self) -> usize {
        self.lock().len()
    }

    pub async fn is_empty(&self) -> bool {
        self.len().await == 0
    }

    fn lock(&self) -> MutexGuard<'_, HashMap<u64, PendingRequest>> {
        self.pending.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn arm_timer(&self, id: u64) -> AbortHandle {
        let pending = Arc::clone(&self.pending);
        let timed_out = Arc::clone(&self.timed_out);
        let timeout = self.timeout;
        tokio::spawn(async move {
            tokio::time::sleep(timeout).await;
            // complete() may have won the race; only fire for a live entry
            let entry = pending
                .lock()
                .unwrap_or_else(PoisonError::into_inner)
                .remove(&id);
            if let Some(entry) = entry {
                timed_out.fetch_add(1, Ordering::Relaxed);
                tracing::warn!("request {} timed out after {:?}", id, timeout);
                let _ = entry.sender.send(Err(Error::request_timeout(format!(
                    "no reply to request {} within {:?}",
                    id, timeout
                ))));
            }
        })
        .abort_handle()
    }
}

impl Drop for CorrelationTable {
    fn drop(&mut self) {
        self.cancel_all("correlation table dropped");
    }
}
