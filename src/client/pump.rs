//! Subscription pump: relay stream → orderer → handler.

use std::future::Future;

use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

use crate::events::{Chronological, EventOrderer};
use crate::nostr::Event;
use crate::transport::RelayMessage;
use crate::types::SubscriptionId;

/// A running subscription and the task draining it.
#[derive(Debug)]
pub(crate) struct Pump {
    pub(crate) id: SubscriptionId,
    token: CancellationToken,
    task: JoinHandle<()>,
}

impl Pump {
    /// Spawn a task that feeds `rx` through an [`EventOrderer`].
    ///
    /// `prepare` turns a raw event into an orderable item (or drops it);
    /// `handle` receives items in dispatch order, one at a time.
    pub(crate) fn spawn<T, P, H, Fut>(
        id: SubscriptionId,
        mut rx: mpsc::UnboundedReceiver<RelayMessage>,
        token: CancellationToken,
        mut prepare: P,
        mut handle: H,
    ) -> Self
    where
        T: Chronological + Send + 'static,
        P: FnMut(Event) -> Option<T> + Send + 'static,
        H: FnMut(T) -> Fut + Send + 'static,
        Fut: Future<Output = ()> + Send + 'static,
    {
        let task_token = token.clone();
        let label = id.clone();
        let task = tokio::spawn(async move {
            let mut orderer = EventOrderer::new();
            loop {
                let batch = tokio::select! {
                    _ = task_token.cancelled() => break,
                    received = rx.recv() => match received {
                        Some(RelayMessage::Event(event)) => match prepare(event) {
                            Some(item) => orderer.push(item),
                            None => continue,
                        },
                        Some(RelayMessage::EndOfStoredEvents) => {
                            let batch = orderer.end_of_stored_events();
                            tracing::debug!("{} end of stored events, releasing {}", label, batch.len());
                            batch
                        }
                        None => {
                            tracing::warn!("{} closed by transport", label);
                            break;
                        }
                    },
                };
                for item in batch {
                    handle(item).await;
                }
            }
            tracing::debug!("{} pump stopped", label);
        });

        Self { id, token, task }
    }

    /// Cancel the task and wait for it to finish its current item.
    pub(crate) async fn stop(self) {
        self.token.cancel();
        if let Err(e) = self.task.await {
            if e.is_panic() {
                tracing::error!("{} pump panicked", self.id);
            }
        }
    }
}
