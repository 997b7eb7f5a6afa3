//! Request/reply correlation over a one-way broadcast channel.
//!
//! Two separate mechanisms:
//!   - [`CorrelationTable`]: "what answered my request", matched by `request_id`.
//!   - [`ActionWaiter`]: "tell me when X happens to order O", matched by
//!     `(action, order id)` for replies that carry no request id.
//!
//! Both hand out a [`Reply`] future backed by a oneshot channel and arm one
//! timer task per entry. Removing an entry always aborts its timer.

use std::future::Future;
use std::pin::Pin;
use std::task::{Context, Poll};

use tokio::sync::oneshot;

use crate::protocol::Message;
use crate::types::{Error, Result};

pub mod table;
pub mod waiter;

pub use table::CorrelationTable;
pub use waiter::ActionWaiter;

type ReplySender = oneshot::Sender<Result<Message>>;

/// Future resolving to the correlated reply, a timeout, or a cancellation.
#[derive(Debug)]
pub struct Reply {
    id: u64,
    rx: oneshot::Receiver<Result<Message>>,
}

impl Reply {
    fn new(id: u64, rx: oneshot::Receiver<Result<Message>>) -> Self {
        Self { id, rx }
    }

    /// Request id (table) or waiter id (waiter) this reply belongs to.
    pub fn id(&self) -> u64 {
        self.id
    }
}

impl Future for Reply {
    type Output = Result<Message>;

    fn poll(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Self::Output> {
        Pin::new(&mut self.rx).poll(cx).map(|received| match received {
            Ok(outcome) => outcome,
            Err(_) => Err(Error::cancelled("reply channel closed")),
        })
    }
}
