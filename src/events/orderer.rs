//! Per-subscription reordering buffer.
//!
//! Relays replay stored events in no particular order. Each subscription owns
//! an `EventOrderer` that holds everything until the relay signals end of
//! stored events, then releases the backlog sorted by logical timestamp. Live
//! events after that point still pass through the sort step, one per batch.
//!
//! ```text
//!   subscribe ──► Accumulating ──(EOSE)──► Draining
//!                  push: buffer            push: buffer + flush
//! ```

use std::cmp::Ordering;
use std::mem;

use crate::envelope::UnwrappedMessage;
use crate::nostr::Event;

/// Something with a logical timestamp and a deterministic tie-breaker.
pub trait Chronological {
    fn timestamp(&self) -> u64;
    fn tie_break(&self) -> &str;
}

impl Chronological for Event {
    fn timestamp(&self) -> u64 {
        self.created_at
    }

    fn tie_break(&self) -> &str {
        self.id.as_str()
    }
}

/// Private messages order by the rumor, never by the jittered wrap.
impl Chronological for UnwrappedMessage {
    fn timestamp(&self) -> u64 {
        self.rumor.created_at
    }

    fn tie_break(&self) -> &str {
        self.rumor.id.as_str()
    }
}

fn chronological<T: Chronological>(a: &T, b: &T) -> Ordering {
    a.timestamp()
        .cmp(&b.timestamp())
        .then_with(|| a.tie_break().cmp(b.tie_break()))
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Phase {
    /// Stored events are still arriving; nothing is released.
    Accumulating,
    /// Backlog released; every push flushes immediately.
    Draining,
}

#[derive(Debug)]
pub struct EventOrderer<T> {
    phase: Phase,
    buffer: Vec<T>,
}

impl<T: Chronological> Default for EventOrderer<T> {
    fn default() -> Self {
        Self::new()
    }
}

impl<T: Chronological> EventOrderer<T> {
    pub fn new() -> Self {
        Self {
            phase: Phase::Accumulating,
            buffer: Vec::new(),
        }
    }

    pub fn phase(&self) -> Phase {
        self.phase
    }

    /// Number of items held back, waiting for end of stored events.
    pub fn pending(&self) -> usize {
        self.buffer.len()
    }

    /// Buffer `item` and return whatever batch is ready to dispatch.
    ///
    /// Empty while accumulating.
    pub fn push(&mut self, item: T) -> Vec<T> {
        self.buffer.push(item);
        match self.phase {
            Phase::Accumulating => Vec::new(),
            Phase::Draining => self.flush(),
        }
    }

    /// Switch to draining and release the sorted backlog.
    pub fn end_of_stored_events(&mut self) -> Vec<T> {
        if self.phase == Phase::Draining {
            tracing::debug!("duplicate end of stored events ignored");
        }
        self.phase = Phase::Draining;
        self.flush()
    }

    /// Back to accumulating with an empty buffer, as after a resubscribe.
    pub fn reset(&mut self) {
        self.phase = Phase::Accumulating;
        self.buffer.clear();
    }

    fn flush(&mut self) -> Vec<T> {
        let mut batch = mem::take(&mut self.buffer);
        batch.sort_by(chronological);
        batch
    }
}
