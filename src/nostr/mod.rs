//! Nostr primitives: keys, events, filters and conversation encryption.

mod event;
mod filter;
mod keys;
pub mod nip44;

pub use event::{kind, Event, Tags, UnsignedEvent};
pub use filter::Filter;
pub use keys::{Keys, PublicKey, SecretKey};

/// Current unix time in seconds.
pub fn unix_now() -> u64 {
    u64::try_from(chrono::Utc::now().timestamp()).unwrap_or(0)
}
