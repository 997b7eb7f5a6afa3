//! Mostro protocol: actions, message payloads and order records.

pub mod action;
pub mod content;
pub mod message;
pub mod order;

pub use action::Action;
pub use content::{validate_for_action, Content, MAX_RATING, MIN_RATING};
pub use message::{Message, PROTOCOL_VERSION};
pub use order::{Dispute, MostroInfo, NewOrder, Order, OrderKind, STATUS_PENDING};
