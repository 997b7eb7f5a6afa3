//! Inbound event handling: per-topic reordering and public record decoding.

pub mod orderer;
pub mod public;

pub use orderer::{Chronological, EventOrderer, Phase};
pub use public::{
    classify, decode, decode_dispute, decode_info, decode_order, PublicRecord, RecordKind,
};
