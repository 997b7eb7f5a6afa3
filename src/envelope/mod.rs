//! Three-layer private envelope: Rumor → Seal → GiftWrap.
//!
//! - **Rumor**: the unsigned logical message, authored by the sender's real key.
//! - **Seal**: the rumor encrypted under (sender, recipient) and signed by the sender.
//! - **GiftWrap**: the seal encrypted under (ephemeral, recipient), signed by a
//!   single-use key and addressed with a `p` tag.
//!
//! Seal and wrap timestamps are independently backdated by a random amount so
//! relays never learn when the rumor was written. The codec holds no state
//! besides that window and performs no I/O.

use rand::Rng;
use serde::{Deserialize, Serialize};
use std::time::Duration;

use crate::nostr::nip44::{self, ConversationKey};
use crate::nostr::{kind, unix_now, Event, Keys, PublicKey, Tags, UnsignedEvent};
use crate::types::{Error, EventId, Result};

// =============================================================================
// Layers
// =============================================================================

/// Unsigned logical message. Never transmitted directly.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Rumor {
    pub id: EventId,
    pub pubkey: PublicKey,
    pub created_at: u64,
    pub kind: u16,
    pub tags: Tags,
    pub content: String,
}

impl Rumor {
    /// Text-note rumor from `author` addressed to `recipient`, stamped now.
    pub fn new(author: PublicKey, recipient: &PublicKey, content: impl Into<String>) -> Result<Self> {
        let unsigned = UnsignedEvent::new(
            author,
            unix_now(),
            kind::TEXT_NOTE,
            Tags::new().with("p", [recipient.to_hex()]),
            content.into(),
        );
        Self::from_unsigned(unsigned)
    }

    pub fn from_unsigned(unsigned: UnsignedEvent) -> Result<Self> {
        let id = unsigned.compute_id()?;
        Ok(Self {
            id,
            pubkey: unsigned.pubkey,
            created_at: unsigned.created_at,
            kind: unsigned.kind,
            tags: unsigned.tags,
            content: unsigned.content,
        })
    }

    /// Check that the declared id is the hash of the other fields.
    pub fn verify_id(&self) -> Result<()> {
        let computed = UnsignedEvent::new(
            self.pubkey,
            self.created_at,
            self.kind,
            self.tags.clone(),
            self.content.clone(),
        )
        .compute_id()?;
        if computed != self.id {
            return Err(Error::malformed_envelope(format!(
                "rumor id {} does not match content hash {}",
                self.id, computed
            )));
        }
        Ok(())
    }
}

macro_rules! define_layer {
    ($name:ident, $kind:expr) => {
        #[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
        #[serde(transparent)]
        pub struct $name(Event);

        impl $name {
            pub fn event(&self) -> &Event {
                &self.0
            }

            pub fn into_event(self) -> Event {
                self.0
            }

            pub fn author(&self) -> PublicKey {
                self.0.pubkey
            }

            pub fn created_at(&self) -> u64 {
                self.0.created_at
            }
        }

        impl TryFrom<Event> for $name {
            type Error = Error;

            fn try_from(event: Event) -> Result<Self> {
                if event.kind != $kind {
                    return Err(Error::malformed_envelope(format!(
                        concat!(stringify!($name), " must be kind {}, got {}"),
                        $kind, event.kind
                    )));
                }
                Ok(Self(event))
            }
        }
    };
}

define_layer!(Seal, kind::SEAL);
define_layer!(GiftWrap, kind::GIFT_WRAP);

/// Result of peeling a gift wrap.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct UnwrappedMessage {
    pub rumor: Rumor,
    pub seal: Seal,
}

impl UnwrappedMessage {
    /// The sender's real identity (seal author, equal to the rumor author).
    pub fn sender(&self) -> PublicKey {
        self.seal.author()
    }
}

// =============================================================================
// Codec
// =============================================================================

#[derive(Debug, Clone)]
pub struct EnvelopeCodec {
    time_window: Duration,
}

impl Default for EnvelopeCodec {
    fn default() -> Self {
        Self::new(Duration::from_secs(2 * 24 * 60 * 60))
    }
}

impl EnvelopeCodec {
    pub fn new(time_window: Duration) -> Self {
        Self { time_window }
    }

    pub fn time_window(&self) -> Duration {
        self.time_window
    }

    /// Seal `rumor` with the sender's key and gift-wrap it for `recipient`.
    pub fn wrap(&self, rumor: &Rumor, sender: &Keys, recipient: &PublicKey) -> Result<GiftWrap> {
        if rumor.pubkey != sender.public_key() {
            return Err(Error::validation(
                "rumor author must be the sealing identity",
            ));
        }
        let seal = self.seal(rumor, sender, recipient, self.jittered_now())?;
        let wrap = self.gift_wrap(&seal, recipient, self.jittered_now())?;
        tracing::trace!(
            "wrapped rumor {} into gift wrap {} for {}",
            rumor.id,
            wrap.event().id,
            recipient
        );
        Ok(wrap)
    }

    /// Open both layers with `receiver`'s key and check their consistency.
    pub fn unwrap(&self, event: &Event, receiver: &Keys) -> Result<UnwrappedMessage> {
        let wrap = GiftWrap::try_from(event.clone())?;
        wrap.event()
            .verify()
            .map_err(|e| Error::malformed_envelope(format!("gift wrap: {}", e)))?;

        let outer_key = ConversationKey::derive(receiver.secret_key(), &wrap.author())?;
        let seal_json = nip44::decrypt(&outer_key, &wrap.event().content)?;
        let seal_event: Event = serde_json::from_str(&seal_json)
            .map_err(|e| Error::decryption(format!("seal does not parse: {}", e)))?;
        let seal = Seal::try_from(seal_event)?;
        seal.event()
            .verify()
            .map_err(|e| Error::malformed_envelope(format!("seal: {}", e)))?;

        let inner_key = ConversationKey::derive(receiver.secret_key(), &seal.author())?;
        let rumor_json = nip44::decrypt(&inner_key, &seal.event().content)?;
        let rumor: Rumor = serde_json::from_str(&rumor_json)
            .map_err(|e| Error::decryption(format!("rumor does not parse: {}", e)))?;

        rumor.verify_id()?;
        if rumor.pubkey != seal.author() {
            return Err(Error::malformed_envelope(format!(
                "rumor author {} differs from seal author {}",
                rumor.pubkey,
                seal.author()
            )));
        }

        Ok(UnwrappedMessage { rumor, seal })
    }

    pub(crate) fn seal(
        &self,
        rumor: &Rumor,
        sender: &Keys,
        recipient: &PublicKey,
        created_at: u64,
    ) -> Result<Seal> {
        let key = ConversationKey::derive(sender.secret_key(), recipient)?;
        let content = nip44::encrypt(&key, &serde_json::to_string(rumor)?)?;
        let unsigned = UnsignedEvent::new(
            sender.public_key(),
            created_at,
            kind::SEAL,
            Tags::new(),
            content,
        );
        Ok(Seal(Event::sign(unsigned, sender)?))
    }

    pub(crate) fn gift_wrap(
        &self,
        seal: &Seal,
        recipient: &PublicKey,
        created_at: u64,
    ) -> Result<GiftWrap> {
        let ephemeral = Keys::generate();
        let key = ConversationKey::derive(ephemeral.secret_key(), recipient)?;
        let content = nip44::encrypt(&key, &serde_json::to_string(seal)?)?;
        let unsigned = UnsignedEvent::new(
            ephemeral.public_key(),
            created_at,
            kind::GIFT_WRAP,
            Tags::new().with("p", [recipient.to_hex()]),
            content,
        );
        Ok(GiftWrap(Event::sign(unsigned, &ephemeral)?))
    }

    fn jittered_now(&self) -> u64 {
        let window = self.time_window.as_secs();
        let backdate = if window == 0 {
            0
        } else {
            rand::thread_rng().gen_range(0..=window)
        };
        unix_now().saturating_sub(backdate)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;
    use proptest::prelude::*;

    fn parties() -> (Keys, Keys) {
        (Keys::generate(), Keys::generate())
    }

    #[test]
    fn test_roundtrip_recovers_rumor_and_sender() {
        let (alice, mostro) = parties();
        let codec = EnvelopeCodec::default();
        let rumor = Rumor::new(alice.public_key(), &mostro.public_key(), "{\"order\":{}}").unwrap();

        let wrap = codec.wrap(&rumor, &alice, &mostro.public_key()).unwrap();
        let opened = codec.unwrap(wrap.event(), &mostro).unwrap();

        assert_eq!(opened.rumor, rumor);
        assert_eq!(opened.sender(), alice.public_key());
    }

    #[test]
    fn test_wrap_hides_sender_and_addresses_recipient() {
        let (alice, mostro) = parties();
        let codec = EnvelopeCodec::default();
        let rumor = Rumor::new(alice.public_key(), &mostro.public_key(), "hi").unwrap();
        let wrap = codec.wrap(&rumor, &alice, &mostro.public_key()).unwrap();

        assert_eq!(wrap.event().kind, kind::GIFT_WRAP);
        assert_ne!(wrap.author(), alice.public_key());
        assert_eq!(
            wrap.event().tags.first_value("p"),
            Some(mostro.public_key().to_hex().as_str())
        );
        assert!(!wrap.event().content.contains("hi"));
    }

    #[test]
    fn test_two_wraps_of_same_rumor_differ() {
        let (alice, mostro) = parties();
        let codec = EnvelopeCodec::default();
        let rumor = Rumor::new(alice.public_key(), &mostro.public_key(), "same").unwrap();

        let a = codec.wrap(&rumor, &alice, &mostro.public_key()).unwrap();
        let b = codec.wrap(&rumor, &alice, &mostro.public_key()).unwrap();
        assert_ne!(a.author(), b.author());
        assert_ne!(a.event().content, b.event().content);
        assert_ne!(a.event().id, b.event().id);
    }

    #[test]
    fn test_timestamps_are_backdated_within_window() {
        let (alice, mostro) = parties();
        let window = Duration::from_secs(600);
        let codec = EnvelopeCodec::new(window);
        let rumor = Rumor::new(alice.public_key(), &mostro.public_key(), "t").unwrap();

        let before = unix_now();
        let wrap = codec.wrap(&rumor, &alice, &mostro.public_key()).unwrap();
        let opened = codec.unwrap(wrap.event(), &mostro).unwrap();
        let after = unix_now();

        for ts in [wrap.created_at(), opened.seal.created_at()] {
            assert!(ts <= after);
            assert!(ts + window.as_secs() >= before);
        }
    }

    #[test]
    fn test_zero_window_stamps_now() {
        let (alice, mostro) = parties();
        let codec = EnvelopeCodec::new(Duration::ZERO);
        let rumor = Rumor::new(alice.public_key(), &mostro.public_key(), "t").unwrap();
        let before = unix_now();
        let wrap = codec.wrap(&rumor, &alice, &mostro.public_key()).unwrap();
        assert!(wrap.created_at() >= before);
    }

    #[test]
    fn test_wrong_receiver_cannot_open() {
        let (alice, mostro) = parties();
        let eve = Keys::generate();
        let codec = EnvelopeCodec::default();
        let rumor = Rumor::new(alice.public_key(), &mostro.public_key(), "x").unwrap();
        let wrap = codec.wrap(&rumor, &alice, &mostro.public_key()).unwrap();

        assert!(matches!(
            codec.unwrap(wrap.event(), &eve),
            Err(Error::Decryption(_))
        ));
    }

    #[test]
    fn test_rumor_id_mismatch_is_malformed() {
        let (alice, mostro) = parties();
        let codec = EnvelopeCodec::default();
        let mut rumor = Rumor::new(alice.public_key(), &mostro.public_key(), "x").unwrap();
        rumor.content = "edited after hashing".to_string();

        let wrap = codec.wrap(&rumor, &alice, &mostro.public_key()).unwrap();
        assert!(matches!(
            codec.unwrap(wrap.event(), &mostro),
            Err(Error::MalformedEnvelope(_))
        ));
    }

    #[test]
    fn test_impersonated_rumor_author_is_malformed() {
        let (alice, mostro) = parties();
        let victim = Keys::generate();
        let codec = EnvelopeCodec::default();
        let forged = Rumor::new(victim.public_key(), &mostro.public_key(), "x").unwrap();

        let seal = codec.seal(&forged, &alice, &mostro.public_key(), unix_now()).unwrap();
        let wrap = codec.gift_wrap(&seal, &mostro.public_key(), unix_now()).unwrap();
        assert!(matches!(
            codec.unwrap(wrap.event(), &mostro),
            Err(Error::MalformedEnvelope(_))
        ));
    }

    #[test]
    fn test_wrap_rejects_foreign_rumor() {
        let (alice, mostro) = parties();
        let codec = EnvelopeCodec::default();
        let rumor = Rumor::new(mostro.public_key(), &alice.public_key(), "x").unwrap();
        assert!(matches!(
            codec.wrap(&rumor, &alice, &mostro.public_key()),
            Err(Error::Validation(_))
        ));
    }

    #[test]
    fn test_layers_carry_given_timestamps() {
        let (alice, mostro) = parties();
        let codec = EnvelopeCodec::default();
        let rumor = Rumor::new(alice.public_key(), &mostro.public_key(), "t").unwrap();
        let seal = codec.seal(&rumor, &alice, &mostro.public_key(), 1_000).unwrap();
        let wrap = codec.gift_wrap(&seal, &mostro.public_key(), 2_000).unwrap();

        let opened = codec.unwrap(wrap.event(), &mostro).unwrap();
        assert_eq!(wrap.created_at(), 2_000);
        assert_eq!(opened.seal.created_at(), 1_000);
        assert_eq!(opened.rumor.created_at, rumor.created_at);
    }

    #[test]
    fn test_non_gift_wrap_kind_is_malformed() {
        let (alice, mostro) = parties();
        let codec = EnvelopeCodec::default();
        let rumor = Rumor::new(alice.public_key(), &mostro.public_key(), "x").unwrap();
        let seal = codec.seal(&rumor, &alice, &mostro.public_key(), unix_now()).unwrap();

        assert!(matches!(
            codec.unwrap(seal.event(), &mostro),
            Err(Error::MalformedEnvelope(_))
        ));
    }

    #[test]
    fn test_tampered_wrap_content_is_rejected() {
        let (alice, mostro) = parties();
        let codec = EnvelopeCodec::default();
        let rumor = Rumor::new(alice.public_key(), &mostro.public_key(), "x").unwrap();
        let mut event = codec
            .wrap(&rumor, &alice, &mostro.public_key())
            .unwrap()
            .into_event();
        event.content.replace_range(0..4, "AAAA");

        assert!(codec.unwrap(&event, &mostro).is_err());
    }

    proptest! {
        #![proptest_config(ProptestConfig::with_cases(16))]

        #[test]
        fn prop_roundtrip_any_content(content in ".{0,256}") {
            let (alice, mostro) = parties();
            let codec = EnvelopeCodec::default();
            let rumor = Rumor::new(alice.public_key(), &mostro.public_key(), content).unwrap();
            let wrap = codec.wrap(&rumor, &alice, &mostro.public_key()).unwrap();
            let opened = codec.unwrap(wrap.event(), &mostro).unwrap();
            prop_assert_eq!(opened.rumor, rumor);
        }
    }
}
