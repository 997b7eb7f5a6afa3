//! Signed and unsigned Nostr events.

use k256::schnorr::signature::hazmat::{PrehashSigner, PrehashVerifier};
use k256::schnorr::Signature;
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};

use super::keys::{Keys, PublicKey};
use crate::types::{Error, EventId, Result};

/// Event kind numbers used by the protocol.
pub mod kind {
    pub const TEXT_NOTE: u16 = 1;
    pub const SEAL: u16 = 13;
    /// Peer-to-peer chat rumor carried inside a gift wrap.
    pub const PRIVATE_DIRECT_MESSAGE: u16 = 14;
    pub const GIFT_WRAP: u16 = 1059;
    /// Addressable public order/info/dispute state.
    pub const ORDER_STATE: u16 = 38383;
}

/// Ordered tag list. Each tag is `[name, value, ...]`.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Tags(Vec<Vec<String>>);

impl Tags {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn push<I, S>(&mut self, name: &str, values: I)
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        let mut tag = vec![name.to_string()];
        tag.extend(values.into_iter().map(Into::into));
        self.0.push(tag);
    }

    /// Builder form of [`Tags::push`].
    pub fn with<I, S>(mut self, name: &str, values: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.push(name, values);
        self
    }

    /// First value of the first tag named `name`.
    pub fn first_value(&self, name: &str) -> Option<&str> {
        self.value_at(name, 1)
    }

    /// Field `index` of the first tag named `name` (index 0 is the name itself).
    pub fn value_at(&self, name: &str, index: usize) -> Option<&str> {
        self.find(name)
            .and_then(|tag| tag.get(index))
            .map(String::as_str)
    }

    pub fn find(&self, name: &str) -> Option<&[String]> {
        self.0
            .iter()
            .find(|tag| tag.first().map(String::as_str) == Some(name))
            .map(Vec::as_slice)
    }

    /// Values of every `p` tag that parses as a public key.
    pub fn public_keys(&self) -> impl Iterator<Item = PublicKey> + '_ {
        self.0
            .iter()
            .filter(|tag| tag.first().map(String::as_str) == Some("p"))
            .filter_map(|tag| tag.get(1))
            .filter_map(|value| PublicKey::from_hex(value).ok())
    }

    pub fn iter(&self) -> impl Iterator<Item = &Vec<String>> {
        self.0.iter()
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }
}

impl From<Vec<Vec<String>>> for Tags {
    fn from(tags: Vec<Vec<String>>) -> Self {
        Self(tags)
    }
}

/// Event fields before id and signature are attached.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct UnsignedEvent {
    pub pubkey: PublicKey,
    pub created_at: u64,
    pub kind: u16,
    pub tags: Tags,
    pub content: String,
}

impl UnsignedEvent {
    pub fn new(pubkey: PublicKey, created_at: u64, kind: u16, tags: Tags, content: String) -> Self {
        Self {
            pubkey,
            created_at,
            kind,
            tags,
            content,
        }
    }

    /// sha256 over the canonical `[0, pubkey, created_at, kind, tags, content]` array.
    pub fn compute_id(&self) -> Result<EventId> {
        compute_id(
            &self.pubkey,
            self.created_at,
            self.kind,
            &self.tags,
            &self.content,
        )
    }
}

pub(crate) fn compute_id(
    pubkey: &PublicKey,
    created_at: u64,
    kind: u16,
    tags: &Tags,
    content: &str,
) -> Result<EventId> {
    let canonical = serde_json::to_string(&(0u8, pubkey, created_at, kind, tags, content))?;
    let hash: [u8; 32] = Sha256::digest(canonical.as_bytes()).into();
    Ok(EventId::from_bytes(&hash))
}

/// A signed event as carried by relays.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Event {
    pub id: EventId,
    pub pubkey: PublicKey,
    pub created_at: u64,
    pub kind: u16,
    pub tags: Tags,
    pub content: String,
    pub sig: String,
}

impl Event {
    /// Compute the id and sign it with `keys`. The event author becomes `keys`.
    pub fn sign(mut unsigned: UnsignedEvent, keys: &Keys) -> Result<Self> {
        unsigned.pubkey = keys.public_key();
        let id = unsigned.compute_id()?;
        let digest = hex::decode(id.as_str())?;
        let sig: Signature = keys
            .secret_key()
            .signing_key()
            .sign_prehash(&digest)
            .map_err(|e| Error::crypto(format!("signing failed: {}", e)))?;

        Ok(Self {
            id,
            pubkey: unsigned.pubkey,
            created_at: unsigned.created_at,
            kind: unsigned.kind,
            tags: unsigned.tags,
            content: unsigned.content,
            sig: hex::encode(sig.to_bytes()),
        })
    }

    /// Recompute the id and check the signature against the author key.
    pub fn verify(&self) -> Result<()> {
        let expected = compute_id(
            &self.pubkey,
            self.created_at,
            self.kind,
            &self.tags,
            &self.content,
        )?;
        if expected != self.id {
            return Err(Error::crypto(format!(
                "event id mismatch: declared {}, computed {}",
                self.id, expected
            )));
        }

        let sig_bytes = hex::decode(&self.sig)?;
        let sig = Signature::try_from(sig_bytes.as_slice())
            .map_err(|_| Error::crypto("malformed signature"))?;
        let digest = hex::decode(self.id.as_str())?;
        self.pubkey
            .verifying_key()?
            .verify_prehash(&digest, &sig)
            .map_err(|_| Error::crypto(format!("bad signature on event {}", self.id)))
    }

    pub fn to_json(&self) -> Result<String> {
        Ok(serde_json::to_string(self)?)
    }

    pub fn from_json(s: &str) -> Result<Self> {
        Ok(serde_json::from_str(s)?)
    }
}
