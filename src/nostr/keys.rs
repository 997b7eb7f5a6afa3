//! secp256k1 BIP-340 key material.
//!
//! Public keys are 32-byte x-only points, carried as lowercase hex on the wire.

use k256::schnorr::{SigningKey, VerifyingKey};
use rand::rngs::OsRng;
use serde::{Deserialize, Serialize};
use std::fmt;
use zeroize::Zeroizing;

use crate::types::{Error, Result};

/// x-only public key.
#[derive(Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct PublicKey([u8; 32]);

impl PublicKey {
    pub fn from_hex(s: &str) -> Result<Self> {
        let bytes = hex::decode(s)?;
        Self::from_slice(&bytes)
    }

    pub fn from_slice(bytes: &[u8]) -> Result<Self> {
        let arr: [u8; 32] = bytes
            .try_into()
            .map_err(|_| Error::crypto(format!("public key must be 32 bytes, got {}", bytes.len())))?;
        // Reject x coordinates that are not on the curve
        VerifyingKey::from_bytes(&arr).map_err(|_| Error::crypto("public key is not a curve point"))?;
        Ok(Self(arr))
    }

    pub fn as_bytes(&self) -> &[u8; 32] {
        &self.0
    }

    pub fn to_hex(&self) -> String {
        hex::encode(self.0)
    }

    pub(crate) fn verifying_key(&self) -> Result<VerifyingKey> {
        VerifyingKey::from_bytes(&self.0).map_err(|_| Error::crypto("public key is not a curve point"))
    }

    /// Full SEC1 point with even y, as BIP-340 implies for x-only keys.
    pub(crate) fn to_sec1_point(&self) -> Result<k256::PublicKey> {
        let mut sec1 = [0u8; 33];
        sec1[0] = 0x02;
        sec1[1..].copy_from_slice(&self.0);
        k256::PublicKey::from_sec1_bytes(&sec1)
            .map_err(|_| Error::crypto("public key is not a curve point"))
    }
}

impl TryFrom<String> for PublicKey {
    type Error = Error;

    fn try_from(s: String) -> Result<Self> {
        Self::from_hex(&s)
    }
}

impl From<PublicKey> for String {
    fn from(pk: PublicKey) -> Self {
        pk.to_hex()
    }
}

impl fmt::Display for PublicKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.to_hex())
    }
}

impl fmt::Debug for PublicKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "PublicKey({})", self.to_hex())
    }
}

/// Secret scalar. Never printed; hex export is zeroised on drop.
#[derive(Clone)]
pub struct SecretKey(SigningKey);

impl SecretKey {
    pub fn generate() -> Self {
        Self(SigningKey::random(&mut OsRng))
    }

    pub fn from_hex(s: &str) -> Result<Self> {
        let bytes = Zeroizing::new(hex::decode(s)?);
        Self::from_slice(&bytes)
    }

    pub fn from_slice(bytes: &[u8]) -> Result<Self> {
        if bytes.len() != 32 {
            return Err(Error::crypto(format!("secret key must be 32 bytes, got {}", bytes.len())));
        }
        SigningKey::from_bytes(bytes)
            .map(Self)
            .map_err(|_| Error::crypto("secret key is out of range"))
    }

    pub fn public_key(&self) -> PublicKey {
        let bytes: [u8; 32] = self.0.verifying_key().to_bytes().into();
        PublicKey(bytes)
    }

    pub fn to_secret_hex(&self) -> Zeroizing<String> {
        let bytes: Zeroizing<[u8; 32]> = Zeroizing::new(self.0.to_bytes().into());
        Zeroizing::new(hex::encode(*bytes))
    }

    pub(crate) fn signing_key(&self) -> &SigningKey {
        &self.0
    }

    pub(crate) fn to_ecdh_secret(&self) -> Result<k256::SecretKey> {
        let bytes: Zeroizing<[u8; 32]> = Zeroizing::new(self.0.to_bytes().into());
        k256::SecretKey::from_slice(bytes.as_slice())
            .map_err(|_| Error::crypto("secret key is out of range"))
    }
}

impl fmt::Debug for SecretKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("SecretKey(<redacted>)")
    }
}

/// A key pair: the active identity of one party.
#[derive(Debug, Clone)]
pub struct Keys {
    secret: SecretKey,
    public: PublicKey,
}

impl Keys {
    pub fn new(secret: SecretKey) -> Self {
        let public = secret.public_key();
        Self { secret, public }
    }

    /// Fresh random key pair (also used for single-use gift wrap signers).
    pub fn generate() -> Self {
        Self::new(SecretKey::generate())
    }

    pub fn from_secret_hex(s: &str) -> Result<Self> {
        Ok(Self::new(SecretKey::from_hex(s)?))
    }

    pub fn public_key(&self) -> PublicKey {
        self.public
    }

    pub fn secret_key(&self) -> &SecretKey {
        &self.secret
    }
}
