//! NIP-44 version 2 conversation encryption.
//!
//! ```text
//! shared       = ECDH(secret, public).x
//! conv_key     = HKDF-extract(salt = "nip44-v2", ikm = shared)
//! message keys = HKDF-expand(conv_key, info = nonce[32], 76)
//!              = chacha_key[32] || chacha_nonce[12] || hmac_key[32]
//! padded       = u16_be(len) || plaintext || zeros
//! ciphertext   = ChaCha20(chacha_key, chacha_nonce, padded)
//! mac          = HMAC-SHA256(hmac_key, nonce || ciphertext)
//! payload      = base64(0x02 || nonce || ciphertext || mac)
//! ```
//!
//! The conversation key is symmetric: `derive(a, B) == derive(b, A)`.

use base64::engine::general_purpose::STANDARD as BASE64;
use base64::Engine;
use chacha20::cipher::{KeyIvInit, StreamCipher};
use chacha20::ChaCha20;
use hkdf::Hkdf;
use hmac::{Hmac, Mac};
use rand::rngs::OsRng;
use rand::RngCore;
use sha2::Sha256;
use zeroize::Zeroizing;

use super::keys::{PublicKey, SecretKey};
use crate::types::{Error, Result};

type HmacSha256 = Hmac<Sha256>;

const SALT: &[u8] = b"nip44-v2";
const VERSION: u8 = 0x02;
const NONCE_LEN: usize = 32;
const MAC_LEN: usize = 32;
const MIN_PLAINTEXT: usize = 1;
const MAX_PLAINTEXT: usize = 65535;
const MIN_PAYLOAD: usize = 132;
const MAX_PAYLOAD: usize = 87472;
const MIN_DECODED: usize = 99;
const MAX_DECODED: usize = 65603;

/// Symmetric key shared by one (secret, public) pair. Zeroised on drop.
pub struct ConversationKey(Zeroizing<[u8; 32]>);

impl ConversationKey {
    pub fn derive(secret: &SecretKey, public: &PublicKey) -> Result<Self> {
        let scalar = secret.to_ecdh_secret()?;
        let point = public.to_sec1_point()?;
        let shared = k256::ecdh::diffie_hellman(scalar.to_nonzero_scalar(), point.as_affine());

        let (prk, _) = Hkdf::<Sha256>::extract(Some(SALT), shared.raw_secret_bytes().as_slice());
        Ok(Self(Zeroizing::new(prk.into())))
    }

    pub fn as_bytes(&self) -> &[u8; 32] {
        &self.0
    }

    fn message_keys(&self, nonce: &[u8]) -> Result<MessageKeys> {
        let hk = Hkdf::<Sha256>::from_prk(&self.0[..])
            .map_err(|e| Error::crypto(format!("invalid conversation key: {}", e)))?;
        let mut okm = Zeroizing::new([0u8; 76]);
        hk.expand(nonce, &mut okm[..])
            .map_err(|e| Error::crypto(format!("key derivation failed: {}", e)))?;

        let mut keys = MessageKeys {
            chacha_key: Zeroizing::new([0u8; 32]),
            chacha_nonce: [0u8; 12],
            hmac_key: Zeroizing::new([0u8; 32]),
        };
        keys.chacha_key.copy_from_slice(&okm[..32]);
        keys.chacha_nonce.copy_from_slice(&okm[32..44]);
        keys.hmac_key.copy_from_slice(&okm[44..]);
        Ok(keys)
    }
}

impl std::fmt::Debug for ConversationKey {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str("ConversationKey(<redacted>)")
    }
}

struct MessageKeys {
    chacha_key: Zeroizing<[u8; 32]>,
    chacha_nonce: [u8; 12],
    hmac_key: Zeroizing<[u8; 32]>,
}

impl MessageKeys {
    fn apply_keystream(&self, buf: &mut [u8]) -> Result<()> {
        let mut cipher = ChaCha20::new_from_slices(&self.chacha_key[..], &self.chacha_nonce)
            .map_err(|e| Error::crypto(format!("cipher init failed: {}", e)))?;
        cipher.apply_keystream(buf);
        Ok(())
    }

    fn mac(&self, nonce: &[u8], ciphertext: &[u8]) -> Result<HmacSha256> {
        let mut mac = <HmacSha256 as Mac>::new_from_slice(&self.hmac_key[..])
            .map_err(|e| Error::crypto(format!("hmac init failed: {}", e)))?;
        mac.update(nonce);
        mac.update(ciphertext);
        Ok(mac)
    }
}

/// Padded length for a plaintext of `len` bytes: 32-byte minimum, then
/// power-of-two buckets split into eighths above 256.
pub(crate) fn padded_len(len: usize) -> usize {
    if len <= 32 {
        return 32;
    }
    let next_power = 1usize << (usize::BITS - (len - 1).leading_zeros());
    let chunk = if next_power <= 256 { 32 } else { next_power / 8 };
    chunk * ((len - 1) / chunk + 1)
}

fn pad(plaintext: &[u8]) -> Result<Vec<u8>> {
    let len = plaintext.len();
    if !(MIN_PLAINTEXT..=MAX_PLAINTEXT).contains(&len) {
        return Err(Error::crypto(format!(
            "plaintext must be {}..={} bytes, got {}",
            MIN_PLAINTEXT, MAX_PLAINTEXT, len
        )));
    }
    let mut padded = Vec::with_capacity(2 + padded_len(len));
    padded.extend_from_slice(&(len as u16).to_be_bytes());
    padded.extend_from_slice(plaintext);
    padded.resize(2 + padded_len(len), 0);
    Ok(padded)
}

fn unpad(padded: &[u8]) -> Result<String> {
    if padded.len() < 2 {
        return Err(Error::decryption("padding is truncated"));
    }
    let len = u16::from_be_bytes([padded[0], padded[1]]) as usize;
    if len < MIN_PLAINTEXT || padded.len() != 2 + padded_len(len) {
        return Err(Error::decryption("invalid padding"));
    }
    String::from_utf8(padded[2..2 + len].to_vec())
        .map_err(|_| Error::decryption("plaintext is not utf-8"))
}

pub fn encrypt(key: &ConversationKey, plaintext: &str) -> Result<String> {
    let mut nonce = [0u8; NONCE_LEN];
    OsRng.fill_bytes(&mut nonce);
    encrypt_with_nonce(key, plaintext, &nonce)
}

pub(crate) fn encrypt_with_nonce(
    key: &ConversationKey,
    plaintext: &str,
    nonce: &[u8; NONCE_LEN],
) -> Result<String> {
    let keys = key.message_keys(nonce)?;
    let mut buf = pad(plaintext.as_bytes())?;
    keys.apply_keystream(&mut buf)?;
    let tag = keys.mac(nonce, &buf)?.finalize().into_bytes();

    let mut payload = Vec::with_capacity(1 + NONCE_LEN + buf.len() + MAC_LEN);
    payload.push(VERSION);
    payload.extend_from_slice(nonce);
    payload.extend_from_slice(&buf);
    payload.extend_from_slice(&tag);
    Ok(BASE64.encode(payload))
}

pub fn decrypt(key: &ConversationKey, payload: &str) -> Result<String> {
    if payload.starts_with('#') {
        return Err(Error::decryption("unsupported encryption version"));
    }
    if !(MIN_PAYLOAD..=MAX_PAYLOAD).contains(&payload.len()) {
        return Err(Error::decryption(format!(
            "invalid payload length {}",
            payload.len()
        )));
    }
    let raw = BASE64
        .decode(payload)
        .map_err(|e| Error::decryption(format!("invalid base64: {}", e)))?;
    if !(MIN_DECODED..=MAX_DECODED).contains(&raw.len()) {
        return Err(Error::decryption(format!("invalid data length {}", raw.len())));
    }
    if raw[0] != VERSION {
        return Err(Error::decryption(format!("unknown payload version {}", raw[0])));
    }

    let nonce = &raw[1..1 + NONCE_LEN];
    let (ciphertext, tag) = raw[1 + NONCE_LEN..].split_at(raw.len() - 1 - NONCE_LEN - MAC_LEN);
    let keys = key.message_keys(nonce)?;
    keys.mac(nonce, ciphertext)?
        .verify_slice(tag)
        .map_err(|_| Error::decryption("invalid MAC"))?;

    let mut padded = ciphertext.to_vec();
    keys.apply_keystream(&mut padded)?;
    unpad(&padded)
}
