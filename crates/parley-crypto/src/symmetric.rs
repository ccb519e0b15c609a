//! AES-256-GCM with caller-supplied 96-bit nonces
//!
//! Ciphertext format: `[N bytes: ciphertext][16 bytes: GCM tag]`. The nonce
//! travels beside the ciphertext in the envelope, not inside it.
//!
//! Every key is single-use (one message or one media item), so a fresh random
//! nonce per call keeps (key, nonce) pairs unique without a counter.

use aes_gcm::{
    aead::{Aead, KeyInit, Payload},
    Aes256Gcm, Nonce,
};
use rand::RngCore;
use zeroize::Zeroize;

use crate::error::{CryptoError, Result};
use crate::{KEY_SIZE, NONCE_SIZE, TAG_SIZE};

/// An ephemeral 256-bit AES key. Zeroized on drop.
#[derive(Clone)]
pub struct SymmetricKey {
    bytes: [u8; KEY_SIZE],
}

impl SymmetricKey {
    pub fn from_bytes(bytes: [u8; KEY_SIZE]) -> Self {
        Self { bytes }
    }

    /// Rebuild a key from raw bytes of unknown length (e.g. an unwrapped key).
    pub fn from_slice(raw: &[u8]) -> Option<Self> {
        let bytes: [u8; KEY_SIZE] = raw.try_into().ok()?;
        Some(Self { bytes })
    }

    pub fn as_bytes(&self) -> &[u8; KEY_SIZE] {
        &self.bytes
    }
}

impl Drop for SymmetricKey {
    fn drop(&mut self) {
        self.bytes.zeroize();
    }
}

impl std::fmt::Debug for SymmetricKey {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SymmetricKey")
            .field("bytes", &"[REDACTED]")
            .finish()
    }
}

/// Generate a random 256-bit key.
pub fn generate_key() -> SymmetricKey {
    let mut bytes = [0u8; KEY_SIZE];
    rand::thread_rng().fill_bytes(&mut bytes);
    SymmetricKey::from_bytes(bytes)
}

/// Generate a random 96-bit nonce.
pub fn generate_nonce() -> [u8; NONCE_SIZE] {
    let mut nonce = [0u8; NONCE_SIZE];
    rand::thread_rng().fill_bytes(&mut nonce);
    nonce
}

pub fn encrypt(key: &SymmetricKey, nonce: &[u8; NONCE_SIZE], plaintext: &[u8]) -> Result<Vec<u8>> {
    encrypt_with_aad(key, nonce, plaintext, &[])
}

pub fn decrypt(key: &SymmetricKey, nonce: &[u8; NONCE_SIZE], ciphertext: &[u8]) -> Result<Vec<u8>> {
    decrypt_with_aad(key, nonce, ciphertext, &[])
}

/// Encrypt and authenticate `plaintext`, additionally binding `aad`.
///
/// Returns `[ciphertext][16-byte tag]`.
pub fn encrypt_with_aad(
    key: &SymmetricKey,
    nonce: &[u8; NONCE_SIZE],
    plaintext: &[u8],
    aad: &[u8],
) -> Result<Vec<u8>> {
    let cipher = Aes256Gcm::new(key.as_bytes().into());

    cipher
        .encrypt(
            Nonce::from_slice(nonce),
            Payload {
                msg: plaintext,
                aad,
            },
        )
        .map_err(|e| CryptoError::Encryption(format!("AES-GCM: {e}")))
}

/// Verify and decrypt `[ciphertext][16-byte tag]`.
///
/// Fails with [`CryptoError::Authentication`] unless the tag verifies for this
/// key, nonce and `aad`; no plaintext is released in that case.
pub fn decrypt_with_aad(
    key: &SymmetricKey,
    nonce: &[u8; NONCE_SIZE],
    ciphertext: &[u8],
    aad: &[u8],
) -> Result<Vec<u8>> {
    if ciphertext.len() < TAG_SIZE {
        return Err(CryptoError::Authentication(format!(
            "ciphertext too short: {} bytes (minimum {TAG_SIZE})",
            ciphertext.len()
        )));
    }

    let cipher = Aes256Gcm::new(key.as_bytes().into());

    cipher
        .decrypt(
            Nonce::from_slice(nonce),
            Payload {
                msg: ciphertext,
                aad,
            },
        )
        .map_err(|_| {
            CryptoError::Authentication(
                "invalid key, corrupted data, or mismatched nonce/associated data".into(),
            )
        })
}
