//! Hybrid envelope: payloads of any size sealed to a peer public key
//!
//! ```text
//! encryptedKey     = RSA-OAEP(peer_pub, media_key)        (32-byte key, always fits)
//! encryptedPayload = AES-256-GCM(media_key, nonce, plaintext)
//! nonce            = random 96-bit
//! ```

use rsa::{RsaPrivateKey, RsaPublicKey};
use serde::{Deserialize, Serialize};
use tracing::debug;
use zeroize::Zeroize;

use crate::error::{CryptoError, Result};
use crate::symmetric::{self, SymmetricKey};
use crate::{asymmetric, encoding, NONCE_SIZE};

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct HybridEnvelope {
    /// Symmetric key wrapped by RSA-OAEP under the recipient's public key
    #[serde(with = "encoding::bytes")]
    pub encrypted_key: Vec<u8>,
    /// AES-256-GCM ciphertext with trailing tag
    #[serde(with = "encoding::bytes")]
    pub encrypted_payload: Vec<u8>,
    #[serde(with = "encoding::nonce")]
    pub nonce: [u8; NONCE_SIZE],
}

impl HybridEnvelope {
    /// Seal `plaintext` for the holder of `peer_public_key`.
    ///
    /// Every failure is reported as [`CryptoError::Encryption`].
    pub fn seal(peer_public_key: &RsaPublicKey, plaintext: &[u8]) -> Result<Self> {
        let key = symmetric::generate_key();
        let nonce = symmetric::generate_nonce();

        let encrypted_payload =
            symmetric::encrypt(&key, &nonce, plaintext).map_err(into_encryption)?;
        let encrypted_key = wrap_key(peer_public_key, &key)?;

        debug!(
            plaintext_len = plaintext.len(),
            ciphertext_len = encrypted_payload.len(),
            "sealed hybrid envelope"
        );

        Ok(Self {
            encrypted_key,
            encrypted_payload,
            nonce,
        })
    }

    /// Open an envelope sealed to our public key.
    pub fn open(&self, own_private_key: &RsaPrivateKey) -> Result<Vec<u8>> {
        let key = unwrap_key(own_private_key, &self.encrypted_key)?;
        symmetric::decrypt(&key, &self.nonce, &self.encrypted_payload)
    }
}

/// Wrap a symmetric key under the peer's RSA public key.
pub(crate) fn wrap_key(peer_public_key: &RsaPublicKey, key: &SymmetricKey) -> Result<Vec<u8>> {
    asymmetric::encrypt(peer_public_key, key.as_bytes()).map_err(into_encryption)
}

/// Unwrap a symmetric key with our RSA private key.
///
/// Wrong key, corruption and a plaintext of the wrong length all fail with
/// [`CryptoError::KeyUnwrap`].
pub(crate) fn unwrap_key(
    own_private_key: &RsaPrivateKey,
    wrapped: &[u8],
) -> Result<SymmetricKey> {
    let mut raw = asymmetric::decrypt(own_private_key, wrapped)
        .map_err(|_| CryptoError::KeyUnwrap("wrong private key or corrupted key block".into()))?;

    let key = SymmetricKey::from_slice(&raw);
    let len = raw.len();
    raw.zeroize();

    key.ok_or_else(|| {
        CryptoError::KeyUnwrap(format!(
            "unwrapped key has wrong size: {len} bytes (expected {})",
            crate::KEY_SIZE
        ))
    })
}

fn into_encryption(e: CryptoError) -> CryptoError {
    match e {
        CryptoError::Encryption(_) => e,
        other => CryptoError::Encryption(other.to_string()),
    }
}
