//! RSA-OAEP (SHA-256) direct encryption
//!
//! OAEP caps the plaintext at `k - 2*hLen - 2` bytes, where `k` is the modulus
//! length in bytes and `hLen` the hash output length. For a 2048-bit key with
//! SHA-256 that is 256 - 64 - 2 = 190 bytes.

use rsa::traits::PublicKeyParts;
use rsa::{Oaep, RsaPrivateKey, RsaPublicKey};
use sha2::Sha256;

use crate::error::{CryptoError, Result};
use crate::OAEP_HASH_SIZE;

/// Largest plaintext `encrypt` accepts for this public key.
pub fn max_direct_size(public_key: &RsaPublicKey) -> usize {
    public_key.size().saturating_sub(2 * OAEP_HASH_SIZE + 2)
}

fn padding() -> Oaep {
    Oaep::new::<Sha256>()
}

/// Encrypt `plaintext` directly under the peer's public key.
pub fn encrypt(peer_public_key: &RsaPublicKey, plaintext: &[u8]) -> Result<Vec<u8>> {
    let max = max_direct_size(peer_public_key);
    if plaintext.len() > max {
        return Err(CryptoError::PayloadTooLarge {
            size: plaintext.len(),
            max,
        });
    }

    peer_public_key
        .encrypt(&mut rand::thread_rng(), padding(), plaintext)
        .map_err(|e| CryptoError::Encryption(format!("RSA-OAEP: {e}")))
}

/// Decrypt a direct ciphertext with our private key.
///
/// Wrong key, corruption and padding failures are indistinguishable to the
/// caller: all surface as [`CryptoError::Decryption`].
pub fn decrypt(own_private_key: &RsaPrivateKey, ciphertext: &[u8]) -> Result<Vec<u8>> {
    own_private_key.decrypt(padding(), ciphertext).map_err(|_| {
        CryptoError::Decryption("RSA-OAEP: wrong private key or corrupted ciphertext".into())
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::keystore::test_keys::{alice, bob};

    #[test]
    fn test_max_direct_size_2048() {
        assert_eq!(max_direct_size(alice().public_key()), 190);
    }

    #[test]
    fn test_encrypt_decrypt_roundtrip() {
        let plaintext = b"short chat message";
        let ciphertext = encrypt(alice().public_key(), plaintext).unwrap();

        assert_eq!(ciphertext.len(), 256, "ciphertext is one modulus long");
        assert_eq!(decrypt(alice().private_key(), &ciphertext).unwrap(), plaintext);
    }

    #[test]
    fn test_exactly_max_size() {
        let plaintext = vec![0x42u8; 190];
        let ciphertext = encrypt(alice().public_key(), &plaintext).unwrap();
        assert_eq!(decrypt(alice().private_key(), &ciphertext).unwrap(), plaintext);
    }

    #[test]
    fn test_payload_too_large() {
        let result = encrypt(alice().public_key(), &[0u8; 191]);
        assert!(matches!(
            result,
            Err(CryptoError::PayloadTooLarge { size: 191, max: 190 })
        ));
    }

    #[test]
    fn test_decrypt_wrong_key() {
        let ciphertext = encrypt(alice().public_key(), b"for alice only").unwrap();
        for _ in 0..3 {
            assert!(matches!(
                decrypt(bob().private_key(), &ciphertext),
                Err(CryptoError::Decryption(_))
            ));
        }
    }

    #[test]
    fn test_decrypt_corrupted() {
        let mut ciphertext = encrypt(alice().public_key(), b"hello").unwrap();
        ciphertext[10] ^= 0x01;
        assert!(matches!(
            decrypt(alice().private_key(), &ciphertext),
            Err(CryptoError::Decryption(_))
        ));
    }

    #[test]
    fn test_decrypt_garbage_length() {
        assert!(decrypt(alice().private_key(), b"not a ciphertext").is_err());
    }

    #[test]
    fn test_randomized_padding() {
        let c1 = encrypt(alice().public_key(), b"same").unwrap();
        let c2 = encrypt(alice().public_key(), b"same").unwrap();
        assert_ne!(c1, c2, "OAEP must be randomized");
    }
}
