//! Size-adaptive encryption for chat text and location fixes
//!
//! Payloads that fit under the OAEP limit go straight to RSA; anything larger
//! is sealed in a [`HybridEnvelope`]. The choice is recorded in the
//! [`WireMessage`] tag, so decryption never guesses.

use rsa::{RsaPrivateKey, RsaPublicKey};
use tracing::debug;

use parley_core::Location;

use crate::envelope::HybridEnvelope;
use crate::error::{CryptoError, Result};
use crate::wire::WireMessage;
use crate::{asymmetric, max_direct_size};

/// Encrypt a UTF-8 message for the peer.
pub fn encrypt(peer_public_key: &RsaPublicKey, message: &str) -> Result<WireMessage> {
    encrypt_bytes(peer_public_key, message.as_bytes())
}

/// Encrypt raw bytes, choosing the direct path when they fit.
pub fn encrypt_bytes(peer_public_key: &RsaPublicKey, plaintext: &[u8]) -> Result<WireMessage> {
    let max = max_direct_size(peer_public_key);

    if plaintext.len() <= max {
        debug!(len = plaintext.len(), max, "direct encryption");
        let ciphertext = asymmetric::encrypt(peer_public_key, plaintext)?;
        Ok(WireMessage::Direct { ciphertext })
    } else {
        debug!(len = plaintext.len(), max, "hybrid encryption");
        Ok(WireMessage::Hybrid(HybridEnvelope::seal(
            peer_public_key,
            plaintext,
        )?))
    }
}

/// Decrypt a message produced by [`encrypt`].
pub fn decrypt(own_private_key: &RsaPrivateKey, message: &WireMessage) -> Result<String> {
    let plaintext = decrypt_bytes(own_private_key, message)?;
    String::from_utf8(plaintext)
        .map_err(|_| CryptoError::Decryption("decrypted message is not valid UTF-8".into()))
}

/// Decrypt a message produced by [`encrypt_bytes`].
pub fn decrypt_bytes(own_private_key: &RsaPrivateKey, message: &WireMessage) -> Result<Vec<u8>> {
    match message {
        WireMessage::Direct { ciphertext } => asymmetric::decrypt(own_private_key, ciphertext),
        WireMessage::Hybrid(envelope) => envelope.open(own_private_key),
        WireMessage::Chunked(_) => Err(CryptoError::Decryption(
            "chunked media envelopes are opened with ChunkedBinaryCipher".into(),
        )),
    }
}

/// Encrypt a location fix as JSON through the adaptive path.
pub fn encrypt_location(
    peer_public_key: &RsaPublicKey,
    location: &Location,
) -> Result<WireMessage> {
    let json = serde_json::to_vec(location)?;
    encrypt_bytes(peer_public_key, &json)
}

pub fn decrypt_location(
    own_private_key: &RsaPrivateKey,
    message: &WireMessage,
) -> Result<Location> {
    let json = decrypt_bytes(own_private_key, message)?;
    serde_json::from_slice(&json)
        .map_err(|e| CryptoError::Decryption(format!("decrypted location is malformed: {e}")))
}

#[cfg(test)]
mod tests {
    use proptest::prelude::*;

    use super::*;
    use crate::keystore::test_keys::{alice, bob};

    #[test]
    fn test_short_message_is_direct() {
        let msg = encrypt(alice().public_key(), "hi bob").unwrap();
        assert!(matches!(msg, WireMessage::Direct { .. }));
        assert_eq!(decrypt(alice().private_key(), &msg).unwrap(), "hi bob");
    }

    #[test]
    fn test_size_boundary() {
        let max = max_direct_size(alice().public_key());

        let at_limit = "a".repeat(max);
        let msg = encrypt(alice().public_key(), &at_limit).unwrap();
        assert_eq!(msg.kind(), "direct");
        assert_eq!(decrypt(alice().private_key(), &msg).unwrap(), at_limit);

        let over_limit = "a".repeat(max + 1);
        let msg = encrypt(alice().public_key(), &over_limit).unwrap();
        assert_eq!(msg.kind(), "hybrid");
        assert_eq!(decrypt(alice().private_key(), &msg).unwrap(), over_limit);
    }

    #[test]
    fn test_boundary_counts_bytes_not_chars() {
        // 64 three-byte characters = 192 bytes > 190
        let text = "€".repeat(64);
        let msg = encrypt(alice().public_key(), &text).unwrap();
        assert_eq!(msg.kind(), "hybrid");
        assert_eq!(decrypt(alice().private_key(), &msg).unwrap(), text);
    }

    #[test]
    fn test_wrong_key_rejected() {
        let direct = encrypt(alice().public_key(), "short").unwrap();
        let hybrid = encrypt(alice().public_key(), &"long ".repeat(100)).unwrap();

        assert!(matches!(
            decrypt(bob().private_key(), &direct),
            Err(CryptoError::Decryption(_))
        ));
        assert!(matches!(
            decrypt(bob().private_key(), &hybrid),
            Err(CryptoError::KeyUnwrap(_))
        ));
    }

    #[test]
    fn test_non_utf8_payload() {
        let msg = encrypt_bytes(alice().public_key(), &[0xFF, 0xFE, 0x00]).unwrap();
        assert!(matches!(
            decrypt(alice().private_key(), &msg),
            Err(CryptoError::Decryption(_))
        ));
        assert_eq!(
            decrypt_bytes(alice().private_key(), &msg).unwrap(),
            vec![0xFF, 0xFE, 0x00]
        );
    }

    #[test]
    fn test_location_roundtrip() {
        let mut fix = Location::new(48.8584, 2.2945, 8.0);
        fix.altitude = Some(35.0);
        fix.heading = Some(270.0);

        let msg = encrypt_location(bob().public_key(), &fix).unwrap();
        assert_eq!(decrypt_location(bob().private_key(), &msg).unwrap(), fix);
    }

    #[test]
    fn test_location_from_plain_text_rejected() {
        let msg = encrypt(bob().public_key(), "not a location").unwrap();
        assert!(matches!(
            decrypt_location(bob().private_key(), &msg),
            Err(CryptoError::Decryption(_))
        ));
    }

    proptest! {
        #![proptest_config(ProptestConfig::with_cases(24))]

        #[test]
        fn direct_roundtrip(data in proptest::collection::vec(any::<u8>(), 0..=190)) {
            let msg = encrypt_bytes(alice().public_key(), &data).unwrap();
            prop_assert_eq!(msg.kind(), "direct");
            prop_assert_eq!(decrypt_bytes(alice().private_key(), &msg).unwrap(), data);
        }

        #[test]
        fn hybrid_roundtrip(data in proptest::collection::vec(any::<u8>(), 191..4096)) {
            let msg = encrypt_bytes(alice().public_key(), &data).unwrap();
            prop_assert_eq!(msg.kind(), "hybrid");
            prop_assert_eq!(decrypt_bytes(alice().private_key(), &msg).unwrap(), data);
        }
    }
}
