//! Session key material: our RSA key pair and the peer's imported public key
//!
//! Nothing here is persisted. A [`KeyStore`] is created per session and handed
//! by reference to whatever needs it; rotation requires `&mut`, so it cannot
//! race with encryptions that borrow the store.

use rsa::pkcs8::{DecodePublicKey, EncodePublicKey};
use rsa::traits::PublicKeyParts;
use rsa::{RsaPrivateKey, RsaPublicKey};
use tracing::{debug, info, warn};

use parley_core::config::MIN_RSA_KEY_BITS;
use parley_core::ContactCard;

use crate::encoding;
use crate::error::{CryptoError, Result};

/// An RSA-OAEP key pair. The private half never leaves the process.
#[derive(Clone)]
pub struct KeyPair {
    private_key: RsaPrivateKey,
    public_key: RsaPublicKey,
}

impl KeyPair {
    /// Generate a fresh pair with a `bits`-bit modulus (at least 2048).
    pub fn generate(bits: usize) -> Result<Self> {
        if bits < MIN_RSA_KEY_BITS {
            return Err(CryptoError::KeyGeneration(format!(
                "{bits}-bit modulus is below the minimum of {MIN_RSA_KEY_BITS}"
            )));
        }

        let private_key = RsaPrivateKey::new(&mut rand::thread_rng(), bits)
            .map_err(|e| CryptoError::KeyGeneration(format!("RSA-{bits}: {e}")))?;
        let public_key = private_key.to_public_key();

        Ok(Self {
            private_key,
            public_key,
        })
    }

    pub fn private_key(&self) -> &RsaPrivateKey {
        &self.private_key
    }

    pub fn public_key(&self) -> &RsaPublicKey {
        &self.public_key
    }

    /// Modulus size in bits
    pub fn bits(&self) -> usize {
        self.public_key.n().bits()
    }
}

impl std::fmt::Debug for KeyPair {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("KeyPair")
            .field("bits", &self.bits())
            .field("private_key", &"[REDACTED]")
            .finish()
    }
}

/// Serialize a public key as base64 DER SubjectPublicKeyInfo.
pub fn encode_public_key(public_key: &RsaPublicKey) -> Result<String> {
    let der = public_key
        .to_public_key_der()
        .map_err(|e| CryptoError::InvalidKeyFormat(format!("SPKI encoding: {e}")))?;
    Ok(encoding::encode(der.as_bytes()))
}

/// Parse a base64 DER SubjectPublicKeyInfo, accepting only RSA keys of at
/// least [`MIN_RSA_KEY_BITS`].
pub fn decode_public_key(encoded: &str) -> Result<RsaPublicKey> {
    let der = encoding::decode(encoded.trim())
        .map_err(|e| CryptoError::InvalidKeyFormat(format!("base64: {e}")))?;

    // Rejects SPKI documents whose algorithm is not rsaEncryption
    let key = RsaPublicKey::from_public_key_der(&der)
        .map_err(|e| CryptoError::InvalidKeyFormat(format!("not an RSA public key: {e}")))?;

    let bits = key.n().bits();
    if bits < MIN_RSA_KEY_BITS {
        return Err(CryptoError::InvalidKeyFormat(format!(
            "{bits}-bit RSA key is below the minimum of {MIN_RSA_KEY_BITS}"
        )));
    }
    Ok(key)
}

#[derive(Debug)]
pub struct KeyStore {
    key_bits: usize,
    key_pair: Option<KeyPair>,
    peer_public_key: Option<RsaPublicKey>,
}

impl Default for KeyStore {
    fn default() -> Self {
        Self {
            key_bits: MIN_RSA_KEY_BITS,
            key_pair: None,
            peer_public_key: None,
        }
    }
}

impl KeyStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// A store that generates `bits`-bit key pairs.
    pub fn with_key_bits(bits: usize) -> Result<Self> {
        if bits < MIN_RSA_KEY_BITS {
            return Err(CryptoError::KeyGeneration(format!(
                "{bits}-bit modulus is below the minimum of {MIN_RSA_KEY_BITS}"
            )));
        }
        Ok(Self {
            key_bits: bits,
            ..Self::default()
        })
    }

    /// A store holding an already generated pair.
    pub fn with_key_pair(key_pair: KeyPair) -> Self {
        Self {
            key_bits: key_pair.bits(),
            key_pair: Some(key_pair),
            peer_public_key: None,
        }
    }

    /// Generate a new key pair, replacing any existing one.
    ///
    /// Destructive: anything sealed to the previous public key can no longer
    /// be opened by this store. On failure the previous pair is kept.
    pub fn generate_key_pair(&mut self) -> Result<&KeyPair> {
        let pair = KeyPair::generate(self.key_bits)?;

        if self.key_pair.is_some() {
            warn!(
                bits = self.key_bits,
                "replacing existing key pair; messages sealed to the old key become undecryptable"
            );
        } else {
            info!(bits = self.key_bits, "generated session key pair");
        }

        Ok(self.key_pair.insert(pair))
    }

    pub fn key_pair(&self) -> Result<&KeyPair> {
        self.key_pair.as_ref().ok_or(CryptoError::NoKey("key pair"))
    }

    pub fn peer_public_key(&self) -> Result<&RsaPublicKey> {
        self.peer_public_key
            .as_ref()
            .ok_or(CryptoError::NoKey("peer public key"))
    }

    pub fn has_key_pair(&self) -> bool {
        self.key_pair.is_some()
    }

    pub fn has_peer(&self) -> bool {
        self.peer_public_key.is_some()
    }

    /// Our public key as base64 SPKI, for out-of-band exchange.
    pub fn export_public_key(&self) -> Result<String> {
        encode_public_key(self.key_pair()?.public_key())
    }

    /// Our public key wrapped in a QR contact card.
    pub fn contact_card(&self, username: &str) -> Result<ContactCard> {
        Ok(ContactCard::new(username, self.export_public_key()?))
    }

    /// Import the peer's public key from raw base64 SPKI or from a contact
    /// card JSON. Returns the card's username when a card was given.
    ///
    /// The stored peer key is only replaced on success.
    pub fn import_peer_public_key(&mut self, input: &str) -> Result<Option<String>> {
        let input = input.trim();

        let (encoded, username) = if input.starts_with('{') {
            let card = ContactCard::from_json(input)
                .map_err(|e| CryptoError::InvalidKeyFormat(e.to_string()))?;
            (card.public_key, Some(card.username))
        } else {
            (input.to_string(), None)
        };

        let key = decode_public_key(&encoded)?;
        debug!(
            bits = key.n().bits(),
            from_card = username.is_some(),
            "imported peer public key"
        );
        self.peer_public_key = Some(key);
        Ok(username)
    }

    /// Forget all key material (session end).
    pub fn reset(&mut self) {
        self.key_pair = None;
        self.peer_public_key = None;
    }
}

#[cfg(test)]
pub(crate) mod test_keys {
    use std::sync::LazyLock;

    use super::KeyPair;

    static ALICE: LazyLock<KeyPair> =
        LazyLock::new(|| KeyPair::generate(2048).expect("alice key pair"));
    static BOB: LazyLock<KeyPair> =
        LazyLock::new(|| KeyPair::generate(2048).expect("bob key pair"));

    pub fn alice() -> &'static KeyPair {
        &ALICE
    }

    pub fn bob() -> &'static KeyPair {
        &BOB
    }
}

#[cfg(test)]
mod tests {
    use super::test_keys::{alice, bob};
    use super::*;

    fn store_with(pair: &KeyPair) -> KeyStore {
        KeyStore::with_key_pair(pair.clone())
    }

    #[test]
    fn test_export_without_key_pair() {
        let store = KeyStore::new();
        assert!(matches!(
            store.export_public_key(),
            Err(CryptoError::NoKey("key pair"))
        ));
        assert!(matches!(
            store.peer_public_key(),
            Err(CryptoError::NoKey("peer public key"))
        ));
    }

    #[test]
    fn test_generate_key_pair() {
        let mut store = KeyStore::new();
        let first = store.generate_key_pair().unwrap().public_key().clone();
        assert!(store.has_key_pair());
        assert_eq!(store.key_pair().unwrap().bits(), 2048);

        let second = store.generate_key_pair().unwrap().public_key().clone();
        assert_ne!(first, second, "every generation must produce a new pair");
    }

    #[test]
    fn test_small_modulus_rejected() {
        assert!(matches!(
            KeyStore::with_key_bits(1024),
            Err(CryptoError::KeyGeneration(_))
        ));
        assert!(KeyPair::generate(512).is_err());
    }

    #[test]
    fn test_export_import_roundtrip() {
        let exported = store_with(alice()).export_public_key().unwrap();

        let mut peer_store = KeyStore::new();
        let username = peer_store.import_peer_public_key(&exported).unwrap();

        assert_eq!(username, None);
        assert_eq!(peer_store.peer_public_key().unwrap(), alice().public_key());
    }

    #[test]
    fn test_import_tolerates_whitespace() {
        let exported = store_with(alice()).export_public_key().unwrap();
        let mut store = KeyStore::new();
        store
            .import_peer_public_key(&format!("  {exported}\n"))
            .unwrap();
        assert!(store.has_peer());
    }

    #[test]
    fn test_import_contact_card() {
        let card = store_with(bob()).contact_card("bob").unwrap();
        let json = card.to_json().unwrap();

        let mut store = KeyStore::new();
        let username = store.import_peer_public_key(&json).unwrap();

        assert_eq!(username.as_deref(), Some("bob"));
        assert_eq!(store.peer_public_key().unwrap(), bob().public_key());
    }

    #[test]
    fn test_import_malformed_keeps_previous_peer() {
        let exported = store_with(alice()).export_public_key().unwrap();
        let mut store = KeyStore::new();
        store.import_peer_public_key(&exported).unwrap();

        for bad in [
            "not base64 at all!",
            "AAAA",
            r#"{"username":"x","publicKey":"AAAA","type":"other"}"#,
            "{broken json",
        ] {
            assert!(
                matches!(
                    store.import_peer_public_key(bad),
                    Err(CryptoError::InvalidKeyFormat(_))
                ),
                "input {bad:?} must be rejected"
            );
        }

        assert_eq!(store.peer_public_key().unwrap(), alice().public_key());
    }

    #[test]
    fn test_import_rejects_small_rsa_key() {
        let weak = RsaPrivateKey::new(&mut rand::thread_rng(), 1024).unwrap();
        let encoded = encode_public_key(&weak.to_public_key()).unwrap();

        let mut store = KeyStore::new();
        assert!(matches!(
            store.import_peer_public_key(&encoded),
            Err(CryptoError::InvalidKeyFormat(_))
        ));
    }

    #[test]
    fn test_reset_clears_everything() {
        let mut store = store_with(alice());
        store
            .import_peer_public_key(&encode_public_key(bob().public_key()).unwrap())
            .unwrap();

        store.reset();
        assert!(!store.has_key_pair());
        assert!(!store.has_peer());
    }

    #[test]
    fn test_debug_is_redacted() {
        let debug = format!("{:?}", alice());
        assert!(debug.contains("REDACTED"));
        assert!(debug.contains("2048"));
    }
}
