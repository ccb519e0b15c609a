//! Error taxonomy for the crypto core.
//!
//! Messages never carry key material or plaintext.

use thiserror::Error;

pub type Result<T> = std::result::Result<T, CryptoError>;

#[derive(Debug, Error)]
pub enum CryptoError {
    #[error("key generation failed: {0}")]
    KeyGeneration(String),

    #[error("no {0} available")]
    NoKey(&'static str),

    #[error("invalid key format: {0}")]
    InvalidKeyFormat(String),

    #[error("payload too large: {size} bytes (maximum {max})")]
    PayloadTooLarge { size: usize, max: usize },

    #[error("encryption failed: {0}")]
    Encryption(String),

    #[error("decryption failed: {0}")]
    Decryption(String),

    #[error("authentication failed: {0}")]
    Authentication(String),

    #[error("key unwrapping failed: {0}")]
    KeyUnwrap(String),

    #[error("chunk {0} is missing from the envelope")]
    MissingChunk(u64),

    #[error("malformed envelope: {0}")]
    InvalidEnvelope(String),

    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
}
