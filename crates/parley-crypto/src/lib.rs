//! parley-crypto: hybrid end-to-end encryption for parley chat
//!
//! Architecture: RSA-OAEP key wrapping + AES-256-GCM bulk encryption
//!
//! Message paths:
//! ```text
//! text / location ──► ≤ max_direct_size ? ──► RSA-OAEP(SHA-256) directly           → Direct
//!                                        └──► AES-256-GCM(fresh key) + wrapped key → Hybrid
//!
//! image / video ──► split into fixed-size chunks
//!                   ├── Media key (per item, 256-bit random, wrapped once by RSA-OAEP)
//!                   ├── Metadata AEAD: key=media_key, nonce=random_96bit, AAD="parley-metadata"
//!                   └── Chunk AEAD: key=media_key, nonce=random_96bit,
//!                       AAD="parley-chunk"||index||total_chunks||total_size        → Chunked
//! ```
//!
//! No key material is persisted; a [`KeyStore`] lives for one session.

pub mod adaptive;
pub mod asymmetric;
pub mod chunked;
pub mod encoding;
pub mod envelope;
pub mod error;
pub mod keystore;
pub mod session;
pub mod symmetric;
pub mod wire;

pub use asymmetric::max_direct_size;
pub use chunked::{
    ChunkedBinaryCipher, ChunkedDecryption, ChunkedEnvelope, DecryptEvent, DecryptedMedia,
    EncryptedChunk, Progress,
};
pub use envelope::HybridEnvelope;
pub use error::{CryptoError, Result};
pub use keystore::{KeyPair, KeyStore};
pub use session::{ChatMessage, ChatPayload, LiveShare, OpenedPayload, Session};
pub use symmetric::SymmetricKey;
pub use wire::WireMessage;

pub use rsa::{RsaPrivateKey, RsaPublicKey};

/// Size of an AES-256 key in bytes
pub const KEY_SIZE: usize = 32;

/// Size of an AES-GCM nonce (96-bit)
pub const NONCE_SIZE: usize = 12;

/// Size of a GCM authentication tag
pub const TAG_SIZE: usize = 16;

/// Output length of SHA-256, the OAEP hash
pub const OAEP_HASH_SIZE: usize = 32;

/// Default plaintext bytes per media chunk
pub const DEFAULT_CHUNK_SIZE: usize = 64 * 1024;
