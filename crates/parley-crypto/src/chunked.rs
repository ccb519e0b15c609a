//! Chunked media encryption with progressive decryption
//!
//! One random media key per item, wrapped once under the recipient's RSA key.
//! The payload is cut into fixed-size chunks, each sealed independently:
//! ```text
//! chunk i:  AES-256-GCM(media_key, nonce_i, data_i)
//!           nonce_i = random 96-bit
//!           AAD     = "parley-chunk" || i (u64 BE) || total_chunks (u64 BE) || total_size (u64 BE)
//! metadata: AES-256-GCM(media_key, metadata_nonce, json(metadata)), AAD = "parley-metadata"
//! ```
//!
//! Chunks are self-describing through `index`, so the `chunks` array may be
//! stored or transmitted in any order. The AAD binds each chunk to its index
//! and to the envelope's declared shape: relabeling a chunk fails
//! authentication.

use rayon::prelude::*;
use rsa::{RsaPrivateKey, RsaPublicKey};
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use tokio::sync::mpsc;
use tokio_stream::wrappers::ReceiverStream;
use tracing::{debug, warn};

use parley_core::config::CryptoConfig;

use crate::envelope::{unwrap_key, wrap_key};
use crate::error::{CryptoError, Result};
use crate::symmetric::{self, SymmetricKey};
use crate::{encoding, DEFAULT_CHUNK_SIZE, NONCE_SIZE, TAG_SIZE};

const CHUNK_AAD_PREFIX: &[u8] = b"parley-chunk";
const METADATA_AAD: &[u8] = b"parley-metadata";

/// One sealed slice of the payload
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct EncryptedChunk {
    /// Ciphertext with trailing GCM tag
    #[serde(with = "encoding::bytes")]
    pub data: Vec<u8>,
    #[serde(with = "encoding::nonce")]
    pub nonce: [u8; NONCE_SIZE],
    /// Zero-based position of this chunk in the original buffer
    pub index: u64,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ChunkedEnvelope {
    #[serde(with = "encoding::bytes")]
    pub encrypted_key: Vec<u8>,
    #[serde(with = "encoding::bytes")]
    pub encrypted_metadata: Vec<u8>,
    #[serde(with = "encoding::nonce")]
    pub metadata_nonce: [u8; NONCE_SIZE],
    pub chunks: Vec<EncryptedChunk>,
    /// Length of the original buffer in bytes
    pub total_size: u64,
    pub total_chunks: u64,
}

/// Decryption progress after one more chunk completed
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Progress {
    pub completed: u64,
    pub total: u64,
    /// `completed / total * 100`
    pub percent: f64,
}

impl Progress {
    fn new(completed: u64, total: u64) -> Self {
        Self {
            completed,
            total,
            percent: completed as f64 / total as f64 * 100.0,
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct DecryptedMedia<M> {
    pub buffer: Vec<u8>,
    pub metadata: M,
}

/// Item of the stream returned by [`ChunkedBinaryCipher::decrypt_stream`]:
/// zero or more `Progress` events, then exactly one `Finished`.
#[derive(Debug)]
pub enum DecryptEvent<M> {
    Progress(Progress),
    Finished(Result<DecryptedMedia<M>>),
}

#[derive(Debug, Clone)]
pub struct ChunkedBinaryCipher {
    chunk_size: usize,
}

impl Default for ChunkedBinaryCipher {
    fn default() -> Self {
        Self::new(DEFAULT_CHUNK_SIZE)
    }
}

impl ChunkedBinaryCipher {
    /// A cipher cutting payloads into `chunk_size`-byte chunks (at least 1).
    pub fn new(chunk_size: usize) -> Self {
        Self {
            chunk_size: chunk_size.max(1),
        }
    }

    pub fn from_config(config: &CryptoConfig) -> Self {
        Self::new(config.chunk_size_bytes)
    }

    pub fn chunk_size(&self) -> usize {
        self.chunk_size
    }

    /// Seal `buffer` and its `metadata` for the holder of `peer_public_key`.
    ///
    /// Chunks are encrypted in parallel and stored in ascending index order.
    pub fn encrypt<M: Serialize>(
        &self,
        peer_public_key: &RsaPublicKey,
        buffer: &[u8],
        metadata: &M,
    ) -> Result<ChunkedEnvelope> {
        let key = symmetric::generate_key();

        let total_size = buffer.len() as u64;
        let total_chunks = buffer.len().div_ceil(self.chunk_size) as u64;

        let metadata_json = serde_json::to_vec(metadata)?;
        let metadata_nonce = symmetric::generate_nonce();
        let encrypted_metadata =
            symmetric::encrypt_with_aad(&key, &metadata_nonce, &metadata_json, METADATA_AAD)?;

        let chunks = buffer
            .par_chunks(self.chunk_size)
            .enumerate()
            .map(|(i, data)| {
                let index = i as u64;
                let nonce = symmetric::generate_nonce();
                let aad = chunk_aad(index, total_chunks, total_size);
                let data = symmetric::encrypt_with_aad(&key, &nonce, data, &aad)?;
                Ok(EncryptedChunk { data, nonce, index })
            })
            .collect::<Result<Vec<_>>>()?;

        let encrypted_key = wrap_key(peer_public_key, &key)?;

        debug!(
            total_size,
            total_chunks,
            chunk_size = self.chunk_size,
            "sealed chunked envelope"
        );

        Ok(ChunkedEnvelope {
            encrypted_key,
            encrypted_metadata,
            metadata_nonce,
            chunks,
            total_size,
            total_chunks,
        })
    }

    /// Begin progressive decryption.
    ///
    /// Unwraps the media key, decrypts the metadata and checks the chunk
    /// index set up front; chunk data is then decrypted one chunk per
    /// [`Iterator::next`] call on the returned [`ChunkedDecryption`].
    pub fn decrypt<M: DeserializeOwned>(
        &self,
        own_private_key: &RsaPrivateKey,
        envelope: ChunkedEnvelope,
    ) -> Result<ChunkedDecryption<M>> {
        ChunkedDecryption::new(own_private_key, envelope)
    }

    /// Decrypt the whole envelope, calling `on_progress` with the completed
    /// percentage after each chunk.
    pub fn decrypt_with_progress<M, F>(
        &self,
        own_private_key: &RsaPrivateKey,
        envelope: ChunkedEnvelope,
        mut on_progress: F,
    ) -> Result<DecryptedMedia<M>>
    where
        M: DeserializeOwned,
        F: FnMut(f64),
    {
        let mut decryption = self.decrypt(own_private_key, envelope)?;
        for step in &mut decryption {
            on_progress(step?.percent);
        }
        decryption.finish()
    }

    /// Decrypt on a blocking task and report through a bounded stream.
    ///
    /// The channel holds one event, so chunk work only proceeds as fast as
    /// the caller consumes. Dropping the stream stops the work after the
    /// chunk in flight. Must be called from within a tokio runtime.
    pub fn decrypt_stream<M>(
        &self,
        own_private_key: &RsaPrivateKey,
        envelope: ChunkedEnvelope,
    ) -> Result<ReceiverStream<DecryptEvent<M>>>
    where
        M: DeserializeOwned + Send + 'static,
    {
        Ok(self.decrypt(own_private_key, envelope)?.into_stream())
    }
}

/// In-progress decryption of a [`ChunkedEnvelope`].
///
/// Each `next()` decrypts one chunk and yields the new [`Progress`]. After
/// the first failure the iterator is exhausted and [`finish`](Self::finish)
/// returns an error; no partially decrypted buffer is ever handed out.
pub struct ChunkedDecryption<M> {
    key: SymmetricKey,
    metadata: M,
    pending: std::vec::IntoIter<EncryptedChunk>,
    slots: Vec<Option<Vec<u8>>>,
    total_size: u64,
    total_chunks: u64,
    completed: u64,
    failed: bool,
}

impl<M: DeserializeOwned> ChunkedDecryption<M> {
    fn new(own_private_key: &RsaPrivateKey, envelope: ChunkedEnvelope) -> Result<Self> {
        let key = unwrap_key(own_private_key, &envelope.encrypted_key)?;

        let metadata_json = symmetric::decrypt_with_aad(
            &key,
            &envelope.metadata_nonce,
            &envelope.encrypted_metadata,
            METADATA_AAD,
        )?;
        let metadata = serde_json::from_slice(&metadata_json)?;

        check_layout(&envelope)?;

        Ok(Self {
            key,
            metadata,
            pending: envelope.chunks.into_iter(),
            slots: vec![None; envelope.total_chunks as usize],
            total_size: envelope.total_size,
            total_chunks: envelope.total_chunks,
            completed: 0,
            failed: false,
        })
    }
}

impl<M> ChunkedDecryption<M> {
    /// Metadata is decrypted before any chunk, so it is available immediately.
    pub fn metadata(&self) -> &M {
        &self.metadata
    }

    pub fn total_chunks(&self) -> u64 {
        self.total_chunks
    }

    /// Move the remaining work onto a blocking task; see
    /// [`ChunkedBinaryCipher::decrypt_stream`].
    pub fn into_stream(mut self) -> ReceiverStream<DecryptEvent<M>>
    where
        M: Send + 'static,
    {
        let (tx, rx) = mpsc::channel(1);

        tokio::task::spawn_blocking(move || {
            for step in &mut self {
                let event = match step {
                    Ok(progress) => DecryptEvent::Progress(progress),
                    Err(e) => {
                        let _ = tx.blocking_send(DecryptEvent::Finished(Err(e)));
                        return;
                    }
                };
                if tx.blocking_send(event).is_err() {
                    debug!("decrypt stream dropped by receiver; cancelling");
                    return;
                }
            }
            let _ = tx.blocking_send(DecryptEvent::Finished(self.finish()));
        });

        ReceiverStream::new(rx)
    }

    /// Decrypt any remaining chunks and reassemble the buffer by chunk index.
    pub fn finish(mut self) -> Result<DecryptedMedia<M>> {
        for step in &mut self {
            step?;
        }
        if self.failed {
            return Err(CryptoError::Authentication(
                "an earlier chunk failed authentication".into(),
            ));
        }

        let total_size = usize::try_from(self.total_size).map_err(|_| {
            CryptoError::InvalidEnvelope(format!(
                "total size {} is not addressable",
                self.total_size
            ))
        })?;

        let mut buffer = Vec::with_capacity(total_size);
        for (index, slot) in self.slots.into_iter().enumerate() {
            let data = slot.ok_or(CryptoError::MissingChunk(index as u64))?;
            buffer.extend_from_slice(&data);
        }
        buffer.resize(total_size, 0);

        Ok(DecryptedMedia {
            buffer,
            metadata: self.metadata,
        })
    }
}

impl<M> Iterator for ChunkedDecryption<M> {
    type Item = Result<Progress>;

    fn next(&mut self) -> Option<Self::Item> {
        if self.failed {
            return None;
        }
        let chunk = self.pending.next()?;

        let aad = chunk_aad(chunk.index, self.total_chunks, self.total_size);
        match symmetric::decrypt_with_aad(&self.key, &chunk.nonce, &chunk.data, &aad) {
            Ok(plaintext) => {
                // index < total_chunks was checked when the decryption began
                self.slots[chunk.index as usize] = Some(plaintext);
                self.completed += 1;
                Some(Ok(Progress::new(self.completed, self.total_chunks)))
            }
            Err(_) => {
                warn!(index = chunk.index, "chunk failed authentication");
                self.failed = true;
                self.slots.clear();
                Some(Err(CryptoError::Authentication(format!(
                    "chunk {} was tampered with or relabeled",
                    chunk.index
                ))))
            }
        }
    }

    fn size_hint(&self) -> (usize, Option<usize>) {
        if self.failed {
            (0, Some(0))
        } else {
            self.pending.size_hint()
        }
    }
}

/// AAD: prefix || index (8 bytes BE) || total_chunks (8 bytes BE) || total_size (8 bytes BE)
fn chunk_aad(index: u64, total_chunks: u64, total_size: u64) -> Vec<u8> {
    let mut aad = Vec::with_capacity(CHUNK_AAD_PREFIX.len() + 24);
    aad.extend_from_slice(CHUNK_AAD_PREFIX);
    aad.extend_from_slice(&index.to_be_bytes());
    aad.extend_from_slice(&total_chunks.to_be_bytes());
    aad.extend_from_slice(&total_size.to_be_bytes());
    aad
}

/// Every index in `[0, total_chunks)` must appear exactly once, and the
/// declared size must fit in the chunk data actually present.
fn check_layout(envelope: &ChunkedEnvelope) -> Result<()> {
    let total = envelope.total_chunks;

    let mut indices = Vec::with_capacity(envelope.chunks.len());
    for chunk in &envelope.chunks {
        if chunk.index >= total {
            return Err(CryptoError::InvalidEnvelope(format!(
                "chunk index {} out of range (total {total})",
                chunk.index
            )));
        }
        indices.push(chunk.index);
    }
    indices.sort_unstable();

    let mut unique = indices.clone();
    unique.dedup();
    if (unique.len() as u64) < total {
        let missing = unique
            .iter()
            .zip(0u64..)
            .find(|(present, expected)| **present != *expected)
            .map_or(unique.len() as u64, |(_, expected)| expected);
        return Err(CryptoError::MissingChunk(missing));
    }

    // Every index is present; anything left over is a repeat
    if let Some(pair) = indices.windows(2).find(|pair| pair[0] == pair[1]) {
        return Err(CryptoError::InvalidEnvelope(format!(
            "chunk index {} appears more than once",
            pair[0]
        )));
    }

    let capacity: u64 = envelope
        .chunks
        .iter()
        .map(|c| c.data.len().saturating_sub(TAG_SIZE) as u64)
        .sum();
    if envelope.total_size > capacity {
        return Err(CryptoError::InvalidEnvelope(format!(
            "declared size {} exceeds chunk payload of {capacity} bytes",
            envelope.total_size
        )));
    }

    Ok(())
}
