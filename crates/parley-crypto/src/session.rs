//! Chat session: the key store plus typed message sealing
//!
//! A [`Session`] is the explicit owner of one party's key material. Sealing
//! and opening borrow it immutably; rotating keys or importing a new peer
//! goes through [`Session::keys_mut`] and so cannot overlap with them.

use rsa::RsaPrivateKey;
use serde::{Deserialize, Serialize};
use tokio_stream::wrappers::ReceiverStream;
use tracing::{debug, warn};

use parley_core::config::CryptoConfig;
use parley_core::types::unix_now;
use parley_core::{Location, LocationMode, MediaKind, MediaMetadata};

use crate::adaptive;
use crate::chunked::{ChunkedBinaryCipher, ChunkedEnvelope, DecryptEvent, DecryptedMedia};
use crate::error::{CryptoError, Result};
use crate::keystore::KeyStore;
use crate::wire::WireMessage;

/// Encrypted content of a chat message
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "subtype", content = "content", rename_all = "snake_case")]
pub enum ChatPayload {
    Text(WireMessage),
    /// JSON of a [`Location`] through the adaptive cipher
    Location {
        mode: LocationMode,
        message: WireMessage,
    },
    /// End of a live share; carries no content
    LiveStop,
    Media {
        kind: MediaKind,
        envelope: ChunkedEnvelope,
    },
}

impl ChatPayload {
    pub fn subtype(&self) -> &'static str {
        match self {
            ChatPayload::Text(_) => "text",
            ChatPayload::Location { .. } => "location",
            ChatPayload::LiveStop => "live_stop",
            ChatPayload::Media { .. } => "media",
        }
    }
}

/// One unit handed to the relay transport
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChatMessage {
    pub payload: ChatPayload,
    /// Unix seconds at sealing time
    pub timestamp: u64,
    /// Plaintext hint shown before the payload is opened (never the content)
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub preview: Option<String>,
}

impl ChatMessage {
    pub fn to_transport_bytes(&self) -> Result<Vec<u8>> {
        Ok(serde_json::to_vec(self)?)
    }

    pub fn from_transport_bytes(data: &[u8]) -> Result<Self> {
        Ok(serde_json::from_slice(data)?)
    }
}

/// Decrypted content of a [`ChatMessage`]
#[derive(Debug, Clone, PartialEq)]
pub enum OpenedPayload {
    Text(String),
    Location {
        mode: LocationMode,
        location: Location,
    },
    LiveStop,
    Media {
        kind: MediaKind,
        media: DecryptedMedia<MediaMetadata>,
    },
}

#[derive(Debug)]
pub struct Session {
    keys: KeyStore,
    cipher: ChunkedBinaryCipher,
    max_image_bytes: u64,
    max_video_bytes: u64,
}

impl Session {
    /// A session with an empty key store; call
    /// `keys_mut().generate_key_pair()` before exchanging keys.
    pub fn new(config: &CryptoConfig) -> Result<Self> {
        Ok(Self::with_key_store(KeyStore::with_key_bits(config.rsa_key_bits)?, config))
    }

    pub fn with_key_store(keys: KeyStore, config: &CryptoConfig) -> Self {
        Self {
            keys,
            cipher: ChunkedBinaryCipher::from_config(config),
            max_image_bytes: config.max_image_bytes,
            max_video_bytes: config.max_video_bytes,
        }
    }

    pub fn keys(&self) -> &KeyStore {
        &self.keys
    }

    pub fn keys_mut(&mut self) -> &mut KeyStore {
        &mut self.keys
    }

    /// Largest accepted payload for `kind`, in bytes
    pub fn media_limit(&self, kind: MediaKind) -> u64 {
        match kind {
            MediaKind::Image => self.max_image_bytes,
            MediaKind::Video => self.max_video_bytes,
        }
    }

    pub fn seal_text(&self, text: &str) -> Result<ChatMessage> {
        let message = adaptive::encrypt(self.keys.peer_public_key()?, text)?;
        Ok(ChatMessage {
            payload: ChatPayload::Text(message),
            timestamp: unix_now(),
            preview: None,
        })
    }

    /// Share a one-off fix.
    pub fn seal_location(&self, location: &Location) -> Result<ChatMessage> {
        self.seal_location_as(LocationMode::Current, location)
    }

    /// Seal one update of a live share unconditionally; [`LiveShare`]
    /// applies the significance filter first.
    pub fn seal_live_location(&self, location: &Location) -> Result<ChatMessage> {
        self.seal_location_as(LocationMode::Live, location)
    }

    /// Tell the peer a live share has ended. Needs no keys.
    pub fn seal_live_stop(&self) -> ChatMessage {
        ChatMessage {
            payload: ChatPayload::LiveStop,
            timestamp: unix_now(),
            preview: Some("Live location sharing stopped".into()),
        }
    }

    fn seal_location_as(&self, mode: LocationMode, location: &Location) -> Result<ChatMessage> {
        let message = adaptive::encrypt_location(self.keys.peer_public_key()?, location)?;
        let label = match mode {
            LocationMode::Current => "Current location",
            LocationMode::Live => "Live location",
        };
        Ok(ChatMessage {
            payload: ChatPayload::Location { mode, message },
            timestamp: unix_now(),
            preview: Some(format!("{label} ({})", location.accuracy_label())),
        })
    }

    /// Seal an already compressed image or video.
    ///
    /// Fails with [`CryptoError::PayloadTooLarge`] above the configured limit
    /// for `kind`, before any encryption work.
    pub fn seal_media(
        &self,
        kind: MediaKind,
        bytes: &[u8],
        metadata: &MediaMetadata,
    ) -> Result<ChatMessage> {
        let limit = self.media_limit(kind);
        if bytes.len() as u64 > limit {
            return Err(CryptoError::PayloadTooLarge {
                size: bytes.len(),
                max: usize::try_from(limit).unwrap_or(usize::MAX),
            });
        }
        if metadata.kind != kind {
            return Err(CryptoError::Encryption(format!(
                "metadata describes {} but payload is sealed as {kind}",
                metadata.kind
            )));
        }

        let envelope = self
            .cipher
            .encrypt(self.keys.peer_public_key()?, bytes, metadata)?;
        debug!(%kind, size = bytes.len(), chunks = envelope.total_chunks, "sealed media");

        Ok(ChatMessage {
            payload: ChatPayload::Media { kind, envelope },
            timestamp: unix_now(),
            preview: Some(format!("{kind} ({} bytes)", bytes.len())),
        })
    }

    /// Decrypt a message sealed to our public key.
    ///
    /// Takes the message by value so media chunks move into the decryption
    /// instead of being copied.
    pub fn open(&self, message: ChatMessage) -> Result<OpenedPayload> {
        match message.payload {
            ChatPayload::Text(wire) => {
                let text = adaptive::decrypt(self.private_key()?, &wire)?;
                Ok(OpenedPayload::Text(text))
            }
            ChatPayload::Location { mode, message } => {
                let location = adaptive::decrypt_location(self.private_key()?, &message)?;
                Ok(OpenedPayload::Location { mode, location })
            }
            ChatPayload::LiveStop => Ok(OpenedPayload::LiveStop),
            ChatPayload::Media { kind, envelope } => {
                let media: DecryptedMedia<MediaMetadata> =
                    self.cipher.decrypt(self.private_key()?, envelope)?.finish()?;
                check_kind(kind, &media.metadata)?;
                Ok(OpenedPayload::Media { kind, media })
            }
        }
    }

    /// Open a media message on a blocking task, reporting progress per chunk.
    pub fn open_media_stream(
        &self,
        message: ChatMessage,
    ) -> Result<ReceiverStream<DecryptEvent<MediaMetadata>>> {
        match message.payload {
            ChatPayload::Media { kind, envelope } => {
                let decryption =
                    self.cipher.decrypt::<MediaMetadata>(self.private_key()?, envelope)?;
                check_kind(kind, decryption.metadata())?;
                Ok(decryption.into_stream())
            }
            other => Err(CryptoError::Decryption(format!(
                "{} messages have no progressive form",
                other.subtype()
            ))),
        }
    }

    fn private_key(&self) -> Result<&RsaPrivateKey> {
        Ok(self.keys.key_pair()?.private_key())
    }
}

/// Sender side of a live location share.
///
/// Feed every fix from the position source to [`LiveShare::update`]; only
/// fixes that moved or sharpened enough since the last one sent produce a
/// message.
#[derive(Debug, Default)]
pub struct LiveShare {
    last_sent: Option<Location>,
}

impl LiveShare {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn last_sent(&self) -> Option<&Location> {
        self.last_sent.as_ref()
    }

    pub fn update(&mut self, session: &Session, fix: &Location) -> Result<Option<ChatMessage>> {
        if !fix.has_changed_significantly(self.last_sent.as_ref()) {
            debug!(accuracy = fix.accuracy, "live fix below threshold, skipped");
            return Ok(None);
        }
        let message = session.seal_live_location(fix)?;
        self.last_sent = Some(fix.clone());
        Ok(Some(message))
    }

    /// End the share and produce the stop notice for the peer.
    pub fn stop(self, session: &Session) -> ChatMessage {
        session.seal_live_stop()
    }
}

/// The outer `kind` is unauthenticated; the encrypted metadata is not.
fn check_kind(kind: MediaKind, metadata: &MediaMetadata) -> Result<()> {
    if metadata.kind != kind {
        warn!(outer = %kind, inner = %metadata.kind, "media kind mismatch");
        return Err(CryptoError::InvalidEnvelope(format!(
            "message labeled {kind} carries {} metadata",
            metadata.kind
        )));
    }
    Ok(())
}
