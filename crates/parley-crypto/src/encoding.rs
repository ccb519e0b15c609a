//! base64 helpers for byte fields in JSON wire forms

use base64::engine::general_purpose::STANDARD;
use base64::Engine;

use crate::NONCE_SIZE;

pub fn encode(data: &[u8]) -> String {
    STANDARD.encode(data)
}

pub fn decode(s: &str) -> Result<Vec<u8>, base64::DecodeError> {
    STANDARD.decode(s)
}

/// `#[serde(with = "encoding::bytes")]` for `Vec<u8>` fields
pub mod bytes {
    use serde::{Deserialize, Deserializer, Serializer};

    pub fn serialize<S: Serializer>(data: &[u8], serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(&super::encode(data))
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(deserializer: D) -> Result<Vec<u8>, D::Error> {
        let s = String::deserialize(deserializer)?;
        super::decode(&s).map_err(serde::de::Error::custom)
    }
}

/// `#[serde(with = "encoding::nonce")]` for `[u8; NONCE_SIZE]` fields
pub mod nonce {
    use serde::{Deserialize, Deserializer, Serializer};

    use super::NONCE_SIZE;

    pub fn serialize<S: Serializer>(
        nonce: &[u8; NONCE_SIZE],
        serializer: S,
    ) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(&super::encode(nonce))
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(
        deserializer: D,
    ) -> Result<[u8; NONCE_SIZE], D::Error> {
        let s = String::deserialize(deserializer)?;
        let raw = super::decode(&s).map_err(serde::de::Error::custom)?;
        raw.as_slice().try_into().map_err(|_| {
            serde::de::Error::custom(format!(
                "nonce must be {NONCE_SIZE} bytes, got {}",
                raw.len()
            ))
        })
    }
}
