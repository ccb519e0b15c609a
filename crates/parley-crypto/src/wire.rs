//! Transport form of every encrypted payload
//!
//! One JSON object per message with an explicit `"type"` discriminant:
//! ```text
//! {"type":"direct","ciphertext":"<b64>"}
//! {"type":"hybrid","encryptedKey":"..","encryptedPayload":"..","nonce":".."}
//! {"type":"chunked","encryptedKey":"..","encryptedMetadata":"..",...}
//! ```
//!
//! The untagged format of the first web client is readable through
//! [`WireMessage::from_legacy`] only.

use serde::{Deserialize, Serialize};

use crate::chunked::ChunkedEnvelope;
use crate::encoding;
use crate::envelope::HybridEnvelope;
use crate::error::{CryptoError, Result};

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum WireMessage {
    /// RSA-OAEP ciphertext of a small payload
    Direct {
        #[serde(with = "encoding::bytes")]
        ciphertext: Vec<u8>,
    },
    Hybrid(HybridEnvelope),
    Chunked(ChunkedEnvelope),
}

impl WireMessage {
    pub fn kind(&self) -> &'static str {
        match self {
            WireMessage::Direct { .. } => "direct",
            WireMessage::Hybrid(_) => "hybrid",
            WireMessage::Chunked(_) => "chunked",
        }
    }

    pub fn to_json(&self) -> Result<String> {
        Ok(serde_json::to_string(self)?)
    }

    pub fn from_json(s: &str) -> Result<Self> {
        Ok(serde_json::from_str(s)?)
    }

    pub fn to_bytes(&self) -> Result<Vec<u8>> {
        Ok(serde_json::to_vec(self)?)
    }

    pub fn from_bytes(data: &[u8]) -> Result<Self> {
        Ok(serde_json::from_slice(data)?)
    }

    /// Decode the untagged text format: a JSON object
    /// `{encryptedKey, encryptedData, iv}` is hybrid, anything else is taken
    /// as a base64 RSA ciphertext. Fails only when neither reading works.
    pub fn from_legacy(s: &str) -> Result<Self> {
        let s = s.trim();

        let hybrid_err = match serde_json::from_str::<LegacyHybrid>(s) {
            Ok(legacy) => {
                return Ok(WireMessage::Hybrid(HybridEnvelope {
                    encrypted_key: legacy.encrypted_key,
                    encrypted_payload: legacy.encrypted_data,
                    nonce: legacy.iv,
                }))
            }
            Err(e) => e,
        };

        let ciphertext = encoding::decode(s).map_err(|e| {
            CryptoError::Decryption(format!(
                "neither a legacy envelope ({hybrid_err}) nor base64 ({e})"
            ))
        })?;
        Ok(WireMessage::Direct { ciphertext })
    }
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct LegacyHybrid {
    #[serde(with = "encoding::bytes")]
    encrypted_key: Vec<u8>,
    #[serde(with = "encoding::bytes")]
    encrypted_data: Vec<u8>,
    #[serde(with = "encoding::nonce")]
    iv: [u8; crate::NONCE_SIZE],
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::NONCE_SIZE;

    #[test]
    fn test_direct_tagged_json() {
        let msg = WireMessage::Direct {
            ciphertext: vec![1, 2, 3],
        };
        let json = msg.to_json().unwrap();

        assert_eq!(json, r#"{"type":"direct","ciphertext":"AQID"}"#);
        assert_eq!(WireMessage::from_json(&json).unwrap(), msg);
        assert_eq!(msg.kind(), "direct");
    }

    #[test]
    fn test_hybrid_tagged_json() {
        let msg = WireMessage::Hybrid(HybridEnvelope {
            encrypted_key: vec![0xAA; 4],
            encrypted_payload: vec![0xBB; 20],
            nonce: [3u8; NONCE_SIZE],
        });
        let value: serde_json::Value = serde_json::from_slice(&msg.to_bytes().unwrap()).unwrap();

        assert_eq!(value["type"], "hybrid");
        assert!(value["encryptedKey"].is_string());
        assert_eq!(WireMessage::from_bytes(&msg.to_bytes().unwrap()).unwrap(), msg);
    }

    #[test]
    fn test_untagged_json_rejected() {
        let json = r#"{"encryptedKey":"AA==","encryptedPayload":"AA==","nonce":"AAAAAAAAAAAAAAAA"}"#;
        assert!(matches!(
            WireMessage::from_json(json),
            Err(CryptoError::Serialization(_))
        ));
    }

    #[test]
    fn test_unknown_tag_rejected() {
        assert!(WireMessage::from_json(r#"{"type":"quantum","ciphertext":"AA=="}"#).is_err());
    }

    #[test]
    fn test_legacy_hybrid() {
        let json = format!(
            r#"{{"encryptedKey":"{}","encryptedData":"{}","iv":"{}"}}"#,
            encoding::encode(&[1u8; 256]),
            encoding::encode(&[2u8; 40]),
            encoding::encode(&[3u8; NONCE_SIZE]),
        );

        match WireMessage::from_legacy(&json).unwrap() {
            WireMessage::Hybrid(env) => {
                assert_eq!(env.encrypted_key, vec![1u8; 256]);
                assert_eq!(env.encrypted_payload, vec![2u8; 40]);
                assert_eq!(env.nonce, [3u8; NONCE_SIZE]);
            }
            other => panic!("expected hybrid, got {}", other.kind()),
        }
    }

    #[test]
    fn test_legacy_direct() {
        let b64 = encoding::encode(b"some rsa ciphertext bytes");
        assert_eq!(
            WireMessage::from_legacy(&b64).unwrap(),
            WireMessage::Direct {
                ciphertext: b"some rsa ciphertext bytes".to_vec()
            }
        );
    }

    #[test]
    fn test_legacy_json_scalar_falls_back_to_direct() {
        // "12345678" is both a JSON number and valid base64
        let expected = encoding::decode("12345678").unwrap();
        assert_eq!(
            WireMessage::from_legacy("12345678").unwrap(),
            WireMessage::Direct {
                ciphertext: expected
            }
        );
    }

    #[test]
    fn test_legacy_malformed_record_is_rejected() {
        // Missing `iv`, and braces are not base64 either
        let json = r#"{"encryptedKey":"AA==","encryptedData":"AA=="}"#;
        match WireMessage::from_legacy(json) {
            Err(CryptoError::Decryption(msg)) => assert!(msg.contains("iv")),
            other => panic!("expected Decryption, got {other:?}"),
        }
    }

    #[test]
    fn test_legacy_garbage() {
        assert!(matches!(
            WireMessage::from_legacy("%%%"),
            Err(CryptoError::Decryption(_))
        ));
    }
}
