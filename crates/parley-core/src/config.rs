use std::path::Path;

use serde::{Deserialize, Serialize};

use crate::error::{ParleyError, ParleyResult};

/// Smallest RSA modulus accepted for our own keys and for imported peer keys.
pub const MIN_RSA_KEY_BITS: usize = 2048;

/// Top-level configuration (loaded from parley.toml)
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct ParleyConfig {
    pub crypto: CryptoConfig,
    pub log: LogConfig,
}

impl ParleyConfig {
    /// Parse a TOML document and validate it; absent keys take defaults.
    pub fn from_toml(content: &str) -> ParleyResult<Self> {
        let config: ParleyConfig =
            toml::from_str(content).map_err(|e| ParleyError::Config(e.to_string()))?;
        config.validate()?;
        Ok(config)
    }

    /// Read and parse a config file.
    pub fn load(path: &Path) -> ParleyResult<Self> {
        let content = std::fs::read_to_string(path)?;
        Self::from_toml(&content)
    }

    /// Reject settings the crypto core cannot honor.
    pub fn validate(&self) -> ParleyResult<()> {
        if self.crypto.rsa_key_bits < MIN_RSA_KEY_BITS {
            return Err(ParleyError::Config(format!(
                "crypto.rsa_key_bits = {} is below the minimum of {MIN_RSA_KEY_BITS}",
                self.crypto.rsa_key_bits
            )));
        }
        if self.crypto.chunk_size_bytes == 0 {
            return Err(ParleyError::Config(
                "crypto.chunk_size_bytes must be greater than zero".into(),
            ));
        }
        match self.log.format.as_str() {
            "json" | "text" => Ok(()),
            other => Err(ParleyError::Config(format!(
                "log.format must be \"json\" or \"text\", got {other:?}"
            ))),
        }
    }
}

/// Encryption parameters
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct CryptoConfig {
    /// RSA modulus size for generated key pairs (default: 2048)
    pub rsa_key_bits: usize,
    /// Plaintext bytes per encrypted media chunk (default: 65536)
    pub chunk_size_bytes: usize,
    /// Largest image payload accepted for sealing (default: 10 MiB)
    pub max_image_bytes: u64,
    /// Largest video payload accepted for sealing (default: 50 MiB)
    pub max_video_bytes: u64,
}

impl Default for CryptoConfig {
    fn default() -> Self {
        Self {
            rsa_key_bits: MIN_RSA_KEY_BITS,
            chunk_size_bytes: 64 * 1024,
            max_image_bytes: 10 * 1024 * 1024,
            max_video_bytes: 50 * 1024 * 1024,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct LogConfig {
    /// Log level (default: info)
    pub level: String,
    /// Log format: "json" or "text"
    pub format: String,
}

impl Default for LogConfig {
    fn default() -> Self {
        Self {
            level: "info".into(),
            format: "text".into(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn scratch_file(name: &str, content: &str) -> std::path::PathBuf {
        let path = std::env::temp_dir().join(format!("parley-{}-{name}", std::process::id()));
        std::fs::write(&path, content).unwrap();
        path
    }

    #[test]
    fn test_load_from_file() {
        let path = scratch_file("load.toml", "[crypto]\nchunk_size_bytes = 1024\n");
        let config = ParleyConfig::load(&path).unwrap();
        std::fs::remove_file(&path).unwrap();

        assert_eq!(config.crypto.chunk_size_bytes, 1024);
        assert_eq!(config.crypto.rsa_key_bits, 2048);
    }

    #[test]
    fn test_load_missing_file_is_io_error() {
        let path = std::env::temp_dir().join("parley-no-such-dir/parley.toml");
        match ParleyConfig::load(&path) {
            Err(ParleyError::Io(e)) => assert_eq!(e.kind(), std::io::ErrorKind::NotFound),
            other => panic!("expected Io, got {other:?}"),
        }
    }

    #[test]
    fn test_load_invalid_file_is_config_error() {
        let path = scratch_file("bad.toml", "[log]\nformat = \"xml\"\n");
        let result = ParleyConfig::load(&path);
        std::fs::remove_file(&path).unwrap();

        assert!(matches!(result, Err(ParleyError::Config(_))));
    }

    #[test]
    fn test_parse_full_config() {
        let toml_str = r#"
[crypto]
rsa_key_bits = 3072
chunk_size_bytes = 32768
max_image_bytes = 1048576
max_video_bytes = 4194304

[log]
level = "debug"
format = "json"
"#;
        let config: ParleyConfig = toml::from_str(toml_str).unwrap();

        assert_eq!(config.crypto.rsa_key_bits, 3072);
        assert_eq!(config.crypto.chunk_size_bytes, 32768);
        assert_eq!(config.crypto.max_image_bytes, 1048576);
        assert_eq!(config.crypto.max_video_bytes, 4194304);
        assert_eq!(config.log.level, "debug");
        assert_eq!(config.log.format, "json");
        config.validate().unwrap();
    }

    #[test]
    fn test_parse_defaults() {
        let config: ParleyConfig = toml::from_str("").unwrap();

        assert_eq!(config.crypto.rsa_key_bits, 2048);
        assert_eq!(config.crypto.chunk_size_bytes, 65536);
        assert_eq!(config.crypto.max_image_bytes, 10 * 1024 * 1024);
        assert_eq!(config.crypto.max_video_bytes, 50 * 1024 * 1024);
        assert_eq!(config.log.level, "info");
        assert_eq!(config.log.format, "text");
        config.validate().unwrap();
    }

    #[test]
    fn test_parse_partial_config() {
        let toml_str = r#"
[crypto]
chunk_size_bytes = 1024
"#;
        let config: ParleyConfig = toml::from_str(toml_str).unwrap();

        // Overridden
        assert_eq!(config.crypto.chunk_size_bytes, 1024);
        // Defaults
        assert_eq!(config.crypto.rsa_key_bits, 2048);
        assert_eq!(config.log.level, "info");
    }

    #[test]
    fn test_validate_rejects_small_rsa_keys() {
        let mut config = ParleyConfig::default();
        config.crypto.rsa_key_bits = 1024;
        assert!(matches!(config.validate(), Err(ParleyError::Config(_))));
    }

    #[test]
    fn test_validate_rejects_zero_chunk_size() {
        let mut config = ParleyConfig::default();
        config.crypto.chunk_size_bytes = 0;
        assert!(matches!(config.validate(), Err(ParleyError::Config(_))));
    }

    #[test]
    fn test_validate_rejects_unknown_log_format() {
        let mut config = ParleyConfig::default();
        config.log.format = "yaml".into();
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_from_toml_validates() {
        assert!(ParleyConfig::from_toml("[crypto]\nchunk_size_bytes = 4096\n").is_ok());
        assert!(matches!(
            ParleyConfig::from_toml("[crypto]\nrsa_key_bits = 512\n"),
            Err(ParleyError::Config(_))
        ));
        assert!(matches!(
            ParleyConfig::from_toml("[crypto\n"),
            Err(ParleyError::Config(_))
        ));
    }

    #[test]
    fn test_serialize_roundtrip() {
        let config = ParleyConfig::default();
        let toml_str = toml::to_string(&config).unwrap();
        let parsed: ParleyConfig = toml::from_str(&toml_str).unwrap();

        assert_eq!(config.crypto.rsa_key_bits, parsed.crypto.rsa_key_bits);
        assert_eq!(config.crypto.chunk_size_bytes, parsed.crypto.chunk_size_bytes);
        assert_eq!(config.log.format, parsed.log.format);
    }
}
