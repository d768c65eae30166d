//! Recognized configuration options (specification §6).
//!
//! Loading configuration from a file or environment is an external
//! collaborator's job (specification §1, "configuration loading" is out of
//! scope) — this module only defines the shape and validates it, the way
//! the teacher's `WalConfig` validates its own fields without knowing where
//! its values came from.

use crate::error::{Error, Result};
use serde::{Deserialize, Serialize};
use std::time::Duration;

/// Which embedding provider the process was configured to use.
///
/// `auto` lets process startup probe for a usable provider and fall back to
/// `noop`; the concrete Ollama/OpenAI clients are external collaborators
/// (specification §1) — this crate only needs to know which one was chosen.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum EmbeddingProviderKind {
    Auto,
    Ollama,
    Openai,
    Noop,
}

/// WAL fsync policy (specification §4.1).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum WalSyncMode {
    /// fsync on every write.
    Full,
    /// fsync on a background interval.
    Batch,
    /// rely on the OS page cache (dev only).
    None,
}

impl WalSyncMode {
    /// Parse from the config string, per spec: "Invalid mode names refuse
    /// to construct."
    pub fn parse(s: &str) -> Result<Self> {
        match s {
            "full" => Ok(WalSyncMode::Full),
            "batch" => Ok(WalSyncMode::Batch),
            "none" => Ok(WalSyncMode::None),
            other => Err(Error::Fatal(format!("unknown wal.sync_mode: {other:?}"))),
        }
    }
}

/// Embedding subsystem configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EmbeddingConfig {
    pub provider: EmbeddingProviderKind,
    pub dimensions: usize,
}

impl Default for EmbeddingConfig {
    fn default() -> Self {
        Self {
            provider: EmbeddingProviderKind::Auto,
            dimensions: 1536,
        }
    }
}

/// WAL subsystem configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WalConfig {
    pub dir: String,
    pub sync_mode: WalSyncMode,
    #[serde(with = "duration_millis")]
    pub sync_interval: Duration,
    pub max_segment_size: u64,
    pub max_segment_records: u64,
}

impl Default for WalConfig {
    fn default() -> Self {
        Self {
            dir: "./data/wal".to_string(),
            sync_mode: WalSyncMode::Batch,
            sync_interval: Duration::from_millis(10),
            max_segment_size: 64 * 1024 * 1024,
            max_segment_records: 100_000,
        }
    }
}

/// Ingest-buffer configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BufferConfig {
    pub max_size: usize,
    #[serde(with = "duration_millis")]
    pub flush_timeout: Duration,
}

impl Default for BufferConfig {
    fn default() -> Self {
        Self {
            max_size: 1_000,
            flush_timeout: Duration::from_millis(250),
        }
    }
}

/// The full set of options the core recognizes (specification §6).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Config {
    pub embedding: EmbeddingConfig,
    pub searcher_enabled: bool,
    pub wal: WalConfig,
    pub buffer: BufferConfig,
    pub notify_enabled: bool,
    #[serde(with = "duration_millis")]
    pub token_ttl: Duration,
    #[serde(with = "duration_millis")]
    pub scoped_token_ttl_cap: Duration,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            embedding: EmbeddingConfig::default(),
            searcher_enabled: true,
            wal: WalConfig::default(),
            buffer: BufferConfig::default(),
            notify_enabled: true,
            token_ttl: Duration::from_secs(3600),
            scoped_token_ttl_cap: Duration::from_secs(900),
        }
    }
}

impl Config {
    /// Validate cross-field invariants the individual field types can't
    /// express on their own. Unknown enum values are caught at
    /// deserialization time via [`WalSyncMode::parse`]; this catches
    /// everything else that would be a fatal startup misconfiguration.
    pub fn validate(&self) -> Result<()> {
        if self.embedding.dimensions == 0 {
            return Err(Error::Fatal("embedding.dimensions must be > 0".into()));
        }
        if self.buffer.max_size == 0 {
            return Err(Error::Fatal("buffer.max_size must be > 0".into()));
        }
        if self.wal.max_segment_size == 0 || self.wal.max_segment_records == 0 {
            return Err(Error::Fatal(
                "wal.max_segment_size and wal.max_segment_records must be > 0".into(),
            ));
        }
        if self.scoped_token_ttl_cap > self.token_ttl {
            return Err(Error::Fatal(
                "scoped_token_ttl_cap must not exceed token_ttl".into(),
            ));
        }
        Ok(())
    }
}

mod duration_millis {
    use serde::{Deserialize, Deserializer, Serializer};
    use std::time::Duration;

    pub fn serialize<S: Serializer>(d: &Duration, s: S) -> Result<S::Ok, S::Error> {
        s.serialize_u64(d.as_millis() as u64)
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(d: D) -> Result<Duration, D::Error> {
        let millis = u64::deserialize(d)?;
        Ok(Duration::from_millis(millis))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_config_validates() {
        assert!(Config::default().validate().is_ok());
    }

    #[test]
    fn unknown_sync_mode_is_fatal() {
        let err = WalSyncMode::parse("lazy").unwrap_err();
        assert!(matches!(err, Error::Fatal(_)));
    }

    #[test]
    fn known_sync_modes_parse() {
        assert_eq!(WalSyncMode::parse("full").unwrap(), WalSyncMode::Full);
        assert_eq!(WalSyncMode::parse("batch").unwrap(), WalSyncMode::Batch);
        assert_eq!(WalSyncMode::parse("none").unwrap(), WalSyncMode::None);
    }

    #[test]
    fn scoped_ttl_cap_exceeding_token_ttl_is_fatal() {
        let mut cfg = Config::default();
        cfg.scoped_token_ttl_cap = cfg.token_ttl + Duration::from_secs(1);
        assert!(cfg.validate().is_err());
    }

    #[test]
    fn zero_dimensions_is_fatal() {
        let mut cfg = Config::default();
        cfg.embedding.dimensions = 0;
        assert!(cfg.validate().is_err());
    }
}
