//! Configuration for a chunk sync session.
//!
//! Resolution order: environment variables → config file → defaults.
//!
//! Config file location:
//!   1. $CHUNKWIRE_CONFIG (explicit override)
//!   2. $XDG_CONFIG_HOME/chunkwire/config.toml
//!   3. ~/.config/chunkwire/config.toml

use serde::{Deserialize, Serialize};
use std::path::PathBuf;

use crate::version::{ProtocolEra, VersionError};

/// Per-session settings, fixed when the session starts.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct SyncConfig {
    /// Announce blob caching to the peer. Fixed for the life of a session.
    pub caching_enabled: bool,
    /// Negotiated game protocol version, e.g. "1.18.11".
    pub protocol_version: String,
    /// Flush the sub-chunk miss backlog once it holds this many hashes.
    pub miss_flush_threshold: usize,
    /// Upper bound on sections requested per column beyond the base section.
    pub max_sub_chunk_requests: usize,
}

impl Default for SyncConfig {
    fn default() -> Self {
        Self {
            caching_enabled: true,
            protocol_version: "1.18.11".to_string(),
            miss_flush_threshold: 10,
            max_sub_chunk_requests: 4,
        }
    }
}

fn config_dir() -> PathBuf {
    std::env::var("XDG_CONFIG_HOME")
        .map(PathBuf::from)
        .unwrap_or_else(|_| dirs_or_home().join(".config"))
        .join("chunkwire")
}

fn dirs_or_home() -> PathBuf {
    std::env::var("HOME")
        .map(PathBuf::from)
        .unwrap_or_else(|_| PathBuf::from("/tmp"))
}

#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("failed to read {0}: {1}")]
    ReadFailed(PathBuf, std::io::Error),
    #[error("failed to parse {0}: {1}")]
    ParseFailed(PathBuf, toml::de::Error),
    #[error(transparent)]
    Version(#[from] VersionError),
}

impl SyncConfig {
    /// Load config: env vars → file → defaults.
    pub fn load() -> Result<Self, ConfigError> {
        Self::load_from(&Self::file_path())
    }

    /// Load from an explicit path, falling back to defaults if it is absent.
    pub fn load_from(path: &std::path::Path) -> Result<Self, ConfigError> {
        let mut config = if path.exists() {
            let text = std::fs::read_to_string(path)
                .map_err(|e| ConfigError::ReadFailed(path.to_path_buf(), e))?;
            toml::from_str(&text).map_err(|e| ConfigError::ParseFailed(path.to_path_buf(), e))?
        } else {
            SyncConfig::default()
        };
        config.apply_env_overrides();
        config.era()?;
        // Section offsets are carried as i8 on the wire.
        config.max_sub_chunk_requests = config.max_sub_chunk_requests.min(i8::MAX as usize);
        Ok(config)
    }

    /// Config file path.
    pub fn file_path() -> PathBuf {
        std::env::var("CHUNKWIRE_CONFIG")
            .map(PathBuf::from)
            .unwrap_or_else(|_| config_dir().join("config.toml"))
    }

    /// The protocol era implied by `protocol_version`.
    pub fn era(&self) -> Result<ProtocolEra, VersionError> {
        ProtocolEra::from_version(&self.protocol_version)
    }

    /// Apply CHUNKWIRE_* env var overrides.
    fn apply_env_overrides(&mut self) {
        if let Ok(v) = std::env::var("CHUNKWIRE_CACHING") {
            self.caching_enabled = v == "true" || v == "1";
        }
        if let Ok(v) = std::env::var("CHUNKWIRE_PROTOCOL_VERSION") {
            self.protocol_version = v;
        }
        if let Ok(v) = std::env::var("CHUNKWIRE_MISS_FLUSH_THRESHOLD") {
            if let Ok(n) = v.parse() {
                self.miss_flush_threshold = n;
            }
        }
    }
}
