//! Protocol eras — the version splits that change how chunks are synced.
//!
//! The negotiated game version is parsed once at session start. After
//! that, code branches on the era, never on version strings.

use serde::{Deserialize, Serialize};

/// Which chunk-sync behaviour the negotiated protocol version implies.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ProtocolEra {
    /// Before 1.18.0. Columns carry every section inline; when caching,
    /// the final missing blob of a column is its biome data.
    Legacy,
    /// 1.18.0 up to 1.18.11. Sections are requested one request per section.
    SubChunkSingle,
    /// 1.18.11 and later. Sections are requested in one batch of offsets.
    SubChunkBatched,
}

const SUB_CHUNK_SINGLE_SINCE: (u32, u32, u32) = (1, 18, 0);
const SUB_CHUNK_BATCHED_SINCE: (u32, u32, u32) = (1, 18, 11);

impl ProtocolEra {
    /// Resolve the era from a dotted version string such as "1.18.11".
    pub fn from_version(version: &str) -> Result<Self, VersionError> {
        let parsed = parse_version(version)?;
        Ok(if parsed >= SUB_CHUNK_BATCHED_SINCE {
            ProtocolEra::SubChunkBatched
        } else if parsed >= SUB_CHUNK_SINGLE_SINCE {
            ProtocolEra::SubChunkSingle
        } else {
            ProtocolEra::Legacy
        })
    }

    /// Whether the last missing blob of a column is tagged as biome data.
    pub fn last_blob_is_biome(self) -> bool {
        matches!(self, ProtocolEra::Legacy)
    }

    /// Whether negative sub-chunk counts trigger section requests at all.
    pub fn requests_sub_chunks(self) -> bool {
        !matches!(self, ProtocolEra::Legacy)
    }
}

fn parse_version(version: &str) -> Result<(u32, u32, u32), VersionError> {
    let mut parts = [0u32; 3];
    let mut count = 0;
    for piece in version.trim().split('.') {
        if count == parts.len() {
            return Err(VersionError::Malformed(version.to_string()));
        }
        parts[count] = piece
            .parse()
            .map_err(|_| VersionError::Malformed(version.to_string()))?;
        count += 1;
    }
    if count < 2 {
        return Err(VersionError::Malformed(version.to_string()));
    }
    Ok((parts[0], parts[1], parts[2]))
}

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum VersionError {
    #[error("malformed protocol version: {0:?}")]
    Malformed(String),
}
