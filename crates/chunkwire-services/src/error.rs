//! Errors surfaced by a sync session.

use chunkwire_core::{BlobHash, ColumnPos, VersionError};

use crate::blob_cache::BlobCacheError;
use crate::decoder::DecodeError;
use crate::transport::TransportError;

#[derive(Debug, thiserror::Error)]
pub enum SyncError {
    /// The payload could not be parsed. Not retried.
    #[error("decode failed: {0}")]
    Decode(#[from] DecodeError),

    #[error(transparent)]
    Transport(#[from] TransportError),

    #[error(transparent)]
    Version(#[from] VersionError),

    /// The peer delivered a blob we never reported missing.
    #[error("protocol sequencing: {0}")]
    Sequencing(#[from] BlobCacheError),

    /// A sub-chunk arrived for a column that was never loaded.
    #[error("protocol sequencing: sub-chunk for unloaded column ({}, {})", .0.x, .0.z)]
    UnknownColumn(ColumnPos),

    /// Every awaited blob arrived, yet decoding still reports misses.
    /// The peer and this session disagree on cache contents.
    #[error("cache diverged for column ({}, {}): {} blob(s) still missing", .pos.x, .pos.z, .misses.len())]
    CacheDiverged { pos: ColumnPos, misses: Vec<BlobHash> },

    #[error("session failed after a cache divergence")]
    SessionFailed,

    #[error("session closed")]
    SessionClosed,
}

impl SyncError {
    /// Whether the session can no longer be trusted to continue.
    pub fn is_fatal(&self) -> bool {
        matches!(self, SyncError::CacheDiverged { .. } | SyncError::SessionFailed)
    }
}
