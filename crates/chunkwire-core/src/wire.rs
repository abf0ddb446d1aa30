//! Protocol messages exchanged with the peer.
//!
//! Inbound messages arrive as `WorldEvent`s from the transport; outbound
//! messages are `Outbound` values handed back to it. The byte-level game
//! encoding is the transport's concern; these are the decoded shapes.

use bytes::Bytes;
use serde::{Deserialize, Serialize};

use crate::hash::BlobHash;

// ── Positions ────────────────────────────────────────────────────────────────

/// Column coordinates, in chunk units.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct ColumnPos {
    pub x: i32,
    pub z: i32,
}

impl ColumnPos {
    pub const fn new(x: i32, z: i32) -> Self {
        Self { x, z }
    }
}

/// Block coordinates, in world units.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct BlockPos {
    pub x: i32,
    pub y: i32,
    pub z: i32,
}

impl BlockPos {
    pub const fn new(x: i32, y: i32, z: i32) -> Self {
        Self { x, y, z }
    }

    /// The column that owns this block.
    pub fn column(self) -> ColumnPos {
        ColumnPos::new(self.x >> 4, self.z >> 4)
    }

    /// Vertical section index that owns this block.
    pub fn section_y(self) -> i32 {
        self.y >> 4
    }

    /// Index of this block within its 16x16x16 section (x, then z, then y).
    pub fn section_index(self) -> u16 {
        let lx = (self.x & 15) as u16;
        let ly = (self.y & 15) as u16;
        let lz = (self.z & 15) as u16;
        (lx << 8) | (lz << 4) | ly
    }
}

/// Three-axis offset from a sub-chunk request origin.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct SectionOffset {
    pub dx: i8,
    pub dy: i8,
    pub dz: i8,
}

/// Origin of a batched sub-chunk request or response, in section units.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct SectionOrigin {
    pub x: i32,
    pub y: i32,
    pub z: i32,
}

// ── Inbound ──────────────────────────────────────────────────────────────────

/// Every event the transport can deliver to a session.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum WorldEvent {
    LevelChunk(LevelChunk),
    SubChunk(SubChunkResponse),
    SubChunkBatch(SubChunkBatch),
    CacheMissResponse(CacheMissResponse),
    BlockUpdate(BlockUpdate),
}

/// A full column.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LevelChunk {
    pub x: i32,
    pub z: i32,
    /// Inline section count. Negative values mean sections are requested
    /// separately: -1 without a height limit, -2 with `highest_sub_chunk_count`.
    pub sub_chunk_count: i32,
    #[serde(default)]
    pub highest_sub_chunk_count: Option<u16>,
    #[serde(default)]
    pub blob_hashes: Vec<BlobHash>,
    #[serde(default)]
    pub payload: Bytes,
}

impl LevelChunk {
    pub fn pos(&self) -> ColumnPos {
        ColumnPos::new(self.x, self.z)
    }

    /// Whether sections for this column must be requested separately.
    pub fn is_request_driven(&self) -> bool {
        self.sub_chunk_count < 0
    }
}

/// Outcome code the peer attaches to each sub-chunk.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SubChunkResult {
    Success,
    ChunkNotFound,
    InvalidDimension,
    PlayerNotFound,
    YOutOfBounds,
    SuccessAllAir,
}

impl SubChunkResult {
    pub fn is_success(self) -> bool {
        matches!(self, SubChunkResult::Success | SubChunkResult::SuccessAllAir)
    }
}

/// One sub-chunk, addressed absolutely.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SubChunkResponse {
    pub x: i32,
    pub y: i32,
    pub z: i32,
    pub result: SubChunkResult,
    #[serde(default)]
    pub blob_id: Option<BlobHash>,
    #[serde(default)]
    pub payload: Bytes,
}

/// One entry of a batched sub-chunk response, addressed relative to the origin.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SubChunkEntry {
    pub dx: i8,
    pub dy: i8,
    pub dz: i8,
    pub result: SubChunkResult,
    #[serde(default)]
    pub blob_id: Option<BlobHash>,
    #[serde(default)]
    pub payload: Bytes,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SubChunkBatch {
    pub origin: SectionOrigin,
    pub entries: Vec<SubChunkEntry>,
}

impl SubChunkBatch {
    /// Flatten into absolutely-addressed responses, preserving order.
    pub fn into_responses(self) -> impl Iterator<Item = SubChunkResponse> {
        let origin = self.origin;
        self.entries.into_iter().map(move |e| SubChunkResponse {
            x: origin.x + i32::from(e.dx),
            y: origin.y + i32::from(e.dy),
            z: origin.z + i32::from(e.dz),
            result: e.result,
            blob_id: e.blob_id,
            payload: e.payload,
        })
    }
}

/// Blob bytes the peer sends for hashes we reported missing.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CacheMissResponse {
    pub blobs: Vec<MissedBlob>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MissedBlob {
    pub hash: BlobHash,
    pub payload: Bytes,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BlockUpdate {
    pub position: BlockPos,
    pub runtime_id: u32,
}

// ── Outbound ─────────────────────────────────────────────────────────────────

/// Everything a session asks the transport to send.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum Outbound {
    /// Sent once at session start.
    CachingMode { enabled: bool },
    /// Acknowledgement of which blobs we have and which we lack.
    CacheStatus(CacheStatus),
    SubChunkRequest(SubChunkRequest),
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct CacheStatus {
    pub misses: Vec<BlobHash>,
    pub haves: Vec<BlobHash>,
}

impl CacheStatus {
    pub fn misses(misses: Vec<BlobHash>) -> Self {
        Self {
            misses,
            haves: Vec::new(),
        }
    }

    pub fn haves(haves: Vec<BlobHash>) -> Self {
        Self {
            misses: Vec::new(),
            haves,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "form", rename_all = "snake_case")]
pub enum SubChunkRequest {
    /// One request covering several sections of a column.
    Batched {
        origin: SectionOrigin,
        offsets: Vec<SectionOffset>,
    },
    /// One request per section.
    Single { x: i32, y: i32, z: i32 },
}
