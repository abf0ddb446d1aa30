//! Chunk decoding seam.
//!
//! The session never parses payloads itself. It hands them to a
//! `ChunkDecoder`, which fills in the column and reports which referenced
//! blobs the cache could not supply. Once those blobs arrive, decoding the
//! same input again must report no misses.

use bytes::{Buf, Bytes};
use chunkwire_core::{BlobHash, ProtocolEra};

use crate::blob_cache::BlobCache;
use crate::column::ChunkColumn;

#[allow(async_fn_in_trait)]
pub trait ChunkDecoder {
    /// Decode a self-contained column payload.
    async fn decode_full(
        &self,
        column: &mut ChunkColumn,
        payload: &Bytes,
        declared_section_count: i32,
    ) -> Result<(), DecodeError>;

    /// Decode a column whose sections live in blobs. Returns the misses.
    async fn decode_full_with_cache(
        &self,
        column: &mut ChunkColumn,
        blob_hashes: &[BlobHash],
        cache: &BlobCache,
        payload: &Bytes,
    ) -> Result<Vec<BlobHash>, DecodeError>;

    async fn decode_section_no_cache(
        &self,
        column: &mut ChunkColumn,
        y: i32,
        payload: &Bytes,
    ) -> Result<(), DecodeError>;

    /// Decode one section from its blob. Returns the misses.
    async fn decode_section_with_cache(
        &self,
        column: &mut ChunkColumn,
        y: i32,
        blob_hashes: &[BlobHash],
        cache: &BlobCache,
        payload: &Bytes,
    ) -> Result<Vec<BlobHash>, DecodeError>;
}

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum DecodeError {
    #[error("payload truncated: section {section} needs {needed} bytes, {remaining} remain")]
    Truncated {
        section: i32,
        needed: usize,
        remaining: usize,
    },
}

/// Reference decoder for length-prefixed section payloads.
///
/// Inline format: `declared_section_count` sections, each a big-endian
/// `u16` length followed by that many bytes; whatever follows is biome
/// data. With caching, blob `i` is section `i`, except that in the legacy
/// era the final blob carries biomes.
#[derive(Debug, Clone, Copy)]
pub struct RawSectionDecoder {
    era: ProtocolEra,
}

impl RawSectionDecoder {
    pub fn new(era: ProtocolEra) -> Self {
        Self { era }
    }

    /// Encode sections and biomes in the inline format.
    pub fn encode_inline(sections: &[&[u8]], biomes: &[u8]) -> Bytes {
        let mut out = Vec::new();
        for section in sections {
            out.extend_from_slice(&(section.len() as u16).to_be_bytes());
            out.extend_from_slice(section);
        }
        out.extend_from_slice(biomes);
        Bytes::from(out)
    }
}

impl ChunkDecoder for RawSectionDecoder {
    async fn decode_full(
        &self,
        column: &mut ChunkColumn,
        payload: &Bytes,
        declared_section_count: i32,
    ) -> Result<(), DecodeError> {
        let mut buf = payload.clone();
        for y in 0..declared_section_count.max(0) {
            if buf.remaining() < 2 {
                return Err(DecodeError::Truncated {
                    section: y,
                    needed: 2,
                    remaining: buf.remaining(),
                });
            }
            let len = buf.get_u16() as usize;
            if buf.remaining() < len {
                return Err(DecodeError::Truncated {
                    section: y,
                    needed: len,
                    remaining: buf.remaining(),
                });
            }
            column.set_section(y, buf.split_to(len));
        }
        if buf.has_remaining() {
            column.set_biomes(buf);
        }
        Ok(())
    }

    async fn decode_full_with_cache(
        &self,
        column: &mut ChunkColumn,
        blob_hashes: &[BlobHash],
        cache: &BlobCache,
        payload: &Bytes,
    ) -> Result<Vec<BlobHash>, DecodeError> {
        let mut misses = Vec::new();
        let last = blob_hashes.len().saturating_sub(1);
        for (i, hash) in blob_hashes.iter().enumerate() {
            let Some(bytes) = cache.payload(hash) else {
                misses.push(*hash);
                continue;
            };
            if self.era.last_blob_is_biome() && i == last {
                column.set_biomes(bytes.clone());
            } else {
                column.set_section(i as i32, bytes.clone());
            }
        }
        if !self.era.last_blob_is_biome() && !payload.is_empty() {
            column.set_biomes(payload.clone());
        }
        Ok(misses)
    }

    async fn decode_section_no_cache(
        &self,
        column: &mut ChunkColumn,
        y: i32,
        payload: &Bytes,
    ) -> Result<(), DecodeError> {
        column.set_section(y, payload.clone());
        Ok(())
    }

    async fn decode_section_with_cache(
        &self,
        column: &mut ChunkColumn,
        y: i32,
        blob_hashes: &[BlobHash],
        cache: &BlobCache,
        _payload: &Bytes,
    ) -> Result<Vec<BlobHash>, DecodeError> {
        let misses: Vec<BlobHash> = blob_hashes
            .iter()
            .filter(|h| cache.payload(h).is_none())
            .copied()
            .collect();
        if misses.is_empty() {
            if let Some(bytes) = blob_hashes.first().and_then(|h| cache.payload(h)) {
                column.set_section(y, bytes.clone());
            }
        }
        Ok(misses)
    }
}
