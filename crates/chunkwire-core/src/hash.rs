//! Blob hashes — the content addresses of cached section and biome data.
//!
//! A peer sends the same logical hash in different shapes depending on
//! the packet field: an unsigned 64-bit integer, a signed 64-bit integer
//! carrying the same bits, or text. Every map in the engine is keyed on
//! `BlobHash`, and every raw value goes through `BlobHash::canonical`
//! before it reaches one.

use std::fmt;

use serde::{Deserialize, Serialize};

/// Canonical 64-bit blob identifier.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(try_from = "RawBlobHash", into = "u64")]
pub struct BlobHash(u64);

/// A blob hash as it appears on the wire, before normalization.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(untagged)]
pub enum RawBlobHash {
    Unsigned(u64),
    /// Same 64 bits read through a signed field.
    Signed(i64),
    /// Decimal, or hexadecimal with a `0x` prefix.
    Text(String),
}

impl BlobHash {
    pub const fn new(value: u64) -> Self {
        Self(value)
    }

    /// Normalize any wire representation into the canonical key.
    pub fn canonical(raw: RawBlobHash) -> Result<Self, HashError> {
        match raw {
            RawBlobHash::Unsigned(v) => Ok(Self(v)),
            RawBlobHash::Signed(v) => Ok(Self(v as u64)),
            RawBlobHash::Text(s) => {
                let text = s.trim();
                if let Some(hex_digits) = text.strip_prefix("0x") {
                    return u64::from_str_radix(hex_digits, 16)
                        .map(Self)
                        .map_err(|_| HashError::Unparseable(s.clone()));
                }
                if let Ok(v) = text.parse::<u64>() {
                    return Ok(Self(v));
                }
                text.parse::<i64>()
                    .map(|v| Self(v as u64))
                    .map_err(|_| HashError::Unparseable(s.clone()))
            }
        }
    }

    /// Derive a hash from blob content (first 8 bytes of BLAKE3).
    pub fn of(data: &[u8]) -> Self {
        let digest = blake3::hash(data);
        let mut prefix = [0u8; 8];
        prefix.copy_from_slice(&digest.as_bytes()[..8]);
        Self(u64::from_be_bytes(prefix))
    }

    pub const fn as_u64(self) -> u64 {
        self.0
    }

    /// The value as a signed field would carry it.
    pub const fn as_i64(self) -> i64 {
        self.0 as i64
    }
}

impl From<u64> for BlobHash {
    fn from(v: u64) -> Self {
        Self(v)
    }
}

impl From<i64> for BlobHash {
    fn from(v: i64) -> Self {
        Self(v as u64)
    }
}

impl From<BlobHash> for u64 {
    fn from(h: BlobHash) -> u64 {
        h.0
    }
}

impl TryFrom<RawBlobHash> for BlobHash {
    type Error = HashError;

    fn try_from(raw: RawBlobHash) -> Result<Self, Self::Error> {
        Self::canonical(raw)
    }
}

impl fmt::Display for BlobHash {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&hex::encode(self.0.to_be_bytes()))
    }
}

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum HashError {
    #[error("unparseable blob hash: {0:?}")]
    Unparseable(String),
}
