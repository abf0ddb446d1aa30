//! chunkwire-core — shared types for the chunk sync engine.
//! Blob hashes, protocol eras, wire messages and configuration.
//! All other chunkwire crates depend on this one.

pub mod config;
pub mod hash;
pub mod version;
pub mod wire;

pub use hash::{BlobHash, HashError, RawBlobHash};
pub use version::{ProtocolEra, VersionError};
pub use wire::{BlockPos, ColumnPos, Outbound, WorldEvent};
