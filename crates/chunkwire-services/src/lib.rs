//! chunkwire-services — the chunk sync engine.
//!
//! A `SyncSession` per connection consumes world events, drives a
//! `ChunkDecoder` against its `BlobCache`, commits columns to a
//! `ChunkStore`, and answers the peer through a `Transport`.

pub mod blob_cache;
pub mod column;
pub mod decoder;
pub mod driver;
pub mod error;
pub mod session;
pub mod stats;
pub mod store;
pub mod transport;

pub use blob_cache::{BlobCache, BlobCacheError, BlobEntry, BlobKind, WantHandle};
pub use column::{ChunkColumn, Section, SharedColumn};
pub use decoder::{ChunkDecoder, DecodeError, RawSectionDecoder};
pub use driver::run_session;
pub use error::SyncError;
pub use session::{ColumnReadyCallback, SessionState, SyncSession};
pub use stats::SyncStats;
pub use store::{ChunkStore, MemoryColumnStore, StoreEvent, StoreListener, Subscription};
pub use transport::{ChannelTransport, Transport, TransportError};
