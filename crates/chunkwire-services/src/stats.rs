//! Session counters, readable by observers.

use serde::Serialize;

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct SyncStats {
    /// Sub-chunk responses that carried data.
    pub found_sub_chunks: u64,
    /// Sub-chunk responses the peer reported as failed.
    pub lost_sub_chunks: u64,
    /// Misses waiting to be reported in the next batched acknowledgement.
    pub miss_backlog: usize,
    /// Full columns handed to the store.
    pub columns_committed: u64,
    /// Blobs received in cache-miss responses.
    pub blobs_received: u64,
}
