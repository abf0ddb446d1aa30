//! Content-addressed blob cache with dependency barriers.
//!
//! Blobs are section or biome payloads keyed by `BlobHash`. A blob is
//! either resolved (bytes known), pending (we asked the peer for it and
//! know which column it belongs to), or unknown.
//!
//! `once` registers a continuation over a set of hashes. The continuation
//! fires exactly once, the first time every hash in the set is resolved.
//! Each hash indexes the wants waiting on it, so resolving one hash only
//! touches the wants that actually depend on it.

use std::collections::{HashMap, HashSet};

use bytes::Bytes;
use chunkwire_core::BlobHash;
use serde::Serialize;

/// Work to run once a want's dependencies are all resolved.
pub type Continuation = Box<dyn FnOnce() + Send + Sync>;

/// Identifies a registered want while it is outstanding.
pub type WantHandle = u64;

/// What a blob holds once its bytes arrive.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum BlobKind {
    SectionData,
    BiomeData,
}

/// Metadata for a blob, recorded before its bytes are known.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BlobEntry {
    pub kind: BlobKind,
    pub x: i32,
    pub z: i32,
    /// Section index, when the blob is a known section.
    pub y: Option<i32>,
    pub payload: Option<Bytes>,
}

impl BlobEntry {
    pub fn section(x: i32, z: i32, y: Option<i32>) -> Self {
        Self {
            kind: BlobKind::SectionData,
            x,
            z,
            y,
            payload: None,
        }
    }

    pub fn biome(x: i32, z: i32) -> Self {
        Self {
            kind: BlobKind::BiomeData,
            x,
            z,
            y: None,
            payload: None,
        }
    }

    pub fn with_payload(mut self, payload: Bytes) -> Self {
        self.payload = Some(payload);
        self
    }
}

struct PendingWant {
    outstanding: HashSet<BlobHash>,
    continuation: Continuation,
}

/// Per-connection blob cache.
#[derive(Default)]
pub struct BlobCache {
    resolved: HashMap<BlobHash, BlobEntry>,
    pending: HashMap<BlobHash, BlobEntry>,
    wants: HashMap<WantHandle, PendingWant>,
    // hash -> wants still waiting on it
    waiting: HashMap<BlobHash, HashSet<WantHandle>>,
    next_handle: WantHandle,
}

impl BlobCache {
    pub fn new() -> Self {
        Self::default()
    }

    /// Record resolved content for `hash` and fire every want it completes.
    ///
    /// Setting a hash twice replaces the entry; wants were already released
    /// the first time, so nothing fires again.
    pub fn set(&mut self, hash: BlobHash, value: BlobEntry) {
        self.pending.remove(&hash);
        self.resolved.insert(hash, value);

        let Some(handles) = self.waiting.remove(&hash) else {
            tracing::trace!(%hash, "blob resolved, nothing waiting");
            return;
        };

        let mut ready: Vec<WantHandle> = handles
            .into_iter()
            .filter(|handle| match self.wants.get_mut(handle) {
                Some(want) => {
                    want.outstanding.remove(&hash);
                    want.outstanding.is_empty()
                }
                None => false,
            })
            .collect();
        // registration order
        ready.sort_unstable();

        tracing::trace!(%hash, fired = ready.len(), "blob resolved");

        for handle in ready {
            if let Some(want) = self.wants.remove(&handle) {
                (want.continuation)();
            }
        }
    }

    pub fn get(&self, hash: &BlobHash) -> Option<&BlobEntry> {
        self.resolved.get(hash)
    }

    pub fn has(&self, hash: &BlobHash) -> bool {
        self.resolved.contains_key(hash)
    }

    /// Resolved bytes for `hash`, if any.
    pub fn payload(&self, hash: &BlobHash) -> Option<&Bytes> {
        self.resolved.get(hash).and_then(|e| e.payload.as_ref())
    }

    /// Register what we expect `hash` to contain before its bytes arrive.
    ///
    /// The first registration wins; a hash shared by several columns keeps
    /// the metadata of whichever column asked first.
    pub fn add_pending(&mut self, hash: BlobHash, entry: BlobEntry) {
        if self.resolved.contains_key(&hash) {
            return;
        }
        self.pending.entry(hash).or_insert(entry);
    }

    pub fn pending(&self, hash: &BlobHash) -> Option<&BlobEntry> {
        self.pending.get(hash)
    }

    pub fn is_pending(&self, hash: &BlobHash) -> bool {
        self.pending.contains_key(hash)
    }

    /// Attach bytes to a pending entry and resolve it.
    ///
    /// Fails if `hash` was never registered with `add_pending`: the peer
    /// sent data we did not ask for.
    pub fn update_pending(&mut self, hash: BlobHash, payload: Bytes) -> Result<(), BlobCacheError> {
        let entry = self
            .pending
            .remove(&hash)
            .ok_or(BlobCacheError::NotPending(hash))?;
        self.set(hash, entry.with_payload(payload));
        Ok(())
    }

    /// Run `continuation` once every hash in `hashes` is resolved.
    ///
    /// If they already are, it runs before `once` returns and `None` is
    /// returned. Otherwise the want is queued and its handle returned.
    pub fn once<I, F>(&mut self, hashes: I, continuation: F) -> Option<WantHandle>
    where
        I: IntoIterator<Item = BlobHash>,
        F: FnOnce() + Send + Sync + 'static,
    {
        let outstanding: HashSet<BlobHash> = hashes
            .into_iter()
            .filter(|h| !self.resolved.contains_key(h))
            .collect();

        if outstanding.is_empty() {
            continuation();
            return None;
        }

        let handle = self.next_handle;
        self.next_handle += 1;

        for hash in &outstanding {
            self.waiting.entry(*hash).or_default().insert(handle);
        }
        self.wants.insert(
            handle,
            PendingWant {
                outstanding,
                continuation: Box::new(continuation),
            },
        );
        Some(handle)
    }

    /// Hashes a want is still waiting on.
    pub fn outstanding(&self, handle: WantHandle) -> Option<&HashSet<BlobHash>> {
        self.wants.get(&handle).map(|w| &w.outstanding)
    }

    pub fn len(&self) -> usize {
        self.resolved.len()
    }

    pub fn is_empty(&self) -> bool {
        self.resolved.is_empty()
    }

    pub fn pending_count(&self) -> usize {
        self.pending.len()
    }

    pub fn want_count(&self) -> usize {
        self.wants.len()
    }

    /// Drop everything: resolved blobs, pending entries and queued wants.
    /// Queued continuations are dropped without running.
    pub fn clear(&mut self) {
        let dropped = self.wants.len();
        self.resolved.clear();
        self.pending.clear();
        self.wants.clear();
        self.waiting.clear();
        if dropped > 0 {
            tracing::debug!(dropped, "blob cache cleared with wants outstanding");
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum BlobCacheError {
    #[error("blob {0} was never requested")]
    NotPending(BlobHash),
}
