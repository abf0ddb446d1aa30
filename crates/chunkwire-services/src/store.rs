//! Chunk store — where reconstructed columns live once decoded.
//!
//! The session only needs three things from a store: hand a column over,
//! find a loaded column by column or block coordinates, and release any
//! listeners at teardown. `MemoryColumnStore` is the in-process store.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use chunkwire_core::{BlockPos, ColumnPos};
use dashmap::DashMap;

use crate::column::SharedColumn;

/// Events a store reports to its listeners.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StoreEvent {
    ColumnSet(ColumnPos),
}

pub type StoreListener = Box<dyn Fn(&StoreEvent) + Send + Sync>;

type ListenerTable = Arc<DashMap<u64, StoreListener>>;

/// Handle returned by `ChunkStore::subscribe`. Cancelling removes the listener.
pub struct Subscription {
    id: u64,
    listeners: ListenerTable,
}

impl Subscription {
    pub fn cancel(self) {
        self.listeners.remove(&self.id);
    }
}

#[allow(async_fn_in_trait)]
pub trait ChunkStore {
    /// Take ownership of a decoded column.
    async fn set_column(&self, pos: ColumnPos, column: SharedColumn);

    fn get_loaded_column(&self, pos: ColumnPos) -> Option<SharedColumn>;

    /// The loaded column that owns a world position.
    fn get_loaded_column_at(&self, pos: BlockPos) -> Option<SharedColumn> {
        self.get_loaded_column(pos.column())
    }

    fn subscribe(&self, listener: StoreListener) -> Subscription;
}

/// In-memory column store.
#[derive(Clone, Default)]
pub struct MemoryColumnStore {
    columns: Arc<DashMap<ColumnPos, SharedColumn>>,
    listeners: ListenerTable,
    next_listener: Arc<AtomicU64>,
}

impl MemoryColumnStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn len(&self) -> usize {
        self.columns.len()
    }

    pub fn is_empty(&self) -> bool {
        self.columns.is_empty()
    }

    pub fn listener_count(&self) -> usize {
        self.listeners.len()
    }
}

impl ChunkStore for MemoryColumnStore {
    async fn set_column(&self, pos: ColumnPos, column: SharedColumn) {
        self.columns.insert(pos, column);
        let event = StoreEvent::ColumnSet(pos);
        for listener in self.listeners.iter() {
            (listener.value())(&event);
        }
    }

    fn get_loaded_column(&self, pos: ColumnPos) -> Option<SharedColumn> {
        self.columns.get(&pos).map(|c| c.value().clone())
    }

    fn subscribe(&self, listener: StoreListener) -> Subscription {
        let id = self.next_listener.fetch_add(1, Ordering::Relaxed);
        self.listeners.insert(id, listener);
        Subscription {
            id,
            listeners: self.listeners.clone(),
        }
    }
}
