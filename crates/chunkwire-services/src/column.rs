//! Chunk columns — the reconstructed world data for one (x, z).

use std::collections::BTreeMap;
use std::sync::Arc;

use bytes::Bytes;
use chunkwire_core::{BlockPos, ColumnPos};
use tokio::sync::Mutex;

/// A column shared between the store and in-flight decodes.
pub type SharedColumn = Arc<Mutex<ChunkColumn>>;

/// One vertical section: its decoded payload plus later block edits.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Section {
    pub payload: Bytes,
    /// Runtime ids written by block updates, keyed by the block's index
    /// within the 16x16x16 section (x, z, y order).
    pub overrides: BTreeMap<u16, u32>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ChunkColumn {
    pos: ColumnPos,
    sections: BTreeMap<i32, Section>,
    biomes: Option<Bytes>,
}

impl ChunkColumn {
    pub fn new(pos: ColumnPos) -> Self {
        Self {
            pos,
            sections: BTreeMap::new(),
            biomes: None,
        }
    }

    pub fn pos(&self) -> ColumnPos {
        self.pos
    }

    pub fn into_shared(self) -> SharedColumn {
        Arc::new(Mutex::new(self))
    }

    /// Replace section `y`. Block edits made to the old section are discarded.
    pub fn set_section(&mut self, y: i32, payload: Bytes) {
        self.sections.insert(
            y,
            Section {
                payload,
                overrides: BTreeMap::new(),
            },
        );
    }

    pub fn section(&self, y: i32) -> Option<&Section> {
        self.sections.get(&y)
    }

    pub fn section_count(&self) -> usize {
        self.sections.len()
    }

    pub fn set_biomes(&mut self, biomes: Bytes) {
        self.biomes = Some(biomes);
    }

    pub fn biomes(&self) -> Option<&Bytes> {
        self.biomes.as_ref()
    }

    /// Record a block edit. Creates an empty section if none is loaded yet.
    pub fn set_block(&mut self, pos: BlockPos, runtime_id: u32) {
        self.sections
            .entry(pos.section_y())
            .or_default()
            .overrides
            .insert(pos.section_index(), runtime_id);
    }

    /// The runtime id written by a block update at `pos`, if any.
    pub fn block_override(&self, pos: BlockPos) -> Option<u32> {
        self.sections
            .get(&pos.section_y())
            .and_then(|s| s.overrides.get(&pos.section_index()).copied())
    }
}
