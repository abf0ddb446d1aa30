use crate::*;

use chunkwire_core::wire::{BlockUpdate, SubChunkResponse, SubChunkResult};
use chunkwire_core::BlockPos;

// ══════════════════════════════════════════════════════════════════════════════
//  Sub-chunks — per-section requests without the blob cache
// ══════════════════════════════════════════════════════════════════════════════

/// Between 1.18.0 and 1.18.11 each section is requested on its own, and with
/// caching off the sections come back inline.
#[tokio::test]
async fn test_uncached_single_requests_fill_column() -> Result<()> {
    let mut h = Harness::new(false, "1.18.0").await?;
    h.peer.section(2, 1, 3, b"inline-1");
    h.peer.section(2, 2, 3, b"inline-2");

    h.deliver(WorldEvent::LevelChunk(LevelChunk {
        x: 2,
        z: 3,
        sub_chunk_count: -2,
        highest_sub_chunk_count: Some(3),
        blob_hashes: Vec::new(),
        payload: Bytes::new(),
    }))
    .await?;

    assert_eq!(
        h.sent,
        vec![
            Outbound::CachingMode { enabled: false },
            Outbound::SubChunkRequest(SubChunkRequest::Single { x: 2, y: 1, z: 3 }),
            Outbound::SubChunkRequest(SubChunkRequest::Single { x: 2, y: 2, z: 3 }),
        ]
    );

    let pos = ColumnPos::new(2, 3);
    assert_eq!(h.section(pos, 1).await.as_deref(), Some(&b"inline-1"[..]));
    assert_eq!(h.section(pos, 2).await.as_deref(), Some(&b"inline-2"[..]));
    // committed, then once per section
    assert_eq!(h.notifications(pos), 3);
    assert_eq!(h.session.stats().found_sub_chunks, 2);
    assert!(h.session.cache().is_empty());
    Ok(())
}

/// All-air sections count as found; every failure code counts as lost.
#[tokio::test]
async fn test_result_codes_split_found_and_lost() -> Result<()> {
    let mut h = Harness::new(false, "1.18.30").await?;
    h.deliver(WorldEvent::LevelChunk(LevelChunk {
        x: 0,
        z: 0,
        sub_chunk_count: 0,
        highest_sub_chunk_count: None,
        blob_hashes: Vec::new(),
        payload: Bytes::new(),
    }))
    .await?;

    let results = [
        SubChunkResult::SuccessAllAir,
        SubChunkResult::ChunkNotFound,
        SubChunkResult::InvalidDimension,
        SubChunkResult::PlayerNotFound,
        SubChunkResult::YOutOfBounds,
    ];
    for (y, result) in results.into_iter().enumerate() {
        h.deliver(WorldEvent::SubChunk(SubChunkResponse {
            x: 0,
            y: y as i32 + 1,
            z: 0,
            result,
            blob_id: None,
            payload: Bytes::new(),
        }))
        .await?;
    }

    let stats = h.session.stats();
    assert_eq!(stats.found_sub_chunks, 1);
    assert_eq!(stats.lost_sub_chunks, 4);
    Ok(())
}

/// Block updates land in the loaded column that owns them.
#[tokio::test]
async fn test_block_update_reaches_loaded_column() -> Result<()> {
    let mut h = Harness::new(false, "1.18.30").await?;
    h.peer.section(2, 1, 3, b"sec");
    let chunk = h.peer.level_chunk(2, 3, Vec::new());
    h.deliver(chunk).await?;

    let pos = ColumnPos::new(2, 3);
    let before = h.notifications(pos);
    let block = BlockPos::new(2 * 16 + 5, 20, 3 * 16 + 9);
    h.deliver(WorldEvent::BlockUpdate(BlockUpdate {
        position: block,
        runtime_id: 4242,
    }))
    .await?;

    assert_eq!(h.notifications(pos), before + 1);
    let column = h.store.get_loaded_column(pos).expect("column committed");
    assert_eq!(column.lock().await.block_override(block), Some(4242));
    Ok(())
}
