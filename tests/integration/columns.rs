use crate::*;

use chunkwire_services::BlobKind;

// ══════════════════════════════════════════════════════════════════════════════
//  Full columns — blob negotiation against a caching peer
// ══════════════════════════════════════════════════════════════════════════════

/// A request-driven column in the batched era: the base blob is fetched,
/// three sections arrive by hash, one is reported lost, and the backlog is
/// flushed by hand. Every section ends up in the store.
#[tokio::test]
async fn test_cached_batched_column_converges_with_peer() -> Result<()> {
    let mut h = Harness::new(true, "1.18.30").await?;
    h.pump().await?;

    let base = h.peer.blob(b"base-0");
    h.peer.section(0, 1, 0, b"sec-1");
    h.peer.section(0, 2, 0, b"sec-2");
    h.peer.section(0, 3, 0, b"sec-3");
    // y = 4 is never served

    let chunk = h.peer.level_chunk(0, 0, vec![base]);
    h.deliver(chunk).await?;

    let pos = ColumnPos::new(0, 0);
    let stats = h.session.stats();
    assert_eq!(stats.columns_committed, 1);
    assert_eq!(stats.found_sub_chunks, 3);
    assert_eq!(stats.lost_sub_chunks, 1);
    assert_eq!(stats.miss_backlog, 3, "section misses wait for the threshold");
    assert_eq!(h.section(pos, 0).await.as_deref(), Some(&b"base-0"[..]));
    assert!(h.section(pos, 1).await.is_none());
    // committed, then base blob resolved
    assert_eq!(h.notifications(pos), 2);

    h.session.flush_miss_backlog().await?;
    h.pump().await?;

    assert_eq!(h.session.stats().miss_backlog, 0);
    assert_eq!(h.session.stats().blobs_received, 4);
    assert_eq!(h.section(pos, 1).await.as_deref(), Some(&b"sec-1"[..]));
    assert_eq!(h.section(pos, 2).await.as_deref(), Some(&b"sec-2"[..]));
    assert_eq!(h.section(pos, 3).await.as_deref(), Some(&b"sec-3"[..]));
    assert!(h.section(pos, 4).await.is_none());
    assert_eq!(h.notifications(pos), 5);

    let cache = h.session.cache();
    assert_eq!(cache.len(), 4);
    assert_eq!(cache.pending_count(), 0);
    assert_eq!(cache.want_count(), 0);
    Ok(())
}

/// A second column referencing a blob the cache already holds is decoded
/// straight away: the ack reports no misses and nothing is refetched.
#[tokio::test]
async fn test_shared_blob_is_not_refetched() -> Result<()> {
    let mut h = Harness::new(true, "1.18.30").await?;
    let base = h.peer.blob(b"shared");

    let first = h.peer.level_chunk(0, 0, vec![base]);
    h.deliver(first).await?;
    assert_eq!(h.session.stats().blobs_received, 1);

    h.sent.clear();
    let second = h.peer.level_chunk(1, 0, vec![base]);
    h.deliver(second).await?;

    assert_eq!(h.session.stats().blobs_received, 1);
    assert!(h
        .sent
        .contains(&Outbound::CacheStatus(CacheStatus::misses(Vec::new()))));
    let pos = ColumnPos::new(1, 0);
    assert_eq!(h.section(pos, 0).await.as_deref(), Some(&b"shared"[..]));
    assert_eq!(h.notifications(pos), 1);
    Ok(())
}

/// Pre-1.18 columns carry their sections inline as blobs, with biomes in
/// the final blob, and never request sub-chunks.
#[tokio::test]
async fn test_legacy_column_takes_biomes_from_last_blob() -> Result<()> {
    let mut h = Harness::new(true, "1.17.40").await?;
    h.pump().await?;

    let s0 = h.peer.blob(b"l-s0");
    let s1 = h.peer.blob(b"l-s1");
    let biomes = h.peer.blob(b"l-biomes");

    h.deliver(WorldEvent::LevelChunk(LevelChunk {
        x: -3,
        z: 8,
        sub_chunk_count: 2,
        highest_sub_chunk_count: None,
        blob_hashes: vec![s0, s1, biomes],
        payload: Bytes::new(),
    }))
    .await?;

    assert!(!h
        .sent
        .iter()
        .any(|m| matches!(m, Outbound::SubChunkRequest(_))));
    assert_eq!(h.session.cache().get(&biomes).map(|e| e.kind), Some(BlobKind::BiomeData));
    assert_eq!(h.session.cache().get(&s1).map(|e| e.kind), Some(BlobKind::SectionData));

    let pos = ColumnPos::new(-3, 8);
    assert_eq!(h.section(pos, 0).await.as_deref(), Some(&b"l-s0"[..]));
    assert_eq!(h.section(pos, 1).await.as_deref(), Some(&b"l-s1"[..]));
    let column = h.store.get_loaded_column(pos).expect("column committed");
    assert_eq!(
        column.lock().await.biomes().map(|b| b.to_vec()),
        Some(b"l-biomes".to_vec())
    );
    assert_eq!(h.notifications(pos), 2);
    Ok(())
}

/// Ten section misses across columns trigger a flush without any help.
#[tokio::test]
async fn test_miss_backlog_flushes_at_threshold() -> Result<()> {
    let mut h = Harness::new(true, "1.18.30").await?;
    let payloads: [&'static [u8]; 12] = [
        b"a1", b"a2", b"a3", b"a4", b"b1", b"b2", b"b3", b"b4", b"c1", b"c2", b"c3", b"c4",
    ];
    for (i, data) in payloads.into_iter().enumerate() {
        h.peer.section((i / 4) as i32, (i % 4) as i32 + 1, 0, data);
    }

    for x in 0..3 {
        let chunk = h.peer.level_chunk(x, 0, Vec::new());
        h.deliver(chunk).await?;
    }

    // the tenth miss flushed the first ten; two remain
    assert_eq!(h.session.stats().miss_backlog, 2);
    assert_eq!(h.session.stats().blobs_received, 10);
    assert_eq!(h.section(ColumnPos::new(2, 0), 2).await.as_deref(), Some(&b"c2"[..]));
    assert!(h.section(ColumnPos::new(2, 0), 3).await.is_none());
    Ok(())
}

/// Two columns miss the same blob before the peer replies. The peer answers
/// both acks, so the blob arrives twice; both deliveries are acknowledged
/// and both columns decode.
#[tokio::test]
async fn test_blob_missed_by_two_columns_resolves_both() -> Result<()> {
    let mut h = Harness::new(true, "1.18.30").await?;
    let shared = h.peer.blob(b"shared-base");

    let first = h.peer.level_chunk(0, 0, vec![shared]);
    let second = h.peer.level_chunk(1, 0, vec![shared]);
    h.session.handle(first).await?;
    h.session.handle(second).await?;
    h.pump().await?;

    let have = Outbound::CacheStatus(CacheStatus::haves(vec![shared]));
    assert_eq!(h.sent.iter().filter(|m| **m == have).count(), 2);
    assert_eq!(h.session.stats().blobs_received, 1);
    for x in 0..2 {
        let pos = ColumnPos::new(x, 0);
        assert_eq!(h.section(pos, 0).await.as_deref(), Some(&b"shared-base"[..]));
        assert_eq!(h.notifications(pos), 2);
    }
    assert_eq!(h.session.cache().want_count(), 0);
    Ok(())
}

/// Sections that share one blob put it in a single miss report.
#[tokio::test]
async fn test_sections_sharing_a_blob_fetch_it_once() -> Result<()> {
    let mut h = Harness::new(true, "1.18.30").await?;
    h.peer.section(0, 1, 0, b"all-air");
    h.peer.section(0, 2, 0, b"all-air");

    let chunk = h.peer.level_chunk(0, 0, Vec::new());
    h.deliver(chunk).await?;
    assert_eq!(h.session.stats().miss_backlog, 1);

    h.session.flush_miss_backlog().await?;
    h.pump().await?;

    let air = BlobHash::of(b"all-air");
    assert!(h
        .sent
        .contains(&Outbound::CacheStatus(CacheStatus::misses(vec![air]))));
    assert_eq!(h.session.stats().blobs_received, 1);
    let pos = ColumnPos::new(0, 0);
    assert_eq!(h.section(pos, 1).await.as_deref(), Some(&b"all-air"[..]));
    assert_eq!(h.section(pos, 2).await.as_deref(), Some(&b"all-air"[..]));
    Ok(())
}
