use crate::*;

use chunkwire_core::ProtocolEra;
use chunkwire_services::{run_session, SessionState, SyncError};
use tokio::sync::{broadcast, mpsc};

// ══════════════════════════════════════════════════════════════════════════════
//  Teardown — closing with work in flight
// ══════════════════════════════════════════════════════════════════════════════

/// Closing while a column waits on blobs drops the want. The blob arriving
/// afterwards is refused and no notification fires for it.
#[tokio::test]
async fn test_close_mid_flight_drops_pending_work() -> Result<()> {
    let mut h = Harness::new(true, "1.18.30").await?;
    let base = h.peer.blob(b"never-decoded");

    let chunk = h.peer.level_chunk(0, 0, vec![base]);
    h.session.handle(chunk).await?;
    // the request goes out, but the peer has not answered yet
    let mut requests = Vec::new();
    while let Ok(message) = h.outbound.try_recv() {
        requests.push(message);
    }
    assert!(requests.contains(&Outbound::CacheStatus(CacheStatus::misses(vec![base]))));
    assert_eq!(h.session.cache().want_count(), 1);

    h.session.close();
    assert_eq!(h.session.state(), SessionState::Closed);
    assert_eq!(h.session.cache().want_count(), 0);
    assert!(h.session.cache().is_empty());

    let late = WorldEvent::CacheMissResponse(CacheMissResponse {
        blobs: vec![MissedBlob {
            hash: base,
            payload: Bytes::from_static(b"never-decoded"),
        }],
    });
    let err = h.session.handle(late).await.unwrap_err();
    assert!(matches!(err, SyncError::SessionClosed));
    assert!(!err.is_fatal());

    // only the commit notification from before the close
    assert_eq!(h.notifications(ColumnPos::new(0, 0)), 1);
    assert!(h.section(ColumnPos::new(0, 0), 0).await.is_none());
    Ok(())
}

/// The event loop closes the session when its inbound stream ends, and the
/// outbound channel closes with it.
#[tokio::test]
async fn test_driver_closes_session_when_stream_ends() -> Result<()> {
    let (transport, mut outbound) = ChannelTransport::pair();
    let store = MemoryColumnStore::new();
    let session = SyncSession::start(
        SyncConfig::default(),
        transport,
        RawSectionDecoder::new(ProtocolEra::SubChunkBatched),
        store.clone(),
    )
    .await?;

    let (event_tx, event_rx) = mpsc::channel(8);
    let (_shutdown_tx, shutdown_rx) = broadcast::channel(1);
    let feed = async move {
        for x in 0..3 {
            event_tx
                .send(WorldEvent::LevelChunk(LevelChunk {
                    x,
                    z: 0,
                    sub_chunk_count: 0,
                    highest_sub_chunk_count: None,
                    blob_hashes: Vec::new(),
                    payload: Bytes::new(),
                }))
                .await?;
        }
        anyhow::Ok(())
    };

    let (fed, stats) = tokio::join!(feed, run_session(session, event_rx, shutdown_rx));
    fed?;
    let stats = stats?;
    assert_eq!(stats.columns_committed, 3);
    assert_eq!(store.len(), 3);

    assert_eq!(outbound.recv().await, Some(Outbound::CachingMode { enabled: true }));
    assert_eq!(outbound.recv().await, None, "transport released on close");
    Ok(())
}
