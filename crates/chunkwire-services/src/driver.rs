//! Per-connection event loop.
//!
//! Pulls events off the connection's inbound channel one at a time and
//! hands each to the session. Stops on shutdown, when the channel closes,
//! or when the session hits a fatal error, and always tears down first.

use chunkwire_core::WorldEvent;
use tokio::sync::{broadcast, mpsc};

use crate::decoder::ChunkDecoder;
use crate::error::SyncError;
use crate::session::SyncSession;
use crate::stats::SyncStats;
use crate::store::ChunkStore;
use crate::transport::Transport;

/// Run `session` until its event stream ends. Returns the counters as they
/// stood just before teardown, or the fatal error that ended the session.
///
/// Non-fatal errors (decode failures, sequencing errors) are logged and the
/// loop moves on to the next event.
pub async fn run_session<T, D, S>(
    mut session: SyncSession<T, D, S>,
    mut events: mpsc::Receiver<WorldEvent>,
    mut shutdown: broadcast::Receiver<()>,
) -> Result<SyncStats, SyncError>
where
    T: Transport,
    D: ChunkDecoder,
    S: ChunkStore,
{
    let outcome = loop {
        tokio::select! {
            _ = shutdown.recv() => {
                tracing::info!("sync loop shutting down");
                break Ok(session.stats());
            }
            event = events.recv() => {
                let Some(event) = event else {
                    tracing::debug!("event stream closed");
                    break Ok(session.stats());
                };
                match session.handle(event).await {
                    Ok(()) => {}
                    Err(e) if e.is_fatal() => break Err(e),
                    Err(e) => tracing::warn!(error = %e, "event handling failed"),
                }
            }
        }
    };

    session.close();
    outcome
}
