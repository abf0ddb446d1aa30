//! chunkwire-replay — feed a recorded event log through one sync session.
//!
//! Usage: chunkwire-replay [events.jsonl]
//!
//! Reads one JSON `WorldEvent` per line (stdin when no path is given),
//! prints every outbound message as a JSON line, then the final counters.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use anyhow::{Context, Result};
use tokio::io::{AsyncBufRead, AsyncBufReadExt, BufReader};
use tokio::sync::{broadcast, mpsc};

use chunkwire_core::config::SyncConfig;
use chunkwire_core::WorldEvent;
use chunkwire_services::{run_session, ChannelTransport, MemoryColumnStore, RawSectionDecoder, SyncSession};

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_writer(std::io::stderr)
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .init();

    let config = SyncConfig::load().context("failed to load config")?;
    let era = config.era()?;
    tracing::info!(
        caching = config.caching_enabled,
        version = %config.protocol_version,
        "chunkwire-replay starting"
    );

    let (transport, mut outbound) = ChannelTransport::pair();
    let store = MemoryColumnStore::new();
    let mut session = SyncSession::start(config, transport, RawSectionDecoder::new(era), store.clone())
        .await
        .context("failed to start session")?;

    let ready_count = Arc::new(AtomicU64::new(0));
    let counter = ready_count.clone();
    session.on_column_ready(move |_| {
        counter.fetch_add(1, Ordering::Relaxed);
    });

    let (event_tx, event_rx) = mpsc::channel(64);
    let (_shutdown_tx, shutdown_rx) = broadcast::channel(1);

    let feed = async move {
        let result = match std::env::args().nth(1) {
            Some(path) => {
                let file = tokio::fs::File::open(&path)
                    .await
                    .with_context(|| format!("failed to open {path}"))?;
                feed_events(BufReader::new(file), &event_tx).await
            }
            None => feed_events(BufReader::new(tokio::io::stdin()), &event_tx).await,
        };
        drop(event_tx);
        result
    };

    let print = async move {
        while let Some(message) = outbound.recv().await {
            match serde_json::to_string(&message) {
                Ok(line) => println!("{line}"),
                Err(e) => tracing::warn!(error = %e, "failed to serialize outbound message"),
            }
        }
    };

    let (fed, stats, ()) = tokio::join!(feed, run_session(session, event_rx, shutdown_rx), print);
    let fed = fed?;
    let stats = stats.context("session ended with a fatal error")?;

    tracing::info!(
        events = fed,
        columns = store.len(),
        notifications = ready_count.load(Ordering::Relaxed),
        "replay finished"
    );
    println!("{}", serde_json::to_string(&stats)?);
    Ok(())
}

/// Send every event in `reader` to the session. Returns how many were sent.
async fn feed_events<R>(reader: R, tx: &mpsc::Sender<WorldEvent>) -> Result<u64>
where
    R: AsyncBufRead + Unpin,
{
    let mut lines = reader.lines();
    let mut sent = 0u64;
    let mut line_no = 0u64;
    while let Some(line) = lines.next_line().await.context("failed to read event log")? {
        line_no += 1;
        let Some(event) = parse_line(&line).with_context(|| format!("bad event on line {line_no}"))? else {
            continue;
        };
        if tx.send(event).await.is_err() {
            tracing::warn!(line_no, "session stopped before the log was exhausted");
            break;
        }
        sent += 1;
    }
    Ok(sent)
}

/// Parse one log line. Blank lines and `#` comments yield `None`.
fn parse_line(line: &str) -> Result<Option<WorldEvent>> {
    let line = line.trim();
    if line.is_empty() || line.starts_with('#') {
        return Ok(None);
    }
    Ok(Some(serde_json::from_str(line)?))
}
