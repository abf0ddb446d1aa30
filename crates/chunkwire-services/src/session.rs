//! Sync session — drives the blob caching protocol for one connection.
//!
//! A session owns its blob cache, counters and outbound transport. It is
//! fed one `WorldEvent` at a time and runs each to completion before the
//! next, so none of its state needs locking.
//!
//! Column flow with caching on:
//!   level_chunk → decode against cache → report misses → tag pending blobs
//!   → register a want → commit column → notify
//!   cache_miss_response → resolve pending blobs → ack haves → wants fire
//!   → re-decode, which must now report zero misses
//!
//! Wants do not decode inline. Their continuation queues a `Redecode`
//! job, and the session drains the queue at the end of every event.

use bytes::Bytes;
use tokio::sync::mpsc;

use chunkwire_core::config::SyncConfig;
use chunkwire_core::wire::{
    BlockUpdate, CacheMissResponse, CacheStatus, LevelChunk, SectionOffset, SectionOrigin,
    SubChunkBatch, SubChunkRequest, SubChunkResponse,
};
use chunkwire_core::{BlobHash, ColumnPos, Outbound, ProtocolEra, WorldEvent};

use crate::blob_cache::{BlobCache, BlobEntry};
use crate::column::{ChunkColumn, SharedColumn};
use crate::decoder::ChunkDecoder;
use crate::error::SyncError;
use crate::stats::SyncStats;
use crate::store::{ChunkStore, Subscription};
use crate::transport::Transport;

/// Largest vertical offset a sub-chunk request can carry.
const MAX_SECTION_OFFSET: usize = i8::MAX as usize;

/// Called with a column's position whenever its data becomes usable.
pub type ColumnReadyCallback = Box<dyn FnMut(ColumnPos) + Send + Sync>;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionState {
    Active,
    /// A re-decode disagreed with the cache. Every further event is refused.
    Failed,
    Closed,
}

/// Decode work released by a completed want.
enum Redecode {
    Column {
        pos: ColumnPos,
        column: SharedColumn,
        blob_hashes: Vec<BlobHash>,
        payload: Bytes,
    },
    Section {
        pos: ColumnPos,
        y: i32,
        column: SharedColumn,
        hash: BlobHash,
        payload: Bytes,
    },
}

pub struct SyncSession<T, D, S> {
    config: SyncConfig,
    era: ProtocolEra,
    cache: BlobCache,
    transport: Option<T>,
    decoder: D,
    store: S,
    on_column_ready: Option<ColumnReadyCallback>,
    subscriptions: Vec<Subscription>,
    miss_backlog: Vec<BlobHash>,
    stats: SyncStats,
    ready_tx: mpsc::UnboundedSender<Redecode>,
    ready_rx: mpsc::UnboundedReceiver<Redecode>,
    state: SessionState,
}

impl<T, D, S> SyncSession<T, D, S>
where
    T: Transport,
    D: ChunkDecoder,
    S: ChunkStore,
{
    /// Start a session and announce the caching mode to the peer.
    pub async fn start(config: SyncConfig, transport: T, decoder: D, store: S) -> Result<Self, SyncError> {
        let era = config.era()?;
        let (ready_tx, ready_rx) = mpsc::unbounded_channel();

        transport
            .send(Outbound::CachingMode {
                enabled: config.caching_enabled,
            })
            .await?;

        tracing::info!(
            caching = config.caching_enabled,
            version = %config.protocol_version,
            ?era,
            "sync session started"
        );

        Ok(Self {
            config,
            era,
            cache: BlobCache::new(),
            transport: Some(transport),
            decoder,
            store,
            on_column_ready: None,
            subscriptions: Vec::new(),
            miss_backlog: Vec::new(),
            stats: SyncStats::default(),
            ready_tx,
            ready_rx,
            state: SessionState::Active,
        })
    }

    /// Install the column-ready callback, replacing any previous one.
    pub fn on_column_ready<F>(&mut self, callback: F)
    where
        F: FnMut(ColumnPos) + Send + Sync + 'static,
    {
        self.on_column_ready = Some(Box::new(callback));
    }

    /// Keep a store subscription alive until the session closes.
    pub fn hold_subscription(&mut self, subscription: Subscription) {
        self.subscriptions.push(subscription);
    }

    pub fn state(&self) -> SessionState {
        self.state
    }

    pub fn era(&self) -> ProtocolEra {
        self.era
    }

    pub fn caching_enabled(&self) -> bool {
        self.config.caching_enabled
    }

    pub fn cache(&self) -> &BlobCache {
        &self.cache
    }

    pub fn store(&self) -> &S {
        &self.store
    }

    pub fn stats(&self) -> SyncStats {
        SyncStats {
            miss_backlog: self.miss_backlog.len(),
            ..self.stats
        }
    }

    /// Process one inbound event to completion.
    pub async fn handle(&mut self, event: WorldEvent) -> Result<(), SyncError> {
        match self.state {
            SessionState::Active => {}
            SessionState::Failed => return Err(SyncError::SessionFailed),
            SessionState::Closed => return Err(SyncError::SessionClosed),
        }

        let result = match event {
            WorldEvent::LevelChunk(chunk) => self.handle_level_chunk(chunk).await,
            WorldEvent::SubChunk(response) => self.handle_sub_chunk(response).await,
            WorldEvent::SubChunkBatch(batch) => self.handle_sub_chunk_batch(batch).await,
            WorldEvent::CacheMissResponse(response) => self.handle_cache_miss_response(response).await,
            WorldEvent::BlockUpdate(update) => self.handle_block_update(update).await,
        };
        let result = match result {
            Ok(()) => self.run_ready().await,
            Err(e) => Err(e),
        };

        if let Err(e) = &result {
            if e.is_fatal() {
                tracing::error!(error = %e, "sync session failed");
                self.state = SessionState::Failed;
            }
        }
        result
    }

    /// Report every backlogged sub-chunk miss now.
    pub async fn flush_miss_backlog(&mut self) -> Result<(), SyncError> {
        if self.miss_backlog.is_empty() {
            return Ok(());
        }
        let misses = std::mem::take(&mut self.miss_backlog);
        tracing::debug!(count = misses.len(), "flushing sub-chunk miss backlog");
        self.send(Outbound::CacheStatus(CacheStatus::misses(misses))).await
    }

    /// Tear the session down. Queued wants are dropped without running,
    /// the callback and transport are released, counters reset, and held
    /// store subscriptions cancelled. Safe to call more than once.
    pub fn close(&mut self) {
        if self.state == SessionState::Closed {
            return;
        }
        let dropped_wants = self.cache.want_count();
        self.cache.clear();
        while self.ready_rx.try_recv().is_ok() {}
        self.on_column_ready = None;
        self.transport = None;
        self.miss_backlog.clear();
        self.stats = SyncStats::default();
        for subscription in self.subscriptions.drain(..) {
            subscription.cancel();
        }
        self.state = SessionState::Closed;
        tracing::info!(dropped_wants, "sync session closed");
    }

    // ── Full columns ─────────────────────────────────────────────────────────

    async fn handle_level_chunk(&mut self, chunk: LevelChunk) -> Result<(), SyncError> {
        let pos = chunk.pos();
        let column = ChunkColumn::new(pos).into_shared();

        if !self.config.caching_enabled {
            let mut guard = column.lock().await;
            self.decoder
                .decode_full(&mut guard, &chunk.payload, chunk.sub_chunk_count)
                .await?;
        } else {
            let misses = {
                let mut guard = column.lock().await;
                self.decoder
                    .decode_full_with_cache(&mut guard, &chunk.blob_hashes, &self.cache, &chunk.payload)
                    .await?
            };
            if !chunk.blob_hashes.is_empty() {
                self.negotiate_column_blobs(&chunk, &column, misses).await?;
            }
        }

        if chunk.is_request_driven() && self.era.requests_sub_chunks() {
            self.request_sub_chunks(&chunk).await?;
        }

        self.store.set_column(pos, column).await;
        self.stats.columns_committed += 1;
        tracing::debug!(x = pos.x, z = pos.z, "column committed");
        self.notify(pos);
        Ok(())
    }

    async fn negotiate_column_blobs(
        &mut self,
        chunk: &LevelChunk,
        column: &SharedColumn,
        misses: Vec<BlobHash>,
    ) -> Result<(), SyncError> {
        self.send(Outbound::CacheStatus(CacheStatus::misses(misses.clone())))
            .await?;
        if misses.is_empty() {
            return Ok(());
        }

        // Legacy columns put biomes in the final blob; the tag follows the
        // last *miss*, which is what the peer expects us to report.
        let last = misses.len() - 1;
        for (i, hash) in misses.iter().enumerate() {
            let entry = if self.era.last_blob_is_biome() && i == last {
                BlobEntry::biome(chunk.x, chunk.z)
            } else {
                BlobEntry::section(chunk.x, chunk.z, None)
            };
            self.cache.add_pending(*hash, entry);
        }

        tracing::debug!(
            x = chunk.x,
            z = chunk.z,
            misses = misses.len(),
            blobs = chunk.blob_hashes.len(),
            "column waiting on blobs"
        );

        let job = Redecode::Column {
            pos: chunk.pos(),
            column: column.clone(),
            blob_hashes: chunk.blob_hashes.clone(),
            payload: chunk.payload.clone(),
        };
        let ready_tx = self.ready_tx.clone();
        self.cache.once(misses, move || {
            let _ = ready_tx.send(job);
        });
        Ok(())
    }

    async fn request_sub_chunks(&mut self, chunk: &LevelChunk) -> Result<(), SyncError> {
        // Offsets travel as i8.
        let max = self.config.max_sub_chunk_requests.min(MAX_SECTION_OFFSET);
        let highest = chunk
            .highest_sub_chunk_count
            .map(usize::from)
            .unwrap_or(max + 1);
        let count = highest.min(max + 1).saturating_sub(1);
        let Ok(count) = i8::try_from(count) else {
            return Ok(());
        };
        if count == 0 {
            return Ok(());
        }

        match self.era {
            ProtocolEra::SubChunkBatched => {
                let offsets = (1..=count)
                    .map(|dy| SectionOffset { dx: 0, dy, dz: 0 })
                    .collect();
                let request = SubChunkRequest::Batched {
                    origin: SectionOrigin {
                        x: chunk.x,
                        y: 0,
                        z: chunk.z,
                    },
                    offsets,
                };
                self.send(Outbound::SubChunkRequest(request)).await?;
            }
            ProtocolEra::SubChunkSingle => {
                for y in 1..=i32::from(count) {
                    let request = SubChunkRequest::Single {
                        x: chunk.x,
                        y,
                        z: chunk.z,
                    };
                    self.send(Outbound::SubChunkRequest(request)).await?;
                }
            }
            ProtocolEra::Legacy => return Ok(()),
        }

        tracing::trace!(x = chunk.x, z = chunk.z, count, "sub-chunks requested");
        Ok(())
    }

    // ── Sub-chunks ───────────────────────────────────────────────────────────

    async fn handle_sub_chunk_batch(&mut self, batch: SubChunkBatch) -> Result<(), SyncError> {
        for response in batch.into_responses() {
            self.handle_sub_chunk(response).await?;
        }
        Ok(())
    }

    async fn handle_sub_chunk(&mut self, response: SubChunkResponse) -> Result<(), SyncError> {
        if !response.result.is_success() {
            self.stats.lost_sub_chunks += 1;
            tracing::warn!(
                x = response.x,
                y = response.y,
                z = response.z,
                result = ?response.result,
                "sub-chunk lost"
            );
            return Ok(());
        }
        self.stats.found_sub_chunks += 1;

        let pos = ColumnPos::new(response.x, response.z);
        let column = self
            .store
            .get_loaded_column(pos)
            .ok_or(SyncError::UnknownColumn(pos))?;

        match (self.config.caching_enabled, response.blob_id) {
            (true, Some(hash)) => {
                self.load_section_from_cache(pos, response.y, column, hash, response.payload)
                    .await
            }
            _ => {
                {
                    let mut guard = column.lock().await;
                    self.decoder
                        .decode_section_no_cache(&mut guard, response.y, &response.payload)
                        .await?;
                }
                self.notify(pos);
                Ok(())
            }
        }
    }

    /// Decode one section against a single blob, backlogging any miss.
    async fn load_section_from_cache(
        &mut self,
        pos: ColumnPos,
        y: i32,
        column: SharedColumn,
        hash: BlobHash,
        payload: Bytes,
    ) -> Result<(), SyncError> {
        let misses = {
            let mut guard = column.lock().await;
            self.decoder
                .decode_section_with_cache(&mut guard, y, &[hash], &self.cache, &payload)
                .await?
        };
        if misses.is_empty() {
            self.notify(pos);
            return Ok(());
        }

        // A hash that is already pending has been reported once; report it again
        // and the peer sends it twice.
        for miss in &misses {
            if self.cache.is_pending(miss) {
                continue;
            }
            self.cache
                .add_pending(*miss, BlobEntry::section(pos.x, pos.z, Some(y)));
            self.miss_backlog.push(*miss);
        }
        tracing::trace!(x = pos.x, y, z = pos.z, %hash, backlog = self.miss_backlog.len(), "section blob missing");

        if self.miss_backlog.len() >= self.config.miss_flush_threshold {
            self.flush_miss_backlog().await?;
        }

        let job = Redecode::Section {
            pos,
            y,
            column,
            hash,
            payload,
        };
        let ready_tx = self.ready_tx.clone();
        self.cache.once(misses, move || {
            let _ = ready_tx.send(job);
        });
        Ok(())
    }

    // ── Blob delivery ────────────────────────────────────────────────────────

    /// Resolve every blob in the packet, ack the ones we now hold and run the
    /// re-decodes they release. An unsolicited blob does not stop the rest of
    /// the packet; the first one is returned once the packet is processed.
    async fn handle_cache_miss_response(&mut self, response: CacheMissResponse) -> Result<(), SyncError> {
        let mut haves = Vec::with_capacity(response.blobs.len());
        let mut unsolicited = None;
        for blob in response.blobs {
            // Two wants that missed the same hash get it delivered twice.
            if self.cache.has(&blob.hash) {
                tracing::trace!(hash = %blob.hash, "blob already resolved");
                haves.push(blob.hash);
                continue;
            }
            match self.cache.update_pending(blob.hash, blob.payload) {
                Ok(()) => {
                    self.stats.blobs_received += 1;
                    haves.push(blob.hash);
                }
                Err(e) => {
                    tracing::warn!(hash = %blob.hash, "unsolicited blob dropped");
                    unsolicited.get_or_insert(e);
                }
            }
        }
        tracing::debug!(count = haves.len(), "blobs received");
        if !haves.is_empty() {
            self.send(Outbound::CacheStatus(CacheStatus::haves(haves))).await?;
        }
        self.run_ready().await?;
        match unsolicited {
            Some(e) => Err(e.into()),
            None => Ok(()),
        }
    }

    /// Re-decode everything whose wants completed. A re-decode that still
    /// misses blobs means the cache has diverged from the peer's.
    async fn run_ready(&mut self) -> Result<(), SyncError> {
        while let Ok(job) = self.ready_rx.try_recv() {
            match job {
                Redecode::Column {
                    pos,
                    column,
                    blob_hashes,
                    payload,
                } => {
                    let misses = {
                        let mut guard = column.lock().await;
                        self.decoder
                            .decode_full_with_cache(&mut guard, &blob_hashes, &self.cache, &payload)
                            .await?
                    };
                    if !misses.is_empty() {
                        return Err(SyncError::CacheDiverged { pos, misses });
                    }
                    tracing::debug!(x = pos.x, z = pos.z, "column blobs resolved");
                    self.notify(pos);
                }
                Redecode::Section {
                    pos,
                    y,
                    column,
                    hash,
                    payload,
                } => {
                    let misses = {
                        let mut guard = column.lock().await;
                        self.decoder
                            .decode_section_with_cache(&mut guard, y, &[hash], &self.cache, &payload)
                            .await?
                    };
                    if !misses.is_empty() {
                        return Err(SyncError::CacheDiverged { pos, misses });
                    }
                    self.notify(pos);
                }
            }
        }
        Ok(())
    }

    // ── Block updates ────────────────────────────────────────────────────────

    async fn handle_block_update(&mut self, update: BlockUpdate) -> Result<(), SyncError> {
        let Some(column) = self.store.get_loaded_column_at(update.position) else {
            tracing::warn!(
                x = update.position.x,
                y = update.position.y,
                z = update.position.z,
                "block update for unloaded column dropped"
            );
            return Ok(());
        };
        column
            .lock()
            .await
            .set_block(update.position, update.runtime_id);
        self.notify(update.position.column());
        Ok(())
    }

    // ── Helpers ──────────────────────────────────────────────────────────────

    async fn send(&self, message: Outbound) -> Result<(), SyncError> {
        let transport = self.transport.as_ref().ok_or(SyncError::SessionClosed)?;
        transport.send(message).await?;
        Ok(())
    }

    fn notify(&mut self, pos: ColumnPos) {
        if let Some(callback) = self.on_column_ready.as_mut() {
            callback(pos);
        }
    }
}
