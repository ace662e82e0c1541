//! Per-transfer piece accumulation state machine.

use std::path::PathBuf;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use chrono::Utc;
use tracing::{debug, info, warn};

use chunkferry_protocol::{
    ChunkHeader, ChunkResponse, EXPIRY_GUARD_MILLIS, ErrorReason, DEFAULT_MAX_FILE_SIZE,
};
use chunkferry_store::{PieceRecord, PieceStore, StoreError};

use crate::{BlobStore, ExpiryMonitor, ReceiverError};

/// One decoded chunk as delivered by the wire layer.
#[derive(Debug, Clone)]
pub struct InboundChunk {
    pub header: ChunkHeader,
    pub payload: Vec<u8>,
}

/// Maps a transfer's file name to its destination path on the receiver.
pub type PathResolver = Arc<dyn Fn(&str) -> PathBuf + Send + Sync>;

/// Receiver behavior knobs.
pub struct ReceiverConfig {
    resolve_path: PathResolver,
    max_file_size: u64,
    chunk_expiry: Duration,
    flakiness: f64,
}

impl ReceiverConfig {
    /// Creates a config with the given destination resolver and defaults
    /// for everything else (256 MiB size cap, no expiry, no flakiness).
    pub fn new(resolve_path: impl Fn(&str) -> PathBuf + Send + Sync + 'static) -> Self {
        Self {
            resolve_path: Arc::new(resolve_path),
            max_file_size: DEFAULT_MAX_FILE_SIZE,
            chunk_expiry: Duration::ZERO,
            flakiness: 0.0,
        }
    }

    pub fn with_max_file_size(mut self, max_file_size: u64) -> Self {
        self.max_file_size = max_file_size;
        self
    }

    /// Window of inactivity after which a transfer's pieces are discarded.
    /// Zero disables expiry.
    pub fn with_chunk_expiry(mut self, chunk_expiry: Duration) -> Self {
        self.chunk_expiry = chunk_expiry;
        self
    }

    /// Test aid: fraction of chunks to reject with an induced failure.
    pub fn with_flakiness(mut self, flakiness: f64) -> Self {
        self.flakiness = flakiness;
        self
    }
}

/// Consumes inbound piece writes and drives each transfer from accumulation
/// to assembly.
///
/// State machine per transfer: `New → Receiving → {Complete | Expired}`,
/// where `New` is implicit (no store record) and `Expired` transfers may
/// re-enter `Receiving` when pieces arrive again.
pub struct ReceiverEngine {
    store: Arc<dyn PieceStore>,
    blob: Arc<dyn BlobStore>,
    config: ReceiverConfig,
    monitor: ExpiryMonitor,
    flake_debt: Mutex<f64>,
}

impl ReceiverEngine {
    pub fn new(
        store: Arc<dyn PieceStore>,
        blob: Arc<dyn BlobStore>,
        config: ReceiverConfig,
    ) -> Self {
        let monitor = ExpiryMonitor::new(Arc::clone(&store), Arc::clone(&blob));
        Self {
            store,
            blob,
            config,
            monitor,
            flake_debt: Mutex::new(0.0),
        }
    }

    /// The engine's expiry monitor, exposed for host shutdown and tests.
    pub fn monitor(&self) -> &ExpiryMonitor {
        &self.monitor
    }

    /// Processes one inbound piece and reports the transfer's state.
    ///
    /// Protocol rejections come back as `Ok(ChunkResponse::Error { .. })`;
    /// an `Err` means the wire layer should answer with an internal error.
    pub async fn handle_chunk(&self, chunk: InboundChunk) -> Result<ChunkResponse, ReceiverError> {
        let ChunkHeader {
            file_name,
            num_parts,
            part_num,
            upload_id,
        } = &chunk.header;

        // A declared zero-byte file skips the piece machinery entirely.
        if *num_parts == 0 {
            let dest = (self.config.resolve_path)(file_name);
            self.blob
                .concatenate(&[], &dest)
                .await
                .map_err(|e| ReceiverError::Assembly(e.to_string()))?;
            info!(upload_id = %upload_id, path = %dest.display(), "zero-byte transfer complete");
            return Ok(ChunkResponse::Complete {
                path: dest.to_string_lossy().into_owned(),
            });
        }

        let chunk_len = chunk.payload.len() as u64;
        if self.exceeds_max_size(upload_id, *num_parts, part_num, chunk_len).await? {
            warn!(upload_id = %upload_id, part_num, "max file size exceeded");
            return Ok(ChunkResponse::Error {
                reason: ErrorReason::SizeExceeded,
            });
        }

        if self.induced_failure() {
            return Ok(ChunkResponse::Error {
                reason: ErrorReason::InducedFailure,
            });
        }

        // Persist the bytes first, then the metadata that makes them
        // reachable.
        let location = self.blob.write(&chunk.payload).await?;
        self.store
            .set_piece(
                upload_id,
                *part_num,
                PieceRecord {
                    location,
                    len: chunk_len,
                },
            )
            .await?;
        self.store.set_update_time(upload_id, Utc::now()).await?;
        self.store
            .set_chunk_expiry(upload_id, self.config.chunk_expiry)
            .await?;

        if !self.config.chunk_expiry.is_zero() {
            let delay = self.config.chunk_expiry + Duration::from_millis(EXPIRY_GUARD_MILLIS);
            self.monitor.schedule(upload_id, delay);
        }

        let pieces = self.store.get_all_pieces(upload_id).await?;
        debug!(upload_id = %upload_id, part_num, stored = pieces.len(), "piece stored");

        if pieces.len() as u32 == *num_parts {
            self.assemble(upload_id, file_name, *num_parts).await
        } else {
            Ok(ChunkResponse::partial(pieces.into_keys()))
        }
    }

    /// Running-total size admission, with the first-chunk extrapolation kept
    /// as a fast path. The stored per-piece lengths make this exact without
    /// consulting the blob store.
    async fn exceeds_max_size(
        &self,
        upload_id: &str,
        num_parts: u32,
        part_num: &u32,
        chunk_len: u64,
    ) -> Result<bool, ReceiverError> {
        let max = self.config.max_file_size;
        if chunk_len.saturating_mul(num_parts.saturating_sub(1) as u64) > max {
            return Ok(true);
        }

        let stored: u64 = match self.store.get_all_pieces(upload_id).await {
            Ok(pieces) => pieces
                .iter()
                .filter(|(part, _)| *part != part_num)
                .map(|(_, record)| record.len)
                .sum(),
            Err(StoreError::NotFound(_)) => 0,
            Err(e) => return Err(e.into()),
        };
        Ok(stored.saturating_add(chunk_len) > max)
    }

    fn induced_failure(&self) -> bool {
        if self.config.flakiness <= 0.0 {
            return false;
        }
        let mut debt = self.flake_debt.lock().unwrap();
        *debt += self.config.flakiness;
        if *debt >= 1.0 {
            *debt -= 1.0;
            true
        } else {
            false
        }
    }

    async fn assemble(
        &self,
        upload_id: &str,
        file_name: &str,
        num_parts: u32,
    ) -> Result<ChunkResponse, ReceiverError> {
        let pieces = self.store.get_all_pieces(upload_id).await?;
        let mut locations = Vec::with_capacity(num_parts as usize);
        for part in 0..num_parts {
            let record = pieces.get(&part).ok_or_else(|| {
                ReceiverError::Assembly(format!("piece {part} missing at assembly"))
            })?;
            locations.push(record.location.clone());
        }

        let dest = (self.config.resolve_path)(file_name);
        self.blob
            .concatenate(&locations, &dest)
            .await
            .map_err(|e| ReceiverError::Assembly(e.to_string()))?;

        // The assembled output is durable; piece cleanup failures must not
        // turn this into a reported failure.
        for location in &locations {
            if let Err(e) = self.blob.delete(location).await {
                warn!(location = %location, error = %e, "failed to delete assembled piece");
            }
        }
        self.monitor.cancel(upload_id);
        self.store.expire_transfer(upload_id).await?;

        info!(
            upload_id = %upload_id,
            parts = num_parts,
            path = %dest.display(),
            "transfer assembled"
        );
        Ok(ChunkResponse::Complete {
            path: dest.to_string_lossy().into_owned(),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::DiskBlobStore;
    use chunkferry_store::MemoryStore;
    use tempfile::TempDir;

    fn engine(dir: &TempDir, config: ReceiverConfig) -> ReceiverEngine {
        let store: Arc<dyn PieceStore> = Arc::new(MemoryStore::new());
        let blob: Arc<dyn BlobStore> = Arc::new(DiskBlobStore::new(dir.path().join("spool")));
        ReceiverEngine::new(store, blob, config)
    }

    fn out_resolver(dir: &TempDir) -> impl Fn(&str) -> PathBuf + Send + Sync + use<> {
        let out = dir.path().join("out");
        move |name: &str| out.join(name)
    }

    fn chunk(upload_id: &str, part_num: u32, num_parts: u32, payload: &[u8]) -> InboundChunk {
        InboundChunk {
            header: ChunkHeader {
                file_name: "file.bin".into(),
                num_parts,
                part_num,
                upload_id: upload_id.into(),
            },
            payload: payload.to_vec(),
        }
    }

    #[tokio::test]
    async fn pieces_assemble_in_part_order_regardless_of_arrival() {
        let dir = TempDir::new().unwrap();
        let engine = engine(&dir, ReceiverConfig::new(out_resolver(&dir)));

        let resp = engine.handle_chunk(chunk("u1", 2, 3, b"CC")).await.unwrap();
        assert_eq!(resp, ChunkResponse::partial([2]));

        let resp = engine.handle_chunk(chunk("u1", 0, 3, b"AA")).await.unwrap();
        assert_eq!(resp, ChunkResponse::partial([0, 2]));

        let resp = engine.handle_chunk(chunk("u1", 1, 3, b"BB")).await.unwrap();
        let ChunkResponse::Complete { path } = resp else {
            panic!("expected completion, got {resp:?}");
        };

        let assembled = tokio::fs::read(&path).await.unwrap();
        assert_eq!(&assembled, b"AABBCC");
    }

    #[tokio::test]
    async fn duplicate_piece_does_not_inflate_the_count() {
        let dir = TempDir::new().unwrap();
        let engine = engine(&dir, ReceiverConfig::new(out_resolver(&dir)));

        engine.handle_chunk(chunk("u1", 0, 2, b"AA")).await.unwrap();
        let resp = engine.handle_chunk(chunk("u1", 0, 2, b"AA")).await.unwrap();
        // Still waiting on part 1; the resend must not complete the transfer.
        assert_eq!(resp, ChunkResponse::partial([0]));

        let resp = engine.handle_chunk(chunk("u1", 1, 2, b"BB")).await.unwrap();
        assert!(matches!(resp, ChunkResponse::Complete { .. }));
    }

    #[tokio::test]
    async fn zero_byte_transfer_completes_immediately() {
        let dir = TempDir::new().unwrap();
        let engine = engine(&dir, ReceiverConfig::new(out_resolver(&dir)));

        let resp = engine.handle_chunk(chunk("u1", 0, 0, b"")).await.unwrap();
        let ChunkResponse::Complete { path } = resp else {
            panic!("expected completion");
        };
        assert_eq!(tokio::fs::metadata(&path).await.unwrap().len(), 0);
    }

    #[tokio::test]
    async fn piece_blobs_are_deleted_after_assembly() {
        let dir = TempDir::new().unwrap();
        let engine = engine(&dir, ReceiverConfig::new(out_resolver(&dir)));

        engine.handle_chunk(chunk("u1", 0, 2, b"AA")).await.unwrap();
        engine.handle_chunk(chunk("u1", 1, 2, b"BB")).await.unwrap();

        let spool = dir.path().join("spool");
        let mut entries = tokio::fs::read_dir(&spool).await.unwrap();
        assert!(entries.next_entry().await.unwrap().is_none());
    }

    #[tokio::test]
    async fn extrapolated_size_rejects_first_chunk() {
        let dir = TempDir::new().unwrap();
        let config = ReceiverConfig::new(out_resolver(&dir)).with_max_file_size(10);
        let engine = engine(&dir, config);

        // 6-byte chunks, 3 parts: 6 * (3 - 1) = 12 > 10.
        let resp = engine
            .handle_chunk(chunk("u1", 0, 3, b"AAAAAA"))
            .await
            .unwrap();
        assert_eq!(
            resp,
            ChunkResponse::Error {
                reason: ErrorReason::SizeExceeded
            }
        );
        assert_eq!(
            engine.store.get_num_pieces("u1").await.unwrap(),
            0,
            "rejected chunk must not be persisted"
        );
    }

    #[tokio::test]
    async fn running_total_rejects_even_small_chunks() {
        let dir = TempDir::new().unwrap();
        let config = ReceiverConfig::new(out_resolver(&dir)).with_max_file_size(10);
        let engine = engine(&dir, config);

        // Individually unsuspicious 4-byte chunks; the third pushes the
        // running total to 12.
        engine.handle_chunk(chunk("u1", 0, 4, b"AAAA")).await.unwrap();
        engine.handle_chunk(chunk("u1", 1, 4, b"BBBB")).await.unwrap();
        let resp = engine.handle_chunk(chunk("u1", 2, 4, b"CCCC")).await.unwrap();
        assert_eq!(
            resp,
            ChunkResponse::Error {
                reason: ErrorReason::SizeExceeded
            }
        );
    }

    #[tokio::test]
    async fn resent_piece_is_not_double_counted_by_size_admission() {
        let dir = TempDir::new().unwrap();
        let config = ReceiverConfig::new(out_resolver(&dir)).with_max_file_size(10);
        let engine = engine(&dir, config);

        engine.handle_chunk(chunk("u1", 0, 2, b"AAAAA")).await.unwrap();
        // Resending part 0 replaces its recorded length; 5 + 5 stays at 10.
        let resp = engine
            .handle_chunk(chunk("u1", 0, 2, b"AAAAA"))
            .await
            .unwrap();
        assert_eq!(resp, ChunkResponse::partial([0]));
    }

    #[tokio::test]
    async fn flakiness_rejects_a_deterministic_fraction() {
        let dir = TempDir::new().unwrap();
        let config = ReceiverConfig::new(out_resolver(&dir)).with_flakiness(0.5);
        let engine = engine(&dir, config);

        let mut induced = 0;
        for part in 0..4 {
            let resp = engine
                .handle_chunk(chunk("u1", part, 8, b"XX"))
                .await
                .unwrap();
            if resp
                == (ChunkResponse::Error {
                    reason: ErrorReason::InducedFailure,
                })
            {
                induced += 1;
            }
        }
        assert_eq!(induced, 2);
    }

    #[tokio::test]
    async fn expiry_then_redelivery_still_assembles() {
        let dir = TempDir::new().unwrap();
        let config =
            ReceiverConfig::new(out_resolver(&dir)).with_chunk_expiry(Duration::from_millis(30));
        let engine = engine(&dir, config);

        engine.handle_chunk(chunk("u1", 0, 3, b"AA")).await.unwrap();
        engine.handle_chunk(chunk("u1", 1, 3, b"BB")).await.unwrap();

        // Let the scheduled check evict the stale pieces.
        tokio::time::sleep(Duration::from_millis(100)).await;
        assert_eq!(engine.store.get_num_pieces("u1").await.unwrap(), 0);

        // Re-delivery restarts accumulation and completes normally.
        engine.handle_chunk(chunk("u1", 0, 3, b"AA")).await.unwrap();
        engine.handle_chunk(chunk("u1", 1, 3, b"BB")).await.unwrap();
        let resp = engine.handle_chunk(chunk("u1", 2, 3, b"CC")).await.unwrap();
        let ChunkResponse::Complete { path } = resp else {
            panic!("expected completion after redelivery");
        };
        assert_eq!(tokio::fs::read(&path).await.unwrap(), b"AABBCC");
    }

    #[tokio::test]
    async fn steady_arrival_keeps_transfer_alive() {
        let dir = TempDir::new().unwrap();
        let config =
            ReceiverConfig::new(out_resolver(&dir)).with_chunk_expiry(Duration::from_millis(60));
        let engine = engine(&dir, config);

        // Each write lands well inside the previous expiry window.
        for part in 0..3 {
            engine
                .handle_chunk(chunk("u1", part, 4, b"XX"))
                .await
                .unwrap();
            tokio::time::sleep(Duration::from_millis(20)).await;
        }
        assert_eq!(engine.store.get_num_pieces("u1").await.unwrap(), 3);
    }
}
