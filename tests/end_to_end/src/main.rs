fn main() {
    println!("Run `cargo test -p end-to-end` to execute sender/receiver integration tests.");
}

#[cfg(test)]
mod tests {
    use std::path::PathBuf;
    use std::sync::Arc;
    use std::sync::atomic::{AtomicU64, Ordering};
    use std::time::Duration;

    use tempfile::TempDir;

    use chunkferry_protocol::{ChunkHeader, ChunkResponse, ErrorReason};
    use chunkferry_receiver::{
        BlobStore, DiskBlobStore, InboundChunk, ReceiverConfig, ReceiverEngine,
    };
    use chunkferry_sender::{
        BoxFuture, ChunkRequest, ChunkTransport, SenderConfig, TransportError, UploadFailure,
        UploadOutcome, Uploader, file_checksum,
    };
    use chunkferry_store::{LocalLockService, MemoryKv, MemoryStore, PieceStore, SharedStore};

    /// In-process wire: hands each outbound chunk straight to a receiver
    /// engine, the way an HTTP layer would after decoding the request.
    struct Loopback {
        engine: ReceiverEngine,
    }

    impl ChunkTransport for Loopback {
        fn send_chunk<'a>(
            &'a self,
            request: ChunkRequest,
        ) -> BoxFuture<'a, Result<ChunkResponse, TransportError>> {
            Box::pin(async move {
                let header = ChunkHeader::from_wire(&request.headers)
                    .map_err(|e| TransportError(e.to_string()))?;
                self.engine
                    .handle_chunk(InboundChunk {
                        header,
                        payload: request.body,
                    })
                    .await
                    .map_err(|e| TransportError(e.to_string()))
            })
        }
    }

    fn receiver(dir: &TempDir, config_fn: impl FnOnce(ReceiverConfig) -> ReceiverConfig) -> Loopback {
        let out = dir.path().join("received");
        let config = config_fn(ReceiverConfig::new(move |name: &str| out.join(name)));
        let store: Arc<dyn PieceStore> = Arc::new(MemoryStore::new());
        let blob: Arc<dyn BlobStore> = Arc::new(DiskBlobStore::new(dir.path().join("spool")));
        Loopback {
            engine: ReceiverEngine::new(store, blob, config),
        }
    }

    fn source_file(dir: &TempDir, data: &[u8]) -> PathBuf {
        let path = dir.path().join("source.bin");
        std::fs::write(&path, data).unwrap();
        path
    }

    async fn assert_completed(outcome: UploadOutcome, source: &PathBuf) -> String {
        let UploadOutcome::Completed { response } = outcome else {
            panic!("expected completion, got {outcome:?}");
        };
        let ChunkResponse::Complete { path } = response else {
            panic!("expected complete response, got {response:?}");
        };
        assert_eq!(
            file_checksum(source).unwrap(),
            file_checksum(std::path::Path::new(&path)).unwrap(),
            "assembled file differs from source"
        );
        path
    }

    #[tokio::test]
    async fn roundtrip_across_chunk_sizes() {
        let data: Vec<u8> = (0..2000u32).map(|i| (i % 251) as u8).collect();

        for chunk_size in [1, 7, 512, 2000, 5000] {
            let dir = TempDir::new().unwrap();
            let source = source_file(&dir, &data);
            let transport = Arc::new(receiver(&dir, |c| c));

            let uploader = Uploader::new(
                SenderConfig::new("loopback://receiver").with_chunk_size(chunk_size),
            );
            let outcome = uploader.run(&source, transport).await.unwrap();
            assert_completed(outcome, &source).await;
        }
    }

    #[tokio::test]
    async fn zero_byte_roundtrip() {
        let dir = TempDir::new().unwrap();
        let source = source_file(&dir, b"");
        let transport = Arc::new(receiver(&dir, |c| c));

        let uploader = Uploader::new(SenderConfig::new("loopback://receiver"));
        let outcome = uploader.run(&source, transport).await.unwrap();
        let path = assert_completed(outcome, &source).await;
        assert_eq!(
            tokio::fs::metadata(&path).await.unwrap().len(),
            0
        );
    }

    #[tokio::test]
    async fn receiver_flakiness_is_absorbed_by_retries() {
        let dir = TempDir::new().unwrap();
        let data = vec![0xA5u8; 600];
        let source = source_file(&dir, &data);
        let transport = Arc::new(receiver(&dir, |c| c.with_flakiness(0.5)));

        let uploader = Uploader::new(
            SenderConfig::new("loopback://receiver")
                .with_chunk_size(64)
                .with_max_retries(20),
        );
        let outcome = uploader.run(&source, transport).await.unwrap();
        assert_completed(outcome, &source).await;
    }

    #[tokio::test]
    async fn sender_flakiness_is_absorbed_by_retries() {
        let dir = TempDir::new().unwrap();
        let data = vec![0x5Au8; 600];
        let source = source_file(&dir, &data);
        let transport = Arc::new(receiver(&dir, |c| c));

        let uploader = Uploader::new(
            SenderConfig::new("loopback://receiver")
                .with_chunk_size(64)
                .with_flakiness(0.3)
                .with_max_retries(20),
        );
        let outcome = uploader.run(&source, transport).await.unwrap();
        assert_completed(outcome, &source).await;
    }

    #[tokio::test]
    async fn oversized_file_is_rejected_not_retried() {
        let dir = TempDir::new().unwrap();
        let source = source_file(&dir, &vec![0u8; 4096]);
        let transport = Arc::new(receiver(&dir, |c| c.with_max_file_size(1024)));

        let uploader = Uploader::new(
            SenderConfig::new("loopback://receiver").with_chunk_size(512),
        );
        let outcome = uploader.run(&source, transport).await.unwrap();

        let UploadOutcome::Failed { reason } = outcome else {
            panic!("expected rejection, got {outcome:?}");
        };
        assert_eq!(reason, UploadFailure::Rejected(ErrorReason::SizeExceeded));
    }

    #[tokio::test]
    async fn dead_sender_drains_incomplete() {
        let dir = TempDir::new().unwrap();
        let source = source_file(&dir, &vec![1u8; 300]);
        let transport = Arc::new(receiver(&dir, |c| c));

        let uploader = Uploader::new(
            SenderConfig::new("loopback://receiver")
                .with_chunk_size(64)
                .with_num_parallel(1)
                .with_max_retries(1)
                .with_fail_after(2),
        );
        let outcome = uploader.run(&source, transport).await.unwrap();

        let UploadOutcome::Failed { reason } = outcome else {
            panic!("expected failure, got {outcome:?}");
        };
        assert_eq!(reason, UploadFailure::Incomplete);
    }

    /// Stalls the second send long enough for the receiver's expiry window
    /// to pass, so a piece acknowledged early vanishes mid-upload.
    struct StallSecondSend {
        inner: Loopback,
        stall: Duration,
        calls: AtomicU64,
    }

    impl ChunkTransport for StallSecondSend {
        fn send_chunk<'a>(
            &'a self,
            request: ChunkRequest,
        ) -> BoxFuture<'a, Result<ChunkResponse, TransportError>> {
            Box::pin(async move {
                if self.calls.fetch_add(1, Ordering::SeqCst) == 1 {
                    tokio::time::sleep(self.stall).await;
                }
                self.inner.send_chunk(request).await
            })
        }
    }

    #[tokio::test]
    async fn expired_pieces_are_detected_and_resent() {
        let dir = TempDir::new().unwrap();
        let data: Vec<u8> = (0..192u8).collect();
        let source = source_file(&dir, &data);

        let transport = Arc::new(StallSecondSend {
            inner: receiver(&dir, |c| c.with_chunk_expiry(Duration::from_millis(40))),
            stall: Duration::from_millis(120),
            calls: AtomicU64::new(0),
        });

        let uploader = Uploader::new(
            SenderConfig::new("loopback://receiver")
                .with_chunk_size(64)
                .with_num_parallel(1)
                .with_max_retries(20),
        );
        let outcome = uploader.run(&source, transport).await.unwrap();
        assert_completed(outcome, &source).await;
    }

    #[tokio::test]
    async fn cancellation_mid_upload() {
        let dir = TempDir::new().unwrap();
        let source = source_file(&dir, &vec![2u8; 1000]);
        let transport = Arc::new(StallSecondSend {
            inner: receiver(&dir, |c| c),
            stall: Duration::from_secs(60),
            calls: AtomicU64::new(0),
        });

        let uploader = Arc::new(Uploader::new(
            SenderConfig::new("loopback://receiver")
                .with_chunk_size(64)
                .with_num_parallel(1),
        ));
        let cancel = uploader.cancel_handle();
        let task = tokio::spawn({
            let uploader = Arc::clone(&uploader);
            async move { uploader.run(&source, transport).await }
        });

        tokio::time::sleep(Duration::from_millis(50)).await;
        cancel.cancel();

        let outcome = task.await.unwrap().unwrap();
        assert!(matches!(outcome, UploadOutcome::Cancelled));
    }

    #[tokio::test]
    async fn roundtrip_over_shared_store_backend() {
        let dir = TempDir::new().unwrap();
        let data: Vec<u8> = (0..1500u32).map(|i| (i % 201) as u8).collect();
        let source = source_file(&dir, &data);

        let out = dir.path().join("received");
        let store: Arc<dyn PieceStore> = Arc::new(SharedStore::new(
            Arc::new(MemoryKv::new()),
            Arc::new(LocalLockService::new()),
        ));
        let blob: Arc<dyn BlobStore> = Arc::new(DiskBlobStore::new(dir.path().join("spool")));
        let transport = Arc::new(Loopback {
            engine: ReceiverEngine::new(
                store,
                blob,
                ReceiverConfig::new(move |name: &str| out.join(name)),
            ),
        });

        let uploader = Uploader::new(
            SenderConfig::new("loopback://receiver")
                .with_chunk_size(128)
                .with_num_parallel(4),
        );
        let outcome = uploader.run(&source, transport).await.unwrap();
        assert_completed(outcome, &source).await;
    }
}
