//! Receiver-side piece accumulation and file assembly.
//!
//! The wire layer decodes each inbound chunk into an [`InboundChunk`] and
//! hands it to [`ReceiverEngine::handle_chunk`], which drives the
//! per-transfer state machine: accumulate pieces through a
//! [`PieceStore`](chunkferry_store::PieceStore), assemble the file through a
//! [`BlobStore`] once every part arrived, and evict stale transfers through
//! the [`ExpiryMonitor`].

mod blob;
mod engine;
mod expiry;

pub use blob::{BlobError, BlobStore, DiskBlobStore};
pub use engine::{InboundChunk, PathResolver, ReceiverConfig, ReceiverEngine};
pub use expiry::ExpiryMonitor;

use chunkferry_store::StoreError;

/// Errors produced by the receiver engine.
///
/// Protocol-level rejections (size exceeded, induced failure) are not errors:
/// they travel back over the wire as
/// [`ChunkResponse::Error`](chunkferry_protocol::ChunkResponse). This enum
/// covers failures the wire layer should report as internal.
#[derive(Debug, thiserror::Error)]
pub enum ReceiverError {
    #[error("store error: {0}")]
    Store(#[from] StoreError),

    #[error("blob store error: {0}")]
    Blob(#[from] BlobError),

    /// Final concatenation failed; the transfer cannot be reported complete.
    #[error("assembly failed: {0}")]
    Assembly(String),
}
