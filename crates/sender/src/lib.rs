//! Sender-side upload engine.
//!
//! [`Uploader::run`] splits a file into fixed-size byte-range pieces and
//! pushes them through a [`ChunkTransport`] with bounded concurrency,
//! per-chunk retry, and reconciliation against the receiver's reported
//! piece list. The transport is a trait so the wire layer (HTTP or
//! otherwise) stays out of this crate.

mod checksum;
mod chunker;
mod config;
mod transport;
mod upload;

pub use checksum::{checksum_bytes, file_checksum};
pub use chunker::{UploadJob, plan_jobs, read_job_bytes};
pub use config::{ProgressCallback, SenderConfig};
pub use transport::{BoxFuture, ChunkRequest, ChunkTransport, TransportError};
pub use upload::{UploadFailure, UploadOutcome, Uploader};

/// Errors that abort an upload before any chunk is sent.
///
/// Per-chunk transport failures are not represented here: they feed the
/// retry loop and ultimately surface as an [`UploadOutcome`].
#[derive(Debug, thiserror::Error)]
pub enum SenderError {
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}
