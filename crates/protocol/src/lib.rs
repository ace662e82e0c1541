//! Wire protocol types shared by the chunkferry sender and receiver.
//!
//! A transfer moves one file as `num_parts` independent byte-range pieces.
//! Each piece travels with a [`ChunkHeader`] identifying the file, the piece,
//! and the upload; the receiver answers every piece with a [`ChunkResponse`].

mod header;
mod response;

pub use header::{
    ChunkHeader, HEADER_FILE_NAME, HEADER_NUM_PARTS, HEADER_PART_NUM, HEADER_UPLOAD_ID,
};
pub use response::{ChunkResponse, ErrorReason};

/// Default chunk size: 2 MiB.
pub const DEFAULT_CHUNK_SIZE: u64 = 2 * 1024 * 1024;

/// Default maximum assembled file size: 256 MiB.
pub const DEFAULT_MAX_FILE_SIZE: u64 = 256 * 1024 * 1024;

/// Default number of chunks in flight at once on the sender.
pub const DEFAULT_NUM_PARALLEL: usize = 2;

/// Default automatic retries per chunk before the job is abandoned.
pub const DEFAULT_MAX_RETRIES: u32 = 5;

/// Slack added to the expiry window before the receiver checks a transfer,
/// so a piece written exactly at the deadline is not evicted by its own check.
pub const EXPIRY_GUARD_MILLIS: u64 = 10;

/// Errors produced while encoding or decoding protocol data.
#[derive(Debug, thiserror::Error)]
pub enum ProtocolError {
    #[error("missing header: {0}")]
    MissingHeader(&'static str),

    #[error("invalid header {0}: {1}")]
    InvalidHeader(&'static str, String),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),
}
