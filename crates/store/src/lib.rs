//! Persistent keyed storage of per-transfer piece locations and metadata.
//!
//! The receiver accumulates pieces through the [`PieceStore`] trait, which is
//! implemented by two backends: [`MemoryStore`] (process-local map, no
//! external locking) and [`SharedStore`] (an abstract key-value client whose
//! compound read-modify-write sequences run under a named distributed lock).
//! The backend is chosen by whoever constructs the receiver; the engine never
//! knows which one it talks to.

mod error;
mod kv;
mod lock;
mod memory;
mod shared;

pub use error::StoreError;
pub use kv::{KvClient, MemoryKv};
pub use lock::{LocalLockService, LockService};
pub use memory::MemoryStore;
pub use shared::SharedStore;

use std::collections::BTreeMap;
use std::future::Future;
use std::pin::Pin;
use std::time::Duration;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Boxed future used by the object-safe async traits in this crate.
pub type BoxFuture<'a, T> = Pin<Box<dyn Future<Output = T> + Send + 'a>>;

/// Location and size of one stored piece.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PieceRecord {
    /// Blob-store handle for the piece bytes.
    pub location: String,
    /// Piece size in bytes, recorded so size admission needs no blob reads.
    pub len: u64,
}

/// Keyed storage of transfer metadata, shared by both backends.
///
/// Reads of an unknown upload id return [`StoreError::NotFound`], except
/// `get_num_pieces`, which answers 0 — "no pieces yet" is not an error there.
/// `set_piece` is an idempotent upsert: re-writing an existing `part_num`
/// replaces the record but never increments the piece counter twice, and the
/// whole sequence is atomic with respect to concurrent writers for one id.
pub trait PieceStore: Send + Sync {
    /// Opens the backend connection.
    fn connect(&self) -> BoxFuture<'_, Result<(), StoreError>>;

    /// Closes the backend connection.
    fn close(&self) -> BoxFuture<'_, Result<(), StoreError>>;

    fn set_update_time<'a>(
        &'a self,
        id: &'a str,
        time: DateTime<Utc>,
    ) -> BoxFuture<'a, Result<(), StoreError>>;

    fn get_update_time<'a>(&'a self, id: &'a str)
    -> BoxFuture<'a, Result<DateTime<Utc>, StoreError>>;

    fn set_chunk_expiry<'a>(
        &'a self,
        id: &'a str,
        expiry: Duration,
    ) -> BoxFuture<'a, Result<(), StoreError>>;

    fn get_chunk_expiry<'a>(&'a self, id: &'a str) -> BoxFuture<'a, Result<Duration, StoreError>>;

    fn set_piece<'a>(
        &'a self,
        id: &'a str,
        part_num: u32,
        record: PieceRecord,
    ) -> BoxFuture<'a, Result<(), StoreError>>;

    fn get_all_pieces<'a>(
        &'a self,
        id: &'a str,
    ) -> BoxFuture<'a, Result<BTreeMap<u32, PieceRecord>, StoreError>>;

    /// Number of distinct pieces stored for `id`; 0 for an unknown id.
    fn get_num_pieces<'a>(&'a self, id: &'a str) -> BoxFuture<'a, Result<u64, StoreError>>;

    /// Deletes all metadata for `id`. Idempotent.
    fn expire_transfer<'a>(&'a self, id: &'a str) -> BoxFuture<'a, Result<(), StoreError>>;
}
