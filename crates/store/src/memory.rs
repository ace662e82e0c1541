//! Process-local piece store.

use std::collections::{BTreeMap, HashMap};
use std::sync::Mutex;
use std::time::Duration;

use chrono::{DateTime, Utc};

use crate::{BoxFuture, PieceRecord, PieceStore, StoreError};

/// In-process [`PieceStore`] backed by a single mutex-guarded map.
///
/// The mutex already serializes every compound sequence, so no external
/// locking is needed — the correctness-critical difference from
/// [`SharedStore`](crate::SharedStore).
#[derive(Debug, Default)]
pub struct MemoryStore {
    transfers: Mutex<HashMap<String, TransferEntry>>,
}

#[derive(Debug, Default)]
struct TransferEntry {
    update_time: Option<DateTime<Utc>>,
    chunk_expiry: Option<Duration>,
    pieces: BTreeMap<u32, PieceRecord>,
    num_pieces: u64,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    fn read<T>(
        &self,
        id: &str,
        f: impl FnOnce(&TransferEntry) -> Option<T>,
    ) -> Result<T, StoreError> {
        self.transfers
            .lock()
            .unwrap()
            .get(id)
            .and_then(f)
            .ok_or_else(|| StoreError::NotFound(id.to_string()))
    }
}

impl PieceStore for MemoryStore {
    fn connect(&self) -> BoxFuture<'_, Result<(), StoreError>> {
        Box::pin(std::future::ready(Ok(())))
    }

    fn close(&self) -> BoxFuture<'_, Result<(), StoreError>> {
        Box::pin(std::future::ready(Ok(())))
    }

    fn set_update_time<'a>(
        &'a self,
        id: &'a str,
        time: DateTime<Utc>,
    ) -> BoxFuture<'a, Result<(), StoreError>> {
        self.transfers
            .lock()
            .unwrap()
            .entry(id.to_string())
            .or_default()
            .update_time = Some(time);
        Box::pin(std::future::ready(Ok(())))
    }

    fn get_update_time<'a>(
        &'a self,
        id: &'a str,
    ) -> BoxFuture<'a, Result<DateTime<Utc>, StoreError>> {
        let result = self.read(id, |t| t.update_time);
        Box::pin(std::future::ready(result))
    }

    fn set_chunk_expiry<'a>(
        &'a self,
        id: &'a str,
        expiry: Duration,
    ) -> BoxFuture<'a, Result<(), StoreError>> {
        self.transfers
            .lock()
            .unwrap()
            .entry(id.to_string())
            .or_default()
            .chunk_expiry = Some(expiry);
        Box::pin(std::future::ready(Ok(())))
    }

    fn get_chunk_expiry<'a>(&'a self, id: &'a str) -> BoxFuture<'a, Result<Duration, StoreError>> {
        let result = self.read(id, |t| t.chunk_expiry);
        Box::pin(std::future::ready(result))
    }

    fn set_piece<'a>(
        &'a self,
        id: &'a str,
        part_num: u32,
        record: PieceRecord,
    ) -> BoxFuture<'a, Result<(), StoreError>> {
        let mut transfers = self.transfers.lock().unwrap();
        let entry = transfers.entry(id.to_string()).or_default();
        if !entry.pieces.contains_key(&part_num) {
            entry.num_pieces += 1;
        }
        entry.pieces.insert(part_num, record);
        drop(transfers);
        Box::pin(std::future::ready(Ok(())))
    }

    fn get_all_pieces<'a>(
        &'a self,
        id: &'a str,
    ) -> BoxFuture<'a, Result<BTreeMap<u32, PieceRecord>, StoreError>> {
        let result = self.read(id, |t| Some(t.pieces.clone()));
        Box::pin(std::future::ready(result))
    }

    fn get_num_pieces<'a>(&'a self, id: &'a str) -> BoxFuture<'a, Result<u64, StoreError>> {
        let n = self
            .transfers
            .lock()
            .unwrap()
            .get(id)
            .map(|t| t.num_pieces)
            .unwrap_or(0);
        Box::pin(std::future::ready(Ok(n)))
    }

    fn expire_transfer<'a>(&'a self, id: &'a str) -> BoxFuture<'a, Result<(), StoreError>> {
        self.transfers.lock().unwrap().remove(id);
        Box::pin(std::future::ready(Ok(())))
    }
}
