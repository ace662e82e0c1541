//! Shared-backend piece store with explicit lock discipline.

use std::collections::BTreeMap;
use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};

use crate::{BoxFuture, KvClient, LockService, PieceRecord, PieceStore, StoreError};

const LOCK_TTL: Duration = Duration::from_secs(20);
const LOCK_RETRIES: u32 = 5;
const LOCK_RETRY_DELAY: Duration = Duration::from_millis(20);

/// [`PieceStore`] over a shared key-value backend.
///
/// Unlike [`MemoryStore`](crate::MemoryStore), nothing serializes concurrent
/// writers here, so every compound read-modify-write sequence (read piece →
/// increment count → append piece list → write record) runs under a named
/// lock keyed by the upload id. Distinct uploads never contend.
pub struct SharedStore {
    kv: Arc<dyn KvClient>,
    locks: Arc<dyn LockService>,
    lock_ttl: Duration,
    lock_retries: u32,
    lock_retry_delay: Duration,
}

impl SharedStore {
    pub fn new(kv: Arc<dyn KvClient>, locks: Arc<dyn LockService>) -> Self {
        Self {
            kv,
            locks,
            lock_ttl: LOCK_TTL,
            lock_retries: LOCK_RETRIES,
            lock_retry_delay: LOCK_RETRY_DELAY,
        }
    }

    /// Overrides the lock acquisition policy.
    pub fn with_lock_policy(mut self, ttl: Duration, retries: u32, retry_delay: Duration) -> Self {
        self.lock_ttl = ttl;
        self.lock_retries = retries;
        self.lock_retry_delay = retry_delay;
        self
    }

    async fn lock(&self, id: &str) -> Result<(), StoreError> {
        self.locks
            .acquire(id, self.lock_ttl, self.lock_retries, self.lock_retry_delay)
            .await
    }

    async fn set_piece_locked(
        &self,
        id: &str,
        part_num: u32,
        record: &PieceRecord,
    ) -> Result<(), StoreError> {
        let piece_key = piece_key(id, part_num);
        if self.kv.get(&piece_key).await?.is_none() {
            // First sighting of this part: bump the counter and the list.
            let count_key = num_pieces_key(id);
            let count = match self.kv.get(&count_key).await? {
                Some(v) => parse_u64(&v)?,
                None => 0,
            };
            self.kv.set(&count_key, &(count + 1).to_string()).await?;

            let list_key = piece_list_key(id);
            let mut list: Vec<u32> = match self.kv.get(&list_key).await? {
                Some(v) => serde_json::from_str(&v).map_err(backend)?,
                None => Vec::new(),
            };
            if !list.contains(&part_num) {
                list.push(part_num);
            }
            let encoded = serde_json::to_string(&list).map_err(backend)?;
            self.kv.set(&list_key, &encoded).await?;
        }

        let encoded = serde_json::to_string(record).map_err(backend)?;
        self.kv.set(&piece_key, &encoded).await?;
        Ok(())
    }

    async fn expire_locked(&self, id: &str) -> Result<(), StoreError> {
        let list_key = piece_list_key(id);
        let list: Vec<u32> = match self.kv.get(&list_key).await? {
            Some(v) => serde_json::from_str(&v).map_err(backend)?,
            None => Vec::new(),
        };
        for part in list {
            self.kv.del(&piece_key(id, part)).await?;
        }
        self.kv.del(&update_time_key(id)).await?;
        self.kv.del(&chunk_expiry_key(id)).await?;
        self.kv.del(&num_pieces_key(id)).await?;
        self.kv.del(&list_key).await?;
        Ok(())
    }
}

impl PieceStore for SharedStore {
    fn connect(&self) -> BoxFuture<'_, Result<(), StoreError>> {
        self.kv.connect()
    }

    fn close(&self) -> BoxFuture<'_, Result<(), StoreError>> {
        self.kv.close()
    }

    fn set_update_time<'a>(
        &'a self,
        id: &'a str,
        time: DateTime<Utc>,
    ) -> BoxFuture<'a, Result<(), StoreError>> {
        Box::pin(async move {
            self.kv
                .set(&update_time_key(id), &time.to_rfc3339())
                .await
        })
    }

    fn get_update_time<'a>(
        &'a self,
        id: &'a str,
    ) -> BoxFuture<'a, Result<DateTime<Utc>, StoreError>> {
        Box::pin(async move {
            let raw = self
                .kv
                .get(&update_time_key(id))
                .await?
                .ok_or_else(|| StoreError::NotFound(id.to_string()))?;
            DateTime::parse_from_rfc3339(&raw)
                .map(|t| t.with_timezone(&Utc))
                .map_err(backend)
        })
    }

    fn set_chunk_expiry<'a>(
        &'a self,
        id: &'a str,
        expiry: Duration,
    ) -> BoxFuture<'a, Result<(), StoreError>> {
        Box::pin(async move {
            self.kv
                .set(&chunk_expiry_key(id), &expiry.as_millis().to_string())
                .await
        })
    }

    fn get_chunk_expiry<'a>(&'a self, id: &'a str) -> BoxFuture<'a, Result<Duration, StoreError>> {
        Box::pin(async move {
            let raw = self
                .kv
                .get(&chunk_expiry_key(id))
                .await?
                .ok_or_else(|| StoreError::NotFound(id.to_string()))?;
            Ok(Duration::from_millis(parse_u64(&raw)?))
        })
    }

    fn set_piece<'a>(
        &'a self,
        id: &'a str,
        part_num: u32,
        record: PieceRecord,
    ) -> BoxFuture<'a, Result<(), StoreError>> {
        Box::pin(async move {
            self.lock(id).await?;
            let result = self.set_piece_locked(id, part_num, &record).await;
            self.locks.release(id).await;
            result
        })
    }

    fn get_all_pieces<'a>(
        &'a self,
        id: &'a str,
    ) -> BoxFuture<'a, Result<BTreeMap<u32, PieceRecord>, StoreError>> {
        Box::pin(async move {
            let raw = self
                .kv
                .get(&piece_list_key(id))
                .await?
                .ok_or_else(|| StoreError::NotFound(id.to_string()))?;
            let list: Vec<u32> = serde_json::from_str(&raw).map_err(backend)?;

            let mut pieces = BTreeMap::new();
            for part in list {
                // A part may vanish between the list read and here if the
                // transfer expires concurrently; skip it.
                if let Some(v) = self.kv.get(&piece_key(id, part)).await? {
                    pieces.insert(part, serde_json::from_str(&v).map_err(backend)?);
                }
            }
            Ok(pieces)
        })
    }

    fn get_num_pieces<'a>(&'a self, id: &'a str) -> BoxFuture<'a, Result<u64, StoreError>> {
        Box::pin(async move {
            match self.kv.get(&num_pieces_key(id)).await? {
                Some(v) => parse_u64(&v),
                None => Ok(0),
            }
        })
    }

    fn expire_transfer<'a>(&'a self, id: &'a str) -> BoxFuture<'a, Result<(), StoreError>> {
        Box::pin(async move {
            self.lock(id).await?;
            let result = self.expire_locked(id).await;
            self.locks.release(id).await;
            result
        })
    }
}

fn update_time_key(id: &str) -> String {
    format!("{id}:update_time")
}

fn chunk_expiry_key(id: &str) -> String {
    format!("{id}:chunk_expiry")
}

fn num_pieces_key(id: &str) -> String {
    format!("{id}:num_pieces")
}

fn piece_list_key(id: &str) -> String {
    format!("{id}:piece_list")
}

fn piece_key(id: &str, part_num: u32) -> String {
    format!("{id}:piece:{part_num}")
}

fn parse_u64(raw: &str) -> Result<u64, StoreError> {
    raw.parse().map_err(backend)
}

fn backend(e: impl std::fmt::Display) -> StoreError {
    StoreError::Backend(e.to_string())
}
