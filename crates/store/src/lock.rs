//! Distributed mutual-exclusion collaborator.

use std::collections::HashMap;
use std::sync::Mutex;
use std::time::{Duration, Instant};

use crate::{BoxFuture, StoreError};

/// Named mutual-exclusion service guarding compound store sequences.
///
/// Lock scope is always a single upload id, never global, so distinct
/// uploads proceed fully in parallel. A production deployment implements
/// this over its coordination service (e.g. redis); [`LocalLockService`]
/// covers tests and single-host use.
pub trait LockService: Send + Sync {
    /// Acquires `key`, retrying up to `max_retries` times with `retry_delay`
    /// between attempts. Exhausting the budget is a hard
    /// [`StoreError::LockTimeout`], never a silent pass-through.
    fn acquire<'a>(
        &'a self,
        key: &'a str,
        ttl: Duration,
        max_retries: u32,
        retry_delay: Duration,
    ) -> BoxFuture<'a, Result<(), StoreError>>;

    /// Releases `key`. Best-effort.
    fn release<'a>(&'a self, key: &'a str) -> BoxFuture<'a, ()>;
}

/// In-process lock table with TTL-expiring entries.
#[derive(Debug, Default)]
pub struct LocalLockService {
    held: Mutex<HashMap<String, Instant>>,
}

impl LocalLockService {
    pub fn new() -> Self {
        Self::default()
    }

    /// Attempts one acquisition. Expired holders are evicted on contact.
    fn try_acquire(&self, key: &str, ttl: Duration) -> bool {
        let mut held = self.held.lock().unwrap();
        let now = Instant::now();
        match held.get(key) {
            Some(deadline) if *deadline > now => false,
            _ => {
                held.insert(key.to_string(), now + ttl);
                true
            }
        }
    }
}

impl LockService for LocalLockService {
    fn acquire<'a>(
        &'a self,
        key: &'a str,
        ttl: Duration,
        max_retries: u32,
        retry_delay: Duration,
    ) -> BoxFuture<'a, Result<(), StoreError>> {
        Box::pin(async move {
            for attempt in 0..=max_retries {
                if self.try_acquire(key, ttl) {
                    return Ok(());
                }
                if attempt < max_retries {
                    tracing::debug!(key, attempt, "lock busy, retrying");
                    tokio::time::sleep(retry_delay).await;
                }
            }
            Err(StoreError::LockTimeout(key.to_string()))
        })
    }

    fn release<'a>(&'a self, key: &'a str) -> BoxFuture<'a, ()> {
        self.held.lock().unwrap().remove(key);
        Box::pin(std::future::ready(()))
    }
}
