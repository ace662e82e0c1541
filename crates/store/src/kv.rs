//! Key-value collaborator behind the shared store.

use std::collections::HashMap;
use std::sync::Mutex;

use crate::{BoxFuture, StoreError};

/// String key-value client — the shape of a redis connection.
///
/// [`SharedStore`](crate::SharedStore) performs all persistence through this
/// trait; a production deployment supplies a client bound to its actual
/// backend, while [`MemoryKv`] stands in for tests.
pub trait KvClient: Send + Sync {
    fn connect(&self) -> BoxFuture<'_, Result<(), StoreError>>;

    fn close(&self) -> BoxFuture<'_, Result<(), StoreError>>;

    fn get<'a>(&'a self, key: &'a str) -> BoxFuture<'a, Result<Option<String>, StoreError>>;

    fn set<'a>(&'a self, key: &'a str, value: &'a str) -> BoxFuture<'a, Result<(), StoreError>>;

    fn del<'a>(&'a self, key: &'a str) -> BoxFuture<'a, Result<(), StoreError>>;
}

/// In-process [`KvClient`].
#[derive(Debug, Default)]
pub struct MemoryKv {
    data: Mutex<HashMap<String, String>>,
}

impl MemoryKv {
    pub fn new() -> Self {
        Self::default()
    }
}

impl KvClient for MemoryKv {
    fn connect(&self) -> BoxFuture<'_, Result<(), StoreError>> {
        Box::pin(std::future::ready(Ok(())))
    }

    fn close(&self) -> BoxFuture<'_, Result<(), StoreError>> {
        Box::pin(std::future::ready(Ok(())))
    }

    fn get<'a>(&'a self, key: &'a str) -> BoxFuture<'a, Result<Option<String>, StoreError>> {
        let value = self.data.lock().unwrap().get(key).cloned();
        Box::pin(std::future::ready(Ok(value)))
    }

    fn set<'a>(&'a self, key: &'a str, value: &'a str) -> BoxFuture<'a, Result<(), StoreError>> {
        self.data
            .lock()
            .unwrap()
            .insert(key.to_string(), value.to_string());
        Box::pin(std::future::ready(Ok(())))
    }

    fn del<'a>(&'a self, key: &'a str) -> BoxFuture<'a, Result<(), StoreError>> {
        self.data.lock().unwrap().remove(key);
        Box::pin(std::future::ready(Ok(())))
    }
}
