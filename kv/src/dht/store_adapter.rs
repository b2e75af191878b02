//! A [`StoreAdapter`] backed by [`crate::storage::log_cask::LogCask`], wiring
//! the cache's read-through/write-through SPI to the crate's own
//! log-structured engine instead of requiring every embedder to supply one.
//!
//! `LogCask`'s `Engine` trait is synchronous and single-threaded (`&mut
//! self` on every method, including reads); this adapter serializes access
//! behind a `tokio::sync::Mutex` and namespaces keys by `cache_id` so one log
//! file can back every cache.

use std::collections::HashMap;

use async_trait::async_trait;
use tokio::sync::Mutex;

use crate::dht::topology::StoreAdapter;
use crate::dht::version::Version;
use crate::error::CResult;
use crate::storage::engine::Engine as StorageEngine;
use crate::storage::log_cask::LogCask;

pub struct LogCaskStore {
    inner: Mutex<LogCask>,
}

impl LogCaskStore {
    pub fn new(inner: LogCask) -> Self {
        Self { inner: Mutex::new(inner) }
    }

    fn namespaced(cache_id: u32, key: &[u8]) -> Vec<u8> {
        let mut out = Vec::with_capacity(4 + key.len());
        out.extend_from_slice(&cache_id.to_be_bytes());
        out.extend_from_slice(key);
        out
    }
}

#[async_trait]
impl StoreAdapter for LogCaskStore {
    async fn load(&self, cache_id: u32, key: &[u8]) -> CResult<Option<Vec<u8>>> {
        self.inner.lock().await.get(&Self::namespaced(cache_id, key))
    }

    async fn load_all(&self, cache_id: u32, keys: &[Vec<u8>]) -> CResult<HashMap<Vec<u8>, Vec<u8>>> {
        let mut guard = self.inner.lock().await;
        let mut out = HashMap::with_capacity(keys.len());
        for key in keys {
            if let Some(value) = guard.get(&Self::namespaced(cache_id, key))? {
                out.insert(key.clone(), value);
            }
        }
        Ok(out)
    }

    async fn put(&self, cache_id: u32, key: &[u8], value: Vec<u8>, _version: Version) -> CResult<()> {
        self.inner.lock().await.set(&Self::namespaced(cache_id, key), value)
    }

    async fn put_all(&self, cache_id: u32, entries: HashMap<Vec<u8>, Vec<u8>>) -> CResult<()> {
        let mut guard = self.inner.lock().await;
        for (key, value) in entries {
            guard.set(&Self::namespaced(cache_id, &key), value)?;
        }
        Ok(())
    }

    async fn delete(&self, cache_id: u32, key: &[u8]) -> CResult<()> {
        self.inner.lock().await.delete(&Self::namespaced(cache_id, key)).map(|_| ())
    }

    async fn delete_all(&self, cache_id: u32, keys: &[Vec<u8>]) -> CResult<()> {
        let mut guard = self.inner.lock().await;
        for key in keys {
            guard.delete(&Self::namespaced(cache_id, key))?;
        }
        Ok(())
    }

    async fn tx_end(&self, _commit: bool) -> CResult<()> {
        self.inner.lock().await.flush()
    }
}
