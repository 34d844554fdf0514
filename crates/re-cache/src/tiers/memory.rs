//! In-process memory tier: an [`Lru`] guarded by a single mutex.
//!
//! Values above `unit_size_limit` are rejected outright rather than
//! admitted and immediately evicted — large blobs belong in the disk or
//! redis tier.

use crate::lru::Lru;
use crate::traits::{BoxedReader, Cache, CacheWriter};
use async_trait::async_trait;
use parking_lot::Mutex;
use re_core::metrics::cache_metrics;
use re_core::{Error, Result};
use std::collections::HashMap;
use std::io::Cursor;
use std::pin::Pin;
use std::sync::Arc;
use std::task::{Context, Poll};
use tokio::io::AsyncWrite;

const TIER: &str = "memory";

pub struct MemoryCache {
    lru: Arc<Mutex<Lru<String, Vec<u8>>>>,
    unit_size_limit: i64,
}

impl MemoryCache {
    pub fn new(max_size: i64, unit_size_limit: i64) -> Self {
        Self {
            lru: Arc::new(Mutex::new(Lru::new(
                max_size,
                |v: &Vec<u8>| v.len() as i64,
                |_k: &String, _v: &Vec<u8>| cache_metrics().record_eviction(TIER),
            ))),
            unit_size_limit,
        }
    }
}

#[async_trait]
impl Cache for MemoryCache {
    async fn contains(&self, key: &str) -> Result<bool> {
        Ok(self.lru.lock().contains(&key.to_string()))
    }

    async fn find_missing(&self, keys: &[String]) -> Result<Vec<String>> {
        let mut lru = self.lru.lock();
        Ok(keys
            .iter()
            .filter(|k| !lru.contains(k))
            .cloned()
            .collect())
    }

    async fn get(&self, key: &str) -> Result<Option<Vec<u8>>> {
        let value = self.lru.lock().get(&key.to_string()).cloned();
        if value.is_some() {
            cache_metrics().record_hit(TIER);
        } else {
            cache_metrics().record_miss(TIER);
        }
        Ok(value)
    }

    async fn get_multi(&self, keys: &[String]) -> Result<HashMap<String, Vec<u8>>> {
        let mut lru = self.lru.lock();
        Ok(keys
            .iter()
            .filter_map(|k| lru.get(k).map(|v| (k.clone(), v.clone())))
            .collect())
    }

    async fn set(&self, key: &str, data: Vec<u8>) -> Result<()> {
        if data.len() as i64 > self.unit_size_limit {
            return Err(Error::ResourceExhausted(format!(
                "blob of {} bytes exceeds memory tier unit limit of {}",
                data.len(),
                self.unit_size_limit
            )));
        }
        self.lru.lock().add(key.to_string(), data);
        Ok(())
    }

    async fn set_multi(&self, items: HashMap<String, Vec<u8>>) -> Result<()> {
        for (k, v) in items {
            self.set(&k, v).await?;
        }
        Ok(())
    }

    async fn delete(&self, key: &str) -> Result<()> {
        self.lru.lock().remove(&key.to_string());
        Ok(())
    }

    async fn reader(&self, key: &str, offset: i64) -> Result<BoxedReader> {
        let data = self
            .lru
            .lock()
            .get(&key.to_string())
            .cloned()
            .ok_or_else(|| Error::not_found(key))?;
        let offset = offset.max(0) as usize;
        let slice = data.get(offset..).unwrap_or_default().to_vec();
        Ok(Box::pin(Cursor::new(slice)))
    }

    async fn writer(&self, key: &str) -> Result<Box<dyn CacheWriter>> {
        Ok(Box::new(MemoryWriter {
            lru: self.lru.clone(),
            unit_size_limit: self.unit_size_limit,
            key: key.to_string(),
            buf: Vec::new(),
        }))
    }

    async fn check(&self) -> Result<()> {
        Ok(())
    }

    async fn size(&self) -> i64 {
        self.lru.lock().size()
    }
}

/// Buffers the full write in memory; commit installs it into the LRU.
/// The caller (isolation/composed wrapper) is responsible for hashing and
/// verifying before treating a commit as durable.
struct MemoryWriter {
    lru: Arc<Mutex<Lru<String, Vec<u8>>>>,
    unit_size_limit: i64,
    key: String,
    buf: Vec<u8>,
}

impl AsyncWrite for MemoryWriter {
    fn poll_write(
        mut self: Pin<&mut Self>,
        _cx: &mut Context<'_>,
        buf: &[u8],
    ) -> Poll<std::io::Result<usize>> {
        self.buf.extend_from_slice(buf);
        Poll::Ready(Ok(buf.len()))
    }

    fn poll_flush(self: Pin<&mut Self>, _cx: &mut Context<'_>) -> Poll<std::io::Result<()>> {
        Poll::Ready(Ok(()))
    }

    fn poll_shutdown(self: Pin<&mut Self>, _cx: &mut Context<'_>) -> Poll<std::io::Result<()>> {
        Poll::Ready(Ok(()))
    }
}

#[async_trait]
impl CacheWriter for MemoryWriter {
    async fn commit(self: Box<Self>) -> Result<i64> {
        if self.buf.len() as i64 > self.unit_size_limit {
            return Err(Error::ResourceExhausted(format!(
                "blob of {} bytes exceeds memory tier unit limit of {}",
                self.buf.len(),
                self.unit_size_limit
            )));
        }
        let len = self.buf.len() as i64;
        self.lru.lock().add(self.key, self.buf);
        Ok(len)
    }
}
