//! Composes two cache tiers into one: a fast `outer` and a slow `inner`,
//! with configurable read-through / write-through behavior.
//!
//! The factory in [`build`] chains tiers memory ⊂ redis ⊂ disk: each
//! enabled tier becomes the `outer` of whatever was already built.

use crate::traits::{BoxedReader, Cache, CacheWriter};
use async_trait::async_trait;
use re_core::Result;
use std::collections::HashMap;
use std::pin::Pin;
use std::sync::Arc;
use std::task::{Context, Poll};
use tokio::io::{AsyncRead, AsyncWrite, ReadBuf};
use tracing::warn;

bitflags::bitflags! {
    #[derive(Debug, Clone, Copy, PartialEq, Eq)]
    pub struct Mode: u8 {
        const READ_THROUGH = 0b01;
        const WRITE_THROUGH = 0b10;
    }
}

pub struct ComposedCache {
    outer: Arc<dyn Cache>,
    inner: Arc<dyn Cache>,
    mode: Mode,
}

impl ComposedCache {
    pub fn new(outer: Arc<dyn Cache>, inner: Arc<dyn Cache>, mode: Mode) -> Arc<dyn Cache> {
        Arc::new(Self { outer, inner, mode })
    }
}

/// Chain `tiers` (ordered innermost-first, e.g. `[disk]`, `[disk, redis]`,
/// `[disk, redis, memory]`) into a single composed cache. A single tier is
/// returned unwrapped.
pub fn build(tiers: Vec<Arc<dyn Cache>>, mode: Mode) -> Arc<dyn Cache> {
    let mut iter = tiers.into_iter();
    let Some(mut current) = iter.next() else {
        panic!("composed cache requires at least one tier");
    };
    for outer in iter {
        current = ComposedCache::new(outer, current, mode);
    }
    current
}

#[async_trait]
impl Cache for ComposedCache {
    async fn contains(&self, key: &str) -> Result<bool> {
        if self.outer.contains(key).await? {
            return Ok(true);
        }
        self.inner.contains(key).await
    }

    async fn find_missing(&self, keys: &[String]) -> Result<Vec<String>> {
        let residual = self.outer.find_missing(keys).await?;
        if residual.is_empty() {
            return Ok(residual);
        }
        self.inner.find_missing(&residual).await
    }

    async fn get(&self, key: &str) -> Result<Option<Vec<u8>>> {
        if let Some(data) = self.outer.get(key).await? {
            return Ok(Some(data));
        }
        let data = self.inner.get(key).await?;
        if let Some(data) = &data {
            if self.mode.contains(Mode::READ_THROUGH) {
                let outer = self.outer.clone();
                let key = key.to_string();
                let data = data.clone();
                tokio::spawn(async move {
                    if let Err(e) = outer.set(&key, data).await {
                        warn!(key = %key, error = %e, "read-through promotion to outer tier failed");
                    }
                });
            }
        }
        Ok(data)
    }

    async fn get_multi(&self, keys: &[String]) -> Result<HashMap<String, Vec<u8>>> {
        let mut out = self.outer.get_multi(keys).await?;
        let residual: Vec<String> = keys.iter().filter(|k| !out.contains_key(*k)).cloned().collect();
        if !residual.is_empty() {
            let from_inner = self.inner.get_multi(&residual).await?;
            if self.mode.contains(Mode::READ_THROUGH) {
                let outer = self.outer.clone();
                let promote = from_inner.clone();
                tokio::spawn(async move {
                    if let Err(e) = outer.set_multi(promote).await {
                        warn!(error = %e, "read-through bulk promotion to outer tier failed");
                    }
                });
            }
            out.extend(from_inner);
        }
        Ok(out)
    }

    async fn set(&self, key: &str, data: Vec<u8>) -> Result<()> {
        self.inner.set(key, data.clone()).await?;
        if self.mode.contains(Mode::WRITE_THROUGH) {
            if let Err(e) = self.outer.set(key, data).await {
                warn!(key = %key, error = %e, "write-through to outer tier failed");
            }
        }
        Ok(())
    }

    async fn set_multi(&self, items: HashMap<String, Vec<u8>>) -> Result<()> {
        self.inner.set_multi(items.clone()).await?;
        if self.mode.contains(Mode::WRITE_THROUGH) {
            if let Err(e) = self.outer.set_multi(items).await {
                warn!(error = %e, "write-through bulk write to outer tier failed");
            }
        }
        Ok(())
    }

    async fn delete(&self, key: &str) -> Result<()> {
        self.inner.delete(key).await?;
        if self.mode.contains(Mode::WRITE_THROUGH) {
            self.outer.delete(key).await?;
        }
        Ok(())
    }

    async fn reader(&self, key: &str, offset: i64) -> Result<BoxedReader> {
        if let Ok(reader) = self.outer.reader(key, offset).await {
            return Ok(reader);
        }
        let reader = self.inner.reader(key, offset).await?;
        if self.mode.contains(Mode::READ_THROUGH) && offset == 0 {
            if let Ok(writer) = self.outer.writer(key).await {
                return Ok(Box::pin(TeeReader::new(reader, writer)));
            }
        }
        Ok(reader)
    }

    async fn writer(&self, key: &str) -> Result<Box<dyn CacheWriter>> {
        let inner = self.inner.writer(key).await?;
        let outer = if self.mode.contains(Mode::WRITE_THROUGH) {
            self.outer.writer(key).await.ok()
        } else {
            None
        };
        Ok(Box::new(DualWriter { inner, outer }))
    }

    async fn check(&self) -> Result<()> {
        if let Err(e) = self.outer.check().await {
            warn!(error = %e, "outer tier health check failed, continuing in degraded mode");
        }
        self.inner.check().await
    }

    async fn size(&self) -> i64 {
        self.inner.size().await
    }
}

/// A reader that forwards every byte read to a second writer as it goes,
/// so a cache-miss-then-promote read simultaneously satisfies the caller
/// and warms the outer tier.
struct TeeReader {
    source: BoxedReader,
    sink: Option<Box<dyn CacheWriter>>,
    sink_failed: bool,
}

impl TeeReader {
    fn new(source: BoxedReader, sink: Box<dyn CacheWriter>) -> Self {
        Self {
            source,
            sink: Some(sink),
            sink_failed: false,
        }
    }
}

impl AsyncRead for TeeReader {
    fn poll_read(
        self: Pin<&mut Self>,
        cx: &mut Context<'_>,
        buf: &mut ReadBuf<'_>,
    ) -> Poll<std::io::Result<()>> {
        let this = self.get_mut();
        let before = buf.filled().len();
        let poll = Pin::new(&mut this.source).poll_read(cx, buf);
        if let Poll::Ready(Ok(())) = &poll {
            let written = &buf.filled()[before..];
            if written.is_empty() {
                // EOF: commit the promoted copy, best-effort.
                if let Some(sink) = this.sink.take() {
                    tokio::spawn(async move {
                        let _ = sink.commit().await;
                    });
                }
            } else if !this.sink_failed {
                if let Some(sink) = this.sink.as_mut() {
                    if Pin::new(sink.as_mut()).poll_write(cx, written).is_pending() {
                        // Don't block the caller's read on a slow outer
                        // write; drop promotion for this read rather than
                        // stalling it.
                        this.sink_failed = true;
                    }
                }
            }
        }
        poll
    }
}

/// Forwards writes to both tiers; `inner` is authoritative, `outer` is
/// best-effort (its own write failures are logged, never propagated).
struct DualWriter {
    inner: Box<dyn CacheWriter>,
    outer: Option<Box<dyn CacheWriter>>,
}

impl AsyncWrite for DualWriter {
    fn poll_write(
        self: Pin<&mut Self>,
        cx: &mut Context<'_>,
        buf: &[u8],
    ) -> Poll<std::io::Result<usize>> {
        let this = self.get_mut();
        let result = Pin::new(&mut this.inner).poll_write(cx, buf);
        if let Some(outer) = this.outer.as_mut() {
            let _ = Pin::new(outer.as_mut()).poll_write(cx, buf);
        }
        result
    }

    fn poll_flush(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<std::io::Result<()>> {
        let this = self.get_mut();
        let result = Pin::new(&mut this.inner).poll_flush(cx);
        if let Some(outer) = this.outer.as_mut() {
            let _ = Pin::new(outer.as_mut()).poll_flush(cx);
        }
        result
    }

    fn poll_shutdown(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<std::io::Result<()>> {
        let this = self.get_mut();
        let result = Pin::new(&mut this.inner).poll_shutdown(cx);
        if let Some(outer) = this.outer.as_mut() {
            let _ = Pin::new(outer.as_mut()).poll_shutdown(cx);
        }
        result
    }
}

#[async_trait]
impl CacheWriter for DualWriter {
    async fn commit(self: Box<Self>) -> Result<i64> {
        let committed = self.inner.commit().await?;
        if let Some(outer) = self.outer {
            if let Err(e) = outer.commit().await {
                warn!(error = %e, "write-through streaming commit to outer tier failed");
            }
        }
        Ok(committed)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::tiers::memory::MemoryCache;
    use tokio::io::AsyncWriteExt;

    fn mode() -> Mode {
        Mode::READ_THROUGH | Mode::WRITE_THROUGH
    }

    #[tokio::test]
    async fn get_falls_through_to_inner_on_outer_miss() {
        let outer: Arc<dyn Cache> = Arc::new(MemoryCache::new(1_000_000, 100_000));
        let inner: Arc<dyn Cache> = Arc::new(MemoryCache::new(1_000_000, 100_000));
        inner.set("k1", b"hello".to_vec()).await.unwrap();
        let composed = ComposedCache::new(outer.clone(), inner, mode());
        assert_eq!(composed.get("k1").await.unwrap(), Some(b"hello".to_vec()));
    }

    #[tokio::test]
    async fn read_through_promotes_into_outer() {
        let outer: Arc<dyn Cache> = Arc::new(MemoryCache::new(1_000_000, 100_000));
        let inner: Arc<dyn Cache> = Arc::new(MemoryCache::new(1_000_000, 100_000));
        inner.set("k1", b"hello".to_vec()).await.unwrap();
        let composed = ComposedCache::new(outer.clone(), inner, mode());
        composed.get("k1").await.unwrap();
        tokio::time::sleep(std::time::Duration::from_millis(20)).await;
        assert_eq!(outer.get("k1").await.unwrap(), Some(b"hello".to_vec()));
    }

    #[tokio::test]
    async fn set_always_writes_inner_and_optionally_outer() {
        let outer: Arc<dyn Cache> = Arc::new(MemoryCache::new(1_000_000, 100_000));
        let inner: Arc<dyn Cache> = Arc::new(MemoryCache::new(1_000_000, 100_000));
        let composed = ComposedCache::new(outer.clone(), inner.clone(), mode());
        composed.set("k1", b"data".to_vec()).await.unwrap();
        assert_eq!(inner.get("k1").await.unwrap(), Some(b"data".to_vec()));
        assert_eq!(outer.get("k1").await.unwrap(), Some(b"data".to_vec()));
    }

    #[tokio::test]
    async fn write_through_disabled_skips_outer() {
        let outer: Arc<dyn Cache> = Arc::new(MemoryCache::new(1_000_000, 100_000));
        let inner: Arc<dyn Cache> = Arc::new(MemoryCache::new(1_000_000, 100_000));
        let composed = ComposedCache::new(outer.clone(), inner.clone(), Mode::READ_THROUGH);
        composed.set("k1", b"data".to_vec()).await.unwrap();
        assert_eq!(inner.get("k1").await.unwrap(), Some(b"data".to_vec()));
        assert_eq!(outer.get("k1").await.unwrap(), None);
    }

    #[tokio::test]
    async fn writer_forwards_to_both_tiers() {
        let outer: Arc<dyn Cache> = Arc::new(MemoryCache::new(1_000_000, 100_000));
        let inner: Arc<dyn Cache> = Arc::new(MemoryCache::new(1_000_000, 100_000));
        let composed = ComposedCache::new(outer.clone(), inner.clone(), mode());
        let mut w = composed.writer("k1").await.unwrap();
        w.write_all(b"streamed").await.unwrap();
        w.commit().await.unwrap();
        assert_eq!(inner.get("k1").await.unwrap(), Some(b"streamed".to_vec()));
        assert_eq!(outer.get("k1").await.unwrap(), Some(b"streamed".to_vec()));
    }

    #[tokio::test]
    async fn build_chains_tiers_memory_over_disk() {
        let dir = tempfile::tempdir().unwrap();
        let disk: Arc<dyn Cache> = Arc::new(
            crate::tiers::disk::DiskCache::new(dir.path().to_path_buf(), 1_000_000, 100_000)
                .await
                .unwrap(),
        );
        let memory: Arc<dyn Cache> = Arc::new(MemoryCache::new(1_000_000, 100_000));
        let composed = build(vec![memory.clone(), disk.clone()], mode());
        composed.set("k1", b"hello".to_vec()).await.unwrap();
        assert_eq!(memory.get("k1").await.unwrap(), Some(b"hello".to_vec()));
        assert_eq!(disk.get("k1").await.unwrap(), Some(b"hello".to_vec()));
    }
}
