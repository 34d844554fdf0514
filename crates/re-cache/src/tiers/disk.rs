//! On-disk tier: every key maps to a file at `root/key`, bucketed by the
//! isolation wrapper's 4-character hash prefix to bound directory size.

use crate::lru::Lru;
use crate::traits::{BoxedReader, Cache, CacheWriter};
use async_trait::async_trait;
use parking_lot::Mutex;
use re_core::metrics::cache_metrics;
use re_core::{Error, Result};
use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::pin::Pin;
use std::sync::Arc;
use std::task::{Context, Poll};
use tokio::io::{AsyncSeekExt, AsyncWrite};
use tracing::warn;
use uuid::Uuid;

const TIER: &str = "disk";

pub struct DiskCache {
    root: PathBuf,
    lru: Arc<Mutex<Lru<String, i64>>>,
    unit_size_limit: i64,
}

impl DiskCache {
    /// Walk `root` depth-first and rebuild the LRU index before returning.
    /// A walk failure is fatal: an inconsistent index is never tolerated.
    pub async fn new(root: PathBuf, max_size: i64, unit_size_limit: i64) -> Result<Self> {
        let root_for_walk = root.clone();
        let entries = tokio::task::spawn_blocking(move || walk(&root_for_walk))
            .await
            .map_err(|e| Error::internal(format!("disk rebuild task panicked: {e}")))??;

        let root_for_evict = root.clone();
        let lru = Arc::new(Mutex::new(Lru::new(
            max_size,
            |size: &i64| *size,
            move |key: &String, _size: &i64| {
                let path = root_for_evict.join(key);
                if let Err(e) = std::fs::remove_file(&path) {
                    if e.kind() != std::io::ErrorKind::NotFound {
                        warn!(path = %path.display(), error = %e, "failed to evict disk cache file");
                    }
                }
                cache_metrics().record_eviction(TIER);
            },
        )));

        {
            let mut lru = lru.lock();
            // Most recently modified first, so it lands at the head (MRU);
            // the oldest entry ends up at the tail and is evicted first.
            let mut sorted = entries;
            sorted.sort_by(|a, b| b.1.cmp(&a.1));
            for (key, _mtime, size) in sorted {
                lru.push_back(key, size);
            }
        }

        Ok(Self {
            root,
            lru,
            unit_size_limit,
        })
    }

    fn path_for(&self, key: &str) -> PathBuf {
        self.root.join(key)
    }
}

fn walk(root: &Path) -> Result<Vec<(String, std::time::SystemTime, i64)>> {
    let mut out = Vec::new();
    if !root.exists() {
        std::fs::create_dir_all(root).map_err(|e| Error::io("create cache root", root, e))?;
        return Ok(out);
    }
    walk_into(root, root, &mut out)?;
    Ok(out)
}

fn walk_into(
    root: &Path,
    dir: &Path,
    out: &mut Vec<(String, std::time::SystemTime, i64)>,
) -> Result<()> {
    let read_dir = std::fs::read_dir(dir).map_err(|e| Error::io("read cache directory", dir, e))?;
    for entry in read_dir {
        let entry = entry.map_err(|e| Error::io("read cache directory entry", dir, e))?;
        let path = entry.path();
        let meta = entry
            .metadata()
            .map_err(|e| Error::io("stat cache entry", &path, e))?;
        if meta.is_dir() {
            walk_into(root, &path, out)?;
        } else if meta.is_file() {
            if path.extension().and_then(|e| e.to_str()) == Some("tmp") {
                // Leftover from a write that never committed; a later
                // rebuild will simply ignore it again until GC'd.
                continue;
            }
            let key = path
                .strip_prefix(root)
                .unwrap_or(&path)
                .to_string_lossy()
                .replace(std::path::MAIN_SEPARATOR, "/");
            let mtime = meta.modified().unwrap_or(std::time::SystemTime::UNIX_EPOCH);
            out.push((key, mtime, meta.len() as i64));
        }
    }
    Ok(())
}

#[async_trait]
impl Cache for DiskCache {
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
        if !self.lru.lock().contains(&key.to_string()) {
            cache_metrics().record_miss(TIER);
            return Ok(None);
        }
        let path = self.path_for(key);
        match tokio::fs::read(&path).await {
            Ok(data) => {
                cache_metrics().record_hit(TIER);
                Ok(Some(data))
            }
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                // Out-of-band deletion: self-heal by dropping the stale entry.
                self.lru.lock().remove(&key.to_string());
                cache_metrics().record_miss(TIER);
                Ok(None)
            }
            Err(e) => Err(Error::io("read cache blob", &path, e)),
        }
    }

    async fn get_multi(&self, keys: &[String]) -> Result<HashMap<String, Vec<u8>>> {
        let mut out = HashMap::new();
        for key in keys {
            if let Some(data) = self.get(key).await? {
                out.insert(key.clone(), data);
            }
        }
        Ok(out)
    }

    async fn set(&self, key: &str, data: Vec<u8>) -> Result<()> {
        if data.len() as i64 > self.unit_size_limit {
            return Err(Error::ResourceExhausted(format!(
                "blob of {} bytes exceeds disk tier unit limit of {}",
                data.len(),
                self.unit_size_limit
            )));
        }
        // Same key, same size: treat as a no-op read rather than rewriting
        // an identical file. `get` promotes the entry to MRU on the way out.
        if self.lru.lock().get(&key.to_string()) == Some(&(data.len() as i64)) {
            return Ok(());
        }
        let path = self.path_for(key);
        re_util::atomic_file::write_atomic(&path, &data)?;
        self.lru.lock().add(key.to_string(), data.len() as i64);
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
        if !self.lru.lock().contains(&key.to_string()) {
            return Err(Error::not_found(key));
        }
        let path = self.path_for(key);
        let mut file = match tokio::fs::File::open(&path).await {
            Ok(f) => f,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                self.lru.lock().remove(&key.to_string());
                return Err(Error::not_found(key));
            }
            Err(e) => return Err(Error::io("open cache blob", &path, e)),
        };
        if offset > 0 {
            file.seek(std::io::SeekFrom::Start(offset as u64))
                .await
                .map_err(|e| Error::io("seek cache blob", &path, e))?;
        }
        Ok(Box::pin(file))
    }

    async fn writer(&self, key: &str) -> Result<Box<dyn CacheWriter>> {
        let final_path = self.path_for(key);
        let temp_path = final_path.with_file_name(format!(
            "{}.{}.tmp",
            final_path.file_name().unwrap_or_default().to_string_lossy(),
            Uuid::new_v4()
        ));
        if let Some(parent) = temp_path.parent() {
            tokio::fs::create_dir_all(parent)
                .await
                .map_err(|e| Error::io("create parent directory", parent, e))?;
        }
        let file = tokio::fs::File::create(&temp_path)
            .await
            .map_err(|e| Error::io("create temp file", &temp_path, e))?;
        Ok(Box::new(DiskWriter {
            lru: self.lru.clone(),
            unit_size_limit: self.unit_size_limit,
            key: key.to_string(),
            final_path,
            temp_path,
            file,
            written: 0,
        }))
    }

    async fn check(&self) -> Result<()> {
        tokio::fs::metadata(&self.root)
            .await
            .map(|_| ())
            .map_err(|e| Error::io("stat cache root", &self.root, e))
    }

    async fn size(&self) -> i64 {
        self.lru.lock().size()
    }
}

struct DiskWriter {
    lru: Arc<Mutex<Lru<String, i64>>>,
    unit_size_limit: i64,
    key: String,
    final_path: PathBuf,
    temp_path: PathBuf,
    file: tokio::fs::File,
    written: i64,
}

impl AsyncWrite for DiskWriter {
    fn poll_write(
        mut self: Pin<&mut Self>,
        cx: &mut Context<'_>,
        buf: &[u8],
    ) -> Poll<std::io::Result<usize>> {
        let poll = Pin::new(&mut self.file).poll_write(cx, buf);
        if let Poll::Ready(Ok(n)) = &poll {
            self.written += *n as i64;
        }
        poll
    }

    fn poll_flush(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<std::io::Result<()>> {
        Pin::new(&mut self.file).poll_flush(cx)
    }

    fn poll_shutdown(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<std::io::Result<()>> {
        Pin::new(&mut self.file).poll_shutdown(cx)
    }
}

#[async_trait]
impl CacheWriter for DiskWriter {
    async fn commit(mut self: Box<Self>) -> Result<i64> {
        use tokio::io::AsyncWriteExt;
        if self.written > self.unit_size_limit {
            let _ = tokio::fs::remove_file(&self.temp_path).await;
            return Err(Error::ResourceExhausted(format!(
                "blob of {} bytes exceeds disk tier unit limit of {}",
                self.written, self.unit_size_limit
            )));
        }
        self.file
            .flush()
            .await
            .map_err(|e| Error::io("flush temp file", &self.temp_path, e))?;
        self.file
            .sync_all()
            .await
            .map_err(|e| Error::io("sync temp file", &self.temp_path, e))?;
        tokio::fs::rename(&self.temp_path, &self.final_path)
            .await
            .map_err(|e| {
                Error::io("atomic rename", &self.final_path, e)
            })?;
        self.lru.lock().add(self.key.clone(), self.written);
        Ok(self.written)
    }
}

impl Drop for DiskWriter {
    fn drop(&mut self) {
        // Abandoned before commit: the temp file is left for a later
        // rebuild to ignore (walk() skips ".tmp" files outright).
    }
}
