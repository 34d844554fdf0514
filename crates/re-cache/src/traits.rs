//! The capability set every tier implements: `Contains`, `FindMissing`,
//! `Get`, `GetMulti`, `Set`, `SetMulti`, `Delete`, `Reader`, `Writer`,
//! `Check`, `Size`. `WithIsolation` is a free function ([`crate::isolation::with_isolation`])
//! rather than a trait method, since it must return a wrapper over `Arc<dyn Cache>`.

use async_trait::async_trait;
use re_core::Result;
use std::collections::HashMap;
use std::pin::Pin;
use tokio::io::{AsyncRead, AsyncWrite};

/// A streaming writer into a cache tier. Dropping without calling
/// [`CacheWriter::commit`] leaves no entry visible in the tier's index —
/// failure before commit is silently abandoned, to be swept up by a later
/// rebuild (disk tier) or simply garbage collected (memory tier).
#[async_trait]
pub trait CacheWriter: AsyncWrite + Unpin + Send {
    /// Finalize the write: for the disk tier this performs the atomic
    /// rename and LRU insert; for the memory tier this performs the
    /// buffered `Set`. Returns the total number of bytes written.
    async fn commit(self: Box<Self>) -> Result<i64>;
}

pub type BoxedReader = Pin<Box<dyn AsyncRead + Unpin + Send>>;

/// The common interface implemented by every storage tier (memory, disk,
/// redis) and every wrapper over a tier (composed, isolated).
#[async_trait]
pub trait Cache: Send + Sync {
    /// Whether `key` is present. A hit counts as a read for LRU purposes.
    async fn contains(&self, key: &str) -> Result<bool>;

    /// Of `keys`, return those NOT present in this cache.
    async fn find_missing(&self, keys: &[String]) -> Result<Vec<String>>;

    /// Fetch the full value for `key`, or `None` if absent.
    async fn get(&self, key: &str) -> Result<Option<Vec<u8>>>;

    /// Bulk form of [`Cache::get`]; absent keys are omitted from the map.
    async fn get_multi(&self, keys: &[String]) -> Result<HashMap<String, Vec<u8>>>;

    /// Store `data` under `key`. Tiers with a `unit_size_limit` reject
    /// oversize values with `Error::ResourceExhausted`.
    async fn set(&self, key: &str, data: Vec<u8>) -> Result<()>;

    /// Bulk form of [`Cache::set`].
    async fn set_multi(&self, items: HashMap<String, Vec<u8>>) -> Result<()>;

    /// Remove `key`, if present. Removing an absent key is not an error.
    async fn delete(&self, key: &str) -> Result<()>;

    /// Open a reader over `key`'s value starting at `offset`.
    /// `Error::NotFound` if `key` is absent.
    async fn reader(&self, key: &str, offset: i64) -> Result<BoxedReader>;

    /// Open a streaming writer for `key`. The write is not visible to
    /// other readers until [`CacheWriter::commit`] is called.
    async fn writer(&self, key: &str) -> Result<Box<dyn CacheWriter>>;

    /// A liveness check for this tier; a failing tier is logged by the
    /// caller but not removed from composition (degraded mode).
    async fn check(&self) -> Result<()>;

    /// Approximate current size in bytes. May be slightly stale.
    async fn size(&self) -> i64;
}
