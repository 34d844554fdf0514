//! Namespacing every key by `{cache-kind, instance}`.
//!
//! Every [`Cache`] method is keyed by a blob's bare sha256 hex hash; the
//! isolation wrapper rewrites that hash into the fully-qualified storage
//! key before delegating to the wrapped cache. The underlying tiers never
//! see anything but the final string — they have no notion of "kind" or
//! "instance" at all.

use crate::traits::{BoxedReader, Cache, CacheWriter};
use async_trait::async_trait;
use re_core::Result;
use std::collections::HashMap;
use std::sync::Arc;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum IsolationKind {
    /// Action Cache: entries are namespaced by instance.
    Ac,
    /// Content-Addressable Storage: instance-agnostic, content is content.
    Cas,
}

/// Compute the fully-qualified storage key for `hash` under `kind` and
/// `instance`.
pub fn storage_key(kind: IsolationKind, instance: &str, hash: &str) -> String {
    let prefix = bucket_prefix(hash);
    match kind {
        IsolationKind::Ac => format!("ac/{instance}/{prefix}/{hash}"),
        IsolationKind::Cas => format!("{prefix}/{hash}"),
    }
}

fn bucket_prefix(hash: &str) -> &str {
    if hash.len() >= 4 {
        &hash[0..4]
    } else {
        hash
    }
}

/// A lightweight view over a shared cache: the underlying LRU, disk roots,
/// and redis connection are all shared with every other isolation view.
pub struct IsolatedCache {
    inner: Arc<dyn Cache>,
    kind: IsolationKind,
    instance: String,
}

/// Wrap `inner` in an isolation view scoped to `(kind, instance)`.
pub fn with_isolation(inner: Arc<dyn Cache>, kind: IsolationKind, instance: &str) -> Arc<dyn Cache> {
    Arc::new(IsolatedCache {
        inner,
        kind,
        instance: instance.to_string(),
    })
}

impl IsolatedCache {
    fn key(&self, hash: &str) -> String {
        storage_key(self.kind, &self.instance, hash)
    }
}

#[async_trait]
impl Cache for IsolatedCache {
    async fn contains(&self, hash: &str) -> Result<bool> {
        self.inner.contains(&self.key(hash)).await
    }

    async fn find_missing(&self, hashes: &[String]) -> Result<Vec<String>> {
        let mapped: Vec<String> = hashes.iter().map(|h| self.key(h)).collect();
        let missing_mapped = self.inner.find_missing(&mapped).await?;
        // Translate back: a mapped key is missing iff the original hash is missing.
        let missing_set: std::collections::HashSet<String> = missing_mapped.into_iter().collect();
        Ok(hashes
            .iter()
            .filter(|h| missing_set.contains(&self.key(h)))
            .cloned()
            .collect())
    }

    async fn get(&self, hash: &str) -> Result<Option<Vec<u8>>> {
        self.inner.get(&self.key(hash)).await
    }

    async fn get_multi(&self, hashes: &[String]) -> Result<HashMap<String, Vec<u8>>> {
        let mapped: Vec<String> = hashes.iter().map(|h| self.key(h)).collect();
        let results = self.inner.get_multi(&mapped).await?;
        Ok(hashes
            .iter()
            .filter_map(|h| results.get(&self.key(h)).map(|v| (h.clone(), v.clone())))
            .collect())
    }

    async fn set(&self, hash: &str, data: Vec<u8>) -> Result<()> {
        self.inner.set(&self.key(hash), data).await
    }

    async fn set_multi(&self, items: HashMap<String, Vec<u8>>) -> Result<()> {
        let mapped = items
            .into_iter()
            .map(|(h, v)| (self.key(&h), v))
            .collect();
        self.inner.set_multi(mapped).await
    }

    async fn delete(&self, hash: &str) -> Result<()> {
        self.inner.delete(&self.key(hash)).await
    }

    async fn reader(&self, hash: &str, offset: i64) -> Result<BoxedReader> {
        self.inner.reader(&self.key(hash), offset).await
    }

    async fn writer(&self, hash: &str) -> Result<Box<dyn CacheWriter>> {
        self.inner.writer(&self.key(hash)).await
    }

    async fn check(&self) -> Result<()> {
        self.inner.check().await
    }

    async fn size(&self) -> i64 {
        self.inner.size().await
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn ac_keys_are_instance_scoped() {
        let k1 = storage_key(IsolationKind::Ac, "i1", "abcd1234");
        let k2 = storage_key(IsolationKind::Ac, "i2", "abcd1234");
        assert_ne!(k1, k2);
        assert_eq!(k1, "ac/i1/abcd/abcd1234");
    }

    #[test]
    fn cas_keys_ignore_instance() {
        let k1 = storage_key(IsolationKind::Cas, "i1", "abcd1234");
        let k2 = storage_key(IsolationKind::Cas, "i2", "abcd1234");
        assert_eq!(k1, k2);
        assert_eq!(k1, "abcd/abcd1234");
    }
}
