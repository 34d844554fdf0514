//! Tiered content-addressable cache: memory, disk, and redis tiers behind
//! a common read-through/write-through composition, with an isolation
//! wrapper that namespaces keys by `{cache-kind, instance}`.

pub mod config;
pub mod isolation;
pub mod lru;
pub mod tiers;
pub mod traits;

pub use isolation::{with_isolation, IsolationKind};
pub use tiers::composed::{build as build_composed, Mode as ComposedMode};
pub use traits::{Cache, CacheWriter};

use config::CachesConfig;
use re_core::{Error, Result};
use std::path::PathBuf;
use std::sync::Arc;

/// Build the composed cache described by `config`, innermost tier (disk)
/// first. At least one tier must be enabled.
pub async fn build_from_config(config: &CachesConfig) -> Result<Arc<dyn Cache>> {
    let mut tiers: Vec<Arc<dyn Cache>> = Vec::new();

    if let Some(disk_cfg) = config.disk.as_ref().filter(|c| c.enabled) {
        let root = disk_cfg
            .cache_addr
            .as_ref()
            .ok_or_else(|| Error::invalid_argument("disk tier enabled without cache_addr"))?;
        let disk = tiers::disk::DiskCache::new(
            PathBuf::from(root),
            disk_cfg.cache_size,
            disk_cfg.unit_size_limitation,
        )
        .await?;
        tiers.push(Arc::new(disk));
    }

    if let Some(redis_cfg) = config.redis.as_ref().filter(|c| c.enabled) {
        let addr = redis_cfg
            .cache_addr
            .as_ref()
            .ok_or_else(|| Error::invalid_argument("redis tier enabled without cache_addr"))?;
        let redis = tiers::redis::RedisCache::connect(
            addr,
            re_core::constants::REDIS_DEFAULT_TTL,
            redis_cfg.unit_size_limitation,
        )
        .await?;
        tiers.push(Arc::new(redis));
    }

    if let Some(mem_cfg) = config.inmemory.as_ref().filter(|c| c.enabled) {
        let memory = tiers::memory::MemoryCache::new(mem_cfg.cache_size, mem_cfg.unit_size_limitation);
        tiers.push(Arc::new(memory));
    }

    if tiers.is_empty() {
        return Err(Error::invalid_argument("no cache tier is enabled"));
    }

    // Full read-through/write-through unless disk is the only tier.
    let mode = if tiers.len() == 1 {
        ComposedMode::empty()
    } else {
        ComposedMode::READ_THROUGH | ComposedMode::WRITE_THROUGH
    };

    Ok(build_composed(tiers, mode))
}
