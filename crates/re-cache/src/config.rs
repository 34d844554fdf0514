//! Typed configuration for the tiered cache, decoded from the server's
//! TOML config file (see `caches.*` in the top-level configuration table).

use serde::Deserialize;

fn default_true() -> bool {
    true
}

#[derive(Debug, Clone, Deserialize)]
pub struct TierConfig {
    #[serde(default = "default_true")]
    pub enabled: bool,
    /// Filesystem path (disk tier) or network address (redis tier).
    /// Unused by the memory tier.
    #[serde(default)]
    pub cache_addr: Option<String>,
    pub cache_size: i64,
    pub unit_size_limitation: i64,
}

#[derive(Debug, Clone, Deserialize)]
pub struct CachesConfig {
    #[serde(default)]
    pub disk: Option<TierConfig>,
    #[serde(default)]
    pub inmemory: Option<TierConfig>,
    #[serde(default)]
    pub redis: Option<TierConfig>,
}

impl CachesConfig {
    pub fn enabled_tiers(&self) -> usize {
        [&self.disk, &self.inmemory, &self.redis]
            .into_iter()
            .filter(|t| t.as_ref().is_some_and(|t| t.enabled))
            .count()
    }
}
