//! The server's TOML configuration, decoded 1:1 from the configuration
//! table: `server.*`, `executor.*`, `caches.*`, `debug.*`.

use re_cache::config::CachesConfig;
use serde::Deserialize;

fn default_log_level() -> String {
    "info".to_string()
}

#[derive(Debug, Clone, Deserialize)]
pub struct ServerConfig {
    pub listen_addr: String,
    #[serde(default)]
    pub http_listen_addr: Option<String>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct ExecutorConfig {
    pub listen_addr: String,
    pub work_dir: String,
}

#[derive(Debug, Clone, Deserialize)]
pub struct DebugConfig {
    #[serde(default = "default_log_level")]
    pub log_level: String,
}

impl Default for DebugConfig {
    fn default() -> Self {
        Self {
            log_level: default_log_level(),
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct Config {
    #[serde(default)]
    pub server: Option<ServerConfig>,
    #[serde(default)]
    pub executor: Option<ExecutorConfig>,
    pub caches: CachesConfig,
    #[serde(default)]
    pub debug: DebugConfig,
}

impl Config {
    pub fn from_toml_str(s: &str) -> re_core::Result<Self> {
        toml::from_str(s)
            .map_err(|e| re_core::Error::invalid_argument(format!("malformed config: {e}")))
    }

    pub async fn from_file(path: &std::path::Path) -> re_core::Result<Self> {
        let contents = tokio::fs::read_to_string(path)
            .await
            .map_err(|e| re_core::Error::io("read config file", path, e))?;
        Self::from_toml_str(&contents)
    }
}
