//! Configuration for LodeCache

use crate::LodeCacheError;
use serde::Deserialize;

/// Main configuration structure
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct Config {
    pub server: ServerConfig,
    pub cache: CacheConfig,
    pub metrics: MetricsConfig,
}

/// Server configuration
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct ServerConfig {
    /// Address to listen on
    pub listen_addr: String,

    /// Maximum number of concurrent connections
    pub max_connections: usize,

    /// Read buffer size per connection (bytes)
    pub read_buffer_size: usize,

    /// Write buffer size per connection (bytes)
    pub write_buffer_size: usize,

    /// Number of Tokio worker threads (0 = number of CPUs)
    pub worker_threads: usize,

    /// Close connections idle for this long (0 = never)
    pub idle_timeout_secs: u64,

    /// Largest payload a storage command may carry (bytes)
    pub max_item_size: usize,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            listen_addr: "127.0.0.1:11211".to_string(),
            max_connections: 10000,
            read_buffer_size: 8192,
            write_buffer_size: 8192,
            worker_threads: 0,
            idle_timeout_secs: 10,
            max_item_size: 1024 * 1024, // 1MB
        }
    }
}

/// Cache engine configuration
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct CacheConfig {
    /// Payload byte budget enforced by LRU eviction (0 = unbounded)
    pub max_bytes: u64,

    /// Share of `max_bytes` freed by one eviction pass, in percent
    pub lru_recovery_pct: u8,

    /// Seconds between expired-entry sweeps (0 = no reaper)
    pub reap_interval_secs: u64,
}

impl Default for CacheConfig {
    fn default() -> Self {
        Self {
            max_bytes: 0,
            lru_recovery_pct: 20,
            reap_interval_secs: 30,
        }
    }
}

/// Metrics and health check configuration
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct MetricsConfig {
    /// Enable metrics collection
    pub enabled: bool,

    /// Address for metrics/health HTTP server
    pub listen_addr: String,
}

impl Default for MetricsConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            listen_addr: "127.0.0.1:9090".to_string(),
        }
    }
}

impl Config {
    /// Load configuration from a TOML file
    pub fn from_file(path: &str) -> crate::Result<Self> {
        let contents = std::fs::read_to_string(path)
            .map_err(|e| LodeCacheError::Config(format!("Failed to read config file: {e}")))?;

        Self::from_toml(&contents)
    }

    pub fn from_toml(contents: &str) -> crate::Result<Self> {
        toml::from_str(contents)
            .map_err(|e| LodeCacheError::Config(format!("Failed to parse config: {e}")))
    }

    /// Load configuration from environment variables or use defaults
    pub fn from_env() -> Self {
        Self::from_vars(|name| std::env::var(name).ok())
    }

    /// Defaults overridden by whatever `lookup` returns for the `LODECACHE_*` names
    pub fn from_vars(lookup: impl Fn(&str) -> Option<String>) -> Self {
        let mut config = Self::default();

        if let Some(addr) = lookup("LODECACHE_LISTEN_ADDR") {
            config.server.listen_addr = addr;
        }
        if let Some(n) = parse_var(&lookup, "LODECACHE_MAX_CONNECTIONS") {
            config.server.max_connections = n;
        }
        if let Some(n) = parse_var(&lookup, "LODECACHE_WORKER_THREADS") {
            config.server.worker_threads = n;
        }
        if let Some(secs) = parse_var(&lookup, "LODECACHE_IDLE_TIMEOUT_SECS") {
            config.server.idle_timeout_secs = secs;
        }
        if let Some(size) = parse_var(&lookup, "LODECACHE_MAX_ITEM_SIZE") {
            config.server.max_item_size = size;
        }

        if let Some(bytes) = parse_var(&lookup, "LODECACHE_MAX_BYTES") {
            config.cache.max_bytes = bytes;
        }
        if let Some(pct) = parse_var(&lookup, "LODECACHE_LRU_RECOVERY_PCT") {
            config.cache.lru_recovery_pct = pct;
        }
        if let Some(secs) = parse_var(&lookup, "LODECACHE_REAP_INTERVAL_SECS") {
            config.cache.reap_interval_secs = secs;
        }

        if let Some(addr) = lookup("LODECACHE_METRICS_ADDR") {
            config.metrics.listen_addr = addr;
        }
        if let Some(enabled) = lookup("LODECACHE_METRICS_ENABLED") {
            config.metrics.enabled = enabled.to_lowercase() == "true" || enabled == "1";
        }

        config
    }
}

fn parse_var<T: std::str::FromStr>(
    lookup: &impl Fn(&str) -> Option<String>,
    name: &str,
) -> Option<T> {
    let raw = lookup(name)?;
    match raw.parse() {
        Ok(value) => Some(value),
        Err(_) => {
            tracing::warn!(var = name, value = %raw, "Ignoring unparseable environment variable");
            None
        }
    }
}
