//! Configuration loading for Ontrol.
//!
//! Every tunable the control plane takes lives here: the server bind, the
//! connection pool, the circuit breaker, cache TTLs, the health monitor, the
//! fuzzy search token list, the CPE scraper invocation, and the seeded
//! router list the daemon uses when no external router store is wired in.
//!
//! # Config File Locations
//!
//! Files are loaded in order (later wins):
//! 1. `/etc/ontrol/config.toml` (system)
//! 2. `~/.config/ontrol/config.toml` (user)
//! 3. `./ontrol.toml` (local override, or `--config` path)
//! 4. Environment variables (`ONTROL_*`)
//!
//! # Example Config
//!
//! ```toml
//! debug = false
//!
//! [server]
//! host = "0.0.0.0"
//! port = 8080
//!
//! [pool]
//! max_per_router = 5
//! idle_timeout_secs = 300
//!
//! [breaker]
//! failure_threshold = 3
//! open_timeout_secs = 45
//!
//! [[routers]]
//! id = "rtr-01"
//! name = "cipanas-01"
//! host = "172.16.0.2"
//! port = 8728
//! username = "ontrol"
//! secret = "s3cret"
//! tunnel_endpoint = "103.10.20.5:7001"
//! public_ont_url = "http://103.10.20.5:7001"
//! ```

pub mod loader;

pub use loader::{discover_config_files, discover_config_files_with_override, ConfigSources};

use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use std::time::Duration;
use thiserror::Error;

/// Configuration loading errors.
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("Failed to read config file {path}: {source}")]
    FileRead {
        path: PathBuf,
        source: std::io::Error,
    },

    #[error("Failed to parse config file {path}: {message}")]
    Parse { path: PathBuf, message: String },

    #[error("Invalid environment override {var}: {message}")]
    EnvOverride { var: String, message: String },
}

/// Complete Ontrol configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct OntrolConfig {
    /// Verbose logging and non-headless scraper runs.
    pub debug: bool,

    pub server: ServerConfig,
    pub pool: PoolConfig,
    pub breaker: BreakerConfig,
    pub cache: CacheConfig,
    pub health: HealthConfig,
    pub search: SearchConfig,
    pub scraper: ScraperConfig,

    /// Routers seeded into the directory when no external store is wired in.
    pub routers: Vec<RouterEntry>,
}

impl Default for OntrolConfig {
    fn default() -> Self {
        Self {
            debug: true,
            server: ServerConfig::default(),
            pool: PoolConfig::default(),
            breaker: BreakerConfig::default(),
            cache: CacheConfig::default(),
            health: HealthConfig::default(),
            search: SearchConfig::default(),
            scraper: ScraperConfig::default(),
            routers: Vec::new(),
        }
    }
}

impl OntrolConfig {
    /// Load from the standard file locations plus environment overrides.
    pub fn load() -> Result<Self, ConfigError> {
        loader::load(None).map(|(config, _)| config)
    }

    /// Load, reporting which files and env vars contributed.
    pub fn load_with_sources_from(
        cli_path: Option<&std::path::Path>,
    ) -> Result<(Self, ConfigSources), ConfigError> {
        loader::load(cli_path)
    }

    /// Effective tracing filter: explicit `RUST_LOG` wins at init time; this
    /// is the fallback the daemon hands to the subscriber.
    pub fn log_filter(&self) -> &'static str {
        if self.debug {
            "debug"
        } else {
            "info"
        }
    }

    /// Render the merged config back to TOML (for `--show-config`).
    pub fn to_toml(&self) -> String {
        toml::to_string_pretty(self).unwrap_or_else(|e| format!("# serialization error: {e}"))
    }
}

/// Bind address for the external API layer.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ServerConfig {
    pub host: String,
    pub port: u16,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            host: "localhost".to_string(),
            port: 8080,
        }
    }
}

/// Connection pool tuning.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct PoolConfig {
    pub max_per_router: usize,
    pub idle_timeout_secs: u64,
    pub max_lifetime_secs: u64,
    pub cleanup_interval_secs: u64,
    pub probe_timeout_secs: u64,
}

impl Default for PoolConfig {
    fn default() -> Self {
        Self {
            max_per_router: 5,
            idle_timeout_secs: 300,
            max_lifetime_secs: 1800,
            cleanup_interval_secs: 30,
            probe_timeout_secs: 5,
        }
    }
}

impl PoolConfig {
    pub fn idle_timeout(&self) -> Duration {
        Duration::from_secs(self.idle_timeout_secs)
    }
    pub fn max_lifetime(&self) -> Duration {
        Duration::from_secs(self.max_lifetime_secs)
    }
    pub fn cleanup_interval(&self) -> Duration {
        Duration::from_secs(self.cleanup_interval_secs)
    }
    pub fn probe_timeout(&self) -> Duration {
        Duration::from_secs(self.probe_timeout_secs)
    }
}

/// Circuit breaker tuning, applied to every router.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct BreakerConfig {
    pub failure_threshold: u32,
    pub open_timeout_secs: u64,
}

impl Default for BreakerConfig {
    fn default() -> Self {
        Self {
            failure_threshold: 3,
            open_timeout_secs: 45,
        }
    }
}

impl BreakerConfig {
    pub fn open_timeout(&self) -> Duration {
        Duration::from_secs(self.open_timeout_secs)
    }
}

/// Fleet and health cache TTLs.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct CacheConfig {
    pub fleet_ttl_secs: u64,
    pub health_ttl_secs: u64,
    pub health_janitor_secs: u64,
}

impl Default for CacheConfig {
    fn default() -> Self {
        Self {
            fleet_ttl_secs: 30,
            health_ttl_secs: 300,
            health_janitor_secs: 600,
        }
    }
}

impl CacheConfig {
    pub fn fleet_ttl(&self) -> Duration {
        Duration::from_secs(self.fleet_ttl_secs)
    }
    pub fn health_ttl(&self) -> Duration {
        Duration::from_secs(self.health_ttl_secs)
    }
    pub fn health_janitor_interval(&self) -> Duration {
        Duration::from_secs(self.health_janitor_secs)
    }
}

/// Health monitor tuning.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct HealthConfig {
    pub probe_interval_secs: u64,
    pub fail_threshold: u32,
    pub degraded_threshold_ms: u64,
}

impl Default for HealthConfig {
    fn default() -> Self {
        Self {
            probe_interval_secs: 30,
            fail_threshold: 3,
            degraded_threshold_ms: 1000,
        }
    }
}

impl HealthConfig {
    pub fn probe_interval(&self) -> Duration {
        Duration::from_secs(self.probe_interval_secs)
    }
}

/// Fuzzy subscriber search tuning.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct SearchConfig {
    /// Locality tokens for the pattern component. Empty means use the
    /// built-in default set.
    pub locality_tokens: Vec<String>,
    pub default_limit: usize,
    pub max_unscoped_limit: usize,
}

impl Default for SearchConfig {
    fn default() -> Self {
        Self {
            locality_tokens: Vec::new(),
            default_limit: 5,
            max_unscoped_limit: 10,
        }
    }
}

/// CPE credential scraper invocation.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ScraperConfig {
    /// Path to the scraper executable.
    pub binary: PathBuf,
    /// Working directory prepared before each run.
    pub workdir: PathBuf,
    pub timeout_secs: u64,
}

impl Default for ScraperConfig {
    fn default() -> Self {
        Self {
            binary: PathBuf::from("ont-scraper"),
            workdir: default_scraper_workdir(),
            timeout_secs: 120,
        }
    }
}

fn default_scraper_workdir() -> PathBuf {
    directories::BaseDirs::new()
        .map(|dirs| dirs.home_dir().join(".local/share/ontrol/scraper"))
        .unwrap_or_else(|| PathBuf::from(".ontrol/scraper"))
}

impl ScraperConfig {
    pub fn timeout(&self) -> Duration {
        Duration::from_secs(self.timeout_secs)
    }
}

/// A router seeded from the config file.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RouterEntry {
    pub id: String,
    pub name: String,
    pub host: String,
    #[serde(default = "default_api_port")]
    pub port: u16,
    pub username: String,
    pub secret: String,
    #[serde(default)]
    pub tunnel_endpoint: String,
    #[serde(default)]
    pub public_ont_url: String,
    #[serde(default = "default_enabled")]
    pub enabled: bool,
}

fn default_api_port() -> u16 {
    8728
}

fn default_enabled() -> bool {
    true
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_match_the_documented_knobs() {
        let config = OntrolConfig::default();
        assert!(config.debug);
        assert_eq!(config.server.host, "localhost");
        assert_eq!(config.server.port, 8080);
        assert_eq!(config.pool.max_per_router, 5);
        assert_eq!(config.pool.idle_timeout(), Duration::from_secs(300));
        assert_eq!(config.pool.max_lifetime(), Duration::from_secs(1800));
        assert_eq!(config.pool.cleanup_interval(), Duration::from_secs(30));
        assert_eq!(config.breaker.failure_threshold, 3);
        assert_eq!(config.cache.fleet_ttl(), Duration::from_secs(30));
        assert_eq!(config.cache.health_ttl(), Duration::from_secs(300));
        assert_eq!(config.health.fail_threshold, 3);
        assert_eq!(config.health.degraded_threshold_ms, 1000);
        assert_eq!(config.search.default_limit, 5);
        assert_eq!(config.search.max_unscoped_limit, 10);
        assert!(config.routers.is_empty());
    }

    #[test]
    fn partial_toml_fills_from_defaults() {
        let config: OntrolConfig = toml::from_str(
            r#"
            debug = false

            [server]
            port = 9000

            [[routers]]
            id = "r1"
            name = "edge-1"
            host = "10.0.0.1"
            username = "api"
            secret = "x"
            "#,
        )
        .unwrap();
        assert!(!config.debug);
        assert_eq!(config.server.port, 9000);
        assert_eq!(config.server.host, "localhost");
        assert_eq!(config.routers.len(), 1);
        assert_eq!(config.routers[0].port, 8728);
        assert!(config.routers[0].enabled);
        assert_eq!(config.log_filter(), "info");
    }
}
