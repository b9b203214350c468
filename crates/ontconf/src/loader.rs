//! Config file discovery, loading, and environment variable overlay.

use crate::{ConfigError, OntrolConfig};
use std::env;
use std::path::{Path, PathBuf};

/// Information about where config values came from.
#[derive(Debug, Clone, Default)]
pub struct ConfigSources {
    /// Config files that were loaded (in order)
    pub files: Vec<PathBuf>,
    /// Environment variables that overrode config values
    pub env_overrides: Vec<String>,
}

/// Discover config files in standard locations.
///
/// Returns paths in load order (system, user, local).
/// Only returns files that exist.
pub fn discover_config_files() -> Vec<PathBuf> {
    discover_config_files_with_override(None)
}

/// Discover config files, optionally with a CLI override path.
///
/// If `cli_path` is provided and exists, it replaces the local override.
/// Returns paths in load order (system, user, local/cli).
pub fn discover_config_files_with_override(cli_path: Option<&Path>) -> Vec<PathBuf> {
    let mut files = Vec::new();

    // System config
    let system = PathBuf::from("/etc/ontrol/config.toml");
    if system.exists() {
        files.push(system);
    }

    // User config (XDG_CONFIG_HOME or ~/.config)
    if let Some(config_dir) = directories::BaseDirs::new().map(|d| d.config_dir().to_path_buf()) {
        let user = config_dir.join("ontrol/config.toml");
        if user.exists() {
            files.push(user);
        }
    }

    // CLI override takes precedence over local
    if let Some(path) = cli_path {
        if path.exists() {
            files.push(path.to_path_buf());
            return files;
        }
    }

    // Local override (current directory)
    let local = PathBuf::from("ontrol.toml");
    if local.exists() {
        files.push(local);
    }

    files
}

/// Load and merge config files, then apply environment overrides.
pub fn load(cli_path: Option<&Path>) -> Result<(OntrolConfig, ConfigSources), ConfigError> {
    let files = discover_config_files_with_override(cli_path);

    let mut merged = toml::Table::new();
    for path in &files {
        let table = read_table(path)?;
        merge_tables(&mut merged, table);
    }

    let mut config: OntrolConfig =
        toml::Value::Table(merged)
            .try_into()
            .map_err(|e: toml::de::Error| ConfigError::Parse {
                path: files.last().cloned().unwrap_or_default(),
                message: e.to_string(),
            })?;

    let env_overrides = apply_env_overrides(&mut config)?;

    Ok((
        config,
        ConfigSources {
            files,
            env_overrides,
        },
    ))
}

/// Parse config from a TOML string (exposed for tests and embedding).
pub fn load_from_str(contents: &str, origin: &Path) -> Result<OntrolConfig, ConfigError> {
    toml::from_str(contents).map_err(|e| ConfigError::Parse {
        path: origin.to_path_buf(),
        message: e.to_string(),
    })
}

fn read_table(path: &Path) -> Result<toml::Table, ConfigError> {
    let contents = std::fs::read_to_string(path).map_err(|e| ConfigError::FileRead {
        path: path.to_path_buf(),
        source: e,
    })?;
    contents.parse().map_err(|e: toml::de::Error| ConfigError::Parse {
        path: path.to_path_buf(),
        message: e.to_string(),
    })
}

/// Later tables win key-by-key; nested tables merge recursively. Arrays
/// (like `[[routers]]`) replace wholesale so a local file can redefine the
/// fleet instead of appending to the system one.
fn merge_tables(base: &mut toml::Table, overlay: toml::Table) {
    for (key, value) in overlay {
        match (base.get_mut(&key), value) {
            (Some(toml::Value::Table(b)), toml::Value::Table(o)) => merge_tables(b, o),
            (slot, value) => {
                if let Some(slot) = slot {
                    *slot = value;
                } else {
                    base.insert(key, value);
                }
            }
        }
    }
}

/// Apply `ONTROL_*` environment overrides. Returns the list of variables
/// that took effect.
fn apply_env_overrides(config: &mut OntrolConfig) -> Result<Vec<String>, ConfigError> {
    let mut applied = Vec::new();

    fn parse<T: std::str::FromStr>(var: &str, raw: &str) -> Result<T, ConfigError>
    where
        T::Err: std::fmt::Display,
    {
        raw.parse().map_err(|e: T::Err| ConfigError::EnvOverride {
            var: var.to_string(),
            message: e.to_string(),
        })
    }

    let mut take = |var: &str| -> Option<String> {
        let value = env::var(var).ok()?;
        applied.push(var.to_string());
        Some(value)
    };

    if let Some(v) = take("ONTROL_DEBUG") {
        config.debug = parse("ONTROL_DEBUG", &v)?;
    }
    if let Some(v) = take("ONTROL_SERVER_HOST") {
        config.server.host = v;
    }
    if let Some(v) = take("ONTROL_SERVER_PORT") {
        config.server.port = parse("ONTROL_SERVER_PORT", &v)?;
    }
    if let Some(v) = take("ONTROL_POOL_MAX_PER_ROUTER") {
        config.pool.max_per_router = parse("ONTROL_POOL_MAX_PER_ROUTER", &v)?;
    }
    if let Some(v) = take("ONTROL_POOL_IDLE_TIMEOUT_SECS") {
        config.pool.idle_timeout_secs = parse("ONTROL_POOL_IDLE_TIMEOUT_SECS", &v)?;
    }
    if let Some(v) = take("ONTROL_POOL_MAX_LIFETIME_SECS") {
        config.pool.max_lifetime_secs = parse("ONTROL_POOL_MAX_LIFETIME_SECS", &v)?;
    }
    if let Some(v) = take("ONTROL_BREAKER_FAILURE_THRESHOLD") {
        config.breaker.failure_threshold = parse("ONTROL_BREAKER_FAILURE_THRESHOLD", &v)?;
    }
    if let Some(v) = take("ONTROL_BREAKER_OPEN_TIMEOUT_SECS") {
        config.breaker.open_timeout_secs = parse("ONTROL_BREAKER_OPEN_TIMEOUT_SECS", &v)?;
    }
    if let Some(v) = take("ONTROL_CACHE_FLEET_TTL_SECS") {
        config.cache.fleet_ttl_secs = parse("ONTROL_CACHE_FLEET_TTL_SECS", &v)?;
    }
    if let Some(v) = take("ONTROL_HEALTH_PROBE_INTERVAL_SECS") {
        config.health.probe_interval_secs = parse("ONTROL_HEALTH_PROBE_INTERVAL_SECS", &v)?;
    }
    if let Some(v) = take("ONTROL_HEALTH_FAIL_THRESHOLD") {
        config.health.fail_threshold = parse("ONTROL_HEALTH_FAIL_THRESHOLD", &v)?;
    }
    if let Some(v) = take("ONTROL_SCRAPER_BINARY") {
        config.scraper.binary = PathBuf::from(v);
    }
    if let Some(v) = take("ONTROL_SCRAPER_WORKDIR") {
        config.scraper.workdir = PathBuf::from(v);
    }

    Ok(applied)
}
