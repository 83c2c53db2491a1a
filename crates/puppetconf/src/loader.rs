//! Config file discovery, table merging, and environment variable overlay.

use crate::{ConfigError, PuppetConfig};
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

/// Discover config files, optionally with a CLI override path.
///
/// If `cli_path` is provided and exists, it replaces the local override.
/// Returns paths in load order (system, user, local/cli). Only returns files
/// that exist.
pub fn discover_config_files_with_override(cli_path: Option<&Path>) -> Vec<PathBuf> {
    let mut files = Vec::new();

    let system = PathBuf::from("/etc/puppetry/config.toml");
    if system.exists() {
        files.push(system);
    }

    // XDG_CONFIG_HOME or ~/.config
    if let Some(config_dir) = directories::BaseDirs::new().map(|d| d.config_dir().to_path_buf()) {
        let user = config_dir.join("puppetry/config.toml");
        if user.exists() {
            files.push(user);
        }
    }

    if let Some(path) = cli_path {
        if path.exists() {
            files.push(path.to_path_buf());
            return files;
        }
    }

    let local = PathBuf::from("puppetry.toml");
    if local.exists() {
        files.push(local);
    }

    files
}

/// Read a config file as a raw TOML table.
pub fn read_table(path: &Path) -> Result<toml::Table, ConfigError> {
    let contents = std::fs::read_to_string(path).map_err(|e| ConfigError::FileRead {
        path: path.to_path_buf(),
        source: e,
    })?;

    parse_table(&contents, path)
}

pub(crate) fn parse_table(contents: &str, path: &Path) -> Result<toml::Table, ConfigError> {
    contents
        .parse()
        .map_err(|e: toml::de::Error| ConfigError::Parse {
            path: path.to_path_buf(),
            message: e.to_string(),
        })
}

/// Deserialize a merged table; missing keys fall back to compiled defaults.
pub(crate) fn from_table(table: toml::Table, path: &Path) -> Result<PuppetConfig, ConfigError> {
    toml::Value::Table(table)
        .try_into()
        .map_err(|e: toml::de::Error| ConfigError::Parse {
            path: path.to_path_buf(),
            message: e.to_string(),
        })
}

/// Merge `overlay` into `base`. Nested tables merge key by key, every other
/// value in `overlay` replaces the one in `base`.
pub fn merge_tables(base: &mut toml::Table, overlay: toml::Table) {
    for (key, value) in overlay {
        match (base.get_mut(&key), value) {
            (Some(toml::Value::Table(existing)), toml::Value::Table(incoming)) => {
                merge_tables(existing, incoming);
            }
            (_, value) => {
                base.insert(key, value);
            }
        }
    }
}

/// Apply environment variable overrides to config.
pub fn apply_env_overrides(config: &mut PuppetConfig, sources: &mut ConfigSources) {
    if let Ok(v) = env::var("PUPPETRY_SERVER_URL") {
        config.transport.server_url = v;
        sources.env_overrides.push("PUPPETRY_SERVER_URL".to_string());
    }
    if let Ok(v) = env::var("PUPPETRY_VAD_URL") {
        config.transport.vad_url = v;
        sources.env_overrides.push("PUPPETRY_VAD_URL".to_string());
    }
    if let Ok(v) = env::var("PUPPETRY_RECONNECT_DELAY_MS") {
        if let Ok(ms) = v.parse() {
            config.transport.reconnect_delay_ms = ms;
            sources
                .env_overrides
                .push("PUPPETRY_RECONNECT_DELAY_MS".to_string());
        }
    }

    if let Ok(v) = env::var("PUPPETRY_BACKEND_URL") {
        config.backend.http_url = v;
        sources.env_overrides.push("PUPPETRY_BACKEND_URL".to_string());
    }

    if let Ok(v) = env::var("PUPPETRY_BRIDGE_URL") {
        config.target.bridge_url = v;
        sources.env_overrides.push("PUPPETRY_BRIDGE_URL".to_string());
    }

    if let Ok(v) = env::var("PUPPETRY_LOG_LEVEL") {
        config.telemetry.log_level = v;
        sources.env_overrides.push("PUPPETRY_LOG_LEVEL".to_string());
    }
    // Also support RUST_LOG
    if let Ok(v) = env::var("RUST_LOG") {
        config.telemetry.log_level = v;
        sources.env_overrides.push("RUST_LOG".to_string());
    }
}
