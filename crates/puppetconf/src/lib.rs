//! Layered configuration loading for Puppetry.
//!
//! Every crate in the workspace reads its knobs from [`PuppetConfig`]. The
//! loader is deliberately small: TOML files merged key by key, then a handful
//! of environment variables on top.
//!
//! # Config File Locations
//!
//! Files are loaded in order (later wins):
//! 1. `/etc/puppetry/config.toml` (system)
//! 2. `~/.config/puppetry/config.toml` (user)
//! 3. `./puppetry.toml` (local override, replaced by `--config` when given)
//! 4. Environment variables (`PUPPETRY_*`, `RUST_LOG`)
//!
//! # Example Config
//!
//! ```toml
//! [transport]
//! server_url = "ws://studio.local:8000/ws"
//! vad_url = "ws://studio.local:8000/ws-vad"
//! reconnect_delay_ms = 1000
//!
//! [backend]
//! http_url = "http://studio.local:8000"
//!
//! [target]
//! bridge_url = "ws://localhost:8765"
//!
//! [playback]
//! latency_ms = 120
//!
//! [capture]
//! send_interval_ms = 60
//!
//! [telemetry]
//! log_level = "info,puppetstage=debug"
//! ```

pub mod loader;
pub mod sections;

pub use loader::{discover_config_files_with_override, ConfigSources};
pub use sections::{
    BackendConfig, CaptureConfig, PlaybackConfig, TargetConfig, TelemetryConfig, TransportConfig,
};

use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
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

    #[error("Failed to render config: {0}")]
    Render(#[from] toml::ser::Error),
}

/// Complete Puppetry configuration.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, Default)]
pub struct PuppetConfig {
    #[serde(default)]
    pub transport: TransportConfig,

    #[serde(default)]
    pub backend: BackendConfig,

    #[serde(default)]
    pub target: TargetConfig,

    #[serde(default)]
    pub playback: PlaybackConfig,

    #[serde(default)]
    pub capture: CaptureConfig,

    #[serde(default)]
    pub telemetry: TelemetryConfig,
}

impl PuppetConfig {
    /// Load configuration from all standard sources.
    pub fn load() -> Result<Self, ConfigError> {
        let (config, _sources) = Self::load_with_sources_from(None)?;
        Ok(config)
    }

    /// Load configuration, with `config_path` replacing `./puppetry.toml`.
    pub fn load_from(config_path: Option<&Path>) -> Result<Self, ConfigError> {
        let (config, _sources) = Self::load_with_sources_from(config_path)?;
        Ok(config)
    }

    /// Load configuration and report which files and env vars contributed.
    pub fn load_with_sources_from(
        config_path: Option<&Path>,
    ) -> Result<(Self, ConfigSources), ConfigError> {
        let mut sources = ConfigSources::default();
        let mut merged = toml::Table::new();

        for path in loader::discover_config_files_with_override(config_path) {
            let table = loader::read_table(&path)?;
            loader::merge_tables(&mut merged, table);
            sources.files.push(path);
        }

        let mut config = loader::from_table(merged, Path::new("<merged>"))?;
        loader::apply_env_overrides(&mut config, &mut sources);

        Ok((config, sources))
    }

    /// Parse a single TOML document on top of the compiled defaults.
    pub fn from_toml_str(contents: &str) -> Result<Self, ConfigError> {
        let table = loader::parse_table(contents, Path::new("<string>"))?;
        loader::from_table(table, Path::new("<string>"))
    }

    /// Serialize config to a TOML string.
    pub fn to_toml(&self) -> Result<String, ConfigError> {
        let body = toml::to_string_pretty(self)?;
        Ok(format!("# Puppetry Configuration\n\n{}", body))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_config() {
        let config = PuppetConfig::default();
        assert_eq!(config.transport.reconnect_delay_ms, 1000);
        assert_eq!(config.capture.target_rate, 16_000);
    }

    #[test]
    fn test_to_toml() {
        let config = PuppetConfig::default();
        let toml = config.to_toml().unwrap();
        assert!(toml.contains("[transport]"));
        assert!(toml.contains("[playback]"));
        assert!(toml.contains("latency_ms = 120"));
    }

    #[test]
    fn test_to_toml_round_trips() {
        let mut config = PuppetConfig::default();
        config.playback.latency_ms = 250;
        config.target.bridge_url = String::new();

        let rendered = config.to_toml().unwrap();
        let parsed = PuppetConfig::from_toml_str(&rendered).unwrap();
        assert_eq!(parsed, config);
    }
}
