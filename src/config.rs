//! Configuration management for agile-helper.
//!
//! This module defines the optional `config.toml` file and provides
//! functionality to locate, load and parse it. Service command lines are not
//! configurable; only launcher-wide settings live here.

use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use serde::Deserialize;

/// Top-level configuration structure corresponding to `config.toml`.
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct Config {
    /// Interpreter for multi-line services (default: bash).
    pub shell: Option<String>,
    /// Working directory for every service (default: the home directory).
    pub home: Option<PathBuf>,
    /// Tracing filter, e.g. "info" or "agile_helper=debug".
    pub log: Option<String>,
    /// Print state changes as JSON lines.
    pub json: Option<bool>,
    /// How long to wait for services to stop when quitting (milliseconds).
    pub shutdown_timeout_ms: Option<u64>,
}

/// Loads and parses the configuration from a file path.
pub fn load_config(path: &Path) -> Result<Config> {
    let raw = std::fs::read_to_string(path)
        .with_context(|| format!("failed to read config file {}", path.display()))?;
    let config: Config = toml::from_str(&raw)
        .with_context(|| format!("failed to parse config file {}", path.display()))?;
    Ok(config)
}

/// `<config dir>/agile-helper/config.toml`, if it exists.
pub fn default_config_path() -> Option<PathBuf> {
    let path = dirs::config_dir()?.join("agile-helper").join("config.toml");
    path.exists().then_some(path)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_optional_fields() {
        let raw = r#"
shell = "zsh"
home = "/home/student"
log = "agile_helper=debug"
json = true
shutdown_timeout_ms = 1500
"#;
        let config: Config = toml::from_str(raw).unwrap();
        assert_eq!(config.shell.as_deref(), Some("zsh"));
        assert_eq!(config.home, Some(PathBuf::from("/home/student")));
        assert_eq!(config.log.as_deref(), Some("agile_helper=debug"));
        assert_eq!(config.json, Some(true));
        assert_eq!(config.shutdown_timeout_ms, Some(1500));
    }

    #[test]
    fn empty_file_is_valid() {
        let config: Config = toml::from_str("").unwrap();
        assert!(config.shell.is_none());
        assert!(config.home.is_none());
    }

    #[test]
    fn unknown_keys_are_rejected() {
        assert!(toml::from_str::<Config>("oop = \"./run.sh\"").is_err());
    }

    #[test]
    fn load_config_reports_path() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("config.toml");
        std::fs::write(&path, "json = \"yes\"").unwrap();
        let err = load_config(&path).unwrap_err();
        assert!(err.to_string().contains("config.toml"));

        std::fs::write(&path, "json = false").unwrap();
        assert_eq!(load_config(&path).unwrap().json, Some(false));
    }
}
