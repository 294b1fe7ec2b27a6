//! Configuration resolution for `TapGate`.
//!
//! Implements hierarchical config resolution:
//! 1. Built-in defaults
//! 2. Settings file (explicit path, else ~/.config/tapgate/settings.json)
//! 3. Environment variables
//! 4. CLI arguments (applied by the binary, highest priority)

use std::net::SocketAddr;
use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};

use crate::access::AccessPolicy;
use crate::error::{Error, Result};

/// Complete `TapGate` configuration.
#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct Config {
    #[serde(default)]
    pub server: ServerConfig,
    #[serde(default)]
    pub access: AccessConfig,
    #[serde(default)]
    pub notifier: NotifierConfig,
}

/// HTTP server configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ServerConfig {
    pub listen_addr: SocketAddr,
    pub database_path: Option<PathBuf>,
    pub log_json: bool,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            listen_addr: SocketAddr::from(([0, 0, 0, 0], 5000)),
            database_path: None,
            log_json: false,
        }
    }
}

/// Access policy and audit log configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct AccessConfig {
    /// Deny site-bound cards tapped at another site.
    pub site_scoping: bool,
    /// Delete audit events older than this many days. `None` keeps them all.
    pub event_retention_days: Option<u32>,
}

impl Default for AccessConfig {
    fn default() -> Self {
        Self {
            site_scoping: true,
            event_retention_days: None,
        }
    }
}

impl AccessConfig {
    pub const fn policy(&self) -> AccessPolicy {
        AccessPolicy {
            site_scoping: self.site_scoping,
        }
    }
}

/// Live notification fan-out configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct NotifierConfig {
    /// Events buffered per subscriber before it starts lagging.
    pub broadcast_capacity: usize,
}

impl Default for NotifierConfig {
    fn default() -> Self {
        Self {
            broadcast_capacity: 256,
        }
    }
}

/// Load configuration with hierarchical resolution.
///
/// An explicit `path` must exist; the global settings file is optional.
pub fn load_config(path: Option<&Path>) -> Result<Config> {
    let mut config = match path {
        Some(p) => load_config_file(p)?,
        None => match global_config_path() {
            Some(global) if global.exists() => load_config_file(&global)?,
            _ => Config::default(),
        },
    };

    apply_env_overrides(&mut config);

    Ok(config)
}

/// Get the global config file path.
pub fn global_config_path() -> Option<PathBuf> {
    config_dir().map(|p| p.join("settings.json"))
}

/// Get the default database path.
pub fn database_path() -> Option<PathBuf> {
    config_dir().map(|p| p.join("tapgate.db"))
}

fn config_dir() -> Option<PathBuf> {
    std::env::var("XDG_CONFIG_HOME")
        .ok()
        .map(PathBuf::from)
        .or_else(|| {
            std::env::var("HOME")
                .ok()
                .map(|h| PathBuf::from(h).join(".config"))
        })
        .map(|p| p.join("tapgate"))
}

fn load_config_file(path: &Path) -> Result<Config> {
    let content = std::fs::read_to_string(path).map_err(|e| {
        Error::Config(format!(
            "Failed to read config file {}: {}",
            path.display(),
            e
        ))
    })?;
    serde_json::from_str(&content).map_err(|e| {
        Error::Config(format!(
            "Failed to parse config file {}: {}",
            path.display(),
            e
        ))
    })
}

fn apply_env_overrides(config: &mut Config) {
    apply_overrides(config, |key| std::env::var(key).ok());
}

/// Apply `TAPGATE_*` overrides read through `lookup`. Unparsable values are
/// ignored.
fn apply_overrides(config: &mut Config, lookup: impl Fn(&str) -> Option<String>) {
    if let Some(addr) = lookup("TAPGATE_LISTEN_ADDR").and_then(|v| v.parse().ok()) {
        config.server.listen_addr = addr;
    }
    if let Some(path) = lookup("TAPGATE_DB_PATH") {
        config.server.database_path = Some(PathBuf::from(path));
    }
    if let Some(scoping) = lookup("TAPGATE_SITE_SCOPING").and_then(|v| parse_bool(&v)) {
        config.access.site_scoping = scoping;
    }
    if let Some(days) = lookup("TAPGATE_EVENT_RETENTION_DAYS").and_then(|v| v.parse().ok()) {
        config.access.event_retention_days = Some(days).filter(|d| *d > 0);
    }
}

fn parse_bool(value: &str) -> Option<bool> {
    match value.trim().to_ascii_lowercase().as_str() {
        "1" | "true" | "yes" | "on" => Some(true),
        "0" | "false" | "no" | "off" => Some(false),
        _ => None,
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    #[test]
    fn defaults_scope_by_site_and_keep_events() {
        let config = Config::default();
        assert!(config.access.site_scoping);
        assert_eq!(config.access.event_retention_days, None);
        assert_eq!(config.server.listen_addr.port(), 5000);
    }

    #[test]
    fn partial_file_keeps_other_defaults() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("settings.json");
        std::fs::write(&path, r#"{"access": {"site_scoping": false}}"#).unwrap();

        let config = load_config_file(&path).unwrap();
        assert!(!config.access.site_scoping);
        assert_eq!(config.notifier.broadcast_capacity, 256);
        assert_eq!(config.server.listen_addr.port(), 5000);
    }

    #[test]
    fn explicit_missing_file_is_an_error() {
        let dir = tempfile::tempdir().unwrap();
        let err = load_config(Some(&dir.path().join("absent.json"))).unwrap_err();
        assert!(matches!(err, Error::Config(_)));
    }

    #[test]
    fn malformed_file_is_an_error() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("settings.json");
        std::fs::write(&path, "{ not json").unwrap();
        assert!(matches!(load_config_file(&path), Err(Error::Config(_))));
    }

    #[test]
    fn env_overrides_apply() {
        let vars: HashMap<&str, &str> = HashMap::from([
            ("TAPGATE_LISTEN_ADDR", "127.0.0.1:8080"),
            ("TAPGATE_DB_PATH", "/tmp/tap.db"),
            ("TAPGATE_SITE_SCOPING", "off"),
            ("TAPGATE_EVENT_RETENTION_DAYS", "30"),
        ]);
        let mut config = Config::default();
        apply_overrides(&mut config, |k| vars.get(k).map(|v| (*v).to_string()));

        assert_eq!(config.server.listen_addr.port(), 8080);
        assert_eq!(
            config.server.database_path.as_deref(),
            Some(Path::new("/tmp/tap.db"))
        );
        assert!(!config.access.site_scoping);
        assert_eq!(config.access.event_retention_days, Some(30));
    }

    #[test]
    fn zero_retention_means_unbounded() {
        let mut config = Config::default();
        apply_overrides(&mut config, |k| {
            (k == "TAPGATE_EVENT_RETENTION_DAYS").then(|| "0".to_string())
        });
        assert_eq!(config.access.event_retention_days, None);
    }

    #[test]
    fn garbage_env_values_are_ignored() {
        let mut config = Config::default();
        apply_overrides(&mut config, |_| Some("garbage".to_string()));
        assert!(config.access.site_scoping);
        assert_eq!(config.server.listen_addr.port(), 5000);
    }
}
