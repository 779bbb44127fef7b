/*
[INPUT]:  YAML configuration file
[OUTPUT]: Parsed panel configuration (session endpoint, logging, shutdown bound)
[POS]:    Configuration layer - process setup
[UPDATE]: When adding new configuration options
*/

use std::path::PathBuf;
use std::time::Duration;

use anyhow::{Result, bail};
use serde::{Deserialize, Serialize};

/// Top-level configuration for the task panel
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct PanelConfig {
    /// Engine session endpoint
    #[serde(default)]
    pub session: SessionConfig,
    /// Log level and optional log directory
    #[serde(default)]
    pub logging: LoggingConfig,
    /// Upper bound on flow teardown, in seconds
    #[serde(default = "default_shutdown_timeout_secs")]
    pub shutdown_timeout_secs: u64,
}

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct SessionConfig {
    /// WAMP router WebSocket URL
    #[serde(default = "default_url")]
    pub url: String,
    /// WAMP realm joined on connect
    #[serde(default = "default_realm")]
    pub realm: String,
}

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct LoggingConfig {
    /// EnvFilter directive, e.g. "info" or "taskpanel_coordinator=debug"
    #[serde(default = "default_log_level")]
    pub level: String,
    /// When set, logs go to a daily-rolling file in this directory
    #[serde(default)]
    pub directory: Option<PathBuf>,
}

impl Default for PanelConfig {
    fn default() -> Self {
        Self {
            session: SessionConfig::default(),
            logging: LoggingConfig::default(),
            shutdown_timeout_secs: default_shutdown_timeout_secs(),
        }
    }
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self {
            url: default_url(),
            realm: default_realm(),
        }
    }
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: default_log_level(),
            directory: None,
        }
    }
}

fn default_url() -> String {
    "ws://127.0.0.1:61000/ws".to_string()
}

fn default_realm() -> String {
    "golem".to_string()
}

fn default_log_level() -> String {
    "info".to_string()
}

fn default_shutdown_timeout_secs() -> u64 {
    30
}

impl PanelConfig {
    /// Load configuration from YAML file
    pub fn from_file(path: &str) -> anyhow::Result<Self> {
        let content = std::fs::read_to_string(path)?;
        Self::from_yaml(&content)
    }

    pub fn from_yaml(content: &str) -> anyhow::Result<Self> {
        let config: Self = serde_yaml::from_str(content)?;
        Ok(config)
    }

    /// `<config dir>/taskpanel/config.yaml`
    pub fn default_path() -> Option<PathBuf> {
        dirs::config_dir().map(|dir| dir.join("taskpanel").join("config.yaml"))
    }

    pub fn shutdown_timeout(&self) -> Duration {
        Duration::from_secs(self.shutdown_timeout_secs)
    }

    pub fn validate(&self) -> Result<()> {
        let url = self.session.url.as_str();
        if !(url.starts_with("ws://") || url.starts_with("wss://")) {
            bail!("session.url must be a ws:// or wss:// URL, got {url}");
        }
        if self.session.realm.trim().is_empty() {
            bail!("session.realm must not be empty");
        }
        if self.shutdown_timeout_secs == 0 {
            bail!("shutdown_timeout_secs must be positive");
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn empty_document_uses_defaults() {
        let config = PanelConfig::from_yaml("{}").unwrap();
        assert_eq!(config.session.url, "ws://127.0.0.1:61000/ws");
        assert_eq!(config.session.realm, "golem");
        assert_eq!(config.logging.level, "info");
        assert_eq!(config.shutdown_timeout(), Duration::from_secs(30));
        assert!(config.validate().is_ok());
    }

    #[test]
    fn partial_sections_keep_remaining_defaults() {
        let config = PanelConfig::from_yaml(
            "session:\n  url: wss://engine.local/ws\nlogging:\n  directory: /tmp/taskpanel\nshutdown_timeout_secs: 5\n",
        )
        .unwrap();
        assert_eq!(config.session.url, "wss://engine.local/ws");
        assert_eq!(config.session.realm, "golem");
        assert_eq!(config.logging.directory, Some(PathBuf::from("/tmp/taskpanel")));
        assert_eq!(config.shutdown_timeout_secs, 5);
    }

    #[test]
    fn validate_rejects_http_url_and_blank_realm() {
        let mut config = PanelConfig::default();
        config.session.url = "http://127.0.0.1:61000".into();
        assert!(config.validate().is_err());

        let mut config = PanelConfig::default();
        config.session.realm = "  ".into();
        assert!(config.validate().is_err());
    }

    #[test]
    fn default_path_ends_with_app_file() {
        if let Some(path) = PanelConfig::default_path() {
            assert!(path.ends_with("taskpanel/config.yaml"));
        }
    }
}
