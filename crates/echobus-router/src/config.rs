// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 naskel.com

//! Router daemon configuration.

use echobus::EchoConfig;
use serde::{Deserialize, Serialize};
use std::path::Path;
use std::time::Duration;

/// Router daemon configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RouterConfig {
    /// Socket address; empty means `ECHOLIB_SOCKET`, then `/tmp/echo.sock`
    #[serde(default)]
    pub address: String,

    /// Log level (trace, debug, info, warn, error)
    #[serde(default = "default_log_level")]
    pub log_level: String,

    /// Interval between statistics reports in seconds (0 = off)
    #[serde(default)]
    pub stats_interval_secs: u64,

    /// Framing, queueing and socket parameters
    #[serde(default)]
    pub transport: EchoConfig,
}

fn default_log_level() -> String {
    "info".to_string()
}

impl Default for RouterConfig {
    fn default() -> Self {
        Self {
            address: String::new(),
            log_level: default_log_level(),
            stats_interval_secs: 0,
            transport: EchoConfig::default(),
        }
    }
}

impl RouterConfig {
    /// Load configuration from a JSON file.
    pub fn from_file(path: &Path) -> Result<Self, ConfigError> {
        let content =
            std::fs::read_to_string(path).map_err(|e| ConfigError::IoError(e.to_string()))?;

        serde_json::from_str(&content).map_err(|e| ConfigError::ParseError(e.to_string()))
    }

    /// Save configuration to a JSON file.
    pub fn to_file(&self, path: &Path) -> Result<(), ConfigError> {
        let content = serde_json::to_string_pretty(self)
            .map_err(|e| ConfigError::SerializeError(e.to_string()))?;

        std::fs::write(path, content).map_err(|e| ConfigError::IoError(e.to_string()))
    }

    /// Statistics report interval, if enabled.
    pub fn stats_interval(&self) -> Option<Duration> {
        (self.stats_interval_secs > 0).then(|| Duration::from_secs(self.stats_interval_secs))
    }

    /// Validate configuration.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if !matches!(
            self.log_level.as_str(),
            "trace" | "debug" | "info" | "warn" | "error"
        ) {
            return Err(ConfigError::InvalidValue(format!(
                "unknown log level {:?}",
                self.log_level
            )));
        }
        self.transport
            .validate()
            .map_err(|e| ConfigError::InvalidValue(e.to_string()))
    }
}

/// Configuration error types.
#[derive(Debug, Clone)]
pub enum ConfigError {
    IoError(String),
    ParseError(String),
    SerializeError(String),
    InvalidValue(String),
}

impl std::fmt::Display for ConfigError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::IoError(s) => write!(f, "I/O error: {}", s),
            Self::ParseError(s) => write!(f, "Parse error: {}", s),
            Self::SerializeError(s) => write!(f, "Serialize error: {}", s),
            Self::InvalidValue(s) => write!(f, "Invalid value: {}", s),
        }
    }
}

impl std::error::Error for ConfigError {}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_config() {
        let config = RouterConfig::default();
        assert!(config.address.is_empty());
        assert_eq!(config.log_level, "info");
        assert_eq!(config.transport.queue_capacity, 5000);
        assert!(config.stats_interval().is_none());
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_partial_file_uses_defaults() {
        let config: RouterConfig = serde_json::from_str(
            r#"{ "address": "/tmp/bus.sock", "transport": { "chunk_size": 4096 } }"#,
        )
        .unwrap();
        assert_eq!(config.address, "/tmp/bus.sock");
        assert_eq!(config.log_level, "info");
        assert_eq!(config.transport.chunk_size, 4096);
        assert_eq!(config.transport.router_queue_capacity, 10_000);
    }

    #[test]
    fn test_file_roundtrip() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("router.json");
        let config = RouterConfig {
            address: "127.0.0.1:7700".to_string(),
            stats_interval_secs: 30,
            ..Default::default()
        };
        config.to_file(&path).unwrap();

        let loaded = RouterConfig::from_file(&path).unwrap();
        assert_eq!(loaded.address, "127.0.0.1:7700");
        assert_eq!(loaded.stats_interval(), Some(Duration::from_secs(30)));
        assert_eq!(loaded.transport, config.transport);
    }

    #[test]
    fn test_missing_file() {
        let result = RouterConfig::from_file(Path::new("/nonexistent/router.json"));
        assert!(matches!(result, Err(ConfigError::IoError(_))));
    }

    #[test]
    fn test_validation() {
        let config = RouterConfig {
            log_level: "loud".to_string(),
            ..Default::default()
        };
        assert!(config.validate().is_err());

        let mut config = RouterConfig::default();
        config.transport.chunk_size = 0;
        assert!(matches!(
            config.validate(),
            Err(ConfigError::InvalidValue(_))
        ));
    }
}
