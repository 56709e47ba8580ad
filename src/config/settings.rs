//! Configuration structures for deserialisation.
//!
//! These structures map directly to the JSON configuration file format.

use std::net::SocketAddr;
use std::path::PathBuf;

use serde::Deserialize;

use crate::error::ConfigError;

/// The transport the server speaks.
///
/// There is deliberately no default: the host must choose.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum Transport {
    /// Streamable HTTP endpoint.
    Http,
    /// Line-delimited JSON-RPC over stdin/stdout.
    Stdio,
}

/// Root configuration structure.
///
/// This is the top-level structure that matches the JSON config file.
#[derive(Debug, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct Config {
    /// Optional JSON schema reference (ignored during parsing).
    #[serde(rename = "$schema", default)]
    _schema: Option<String>,

    /// Optional comment field (ignored during parsing).
    #[serde(rename = "_comment", default)]
    _comment: Option<String>,

    /// Transport to run. Required; no default.
    pub transport: Transport,

    /// Path of the MCP endpoint (HTTP transport).
    #[serde(default = "default_endpoint")]
    pub endpoint: String,

    /// Server name reported in the initialize result.
    #[serde(default = "default_server_name")]
    pub server_name: String,

    /// Server version reported in the initialize result.
    #[serde(default = "default_server_version")]
    pub server_version: String,

    /// Socket address the HTTP transport binds to.
    #[serde(default = "default_listen")]
    pub listen: SocketAddr,

    /// Maximum session uptime in seconds before the reaper closes it.
    #[serde(default = "default_max_uptime")]
    pub max_uptime_secs: u64,

    /// Deadline in seconds for completing the initialize handshake.
    #[serde(default = "default_init_timeout")]
    pub init_timeout_secs: u64,

    /// Directory holding one JSON file per session.
    #[serde(default)]
    pub session_dir: Option<PathBuf>,

    /// Logging settings.
    #[serde(default)]
    pub logging: LoggingConfig,
}

impl Config {
    /// Validates the configuration.
    ///
    /// # Errors
    ///
    /// Returns an error if any validation checks fail.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if !self.endpoint.starts_with('/') {
            return Err(ConfigError::ValidationError {
                message: format!("endpoint '{}' must begin with '/'", self.endpoint),
            });
        }
        if self.max_uptime_secs == 0 {
            return Err(ConfigError::ValidationError {
                message: "max_uptime_secs must be greater than zero".to_string(),
            });
        }
        if self.init_timeout_secs == 0 {
            return Err(ConfigError::ValidationError {
                message: "init_timeout_secs must be greater than zero".to_string(),
            });
        }
        let valid_levels = ["trace", "debug", "info", "warn", "error"];
        if !valid_levels.contains(&self.logging.level.to_lowercase().as_str()) {
            return Err(ConfigError::ValidationError {
                message: format!(
                    "invalid log level '{}'. Must be one of: trace, debug, info, warn, error",
                    self.logging.level
                ),
            });
        }
        Ok(())
    }

    /// The session directory, falling back to a private directory under the
    /// system temp dir.
    #[must_use]
    pub fn session_dir(&self) -> PathBuf {
        self.session_dir
            .clone()
            .unwrap_or_else(|| std::env::temp_dir().join("toolhost-mcp-sessions"))
    }
}

fn default_endpoint() -> String {
    "/".to_string()
}

fn default_server_name() -> String {
    "toolhost-mcp".to_string()
}

fn default_server_version() -> String {
    env!("CARGO_PKG_VERSION").to_string()
}

fn default_listen() -> SocketAddr {
    SocketAddr::from(([127, 0, 0, 1], 8321))
}

const fn default_max_uptime() -> u64 {
    86_400
}

const fn default_init_timeout() -> u64 {
    60
}

/// Logging configuration.
///
/// Log output never goes to standard output; absent paths fall back to
/// stderr. The access log receives one line per handled request, the error
/// log receives warnings and errors, the debug log receives everything at
/// the configured level.
#[derive(Debug, Clone, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct LoggingConfig {
    /// Log level (trace, debug, info, warn, error).
    #[serde(default = "default_log_level")]
    pub level: String,

    /// Per-request access log file.
    #[serde(default)]
    pub access_log: Option<PathBuf>,

    /// Warnings-and-errors log file.
    #[serde(default)]
    pub error_log: Option<PathBuf>,

    /// Full-detail log file.
    #[serde(default)]
    pub debug_log: Option<PathBuf>,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: default_log_level(),
            access_log: None,
            error_log: None,
            debug_log: None,
        }
    }
}

fn default_log_level() -> String {
    "warn".to_string()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parse_minimal_config() {
        let json = r#"{"transport": "STDIO"}"#;
        let config: Config = serde_json::from_str(json).unwrap();
        assert!(config.validate().is_ok());
        assert_eq!(config.transport, Transport::Stdio);
        assert_eq!(config.endpoint, "/");
        assert_eq!(config.max_uptime_secs, 86_400);
        assert_eq!(config.init_timeout_secs, 60);
    }

    #[test]
    fn parse_full_config() {
        let json = r#"{
            "$schema": "https://json-schema.org/draft/2020-12/schema",
            "_comment": "Test config",
            "transport": "HTTP",
            "endpoint": "/api",
            "server_name": "unit-test",
            "server_version": "9.9.9",
            "listen": "127.0.0.1:9000",
            "max_uptime_secs": 3600,
            "init_timeout_secs": 10,
            "session_dir": "/var/lib/toolhost/sessions",
            "logging": {
                "level": "debug",
                "access_log": "/var/log/toolhost/access.log",
                "error_log": "/var/log/toolhost/error.log",
                "debug_log": "/var/log/toolhost/debug.log"
            }
        }"#;

        let config: Config = serde_json::from_str(json).unwrap();
        assert!(config.validate().is_ok());
        assert_eq!(config.transport, Transport::Http);
        assert_eq!(config.endpoint, "/api");
        assert_eq!(config.server_name, "unit-test");
        assert_eq!(config.listen.port(), 9000);
        assert_eq!(
            config.session_dir(),
            PathBuf::from("/var/lib/toolhost/sessions")
        );
        assert_eq!(config.logging.level, "debug");
    }

    #[test]
    fn transport_is_required() {
        let json = r#"{"endpoint": "/"}"#;
        let result: Result<Config, _> = serde_json::from_str(json);
        assert!(result.is_err());
    }

    #[test]
    fn reject_relative_endpoint() {
        let json = r#"{"transport": "HTTP", "endpoint": "mcp"}"#;
        let config: Config = serde_json::from_str(json).unwrap();
        assert!(config.validate().is_err());
    }

    #[test]
    fn reject_zero_uptime() {
        let json = r#"{"transport": "HTTP", "max_uptime_secs": 0}"#;
        let config: Config = serde_json::from_str(json).unwrap();
        assert!(config.validate().is_err());
    }

    #[test]
    fn reject_invalid_log_level() {
        let json = r#"{"transport": "STDIO", "logging": {"level": "loud"}}"#;
        let config: Config = serde_json::from_str(json).unwrap();
        assert!(config.validate().is_err());
    }

    #[test]
    fn reject_unknown_fields() {
        let json = r#"{"transport": "STDIO", "unknown_field": "value"}"#;
        let result: Result<Config, _> = serde_json::from_str(json);
        assert!(result.is_err());
    }

    #[test]
    fn logging_config_defaults() {
        let config = LoggingConfig::default();
        assert_eq!(config.level, "warn");
        assert!(config.access_log.is_none());
        assert!(config.error_log.is_none());
        assert!(config.debug_log.is_none());
    }

    #[test]
    fn session_dir_default_is_under_tmp() {
        let json = r#"{"transport": "STDIO"}"#;
        let config: Config = serde_json::from_str(json).unwrap();
        assert!(config
            .session_dir()
            .to_string_lossy()
            .contains("toolhost-mcp-sessions"));
    }
}
