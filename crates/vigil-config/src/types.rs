//! Configuration types

use serde::{Deserialize, Serialize};
use std::time::Duration;

/// Main configuration
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct Config {
    /// NATS connection
    pub nats: NatsConfig,

    /// Resource service
    pub service: ServiceConfig,

    /// Logging
    pub logging: LoggingConfig,

    /// Health reporting
    pub health: HealthConfig,

    /// Optional database checked by the health engine
    #[serde(skip_serializing_if = "Option::is_none")]
    pub database: Option<DatabaseConfig>,

    /// Deployment environment reported in health snapshots
    pub environment: String,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            nats: NatsConfig::default(),
            service: ServiceConfig::default(),
            logging: LoggingConfig::default(),
            health: HealthConfig::default(),
            database: None,
            environment: "development".to_string(),
        }
    }
}

/// NATS connection configuration
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct NatsConfig {
    /// Server URL; `memory://` selects the in-process bus
    pub url: String,

    /// Maximum reconnect attempts
    pub max_reconnects: usize,

    /// Delay between reconnect attempts
    #[serde(with = "humantime_serde")]
    pub reconnect_wait: Duration,
}

impl NatsConfig {
    /// Whether the in-process bus was requested
    pub fn is_memory(&self) -> bool {
        self.url.starts_with("memory://")
    }
}

impl Default for NatsConfig {
    fn default() -> Self {
        Self {
            url: "nats://localhost:4222".to_string(),
            max_reconnects: 5,
            reconnect_wait: Duration::from_secs(1),
        }
    }
}

/// Resource service configuration
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct ServiceConfig {
    /// Service name, used as subject suffix and reported identity
    pub name: String,

    /// Inbound request queue size
    pub in_channel_size: usize,

    /// Maximum concurrently handled requests
    pub worker_count: usize,

    /// Graceful shutdown timeout (drain and join)
    #[serde(with = "humantime_serde")]
    pub shutdown_timeout: Duration,
}

impl Default for ServiceConfig {
    fn default() -> Self {
        Self {
            name: "api".to_string(),
            in_channel_size: 1024,
            worker_count: 32,
            shutdown_timeout: Duration::from_secs(5),
        }
    }
}

/// Log output format
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Default)]
#[serde(from = "String", rename_all = "lowercase")]
pub enum LogFormat {
    /// JSON lines
    #[default]
    Json,
    /// Human readable text
    Text,
}

impl From<&str> for LogFormat {
    fn from(value: &str) -> Self {
        match value.to_ascii_lowercase().as_str() {
            "json" => LogFormat::Json,
            _ => LogFormat::Text,
        }
    }
}

impl From<String> for LogFormat {
    fn from(value: String) -> Self {
        LogFormat::from(value.as_str())
    }
}

/// Log level
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Default)]
#[serde(from = "String", rename_all = "lowercase")]
pub enum LogLevel {
    /// Trace
    Trace,
    /// Debug
    Debug,
    /// Info
    #[default]
    Info,
    /// Warn
    Warn,
    /// Error
    Error,
}

impl LogLevel {
    /// Directive understood by `tracing_subscriber::EnvFilter`
    pub fn as_str(&self) -> &'static str {
        match self {
            LogLevel::Trace => "trace",
            LogLevel::Debug => "debug",
            LogLevel::Info => "info",
            LogLevel::Warn => "warn",
            LogLevel::Error => "error",
        }
    }
}

impl From<&str> for LogLevel {
    fn from(value: &str) -> Self {
        match value.to_ascii_lowercase().as_str() {
            "trace" => LogLevel::Trace,
            "debug" => LogLevel::Debug,
            "warn" | "warning" => LogLevel::Warn,
            "error" => LogLevel::Error,
            _ => LogLevel::Info,
        }
    }
}

impl From<String> for LogLevel {
    fn from(value: String) -> Self {
        LogLevel::from(value.as_str())
    }
}

/// Logging configuration
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Default)]
#[serde(default)]
pub struct LoggingConfig {
    /// Output format
    pub format: LogFormat,

    /// Minimum level
    pub level: LogLevel,

    /// Include source file and line
    pub add_source: bool,
}

/// Health reporting configuration
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct HealthConfig {
    /// Run the health engine at all
    pub enabled: bool,

    /// Status publish period
    #[serde(with = "humantime_serde")]
    pub interval: Duration,

    /// Budget for one full snapshot
    #[serde(with = "humantime_serde")]
    pub timeout: Duration,

    /// Prefix of the on-demand query subject
    pub subject: String,

    /// Prefix of the periodic status topic
    pub status_topic: String,
}

impl Default for HealthConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            interval: Duration::from_secs(10),
            timeout: Duration::from_secs(5),
            subject: "health".to_string(),
            status_topic: "health.status".to_string(),
        }
    }
}

/// Database configuration
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct DatabaseConfig {
    /// Connection URL
    pub url: String,

    /// Pool size
    #[serde(default = "default_max_connections")]
    pub max_connections: u32,
}

fn default_max_connections() -> u32 {
    5
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults() {
        let config = Config::default();
        assert_eq!(config.nats.url, "nats://localhost:4222");
        assert_eq!(config.service.name, "api");
        assert_eq!(config.service.in_channel_size, 1024);
        assert_eq!(config.service.worker_count, 32);
        assert_eq!(config.service.shutdown_timeout, Duration::from_secs(5));
        assert!(config.health.enabled);
        assert_eq!(config.health.interval, Duration::from_secs(10));
        assert_eq!(config.health.status_topic, "health.status");
        assert_eq!(config.logging.format, LogFormat::Json);
        assert_eq!(config.environment, "development");
        assert!(config.database.is_none());
    }

    #[test]
    fn test_unknown_log_values_fall_back() {
        assert_eq!(LogFormat::from("xml"), LogFormat::Text);
        assert_eq!(LogFormat::from("JSON"), LogFormat::Json);
        assert_eq!(LogLevel::from("verbose"), LogLevel::Info);
        assert_eq!(LogLevel::from("warn"), LogLevel::Warn);
    }

    #[test]
    fn test_memory_url() {
        let nats = NatsConfig {
            url: "memory://".to_string(),
            ..Default::default()
        };
        assert!(nats.is_memory());
        assert!(!NatsConfig::default().is_memory());
    }
}
