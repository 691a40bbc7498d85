//! Configuration loading

use crate::types::{DatabaseConfig, LogFormat, LogLevel};
use crate::{Config, ConfigFormat};
use regex::Regex;
use std::env;
use std::fs;
use std::path::Path;
use std::str::FromStr;
use std::time::Duration;
use vigil_core::{Error, Result};

/// Load configuration from a file
pub fn load_from_file<P: AsRef<Path>>(path: P) -> Result<Config> {
    let path = path.as_ref();

    let content = fs::read_to_string(path)
        .map_err(|e| Error::Config(format!("Failed to read config file: {e}")))?;

    let format = ConfigFormat::from_path(path)?;

    load_from_str(&content, format)
}

/// Expand environment variables in configuration string
/// Supports syntax: ${VAR} and ${VAR:-default}
fn expand_env_vars(content: &str) -> Result<String> {
    let re = Regex::new(r"\$\{([A-Za-z_][A-Za-z0-9_]*)(:-([^}]*))?\}")
        .map_err(|e| Error::Config(format!("Invalid regex: {e}")))?;

    let mut result = String::new();
    let mut last_match = 0;

    for cap in re.captures_iter(content) {
        let (Some(full_match), Some(var_name)) = (cap.get(0), cap.get(1)) else {
            continue;
        };
        let var_name = var_name.as_str();
        let default_value = cap.get(3).map(|m| m.as_str());

        let value = match env::var(var_name) {
            Ok(val) => val,
            Err(_) => match default_value {
                Some(default) => default.to_string(),
                None => {
                    return Err(Error::Config(format!(
                        "Environment variable '{var_name}' not set and no default provided"
                    )));
                }
            },
        };

        result.push_str(&content[last_match..full_match.start()]);
        result.push_str(&value);
        last_match = full_match.end();
    }

    result.push_str(&content[last_match..]);

    Ok(result)
}

/// Load configuration from a string
pub fn load_from_str(content: &str, format: ConfigFormat) -> Result<Config> {
    let expanded_content = expand_env_vars(content)?;

    let config = match format {
        ConfigFormat::Yaml => serde_yaml::from_str(&expanded_content)
            .map_err(|e| Error::Config(format!("Failed to parse YAML: {e}")))?,
        ConfigFormat::Toml => toml::from_str(&expanded_content)
            .map_err(|e| Error::Config(format!("Failed to parse TOML: {e}")))?,
        ConfigFormat::Json => serde_json::from_str(&expanded_content)
            .map_err(|e| Error::Config(format!("Failed to parse JSON: {e}")))?,
    };

    Ok(config)
}

/// Load a `.env` file from the working directory, if there is one
pub fn load_dotenv() -> Result<()> {
    match dotenvy::dotenv() {
        Ok(path) => {
            tracing::debug!(path = %path.display(), "Loaded .env file");
            Ok(())
        }
        Err(e) if e.not_found() => Ok(()),
        Err(e) => Err(Error::Config(format!("Error loading .env file: {e}"))),
    }
}

fn load_dotenv_from(path: &Path) -> Result<()> {
    match dotenvy::from_path(path) {
        Ok(()) => {
            tracing::debug!(path = %path.display(), "Loaded .env file");
            Ok(())
        }
        Err(e) if e.not_found() => Ok(()),
        Err(e) => Err(Error::Config(format!("Error loading .env file: {e}"))),
    }
}

/// Load configuration: `.env` first so it can fill `${VAR}` placeholders,
/// then the optional file, then `APP_*` overrides, then validation
pub fn load_config(path: Option<&Path>) -> Result<Config> {
    load_config_with_env_file(path, None)
}

fn load_config_with_env_file(path: Option<&Path>, env_file: Option<&Path>) -> Result<Config> {
    match env_file {
        Some(env_file) => load_dotenv_from(env_file)?,
        None => load_dotenv()?,
    }

    let mut config = match path {
        Some(path) => load_from_file(path)?,
        None => Config::default(),
    };

    apply_env_overrides(&mut config, |key| env::var(key).ok())?;

    crate::validator::validate_config(&config)?;

    Ok(config)
}

/// Override configuration values from `APP_*` variables resolved by `lookup`
pub fn apply_env_overrides<F>(config: &mut Config, lookup: F) -> Result<()>
where
    F: Fn(&str) -> Option<String>,
{
    if let Some(url) = lookup("APP_NATS_URL") {
        config.nats.url = url;
    }

    if let Some(name) = lookup("APP_SERVICE_NAME") {
        config.service.name = name;
    }
    if let Some(size) = lookup("APP_SERVICE_IN_CHANNEL_SIZE") {
        config.service.in_channel_size = parse_value("APP_SERVICE_IN_CHANNEL_SIZE", &size)?;
    }
    if let Some(count) = lookup("APP_SERVICE_WORKER_COUNT") {
        config.service.worker_count = parse_value("APP_SERVICE_WORKER_COUNT", &count)?;
    }
    if let Some(timeout) = lookup("APP_SHUTDOWN_TIMEOUT") {
        config.service.shutdown_timeout = parse_duration("APP_SHUTDOWN_TIMEOUT", &timeout)?;
    }

    if let Some(format) = lookup("APP_LOG_FORMAT") {
        config.logging.format = LogFormat::from(format);
    }
    if let Some(level) = lookup("APP_LOG_LEVEL") {
        config.logging.level = LogLevel::from(level);
    }
    if let Some(source) = lookup("APP_LOG_SOURCE") {
        config.logging.add_source = parse_bool("APP_LOG_SOURCE", &source)?;
    }

    if let Some(enabled) = lookup("APP_HEALTH_CHECK_ENABLED") {
        config.health.enabled = parse_bool("APP_HEALTH_CHECK_ENABLED", &enabled)?;
    }
    if let Some(interval) = lookup("APP_HEALTH_CHECK_INTERVAL") {
        config.health.interval = parse_duration("APP_HEALTH_CHECK_INTERVAL", &interval)?;
    }
    if let Some(timeout) = lookup("APP_HEALTH_CHECK_TIMEOUT") {
        config.health.timeout = parse_duration("APP_HEALTH_CHECK_TIMEOUT", &timeout)?;
    }
    if let Some(subject) = lookup("APP_HEALTH_CHECK_SUBJECT") {
        config.health.subject = subject;
    }
    if let Some(topic) = lookup("APP_HEALTH_CHECK_STATUS_TOPIC") {
        config.health.status_topic = topic;
    }

    if let Some(url) = lookup("APP_DATABASE_URL") {
        match config.database.as_mut() {
            Some(database) => database.url = url,
            None => {
                config.database = Some(DatabaseConfig {
                    url,
                    max_connections: 5,
                })
            }
        }
    }

    if let Some(environment) = lookup("APP_ENV") {
        config.environment = environment;
    }

    Ok(())
}

fn parse_value<T: FromStr>(key: &str, value: &str) -> Result<T>
where
    T::Err: std::fmt::Display,
{
    value
        .trim()
        .parse()
        .map_err(|e| Error::Config(format!("Invalid value for {key}: {e}")))
}

fn parse_duration(key: &str, value: &str) -> Result<Duration> {
    humantime::parse_duration(value.trim())
        .map_err(|e| Error::Config(format!("Invalid duration for {key}: {e}")))
}

fn parse_bool(key: &str, value: &str) -> Result<bool> {
    match value.trim().to_ascii_lowercase().as_str() {
        "1" | "true" | "yes" | "on" => Ok(true),
        "0" | "false" | "no" | "off" => Ok(false),
        other => Err(Error::Config(format!("Invalid boolean for {key}: {other}"))),
    }
}
