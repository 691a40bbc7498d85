//! Configuration validation

use crate::Config;
use vigil_core::{Error, Result};

/// Validate configuration
pub fn validate_config(config: &Config) -> Result<()> {
    validate_nats(config)?;

    validate_service(config)?;

    validate_health(config)?;

    validate_database(config)?;

    Ok(())
}

fn validate_nats(config: &Config) -> Result<()> {
    if config.nats.url.is_empty() {
        return Err(Error::Config("nats url cannot be empty".to_string()));
    }

    Ok(())
}

fn validate_service(config: &Config) -> Result<()> {
    let name = &config.service.name;
    if name.is_empty() {
        return Err(Error::Config("service name cannot be empty".to_string()));
    }

    // The name is a subject token for health and resource subjects
    if name.contains(['.', '*', '>', ' ']) {
        return Err(Error::Config(format!(
            "service name '{}' must be a single subject token",
            name
        )));
    }

    if config.service.in_channel_size == 0 {
        return Err(Error::Config("service in_channel_size must be > 0".to_string()));
    }

    if config.service.worker_count == 0 {
        return Err(Error::Config("service worker_count must be > 0".to_string()));
    }

    if config.service.shutdown_timeout.is_zero() {
        return Err(Error::Config("shutdown_timeout must be > 0".to_string()));
    }

    Ok(())
}

fn validate_health(config: &Config) -> Result<()> {
    let health = &config.health;
    if !health.enabled {
        return Ok(());
    }

    if health.interval.is_zero() {
        return Err(Error::Config("health interval must be > 0".to_string()));
    }

    if health.timeout.is_zero() {
        return Err(Error::Config("health timeout must be > 0".to_string()));
    }

    if health.subject.is_empty() {
        return Err(Error::Config("health subject cannot be empty".to_string()));
    }

    if health.status_topic.is_empty() {
        return Err(Error::Config("health status_topic cannot be empty".to_string()));
    }

    if health.timeout >= health.interval {
        tracing::warn!(
            timeout = ?health.timeout,
            interval = ?health.interval,
            "Health timeout is not shorter than the publish interval"
        );
    }

    Ok(())
}

fn validate_database(config: &Config) -> Result<()> {
    if let Some(ref database) = config.database {
        if database.url.is_empty() {
            return Err(Error::Config("database url cannot be empty".to_string()));
        }
        if database.max_connections == 0 {
            return Err(Error::Config("database max_connections must be > 0".to_string()));
        }
    }

    Ok(())
}
