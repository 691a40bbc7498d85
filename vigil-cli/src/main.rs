//! Vigil CLI

mod logging;

use anyhow::{bail, Context, Result};
use clap::{Parser, Subcommand};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;
use vigil_config::{load_config, Config, LogLevel};
use vigil_core::{join_subject, Bus, Bytes, MemoryBus};
use vigil_health::{HealthSnapshot, Probe, VersionInfo};
use vigil_runtime::{CoordinatorBuilder, ShutdownSignal, SignalHandler};

#[derive(Parser)]
#[command(name = "vigil")]
#[command(about = "Vigil service runtime", long_about = None)]
#[command(version)]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Serve resource requests and report health until interrupted
    Serve {
        /// Path to configuration file
        #[arg(short, long, env = "VIGIL_CONFIG")]
        config: Option<PathBuf>,

        /// Log level (trace, debug, info, warn, error), overrides configuration
        #[arg(short, long)]
        log_level: Option<String>,
    },

    /// Validate configuration file
    Validate {
        /// Path to configuration file
        #[arg(short, long, env = "VIGIL_CONFIG")]
        config: Option<PathBuf>,
    },

    /// Query a running service's health and print the snapshot
    Health {
        /// Path to configuration file
        #[arg(short, long, env = "VIGIL_CONFIG")]
        config: Option<PathBuf>,

        /// How long to wait for a reply
        #[arg(short, long, default_value = "5s", value_parser = humantime::parse_duration)]
        timeout: Duration,
    },

    /// Show version information
    Version,
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    match cli.command {
        Commands::Serve { config, log_level } => serve(config.as_deref(), log_level).await,

        Commands::Validate { config } => {
            tracing_subscriber::fmt().with_target(false).init();

            match load_config(config.as_deref()) {
                Ok(cfg) => {
                    tracing::info!("✓ Configuration is valid");
                    tracing::info!("  Service: {}", cfg.service.name);
                    tracing::info!("  NATS: {}", cfg.nats.url);
                    tracing::info!("  Health checks: {}", cfg.health.enabled);
                    tracing::info!("  Environment: {}", cfg.environment);
                    Ok(())
                }
                Err(e) => {
                    tracing::error!("✗ Configuration validation failed: {}", e);
                    std::process::exit(1);
                }
            }
        }

        Commands::Health { config, timeout } => {
            let config = load_config(config.as_deref())?;
            let snapshot = query_health(&config, timeout).await?;

            println!("{}", serde_json::to_string_pretty(&snapshot)?);
            if !snapshot.is_healthy() {
                std::process::exit(1);
            }
            Ok(())
        }

        Commands::Version => {
            println!("Vigil");
            println!("Version: {}", env!("CARGO_PKG_VERSION"));
            println!("Commit: {}", VersionInfo::new("").version());
            println!("Rust version: {}", env!("CARGO_PKG_RUST_VERSION"));
            Ok(())
        }
    }
}

async fn serve(config_path: Option<&Path>, log_level: Option<String>) -> Result<()> {
    let mut config = load_config(config_path)?;
    if let Some(level) = log_level {
        config.logging.level = LogLevel::from(level);
    }
    logging::init_tracing(&config.logging)?;

    tracing::info!(
        service = %config.service.name,
        environment = %config.environment,
        nats = %config.nats.url,
        "Starting Vigil"
    );

    let bus = connect_bus(&config).await?;
    let probes = database_probes(&config)?;
    let coordinator = CoordinatorBuilder::from_config(&config, Arc::clone(&bus), probes)?.build()?;

    let shutdown = ShutdownSignal::new();
    tokio::spawn(SignalHandler::new(shutdown.clone()).run());

    if let Err(e) = coordinator.run(bus, shutdown.token()).await {
        tracing::error!(error = %e, "Service stopped with error");
        return Err(e.into());
    }

    tracing::info!("Service stopped");
    Ok(())
}

async fn query_health(config: &Config, timeout: Duration) -> Result<HealthSnapshot> {
    if config.nats.is_memory() {
        bail!("health queries need a NATS url, got '{}'", config.nats.url);
    }

    let bus = connect_bus(config).await?;
    let subject = join_subject(&config.health.subject, &config.service.name);
    let reply = bus
        .request(&subject, Bytes::new(), timeout)
        .await
        .with_context(|| format!("no health reply on '{}'", subject))?;

    Ok(HealthSnapshot::from_json(&reply.payload)?)
}

async fn connect_bus(config: &Config) -> Result<Arc<dyn Bus>> {
    if config.nats.is_memory() {
        tracing::info!("Using in-process bus");
        return Ok(Arc::new(MemoryBus::new()));
    }

    connect_nats(config).await
}

#[cfg(feature = "nats")]
async fn connect_nats(config: &Config) -> Result<Arc<dyn Bus>> {
    let options = vigil_core::NatsOptions {
        url: config.nats.url.clone(),
        name: config.service.name.clone(),
        max_reconnects: config.nats.max_reconnects,
        reconnect_wait: config.nats.reconnect_wait,
    };
    let bus = vigil_core::NatsBus::connect(&options).await?;
    Ok(Arc::new(bus))
}

#[cfg(not(feature = "nats"))]
async fn connect_nats(config: &Config) -> Result<Arc<dyn Bus>> {
    bail!(
        "'{}' needs the nats feature; use memory:// or rebuild with --features nats",
        config.nats.url
    )
}

#[cfg(feature = "postgres")]
fn database_probes(config: &Config) -> Result<Vec<Arc<dyn Probe>>> {
    let Some(database) = &config.database else {
        return Ok(Vec::new());
    };

    let pool = sqlx::postgres::PgPoolOptions::new()
        .max_connections(database.max_connections)
        .connect_lazy(&database.url)
        .context("invalid database url")?;
    tracing::info!(max_connections = database.max_connections, "Database health probe enabled");

    let probe: Arc<dyn Probe> = Arc::new(vigil_health::DataStoreProbe::new(pool));
    Ok(vec![probe])
}

#[cfg(not(feature = "postgres"))]
fn database_probes(config: &Config) -> Result<Vec<Arc<dyn Probe>>> {
    if config.database.is_some() {
        tracing::warn!("Database configured but the postgres feature is not enabled, skipping its health probe");
    }
    Ok(Vec::new())
}

#[cfg(test)]
mod tests {
    use super::*;
    use clap::CommandFactory;

    #[test]
    fn test_cli_definition() {
        Cli::command().debug_assert();
    }

    #[test]
    fn test_parse_health_timeout() {
        let cli = Cli::try_parse_from(["vigil", "health", "--timeout", "250ms"]).unwrap();
        match cli.command {
            Commands::Health { timeout, .. } => assert_eq!(timeout, Duration::from_millis(250)),
            _ => panic!("expected health command"),
        }
    }

    #[test]
    fn test_parse_serve() {
        let cli = Cli::try_parse_from(["vigil", "serve", "-c", "vigil.yaml", "-l", "debug"]).unwrap();
        match cli.command {
            Commands::Serve { config, log_level } => {
                assert_eq!(config, Some(PathBuf::from("vigil.yaml")));
                assert_eq!(log_level.as_deref(), Some("debug"));
            }
            _ => panic!("expected serve command"),
        }
    }

    #[tokio::test]
    async fn test_memory_bus_selected() {
        let mut config = Config::default();
        config.nats.url = "memory://".to_string();

        let bus = connect_bus(&config).await.unwrap();
        assert!(bus.is_connected());
        assert!(query_health(&config, Duration::from_millis(10)).await.is_err());
    }
}
