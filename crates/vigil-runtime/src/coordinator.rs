//! Supervised startup and ordered, bounded shutdown

use crate::resource::{GreetingHandler, ResourceRouter};
use crate::service::{ResourceService, Service};
use crate::LifecycleState;
use parking_lot::Mutex;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::mpsc::{self, error::TrySendError};
use tokio::task::JoinSet;
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};
use vigil_config::Config;
use vigil_core::{Bus, Error, Result};
use vigil_health::{BusProbe, HealthEngine, HealthEngineConfig, Probe, VersionInfo};

/// Hands a subsystem's terminal error to the coordinator.
///
/// Backed by a single-slot channel: the first error is kept and any later
/// ones are dropped without blocking the reporter.
#[derive(Debug, Clone)]
struct ErrorReporter {
    sender: mpsc::Sender<Error>,
}

impl ErrorReporter {
    fn report(&self, err: Error) {
        match self.sender.try_send(err) {
            Ok(()) => {}
            Err(TrySendError::Full(err)) | Err(TrySendError::Closed(err)) => {
                debug!(error = %err, "Dropping subsystem error, another was already reported");
            }
        }
    }
}

/// Starts the health engine and the service, then shuts both down in order
pub struct Coordinator {
    service: Arc<dyn Service>,
    health: Option<HealthEngine>,
    shutdown_timeout: Duration,
    state: Mutex<LifecycleState>,
}

impl std::fmt::Debug for Coordinator {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Coordinator")
            .field("service", &self.service.name())
            .field("health", &self.health.is_some())
            .field("shutdown_timeout", &self.shutdown_timeout)
            .field("state", &self.state())
            .finish()
    }
}

impl Coordinator {
    /// Create a new coordinator builder
    pub fn builder() -> CoordinatorBuilder {
        CoordinatorBuilder::new()
    }

    /// Current lifecycle state
    pub fn state(&self) -> LifecycleState {
        *self.state.lock()
    }

    /// Shutdown budget
    pub fn shutdown_timeout(&self) -> Duration {
        self.shutdown_timeout
    }

    /// Health engine, when health checks are enabled
    pub fn health(&self) -> Option<&HealthEngine> {
        self.health.as_ref()
    }

    /// Run until `cancel` fires or a subsystem fails, then shut down.
    ///
    /// Returns the first subsystem failure if one triggered the shutdown,
    /// [`Error::ShutdownTimeout`] if subsystems did not stop within the
    /// shutdown timeout, and `Ok(())` otherwise. A coordinator runs once.
    pub async fn run(&self, bus: Arc<dyn Bus>, cancel: CancellationToken) -> Result<()> {
        {
            let mut state = self.state.lock();
            if *state != LifecycleState::Idle {
                return Err(Error::Runtime(format!(
                    "coordinator cannot run from state {}",
                    *state
                )));
            }
            *state = LifecycleState::Running;
        }

        let (sender, mut errors) = mpsc::channel(1);
        let reporter = ErrorReporter { sender };
        let mut tasks = JoinSet::new();

        if let Some(health) = self.health.clone() {
            let reporter = reporter.clone();
            tasks.spawn(async move {
                if let Err(e) = health.start().await {
                    reporter.report(Error::subsystem("health", e));
                }
            });
        }

        {
            let service = Arc::clone(&self.service);
            let bus = Arc::clone(&bus);
            let reporter = reporter.clone();
            tasks.spawn(async move {
                let name = service.name().to_string();
                if let Err(e) = service.serve(bus).await {
                    reporter.report(Error::subsystem(name, e));
                }
            });
        }
        drop(reporter);

        info!(
            service = %self.service.name(),
            health = self.health.is_some(),
            "Coordinator running"
        );

        let failure = tokio::select! {
            _ = cancel.cancelled() => {
                info!("Shutdown requested");
                None
            }
            Some(err) = errors.recv() => {
                error!(error = %err, "Subsystem failed, shutting down");
                Some(err)
            }
        };

        let clean = self.shutdown(tasks).await;
        *self.state.lock() = LifecycleState::Stopped;

        match (failure, clean) {
            (Some(err), clean) => {
                if !clean {
                    warn!(timeout = ?self.shutdown_timeout, "Shutdown timed out after subsystem failure");
                }
                Err(err)
            }
            (None, true) => {
                info!("Coordinator stopped");
                Ok(())
            }
            (None, false) => Err(Error::ShutdownTimeout(self.shutdown_timeout)),
        }
    }

    /// Stop health, drain the service, join the supervised tasks. Returns
    /// whether the drain and join finished before the deadline. Health's
    /// own responder and publisher are not awaited.
    async fn shutdown(&self, mut tasks: JoinSet<()>) -> bool {
        *self.state.lock() = LifecycleState::ShuttingDown;
        let started = Instant::now();
        let deadline = started + self.shutdown_timeout;

        info!(timeout = ?self.shutdown_timeout, "Shutting down");

        if let Some(health) = &self.health {
            health.stop();
        }

        let drained = match tokio::time::timeout_at(deadline, self.service.shutdown()).await {
            Ok(Ok(())) => true,
            Ok(Err(e)) => {
                warn!(service = %self.service.name(), error = %e, "Service shutdown failed");
                true
            }
            Err(_) => {
                warn!(service = %self.service.name(), "Service did not drain in time");
                false
            }
        };

        let joined = drained
            && tokio::time::timeout_at(deadline, async {
                while let Some(joined) = tasks.join_next().await {
                    if let Err(e) = joined {
                        error!(error = %e, "Supervised task panicked");
                    }
                }
            })
            .await
            .is_ok();

        if !joined {
            tasks.abort_all();
        }

        debug!(elapsed = ?started.elapsed(), clean = joined, "Shutdown finished");
        joined
    }
}

/// Coordinator builder
#[derive(Debug)]
pub struct CoordinatorBuilder {
    service: Option<Arc<dyn Service>>,
    health: Option<HealthEngine>,
    shutdown_timeout: Duration,
}

impl CoordinatorBuilder {
    /// Create a new coordinator builder
    pub fn new() -> Self {
        Self {
            service: None,
            health: None,
            shutdown_timeout: Duration::from_secs(5),
        }
    }

    /// Assemble the standard service from configuration: a resource
    /// service answering `<name>.>` with the greeting model, and, when
    /// enabled, a health engine checking the bus plus `probes`.
    pub fn from_config(config: &Config, bus: Arc<dyn Bus>, probes: Vec<Arc<dyn Probe>>) -> Result<Self> {
        let router = ResourceRouter::new().route(
            format!("{}.>", config.service.name),
            Arc::new(GreetingHandler),
        );
        let service = ResourceService::new(config.service.clone().into(), router)?;

        let mut builder = Self::new()
            .service(Arc::new(service))
            .shutdown_timeout(config.service.shutdown_timeout);

        if config.health.enabled {
            let engine_config = HealthEngineConfig {
                interval: config.health.interval,
                timeout: config.health.timeout,
                request_subject: config.health.subject.clone(),
                status_topic: config.health.status_topic.clone(),
                service_name: config.service.name.clone(),
            };

            let mut all_probes: Vec<Arc<dyn Probe>> = vec![Arc::new(BusProbe::new(Arc::clone(&bus)))];
            all_probes.extend(probes);

            let engine = HealthEngine::new(
                bus,
                VersionInfo::new(config.environment.clone()),
                engine_config,
                all_probes,
            )?;
            builder = builder.health(engine);
        } else {
            info!("Health checks disabled");
        }

        Ok(builder)
    }

    /// Set the service loop
    pub fn service(mut self, service: Arc<dyn Service>) -> Self {
        self.service = Some(service);
        self
    }

    /// Set the health engine
    pub fn health(mut self, health: HealthEngine) -> Self {
        self.health = Some(health);
        self
    }

    /// Set the shutdown budget
    pub fn shutdown_timeout(mut self, timeout: Duration) -> Self {
        self.shutdown_timeout = timeout;
        self
    }

    /// Build the coordinator
    pub fn build(self) -> Result<Coordinator> {
        let service = self
            .service
            .ok_or_else(|| Error::Config("service is required".to_string()))?;

        if self.shutdown_timeout.is_zero() {
            return Err(Error::Config("shutdown timeout must be greater than zero".to_string()));
        }

        Ok(Coordinator {
            service,
            health: self.health,
            shutdown_timeout: self.shutdown_timeout,
            state: Mutex::new(LifecycleState::Idle),
        })
    }
}

impl Default for CoordinatorBuilder {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use vigil_core::MemoryBus;

    #[test]
    fn test_builder_requires_service() {
        let result = CoordinatorBuilder::new().build();
        assert!(matches!(result, Err(Error::Config(_))));
    }

    #[tokio::test]
    async fn test_builder_from_config() {
        let bus: Arc<dyn Bus> = Arc::new(MemoryBus::new());
        let coordinator = CoordinatorBuilder::from_config(&Config::default(), bus, Vec::new())
            .unwrap()
            .build()
            .unwrap();

        assert_eq!(coordinator.state(), LifecycleState::Idle);
        assert_eq!(coordinator.shutdown_timeout(), Duration::from_secs(5));
        let health = coordinator.health().unwrap();
        assert_eq!(health.probe_names(), vec!["nats".to_string()]);
        assert_eq!(health.config().service_name, "api");
    }

    #[tokio::test]
    async fn test_builder_without_health() {
        let mut config = Config::default();
        config.health.enabled = false;
        let bus: Arc<dyn Bus> = Arc::new(MemoryBus::new());

        let coordinator = CoordinatorBuilder::from_config(&config, bus, Vec::new())
            .unwrap()
            .build()
            .unwrap();
        assert!(coordinator.health().is_none());
    }

    #[tokio::test]
    async fn test_error_reporter_keeps_first() {
        let (sender, mut receiver) = mpsc::channel(1);
        let reporter = ErrorReporter { sender };

        reporter.report(Error::Runtime("first".into()));
        reporter.report(Error::Runtime("second".into()));
        drop(reporter);

        let first = receiver.recv().await.unwrap();
        assert_eq!(first.to_string(), Error::Runtime("first".into()).to_string());
        assert!(receiver.recv().await.is_none());
    }
}
