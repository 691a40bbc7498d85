//! Health engine: runs probes, publishes snapshots, answers health requests

use crate::probe::{Probe, ProbeError};
use crate::snapshot::{format_uptime, system_info, HealthSnapshot, HealthStatus, HEALTHY};
use crate::version::VersionInfo;
use async_trait::async_trait;
use bytes::Bytes;
use chrono::Utc;
use futures::future::join_all;
use parking_lot::Mutex;
use std::collections::{BTreeMap, HashSet};
use std::fmt;
use std::sync::Arc;
use std::time::Duration;
use tokio::task::JoinHandle;
use tokio::time::{Instant, MissedTickBehavior};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};
use vigil_core::{
    join_subject, respond, Bus, Error, Message, MessageHandler, Result, SubscriptionGuard,
    DEFAULT_SUBSCRIPTION_CAPACITY,
};

/// Health engine configuration
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct HealthEngineConfig {
    /// Period between published snapshots
    pub interval: Duration,
    /// Deadline for one full snapshot
    pub timeout: Duration,
    /// Prefix for on-demand requests; the engine listens on `<subject>.<service_name>`
    pub request_subject: String,
    /// Prefix for published snapshots; the engine publishes on `<status_topic>.<service_name>`
    pub status_topic: String,
    /// Reporting service name
    pub service_name: String,
}

impl Default for HealthEngineConfig {
    fn default() -> Self {
        Self {
            interval: Duration::from_secs(30),
            timeout: Duration::from_secs(5),
            request_subject: "health".to_string(),
            status_topic: "health.status".to_string(),
            service_name: "service".to_string(),
        }
    }
}

impl HealthEngineConfig {
    /// Check the configuration is usable
    pub fn validate(&self) -> Result<()> {
        if self.interval.is_zero() {
            return Err(Error::Config("health interval must be greater than zero".into()));
        }
        if self.timeout.is_zero() {
            return Err(Error::Config("health timeout must be greater than zero".into()));
        }
        if self.request_subject.is_empty() || self.status_topic.is_empty() {
            return Err(Error::Config("health subjects cannot be empty".into()));
        }
        if self.service_name.is_empty() {
            return Err(Error::Config("service name cannot be empty".into()));
        }
        Ok(())
    }

    /// Subject answering on-demand health requests
    pub fn request_subject_for_service(&self) -> String {
        join_subject(&self.request_subject, &self.service_name)
    }

    /// Subject receiving periodic snapshots
    pub fn status_subject(&self) -> String {
        join_subject(&self.status_topic, &self.service_name)
    }
}

#[derive(Debug, Default)]
struct EngineState {
    started: bool,
    responder: Option<SubscriptionGuard>,
    tasks: Vec<JoinHandle<()>>,
}

struct EngineInner {
    bus: Arc<dyn Bus>,
    identity: VersionInfo,
    config: HealthEngineConfig,
    probes: Vec<Arc<dyn Probe>>,
    created_at: Instant,
    stop: CancellationToken,
    state: Mutex<EngineState>,
}

/// Periodic and on-demand health reporting over the bus.
///
/// Cloning is cheap and every clone controls the same engine.
#[derive(Clone)]
pub struct HealthEngine {
    inner: Arc<EngineInner>,
}

impl HealthEngine {
    /// Create an engine. Probes run in the given order; if two share a
    /// name, the later result wins.
    pub fn new(
        bus: Arc<dyn Bus>,
        identity: VersionInfo,
        config: HealthEngineConfig,
        probes: Vec<Arc<dyn Probe>>,
    ) -> Result<Self> {
        config.validate()?;

        let mut seen = HashSet::new();
        for probe in &probes {
            if !seen.insert(probe.name().to_string()) {
                warn!(probe = %probe.name(), "Duplicate health probe name, later result wins");
            }
        }

        Ok(Self {
            inner: Arc::new(EngineInner {
                bus,
                identity,
                config,
                probes,
                created_at: Instant::now(),
                stop: CancellationToken::new(),
                state: Mutex::new(EngineState::default()),
            }),
        })
    }

    /// Engine configuration
    pub fn config(&self) -> &HealthEngineConfig {
        &self.inner.config
    }

    /// Names of the registered probes, in run order
    pub fn probe_names(&self) -> Vec<String> {
        self.inner.probes.iter().map(|p| p.name().to_string()).collect()
    }

    /// Whether `start` succeeded and `stop` has not been called
    pub fn is_running(&self) -> bool {
        self.inner.state.lock().started && !self.inner.stop.is_cancelled()
    }

    /// Register the request responder and begin periodic publishing.
    ///
    /// The first publish happens one interval after start. Fails if the
    /// responder cannot subscribe, or if the engine was already started.
    pub async fn start(&self) -> Result<()> {
        {
            let mut state = self.inner.state.lock();
            if state.started {
                return Err(Error::AlreadyStarted("health engine".into()));
            }
            state.started = true;
        }

        let subject = self.inner.config.request_subject_for_service();
        let subscription = self
            .inner
            .bus
            .subscribe(&subject, DEFAULT_SUBSCRIPTION_CAPACITY)
            .await?;
        let (receiver, guard) = subscription.split();

        let handler = Arc::new(SnapshotResponder {
            inner: Arc::clone(&self.inner),
        });
        let responder = respond(Arc::clone(&self.inner.bus), receiver, handler);
        let publisher = tokio::spawn(publish_loop(Arc::clone(&self.inner)));

        let mut state = self.inner.state.lock();
        if self.inner.stop.is_cancelled() {
            drop(guard);
        } else {
            state.responder = Some(guard);
        }
        state.tasks.push(responder);
        state.tasks.push(publisher);

        info!(
            service = %self.inner.config.service_name,
            request_subject = %subject,
            status_subject = %self.inner.config.status_subject(),
            interval = ?self.inner.config.interval,
            probes = self.inner.probes.len(),
            "Health engine started"
        );
        Ok(())
    }

    /// Run every probe once against a shared deadline
    pub async fn snapshot(&self) -> HealthSnapshot {
        self.inner.snapshot().await
    }

    /// Stop publishing and unregister the responder.
    ///
    /// Returns without waiting for background work; no publish starts after
    /// this call. Safe to call more than once, or before `start`.
    pub fn stop(&self) {
        let first = !self.inner.stop.is_cancelled();
        self.inner.stop.cancel();

        let guard = self.inner.state.lock().responder.take();
        drop(guard);

        if first {
            info!(service = %self.inner.config.service_name, "Health engine stopped");
        }
    }

    /// Wait for background tasks to finish after `stop`.
    ///
    /// Returns `false` if they are still running when `timeout` elapses.
    pub async fn wait_stopped(&self, timeout: Duration) -> bool {
        let tasks = std::mem::take(&mut self.inner.state.lock().tasks);
        if tasks.is_empty() {
            return true;
        }

        match tokio::time::timeout(timeout, join_all(tasks)).await {
            Ok(_) => true,
            Err(_) => {
                warn!(timeout = ?timeout, "Health engine tasks did not finish in time");
                false
            }
        }
    }
}

impl fmt::Debug for HealthEngine {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("HealthEngine")
            .field("config", &self.inner.config)
            .field("identity", &self.inner.identity)
            .field("probes", &self.probe_names())
            .field("running", &self.is_running())
            .finish()
    }
}

impl EngineInner {
    async fn snapshot(&self) -> HealthSnapshot {
        let deadline = Instant::now() + self.config.timeout;

        let results = join_all(self.probes.iter().map(|probe| async move {
            let result = match tokio::time::timeout_at(deadline, probe.check()).await {
                Ok(result) => result,
                Err(_) => Err(ProbeError::DeadlineExceeded),
            };
            (probe.name(), result)
        }))
        .await;

        let mut status = HealthStatus::Healthy;
        let mut checks = BTreeMap::new();
        for (name, result) in results {
            let value = match result {
                Ok(()) => HEALTHY.to_string(),
                Err(e) => {
                    warn!(probe = %name, error = %e, "Health probe failed");
                    status = HealthStatus::Unhealthy;
                    format!("unhealthy: {}", e)
                }
            };
            checks.insert(name.to_string(), value);
        }

        HealthSnapshot {
            status,
            system_info: system_info(),
            version: self.identity.version().to_string(),
            environment: self.identity.environment().to_string(),
            uptime: format_uptime(self.created_at.elapsed()),
            timestamp: Utc::now(),
            checks,
            service_name: self.config.service_name.clone(),
        }
    }
}

async fn publish_loop(inner: Arc<EngineInner>) {
    let period = inner.config.interval;
    let topic = inner.config.status_subject();

    let mut ticker = tokio::time::interval_at(Instant::now() + period, period);
    ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

    loop {
        tokio::select! {
            biased;
            _ = inner.stop.cancelled() => break,
            _ = ticker.tick() => {
                let snapshot = tokio::select! {
                    biased;
                    _ = inner.stop.cancelled() => break,
                    snapshot = inner.snapshot() => snapshot,
                };
                if inner.stop.is_cancelled() {
                    break;
                }

                let payload = match snapshot.to_json() {
                    Ok(payload) => payload,
                    Err(e) => {
                        warn!(error = %e, "Failed to encode health snapshot");
                        continue;
                    }
                };

                match inner.bus.publish(&topic, payload).await {
                    Ok(()) => debug!(subject = %topic, status = %snapshot.status, "Published health snapshot"),
                    Err(e) => warn!(subject = %topic, error = %e, "Failed to publish health snapshot"),
                }
            }
        }
    }

    debug!("Health publisher stopped");
}

struct SnapshotResponder {
    inner: Arc<EngineInner>,
}

#[async_trait]
impl MessageHandler for SnapshotResponder {
    async fn handle(&self, message: &Message) -> Option<Bytes> {
        debug!(subject = %message.subject, "Answering health request");
        match self.inner.snapshot().await.to_json() {
            Ok(payload) => Some(payload),
            Err(e) => {
                warn!(error = %e, "Failed to encode health snapshot");
                None
            }
        }
    }
}
