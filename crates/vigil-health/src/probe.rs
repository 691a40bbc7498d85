//! Dependency probes

use async_trait::async_trait;
use futures::future::BoxFuture;
use std::fmt;
use std::sync::Arc;
use tracing::debug;
use vigil_core::Bus;

/// Why a probe failed
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum ProbeError {
    /// The dependency reported a failure
    #[error("{0}")]
    Failed(String),
    /// The probe did not finish before the snapshot deadline
    #[error("deadline exceeded")]
    DeadlineExceeded,
}

impl ProbeError {
    /// Create a failure with a reason
    pub fn failed(reason: impl Into<String>) -> Self {
        ProbeError::Failed(reason.into())
    }
}

/// A named check against one dependency.
///
/// The caller bounds `check` with a deadline; a probe that overruns it is
/// recorded as failed. Probes must not rely on engine state and any side
/// effect they have must be safe to repeat.
#[async_trait]
pub trait Probe: Send + Sync + fmt::Debug {
    /// Stable name, used as the key in snapshot checks
    fn name(&self) -> &str;

    /// Run the check once
    async fn check(&self) -> Result<(), ProbeError>;
}

/// Fails when the bus connection reports itself disconnected
#[derive(Debug, Clone)]
pub struct BusProbe {
    bus: Arc<dyn Bus>,
}

impl BusProbe {
    /// Create a probe over a shared bus connection
    pub fn new(bus: Arc<dyn Bus>) -> Self {
        Self { bus }
    }
}

#[async_trait]
impl Probe for BusProbe {
    fn name(&self) -> &str {
        "nats"
    }

    async fn check(&self) -> Result<(), ProbeError> {
        if self.bus.is_connected() {
            Ok(())
        } else {
            Err(ProbeError::failed("NATS connection is not alive"))
        }
    }
}

/// Liveness ping against a data store
#[async_trait]
pub trait Pinger: Send + Sync + fmt::Debug {
    /// Ping the store once
    async fn ping(&self) -> Result<(), String>;
}

#[cfg(feature = "postgres")]
#[async_trait]
impl Pinger for sqlx::PgPool {
    async fn ping(&self) -> Result<(), String> {
        sqlx::query("SELECT 1")
            .execute(self)
            .await
            .map(|_| ())
            .map_err(|e| e.to_string())
    }
}

/// Fails when the store's ping errors
#[derive(Debug, Clone)]
pub struct DataStoreProbe<P> {
    name: String,
    pinger: P,
}

impl<P: Pinger> DataStoreProbe<P> {
    /// Create a probe named `database`
    pub fn new(pinger: P) -> Self {
        Self::with_name("database", pinger)
    }

    /// Create a probe with a custom name
    pub fn with_name(name: impl Into<String>, pinger: P) -> Self {
        Self {
            name: name.into(),
            pinger,
        }
    }
}

#[async_trait]
impl<P: Pinger> Probe for DataStoreProbe<P> {
    fn name(&self) -> &str {
        &self.name
    }

    async fn check(&self) -> Result<(), ProbeError> {
        debug!(probe = %self.name, "Pinging data store");
        self.pinger.ping().await.map_err(ProbeError::Failed)
    }
}

type CheckFn = dyn Fn() -> BoxFuture<'static, Result<(), ProbeError>> + Send + Sync;

/// Probe built from a closure, for user-defined checks
pub struct FnProbe {
    name: String,
    check: Box<CheckFn>,
}

impl FnProbe {
    /// Create a probe that runs `check` on every snapshot
    pub fn new<F>(name: impl Into<String>, check: F) -> Self
    where
        F: Fn() -> BoxFuture<'static, Result<(), ProbeError>> + Send + Sync + 'static,
    {
        Self {
            name: name.into(),
            check: Box::new(check),
        }
    }
}

impl fmt::Debug for FnProbe {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("FnProbe").field("name", &self.name).finish()
    }
}

#[async_trait]
impl Probe for FnProbe {
    fn name(&self) -> &str {
        &self.name
    }

    async fn check(&self) -> Result<(), ProbeError> {
        (self.check)().await
    }
}
