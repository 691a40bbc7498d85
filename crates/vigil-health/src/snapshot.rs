//! Health snapshots

use bytes::Bytes;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;
use std::time::Duration;
use vigil_core::Result;

/// Check value recorded for a passing probe
pub const HEALTHY: &str = "healthy";

/// Aggregate health status
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum HealthStatus {
    /// Every probe passed
    Healthy,
    /// At least one probe failed
    Unhealthy,
}

impl fmt::Display for HealthStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            HealthStatus::Healthy => write!(f, "healthy"),
            HealthStatus::Unhealthy => write!(f, "unhealthy"),
        }
    }
}

/// Result of running every probe once, as published on the bus
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct HealthSnapshot {
    /// Aggregate status
    pub status: HealthStatus,
    /// Runtime facts, informational only
    pub system_info: BTreeMap<String, String>,
    /// Build version
    pub version: String,
    /// Deployment environment
    pub environment: String,
    /// Time since the engine was created
    pub uptime: String,
    /// When the snapshot was taken
    pub timestamp: DateTime<Utc>,
    /// Per-probe results: `healthy` or `unhealthy: <reason>`
    pub checks: BTreeMap<String, String>,
    /// Reporting service
    pub service_name: String,
}

impl HealthSnapshot {
    /// Whether the aggregate status is healthy
    pub fn is_healthy(&self) -> bool {
        self.status == HealthStatus::Healthy
    }

    /// Serialize to the wire format
    pub fn to_json(&self) -> Result<Bytes> {
        Ok(Bytes::from(serde_json::to_vec(self)?))
    }

    /// Parse from the wire format
    pub fn from_json(payload: &[u8]) -> Result<Self> {
        Ok(serde_json::from_slice(payload)?)
    }
}

/// Format an uptime with second precision, e.g. `1h 2m 3s`
pub fn format_uptime(uptime: Duration) -> String {
    humantime::format_duration(Duration::from_secs(uptime.as_secs())).to_string()
}

/// Collect runtime facts about the process
pub fn system_info() -> BTreeMap<String, String> {
    let mut info = BTreeMap::new();
    info.insert("os".to_string(), std::env::consts::OS.to_string());
    info.insert("arch".to_string(), std::env::consts::ARCH.to_string());
    info.insert("num_cpu".to_string(), num_cpus::get().to_string());

    if let Ok(handle) = tokio::runtime::Handle::try_current() {
        let metrics = handle.metrics();
        info.insert("num_workers".to_string(), metrics.num_workers().to_string());
        info.insert("num_tasks".to_string(), metrics.num_alive_tasks().to_string());
    }

    info
}
