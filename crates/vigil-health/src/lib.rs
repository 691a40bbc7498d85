//! # Vigil Health
//!
//! Health reporting for a service on the message bus:
//! - Pluggable dependency probes (bus connectivity, data store ping, closures)
//! - Snapshots run against a single shared deadline
//! - Periodic publishing on `<status_topic>.<service>`
//! - On-demand answers on `<subject>.<service>`

#![forbid(unsafe_code)]
#![warn(
    missing_docs,
    missing_debug_implementations,
    rust_2018_idioms,
    unreachable_pub
)]

pub mod engine;
pub mod probe;
pub mod snapshot;
pub mod version;

pub use engine::{HealthEngine, HealthEngineConfig};
pub use probe::{BusProbe, DataStoreProbe, FnProbe, Pinger, Probe, ProbeError};
pub use snapshot::{system_info, HealthSnapshot, HealthStatus, HEALTHY};
pub use version::VersionInfo;

/// Re-export commonly used types
pub mod prelude {
    pub use crate::engine::{HealthEngine, HealthEngineConfig};
    pub use crate::probe::{BusProbe, DataStoreProbe, Probe, ProbeError};
    pub use crate::snapshot::{HealthSnapshot, HealthStatus};
    pub use crate::version::VersionInfo;
}
