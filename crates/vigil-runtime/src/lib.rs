//! # Vigil Runtime
//!
//! Service lifecycle management with:
//! - A coordinator supervising the health engine and the service loop
//! - First-failure-wins error reporting
//! - Ordered shutdown bounded by a single deadline
//! - Graceful shutdown with signal handling
//! - A resource service answering RES `get` requests with a bounded worker pool

#![forbid(unsafe_code)]
#![warn(
    missing_docs,
    missing_debug_implementations,
    rust_2018_idioms,
    unreachable_pub
)]

use std::fmt;

pub mod coordinator;
pub mod resource;
pub mod service;
pub mod shutdown;

pub use coordinator::{Coordinator, CoordinatorBuilder};
pub use resource::{GreetingHandler, ResourceError, ResourceHandler, ResourceRequest, ResourceRouter};
pub use service::{ResourceService, ResourceServiceConfig, Service};
pub use shutdown::{ShutdownSignal, SignalHandler};

/// Coordinator lifecycle state
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LifecycleState {
    /// Built, not yet run
    Idle,
    /// Subsystems are running
    Running,
    /// Shutdown in progress
    ShuttingDown,
    /// Shutdown finished, cleanly or not
    Stopped,
}

impl fmt::Display for LifecycleState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            LifecycleState::Idle => write!(f, "idle"),
            LifecycleState::Running => write!(f, "running"),
            LifecycleState::ShuttingDown => write!(f, "shutting down"),
            LifecycleState::Stopped => write!(f, "stopped"),
        }
    }
}

/// Re-export commonly used types
pub mod prelude {
    pub use crate::coordinator::{Coordinator, CoordinatorBuilder};
    pub use crate::service::{ResourceService, Service};
    pub use crate::shutdown::{ShutdownSignal, SignalHandler};
    pub use crate::LifecycleState;
}
