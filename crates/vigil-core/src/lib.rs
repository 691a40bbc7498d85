//! # Vigil Core
//!
//! Core types, traits, and error handling shared by the Vigil crates.
//!
//! This crate provides the foundational abstractions used throughout the service:
//! - Error types
//! - The message bus transport trait and subscriptions
//! - NATS-style subject matching
//! - An in-process bus, and a NATS-backed bus behind the `nats` feature

#![forbid(unsafe_code)]
#![warn(
    missing_docs,
    missing_debug_implementations,
    rust_2018_idioms,
    unreachable_pub
)]

pub mod bus;
pub mod error;
pub mod memory;
#[cfg(feature = "nats")]
pub mod nats;
pub mod subject;

pub use bus::{
    respond, Bus, Message, MessageHandler, Subscription, SubscriptionGuard,
    DEFAULT_SUBSCRIPTION_CAPACITY,
};
pub use error::{Error, Result};
pub use memory::MemoryBus;
#[cfg(feature = "nats")]
pub use nats::{NatsBus, NatsOptions};
pub use subject::{join_subject, subject_matches};

pub use bytes::Bytes;

/// Re-export commonly used types
pub mod prelude {
    pub use crate::bus::{respond, Bus, Message, MessageHandler, Subscription};
    pub use crate::error::{Error, Result};
    pub use crate::memory::MemoryBus;
}
