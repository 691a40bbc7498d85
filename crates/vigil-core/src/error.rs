//! Error types for Vigil

use std::time::Duration;

/// Result type alias using [`Error`]
pub type Result<T, E = Error> = std::result::Result<T, E>;

/// Main error type for Vigil
#[derive(Debug, thiserror::Error)]
pub enum Error {
    /// Configuration error
    #[error("Configuration error: {0}")]
    Config(String),

    /// Bus connection error
    #[error("Bus error: {0}")]
    Bus(String),

    /// Subscribing to a subject failed
    #[error("Failed to subscribe to '{subject}': {message}")]
    Subscribe {
        /// Subject that could not be subscribed
        subject: String,
        /// Error message
        message: String,
    },

    /// Publishing to a subject failed
    #[error("Failed to publish to '{subject}': {message}")]
    Publish {
        /// Target subject
        subject: String,
        /// Error message
        message: String,
    },

    /// A request got no reply in time
    #[error("Request to '{0}' timed out")]
    RequestTimeout(String),

    /// Component was started twice
    #[error("{0} already started")]
    AlreadyStarted(String),

    /// A supervised subsystem terminated with an error
    #[error("Subsystem '{subsystem}' failed: {source}")]
    Subsystem {
        /// Subsystem name
        subsystem: String,
        /// Underlying error
        #[source]
        source: Box<Error>,
    },

    /// Shutdown did not complete before its deadline
    #[error("Shutdown timed out after {0:?}")]
    ShutdownTimeout(Duration),

    /// Runtime error
    #[error("Runtime error: {0}")]
    Runtime(String),

    /// Serialization error
    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    /// I/O error
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

impl Error {
    /// Wrap an error as the terminal failure of a named subsystem
    pub fn subsystem(subsystem: impl Into<String>, source: Error) -> Self {
        Error::Subsystem {
            subsystem: subsystem.into(),
            source: Box::new(source),
        }
    }

    /// Create a publish error
    pub fn publish(subject: impl Into<String>, message: impl ToString) -> Self {
        Error::Publish {
            subject: subject.into(),
            message: message.to_string(),
        }
    }

    /// Create a subscribe error
    pub fn subscribe(subject: impl Into<String>, message: impl ToString) -> Self {
        Error::Subscribe {
            subject: subject.into(),
            message: message.to_string(),
        }
    }

    /// Whether this is a shutdown deadline error
    pub fn is_shutdown_timeout(&self) -> bool {
        matches!(self, Error::ShutdownTimeout(_))
    }
}
