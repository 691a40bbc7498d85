//! Graceful shutdown with signal handling

use tokio::signal;
use tokio_util::sync::{CancellationToken, WaitForCancellationFuture};

/// Shutdown signal shared by everything that must stop together
#[derive(Debug, Clone, Default)]
pub struct ShutdownSignal {
    token: CancellationToken,
}

impl ShutdownSignal {
    /// Create a new shutdown signal
    pub fn new() -> Self {
        Self::default()
    }

    /// Trigger shutdown
    pub fn trigger(&self) {
        if !self.token.is_cancelled() {
            tracing::info!("Shutdown signal triggered");
        }
        self.token.cancel();
    }

    /// Check if shutdown was triggered
    pub fn is_triggered(&self) -> bool {
        self.token.is_cancelled()
    }

    /// Resolve once shutdown is triggered
    pub fn triggered(&self) -> WaitForCancellationFuture<'_> {
        self.token.cancelled()
    }

    /// Token cancelled when shutdown is triggered
    pub fn token(&self) -> CancellationToken {
        self.token.clone()
    }
}

/// Signal handler for OS signals
#[derive(Debug)]
pub struct SignalHandler {
    signal: ShutdownSignal,
}

impl SignalHandler {
    /// Create a new signal handler
    pub fn new(signal: ShutdownSignal) -> Self {
        Self { signal }
    }

    /// Wait for SIGINT or SIGTERM (Ctrl+C elsewhere), then trigger shutdown.
    ///
    /// Returns early without triggering if shutdown happens for another reason.
    pub async fn run(self) {
        tokio::select! {
            _ = self.signal.triggered() => {}
            received = wait_for_signal() => {
                if received {
                    self.signal.trigger();
                }
            }
        }
    }
}

#[cfg(unix)]
async fn wait_for_signal() -> bool {
    use signal::unix::{signal, SignalKind};

    let (mut sigterm, mut sigint) =
        match (signal(SignalKind::terminate()), signal(SignalKind::interrupt())) {
            (Ok(sigterm), Ok(sigint)) => (sigterm, sigint),
            (Err(e), _) | (_, Err(e)) => {
                tracing::error!(error = %e, "Failed to install signal handlers");
                return false;
            }
        };

    tokio::select! {
        _ = sigterm.recv() => tracing::info!("Received SIGTERM"),
        _ = sigint.recv() => tracing::info!("Received SIGINT"),
    }
    true
}

#[cfg(not(unix))]
async fn wait_for_signal() -> bool {
    match signal::ctrl_c().await {
        Ok(()) => {
            tracing::info!("Received Ctrl+C");
            true
        }
        Err(e) => {
            tracing::error!(error = %e, "Failed to listen for Ctrl+C");
            false
        }
    }
}
