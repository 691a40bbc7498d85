//! Message bus transport abstraction
//!
//! The [`Bus`] trait is the only view the rest of Vigil has of the messaging
//! layer: publish, subscribe, request/reply, and a connectivity flag. The
//! connection is shared behind `Arc<dyn Bus>` and relies on its own internal
//! synchronization.

use crate::Result;
use async_trait::async_trait;
use bytes::Bytes;
use std::fmt;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tracing::{debug, warn};

/// Default capacity of a subscription's inbound queue
pub const DEFAULT_SUBSCRIPTION_CAPACITY: usize = 256;

/// A message received from the bus
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Message {
    /// Subject the message was published on
    pub subject: String,
    /// Reply subject, set for requests
    pub reply: Option<String>,
    /// Message body
    pub payload: Bytes,
}

impl Message {
    /// Create a message without a reply subject
    pub fn new(subject: impl Into<String>, payload: impl Into<Bytes>) -> Self {
        Self {
            subject: subject.into(),
            reply: None,
            payload: payload.into(),
        }
    }
}

/// Keeps a subscription registered; dropping it unregisters the interest
pub struct SubscriptionGuard {
    subject: String,
    on_drop: Option<Box<dyn FnOnce() + Send>>,
}

impl SubscriptionGuard {
    /// Create a guard that runs `on_drop` when released
    pub fn new(subject: impl Into<String>, on_drop: impl FnOnce() + Send + 'static) -> Self {
        Self {
            subject: subject.into(),
            on_drop: Some(Box::new(on_drop)),
        }
    }

    /// Subject this guard keeps registered
    pub fn subject(&self) -> &str {
        &self.subject
    }

    /// Unregister now
    pub fn unsubscribe(self) {
        drop(self);
    }
}

impl Drop for SubscriptionGuard {
    fn drop(&mut self) {
        if let Some(on_drop) = self.on_drop.take() {
            debug!(subject = %self.subject, "Unsubscribing");
            on_drop();
        }
    }
}

impl fmt::Debug for SubscriptionGuard {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SubscriptionGuard")
            .field("subject", &self.subject)
            .field("active", &self.on_drop.is_some())
            .finish()
    }
}

/// An active subscription: a bounded inbound queue plus its guard
#[derive(Debug)]
pub struct Subscription {
    receiver: mpsc::Receiver<Message>,
    guard: SubscriptionGuard,
}

impl Subscription {
    /// Create a subscription from its parts
    pub fn new(receiver: mpsc::Receiver<Message>, guard: SubscriptionGuard) -> Self {
        Self { receiver, guard }
    }

    /// Subscribed subject or pattern
    pub fn subject(&self) -> &str {
        self.guard.subject()
    }

    /// Receive the next message, `None` once unsubscribed or disconnected
    pub async fn next(&mut self) -> Option<Message> {
        self.receiver.recv().await
    }

    /// Whether no message is queued right now
    pub fn is_empty(&self) -> bool {
        self.receiver.is_empty()
    }

    /// Separate the receiver from the guard, so the owner can unregister
    /// while another task still drains the queue
    pub fn split(self) -> (mpsc::Receiver<Message>, SubscriptionGuard) {
        (self.receiver, self.guard)
    }
}

/// Message bus connection
#[async_trait]
pub trait Bus: Send + Sync + fmt::Debug {
    /// Publish a message on a subject
    async fn publish(&self, subject: &str, payload: Bytes) -> Result<()>;

    /// Subscribe to a subject or wildcard pattern with a bounded queue
    async fn subscribe(&self, subject: &str, capacity: usize) -> Result<Subscription>;

    /// Send a request and wait for the first reply
    async fn request(&self, subject: &str, payload: Bytes, timeout: Duration) -> Result<Message>;

    /// Whether the connection is currently alive
    fn is_connected(&self) -> bool;

    /// Flush buffered outbound messages
    async fn flush(&self) -> Result<()> {
        Ok(())
    }
}

/// Handler answering request messages
#[async_trait]
pub trait MessageHandler: Send + Sync {
    /// Produce the reply body for a request, or `None` to stay silent
    async fn handle(&self, message: &Message) -> Option<Bytes>;
}

/// Spawn a responder loop answering every request read from `receiver`.
///
/// The loop ends when the receiver closes, which happens once the
/// matching [`SubscriptionGuard`] is dropped.
pub fn respond(
    bus: Arc<dyn Bus>,
    mut receiver: mpsc::Receiver<Message>,
    handler: Arc<dyn MessageHandler>,
) -> JoinHandle<()> {
    tokio::spawn(async move {
        while let Some(message) = receiver.recv().await {
            let Some(reply) = message.reply.as_deref() else {
                debug!(subject = %message.subject, "Ignoring message without reply subject");
                continue;
            };

            if let Some(response) = handler.handle(&message).await {
                if let Err(e) = bus.publish(reply, response).await {
                    warn!(subject = %message.subject, error = %e, "Failed to send reply");
                }
            }
        }
        debug!("Responder stopped");
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicBool, Ordering};

    #[test]
    fn test_guard_runs_on_drop() {
        let released = Arc::new(AtomicBool::new(false));
        let flag = Arc::clone(&released);
        let guard = SubscriptionGuard::new("health.api", move || flag.store(true, Ordering::SeqCst));

        assert_eq!(guard.subject(), "health.api");
        assert!(!released.load(Ordering::SeqCst));
        guard.unsubscribe();
        assert!(released.load(Ordering::SeqCst));
    }

    #[tokio::test]
    async fn test_split_keeps_receiver() {
        let (tx, rx) = mpsc::channel(4);
        let sub = Subscription::new(rx, SubscriptionGuard::new("a.b", || {}));
        let (mut rx, guard) = sub.split();
        drop(guard);

        tx.send(Message::new("a.b", "x")).await.unwrap();
        assert_eq!(rx.recv().await.unwrap().payload, Bytes::from("x"));
    }
}
