//! In-process message bus
//!
//! Used for tests and for running the service without a NATS server
//! (`memory://` URLs). Delivery follows NATS semantics closely enough for
//! the service: wildcard subscriptions, request/reply through unique inbox
//! subjects, "no responders" errors, and dropped messages for slow consumers.

use crate::bus::{Bus, Message, Subscription, SubscriptionGuard};
use crate::subject::{is_valid_subject, subject_matches};
use crate::{Error, Result};
use async_trait::async_trait;
use bytes::Bytes;
use parking_lot::RwLock;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Weak};
use std::time::Duration;
use tokio::sync::mpsc;
use tokio::sync::mpsc::error::TrySendError;
use tracing::{trace, warn};

#[derive(Debug)]
struct Subscriber {
    id: u64,
    pattern: String,
    sender: mpsc::Sender<Message>,
}

#[derive(Debug)]
struct Inner {
    subscribers: RwLock<Vec<Subscriber>>,
    next_id: AtomicU64,
    connected: AtomicBool,
}

/// In-process bus shared by cloning
#[derive(Debug, Clone)]
pub struct MemoryBus {
    inner: Arc<Inner>,
}

impl MemoryBus {
    /// Create a connected bus with no subscribers
    pub fn new() -> Self {
        Self {
            inner: Arc::new(Inner {
                subscribers: RwLock::new(Vec::new()),
                next_id: AtomicU64::new(1),
                connected: AtomicBool::new(true),
            }),
        }
    }

    /// Simulate losing or regaining the connection
    pub fn set_connected(&self, connected: bool) {
        self.inner.connected.store(connected, Ordering::SeqCst);
    }

    /// Number of registered subscriptions
    pub fn subscriber_count(&self) -> usize {
        self.inner.subscribers.read().len()
    }

    /// Whether any subscription matches `subject`
    pub fn has_interest(&self, subject: &str) -> bool {
        self.inner
            .subscribers
            .read()
            .iter()
            .any(|s| subject_matches(&s.pattern, subject))
    }

    fn ensure_connected(&self) -> Result<()> {
        if self.is_connected() {
            Ok(())
        } else {
            Err(Error::Bus("connection closed".to_string()))
        }
    }

    /// Deliver to every matching subscriber, returning the delivery count
    fn deliver(&self, message: Message) -> usize {
        let subscribers = self.inner.subscribers.read();
        let mut delivered = 0;

        for subscriber in subscribers
            .iter()
            .filter(|s| subject_matches(&s.pattern, &message.subject))
        {
            match subscriber.sender.try_send(message.clone()) {
                Ok(()) => delivered += 1,
                Err(TrySendError::Full(_)) => {
                    warn!(
                        subject = %message.subject,
                        pattern = %subscriber.pattern,
                        "Slow consumer, dropping message"
                    );
                }
                Err(TrySendError::Closed(_)) => {
                    trace!(pattern = %subscriber.pattern, "Subscriber closed");
                }
            }
        }

        delivered
    }

    fn remove(inner: &Weak<Inner>, id: u64) {
        if let Some(inner) = inner.upgrade() {
            inner.subscribers.write().retain(|s| s.id != id);
        }
    }
}

impl Default for MemoryBus {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl Bus for MemoryBus {
    async fn publish(&self, subject: &str, payload: Bytes) -> Result<()> {
        self.ensure_connected()
            .map_err(|e| Error::publish(subject, e))?;
        if !is_valid_subject(subject) {
            return Err(Error::publish(subject, "invalid subject"));
        }

        let delivered = self.deliver(Message::new(subject, payload));
        trace!(subject, delivered, "Published");
        Ok(())
    }

    async fn subscribe(&self, subject: &str, capacity: usize) -> Result<Subscription> {
        self.ensure_connected()
            .map_err(|e| Error::subscribe(subject, e))?;
        if subject.is_empty() {
            return Err(Error::subscribe(subject, "empty subject"));
        }

        let id = self.inner.next_id.fetch_add(1, Ordering::Relaxed);
        let (sender, receiver) = mpsc::channel(capacity.max(1));
        self.inner.subscribers.write().push(Subscriber {
            id,
            pattern: subject.to_string(),
            sender,
        });

        let inner = Arc::downgrade(&self.inner);
        let guard = SubscriptionGuard::new(subject, move || MemoryBus::remove(&inner, id));
        Ok(Subscription::new(receiver, guard))
    }

    async fn request(&self, subject: &str, payload: Bytes, timeout: Duration) -> Result<Message> {
        let inbox = format!("_INBOX.{}", uuid::Uuid::new_v4().simple());
        let mut replies = self.subscribe(&inbox, 1).await?;

        self.ensure_connected()
            .map_err(|e| Error::publish(subject, e))?;
        let delivered = self.deliver(Message {
            subject: subject.to_string(),
            reply: Some(inbox),
            payload,
        });
        if delivered == 0 {
            return Err(Error::Bus(format!("no responders for '{}'", subject)));
        }

        match tokio::time::timeout(timeout, replies.next()).await {
            Ok(Some(reply)) => Ok(reply),
            Ok(None) => Err(Error::Bus("connection closed".to_string())),
            Err(_) => Err(Error::RequestTimeout(subject.to_string())),
        }
    }

    fn is_connected(&self) -> bool {
        self.inner.connected.load(Ordering::SeqCst)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::bus::{respond, MessageHandler};

    struct Echo;

    #[async_trait]
    impl MessageHandler for Echo {
        async fn handle(&self, message: &Message) -> Option<Bytes> {
            Some(message.payload.clone())
        }
    }

    #[tokio::test]
    async fn test_publish_subscribe_wildcard() {
        let bus = MemoryBus::new();
        let mut sub = bus.subscribe("health.status.>", 8).await.unwrap();

        bus.publish("health.status.api", Bytes::from("up")).await.unwrap();
        bus.publish("health.api", Bytes::from("ignored")).await.unwrap();

        let msg = sub.next().await.unwrap();
        assert_eq!(msg.subject, "health.status.api");
        assert_eq!(msg.payload, Bytes::from("up"));
        assert!(sub.is_empty());
    }

    #[tokio::test]
    async fn test_drop_unsubscribes() {
        let bus = MemoryBus::new();
        let sub = bus.subscribe("health.api", 8).await.unwrap();
        assert!(bus.has_interest("health.api"));

        drop(sub);
        assert_eq!(bus.subscriber_count(), 0);
        assert!(!bus.has_interest("health.api"));
    }

    #[tokio::test]
    async fn test_request_reply() {
        let bus = MemoryBus::new();
        let shared: Arc<dyn Bus> = Arc::new(bus.clone());
        let (receiver, _guard) = bus.subscribe("echo", 8).await.unwrap().split();
        respond(Arc::clone(&shared), receiver, Arc::new(Echo));

        let reply = bus
            .request("echo", Bytes::from("ping"), Duration::from_secs(1))
            .await
            .unwrap();
        assert_eq!(reply.payload, Bytes::from("ping"));
    }

    #[tokio::test]
    async fn test_request_no_responders() {
        let bus = MemoryBus::new();
        let err = bus
            .request("nobody.home", Bytes::new(), Duration::from_secs(1))
            .await
            .unwrap_err();
        assert!(err.to_string().contains("no responders"));
    }

    #[tokio::test(start_paused = true)]
    async fn test_request_timeout() {
        let bus = MemoryBus::new();
        let _silent = bus.subscribe("silent", 8).await.unwrap();

        let err = bus
            .request("silent", Bytes::new(), Duration::from_millis(50))
            .await
            .unwrap_err();
        assert!(matches!(err, Error::RequestTimeout(_)));
    }

    #[tokio::test]
    async fn test_disconnected() {
        let bus = MemoryBus::new();
        bus.set_connected(false);
        assert!(!bus.is_connected());
        assert!(bus.publish("a", Bytes::new()).await.is_err());
        assert!(bus.subscribe("a", 1).await.is_err());
    }

    #[tokio::test]
    async fn test_slow_consumer_drops() {
        let bus = MemoryBus::new();
        let mut sub = bus.subscribe("busy", 1).await.unwrap();

        bus.publish("busy", Bytes::from("1")).await.unwrap();
        bus.publish("busy", Bytes::from("2")).await.unwrap();

        assert_eq!(sub.next().await.unwrap().payload, Bytes::from("1"));
        assert!(sub.is_empty());
    }
}
