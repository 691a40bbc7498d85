//! NATS-backed bus

use crate::bus::{Bus, Message, Subscription, SubscriptionGuard};
use crate::{Error, Result};
use async_nats::connection::State;
use async_nats::{Client, ConnectOptions, Event};
use async_trait::async_trait;
use bytes::Bytes;
use futures::StreamExt;
use std::time::Duration;
use tokio::sync::mpsc;
use tracing::{debug, error, info, warn};

/// NATS connection options
#[derive(Debug, Clone)]
pub struct NatsOptions {
    /// Server URL
    pub url: String,
    /// Connection name reported to the server
    pub name: String,
    /// Maximum reconnect attempts
    pub max_reconnects: usize,
    /// Delay between reconnect attempts
    pub reconnect_wait: Duration,
}

impl Default for NatsOptions {
    fn default() -> Self {
        Self {
            url: "nats://localhost:4222".to_string(),
            name: "vigil".to_string(),
            max_reconnects: 5,
            reconnect_wait: Duration::from_secs(1),
        }
    }
}

/// Bus backed by an `async_nats` client
#[derive(Debug, Clone)]
pub struct NatsBus {
    client: Client,
}

impl NatsBus {
    /// Connect to a NATS server, retrying the initial connection
    pub async fn connect(options: &NatsOptions) -> Result<Self> {
        let reconnect_wait = options.reconnect_wait;

        let client = ConnectOptions::new()
            .name(&options.name)
            .retry_on_initial_connect()
            .max_reconnects(options.max_reconnects)
            .reconnect_delay_callback(move |_attempts| reconnect_wait)
            .event_callback(|event| async move {
                match event {
                    Event::Disconnected => warn!("NATS disconnected"),
                    Event::Connected => info!("NATS reconnected"),
                    other => debug!(event = %other, "NATS event"),
                }
            })
            .connect(options.url.as_str())
            .await
            .map_err(|e| Error::Bus(format!("could not connect to NATS at {}: {}", options.url, e)))?;

        info!(url = %options.url, name = %options.name, "Connected to NATS");
        Ok(Self { client })
    }
}

#[async_trait]
impl Bus for NatsBus {
    async fn publish(&self, subject: &str, payload: Bytes) -> Result<()> {
        self.client
            .publish(subject.to_string(), payload)
            .await
            .map_err(|e| Error::publish(subject, e))
    }

    async fn subscribe(&self, subject: &str, capacity: usize) -> Result<Subscription> {
        let mut subscriber = self
            .client
            .subscribe(subject.to_string())
            .await
            .map_err(|e| Error::subscribe(subject, e))?;

        let (sender, receiver) = mpsc::channel(capacity.max(1));
        let pattern = subject.to_string();
        let forwarder = tokio::spawn(async move {
            while let Some(msg) = subscriber.next().await {
                let message = Message {
                    subject: msg.subject.to_string(),
                    reply: msg.reply.map(|r| r.to_string()),
                    payload: msg.payload,
                };
                if sender.send(message).await.is_err() {
                    break;
                }
            }
            debug!(subject = %pattern, "NATS subscription closed");
        });

        // Aborting the forwarder drops the subscriber, which unsubscribes.
        let guard = SubscriptionGuard::new(subject, move || forwarder.abort());
        Ok(Subscription::new(receiver, guard))
    }

    async fn request(&self, subject: &str, payload: Bytes, timeout: Duration) -> Result<Message> {
        let response = tokio::time::timeout(
            timeout,
            self.client.request(subject.to_string(), payload),
        )
        .await
        .map_err(|_| Error::RequestTimeout(subject.to_string()))?
        .map_err(|e| Error::Bus(format!("request to '{}' failed: {}", subject, e)))?;

        Ok(Message {
            subject: response.subject.to_string(),
            reply: response.reply.map(|r| r.to_string()),
            payload: response.payload,
        })
    }

    fn is_connected(&self) -> bool {
        matches!(self.client.connection_state(), State::Connected)
    }

    async fn flush(&self) -> Result<()> {
        self.client.flush().await.map_err(|e| {
            error!(error = %e, "Failed to flush NATS connection");
            Error::Bus(format!("flush failed: {}", e))
        })
    }
}
