//! Service loop serving resource requests from the bus

use crate::resource::{ResourceRequest, ResourceRouter};
use async_trait::async_trait;
use parking_lot::Mutex;
use std::fmt;
use std::sync::Arc;
use tokio::sync::{mpsc, Semaphore};
use tokio_util::sync::CancellationToken;
use tokio_util::task::TaskTracker;
use tracing::{debug, info, warn};
use vigil_config::ServiceConfig;
use vigil_core::{Bus, Error, Message, Result, SubscriptionGuard};

/// A long-running subsystem driven by the coordinator
#[async_trait]
pub trait Service: Send + Sync + fmt::Debug {
    /// Name used when reporting failures
    fn name(&self) -> &str;

    /// Serve until shut down. Returns an error if the service cannot start
    /// or loses its subscription.
    async fn serve(&self, bus: Arc<dyn Bus>) -> Result<()>;

    /// Stop accepting work and wait for in-flight work to finish
    async fn shutdown(&self) -> Result<()>;
}

/// Resource service settings
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ResourceServiceConfig {
    /// Service name; requests arrive on `get.<name>.>`
    pub name: String,
    /// Inbound queue capacity
    pub in_channel_size: usize,
    /// Maximum concurrent requests
    pub worker_count: usize,
}

impl Default for ResourceServiceConfig {
    fn default() -> Self {
        ServiceConfig::default().into()
    }
}

impl From<ServiceConfig> for ResourceServiceConfig {
    fn from(config: ServiceConfig) -> Self {
        Self {
            name: config.name,
            in_channel_size: config.in_channel_size,
            worker_count: config.worker_count,
        }
    }
}

impl ResourceServiceConfig {
    /// Subject carrying `get` requests for this service
    pub fn request_subject(&self) -> String {
        format!("get.{}.>", self.name)
    }
}

#[derive(Debug, Default)]
struct ServiceState {
    started: bool,
    subscription: Option<SubscriptionGuard>,
}

/// Answers RES `get` requests with a bounded worker pool
pub struct ResourceService {
    config: ResourceServiceConfig,
    router: Arc<ResourceRouter>,
    stop: CancellationToken,
    drained: CancellationToken,
    workers: TaskTracker,
    state: Mutex<ServiceState>,
}

impl ResourceService {
    /// Create a service routing requests through `router`
    pub fn new(config: ResourceServiceConfig, router: ResourceRouter) -> Result<Self> {
        if config.in_channel_size == 0 || config.worker_count == 0 {
            return Err(Error::Config(
                "in_channel_size and worker_count must be greater than zero".into(),
            ));
        }

        Ok(Self {
            config,
            router: Arc::new(router),
            stop: CancellationToken::new(),
            drained: CancellationToken::new(),
            workers: TaskTracker::new(),
            state: Mutex::new(ServiceState::default()),
        })
    }

    /// Service settings
    pub fn config(&self) -> &ResourceServiceConfig {
        &self.config
    }

    /// Requests currently being handled
    pub fn in_flight(&self) -> usize {
        self.workers.len()
    }

    async fn run_loop(
        &self,
        bus: &Arc<dyn Bus>,
        receiver: &mut mpsc::Receiver<Message>,
        slots: &Arc<Semaphore>,
    ) -> Result<()> {
        loop {
            let message = tokio::select! {
                biased;
                _ = self.stop.cancelled() => break,
                message = receiver.recv() => match message {
                    Some(message) => message,
                    None => {
                        return Err(Error::Bus(format!(
                            "subscription to '{}' closed unexpectedly",
                            self.config.request_subject()
                        )))
                    }
                },
            };
            self.dispatch(bus, slots, message).await;
        }

        // Requests already queued were accepted before shutdown; answer them.
        while let Ok(message) = receiver.try_recv() {
            self.dispatch(bus, slots, message).await;
        }
        Ok(())
    }

    async fn dispatch(&self, bus: &Arc<dyn Bus>, slots: &Arc<Semaphore>, message: Message) {
        let Ok(permit) = Arc::clone(slots).acquire_owned().await else {
            return;
        };

        let bus = Arc::clone(bus);
        let router = Arc::clone(&self.router);
        let prefix_len = "get.".len();

        self.workers.spawn(async move {
            let _permit = permit;
            let Some(reply) = message.reply.as_deref() else {
                debug!(subject = %message.subject, "Ignoring request without reply subject");
                return;
            };

            let request = ResourceRequest {
                resource: message.subject.get(prefix_len..).unwrap_or_default().to_string(),
                payload: message.payload.clone(),
            };
            let response = router.dispatch(&request).await;

            if let Err(e) = bus.publish(reply, response).await {
                warn!(resource = %request.resource, error = %e, "Failed to send resource reply");
            }
        });
    }
}

#[async_trait]
impl Service for ResourceService {
    fn name(&self) -> &str {
        &self.config.name
    }

    async fn serve(&self, bus: Arc<dyn Bus>) -> Result<()> {
        {
            let mut state = self.state.lock();
            if state.started {
                return Err(Error::AlreadyStarted(format!("service '{}'", self.config.name)));
            }
            state.started = true;
        }

        let subject = self.config.request_subject();
        let subscription = match bus.subscribe(&subject, self.config.in_channel_size).await {
            Ok(subscription) => subscription,
            Err(e) => {
                self.drained.cancel();
                return Err(e);
            }
        };
        let (mut receiver, guard) = subscription.split();
        {
            let mut state = self.state.lock();
            if self.stop.is_cancelled() {
                drop(guard);
            } else {
                state.subscription = Some(guard);
            }
        }

        info!(
            service = %self.config.name,
            subject = %subject,
            workers = self.config.worker_count,
            queue = self.config.in_channel_size,
            "Service listening"
        );

        let slots = Arc::new(Semaphore::new(self.config.worker_count));
        let result = self.run_loop(&bus, &mut receiver, &slots).await;

        self.workers.close();
        self.workers.wait().await;
        if let Err(e) = bus.flush().await {
            warn!(error = %e, "Failed to flush bus after drain");
        }

        self.drained.cancel();
        info!(service = %self.config.name, "Service drained");
        result
    }

    async fn shutdown(&self) -> Result<()> {
        self.stop.cancel();
        let (started, guard) = {
            let mut state = self.state.lock();
            (state.started, state.subscription.take())
        };
        drop(guard);

        if started {
            debug!(service = %self.config.name, "Waiting for in-flight requests");
            self.drained.cancelled().await;
        }
        Ok(())
    }
}

impl fmt::Debug for ResourceService {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ResourceService")
            .field("config", &self.config)
            .field("routes", &self.router.len())
            .field("in_flight", &self.in_flight())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::resource::{GreetingHandler, ResourceError, ResourceHandler};
    use serde_json::Value;
    use std::time::Duration;
    use vigil_core::{Bytes, MemoryBus};

    #[derive(Debug)]
    struct Slow(Duration);

    #[async_trait]
    impl ResourceHandler for Slow {
        async fn get(&self, _request: &ResourceRequest) -> std::result::Result<Value, ResourceError> {
            tokio::time::sleep(self.0).await;
            Ok(serde_json::json!({ "done": true }))
        }
    }

    fn service(router: ResourceRouter) -> Arc<ResourceService> {
        let config = ResourceServiceConfig {
            name: "api".to_string(),
            in_channel_size: 16,
            worker_count: 4,
        };
        Arc::new(ResourceService::new(config, router).unwrap())
    }

    #[test]
    fn test_config_from_service_config() {
        let config = ResourceServiceConfig::default();
        assert_eq!(config.name, "api");
        assert_eq!(config.in_channel_size, 1024);
        assert_eq!(config.worker_count, 32);
        assert_eq!(config.request_subject(), "get.api.>");
    }

    #[test]
    fn test_rejects_zero_workers() {
        let config = ResourceServiceConfig {
            worker_count: 0,
            ..Default::default()
        };
        assert!(matches!(
            ResourceService::new(config, ResourceRouter::new()),
            Err(Error::Config(_))
        ));
    }

    #[tokio::test]
    async fn test_serves_and_drains() {
        let bus = MemoryBus::new();
        let svc = service(ResourceRouter::new().route("api.>", Arc::new(GreetingHandler)));

        let serving = tokio::spawn({
            let svc = Arc::clone(&svc);
            let bus: Arc<dyn Bus> = Arc::new(bus.clone());
            async move { svc.serve(bus).await }
        });

        while !bus.has_interest("get.api.greeting") {
            tokio::task::yield_now().await;
        }

        let reply = bus
            .request("get.api.greeting", Bytes::new(), Duration::from_secs(1))
            .await
            .unwrap();
        let body: Value = serde_json::from_slice(&reply.payload).unwrap();
        assert_eq!(body["result"]["model"]["message"], "Hello from API");

        svc.shutdown().await.unwrap();
        assert!(!bus.has_interest("get.api.greeting"));
        assert!(serving.await.unwrap().is_ok());
    }

    #[tokio::test]
    async fn test_shutdown_waits_for_in_flight() {
        let bus = MemoryBus::new();
        let svc = service(ResourceRouter::new().route("api.>", Arc::new(Slow(Duration::from_millis(50)))));

        let serving = tokio::spawn({
            let svc = Arc::clone(&svc);
            let bus: Arc<dyn Bus> = Arc::new(bus.clone());
            async move { svc.serve(bus).await }
        });
        while !bus.has_interest("get.api.slow") {
            tokio::task::yield_now().await;
        }

        let pending = tokio::spawn({
            let bus = bus.clone();
            async move {
                bus.request("get.api.slow", Bytes::new(), Duration::from_secs(2))
                    .await
            }
        });
        while svc.in_flight() == 0 {
            tokio::task::yield_now().await;
        }

        svc.shutdown().await.unwrap();
        assert_eq!(svc.in_flight(), 0);

        let reply = pending.await.unwrap().unwrap();
        let body: Value = serde_json::from_slice(&reply.payload).unwrap();
        assert_eq!(body["result"]["model"]["done"], true);
        assert!(serving.await.unwrap().is_ok());
    }

    #[tokio::test]
    async fn test_serve_fails_when_disconnected() {
        let bus = MemoryBus::new();
        bus.set_connected(false);
        let svc = service(ResourceRouter::new());

        let err = svc.serve(Arc::new(bus)).await.unwrap_err();
        assert!(matches!(err, Error::Subscribe { .. }));
        svc.shutdown().await.unwrap();
    }

    #[tokio::test]
    async fn test_shutdown_before_serve() {
        let svc = service(ResourceRouter::new());
        svc.shutdown().await.unwrap();
    }
}
