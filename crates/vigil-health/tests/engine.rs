//! Health engine behaviour over the in-process bus

use futures::FutureExt;
use std::sync::Arc;
use std::time::Duration;
use vigil_core::{Bus, Bytes, Error, MemoryBus};
use vigil_health::prelude::*;
use vigil_health::FnProbe;

fn engine_config(interval_ms: u64, timeout_ms: u64) -> HealthEngineConfig {
    HealthEngineConfig {
        interval: Duration::from_millis(interval_ms),
        timeout: Duration::from_millis(timeout_ms),
        service_name: "api".to_string(),
        ..Default::default()
    }
}

fn bus_probe(bus: &MemoryBus) -> Arc<dyn Probe> {
    Arc::new(BusProbe::new(Arc::new(bus.clone())))
}

fn identity() -> VersionInfo {
    VersionInfo::with_version("test", "abc1234")
}

#[tokio::test(start_paused = true)]
async fn publishes_once_per_interval() {
    let bus = MemoryBus::new();
    let mut status = bus.subscribe("health.status.api", 16).await.unwrap();

    let engine = HealthEngine::new(
        Arc::new(bus.clone()),
        identity(),
        engine_config(100, 50),
        vec![bus_probe(&bus)],
    )
    .unwrap();
    engine.start().await.unwrap();

    tokio::time::sleep(Duration::from_millis(99)).await;
    assert!(status.is_empty(), "first publish happens one interval after start");

    tokio::time::sleep(Duration::from_millis(251)).await;
    engine.stop();
    assert!(engine.wait_stopped(Duration::from_secs(1)).await);

    let mut published = Vec::new();
    while !status.is_empty() {
        let message = status.next().await.unwrap();
        published.push(HealthSnapshot::from_json(&message.payload).unwrap());
    }

    assert_eq!(published.len(), 3);
    for snapshot in &published {
        assert_eq!(snapshot.status, HealthStatus::Healthy);
        assert_eq!(snapshot.service_name, "api");
        assert_eq!(snapshot.checks["nats"], "healthy");
    }
}

#[tokio::test]
async fn answers_health_requests() {
    let bus = MemoryBus::new();
    let failing: Arc<dyn Probe> = Arc::new(FnProbe::new("database", || {
        async { Err(ProbeError::failed("ping timeout")) }.boxed()
    }));

    let engine = HealthEngine::new(
        Arc::new(bus.clone()),
        identity(),
        engine_config(30_000, 1_000),
        vec![bus_probe(&bus), failing],
    )
    .unwrap();
    engine.start().await.unwrap();

    let reply = bus
        .request("health.api", Bytes::new(), Duration::from_secs(2))
        .await
        .unwrap();
    let snapshot = HealthSnapshot::from_json(&reply.payload).unwrap();

    assert_eq!(snapshot.status, HealthStatus::Unhealthy);
    assert_eq!(snapshot.checks["nats"], "healthy");
    assert_eq!(snapshot.checks["database"], "unhealthy: ping timeout");
    assert_eq!(snapshot.version, "abc1234");
    assert_eq!(snapshot.environment, "test");

    engine.stop();
}

#[tokio::test]
async fn stop_unregisters_responder_immediately() {
    let bus = MemoryBus::new();
    let engine = HealthEngine::new(
        Arc::new(bus.clone()),
        identity(),
        engine_config(30_000, 1_000),
        Vec::new(),
    )
    .unwrap();

    engine.start().await.unwrap();
    assert!(bus.has_interest("health.api"));

    engine.stop();
    assert!(!bus.has_interest("health.api"));

    let err = bus
        .request("health.api", Bytes::new(), Duration::from_millis(100))
        .await
        .unwrap_err();
    assert!(matches!(err, Error::Bus(_)));
    assert!(engine.wait_stopped(Duration::from_secs(1)).await);
}

#[tokio::test(start_paused = true)]
async fn no_publish_after_stop_during_snapshot() {
    let bus = MemoryBus::new();
    let mut status = bus.subscribe("health.status.api", 16).await.unwrap();

    let slow: Arc<dyn Probe> = Arc::new(FnProbe::new("slow", || {
        async {
            tokio::time::sleep(Duration::from_millis(200)).await;
            Ok(())
        }
        .boxed()
    }));

    let engine = HealthEngine::new(
        Arc::new(bus.clone()),
        identity(),
        engine_config(100, 500),
        vec![slow],
    )
    .unwrap();
    engine.start().await.unwrap();

    // The first snapshot starts at 100ms and is still running at 150ms.
    tokio::time::sleep(Duration::from_millis(150)).await;
    engine.stop();

    tokio::time::sleep(Duration::from_secs(1)).await;
    assert!(engine.wait_stopped(Duration::from_secs(1)).await);
    assert!(status.is_empty());
}

#[tokio::test(start_paused = true)]
async fn failed_publish_skips_a_tick_and_keeps_publishing() {
    let bus = MemoryBus::new();
    let mut status = bus.subscribe("health.status.api", 16).await.unwrap();

    let engine = HealthEngine::new(
        Arc::new(bus.clone()),
        identity(),
        engine_config(100, 50),
        vec![bus_probe(&bus)],
    )
    .unwrap();
    engine.start().await.unwrap();

    // The tick at 100ms fails to publish.
    tokio::time::sleep(Duration::from_millis(50)).await;
    bus.set_connected(false);
    tokio::time::sleep(Duration::from_millis(100)).await;
    assert!(status.is_empty());
    assert!(engine.is_running());

    // The tick at 200ms goes out normally.
    bus.set_connected(true);
    tokio::time::sleep(Duration::from_millis(100)).await;
    assert!(engine.is_running());

    let message = status.next().await.unwrap();
    let snapshot = HealthSnapshot::from_json(&message.payload).unwrap();
    assert_eq!(snapshot.status, HealthStatus::Healthy);
    assert_eq!(snapshot.checks["nats"], "healthy");
    assert!(status.is_empty());

    engine.stop();
    assert!(engine.wait_stopped(Duration::from_secs(1)).await);
}
