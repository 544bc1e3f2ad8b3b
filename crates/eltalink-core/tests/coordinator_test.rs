#![allow(clippy::unwrap_used)]
// Integration tests for `Coordinator` using wiremock.

use std::sync::Arc;
use std::time::Duration;

use serde_json::json;
use tokio_util::sync::CancellationToken;
use url::Url;
use wiremock::matchers::{method, path};
use wiremock::{Mock, MockServer, ResponseTemplate};

use eltalink_api::{ClientConfig, RelayClient, RelayState};
use eltalink_core::{
    Coordinator, CoordinatorConfig, CoreError, ErrorCategory, HealthNotification,
};

// ── Helpers ─────────────────────────────────────────────────────────

fn test_client(server: &MockServer) -> RelayClient {
    let mut config = ClientConfig::new(
        Url::parse(&server.uri()).unwrap(),
        "test-credential".to_string().into(),
    );
    // Every coordinator refresh should hit the network in these tests.
    config.device_cache_ttl = Duration::ZERO;
    config.retry_backoff = Duration::from_millis(5);
    config.max_retries = 0;
    RelayClient::with_client(reqwest::Client::new(), config)
}

async fn setup() -> (MockServer, Coordinator) {
    let server = MockServer::start().await;
    let coordinator = Coordinator::new(test_client(&server), CoordinatorConfig::default());
    (server, coordinator)
}

async fn mount_login(server: &MockServer) {
    Mock::given(method("POST"))
        .and(path("/api/v0/login"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({ "apiKey": "key-1" })))
        .mount(server)
        .await;
}

fn devices_body(devices: serde_json::Value) -> ResponseTemplate {
    ResponseTemplate::new(200).set_body_json(json!({ "devices": devices }))
}

fn relay_device(guid: &str, name: &str) -> serde_json::Value {
    json!({ "guid": guid, "name": name, "functions": [{ "identifier": "relay" }] })
}

// ── Discovery / reconciliation ──────────────────────────────────────

#[tokio::test]
async fn fresh_discovery_initializes_unknown_and_available() {
    let (server, coordinator) = setup().await;

    mount_login(&server).await;
    Mock::given(method("GET"))
        .and(path("/api/v0/devices"))
        .respond_with(devices_body(json!([
            relay_device("d1", "Garden pump"),
            { "guid": "d2", "name": "Meter", "functions": [{ "identifier": "metering" }] },
            { "name": "No guid", "functions": [{ "identifier": "relay" }] },
        ])))
        .mount(&server)
        .await;

    let map = coordinator.refresh().await.unwrap();

    assert_eq!(map.len(), 1, "only relay-capable devices with a GUID survive");
    let d1 = &map["d1"];
    assert_eq!(d1.guid, "d1");
    assert_eq!(d1.name, "Garden pump");
    assert_eq!(d1.state, None);
    assert!(d1.available);
    assert_eq!(coordinator.consecutive_failures(), 0);
    assert_eq!(coordinator.last_error(), None);
}

#[tokio::test]
async fn unnamed_relay_gets_synthesized_name() {
    let (server, coordinator) = setup().await;

    mount_login(&server).await;
    Mock::given(method("GET"))
        .and(path("/api/v0/devices"))
        .respond_with(devices_body(json!([
            { "guid": "0123456789abcdef", "functions": [{ "identifier": "relay" }] },
        ])))
        .mount(&server)
        .await;

    let map = coordinator.refresh().await.unwrap();
    assert_eq!(map["0123456789abcdef"].name, "Relay 01234567");
}

#[tokio::test]
async fn known_device_keeps_state_across_refreshes() {
    let (server, coordinator) = setup().await;

    mount_login(&server).await;
    Mock::given(method("GET"))
        .and(path("/api/v0/devices"))
        .respond_with(devices_body(json!([relay_device("d1", "Garden pump")])))
        .mount(&server)
        .await;

    coordinator.refresh().await.unwrap();
    coordinator.set_device_state_optimistic("d1", RelayState::On);

    let map = coordinator.refresh().await.unwrap();
    assert_eq!(map["d1"].state, Some(RelayState::On));
    assert!(map["d1"].available);
}

#[tokio::test]
async fn device_absent_from_fetch_is_dropped() {
    let (server, coordinator) = setup().await;

    mount_login(&server).await;
    Mock::given(method("GET"))
        .and(path("/api/v0/devices"))
        .respond_with(devices_body(json!([
            relay_device("d1", "Pump"),
            relay_device("d2", "Light"),
        ])))
        .up_to_n_times(1)
        .mount(&server)
        .await;
    Mock::given(method("GET"))
        .and(path("/api/v0/devices"))
        .respond_with(devices_body(json!([relay_device("d1", "Pump")])))
        .mount(&server)
        .await;

    let first = coordinator.refresh().await.unwrap();
    assert_eq!(first.len(), 2);

    let second = coordinator.refresh().await.unwrap();
    assert_eq!(second.len(), 1);
    assert!(second.contains_key("d1"));
    assert!(!second.contains_key("d2"));
}

// ── Failure tracking / health notifications ─────────────────────────

#[tokio::test]
async fn failure_streak_signals_degraded_once_then_recovers_once() {
    let (server, coordinator) = setup().await;
    let mut health = coordinator.health_notifications();

    mount_login(&server).await;
    Mock::given(method("GET"))
        .and(path("/api/v0/devices"))
        .respond_with(devices_body(json!([relay_device("d1", "Pump")])))
        .up_to_n_times(1)
        .mount(&server)
        .await;
    Mock::given(method("GET"))
        .and(path("/api/v0/devices"))
        .respond_with(ResponseTemplate::new(500))
        .up_to_n_times(4)
        .mount(&server)
        .await;
    Mock::given(method("GET"))
        .and(path("/api/v0/devices"))
        .respond_with(devices_body(json!([relay_device("d1", "Pump")])))
        .mount(&server)
        .await;

    // Healthy baseline.
    coordinator.refresh().await.unwrap();

    // Three consecutive failures reach the threshold.
    for expected in 1..=3u32 {
        let err = coordinator.refresh().await.unwrap_err();
        let CoreError::UpdateFailed { category, .. } = err;
        assert_eq!(category, ErrorCategory::Api);
        assert_eq!(coordinator.consecutive_failures(), expected);
    }

    assert!(coordinator.last_error().is_some());
    assert!(!coordinator.devices()["d1"].available);
    assert!(matches!(
        health.try_recv(),
        Ok(HealthNotification::Degraded {
            category: ErrorCategory::Api,
            ..
        })
    ));
    assert!(health.try_recv().is_err(), "degraded signaled exactly once");

    // A fourth failure must not re-signal.
    coordinator.refresh().await.unwrap_err();
    assert_eq!(coordinator.consecutive_failures(), 4);
    assert!(health.try_recv().is_err());

    // Recovery resets the tracker and signals exactly once.
    let map = coordinator.refresh().await.unwrap();
    assert_eq!(coordinator.consecutive_failures(), 0);
    assert_eq!(coordinator.last_error(), None);
    assert!(map["d1"].available);
    assert!(matches!(health.try_recv(), Ok(HealthNotification::Recovered)));
    assert!(health.try_recv().is_err(), "recovery signaled exactly once");
}

#[tokio::test]
async fn rejected_credential_maps_to_authentication_category() {
    let (server, coordinator) = setup().await;

    Mock::given(method("POST"))
        .and(path("/api/v0/login"))
        .respond_with(ResponseTemplate::new(401))
        .mount(&server)
        .await;

    let err = coordinator.refresh().await.unwrap_err();
    let CoreError::UpdateFailed {
        category, message, ..
    } = err;
    assert_eq!(category, ErrorCategory::Authentication);
    assert!(message.contains("PoP credential"), "got: {message}");
}

#[tokio::test]
async fn unreachable_controller_maps_to_connection_category() {
    // `MockServer::start()` hands out a pooled server whose listener stays
    // open after drop; a dedicated server is needed so dropping it actually
    // closes the port.
    let server = MockServer::builder().start().await;
    let client = test_client(&server);
    let coordinator = Coordinator::new(client, CoordinatorConfig::default());
    drop(server);

    let err = coordinator.refresh().await.unwrap_err();
    let CoreError::UpdateFailed {
        category, message, ..
    } = err;
    assert_eq!(category, ErrorCategory::Connection);
    assert!(message.starts_with("Cannot connect"), "got: {message}");
}

// ── Optimistic updates ──────────────────────────────────────────────

#[tokio::test]
async fn optimistic_updates_apply_without_network() {
    let (server, coordinator) = setup().await;
    let mut updates = coordinator.subscribe();

    coordinator.set_device_state_optimistic("d1", RelayState::On);
    coordinator.set_device_state_optimistic("d1", RelayState::Off);

    let map = coordinator.devices();
    let d1 = &map["d1"];
    assert_eq!(d1.state, Some(RelayState::Off));
    assert!(d1.available);
    assert_eq!(d1.name, "Relay d1");

    assert!(updates.has_changed().unwrap());
    let published = updates.borrow_and_update().clone();
    assert_eq!(published["d1"].state, Some(RelayState::Off));

    assert!(
        server.received_requests().await.unwrap().is_empty(),
        "optimistic updates must not touch the network"
    );
}

#[tokio::test]
async fn mark_device_unavailable_republishes() {
    let (server, coordinator) = setup().await;

    coordinator.set_device_state_optimistic("d1", RelayState::On);
    coordinator.mark_device_unavailable("d1");

    assert!(!coordinator.devices()["d1"].available);

    // Unknown guids are a no-op.
    coordinator.mark_device_unavailable("ghost");
    assert_eq!(coordinator.devices().len(), 1);
    assert!(server.received_requests().await.unwrap().is_empty());
}

// ── Polling ─────────────────────────────────────────────────────────

#[tokio::test]
async fn polling_task_refreshes_until_cancelled() {
    let (server, coordinator) = setup().await;
    let coordinator = Arc::new(coordinator);

    mount_login(&server).await;
    Mock::given(method("GET"))
        .and(path("/api/v0/devices"))
        .respond_with(devices_body(json!([relay_device("d1", "Pump")])))
        .mount(&server)
        .await;

    let cancel = CancellationToken::new();
    let handle = coordinator.spawn_polling(Duration::from_millis(20), cancel.clone());

    tokio::time::sleep(Duration::from_millis(120)).await;
    cancel.cancel();
    handle.await.unwrap();

    assert!(coordinator.devices().contains_key("d1"));
    let device_fetches = server
        .received_requests()
        .await
        .unwrap()
        .iter()
        .filter(|r| r.url.path() == "/api/v0/devices")
        .count();
    assert!(device_fetches >= 2, "expected repeated polls, saw {device_fetches}");
}
