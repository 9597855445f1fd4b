//! End-to-end gate scenarios through the HTTP layer.

use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use axum::body::Body;
use axum::extract::ConnectInfo;
use axum::http::{Request, StatusCode};
use axum::routing::get;
use axum::Router;
use http_body_util::BodyExt;
use request_gatekeeper::infrastructure::mocks::MockClock;
use request_gatekeeper::{
    AlertKind, ClientId, Gatekeeper, GatekeeperConfig, InMemoryCounterStore, Severity,
};
use tower::ServiceExt;

fn app(gatekeeper: &Gatekeeper) -> Router {
    Router::new()
        .route("/api/balance", get(|| async { "1000" }))
        .route("/dashboard/stats", get(|| async { "stats" }))
        .merge(gatekeeper.reset_router())
        .layer(gatekeeper.layer())
}

async fn send(app: &Router, method: &str, uri: &str, ip: &str) -> (StatusCode, String) {
    let addr: SocketAddr = format!("{ip}:50000").parse().unwrap();
    let mut request = Request::builder()
        .method(method)
        .uri(uri)
        .body(Body::empty())
        .unwrap();
    request.extensions_mut().insert(ConnectInfo(addr));

    let response = app.clone().oneshot(request).await.unwrap();
    let status = response.status();
    let bytes = response.into_body().collect().await.unwrap().to_bytes();
    (status, String::from_utf8(bytes.to_vec()).unwrap())
}

fn gatekeeper(threshold: u64) -> Gatekeeper {
    let config = GatekeeperConfig::builder()
        .with_threshold(threshold)
        .with_window(Duration::from_secs(60))
        .build()
        .unwrap();
    Gatekeeper::builder(config)
        .with_counter_store(Arc::new(InMemoryCounterStore::new()))
        .build()
        .unwrap()
}

#[tokio::test]
async fn test_threshold_ban_alert_and_reset() {
    let gatekeeper = gatekeeper(3);
    let app = app(&gatekeeper);
    let records = gatekeeper.records();
    let counters = gatekeeper.counters();

    // Requests 1-3 are admitted without any alert
    for _ in 0..3 {
        let (status, body) = send(&app, "GET", "/api/balance", "9.9.9.9").await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body, "1000");
    }
    assert!(records.recent_alerts(10).await.unwrap().is_empty());

    // Request 4 crosses the threshold
    let (status, body) = send(&app, "GET", "/api/balance", "9.9.9.9").await;
    assert_eq!(status, StatusCode::TOO_MANY_REQUESTS);
    assert_eq!(body, r#"{"error":"Too Many Requests"}"#);

    let alerts = records.recent_alerts(10).await.unwrap();
    assert_eq!(alerts.len(), 1);
    assert_eq!(alerts[0].ip, "9.9.9.9");
    assert_eq!(alerts[0].kind, AlertKind::RateLimitExceeded);
    assert_eq!(alerts[0].severity, Severity::High);

    // Request 5 hits the ban
    let (status, body) = send(&app, "GET", "/api/balance", "9.9.9.9").await;
    assert_eq!(status, StatusCode::FORBIDDEN);
    assert_eq!(body, r#"{"error":"IP Blocked"}"#);
    assert_eq!(records.recent_alerts(10).await.unwrap().len(), 1);

    // The reset route stays reachable for the banned client
    let (status, body) = send(&app, "POST", "/reset-redis", "9.9.9.9").await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body, "Counters and bans cleared");

    // Request 6 starts a fresh window
    let (status, _) = send(&app, "GET", "/api/balance", "9.9.9.9").await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(
        counters
            .get(&ClientId::new("9.9.9.9").rate_key())
            .await
            .unwrap()
            .as_deref(),
        Some("1")
    );

    gatekeeper.shutdown().await.unwrap();

    // One log record per request, newest first
    let logs = records.recent_logs(100).await.unwrap();
    let statuses: Vec<u16> = logs.iter().rev().map(|l| l.status).collect();
    assert_eq!(statuses, vec![200, 200, 200, 429, 403, 200, 200]);
    assert!(logs.iter().all(|l| l.ip == "9.9.9.9"));
    assert_eq!(logs[1].endpoint, "/reset-redis");
    assert_eq!(logs[1].method, "POST");
}

fn gatekeeper_on(clock: &MockClock, threshold: u64) -> Gatekeeper {
    let config = GatekeeperConfig::builder()
        .with_threshold(threshold)
        .with_window(Duration::from_secs(60))
        .build()
        .unwrap();
    Gatekeeper::builder(config)
        .with_clock(Arc::new(clock.clone()))
        .build()
        .unwrap()
}

#[tokio::test]
async fn test_ban_survives_window_expiry() {
    let clock = MockClock::new();
    let gatekeeper = gatekeeper_on(&clock, 1);
    let app = app(&gatekeeper);

    assert_eq!(send(&app, "GET", "/api/balance", "1.2.3.4").await.0, StatusCode::OK);
    assert_eq!(
        send(&app, "GET", "/api/balance", "1.2.3.4").await.0,
        StatusCode::TOO_MANY_REQUESTS
    );

    clock.advance(Duration::from_secs(120));
    assert_eq!(
        send(&app, "GET", "/api/balance", "1.2.3.4").await.0,
        StatusCode::FORBIDDEN
    );

    gatekeeper.shutdown().await.unwrap();
}

#[tokio::test]
async fn test_window_expiry_restores_budget() {
    let clock = MockClock::new();
    let gatekeeper = gatekeeper_on(&clock, 2);
    let app = app(&gatekeeper);

    for _ in 0..2 {
        assert_eq!(send(&app, "GET", "/api/balance", "5.6.7.8").await.0, StatusCode::OK);
    }
    clock.advance(Duration::from_secs(60));

    for _ in 0..2 {
        assert_eq!(send(&app, "GET", "/api/balance", "5.6.7.8").await.0, StatusCode::OK);
    }
    assert_eq!(gatekeeper.metrics().bans_issued(), 0);

    gatekeeper.shutdown().await.unwrap();
}

#[tokio::test]
async fn test_exempt_paths_ignore_bans_and_counters() {
    let gatekeeper = gatekeeper(1);
    let app = app(&gatekeeper);
    let counters = gatekeeper.counters();
    let client = ClientId::new("6.6.6.6");

    counters.set(&client.blocked_key(), "true").await.unwrap();

    for _ in 0..5 {
        let (status, body) = send(&app, "GET", "/dashboard/stats", "6.6.6.6").await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body, "stats");
    }
    assert_eq!(counters.get(&client.rate_key()).await.unwrap(), None);
    assert_eq!(
        send(&app, "GET", "/api/balance", "6.6.6.6").await.0,
        StatusCode::FORBIDDEN
    );

    gatekeeper.shutdown().await.unwrap();
}

#[tokio::test]
async fn test_clients_do_not_share_budgets() {
    let gatekeeper = gatekeeper(1);
    let app = app(&gatekeeper);

    assert_eq!(send(&app, "GET", "/api/balance", "10.0.0.1").await.0, StatusCode::OK);
    assert_eq!(send(&app, "GET", "/api/balance", "10.0.0.2").await.0, StatusCode::OK);
    assert_eq!(
        send(&app, "GET", "/api/balance", "10.0.0.1").await.0,
        StatusCode::TOO_MANY_REQUESTS
    );
    assert_eq!(send(&app, "GET", "/api/balance", "10.0.0.3").await.0, StatusCode::OK);

    gatekeeper.shutdown().await.unwrap();
}
