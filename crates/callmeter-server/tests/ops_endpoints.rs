#![allow(clippy::unwrap_used)]
#![allow(clippy::expect_used)]
#![allow(clippy::panic)]

use std::net::SocketAddr;

use callmeter_core::exposition::{find_value, parse_samples};
use callmeter_core::Registry;
use callmeter_server::app_state::AppState;
use callmeter_server::config;
use callmeter_server::ops::InstanceInfo;
use callmeter_server::router::build_router;

async fn serve(state: AppState) -> SocketAddr {
    let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    let app = build_router(state);
    tokio::spawn(async move {
        axum::serve(listener, app).await.unwrap();
    });
    addr
}

fn isolated_with_http() -> AppState {
    let cfg = config::load_from_str("version: 1\nmetrics:\n  registry: isolated\n").unwrap();
    AppState::from_config(&cfg, 7).unwrap()
}

#[tokio::test]
async fn health_and_readiness() {
    let state = AppState::new(Registry::isolated(), 1);
    let addr = serve(state.clone()).await;
    let client = reqwest::Client::new();

    let r = client.get(format!("http://{addr}/healthz")).send().await.unwrap();
    assert_eq!(r.status().as_u16(), 200);
    assert_eq!(r.text().await.unwrap(), "ok");

    let r = client.get(format!("http://{addr}/readyz")).send().await.unwrap();
    assert_eq!(r.status().as_u16(), 200);

    state.set_draining();
    let r = client.get(format!("http://{addr}/readyz")).send().await.unwrap();
    assert_eq!(r.status().as_u16(), 503);
    assert_eq!(r.text().await.unwrap(), "draining");
}

#[tokio::test]
async fn metrics_endpoint_serves_the_state_registry() {
    let state = AppState::new(Registry::isolated(), 1);
    let work = state
        .instrument()
        .name("served")
        .wrap(|n: u32| if n > 0 { Ok(n) } else { Err(n) })
        .unwrap();
    work.call(1).unwrap();
    work.call(0).unwrap_err();

    let addr = serve(state.clone()).await;
    let r = reqwest::get(format!("http://{addr}/metrics")).await.unwrap();
    assert_eq!(r.status().as_u16(), 200);
    assert_eq!(
        r.headers()["content-type"].to_str().unwrap(),
        "text/plain; version=0.0.4; charset=utf-8"
    );

    let samples = parse_samples(&r.text().await.unwrap()).unwrap();
    let f = ("function", "served");
    assert_eq!(
        find_value(&samples, "function_calls_total", &[f, ("outcome", "success")]),
        Some(1.0)
    );
    assert_eq!(
        find_value(&samples, "function_calls_total", &[f, ("outcome", "failure")]),
        Some(1.0)
    );
    assert!(samples.iter().all(|s| !s.name.starts_with("http_")));
}

#[tokio::test]
async fn info_reports_registry_identity() {
    let state = AppState::new(Registry::isolated(), 42);
    let expected_id = state.registry().id();
    let addr = serve(state).await;

    let body = reqwest::get(format!("http://{addr}/info"))
        .await
        .unwrap()
        .text()
        .await
        .unwrap();
    let info: InstanceInfo = serde_json::from_str(&body).unwrap();
    assert_eq!(
        info,
        InstanceInfo {
            registry_id: expected_id,
            registry_scope: "isolated".into(),
            instance_id: 42,
        }
    );
    assert_ne!(info.registry_id, 0);
}

#[tokio::test]
async fn http_requests_are_counted_by_route() {
    let state = isolated_with_http();
    let addr = serve(state.clone()).await;
    let client = reqwest::Client::new();

    for _ in 0..3 {
        client.get(format!("http://{addr}/healthz?probe=1")).send().await.unwrap();
    }
    client.get(format!("http://{addr}/nope")).send().await.unwrap();

    let samples = parse_samples(&state.registry().render()).unwrap();
    let healthz = [
        ("method", "GET"),
        ("endpoint", "/healthz"),
        ("status_code", "200"),
    ];
    assert_eq!(find_value(&samples, "http_requests_total", &healthz), Some(3.0));
    assert_eq!(
        find_value(
            &samples,
            "http_request_duration_ms_count",
            &[("method", "GET"), ("endpoint", "/healthz")]
        ),
        Some(3.0)
    );
    assert_eq!(
        find_value(&samples, "http_requests_active", &[("endpoint", "/healthz")]),
        Some(0.0)
    );
    assert_eq!(
        find_value(
            &samples,
            "http_requests_total",
            &[("endpoint", "/nope"), ("status_code", "404")]
        ),
        Some(1.0)
    );
    assert!(samples
        .iter()
        .all(|s| s.label("endpoint").map_or(true, |e| !e.contains('?'))));
}

#[tokio::test]
async fn scrape_sees_its_own_request_in_flight() {
    let state = isolated_with_http();
    let addr = serve(state).await;

    let text = reqwest::get(format!("http://{addr}/metrics"))
        .await
        .unwrap()
        .text()
        .await
        .unwrap();
    let samples = parse_samples(&text).unwrap();
    assert_eq!(
        find_value(&samples, "http_requests_active", &[("endpoint", "/metrics")]),
        Some(1.0)
    );
}

#[test]
fn http_families_conflict_with_foreign_schema() {
    let cfg = config::load_from_str("version: 1\nmetrics:\n  registry: isolated\n").unwrap();
    let state = AppState::from_config(&cfg, 1).unwrap();
    let registry = state.registry().clone();

    let err = callmeter_server::obs::HttpMetrics::register(&registry, &[1.0, 2.0]).unwrap_err();
    assert_eq!(err.code().as_str(), "SCHEMA_CONFLICT");
}
