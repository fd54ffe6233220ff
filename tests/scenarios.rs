//! Full-stack scenarios from SPEC_FULL.md §8 that need a bound listener and
//! a real HTTP round trip rather than calling the core modules directly.

use serde_json::json;
use std::net::SocketAddr;
use std::time::{Duration, Instant};
use stublash::config;
use stublash::state::AppState;
use stublash::Settings;

/// Bind the combined mock + admin router to an ephemeral port and return its
/// base URL. The listener task runs for as long as the test process lives;
/// each test gets its own isolated `AppState`.
async fn spawn_app(settings: Settings) -> String {
    let state = AppState::new(settings);
    let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr: SocketAddr = listener.local_addr().unwrap();
    let app = config::app(state).into_make_service_with_connect_info::<SocketAddr>();
    tokio::spawn(async move {
        axum::serve(listener, app).await.unwrap();
    });
    format!("http://{addr}")
}

async fn add_mapping(base: &str, mapping: serde_json::Value) {
    let client = reqwest::Client::new();
    let resp = client
        .post(format!("{base}/__admin/mappings"))
        .json(&mapping)
        .send()
        .await
        .unwrap();
    assert_eq!(resp.status(), 201);
}

#[tokio::test]
async fn reset_log_clears_history() {
    let base = spawn_app(Settings::default()).await;
    let client = reqwest::Client::new();

    client.get(format!("{base}/foo")).send().await.unwrap();

    let resp = client.delete(format!("{base}/__admin/requests")).send().await.unwrap();
    assert_eq!(resp.status(), 200);

    let entries: Vec<serde_json::Value> = client
        .get(format!("{base}/__admin/requests"))
        .send()
        .await
        .unwrap()
        .json()
        .await
        .unwrap();
    assert_eq!(entries.len(), 0);
}

#[tokio::test]
async fn redirect_chain_resolves_to_the_final_body() {
    let base = spawn_app(Settings::default()).await;

    add_mapping(
        &base,
        json!({
            "request": { "method": "GET", "urlPath": "/foo" },
            "response": {
                "status": 307,
                "headers": { "Location": "/bar" }
            }
        }),
    )
    .await;
    add_mapping(
        &base,
        json!({
            "request": { "method": "GET", "urlPath": "/bar" },
            "response": { "status": 200, "body": "REDIRECT SUCCESSFUL" }
        }),
    )
    .await;

    let client = reqwest::Client::new();
    let resp = client.get(format!("{base}/foo")).send().await.unwrap();
    let body = resp.text().await.unwrap();
    assert_eq!(body, "REDIRECT SUCCESSFUL");
}

#[tokio::test]
async fn global_delay_is_applied_to_every_response() {
    let mut settings = Settings::default();
    settings.global_delay_ms = 200;
    let base = spawn_app(settings).await;

    let client = reqwest::Client::new();
    let start = Instant::now();
    client.get(format!("{base}/anything")).send().await.unwrap();
    let elapsed = start.elapsed();

    assert!(elapsed >= Duration::from_millis(200), "elapsed was {elapsed:?}");
    assert!(elapsed < Duration::from_millis(200) + Duration::from_millis(500));
}

#[tokio::test]
async fn body_presence_gates_status_and_respects_the_trace_body_strip_rule() {
    let base = spawn_app(Settings::default()).await;

    add_mapping(
        &base,
        json!({
            "priority": 0,
            "request": { "body": { "type": "presence", "expectPresent": true } },
            "response": { "status": 400 }
        }),
    )
    .await;
    add_mapping(
        &base,
        json!({
            "priority": 1,
            "request": {},
            "response": { "status": 200 }
        }),
    )
    .await;

    let client = reqwest::Client::new();

    let trace_resp = client
        .request(reqwest::Method::from_bytes(b"TRACE").unwrap(), format!("{base}/"))
        .body("hello")
        .send()
        .await
        .unwrap();
    assert_eq!(trace_resp.status(), 200);

    let post_resp = client.post(format!("{base}/")).body("hello").send().await.unwrap();
    assert_eq!(post_resp.status(), 400);
}

#[tokio::test]
async fn json_charset_variants_are_all_accepted_by_the_admin_surface() {
    let base = spawn_app(Settings::default()).await;
    let mapping = json!({
        "request": { "method": "GET", "urlPath": "/charset" },
        "response": { "status": 200, "body": "ok" }
    });

    let client = reqwest::Client::new();
    let resp = client
        .post(format!("{base}/__admin/mappings"))
        .header("content-type", "application/json; charset=ascii")
        .body(mapping.to_string())
        .send()
        .await
        .unwrap();

    assert_eq!(resp.status(), 201);
    let body: serde_json::Value = resp.json().await.unwrap();
    assert_eq!(body["message"], "Mapping added");
}

#[tokio::test]
async fn gzip_compressed_body_matches_the_decompressed_content() {
    use std::io::Write;

    let base = spawn_app(Settings::default()).await;
    add_mapping(
        &base,
        json!({
            "request": {
                "method": "POST",
                "urlPath": "/echo",
                "body": { "type": "equals", "value": "hello wiremock" }
            },
            "response": { "status": 200, "body": "OK" }
        }),
    )
    .await;

    let mut encoder = flate2::write::GzEncoder::new(Vec::new(), flate2::Compression::default());
    encoder.write_all(b"hello wiremock").unwrap();
    let compressed = encoder.finish().unwrap();

    let client = reqwest::Client::new();
    let resp = client
        .post(format!("{base}/echo"))
        .header("content-encoding", "gzip")
        .body(compressed)
        .send()
        .await
        .unwrap();

    assert_eq!(resp.status(), 200);
    assert_eq!(resp.text().await.unwrap(), "OK");
}
