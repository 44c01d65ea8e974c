//! Shared test helpers for API integration tests.
#![allow(dead_code)]

use std::sync::Arc;
use std::time::Duration;

use axum::Router;
use axum::body::Body;
use axum::http::{Request, StatusCode};
use chronicle_core::clock::Clock;
use chronicle_test_support::FixedClock;
use http_body_util::BodyExt;
use sqlx::PgPool;
use tokio_util::sync::CancellationToken;
use tower::ServiceExt;

use chronicle_api::config::AppConfig;
use chronicle_api::state::AppState;

/// Fixed timestamp used across all integration tests.
fn fixed_clock() -> Arc<dyn Clock> {
    Arc::new(FixedClock(
        chrono::TimeZone::with_ymd_and_hms(&chrono::Utc, 2026, 1, 15, 10, 0, 0).unwrap(),
    ))
}

/// Build the full app over fresh in-memory stores, with the read-model
/// feeder running. Clones of the returned router share the same stores.
pub fn build_test_app() -> Router {
    let state = AppState::in_memory(&AppConfig::default(), fixed_clock(), CancellationToken::new())
        .unwrap();
    let _feeder = state.spawn_read_model_feeder();
    chronicle_api::app(state)
}

/// Build the full app over the `PostgreSQL` stores.
pub fn build_pg_test_app(pool: PgPool) -> Router {
    let state = AppState::postgres(pool, &AppConfig::default(), fixed_clock(), CancellationToken::new())
        .unwrap();
    chronicle_api::app(state)
}

/// Send a request and return the status and JSON body.
pub async fn send(app: &Router, request: Request<Body>) -> (StatusCode, serde_json::Value) {
    let response = app.clone().oneshot(request).await.unwrap();
    let status = response.status();
    let body_bytes = response.into_body().collect().await.unwrap().to_bytes();
    let json = if body_bytes.is_empty() {
        serde_json::Value::Null
    } else {
        serde_json::from_slice(&body_bytes).unwrap()
    };

    (status, json)
}

/// Send a request with a JSON body and return the response.
pub async fn send_json(
    app: &Router,
    method: &str,
    uri: &str,
    body: &serde_json::Value,
) -> (StatusCode, serde_json::Value) {
    let request = Request::builder()
        .method(method)
        .uri(uri)
        .header("content-type", "application/json")
        .body(Body::from(serde_json::to_vec(body).unwrap()))
        .unwrap();

    send(app, request).await
}

/// Send a body-less request and return the response.
pub async fn send_empty(app: &Router, method: &str, uri: &str) -> (StatusCode, serde_json::Value) {
    let request = Request::builder()
        .method(method)
        .uri(uri)
        .body(Body::empty())
        .unwrap();

    send(app, request).await
}

/// Create a to-do and return its id.
pub async fn create_todo(app: &Router, title: &str) -> String {
    let (status, json) = send_json(
        app,
        "POST",
        "/api/v1/todos",
        &serde_json::json!({ "title": title }),
    )
    .await;
    assert_eq!(status, StatusCode::CREATED);
    json["id"].as_str().unwrap().to_owned()
}

/// Poll `uri` until `accept` holds for its JSON body, then return the body.
pub async fn get_eventually(
    app: &Router,
    uri: &str,
    accept: impl Fn(&serde_json::Value) -> bool,
) -> serde_json::Value {
    let mut last = serde_json::Value::Null;
    for _ in 0..200 {
        let (status, json) = send_empty(app, "GET", uri).await;
        if status == StatusCode::OK && accept(&json) {
            return json;
        }
        last = json;
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
    panic!("GET {uri} never settled; last body: {last}");
}
