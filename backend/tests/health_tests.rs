// backend/tests/health_tests.rs
#![cfg(test)]

use axum::{
    body::Body,
    http::{Method, Request, StatusCode, header},
};
use tower::ServiceExt;

use zippelgpt_backend::config::Config;
use zippelgpt_backend::test_helpers::{TestApp, read_body_json, spawn_app, spawn_app_with_config};

async fn get(app: &TestApp, uri: &str) -> axum::response::Response {
    let request = Request::builder()
        .method(Method::GET)
        .uri(uri)
        .body(Body::empty())
        .unwrap();
    app.router.clone().oneshot(request).await.unwrap()
}

#[tokio::test]
async fn health_check_returns_healthy() {
    let app = spawn_app();

    let response = get(&app, "/chat/health").await;
    assert_eq!(response.status(), StatusCode::OK);
    let body = read_body_json(response.into_body()).await;
    assert_eq!(body["status"], "healthy");
}

#[tokio::test]
async fn health_does_not_depend_on_provider_configuration() {
    // No API key at all; the probe must still answer.
    let app = spawn_app_with_config(Config::default());

    let response = get(&app, "/chat/health").await;
    assert_eq!(response.status(), StatusCode::OK);
    let body = read_body_json(response.into_body()).await;
    assert_eq!(body["status"], "healthy");
    assert_eq!(app.mock_ai_client.list_calls(), 0);
}

#[tokio::test]
async fn root_returns_service_metadata() {
    let app = spawn_app();

    let response = get(&app, "/").await;
    assert_eq!(response.status(), StatusCode::OK);
    let body = read_body_json(response.into_body()).await;
    assert_eq!(body["message"], "ZippelGPT AI Service");
    assert_eq!(body["endpoints"]["chat"], "/chat/stream");
    assert_eq!(body["endpoints"]["health"], "/chat/health");
}

#[tokio::test]
async fn unknown_route_is_not_found() {
    let app = spawn_app();

    let response = get(&app, "/does-not-exist").await;
    assert_eq!(response.status(), StatusCode::NOT_FOUND);
}

#[tokio::test]
async fn preflight_allows_configured_origin() {
    let app = spawn_app();

    let request = Request::builder()
        .method(Method::OPTIONS)
        .uri("/chat/stream")
        .header(header::ORIGIN, "http://localhost:3000")
        .header(header::ACCESS_CONTROL_REQUEST_METHOD, "POST")
        .header(header::ACCESS_CONTROL_REQUEST_HEADERS, "content-type")
        .body(Body::empty())
        .unwrap();
    let response = app.router.clone().oneshot(request).await.unwrap();

    assert_eq!(response.status(), StatusCode::OK);
    assert_eq!(
        response
            .headers()
            .get(header::ACCESS_CONTROL_ALLOW_ORIGIN)
            .and_then(|v| v.to_str().ok()),
        Some("http://localhost:3000")
    );
    assert_eq!(
        response
            .headers()
            .get(header::ACCESS_CONTROL_ALLOW_CREDENTIALS)
            .and_then(|v| v.to_str().ok()),
        Some("true")
    );
}

#[tokio::test]
async fn preflight_refuses_unknown_origin() {
    let app = spawn_app();

    let request = Request::builder()
        .method(Method::OPTIONS)
        .uri("/chat/stream")
        .header(header::ORIGIN, "https://evil.example")
        .header(header::ACCESS_CONTROL_REQUEST_METHOD, "POST")
        .body(Body::empty())
        .unwrap();
    let response = app.router.clone().oneshot(request).await.unwrap();

    // tower-http answers the preflight but withholds the allow-origin header.
    assert!(
        response
            .headers()
            .get(header::ACCESS_CONTROL_ALLOW_ORIGIN)
            .is_none()
    );
}

#[tokio::test]
async fn simple_request_carries_cors_headers() {
    let app = spawn_app();

    let request = Request::builder()
        .method(Method::GET)
        .uri("/chat/health")
        .header(header::ORIGIN, "https://zippel-gpt.vercel.app")
        .body(Body::empty())
        .unwrap();
    let response = app.router.clone().oneshot(request).await.unwrap();

    assert_eq!(response.status(), StatusCode::OK);
    assert_eq!(
        response
            .headers()
            .get(header::ACCESS_CONTROL_ALLOW_ORIGIN)
            .and_then(|v| v.to_str().ok()),
        Some("https://zippel-gpt.vercel.app")
    );
}
