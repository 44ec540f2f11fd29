mod common;

use common::TestApp;
use reqwest::Method;

#[tokio::test]
async fn health_check_works() {
    let app = TestApp::spawn().await;

    let response = app
        .public(Method::GET, "/health")
        .send()
        .await
        .expect("Failed to execute request");

    assert!(response.status().is_success());
    let body: serde_json::Value = response.json().await.unwrap();
    assert_eq!(body["status"], "ok");
    assert_eq!(body["service"], "estimating-service-test");
}

#[tokio::test]
async fn readiness_reports_store_health() {
    let app = TestApp::spawn().await;

    let response = app.public(Method::GET, "/ready").send().await.unwrap();
    assert_eq!(response.status().as_u16(), 200);
}

#[tokio::test]
async fn request_id_is_echoed() {
    let app = TestApp::spawn().await;

    let response = app
        .public(Method::GET, "/health")
        .header("x-request-id", "trace-me-123")
        .send()
        .await
        .unwrap();

    assert_eq!(response.headers()["x-request-id"], "trace-me-123");
}

#[tokio::test]
async fn metrics_use_route_templates() {
    let app = TestApp::spawn().await;
    let estimate = app.sent_estimate().await;
    let token = estimate["view_token"].as_str().unwrap();

    app.public(Method::GET, &format!("/view-estimate/{}", token))
        .send()
        .await
        .unwrap();

    let body = app
        .public(Method::GET, "/metrics")
        .send()
        .await
        .unwrap()
        .text()
        .await
        .unwrap();

    assert!(body.contains("estimating_http_requests_total"));
    assert!(body.contains("/view-estimate/:token"));
    assert!(!body.contains(token));
}
