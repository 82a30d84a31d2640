use axum::http::{Method, StatusCode};

mod common;
use common::TestApp;

#[tokio::test]
async fn test_health_check_reports_service_and_database() {
    let app = TestApp::new();

    let res = app.request(Method::GET, "/health", None, &[]).await;

    assert_eq!(res.status, StatusCode::OK);
    assert_eq!(res.body["status"], "healthy");
    assert_eq!(res.body["service"], "user-service-test");
    assert_eq!(res.body["checks"]["database"], "up");
}

#[tokio::test]
async fn test_responses_carry_request_id_and_security_headers() {
    let app = TestApp::new();

    let res = app
        .request(
            Method::GET,
            "/health",
            None,
            &[("x-request-id", "test-request-42")],
        )
        .await;

    assert_eq!(
        res.headers.get("x-request-id").unwrap(),
        "test-request-42"
    );
    assert_eq!(res.headers.get("x-content-type-options").unwrap(), "nosniff");
}

#[tokio::test]
async fn test_swagger_is_not_mounted_when_disabled() {
    let app = TestApp::new();

    let res = app
        .request(Method::GET, "/api-docs/openapi.json", None, &[])
        .await;

    assert_eq!(res.status, StatusCode::NOT_FOUND);
}
