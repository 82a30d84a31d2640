//! Test helpers for user-service integration tests.
//!
//! Builds the full router over the in-memory data source and drives it with
//! `tower::ServiceExt::oneshot`.

#![allow(dead_code)]

use axum::{
    body::Body,
    http::{header, HeaderMap, Method, Request, StatusCode},
    Router,
};
use serde_json::{json, Value};
use service_core::config::Config as CoreConfig;
use std::sync::Arc;
use tower::util::ServiceExt;
use user_service::{
    build_router,
    config::{
        DatabaseConfig, Environment, JwtConfig, SecurityConfig, SwaggerConfig, UserServiceConfig,
    },
    services::{MemoryDataSource, PasswordPolicy},
    AppState,
};

pub const TEST_PASSWORD: &str = "correct1";

pub fn test_config() -> UserServiceConfig {
    UserServiceConfig {
        common: CoreConfig::default(),
        environment: Environment::Dev,
        service_name: "user-service-test".to_string(),
        service_version: "test".to_string(),
        log_level: "debug".to_string(),
        otlp_endpoint: None,
        database: DatabaseConfig {
            url: "postgres://unused".to_string(),
            max_connections: 1,
            min_connections: 1,
        },
        jwt: JwtConfig {
            secret: "integration-test-secret-with-plenty-of-bytes".to_string(),
            issuer: "user-manager-api".to_string(),
            audience: "user-manager-client".to_string(),
            access_token_minutes: 30,
            remember_me_access_token_minutes: 60,
            refresh_token_days: 7,
            remember_me_refresh_token_days: 30,
        },
        security: SecurityConfig {
            allowed_origins: vec!["http://localhost:4200".to_string()],
            cookie_secure: false,
        },
        swagger: SwaggerConfig { enabled: false },
        password_policy: PasswordPolicy::default(),
    }
}

pub struct TestApp {
    pub router: Router,
    pub state: AppState,
    pub data: MemoryDataSource,
}

pub struct TestResponse {
    pub status: StatusCode,
    pub headers: HeaderMap,
    pub body: Value,
}

impl TestResponse {
    /// Value of a `Set-Cookie` header by cookie name.
    pub fn cookie(&self, name: &str) -> Option<String> {
        let prefix = format!("{}=", name);
        self.headers
            .get_all(header::SET_COOKIE)
            .iter()
            .filter_map(|v| v.to_str().ok())
            .find(|v| v.starts_with(&prefix))
            .map(|v| {
                v[prefix.len()..]
                    .split(';')
                    .next()
                    .unwrap_or_default()
                    .to_string()
            })
    }

    /// Full `Set-Cookie` header for a cookie name, attributes included.
    pub fn raw_cookie(&self, name: &str) -> Option<String> {
        let prefix = format!("{}=", name);
        self.headers
            .get_all(header::SET_COOKIE)
            .iter()
            .filter_map(|v| v.to_str().ok())
            .find(|v| v.starts_with(&prefix))
            .map(str::to_string)
    }
}

impl TestApp {
    pub fn new() -> Self {
        let _ = tracing_subscriber::fmt()
            .with_env_filter("debug")
            .with_test_writer()
            .try_init();

        let data = MemoryDataSource::new(PasswordPolicy::default());
        let state =
            AppState::new(test_config(), Arc::new(data.clone())).expect("Failed to build state");
        let router = build_router(state.clone());

        Self {
            router,
            state,
            data,
        }
    }

    pub async fn request(
        &self,
        method: Method,
        uri: &str,
        body: Option<Value>,
        headers: &[(&str, &str)],
    ) -> TestResponse {
        send(&self.router, method, uri, body, headers).await
    }

    pub async fn register(&self, email: &str, password: &str) -> TestResponse {
        self.request(
            Method::POST,
            "/api/auth/register",
            Some(json!({
                "user": {
                    "firstName": "Ada",
                    "lastName": "Lovelace",
                    "email": email,
                    "phoneNumber": "",
                    "zipCode": ""
                },
                "password": password
            })),
            &[],
        )
        .await
    }

    pub async fn login(&self, email: &str, password: &str, remember_me: bool) -> TestResponse {
        self.request(
            Method::POST,
            "/api/auth/login",
            Some(json!({ "email": email, "password": password, "rememberMe": remember_me })),
            &[],
        )
        .await
    }

    pub async fn refresh(&self, refresh_token: &str) -> TestResponse {
        self.request(
            Method::POST,
            "/api/auth/refresh",
            Some(json!({ "refreshToken": refresh_token })),
            &[],
        )
        .await
    }

    /// Register and log in; returns the access token.
    pub async fn signed_in(&self, email: &str) -> String {
        let res = self.register(email, TEST_PASSWORD).await;
        assert_eq!(res.status, StatusCode::OK, "register failed: {}", res.body);

        let res = self.login(email, TEST_PASSWORD, false).await;
        assert_eq!(res.status, StatusCode::OK, "login failed: {}", res.body);

        res.body["accessToken"]
            .as_str()
            .expect("accessToken missing")
            .to_string()
    }

    pub async fn authed(
        &self,
        method: Method,
        uri: &str,
        body: Option<Value>,
        access_token: &str,
    ) -> TestResponse {
        let bearer = format!("Bearer {}", access_token);
        self.request(method, uri, body, &[("authorization", bearer.as_str())])
            .await
    }
}

pub async fn send(
    router: &Router,
    method: Method,
    uri: &str,
    body: Option<Value>,
    headers: &[(&str, &str)],
) -> TestResponse {
    let mut builder = Request::builder().method(method).uri(uri);
    for (name, value) in headers {
        builder = builder.header(*name, *value);
    }

    let request = match body {
        Some(body) => builder
            .header(header::CONTENT_TYPE, "application/json")
            .body(Body::from(body.to_string())),
        None => builder.body(Body::empty()),
    }
    .unwrap();

    let response = router.clone().oneshot(request).await.unwrap();
    let status = response.status();
    let headers = response.headers().clone();

    let bytes = axum::body::to_bytes(response.into_body(), usize::MAX)
        .await
        .unwrap();
    let body = if bytes.is_empty() {
        Value::Null
    } else {
        serde_json::from_slice(&bytes)
            .unwrap_or_else(|_| Value::String(String::from_utf8_lossy(&bytes).to_string()))
    };

    TestResponse {
        status,
        headers,
        body,
    }
}
