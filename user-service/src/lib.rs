pub mod config;
pub mod db;
pub mod dtos;
pub mod handlers;
pub mod middleware;
pub mod models;
pub mod services;
pub mod utils;

use axum::{
    extract::State,
    http::{header, HeaderValue, Method, Request},
    middleware::{from_fn, from_fn_with_state},
    routing::{get, post},
    Json, Router,
};
use service_core::error::AppError;
use service_core::middleware::{
    security_headers::security_headers_middleware, tracing::request_id_middleware,
};
use std::sync::Arc;
use tower_http::{cors::CorsLayer, trace::TraceLayer};
use utoipa::{openapi::security::SecurityScheme, Modify, OpenApi};
use utoipa_swagger_ui::SwaggerUi;

use crate::config::UserServiceConfig;
use crate::middleware::{auth_middleware, unit_of_work_middleware, UnitOfWorkState};
use crate::services::{AuthService, DataSource, JwtService, UnitOfWork, UserService};

#[derive(OpenApi)]
#[openapi(
    paths(
        health_check,
        handlers::auth::login,
        handlers::auth::refresh,
        handlers::auth::logout,
        handlers::auth::register,
        handlers::auth::current_user,
        handlers::user::list_users,
        handlers::user::paged_users,
        handlers::user::get_user,
        handlers::user::update_user,
        handlers::user::delete_user,
    ),
    components(
        schemas(
            dtos::ErrorResponse,
            dtos::MessageResponse,
            dtos::auth::LoginRequest,
            dtos::auth::RefreshRequest,
            dtos::auth::RegisterRequest,
            dtos::auth::AuthResponse,
            dtos::auth::CurrentUserResponse,
            dtos::user::UserDto,
            dtos::user::UpdateUserDto,
            dtos::user::ReadUserDto,
        )
    ),
    modifiers(&SecurityAddon),
    tags(
        (name = "Authentication", description = "Login, token rotation and registration"),
        (name = "User", description = "User profile management"),
        (name = "Observability", description = "Service health"),
    )
)]
pub struct ApiDoc;

struct SecurityAddon;

impl Modify for SecurityAddon {
    fn modify(&self, openapi: &mut utoipa::openapi::OpenApi) {
        if let Some(components) = openapi.components.as_mut() {
            components.add_security_scheme(
                "bearer_auth",
                SecurityScheme::Http(
                    utoipa::openapi::security::HttpBuilder::new()
                        .scheme(utoipa::openapi::security::HttpAuthScheme::Bearer)
                        .bearer_format("JWT")
                        .build(),
                ),
            );
        }
    }
}

#[derive(Clone)]
pub struct AppState {
    pub config: UserServiceConfig,
    pub data: Arc<dyn DataSource>,
    pub jwt: JwtService,
    pub auth_service: AuthService,
    pub user_service: UserService,
}

impl AppState {
    pub fn new(config: UserServiceConfig, data: Arc<dyn DataSource>) -> Result<Self, AppError> {
        let jwt = JwtService::new(&config.jwt).map_err(AppError::ConfigError)?;

        Ok(Self {
            auth_service: AuthService::new(jwt.clone()),
            user_service: UserService::new(),
            config,
            data,
            jwt,
        })
    }
}

pub fn build_router(state: AppState) -> Router {
    let transactional = UnitOfWorkState::new(state.data.clone(), UnitOfWork::default());
    let non_transactional = UnitOfWorkState::new(state.data.clone(), UnitOfWork::disabled());

    let public_auth_routes = Router::new()
        .route("/api/auth/login", post(handlers::auth::login))
        .route("/api/auth/refresh", post(handlers::auth::refresh))
        .route("/api/auth/register", post(handlers::auth::register))
        .layer(from_fn_with_state(
            transactional.clone(),
            unit_of_work_middleware,
        ));

    let protected_auth_routes = Router::new()
        .merge(
            Router::new()
                .route("/api/auth/logout", post(handlers::auth::logout))
                .layer(from_fn_with_state(
                    transactional.clone(),
                    unit_of_work_middleware,
                )),
        )
        .merge(
            Router::new()
                .route("/api/auth/current-user", get(handlers::auth::current_user))
                .layer(from_fn_with_state(
                    non_transactional,
                    unit_of_work_middleware,
                )),
        )
        .layer(from_fn_with_state(state.clone(), auth_middleware));

    let user_routes = Router::new()
        .route("/api/users", get(handlers::user::list_users))
        .route("/api/users/paged", get(handlers::user::paged_users))
        .route(
            "/api/users/:id",
            get(handlers::user::get_user)
                .put(handlers::user::update_user)
                .delete(handlers::user::delete_user),
        )
        .layer(from_fn_with_state(transactional, unit_of_work_middleware))
        .layer(from_fn_with_state(state.clone(), auth_middleware));

    let mut app = Router::new().route("/health", get(health_check));

    // Only add Swagger UI if enabled in config
    if state.config.swagger.enabled {
        app = app.merge(SwaggerUi::new("/docs").url("/api-docs/openapi.json", ApiDoc::openapi()));
    }

    app.merge(public_auth_routes)
        .merge(protected_auth_routes)
        .merge(user_routes)
        .with_state(state.clone())
        // Add tracing layer
        .layer(
            TraceLayer::new_for_http().make_span_with(|request: &Request<_>| {
                let request_id = request
                    .headers()
                    .get("x-request-id")
                    .and_then(|value| value.to_str().ok())
                    .unwrap_or("-");

                tracing::info_span!(
                    "http_request",
                    request_id = %request_id,
                    method = %request.method(),
                    uri = %request.uri(),
                    version = ?request.version(),
                )
            }),
        )
        // Add tracing middleware for request_id
        .layer(from_fn(request_id_middleware))
        // Add security headers middleware
        .layer(from_fn(security_headers_middleware))
        .layer(cors_layer(&state.config.security.allowed_origins))
}

fn cors_layer(allowed_origins: &[String]) -> CorsLayer {
    let origins = allowed_origins
        .iter()
        .filter(|o| {
            if o.as_str() == "*" {
                tracing::warn!("Wildcard CORS origin cannot be combined with credentials. Skipping.");
                return false;
            }
            true
        })
        .filter_map(|o| match o.parse::<HeaderValue>() {
            Ok(origin) => Some(origin),
            Err(e) => {
                tracing::error!("Invalid CORS origin '{}': {}. Skipping.", o, e);
                None
            }
        })
        .collect::<Vec<HeaderValue>>();

    // Cookies travel cross-origin, so credentials are allowed and origins are explicit
    CorsLayer::new()
        .allow_origin(origins)
        .allow_credentials(true)
        .allow_methods([
            Method::GET,
            Method::POST,
            Method::PUT,
            Method::DELETE,
            Method::OPTIONS,
        ])
        .allow_headers([header::AUTHORIZATION, header::CONTENT_TYPE])
}

/// Service health check
#[utoipa::path(
    get,
    path = "/health",
    responses(
        (status = 200, description = "Service is healthy"),
        (status = 503, description = "Service is unhealthy")
    ),
    tag = "Observability"
)]
pub async fn health_check(
    State(state): State<AppState>,
) -> Result<Json<serde_json::Value>, AppError> {
    state.data.health_check().await.map_err(|e| {
        tracing::error!(error = %e, "Data source health check failed");
        AppError::ServiceUnavailable
    })?;

    Ok(Json(serde_json::json!({
        "status": "healthy",
        "service": state.config.service_name,
        "version": state.config.service_version,
        "environment": format!("{:?}", state.config.environment),
        "checks": {
            "database": "up"
        }
    })))
}
