use axum::{extract::State, http::StatusCode, response::IntoResponse, Json};
use axum_extra::extract::cookie::{Cookie, CookieJar, SameSite};
use chrono::{DateTime, Utc};
use service_core::error::AppError;

use crate::{
    dtos::{
        auth::{AuthResponse, CurrentUserResponse, LoginRequest, RefreshRequest, RegisterRequest},
        ErrorResponse, MessageResponse,
    },
    middleware::{AuthUser, DbSession, ACCESS_TOKEN_COOKIE, REFRESH_TOKEN_COOKIE},
    services::ServiceError,
    utils::ValidatedJson,
    AppState,
};

fn token_cookie(
    name: &'static str,
    value: String,
    expires_at: DateTime<Utc>,
    secure: bool,
) -> Cookie<'static> {
    let max_age = (expires_at - Utc::now()).num_seconds().max(0);

    Cookie::build((name, value))
        .path("/")
        .http_only(true)
        .secure(secure)
        // Cross-site SPA clients need SameSite=None, which browsers only accept with Secure
        .same_site(if secure { SameSite::None } else { SameSite::Lax })
        .max_age(time::Duration::seconds(max_age))
        .build()
}

fn with_token_cookies(jar: CookieJar, tokens: &AuthResponse, secure: bool) -> CookieJar {
    jar.add(token_cookie(
        ACCESS_TOKEN_COOKIE,
        tokens.access_token.clone(),
        tokens.access_expiry,
        secure,
    ))
    .add(token_cookie(
        REFRESH_TOKEN_COOKIE,
        tokens.refresh_token.clone(),
        tokens.refresh_expiry,
        secure,
    ))
}

/// Login with email and password
#[utoipa::path(
    post,
    path = "/api/auth/login",
    request_body = LoginRequest,
    responses(
        (status = 200, description = "Login successful", body = AuthResponse),
        (status = 400, description = "Validation error", body = ErrorResponse),
        (status = 401, description = "Invalid email or password", body = ErrorResponse),
        (status = 500, description = "Internal server error", body = ErrorResponse)
    ),
    tag = "Authentication"
)]
pub async fn login(
    State(state): State<AppState>,
    jar: CookieJar,
    session: DbSession,
    ValidatedJson(req): ValidatedJson<LoginRequest>,
) -> Result<impl IntoResponse, AppError> {
    let res = state.auth_service.login(&*session, req).await?;
    let jar = with_token_cookies(jar, &res, state.config.security.cookie_secure);
    Ok((StatusCode::OK, jar, Json(res)))
}

/// Exchange a refresh token for a new token pair
///
/// The token is read from the body, falling back to the `refreshToken` cookie.
#[utoipa::path(
    post,
    path = "/api/auth/refresh",
    request_body = RefreshRequest,
    responses(
        (status = 200, description = "Tokens rotated", body = AuthResponse),
        (status = 401, description = "Invalid refresh token", body = ErrorResponse),
        (status = 500, description = "Internal server error", body = ErrorResponse)
    ),
    tag = "Authentication"
)]
pub async fn refresh(
    State(state): State<AppState>,
    jar: CookieJar,
    session: DbSession,
    body: Option<Json<RefreshRequest>>,
) -> Result<impl IntoResponse, AppError> {
    let token = body
        .and_then(|Json(req)| req.refresh_token)
        .filter(|t| !t.trim().is_empty())
        .or_else(|| jar.get(REFRESH_TOKEN_COOKIE).map(|c| c.value().to_string()))
        .ok_or(ServiceError::InvalidRefreshToken)?;

    let res = state.auth_service.refresh(&*session, &token).await?;
    let jar = with_token_cookies(jar, &res, state.config.security.cookie_secure);
    Ok((StatusCode::OK, jar, Json(res)))
}

/// Revoke all refresh tokens of the caller and clear the token cookies
#[utoipa::path(
    post,
    path = "/api/auth/logout",
    responses(
        (status = 200, description = "Logged out successfully", body = MessageResponse),
        (status = 401, description = "Invalid token", body = ErrorResponse),
        (status = 500, description = "Internal server error", body = ErrorResponse)
    ),
    tag = "Authentication",
    security(
        ("bearer_auth" = [])
    )
)]
pub async fn logout(
    State(state): State<AppState>,
    jar: CookieJar,
    session: DbSession,
    user: AuthUser,
) -> Result<impl IntoResponse, AppError> {
    let identity_id = user.identity_id()?;
    state.auth_service.logout(&*session, identity_id).await?;

    let jar = jar
        .remove(Cookie::build(ACCESS_TOKEN_COOKIE).path("/"))
        .remove(Cookie::build(REFRESH_TOKEN_COOKIE).path("/"));

    Ok((StatusCode::OK, jar, Json(MessageResponse::new("Logged out"))))
}

/// Register a new user
#[utoipa::path(
    post,
    path = "/api/auth/register",
    request_body = RegisterRequest,
    responses(
        (status = 200, description = "User registered", body = MessageResponse),
        (status = 400, description = "Validation or creation error", body = ErrorResponse),
        (status = 500, description = "Internal server error", body = ErrorResponse)
    ),
    tag = "Authentication"
)]
pub async fn register(
    State(state): State<AppState>,
    session: DbSession,
    ValidatedJson(req): ValidatedJson<RegisterRequest>,
) -> Result<impl IntoResponse, AppError> {
    let res = state.auth_service.register(&*session, req).await?;
    Ok((StatusCode::OK, Json(res)))
}

/// The authenticated user's identity and profile summary
#[utoipa::path(
    get,
    path = "/api/auth/current-user",
    responses(
        (status = 200, description = "Current user", body = CurrentUserResponse),
        (status = 401, description = "Invalid token", body = ErrorResponse),
        (status = 404, description = "User not found", body = ErrorResponse)
    ),
    tag = "Authentication",
    security(
        ("bearer_auth" = [])
    )
)]
pub async fn current_user(
    State(state): State<AppState>,
    session: DbSession,
    user: AuthUser,
) -> Result<Json<CurrentUserResponse>, AppError> {
    let identity_id = user.identity_id()?;
    let res = state
        .auth_service
        .current_user(&*session, identity_id)
        .await?;
    Ok(Json(res))
}
