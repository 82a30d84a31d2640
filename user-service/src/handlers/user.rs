use axum::{
    extract::{Path, Query, State},
    http::StatusCode,
    Json,
};
use service_core::error::AppError;
use uuid::Uuid;

use crate::{
    dtos::{
        user::{PageQuery, PagedResult, ReadUserDto, UpdateUserDto},
        ErrorResponse,
    },
    middleware::DbSession,
    utils::ValidatedJson,
    AppState,
};

/// List every user
#[utoipa::path(
    get,
    path = "/api/users",
    responses(
        (status = 200, description = "All users", body = [ReadUserDto]),
        (status = 401, description = "Invalid token", body = ErrorResponse)
    ),
    tag = "User",
    security(
        ("bearer_auth" = [])
    )
)]
pub async fn list_users(
    State(state): State<AppState>,
    session: DbSession,
) -> Result<Json<Vec<ReadUserDto>>, AppError> {
    Ok(Json(state.user_service.list(&*session).await?))
}

/// One page of users
#[utoipa::path(
    get,
    path = "/api/users/paged",
    params(PageQuery),
    responses(
        (status = 200, description = "Page of users with navigation metadata"),
        (status = 400, description = "Invalid page parameters", body = ErrorResponse),
        (status = 401, description = "Invalid token", body = ErrorResponse)
    ),
    tag = "User",
    security(
        ("bearer_auth" = [])
    )
)]
pub async fn paged_users(
    State(state): State<AppState>,
    session: DbSession,
    Query(query): Query<PageQuery>,
) -> Result<Json<PagedResult<ReadUserDto>>, AppError> {
    let page = state
        .user_service
        .paged(&*session, query.page_index, query.page_size)
        .await?;
    Ok(Json(page))
}

#[utoipa::path(
    get,
    path = "/api/users/{id}",
    params(("id" = Uuid, Path, description = "User profile ID")),
    responses(
        (status = 200, description = "User found", body = ReadUserDto),
        (status = 404, description = "User not found", body = ErrorResponse)
    ),
    tag = "User",
    security(
        ("bearer_auth" = [])
    )
)]
pub async fn get_user(
    State(state): State<AppState>,
    session: DbSession,
    Path(id): Path<Uuid>,
) -> Result<Json<ReadUserDto>, AppError> {
    Ok(Json(state.user_service.get(&*session, id).await?))
}

#[utoipa::path(
    put,
    path = "/api/users/{id}",
    params(("id" = Uuid, Path, description = "User profile ID")),
    request_body = UpdateUserDto,
    responses(
        (status = 200, description = "User updated", body = ReadUserDto),
        (status = 400, description = "Validation error", body = ErrorResponse),
        (status = 404, description = "User not found", body = ErrorResponse)
    ),
    tag = "User",
    security(
        ("bearer_auth" = [])
    )
)]
pub async fn update_user(
    State(state): State<AppState>,
    session: DbSession,
    Path(id): Path<Uuid>,
    ValidatedJson(dto): ValidatedJson<UpdateUserDto>,
) -> Result<Json<ReadUserDto>, AppError> {
    Ok(Json(state.user_service.update(&*session, id, dto).await?))
}

#[utoipa::path(
    delete,
    path = "/api/users/{id}",
    params(("id" = Uuid, Path, description = "User profile ID")),
    responses(
        (status = 204, description = "User deleted"),
        (status = 404, description = "User not found", body = ErrorResponse)
    ),
    tag = "User",
    security(
        ("bearer_auth" = [])
    )
)]
pub async fn delete_user(
    State(state): State<AppState>,
    session: DbSession,
    Path(id): Path<Uuid>,
) -> Result<StatusCode, AppError> {
    state.user_service.delete(&*session, id).await?;
    Ok(StatusCode::NO_CONTENT)
}
