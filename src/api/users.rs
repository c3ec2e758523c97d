//! User management endpoints

use axum::{
    extract::{Path, Query, State},
    http::StatusCode,
    Json,
};
use serde::Deserialize;

use crate::{
    error::AppResult,
    models::user::{
        LibraryUser, RegisterUser, UpdateMembershipStatus, UpdateProfile, UserProfile, UserQuery,
    },
};

use super::{AuthenticatedUser, PaginatedResponse};

/// Register a new account. The library membership is provisioned with it.
#[utoipa::path(
    post,
    path = "/users",
    tag = "users",
    request_body = RegisterUser,
    responses(
        (status = 201, description = "User registered", body = UserProfile),
        (status = 400, description = "Invalid input"),
        (status = 409, description = "Username or email already exists")
    )
)]
pub async fn register(
    State(state): State<crate::AppState>,
    Json(user): Json<RegisterUser>,
) -> AppResult<(StatusCode, Json<UserProfile>)> {
    let created = state.services.users.register(user).await?;
    Ok((StatusCode::CREATED, Json(created)))
}

/// List users with search and pagination
#[utoipa::path(
    get,
    path = "/users",
    tag = "users",
    security(("bearer_auth" = [])),
    params(UserQuery),
    responses(
        (status = 200, description = "List of users", body = PaginatedResponse<UserProfile>),
        (status = 403, description = "Staff privileges required")
    )
)]
pub async fn list_users(
    State(state): State<crate::AppState>,
    AuthenticatedUser(claims): AuthenticatedUser,
    Query(query): Query<UserQuery>,
) -> AppResult<Json<PaginatedResponse<UserProfile>>> {
    claims.require_staff()?;

    let page = query.pagination();
    let (users, total) = state.services.users.search_users(&query).await?;

    Ok(Json(PaginatedResponse {
        items: users,
        total,
        page: page.page,
        per_page: page.per_page,
    }))
}

/// Current user's profile
#[utoipa::path(
    get,
    path = "/users/me",
    tag = "users",
    security(("bearer_auth" = [])),
    responses(
        (status = 200, description = "Current user", body = UserProfile),
        (status = 401, description = "Not authenticated")
    )
)]
pub async fn me(
    State(state): State<crate::AppState>,
    AuthenticatedUser(claims): AuthenticatedUser,
) -> AppResult<Json<UserProfile>> {
    let profile = state.services.users.get_profile(claims.account_id).await?;
    Ok(Json(profile))
}

/// Update own profile (email, names, password)
#[utoipa::path(
    put,
    path = "/users/me",
    tag = "users",
    security(("bearer_auth" = [])),
    request_body = UpdateProfile,
    responses(
        (status = 200, description = "Profile updated", body = UserProfile),
        (status = 400, description = "Invalid input"),
        (status = 401, description = "Not authenticated or wrong current password")
    )
)]
pub async fn update_my_profile(
    State(state): State<crate::AppState>,
    AuthenticatedUser(claims): AuthenticatedUser,
    Json(profile): Json<UpdateProfile>,
) -> AppResult<Json<UserProfile>> {
    let updated = state
        .services
        .users
        .update_profile(claims.account_id, profile)
        .await?;
    Ok(Json(updated))
}

/// Get user details by ID
#[utoipa::path(
    get,
    path = "/users/{id}",
    tag = "users",
    security(("bearer_auth" = [])),
    params(
        ("id" = i32, Path, description = "User (account) ID")
    ),
    responses(
        (status = 200, description = "User details", body = UserProfile),
        (status = 403, description = "Not allowed"),
        (status = 404, description = "User not found")
    )
)]
pub async fn get_user(
    State(state): State<crate::AppState>,
    AuthenticatedUser(claims): AuthenticatedUser,
    Path(id): Path<i32>,
) -> AppResult<Json<UserProfile>> {
    claims.require_self_or_staff(id)?;

    let profile = state.services.users.get_profile(id).await?;
    Ok(Json(profile))
}

/// Provision the library membership of an existing account
#[utoipa::path(
    post,
    path = "/users/{id}/membership",
    tag = "users",
    security(("bearer_auth" = [])),
    params(
        ("id" = i32, Path, description = "User (account) ID")
    ),
    responses(
        (status = 201, description = "Membership created", body = LibraryUser),
        (status = 404, description = "User not found"),
        (status = 409, description = "Membership already exists")
    )
)]
pub async fn create_membership(
    State(state): State<crate::AppState>,
    AuthenticatedUser(claims): AuthenticatedUser,
    Path(id): Path<i32>,
) -> AppResult<(StatusCode, Json<LibraryUser>)> {
    claims.require_staff()?;

    let membership = state.services.users.create_membership(id).await?;
    Ok((StatusCode::CREATED, Json(membership)))
}

/// Activate or suspend a membership
#[utoipa::path(
    put,
    path = "/users/{id}/active",
    tag = "users",
    security(("bearer_auth" = [])),
    params(
        ("id" = i32, Path, description = "User (account) ID")
    ),
    request_body = UpdateMembershipStatus,
    responses(
        (status = 200, description = "Membership updated", body = LibraryUser),
        (status = 403, description = "Staff privileges required"),
        (status = 404, description = "User not found")
    )
)]
pub async fn set_active(
    State(state): State<crate::AppState>,
    AuthenticatedUser(claims): AuthenticatedUser,
    Path(id): Path<i32>,
    Json(request): Json<UpdateMembershipStatus>,
) -> AppResult<Json<LibraryUser>> {
    claims.require_staff()?;

    let membership = state
        .services
        .users
        .set_membership_active(id, request.is_active)
        .await?;
    Ok(Json(membership))
}

/// Delete a user and its membership
#[utoipa::path(
    delete,
    path = "/users/{id}",
    tag = "users",
    security(("bearer_auth" = [])),
    params(
        ("id" = i32, Path, description = "User (account) ID"),
        ("force" = Option<bool>, Query, description = "Force delete even with books checked out")
    ),
    responses(
        (status = 204, description = "User deleted"),
        (status = 404, description = "User not found"),
        (status = 422, description = "User has books checked out")
    )
)]
pub async fn delete_user(
    State(state): State<crate::AppState>,
    AuthenticatedUser(claims): AuthenticatedUser,
    Path(id): Path<i32>,
    Query(params): Query<DeleteUserParams>,
) -> AppResult<StatusCode> {
    claims.require_staff()?;

    state
        .services
        .users
        .delete_user(id, params.force.unwrap_or(false))
        .await?;
    Ok(StatusCode::NO_CONTENT)
}

#[derive(Deserialize)]
pub struct DeleteUserParams {
    pub force: Option<bool>,
}
