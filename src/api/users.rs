//! User management endpoints.

use axum::{
    extract::rejection::{JsonRejection, PathRejection, QueryRejection},
    extract::{Path, Query, State},
    http::StatusCode,
    Json,
};
use serde::Deserialize;
use tracing::{info, warn};

use super::{validation, ApiError, ApiResult, AppState};
use crate::auth::models::{Role, User, UserResponse};
use crate::auth::{AdminOnly, AnyRole, AuthError, Authorized, Staff};
use crate::models::{MessageResponse, NewUser};
use crate::store::StoreError;

#[derive(Debug, Deserialize)]
pub struct ListUsersQuery {
    pub role: Option<String>,
}

#[derive(Debug, Deserialize)]
pub struct CreateUserRequest {
    pub name: String,
    pub email: String,
    pub password: String,
    pub role: Option<String>,
}

#[derive(Debug, Deserialize)]
pub struct UpdateUserRequest {
    pub name: String,
    pub email: Option<String>,
}

#[derive(Debug, Deserialize)]
pub struct UpdateRoleRequest {
    pub role_name: String,
}

fn email_taken(err: StoreError) -> ApiError {
    match err {
        StoreError::Conflict(_) => ApiError::Conflict("Email is already in use".to_string()),
        other => other.into(),
    }
}

async fn load_user(state: &AppState, id: i64) -> ApiResult<User> {
    state
        .store
        .find_user_by_id(id)
        .await?
        .ok_or_else(|| ApiError::not_found("User not found"))
}

/// GET /users/me
pub async fn get_profile(
    State(state): State<AppState>,
    caller: Authorized<AnyRole>,
) -> ApiResult<Json<UserResponse>> {
    let user = state
        .store
        .find_user_by_id(caller.id())
        .await?
        .ok_or(AuthError::UnknownAccount)?;

    Ok(Json(UserResponse::from_user(&user)))
}

/// GET /users?role=
pub async fn list_users(
    State(state): State<AppState>,
    _caller: Authorized<Staff>,
    query: Result<Query<ListUsersQuery>, QueryRejection>,
) -> ApiResult<Json<Vec<UserResponse>>> {
    let Query(query) = query?;

    let role = match query.role.as_deref() {
        None | Some("") => None,
        Some(name) => Some(validation::role(name)?),
    };

    let users = state.store.list_users(role).await?;
    Ok(Json(users.iter().map(UserResponse::from_user).collect()))
}

/// POST /users
pub async fn create_user(
    State(state): State<AppState>,
    caller: Authorized<AdminOnly>,
    payload: Result<Json<CreateUserRequest>, JsonRejection>,
) -> ApiResult<(StatusCode, Json<UserResponse>)> {
    let Json(payload) = payload?;

    let name = validation::required_text("name", &payload.name)?;
    let email = validation::email(&payload.email)?;
    validation::password(&payload.password)?;
    let role = match payload.role.as_deref() {
        None => Role::User,
        Some(name) => validation::role(name)?,
    };

    let role = state.seeded_role(role).await?;
    let password_hash = state.hash_password(payload.password).await?;
    let user = state
        .store
        .create_user(NewUser {
            name,
            email,
            password_hash,
            role: role.name,
        })
        .await
        .map_err(email_taken)?;

    info!("👤 User {} created by {}", user.id, caller.id());
    state
        .activity
        .record_best_effort(caller.id(), &format!("Created user {}", user.name))
        .await;

    Ok((StatusCode::CREATED, Json(UserResponse::from_user(&user))))
}

/// PUT /users/:id
pub async fn update_user(
    State(state): State<AppState>,
    caller: Authorized<Staff>,
    id: Result<Path<i64>, PathRejection>,
    payload: Result<Json<UpdateUserRequest>, JsonRejection>,
) -> ApiResult<Json<UserResponse>> {
    let Path(id) = id?;
    let Json(payload) = payload?;

    let name = validation::required_text("name", &payload.name)?;
    let email = match payload.email.as_deref().map(str::trim) {
        None | Some("") => None,
        Some(email) => Some(validation::email(email)?),
    };

    let user = state
        .store
        .update_user_profile(id, &name, email.as_deref())
        .await
        .map_err(email_taken)?
        .ok_or_else(|| ApiError::not_found("User not found"))?;

    info!("✏️ User {} updated by {}", user.id, caller.id());
    state
        .activity
        .record_best_effort(caller.id(), &format!("Updated user {}", user.name))
        .await;

    Ok(Json(UserResponse::from_user(&user)))
}

/// DELETE /users/:id
pub async fn delete_user(
    State(state): State<AppState>,
    caller: Authorized<AdminOnly>,
    id: Result<Path<i64>, PathRejection>,
) -> ApiResult<Json<MessageResponse>> {
    let Path(id) = id?;

    if id == caller.id() {
        return Err(ApiError::bad_request("You cannot delete your own account"));
    }

    let user = load_user(&state, id).await?;
    if !state.store.soft_delete_user(id).await? {
        return Err(ApiError::not_found("User not found"));
    }

    info!("🗑️ User {} ({}) deleted by {}", user.id, user.email, caller.id());
    state
        .activity
        .record_best_effort(caller.id(), &format!("Deleted user {}", user.name))
        .await;

    Ok(Json(MessageResponse::new("User deleted")))
}

/// PATCH /users/:id/role
pub async fn update_user_role(
    State(state): State<AppState>,
    caller: Authorized<AdminOnly>,
    id: Result<Path<i64>, PathRejection>,
    payload: Result<Json<UpdateRoleRequest>, JsonRejection>,
) -> ApiResult<Json<UserResponse>> {
    let Path(id) = id?;
    let Json(payload) = payload?;

    let role = validation::role(payload.role_name.trim())?;
    let role = state.seeded_role(role).await?;
    let before = load_user(&state, id).await?;

    let user = state
        .store
        .set_user_role(id, role.name)
        .await?
        .ok_or_else(|| ApiError::not_found("User not found"))?;

    info!("🔑 Role of user {} changed {} -> {}", user.id, before.role, user.role);
    state
        .activity
        .record_best_effort(
            caller.id(),
            &format!(
                "Changed role of user {}: {} -> {}",
                user.name, before.role, user.role
            ),
        )
        .await;

    Ok(Json(UserResponse::from_user(&user)))
}

/// PATCH /users/:id/ban
pub async fn ban_user(
    State(state): State<AppState>,
    caller: Authorized<AdminOnly>,
    id: Result<Path<i64>, PathRejection>,
) -> ApiResult<Json<MessageResponse>> {
    let Path(id) = id?;

    if id == caller.id() {
        return Err(ApiError::bad_request("You cannot ban your own account"));
    }

    set_banned(&state, caller.id(), id, true).await?;
    Ok(Json(MessageResponse::new("User banned")))
}

/// PATCH /users/:id/unban
pub async fn unban_user(
    State(state): State<AppState>,
    caller: Authorized<AdminOnly>,
    id: Result<Path<i64>, PathRejection>,
) -> ApiResult<Json<MessageResponse>> {
    let Path(id) = id?;

    set_banned(&state, caller.id(), id, false).await?;
    Ok(Json(MessageResponse::new("User unbanned")))
}

async fn set_banned(state: &AppState, actor: i64, id: i64, banned: bool) -> ApiResult<()> {
    let user = load_user(state, id).await?;

    if user.is_banned == banned {
        let message = if banned {
            "User is already banned"
        } else {
            "User is not banned"
        };
        warn!("{} (user {})", message, id);
        return Err(ApiError::bad_request(message));
    }

    state
        .store
        .set_user_banned(id, banned)
        .await?
        .ok_or_else(|| ApiError::not_found("User not found"))?;

    let verb = if banned { "Banned" } else { "Unbanned" };
    info!("🚫 {} user {} ({})", verb, user.id, user.email);
    state
        .activity
        .record_best_effort(actor, &format!("{} user {}", verb, user.name))
        .await;

    Ok(())
}
