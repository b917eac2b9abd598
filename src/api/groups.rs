//! Group management endpoints.

use axum::{
    extract::rejection::{JsonRejection, PathRejection},
    extract::{Path, State},
    http::StatusCode,
    Json,
};
use serde::Deserialize;
use tracing::{info, warn};

use super::{validation, ApiError, ApiResult, AppState};
use crate::auth::{Authorized, Staff};
use crate::models::{Group, GroupWithMembers, MessageResponse};
use crate::store::StoreError;

#[derive(Debug, Deserialize)]
pub struct GroupRequest {
    pub name: String,
}

#[derive(Debug, Deserialize)]
pub struct AddMemberRequest {
    pub user_id: i64,
}

fn name_taken(err: StoreError) -> ApiError {
    match err {
        StoreError::Conflict(_) => ApiError::Conflict("Group name is already in use".to_string()),
        other => other.into(),
    }
}

async fn load_group(state: &AppState, id: i64) -> ApiResult<Group> {
    state
        .store
        .find_group(id)
        .await?
        .ok_or_else(|| ApiError::not_found("Group not found"))
}

/// POST /groups
pub async fn create_group(
    State(state): State<AppState>,
    caller: Authorized<Staff>,
    payload: Result<Json<GroupRequest>, JsonRejection>,
) -> ApiResult<(StatusCode, Json<Group>)> {
    let Json(payload) = payload?;
    let name = validation::required_text("name", &payload.name)?;

    let group = state.store.create_group(&name).await.map_err(name_taken)?;

    info!("👥 Group {} created", group.name);
    state
        .activity
        .record_best_effort(caller.id(), &format!("Created group {}", group.name))
        .await;

    Ok((StatusCode::CREATED, Json(group)))
}

/// GET /groups
pub async fn list_groups(
    State(state): State<AppState>,
    _caller: Authorized<Staff>,
) -> ApiResult<Json<Vec<GroupWithMembers>>> {
    Ok(Json(state.store.list_groups().await?))
}

/// PUT /groups/:id
pub async fn update_group(
    State(state): State<AppState>,
    caller: Authorized<Staff>,
    id: Result<Path<i64>, PathRejection>,
    payload: Result<Json<GroupRequest>, JsonRejection>,
) -> ApiResult<Json<Group>> {
    let Path(id) = id?;
    let Json(payload) = payload?;
    let name = validation::required_text("name", &payload.name)?;

    let before = load_group(&state, id).await?;
    let group = state
        .store
        .rename_group(id, &name)
        .await
        .map_err(name_taken)?
        .ok_or_else(|| ApiError::not_found("Group not found"))?;

    info!("👥 Group renamed {} -> {}", before.name, group.name);
    state
        .activity
        .record_best_effort(
            caller.id(),
            &format!("Renamed group {} -> {}", before.name, group.name),
        )
        .await;

    Ok(Json(group))
}

/// DELETE /groups/:id
pub async fn delete_group(
    State(state): State<AppState>,
    caller: Authorized<Staff>,
    id: Result<Path<i64>, PathRejection>,
) -> ApiResult<Json<MessageResponse>> {
    let Path(id) = id?;

    let group = load_group(&state, id).await?;
    if !state.store.delete_group(id).await? {
        return Err(ApiError::not_found("Group not found"));
    }

    info!("👥 Group {} deleted", group.name);
    state
        .activity
        .record_best_effort(caller.id(), &format!("Deleted group {}", group.name))
        .await;

    Ok(Json(MessageResponse::new("Group deleted")))
}

/// POST /groups/:id/users
pub async fn add_user_to_group(
    State(state): State<AppState>,
    caller: Authorized<Staff>,
    id: Result<Path<i64>, PathRejection>,
    payload: Result<Json<AddMemberRequest>, JsonRejection>,
) -> ApiResult<Json<MessageResponse>> {
    let Path(id) = id?;
    let Json(payload) = payload?;

    let group = load_group(&state, id).await?;
    let user = state
        .store
        .find_user_by_id(payload.user_id)
        .await?
        .ok_or_else(|| ApiError::not_found("User not found"))?;

    state.store.add_group_member(group.id, user.id).await?;

    info!("👥 User {} added to group {}", user.id, group.name);
    state
        .activity
        .record_best_effort(
            caller.id(),
            &format!("Added user {} to group {}", user.name, group.name),
        )
        .await;

    Ok(Json(MessageResponse::new("User added to group")))
}

/// DELETE /groups/:id/users/:user_id
pub async fn remove_user_from_group(
    State(state): State<AppState>,
    caller: Authorized<Staff>,
    ids: Result<Path<(i64, i64)>, PathRejection>,
) -> ApiResult<Json<MessageResponse>> {
    let Path((id, user_id)) = ids?;

    let group = load_group(&state, id).await?;
    let user = state
        .store
        .find_user_by_id(user_id)
        .await?
        .ok_or_else(|| ApiError::not_found("User not found"))?;

    if !state.store.remove_group_member(group.id, user.id).await? {
        warn!("User {} is not a member of group {}", user.id, group.id);
        return Err(ApiError::bad_request("User is not a member of this group"));
    }

    info!("👥 User {} removed from group {}", user.id, group.name);
    state
        .activity
        .record_best_effort(
            caller.id(),
            &format!("Removed user {} from group {}", user.name, group.name),
        )
        .await;

    Ok(Json(MessageResponse::new("User removed from group")))
}
