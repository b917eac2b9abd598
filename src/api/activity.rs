use axum::{extract::State, Json};

use super::{ApiResult, AppState};
use crate::auth::{AdminOnly, Authorized};
use crate::models::ActivityRecord;

/// GET /users/activity - full audit trail, newest first
pub async fn list_activity(
    State(state): State<AppState>,
    _caller: Authorized<AdminOnly>,
) -> ApiResult<Json<Vec<ActivityRecord>>> {
    Ok(Json(state.activity.list().await?))
}
