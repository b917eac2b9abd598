//! Authentication API Endpoints
//! Mission: Provide registration and login endpoints

use axum::{extract::rejection::JsonRejection, extract::State, http::StatusCode, Json};
use chrono::Utc;
use tracing::{info, warn};

use super::{validation, ApiError, ApiResult, AppState};
use crate::auth::models::{LoginRequest, LoginResponse, RegisterRequest, Role};
use crate::auth::AuthError;
use crate::models::{MessageResponse, NewUser};
use crate::store::StoreError;

/// Register endpoint - POST /auth/register
pub async fn register(
    State(state): State<AppState>,
    payload: Result<Json<RegisterRequest>, JsonRejection>,
) -> ApiResult<(StatusCode, Json<MessageResponse>)> {
    let Json(payload) = payload?;

    let name = validation::required_text("name", &payload.name)?;
    let email = validation::email(&payload.email)?;
    validation::password(&payload.password)?;

    let password_hash = state.hash_password(payload.password).await?;

    let role = state.seeded_role(Role::User).await?;
    let user = state
        .store
        .create_user(NewUser {
            name,
            email,
            password_hash,
            role: role.name,
        })
        .await
        .map_err(|e| match e {
            StoreError::Conflict(_) => {
                warn!("❌ Registration with taken email: {}", payload.email.trim());
                ApiError::Conflict("Email is already registered".to_string())
            }
            other => other.into(),
        })?;

    info!("✅ User {} ({}) registered", user.name, user.email);
    state
        .activity
        .record_best_effort(user.id, "Registered an account")
        .await;

    Ok((
        StatusCode::CREATED,
        Json(MessageResponse::new("Registration successful")),
    ))
}

/// Login endpoint - POST /auth/login
pub async fn login(
    State(state): State<AppState>,
    payload: Result<Json<LoginRequest>, JsonRejection>,
) -> ApiResult<Json<LoginResponse>> {
    let Json(payload) = payload?;

    let email = validation::email(&payload.email)?;
    if payload.password.is_empty() {
        return Err(ApiError::bad_request("password is required"));
    }

    info!("🔐 Login attempt: {}", email);

    let invalid = || ApiError::Unauthenticated("Invalid email or password".to_string());

    let Some(user) = state.store.find_user_by_email(&email).await? else {
        warn!("❌ Failed login attempt, unknown email: {}", email);
        return Err(invalid());
    };

    if !state
        .verify_password(payload.password, user.password_hash.clone())
        .await?
    {
        warn!("❌ Failed login attempt: {}", email);
        return Err(invalid());
    }

    if user.is_banned {
        warn!("🚫 Banned user {} attempted to log in", user.id);
        return Err(AuthError::Banned.into());
    }

    let token = state.auth.jwt.issue(user.id, Some(user.role), Utc::now())?;

    info!("✅ Login successful: {} ({})", user.email, user.role);

    Ok(Json(LoginResponse {
        token,
        expires_in: state.auth.jwt.ttl().num_seconds(),
        role: user.role,
    }))
}
