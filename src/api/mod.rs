//! HTTP API
//! Mission: Route registration, login, user, group and activity endpoints
//! through the rate limiter and the auth pipeline

pub mod activity;
pub mod auth;
pub mod error;
pub mod groups;
pub mod users;
pub mod validation;

use axum::{
    extract::FromRef,
    middleware,
    routing::{delete, get, patch, post, put},
    Json, Router,
};
use serde_json::{json, Value};
use std::sync::Arc;
use tower_http::cors::CorsLayer;

use crate::activity::ActivityRecorder;
use crate::auth::{require_auth, AuthState, Credentials, IdentityResolver, JwtHandler};
use crate::middleware::{rate_limit_middleware, request_logging, RateLimiter};
use crate::auth::models::{Role, RoleRecord};
use crate::store::{Repository, StoreError};

pub use error::{ApiError, ApiResult};

/// Shared handler state
#[derive(Clone)]
pub struct AppState {
    pub store: Arc<dyn Repository>,
    pub auth: AuthState,
    pub credentials: Credentials,
    pub activity: ActivityRecorder,
}

impl AppState {
    pub fn new(store: Arc<dyn Repository>, jwt: JwtHandler, credentials: Credentials) -> Self {
        let auth = AuthState::new(Arc::new(jwt), IdentityResolver::new(store.clone()));
        Self {
            activity: ActivityRecorder::new(store.clone()),
            store,
            auth,
            credentials,
        }
    }

    /// Hash on the blocking pool; bcrypt at production cost takes long enough
    /// to stall a runtime worker.
    pub(crate) async fn hash_password(&self, plaintext: String) -> ApiResult<String> {
        let credentials = self.credentials;
        tokio::task::spawn_blocking(move || credentials.hash(&plaintext))
            .await
            .map_err(|e| ApiError::Internal(e.to_string()))?
            .map_err(ApiError::from)
    }

    /// Role row an account is about to be assigned. A role missing from the
    /// table is a storage fault, not a client error.
    pub(crate) async fn seeded_role(&self, role: Role) -> ApiResult<RoleRecord> {
        self.store
            .find_role_by_name(role)
            .await?
            .ok_or_else(|| StoreError::MissingRole(role).into())
    }

    pub(crate) async fn verify_password(&self, plaintext: String, hash: String) -> ApiResult<bool> {
        let credentials = self.credentials;
        tokio::task::spawn_blocking(move || credentials.verify(&plaintext, &hash))
            .await
            .map_err(|e| ApiError::Internal(e.to_string()))?
            .map_err(ApiError::from)
    }
}

impl FromRef<AppState> for AuthState {
    fn from_ref(state: &AppState) -> Self {
        state.auth.clone()
    }
}

/// Build the full application router.
///
/// Layer order, outermost first: CORS, request logging, rate limiting, then
/// authentication on the protected routes only.
pub fn router(state: AppState, limiter: RateLimiter) -> Router {
    let public_routes = Router::new()
        .route("/health", get(health_check))
        .route("/auth/register", post(auth::register))
        .route("/auth/login", post(auth::login));

    let protected_routes = Router::new()
        .route("/users", get(users::list_users).post(users::create_user))
        .route("/users/me", get(users::get_profile))
        .route("/users/activity", get(activity::list_activity))
        .route(
            "/users/:id",
            put(users::update_user).delete(users::delete_user),
        )
        .route("/users/:id/role", patch(users::update_user_role))
        .route("/users/:id/ban", patch(users::ban_user))
        .route("/users/:id/unban", patch(users::unban_user))
        .route("/groups", get(groups::list_groups).post(groups::create_group))
        .route(
            "/groups/:id",
            put(groups::update_group).delete(groups::delete_group),
        )
        .route("/groups/:id/users", post(groups::add_user_to_group))
        .route(
            "/groups/:id/users/:user_id",
            delete(groups::remove_user_from_group),
        )
        .route_layer(middleware::from_fn_with_state(
            state.auth.clone(),
            require_auth,
        ));

    Router::new()
        .merge(public_routes)
        .merge(protected_routes)
        .with_state(state)
        .layer(middleware::from_fn_with_state(limiter, rate_limit_middleware))
        .layer(middleware::from_fn(request_logging))
        .layer(CorsLayer::permissive())
}

async fn health_check() -> Json<Value> {
    Json(json!({ "status": "ok" }))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::SqliteStore;
    use std::time::Duration;

    #[tokio::test]
    async fn test_seeded_role_reads_role_table() {
        let store = Arc::new(SqliteStore::open_in_memory(Duration::from_secs(5)).unwrap());
        let state = AppState::new(
            store,
            JwtHandler::new("secret", chrono::Duration::hours(1)),
            Credentials::new(4),
        );

        for role in Role::ALL {
            let record = state.seeded_role(role).await.unwrap();
            assert_eq!(record.name, role);
            assert_eq!(record.description, role.description());
        }
    }
}
