//! Persistence Layer
//! Mission: Keep users, roles, groups and activity behind one async interface

pub mod sqlite;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use std::time::Duration;
use thiserror::Error;
use tracing::info;

use crate::auth::models::{Role, RoleRecord, User};
use crate::auth::password::{CredentialError, Credentials};
use crate::models::{ActivityRecord, Group, GroupWithMembers, NewUser};

pub use sqlite::SqliteStore;

#[derive(Debug, Error)]
pub enum StoreError {
    #[error("database error: {0}")]
    Sqlite(#[source] rusqlite::Error),

    #[error("constraint violated: {0}")]
    Conflict(String),

    #[error("role '{0}' is not seeded")]
    MissingRole(Role),

    #[error("database operation timed out after {0:?}")]
    Timeout(Duration),

    #[error("database task failed: {0}")]
    Task(String),
}

impl From<rusqlite::Error> for StoreError {
    fn from(err: rusqlite::Error) -> Self {
        match &err {
            rusqlite::Error::SqliteFailure(e, msg)
                if e.code == rusqlite::ErrorCode::ConstraintViolation =>
            {
                StoreError::Conflict(msg.clone().unwrap_or_else(|| e.to_string()))
            }
            _ => StoreError::Sqlite(err),
        }
    }
}

/// Persistence interface consumed by the auth pipeline and the handlers.
///
/// Absent rows are reported as `Ok(None)` / `Ok(false)`; errors are reserved
/// for storage failures. Soft-deleted users are invisible to every lookup.
#[async_trait]
pub trait Repository: Send + Sync {
    async fn find_user_by_id(&self, id: i64) -> Result<Option<User>, StoreError>;
    async fn find_user_by_email(&self, email: &str) -> Result<Option<User>, StoreError>;
    async fn find_role_by_name(&self, name: Role) -> Result<Option<RoleRecord>, StoreError>;

    async fn insert_activity_log(
        &self,
        user_id: i64,
        action: &str,
        at: DateTime<Utc>,
    ) -> Result<ActivityRecord, StoreError>;
    /// Newest first.
    async fn list_activity_logs(&self) -> Result<Vec<ActivityRecord>, StoreError>;

    async fn create_user(&self, user: NewUser) -> Result<User, StoreError>;
    async fn list_users(&self, role: Option<Role>) -> Result<Vec<User>, StoreError>;
    async fn update_user_profile(
        &self,
        id: i64,
        name: &str,
        email: Option<&str>,
    ) -> Result<Option<User>, StoreError>;
    async fn set_user_role(&self, id: i64, role: Role) -> Result<Option<User>, StoreError>;
    async fn set_user_banned(&self, id: i64, banned: bool) -> Result<Option<User>, StoreError>;
    async fn soft_delete_user(&self, id: i64) -> Result<bool, StoreError>;

    async fn create_group(&self, name: &str) -> Result<Group, StoreError>;
    async fn find_group(&self, id: i64) -> Result<Option<Group>, StoreError>;
    async fn list_groups(&self) -> Result<Vec<GroupWithMembers>, StoreError>;
    async fn rename_group(&self, id: i64, name: &str) -> Result<Option<Group>, StoreError>;
    async fn delete_group(&self, id: i64) -> Result<bool, StoreError>;
    async fn add_group_member(&self, group_id: i64, user_id: i64) -> Result<(), StoreError>;
    async fn remove_group_member(&self, group_id: i64, user_id: i64) -> Result<bool, StoreError>;
}

#[derive(Debug, Error)]
pub enum SeedError {
    #[error(transparent)]
    Store(#[from] StoreError),
    #[error(transparent)]
    Credentials(#[from] CredentialError),
}

/// Create the bootstrap admin account unless one with this email exists.
pub async fn seed_admin(
    store: &dyn Repository,
    credentials: &Credentials,
    email: &str,
    password: &str,
) -> Result<bool, SeedError> {
    if store.find_user_by_email(email).await?.is_some() {
        return Ok(false);
    }

    let password_hash = credentials.hash(password)?;
    store
        .create_user(NewUser {
            name: "admin".to_string(),
            email: email.to_string(),
            password_hash,
            role: Role::Admin,
        })
        .await?;

    info!("🔐 Default admin user created ({})", email);
    Ok(true)
}
