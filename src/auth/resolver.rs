//! Identity Resolver
//! Mission: Turn a verified subject id into the caller's live identity

use crate::auth::models::Identity;
use crate::store::{Repository, StoreError};
use std::sync::Arc;
use thiserror::Error;
use tracing::debug;

#[derive(Debug, Error)]
pub enum ResolveError {
    #[error("account not found")]
    NotFound,
    #[error("account is banned")]
    Banned,
    #[error(transparent)]
    Store(#[from] StoreError),
}

/// Loads user and role from storage on every call; nothing is cached, so
/// role changes, bans and deletions take effect on the next request.
#[derive(Clone)]
pub struct IdentityResolver {
    store: Arc<dyn Repository>,
}

impl IdentityResolver {
    pub fn new(store: Arc<dyn Repository>) -> Self {
        Self { store }
    }

    pub async fn resolve(&self, subject_id: i64) -> Result<Identity, ResolveError> {
        let user = self
            .store
            .find_user_by_id(subject_id)
            .await?
            .ok_or(ResolveError::NotFound)?;

        if user.is_banned {
            debug!("Rejecting banned user {}", user.id);
            return Err(ResolveError::Banned);
        }

        Ok(Identity::from(&user))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::auth::models::Role;
    use crate::models::NewUser;
    use crate::store::SqliteStore;
    use std::time::Duration;

    async fn setup() -> (Arc<SqliteStore>, IdentityResolver) {
        let store = Arc::new(SqliteStore::open_in_memory(Duration::from_secs(5)).unwrap());
        let resolver = IdentityResolver::new(store.clone());
        (store, resolver)
    }

    async fn insert(store: &SqliteStore, name: &str, role: Role) -> i64 {
        store
            .create_user(NewUser {
                name: name.to_string(),
                email: format!("{name}@example.com"),
                password_hash: "hash".to_string(),
                role,
            })
            .await
            .unwrap()
            .id
    }

    #[tokio::test]
    async fn test_resolves_live_role() {
        let (store, resolver) = setup().await;
        let id = insert(&store, "mod", Role::User).await;

        assert_eq!(resolver.resolve(id).await.unwrap().role, Role::User);

        store.set_user_role(id, Role::Moderator).await.unwrap();
        let identity = resolver.resolve(id).await.unwrap();
        assert_eq!(identity.id, id);
        assert_eq!(identity.role, Role::Moderator);
        assert!(!identity.banned);
    }

    #[tokio::test]
    async fn test_missing_and_deleted_accounts() {
        let (store, resolver) = setup().await;
        assert!(matches!(
            resolver.resolve(404).await,
            Err(ResolveError::NotFound)
        ));

        let id = insert(&store, "gone", Role::User).await;
        store.soft_delete_user(id).await.unwrap();
        assert!(matches!(
            resolver.resolve(id).await,
            Err(ResolveError::NotFound)
        ));
    }

    #[tokio::test]
    async fn test_banned_account_rejected() {
        let (store, resolver) = setup().await;
        let id = insert(&store, "troll", Role::User).await;
        store.set_user_banned(id, true).await.unwrap();

        assert!(matches!(resolver.resolve(id).await, Err(ResolveError::Banned)));

        store.set_user_banned(id, false).await.unwrap();
        assert!(resolver.resolve(id).await.is_ok());
    }
}
