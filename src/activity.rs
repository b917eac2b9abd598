//! Activity Recorder
//! Mission: Append an audit entry for every mutating action

use chrono::Utc;
use std::sync::Arc;
use thiserror::Error;
use tracing::{debug, warn};

use crate::models::ActivityRecord;
use crate::store::{Repository, StoreError};

#[derive(Debug, Error)]
#[error("failed to record activity: {0}")]
pub struct RecordError(#[from] pub StoreError);

#[derive(Clone)]
pub struct ActivityRecorder {
    store: Arc<dyn Repository>,
}

impl ActivityRecorder {
    pub fn new(store: Arc<dyn Repository>) -> Self {
        Self { store }
    }

    pub async fn record(&self, actor_id: i64, action: &str) -> Result<ActivityRecord, RecordError> {
        let record = self
            .store
            .insert_activity_log(actor_id, action, Utc::now())
            .await?;
        debug!("Recorded activity for user {}: {}", actor_id, action);
        Ok(record)
    }

    /// Record, logging and discarding any failure. The calling operation's
    /// outcome never depends on this.
    pub async fn record_best_effort(&self, actor_id: i64, action: &str) {
        if let Err(e) = self.record(actor_id, action).await {
            warn!("⚠️ Activity for user {} not recorded ({}): {}", actor_id, action, e);
        }
    }

    /// All records, newest first.
    pub async fn list(&self) -> Result<Vec<ActivityRecord>, RecordError> {
        Ok(self.store.list_activity_logs().await?)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::auth::models::{Role, RoleRecord, User};
    use crate::models::{Group, GroupWithMembers, NewUser};
    use crate::store::SqliteStore;
    use async_trait::async_trait;
    use chrono::DateTime;
    use std::time::Duration;

    /// Repository whose every call fails.
    struct BrokenStore;

    fn broken<T>() -> Result<T, StoreError> {
        Err(StoreError::Timeout(Duration::from_secs(5)))
    }

    #[async_trait]
    impl Repository for BrokenStore {
        async fn find_user_by_id(&self, _: i64) -> Result<Option<User>, StoreError> {
            broken()
        }
        async fn find_user_by_email(&self, _: &str) -> Result<Option<User>, StoreError> {
            broken()
        }
        async fn find_role_by_name(&self, _: Role) -> Result<Option<RoleRecord>, StoreError> {
            broken()
        }
        async fn insert_activity_log(
            &self,
            _: i64,
            _: &str,
            _: DateTime<Utc>,
        ) -> Result<ActivityRecord, StoreError> {
            broken()
        }
        async fn list_activity_logs(&self) -> Result<Vec<ActivityRecord>, StoreError> {
            broken()
        }
        async fn create_user(&self, _: NewUser) -> Result<User, StoreError> {
            broken()
        }
        async fn list_users(&self, _: Option<Role>) -> Result<Vec<User>, StoreError> {
            broken()
        }
        async fn update_user_profile(
            &self,
            _: i64,
            _: &str,
            _: Option<&str>,
        ) -> Result<Option<User>, StoreError> {
            broken()
        }
        async fn set_user_role(&self, _: i64, _: Role) -> Result<Option<User>, StoreError> {
            broken()
        }
        async fn set_user_banned(&self, _: i64, _: bool) -> Result<Option<User>, StoreError> {
            broken()
        }
        async fn soft_delete_user(&self, _: i64) -> Result<bool, StoreError> {
            broken()
        }
        async fn create_group(&self, _: &str) -> Result<Group, StoreError> {
            broken()
        }
        async fn find_group(&self, _: i64) -> Result<Option<Group>, StoreError> {
            broken()
        }
        async fn list_groups(&self) -> Result<Vec<GroupWithMembers>, StoreError> {
            broken()
        }
        async fn rename_group(&self, _: i64, _: &str) -> Result<Option<Group>, StoreError> {
            broken()
        }
        async fn delete_group(&self, _: i64) -> Result<bool, StoreError> {
            broken()
        }
        async fn add_group_member(&self, _: i64, _: i64) -> Result<(), StoreError> {
            broken()
        }
        async fn remove_group_member(&self, _: i64, _: i64) -> Result<bool, StoreError> {
            broken()
        }
    }

    #[tokio::test]
    async fn test_record_and_list() {
        let store = Arc::new(SqliteStore::open_in_memory(Duration::from_secs(5)).unwrap());
        let recorder = ActivityRecorder::new(store);

        let record = recorder.record(1, "Created group ops").await.unwrap();
        assert_eq!(record.user_id, 1);
        recorder.record_best_effort(2, "Banned user 3").await;

        let records = recorder.list().await.unwrap();
        assert_eq!(records.len(), 2);
        assert!(records.iter().any(|r| r.action == "Banned user 3"));
    }

    #[tokio::test]
    async fn test_failures_are_swallowed_by_best_effort() {
        let recorder = ActivityRecorder::new(Arc::new(BrokenStore));

        assert!(recorder.record(1, "anything").await.is_err());
        // Must complete without panicking or propagating.
        recorder.record_best_effort(1, "anything").await;
    }
}
