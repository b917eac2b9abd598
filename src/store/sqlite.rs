//! SQLite Storage
//! Mission: Persist accounts, groups and the activity trail with rusqlite

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use parking_lot::Mutex;
use rusqlite::{params, types::Type, Connection, OptionalExtension, Row};
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, info};

use super::{Repository, StoreError};
use crate::auth::models::{Role, RoleRecord, User, UserResponse};
use crate::models::{ActivityRecord, Group, GroupWithMembers, NewUser};

const SCHEMA: &str = "
    CREATE TABLE IF NOT EXISTS roles (
        id INTEGER PRIMARY KEY AUTOINCREMENT,
        name TEXT UNIQUE NOT NULL,
        description TEXT NOT NULL
    );
    CREATE TABLE IF NOT EXISTS users (
        id INTEGER PRIMARY KEY AUTOINCREMENT,
        name TEXT NOT NULL,
        email TEXT NOT NULL,
        password_hash TEXT NOT NULL,
        role_id INTEGER NOT NULL REFERENCES roles(id),
        is_banned INTEGER NOT NULL DEFAULT 0,
        created_at TEXT NOT NULL,
        updated_at TEXT NOT NULL,
        deleted_at TEXT
    );
    CREATE UNIQUE INDEX IF NOT EXISTS idx_users_email_live
        ON users(email) WHERE deleted_at IS NULL;
    CREATE TABLE IF NOT EXISTS user_groups (
        id INTEGER PRIMARY KEY AUTOINCREMENT,
        name TEXT UNIQUE NOT NULL,
        created_at TEXT NOT NULL,
        updated_at TEXT NOT NULL
    );
    CREATE TABLE IF NOT EXISTS group_members (
        group_id INTEGER NOT NULL REFERENCES user_groups(id) ON DELETE CASCADE,
        user_id INTEGER NOT NULL REFERENCES users(id),
        PRIMARY KEY (group_id, user_id)
    );
    CREATE TABLE IF NOT EXISTS activity_logs (
        id INTEGER PRIMARY KEY AUTOINCREMENT,
        user_id INTEGER NOT NULL,
        action TEXT NOT NULL,
        timestamp TEXT NOT NULL
    );
    CREATE INDEX IF NOT EXISTS idx_activity_logs_ts ON activity_logs(timestamp DESC);
";

// Column order is relied on by `user_from_row`.
const USER_SELECT: &str = "
    SELECT u.id, u.name, u.email, u.password_hash, u.role_id, r.name,
           u.is_banned, u.created_at, u.updated_at
    FROM users u
    JOIN roles r ON r.id = u.role_id
    WHERE u.deleted_at IS NULL";

/// SQLite-backed repository.
///
/// A single connection is shared behind a mutex; every call runs on the
/// blocking pool. `op_timeout` bounds the wait for the connection only: a
/// statement that has started always runs to completion, so a reported
/// timeout means nothing was written.
#[derive(Clone)]
pub struct SqliteStore {
    conn: Arc<Mutex<Connection>>,
    op_timeout: Duration,
}

impl SqliteStore {
    /// Open (or create) the database file, apply the schema and seed roles.
    pub fn open(db_path: &str, op_timeout: Duration) -> Result<Self, StoreError> {
        let conn = Connection::open(db_path)?;
        conn.pragma_update(None, "journal_mode", "WAL").ok();
        conn.pragma_update(None, "synchronous", "NORMAL").ok();
        Self::init(conn, op_timeout)
    }

    pub fn open_in_memory(op_timeout: Duration) -> Result<Self, StoreError> {
        Self::init(Connection::open_in_memory()?, op_timeout)
    }

    fn init(conn: Connection, op_timeout: Duration) -> Result<Self, StoreError> {
        conn.pragma_update(None, "foreign_keys", "ON")?;
        conn.execute_batch(SCHEMA)?;
        seed_roles(&conn)?;

        Ok(Self {
            conn: Arc::new(Mutex::new(conn)),
            op_timeout,
        })
    }

    async fn call<T, F>(&self, f: F) -> Result<T, StoreError>
    where
        F: FnOnce(&mut Connection) -> Result<T, StoreError> + Send + 'static,
        T: Send + 'static,
    {
        let conn = Arc::clone(&self.conn);
        let op_timeout = self.op_timeout;
        let task = tokio::task::spawn_blocking(move || {
            let Some(mut guard) = conn.try_lock_for(op_timeout) else {
                return Err(StoreError::Timeout(op_timeout));
            };
            f(&mut *guard)
        });

        task.await
            .map_err(|join_err| StoreError::Task(join_err.to_string()))?
    }
}

/// Insert the fixed role set; existing rows are left untouched.
fn seed_roles(conn: &Connection) -> Result<(), StoreError> {
    for role in Role::ALL {
        let inserted = conn.execute(
            "INSERT OR IGNORE INTO roles (name, description) VALUES (?1, ?2)",
            params![role.as_str(), role.description()],
        )?;
        if inserted > 0 {
            info!("Created role {}", role);
        }
    }
    Ok(())
}

fn role_at(row: &Row<'_>, idx: usize) -> rusqlite::Result<Role> {
    let name: String = row.get(idx)?;
    name.parse::<Role>()
        .map_err(|e| rusqlite::Error::FromSqlConversionFailure(idx, Type::Text, Box::new(e)))
}

fn user_from_row(row: &Row<'_>) -> rusqlite::Result<User> {
    Ok(User {
        id: row.get(0)?,
        name: row.get(1)?,
        email: row.get(2)?,
        password_hash: row.get(3)?,
        role_id: row.get(4)?,
        role: role_at(row, 5)?,
        is_banned: row.get(6)?,
        created_at: row.get(7)?,
        updated_at: row.get(8)?,
    })
}

fn group_from_row(row: &Row<'_>) -> rusqlite::Result<Group> {
    Ok(Group {
        id: row.get(0)?,
        name: row.get(1)?,
        created_at: row.get(2)?,
        updated_at: row.get(3)?,
    })
}

fn fetch_user(conn: &Connection, id: i64) -> Result<Option<User>, StoreError> {
    let sql = format!("{USER_SELECT} AND u.id = ?1");
    Ok(conn
        .prepare_cached(&sql)?
        .query_row(params![id], user_from_row)
        .optional()?)
}

fn fetch_group(conn: &Connection, id: i64) -> Result<Option<Group>, StoreError> {
    Ok(conn
        .prepare_cached("SELECT id, name, created_at, updated_at FROM user_groups WHERE id = ?1")?
        .query_row(params![id], group_from_row)
        .optional()?)
}

fn role_id(conn: &Connection, role: Role) -> Result<i64, StoreError> {
    conn.prepare_cached("SELECT id FROM roles WHERE name = ?1")?
        .query_row(params![role.as_str()], |row| row.get(0))
        .optional()?
        .ok_or(StoreError::MissingRole(role))
}

#[async_trait]
impl Repository for SqliteStore {
    async fn find_user_by_id(&self, id: i64) -> Result<Option<User>, StoreError> {
        self.call(move |conn| fetch_user(conn, id)).await
    }

    async fn find_user_by_email(&self, email: &str) -> Result<Option<User>, StoreError> {
        let email = email.to_string();
        self.call(move |conn| {
            let sql = format!("{USER_SELECT} AND u.email = ?1");
            Ok(conn
                .prepare_cached(&sql)?
                .query_row(params![email], user_from_row)
                .optional()?)
        })
        .await
    }

    async fn find_role_by_name(&self, name: Role) -> Result<Option<RoleRecord>, StoreError> {
        self.call(move |conn| {
            Ok(conn
                .prepare_cached("SELECT id, name, description FROM roles WHERE name = ?1")?
                .query_row(params![name.as_str()], |row| {
                    Ok(RoleRecord {
                        id: row.get(0)?,
                        name: role_at(row, 1)?,
                        description: row.get(2)?,
                    })
                })
                .optional()?)
        })
        .await
    }

    async fn insert_activity_log(
        &self,
        user_id: i64,
        action: &str,
        at: DateTime<Utc>,
    ) -> Result<ActivityRecord, StoreError> {
        let action = action.to_string();
        self.call(move |conn| {
            conn.execute(
                "INSERT INTO activity_logs (user_id, action, timestamp) VALUES (?1, ?2, ?3)",
                params![user_id, action, at],
            )?;
            Ok(ActivityRecord {
                id: conn.last_insert_rowid(),
                user_id,
                action,
                timestamp: at,
            })
        })
        .await
    }

    async fn list_activity_logs(&self) -> Result<Vec<ActivityRecord>, StoreError> {
        self.call(|conn| {
            let mut stmt = conn.prepare_cached(
                "SELECT id, user_id, action, timestamp FROM activity_logs
                 ORDER BY timestamp DESC, id DESC",
            )?;
            let records = stmt
                .query_map([], |row| {
                    Ok(ActivityRecord {
                        id: row.get(0)?,
                        user_id: row.get(1)?,
                        action: row.get(2)?,
                        timestamp: row.get(3)?,
                    })
                })?
                .collect::<Result<Vec<_>, _>>()?;
            Ok(records)
        })
        .await
    }

    async fn create_user(&self, user: NewUser) -> Result<User, StoreError> {
        self.call(move |conn| {
            let now = Utc::now();
            let inserted = conn.execute(
                "INSERT INTO users (name, email, password_hash, role_id, is_banned, created_at, updated_at)
                 SELECT ?1, ?2, ?3, id, 0, ?4, ?4 FROM roles WHERE name = ?5",
                params![user.name, user.email, user.password_hash, now, user.role.as_str()],
            )?;
            if inserted == 0 {
                return Err(StoreError::MissingRole(user.role));
            }

            let id = conn.last_insert_rowid();
            debug!("Inserted user {} ({})", id, user.role);
            fetch_user(conn, id)?.ok_or_else(|| StoreError::Task("inserted user vanished".into()))
        })
        .await
    }

    async fn list_users(&self, role: Option<Role>) -> Result<Vec<User>, StoreError> {
        self.call(move |conn| {
            let sql = format!("{USER_SELECT} AND (?1 IS NULL OR r.name = ?1) ORDER BY u.id");
            let mut stmt = conn.prepare_cached(&sql)?;
            let users = stmt
                .query_map(params![role.map(|r| r.as_str())], user_from_row)?
                .collect::<Result<Vec<_>, _>>()?;
            Ok(users)
        })
        .await
    }

    async fn update_user_profile(
        &self,
        id: i64,
        name: &str,
        email: Option<&str>,
    ) -> Result<Option<User>, StoreError> {
        let name = name.to_string();
        let email = email.map(str::to_string);
        self.call(move |conn| {
            let updated = conn.execute(
                "UPDATE users SET name = ?2, email = COALESCE(?3, email), updated_at = ?4
                 WHERE id = ?1 AND deleted_at IS NULL",
                params![id, name, email, Utc::now()],
            )?;
            if updated == 0 {
                return Ok(None);
            }
            fetch_user(conn, id)
        })
        .await
    }

    async fn set_user_role(&self, id: i64, role: Role) -> Result<Option<User>, StoreError> {
        self.call(move |conn| {
            let role_id = role_id(conn, role)?;
            let updated = conn.execute(
                "UPDATE users SET role_id = ?2, updated_at = ?3
                 WHERE id = ?1 AND deleted_at IS NULL",
                params![id, role_id, Utc::now()],
            )?;
            if updated == 0 {
                return Ok(None);
            }
            fetch_user(conn, id)
        })
        .await
    }

    async fn set_user_banned(&self, id: i64, banned: bool) -> Result<Option<User>, StoreError> {
        self.call(move |conn| {
            let updated = conn.execute(
                "UPDATE users SET is_banned = ?2, updated_at = ?3
                 WHERE id = ?1 AND deleted_at IS NULL",
                params![id, banned, Utc::now()],
            )?;
            if updated == 0 {
                return Ok(None);
            }
            fetch_user(conn, id)
        })
        .await
    }

    async fn soft_delete_user(&self, id: i64) -> Result<bool, StoreError> {
        self.call(move |conn| {
            let tx = conn.transaction()?;
            let deleted = tx.execute(
                "UPDATE users SET deleted_at = ?2 WHERE id = ?1 AND deleted_at IS NULL",
                params![id, Utc::now()],
            )?;
            if deleted > 0 {
                tx.execute("DELETE FROM group_members WHERE user_id = ?1", params![id])?;
            }
            tx.commit()?;
            Ok(deleted > 0)
        })
        .await
    }

    async fn create_group(&self, name: &str) -> Result<Group, StoreError> {
        let name = name.to_string();
        self.call(move |conn| {
            let now = Utc::now();
            conn.execute(
                "INSERT INTO user_groups (name, created_at, updated_at) VALUES (?1, ?2, ?2)",
                params![name, now],
            )?;
            Ok(Group {
                id: conn.last_insert_rowid(),
                name,
                created_at: now,
                updated_at: now,
            })
        })
        .await
    }

    async fn find_group(&self, id: i64) -> Result<Option<Group>, StoreError> {
        self.call(move |conn| fetch_group(conn, id)).await
    }

    async fn list_groups(&self) -> Result<Vec<GroupWithMembers>, StoreError> {
        self.call(|conn| {
            let groups = conn
                .prepare_cached("SELECT id, name, created_at, updated_at FROM user_groups ORDER BY id")?
                .query_map([], group_from_row)?
                .collect::<Result<Vec<_>, _>>()?;

            let mut members: HashMap<i64, Vec<UserResponse>> = HashMap::new();
            let mut stmt = conn.prepare_cached(
                "SELECT u.id, u.name, u.email, u.password_hash, u.role_id, r.name,
                        u.is_banned, u.created_at, u.updated_at, gm.group_id
                 FROM group_members gm
                 JOIN users u ON u.id = gm.user_id
                 JOIN roles r ON r.id = u.role_id
                 WHERE u.deleted_at IS NULL
                 ORDER BY gm.group_id, u.id",
            )?;
            let rows = stmt.query_map([], |row| Ok((row.get::<_, i64>(9)?, user_from_row(row)?)))?;
            for row in rows {
                let (group_id, user) = row?;
                members
                    .entry(group_id)
                    .or_default()
                    .push(UserResponse::from_user(&user));
            }

            Ok(groups
                .into_iter()
                .map(|group| {
                    let users = members.remove(&group.id).unwrap_or_default();
                    GroupWithMembers { group, users }
                })
                .collect())
        })
        .await
    }

    async fn rename_group(&self, id: i64, name: &str) -> Result<Option<Group>, StoreError> {
        let name = name.to_string();
        self.call(move |conn| {
            let updated = conn.execute(
                "UPDATE user_groups SET name = ?2, updated_at = ?3 WHERE id = ?1",
                params![id, name, Utc::now()],
            )?;
            if updated == 0 {
                return Ok(None);
            }
            fetch_group(conn, id)
        })
        .await
    }

    async fn delete_group(&self, id: i64) -> Result<bool, StoreError> {
        self.call(move |conn| {
            let tx = conn.transaction()?;
            tx.execute("DELETE FROM group_members WHERE group_id = ?1", params![id])?;
            let deleted = tx.execute("DELETE FROM user_groups WHERE id = ?1", params![id])?;
            tx.commit()?;
            Ok(deleted > 0)
        })
        .await
    }

    async fn add_group_member(&self, group_id: i64, user_id: i64) -> Result<(), StoreError> {
        self.call(move |conn| {
            conn.execute(
                "INSERT OR IGNORE INTO group_members (group_id, user_id) VALUES (?1, ?2)",
                params![group_id, user_id],
            )?;
            Ok(())
        })
        .await
    }

    async fn remove_group_member(&self, group_id: i64, user_id: i64) -> Result<bool, StoreError> {
        self.call(move |conn| {
            let removed = conn.execute(
                "DELETE FROM group_members WHERE group_id = ?1 AND user_id = ?2",
                params![group_id, user_id],
            )?;
            Ok(removed > 0)
        })
        .await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::NamedTempFile;

    fn create_test_store() -> SqliteStore {
        SqliteStore::open_in_memory(Duration::from_secs(5)).unwrap()
    }

    fn new_user(name: &str, role: Role) -> NewUser {
        NewUser {
            name: name.to_string(),
            email: format!("{name}@example.com"),
            password_hash: "hash".to_string(),
            role,
        }
    }

    #[tokio::test]
    async fn test_roles_seeded() {
        let store = create_test_store();

        for role in Role::ALL {
            let record = store.find_role_by_name(role).await.unwrap().unwrap();
            assert_eq!(record.name, role);
        }
    }

    #[tokio::test]
    async fn test_create_and_retrieve_user() {
        let store = create_test_store();

        let user = store.create_user(new_user("alice", Role::User)).await.unwrap();
        assert_eq!(user.role, Role::User);
        assert!(!user.is_banned);

        let by_id = store.find_user_by_id(user.id).await.unwrap().unwrap();
        assert_eq!(by_id.email, "alice@example.com");

        let by_email = store
            .find_user_by_email("alice@example.com")
            .await
            .unwrap()
            .unwrap();
        assert_eq!(by_email.id, user.id);

        assert!(store.find_user_by_id(9999).await.unwrap().is_none());
        assert!(store
            .find_user_by_email("nobody@example.com")
            .await
            .unwrap()
            .is_none());
    }

    #[tokio::test]
    async fn test_duplicate_email_conflicts() {
        let store = create_test_store();

        store.create_user(new_user("alice", Role::User)).await.unwrap();
        let err = store
            .create_user(new_user("alice", Role::User))
            .await
            .unwrap_err();
        assert!(matches!(err, StoreError::Conflict(_)));
    }

    #[tokio::test]
    async fn test_soft_deleted_user_is_invisible() {
        let store = create_test_store();

        let user = store.create_user(new_user("bob", Role::User)).await.unwrap();
        assert!(store.soft_delete_user(user.id).await.unwrap());
        assert!(!store.soft_delete_user(user.id).await.unwrap());

        assert!(store.find_user_by_id(user.id).await.unwrap().is_none());
        assert!(store
            .find_user_by_email("bob@example.com")
            .await
            .unwrap()
            .is_none());
        assert!(store.list_users(None).await.unwrap().is_empty());

        // The email is free again once the account is gone.
        store.create_user(new_user("bob", Role::User)).await.unwrap();
    }

    #[tokio::test]
    async fn test_role_ban_and_profile_updates() {
        let store = create_test_store();
        let user = store.create_user(new_user("carol", Role::User)).await.unwrap();

        let promoted = store
            .set_user_role(user.id, Role::Moderator)
            .await
            .unwrap()
            .unwrap();
        assert_eq!(promoted.role, Role::Moderator);

        let banned = store.set_user_banned(user.id, true).await.unwrap().unwrap();
        assert!(banned.is_banned);

        let renamed = store
            .update_user_profile(user.id, "Carol", None)
            .await
            .unwrap()
            .unwrap();
        assert_eq!(renamed.name, "Carol");
        assert_eq!(renamed.email, "carol@example.com");

        assert!(store.set_user_banned(4242, true).await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_list_users_by_role() {
        let store = create_test_store();
        store.create_user(new_user("a", Role::Admin)).await.unwrap();
        store.create_user(new_user("m", Role::Moderator)).await.unwrap();
        store.create_user(new_user("u", Role::User)).await.unwrap();

        assert_eq!(store.list_users(None).await.unwrap().len(), 3);
        let moderators = store.list_users(Some(Role::Moderator)).await.unwrap();
        assert_eq!(moderators.len(), 1);
        assert_eq!(moderators[0].name, "m");
    }

    #[tokio::test]
    async fn test_group_membership() {
        let store = create_test_store();
        let alice = store.create_user(new_user("alice", Role::User)).await.unwrap();
        let bob = store.create_user(new_user("bob", Role::User)).await.unwrap();

        let group = store.create_group("ops").await.unwrap();
        assert!(matches!(
            store.create_group("ops").await.unwrap_err(),
            StoreError::Conflict(_)
        ));

        store.add_group_member(group.id, alice.id).await.unwrap();
        store.add_group_member(group.id, bob.id).await.unwrap();
        store.add_group_member(group.id, bob.id).await.unwrap();

        let groups = store.list_groups().await.unwrap();
        assert_eq!(groups.len(), 1);
        assert_eq!(groups[0].users.len(), 2);

        assert!(store.remove_group_member(group.id, bob.id).await.unwrap());
        assert!(!store.remove_group_member(group.id, bob.id).await.unwrap());

        let renamed = store.rename_group(group.id, "platform").await.unwrap().unwrap();
        assert_eq!(renamed.name, "platform");

        assert!(store.delete_group(group.id).await.unwrap());
        assert!(store.find_group(group.id).await.unwrap().is_none());
        assert!(store.list_groups().await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_activity_log_newest_first() {
        let store = create_test_store();
        let t0 = Utc::now();

        store.insert_activity_log(1, "first", t0).await.unwrap();
        store
            .insert_activity_log(1, "second", t0 + chrono::Duration::seconds(1))
            .await
            .unwrap();

        let logs = store.list_activity_logs().await.unwrap();
        assert_eq!(logs.len(), 2);
        assert_eq!(logs[0].action, "second");
        assert_eq!(logs[1].action, "first");
    }

    #[tokio::test]
    async fn test_timeout_waiting_for_connection_writes_nothing() {
        let store = SqliteStore::open_in_memory(Duration::from_millis(50)).unwrap();

        let held = store.conn.lock();
        let result = store.create_user(new_user("late", Role::User)).await;
        assert!(matches!(result, Err(StoreError::Timeout(_))));
        drop(held);

        assert!(store
            .find_user_by_email("late@example.com")
            .await
            .unwrap()
            .is_none());
        store.create_user(new_user("late", Role::User)).await.unwrap();
    }

    #[tokio::test]
    async fn test_file_database_persists_across_opens() {
        let temp_file = NamedTempFile::new().unwrap();
        let db_path = temp_file.path().to_str().unwrap().to_string();

        {
            let store = SqliteStore::open(&db_path, Duration::from_secs(5)).unwrap();
            store.create_user(new_user("dave", Role::User)).await.unwrap();
        }

        let reopened = SqliteStore::open(&db_path, Duration::from_secs(5)).unwrap();
        assert!(reopened
            .find_user_by_email("dave@example.com")
            .await
            .unwrap()
            .is_some());
        // Seeding is idempotent.
        assert_eq!(
            reopened
                .find_role_by_name(Role::Admin)
                .await
                .unwrap()
                .unwrap()
                .id,
            1
        );
    }
}
