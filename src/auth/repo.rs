use anyhow::Context;
use async_trait::async_trait;
use sqlx::PgPool;
use thiserror::Error;
use tracing::warn;

use crate::auth::repo_types::{NewUser, User};

/// Column guarded by a unique constraint.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum UniqueField {
    Username,
    Email,
}

#[derive(Debug, Error)]
pub enum CreateUserError {
    #[error("duplicate {0:?}")]
    Duplicate(UniqueField),
    #[error(transparent)]
    Other(#[from] anyhow::Error),
}

#[async_trait]
pub trait UserStore: Send + Sync {
    async fn find_by_id(&self, id: i64) -> anyhow::Result<Option<User>>;
    async fn find_by_username(&self, username: &str) -> anyhow::Result<Option<User>>;
    async fn find_by_email(&self, email: &str) -> anyhow::Result<Option<User>>;
    /// Inserts a user. Unique-constraint violations come back as
    /// `CreateUserError::Duplicate` after the write has been rolled back.
    async fn create(&self, new: NewUser<'_>) -> Result<User, CreateUserError>;
}

#[derive(Clone)]
pub struct PgUserStore {
    db: PgPool,
}

impl PgUserStore {
    pub fn new(db: PgPool) -> Self {
        Self { db }
    }
}

const USER_COLUMNS: &str = "id, username, email, password_hash, is_active, created_at";

#[async_trait]
impl UserStore for PgUserStore {
    async fn find_by_id(&self, id: i64) -> anyhow::Result<Option<User>> {
        let user = sqlx::query_as::<_, User>(&format!(
            "SELECT {USER_COLUMNS} FROM users WHERE id = $1"
        ))
        .bind(id)
        .fetch_optional(&self.db)
        .await
        .context("find user by id")?;
        Ok(user)
    }

    async fn find_by_username(&self, username: &str) -> anyhow::Result<Option<User>> {
        let user = sqlx::query_as::<_, User>(&format!(
            "SELECT {USER_COLUMNS} FROM users WHERE username = $1"
        ))
        .bind(username)
        .fetch_optional(&self.db)
        .await
        .context("find user by username")?;
        Ok(user)
    }

    async fn find_by_email(&self, email: &str) -> anyhow::Result<Option<User>> {
        let user = sqlx::query_as::<_, User>(&format!(
            "SELECT {USER_COLUMNS} FROM users WHERE email = $1"
        ))
        .bind(email)
        .fetch_optional(&self.db)
        .await
        .context("find user by email")?;
        Ok(user)
    }

    async fn create(&self, new: NewUser<'_>) -> Result<User, CreateUserError> {
        let mut tx = self.db.begin().await.context("begin tx")?;

        let inserted = sqlx::query_as::<_, User>(&format!(
            r#"
            INSERT INTO users (username, email, password_hash)
            VALUES ($1, $2, $3)
            RETURNING {USER_COLUMNS}
            "#
        ))
        .bind(new.username)
        .bind(new.email)
        .bind(new.password_hash)
        .fetch_one(&mut *tx)
        .await;

        match inserted {
            Ok(user) => {
                tx.commit().await.context("commit tx")?;
                Ok(user)
            }
            Err(e) => {
                if let Err(rb) = tx.rollback().await {
                    warn!(error = %rb, "rollback after failed insert");
                }
                Err(classify_insert_error(e))
            }
        }
    }
}

fn classify_insert_error(e: sqlx::Error) -> CreateUserError {
    if let sqlx::Error::Database(db_err) = &e {
        if db_err.is_unique_violation() {
            return CreateUserError::Duplicate(violated_field(
                db_err.constraint(),
                db_err.message(),
            ));
        }
    }
    CreateUserError::Other(anyhow::Error::new(e).context("insert user"))
}

/// Maps a unique violation back to its column: `users_email_key` is the
/// email, `users_username_key` the username. Without a constraint name the
/// driver message is searched instead.
fn violated_field(constraint: Option<&str>, message: &str) -> UniqueField {
    let names_email = constraint
        .map(|c| c.contains("email"))
        .unwrap_or_else(|| message.contains("email"));
    if names_email {
        UniqueField::Email
    } else {
        UniqueField::Username
    }
}


#[cfg(test)]
pub(crate) mod memory {
    //! In-process `UserStore` with the same uniqueness rules as the table.

    use std::sync::Mutex;

    use time::OffsetDateTime;

    use super::*;

    #[derive(Default)]
    pub struct MemoryUserStore {
        inner: Mutex<Inner>,
    }

    #[derive(Default)]
    struct Inner {
        rows: Vec<User>,
        last_id: i64,
    }

    impl MemoryUserStore {
        pub fn count(&self) -> usize {
            self.inner.lock().unwrap().rows.len()
        }

        pub fn set_active(&self, id: i64, active: bool) {
            let mut inner = self.inner.lock().unwrap();
            if let Some(u) = inner.rows.iter_mut().find(|u| u.id == id) {
                u.is_active = active;
            }
        }

        pub fn delete(&self, id: i64) {
            self.inner.lock().unwrap().rows.retain(|u| u.id != id);
        }
    }

    #[async_trait]
    impl UserStore for MemoryUserStore {
        async fn find_by_id(&self, id: i64) -> anyhow::Result<Option<User>> {
            let inner = self.inner.lock().unwrap();
            Ok(inner.rows.iter().find(|u| u.id == id).cloned())
        }

        async fn find_by_username(&self, username: &str) -> anyhow::Result<Option<User>> {
            let inner = self.inner.lock().unwrap();
            Ok(inner.rows.iter().find(|u| u.username == username).cloned())
        }

        async fn find_by_email(&self, email: &str) -> anyhow::Result<Option<User>> {
            let inner = self.inner.lock().unwrap();
            Ok(inner.rows.iter().find(|u| u.email == email).cloned())
        }

        async fn create(&self, new: NewUser<'_>) -> Result<User, CreateUserError> {
            let mut inner = self.inner.lock().unwrap();
            if inner.rows.iter().any(|u| u.username == new.username) {
                return Err(CreateUserError::Duplicate(UniqueField::Username));
            }
            if inner.rows.iter().any(|u| u.email == new.email) {
                return Err(CreateUserError::Duplicate(UniqueField::Email));
            }
            if new.password_hash.is_empty() {
                return Err(anyhow::anyhow!("password_hash violates check constraint").into());
            }
            inner.last_id += 1;
            let user = User {
                id: inner.last_id,
                username: new.username.to_string(),
                email: new.email.to_string(),
                password_hash: new.password_hash.to_string(),
                is_active: true,
                created_at: OffsetDateTime::now_utc(),
            };
            inner.rows.push(user.clone());
            Ok(user)
        }
    }

    #[tokio::test]
    async fn enforces_unique_username_and_email() {
        let store = MemoryUserStore::default();
        let first = store
            .create(NewUser {
                username: "alice",
                email: "alice@example.com",
                password_hash: "h",
            })
            .await
            .unwrap();
        assert_eq!(first.id, 1);
        assert!(first.is_active);

        let dup_name = store
            .create(NewUser {
                username: "alice",
                email: "other@example.com",
                password_hash: "h",
            })
            .await
            .unwrap_err();
        assert!(matches!(
            dup_name,
            CreateUserError::Duplicate(UniqueField::Username)
        ));

        let dup_email = store
            .create(NewUser {
                username: "bob",
                email: "alice@example.com",
                password_hash: "h",
            })
            .await
            .unwrap_err();
        assert!(matches!(dup_email, CreateUserError::Duplicate(UniqueField::Email)));
        assert_eq!(store.count(), 1);
    }

    #[tokio::test]
    async fn ids_are_not_reused_after_delete() {
        let store = MemoryUserStore::default();
        let a = store
            .create(NewUser {
                username: "a",
                email: "a@example.com",
                password_hash: "h",
            })
            .await
            .unwrap();
        store.delete(a.id);
        let b = store
            .create(NewUser {
                username: "b",
                email: "b@example.com",
                password_hash: "h",
            })
            .await
            .unwrap();
        assert!(b.id > a.id);
        assert!(store.find_by_id(a.id).await.unwrap().is_none());
    }
}
