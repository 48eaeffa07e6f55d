use async_trait::async_trait;
use sqlx::PgPool;

use crate::error::{AppError, AppResult};
use crate::models::{NewUser, User, UserChanges};

/// Storage for user accounts. The store's unique constraint on `email` is
/// authoritative; callers may pre-check but must handle `Conflict` on insert.
#[async_trait]
pub trait UserRepository: Send + Sync {
    async fn get(&self, id: i64) -> AppResult<Option<User>>;

    /// Exact, case-sensitive match.
    async fn get_by_email(&self, email: &str) -> AppResult<Option<User>>;

    async fn insert(&self, user: NewUser) -> AppResult<User>;

    /// Writes only the columns set in `changes`; `NotFound` if the row is gone.
    async fn update_fields(&self, id: i64, changes: UserChanges) -> AppResult<User>;

    /// Returns whether a row was removed.
    async fn delete(&self, id: i64) -> AppResult<bool>;

    async fn ping(&self) -> AppResult<()>;
}

#[derive(Clone)]
pub struct PgUserRepository {
    pool: PgPool,
}

impl PgUserRepository {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }
}

#[async_trait]
impl UserRepository for PgUserRepository {
    async fn get(&self, id: i64) -> AppResult<Option<User>> {
        let user = sqlx::query_as::<_, User>(
            "SELECT id, email, hashed_password, is_active, is_admin FROM users WHERE id = $1",
        )
        .bind(id)
        .fetch_optional(&self.pool)
        .await?;
        Ok(user)
    }

    async fn get_by_email(&self, email: &str) -> AppResult<Option<User>> {
        let user = sqlx::query_as::<_, User>(
            "SELECT id, email, hashed_password, is_active, is_admin FROM users WHERE email = $1",
        )
        .bind(email)
        .fetch_optional(&self.pool)
        .await?;
        Ok(user)
    }

    async fn insert(&self, user: NewUser) -> AppResult<User> {
        let created = sqlx::query_as::<_, User>(
            r#"
            INSERT INTO users (email, hashed_password)
            VALUES ($1, $2)
            RETURNING id, email, hashed_password, is_active, is_admin
            "#,
        )
        .bind(&user.email)
        .bind(&user.hashed_password)
        .fetch_one(&self.pool)
        .await?;
        Ok(created)
    }

    async fn update_fields(&self, id: i64, changes: UserChanges) -> AppResult<User> {
        sqlx::query_as::<_, User>(
            r#"
            UPDATE users
            SET email = COALESCE($2, email),
                hashed_password = COALESCE($3, hashed_password),
                is_active = COALESCE($4, is_active)
            WHERE id = $1
            RETURNING id, email, hashed_password, is_active, is_admin
            "#,
        )
        .bind(id)
        .bind(changes.email)
        .bind(changes.hashed_password)
        .bind(changes.is_active)
        .fetch_optional(&self.pool)
        .await?
        .ok_or_else(|| AppError::NotFound("User not found".to_string()))
    }

    async fn delete(&self, id: i64) -> AppResult<bool> {
        let result = sqlx::query("DELETE FROM users WHERE id = $1")
            .bind(id)
            .execute(&self.pool)
            .await?;
        Ok(result.rows_affected() > 0)
    }

    async fn ping(&self) -> AppResult<()> {
        sqlx::query("SELECT 1").execute(&self.pool).await?;
        Ok(())
    }
}
