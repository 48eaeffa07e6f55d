//! In-process `UserRepository` for tests.

use std::collections::BTreeMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Mutex;

use async_trait::async_trait;

use crate::db::UserRepository;
use crate::error::{AppError, AppResult};
use crate::models::{NewUser, User, UserChanges};

#[derive(Default)]
pub struct MemoryUserRepository {
    rows: Mutex<Rows>,
    offline: AtomicBool,
}

#[derive(Default)]
struct Rows {
    next_id: i64,
    users: BTreeMap<i64, User>,
}

impl MemoryUserRepository {
    pub fn new() -> Self {
        Self::default()
    }

    /// Makes every call fail as if the database were unreachable.
    pub fn set_offline(&self, offline: bool) {
        self.offline.store(offline, Ordering::SeqCst);
    }

    fn check_online(&self) -> AppResult<()> {
        if self.offline.load(Ordering::SeqCst) {
            return Err(AppError::Database(sqlx::Error::PoolTimedOut));
        }
        Ok(())
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, Rows> {
        self.rows.lock().unwrap_or_else(|e| e.into_inner())
    }
}

fn duplicate() -> AppError {
    AppError::Conflict("Email already registered".to_string())
}

#[async_trait]
impl UserRepository for MemoryUserRepository {
    async fn get(&self, id: i64) -> AppResult<Option<User>> {
        self.check_online()?;
        Ok(self.lock().users.get(&id).cloned())
    }

    async fn get_by_email(&self, email: &str) -> AppResult<Option<User>> {
        self.check_online()?;
        Ok(self.lock().users.values().find(|u| u.email == email).cloned())
    }

    async fn insert(&self, user: NewUser) -> AppResult<User> {
        self.check_online()?;
        let mut rows = self.lock();
        if rows.users.values().any(|u| u.email == user.email) {
            return Err(duplicate());
        }
        rows.next_id += 1;
        let created = User {
            id: rows.next_id,
            email: user.email,
            hashed_password: user.hashed_password,
            is_active: true,
            is_admin: false,
        };
        rows.users.insert(created.id, created.clone());
        Ok(created)
    }

    async fn update_fields(&self, id: i64, changes: UserChanges) -> AppResult<User> {
        self.check_online()?;
        let mut rows = self.lock();
        if let Some(email) = &changes.email {
            if rows.users.values().any(|u| u.id != id && &u.email == email) {
                return Err(duplicate());
            }
        }
        let row = rows
            .users
            .get_mut(&id)
            .ok_or_else(|| AppError::NotFound("User not found".to_string()))?;
        if let Some(email) = changes.email {
            row.email = email;
        }
        if let Some(hashed_password) = changes.hashed_password {
            row.hashed_password = hashed_password;
        }
        if let Some(is_active) = changes.is_active {
            row.is_active = is_active;
        }
        Ok(row.clone())
    }

    async fn delete(&self, id: i64) -> AppResult<bool> {
        self.check_online()?;
        Ok(self.lock().users.remove(&id).is_some())
    }

    async fn ping(&self) -> AppResult<()> {
        self.check_online()
    }
}
