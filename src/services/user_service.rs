use std::sync::Arc;

use tracing::info;

use crate::db::UserRepository;
use crate::error::{AppError, AppResult};
use crate::models::{NewUser, User, UserChanges, UserCreate, UserUpdate, EMAIL_MAX_LEN};
use crate::services::auth_service::hash_password;

/// User CRUD on top of a [`UserRepository`].
#[derive(Clone)]
pub struct UserService {
    repo: Arc<dyn UserRepository>,
}

impl UserService {
    pub fn new(repo: Arc<dyn UserRepository>) -> Self {
        Self { repo }
    }

    pub async fn get(&self, id: i64) -> AppResult<User> {
        self.repo
            .get(id)
            .await?
            .ok_or_else(|| AppError::NotFound("User not found".to_string()))
    }

    pub async fn get_by_email(&self, email: &str) -> AppResult<Option<User>> {
        self.repo.get_by_email(email).await
    }

    pub async fn create(&self, input: UserCreate) -> AppResult<User> {
        validate_email(&input.email)?;
        validate_password(&input.password)?;

        // Fast path only; the unique constraint decides under concurrency.
        if self.repo.get_by_email(&input.email).await?.is_some() {
            return Err(AppError::Conflict("Email already registered".to_string()));
        }

        let user = self
            .repo
            .insert(NewUser {
                email: input.email,
                hashed_password: hash_password(&input.password)?,
            })
            .await?;
        info!(user_id = user.id, "Created user");
        Ok(user)
    }

    /// Applies the fields present in `patch` to the stored row of `existing`.
    /// Columns the patch leaves out are not written.
    pub async fn update(&self, existing: User, patch: UserUpdate) -> AppResult<User> {
        if patch.is_empty() {
            return Ok(existing);
        }

        let mut changes = UserChanges::default();
        if let Some(email) = patch.email {
            if email != existing.email {
                validate_email(&email)?;
                if self.repo.get_by_email(&email).await?.is_some() {
                    return Err(AppError::Conflict("Email already registered".to_string()));
                }
                changes.email = Some(email);
            }
        }
        if let Some(password) = patch.password {
            validate_password(&password)?;
            changes.hashed_password = Some(hash_password(&password)?);
        }
        changes.is_active = patch.is_active;

        if changes == UserChanges::default() {
            return Ok(existing);
        }

        let saved = self.repo.update_fields(existing.id, changes).await?;
        info!(user_id = saved.id, "Updated user");
        Ok(saved)
    }

    pub async fn delete(&self, existing: &User) -> AppResult<()> {
        if !self.repo.delete(existing.id).await? {
            return Err(AppError::NotFound("User not found".to_string()));
        }
        info!(user_id = existing.id, "Deleted user");
        Ok(())
    }
}

fn validate_email(email: &str) -> AppResult<()> {
    if email.trim().is_empty() || !email.contains('@') {
        return Err(AppError::InvalidInput("A valid email is required".to_string()));
    }
    if email.chars().count() > EMAIL_MAX_LEN {
        return Err(AppError::InvalidInput(format!(
            "Email must be at most {EMAIL_MAX_LEN} characters"
        )));
    }
    Ok(())
}

fn validate_password(password: &str) -> AppResult<()> {
    if password.is_empty() {
        return Err(AppError::InvalidInput("Password must not be empty".to_string()));
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::memory::MemoryUserRepository;
    use crate::services::auth_service::verify_password;

    fn service() -> UserService {
        UserService::new(Arc::new(MemoryUserRepository::new()))
    }

    fn input(email: &str) -> UserCreate {
        UserCreate {
            email: email.to_string(),
            password: "secreto1".to_string(),
        }
    }

    #[tokio::test]
    async fn test_create_hashes_password() {
        let users = service();
        let user = users.create(input("ana@pyme.mx")).await.unwrap();

        assert_ne!(user.hashed_password, "secreto1");
        assert!(verify_password("secreto1", &user.hashed_password));
        assert!(user.is_active);
        assert!(!user.is_admin);
    }

    #[tokio::test]
    async fn test_concurrent_creates_admit_one() {
        let users = service();
        let attempts = (0..8).map(|_| {
            let users = users.clone();
            tokio::spawn(async move { users.create(input("dup@pyme.mx")).await })
        });

        let mut created = 0;
        for handle in attempts {
            match handle.await.unwrap() {
                Ok(_) => created += 1,
                Err(e) => assert!(matches!(e, AppError::Conflict(_))),
            }
        }
        assert_eq!(created, 1);
    }

    #[tokio::test]
    async fn test_get_by_email_is_case_sensitive() {
        let users = service();
        users.create(input("Ana@Pyme.mx")).await.unwrap();

        let found = users.get_by_email("Ana@Pyme.mx").await.unwrap().unwrap();
        assert_eq!(found.email, "Ana@Pyme.mx");
        assert!(users.get_by_email("ana@pyme.mx").await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_empty_patch_changes_nothing() {
        let users = service();
        let user = users.create(input("ana@pyme.mx")).await.unwrap();

        let updated = users
            .update(user.clone(), UserUpdate::default())
            .await
            .unwrap();
        assert_eq!(updated, user);
        assert_eq!(users.get(user.id).await.unwrap(), user);
    }

    #[tokio::test]
    async fn test_deactivate_only_touches_is_active() {
        let users = service();
        let user = users.create(input("ana@pyme.mx")).await.unwrap();

        let patch = UserUpdate {
            is_active: Some(false),
            ..Default::default()
        };
        let updated = users.update(user.clone(), patch).await.unwrap();

        assert!(!updated.is_active);
        assert_eq!(updated.email, user.email);
        assert_eq!(updated.hashed_password, user.hashed_password);
        assert_eq!(updated.is_admin, user.is_admin);
    }

    #[tokio::test]
    async fn test_stale_copy_does_not_undo_other_fields() {
        let users = service();
        let user = users.create(input("ana@pyme.mx")).await.unwrap();
        let stale = users.get(user.id).await.unwrap();

        let deactivate = UserUpdate {
            is_active: Some(false),
            ..Default::default()
        };
        users.update(user, deactivate).await.unwrap();

        let new_password = UserUpdate {
            password: Some("otra-clave".to_string()),
            ..Default::default()
        };
        let updated = users.update(stale, new_password).await.unwrap();

        assert!(!updated.is_active);
        assert!(verify_password("otra-clave", &updated.hashed_password));
        assert!(!users.get(updated.id).await.unwrap().is_active);
    }

    #[tokio::test]
    async fn test_update_of_removed_user_is_not_found() {
        let users = service();
        let user = users.create(input("ana@pyme.mx")).await.unwrap();
        users.delete(&user).await.unwrap();

        let patch = UserUpdate {
            is_active: Some(false),
            ..Default::default()
        };
        assert!(matches!(
            users.update(user, patch).await,
            Err(AppError::NotFound(_))
        ));
    }

    #[tokio::test]
    async fn test_email_change_to_taken_address_conflicts() {
        let users = service();
        users.create(input("ana@pyme.mx")).await.unwrap();
        let luis = users.create(input("luis@pyme.mx")).await.unwrap();

        let patch = UserUpdate {
            email: Some("ana@pyme.mx".to_string()),
            ..Default::default()
        };
        let err = users.update(luis, patch).await.unwrap_err();
        assert!(matches!(err, AppError::Conflict(_)));
    }

    #[tokio::test]
    async fn test_delete_twice_is_not_found() {
        let users = service();
        let user = users.create(input("ana@pyme.mx")).await.unwrap();

        users.delete(&user).await.unwrap();
        assert!(matches!(users.delete(&user).await, Err(AppError::NotFound(_))));
        assert!(matches!(users.get(user.id).await, Err(AppError::NotFound(_))));
    }

    #[tokio::test]
    async fn test_rejects_invalid_input() {
        let users = service();
        assert!(matches!(
            users.create(input("not-an-email")).await,
            Err(AppError::InvalidInput(_))
        ));
        let long = format!("{}@pyme.mx", "a".repeat(EMAIL_MAX_LEN));
        assert!(matches!(
            users.create(input(&long)).await,
            Err(AppError::InvalidInput(_))
        ));
    }
}
