use std::sync::Arc;

use argon2::{
    Argon2,
    password_hash::{PasswordHash, PasswordHasher, PasswordVerifier, SaltString, rand_core::OsRng},
};
use chrono::Utc;
use uuid::Uuid;

use crate::{
    error::AppError,
    models::User,
    rbac::{PermissionSet, Role, RoleCatalog},
    repository::RepositoryState,
};

/// CredentialStore
///
/// Identity lifecycle on top of the repository: lookup, creation with a hashed secret and a
/// permission snapshot taken from the shared `RoleCatalog`, and secret verification.
#[derive(Clone)]
pub struct CredentialStore {
    repo: RepositoryState,
    catalog: Arc<RoleCatalog>,
}

impl CredentialStore {
    pub fn new(repo: RepositoryState, catalog: Arc<RoleCatalog>) -> Self {
        Self { repo, catalog }
    }

    pub async fn find_by_username(&self, username: &str) -> Result<Option<User>, AppError> {
        Ok(self.repo.find_user_by_username(username).await?)
    }

    /// create
    ///
    /// Registers a new identity. `role` defaults to the catalog's default role and
    /// `permissions` to that role's baseline. An explicit `permissions` override is stored
    /// as given, even beyond the baseline; that case is logged.
    ///
    /// Fails with `Conflict` if the username is taken, leaving the store unchanged.
    pub async fn create(
        &self,
        username: &str,
        secret: &str,
        role: Option<Role>,
        permissions: Option<PermissionSet>,
    ) -> Result<User, AppError> {
        let username = username.trim();
        if username.is_empty() || secret.is_empty() {
            return Err(AppError::Validation(
                "Username and password are required".to_string(),
            ));
        }

        let role = role.unwrap_or_else(|| self.catalog.default_role());
        let permissions = match permissions {
            Some(granted) => {
                if self.catalog.exceeds_baseline(role, &granted) {
                    tracing::warn!(
                        username,
                        role = %role,
                        granted = ?granted,
                        "registration override grants permissions beyond the role baseline"
                    );
                }
                granted
            }
            None => self.catalog.permissions_for(role),
        };

        let user = User {
            id: Uuid::new_v4(),
            username: username.to_string(),
            password_hash: hash_secret(secret)?,
            role,
            permissions,
            created_at: Utc::now(),
        };

        let created = self.repo.insert_user(user).await?;
        tracing::info!(user_id = %created.id, role = %created.role, "identity registered");
        Ok(created)
    }

    /// verify_secret
    ///
    /// One-way, constant-time comparison of `candidate` against the stored hash. An
    /// unparsable stored hash never matches.
    pub fn verify_secret(&self, user: &User, candidate: &str) -> bool {
        verify_secret(&user.password_hash, candidate)
    }

    /// authenticate
    ///
    /// Login check shared by the login and token endpoints. Unknown user and wrong secret
    /// produce the same error.
    pub async fn authenticate(&self, username: &str, secret: &str) -> Result<User, AppError> {
        match self.find_by_username(username.trim()).await? {
            Some(user) if self.verify_secret(&user, secret) => Ok(user),
            _ => Err(AppError::invalid_credentials()),
        }
    }
}

fn hash_secret(secret: &str) -> Result<String, AppError> {
    let salt = SaltString::generate(&mut OsRng);
    Argon2::default()
        .hash_password(secret.as_bytes(), &salt)
        .map(|hash| hash.to_string())
        .map_err(|e| {
            tracing::error!("password hashing failed: {}", e);
            AppError::Internal
        })
}

fn verify_secret(stored: &str, candidate: &str) -> bool {
    match PasswordHash::new(stored) {
        Ok(parsed) => Argon2::default()
            .verify_password(candidate.as_bytes(), &parsed)
            .is_ok(),
        Err(e) => {
            tracing::error!("stored password hash is unparsable: {}", e);
            false
        }
    }
}
