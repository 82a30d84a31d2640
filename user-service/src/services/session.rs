//! Storage seams used by the auth and user services.
//!
//! Every operation runs against a [`Session`]: either autocommit access to the
//! backing store, or the scope of one open transaction obtained from
//! [`DataSource::begin`].

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use std::sync::Arc;
use uuid::Uuid;

use crate::models::{Identity, NewIdentity, RefreshToken, UserProfile};
use crate::services::{PasswordPolicy, ServiceError};
use crate::utils::{hash_password, verify_password, Password, PasswordHashString};

#[async_trait]
pub trait IdentityStore: Send + Sync {
    async fn find_identity_by_id(&self, id: Uuid) -> Result<Option<Identity>, ServiceError>;

    /// Case-insensitive lookup by email.
    async fn find_identity_by_email(&self, email: &str) -> Result<Option<Identity>, ServiceError>;

    /// Persist a new identity together with its profile.
    ///
    /// A duplicate email surfaces as [`ServiceError::Creation`].
    async fn insert_identity(
        &self,
        identity: &Identity,
        profile: &UserProfile,
    ) -> Result<(), ServiceError>;

    async fn update_identity(&self, identity: &Identity) -> Result<(), ServiceError>;

    /// Delete an identity and everything hanging off it (profile, refresh tokens).
    async fn delete_identity(&self, id: Uuid) -> Result<bool, ServiceError>;

    fn password_policy(&self) -> &PasswordPolicy;

    async fn check_password(
        &self,
        identity: &Identity,
        password: &str,
    ) -> Result<bool, ServiceError> {
        Ok(verify_password(
            &Password::new(password),
            &PasswordHashString::new(identity.password_hash.clone()),
        ))
    }

    /// Create an identity with a hashed password, enforcing the password policy
    /// and email uniqueness. All failures are reported together.
    async fn create_identity(
        &self,
        new_identity: NewIdentity,
        password: &str,
    ) -> Result<(Identity, UserProfile), ServiceError> {
        let mut errors = self.password_policy().violations(password);

        if self
            .find_identity_by_email(&new_identity.email)
            .await?
            .is_some()
        {
            errors.push(duplicate_email_message(&new_identity.email));
        }

        if !errors.is_empty() {
            return Err(ServiceError::Creation(errors));
        }

        let password_hash = hash_password(&Password::new(password))?;
        let identity = Identity::new(
            new_identity.email,
            new_identity.phone_number,
            password_hash.into_string(),
        );
        let profile = UserProfile::new(identity.id, new_identity.profile);

        self.insert_identity(&identity, &profile).await?;

        Ok((identity, profile))
    }
}

#[async_trait]
pub trait RefreshTokenStore: Send + Sync {
    async fn insert_refresh_token(&self, token: &RefreshToken) -> Result<(), ServiceError>;

    /// Look up a token by its plaintext value, returning it with its owner.
    async fn find_refresh_token(
        &self,
        token: &str,
    ) -> Result<Option<(RefreshToken, Identity)>, ServiceError>;

    /// Mark a token used, but only if it is still active at `now`.
    ///
    /// Returns `false` when another request consumed, revoked or outlived it first.
    async fn mark_refresh_token_used(
        &self,
        id: Uuid,
        now: DateTime<Utc>,
    ) -> Result<bool, ServiceError>;

    /// Revoke every unrevoked, unexpired token of an identity. Returns how many changed.
    async fn revoke_refresh_tokens(
        &self,
        identity_id: Uuid,
        now: DateTime<Utc>,
    ) -> Result<u64, ServiceError>;
}

#[async_trait]
pub trait ProfileStore: Send + Sync {
    async fn list_profiles(&self) -> Result<Vec<UserProfile>, ServiceError>;

    /// One page of profiles in creation order, plus the total count.
    async fn page_profiles(
        &self,
        page_index: u32,
        page_size: u32,
    ) -> Result<(Vec<UserProfile>, u64), ServiceError>;

    async fn find_profile(&self, id: Uuid) -> Result<Option<UserProfile>, ServiceError>;

    async fn find_profile_by_identity(
        &self,
        identity_id: Uuid,
    ) -> Result<Option<UserProfile>, ServiceError>;

    async fn update_profile(&self, profile: &UserProfile) -> Result<bool, ServiceError>;

    async fn delete_profile(&self, id: Uuid) -> Result<bool, ServiceError>;
}

/// Everything a request handler may touch.
pub trait Session: IdentityStore + RefreshTokenStore + ProfileStore {}

impl<T> Session for T where T: IdentityStore + RefreshTokenStore + ProfileStore {}

/// One open transaction. Dropping it without committing discards its writes.
#[async_trait]
pub trait TransactionScope: Send {
    fn session(&self) -> Arc<dyn Session>;

    async fn commit(self: Box<Self>) -> Result<(), ServiceError>;

    async fn rollback(self: Box<Self>) -> Result<(), ServiceError>;
}

/// Backing store: hands out autocommit sessions and transaction scopes.
#[async_trait]
pub trait DataSource: Send + Sync {
    fn session(&self) -> Arc<dyn Session>;

    async fn begin(&self) -> Result<Box<dyn TransactionScope>, ServiceError>;

    async fn health_check(&self) -> Result<(), ServiceError>;
}

pub(crate) fn duplicate_email_message(email: &str) -> String {
    format!("Username '{}' is already taken.", email)
}
