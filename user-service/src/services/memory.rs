//! In-memory data source for tests and database-less local runs.
//!
//! Transactions are serialized: [`DataSource::begin`] waits for any other open
//! transaction, then works on a private copy of the state that replaces the
//! shared state on commit and is dropped on rollback. Autocommit writes wait
//! for the open transaction to finish, so a commit never overwrites them.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use std::collections::HashMap;
use std::sync::{Arc, Mutex, MutexGuard};
use uuid::Uuid;

use crate::models::{normalize_email, Identity, RefreshToken, UserProfile};
use crate::services::session::duplicate_email_message;
use crate::services::{
    DataSource, IdentityStore, PasswordPolicy, ProfileStore, RefreshTokenStore, ServiceError,
    Session, TransactionScope,
};

#[derive(Debug, Clone, Default)]
struct MemoryState {
    identities: HashMap<Uuid, Identity>,
    // Insertion order doubles as creation order for listing and paging
    profiles: Vec<UserProfile>,
    refresh_tokens: Vec<RefreshToken>,
}

type SharedState = Arc<Mutex<MemoryState>>;

fn lock(state: &Mutex<MemoryState>) -> Result<MutexGuard<'_, MemoryState>, ServiceError> {
    state
        .lock()
        .map_err(|e| ServiceError::Internal(anyhow::anyhow!("Memory store mutex poisoned: {}", e)))
}

#[derive(Clone)]
pub struct MemoryDataSource {
    state: SharedState,
    tx_gate: Arc<tokio::sync::Mutex<()>>,
    policy: PasswordPolicy,
}

impl Default for MemoryDataSource {
    fn default() -> Self {
        Self::new(PasswordPolicy::default())
    }
}

impl MemoryDataSource {
    pub fn new(policy: PasswordPolicy) -> Self {
        Self {
            state: Arc::new(Mutex::new(MemoryState::default())),
            tx_gate: Arc::new(tokio::sync::Mutex::new(())),
            policy,
        }
    }

    /// Committed refresh tokens of one identity, oldest first.
    pub fn refresh_tokens_for(&self, identity_id: Uuid) -> Result<Vec<RefreshToken>, ServiceError> {
        Ok(lock(&self.state)?
            .refresh_tokens
            .iter()
            .filter(|t| t.identity_id == identity_id)
            .cloned()
            .collect())
    }

    pub fn identity_count(&self) -> Result<usize, ServiceError> {
        Ok(lock(&self.state)?.identities.len())
    }

    pub fn profile_count(&self) -> Result<usize, ServiceError> {
        Ok(lock(&self.state)?.profiles.len())
    }
}

#[async_trait]
impl DataSource for MemoryDataSource {
    fn session(&self) -> Arc<dyn Session> {
        Arc::new(MemorySession {
            state: self.state.clone(),
            write_gate: Some(self.tx_gate.clone()),
            policy: self.policy.clone(),
        })
    }

    async fn begin(&self) -> Result<Box<dyn TransactionScope>, ServiceError> {
        let gate = self.tx_gate.clone().lock_owned().await;
        let snapshot = lock(&self.state)?.clone();

        Ok(Box::new(MemoryTransactionScope {
            shared: self.state.clone(),
            working: Arc::new(Mutex::new(snapshot)),
            policy: self.policy.clone(),
            _gate: gate,
        }))
    }

    async fn health_check(&self) -> Result<(), ServiceError> {
        lock(&self.state).map(|_| ())
    }
}

struct MemoryTransactionScope {
    shared: SharedState,
    working: SharedState,
    policy: PasswordPolicy,
    _gate: tokio::sync::OwnedMutexGuard<()>,
}

#[async_trait]
impl TransactionScope for MemoryTransactionScope {
    fn session(&self) -> Arc<dyn Session> {
        Arc::new(MemorySession {
            state: self.working.clone(),
            write_gate: None,
            policy: self.policy.clone(),
        })
    }

    async fn commit(self: Box<Self>) -> Result<(), ServiceError> {
        let committed = lock(&self.working)?.clone();
        *lock(&self.shared)? = committed;
        Ok(())
    }

    async fn rollback(self: Box<Self>) -> Result<(), ServiceError> {
        Ok(())
    }
}

struct MemorySession {
    state: SharedState,
    /// Set for autocommit sessions; transaction sessions already hold it.
    write_gate: Option<Arc<tokio::sync::Mutex<()>>>,
    policy: PasswordPolicy,
}

impl MemorySession {
    fn state(&self) -> Result<MutexGuard<'_, MemoryState>, ServiceError> {
        lock(&self.state)
    }

    async fn write_gate(&self) -> Option<tokio::sync::MutexGuard<'_, ()>> {
        match &self.write_gate {
            Some(gate) => Some(gate.lock().await),
            None => None,
        }
    }
}

#[async_trait]
impl IdentityStore for MemorySession {
    async fn find_identity_by_id(&self, id: Uuid) -> Result<Option<Identity>, ServiceError> {
        Ok(self.state()?.identities.get(&id).cloned())
    }

    async fn find_identity_by_email(&self, email: &str) -> Result<Option<Identity>, ServiceError> {
        let normalized = normalize_email(email);
        Ok(self
            .state()?
            .identities
            .values()
            .find(|i| i.normalized_email == normalized)
            .cloned())
    }

    async fn insert_identity(
        &self,
        identity: &Identity,
        profile: &UserProfile,
    ) -> Result<(), ServiceError> {
        let _gate = self.write_gate().await;
        let mut state = self.state()?;

        if state
            .identities
            .values()
            .any(|i| i.normalized_email == identity.normalized_email)
        {
            return Err(ServiceError::Creation(vec![duplicate_email_message(
                &identity.email,
            )]));
        }

        state.identities.insert(identity.id, identity.clone());
        state.profiles.push(profile.clone());
        Ok(())
    }

    async fn update_identity(&self, identity: &Identity) -> Result<(), ServiceError> {
        let _gate = self.write_gate().await;
        if let Some(existing) = self.state()?.identities.get_mut(&identity.id) {
            *existing = identity.clone();
        }
        Ok(())
    }

    async fn delete_identity(&self, id: Uuid) -> Result<bool, ServiceError> {
        let _gate = self.write_gate().await;
        let mut state = self.state()?;
        if state.identities.remove(&id).is_none() {
            return Ok(false);
        }
        state.profiles.retain(|p| p.identity_id != id);
        state.refresh_tokens.retain(|t| t.identity_id != id);
        Ok(true)
    }

    fn password_policy(&self) -> &PasswordPolicy {
        &self.policy
    }
}

#[async_trait]
impl RefreshTokenStore for MemorySession {
    async fn insert_refresh_token(&self, token: &RefreshToken) -> Result<(), ServiceError> {
        let _gate = self.write_gate().await;
        let mut state = self.state()?;
        if state
            .refresh_tokens
            .iter()
            .any(|t| t.token_hash == token.token_hash)
        {
            return Err(ServiceError::Internal(anyhow::anyhow!(
                "Refresh token hash collision"
            )));
        }
        state.refresh_tokens.push(token.clone());
        Ok(())
    }

    async fn find_refresh_token(
        &self,
        token: &str,
    ) -> Result<Option<(RefreshToken, Identity)>, ServiceError> {
        let hash = RefreshToken::hash_token(token);
        let state = self.state()?;

        Ok(state
            .refresh_tokens
            .iter()
            .find(|t| t.token_hash == hash)
            .and_then(|t| {
                state
                    .identities
                    .get(&t.identity_id)
                    .map(|identity| (t.clone(), identity.clone()))
            }))
    }

    async fn mark_refresh_token_used(
        &self,
        id: Uuid,
        now: DateTime<Utc>,
    ) -> Result<bool, ServiceError> {
        let _gate = self.write_gate().await;
        let mut state = self.state()?;
        match state
            .refresh_tokens
            .iter_mut()
            .find(|t| t.id == id && t.is_active_at(now))
        {
            Some(token) => {
                token.is_used = true;
                Ok(true)
            }
            None => Ok(false),
        }
    }

    async fn revoke_refresh_tokens(
        &self,
        identity_id: Uuid,
        now: DateTime<Utc>,
    ) -> Result<u64, ServiceError> {
        let _gate = self.write_gate().await;
        let mut state = self.state()?;
        let mut revoked = 0;
        for token in state
            .refresh_tokens
            .iter_mut()
            .filter(|t| t.identity_id == identity_id && !t.is_revoked && !t.is_expired_at(now))
        {
            token.revoke(now);
            revoked += 1;
        }
        Ok(revoked)
    }
}

#[async_trait]
impl ProfileStore for MemorySession {
    async fn list_profiles(&self) -> Result<Vec<UserProfile>, ServiceError> {
        Ok(self.state()?.profiles.clone())
    }

    async fn page_profiles(
        &self,
        page_index: u32,
        page_size: u32,
    ) -> Result<(Vec<UserProfile>, u64), ServiceError> {
        let state = self.state()?;
        let skip = page_index.saturating_sub(1) as usize * page_size as usize;

        let items = state
            .profiles
            .iter()
            .skip(skip)
            .take(page_size as usize)
            .cloned()
            .collect();

        Ok((items, state.profiles.len() as u64))
    }

    async fn find_profile(&self, id: Uuid) -> Result<Option<UserProfile>, ServiceError> {
        Ok(self.state()?.profiles.iter().find(|p| p.id == id).cloned())
    }

    async fn find_profile_by_identity(
        &self,
        identity_id: Uuid,
    ) -> Result<Option<UserProfile>, ServiceError> {
        Ok(self
            .state()?
            .profiles
            .iter()
            .find(|p| p.identity_id == identity_id)
            .cloned())
    }

    async fn update_profile(&self, profile: &UserProfile) -> Result<bool, ServiceError> {
        let _gate = self.write_gate().await;
        let mut state = self.state()?;
        match state.profiles.iter_mut().find(|p| p.id == profile.id) {
            Some(existing) => {
                *existing = profile.clone();
                Ok(true)
            }
            None => Ok(false),
        }
    }

    async fn delete_profile(&self, id: Uuid) -> Result<bool, ServiceError> {
        let _gate = self.write_gate().await;
        let mut state = self.state()?;
        let before = state.profiles.len();
        state.profiles.retain(|p| p.id != id);
        Ok(state.profiles.len() < before)
    }
}
