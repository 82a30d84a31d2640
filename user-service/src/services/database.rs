//! PostgreSQL data source.
//!
//! Sessions either borrow a pooled connection per statement (autocommit) or
//! share one open transaction for the lifetime of a unit of work.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use sqlx::pool::PoolConnection;
use sqlx::postgres::{PgConnection, PgPool, Postgres};
use sqlx::{FromRow, Transaction};
use std::sync::Arc;
use tokio::sync::{Mutex, MutexGuard};
use uuid::Uuid;

use crate::models::{normalize_email, Identity, RefreshToken, UserProfile};
use crate::services::session::duplicate_email_message;
use crate::services::{
    DataSource, IdentityStore, PasswordPolicy, ProfileStore, RefreshTokenStore, ServiceError,
    Session, TransactionScope,
};

type SharedTransaction = Arc<Mutex<Option<Transaction<'static, Postgres>>>>;

/// PostgreSQL database wrapper.
#[derive(Clone)]
pub struct Database {
    pool: PgPool,
    policy: PasswordPolicy,
}

impl Database {
    /// Create a new database wrapper from a connection pool.
    pub fn new(pool: PgPool, policy: PasswordPolicy) -> Self {
        Self { pool, policy }
    }
}

#[async_trait]
impl DataSource for Database {
    fn session(&self) -> Arc<dyn Session> {
        Arc::new(PgSession {
            executor: SessionExecutor::Pool(self.pool.clone()),
            policy: self.policy.clone(),
        })
    }

    async fn begin(&self) -> Result<Box<dyn TransactionScope>, ServiceError> {
        let tx = self.pool.begin().await?;
        let shared: SharedTransaction = Arc::new(Mutex::new(Some(tx)));

        let session = Arc::new(PgSession {
            executor: SessionExecutor::Transaction(shared.clone()),
            policy: self.policy.clone(),
        });

        Ok(Box::new(PgTransactionScope {
            tx: shared,
            session,
        }))
    }

    async fn health_check(&self) -> Result<(), ServiceError> {
        sqlx::query("SELECT 1")
            .execute(&self.pool)
            .await
            .map_err(|e| {
                tracing::error!("Database health check failed: {}", e);
                ServiceError::Database(e)
            })?;
        Ok(())
    }
}

struct PgTransactionScope {
    tx: SharedTransaction,
    session: Arc<PgSession>,
}

impl PgTransactionScope {
    async fn take(&self) -> Result<Transaction<'static, Postgres>, ServiceError> {
        self.tx
            .lock()
            .await
            .take()
            .ok_or_else(|| ServiceError::Internal(anyhow::anyhow!("Transaction already finished")))
    }
}

#[async_trait]
impl TransactionScope for PgTransactionScope {
    fn session(&self) -> Arc<dyn Session> {
        self.session.clone()
    }

    async fn commit(self: Box<Self>) -> Result<(), ServiceError> {
        self.take().await?.commit().await?;
        Ok(())
    }

    async fn rollback(self: Box<Self>) -> Result<(), ServiceError> {
        self.take().await?.rollback().await?;
        Ok(())
    }
}

enum SessionExecutor {
    Pool(PgPool),
    Transaction(SharedTransaction),
}

/// Connection checked out for one statement.
enum SessionConnection<'a> {
    Pooled(PoolConnection<Postgres>),
    Transaction(MutexGuard<'a, Option<Transaction<'static, Postgres>>>),
}

impl SessionConnection<'_> {
    fn get(&mut self) -> Result<&mut PgConnection, ServiceError> {
        match self {
            SessionConnection::Pooled(conn) => Ok(&mut **conn),
            SessionConnection::Transaction(guard) => guard.as_deref_mut().ok_or_else(|| {
                ServiceError::Internal(anyhow::anyhow!("Transaction already finished"))
            }),
        }
    }
}

struct PgSession {
    executor: SessionExecutor,
    policy: PasswordPolicy,
}

impl PgSession {
    async fn connection(&self) -> Result<SessionConnection<'_>, ServiceError> {
        match &self.executor {
            SessionExecutor::Pool(pool) => Ok(SessionConnection::Pooled(pool.acquire().await?)),
            SessionExecutor::Transaction(tx) => Ok(SessionConnection::Transaction(tx.lock().await)),
        }
    }
}

/// Refresh token row joined with its owning identity.
#[derive(FromRow)]
struct RefreshTokenWithIdentity {
    #[sqlx(flatten)]
    token: RefreshToken,
    identity_email: String,
    identity_normalized_email: String,
    identity_phone_number: Option<String>,
    identity_password_hash: String,
    identity_created_at: DateTime<Utc>,
    identity_updated_at: DateTime<Utc>,
}

impl RefreshTokenWithIdentity {
    fn split(self) -> (RefreshToken, Identity) {
        let identity = Identity {
            id: self.token.identity_id,
            email: self.identity_email,
            normalized_email: self.identity_normalized_email,
            phone_number: self.identity_phone_number,
            password_hash: self.identity_password_hash,
            created_at: self.identity_created_at,
            updated_at: self.identity_updated_at,
        };
        (self.token, identity)
    }
}

#[async_trait]
impl IdentityStore for PgSession {
    async fn find_identity_by_id(&self, id: Uuid) -> Result<Option<Identity>, ServiceError> {
        let mut conn = self.connection().await?;
        let identity = sqlx::query_as::<_, Identity>("SELECT * FROM identities WHERE id = $1")
            .bind(id)
            .fetch_optional(conn.get()?)
            .await?;
        Ok(identity)
    }

    async fn find_identity_by_email(&self, email: &str) -> Result<Option<Identity>, ServiceError> {
        let mut conn = self.connection().await?;
        let identity =
            sqlx::query_as::<_, Identity>("SELECT * FROM identities WHERE normalized_email = $1")
                .bind(normalize_email(email))
                .fetch_optional(conn.get()?)
                .await?;
        Ok(identity)
    }

    async fn insert_identity(
        &self,
        identity: &Identity,
        profile: &UserProfile,
    ) -> Result<(), ServiceError> {
        let mut conn = self.connection().await?;

        let result = sqlx::query(
            r#"
            WITH new_identity AS (
                INSERT INTO identities (id, email, normalized_email, phone_number, password_hash, created_at, updated_at)
                VALUES ($1, $2, $3, $4, $5, $6, $7)
                RETURNING id
            )
            INSERT INTO user_profiles (id, identity_id, first_name, last_name, email, phone_number, zip_code, created_at)
            SELECT $8, id, $9, $10, $11, $12, $13, $14 FROM new_identity
            "#,
        )
        .bind(identity.id)
        .bind(&identity.email)
        .bind(&identity.normalized_email)
        .bind(&identity.phone_number)
        .bind(&identity.password_hash)
        .bind(identity.created_at)
        .bind(identity.updated_at)
        .bind(profile.id)
        .bind(&profile.first_name)
        .bind(&profile.last_name)
        .bind(&profile.email)
        .bind(&profile.phone_number)
        .bind(&profile.zip_code)
        .bind(profile.created_at)
        .execute(conn.get()?)
        .await;

        match result {
            Ok(_) => Ok(()),
            Err(sqlx::Error::Database(db)) if db.is_unique_violation() => Err(
                ServiceError::Creation(vec![duplicate_email_message(&identity.email)]),
            ),
            Err(e) => Err(e.into()),
        }
    }

    async fn update_identity(&self, identity: &Identity) -> Result<(), ServiceError> {
        let mut conn = self.connection().await?;
        sqlx::query(
            r#"
            UPDATE identities
            SET email = $2, normalized_email = $3, phone_number = $4, password_hash = $5, updated_at = $6
            WHERE id = $1
            "#,
        )
        .bind(identity.id)
        .bind(&identity.email)
        .bind(&identity.normalized_email)
        .bind(&identity.phone_number)
        .bind(&identity.password_hash)
        .bind(identity.updated_at)
        .execute(conn.get()?)
        .await?;
        Ok(())
    }

    async fn delete_identity(&self, id: Uuid) -> Result<bool, ServiceError> {
        let mut conn = self.connection().await?;
        let result = sqlx::query("DELETE FROM identities WHERE id = $1")
            .bind(id)
            .execute(conn.get()?)
            .await?;
        Ok(result.rows_affected() > 0)
    }

    fn password_policy(&self) -> &PasswordPolicy {
        &self.policy
    }
}

#[async_trait]
impl RefreshTokenStore for PgSession {
    async fn insert_refresh_token(&self, token: &RefreshToken) -> Result<(), ServiceError> {
        let mut conn = self.connection().await?;
        sqlx::query(
            r#"
            INSERT INTO refresh_tokens (id, token_hash, identity_id, created_at, expires_at, is_used, is_revoked, revoked_at)
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8)
            "#,
        )
        .bind(token.id)
        .bind(&token.token_hash)
        .bind(token.identity_id)
        .bind(token.created_at)
        .bind(token.expires_at)
        .bind(token.is_used)
        .bind(token.is_revoked)
        .bind(token.revoked_at)
        .execute(conn.get()?)
        .await?;
        Ok(())
    }

    async fn find_refresh_token(
        &self,
        token: &str,
    ) -> Result<Option<(RefreshToken, Identity)>, ServiceError> {
        let mut conn = self.connection().await?;
        let row = sqlx::query_as::<_, RefreshTokenWithIdentity>(
            r#"
            SELECT t.id, t.token_hash, t.identity_id, t.created_at, t.expires_at,
                   t.is_used, t.is_revoked, t.revoked_at,
                   i.email AS identity_email,
                   i.normalized_email AS identity_normalized_email,
                   i.phone_number AS identity_phone_number,
                   i.password_hash AS identity_password_hash,
                   i.created_at AS identity_created_at,
                   i.updated_at AS identity_updated_at
            FROM refresh_tokens t
            JOIN identities i ON i.id = t.identity_id
            WHERE t.token_hash = $1
            "#,
        )
        .bind(RefreshToken::hash_token(token))
        .fetch_optional(conn.get()?)
        .await?;

        Ok(row.map(RefreshTokenWithIdentity::split))
    }

    async fn mark_refresh_token_used(
        &self,
        id: Uuid,
        now: DateTime<Utc>,
    ) -> Result<bool, ServiceError> {
        let mut conn = self.connection().await?;
        let result = sqlx::query(
            r#"
            UPDATE refresh_tokens
            SET is_used = TRUE
            WHERE id = $1 AND is_used = FALSE AND is_revoked = FALSE AND expires_at > $2
            "#,
        )
        .bind(id)
        .bind(now)
        .execute(conn.get()?)
        .await?;
        Ok(result.rows_affected() == 1)
    }

    async fn revoke_refresh_tokens(
        &self,
        identity_id: Uuid,
        now: DateTime<Utc>,
    ) -> Result<u64, ServiceError> {
        let mut conn = self.connection().await?;
        let result = sqlx::query(
            r#"
            UPDATE refresh_tokens
            SET is_revoked = TRUE, revoked_at = $2
            WHERE identity_id = $1 AND is_revoked = FALSE AND expires_at > $2
            "#,
        )
        .bind(identity_id)
        .bind(now)
        .execute(conn.get()?)
        .await?;
        Ok(result.rows_affected())
    }
}

#[async_trait]
impl ProfileStore for PgSession {
    async fn list_profiles(&self) -> Result<Vec<UserProfile>, ServiceError> {
        let mut conn = self.connection().await?;
        let profiles = sqlx::query_as::<_, UserProfile>(
            "SELECT * FROM user_profiles ORDER BY created_at, id",
        )
        .fetch_all(conn.get()?)
        .await?;
        Ok(profiles)
    }

    async fn page_profiles(
        &self,
        page_index: u32,
        page_size: u32,
    ) -> Result<(Vec<UserProfile>, u64), ServiceError> {
        let mut conn = self.connection().await?;
        let offset = i64::from(page_index.saturating_sub(1)) * i64::from(page_size);

        let profiles = sqlx::query_as::<_, UserProfile>(
            "SELECT * FROM user_profiles ORDER BY created_at, id LIMIT $1 OFFSET $2",
        )
        .bind(i64::from(page_size))
        .bind(offset)
        .fetch_all(conn.get()?)
        .await?;

        let total: i64 = sqlx::query_scalar("SELECT COUNT(*) FROM user_profiles")
            .fetch_one(conn.get()?)
            .await?;

        Ok((profiles, total.max(0) as u64))
    }

    async fn find_profile(&self, id: Uuid) -> Result<Option<UserProfile>, ServiceError> {
        let mut conn = self.connection().await?;
        let profile = sqlx::query_as::<_, UserProfile>("SELECT * FROM user_profiles WHERE id = $1")
            .bind(id)
            .fetch_optional(conn.get()?)
            .await?;
        Ok(profile)
    }

    async fn find_profile_by_identity(
        &self,
        identity_id: Uuid,
    ) -> Result<Option<UserProfile>, ServiceError> {
        let mut conn = self.connection().await?;
        let profile = sqlx::query_as::<_, UserProfile>(
            "SELECT * FROM user_profiles WHERE identity_id = $1",
        )
        .bind(identity_id)
        .fetch_optional(conn.get()?)
        .await?;
        Ok(profile)
    }

    async fn update_profile(&self, profile: &UserProfile) -> Result<bool, ServiceError> {
        let mut conn = self.connection().await?;
        let result = sqlx::query(
            r#"
            UPDATE user_profiles
            SET first_name = $2, last_name = $3, email = $4, phone_number = $5, zip_code = $6
            WHERE id = $1
            "#,
        )
        .bind(profile.id)
        .bind(&profile.first_name)
        .bind(&profile.last_name)
        .bind(&profile.email)
        .bind(&profile.phone_number)
        .bind(&profile.zip_code)
        .execute(conn.get()?)
        .await?;
        Ok(result.rows_affected() > 0)
    }

    async fn delete_profile(&self, id: Uuid) -> Result<bool, ServiceError> {
        let mut conn = self.connection().await?;
        let result = sqlx::query("DELETE FROM user_profiles WHERE id = $1")
            .bind(id)
            .execute(conn.get()?)
            .await?;
        Ok(result.rows_affected() > 0)
    }
}
