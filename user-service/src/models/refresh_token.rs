use chrono::{DateTime, Duration, Utc};
use rand::RngCore;
use sha2::{Digest, Sha256};
use sqlx::FromRow;
use uuid::Uuid;

/// Refresh token record. Only the SHA-256 digest of the token string is kept.
#[derive(Debug, Clone, PartialEq, FromRow)]
pub struct RefreshToken {
    pub id: Uuid,
    pub token_hash: String,
    pub identity_id: Uuid,
    pub created_at: DateTime<Utc>,
    pub expires_at: DateTime<Utc>,
    pub is_used: bool,
    pub is_revoked: bool,
    pub revoked_at: Option<DateTime<Utc>>,
}

impl RefreshToken {
    /// Mint a new opaque token for `identity_id`.
    ///
    /// Returns the plaintext token (handed to the client once) and the record to persist.
    /// Fails when `now + lifetime` is not a representable instant.
    pub fn issue(
        identity_id: Uuid,
        lifetime: Duration,
        now: DateTime<Utc>,
    ) -> Result<(String, Self), anyhow::Error> {
        let expires_at = now
            .checked_add_signed(lifetime)
            .ok_or_else(|| anyhow::anyhow!("Refresh token expiry out of range"))?;

        let token = generate_token();
        let record = Self {
            id: Uuid::new_v4(),
            token_hash: Self::hash_token(&token),
            identity_id,
            created_at: now,
            expires_at,
            is_used: false,
            is_revoked: false,
            revoked_at: None,
        };
        Ok((token, record))
    }

    /// Hash a token using SHA-256
    pub fn hash_token(token: &str) -> String {
        let mut hasher = Sha256::new();
        hasher.update(token.as_bytes());
        hex::encode(hasher.finalize())
    }

    /// A token at exactly its expiry instant is already expired.
    pub fn is_expired_at(&self, now: DateTime<Utc>) -> bool {
        self.expires_at <= now
    }

    /// Whether this token may still be exchanged for a new pair.
    pub fn is_active_at(&self, now: DateTime<Utc>) -> bool {
        !self.is_used && !self.is_revoked && !self.is_expired_at(now)
    }

    pub fn revoke(&mut self, now: DateTime<Utc>) {
        self.is_revoked = true;
        self.revoked_at = Some(now);
    }
}

fn generate_token() -> String {
    let mut bytes = [0u8; 32];
    rand::thread_rng().fill_bytes(&mut bytes);
    hex::encode(bytes)
}
