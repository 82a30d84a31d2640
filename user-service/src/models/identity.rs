//! Identity model - the credential-bearing account behind a user profile.

use chrono::{DateTime, Utc};
use sqlx::FromRow;
use uuid::Uuid;

use super::user_profile::NewProfile;

/// Login identity. Owns one profile and any number of refresh tokens.
#[derive(Debug, Clone, FromRow)]
pub struct Identity {
    pub id: Uuid,
    pub email: String,
    pub normalized_email: String,
    pub phone_number: Option<String>,
    pub password_hash: String,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl Identity {
    /// Create a new identity from an already hashed password.
    pub fn new(email: String, phone_number: Option<String>, password_hash: String) -> Self {
        let now = Utc::now();
        Self {
            id: Uuid::new_v4(),
            normalized_email: normalize_email(&email),
            email,
            phone_number,
            password_hash,
            created_at: now,
            updated_at: now,
        }
    }
}

/// Fields needed to create an identity together with its profile.
#[derive(Debug, Clone)]
pub struct NewIdentity {
    pub email: String,
    pub phone_number: Option<String>,
    pub profile: NewProfile,
}

/// Lookup key for emails; comparisons are case-insensitive.
pub fn normalize_email(email: &str) -> String {
    email.trim().to_lowercase()
}
