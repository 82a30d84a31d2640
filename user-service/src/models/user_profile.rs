use chrono::{DateTime, Utc};
use sqlx::FromRow;
use uuid::Uuid;

/// Personal details attached 1:1 to an identity.
#[derive(Debug, Clone, PartialEq, FromRow)]
pub struct UserProfile {
    pub id: Uuid,
    pub identity_id: Uuid,
    pub first_name: String,
    pub last_name: String,
    pub email: String,
    pub phone_number: Option<String>,
    pub zip_code: Option<String>,
    pub created_at: DateTime<Utc>,
}

#[derive(Debug, Clone)]
pub struct NewProfile {
    pub first_name: String,
    pub last_name: String,
    pub email: String,
    pub phone_number: Option<String>,
    pub zip_code: Option<String>,
}

impl UserProfile {
    pub fn new(identity_id: Uuid, profile: NewProfile) -> Self {
        Self {
            id: Uuid::new_v4(),
            identity_id,
            first_name: profile.first_name,
            last_name: profile.last_name,
            email: profile.email,
            phone_number: profile.phone_number,
            zip_code: profile.zip_code,
            created_at: Utc::now(),
        }
    }
}
