//! Persistent entities: identities, their profiles, and issued refresh tokens.

pub mod identity;
pub mod refresh_token;
pub mod user_profile;

pub use identity::{normalize_email, Identity, NewIdentity};
pub use refresh_token::RefreshToken;
pub use user_profile::{NewProfile, UserProfile};
