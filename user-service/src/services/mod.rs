//! Services layer for user-service.
//!
//! Token issuance, the auth and user flows, and the storage seams they run on.

mod auth;
mod database;
pub mod error;
mod jwt;
mod memory;
mod policy;
pub mod session;
mod unit_of_work;
mod users;

pub use auth::AuthService;
pub use database::Database;
pub use error::ServiceError;
pub use jwt::{AccessToken, AccessTokenClaims, IssuedRefreshToken, JwtService};
pub use memory::MemoryDataSource;
pub use policy::PasswordPolicy;
pub use session::{
    DataSource, IdentityStore, ProfileStore, RefreshTokenStore, Session, TransactionScope,
};
pub use unit_of_work::UnitOfWork;
pub use users::{UserService, MAX_PAGE_SIZE};
