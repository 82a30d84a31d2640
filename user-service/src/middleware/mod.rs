pub mod auth;
pub mod unit_of_work;

pub use auth::{auth_middleware, AuthUser, ACCESS_TOKEN_COOKIE, REFRESH_TOKEN_COOKIE};
pub use unit_of_work::{unit_of_work_middleware, DbSession, UnitOfWorkState};
