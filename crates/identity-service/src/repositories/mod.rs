//! Persistence adapters.
//!
//! Each repository is a trait with a Postgres implementation (sqlx) and an
//! in-process implementation used by tests and single-node deployments.

pub mod auth_codes;
pub mod oauth_clients;
pub mod refresh_tokens;
pub mod users;

pub use auth_codes::{
    AuthorizationCodeRepository, InMemoryAuthorizationCodeRepository,
    PgAuthorizationCodeRepository,
};
pub use oauth_clients::{InMemoryOAuthClientRepository, OAuthClientRepository, PgOAuthClientRepository};
pub use refresh_tokens::{InMemoryTokenRepository, PgTokenRepository, TokenRepository};
pub use users::{InMemoryUserDirectory, PgUserDirectory, UserDirectory};
