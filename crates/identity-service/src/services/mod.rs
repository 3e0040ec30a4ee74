pub mod credential_manager;
pub mod oauth_service;
pub mod pkce;
pub mod token_service;

pub use credential_manager::CredentialManager;
pub use oauth_service::OAuthService;
pub use token_service::{TokenIssuer, TokenService, TokenServiceConfig};
