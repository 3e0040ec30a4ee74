//! Identity Service Library
//!
//! Identity and credential layer: signing key material, ID and refresh
//! tokens, and the OAuth 2.0 authorization code grant with PKCE.
//!
//! # Modules
//!
//! - `config` - Service configuration
//! - `crypto` - Key encryption, JWT signing and verification
//! - `errors` - Error types and OAuth error mapping
//! - `models` - Data models
//! - `observability` - Metrics and log-safe correlation helpers
//! - `repositories` - Persistence adapters (Postgres and in-process)
//! - `secrets` - Secret store adapter and lazy secret resolution
//! - `services` - Credential manager, token service, PKCE, OAuth service

pub mod config;
pub mod crypto;
pub mod errors;
pub mod models;
pub mod observability;
pub mod repositories;
pub mod secrets;
pub mod services;
