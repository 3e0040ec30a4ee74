//! Common utilities shared by the identity service crates.

#![warn(clippy::pedantic)]

/// Module for secret types that prevent accidental logging
pub mod secret;

/// Module for JWT shape checks performed before signature verification
pub mod jwt;
