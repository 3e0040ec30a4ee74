//! # Identity Test Utilities
//!
//! Shared test utilities for the identity service.
//!
//! This crate provides:
//! - Deterministic crypto fixtures (seeded RSA keys, canonical secrets)
//! - Test data builders (users, OAuth clients, hand-crafted ID tokens)
//! - An in-process harness wiring every service over in-memory stores
//! - Fixed test IDs and constants
//! - Custom assertions (TokenAssertions trait)
//!
//! ## Usage
//!
//! ```rust,ignore
//! use identity_test_utils::*;
//!
//! #[tokio::test]
//! async fn test_example() -> anyhow::Result<()> {
//!     let identity = TestIdentity::new().await?;
//!     let pair = identity.tokens.new_pair_from_user(&identity.alice(), None).await?;
//!
//!     pair.id_token
//!         .assert_valid_jwt()
//!         .assert_algorithm("RS256")
//!         .assert_for_subject(TEST_USER_ALICE);
//!     Ok(())
//! }
//! ```

pub mod assertions;
pub mod crypto_fixtures;
pub mod harness;
pub mod test_ids;
pub mod token_builders;

// Re-export commonly used items
pub use assertions::*;
pub use crypto_fixtures::*;
pub use harness::*;
pub use test_ids::*;
pub use token_builders::*;
