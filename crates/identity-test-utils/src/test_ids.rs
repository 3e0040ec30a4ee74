//! Fixed test IDs for deterministic tests
//!
//! All test IDs are deterministic to ensure reproducible test results.

// User IDs
pub const TEST_USER_ALICE: &str = "user-alice";
pub const TEST_USER_BOB: &str = "user-bob";

// OAuth clients
pub const TEST_CLIENT_ID: &str = "c1";
pub const TEST_CLIENT_NAME: &str = "Test App";
pub const TEST_REDIRECT_URI: &str = "https://app/cb";
pub const TEST_OTHER_REDIRECT_URI: &str = "https://evil.example/cb";

// PKCE: "V" repeated 43 times (the minimum verifier length)
pub const TEST_CODE_VERIFIER: &str = "VVVVVVVVVVVVVVVVVVVVVVVVVVVVVVVVVVVVVVVVVVV";

// Scopes
pub const SCOPE_OPENID: &str = "openid";
pub const SCOPE_PROFILE: &str = "profile";
