//! ID token validation at the expiry boundary and against foreign keys.
//!
//! Tokens here are signed outside the service with arbitrary timestamps,
//! then handed to the service for validation.

use chrono::Utc;
use identity_service::crypto::UserClaims;
use identity_service::errors::{IdentityError, INVALID_TOKEN_MESSAGE};
use identity_service::services::TokenIssuer;
use identity_test_utils::{
    alternate_signing_key, test_signing_key, TestIdTokenBuilder, TestIdentity,
};

fn assert_rejected(result: Result<UserClaims, IdentityError>, context: &str) {
    match result {
        Err(IdentityError::InvalidToken(message)) => {
            assert_eq!(message, INVALID_TOKEN_MESSAGE, "{}", context);
        }
        Err(other) => panic!("{}: expected InvalidToken, got {:?}", context, other),
        Ok(_) => panic!("{}: token was accepted", context),
    }
}

#[tokio::test]
async fn test_token_expired_one_second_ago_is_rejected() -> Result<(), anyhow::Error> {
    let identity = TestIdentity::new().await?;
    let kid = identity.credentials.key_id()?;

    let token = TestIdTokenBuilder::for_user(&identity.alice())
        .issued_in(-60)
        .expires_in(-1)
        .sign(test_signing_key(), &kid);

    assert_rejected(
        identity.tokens.validate_id_token(&token).await,
        "exp = now - 1",
    );
    Ok(())
}

#[tokio::test]
async fn test_token_expiring_shortly_is_accepted() -> Result<(), anyhow::Error> {
    let identity = TestIdentity::new().await?;
    let kid = identity.credentials.key_id()?;

    let token = TestIdTokenBuilder::for_user(&identity.alice())
        .expires_in(2)
        .sign(test_signing_key(), &kid);

    let claims = identity.tokens.validate_id_token(&token).await?;
    assert_eq!(claims.id, identity.alice().user_id);
    Ok(())
}

#[tokio::test]
async fn test_issued_after_expiry_is_rejected() -> Result<(), anyhow::Error> {
    let identity = TestIdentity::new().await?;
    let kid = identity.credentials.key_id()?;
    let now = Utc::now().timestamp();

    let token = TestIdTokenBuilder::for_user(&identity.alice())
        .with_timestamps(now + 600, now + 300)
        .sign(test_signing_key(), &kid);

    assert_rejected(identity.tokens.validate_id_token(&token).await, "iat > exp");
    Ok(())
}

#[tokio::test]
async fn test_non_positive_timestamps_are_rejected() -> Result<(), anyhow::Error> {
    let identity = TestIdentity::new().await?;
    let kid = identity.credentials.key_id()?;

    let token = TestIdTokenBuilder::for_user(&identity.alice())
        .with_timestamps(0, Utc::now().timestamp() + 300)
        .sign(test_signing_key(), &kid);

    assert_rejected(identity.tokens.validate_id_token(&token).await, "iat = 0");
    Ok(())
}

#[tokio::test]
async fn test_token_signed_by_another_key_is_rejected() -> Result<(), anyhow::Error> {
    let identity = TestIdentity::new().await?;
    let kid = identity.credentials.key_id()?;

    // Same kid header, different key: the header must not be trusted.
    let token = TestIdTokenBuilder::for_user(&identity.alice()).sign(alternate_signing_key(), &kid);

    assert_rejected(
        identity.tokens.validate_id_token(&token).await,
        "foreign signing key",
    );
    Ok(())
}

#[tokio::test]
async fn test_token_with_empty_identity_is_rejected() -> Result<(), anyhow::Error> {
    let identity = TestIdentity::new().await?;
    let kid = identity.credentials.key_id()?;

    let mut user = identity.alice().claims();
    user.email = String::new();
    let token = TestIdTokenBuilder::for_user(&identity.alice())
        .with_user_claims(user)
        .sign(test_signing_key(), &kid);

    assert_rejected(
        identity.tokens.validate_id_token(&token).await,
        "empty email claim",
    );
    Ok(())
}

#[tokio::test]
async fn test_tampered_payload_is_rejected() -> Result<(), anyhow::Error> {
    let identity = TestIdentity::new().await?;
    let pair = identity.tokens.new_pair_from_user(&identity.alice(), None).await?;
    let other = identity.tokens.new_pair_from_user(&identity.bob(), None).await?;

    // Splice bob's payload under alice's signature.
    let malformed = || anyhow::anyhow!("issued token is not a compact JWT");
    let (header, rest) = pair.id_token.split_once('.').ok_or_else(malformed)?;
    let (_, signature) = rest.split_once('.').ok_or_else(malformed)?;
    let (_, bob_rest) = other.id_token.split_once('.').ok_or_else(malformed)?;
    let (bob_payload, _) = bob_rest.split_once('.').ok_or_else(malformed)?;
    let forged = format!("{}.{}.{}", header, bob_payload, signature);

    assert_rejected(
        identity.tokens.validate_id_token(&forged).await,
        "spliced payload",
    );
    Ok(())
}
