//! Token pair issuance, rotation and sign-out through the full service stack.

use identity_service::errors::IdentityError;
use identity_service::services::TokenIssuer;
use identity_test_utils::{TestIdentity, TokenAssertions, TEST_USER_ALICE, TEST_USER_BOB};
use std::sync::Arc;

#[tokio::test]
async fn test_issued_pair_shape() -> Result<(), anyhow::Error> {
    let identity = TestIdentity::new().await?;
    let kid = identity.credentials.key_id()?;

    let pair = identity.tokens.new_pair_from_user(&identity.alice(), None).await?;

    pair.id_token
        .assert_valid_jwt()
        .assert_algorithm("RS256")
        .assert_signed_by(&kid)
        .assert_for_subject(TEST_USER_ALICE)
        .assert_expires_in(3600);
    pair.refresh_token
        .assert_valid_jwt()
        .assert_algorithm("HS256")
        .assert_for_subject(TEST_USER_ALICE)
        .assert_expires_in(7 * 24 * 3600);

    let claims = identity.tokens.validate_id_token(&pair.id_token).await?;
    assert_eq!(claims.id, TEST_USER_ALICE);
    assert_eq!(claims.username, "alice");
    Ok(())
}

#[tokio::test]
async fn test_renew_rotates_refresh_token() -> Result<(), anyhow::Error> {
    let identity = TestIdentity::new().await?;
    let first = identity.tokens.new_pair_from_user(&identity.alice(), None).await?;

    let second = identity.tokens.renew_token(&first.refresh_token).await?;
    assert_ne!(second.refresh_token_id, first.refresh_token_id);
    assert_eq!(identity.refresh_tokens.count_for_user(TEST_USER_ALICE), 1);

    // The rotated-out token is dead; the new one is live.
    let replay = identity.tokens.renew_token(&first.refresh_token).await;
    assert!(matches!(replay, Err(IdentityError::InvalidToken(_))));

    let reference = identity
        .tokens
        .validate_refresh_token(&second.refresh_token)
        .await?;
    assert_eq!(reference.token_id, second.refresh_token_id);
    assert_eq!(reference.user_id, TEST_USER_ALICE);
    Ok(())
}

#[tokio::test]
async fn test_concurrent_renewals_single_winner() -> Result<(), anyhow::Error> {
    let identity = TestIdentity::new().await?;
    let pair = identity.tokens.new_pair_from_user(&identity.alice(), None).await?;

    let mut handles = Vec::new();
    for _ in 0..8 {
        let tokens = Arc::clone(&identity.tokens);
        let refresh = pair.refresh_token.clone();
        handles.push(tokio::spawn(async move { tokens.renew_token(&refresh).await }));
    }

    let mut winners = 0;
    for handle in handles {
        match handle.await? {
            Ok(_) => winners += 1,
            Err(IdentityError::InvalidToken(_)) => {}
            Err(e) => return Err(anyhow::anyhow!("Unexpected renewal error: {}", e)),
        }
    }

    assert_eq!(winners, 1, "Exactly one concurrent renewal should succeed");
    assert_eq!(identity.refresh_tokens.count_for_user(TEST_USER_ALICE), 1);
    Ok(())
}

#[tokio::test]
async fn test_sign_out_revokes_only_that_user() -> Result<(), anyhow::Error> {
    let identity = TestIdentity::new().await?;
    let alice_one = identity.tokens.new_pair_from_user(&identity.alice(), None).await?;
    let alice_two = identity.tokens.new_pair_from_user(&identity.alice(), None).await?;
    let bob = identity.tokens.new_pair_from_user(&identity.bob(), None).await?;

    identity.tokens.sign_out(TEST_USER_ALICE).await?;

    for refresh in [&alice_one.refresh_token, &alice_two.refresh_token] {
        let result = identity.tokens.renew_token(refresh).await;
        assert!(matches!(result, Err(IdentityError::InvalidToken(_))));
    }
    assert_eq!(identity.refresh_tokens.count_for_user(TEST_USER_ALICE), 0);

    // ID tokens are stateless and stay valid until they expire.
    identity.tokens.validate_id_token(&alice_one.id_token).await?;

    identity.tokens.renew_token(&bob.refresh_token).await?;
    assert_eq!(identity.refresh_tokens.count_for_user(TEST_USER_BOB), 1);
    Ok(())
}

#[tokio::test]
async fn test_renew_for_deactivated_user_fails() -> Result<(), anyhow::Error> {
    let identity = TestIdentity::new().await?;
    let pair = identity.tokens.new_pair_from_user(&identity.alice(), None).await?;

    let mut alice = identity.alice();
    alice.is_active = false;
    identity.users.upsert(alice);

    let result = identity.tokens.renew_token(&pair.refresh_token).await;
    assert!(matches!(result, Err(IdentityError::InvalidToken(_))));
    assert_eq!(identity.refresh_tokens.count_for_user(TEST_USER_ALICE), 0);

    // Reactivating the account does not bring the token back
    identity.users.upsert(identity.alice());
    let revived = identity.tokens.renew_token(&pair.refresh_token).await;
    assert!(matches!(revived, Err(IdentityError::InvalidToken(_))));
    Ok(())
}

#[tokio::test]
async fn test_refresh_token_is_not_an_id_token() -> Result<(), anyhow::Error> {
    let identity = TestIdentity::new().await?;
    let pair = identity.tokens.new_pair_from_user(&identity.alice(), None).await?;

    let as_id = identity.tokens.validate_id_token(&pair.refresh_token).await;
    assert!(matches!(as_id, Err(IdentityError::InvalidToken(_))));

    let as_refresh = identity.tokens.validate_refresh_token(&pair.id_token).await;
    assert!(matches!(as_refresh, Err(IdentityError::InvalidToken(_))));
    Ok(())
}

#[tokio::test]
async fn test_storage_failure_is_a_server_error() -> Result<(), anyhow::Error> {
    let identity = TestIdentity::new().await?;
    identity.refresh_tokens.set_failing(true);

    let err = identity
        .tokens
        .new_pair_from_user(&identity.alice(), None)
        .await
        .err()
        .ok_or_else(|| anyhow::anyhow!("issuance should fail while storage is down"))?;
    assert!(err.is_server_error());
    Ok(())
}
