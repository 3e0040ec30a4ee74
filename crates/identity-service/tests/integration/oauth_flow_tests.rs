//! Authorization code grant with PKCE, end to end.

use identity_service::errors::IdentityError;
use identity_service::models::TokenRequest;
use identity_service::services::oauth_service::AUTHORIZATION_CODE_GRANT;
use identity_service::services::pkce::generate_code_challenge;
use identity_service::services::TokenIssuer;
use identity_test_utils::{
    TestIdentity, TokenAssertions, SCOPE_OPENID, TEST_CLIENT_ID, TEST_CODE_VERIFIER,
    TEST_OTHER_REDIRECT_URI, TEST_REDIRECT_URI, TEST_USER_ALICE,
};
use std::sync::Arc;

async fn authorize(identity: &TestIdentity, verifier: &str) -> Result<String, anyhow::Error> {
    let challenge = generate_code_challenge(verifier)?;
    let code = identity
        .oauth
        .generate_authorization_code(
            TEST_USER_ALICE,
            TEST_CLIENT_ID,
            TEST_REDIRECT_URI,
            &challenge,
            "S256",
            SCOPE_OPENID,
        )
        .await?;
    Ok(code)
}

fn token_request(code: &str, verifier: &str) -> TokenRequest {
    TokenRequest {
        grant_type: AUTHORIZATION_CODE_GRANT.to_string(),
        code: Some(code.to_string()),
        code_verifier: Some(verifier.to_string()),
        client_id: Some(TEST_CLIENT_ID.to_string()),
        redirect_uri: Some(TEST_REDIRECT_URI.to_string()),
    }
}

#[tokio::test]
async fn test_full_authorization_code_flow() -> Result<(), anyhow::Error> {
    let identity = TestIdentity::new().await?;
    let kid = identity.credentials.key_id()?;

    // Authorize, then exchange
    let code = authorize(&identity, TEST_CODE_VERIFIER).await?;
    let response = identity
        .oauth
        .handle_token_request(&token_request(&code, TEST_CODE_VERIFIER))
        .await?;

    assert_eq!(response.token_type, "Bearer");
    assert_eq!(response.scope, SCOPE_OPENID);
    assert_eq!(response.expires_in, 3600);
    assert_eq!(response.access_token, response.id_token);
    response
        .id_token
        .assert_valid_jwt()
        .assert_signed_by(&kid)
        .assert_for_subject(TEST_USER_ALICE);

    let claims = identity.tokens.validate_id_token(&response.id_token).await?;
    assert_eq!(claims.id, TEST_USER_ALICE);

    // The code is single use
    let replay = identity
        .oauth
        .handle_token_request(&token_request(&code, TEST_CODE_VERIFIER))
        .await;
    match replay {
        Err(e @ IdentityError::InvalidGrant(_)) => assert_eq!(e.oauth_error_code(), "invalid_grant"),
        other => panic!("expected invalid_grant on replay, got {:?}", other.map(|_| ())),
    }

    // Renew once, then sign out and the fresh refresh token is dead too
    let renewed = identity.tokens.renew_token(&response.refresh_token).await?;
    identity.tokens.sign_out(TEST_USER_ALICE).await?;
    let after_sign_out = identity.tokens.renew_token(&renewed.refresh_token).await;
    assert!(matches!(after_sign_out, Err(IdentityError::InvalidToken(_))));
    Ok(())
}

#[tokio::test]
async fn test_mutated_verifier_fails_and_burns_code() -> Result<(), anyhow::Error> {
    let identity = TestIdentity::new().await?;
    let code = authorize(&identity, TEST_CODE_VERIFIER).await?;

    let mut mutated = TEST_CODE_VERIFIER.to_string();
    mutated.pop();
    mutated.push('W');

    let result = identity
        .oauth
        .exchange_code_for_tokens(&code, &mutated, TEST_CLIENT_ID)
        .await;
    assert!(matches!(result, Err(IdentityError::InvalidGrant(_))));

    // Even the correct verifier cannot use a code after a failed attempt
    let retry = identity
        .oauth
        .exchange_code_for_tokens(&code, TEST_CODE_VERIFIER, TEST_CLIENT_ID)
        .await;
    assert!(matches!(retry, Err(IdentityError::InvalidGrant(_))));
    assert!(identity.codes.is_empty());
    Ok(())
}

#[tokio::test]
async fn test_concurrent_exchanges_single_winner() -> Result<(), anyhow::Error> {
    let identity = TestIdentity::new().await?;
    let code = authorize(&identity, TEST_CODE_VERIFIER).await?;

    let mut handles = Vec::new();
    for _ in 0..8 {
        let oauth = Arc::clone(&identity.oauth);
        let code = code.clone();
        handles.push(tokio::spawn(async move {
            oauth
                .exchange_code_for_tokens(&code, TEST_CODE_VERIFIER, TEST_CLIENT_ID)
                .await
        }));
    }

    let mut winners = 0;
    let mut rejected = 0;
    for handle in handles {
        match handle.await? {
            Ok(_) => winners += 1,
            Err(IdentityError::InvalidGrant(_)) => rejected += 1,
            Err(e) => return Err(anyhow::anyhow!("Unexpected exchange error: {}", e)),
        }
    }

    assert_eq!(winners, 1, "Exactly one concurrent exchange should succeed");
    assert_eq!(rejected, 7);
    assert_eq!(identity.refresh_tokens.count_for_user(TEST_USER_ALICE), 1);
    assert!(identity.codes.is_empty());
    Ok(())
}

#[tokio::test]
async fn test_plain_method_round_trip() -> Result<(), anyhow::Error> {
    let identity = TestIdentity::new().await?;
    let code = identity
        .oauth
        .generate_authorization_code(
            TEST_USER_ALICE,
            TEST_CLIENT_ID,
            TEST_REDIRECT_URI,
            TEST_CODE_VERIFIER,
            "plain",
            SCOPE_OPENID,
        )
        .await?;

    let pair = identity
        .oauth
        .exchange_code_for_tokens(&code, TEST_CODE_VERIFIER, TEST_CLIENT_ID)
        .await?;
    assert_eq!(pair.user_id, TEST_USER_ALICE);
    Ok(())
}

#[tokio::test]
async fn test_unregistered_redirect_uri_issues_no_code() -> Result<(), anyhow::Error> {
    let identity = TestIdentity::new().await?;
    let challenge = generate_code_challenge(TEST_CODE_VERIFIER)?;

    let result = identity
        .oauth
        .generate_authorization_code(
            TEST_USER_ALICE,
            TEST_CLIENT_ID,
            TEST_OTHER_REDIRECT_URI,
            &challenge,
            "S256",
            SCOPE_OPENID,
        )
        .await;

    assert!(matches!(result, Err(IdentityError::InvalidClient(_))));
    assert!(identity.codes.is_empty());
    Ok(())
}

#[tokio::test]
async fn test_exchange_by_other_client_fails() -> Result<(), anyhow::Error> {
    let identity = TestIdentity::new().await?;
    let other = identity
        .oauth
        .register_client(
            "Other App",
            vec![TEST_REDIRECT_URI.to_string()],
            vec![SCOPE_OPENID.to_string()],
        )
        .await?;
    let code = authorize(&identity, TEST_CODE_VERIFIER).await?;

    let result = identity
        .oauth
        .exchange_code_for_tokens(&code, TEST_CODE_VERIFIER, &other.client_id)
        .await;
    assert!(matches!(result, Err(IdentityError::InvalidGrant(_))));
    Ok(())
}

#[tokio::test]
async fn test_token_request_redirect_uri_must_match() -> Result<(), anyhow::Error> {
    let identity = TestIdentity::new().await?;
    let code = authorize(&identity, TEST_CODE_VERIFIER).await?;

    let mut request = token_request(&code, TEST_CODE_VERIFIER);
    request.redirect_uri = Some(TEST_OTHER_REDIRECT_URI.to_string());

    let result = identity.oauth.handle_token_request(&request).await;
    assert!(matches!(result, Err(IdentityError::InvalidGrant(_))));
    Ok(())
}

#[tokio::test]
async fn test_unsupported_grant_type() -> Result<(), anyhow::Error> {
    let identity = TestIdentity::new().await?;
    let request = TokenRequest {
        grant_type: "password".to_string(),
        ..Default::default()
    };

    let err = identity
        .oauth
        .handle_token_request(&request)
        .await
        .err()
        .ok_or_else(|| anyhow::anyhow!("password grant should be rejected"))?;
    assert_eq!(err.oauth_error_code(), "unsupported_grant_type");
    assert_eq!(err.status_code(), 400);
    Ok(())
}

#[tokio::test]
async fn test_inactive_user_cannot_exchange() -> Result<(), anyhow::Error> {
    let identity = TestIdentity::new().await?;
    let code = authorize(&identity, TEST_CODE_VERIFIER).await?;

    let mut alice = identity.alice();
    alice.is_active = false;
    identity.users.upsert(alice);

    let result = identity
        .oauth
        .exchange_code_for_tokens(&code, TEST_CODE_VERIFIER, TEST_CLIENT_ID)
        .await;
    assert!(matches!(result, Err(IdentityError::InvalidGrant(_))));
    assert_eq!(identity.refresh_tokens.count_for_user(TEST_USER_ALICE), 0);
    Ok(())
}
