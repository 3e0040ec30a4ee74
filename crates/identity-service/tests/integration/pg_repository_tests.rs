//! Postgres repositories against a real database.
//!
//! Run with `DATABASE_URL` set and `--ignored`.

use chrono::Duration;
use identity_service::errors::IdentityError;
use identity_service::models::NewAuthorizationCode;
use identity_service::repositories::{
    AuthorizationCodeRepository, OAuthClientRepository, PgAuthorizationCodeRepository,
    PgOAuthClientRepository, PgTokenRepository, PgUserDirectory, TokenRepository, UserDirectory,
};
use identity_test_utils::{
    TestClientBuilder, TEST_CLIENT_ID, TEST_OTHER_REDIRECT_URI, TEST_REDIRECT_URI,
    TEST_USER_ALICE, TEST_USER_BOB,
};
use sqlx::PgPool;
use std::sync::Arc;
use uuid::Uuid;

async fn seed_user(pool: &PgPool, user_id: &str) -> Result<(), anyhow::Error> {
    sqlx::query(
        r#"
        INSERT INTO users (user_id, username, email, role)
        VALUES ($1, $2, $3, 'member')
        "#,
    )
    .bind(user_id)
    .bind(format!("{}-name", user_id))
    .bind(format!("{}@example.com", user_id))
    .execute(pool)
    .await?;
    Ok(())
}

async fn seed_client(pool: &PgPool) -> Result<(), anyhow::Error> {
    PgOAuthClientRepository::new(pool.clone())
        .create_client(TestClientBuilder::new().build())
        .await?;
    Ok(())
}

fn code_params(challenge: &str) -> NewAuthorizationCode<'_> {
    NewAuthorizationCode {
        user_id: TEST_USER_ALICE,
        client_id: TEST_CLIENT_ID,
        redirect_uri: TEST_REDIRECT_URI,
        code_challenge: challenge,
        code_challenge_method: "S256",
        scope: "openid",
    }
}

#[sqlx::test(migrations = "../../migrations")]
#[ignore = "requires DATABASE_URL"]
async fn test_user_directory_reads_users(pool: PgPool) -> Result<(), anyhow::Error> {
    seed_user(&pool, TEST_USER_ALICE).await?;
    let users = PgUserDirectory::new(pool);

    let alice = users
        .get_user_by_id(TEST_USER_ALICE)
        .await?
        .ok_or_else(|| anyhow::anyhow!("seeded user not found"))?;
    assert_eq!(alice.email, "user-alice@example.com");
    assert!(alice.is_active);

    assert!(users.get_user_by_id("nobody").await?.is_none());
    Ok(())
}

#[sqlx::test(migrations = "../../migrations")]
#[ignore = "requires DATABASE_URL"]
async fn test_client_redirect_validation(pool: PgPool) -> Result<(), anyhow::Error> {
    seed_client(&pool).await?;
    let clients = PgOAuthClientRepository::new(pool);

    let client = clients
        .validate_redirect_uri(TEST_CLIENT_ID, TEST_REDIRECT_URI)
        .await?;
    assert_eq!(client.redirect_uris, vec![TEST_REDIRECT_URI.to_string()]);

    let wrong_uri = clients
        .validate_redirect_uri(TEST_CLIENT_ID, TEST_OTHER_REDIRECT_URI)
        .await;
    assert!(matches!(wrong_uri, Err(IdentityError::InvalidClient(_))));

    let duplicate = clients.create_client(TestClientBuilder::new().build()).await;
    assert!(matches!(duplicate, Err(IdentityError::Database(_))));
    Ok(())
}

#[sqlx::test(migrations = "../../migrations")]
#[ignore = "requires DATABASE_URL"]
async fn test_authorization_code_single_use(pool: PgPool) -> Result<(), anyhow::Error> {
    seed_user(&pool, TEST_USER_ALICE).await?;
    seed_client(&pool).await?;
    let codes = PgAuthorizationCodeRepository::new(pool);

    let record = codes.generate_code(code_params("challenge"), 10).await?;
    assert_eq!(record.code_challenge_method, "S256");

    let consumed = codes
        .validate_and_consume(&record.code)
        .await?
        .ok_or_else(|| anyhow::anyhow!("fresh code should be redeemable"))?;
    assert_eq!(consumed.user_id, TEST_USER_ALICE);
    assert_eq!(consumed.redirect_uri, TEST_REDIRECT_URI);

    assert!(codes.validate_and_consume(&record.code).await?.is_none());
    Ok(())
}

#[sqlx::test(migrations = "../../migrations")]
#[ignore = "requires DATABASE_URL"]
async fn test_expired_codes_are_unusable_and_purged(pool: PgPool) -> Result<(), anyhow::Error> {
    seed_user(&pool, TEST_USER_ALICE).await?;
    seed_client(&pool).await?;
    let codes = PgAuthorizationCodeRepository::new(pool);

    let expired = codes.generate_code(code_params("old"), -1).await?;
    let live = codes.generate_code(code_params("new"), 10).await?;

    assert!(codes.validate_and_consume(&expired.code).await?.is_none());
    assert_eq!(codes.purge_expired().await?, 1);
    assert!(codes.validate_and_consume(&live.code).await?.is_some());
    Ok(())
}

#[sqlx::test(migrations = "../../migrations")]
#[ignore = "requires DATABASE_URL"]
async fn test_refresh_token_rotation_and_sign_out(pool: PgPool) -> Result<(), anyhow::Error> {
    seed_user(&pool, TEST_USER_ALICE).await?;
    seed_user(&pool, TEST_USER_BOB).await?;
    let tokens = PgTokenRepository::new(pool);
    let ttl = Duration::hours(1);

    let first = Uuid::new_v4();
    let second = Uuid::new_v4();
    tokens.set_refresh_token(TEST_USER_ALICE, first, ttl).await?;
    assert!(tokens.is_active(TEST_USER_ALICE, first).await?);

    assert!(tokens.rotate_refresh_token(TEST_USER_ALICE, first, second, ttl).await?);
    assert!(!tokens.is_active(TEST_USER_ALICE, first).await?);
    assert!(tokens.is_active(TEST_USER_ALICE, second).await?);

    // Rotating a token that is gone inserts nothing
    let stray = Uuid::new_v4();
    assert!(!tokens.rotate_refresh_token(TEST_USER_ALICE, first, stray, ttl).await?);
    assert!(!tokens.is_active(TEST_USER_ALICE, stray).await?);

    let bob = Uuid::new_v4();
    tokens.set_refresh_token(TEST_USER_BOB, bob, ttl).await?;
    assert_eq!(tokens.delete_all_for_user(TEST_USER_ALICE).await?, 1);
    assert!(tokens.is_active(TEST_USER_BOB, bob).await?);
    assert!(!tokens.delete_refresh_token(TEST_USER_ALICE, second).await?);
    Ok(())
}

#[sqlx::test(migrations = "../../migrations")]
#[ignore = "requires DATABASE_URL"]
async fn test_concurrent_rotation_single_winner(pool: PgPool) -> Result<(), anyhow::Error> {
    seed_user(&pool, TEST_USER_ALICE).await?;
    let tokens = Arc::new(PgTokenRepository::new(pool));
    let ttl = Duration::hours(1);

    let original = Uuid::new_v4();
    tokens.set_refresh_token(TEST_USER_ALICE, original, ttl).await?;

    let mut handles = Vec::new();
    for _ in 0..8 {
        let tokens = Arc::clone(&tokens);
        handles.push(tokio::spawn(async move {
            tokens
                .rotate_refresh_token(TEST_USER_ALICE, original, Uuid::new_v4(), ttl)
                .await
        }));
    }

    let mut winners = 0;
    for handle in handles {
        if handle.await?? {
            winners += 1;
        }
    }
    assert_eq!(winners, 1);
    Ok(())
}

#[sqlx::test(migrations = "../../migrations")]
#[ignore = "requires DATABASE_URL"]
async fn test_expired_refresh_tokens_are_purged(pool: PgPool) -> Result<(), anyhow::Error> {
    seed_user(&pool, TEST_USER_ALICE).await?;
    let tokens = PgTokenRepository::new(pool);

    let stale = Uuid::new_v4();
    let live = Uuid::new_v4();
    tokens.set_refresh_token(TEST_USER_ALICE, stale, Duration::seconds(-1)).await?;
    tokens.set_refresh_token(TEST_USER_ALICE, live, Duration::hours(1)).await?;

    assert!(!tokens.is_active(TEST_USER_ALICE, stale).await?);
    assert_eq!(tokens.purge_expired().await?, 1);
    assert!(tokens.is_active(TEST_USER_ALICE, live).await?);
    assert_eq!(tokens.purge_expired().await?, 0);
    Ok(())
}

#[sqlx::test(migrations = "../../migrations")]
#[ignore = "requires DATABASE_URL"]
async fn test_concurrent_code_redemption_single_winner(pool: PgPool) -> Result<(), anyhow::Error> {
    seed_user(&pool, TEST_USER_ALICE).await?;
    seed_client(&pool).await?;
    let codes = Arc::new(PgAuthorizationCodeRepository::new(pool));

    let record = codes.generate_code(code_params("challenge"), 10).await?;

    let mut handles = Vec::new();
    for _ in 0..8 {
        let codes = Arc::clone(&codes);
        let code = record.code.clone();
        handles.push(tokio::spawn(async move { codes.validate_and_consume(&code).await }));
    }

    let mut winners = 0;
    for handle in handles {
        if handle.await??.is_some() {
            winners += 1;
        }
    }
    assert_eq!(winners, 1);
    Ok(())
}
