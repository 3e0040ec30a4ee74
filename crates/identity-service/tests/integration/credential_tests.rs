//! Key material on disk as seen by the token service.

use identity_service::errors::{IdentityError, KeyMaterialError};
use identity_service::secrets::{SecretStore, KEY_PASSWORD_NAME};
use identity_service::services::TokenIssuer;
use identity_test_utils::{test_secret, test_signing_key, TestIdentity, TokenAssertions};

#[tokio::test]
async fn test_imported_key_backs_issued_tokens() -> Result<(), anyhow::Error> {
    let identity = TestIdentity::new().await?;

    assert_eq!(
        identity.credentials.public_key()?,
        test_signing_key().to_public_key()
    );
    identity.credentials.verify_certificate()?;
    assert!(!identity.credentials.is_certificate_expired()?);
    assert!(identity.credentials.key_path().starts_with(identity.key_dir()));

    let pair = identity.tokens.new_pair_from_user(&identity.alice(), None).await?;
    pair.id_token.assert_signed_by(&identity.credentials.key_id()?);
    Ok(())
}

#[tokio::test]
async fn test_regenerated_material_changes_key_id() -> Result<(), anyhow::Error> {
    let identity = TestIdentity::new().await?;
    let before = identity.credentials.key_id()?;

    identity.credentials.generate_self_signed()?;

    let after = identity.credentials.key_id()?;
    assert_ne!(before, after);
    assert_ne!(
        identity.credentials.public_key()?,
        test_signing_key().to_public_key()
    );

    // Tokens are signed with whatever is on disk now.
    let pair = identity.tokens.new_pair_from_user(&identity.alice(), None).await?;
    pair.id_token.assert_signed_by(&after);
    identity.tokens.validate_id_token(&pair.id_token).await?;
    Ok(())
}

#[tokio::test]
async fn test_wrong_key_password_fails_issuance() -> Result<(), anyhow::Error> {
    let identity = TestIdentity::new().await?;
    identity
        .secret_store
        .store(KEY_PASSWORD_NAME, &test_secret(42))?;

    let err = identity
        .tokens
        .new_pair_from_user(&identity.alice(), None)
        .await
        .err()
        .ok_or_else(|| anyhow::anyhow!("issuance should fail with the wrong key password"))?;
    assert!(
        matches!(err, IdentityError::KeyMaterial(KeyMaterialError::Decryption)),
        "unexpected error: {:?}",
        err
    );
    assert!(err.is_server_error());
    Ok(())
}

#[tokio::test]
async fn test_missing_key_file_is_reported_by_path() -> Result<(), anyhow::Error> {
    let identity = TestIdentity::new().await?;
    std::fs::remove_file(identity.credentials.key_path())?;

    match identity.credentials.private_key() {
        Err(IdentityError::KeyMaterial(KeyMaterialError::MissingFile(path))) => {
            assert_eq!(path, identity.credentials.key_path());
        }
        other => panic!("expected MissingFile, got {:?}", other.map(|_| ())),
    }

    // A missing half regenerates both files.
    let generated = identity.credentials.ensure_key_material()?;
    assert!(generated);
    identity.credentials.private_key()?;
    Ok(())
}
