//! Integration tests for the identity repository and secret rotation

mod common;

use common::unique_handle;
use credence_backend::{
    auth::{AuthUser, PasswordService},
    config::PasswordConfig,
    db::DbError,
    error::ApiError,
    repositories::{IdentityRepository, NewIdentity},
    services::CredentialService,
};
use credence_shared::{Role, RotateSecretRequest};
use std::time::Duration;
use uuid::Uuid;

fn new_identity(handle: &str, secret_hash: &str) -> NewIdentity {
    NewIdentity {
        handle: handle.to_string(),
        email: None,
        role: Role::Artist,
        secret_hash: secret_hash.to_string(),
    }
}

#[tokio::test]
#[ignore = "requires database"]
async fn test_create_and_find() {
    let app = common::TestApp::new().await;
    let handle = unique_handle();

    let created = IdentityRepository::create(&app.db, &new_identity(&handle, "hash-1"))
        .await
        .unwrap();
    assert_eq!(created.handle, handle);
    assert_eq!(created.role(), Role::Artist);
    assert!(created.active);

    let by_handle = IdentityRepository::find_by_handle(&app.db, &handle)
        .await
        .unwrap()
        .unwrap();
    assert_eq!(by_handle.id, created.id);

    let by_id = IdentityRepository::find_by_id(&app.db, created.id)
        .await
        .unwrap()
        .unwrap();
    assert_eq!(by_id.handle, handle);

    assert!(IdentityRepository::find_by_id(&app.db, Uuid::new_v4())
        .await
        .unwrap()
        .is_none());
}

#[tokio::test]
#[ignore = "requires database"]
async fn test_duplicate_handle_is_constraint_violation() {
    let app = common::TestApp::new().await;
    let handle = unique_handle();

    IdentityRepository::create(&app.db, &new_identity(&handle, "hash-1"))
        .await
        .unwrap();
    let err = IdentityRepository::create(&app.db, &new_identity(&handle, "hash-2"))
        .await
        .unwrap_err();

    assert!(matches!(err, DbError::ConstraintViolation(ref c) if c == "identities_handle_key"));
}

#[tokio::test]
#[ignore = "requires database"]
async fn test_handle_is_bound_not_interpolated() {
    let app = common::TestApp::new().await;

    let found = IdentityRepository::find_by_handle(&app.db, "' OR '1'='1")
        .await
        .unwrap();
    assert!(found.is_none());
}

#[tokio::test]
#[ignore = "requires database"]
async fn test_update_and_upgrade_hash() {
    let app = common::TestApp::new().await;
    let created = IdentityRepository::create(&app.db, &new_identity(&unique_handle(), "hash-1"))
        .await
        .unwrap();

    IdentityRepository::update_hash(&app.db, created.id, "hash-2").await.unwrap();

    // Stale expectation loses
    assert!(!IdentityRepository::upgrade_hash(&app.db, created.id, "hash-1", "hash-3")
        .await
        .unwrap());
    assert!(IdentityRepository::upgrade_hash(&app.db, created.id, "hash-2", "hash-3")
        .await
        .unwrap());

    let stored = IdentityRepository::find_by_id(&app.db, created.id)
        .await
        .unwrap()
        .unwrap();
    assert_eq!(stored.secret_hash, "hash-3");

    let err = IdentityRepository::update_hash(&app.db, Uuid::new_v4(), "hash-4")
        .await
        .unwrap_err();
    assert!(matches!(err, DbError::NotFound));
}

#[tokio::test]
#[ignore = "requires database"]
async fn test_disable_is_soft() {
    let app = common::TestApp::new().await;
    let created = IdentityRepository::create(&app.db, &new_identity(&unique_handle(), "hash-1"))
        .await
        .unwrap();

    IdentityRepository::disable(&app.db, created.id).await.unwrap();
    IdentityRepository::disable(&app.db, created.id).await.unwrap();

    let stored = IdentityRepository::find_by_id(&app.db, created.id)
        .await
        .unwrap()
        .unwrap();
    assert!(!stored.active);

    let err = IdentityRepository::disable(&app.db, Uuid::new_v4()).await.unwrap_err();
    assert!(matches!(err, DbError::NotFound));
}

#[tokio::test]
#[ignore = "requires database"]
async fn test_concurrent_rotations_with_same_secret() {
    let app = common::TestApp::new().await;
    let handle = unique_handle();
    let secret_hash = app.state.passwords().hash("Original123!").unwrap();
    let created = IdentityRepository::create(&app.db, &new_identity(&handle, &secret_hash))
        .await
        .unwrap();

    let user = AuthUser {
        identity_id: created.id,
        handle,
        role: Role::Artist,
        token_id: Uuid::new_v4().to_string(),
        expires_at: chrono::Utc::now(),
    };
    let request = |new_secret: &str| RotateSecretRequest {
        current_secret: "Original123!".to_string(),
        new_secret: new_secret.to_string(),
    };

    let (first, second) = tokio::join!(
        CredentialService::rotate_secret(&app.state, &user, request("FirstNew123!")),
        CredentialService::rotate_secret(&app.state, &user, request("SecondNew123!")),
    );

    let outcomes = [first, second];
    let successes = outcomes.iter().filter(|r| r.is_ok()).count();
    let rejected = outcomes
        .iter()
        .filter(|r| matches!(r, Err(ApiError::InvalidCredentials)))
        .count();
    assert_eq!(successes, 1);
    assert_eq!(rejected, 1);

    // The surviving hash belongs to whichever rotation won
    let stored = IdentityRepository::find_by_id(&app.db, created.id)
        .await
        .unwrap()
        .unwrap();
    let passwords = app.state.passwords();
    assert!(
        passwords.verify("FirstNew123!", &stored.secret_hash)
            ^ passwords.verify("SecondNew123!", &stored.secret_hash)
    );
}

#[tokio::test]
#[ignore = "requires database"]
async fn test_rotation_hashes_without_holding_a_lease() {
    let mut config = common::test_config();
    config.database.max_connections = 1;
    config.password.timeout_ms = 60_000;
    let app = common::TestApp::with_config(config.clone()).await;

    // A stored hash this costly keeps the rotation verifying for a while
    let slow = PasswordService::new(&PasswordConfig {
        memory_kib: 64 * 1024,
        iterations: 16,
        parallelism: 1,
        ..config.password.clone()
    })
    .unwrap();
    let handle = unique_handle();
    let created = IdentityRepository::create(
        &app.db,
        &new_identity(&handle, &slow.hash("Original123!").unwrap()),
    )
    .await
    .unwrap();
    let user = AuthUser {
        identity_id: created.id,
        handle,
        role: Role::Artist,
        token_id: Uuid::new_v4().to_string(),
        expires_at: chrono::Utc::now(),
    };

    let rotation = {
        let state = app.state.clone();
        tokio::spawn(async move {
            let request = RotateSecretRequest {
                current_secret: "Original123!".to_string(),
                new_secret: "Rotated123!".to_string(),
            };
            CredentialService::rotate_secret(&state, &user, request).await
        })
    };

    // The single pooled connection stays free while the rotation hashes
    tokio::time::sleep(Duration::from_millis(200)).await;
    assert!(!rotation.is_finished());
    let lease = app.db.acquire_within(Duration::from_millis(500)).await;
    assert!(lease.is_ok());
    drop(lease);

    rotation.await.unwrap().unwrap();
    assert_eq!(app.db.stats().leased, 0);
}
