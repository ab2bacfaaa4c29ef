//! End-to-end session scenarios against the mock provider
//!
//! Each test injects an isolated `MockStore`, so scenarios can run
//! concurrently.

use authkit::{
    AuthError, MockProvider, MockStart, MockStore, ProviderKind, ProviderOption, SessionManager,
};
use std::sync::Arc;
use std::time::Duration;

fn init_tracing() {
    let _ = tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .try_init();
}

fn mock_manager(start: MockStart) -> (SessionManager, Arc<MockStore>) {
    init_tracing();
    let store = MockStore::new();
    let manager = SessionManager::new(ProviderOption::Mock {
        start,
        store: store.clone(),
    })
    .expect("mock provider construction is infallible");
    (manager, store)
}

#[tokio::test]
async fn fresh_install_to_anonymous_session() {
    let (manager, _) = mock_manager(MockStart::SignedOut);

    // Fresh install: nobody signed in
    assert!(manager.current_user().is_none());
    assert_eq!(manager.session_id().unwrap_err(), AuthError::NotSignedIn);

    let result = manager.sign_in_anonymously().await.unwrap();
    assert!(result.is_new_user);
    assert!(result.user.is_anonymous);
    assert_eq!(manager.current_user(), Some(result.user));
}

#[tokio::test]
async fn anonymous_upgrade_preserves_identity() {
    let (manager, _) = mock_manager(MockStart::SignedOut);

    let anon = manager.sign_in_anonymously().await.unwrap();
    let upgraded = manager.sign_in_with_google("client-id").await.unwrap();

    assert_eq!(upgraded.user.uid, anon.user.uid);
    assert!(!upgraded.user.is_anonymous);
    assert!(upgraded.user.has_provider(ProviderKind::Google));
    assert_eq!(manager.session_id().unwrap(), anon.user.uid);
}

#[tokio::test]
async fn anonymous_upgrade_with_claimed_credential_replaces_identity() {
    let (manager, store) = mock_manager(MockStart::SignedOut);
    store.seed_claimed(
        "mock-google-token",
        authkit::UserProfile::new("someone-else"),
    );

    let anon = manager.sign_in_anonymously().await.unwrap();
    let replaced = manager.sign_in_with_google("client-id").await.unwrap();

    assert_ne!(replaced.user.uid, anon.user.uid);
    assert!(!replaced.user.is_anonymous);
    assert_eq!(manager.session_id().unwrap(), "someone-else");
}

#[tokio::test]
async fn phone_sign_in_two_step_flow() {
    let (manager, _) = mock_manager(MockStart::SignedOut);

    let verification_id = manager
        .start_phone_verification("+15555550100")
        .await
        .unwrap();
    assert!(!verification_id.is_empty());

    let result = manager.verify_phone_code("000000").await.unwrap();
    assert_eq!(result.user.phone_number.as_deref(), Some("+15555550100"));
    assert!(manager.is_signed_in());
}

#[tokio::test]
async fn phone_verify_without_start_fails() {
    let (manager, _) = mock_manager(MockStart::SignedOut);

    assert_eq!(
        manager.verify_phone_code("000000").await.unwrap_err(),
        AuthError::VerificationIdNotFound
    );
    assert!(!manager.is_signed_in());
}

#[tokio::test]
async fn sign_out_is_idempotent() {
    let (manager, _) = mock_manager(MockStart::SignedIn);

    manager.sign_out().await.unwrap();
    assert!(manager.current_user().is_none());

    // Already signed out: still a no-op success
    manager.sign_out().await.unwrap();
    assert!(manager.current_user().is_none());
}

#[tokio::test]
async fn delete_account_tears_down_session() {
    let (manager, _) = mock_manager(MockStart::SignedOut);
    manager.sign_in_with_apple().await.unwrap();

    manager.delete_account().await.unwrap();
    assert!(!manager.is_signed_in());
    assert_eq!(manager.session_id().unwrap_err(), AuthError::NotSignedIn);

    // The deleted identity is gone: the same credential mints a new one
    let again = manager.sign_in_with_apple().await.unwrap();
    assert!(again.is_new_user);
}

#[tokio::test]
async fn external_revocation_reaches_the_manager() {
    let (manager, store) = mock_manager(MockStart::SignedIn);
    assert!(manager.is_signed_in());

    store.externally_sign_out();

    for _ in 0..100 {
        if !manager.is_signed_in() {
            return;
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
    panic!("external sign-out never reached the manager");
}

#[tokio::test]
async fn two_managers_with_isolated_stores() {
    let (manager_a, _) = mock_manager(MockStart::SignedOut);
    let (manager_b, _) = mock_manager(MockStart::SignedOut);

    manager_a.sign_in_anonymously().await.unwrap();
    assert!(manager_a.is_signed_in());
    assert!(!manager_b.is_signed_in());
}

#[tokio::test]
async fn saved_state_survives_manager_restart() {
    init_tracing();
    let store = MockStore::new();

    {
        let provider = Arc::new(MockProvider::new(store.clone(), MockStart::SignedOut));
        let manager = SessionManager::from_provider(provider);
        manager.sign_in_with_google("client-id").await.unwrap();
    }

    // New manager over the same store picks the session back up
    let provider = Arc::new(MockProvider::new(store, MockStart::FromSavedState));
    let manager = SessionManager::from_provider(provider);
    assert!(manager.is_signed_in());
    assert_eq!(
        manager.current_user().unwrap().email.as_deref(),
        Some("mock123@mock.com")
    );
}
