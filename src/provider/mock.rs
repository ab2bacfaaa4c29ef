//! In-memory test double
//!
//! `MockProvider` implements the full provider contract against a
//! [`MockStore`]. The store is constructor-injected so tests can run
//! isolated instances concurrently; [`MockStore::global`] remains as the
//! process-wide default for application previews.
//!
//! The store tracks which credential tokens are already claimed, so the
//! sign-in-or-link fallback path (credential owned by another identity) is
//! exercisable without a real backend.

use crate::error::AuthError;
use crate::provider::{ChangeStream, IdentityProvider};
use crate::types::{CredentialProfile, ProviderKind, SignInResult, UserProfile};
use async_stream::stream;
use async_trait::async_trait;
use chrono::Utc;
use once_cell::sync::Lazy;
use std::collections::HashMap;
use std::sync::{Arc, RwLock};
use std::time::Duration;
use tokio::sync::broadcast;
use uuid::Uuid;

static GLOBAL_STORE: Lazy<Arc<MockStore>> = Lazy::new(MockStore::new);

/// Fixed starting condition for the test double
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MockStart {
    /// Keep whatever the injected store currently holds
    FromSavedState,
    /// Start with the canned mock user signed in
    SignedIn,
    /// Start signed out
    SignedOut,
}

/// Federated account the mock's canned prompts resolve to
#[derive(Debug, Clone)]
pub struct MockFederatedAccount {
    /// Credential token; the claimed-credential map is keyed by this
    pub token: String,
    /// Account email
    pub email: Option<String>,
    /// Profile fields the credential carries
    pub profile: CredentialProfile,
}

struct MockState {
    current: Option<UserProfile>,
    /// credential token -> identity that owns it
    claimed: HashMap<String, UserProfile>,
    google: MockFederatedAccount,
    apple: MockFederatedAccount,
    next_error: Option<AuthError>,
}

/// In-memory identity database backing one or more [`MockProvider`]s
pub struct MockStore {
    state: RwLock<MockState>,
    state_tx: broadcast::Sender<Option<UserProfile>>,
}

impl MockStore {
    /// Create an isolated store
    pub fn new() -> Arc<Self> {
        let (state_tx, _) = broadcast::channel(16);
        Arc::new(Self {
            state: RwLock::new(MockState {
                current: None,
                claimed: HashMap::new(),
                google: MockFederatedAccount {
                    token: "mock-google-token".to_string(),
                    email: Some("mock123@mock.com".to_string()),
                    profile: CredentialProfile {
                        display_name: Some("Mock User".to_string()),
                        first_name: Some("Mock".to_string()),
                        last_name: Some("User".to_string()),
                        photo_url: None,
                    },
                },
                apple: MockFederatedAccount {
                    token: "mock-apple-token".to_string(),
                    email: Some("mock123@mock.com".to_string()),
                    profile: CredentialProfile {
                        first_name: Some("Mock".to_string()),
                        last_name: Some("User".to_string()),
                        ..Default::default()
                    },
                },
                next_error: None,
            }),
            state_tx,
        })
    }

    /// Process-wide shared store
    pub fn global() -> Arc<Self> {
        GLOBAL_STORE.clone()
    }

    /// Snapshot of the signed-in identity
    pub fn current(&self) -> Option<UserProfile> {
        self.state.read().unwrap().current.clone()
    }

    /// Replace the account the canned Google prompt resolves to
    pub fn set_google_account(&self, account: MockFederatedAccount) {
        self.state.write().unwrap().google = account;
    }

    /// Replace the account the canned Apple prompt resolves to
    pub fn set_apple_account(&self, account: MockFederatedAccount) {
        self.state.write().unwrap().apple = account;
    }

    /// Pre-claim a credential token for an existing identity, so a later
    /// link attempt with that token fails and falls back to a fresh sign-in
    pub fn seed_claimed(&self, token: impl Into<String>, profile: UserProfile) {
        self.state
            .write()
            .unwrap()
            .claimed
            .insert(token.into(), profile);
    }

    /// Fail the next sign-in operation with the given error
    pub fn fail_next(&self, error: AuthError) {
        self.state.write().unwrap().next_error = Some(error);
    }

    /// Revoke the session from outside the provider (models an admin
    /// console deleting the account); pushes `None` on the change stream
    pub fn externally_sign_out(&self) {
        let previous = self.state.write().unwrap().current.take();
        if previous.is_some() {
            let _ = self.state_tx.send(None);
        }
    }

    fn set_current(&self, user: UserProfile) {
        self.state.write().unwrap().current = Some(user.clone());
        let _ = self.state_tx.send(Some(user));
    }

    fn clear_current(&self) {
        let previous = self.state.write().unwrap().current.take();
        if previous.is_some() {
            let _ = self.state_tx.send(None);
        }
    }
}

/// The canned mock user used by [`MockStart::SignedIn`]
pub fn mock_user() -> UserProfile {
    UserProfile {
        uid: "mock123".to_string(),
        email: Some("mock123@mock.com".to_string()),
        display_name: Some("Mock User".to_string()),
        phone_number: Some("1-234-5678".to_string()),
        providers: vec![ProviderKind::Mock],
        ..UserProfile::new("mock123")
    }
}

/// In-memory identity provider
pub struct MockProvider {
    store: Arc<MockStore>,
    pending_verification: RwLock<Option<PendingVerification>>,
}

struct PendingVerification {
    verification_id: String,
    phone_number: String,
}

impl MockProvider {
    /// Bind a provider to the store with the given starting condition
    pub fn new(store: Arc<MockStore>, start: MockStart) -> Self {
        match start {
            MockStart::FromSavedState => {}
            MockStart::SignedIn => {
                // Shape the store silently; nobody is listening yet
                store.state.write().unwrap().current = Some(mock_user());
            }
            MockStart::SignedOut => {
                store.state.write().unwrap().current = None;
            }
        }

        Self {
            store,
            pending_verification: RwLock::new(None),
        }
    }

    fn take_injected_error(&self) -> Result<(), AuthError> {
        if let Some(err) = self.store.state.write().unwrap().next_error.take() {
            return Err(err);
        }
        Ok(())
    }

    /// Shared sign-in-or-link flow for every non-anonymous method.
    ///
    /// `is_new_user` means the credential token was never claimed before;
    /// only then does the one-time profile backfill run.
    fn federated_sign_in(
        &self,
        kind: ProviderKind,
        token: String,
        email: Option<String>,
        phone_number: Option<String>,
        credential_profile: CredentialProfile,
    ) -> SignInResult {
        let now = Utc::now();
        let mut state = self.store.state.write().unwrap();

        let anonymous = state.current.clone().filter(|u| u.is_anonymous);

        let (mut user, is_new_user) = if let Some(anon) = anonymous {
            if let Some(owner) = state.claimed.get(&token).cloned() {
                // Credential belongs to another identity: link fails and the
                // fallback sign-in replaces the anonymous identity.
                tracing::warn!(
                    provider = kind.as_str(),
                    error = %AuthError::CredentialAlreadyInUse,
                    "credential link failed, falling back to fresh sign-in"
                );
                (owner, false)
            } else {
                // Upgrade in place, preserving uid
                let mut upgraded = anon;
                upgraded.is_anonymous = false;
                upgraded.push_provider(kind);
                if upgraded.email.is_none() {
                    upgraded.email = email;
                }
                (upgraded, true)
            }
        } else if let Some(owner) = state.claimed.get(&token).cloned() {
            (owner, false)
        } else {
            let mut fresh = UserProfile::new(format!("mock-{}", Uuid::new_v4().simple()));
            fresh.email = email;
            fresh.providers = vec![kind];
            fresh.creation_time = Some(now);
            (fresh, true)
        };

        if is_new_user {
            user.merge_missing_from(&credential_profile);
        }
        if user.phone_number.is_none() {
            user.phone_number = phone_number;
        }
        user.last_sign_in_time = Some(now);

        state.claimed.insert(token, user.clone());
        state.current = Some(user.clone());
        drop(state);

        let _ = self.store.state_tx.send(Some(user.clone()));
        tracing::debug!(uid = %user.uid, provider = kind.as_str(), is_new_user, "mock sign-in");
        SignInResult { user, is_new_user }
    }
}

#[async_trait]
impl IdentityProvider for MockProvider {
    fn authenticated_user(&self) -> Option<UserProfile> {
        self.store.current()
    }

    fn change_stream(&self) -> ChangeStream {
        let initial = self.store.current();
        let mut rx = self.store.state_tx.subscribe();

        Box::pin(stream! {
            yield initial;

            loop {
                let user = match rx.recv().await {
                    Ok(user) => user,
                    Err(broadcast::error::RecvError::Lagged(skipped)) => {
                        // Slow listener: drop the missed updates and resync
                        tracing::debug!(skipped, "change stream lagged");
                        continue;
                    }
                    Err(broadcast::error::RecvError::Closed) => break,
                };
                yield user;
            }
        })
    }

    async fn sign_in_anonymously(&self) -> Result<SignInResult, AuthError> {
        self.take_injected_error()?;
        tokio::time::sleep(Duration::from_millis(10)).await;

        let now = Utc::now();
        let user = UserProfile {
            is_anonymous: true,
            providers: vec![ProviderKind::Anonymous],
            creation_time: Some(now),
            last_sign_in_time: Some(now),
            ..UserProfile::new(format!("mock-anon-{}", Uuid::new_v4().simple()))
        };

        self.store.set_current(user.clone());
        Ok(SignInResult {
            user,
            is_new_user: true,
        })
    }

    async fn sign_in_with_google(&self, _client_id: &str) -> Result<SignInResult, AuthError> {
        self.take_injected_error()?;
        tokio::time::sleep(Duration::from_millis(10)).await;

        let account = self.store.state.read().unwrap().google.clone();
        Ok(self.federated_sign_in(
            ProviderKind::Google,
            account.token,
            account.email,
            None,
            account.profile,
        ))
    }

    async fn sign_in_with_apple(&self) -> Result<SignInResult, AuthError> {
        self.take_injected_error()?;
        tokio::time::sleep(Duration::from_millis(10)).await;

        let account = self.store.state.read().unwrap().apple.clone();
        Ok(self.federated_sign_in(
            ProviderKind::Apple,
            account.token,
            account.email,
            None,
            account.profile,
        ))
    }

    async fn start_phone_verification(&self, phone_number: &str) -> Result<String, AuthError> {
        self.take_injected_error()?;
        if phone_number.is_empty() {
            return Err(AuthError::InvalidCredential(
                "phone number cannot be empty".to_string(),
            ));
        }

        let verification_id = Uuid::new_v4().simple().to_string();
        *self.pending_verification.write().unwrap() = Some(PendingVerification {
            verification_id: verification_id.clone(),
            phone_number: phone_number.to_string(),
        });
        Ok(verification_id)
    }

    async fn verify_phone_code(&self, code: &str) -> Result<SignInResult, AuthError> {
        self.take_injected_error()?;

        let phone_number = {
            let pending = self.pending_verification.read().unwrap();
            pending
                .as_ref()
                .map(|p| p.phone_number.clone())
                .ok_or(AuthError::VerificationIdNotFound)?
        };

        if code.is_empty() {
            return Err(AuthError::InvalidVerificationCode);
        }

        Ok(self.federated_sign_in(
            ProviderKind::Phone,
            format!("phone:{}", phone_number),
            None,
            Some(phone_number),
            CredentialProfile::default(),
        ))
    }

    async fn sign_out(&self) -> Result<(), AuthError> {
        self.take_injected_error()?;

        *self.pending_verification.write().unwrap() = None;
        self.store.clear_current();
        Ok(())
    }

    async fn delete_account(&self) -> Result<(), AuthError> {
        self.take_injected_error()?;

        let uid = {
            let state = self.store.state.read().unwrap();
            state
                .current
                .as_ref()
                .map(|u| u.uid.clone())
                .ok_or(AuthError::UserNotFound)?
        };

        {
            let mut state = self.store.state.write().unwrap();
            state.claimed.retain(|_, owner| owner.uid != uid);
            state.current = None;
        }
        *self.pending_verification.write().unwrap() = None;
        let _ = self.store.state_tx.send(None);
        Ok(())
    }
}
