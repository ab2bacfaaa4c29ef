//! Session manager
//!
//! Owns the current-session state, mediates sign-in/out/delete calls to the
//! bound [`IdentityProvider`] and republishes provider change events into
//! the single `current` slot.
//!
//! Local state only mutates after the provider call succeeds, so the local
//! session never drifts ahead of confirmed backend state. The change-stream
//! listener runs only while signed in: sign-in success is confirmed
//! synchronously by the call itself, and passively streaming at the same
//! time would race the two updates. The listener is the one path that can
//! move the session to signed-out without an explicit local call (external
//! revocation).

use crate::error::AuthError;
use crate::provider::{IdentityProvider, ProviderOption};
use crate::types::{SignInResult, UserProfile};
use futures::StreamExt;
use std::sync::{Arc, Mutex, RwLock, Weak};
use tokio::task::JoinHandle;

/// Unified session manager over one identity provider
///
/// Cheap to clone; clones share the same session state. Must be created
/// inside a tokio runtime, since the change-stream listener is a spawned
/// task.
#[derive(Clone)]
pub struct SessionManager {
    inner: Arc<ManagerInner>,
}

struct ManagerInner {
    provider: Arc<dyn IdentityProvider>,
    current: RwLock<Option<UserProfile>>,
    listener: Mutex<Option<JoinHandle<()>>>,
}

impl SessionManager {
    /// Create a manager for the configured provider
    pub fn new(option: ProviderOption) -> Result<Self, AuthError> {
        Ok(Self::from_provider(option.into_provider()?))
    }

    /// Create a manager bound to the given provider for its lifetime
    pub fn from_provider(provider: Arc<dyn IdentityProvider>) -> Self {
        let current = provider.authenticated_user();
        let signed_in = current.is_some();

        let manager = Self {
            inner: Arc::new(ManagerInner {
                provider,
                current: RwLock::new(current),
                listener: Mutex::new(None),
            }),
        };

        // Only stream while signed in; while signed out the next transition
        // is confirmed synchronously by the sign-in call itself.
        if signed_in {
            manager.ensure_listener();
        }
        manager
    }

    /// Snapshot of the signed-in user, `None` when signed out
    pub fn current_user(&self) -> Option<UserProfile> {
        self.inner.current.read().unwrap().clone()
    }

    /// Whether a session is currently authenticated
    pub fn is_signed_in(&self) -> bool {
        self.inner.current.read().unwrap().is_some()
    }

    /// Stable id of the authenticated session.
    ///
    /// Fails with [`AuthError::NotSignedIn`] when signed out. On failure the
    /// manager also force-signs-out locally (best effort) to guard against
    /// the state "local id missing but provider still thinks signed in".
    pub fn session_id(&self) -> Result<String, AuthError> {
        let uid = self
            .inner
            .current
            .read()
            .unwrap()
            .as_ref()
            .map(|u| u.uid.clone());

        match uid {
            Some(uid) => Ok(uid),
            None => {
                tracing::debug!("session id requested while signed out, forcing local sign-out");
                self.clear_local_session();
                Err(AuthError::NotSignedIn)
            }
        }
    }

    /// Create or resume an anonymous session
    pub async fn sign_in_anonymously(&self) -> Result<SignInResult, AuthError> {
        let result = self.inner.provider.sign_in_anonymously().await?;
        self.apply_sign_in(&result);
        Ok(result)
    }

    /// Sign in (or link) with a Google account
    pub async fn sign_in_with_google(&self, client_id: &str) -> Result<SignInResult, AuthError> {
        let result = self.inner.provider.sign_in_with_google(client_id).await?;
        self.apply_sign_in(&result);
        Ok(result)
    }

    /// Sign in (or link) with an Apple ID
    pub async fn sign_in_with_apple(&self) -> Result<SignInResult, AuthError> {
        let result = self.inner.provider.sign_in_with_apple().await?;
        self.apply_sign_in(&result);
        Ok(result)
    }

    /// Send a verification code to the given phone number.
    ///
    /// Does not change session state; the returned verification id is also
    /// retained by the provider for [`verify_phone_code`](Self::verify_phone_code).
    pub async fn start_phone_verification(
        &self,
        phone_number: &str,
    ) -> Result<String, AuthError> {
        self.inner.provider.start_phone_verification(phone_number).await
    }

    /// Complete phone sign-in with the SMS code
    pub async fn verify_phone_code(&self, code: &str) -> Result<SignInResult, AuthError> {
        let result = self.inner.provider.verify_phone_code(code).await?;
        self.apply_sign_in(&result);
        Ok(result)
    }

    /// Sign out and clear local session state.
    ///
    /// Safe to call while already signed out. On provider failure local
    /// state is untouched.
    pub async fn sign_out(&self) -> Result<(), AuthError> {
        self.inner.provider.sign_out().await?;
        self.clear_local_session();
        tracing::debug!("signed out");
        Ok(())
    }

    /// Delete the authenticated account; same local cleanup as sign-out.
    ///
    /// On provider failure local state is untouched and the error propagates
    /// unchanged.
    pub async fn delete_account(&self) -> Result<(), AuthError> {
        self.inner.provider.delete_account().await?;
        self.clear_local_session();
        tracing::debug!("account deleted");
        Ok(())
    }

    fn apply_sign_in(&self, result: &SignInResult) {
        *self.inner.current.write().unwrap() = Some(result.user.clone());
        self.ensure_listener();
    }

    /// Subscribe to provider change events. Idempotent: a live listener is
    /// left alone.
    fn ensure_listener(&self) {
        let mut guard = self.inner.listener.lock().unwrap();
        if guard.as_ref().is_some_and(|handle| !handle.is_finished()) {
            return;
        }

        let mut stream = self.inner.provider.change_stream();
        // Weak so the listener never keeps the manager alive
        let weak: Weak<ManagerInner> = Arc::downgrade(&self.inner);

        *guard = Some(tokio::spawn(async move {
            while let Some(user) = stream.next().await {
                let Some(inner) = weak.upgrade() else { break };
                if user.is_none() {
                    tracing::debug!("session revoked by provider change event");
                }
                *inner.current.write().unwrap() = user;
            }
        }));
    }

    /// Cancel the listener and drop the local session
    fn clear_local_session(&self) {
        if let Some(handle) = self.inner.listener.lock().unwrap().take() {
            handle.abort();
        }
        *self.inner.current.write().unwrap() = None;
    }
}

impl Drop for ManagerInner {
    fn drop(&mut self) {
        // Never leave the listener dangling
        if let Some(handle) = self.listener.lock().unwrap().take() {
            handle.abort();
        }
    }
}

impl std::fmt::Debug for SessionManager {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SessionManager")
            .field("signed_in", &self.is_signed_in())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::provider::{MockProvider, MockStart, MockStore};
    use std::time::Duration;

    fn mock_manager(start: MockStart) -> (SessionManager, Arc<MockStore>) {
        let store = MockStore::new();
        let provider = Arc::new(MockProvider::new(store.clone(), start));
        (SessionManager::from_provider(provider), store)
    }

    /// Poll until the listener applies the expected signed-in state
    async fn wait_for_signed_in(manager: &SessionManager, expected: bool) {
        for _ in 0..100 {
            if manager.is_signed_in() == expected {
                return;
            }
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
        panic!("manager never reached signed_in == {}", expected);
    }

    #[tokio::test]
    async fn test_construction_hydrates_from_provider() {
        let (manager, _) = mock_manager(MockStart::SignedIn);
        assert!(manager.is_signed_in());
        assert_eq!(manager.session_id().unwrap(), "mock123");

        let (manager, _) = mock_manager(MockStart::SignedOut);
        assert!(!manager.is_signed_in());
    }

    #[tokio::test]
    async fn test_current_tracks_last_successful_sign_in() {
        let (manager, _) = mock_manager(MockStart::SignedOut);

        let anon = manager.sign_in_anonymously().await.unwrap();
        assert_eq!(manager.current_user(), Some(anon.user));

        let google = manager.sign_in_with_google("client-id").await.unwrap();
        assert_eq!(manager.current_user(), Some(google.user));
    }

    #[tokio::test]
    async fn test_failed_sign_in_leaves_current_unchanged() {
        let (manager, store) = mock_manager(MockStart::SignedOut);
        let before = manager.sign_in_anonymously().await.unwrap().user;

        store.fail_next(AuthError::NetworkRequestFailed("offline".to_string()));
        let err = manager.sign_in_with_google("client-id").await.unwrap_err();
        assert_eq!(err, AuthError::NetworkRequestFailed("offline".to_string()));
        assert_eq!(manager.current_user(), Some(before));
    }

    #[tokio::test]
    async fn test_sign_out_then_session_id_fails() {
        let (manager, _) = mock_manager(MockStart::SignedIn);
        manager.sign_out().await.unwrap();
        assert_eq!(manager.session_id().unwrap_err(), AuthError::NotSignedIn);
        assert!(manager.current_user().is_none());
    }

    #[tokio::test]
    async fn test_sign_out_while_signed_out_is_noop() {
        let (manager, _) = mock_manager(MockStart::SignedOut);
        manager.sign_out().await.unwrap();
        assert!(manager.current_user().is_none());
    }

    #[tokio::test]
    async fn test_delete_account_clears_session() {
        let (manager, _) = mock_manager(MockStart::SignedOut);
        manager.sign_in_anonymously().await.unwrap();

        manager.delete_account().await.unwrap();
        assert!(!manager.is_signed_in());
        assert_eq!(manager.session_id().unwrap_err(), AuthError::NotSignedIn);
    }

    #[tokio::test]
    async fn test_delete_failure_leaves_state_untouched() {
        let (manager, _) = mock_manager(MockStart::SignedOut);
        // Nobody signed in: provider rejects, local state already None
        assert_eq!(
            manager.delete_account().await.unwrap_err(),
            AuthError::UserNotFound
        );
        assert!(!manager.is_signed_in());
    }

    #[tokio::test]
    async fn test_sign_out_failure_leaves_session_intact() {
        let (manager, store) = mock_manager(MockStart::SignedOut);
        let user = manager.sign_in_anonymously().await.unwrap().user;

        store.fail_next(AuthError::NetworkRequestFailed("offline".to_string()));
        let err = manager.sign_out().await.unwrap_err();
        assert_eq!(err, AuthError::NetworkRequestFailed("offline".to_string()));
        assert_eq!(manager.current_user(), Some(user));

        // The listener survived the failed call: revocation still lands
        store.externally_sign_out();
        wait_for_signed_in(&manager, false).await;
    }

    #[tokio::test]
    async fn test_delete_failure_while_signed_in_leaves_session_intact() {
        let (manager, store) = mock_manager(MockStart::SignedOut);
        let user = manager.sign_in_anonymously().await.unwrap().user;
        let uid = user.uid.clone();

        store.fail_next(AuthError::TooManyRequests);
        assert_eq!(
            manager.delete_account().await.unwrap_err(),
            AuthError::TooManyRequests
        );
        assert_eq!(manager.current_user(), Some(user));
        assert_eq!(manager.session_id().unwrap(), uid);
    }

    #[tokio::test]
    async fn test_external_revocation_signs_manager_out() {
        let (manager, store) = mock_manager(MockStart::SignedIn);
        assert!(manager.is_signed_in());

        store.externally_sign_out();
        wait_for_signed_in(&manager, false).await;
        assert!(manager.current_user().is_none());
    }

    #[tokio::test]
    async fn test_listener_resumes_after_sign_out_sign_in_cycle() {
        let (manager, store) = mock_manager(MockStart::SignedOut);

        manager.sign_in_anonymously().await.unwrap();
        manager.sign_out().await.unwrap();
        manager.sign_in_anonymously().await.unwrap();

        store.externally_sign_out();
        wait_for_signed_in(&manager, false).await;
    }

    #[tokio::test]
    async fn test_clones_share_session_state() {
        let (manager, _) = mock_manager(MockStart::SignedOut);
        let clone = manager.clone();

        manager.sign_in_anonymously().await.unwrap();
        assert!(clone.is_signed_in());

        clone.sign_out().await.unwrap();
        assert!(!manager.is_signed_in());
    }
}
