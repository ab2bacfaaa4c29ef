//! Identity providers
//!
//! Each backend (real or mock) exposes the [`IdentityProvider`] capability.
//! Exactly one provider is bound to a
//! [`SessionManager`](crate::SessionManager) at construction and never
//! swapped at runtime; selection happens through [`ProviderOption`].

pub mod backend;
pub mod mock;

use crate::credential::CredentialPrompt;
use crate::error::AuthError;
use crate::types::{SignInResult, UserProfile};
use async_trait::async_trait;
use futures::Stream;
use std::pin::Pin;
use std::sync::Arc;

pub use backend::BackendProvider;
pub use mock::{MockProvider, MockStart, MockStore};

/// Boxed change-event stream yielded by [`IdentityProvider::change_stream`]
pub type ChangeStream = Pin<Box<dyn Stream<Item = Option<UserProfile>> + Send>>;

/// Polymorphic capability exposed by each identity backend
///
/// Implementations must apply the sign-in-or-link policy on every
/// non-anonymous sign-in: when the current identity is anonymous, first
/// attempt to link the new credential in place (preserving `uid`), and only
/// fall back to a fresh sign-in when linking fails. Callers must not assume
/// `uid` stability across such a call.
#[async_trait]
pub trait IdentityProvider: Send + Sync {
    /// Synchronous snapshot of the authenticated identity, no side effects
    fn authenticated_user(&self) -> Option<UserProfile>;

    /// Stream of identity changes, including external ones (e.g. revoked
    /// elsewhere).
    ///
    /// Subscribe at most once per provider instance per manager lifetime;
    /// re-subscription behavior is unspecified.
    fn change_stream(&self) -> ChangeStream;

    /// Create or resume an anonymous session
    async fn sign_in_anonymously(&self) -> Result<SignInResult, AuthError>;

    /// Sign in (or link) with a Google account
    async fn sign_in_with_google(&self, client_id: &str) -> Result<SignInResult, AuthError>;

    /// Sign in (or link) with an Apple ID
    async fn sign_in_with_apple(&self) -> Result<SignInResult, AuthError>;

    /// Send a verification code to the given phone number.
    ///
    /// The returned opaque verification id is also retained by the provider
    /// for the subsequent [`verify_phone_code`](Self::verify_phone_code).
    async fn start_phone_verification(&self, phone_number: &str) -> Result<String, AuthError>;

    /// Complete phone sign-in with the SMS code.
    ///
    /// Fails with [`AuthError::VerificationIdNotFound`] when no prior
    /// `start_phone_verification` succeeded in this provider lifetime.
    async fn verify_phone_code(&self, code: &str) -> Result<SignInResult, AuthError>;

    /// Tear down the session and clear provider-local state.
    ///
    /// Signing out while already signed out is a no-op success.
    async fn sign_out(&self) -> Result<(), AuthError>;

    /// Delete the authenticated account.
    ///
    /// Fails with [`AuthError::UserNotFound`] when nobody is signed in.
    async fn delete_account(&self) -> Result<(), AuthError>;
}

/// Provider selection supplied at manager construction
pub enum ProviderOption {
    /// Real identity backend
    Backend(BackendConfig),
    /// In-memory test double
    Mock {
        /// Fixed starting condition for the double
        start: MockStart,
        /// Backing store; inject a fresh one per test for isolation, or use
        /// [`MockStore::global`] to share state across managers
        store: Arc<MockStore>,
    },
}

/// Configuration for the real identity backend
pub struct BackendConfig {
    /// Backend project API key
    pub api_key: String,
    /// Native credential prompt supplied by the embedding application
    pub prompt: Arc<dyn CredentialPrompt>,
}

impl ProviderOption {
    /// Resolve the selection to a concrete provider
    pub fn into_provider(self) -> Result<Arc<dyn IdentityProvider>, AuthError> {
        match self {
            ProviderOption::Backend(config) => {
                Ok(Arc::new(BackendProvider::new(config)?) as Arc<dyn IdentityProvider>)
            }
            ProviderOption::Mock { start, store } => {
                Ok(Arc::new(MockProvider::new(store, start)) as Arc<dyn IdentityProvider>)
            }
        }
    }
}
