//! Authkit
//!
//! Unified authentication session manager over pluggable identity providers
//! (real backend or in-memory mock), with anonymous-to-permanent account
//! linking, credential exchange and an observable session model.
//!
//! # Example (mock provider)
//! ```no_run
//! # async fn example() -> Result<(), Box<dyn std::error::Error>> {
//! use authkit::{MockStart, MockStore, ProviderOption, SessionManager};
//!
//! let manager = SessionManager::new(ProviderOption::Mock {
//!     start: MockStart::SignedOut,
//!     store: MockStore::new(),
//! })?;
//!
//! let result = manager.sign_in_anonymously().await?;
//! println!("Signed in: {}", result.user.uid);
//! # Ok(())
//! # }
//! ```

#![warn(missing_docs)]
#![warn(clippy::all)]

pub mod credential;
pub mod error;
pub mod manager;
pub mod provider;
pub mod types;

// Re-exports for convenience
pub use credential::{ApplePromptResponse, Credential, CredentialPrompt, GooglePromptResponse};
pub use error::AuthError;
pub use manager::SessionManager;
pub use provider::{
    BackendConfig, BackendProvider, IdentityProvider, MockProvider, MockStart, MockStore,
    ProviderOption,
};
pub use types::{CredentialProfile, ProviderKind, SignInResult, UserProfile};
