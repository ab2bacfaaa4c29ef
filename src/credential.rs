//! Credential exchange
//!
//! Per-method flows produce a federated [`Credential`] from the output of a
//! native OS prompt. The prompt itself is an external collaborator behind
//! [`CredentialPrompt`]; the core consumes only its final output. A prompt
//! that resolves to `Ok(None)` completed without success or failure and is
//! treated as [`AuthError::NoResponse`](crate::AuthError::NoResponse), never
//! as silent success.

use crate::types::{CredentialProfile, ProviderKind};
use async_trait::async_trait;
use rand::Rng;

/// Federated credential produced by a credential-exchange flow
#[derive(Debug, Clone, PartialEq)]
pub enum Credential {
    /// Google Sign-In tokens
    Google {
        /// OIDC ID token
        id_token: String,
        /// OAuth access token, when the picker returns one
        access_token: Option<String>,
    },

    /// Sign in with Apple tokens
    Apple {
        /// Apple identity token
        id_token: String,
        /// The unhashed nonce the flow generated before prompting
        raw_nonce: String,
    },

    /// Phone verification code bound to a verification session
    Phone {
        /// Opaque id returned by `start_phone_verification`
        verification_id: String,
        /// SMS code entered by the user
        code: String,
    },
}

impl Credential {
    /// The credential kind this exchanges for
    pub fn kind(&self) -> ProviderKind {
        match self {
            Credential::Google { .. } => ProviderKind::Google,
            Credential::Apple { .. } => ProviderKind::Apple,
            Credential::Phone { .. } => ProviderKind::Phone,
        }
    }

    /// Backend provider id for this credential
    pub fn provider_id(&self) -> &'static str {
        self.kind().as_str()
    }
}

/// Output of the native Google account picker
#[derive(Debug, Clone, Default)]
pub struct GooglePromptResponse {
    /// OIDC ID token
    pub id_token: String,
    /// OAuth access token
    pub access_token: Option<String>,
    /// Account email
    pub email: Option<String>,
    /// Account display name
    pub display_name: Option<String>,
    /// Given name
    pub first_name: Option<String>,
    /// Family name
    pub last_name: Option<String>,
    /// Profile image URL
    pub profile_image_url: Option<String>,
}

impl GooglePromptResponse {
    /// Profile fields to backfill on first-time sign-in
    pub fn credential_profile(&self) -> CredentialProfile {
        CredentialProfile {
            display_name: self.display_name.clone(),
            first_name: self.first_name.clone(),
            last_name: self.last_name.clone(),
            photo_url: self.profile_image_url.clone(),
        }
    }
}

/// Output of the native Apple ID authorization flow
///
/// Apple only reports name components on the very first authorization, so
/// the display name derives from "first last", falling back to the nickname.
#[derive(Debug, Clone, Default)]
pub struct ApplePromptResponse {
    /// Apple identity token
    pub id_token: String,
    /// Account email (first authorization only)
    pub email: Option<String>,
    /// Given name
    pub first_name: Option<String>,
    /// Family name
    pub last_name: Option<String>,
    /// Nickname
    pub nickname: Option<String>,
}

impl ApplePromptResponse {
    /// Full name composed from first and last name
    pub fn full_name(&self) -> Option<String> {
        match (&self.first_name, &self.last_name) {
            (Some(first), Some(last)) => Some(format!("{} {}", first, last)),
            (Some(first), None) => Some(first.clone()),
            (None, Some(last)) => Some(last.clone()),
            (None, None) => None,
        }
    }

    /// Display name: full name, falling back to nickname
    pub fn display_name(&self) -> Option<String> {
        self.full_name().or_else(|| self.nickname.clone())
    }

    /// Profile fields to backfill on first-time sign-in
    pub fn credential_profile(&self) -> CredentialProfile {
        CredentialProfile {
            display_name: self.display_name(),
            first_name: self.first_name.clone(),
            last_name: self.last_name.clone(),
            photo_url: None,
        }
    }
}

/// Native OS credential prompt (account picker / biometric flow)
///
/// Implemented by the embedding application; the core never drives UI
/// itself. Returning `Ok(None)` means the flow completed without producing
/// either a credential or an error.
#[async_trait]
pub trait CredentialPrompt: Send + Sync {
    /// Present the Google account picker
    async fn prompt_google(
        &self,
        client_id: &str,
    ) -> Result<Option<GooglePromptResponse>, crate::AuthError>;

    /// Present the Apple ID authorization flow.
    ///
    /// `raw_nonce` is the unhashed nonce; the OS flow is expected to send its
    /// SHA-256 digest with the authorization request.
    async fn prompt_apple(
        &self,
        raw_nonce: &str,
    ) -> Result<Option<ApplePromptResponse>, crate::AuthError>;
}

const NONCE_CHARSET: &[u8] = b"0123456789ABCDEFGHIJKLMNOPQRSTUVXYZabcdefghijklmnopqrstuvwxyz-._";

/// Generate a random nonce for the Apple authorization request
pub fn random_nonce(length: usize) -> String {
    assert!(length > 0);
    let mut rng = rand::thread_rng();
    (0..length)
        .map(|_| {
            let idx = rng.gen_range(0..NONCE_CHARSET.len());
            NONCE_CHARSET[idx] as char
        })
        .collect()
}
