//! Real identity backend provider
//!
//! Talks to an identitytoolkit-style REST backend. Credential exchange for
//! Google/Apple goes through the injected [`CredentialPrompt`]; the provider
//! consumes only the prompt's final output.
//!
//! Provider-local state besides the session itself: the pending phone
//! verification id (two-step protocol) and the first/last names cached from
//! the external credential on first sign-in. Both are cleared on
//! sign-out/delete.

use crate::credential::{random_nonce, Credential, CredentialPrompt};
use crate::error::AuthError;
use crate::provider::{BackendConfig, ChangeStream, IdentityProvider};
use crate::types::{CredentialProfile, ProviderKind, SignInResult, UserProfile};
use async_stream::stream;
use async_trait::async_trait;
use chrono::Utc;
use serde::Deserialize;
use std::sync::{Arc, RwLock};
use tokio::sync::broadcast;

const IDENTITY_BASE_URL: &str = "https://identitytoolkit.googleapis.com/v1";

/// Identity backend provider
///
/// Cheap to clone; all state lives behind an `Arc`'d inner.
#[derive(Clone)]
pub struct BackendProvider {
    inner: Arc<BackendInner>,
}

struct BackendInner {
    api_key: String,
    http: reqwest::Client,
    prompt: Arc<dyn CredentialPrompt>,
    session: RwLock<Option<BackendSession>>,
    state_tx: broadcast::Sender<Option<UserProfile>>,
    pending_verification: RwLock<Option<String>>,
    cached_names: RwLock<CachedNames>,
}

/// Authenticated session: profile plus the tokens backing it
#[derive(Clone)]
struct BackendSession {
    profile: UserProfile,
    id_token: String,
    #[allow(dead_code)]
    refresh_token: String,
}

#[derive(Default)]
struct CachedNames {
    first_name: Option<String>,
    last_name: Option<String>,
}

impl BackendProvider {
    /// Create a provider for the given backend project
    pub fn new(config: BackendConfig) -> Result<Self, AuthError> {
        if config.api_key.is_empty() {
            return Err(AuthError::ApiKeyNotConfigured);
        }

        let http = reqwest::Client::builder()
            .timeout(std::time::Duration::from_secs(30))
            .build()
            .map_err(|e| {
                AuthError::NetworkRequestFailed(format!("failed to create HTTP client: {}", e))
            })?;

        let (state_tx, _) = broadcast::channel(16);

        Ok(Self {
            inner: Arc::new(BackendInner {
                api_key: config.api_key,
                http,
                prompt: config.prompt,
                session: RwLock::new(None),
                state_tx,
                pending_verification: RwLock::new(None),
                cached_names: RwLock::new(CachedNames::default()),
            }),
        })
    }

    /// First name cached from the external credential on first sign-in
    pub fn cached_first_name(&self) -> Option<String> {
        self.inner.cached_names.read().unwrap().first_name.clone()
    }

    /// Last name cached from the external credential on first sign-in
    pub fn cached_last_name(&self) -> Option<String> {
        self.inner.cached_names.read().unwrap().last_name.clone()
    }

    async fn post_json(
        &self,
        endpoint: &str,
        body: serde_json::Value,
    ) -> Result<serde_json::Value, AuthError> {
        let url = format!(
            "{}/accounts:{}?key={}",
            IDENTITY_BASE_URL, endpoint, self.inner.api_key
        );

        let response = self.inner.http.post(&url).json(&body).send().await?;

        // Error responses first
        if !response.status().is_success() {
            let error_body: serde_json::Value = response.json().await?;
            let code = error_body["error"]["message"]
                .as_str()
                .unwrap_or("UNKNOWN_ERROR");
            return Err(AuthError::from_error_code(code));
        }

        Ok(response.json().await?)
    }

    /// Exchange a federated credential for a backend session.
    ///
    /// `link_id_token` carries the current session's token when the exchange
    /// should link the credential to the existing (anonymous) identity.
    async fn exchange(
        &self,
        credential: &Credential,
        link_id_token: Option<&str>,
    ) -> Result<FederatedSignInResponse, AuthError> {
        let (endpoint, mut body) = match credential {
            Credential::Google {
                id_token,
                access_token,
            } => {
                let mut post_body = format!("id_token={}&providerId=google.com", id_token);
                if let Some(access_token) = access_token {
                    post_body.push_str(&format!("&access_token={}", access_token));
                }
                (
                    "signInWithIdp",
                    serde_json::json!({
                        "postBody": post_body,
                        "requestUri": "http://localhost",
                        "returnSecureToken": true,
                        "returnIdpCredential": true
                    }),
                )
            }
            Credential::Apple {
                id_token,
                raw_nonce,
            } => {
                let post_body = format!(
                    "id_token={}&providerId=apple.com&nonce={}",
                    id_token, raw_nonce
                );
                (
                    "signInWithIdp",
                    serde_json::json!({
                        "postBody": post_body,
                        "requestUri": "http://localhost",
                        "returnSecureToken": true,
                        "returnIdpCredential": true
                    }),
                )
            }
            Credential::Phone {
                verification_id,
                code,
            } => (
                "signInWithPhoneNumber",
                serde_json::json!({
                    "sessionInfo": verification_id,
                    "code": code,
                    "returnSecureToken": true
                }),
            ),
        };

        if let Some(id_token) = link_id_token {
            body["idToken"] = serde_json::json!(id_token);
        }

        let value = self.post_json(endpoint, body).await?;
        serde_json::from_value(value)
            .map_err(|e| AuthError::NetworkRequestFailed(format!("malformed response: {}", e)))
    }

    /// Attempt to link the credential to the current anonymous identity,
    /// falling back to a fresh sign-in when linking fails.
    ///
    /// The swallowed link error is surfaced at `warn`; the fallback sign-in
    /// replaces the anonymous identity, so `uid` is not stable across this
    /// call.
    async fn sign_in_or_link(
        &self,
        credential: &Credential,
    ) -> Result<FederatedSignInResponse, AuthError> {
        let anonymous_token = {
            let session = self.inner.session.read().unwrap();
            session
                .as_ref()
                .filter(|s| s.profile.is_anonymous)
                .map(|s| s.id_token.clone())
        };

        if let Some(id_token) = anonymous_token {
            match self.exchange(credential, Some(&id_token)).await {
                Ok(response) => return Ok(response),
                Err(err) => {
                    tracing::warn!(
                        provider = credential.provider_id(),
                        error = %err,
                        "credential link failed, falling back to fresh sign-in"
                    );
                }
            }
        }

        self.exchange(credential, None).await
    }

    /// Complete a federated sign-in: build the profile, run the one-time
    /// new-user backfill, install the session and publish the change.
    async fn finish_federated(
        &self,
        response: FederatedSignInResponse,
        credential_profile: CredentialProfile,
        kind: ProviderKind,
    ) -> Result<SignInResult, AuthError> {
        // Backend omits the flag on some link paths; first-time is the safe
        // assumption there (mirrors the upstream SDK behavior).
        let is_new_user = response.is_new_user.unwrap_or(true);

        let now = Utc::now();
        let mut profile = UserProfile {
            uid: response.local_id.clone(),
            email: response.email.clone(),
            display_name: response.display_name.clone(),
            first_name: response.first_name.clone(),
            last_name: response.last_name.clone(),
            phone_number: response.phone_number.clone(),
            photo_url: response.photo_url.clone(),
            is_anonymous: false,
            providers: vec![kind],
            creation_time: is_new_user.then_some(now),
            last_sign_in_time: Some(now),
        };

        if is_new_user {
            {
                let mut names = self.inner.cached_names.write().unwrap();
                if credential_profile.first_name.is_some() {
                    names.first_name = credential_profile.first_name.clone();
                }
                if credential_profile.last_name.is_some() {
                    names.last_name = credential_profile.last_name.clone();
                }
            }

            if profile.merge_missing_from(&credential_profile) {
                self.push_profile_update(&response.id_token, &profile).await?;
            }
        }

        self.install_session(BackendSession {
            profile: profile.clone(),
            id_token: response.id_token,
            refresh_token: response.refresh_token,
        });

        tracing::debug!(uid = %profile.uid, provider = kind.as_str(), is_new_user, "signed in");
        Ok(SignInResult {
            user: profile,
            is_new_user,
        })
    }

    /// Write backfilled display name / photo URL to the backend profile
    async fn push_profile_update(
        &self,
        id_token: &str,
        profile: &UserProfile,
    ) -> Result<(), AuthError> {
        let mut body = serde_json::json!({
            "idToken": id_token,
            "returnSecureToken": false
        });
        if let Some(display_name) = &profile.display_name {
            body["displayName"] = serde_json::json!(display_name);
        }
        if let Some(photo_url) = &profile.photo_url {
            body["photoUrl"] = serde_json::json!(photo_url);
        }

        self.post_json("update", body).await?;
        Ok(())
    }

    fn install_session(&self, session: BackendSession) {
        let profile = session.profile.clone();
        *self.inner.session.write().unwrap() = Some(session);
        let _ = self.inner.state_tx.send(Some(profile));
    }

    /// Local teardown shared by sign-out and delete
    fn clear_local_state(&self) {
        let previous = self.inner.session.write().unwrap().take();
        *self.inner.pending_verification.write().unwrap() = None;
        *self.inner.cached_names.write().unwrap() = CachedNames::default();

        // No spurious event when there was no session
        if previous.is_some() {
            let _ = self.inner.state_tx.send(None);
        }
    }

    #[cfg(test)]
    pub(crate) fn install_test_session(&self, profile: UserProfile) {
        self.install_session(BackendSession {
            profile,
            id_token: "test-id-token".to_string(),
            refresh_token: "test-refresh-token".to_string(),
        });
    }
}

#[async_trait]
impl IdentityProvider for BackendProvider {
    fn authenticated_user(&self) -> Option<UserProfile> {
        self.inner
            .session
            .read()
            .unwrap()
            .as_ref()
            .map(|s| s.profile.clone())
    }

    fn change_stream(&self) -> ChangeStream {
        let initial = self.authenticated_user();
        let mut rx = self.inner.state_tx.subscribe();

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
        let value = self
            .post_json("signUp", serde_json::json!({ "returnSecureToken": true }))
            .await?;
        let response: SignUpResponse = serde_json::from_value(value)
            .map_err(|e| AuthError::NetworkRequestFailed(format!("malformed response: {}", e)))?;

        let now = Utc::now();
        let profile = UserProfile {
            uid: response.local_id,
            is_anonymous: true,
            providers: vec![ProviderKind::Anonymous],
            creation_time: Some(now),
            last_sign_in_time: Some(now),
            ..UserProfile::new("")
        };

        self.install_session(BackendSession {
            profile: profile.clone(),
            id_token: response.id_token,
            refresh_token: response.refresh_token,
        });

        tracing::debug!(uid = %profile.uid, "signed in anonymously");
        Ok(SignInResult {
            user: profile,
            is_new_user: true,
        })
    }

    async fn sign_in_with_google(&self, client_id: &str) -> Result<SignInResult, AuthError> {
        let response = self
            .inner
            .prompt
            .prompt_google(client_id)
            .await?
            .ok_or(AuthError::NoResponse)?;

        let credential_profile = response.credential_profile();
        let credential = Credential::Google {
            id_token: response.id_token,
            access_token: response.access_token,
        };

        let exchanged = self.sign_in_or_link(&credential).await?;
        self.finish_federated(exchanged, credential_profile, ProviderKind::Google)
            .await
    }

    async fn sign_in_with_apple(&self) -> Result<SignInResult, AuthError> {
        let raw_nonce = random_nonce(32);
        let response = self
            .inner
            .prompt
            .prompt_apple(&raw_nonce)
            .await?
            .ok_or(AuthError::NoResponse)?;

        let credential_profile = response.credential_profile();
        let credential = Credential::Apple {
            id_token: response.id_token,
            raw_nonce,
        };

        let exchanged = self.sign_in_or_link(&credential).await?;
        self.finish_federated(exchanged, credential_profile, ProviderKind::Apple)
            .await
    }

    async fn start_phone_verification(&self, phone_number: &str) -> Result<String, AuthError> {
        if phone_number.is_empty() {
            return Err(AuthError::InvalidCredential(
                "phone number cannot be empty".to_string(),
            ));
        }

        let value = self
            .post_json(
                "sendVerificationCode",
                serde_json::json!({ "phoneNumber": phone_number }),
            )
            .await?;

        let verification_id = value["sessionInfo"]
            .as_str()
            .ok_or_else(|| {
                AuthError::NetworkRequestFailed("missing sessionInfo in response".to_string())
            })?
            .to_string();

        *self.inner.pending_verification.write().unwrap() = Some(verification_id.clone());
        Ok(verification_id)
    }

    async fn verify_phone_code(&self, code: &str) -> Result<SignInResult, AuthError> {
        let verification_id = self
            .inner
            .pending_verification
            .read()
            .unwrap()
            .clone()
            .ok_or(AuthError::VerificationIdNotFound)?;

        let credential = Credential::Phone {
            verification_id,
            code: code.to_string(),
        };

        let exchanged = self.sign_in_or_link(&credential).await?;
        self.finish_federated(exchanged, CredentialProfile::default(), ProviderKind::Phone)
            .await
    }

    async fn sign_out(&self) -> Result<(), AuthError> {
        // Session teardown is local: tokens are bearer credentials, dropping
        // them ends the session.
        self.clear_local_state();
        Ok(())
    }

    async fn delete_account(&self) -> Result<(), AuthError> {
        let id_token = {
            let session = self.inner.session.read().unwrap();
            session
                .as_ref()
                .map(|s| s.id_token.clone())
                .ok_or(AuthError::UserNotFound)?
        };

        self.post_json("delete", serde_json::json!({ "idToken": id_token }))
            .await?;

        self.clear_local_state();
        Ok(())
    }
}

impl std::fmt::Debug for BackendProvider {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("BackendProvider")
            .field("api_key", &"<redacted>")
            .finish()
    }
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct SignUpResponse {
    local_id: String,
    id_token: String,
    refresh_token: String,
}

/// Response shared by `signInWithIdp` and `signInWithPhoneNumber`
#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct FederatedSignInResponse {
    local_id: String,
    email: Option<String>,
    display_name: Option<String>,
    photo_url: Option<String>,
    first_name: Option<String>,
    last_name: Option<String>,
    phone_number: Option<String>,
    id_token: String,
    refresh_token: String,
    is_new_user: Option<bool>,
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::credential::{ApplePromptResponse, GooglePromptResponse};
    use futures::StreamExt;

    /// Prompt double whose flows complete without a result
    struct SilentPrompt;

    #[async_trait]
    impl CredentialPrompt for SilentPrompt {
        async fn prompt_google(
            &self,
            _client_id: &str,
        ) -> Result<Option<GooglePromptResponse>, AuthError> {
            Ok(None)
        }

        async fn prompt_apple(
            &self,
            _raw_nonce: &str,
        ) -> Result<Option<ApplePromptResponse>, AuthError> {
            Ok(None)
        }
    }

    fn provider() -> BackendProvider {
        BackendProvider::new(BackendConfig {
            api_key: "test-api-key".to_string(),
            prompt: Arc::new(SilentPrompt),
        })
        .unwrap()
    }

    #[test]
    fn test_empty_api_key_rejected() {
        let result = BackendProvider::new(BackendConfig {
            api_key: String::new(),
            prompt: Arc::new(SilentPrompt),
        });
        assert!(matches!(result, Err(AuthError::ApiKeyNotConfigured)));
    }

    #[test]
    fn test_initially_signed_out() {
        assert!(provider().authenticated_user().is_none());
    }

    #[tokio::test]
    async fn test_silent_prompt_is_no_response() {
        let provider = provider();
        assert_eq!(
            provider.sign_in_with_google("client-id").await.unwrap_err(),
            AuthError::NoResponse
        );
        assert_eq!(
            provider.sign_in_with_apple().await.unwrap_err(),
            AuthError::NoResponse
        );
        // Prompt failure never installs a session
        assert!(provider.authenticated_user().is_none());
    }

    #[tokio::test]
    async fn test_verify_without_start_fails() {
        let provider = provider();
        assert_eq!(
            provider.verify_phone_code("000000").await.unwrap_err(),
            AuthError::VerificationIdNotFound
        );
    }

    #[tokio::test]
    async fn test_empty_phone_number_rejected() {
        let provider = provider();
        assert!(matches!(
            provider.start_phone_verification("").await,
            Err(AuthError::InvalidCredential(_))
        ));
    }

    #[tokio::test]
    async fn test_delete_without_session_fails() {
        let provider = provider();
        assert_eq!(
            provider.delete_account().await.unwrap_err(),
            AuthError::UserNotFound
        );
    }

    #[tokio::test]
    async fn test_sign_out_when_signed_out_is_noop() {
        let provider = provider();
        provider.sign_out().await.unwrap();
        assert!(provider.authenticated_user().is_none());
    }

    #[tokio::test]
    async fn test_sign_out_clears_session_and_publishes() {
        let provider = provider();
        provider.install_test_session(UserProfile::new("u1"));
        assert!(provider.authenticated_user().is_some());

        let mut stream = provider.change_stream();
        // Initial snapshot
        assert_eq!(stream.next().await.unwrap().unwrap().uid, "u1");

        provider.sign_out().await.unwrap();
        assert!(provider.authenticated_user().is_none());
        assert!(stream.next().await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_change_stream_initial_state() {
        let provider = provider();
        let mut stream = provider.change_stream();
        assert!(stream.next().await.unwrap().is_none());
    }
}
