//! Error types
//!
//! A single `AuthError` covers every operation in the crate. Backend REST
//! error codes are mapped to variants via [`AuthError::from_error_code`];
//! anything unrecognized is passed through as [`AuthError::Backend`].

use thiserror::Error;

/// Authentication errors
///
/// Clone + PartialEq so callers can match on exact failures in tests.
/// Network failures are captured as strings to keep the type comparable.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum AuthError {
    /// The native credential prompt completed without success or failure
    #[error("Credential prompt returned no response")]
    NoResponse,

    /// Operation requires a signed-in session and none exists
    #[error("No user is currently signed in")]
    NotSignedIn,

    /// Backend has no authenticated identity for this operation
    #[error("Current user not found")]
    UserNotFound,

    /// `verify_phone_code` called without a prior successful
    /// `start_phone_verification` in this provider lifetime
    #[error("Phone verification ID not found")]
    VerificationIdNotFound,

    /// The phone verification code was rejected
    #[error("Invalid verification code")]
    InvalidVerificationCode,

    /// Credential is malformed or missing required tokens
    #[error("Invalid credential: {0}")]
    InvalidCredential(String),

    /// The credential is already linked to another identity
    #[error("Credential already in use by another account")]
    CredentialAlreadyInUse,

    /// An account already exists with the same email but a different credential
    #[error("Account exists with different credential")]
    AccountExistsWithDifferentCredential,

    /// User account has been disabled
    #[error("User account disabled")]
    UserDisabled,

    /// Too many failed attempts
    #[error("Too many requests, try again later")]
    TooManyRequests,

    /// Provider is disabled for this project
    #[error("Operation not allowed")]
    OperationNotAllowed,

    /// Session token has expired or been revoked
    #[error("User token expired")]
    UserTokenExpired,

    /// Backend API key missing at construction
    #[error("API key not configured")]
    ApiKeyNotConfigured,

    /// Network error
    #[error("Network error: {0}")]
    NetworkRequestFailed(String),

    /// Backend error code passed through unchanged
    #[error("Backend error: {0}")]
    Backend(String),
}

impl From<reqwest::Error> for AuthError {
    fn from(err: reqwest::Error) -> Self {
        Self::NetworkRequestFailed(err.to_string())
    }
}

impl AuthError {
    /// Create from an identity backend REST error code
    pub fn from_error_code(code: &str) -> Self {
        match code {
            "USER_NOT_FOUND" | "EMAIL_NOT_FOUND" => Self::UserNotFound,
            "USER_DISABLED" => Self::UserDisabled,
            "TOO_MANY_ATTEMPTS_TRY_LATER" => Self::TooManyRequests,
            "OPERATION_NOT_ALLOWED" => Self::OperationNotAllowed,
            "TOKEN_EXPIRED" | "INVALID_ID_TOKEN" => Self::UserTokenExpired,
            "INVALID_IDP_RESPONSE" => {
                Self::InvalidCredential("identity provider rejected the credential".to_string())
            }
            "FEDERATED_USER_ID_ALREADY_LINKED" | "CREDENTIAL_ALREADY_IN_USE" => {
                Self::CredentialAlreadyInUse
            }
            "ACCOUNT_EXISTS_WITH_DIFFERENT_CREDENTIAL" | "EMAIL_EXISTS" => {
                Self::AccountExistsWithDifferentCredential
            }
            "INVALID_CODE" | "INVALID_VERIFICATION_CODE" => Self::InvalidVerificationCode,
            "INVALID_SESSION_INFO" | "MISSING_SESSION_INFO" => Self::VerificationIdNotFound,
            other => Self::Backend(other.to_string()),
        }
    }

    /// Check if error is retryable by the caller
    pub fn is_retryable(&self) -> bool {
        matches!(self, Self::NetworkRequestFailed(_) | Self::TooManyRequests)
    }

    /// Check if error indicates a fresh sign-in is required
    pub fn requires_auth(&self) -> bool {
        matches!(
            self,
            Self::NotSignedIn | Self::UserNotFound | Self::UserTokenExpired
        )
    }
}
