//! Core identity types
//!
//! `UserProfile` is the normalized identity record every provider returns.
//! It is an immutable value: operations that change the authenticated
//! identity produce a new profile rather than mutating in place.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Credential kinds that can be linked to an identity
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ProviderKind {
    /// Anonymous (temporary) account
    Anonymous,
    /// Google account
    Google,
    /// Apple ID
    Apple,
    /// Email + password
    Password,
    /// Phone number verification
    Phone,
    /// In-memory test double
    Mock,
}

impl ProviderKind {
    /// Wire identifier used by the identity backend
    pub fn as_str(&self) -> &'static str {
        match self {
            ProviderKind::Anonymous => "anonymous",
            ProviderKind::Google => "google.com",
            ProviderKind::Apple => "apple.com",
            ProviderKind::Password => "password",
            ProviderKind::Phone => "phone",
            ProviderKind::Mock => "mock",
        }
    }

    /// Parse a backend provider id; unknown ids yield None
    pub fn from_provider_id(id: &str) -> Option<Self> {
        match id {
            "anonymous" => Some(ProviderKind::Anonymous),
            "google.com" => Some(ProviderKind::Google),
            "apple.com" => Some(ProviderKind::Apple),
            "password" => Some(ProviderKind::Password),
            "phone" => Some(ProviderKind::Phone),
            "mock" => Some(ProviderKind::Mock),
            _ => None,
        }
    }
}

/// Normalized identity record
///
/// A profile exists iff a session is authenticated. `uid` is never empty.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct UserProfile {
    /// Opaque, stable identifier (primary key)
    pub uid: String,

    /// Email address (if available)
    pub email: Option<String>,

    /// Display name (if available)
    pub display_name: Option<String>,

    /// First name from the external credential (if available)
    pub first_name: Option<String>,

    /// Last name from the external credential (if available)
    pub last_name: Option<String>,

    /// Phone number (if available)
    pub phone_number: Option<String>,

    /// Photo URL (if available)
    pub photo_url: Option<String>,

    /// Whether this is a temporary anonymous account
    pub is_anonymous: bool,

    /// Credential kinds linked to this identity
    pub providers: Vec<ProviderKind>,

    /// When the account was created
    pub creation_time: Option<DateTime<Utc>>,

    /// Last sign-in time
    pub last_sign_in_time: Option<DateTime<Utc>>,
}

impl UserProfile {
    /// Create a minimal profile with just a uid
    pub fn new(uid: impl Into<String>) -> Self {
        Self {
            uid: uid.into(),
            email: None,
            display_name: None,
            first_name: None,
            last_name: None,
            phone_number: None,
            photo_url: None,
            is_anonymous: false,
            providers: vec![],
            creation_time: None,
            last_sign_in_time: None,
        }
    }

    /// Whether the given credential kind is already linked
    pub fn has_provider(&self, kind: ProviderKind) -> bool {
        self.providers.contains(&kind)
    }

    /// Record a newly linked credential kind
    pub(crate) fn push_provider(&mut self, kind: ProviderKind) {
        if !self.providers.contains(&kind) {
            self.providers.push(kind);
        }
    }

    /// One-time new-user enrichment from an external credential.
    ///
    /// Fills display name, first/last name and photo URL only where this
    /// profile has none. Never called for returning users, so a later
    /// sign-in with a different external name does not overwrite.
    pub fn merge_missing_from(&mut self, credential: &CredentialProfile) -> bool {
        let mut changed = false;
        if self.display_name.is_none() && credential.display_name().is_some() {
            self.display_name = credential.display_name();
            changed = true;
        }
        if self.first_name.is_none() && credential.first_name.is_some() {
            self.first_name = credential.first_name.clone();
            changed = true;
        }
        if self.last_name.is_none() && credential.last_name.is_some() {
            self.last_name = credential.last_name.clone();
            changed = true;
        }
        if self.photo_url.is_none() && credential.photo_url.is_some() {
            self.photo_url = credential.photo_url.clone();
            changed = true;
        }
        changed
    }
}

/// Profile fields carried by an external credential (Apple/Google)
#[derive(Debug, Clone, Default, PartialEq)]
pub struct CredentialProfile {
    /// Display name as reported by the external account
    pub display_name: Option<String>,
    /// First (given) name
    pub first_name: Option<String>,
    /// Last (family) name
    pub last_name: Option<String>,
    /// Profile image URL
    pub photo_url: Option<String>,
}

impl CredentialProfile {
    /// Display name, falling back to "first last" composition
    pub fn display_name(&self) -> Option<String> {
        if self.display_name.is_some() {
            return self.display_name.clone();
        }
        match (&self.first_name, &self.last_name) {
            (Some(first), Some(last)) => Some(format!("{} {}", first, last)),
            (Some(first), None) => Some(first.clone()),
            (None, Some(last)) => Some(last.clone()),
            (None, None) => None,
        }
    }
}

/// Result of a successful sign-in
#[derive(Debug, Clone, PartialEq)]
pub struct SignInResult {
    /// The signed-in user
    pub user: UserProfile,
    /// Whether this is the backend's first-ever authentication of this identity
    pub is_new_user: bool,
}
