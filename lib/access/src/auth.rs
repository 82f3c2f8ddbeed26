//! Values exchanged during the federated login flow.
//!
//! The OIDC handshake spans two requests: the first issues a redirect to the
//! provider together with a [`FlowState`], the second is the provider's
//! callback carrying [`CallbackParams`]. The caller is responsible for keeping
//! the flow state between the two (the server keeps it in a short-lived cookie).

use serde::{Deserialize, Serialize};

/// OIDC error codes that mean the user (or the provider on their behalf)
/// declined to sign in, as opposed to a protocol failure.
const DECLINED_ERRORS: &[&str] = &[
    "access_denied",
    "login_required",
    "consent_required",
    "interaction_required",
];

/// Claims about the authenticated subject returned by the IdP.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct IdentityClaims {
    /// The `sub` claim. Without it no user can be resolved.
    pub subject: Option<String>,
    /// The `preferred_username` claim.
    pub preferred_username: Option<String>,
    /// The `email` claim.
    pub email: Option<String>,
}

impl IdentityClaims {
    /// Creates claims for the given subject.
    #[must_use]
    pub fn new(subject: impl Into<String>) -> Self {
        Self {
            subject: Some(subject.into()),
            ..Self::default()
        }
    }

    /// Sets the `preferred_username` claim.
    #[must_use]
    pub fn with_preferred_username(mut self, username: Option<String>) -> Self {
        self.preferred_username = username;
        self
    }

    /// Sets the `email` claim.
    #[must_use]
    pub fn with_email(mut self, email: Option<String>) -> Self {
        self.email = email;
        self
    }
}

/// A successful federation: the subject's claims plus the IdP refresh token.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FederatedLogin {
    pub claims: IdentityClaims,
    /// Refresh token issued (or rotated) by the IdP, if any.
    pub refresh_token: Option<String>,
}

/// State that correlates a login redirect with its callback.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FlowState {
    pub csrf_token: String,
    pub pkce_verifier: String,
    pub nonce: String,
}

/// Where to send the browser to start the federated login.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LoginRedirect {
    /// The provider's authorization URL.
    pub authorization_url: String,
    /// Must be presented again when the callback arrives.
    pub state: FlowState,
}

/// Query parameters of the provider's callback.
#[derive(Debug, Clone, Default, PartialEq, Eq, Deserialize)]
pub struct CallbackParams {
    pub code: Option<String>,
    pub state: Option<String>,
    pub error: Option<String>,
    pub error_description: Option<String>,
}

impl CallbackParams {
    /// Returns true if the provider reports that the user declined.
    #[must_use]
    pub fn is_declined(&self) -> bool {
        self.error
            .as_deref()
            .is_some_and(|error| DECLINED_ERRORS.contains(&error))
    }
}
