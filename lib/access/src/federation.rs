//! Federation Client Adapter.
//!
//! Wraps the external OIDC client behind [`IdentityProvider`] and folds its
//! results into a single [`FederationOutcome`]: authenticated with claims,
//! declined by the user or provider, or a protocol error. Protocol errors are
//! never retried within a request.

use crate::auth::{CallbackParams, FederatedLogin, FlowState, IdentityClaims, LoginRedirect};
use crate::error::{ConfigError, ProviderError};
use async_trait::async_trait;
use rootcause::prelude::Report;
use std::sync::Arc;
use tracing::{info, instrument, warn};
use url::{Host, Url};

/// Tokens returned by a successful code or refresh grant.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ProviderGrant {
    pub access_token: String,
    pub refresh_token: Option<String>,
    /// Subject from a verified ID token, when the grant carried one.
    pub subject: Option<String>,
}

/// The external OIDC client.
///
/// Implementations own the wire protocol: discovery, the authorization-code
/// exchange, token verification, and the userinfo request.
#[async_trait]
pub trait IdentityProvider: Send + Sync {
    /// Returns the redirect URL registered for the callback.
    fn redirect_url(&self) -> &str;

    /// Replaces the redirect URL used for subsequent requests.
    fn set_redirect_url(&mut self, url: String) -> Result<(), Report<ProviderError>>;

    /// Builds the authorization URL and the state needed to finish the flow.
    fn authorization_url(&self) -> LoginRedirect;

    /// Exchanges an authorization code, verifying the ID token against `state`.
    async fn exchange_code(
        &self,
        code: &str,
        state: &FlowState,
    ) -> Result<ProviderGrant, Report<ProviderError>>;

    /// Runs the refresh-token grant.
    async fn refresh_token(&self, refresh_token: &str)
    -> Result<ProviderGrant, Report<ProviderError>>;

    /// Requests the subject's claims from the userinfo endpoint.
    async fn request_user_info(
        &self,
        grant: &ProviderGrant,
    ) -> Result<IdentityClaims, Report<ProviderError>>;
}

/// Result of a federation attempt.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum FederationOutcome {
    /// The provider vouched for the subject.
    Authenticated(FederatedLogin),
    /// The user cancelled, or the provider refused the grant.
    Declined { reason: String },
    /// Malformed response, network failure, or failed verification.
    ProtocolError { reason: String },
}

/// Adapter around an [`IdentityProvider`].
#[derive(Clone)]
pub struct FederationClient {
    provider: Arc<dyn IdentityProvider>,
}

impl FederationClient {
    /// Wraps `provider`, downgrading an HTTPS loopback redirect URL to HTTP.
    ///
    /// # Errors
    ///
    /// Returns `ConfigError::InvalidUrl` if the provider's redirect URL does
    /// not parse or cannot be rewritten.
    pub fn new<P>(mut provider: P) -> Result<Self, Report<ConfigError>>
    where
        P: IdentityProvider + 'static,
    {
        if let Some(normalized) = normalize_loopback_redirect(provider.redirect_url())? {
            info!(redirect_url = %normalized, "using plain HTTP for loopback redirect");
            provider
                .set_redirect_url(normalized)
                .map_err(|e| ConfigError::InvalidUrl {
                    field: "redirect_uri",
                    reason: e.to_string(),
                })?;
        }

        Ok(Self {
            provider: Arc::new(provider),
        })
    }

    /// Returns the redirect URL the provider will call back to.
    #[must_use]
    pub fn redirect_url(&self) -> &str {
        self.provider.redirect_url()
    }

    /// Starts the redirect-based login.
    #[must_use]
    pub fn begin(&self) -> LoginRedirect {
        self.provider.authorization_url()
    }

    /// Finishes the login from the provider's callback.
    #[instrument(skip_all)]
    pub async fn complete(&self, callback: &CallbackParams, state: &FlowState) -> FederationOutcome {
        if callback.state.as_deref() != Some(state.csrf_token.as_str()) {
            return protocol_error("state parameter does not match".to_string());
        }

        if let Some(error) = &callback.error {
            let reason = match &callback.error_description {
                Some(description) => format!("{error}: {description}"),
                None => error.clone(),
            };
            if callback.is_declined() {
                info!(%reason, "user declined federated login");
                return FederationOutcome::Declined { reason };
            }
            return protocol_error(reason);
        }

        let Some(code) = callback.code.as_deref() else {
            return protocol_error("callback carried no authorization code".to_string());
        };

        match self.provider.exchange_code(code, state).await {
            Ok(grant) => self.finish(grant).await,
            Err(report) => from_provider_report(&report),
        }
    }

    /// Re-authenticates silently with an IdP refresh token.
    #[instrument(skip_all)]
    pub async fn refresh(&self, refresh_token: &str) -> FederationOutcome {
        match self.provider.refresh_token(refresh_token).await {
            Ok(grant) => self.finish(grant).await,
            Err(report) => from_provider_report(&report),
        }
    }

    async fn finish(&self, grant: ProviderGrant) -> FederationOutcome {
        let mut claims = match self.provider.request_user_info(&grant).await {
            Ok(claims) => claims,
            Err(report) => return from_provider_report(&report),
        };

        if let Some(verified) = grant.subject.as_deref() {
            if claims
                .subject
                .as_deref()
                .is_some_and(|reported| reported != verified)
            {
                return protocol_error("userinfo subject differs from ID token".to_string());
            }
            claims.subject.get_or_insert_with(|| verified.to_string());
        }

        FederationOutcome::Authenticated(FederatedLogin {
            claims,
            refresh_token: grant.refresh_token,
        })
    }
}

fn protocol_error(reason: String) -> FederationOutcome {
    warn!(%reason, "federation protocol error");
    FederationOutcome::ProtocolError { reason }
}

fn from_provider_report(report: &Report<ProviderError>) -> FederationOutcome {
    match report.current_context() {
        ProviderError::Rejected { reason } => {
            info!(%reason, "identity provider declined the grant");
            FederationOutcome::Declined {
                reason: reason.clone(),
            }
        }
        other => protocol_error(other.to_string()),
    }
}

/// Rewrites `https://` to `http://` when the redirect target is a loopback host.
///
/// Returns `None` when no rewrite is needed.
pub fn normalize_loopback_redirect(redirect_url: &str) -> Result<Option<String>, ConfigError> {
    let mut url = Url::parse(redirect_url).map_err(|e| ConfigError::InvalidUrl {
        field: "redirect_uri",
        reason: e.to_string(),
    })?;

    if url.scheme() != "https" {
        return Ok(None);
    }

    let loopback = match url.host() {
        Some(Host::Domain(domain)) => domain.eq_ignore_ascii_case("localhost"),
        Some(Host::Ipv4(ip)) => ip.is_loopback(),
        Some(Host::Ipv6(ip)) => ip.is_loopback(),
        None => false,
    };
    if !loopback {
        return Ok(None);
    }

    url.set_scheme("http")
        .map_err(|()| ConfigError::InvalidUrl {
            field: "redirect_uri",
            reason: "cannot switch scheme to http".to_string(),
        })?;
    Ok(Some(url.to_string()))
}
