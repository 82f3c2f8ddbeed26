//! OIDC (OpenID Connect) configuration.
//!
//! This module provides configuration types for connecting to an external
//! OIDC identity provider for user authentication.

use crate::error::ConfigError;
use rootcause::prelude::Report;
use serde::{Deserialize, Serialize};
use url::Url;

/// Configuration for the OIDC identity provider.
///
/// Fields with defaults can be omitted when loading from environment variables.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct OidcConfig {
    /// The OIDC issuer URL (e.g., "https://auth.example.com/realms/main").
    /// Used for OIDC discovery.
    issuer_url: String,
    /// The OAuth2 client ID registered with the provider.
    client_id: String,
    /// The OAuth2 client secret.
    client_secret: String,
    /// The redirect URI for the OAuth2 callback (e.g., "https://app.example.com/auth/callback").
    redirect_uri: String,
    /// OAuth2 scopes to request as a comma-separated string.
    /// Default: "openid,email,profile"
    #[serde(default = "default_scopes")]
    scopes: String,
}

fn default_scopes() -> String {
    "openid,email,profile".to_string()
}

impl OidcConfig {
    /// Creates a new OIDC configuration with the default scopes.
    #[must_use]
    pub fn new(
        issuer_url: String,
        client_id: String,
        client_secret: String,
        redirect_uri: String,
    ) -> Self {
        Self {
            issuer_url,
            client_id,
            client_secret,
            redirect_uri,
            scopes: default_scopes(),
        }
    }

    /// Replaces the requested scopes.
    #[must_use]
    pub fn with_scopes(mut self, scopes: &[&str]) -> Self {
        self.scopes = scopes.join(",");
        self
    }

    /// Checks that every required value is present and well-formed.
    ///
    /// # Errors
    ///
    /// Returns `ConfigError::EmptyField` for an empty issuer URL, client ID,
    /// client secret or redirect URI, and `ConfigError::InvalidUrl` if either
    /// URL does not parse.
    pub fn validate(&self) -> Result<(), Report<ConfigError>> {
        for (field, value) in [
            ("issuer_url", &self.issuer_url),
            ("client_id", &self.client_id),
            ("client_secret", &self.client_secret),
            ("redirect_uri", &self.redirect_uri),
        ] {
            if value.trim().is_empty() {
                return Err(ConfigError::EmptyField { field }.into());
            }
        }

        for (field, value) in [
            ("issuer_url", &self.issuer_url),
            ("redirect_uri", &self.redirect_uri),
        ] {
            Url::parse(value).map_err(|e| ConfigError::InvalidUrl {
                field,
                reason: e.to_string(),
            })?;
        }

        Ok(())
    }

    /// Returns the OIDC issuer URL.
    #[must_use]
    pub fn issuer_url(&self) -> &str {
        &self.issuer_url
    }

    /// Returns the OAuth2 client ID.
    #[must_use]
    pub fn client_id(&self) -> &str {
        &self.client_id
    }

    /// Returns the OAuth2 client secret.
    #[must_use]
    pub fn client_secret(&self) -> &str {
        &self.client_secret
    }

    /// Returns the OAuth2 redirect URI.
    #[must_use]
    pub fn redirect_uri(&self) -> &str {
        &self.redirect_uri
    }

    /// Returns the OAuth2 scopes to request, parsed from comma-separated string.
    #[must_use]
    pub fn scopes(&self) -> Vec<&str> {
        self.scopes
            .split(',')
            .map(str::trim)
            .filter(|s| !s.is_empty())
            .collect()
    }
}
