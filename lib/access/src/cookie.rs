//! Cookie directives emitted by the authenticator.
//!
//! The core never touches HTTP state. It returns a list of directives that
//! the web layer renders into `Set-Cookie` headers. Every cookie is `Secure`,
//! `HttpOnly` and `SameSite=Strict`; a clear uses the same path and domain as
//! the set with an expiry in the past.

use crate::error::ConfigError;
use crate::session::SessionToken;
use chrono::{DateTime, Duration, Utc};
use rootcause::prelude::Report;

/// Default lifetime of the refresh cookie.
pub const DEFAULT_REFRESH_COOKIE_HOURS: i64 = 8;

/// The cookies managed by the authenticator.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum CookieName {
    /// Carries the session token id.
    Auth,
    /// Carries the IdP refresh token.
    Refresh,
}

impl CookieName {
    /// Returns the cookie's wire name.
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Auth => "auth",
            Self::Refresh => "refresh",
        }
    }
}

/// A single cookie to set or clear on the response.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CookieDirective {
    pub name: CookieName,
    /// Empty for a clear.
    pub value: String,
    pub path: String,
    pub domain: String,
    pub expires: DateTime<Utc>,
    /// True if this directive deletes the cookie.
    pub removal: bool,
}

/// Where and for how long the authenticator's cookies live.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CookiePolicy {
    domain: String,
    auth_path: String,
    refresh_path: String,
    refresh_lifetime: Duration,
}

impl CookiePolicy {
    /// Creates a policy.
    ///
    /// # Errors
    ///
    /// Returns `ConfigError::EmptyField` if the domain is empty.
    pub fn new(
        domain: impl Into<String>,
        auth_path: impl Into<String>,
        refresh_path: impl Into<String>,
        refresh_lifetime: Duration,
    ) -> Result<Self, Report<ConfigError>> {
        let domain = domain.into();
        if domain.trim().is_empty() {
            return Err(ConfigError::EmptyField {
                field: "cookie_domain",
            }
            .into());
        }
        Ok(Self {
            domain,
            auth_path: auth_path.into(),
            refresh_path: refresh_path.into(),
            refresh_lifetime,
        })
    }

    /// Returns the cookie domain.
    #[must_use]
    pub fn domain(&self) -> &str {
        &self.domain
    }

    /// Returns the path scope of the `auth` cookie.
    #[must_use]
    pub fn auth_path(&self) -> &str {
        &self.auth_path
    }

    /// Returns the path scope of the `refresh` cookie.
    #[must_use]
    pub fn refresh_path(&self) -> &str {
        &self.refresh_path
    }

    /// Sets `auth` to the token, expiring with it.
    #[must_use]
    pub fn set_auth(&self, token: &SessionToken) -> CookieDirective {
        self.directive(
            CookieName::Auth,
            token.id().as_str().to_string(),
            token.valid_till(),
            false,
        )
    }

    /// Sets `refresh` for a fixed lifetime from `now`.
    #[must_use]
    pub fn set_refresh(&self, refresh_token: &str, now: DateTime<Utc>) -> CookieDirective {
        self.directive(
            CookieName::Refresh,
            refresh_token.to_string(),
            now + self.refresh_lifetime,
            false,
        )
    }

    /// Clears `name` with an expiry one hour before `now`.
    #[must_use]
    pub fn clear(&self, name: CookieName, now: DateTime<Utc>) -> CookieDirective {
        self.directive(name, String::new(), now - Duration::hours(1), true)
    }

    fn directive(
        &self,
        name: CookieName,
        value: String,
        expires: DateTime<Utc>,
        removal: bool,
    ) -> CookieDirective {
        let path = match name {
            CookieName::Auth => &self.auth_path,
            CookieName::Refresh => &self.refresh_path,
        };
        CookieDirective {
            name,
            value,
            path: path.clone(),
            domain: self.domain.clone(),
            expires,
            removal,
        }
    }
}
