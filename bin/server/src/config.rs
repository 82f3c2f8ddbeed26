//! Centralized server configuration.
//!
//! This module provides strongly-typed configuration for the server,
//! loaded via the `config` crate from environment variables. Nested keys use
//! a `__` separator, so `SESSION__WINDOW_MINUTES` sets `session.window_minutes`.
//!
//! See [`OidcConfig`](gatehouse_access::OidcConfig) for OIDC configuration.

use chrono::Duration;
use gatehouse_access::{
    ConfigError, CookiePolicy, DEFAULT_REFRESH_COOKIE_HOURS, DEFAULT_SESSION_WINDOW_MINUTES,
    OidcConfig, SessionPolicy,
};
use rootcause::prelude::Report;
use serde::Deserialize;

/// Server configuration composed from library configs.
#[derive(Debug, Deserialize)]
pub struct ServerConfig {
    /// PostgreSQL database connection URL.
    pub database_url: String,

    /// Address the HTTP listener binds to.
    #[serde(default = "default_bind_addr")]
    pub bind_addr: String,

    /// Upper bound on acquiring a database connection and on each statement,
    /// in seconds.
    #[serde(default = "default_database_timeout_seconds")]
    pub database_timeout_seconds: u64,

    /// Session configuration.
    #[serde(default)]
    pub session: SessionConfig,

    /// Cookie scope.
    pub cookie: CookieConfig,

    /// OIDC authentication configuration.
    pub oidc: OidcConfig,
}

/// Session-related configuration.
#[derive(Debug, Clone, Deserialize)]
pub struct SessionConfig {
    /// Sliding expiration window of a session token, in minutes.
    #[serde(default = "default_window_minutes")]
    pub window_minutes: i64,

    /// Lifetime of the refresh cookie, in hours.
    #[serde(default = "default_refresh_cookie_hours")]
    pub refresh_cookie_hours: i64,

    /// Whether unauthenticated requests are redirected to the provider.
    #[serde(default = "default_auto_redirect")]
    pub auto_redirect: bool,

    /// Interval between expired token cleanup runs, in seconds.
    #[serde(default = "default_cleanup_interval_seconds")]
    pub cleanup_interval_seconds: u64,

    /// Where the browser lands after a completed login.
    #[serde(default = "default_post_login_redirect")]
    pub post_login_redirect: String,
}

/// Where the `auth` and `refresh` cookies are scoped.
#[derive(Debug, Clone, Deserialize)]
pub struct CookieConfig {
    pub domain: String,

    #[serde(default = "default_auth_path")]
    pub auth_path: String,

    #[serde(default = "default_refresh_path")]
    pub refresh_path: String,
}

fn default_bind_addr() -> String {
    "127.0.0.1:3000".to_string()
}

fn default_database_timeout_seconds() -> u64 {
    5
}

fn default_window_minutes() -> i64 {
    DEFAULT_SESSION_WINDOW_MINUTES
}

fn default_refresh_cookie_hours() -> i64 {
    DEFAULT_REFRESH_COOKIE_HOURS
}

fn default_auto_redirect() -> bool {
    true
}

fn default_cleanup_interval_seconds() -> u64 {
    300
}

fn default_post_login_redirect() -> String {
    "/app/me".to_string()
}

fn default_auth_path() -> String {
    "/app".to_string()
}

fn default_refresh_path() -> String {
    "/account".to_string()
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self {
            window_minutes: default_window_minutes(),
            refresh_cookie_hours: default_refresh_cookie_hours(),
            auto_redirect: default_auto_redirect(),
            cleanup_interval_seconds: default_cleanup_interval_seconds(),
            post_login_redirect: default_post_login_redirect(),
        }
    }
}

impl ServerConfig {
    /// Loads configuration from environment variables.
    ///
    /// # Errors
    ///
    /// Returns an error if required configuration is missing or invalid.
    pub fn from_env() -> Result<Self, config::ConfigError> {
        Self::from_environment(config::Environment::default())
    }

    fn from_environment(environment: config::Environment) -> Result<Self, config::ConfigError> {
        config::Config::builder()
            .add_source(environment.separator("__").try_parsing(true))
            .build()?
            .try_deserialize()
    }

    /// Builds the session policy, validating the cookie domain and durations.
    ///
    /// # Errors
    ///
    /// Returns `ConfigError::EmptyField` if the cookie domain is empty and
    /// `ConfigError::InvalidValue` if a duration is not positive or exceeds
    /// [`MAX_DURATION_DAYS`].
    pub fn session_policy(&self) -> Result<SessionPolicy, Report<ConfigError>> {
        let window = positive_duration(
            "session.window_minutes",
            self.session.window_minutes,
            Duration::try_minutes,
        )?;
        let refresh_lifetime = positive_duration(
            "session.refresh_cookie_hours",
            self.session.refresh_cookie_hours,
            Duration::try_hours,
        )?;

        let cookies = CookiePolicy::new(
            self.cookie.domain.clone(),
            self.cookie.auth_path.clone(),
            self.cookie.refresh_path.clone(),
            refresh_lifetime,
        )?;
        Ok(SessionPolicy::new(cookies)
            .with_window(window)
            .with_auto_redirect(self.session.auto_redirect))
    }
}

/// Longest accepted session window or refresh cookie lifetime.
pub const MAX_DURATION_DAYS: i64 = 366;

fn positive_duration(
    field: &'static str,
    value: i64,
    build: fn(i64) -> Option<Duration>,
) -> Result<Duration, Report<ConfigError>> {
    if value <= 0 {
        return Err(ConfigError::InvalidValue {
            field,
            reason: format!("must be positive, got {value}"),
        }
        .into());
    }

    match build(value) {
        Some(duration) if duration <= Duration::days(MAX_DURATION_DAYS) => Ok(duration),
        _ => Err(ConfigError::InvalidValue {
            field,
            reason: format!("{value} exceeds {MAX_DURATION_DAYS} days"),
        }
        .into()),
    }
}
