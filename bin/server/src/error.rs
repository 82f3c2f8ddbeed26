//! Error types for the server binary and the HTTP mapping of
//! authentication failures.

use axum::{
    http::StatusCode,
    response::{IntoResponse, Response},
};
use axum_extra::extract::CookieJar;
use gatehouse_access::AuthenticationError;
use std::fmt;
use tracing::{error, info, warn};

/// Errors that stop the server from starting.
#[derive(Debug)]
pub enum ServerError {
    /// Configuration is missing or invalid.
    Config { details: String },
    /// The database could not be reached or migrated.
    Database { details: String },
    /// The identity provider could not be discovered.
    Provider { details: String },
    /// The listener could not bind or serve.
    Io { details: String },
}

impl fmt::Display for ServerError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Config { details } => write!(f, "configuration error: {details}"),
            Self::Database { details } => write!(f, "database error: {details}"),
            Self::Provider { details } => write!(f, "identity provider error: {details}"),
            Self::Io { details } => write!(f, "I/O error: {details}"),
        }
    }
}

impl std::error::Error for ServerError {}

/// An authentication failure together with the cookies to send back.
///
/// Internal details are logged, never returned to the client.
pub struct AuthFailure {
    pub jar: CookieJar,
    pub error: AuthenticationError,
}

impl AuthFailure {
    /// Returns the HTTP status for the failure.
    pub fn status(&self) -> StatusCode {
        if self.error.is_fatal() {
            StatusCode::INTERNAL_SERVER_ERROR
        } else {
            StatusCode::UNAUTHORIZED
        }
    }
}

impl IntoResponse for AuthFailure {
    fn into_response(self) -> Response {
        let status = self.status();
        let message = match &self.error {
            AuthenticationError::Persistence { .. } => {
                error!(error = %self.error, "request failed on persistence");
                "Internal server error"
            }
            AuthenticationError::Protocol { .. } => {
                warn!(error = %self.error, "identity provider failure");
                "Authentication failed"
            }
            AuthenticationError::InvalidCredential { .. }
            | AuthenticationError::MissingClaim { .. } => {
                info!(error = %self.error, "request not authenticated");
                "Unauthorized"
            }
        };

        (status, self.jar, message).into_response()
    }
}
