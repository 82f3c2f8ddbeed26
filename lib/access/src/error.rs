//! Error types for the access crate.
//!
//! Errors are designed for layered context using rootcause:
//! - `StoreError`: Credential Store failures (connectivity, constraints)
//! - `ProviderError`: failures reported by the external OIDC client
//! - `AuthenticationError`: the taxonomy surfaced by the authentication core
//! - `ConfigError`: construction-time validation failures

use std::fmt;

/// Errors from the Credential Store.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum StoreError {
    /// The store could not be reached or did not answer in time.
    Unavailable { details: String },
    /// A uniqueness or referential constraint rejected the write.
    ConstraintViolation { details: String },
    /// A row expected to exist was not found.
    NotFound { entity: &'static str, key: String },
}

impl fmt::Display for StoreError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Unavailable { details } => write!(f, "credential store unavailable: {details}"),
            Self::ConstraintViolation { details } => {
                write!(f, "credential store constraint violation: {details}")
            }
            Self::NotFound { entity, key } => write!(f, "{entity} '{key}' not found"),
        }
    }
}

impl std::error::Error for StoreError {}

/// Errors from the external identity provider client.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ProviderError {
    /// The client is misconfigured (bad URLs, missing endpoints).
    Configuration { reason: String },
    /// The provider refused the grant (e.g. `invalid_grant`, `access_denied`).
    Rejected { reason: String },
    /// The provider could not be reached or answered with garbage.
    Transport { reason: String },
    /// A token or claim failed verification.
    Validation { reason: String },
}

impl fmt::Display for ProviderError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Configuration { reason } => write!(f, "OIDC configuration error: {reason}"),
            Self::Rejected { reason } => write!(f, "OIDC provider rejected the request: {reason}"),
            Self::Transport { reason } => write!(f, "OIDC transport error: {reason}"),
            Self::Validation { reason } => write!(f, "OIDC validation error: {reason}"),
        }
    }
}

impl std::error::Error for ProviderError {}

/// Errors surfaced by the authentication core.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum AuthenticationError {
    /// Missing, expired, or unknown token, or federation declined.
    InvalidCredential { reason: String },
    /// IdP communication or validation failure. Never retried within a request.
    Protocol { reason: String },
    /// Credential Store unavailable or constraint violation.
    Persistence { details: String },
    /// The IdP returned no stable subject identifier.
    MissingClaim { claim: String },
}

impl AuthenticationError {
    /// Returns true if the current request cannot proceed at all.
    #[must_use]
    pub fn is_fatal(&self) -> bool {
        matches!(self, Self::Persistence { .. })
    }

    /// Returns true if the failure is a rejected or unusable credential.
    ///
    /// `MissingClaim` counts as an invalid credential.
    #[must_use]
    pub fn is_invalid_credential(&self) -> bool {
        matches!(
            self,
            Self::InvalidCredential { .. } | Self::MissingClaim { .. }
        )
    }
}

impl fmt::Display for AuthenticationError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::InvalidCredential { reason } => write!(f, "invalid credential: {reason}"),
            Self::Protocol { reason } => write!(f, "identity provider error: {reason}"),
            Self::Persistence { details } => write!(f, "persistence error: {details}"),
            Self::MissingClaim { claim } => write!(f, "missing required claim: {claim}"),
        }
    }
}

impl std::error::Error for AuthenticationError {}

/// Errors from validating configuration at construction time.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ConfigError {
    /// A required string was empty.
    EmptyField { field: &'static str },
    /// A URL could not be parsed.
    InvalidUrl { field: &'static str, reason: String },
    /// A value was present but outside its allowed range.
    InvalidValue { field: &'static str, reason: String },
}

impl fmt::Display for ConfigError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::EmptyField { field } => write!(f, "{field} needs to have a value"),
            Self::InvalidUrl { field, reason } => write!(f, "{field} is not a valid URL: {reason}"),
            Self::InvalidValue { field, reason } => write!(f, "{field} is invalid: {reason}"),
        }
    }
}

impl std::error::Error for ConfigError {}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn store_error_unavailable_display() {
        let err = StoreError::Unavailable {
            details: "pool timed out".to_string(),
        };
        assert!(err.to_string().contains("unavailable"));
        assert!(err.to_string().contains("pool timed out"));
    }

    #[test]
    fn store_error_not_found_display() {
        let err = StoreError::NotFound {
            entity: "user",
            key: "7".to_string(),
        };
        assert_eq!(err.to_string(), "user '7' not found");
    }

    #[test]
    fn provider_error_rejected_display() {
        let err = ProviderError::Rejected {
            reason: "invalid_grant".to_string(),
        };
        assert!(err.to_string().contains("rejected"));
        assert!(err.to_string().contains("invalid_grant"));
    }

    #[test]
    fn config_error_invalid_value_display() {
        let err = ConfigError::InvalidValue {
            field: "session.window_minutes",
            reason: "must be positive, got 0".to_string(),
        };
        assert_eq!(
            err.to_string(),
            "session.window_minutes is invalid: must be positive, got 0"
        );
    }

    #[test]
    fn authentication_error_classification() {
        let persistence = AuthenticationError::Persistence {
            details: "connection reset".to_string(),
        };
        assert!(persistence.is_fatal());
        assert!(!persistence.is_invalid_credential());

        let missing = AuthenticationError::MissingClaim {
            claim: "sub".to_string(),
        };
        assert!(!missing.is_fatal());
        assert!(missing.is_invalid_credential());

        let protocol = AuthenticationError::Protocol {
            reason: "bad signature".to_string(),
        };
        assert!(!protocol.is_fatal());
        assert!(!protocol.is_invalid_credential());
    }

    #[test]
    fn authentication_error_missing_claim_display() {
        let err = AuthenticationError::MissingClaim {
            claim: "sub".to_string(),
        };
        assert_eq!(err.to_string(), "missing required claim: sub");
    }

    #[test]
    fn config_error_empty_field_display() {
        let err = ConfigError::EmptyField { field: "client_id" };
        assert_eq!(err.to_string(), "client_id needs to have a value");
    }
}
