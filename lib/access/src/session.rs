//! Session tokens backing the `auth` cookie.
//!
//! A session token is an opaque credential mirrored in the Credential Store.
//! Its expiry slides forward on every successful use; idle tokens lapse once
//! the window passes without a request.

use chrono::{DateTime, Utc};
use gatehouse_core::{SessionTokenId, UserId};
use serde::{Deserialize, Serialize};

/// A persisted session token.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SessionToken {
    /// Opaque token identifier (primary key).
    id: SessionTokenId,
    /// The owning user.
    user_id: UserId,
    /// Absolute expiry.
    valid_till: DateTime<Utc>,
}

impl SessionToken {
    /// Creates a token value.
    #[must_use]
    pub fn new(id: SessionTokenId, user_id: UserId, valid_till: DateTime<Utc>) -> Self {
        Self {
            id,
            user_id,
            valid_till,
        }
    }

    /// Returns the token identifier.
    #[must_use]
    pub fn id(&self) -> &SessionTokenId {
        &self.id
    }

    /// Returns the owning user's ID.
    #[must_use]
    pub fn user_id(&self) -> UserId {
        self.user_id
    }

    /// Returns when the token expires.
    #[must_use]
    pub fn valid_till(&self) -> DateTime<Utc> {
        self.valid_till
    }

    /// A token is valid iff `valid_till > now`.
    #[must_use]
    pub fn is_valid_at(&self, now: DateTime<Utc>) -> bool {
        self.valid_till > now
    }
}

/// Result of presenting a session token for validation.
///
/// Unknown and expired tokens are indistinguishable to callers.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TokenValidation {
    /// The token was valid and its expiry has been extended.
    Rotated(SessionToken),
    /// The token does not exist or has expired.
    Invalid,
}
