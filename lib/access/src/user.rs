//! User domain type and related structures.
//!
//! A User is the local record of a federated identity. Users are keyed by
//! their IdP subject claim (`uuid`) and carry a database-assigned `UserId`
//! that every session token references.

use gatehouse_core::UserId;
use serde::{Deserialize, Serialize};

/// Role assigned to users created on first login.
pub const DEFAULT_ROLE: &str = "user";

/// A local user record.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct User {
    /// Local identity, assigned by the store and never changed.
    id: UserId,
    /// Stable subject identifier from the IdP. Unique, assigned once.
    uuid: String,
    /// Mirrors the latest `preferred_username` claim.
    username: Option<String>,
    /// Mirrors the latest `email` claim.
    email: Option<String>,
    /// Local authorization attribute. Never written by authentication.
    role: String,
}

impl User {
    /// Reconstitutes a user from storage.
    #[must_use]
    pub fn with_all_fields(
        id: UserId,
        uuid: String,
        username: Option<String>,
        email: Option<String>,
        role: String,
    ) -> Self {
        Self {
            id,
            uuid,
            username,
            email,
            role,
        }
    }

    /// Returns the user's local ID.
    #[must_use]
    pub fn id(&self) -> UserId {
        self.id
    }

    /// Returns the IdP subject identifier.
    #[must_use]
    pub fn uuid(&self) -> &str {
        &self.uuid
    }

    /// Returns the username, if known.
    #[must_use]
    pub fn username(&self) -> Option<&str> {
        self.username.as_deref()
    }

    /// Returns the email address, if known.
    #[must_use]
    pub fn email(&self) -> Option<&str> {
        self.email.as_deref()
    }

    /// Returns the local role.
    #[must_use]
    pub fn role(&self) -> &str {
        &self.role
    }

    /// Computes the profile fields that differ from the given claim values.
    ///
    /// Absent claims never clear a stored value.
    #[must_use]
    pub fn profile_changes(&self, username: Option<&str>, email: Option<&str>) -> ProfileUpdate {
        let differs = |current: Option<&str>, claimed: Option<&str>| match claimed {
            Some(value) if current != Some(value) => Some(value.to_string()),
            _ => None,
        };
        ProfileUpdate {
            username: differs(self.username(), username),
            email: differs(self.email(), email),
        }
    }
}

/// Values for a user that does not exist yet.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NewUser {
    pub uuid: String,
    pub username: Option<String>,
    pub email: Option<String>,
}

/// A partial update of the mirrored profile fields. `None` leaves a field as is.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ProfileUpdate {
    pub username: Option<String>,
    pub email: Option<String>,
}

impl ProfileUpdate {
    /// Returns true if nothing would be written.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.username.is_none() && self.email.is_none()
    }
}
