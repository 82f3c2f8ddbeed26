//! The Credential Store seam.
//!
//! The store is the only state shared across concurrent requests. Every
//! mutation is a single atomic operation so that two requests racing on the
//! same token id or subject cannot interleave a stale read with their writes.

use crate::error::StoreError;
use crate::session::SessionToken;
use crate::user::{NewUser, ProfileUpdate, User};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use gatehouse_core::{SessionTokenId, UserId};
use rootcause::prelude::Report;

/// Persistence for users and session tokens.
#[async_trait]
pub trait CredentialStore: Send + Sync {
    /// Finds a user by IdP subject identifier.
    async fn find_user_by_uuid(&self, uuid: &str) -> Result<Option<User>, Report<StoreError>>;

    /// Finds a user by local ID.
    async fn find_user_by_id(&self, id: UserId) -> Result<Option<User>, Report<StoreError>>;

    /// Inserts a user unless one with the same `uuid` already exists.
    ///
    /// Returns `None` if another writer created the row first.
    async fn insert_user(&self, user: &NewUser) -> Result<Option<User>, Report<StoreError>>;

    /// Overwrites the fields set in `update` and returns the resulting row.
    ///
    /// Returns `None` if the user no longer exists.
    async fn update_user_profile(
        &self,
        id: UserId,
        update: &ProfileUpdate,
    ) -> Result<Option<User>, Report<StoreError>>;

    /// Inserts a new session token. The owning user must exist.
    async fn insert_token(&self, token: &SessionToken) -> Result<(), Report<StoreError>>;

    /// Extends a token that is still valid at `now`.
    ///
    /// Sets `valid_till` to the later of its current value and `valid_till`,
    /// conditionally on `valid_till > now`, in a single step. Returns `None`
    /// if the token is unknown or already expired.
    async fn extend_token(
        &self,
        id: &SessionTokenId,
        now: DateTime<Utc>,
        valid_till: DateTime<Utc>,
    ) -> Result<Option<SessionToken>, Report<StoreError>>;

    /// Looks a token up without touching it.
    async fn find_token(
        &self,
        id: &SessionTokenId,
    ) -> Result<Option<SessionToken>, Report<StoreError>>;

    /// Deletes every token with `valid_till < now` and returns how many went.
    async fn delete_expired_tokens(&self, now: DateTime<Utc>) -> Result<u64, Report<StoreError>>;
}
