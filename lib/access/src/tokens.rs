//! Token Lifecycle Manager.
//!
//! Issues session tokens, validates them, and slides their expiry forward on
//! every successful use. Validation and extension happen in one conditional
//! store operation, so concurrent requests presenting the same token can never
//! act on a stale read of its expiry.

use crate::error::AuthenticationError;
use crate::federation::{FederationClient, FederationOutcome};
use crate::session::{SessionToken, TokenValidation};
use crate::store::CredentialStore;
use chrono::Duration;
use gatehouse_core::{Clock, SessionTokenId, UserId};
use rootcause::prelude::Report;
use std::sync::Arc;
use tracing::{debug, instrument, warn};

/// Default sliding expiration window.
pub const DEFAULT_SESSION_WINDOW_MINUTES: i64 = 30;

/// Issues, validates, and rotates session tokens.
#[derive(Clone)]
pub struct TokenLifecycle {
    store: Arc<dyn CredentialStore>,
    clock: Arc<dyn Clock>,
    window: Duration,
}

impl TokenLifecycle {
    /// Creates a manager with the given sliding window.
    #[must_use]
    pub fn new(store: Arc<dyn CredentialStore>, clock: Arc<dyn Clock>, window: Duration) -> Self {
        Self {
            store,
            clock,
            window,
        }
    }

    /// Mints a new token for `user_id`, valid for one window from now.
    ///
    /// # Errors
    ///
    /// Returns `AuthenticationError::Persistence` if the token could not be
    /// generated or the insert did not complete.
    #[instrument(skip(self))]
    pub async fn issue(&self, user_id: UserId) -> Result<SessionToken, Report<AuthenticationError>> {
        let id = SessionTokenId::generate().map_err(|e| AuthenticationError::Persistence {
            details: format!("failed to generate session token: {e}"),
        })?;
        let token = SessionToken::new(id, user_id, self.clock.now() + self.window);

        self.store
            .insert_token(&token)
            .await
            .map_err(|e| AuthenticationError::Persistence {
                details: e.to_string(),
            })?;

        debug!(valid_till = %token.valid_till(), "issued session token");
        Ok(token)
    }

    /// Validates `token_id` and, if valid, extends it to one window from now.
    ///
    /// Unknown and expired tokens both yield `TokenValidation::Invalid`; only
    /// store failures are errors.
    ///
    /// # Errors
    ///
    /// Returns `AuthenticationError::Persistence` if the store could not be
    /// consulted.
    #[instrument(skip_all)]
    pub async fn validate_and_rotate(
        &self,
        token_id: &SessionTokenId,
    ) -> Result<TokenValidation, Report<AuthenticationError>> {
        let now = self.clock.now();
        let extended = self
            .store
            .extend_token(token_id, now, now + self.window)
            .await
            .map_err(|e| AuthenticationError::Persistence {
                details: e.to_string(),
            })?;

        match extended {
            Some(token) => {
                debug!(user_id = %token.user_id(), valid_till = %token.valid_till(), "rotated session token");
                Ok(TokenValidation::Rotated(token))
            }
            None => {
                debug!("session token unknown or expired");
                Ok(TokenValidation::Invalid)
            }
        }
    }

    /// Deletes every token that expired before now.
    ///
    /// # Errors
    ///
    /// Returns `AuthenticationError::Persistence` if the delete failed.
    #[instrument(skip(self))]
    pub async fn purge_expired(&self) -> Result<u64, Report<AuthenticationError>> {
        let deleted = self
            .store
            .delete_expired_tokens(self.clock.now())
            .await
            .map_err(|e| AuthenticationError::Persistence {
                details: e.to_string(),
            })?;
        debug!(deleted, "purged expired session tokens");
        Ok(deleted)
    }

    /// Re-runs federation with an IdP refresh token.
    ///
    /// Nothing is persisted here; the caller resolves the user and issues a
    /// session token from the outcome.
    #[instrument(skip_all)]
    pub async fn refresh(
        &self,
        federation: &FederationClient,
        refresh_token: &str,
    ) -> FederationOutcome {
        let outcome = federation.refresh(refresh_token).await;
        if let FederationOutcome::ProtocolError { reason } = &outcome {
            warn!(%reason, "refresh grant failed");
        }
        outcome
    }
}
