//! User Reconciliation Service.
//!
//! Maps federated identity claims onto a local user record, creating it on
//! first sight of a subject and mirroring changed profile claims afterwards.

use crate::auth::IdentityClaims;
use crate::error::AuthenticationError;
use crate::store::CredentialStore;
use crate::user::{NewUser, User};
use rootcause::prelude::Report;
use std::sync::Arc;
use tracing::{debug, info, instrument};

/// A local user resolved from federated claims.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ResolvedUser {
    pub user: User,
    /// True if this call created the user row.
    pub created: bool,
}

/// Resolves claims to local users.
#[derive(Clone)]
pub struct UserReconciler {
    store: Arc<dyn CredentialStore>,
}

impl UserReconciler {
    /// Creates a reconciler over `store`.
    #[must_use]
    pub fn new(store: Arc<dyn CredentialStore>) -> Self {
        Self { store }
    }

    /// Finds or creates the user for `claims`.
    ///
    /// Existing users are only written when a present claim differs from the
    /// stored value. Calling this twice with identical claims creates one row.
    ///
    /// # Errors
    ///
    /// Returns `AuthenticationError::MissingClaim` if `sub` is absent or
    /// empty, and `AuthenticationError::Persistence` on store failures.
    #[instrument(skip_all)]
    pub async fn resolve(
        &self,
        claims: &IdentityClaims,
    ) -> Result<ResolvedUser, Report<AuthenticationError>> {
        let uuid = claims
            .subject
            .as_deref()
            .filter(|sub| !sub.is_empty())
            .ok_or_else(|| AuthenticationError::MissingClaim {
                claim: "sub".to_string(),
            })?;

        if let Some(existing) = self.store.find_user_by_uuid(uuid).await.map_err(persistence)? {
            let user = self.synchronize(existing, claims).await?;
            return Ok(ResolvedUser {
                user,
                created: false,
            });
        }

        let new_user = NewUser {
            uuid: uuid.to_string(),
            username: claims.preferred_username.clone(),
            email: claims.email.clone(),
        };
        if let Some(user) = self.store.insert_user(&new_user).await.map_err(persistence)? {
            info!(user_id = %user.id(), "created user on first login");
            return Ok(ResolvedUser {
                user,
                created: true,
            });
        }

        // Another request created the row between our read and our insert.
        let existing = self
            .store
            .find_user_by_uuid(uuid)
            .await
            .map_err(persistence)?
            .ok_or_else(|| AuthenticationError::Persistence {
                details: "user vanished after conflicting insert".to_string(),
            })?;
        let user = self.synchronize(existing, claims).await?;
        Ok(ResolvedUser {
            user,
            created: false,
        })
    }

    async fn synchronize(
        &self,
        existing: User,
        claims: &IdentityClaims,
    ) -> Result<User, Report<AuthenticationError>> {
        let changes = existing.profile_changes(
            claims.preferred_username.as_deref(),
            claims.email.as_deref(),
        );
        if changes.is_empty() {
            debug!(user_id = %existing.id(), "user profile unchanged");
            return Ok(existing);
        }

        debug!(
            user_id = %existing.id(),
            username_changed = changes.username.is_some(),
            email_changed = changes.email.is_some(),
            "updating user profile from claims"
        );
        self.store
            .update_user_profile(existing.id(), &changes)
            .await
            .map_err(persistence)?
            .ok_or_else(|| {
                AuthenticationError::Persistence {
                    details: format!("user {} vanished during update", existing.id()),
                }
                .into()
            })
    }
}

fn persistence<E: std::fmt::Display>(e: E) -> AuthenticationError {
    AuthenticationError::Persistence {
        details: e.to_string(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::memory::MemoryCredentialStore;

    fn claims(username: &str) -> IdentityClaims {
        IdentityClaims::new("abc-1")
            .with_preferred_username(Some(username.to_string()))
            .with_email(Some("d@x.com".to_string()))
    }

    fn reconciler() -> (Arc<MemoryCredentialStore>, UserReconciler) {
        let store = Arc::new(MemoryCredentialStore::new());
        (store.clone(), UserReconciler::new(store))
    }

    #[tokio::test]
    async fn first_login_creates_user_from_claims() {
        let (store, reconciler) = reconciler();
        let resolved = reconciler.resolve(&claims("dan")).await.unwrap();

        assert!(resolved.created);
        assert_eq!(resolved.user.uuid(), "abc-1");
        assert_eq!(resolved.user.username(), Some("dan"));
        assert_eq!(resolved.user.email(), Some("d@x.com"));
        assert_eq!(store.user_count().await, 1);
    }

    #[tokio::test]
    async fn identical_claims_are_idempotent() {
        let (store, reconciler) = reconciler();
        let first = reconciler.resolve(&claims("dan")).await.unwrap();
        let second = reconciler.resolve(&claims("dan")).await.unwrap();

        assert!(!second.created);
        assert_eq!(first.user, second.user);
        assert_eq!(store.user_count().await, 1);
    }

    #[tokio::test]
    async fn changed_username_updates_existing_user() {
        let (store, reconciler) = reconciler();
        let first = reconciler.resolve(&claims("dan")).await.unwrap();
        let second = reconciler.resolve(&claims("daniel")).await.unwrap();

        assert!(!second.created);
        assert_eq!(second.user.id(), first.user.id());
        assert_eq!(second.user.username(), Some("daniel"));
        assert_eq!(second.user.email(), Some("d@x.com"));
        assert_eq!(store.user_count().await, 1);
    }

    #[tokio::test]
    async fn missing_subject_is_rejected_without_writes() {
        let (store, reconciler) = reconciler();
        let no_sub = IdentityClaims {
            subject: None,
            preferred_username: Some("dan".to_string()),
            email: None,
        };

        let err = reconciler.resolve(&no_sub).await.unwrap_err();
        assert!(matches!(
            err.current_context(),
            AuthenticationError::MissingClaim { .. }
        ));
        assert_eq!(store.user_count().await, 0);
    }

    #[tokio::test]
    async fn empty_subject_is_treated_as_missing() {
        let (_, reconciler) = reconciler();
        let err = reconciler
            .resolve(&IdentityClaims::new(""))
            .await
            .unwrap_err();
        assert!(err.current_context().is_invalid_credential());
    }

    #[tokio::test]
    async fn store_outage_is_a_persistence_error() {
        let (store, reconciler) = reconciler();
        store.set_unavailable(true);

        let err = reconciler.resolve(&claims("dan")).await.unwrap_err();
        assert!(err.current_context().is_fatal());
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn concurrent_first_logins_create_one_user() {
        let (store, reconciler) = reconciler();
        let mut handles = Vec::new();
        for _ in 0..8 {
            let reconciler = reconciler.clone();
            handles.push(tokio::spawn(async move {
                reconciler.resolve(&claims("dan")).await.unwrap()
            }));
        }

        let mut ids = Vec::new();
        for handle in handles {
            ids.push(handle.await.unwrap().user.id());
        }
        ids.dedup();
        assert_eq!(ids.len(), 1);
        assert_eq!(store.user_count().await, 1);
    }
}
