//! In-memory Credential Store.
//!
//! Every operation runs under one lock, which gives it the same atomicity as
//! the single-statement SQL used by the Postgres store. Used in tests and for
//! running the server without a database.

use crate::error::StoreError;
use crate::session::SessionToken;
use crate::store::CredentialStore;
use crate::user::{DEFAULT_ROLE, NewUser, ProfileUpdate, User};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use gatehouse_core::{SessionTokenId, UserId};
use rootcause::prelude::Report;
use std::collections::{BTreeMap, HashMap};
use std::sync::atomic::{AtomicBool, Ordering};
use tokio::sync::Mutex;

#[derive(Debug, Default)]
struct Tables {
    users: BTreeMap<UserId, User>,
    tokens: HashMap<SessionTokenId, SessionToken>,
    next_user_id: i64,
}

/// A Credential Store held in process memory.
#[derive(Debug, Default)]
pub struct MemoryCredentialStore {
    tables: Mutex<Tables>,
    unavailable: AtomicBool,
}

impl MemoryCredentialStore {
    /// Creates an empty store.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Makes every subsequent operation fail with `StoreError::Unavailable`.
    pub fn set_unavailable(&self, unavailable: bool) {
        self.unavailable.store(unavailable, Ordering::SeqCst);
    }

    /// Returns the number of user rows.
    pub async fn user_count(&self) -> usize {
        self.tables.lock().await.users.len()
    }

    /// Deletes the user with `uuid` but leaves its tokens in place, as when
    /// the user is removed while one of its requests is in flight.
    pub async fn remove_user_record(&self, uuid: &str) -> bool {
        let mut tables = self.tables.lock().await;
        let before = tables.users.len();
        tables.users.retain(|_, user| user.uuid() != uuid);
        tables.users.len() < before
    }

    /// Returns the number of token rows.
    pub async fn token_count(&self) -> usize {
        self.tables.lock().await.tokens.len()
    }

    fn check_available(&self) -> Result<(), Report<StoreError>> {
        if self.unavailable.load(Ordering::SeqCst) {
            return Err(StoreError::Unavailable {
                details: "memory store marked unavailable".to_string(),
            }
            .into());
        }
        Ok(())
    }
}

#[async_trait]
impl CredentialStore for MemoryCredentialStore {
    async fn find_user_by_uuid(&self, uuid: &str) -> Result<Option<User>, Report<StoreError>> {
        self.check_available()?;
        let tables = self.tables.lock().await;
        Ok(tables.users.values().find(|u| u.uuid() == uuid).cloned())
    }

    async fn find_user_by_id(&self, id: UserId) -> Result<Option<User>, Report<StoreError>> {
        self.check_available()?;
        Ok(self.tables.lock().await.users.get(&id).cloned())
    }

    async fn insert_user(&self, user: &NewUser) -> Result<Option<User>, Report<StoreError>> {
        self.check_available()?;
        let mut tables = self.tables.lock().await;
        if tables.users.values().any(|u| u.uuid() == user.uuid) {
            return Ok(None);
        }

        tables.next_user_id += 1;
        let id = UserId::new(tables.next_user_id);
        let created = User::with_all_fields(
            id,
            user.uuid.clone(),
            user.username.clone(),
            user.email.clone(),
            DEFAULT_ROLE.to_string(),
        );
        tables.users.insert(id, created.clone());
        Ok(Some(created))
    }

    async fn update_user_profile(
        &self,
        id: UserId,
        update: &ProfileUpdate,
    ) -> Result<Option<User>, Report<StoreError>> {
        self.check_available()?;
        let mut tables = self.tables.lock().await;
        let Some(current) = tables.users.get(&id) else {
            return Ok(None);
        };

        let updated = User::with_all_fields(
            current.id(),
            current.uuid().to_string(),
            update
                .username
                .clone()
                .or_else(|| current.username().map(str::to_string)),
            update
                .email
                .clone()
                .or_else(|| current.email().map(str::to_string)),
            current.role().to_string(),
        );
        tables.users.insert(id, updated.clone());
        Ok(Some(updated))
    }

    async fn insert_token(&self, token: &SessionToken) -> Result<(), Report<StoreError>> {
        self.check_available()?;
        let mut tables = self.tables.lock().await;
        if !tables.users.contains_key(&token.user_id()) {
            return Err(StoreError::ConstraintViolation {
                details: format!("user {} does not exist", token.user_id()),
            }
            .into());
        }
        if tables.tokens.contains_key(token.id()) {
            return Err(StoreError::ConstraintViolation {
                details: "duplicate token id".to_string(),
            }
            .into());
        }
        tables.tokens.insert(token.id().clone(), token.clone());
        Ok(())
    }

    async fn extend_token(
        &self,
        id: &SessionTokenId,
        now: DateTime<Utc>,
        valid_till: DateTime<Utc>,
    ) -> Result<Option<SessionToken>, Report<StoreError>> {
        self.check_available()?;
        let mut tables = self.tables.lock().await;
        let Some(token) = tables.tokens.get_mut(id) else {
            return Ok(None);
        };
        if !token.is_valid_at(now) {
            return Ok(None);
        }

        let extended = SessionToken::new(
            token.id().clone(),
            token.user_id(),
            token.valid_till().max(valid_till),
        );
        *token = extended.clone();
        Ok(Some(extended))
    }

    async fn find_token(
        &self,
        id: &SessionTokenId,
    ) -> Result<Option<SessionToken>, Report<StoreError>> {
        self.check_available()?;
        Ok(self.tables.lock().await.tokens.get(id).cloned())
    }

    async fn delete_expired_tokens(&self, now: DateTime<Utc>) -> Result<u64, Report<StoreError>> {
        self.check_available()?;
        let mut tables = self.tables.lock().await;
        let before = tables.tokens.len();
        tables.tokens.retain(|_, token| token.valid_till() >= now);
        Ok((before - tables.tokens.len()) as u64)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Duration;

    fn new_user(uuid: &str) -> NewUser {
        NewUser {
            uuid: uuid.to_string(),
            username: Some("dan".to_string()),
            email: None,
        }
    }

    #[tokio::test]
    async fn insert_user_assigns_sequential_ids() {
        let store = MemoryCredentialStore::new();
        let first = store.insert_user(&new_user("a")).await.unwrap().unwrap();
        let second = store.insert_user(&new_user("b")).await.unwrap().unwrap();

        assert_eq!(first.id(), UserId::new(1));
        assert_eq!(second.id(), UserId::new(2));
        assert_eq!(first.role(), DEFAULT_ROLE);
    }

    #[tokio::test]
    async fn insert_user_with_existing_uuid_returns_none() {
        let store = MemoryCredentialStore::new();
        store.insert_user(&new_user("a")).await.unwrap();
        let duplicate = store.insert_user(&new_user("a")).await.unwrap();

        assert!(duplicate.is_none());
        assert_eq!(store.user_count().await, 1);
    }

    #[tokio::test]
    async fn update_profile_keeps_unset_fields() {
        let store = MemoryCredentialStore::new();
        let user = store.insert_user(&new_user("a")).await.unwrap().unwrap();

        let update = ProfileUpdate {
            username: None,
            email: Some("d@x.com".to_string()),
        };
        let updated = store
            .update_user_profile(user.id(), &update)
            .await
            .unwrap()
            .unwrap();

        assert_eq!(updated.username(), Some("dan"));
        assert_eq!(updated.email(), Some("d@x.com"));
    }

    #[tokio::test]
    async fn token_for_missing_user_violates_constraint() {
        let store = MemoryCredentialStore::new();
        let token = SessionToken::new(SessionTokenId::from("t"), UserId::new(99), Utc::now());

        let err = store.insert_token(&token).await.unwrap_err();
        assert!(err.to_string().contains("constraint violation"));
        assert_eq!(store.token_count().await, 0);
    }

    #[tokio::test]
    async fn extend_token_never_moves_expiry_backwards() {
        let store = MemoryCredentialStore::new();
        let user = store.insert_user(&new_user("a")).await.unwrap().unwrap();
        let now = Utc::now();
        let token = SessionToken::new(
            SessionTokenId::from("t"),
            user.id(),
            now + Duration::minutes(30),
        );
        store.insert_token(&token).await.unwrap();

        let extended = store
            .extend_token(token.id(), now, now + Duration::minutes(10))
            .await
            .unwrap()
            .unwrap();
        assert_eq!(extended.valid_till(), now + Duration::minutes(30));
    }

    #[tokio::test]
    async fn extend_token_ignores_expired_tokens() {
        let store = MemoryCredentialStore::new();
        let user = store.insert_user(&new_user("a")).await.unwrap().unwrap();
        let now = Utc::now();
        let token = SessionToken::new(SessionTokenId::from("t"), user.id(), now);
        store.insert_token(&token).await.unwrap();

        let extended = store
            .extend_token(token.id(), now, now + Duration::minutes(30))
            .await
            .unwrap();
        assert!(extended.is_none());
        let stored = store.find_token(token.id()).await.unwrap().unwrap();
        assert_eq!(stored.valid_till(), now);
    }

    #[tokio::test]
    async fn delete_expired_keeps_valid_tokens() {
        let store = MemoryCredentialStore::new();
        let user = store.insert_user(&new_user("a")).await.unwrap().unwrap();
        let now = Utc::now();
        for (id, valid_till) in [
            ("expired", now - Duration::seconds(1)),
            ("boundary", now),
            ("valid", now + Duration::minutes(5)),
        ] {
            store
                .insert_token(&SessionToken::new(SessionTokenId::from(id), user.id(), valid_till))
                .await
                .unwrap();
        }

        let deleted = store.delete_expired_tokens(now).await.unwrap();
        assert_eq!(deleted, 1);
        assert!(store.find_token(&SessionTokenId::from("valid")).await.unwrap().is_some());
        assert!(store.find_token(&SessionTokenId::from("boundary")).await.unwrap().is_some());
    }

    #[tokio::test]
    async fn unavailable_store_fails_every_operation() {
        let store = MemoryCredentialStore::new();
        store.set_unavailable(true);

        let err = store.find_user_by_uuid("a").await.unwrap_err();
        assert!(err.to_string().contains("unavailable"));

        store.set_unavailable(false);
        assert!(store.find_user_by_uuid("a").await.unwrap().is_none());
    }
}
