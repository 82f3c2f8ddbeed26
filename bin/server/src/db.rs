//! Postgres Credential Store.
//!
//! Every mutation is a single SQL statement, so concurrent requests on the
//! same token or subject are serialized by the database rather than by the
//! application. Each statement runs under the store's timeout; one that does
//! not finish in time fails as `StoreError::Unavailable`.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use gatehouse_access::{CredentialStore, NewUser, ProfileUpdate, SessionToken, StoreError, User};
use gatehouse_core::{SessionTokenId, UserId};
use rootcause::prelude::Report;
use sqlx::{FromRow, PgPool};
use std::future::Future;
use std::time::Duration;
use tracing::{instrument, warn};

const USER_COLUMNS: &str = "id, uuid, username, email, role";

/// Row type for user queries.
#[derive(FromRow)]
struct UserRow {
    id: i64,
    uuid: String,
    username: Option<String>,
    email: Option<String>,
    role: String,
}

impl From<UserRow> for User {
    fn from(row: UserRow) -> Self {
        User::with_all_fields(
            UserId::new(row.id),
            row.uuid,
            row.username,
            row.email,
            row.role,
        )
    }
}

/// Row type for token queries.
#[derive(FromRow)]
struct TokenRow {
    id: String,
    users_id: i64,
    valid_till: DateTime<Utc>,
}

impl From<TokenRow> for SessionToken {
    fn from(row: TokenRow) -> Self {
        SessionToken::new(
            SessionTokenId::new(row.id),
            UserId::new(row.users_id),
            row.valid_till,
        )
    }
}

/// Credential Store backed by a Postgres pool.
#[derive(Clone)]
pub struct PgCredentialStore {
    pool: PgPool,
    timeout: Duration,
}

impl PgCredentialStore {
    /// Creates a store over `pool` whose statements give up after `timeout`.
    pub fn new(pool: PgPool, timeout: Duration) -> Self {
        Self { pool, timeout }
    }
}

#[async_trait]
impl CredentialStore for PgCredentialStore {
    #[instrument(skip(self))]
    async fn find_user_by_uuid(&self, uuid: &str) -> Result<Option<User>, Report<StoreError>> {
        let query = format!("SELECT {USER_COLUMNS} FROM users WHERE uuid = $1");
        let row: Option<UserRow> = bounded(
            self.timeout,
            "find_user_by_uuid",
            sqlx::query_as(&query).bind(uuid).fetch_optional(&self.pool),
        )
        .await?;
        Ok(row.map(User::from))
    }

    #[instrument(skip(self))]
    async fn find_user_by_id(&self, id: UserId) -> Result<Option<User>, Report<StoreError>> {
        let query = format!("SELECT {USER_COLUMNS} FROM users WHERE id = $1");
        let row: Option<UserRow> = bounded(
            self.timeout,
            "find_user_by_id",
            sqlx::query_as(&query)
                .bind(id.get())
                .fetch_optional(&self.pool),
        )
        .await?;
        Ok(row.map(User::from))
    }

    #[instrument(skip(self, user))]
    async fn insert_user(&self, user: &NewUser) -> Result<Option<User>, Report<StoreError>> {
        let query = format!(
            r#"
            INSERT INTO users (uuid, username, email)
            VALUES ($1, $2, $3)
            ON CONFLICT (uuid) DO NOTHING
            RETURNING {USER_COLUMNS}
            "#
        );
        let row: Option<UserRow> = bounded(
            self.timeout,
            "insert_user",
            sqlx::query_as(&query)
                .bind(&user.uuid)
                .bind(&user.username)
                .bind(&user.email)
                .fetch_optional(&self.pool),
        )
        .await?;
        Ok(row.map(User::from))
    }

    #[instrument(skip(self, update))]
    async fn update_user_profile(
        &self,
        id: UserId,
        update: &ProfileUpdate,
    ) -> Result<Option<User>, Report<StoreError>> {
        let query = format!(
            r#"
            UPDATE users
            SET username = COALESCE($2, username),
                email = COALESCE($3, email),
                updated_at = NOW()
            WHERE id = $1
            RETURNING {USER_COLUMNS}
            "#
        );
        let row: Option<UserRow> = bounded(
            self.timeout,
            "update_user_profile",
            sqlx::query_as(&query)
                .bind(id.get())
                .bind(&update.username)
                .bind(&update.email)
                .fetch_optional(&self.pool),
        )
        .await?;
        Ok(row.map(User::from))
    }

    #[instrument(skip_all, fields(user_id = %token.user_id()))]
    async fn insert_token(&self, token: &SessionToken) -> Result<(), Report<StoreError>> {
        bounded(
            self.timeout,
            "insert_token",
            sqlx::query(
                r#"
                INSERT INTO users_tokens (id, users_id, valid_till)
                VALUES ($1, $2, $3)
                "#,
            )
            .bind(token.id().as_str())
            .bind(token.user_id().get())
            .bind(token.valid_till())
            .execute(&self.pool),
        )
        .await?;

        Ok(())
    }

    #[instrument(skip(self, id))]
    async fn extend_token(
        &self,
        id: &SessionTokenId,
        now: DateTime<Utc>,
        valid_till: DateTime<Utc>,
    ) -> Result<Option<SessionToken>, Report<StoreError>> {
        let row: Option<TokenRow> = bounded(
            self.timeout,
            "extend_token",
            sqlx::query_as(
                r#"
                UPDATE users_tokens
                SET valid_till = GREATEST(valid_till, $3)
                WHERE id = $1 AND valid_till > $2
                RETURNING id, users_id, valid_till
                "#,
            )
            .bind(id.as_str())
            .bind(now)
            .bind(valid_till)
            .fetch_optional(&self.pool),
        )
        .await?;
        Ok(row.map(SessionToken::from))
    }

    #[instrument(skip_all)]
    async fn find_token(
        &self,
        id: &SessionTokenId,
    ) -> Result<Option<SessionToken>, Report<StoreError>> {
        let row: Option<TokenRow> = bounded(
            self.timeout,
            "find_token",
            sqlx::query_as("SELECT id, users_id, valid_till FROM users_tokens WHERE id = $1")
                .bind(id.as_str())
                .fetch_optional(&self.pool),
        )
        .await?;
        Ok(row.map(SessionToken::from))
    }

    #[instrument(skip(self))]
    async fn delete_expired_tokens(&self, now: DateTime<Utc>) -> Result<u64, Report<StoreError>> {
        let result = bounded(
            self.timeout,
            "delete_expired_tokens",
            sqlx::query("DELETE FROM users_tokens WHERE valid_till < $1")
                .bind(now)
                .execute(&self.pool),
        )
        .await?;

        Ok(result.rows_affected())
    }
}

/// Runs `query`, failing with `StoreError::Unavailable` once `timeout` passes.
async fn bounded<T, F>(
    timeout: Duration,
    operation: &'static str,
    query: F,
) -> Result<T, Report<StoreError>>
where
    F: Future<Output = Result<T, sqlx::Error>>,
{
    match tokio::time::timeout(timeout, query).await {
        Ok(Ok(value)) => Ok(value),
        Ok(Err(e)) => Err(store_error(e).into()),
        Err(_) => {
            warn!(operation, ?timeout, "store statement timed out");
            Err(StoreError::Unavailable {
                details: format!("{operation} did not complete within {timeout:?}"),
            }
            .into())
        }
    }
}

fn store_error(e: sqlx::Error) -> StoreError {
    match &e {
        sqlx::Error::Database(db)
            if db.is_unique_violation() || db.is_foreign_key_violation() =>
        {
            StoreError::ConstraintViolation {
                details: db.message().to_string(),
            }
        }
        sqlx::Error::RowNotFound => StoreError::NotFound {
            entity: "row",
            key: String::new(),
        },
        _ => StoreError::Unavailable {
            details: e.to_string(),
        },
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn stalled_statement_times_out_as_unavailable() {
        let err = bounded(
            Duration::from_millis(20),
            "extend_token",
            std::future::pending::<Result<(), sqlx::Error>>(),
        )
        .await
        .unwrap_err();

        assert!(matches!(
            err.current_context(),
            StoreError::Unavailable { .. }
        ));
        assert!(err.to_string().contains("extend_token"));
    }

    #[tokio::test]
    async fn statement_errors_pass_through_the_bound() {
        let err = bounded(Duration::from_secs(5), "find_token", async {
            Err::<(), _>(sqlx::Error::PoolClosed)
        })
        .await
        .unwrap_err();

        assert!(matches!(
            err.current_context(),
            StoreError::Unavailable { .. }
        ));
    }

    #[tokio::test]
    async fn finished_statement_returns_its_value() {
        let value = bounded(Duration::from_secs(5), "find_token", async {
            Ok::<_, sqlx::Error>(7)
        })
        .await
        .unwrap();
        assert_eq!(value, 7);
    }

    #[test]
    fn pool_timeout_is_unavailable() {
        let err = store_error(sqlx::Error::PoolTimedOut);
        assert!(matches!(err, StoreError::Unavailable { .. }));
    }

    #[test]
    fn closed_pool_is_unavailable() {
        let err = store_error(sqlx::Error::PoolClosed);
        assert!(err.to_string().contains("unavailable"));
    }

    #[test]
    fn user_row_maps_every_column() {
        let user = User::from(UserRow {
            id: 7,
            uuid: "abc-1".to_string(),
            username: Some("dan".to_string()),
            email: None,
            role: "user".to_string(),
        });

        assert_eq!(user.id(), UserId::new(7));
        assert_eq!(user.uuid(), "abc-1");
        assert_eq!(user.username(), Some("dan"));
        assert_eq!(user.email(), None);
        assert_eq!(user.role(), "user");
    }

    #[test]
    fn token_row_maps_every_column() {
        let valid_till = Utc::now();
        let token = SessionToken::from(TokenRow {
            id: "tok".to_string(),
            users_id: 7,
            valid_till,
        });

        assert_eq!(token.id().as_str(), "tok");
        assert_eq!(token.user_id(), UserId::new(7));
        assert_eq!(token.valid_till(), valid_till);
    }

    fn store(pool: PgPool) -> PgCredentialStore {
        PgCredentialStore::new(pool, Duration::from_secs(5))
    }

    async fn user(store: &PgCredentialStore, uuid: &str) -> User {
        store
            .insert_user(&NewUser {
                uuid: uuid.to_string(),
                username: Some("dan".to_string()),
                email: Some("d@x.com".to_string()),
            })
            .await
            .unwrap()
            .unwrap()
    }

    #[sqlx::test(migrations = "./migrations")]
    #[ignore = "needs a Postgres DATABASE_URL"]
    async fn second_insert_of_a_subject_returns_none(pool: PgPool) {
        let store = store(pool);
        let first = user(&store, "abc-1").await;

        let again = store
            .insert_user(&NewUser {
                uuid: "abc-1".to_string(),
                username: Some("other".to_string()),
                email: None,
            })
            .await
            .unwrap();

        assert!(again.is_none());
        let stored = store.find_user_by_uuid("abc-1").await.unwrap().unwrap();
        assert_eq!(stored, first);
    }

    #[sqlx::test(migrations = "./migrations")]
    #[ignore = "needs a Postgres DATABASE_URL"]
    async fn absent_profile_fields_are_left_alone(pool: PgPool) {
        let store = store(pool);
        let user = user(&store, "abc-1").await;

        let updated = store
            .update_user_profile(
                user.id(),
                &ProfileUpdate {
                    username: Some("daniel".to_string()),
                    email: None,
                },
            )
            .await
            .unwrap()
            .unwrap();

        assert_eq!(updated.username(), Some("daniel"));
        assert_eq!(updated.email(), Some("d@x.com"));
    }

    #[sqlx::test(migrations = "./migrations")]
    #[ignore = "needs a Postgres DATABASE_URL"]
    async fn extend_only_moves_a_live_token_forward(pool: PgPool) {
        let store = store(pool);
        let user = user(&store, "abc-1").await;
        let now = Utc::now();
        let token = SessionToken::new(
            SessionTokenId::from("tok-1"),
            user.id(),
            now + chrono::Duration::minutes(30),
        );
        store.insert_token(&token).await.unwrap();

        let earlier = store
            .extend_token(token.id(), now, now + chrono::Duration::minutes(10))
            .await
            .unwrap()
            .unwrap();
        assert_eq!(earlier.valid_till().timestamp(), token.valid_till().timestamp());

        let expired = store
            .extend_token(
                token.id(),
                now + chrono::Duration::minutes(31),
                now + chrono::Duration::minutes(61),
            )
            .await
            .unwrap();
        assert!(expired.is_none());
    }

    #[sqlx::test(migrations = "./migrations")]
    #[ignore = "needs a Postgres DATABASE_URL"]
    async fn token_for_unknown_user_violates_a_constraint(pool: PgPool) {
        let store = store(pool);
        let token = SessionToken::new(
            SessionTokenId::from("tok-1"),
            UserId::new(404),
            Utc::now() + chrono::Duration::minutes(30),
        );

        let err = store.insert_token(&token).await.unwrap_err();
        assert!(matches!(
            err.current_context(),
            StoreError::ConstraintViolation { .. }
        ));
    }

    #[sqlx::test(migrations = "./migrations")]
    #[ignore = "needs a Postgres DATABASE_URL"]
    async fn purge_deletes_only_expired_tokens(pool: PgPool) {
        let store = store(pool);
        let user = user(&store, "abc-1").await;
        let now = Utc::now();
        for (id, minutes) in [("old", -5), ("live", 30)] {
            let token = SessionToken::new(
                SessionTokenId::from(id),
                user.id(),
                now + chrono::Duration::minutes(minutes),
            );
            store.insert_token(&token).await.unwrap();
        }

        assert_eq!(store.delete_expired_tokens(now).await.unwrap(), 1);
        assert!(store.find_token(&SessionTokenId::from("old")).await.unwrap().is_none());
        assert!(store.find_token(&SessionTokenId::from("live")).await.unwrap().is_some());
    }
}
