//! PostgreSQL session store.
//!
//! Each transactional operation runs inside one `sqlx::Transaction`. A
//! transaction dropped before `commit` (error, panic or cancelled future)
//! rolls back, so partial issuance or rotation is never visible.

use super::{RotationOutcome, SessionStore};
use crate::error::AuthError;
use crate::refresh::{NewSession, RefreshSession, SessionStatus, User};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use sqlx::postgres::{PgPool, PgPoolOptions};
use sqlx::{FromRow, PgConnection};
use tracing::{debug, instrument};

const SESSION_COLUMNS: &str = "id, user_id, selector, verifier_hash, user_agent, \
     client_ip AS ip_address, access_token_jti, status, created_at, expires_at";

#[derive(FromRow)]
struct UserRecord {
    id: i64,
    guid: String,
}

impl From<UserRecord> for User {
    fn from(record: UserRecord) -> Self {
        Self {
            id: record.id,
            public_guid: record.guid,
        }
    }
}

#[derive(FromRow)]
struct SessionRecord {
    id: i64,
    user_id: i64,
    selector: String,
    verifier_hash: String,
    user_agent: String,
    ip_address: String,
    access_token_jti: String,
    status: String,
    created_at: DateTime<Utc>,
    expires_at: DateTime<Utc>,
}

impl TryFrom<SessionRecord> for RefreshSession {
    type Error = AuthError;

    fn try_from(record: SessionRecord) -> Result<Self, Self::Error> {
        Ok(Self {
            id: record.id,
            user_id: record.user_id,
            selector: record.selector,
            verifier_hash: record.verifier_hash,
            user_agent: record.user_agent,
            ip_address: record.ip_address,
            access_token_jti: record.access_token_jti,
            status: record.status.parse()?,
            created_at: record.created_at,
            expires_at: record.expires_at,
        })
    }
}

/// PostgreSQL-backed [`SessionStore`].
#[derive(Clone)]
pub struct PgSessionStore {
    pool: PgPool,
}

impl PgSessionStore {
    /// Wrap an existing pool.
    #[must_use]
    pub const fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    /// Connect a new pool.
    ///
    /// # Errors
    ///
    /// Returns [`AuthError::StoreUnavailable`] if the database is unreachable.
    pub async fn connect(database_url: &str, max_connections: u32) -> Result<Self, AuthError> {
        let pool = PgPoolOptions::new()
            .max_connections(max_connections)
            .connect(database_url)
            .await?;
        Ok(Self::new(pool))
    }

    /// Underlying pool.
    #[must_use]
    pub const fn pool(&self) -> &PgPool {
        &self.pool
    }

    async fn upsert_user(conn: &mut PgConnection, guid: &str) -> Result<User, AuthError> {
        // The no-op update makes RETURNING yield the existing row on conflict.
        let record = sqlx::query_as::<_, UserRecord>(
            "INSERT INTO users (guid) VALUES ($1) \
             ON CONFLICT (guid) DO UPDATE SET guid = EXCLUDED.guid \
             RETURNING id, guid",
        )
        .bind(guid)
        .fetch_one(conn)
        .await?;
        Ok(record.into())
    }

    async fn insert_session(
        conn: &mut PgConnection,
        session: &NewSession,
    ) -> Result<RefreshSession, AuthError> {
        let query = format!(
            "INSERT INTO sessions \
             (user_id, selector, verifier_hash, client_ip, user_agent, access_token_jti, status, created_at, expires_at) \
             VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9) \
             RETURNING {SESSION_COLUMNS}"
        );
        let record = sqlx::query_as::<_, SessionRecord>(&query)
            .bind(session.user_id)
            .bind(&session.selector)
            .bind(&session.verifier_hash)
            .bind(&session.ip_address)
            .bind(&session.user_agent)
            .bind(&session.access_token_jti)
            .bind(SessionStatus::Active.as_str())
            .bind(session.created_at)
            .bind(session.expires_at)
            .fetch_one(conn)
            .await?;
        record.try_into()
    }

    async fn mark_used(conn: &mut PgConnection, selector: &str) -> Result<bool, AuthError> {
        let result = sqlx::query("UPDATE sessions SET status = $2 WHERE selector = $1 AND status = $3")
            .bind(selector)
            .bind(SessionStatus::Used.as_str())
            .bind(SessionStatus::Active.as_str())
            .execute(conn)
            .await?;
        Ok(result.rows_affected() == 1)
    }

    async fn fetch_user(conn: &mut PgConnection, id: i64) -> Result<Option<User>, AuthError> {
        let record = sqlx::query_as::<_, UserRecord>("SELECT id, guid FROM users WHERE id = $1")
            .bind(id)
            .fetch_optional(conn)
            .await?;
        Ok(record.map(User::from))
    }

    async fn fetch_session(
        &self,
        selector: &str,
        status: Option<SessionStatus>,
    ) -> Result<Option<RefreshSession>, AuthError> {
        let record = match status {
            Some(status) => {
                let query =
                    format!("SELECT {SESSION_COLUMNS} FROM sessions WHERE selector = $1 AND status = $2");
                sqlx::query_as::<_, SessionRecord>(&query)
                    .bind(selector)
                    .bind(status.as_str())
                    .fetch_optional(&self.pool)
                    .await?
            }
            None => {
                let query = format!("SELECT {SESSION_COLUMNS} FROM sessions WHERE selector = $1");
                sqlx::query_as::<_, SessionRecord>(&query)
                    .bind(selector)
                    .fetch_optional(&self.pool)
                    .await?
            }
        };
        record.map(RefreshSession::try_from).transpose()
    }
}

#[async_trait]
impl SessionStore for PgSessionStore {
    #[instrument(skip(self, session), fields(selector = %session.selector))]
    async fn issue_tokens_tx(&self, guid: &str, mut session: NewSession) -> Result<User, AuthError> {
        let mut tx = self.pool.begin().await?;

        let user = Self::upsert_user(&mut tx, guid).await?;
        session.user_id = user.id;
        Self::insert_session(&mut tx, &session).await?;

        tx.commit().await?;
        Ok(user)
    }

    #[instrument(skip(self, new_session), fields(new_selector = %new_session.selector))]
    async fn rotate_tokens_tx(
        &self,
        old_selector: &str,
        mut new_session: NewSession,
        user_id: i64,
    ) -> Result<RotationOutcome, AuthError> {
        let mut tx = self.pool.begin().await?;

        if !Self::mark_used(&mut tx, old_selector).await? {
            debug!("rotation lost: session no longer active");
            tx.rollback().await?;
            return Ok(RotationOutcome::AlreadyUsed);
        }

        new_session.user_id = user_id;
        Self::insert_session(&mut tx, &new_session).await?;

        let user = Self::fetch_user(&mut tx, user_id)
            .await?
            .ok_or_else(|| AuthError::internal(format!("user {user_id} not found during rotation")))?;

        tx.commit().await?;
        Ok(RotationOutcome::Rotated(user))
    }

    async fn get_active_session_by_selector(
        &self,
        selector: &str,
    ) -> Result<Option<RefreshSession>, AuthError> {
        self.fetch_session(selector, Some(SessionStatus::Active)).await
    }

    async fn find_session_by_selector(
        &self,
        selector: &str,
    ) -> Result<Option<RefreshSession>, AuthError> {
        self.fetch_session(selector, None).await
    }

    #[instrument(skip(self))]
    async fn delete_all_user_sessions(&self, user_id: i64) -> Result<u64, AuthError> {
        let result = sqlx::query("DELETE FROM sessions WHERE user_id = $1")
            .bind(user_id)
            .execute(&self.pool)
            .await?;
        Ok(result.rows_affected())
    }

    async fn create_session(&self, session: NewSession) -> Result<RefreshSession, AuthError> {
        let mut conn = self.pool.acquire().await?;
        Self::insert_session(&mut conn, &session).await
    }

    async fn mark_session_used(&self, selector: &str) -> Result<bool, AuthError> {
        let mut conn = self.pool.acquire().await?;
        Self::mark_used(&mut conn, selector).await
    }

    async fn delete_session(&self, selector: &str) -> Result<bool, AuthError> {
        let result = sqlx::query("DELETE FROM sessions WHERE selector = $1")
            .bind(selector)
            .execute(&self.pool)
            .await?;
        Ok(result.rows_affected() > 0)
    }

    async fn create_or_get_user(&self, guid: &str) -> Result<User, AuthError> {
        let mut conn = self.pool.acquire().await?;
        Self::upsert_user(&mut conn, guid).await
    }

    async fn get_user_by_id(&self, id: i64) -> Result<Option<User>, AuthError> {
        let mut conn = self.pool.acquire().await?;
        Self::fetch_user(&mut conn, id).await
    }

    #[instrument(skip(self))]
    async fn purge_expired_sessions(&self, now: DateTime<Utc>) -> Result<u64, AuthError> {
        let result = sqlx::query("DELETE FROM sessions WHERE expires_at <= $1")
            .bind(now)
            .execute(&self.pool)
            .await?;
        Ok(result.rows_affected())
    }
}
