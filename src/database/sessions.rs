//! Verification session repository

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use sqlx::{PgPool, Row};
use tracing::debug;

use super::{from_db, to_db};
use crate::error::StoreResult;
use crate::verification::{SessionStore, VerificationSession};

pub struct SessionRepository {
    pool: PgPool,
}

impl SessionRepository {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }
}

#[async_trait]
impl SessionStore for SessionRepository {
    async fn insert(&self, session: &VerificationSession) -> StoreResult<()> {
        sqlx::query(
            r#"
            INSERT INTO verification_sessions (token_hash, guild_id, user_id, created_at)
            VALUES ($1, $2, $3, $4)
            "#,
        )
        .bind(&session.token_hash)
        .bind(to_db(session.guild_scope))
        .bind(to_db(session.platform_user_id))
        .bind(session.created_at)
        .execute(&self.pool)
        .await?;

        Ok(())
    }

    async fn take(&self, token_hash: &str) -> StoreResult<Option<VerificationSession>> {
        // Delete-and-return in one statement; concurrent takers see no row
        let row = sqlx::query(
            r#"
            DELETE FROM verification_sessions
            WHERE token_hash = $1
            RETURNING token_hash, guild_id, user_id, created_at
            "#,
        )
        .bind(token_hash)
        .fetch_optional(&self.pool)
        .await?;

        Ok(row.map(|row| VerificationSession {
            token_hash: row.get("token_hash"),
            guild_scope: from_db(row.get("guild_id")),
            platform_user_id: from_db(row.get("user_id")),
            created_at: row.get("created_at"),
        }))
    }

    async fn purge_created_before(&self, cutoff: DateTime<Utc>) -> StoreResult<u64> {
        let result = sqlx::query("DELETE FROM verification_sessions WHERE created_at < $1")
            .bind(cutoff)
            .execute(&self.pool)
            .await?;

        debug!(purged = result.rows_affected(), "Expired sessions deleted");
        Ok(result.rows_affected())
    }
}
