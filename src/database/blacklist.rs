//! Per-guild group blacklist repository

use async_trait::async_trait;
use sqlx::{PgPool, Row};

use super::{from_db, to_db};
use crate::error::StoreResult;
use crate::risk::{BlacklistEntry, BlacklistStore};

pub struct BlacklistRepository {
    pool: PgPool,
}

impl BlacklistRepository {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }
}

#[async_trait]
impl BlacklistStore for BlacklistRepository {
    async fn add(&self, entry: &BlacklistEntry) -> StoreResult<()> {
        sqlx::query(
            r#"
            INSERT INTO group_blacklist (guild_id, group_id, reason, added_at)
            VALUES ($1, $2, $3, $4)
            ON CONFLICT (guild_id, group_id) DO UPDATE SET reason = EXCLUDED.reason
            "#,
        )
        .bind(to_db(entry.guild_scope))
        .bind(to_db(entry.group_id))
        .bind(&entry.reason)
        .bind(entry.added_at)
        .execute(&self.pool)
        .await?;

        Ok(())
    }

    async fn remove(&self, guild: u64, group_id: u64) -> StoreResult<bool> {
        let result = sqlx::query("DELETE FROM group_blacklist WHERE guild_id = $1 AND group_id = $2")
            .bind(to_db(guild))
            .bind(to_db(group_id))
            .execute(&self.pool)
            .await?;

        Ok(result.rows_affected() > 0)
    }

    async fn list(&self, guild: u64) -> StoreResult<Vec<BlacklistEntry>> {
        let rows = sqlx::query(
            r#"
            SELECT group_id, reason, added_at
            FROM group_blacklist
            WHERE guild_id = $1
            ORDER BY group_id
            "#,
        )
        .bind(to_db(guild))
        .fetch_all(&self.pool)
        .await?;

        Ok(rows
            .into_iter()
            .map(|row| BlacklistEntry {
                guild_scope: guild,
                group_id: from_db(row.get("group_id")),
                reason: row.get("reason"),
                added_at: row.get("added_at"),
            })
            .collect())
    }
}
