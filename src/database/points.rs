//! Point balance repository
//!
//! Every mutation is a single upsert statement, so Postgres row locking makes
//! it atomic per (guild, user).

use async_trait::async_trait;
use sqlx::{PgPool, Row};

use super::{from_db, to_db};
use crate::error::StoreResult;
use crate::points::{PointBalance, PointStore};

pub struct PointRepository {
    pool: PgPool,
}

impl PointRepository {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }
}

#[async_trait]
impl PointStore for PointRepository {
    async fn add(&self, guild: u64, user: u64, amount: i64) -> StoreResult<i64> {
        let row = sqlx::query(
            r#"
            INSERT INTO point_balances (guild_id, user_id, points, updated_at)
            VALUES ($1, $2, $3, NOW())
            ON CONFLICT (guild_id, user_id) DO UPDATE SET
                points = point_balances.points + EXCLUDED.points,
                updated_at = NOW()
            RETURNING points
            "#,
        )
        .bind(to_db(guild))
        .bind(to_db(user))
        .bind(amount)
        .fetch_one(&self.pool)
        .await?;

        Ok(row.get("points"))
    }

    async fn subtract_floor(&self, guild: u64, user: u64, amount: i64) -> StoreResult<i64> {
        let row = sqlx::query(
            r#"
            INSERT INTO point_balances (guild_id, user_id, points, updated_at)
            VALUES ($1, $2, 0, NOW())
            ON CONFLICT (guild_id, user_id) DO UPDATE SET
                points = GREATEST(point_balances.points - $3, 0),
                updated_at = NOW()
            RETURNING points
            "#,
        )
        .bind(to_db(guild))
        .bind(to_db(user))
        .bind(amount)
        .fetch_one(&self.pool)
        .await?;

        Ok(row.get("points"))
    }

    async fn get(&self, guild: u64, user: u64) -> StoreResult<i64> {
        let row = sqlx::query("SELECT points FROM point_balances WHERE guild_id = $1 AND user_id = $2")
            .bind(to_db(guild))
            .bind(to_db(user))
            .fetch_optional(&self.pool)
            .await?;

        Ok(row.map(|r| r.get("points")).unwrap_or(0))
    }

    async fn list_guild(&self, guild: u64) -> StoreResult<Vec<PointBalance>> {
        let rows = sqlx::query(
            "SELECT user_id, points FROM point_balances WHERE guild_id = $1 ORDER BY points DESC",
        )
        .bind(to_db(guild))
        .fetch_all(&self.pool)
        .await?;

        Ok(rows
            .into_iter()
            .map(|row| PointBalance {
                guild_scope: guild,
                platform_user_id: from_db(row.get("user_id")),
                points: row.get("points"),
            })
            .collect())
    }
}
