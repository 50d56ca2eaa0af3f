//! Rank definitions, external groups and rank mappings

use async_trait::async_trait;
use sqlx::postgres::PgRow;
use sqlx::{PgPool, Row};
use tracing::debug;

use super::{from_db, to_db};
use crate::error::StoreResult;
use crate::ranks::{ExternalGroup, RankDefinition, RankMapping, RankStore};

pub struct RankRepository {
    pool: PgPool,
}

impl RankRepository {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }
}

fn rank_from_row(row: &PgRow) -> RankDefinition {
    RankDefinition {
        guild_scope: from_db(row.get("guild_id")),
        name: row.get("name"),
        local_privilege_id: from_db(row.get("local_privilege_id")),
        points_required: row.get("points_required"),
        order: row.get("sort_order"),
    }
}

fn mapping_from_row(row: &PgRow) -> RankMapping {
    RankMapping {
        external_group_ref: from_db(row.get("group_id")),
        local_privilege_id: from_db(row.get("local_privilege_id")),
        external_rank_id: row.get("external_rank_id"),
    }
}

#[async_trait]
impl RankStore for RankRepository {
    async fn define_rank(
        &self,
        guild: u64,
        name: &str,
        privilege: u64,
        points_required: i64,
    ) -> StoreResult<RankDefinition> {
        let row = sqlx::query(
            r#"
            INSERT INTO rank_definitions (guild_id, local_privilege_id, name, points_required, sort_order)
            VALUES ($1, $2, $3, $4,
                    COALESCE((SELECT MAX(sort_order) + 1 FROM rank_definitions WHERE guild_id = $1), 0))
            ON CONFLICT (guild_id, local_privilege_id) DO UPDATE SET
                name = EXCLUDED.name,
                points_required = EXCLUDED.points_required
            RETURNING guild_id, local_privilege_id, name, points_required, sort_order
            "#,
        )
        .bind(to_db(guild))
        .bind(to_db(privilege))
        .bind(name)
        .bind(points_required)
        .fetch_one(&self.pool)
        .await?;

        debug!(guild, privilege, points_required, "Rank defined");
        Ok(rank_from_row(&row))
    }

    async fn list_ranks(&self, guild: u64) -> StoreResult<Vec<RankDefinition>> {
        let rows = sqlx::query(
            r#"
            SELECT guild_id, local_privilege_id, name, points_required, sort_order
            FROM rank_definitions
            WHERE guild_id = $1
            ORDER BY points_required DESC, sort_order ASC
            "#,
        )
        .bind(to_db(guild))
        .fetch_all(&self.pool)
        .await?;

        Ok(rows.iter().map(rank_from_row).collect())
    }

    async fn register_group(&self, group: &ExternalGroup) -> StoreResult<()> {
        sqlx::query(
            r#"
            INSERT INTO external_groups (group_id, guild_id, name)
            VALUES ($1, $2, $3)
            ON CONFLICT (group_id) DO UPDATE SET
                guild_id = EXCLUDED.guild_id,
                name = EXCLUDED.name
            "#,
        )
        .bind(to_db(group.group_ref))
        .bind(to_db(group.guild_scope))
        .bind(&group.name)
        .execute(&self.pool)
        .await?;

        Ok(())
    }

    async fn list_groups(&self, guild: u64) -> StoreResult<Vec<ExternalGroup>> {
        let rows = sqlx::query("SELECT group_id, guild_id, name FROM external_groups WHERE guild_id = $1 ORDER BY group_id")
            .bind(to_db(guild))
            .fetch_all(&self.pool)
            .await?;

        Ok(rows
            .into_iter()
            .map(|row| ExternalGroup {
                group_ref: from_db(row.get("group_id")),
                guild_scope: from_db(row.get("guild_id")),
                name: row.get("name"),
            })
            .collect())
    }

    async fn upsert_mapping(&self, mapping: &RankMapping) -> StoreResult<()> {
        sqlx::query(
            r#"
            INSERT INTO rank_mappings (group_id, local_privilege_id, external_rank_id)
            VALUES ($1, $2, $3)
            ON CONFLICT (group_id, local_privilege_id) DO UPDATE SET
                external_rank_id = EXCLUDED.external_rank_id
            "#,
        )
        .bind(to_db(mapping.external_group_ref))
        .bind(to_db(mapping.local_privilege_id))
        .bind(mapping.external_rank_id)
        .execute(&self.pool)
        .await?;

        Ok(())
    }

    async fn mappings_for_privilege(&self, guild: u64, privilege: u64) -> StoreResult<Vec<RankMapping>> {
        let rows = sqlx::query(
            r#"
            SELECT m.group_id, m.local_privilege_id, m.external_rank_id
            FROM rank_mappings m
            JOIN external_groups g ON g.group_id = m.group_id
            WHERE g.guild_id = $1 AND m.local_privilege_id = $2
            ORDER BY m.group_id
            "#,
        )
        .bind(to_db(guild))
        .bind(to_db(privilege))
        .fetch_all(&self.pool)
        .await?;

        Ok(rows.iter().map(mapping_from_row).collect())
    }

    async fn guilds_with_mappings(&self) -> StoreResult<Vec<u64>> {
        let rows = sqlx::query(
            r#"
            SELECT DISTINCT g.guild_id
            FROM external_groups g
            JOIN rank_mappings m ON m.group_id = g.group_id
            ORDER BY g.guild_id
            "#,
        )
        .fetch_all(&self.pool)
        .await?;

        Ok(rows.into_iter().map(|row| from_db(row.get("guild_id"))).collect())
    }
}
