//! Identity link repository

use async_trait::async_trait;
use sqlx::postgres::PgRow;
use sqlx::{PgPool, Row};
use tracing::debug;

use super::{from_db, to_db};
use crate::error::StoreResult;
use crate::identity::{IdentityLink, IdentityStore};

pub struct IdentityRepository {
    pool: PgPool,
}

impl IdentityRepository {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }
}

fn link_from_row(row: &PgRow) -> IdentityLink {
    IdentityLink {
        guild_scope: from_db(row.get("guild_id")),
        platform_user_id: from_db(row.get("user_id")),
        external_user_id: from_db(row.get("external_user_id")),
        external_display_name: row.get("external_display_name"),
        linked_at: row.get("linked_at"),
    }
}

#[async_trait]
impl IdentityStore for IdentityRepository {
    async fn upsert(&self, link: &IdentityLink) -> StoreResult<IdentityLink> {
        let row = sqlx::query(
            r#"
            INSERT INTO identity_links
            (guild_id, user_id, external_user_id, external_display_name, linked_at)
            VALUES ($1, $2, $3, $4, $5)
            ON CONFLICT (guild_id, user_id) DO UPDATE SET
                external_user_id = EXCLUDED.external_user_id,
                external_display_name = EXCLUDED.external_display_name,
                linked_at = EXCLUDED.linked_at
            RETURNING guild_id, user_id, external_user_id, external_display_name, linked_at
            "#,
        )
        .bind(to_db(link.guild_scope))
        .bind(to_db(link.platform_user_id))
        .bind(to_db(link.external_user_id))
        .bind(&link.external_display_name)
        .bind(link.linked_at)
        .fetch_one(&self.pool)
        .await?;

        debug!(guild = link.guild_scope, user = link.platform_user_id, "Identity link stored");
        Ok(link_from_row(&row))
    }

    async fn get(&self, guild: u64, platform_user: u64) -> StoreResult<Option<IdentityLink>> {
        let row = sqlx::query(
            r#"
            SELECT guild_id, user_id, external_user_id, external_display_name, linked_at
            FROM identity_links
            WHERE guild_id = $1 AND user_id = $2
            "#,
        )
        .bind(to_db(guild))
        .bind(to_db(platform_user))
        .fetch_optional(&self.pool)
        .await?;

        Ok(row.as_ref().map(link_from_row))
    }

    async fn find_by_external(&self, guild: u64, external_user: u64) -> StoreResult<Option<IdentityLink>> {
        let row = sqlx::query(
            r#"
            SELECT guild_id, user_id, external_user_id, external_display_name, linked_at
            FROM identity_links
            WHERE guild_id = $1 AND external_user_id = $2
            ORDER BY linked_at DESC
            LIMIT 1
            "#,
        )
        .bind(to_db(guild))
        .bind(to_db(external_user))
        .fetch_optional(&self.pool)
        .await?;

        Ok(row.as_ref().map(link_from_row))
    }
}
