//! License and guild activation repository

use async_trait::async_trait;
use chrono::Utc;
use sqlx::postgres::PgRow;
use sqlx::{PgPool, Row};

use super::to_db;
use crate::error::{LicenseError, StoreError, StoreResult};
use crate::licensing::{GuildLicense, License, LicenseStore};

pub struct LicenseRepository {
    pool: PgPool,
}

impl LicenseRepository {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }
}

fn license_from_row(row: &PgRow) -> License {
    License {
        key: row.get("license_key"),
        tier: row.get("tier"),
        max_guilds: row.get("max_guilds"),
        is_active: row.get("is_active"),
    }
}

#[async_trait]
impl LicenseStore for LicenseRepository {
    async fn insert_license(&self, license: &License) -> StoreResult<()> {
        sqlx::query(
            r#"
            INSERT INTO licenses (license_key, tier, max_guilds, is_active)
            VALUES ($1, $2, $3, $4)
            ON CONFLICT (license_key) DO NOTHING
            "#,
        )
        .bind(&license.key)
        .bind(&license.tier)
        .bind(license.max_guilds)
        .bind(license.is_active)
        .execute(&self.pool)
        .await?;

        Ok(())
    }

    async fn activate(&self, guild: u64, key: &str) -> Result<GuildLicense, LicenseError> {
        let mut tx = self.pool.begin().await.map_err(StoreError::from)?;

        // Lock the license row so concurrent activations count bindings serially
        let row = sqlx::query(
            r#"
            SELECT license_key, tier, max_guilds, is_active
            FROM licenses
            WHERE license_key = $1
            FOR UPDATE
            "#,
        )
        .bind(key)
        .fetch_optional(&mut *tx)
        .await
        .map_err(StoreError::from)?;

        let license = row.as_ref().map(license_from_row).ok_or(LicenseError::UnknownKey)?;
        if !license.is_active {
            return Err(LicenseError::Inactive);
        }

        let existing = sqlx::query("SELECT activated_at FROM guild_licenses WHERE guild_id = $1 AND license_key = $2")
            .bind(to_db(guild))
            .bind(key)
            .fetch_optional(&mut *tx)
            .await
            .map_err(StoreError::from)?;

        if let Some(row) = existing {
            tx.commit().await.map_err(StoreError::from)?;
            return Ok(GuildLicense {
                guild_scope: guild,
                license,
                activated_at: row.get("activated_at"),
            });
        }

        let bound: i64 = sqlx::query("SELECT COUNT(*) AS bound FROM guild_licenses WHERE license_key = $1")
            .bind(key)
            .fetch_one(&mut *tx)
            .await
            .map_err(StoreError::from)?
            .get("bound");

        if bound >= i64::from(license.max_guilds) {
            return Err(LicenseError::GuildLimitReached {
                max_guilds: license.max_guilds,
            });
        }

        let activated_at = Utc::now();
        sqlx::query(
            r#"
            INSERT INTO guild_licenses (guild_id, license_key, activated_at)
            VALUES ($1, $2, $3)
            ON CONFLICT (guild_id) DO UPDATE SET
                license_key = EXCLUDED.license_key,
                activated_at = EXCLUDED.activated_at
            "#,
        )
        .bind(to_db(guild))
        .bind(key)
        .bind(activated_at)
        .execute(&mut *tx)
        .await
        .map_err(StoreError::from)?;

        tx.commit().await.map_err(StoreError::from)?;

        Ok(GuildLicense {
            guild_scope: guild,
            license,
            activated_at,
        })
    }

    async fn guild_license(&self, guild: u64) -> StoreResult<Option<GuildLicense>> {
        let row = sqlx::query(
            r#"
            SELECT l.license_key, l.tier, l.max_guilds, l.is_active, g.activated_at
            FROM guild_licenses g
            JOIN licenses l ON l.license_key = g.license_key
            WHERE g.guild_id = $1
            "#,
        )
        .bind(to_db(guild))
        .fetch_optional(&self.pool)
        .await?;

        Ok(row.map(|row| GuildLicense {
            guild_scope: guild,
            license: license_from_row(&row),
            activated_at: row.get("activated_at"),
        }))
    }
}
