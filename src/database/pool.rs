//! Database Connection Pool using sqlx

use anyhow::{Context, Result};
use sqlx::postgres::{PgPool, PgPoolOptions};
use std::sync::Arc;
use tracing::info;

use crate::database::blacklist::BlacklistRepository;
use crate::database::identities::IdentityRepository;
use crate::database::licenses::LicenseRepository;
use crate::database::points::PointRepository;
use crate::database::ranks::RankRepository;
use crate::database::sessions::SessionRepository;

const SCHEMA: &[(&str, &str)] = &[
    (
        "verification_sessions",
        r#"
        CREATE TABLE IF NOT EXISTS verification_sessions (
            token_hash TEXT PRIMARY KEY,
            guild_id BIGINT NOT NULL,
            user_id BIGINT NOT NULL,
            created_at TIMESTAMPTZ NOT NULL DEFAULT NOW()
        )
        "#,
    ),
    (
        "verification_sessions index",
        "CREATE INDEX IF NOT EXISTS idx_verification_sessions_created ON verification_sessions (created_at)",
    ),
    (
        "identity_links",
        r#"
        CREATE TABLE IF NOT EXISTS identity_links (
            guild_id BIGINT NOT NULL,
            user_id BIGINT NOT NULL,
            external_user_id BIGINT NOT NULL,
            external_display_name TEXT NOT NULL,
            linked_at TIMESTAMPTZ NOT NULL DEFAULT NOW(),
            PRIMARY KEY (guild_id, user_id)
        )
        "#,
    ),
    (
        "identity_links index",
        "CREATE INDEX IF NOT EXISTS idx_identity_links_external ON identity_links (guild_id, external_user_id)",
    ),
    (
        "point_balances",
        r#"
        CREATE TABLE IF NOT EXISTS point_balances (
            guild_id BIGINT NOT NULL,
            user_id BIGINT NOT NULL,
            points BIGINT NOT NULL DEFAULT 0 CHECK (points >= 0),
            updated_at TIMESTAMPTZ NOT NULL DEFAULT NOW(),
            PRIMARY KEY (guild_id, user_id)
        )
        "#,
    ),
    (
        "rank_definitions",
        r#"
        CREATE TABLE IF NOT EXISTS rank_definitions (
            guild_id BIGINT NOT NULL,
            local_privilege_id BIGINT NOT NULL,
            name TEXT NOT NULL,
            points_required BIGINT NOT NULL CHECK (points_required >= 0),
            sort_order INTEGER NOT NULL,
            PRIMARY KEY (guild_id, local_privilege_id)
        )
        "#,
    ),
    (
        "external_groups",
        r#"
        CREATE TABLE IF NOT EXISTS external_groups (
            group_id BIGINT PRIMARY KEY,
            guild_id BIGINT NOT NULL,
            name TEXT NOT NULL
        )
        "#,
    ),
    (
        "rank_mappings",
        r#"
        CREATE TABLE IF NOT EXISTS rank_mappings (
            group_id BIGINT NOT NULL REFERENCES external_groups (group_id) ON DELETE CASCADE,
            local_privilege_id BIGINT NOT NULL,
            external_rank_id BIGINT NOT NULL,
            PRIMARY KEY (group_id, local_privilege_id)
        )
        "#,
    ),
    (
        "group_blacklist",
        r#"
        CREATE TABLE IF NOT EXISTS group_blacklist (
            guild_id BIGINT NOT NULL,
            group_id BIGINT NOT NULL,
            reason TEXT,
            added_at TIMESTAMPTZ NOT NULL DEFAULT NOW(),
            PRIMARY KEY (guild_id, group_id)
        )
        "#,
    ),
    (
        "licenses",
        r#"
        CREATE TABLE IF NOT EXISTS licenses (
            license_key TEXT PRIMARY KEY,
            tier TEXT NOT NULL DEFAULT 'starter',
            max_guilds INTEGER NOT NULL DEFAULT 1,
            is_active BOOLEAN NOT NULL DEFAULT TRUE,
            created_at TIMESTAMPTZ NOT NULL DEFAULT NOW()
        )
        "#,
    ),
    (
        "guild_licenses",
        r#"
        CREATE TABLE IF NOT EXISTS guild_licenses (
            guild_id BIGINT PRIMARY KEY,
            license_key TEXT NOT NULL REFERENCES licenses (license_key),
            activated_at TIMESTAMPTZ NOT NULL DEFAULT NOW()
        )
        "#,
    ),
];

pub struct DatabasePool {
    pool: PgPool,
    sessions: Arc<SessionRepository>,
    identities: Arc<IdentityRepository>,
    points: Arc<PointRepository>,
    ranks: Arc<RankRepository>,
    blacklist: Arc<BlacklistRepository>,
    licenses: Arc<LicenseRepository>,
}

impl DatabasePool {
    pub async fn new(connection_string: &str) -> Result<Self> {
        let pool = PgPoolOptions::new()
            .max_connections(10)
            .connect(connection_string)
            .await
            .context("Failed to connect to PostgreSQL")?;

        info!("Connected to PostgreSQL");

        Ok(Self {
            sessions: Arc::new(SessionRepository::new(pool.clone())),
            identities: Arc::new(IdentityRepository::new(pool.clone())),
            points: Arc::new(PointRepository::new(pool.clone())),
            ranks: Arc::new(RankRepository::new(pool.clone())),
            blacklist: Arc::new(BlacklistRepository::new(pool.clone())),
            licenses: Arc::new(LicenseRepository::new(pool.clone())),
            pool,
        })
    }

    pub async fn init_schema(&self) -> Result<()> {
        info!("Initializing database schema...");

        for (name, ddl) in SCHEMA {
            sqlx::query(ddl)
                .execute(&self.pool)
                .await
                .with_context(|| format!("Failed to create {}", name))?;
        }

        info!("Database schema initialized");
        Ok(())
    }

    pub fn sessions(&self) -> Arc<SessionRepository> {
        self.sessions.clone()
    }

    pub fn identities(&self) -> Arc<IdentityRepository> {
        self.identities.clone()
    }

    pub fn points(&self) -> Arc<PointRepository> {
        self.points.clone()
    }

    pub fn ranks(&self) -> Arc<RankRepository> {
        self.ranks.clone()
    }

    pub fn blacklist(&self) -> Arc<BlacklistRepository> {
        self.blacklist.clone()
    }

    pub fn licenses(&self) -> Arc<LicenseRepository> {
        self.licenses.clone()
    }

    pub fn pool(&self) -> &PgPool {
        &self.pool
    }
}
