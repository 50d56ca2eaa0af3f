//! Guild licensing
//!
//! A license key can be bound to at most `max_guilds` guilds. Activation is
//! idempotent for a guild already bound to the key; a guild moves to a new
//! key by activating it.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::Mutex;
use tracing::info;

use crate::error::{LicenseError, StoreResult};

pub const DEFAULT_TIER: &str = "starter";

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct License {
    pub key: String,
    pub tier: String,
    pub max_guilds: i32,
    pub is_active: bool,
}

impl License {
    pub fn starter(key: &str) -> Self {
        Self {
            key: key.to_string(),
            tier: DEFAULT_TIER.to_string(),
            max_guilds: 1,
            is_active: true,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct GuildLicense {
    pub guild_scope: u64,
    pub license: License,
    pub activated_at: DateTime<Utc>,
}

#[async_trait]
pub trait LicenseStore: Send + Sync {
    /// Insert a license; an existing key is left untouched
    async fn insert_license(&self, license: &License) -> StoreResult<()>;

    /// Bind `guild` to `key` atomically with respect to the guild limit
    async fn activate(&self, guild: u64, key: &str) -> Result<GuildLicense, LicenseError>;

    async fn guild_license(&self, guild: u64) -> StoreResult<Option<GuildLicense>>;
}

#[derive(Default)]
struct LicenseState {
    licenses: HashMap<String, License>,
    /// guild -> (key, activated_at)
    bindings: HashMap<u64, (String, DateTime<Utc>)>,
}

#[derive(Default)]
pub struct MemoryLicenseStore {
    state: Mutex<LicenseState>,
}

impl MemoryLicenseStore {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl LicenseStore for MemoryLicenseStore {
    async fn insert_license(&self, license: &License) -> StoreResult<()> {
        let mut state = self.state.lock().await;
        state
            .licenses
            .entry(license.key.clone())
            .or_insert_with(|| license.clone());
        Ok(())
    }

    async fn activate(&self, guild: u64, key: &str) -> Result<GuildLicense, LicenseError> {
        let mut state = self.state.lock().await;
        let license = state.licenses.get(key).cloned().ok_or(LicenseError::UnknownKey)?;
        if !license.is_active {
            return Err(LicenseError::Inactive);
        }

        if let Some((bound_key, activated_at)) = state.bindings.get(&guild)
            && bound_key == key
        {
            return Ok(GuildLicense {
                guild_scope: guild,
                license,
                activated_at: *activated_at,
            });
        }

        let bound = state.bindings.values().filter(|(k, _)| k == key).count();
        if bound >= license.max_guilds.max(0) as usize {
            return Err(LicenseError::GuildLimitReached {
                max_guilds: license.max_guilds,
            });
        }

        let activated_at = Utc::now();
        state.bindings.insert(guild, (key.to_string(), activated_at));
        Ok(GuildLicense {
            guild_scope: guild,
            license,
            activated_at,
        })
    }

    async fn guild_license(&self, guild: u64) -> StoreResult<Option<GuildLicense>> {
        let state = self.state.lock().await;
        Ok(state.bindings.get(&guild).and_then(|(key, activated_at)| {
            state.licenses.get(key).map(|license| GuildLicense {
                guild_scope: guild,
                license: license.clone(),
                activated_at: *activated_at,
            })
        }))
    }
}

pub struct LicenseService {
    store: Arc<dyn LicenseStore>,
}

impl LicenseService {
    pub fn new(store: Arc<dyn LicenseStore>) -> Self {
        Self { store }
    }

    pub async fn seed(&self, key: &str) -> StoreResult<()> {
        self.store.insert_license(&License::starter(key)).await?;
        info!("Seed license available");
        Ok(())
    }

    pub async fn activate(&self, guild: u64, key: &str) -> Result<GuildLicense, LicenseError> {
        let key = key.trim();
        let activation = self.store.activate(guild, key).await?;
        info!(guild, tier = %activation.license.tier, "Guild activated");
        Ok(activation)
    }

    pub async fn license_for(&self, guild: u64) -> Result<Option<GuildLicense>, LicenseError> {
        Ok(self.store.guild_license(guild).await?)
    }
}
