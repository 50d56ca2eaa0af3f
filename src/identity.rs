//! Identity Ledger - platform user <-> external user links per guild.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use dashmap::DashMap;
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tracing::info;

use crate::error::{LedgerError, StoreResult};

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct IdentityLink {
    pub guild_scope: u64,
    pub platform_user_id: u64,
    pub external_user_id: u64,
    pub external_display_name: String,
    pub linked_at: DateTime<Utc>,
}

#[async_trait]
pub trait IdentityStore: Send + Sync {
    /// Insert or overwrite the link keyed by (guild, platform user)
    async fn upsert(&self, link: &IdentityLink) -> StoreResult<IdentityLink>;

    async fn get(&self, guild: u64, platform_user: u64) -> StoreResult<Option<IdentityLink>>;

    /// Most recently linked platform user for an external identity
    async fn find_by_external(&self, guild: u64, external_user: u64) -> StoreResult<Option<IdentityLink>>;
}

#[derive(Default)]
pub struct MemoryIdentityStore {
    links: DashMap<(u64, u64), IdentityLink>,
}

impl MemoryIdentityStore {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl IdentityStore for MemoryIdentityStore {
    async fn upsert(&self, link: &IdentityLink) -> StoreResult<IdentityLink> {
        self.links
            .insert((link.guild_scope, link.platform_user_id), link.clone());
        Ok(link.clone())
    }

    async fn get(&self, guild: u64, platform_user: u64) -> StoreResult<Option<IdentityLink>> {
        Ok(self.links.get(&(guild, platform_user)).map(|l| l.clone()))
    }

    async fn find_by_external(&self, guild: u64, external_user: u64) -> StoreResult<Option<IdentityLink>> {
        Ok(self
            .links
            .iter()
            .filter(|entry| entry.guild_scope == guild && entry.external_user_id == external_user)
            .max_by_key(|entry| entry.linked_at)
            .map(|entry| entry.value().clone()))
    }
}

pub struct IdentityLedger {
    store: Arc<dyn IdentityStore>,
}

impl IdentityLedger {
    pub fn new(store: Arc<dyn IdentityStore>) -> Self {
        Self { store }
    }

    /// Commit a verified link. Re-verification overwrites the previous
    /// external identity for the same platform user.
    pub async fn link(
        &self,
        guild_scope: u64,
        platform_user_id: u64,
        external_user_id: u64,
        display_name: &str,
    ) -> Result<IdentityLink, LedgerError> {
        let link = IdentityLink {
            guild_scope,
            platform_user_id,
            external_user_id,
            external_display_name: display_name.to_string(),
            linked_at: Utc::now(),
        };

        let stored = self.store.upsert(&link).await?;
        info!(
            guild = guild_scope,
            user = platform_user_id,
            external = external_user_id,
            "Identity linked"
        );
        Ok(stored)
    }

    pub async fn lookup(&self, guild_scope: u64, platform_user_id: u64) -> Result<IdentityLink, LedgerError> {
        self.store
            .get(guild_scope, platform_user_id)
            .await?
            .ok_or(LedgerError::NotLinked)
    }

    pub async fn reverse_lookup(&self, guild_scope: u64, external_user_id: u64) -> Result<IdentityLink, LedgerError> {
        self.store
            .find_by_external(guild_scope, external_user_id)
            .await?
            .ok_or(LedgerError::NotLinked)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn ledger() -> IdentityLedger {
        IdentityLedger::new(Arc::new(MemoryIdentityStore::new()))
    }

    #[tokio::test]
    async fn test_link_and_lookup() {
        let ledger = ledger();
        assert_eq!(ledger.lookup(1, 10).await, Err(LedgerError::NotLinked));

        ledger.link(1, 10, 500, "Builder").await.unwrap();
        let link = ledger.lookup(1, 10).await.unwrap();
        assert_eq!(link.external_user_id, 500);
        assert_eq!(link.external_display_name, "Builder");

        // Links are scoped per guild
        assert_eq!(ledger.lookup(2, 10).await, Err(LedgerError::NotLinked));
    }

    #[tokio::test]
    async fn test_relink_overwrites() {
        let ledger = ledger();
        ledger.link(1, 10, 500, "Old").await.unwrap();
        ledger.link(1, 10, 600, "New").await.unwrap();

        let link = ledger.lookup(1, 10).await.unwrap();
        assert_eq!(link.external_user_id, 600);
        assert_eq!(link.external_display_name, "New");
        assert_eq!(ledger.reverse_lookup(1, 500).await, Err(LedgerError::NotLinked));
        assert_eq!(ledger.reverse_lookup(1, 600).await.unwrap().platform_user_id, 10);
    }

    #[tokio::test]
    async fn test_relink_same_identity_is_idempotent() {
        let ledger = ledger();
        ledger.link(1, 10, 500, "Builder").await.unwrap();
        ledger.link(1, 10, 500, "Builder").await.unwrap();
        assert_eq!(ledger.lookup(1, 10).await.unwrap().external_user_id, 500);
    }

    #[tokio::test]
    async fn test_shared_external_identity_prefers_latest() {
        let ledger = ledger();
        ledger.link(1, 10, 500, "Builder").await.unwrap();
        tokio::time::sleep(std::time::Duration::from_millis(5)).await;
        ledger.link(1, 11, 500, "Builder").await.unwrap();

        assert_eq!(ledger.reverse_lookup(1, 500).await.unwrap().platform_user_id, 11);
    }
}
