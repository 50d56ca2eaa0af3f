//! Group blacklist: the operator's static list plus each guild's own entries.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use dashmap::DashMap;
use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;
use std::sync::Arc;

use crate::error::StoreResult;

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BlacklistEntry {
    pub guild_scope: u64,
    pub group_id: u64,
    pub reason: Option<String>,
    pub added_at: DateTime<Utc>,
}

#[async_trait]
pub trait BlacklistStore: Send + Sync {
    async fn add(&self, entry: &BlacklistEntry) -> StoreResult<()>;

    /// `false` when the group was not listed
    async fn remove(&self, guild: u64, group_id: u64) -> StoreResult<bool>;

    async fn list(&self, guild: u64) -> StoreResult<Vec<BlacklistEntry>>;
}

#[derive(Default)]
pub struct MemoryBlacklistStore {
    entries: DashMap<(u64, u64), BlacklistEntry>,
}

impl MemoryBlacklistStore {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl BlacklistStore for MemoryBlacklistStore {
    async fn add(&self, entry: &BlacklistEntry) -> StoreResult<()> {
        self.entries
            .insert((entry.guild_scope, entry.group_id), entry.clone());
        Ok(())
    }

    async fn remove(&self, guild: u64, group_id: u64) -> StoreResult<bool> {
        Ok(self.entries.remove(&(guild, group_id)).is_some())
    }

    async fn list(&self, guild: u64) -> StoreResult<Vec<BlacklistEntry>> {
        let mut entries: Vec<BlacklistEntry> = self
            .entries
            .iter()
            .filter(|e| e.key().0 == guild)
            .map(|e| e.value().clone())
            .collect();
        entries.sort_by_key(|e| e.group_id);
        Ok(entries)
    }
}

pub struct Blacklist {
    static_groups: BTreeSet<u64>,
    store: Arc<dyn BlacklistStore>,
}

impl Blacklist {
    pub fn new(static_groups: impl IntoIterator<Item = u64>, store: Arc<dyn BlacklistStore>) -> Self {
        Self {
            static_groups: static_groups.into_iter().collect(),
            store,
        }
    }

    pub fn store(&self) -> &Arc<dyn BlacklistStore> {
        &self.store
    }

    /// Effective blacklist for a guild
    pub async fn groups_for(&self, guild: u64) -> StoreResult<BTreeSet<u64>> {
        let mut groups = self.static_groups.clone();
        groups.extend(self.store.list(guild).await?.into_iter().map(|e| e.group_id));
        Ok(groups)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn entry(guild: u64, group_id: u64) -> BlacklistEntry {
        BlacklistEntry {
            guild_scope: guild,
            group_id,
            reason: Some("raid group".to_string()),
            added_at: Utc::now(),
        }
    }

    #[tokio::test]
    async fn test_union_of_static_and_guild_lists() {
        let store = Arc::new(MemoryBlacklistStore::new());
        store.add(&entry(1, 20)).await.unwrap();
        store.add(&entry(2, 30)).await.unwrap();
        let blacklist = Blacklist::new([10, 20], store);

        let groups: Vec<u64> = blacklist.groups_for(1).await.unwrap().into_iter().collect();
        assert_eq!(groups, vec![10, 20]);
        let groups: Vec<u64> = blacklist.groups_for(2).await.unwrap().into_iter().collect();
        assert_eq!(groups, vec![10, 20, 30]);
    }

    #[tokio::test]
    async fn test_remove() {
        let store = MemoryBlacklistStore::new();
        store.add(&entry(1, 20)).await.unwrap();
        assert!(store.remove(1, 20).await.unwrap());
        assert!(!store.remove(1, 20).await.unwrap());
        assert!(store.list(1).await.unwrap().is_empty());
    }
}
