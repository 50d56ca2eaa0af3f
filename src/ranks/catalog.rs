//! Rank definitions, registered external groups and rank mappings.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use tokio::sync::RwLock;

use crate::error::StoreResult;

/// Local point threshold that grants a chat privilege
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RankDefinition {
    pub guild_scope: u64,
    pub name: String,
    pub local_privilege_id: u64,
    pub points_required: i64,
    /// Insertion order, breaks ties between equal thresholds
    pub order: i32,
}

/// External group whose ranks mirror a guild's local ranks
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ExternalGroup {
    pub group_ref: u64,
    pub guild_scope: u64,
    pub name: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RankMapping {
    pub external_group_ref: u64,
    pub local_privilege_id: u64,
    /// Role id inside the external group's own rank ladder
    pub external_rank_id: i64,
}

#[async_trait]
pub trait RankStore: Send + Sync {
    /// Insert or update a rank by (guild, privilege). New ranks get the next
    /// insertion order; updates keep theirs.
    async fn define_rank(
        &self,
        guild: u64,
        name: &str,
        privilege: u64,
        points_required: i64,
    ) -> StoreResult<RankDefinition>;

    async fn list_ranks(&self, guild: u64) -> StoreResult<Vec<RankDefinition>>;

    async fn register_group(&self, group: &ExternalGroup) -> StoreResult<()>;

    async fn list_groups(&self, guild: u64) -> StoreResult<Vec<ExternalGroup>>;

    /// Insert or replace the mapping for (group, privilege)
    async fn upsert_mapping(&self, mapping: &RankMapping) -> StoreResult<()>;

    /// Mappings for `privilege` across every group registered to `guild`
    async fn mappings_for_privilege(&self, guild: u64, privilege: u64) -> StoreResult<Vec<RankMapping>>;

    /// Guilds that have at least one mapped group
    async fn guilds_with_mappings(&self) -> StoreResult<Vec<u64>>;
}

/// Highest qualifying rank for `balance`: greatest threshold not above it,
/// earliest inserted on ties.
pub fn select_rank(ranks: &[RankDefinition], balance: i64) -> Option<&RankDefinition> {
    ranks
        .iter()
        .filter(|r| r.points_required <= balance)
        .max_by(|a, b| {
            a.points_required
                .cmp(&b.points_required)
                .then_with(|| b.order.cmp(&a.order))
        })
}

#[derive(Default)]
struct CatalogState {
    ranks: HashMap<u64, Vec<RankDefinition>>,
    groups: HashMap<u64, ExternalGroup>,
    mappings: HashMap<(u64, u64), RankMapping>,
}

#[derive(Default)]
pub struct MemoryRankStore {
    state: RwLock<CatalogState>,
}

impl MemoryRankStore {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl RankStore for MemoryRankStore {
    async fn define_rank(
        &self,
        guild: u64,
        name: &str,
        privilege: u64,
        points_required: i64,
    ) -> StoreResult<RankDefinition> {
        let mut state = self.state.write().await;
        let ranks = state.ranks.entry(guild).or_default();

        if let Some(existing) = ranks.iter_mut().find(|r| r.local_privilege_id == privilege) {
            existing.name = name.to_string();
            existing.points_required = points_required;
            return Ok(existing.clone());
        }

        let rank = RankDefinition {
            guild_scope: guild,
            name: name.to_string(),
            local_privilege_id: privilege,
            points_required,
            order: ranks.len() as i32,
        };
        ranks.push(rank.clone());
        Ok(rank)
    }

    async fn list_ranks(&self, guild: u64) -> StoreResult<Vec<RankDefinition>> {
        let state = self.state.read().await;
        let mut ranks = state.ranks.get(&guild).cloned().unwrap_or_default();
        ranks.sort_by(|a, b| {
            b.points_required
                .cmp(&a.points_required)
                .then_with(|| a.order.cmp(&b.order))
        });
        Ok(ranks)
    }

    async fn register_group(&self, group: &ExternalGroup) -> StoreResult<()> {
        let mut state = self.state.write().await;
        state.groups.insert(group.group_ref, group.clone());
        Ok(())
    }

    async fn list_groups(&self, guild: u64) -> StoreResult<Vec<ExternalGroup>> {
        let state = self.state.read().await;
        let mut groups: Vec<ExternalGroup> = state
            .groups
            .values()
            .filter(|g| g.guild_scope == guild)
            .cloned()
            .collect();
        groups.sort_by_key(|g| g.group_ref);
        Ok(groups)
    }

    async fn upsert_mapping(&self, mapping: &RankMapping) -> StoreResult<()> {
        let mut state = self.state.write().await;
        state.mappings.insert(
            (mapping.external_group_ref, mapping.local_privilege_id),
            mapping.clone(),
        );
        Ok(())
    }

    async fn mappings_for_privilege(&self, guild: u64, privilege: u64) -> StoreResult<Vec<RankMapping>> {
        let state = self.state.read().await;
        let mut mappings: Vec<RankMapping> = state
            .mappings
            .values()
            .filter(|m| m.local_privilege_id == privilege)
            .filter(|m| {
                state
                    .groups
                    .get(&m.external_group_ref)
                    .is_some_and(|g| g.guild_scope == guild)
            })
            .cloned()
            .collect();
        mappings.sort_by_key(|m| m.external_group_ref);
        Ok(mappings)
    }

    async fn guilds_with_mappings(&self) -> StoreResult<Vec<u64>> {
        let state = self.state.read().await;
        let mut guilds: Vec<u64> = state
            .mappings
            .values()
            .filter_map(|m| state.groups.get(&m.external_group_ref))
            .map(|g| g.guild_scope)
            .collect();
        guilds.sort_unstable();
        guilds.dedup();
        Ok(guilds)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn rank(name: &str, points: i64, order: i32) -> RankDefinition {
        RankDefinition {
            guild_scope: 1,
            name: name.to_string(),
            local_privilege_id: order as u64 + 100,
            points_required: points,
            order,
        }
    }

    #[test]
    fn test_select_rank_thresholds() {
        let ranks = vec![rank("Member", 0, 0), rank("Veteran", 100, 1), rank("Elite", 500, 2)];

        assert_eq!(select_rank(&ranks, 0).unwrap().name, "Member");
        assert_eq!(select_rank(&ranks, 99).unwrap().name, "Member");
        assert_eq!(select_rank(&ranks, 100).unwrap().name, "Veteran");
        assert_eq!(select_rank(&ranks, 10_000).unwrap().name, "Elite");
    }

    #[test]
    fn test_select_rank_below_every_threshold() {
        let ranks = vec![rank("Veteran", 100, 0)];
        assert!(select_rank(&ranks, 50).is_none());
        assert!(select_rank(&[], 50).is_none());
    }

    #[test]
    fn test_select_rank_tie_prefers_first_inserted() {
        let ranks = vec![rank("Second", 100, 1), rank("First", 100, 0)];
        assert_eq!(select_rank(&ranks, 150).unwrap().name, "First");
    }

    #[tokio::test]
    async fn test_define_rank_orders_and_updates() {
        let store = MemoryRankStore::new();
        store.define_rank(1, "Member", 10, 0).await.unwrap();
        store.define_rank(1, "Veteran", 20, 100).await.unwrap();
        let updated = store.define_rank(1, "Veteran+", 20, 150).await.unwrap();
        assert_eq!(updated.order, 1);

        let ranks = store.list_ranks(1).await.unwrap();
        assert_eq!(ranks.len(), 2);
        assert_eq!(ranks[0].name, "Veteran+");
        assert_eq!(ranks[0].points_required, 150);
    }

    #[tokio::test]
    async fn test_mappings_scoped_to_guild_groups() {
        let store = MemoryRankStore::new();
        for (group_ref, guild) in [(1000, 1), (2000, 1), (3000, 2)] {
            store
                .register_group(&ExternalGroup { group_ref, guild_scope: guild, name: format!("g{}", group_ref) })
                .await
                .unwrap();
            store
                .upsert_mapping(&RankMapping { external_group_ref: group_ref, local_privilege_id: 77, external_rank_id: 5 })
                .await
                .unwrap();
        }
        // Replacing a mapping keeps one row per (group, privilege)
        store
            .upsert_mapping(&RankMapping { external_group_ref: 1000, local_privilege_id: 77, external_rank_id: 9 })
            .await
            .unwrap();

        let mappings = store.mappings_for_privilege(1, 77).await.unwrap();
        assert_eq!(mappings.len(), 2);
        assert_eq!(mappings[0].external_rank_id, 9);
        assert_eq!(store.guilds_with_mappings().await.unwrap(), vec![1, 2]);
    }
}
