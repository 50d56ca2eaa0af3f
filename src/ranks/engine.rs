//! Rank Engine
//!
//! Threshold promotion lives here and nowhere else. A promotion is decided
//! against the privilege the member currently holds on the chat platform, not
//! against the previous balance, so retried calls with the same balance end in
//! `NoChange` and never re-trigger Entitlement Sync.
//!
//! Ranks only go up: removing points never revokes a privilege.

use dashmap::DashMap;
use serde::Serialize;
use std::sync::Arc;
use tracing::{debug, info, warn};

use super::catalog::{RankDefinition, RankStore, select_rank};
use super::sync::{EntitlementSync, SyncReport};
use crate::chat::PrivilegeGateway;
use crate::error::{LedgerError, RankError};
use crate::identity::IdentityLedger;
use crate::points::PointLedger;

/// What happened to the external groups after a local promotion
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "status", rename_all = "snake_case")]
pub enum SyncOutcome {
    Synced(SyncReport),
    /// No external identity to push to yet
    NotLinked,
    /// Mappings could not be read; the sweep or a manual sync retries later
    Deferred { reason: String },
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Promotion {
    pub rank: RankDefinition,
    pub sync: SyncOutcome,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "outcome", rename_all = "snake_case")]
pub enum PromotionOutcome {
    NoChange,
    Promoted(Promotion),
    /// The balance changed but the privilege could not be granted
    Deferred { reason: String },
}

/// Result of a point mutation
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct PointChange {
    pub balance: i64,
    pub promotion: PromotionOutcome,
}

pub struct RankEngine {
    points: Arc<PointLedger>,
    ranks: Arc<dyn RankStore>,
    identities: Arc<IdentityLedger>,
    gateway: Arc<dyn PrivilegeGateway>,
    sync: Arc<EntitlementSync>,
    /// (guild, user, privilege) promotions currently being applied
    in_flight: DashMap<(u64, u64, u64), ()>,
}

struct InFlight<'a> {
    map: &'a DashMap<(u64, u64, u64), ()>,
    key: (u64, u64, u64),
}

impl Drop for InFlight<'_> {
    fn drop(&mut self) {
        self.map.remove(&self.key);
    }
}

impl RankEngine {
    pub fn new(
        points: Arc<PointLedger>,
        ranks: Arc<dyn RankStore>,
        identities: Arc<IdentityLedger>,
        gateway: Arc<dyn PrivilegeGateway>,
        sync: Arc<EntitlementSync>,
    ) -> Self {
        Self {
            points,
            ranks,
            identities,
            gateway,
            sync,
            in_flight: DashMap::new(),
        }
    }

    pub fn points(&self) -> &PointLedger {
        &self.points
    }

    /// Add points, then evaluate promotion against the new balance. A failed
    /// promotion never rolls the points back.
    pub async fn add_points(&self, guild: u64, user: u64, amount: i64) -> Result<PointChange, LedgerError> {
        let balance = self.points.add(guild, user, amount).await?;

        let promotion = match self.evaluate_promotion(guild, user, balance).await {
            Ok(Some(promotion)) => PromotionOutcome::Promoted(promotion),
            Ok(None) => PromotionOutcome::NoChange,
            Err(e) => {
                warn!(guild, user, balance, error = %e, "Promotion deferred");
                PromotionOutcome::Deferred { reason: e.to_string() }
            }
        };

        Ok(PointChange { balance, promotion })
    }

    pub async fn remove_points(&self, guild: u64, user: u64, amount: i64) -> Result<PointChange, LedgerError> {
        let balance = self.points.remove(guild, user, amount).await?;
        Ok(PointChange {
            balance,
            promotion: PromotionOutcome::NoChange,
        })
    }

    /// Highest qualifying rank for `balance`, granted and synced if the member
    /// does not hold it yet. `Ok(None)` is NoChange.
    pub async fn evaluate_promotion(
        &self,
        guild: u64,
        user: u64,
        balance: i64,
    ) -> Result<Option<Promotion>, RankError> {
        let ranks = self.ranks.list_ranks(guild).await?;
        let Some(rank) = select_rank(&ranks, balance).cloned() else {
            return Ok(None);
        };

        let key = (guild, user, rank.local_privilege_id);
        if self.in_flight.insert(key, ()).is_some() {
            debug!(guild, user, rank = %rank.name, "Promotion already in flight");
            return Ok(None);
        }
        let _guard = InFlight { map: &self.in_flight, key };

        let held = self
            .gateway
            .has_privilege(guild, user, rank.local_privilege_id)
            .await
            .map_err(RankError::Gateway)?;
        if held {
            return Ok(None);
        }

        self.gateway
            .grant_privilege(guild, user, rank.local_privilege_id)
            .await
            .map_err(RankError::Gateway)?;

        info!(guild, user, balance, rank = %rank.name, "Member promoted");

        let sync = self.sync_linked(guild, user, rank.local_privilege_id).await;
        Ok(Some(Promotion { rank, sync }))
    }

    /// Re-push the member's current rank to every mapped group. Only ranks the
    /// member already holds locally are pushed. `Ok(None)` when there is
    /// nothing to push.
    pub async fn resync_member(
        &self,
        guild: u64,
        user: u64,
    ) -> Result<Option<(RankDefinition, SyncReport)>, RankError> {
        let link = self.identities.lookup(guild, user).await?;
        let balance = self.points.balance(guild, user).await?;

        let ranks = self.ranks.list_ranks(guild).await?;
        let Some(rank) = select_rank(&ranks, balance).cloned() else {
            return Ok(None);
        };

        let held = self
            .gateway
            .has_privilege(guild, user, rank.local_privilege_id)
            .await
            .map_err(RankError::Gateway)?;
        if !held {
            return Ok(None);
        }

        let report = self
            .sync
            .sync(guild, rank.local_privilege_id, link.external_user_id)
            .await?;
        Ok(Some((rank, report)))
    }

    async fn sync_linked(&self, guild: u64, user: u64, privilege: u64) -> SyncOutcome {
        let link = match self.identities.lookup(guild, user).await {
            Ok(link) => link,
            Err(LedgerError::NotLinked) => return SyncOutcome::NotLinked,
            Err(e) => return SyncOutcome::Deferred { reason: e.to_string() },
        };

        match self.sync.sync(guild, privilege, link.external_user_id).await {
            Ok(report) => SyncOutcome::Synced(report),
            Err(e) => SyncOutcome::Deferred { reason: e.to_string() },
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::CredentialManager;
    use crate::error::ExternalError;
    use crate::identity::MemoryIdentityStore;
    use crate::mock::{MockGateway, MockPlatform};
    use crate::points::MemoryPointStore;
    use crate::ranks::catalog::{ExternalGroup, MemoryRankStore, RankMapping};

    const MEMBER: u64 = 900;
    const VETERAN: u64 = 901;

    struct Fixture {
        engine: RankEngine,
        gateway: Arc<MockGateway>,
        platform: Arc<MockPlatform>,
        identities: Arc<IdentityLedger>,
    }

    async fn fixture() -> Fixture {
        let ranks = Arc::new(MemoryRankStore::new());
        ranks.define_rank(1, "Member", MEMBER, 0).await.unwrap();
        ranks.define_rank(1, "Veteran", VETERAN, 100).await.unwrap();
        ranks
            .register_group(&ExternalGroup { group_ref: 77, guild_scope: 1, name: "Main".to_string() })
            .await
            .unwrap();
        ranks
            .upsert_mapping(&RankMapping { external_group_ref: 77, local_privilege_id: VETERAN, external_rank_id: 250 })
            .await
            .unwrap();

        let mut credentials = CredentialManager::new();
        credentials.insert(77, "group-api-key-0123456789".to_string()).unwrap();

        let platform = Arc::new(MockPlatform::new());
        let gateway = Arc::new(MockGateway::new());
        let identities = Arc::new(IdentityLedger::new(Arc::new(MemoryIdentityStore::new())));
        let sync = Arc::new(EntitlementSync::new(
            ranks.clone(),
            platform.clone(),
            Arc::new(credentials),
            4,
        ));
        let engine = RankEngine::new(
            Arc::new(PointLedger::new(Arc::new(MemoryPointStore::new()))),
            ranks,
            identities.clone(),
            gateway.clone(),
            sync,
        );

        Fixture { engine, gateway, platform, identities }
    }

    #[tokio::test]
    async fn test_threshold_promotion_then_no_change() {
        let f = fixture().await;
        f.identities.link(1, 5, 4242, "Builder").await.unwrap();

        let change = f.engine.add_points(1, 5, 100).await.unwrap();
        assert_eq!(change.balance, 100);
        let PromotionOutcome::Promoted(promotion) = change.promotion else {
            panic!("expected promotion, got {:?}", change.promotion);
        };
        assert_eq!(promotion.rank.name, "Veteran");
        assert!(matches!(promotion.sync, SyncOutcome::Synced(ref r) if r.succeeded == vec![77]));

        assert!(f.engine.evaluate_promotion(1, 5, 100).await.unwrap().is_none());
        assert_eq!(f.gateway.grants(), 1);
        assert_eq!(f.platform.rank_writes(), 1);
    }

    #[tokio::test]
    async fn test_promotion_without_link() {
        let f = fixture().await;
        let promotion = f.engine.evaluate_promotion(1, 5, 150).await.unwrap().unwrap();
        assert_eq!(promotion.sync, SyncOutcome::NotLinked);
        assert!(f.gateway.holds(1, 5, VETERAN));
    }

    #[tokio::test]
    async fn test_already_held_privilege_is_no_change() {
        let f = fixture().await;
        f.gateway.assign(1, 5, MEMBER);
        assert!(f.engine.evaluate_promotion(1, 5, 10).await.unwrap().is_none());
        assert_eq!(f.gateway.grants(), 0);
    }

    #[tokio::test]
    async fn test_gateway_failure_keeps_points() {
        let f = fixture().await;
        f.gateway.fail_with(ExternalError::Timeout);

        let change = f.engine.add_points(1, 5, 120).await.unwrap();
        assert_eq!(change.balance, 120);
        assert!(matches!(change.promotion, PromotionOutcome::Deferred { .. }));
        assert_eq!(f.engine.points().balance(1, 5).await.unwrap(), 120);
    }

    #[tokio::test]
    async fn test_remove_never_demotes() {
        let f = fixture().await;
        f.engine.add_points(1, 5, 100).await.unwrap();
        let change = f.engine.remove_points(1, 5, 500).await.unwrap();
        assert_eq!(change.balance, 0);
        assert_eq!(change.promotion, PromotionOutcome::NoChange);
        assert!(f.gateway.holds(1, 5, VETERAN));
    }

    #[tokio::test]
    async fn test_concurrent_evaluations_grant_once() {
        let f = Arc::new(fixture().await);
        let mut handles = Vec::new();
        for _ in 0..8 {
            let f = f.clone();
            handles.push(tokio::spawn(async move {
                f.engine.evaluate_promotion(1, 5, 100).await.unwrap().is_some()
            }));
        }
        let mut promoted = 0;
        for handle in handles {
            if handle.await.unwrap() {
                promoted += 1;
            }
        }
        assert_eq!(promoted, 1);
        assert_eq!(f.gateway.grants(), 1);
    }

    #[tokio::test]
    async fn test_resync_member() {
        let f = fixture().await;
        assert_eq!(
            f.engine.resync_member(1, 5).await,
            Err(RankError::Ledger(LedgerError::NotLinked))
        );

        f.identities.link(1, 5, 4242, "Builder").await.unwrap();
        f.engine.add_points(1, 5, 100).await.unwrap();

        let (rank, report) = f.engine.resync_member(1, 5).await.unwrap().unwrap();
        assert_eq!(rank.local_privilege_id, VETERAN);
        assert_eq!(report.succeeded, vec![77]);
    }
}
