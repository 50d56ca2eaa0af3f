//! Periodic reconciliation sweep
//!
//! External group ranks are eventually consistent with local privileges. The
//! sweep re-pushes every linked member's current rank in guilds that have
//! mapped groups, and clears expired verification sessions.

use serde::Serialize;
use std::sync::Arc;
use std::time::Duration;
use tokio::task::JoinHandle;
use tracing::{debug, error, info, warn};

use super::catalog::RankStore;
use super::engine::RankEngine;
use crate::error::{LedgerError, RankError, StoreError};
use crate::verification::SessionManager;

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct ReconcileSummary {
    pub guilds: usize,
    pub members_synced: usize,
    pub group_failures: usize,
    pub skipped: usize,
    pub sessions_purged: u64,
}

pub struct Reconciler {
    engine: Arc<RankEngine>,
    ranks: Arc<dyn RankStore>,
    sessions: Arc<SessionManager>,
}

impl Reconciler {
    pub fn new(engine: Arc<RankEngine>, ranks: Arc<dyn RankStore>, sessions: Arc<SessionManager>) -> Self {
        Self { engine, ranks, sessions }
    }

    pub async fn run_once(&self) -> Result<ReconcileSummary, StoreError> {
        let mut summary = ReconcileSummary::default();

        // Runs first so a storage failure below cannot starve it
        summary.sessions_purged = match self.sessions.purge_expired().await {
            Ok(purged) => purged,
            Err(e) => {
                warn!("Session purge failed: {}", e);
                0
            }
        };

        for guild in self.ranks.guilds_with_mappings().await? {
            summary.guilds += 1;

            let balances = match self.engine.points().balances(guild).await {
                Ok(balances) => balances,
                Err(LedgerError::Storage(e)) => return Err(e),
                Err(e) => return Err(StoreError(e.to_string())),
            };

            for balance in balances {
                match self.engine.resync_member(guild, balance.platform_user_id).await {
                    Ok(Some((_, report))) => {
                        summary.members_synced += 1;
                        summary.group_failures += report.failed.len();
                    }
                    Ok(None) | Err(RankError::Ledger(LedgerError::NotLinked)) => {
                        summary.skipped += 1;
                    }
                    Err(RankError::Storage(e)) => return Err(e),
                    Err(e) => {
                        // One member's chat lookup failing must not stop the sweep
                        debug!(guild, user = balance.platform_user_id, error = %e, "Member skipped");
                        summary.skipped += 1;
                    }
                }
            }
        }

        info!(
            guilds = summary.guilds,
            synced = summary.members_synced,
            failures = summary.group_failures,
            skipped = summary.skipped,
            purged = summary.sessions_purged,
            "Reconciliation sweep complete"
        );

        Ok(summary)
    }

    /// Run the sweep forever on a fixed interval
    pub fn spawn(self: Arc<Self>, interval: Duration) -> JoinHandle<()> {
        tokio::spawn(async move {
            let mut ticker = tokio::time::interval(interval);
            // The first tick fires immediately; skip it so startup stays quiet
            ticker.tick().await;

            loop {
                ticker.tick().await;
                if let Err(e) = self.run_once().await {
                    error!("Reconciliation sweep failed: {}", e);
                }
            }
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::CredentialManager;
    use crate::error::StoreResult;
    use crate::points::{PointBalance, PointStore};
    use async_trait::async_trait;
    use crate::identity::{IdentityLedger, MemoryIdentityStore};
    use crate::mock::{MockGateway, MockPlatform};
    use crate::points::{MemoryPointStore, PointLedger};
    use crate::ranks::catalog::{ExternalGroup, MemoryRankStore, RankMapping};
    use crate::ranks::sync::EntitlementSync;
    use crate::verification::MemorySessionStore;

    #[tokio::test]
    async fn test_sweep_repushes_held_ranks() {
        let ranks = Arc::new(MemoryRankStore::new());
        ranks.define_rank(1, "Veteran", 901, 100).await.unwrap();
        ranks
            .register_group(&ExternalGroup { group_ref: 77, guild_scope: 1, name: "Main".to_string() })
            .await
            .unwrap();
        ranks
            .upsert_mapping(&RankMapping { external_group_ref: 77, local_privilege_id: 901, external_rank_id: 250 })
            .await
            .unwrap();

        let mut credentials = CredentialManager::new();
        credentials.insert(77, "group-api-key-0123456789".to_string()).unwrap();
        let platform = Arc::new(MockPlatform::new());
        let gateway = Arc::new(MockGateway::new());
        let identities = Arc::new(IdentityLedger::new(Arc::new(MemoryIdentityStore::new())));
        let points = Arc::new(PointLedger::new(Arc::new(MemoryPointStore::new())));
        let sync = Arc::new(EntitlementSync::new(ranks.clone(), platform.clone(), Arc::new(credentials), 2));
        let engine = Arc::new(RankEngine::new(points.clone(), ranks.clone(), identities.clone(), gateway.clone(), sync));

        // Linked and holding the rank
        identities.link(1, 5, 4242, "A").await.unwrap();
        points.add(1, 5, 150).await.unwrap();
        gateway.assign(1, 5, 901);
        // Not linked
        points.add(1, 6, 150).await.unwrap();
        // Linked but below every threshold
        identities.link(1, 7, 4343, "C").await.unwrap();
        points.add(1, 7, 10).await.unwrap();

        let sessions = Arc::new(SessionManager::new(
            Arc::new(MemorySessionStore::new()),
            chrono::Duration::minutes(10),
        ));
        let reconciler = Reconciler::new(engine, ranks, sessions);

        let summary = reconciler.run_once().await.unwrap();
        assert_eq!(summary.guilds, 1);
        assert_eq!(summary.members_synced, 1);
        assert_eq!(summary.skipped, 2);
        assert_eq!(platform.rank_of(77, 4242), Some(250));
    }

    struct DownPointStore;

    #[async_trait]
    impl PointStore for DownPointStore {
        async fn add(&self, _: u64, _: u64, _: i64) -> StoreResult<i64> {
            Err(StoreError("connection refused".to_string()))
        }

        async fn subtract_floor(&self, _: u64, _: u64, _: i64) -> StoreResult<i64> {
            Err(StoreError("connection refused".to_string()))
        }

        async fn get(&self, _: u64, _: u64) -> StoreResult<i64> {
            Err(StoreError("connection refused".to_string()))
        }

        async fn list_guild(&self, _: u64) -> StoreResult<Vec<PointBalance>> {
            Err(StoreError("connection refused".to_string()))
        }
    }

    #[tokio::test]
    async fn test_sessions_purged_when_ledger_is_down() {
        let ranks = Arc::new(MemoryRankStore::new());
        ranks
            .register_group(&ExternalGroup { group_ref: 77, guild_scope: 1, name: "Main".to_string() })
            .await
            .unwrap();
        ranks
            .upsert_mapping(&RankMapping { external_group_ref: 77, local_privilege_id: 901, external_rank_id: 250 })
            .await
            .unwrap();

        let identities = Arc::new(IdentityLedger::new(Arc::new(MemoryIdentityStore::new())));
        let points = Arc::new(PointLedger::new(Arc::new(DownPointStore)));
        let sync = Arc::new(EntitlementSync::new(
            ranks.clone(),
            Arc::new(MockPlatform::new()),
            Arc::new(CredentialManager::new()),
            2,
        ));
        let engine = Arc::new(RankEngine::new(points, ranks.clone(), identities, Arc::new(MockGateway::new()), sync));

        let store = Arc::new(MemorySessionStore::new());
        let sessions = Arc::new(SessionManager::new(store.clone(), chrono::Duration::zero()));
        sessions.start_session(1, 5).await.unwrap();
        sessions.start_session(1, 6).await.unwrap();
        std::thread::sleep(std::time::Duration::from_millis(5));

        let reconciler = Reconciler::new(engine, ranks, sessions);
        let err = reconciler.run_once().await.unwrap_err();
        assert_eq!(err, StoreError("connection refused".to_string()));
        assert!(store.is_empty());
    }
}
