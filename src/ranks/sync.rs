//! Entitlement Sync
//!
//! Pushes one local privilege to every external group that maps it. Groups are
//! independent resources: each write uses that group's own credential, runs
//! under bounded parallelism and its own timeout, and succeeds or fails on
//! its own. There is no
//! retry here; the whole sync is idempotent and can be re-run later.

use futures::stream::{self, StreamExt};
use serde::Serialize;
use std::sync::Arc;
use std::time::Duration;
use tracing::{info, warn};

use super::catalog::{RankMapping, RankStore};
use crate::config::CredentialManager;
use crate::error::{ExternalError, StoreError};
use crate::external::ExternalPlatform;

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct SyncFailure {
    pub group_ref: u64,
    pub reason: String,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct SyncReport {
    pub succeeded: Vec<u64>,
    pub failed: Vec<SyncFailure>,
}

impl SyncReport {
    pub fn is_complete(&self) -> bool {
        self.failed.is_empty()
    }
}

fn failure_reason(err: &ExternalError) -> String {
    match err {
        ExternalError::NotFound => "external user is not a group member".to_string(),
        other => other.to_string(),
    }
}

pub struct EntitlementSync {
    ranks: Arc<dyn RankStore>,
    platform: Arc<dyn ExternalPlatform>,
    credentials: Arc<CredentialManager>,
    max_concurrency: usize,
    call_timeout: Duration,
}

const DEFAULT_CALL_TIMEOUT: Duration = Duration::from_secs(5);

impl EntitlementSync {
    pub fn new(
        ranks: Arc<dyn RankStore>,
        platform: Arc<dyn ExternalPlatform>,
        credentials: Arc<CredentialManager>,
        max_concurrency: usize,
    ) -> Self {
        Self {
            ranks,
            platform,
            credentials,
            max_concurrency: max_concurrency.max(1),
            call_timeout: DEFAULT_CALL_TIMEOUT,
        }
    }

    /// Upper bound on one group's rank write, retries included
    pub fn with_call_timeout(mut self, call_timeout: Duration) -> Self {
        self.call_timeout = call_timeout;
        self
    }

    pub async fn sync(
        &self,
        guild_scope: u64,
        local_privilege_id: u64,
        external_user_id: u64,
    ) -> Result<SyncReport, StoreError> {
        let mappings = self
            .ranks
            .mappings_for_privilege(guild_scope, local_privilege_id)
            .await?;

        if mappings.is_empty() {
            return Ok(SyncReport::default());
        }

        let outcomes: Vec<(u64, Result<(), ExternalError>)> = stream::iter(mappings)
            .map(|mapping| self.push_one(mapping, external_user_id))
            .buffer_unordered(self.max_concurrency)
            .collect()
            .await;

        let mut report = SyncReport::default();
        for (group_ref, outcome) in outcomes {
            match outcome {
                Ok(()) => report.succeeded.push(group_ref),
                Err(err) => {
                    warn!(
                        guild = guild_scope,
                        group = group_ref,
                        external = external_user_id,
                        error = %err,
                        "Group rank write failed"
                    );
                    report.failed.push(SyncFailure {
                        group_ref,
                        reason: failure_reason(&err),
                    });
                }
            }
        }
        report.succeeded.sort_unstable();
        report.failed.sort_by_key(|f| f.group_ref);

        info!(
            guild = guild_scope,
            privilege = local_privilege_id,
            external = external_user_id,
            succeeded = report.succeeded.len(),
            failed = report.failed.len(),
            "Entitlement sync finished"
        );

        Ok(report)
    }

    async fn push_one(&self, mapping: RankMapping, external_user_id: u64) -> (u64, Result<(), ExternalError>) {
        let group_ref = mapping.external_group_ref;
        let Some(api_key) = self.credentials.api_key(group_ref) else {
            return (group_ref, Err(ExternalError::Unauthorized));
        };

        let write = self
            .platform
            .set_group_rank(group_ref, external_user_id, mapping.external_rank_id, api_key);
        let result = match tokio::time::timeout(self.call_timeout, write).await {
            Ok(result) => result,
            Err(_) => Err(ExternalError::Timeout),
        };
        (group_ref, result)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::mock::MockPlatform;
    use crate::ranks::catalog::{ExternalGroup, MemoryRankStore};

    const KEY: &str = "group-api-key-0123456789";

    async fn setup(groups: &[u64]) -> (Arc<MemoryRankStore>, Arc<MockPlatform>, CredentialManager) {
        let store = Arc::new(MemoryRankStore::new());
        let mut credentials = CredentialManager::new();
        for (i, group_ref) in groups.iter().enumerate() {
            store
                .register_group(&ExternalGroup { group_ref: *group_ref, guild_scope: 1, name: format!("g{}", i) })
                .await
                .unwrap();
            store
                .upsert_mapping(&RankMapping { external_group_ref: *group_ref, local_privilege_id: 50, external_rank_id: 200 + i as i64 })
                .await
                .unwrap();
            credentials.insert(*group_ref, KEY.to_string()).unwrap();
        }
        (store, Arc::new(MockPlatform::new()), credentials)
    }

    #[tokio::test]
    async fn test_all_groups_succeed() {
        let (store, platform, credentials) = setup(&[10, 20, 30]).await;
        let sync = EntitlementSync::new(store, platform.clone(), Arc::new(credentials), 4);

        let report = sync.sync(1, 50, 999).await.unwrap();
        assert_eq!(report.succeeded, vec![10, 20, 30]);
        assert!(report.is_complete());
        assert_eq!(platform.rank_of(20, 999), Some(201));
    }

    #[tokio::test]
    async fn test_one_failing_group_is_isolated() {
        let (store, platform, credentials) = setup(&[10, 20, 30, 40]).await;
        platform.fail_group(30, ExternalError::Unauthorized);
        let sync = EntitlementSync::new(store, platform.clone(), Arc::new(credentials), 2);

        let report = sync.sync(1, 50, 999).await.unwrap();
        assert_eq!(report.succeeded, vec![10, 20, 40]);
        assert_eq!(
            report.failed,
            vec![SyncFailure { group_ref: 30, reason: "auth error".to_string() }]
        );
    }

    #[tokio::test]
    async fn test_missing_credential_fails_only_that_group() {
        let (store, platform, _) = setup(&[10, 20]).await;
        let mut credentials = CredentialManager::new();
        credentials.insert(10, KEY.to_string()).unwrap();
        let sync = EntitlementSync::new(store, platform, Arc::new(credentials), 4);

        let report = sync.sync(1, 50, 999).await.unwrap();
        assert_eq!(report.succeeded, vec![10]);
        assert_eq!(report.failed[0].group_ref, 20);
        assert_eq!(report.failed[0].reason, "auth error");
    }

    #[tokio::test(start_paused = true)]
    async fn test_slow_group_times_out_alone() {
        let (store, platform, credentials) = setup(&[10, 20, 30]).await;
        platform.delay_group(20, Duration::from_secs(60));
        let sync = EntitlementSync::new(store, platform.clone(), Arc::new(credentials), 4)
            .with_call_timeout(Duration::from_secs(2));

        let report = sync.sync(1, 50, 999).await.unwrap();
        assert_eq!(report.succeeded, vec![10, 30]);
        assert_eq!(
            report.failed,
            vec![SyncFailure { group_ref: 20, reason: "external call timed out".to_string() }]
        );
        assert_eq!(platform.rank_of(20, 999), None);
    }

    #[tokio::test]
    async fn test_non_member_reason() {
        let (store, platform, credentials) = setup(&[10]).await;
        platform.fail_group(10, ExternalError::NotFound);
        let sync = EntitlementSync::new(store, platform, Arc::new(credentials), 4);

        let report = sync.sync(1, 50, 999).await.unwrap();
        assert_eq!(report.failed[0].reason, "external user is not a group member");
    }

    #[tokio::test]
    async fn test_unmapped_privilege_is_empty_report() {
        let (store, platform, credentials) = setup(&[10]).await;
        let sync = EntitlementSync::new(store, platform.clone(), Arc::new(credentials), 4);

        let report = sync.sync(1, 51, 999).await.unwrap();
        assert_eq!(report, SyncReport::default());
        assert_eq!(platform.rank_writes(), 0);
    }

    #[tokio::test]
    async fn test_resync_is_idempotent() {
        let (store, platform, credentials) = setup(&[10, 20]).await;
        let sync = EntitlementSync::new(store, platform.clone(), Arc::new(credentials), 4);

        let first = sync.sync(1, 50, 999).await.unwrap();
        let second = sync.sync(1, 50, 999).await.unwrap();
        assert_eq!(first, second);
        assert_eq!(platform.rank_of(10, 999), Some(200));
    }
}
