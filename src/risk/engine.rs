//! Risk Scoring Engine
//!
//! Scatter/gather over the platform: the profile, premium flag, badge pages,
//! friend count and group list are fetched concurrently under a semaphore.
//! Each call has its own timeout and the whole gather shares one deadline.
//! Anything not back by the deadline is scored as unavailable.

use chrono::{DateTime, Utc};
use dashmap::DashMap;
use serde::Serialize;
use std::future::Future;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::Semaphore;
use tokio::time::Instant;
use tracing::{debug, info, warn};

use super::blacklist::{Blacklist, BlacklistEntry};
use super::score::{AltConfidence, RiskLevel, alt_score, risk_score};
use super::signals::{BadgeTally, RiskSignals, Signal};
use crate::config::{ExternalApiConfig, RiskConfig};
use crate::error::{ExternalError, RiskError, StoreResult};
use crate::external::{ExternalPlatform, ExternalProfile, GroupMembership};

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct RiskAssessment {
    pub external_user_id: u64,
    pub username: Option<String>,
    pub risk_score: u8,
    pub risk_level: RiskLevel,
    pub risk_reasons: Vec<String>,
    pub alt_score: u8,
    pub alt_confidence: AltConfidence,
    pub alt_reasons: Vec<String>,
    pub computed_at: DateTime<Utc>,
    pub signals: RiskSignals,
}

#[derive(Debug, Clone)]
pub struct RiskSettings {
    pub max_concurrency: usize,
    pub deadline: Duration,
    pub call_timeout: Duration,
    pub max_badge_pages: u32,
    /// Zero disables the cache
    pub freshness: Duration,
}

impl RiskSettings {
    pub fn from_config(risk: &RiskConfig, external: &ExternalApiConfig) -> Self {
        Self {
            max_concurrency: risk.max_concurrency.max(1),
            deadline: Duration::from_secs(risk.deadline_secs),
            call_timeout: external.call_timeout(),
            max_badge_pages: external.max_badge_pages.max(1),
            freshness: Duration::from_secs(risk.cache_freshness_secs),
        }
    }
}

impl Default for RiskSettings {
    fn default() -> Self {
        Self::from_config(&RiskConfig::default(), &ExternalApiConfig::default())
    }
}

async fn with_timeout<T>(
    timeout: Duration,
    call: impl Future<Output = Result<T, ExternalError>>,
) -> Result<T, ExternalError> {
    tokio::time::timeout(timeout, call)
        .await
        .unwrap_or(Err(ExternalError::Timeout))
}

fn into_signal<T>(fetched: Option<Result<T, ExternalError>>) -> Signal<T> {
    match fetched {
        Some(result) => result.into(),
        None => Signal::Unavailable("assessment deadline exceeded".to_string()),
    }
}

pub struct RiskEngine {
    platform: Arc<dyn ExternalPlatform>,
    blacklist: Blacklist,
    settings: RiskSettings,
    /// Keyed by (guild, external user); the blacklist differs per guild
    cache: DashMap<(u64, u64), RiskAssessment>,
}

impl RiskEngine {
    pub fn new(platform: Arc<dyn ExternalPlatform>, blacklist: Blacklist, settings: RiskSettings) -> Self {
        Self {
            platform,
            blacklist,
            settings,
            cache: DashMap::new(),
        }
    }

    pub async fn assess(&self, guild: u64, external_user_id: u64) -> Result<RiskAssessment, RiskError> {
        if let Some(cached) = self.cached(guild, external_user_id) {
            debug!(guild, external = external_user_id, "Risk assessment served from cache");
            return Ok(cached);
        }

        let (signals, username) = self.gather(guild, external_user_id).await?;
        let risk = risk_score(&signals);
        let alt = alt_score(&signals);

        let assessment = RiskAssessment {
            external_user_id,
            username,
            risk_score: risk.score,
            risk_level: RiskLevel::from_score(risk.score),
            risk_reasons: risk.reasons,
            alt_score: alt.score,
            alt_confidence: AltConfidence::from_score(alt.score),
            alt_reasons: alt.reasons,
            computed_at: Utc::now(),
            signals,
        };

        info!(
            guild,
            external = external_user_id,
            risk = assessment.risk_score,
            alt = assessment.alt_score,
            unavailable = assessment.signals.unavailable_count(),
            "Risk assessed"
        );

        // A degraded result is answered but never reused
        if !self.settings.freshness.is_zero() && !assessment.signals.is_degraded() {
            self.evict_stale();
            self.cache
                .insert((guild, external_user_id), assessment.clone());
        }
        Ok(assessment)
    }

    /// Background check on a bare username
    pub async fn assess_username(&self, guild: u64, username: &str) -> Result<RiskAssessment, RiskError> {
        let user = with_timeout(self.settings.call_timeout, self.platform.resolve_username(username))
            .await
            .map_err(RiskError::Lookup)?
            .ok_or_else(|| RiskError::UnknownUser(username.to_string()))?;

        self.assess(guild, user.id).await
    }

    pub async fn blacklist_group(&self, guild: u64, group_id: u64, reason: Option<String>) -> StoreResult<BlacklistEntry> {
        let entry = BlacklistEntry {
            guild_scope: guild,
            group_id,
            reason,
            added_at: Utc::now(),
        };
        self.blacklist.store().add(&entry).await?;
        self.invalidate_guild(guild);
        info!(guild, group = group_id, "Group blacklisted");
        Ok(entry)
    }

    pub async fn unblacklist_group(&self, guild: u64, group_id: u64) -> StoreResult<bool> {
        let removed = self.blacklist.store().remove(guild, group_id).await?;
        if removed {
            self.invalidate_guild(guild);
            info!(guild, group = group_id, "Group removed from blacklist");
        }
        Ok(removed)
    }

    pub async fn blacklisted(&self, guild: u64) -> StoreResult<Vec<BlacklistEntry>> {
        self.blacklist.store().list(guild).await
    }

    fn is_fresh(&self, assessment: &RiskAssessment, now: DateTime<Utc>) -> bool {
        let age = (now - assessment.computed_at).to_std().unwrap_or_default();
        age < self.settings.freshness
    }

    /// Drop every entry past the freshness window
    fn evict_stale(&self) {
        let now = Utc::now();
        self.cache.retain(|_, assessment| self.is_fresh(assessment, now));
    }

    fn cached(&self, guild: u64, external_user_id: u64) -> Option<RiskAssessment> {
        let entry = self.cache.get(&(guild, external_user_id))?;
        if self.is_fresh(&entry, Utc::now()) {
            Some(entry.clone())
        } else {
            drop(entry);
            self.cache.remove(&(guild, external_user_id));
            None
        }
    }

    fn invalidate_guild(&self, guild: u64) {
        self.cache.retain(|(g, _), _| *g != guild);
    }

    async fn gather(&self, guild: u64, user: u64) -> Result<(RiskSignals, Option<String>), RiskError> {
        let semaphore = Semaphore::new(self.settings.max_concurrency);
        let deadline = Instant::now() + self.settings.deadline;
        let timeout = self.settings.call_timeout;

        let (profile, premium, badges, friends, groups) = tokio::join!(
            self.bounded(&semaphore, deadline, with_timeout(timeout, self.platform.get_profile(user))),
            self.bounded(&semaphore, deadline, with_timeout(timeout, self.platform.has_premium(user))),
            self.bounded(&semaphore, deadline, self.badge_tally(user)),
            self.bounded(&semaphore, deadline, with_timeout(timeout, self.platform.friend_count(user))),
            self.bounded(&semaphore, deadline, with_timeout(timeout, self.platform.user_groups(user))),
        );

        if let Some(Err(ExternalError::NotFound)) = &profile {
            return Err(RiskError::UnknownUser(user.to_string()));
        }
        let profile = into_signal(profile);
        let groups = into_signal(groups);

        let blacklisted_groups = match groups {
            Signal::Available(memberships) => self.blacklisted_memberships(guild, &memberships).await,
            Signal::Restricted => Signal::Restricted,
            Signal::Unavailable(reason) => Signal::Unavailable(reason),
        };

        let now = Utc::now();
        let username = profile.available().map(|p| p.name.clone());
        let signals = RiskSignals {
            account_age_days: profile.clone().map(|p| p.account_age_days(now)),
            verified_badge: profile.clone().map(|p| p.has_verified_badge),
            banned: profile.map(|p: ExternalProfile| p.is_banned),
            badges: into_signal(badges),
            friends: into_signal(friends),
            premium: into_signal(premium),
            blacklisted_groups,
        };

        Ok((signals, username))
    }

    /// `None` when the shared deadline passed first
    async fn bounded<T>(
        &self,
        semaphore: &Semaphore,
        deadline: Instant,
        call: impl Future<Output = Result<T, ExternalError>>,
    ) -> Option<Result<T, ExternalError>> {
        let work = async {
            let _permit = semaphore
                .acquire()
                .await
                .map_err(|e| ExternalError::Transport(e.to_string()))?;
            call.await
        };

        tokio::time::timeout_at(deadline, work).await.ok()
    }

    /// Sum badge pages up to the page cap. A restricted inventory is reported
    /// as such rather than as zero badges.
    async fn badge_tally(&self, user: u64) -> Result<BadgeTally, ExternalError> {
        let mut count: u64 = 0;
        let mut cursor: Option<String> = None;

        for _ in 0..self.settings.max_badge_pages {
            let page = with_timeout(
                self.settings.call_timeout,
                self.platform.badge_page(user, cursor.as_deref()),
            )
            .await?;
            count += u64::from(page.count);

            match page.next_cursor {
                Some(next) if !next.is_empty() => cursor = Some(next),
                _ => return Ok(BadgeTally { count, truncated: false }),
            }
        }

        debug!(external = user, count, "Badge page cap reached");
        Ok(BadgeTally { count, truncated: true })
    }

    async fn blacklisted_memberships(&self, guild: u64, memberships: &[GroupMembership]) -> Signal<Vec<u64>> {
        match self.blacklist.groups_for(guild).await {
            Ok(blacklist) => Signal::Available(
                memberships
                    .iter()
                    .map(|m| m.group_id)
                    .filter(|id| blacklist.contains(id))
                    .collect(),
            ),
            Err(e) => {
                warn!(guild, error = %e, "Blacklist unavailable");
                Signal::Unavailable(e.to_string())
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::mock::MockPlatform;
    use crate::risk::blacklist::MemoryBlacklistStore;
    use chrono::Duration as ChronoDuration;

    fn profile(id: u64, name: &str, age_days: i64) -> ExternalProfile {
        ExternalProfile {
            id,
            name: name.to_string(),
            display_name: name.to_string(),
            created: Utc::now() - ChronoDuration::days(age_days),
            is_banned: false,
            has_verified_badge: false,
        }
    }

    fn membership(group_id: u64) -> GroupMembership {
        GroupMembership {
            group_id,
            group_name: format!("group {}", group_id),
            role_id: 1,
            rank: 1,
        }
    }

    fn engine(platform: Arc<MockPlatform>, static_groups: Vec<u64>, settings: RiskSettings) -> RiskEngine {
        let blacklist = Blacklist::new(static_groups, Arc::new(MemoryBlacklistStore::new()));
        RiskEngine::new(platform, blacklist, settings)
    }

    #[tokio::test]
    async fn test_fresh_alt_in_blacklisted_group() {
        let platform = Arc::new(MockPlatform::new());
        platform.add_profile(profile(7, "FreshAlt", 2));
        platform.set_groups(7, vec![membership(555), membership(600)]);

        let engine = engine(platform, vec![555], RiskSettings::default());
        let assessment = engine.assess(1, 7).await.unwrap();

        assert_eq!(assessment.risk_score, 10);
        assert_eq!(assessment.risk_level, RiskLevel::Critical);
        assert!(assessment.alt_score >= 80);
        assert_eq!(assessment.signals.blacklisted_groups, Signal::Available(vec![555]));
        assert_eq!(assessment.username.as_deref(), Some("FreshAlt"));
    }

    #[tokio::test]
    async fn test_restricted_badges_reported() {
        let platform = Arc::new(MockPlatform::new());
        platform.add_profile(profile(7, "Private", 1000));
        platform.set_friends(7, 50);
        platform.restrict_badges(7);

        let engine = engine(platform, vec![], RiskSettings::default());
        let assessment = engine.assess(1, 7).await.unwrap();

        assert_eq!(assessment.signals.badges, Signal::Restricted);
        assert_eq!(assessment.risk_score, 0);
    }

    #[tokio::test]
    async fn test_badge_pages_capped() {
        let platform = Arc::new(MockPlatform::new());
        platform.add_profile(profile(7, "Collector", 1000));
        platform.set_badge_pages(7, vec![100; 25]);

        let settings = RiskSettings { max_badge_pages: 3, ..RiskSettings::default() };
        let engine = engine(platform.clone(), vec![], settings);
        let assessment = engine.assess(1, 7).await.unwrap();

        assert_eq!(
            assessment.signals.badges,
            Signal::Available(BadgeTally { count: 300, truncated: true })
        );
        assert_eq!(platform.badge_pages_served(), 3);
    }

    #[tokio::test]
    async fn test_failed_signal_does_not_abort() {
        let platform = Arc::new(MockPlatform::new());
        platform.add_profile(profile(7, "Flaky", 3));
        platform.fail_friends(7, ExternalError::RateLimited { retry_after: None });

        let engine = engine(platform, vec![], RiskSettings::default());
        let assessment = engine.assess(1, 7).await.unwrap();

        assert!(matches!(assessment.signals.friends, Signal::Unavailable(_)));
        // Age 3 (+3) and no badges (+2); friends add nothing
        assert_eq!(assessment.risk_score, 5);
    }

    #[tokio::test(start_paused = true)]
    async fn test_deadline_marks_signals_unavailable() {
        let platform = Arc::new(MockPlatform::new());
        platform.add_profile(profile(7, "Slow", 3));
        platform.set_delay(Duration::from_secs(30));

        let settings = RiskSettings {
            deadline: Duration::from_secs(2),
            call_timeout: Duration::from_secs(60),
            ..RiskSettings::default()
        };
        let engine = engine(platform, vec![], settings);
        let assessment = engine.assess(1, 7).await.unwrap();

        assert_eq!(assessment.signals.unavailable_count(), 6);
        assert_eq!(assessment.risk_score, 0);
        assert_eq!(assessment.risk_level, RiskLevel::Low);
    }

    #[tokio::test(start_paused = true)]
    async fn test_degraded_assessment_is_not_cached() {
        let platform = Arc::new(MockPlatform::new());
        platform.add_profile(profile(7, "Slow", 3));
        platform.set_delay(Duration::from_secs(30));

        let settings = RiskSettings {
            deadline: Duration::from_secs(2),
            call_timeout: Duration::from_secs(60),
            ..RiskSettings::default()
        };
        let engine = engine(platform.clone(), vec![], settings);
        let degraded = engine.assess(1, 7).await.unwrap();
        assert_eq!(degraded.signals.unavailable_count(), 6);
        assert!(engine.cache.is_empty());

        platform.set_delay(Duration::ZERO);
        let recovered = engine.assess(1, 7).await.unwrap();
        assert!(!recovered.signals.is_degraded());
        assert!(recovered.risk_score > 0);
        assert_eq!(engine.cache.len(), 1);
    }

    #[tokio::test]
    async fn test_restricted_assessment_is_cached() {
        let platform = Arc::new(MockPlatform::new());
        platform.add_profile(profile(7, "Private", 1000));
        platform.restrict_badges(7);

        let engine = engine(platform, vec![], RiskSettings::default());
        let first = engine.assess(1, 7).await.unwrap();
        let again = engine.assess(1, 7).await.unwrap();
        assert_eq!(again.computed_at, first.computed_at);
    }

    #[tokio::test]
    async fn test_stale_entries_are_evicted() {
        let platform = Arc::new(MockPlatform::new());
        for id in 1..=5 {
            platform.add_profile(profile(id, &format!("user{}", id), 400));
        }

        let settings = RiskSettings { freshness: Duration::from_millis(20), ..RiskSettings::default() };
        let engine = engine(platform, vec![], settings);
        for id in 1..=4 {
            engine.assess(1, id).await.unwrap();
        }
        assert_eq!(engine.cache.len(), 4);

        std::thread::sleep(std::time::Duration::from_millis(40));
        engine.assess(1, 5).await.unwrap();
        assert_eq!(engine.cache.len(), 1);
        assert!(engine.cache.contains_key(&(1, 5)));
    }

    #[tokio::test(start_paused = true)]
    async fn test_call_timeout_is_soft() {
        let platform = Arc::new(MockPlatform::new());
        platform.add_profile(profile(7, "Slow", 3));
        platform.set_delay(Duration::from_secs(10));

        let settings = RiskSettings {
            deadline: Duration::from_secs(60),
            call_timeout: Duration::from_secs(5),
            ..RiskSettings::default()
        };
        let engine = engine(platform, vec![], settings);
        let assessment = engine.assess(1, 7).await.unwrap();

        assert_eq!(
            assessment.signals.friends,
            Signal::Unavailable("external call timed out".to_string())
        );
    }

    #[tokio::test]
    async fn test_unknown_username() {
        let engine = engine(Arc::new(MockPlatform::new()), vec![], RiskSettings::default());
        assert_eq!(
            engine.assess_username(1, "nobody").await,
            Err(RiskError::UnknownUser("nobody".to_string()))
        );
    }

    #[tokio::test]
    async fn test_username_lookup_and_cache_invalidation() {
        let platform = Arc::new(MockPlatform::new());
        platform.add_profile(profile(7, "Builder", 400));
        platform.set_friends(7, 40);
        platform.set_badge_pages(7, vec![30]);
        platform.set_groups(7, vec![membership(900)]);

        let engine = engine(platform, vec![], RiskSettings::default());
        let first = engine.assess_username(1, "builder").await.unwrap();
        assert_eq!(first.external_user_id, 7);
        assert_eq!(first.risk_score, 0);

        // Cached until the guild blacklist changes
        let again = engine.assess(1, 7).await.unwrap();
        assert_eq!(again.computed_at, first.computed_at);

        engine.blacklist_group(1, 900, None).await.unwrap();
        let after = engine.assess(1, 7).await.unwrap();
        assert_eq!(after.risk_score, 10);

        // Other guilds are unaffected by this guild's list
        assert_eq!(engine.assess(2, 7).await.unwrap().risk_score, 0);
    }
}
