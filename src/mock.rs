//! In-process stand-ins for the external collaborators.
//!
//! Used by the unit and integration tests and by local runs without network
//! access. Every mock answers from in-memory tables and records the writes it
//! receives so callers can assert on them.

use async_trait::async_trait;
use dashmap::DashMap;
use std::sync::Mutex;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Duration;
use url::Url;

use crate::chat::PrivilegeGateway;
use crate::error::ExternalError;
use crate::external::{
    BadgePage, ExternalPlatform, ExternalProfile, ExternalUser, GroupMembership, OAuthProvider, UserInfo,
};

/// Game platform backed by in-memory tables.
///
/// Unknown users answer `NotFound` for profile lookups and neutral defaults
/// (no premium, no badges, no friends, no groups) for everything else.
#[derive(Default)]
pub struct MockPlatform {
    usernames: DashMap<String, ExternalUser>,
    profiles: DashMap<u64, ExternalProfile>,
    premium: DashMap<u64, bool>,
    /// Badge count per page, in cursor order
    badges: DashMap<u64, Vec<u32>>,
    restricted_badges: DashMap<u64, ()>,
    friends: DashMap<u64, u64>,
    groups: DashMap<u64, Vec<GroupMembership>>,
    friend_failures: DashMap<u64, ExternalError>,
    group_failures: DashMap<u64, ExternalError>,
    group_delays: DashMap<u64, Duration>,
    ranks: DashMap<(u64, u64), i64>,
    rank_writes: AtomicUsize,
    badge_pages_served: AtomicUsize,
    delay: Mutex<Option<Duration>>,
}

impl MockPlatform {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a profile, resolvable by its lowercase name
    pub fn add_profile(&self, profile: ExternalProfile) {
        self.usernames.insert(
            profile.name.to_lowercase(),
            ExternalUser {
                id: profile.id,
                name: profile.name.clone(),
                display_name: profile.display_name.clone(),
            },
        );
        self.profiles.insert(profile.id, profile);
    }

    pub fn set_premium(&self, user_id: u64, premium: bool) {
        self.premium.insert(user_id, premium);
    }

    pub fn set_badge_pages(&self, user_id: u64, pages: Vec<u32>) {
        self.badges.insert(user_id, pages);
    }

    /// Badge inventory answers `Forbidden`
    pub fn restrict_badges(&self, user_id: u64) {
        self.restricted_badges.insert(user_id, ());
    }

    pub fn set_friends(&self, user_id: u64, count: u64) {
        self.friends.insert(user_id, count);
    }

    pub fn fail_friends(&self, user_id: u64, err: ExternalError) {
        self.friend_failures.insert(user_id, err);
    }

    pub fn set_groups(&self, user_id: u64, groups: Vec<GroupMembership>) {
        self.groups.insert(user_id, groups);
    }

    /// Rank writes to `group_id` fail with `err`
    pub fn fail_group(&self, group_id: u64, err: ExternalError) {
        self.group_failures.insert(group_id, err);
    }

    pub fn heal_group(&self, group_id: u64) {
        self.group_failures.remove(&group_id);
    }

    /// Rank writes to `group_id` sleep this long before answering
    pub fn delay_group(&self, group_id: u64, delay: Duration) {
        self.group_delays.insert(group_id, delay);
    }

    /// Every read call sleeps this long first; zero clears it
    pub fn set_delay(&self, delay: Duration) {
        if let Ok(mut slot) = self.delay.lock() {
            *slot = (!delay.is_zero()).then_some(delay);
        }
    }

    pub fn rank_of(&self, group_id: u64, user_id: u64) -> Option<i64> {
        self.ranks.get(&(group_id, user_id)).map(|r| *r)
    }

    pub fn rank_writes(&self) -> usize {
        self.rank_writes.load(Ordering::SeqCst)
    }

    pub fn badge_pages_served(&self) -> usize {
        self.badge_pages_served.load(Ordering::SeqCst)
    }

    async fn pause(&self) {
        let delay = self.delay.lock().ok().and_then(|slot| *slot);
        if let Some(delay) = delay {
            tokio::time::sleep(delay).await;
        }
    }
}

#[async_trait]
impl ExternalPlatform for MockPlatform {
    async fn resolve_username(&self, username: &str) -> Result<Option<ExternalUser>, ExternalError> {
        self.pause().await;
        Ok(self.usernames.get(&username.to_lowercase()).map(|u| u.clone()))
    }

    async fn get_profile(&self, user_id: u64) -> Result<ExternalProfile, ExternalError> {
        self.pause().await;
        self.profiles
            .get(&user_id)
            .map(|p| p.clone())
            .ok_or(ExternalError::NotFound)
    }

    async fn has_premium(&self, user_id: u64) -> Result<bool, ExternalError> {
        self.pause().await;
        Ok(self.premium.get(&user_id).map(|p| *p).unwrap_or(false))
    }

    async fn badge_page(&self, user_id: u64, cursor: Option<&str>) -> Result<BadgePage, ExternalError> {
        self.pause().await;
        if self.restricted_badges.contains_key(&user_id) {
            return Err(ExternalError::Forbidden);
        }

        let index: usize = match cursor {
            Some(c) => c.parse().map_err(|_| ExternalError::Decode(format!("bad cursor {}", c)))?,
            None => 0,
        };
        self.badge_pages_served.fetch_add(1, Ordering::SeqCst);

        let pages = self.badges.get(&user_id).map(|p| p.clone()).unwrap_or_default();
        let count = pages.get(index).copied().unwrap_or(0);
        let next_cursor = (index + 1 < pages.len()).then(|| (index + 1).to_string());
        Ok(BadgePage { count, next_cursor })
    }

    async fn friend_count(&self, user_id: u64) -> Result<u64, ExternalError> {
        self.pause().await;
        if let Some(err) = self.friend_failures.get(&user_id) {
            return Err(err.clone());
        }
        Ok(self.friends.get(&user_id).map(|f| *f).unwrap_or(0))
    }

    async fn user_groups(&self, user_id: u64) -> Result<Vec<GroupMembership>, ExternalError> {
        self.pause().await;
        Ok(self.groups.get(&user_id).map(|g| g.clone()).unwrap_or_default())
    }

    async fn set_group_rank(
        &self,
        group_id: u64,
        user_id: u64,
        rank_id: i64,
        _api_key: &str,
    ) -> Result<(), ExternalError> {
        let delay = self.group_delays.get(&group_id).map(|d| *d);
        if let Some(delay) = delay {
            tokio::time::sleep(delay).await;
        }
        if let Some(err) = self.group_failures.get(&group_id) {
            return Err(err.clone());
        }
        self.rank_writes.fetch_add(1, Ordering::SeqCst);
        self.ranks.insert((group_id, user_id), rank_id);
        Ok(())
    }
}

/// Chat platform holding roles in memory
#[derive(Default)]
pub struct MockGateway {
    roles: DashMap<(u64, u64, u64), ()>,
    grants: AtomicUsize,
    failure: Mutex<Option<ExternalError>>,
}

impl MockGateway {
    pub fn new() -> Self {
        Self::default()
    }

    /// Give a member a role without counting it as a grant
    pub fn assign(&self, guild: u64, user: u64, privilege: u64) {
        self.roles.insert((guild, user, privilege), ());
    }

    pub fn holds(&self, guild: u64, user: u64, privilege: u64) -> bool {
        self.roles.contains_key(&(guild, user, privilege))
    }

    pub fn grants(&self) -> usize {
        self.grants.load(Ordering::SeqCst)
    }

    /// Every call fails with `err` until cleared
    pub fn fail_with(&self, err: ExternalError) {
        if let Ok(mut slot) = self.failure.lock() {
            *slot = Some(err);
        }
    }

    pub fn clear_failure(&self) {
        if let Ok(mut slot) = self.failure.lock() {
            *slot = None;
        }
    }

    fn check(&self) -> Result<(), ExternalError> {
        match self.failure.lock() {
            Ok(slot) => slot.clone().map_or(Ok(()), Err),
            Err(e) => Err(ExternalError::Transport(format!("mutex poisoned: {}", e))),
        }
    }
}

#[async_trait]
impl PrivilegeGateway for MockGateway {
    async fn has_privilege(&self, guild: u64, user: u64, privilege: u64) -> Result<bool, ExternalError> {
        self.check()?;
        Ok(self.holds(guild, user, privilege))
    }

    async fn grant_privilege(&self, guild: u64, user: u64, privilege: u64) -> Result<(), ExternalError> {
        self.check()?;
        self.grants.fetch_add(1, Ordering::SeqCst);
        self.roles.insert((guild, user, privilege), ());
        Ok(())
    }
}

/// OAuth provider that accepts pre-registered authorization codes
pub struct MockOAuthProvider {
    authorize_base: String,
    codes: DashMap<String, UserInfo>,
}

impl MockOAuthProvider {
    pub fn new() -> Self {
        Self {
            authorize_base: "https://auth.test/v1/authorize".to_string(),
            codes: DashMap::new(),
        }
    }

    pub fn register_code(&self, code: &str, external_user_id: u64, username: &str) {
        self.codes.insert(
            code.to_string(),
            UserInfo {
                sub: external_user_id.to_string(),
                preferred_username: Some(username.to_string()),
                name: None,
            },
        );
    }
}

impl Default for MockOAuthProvider {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl OAuthProvider for MockOAuthProvider {
    fn authorize_url(&self, state: &str) -> Result<Url, ExternalError> {
        let mut url = Url::parse(&self.authorize_base).map_err(|e| ExternalError::Decode(e.to_string()))?;
        url.query_pairs_mut().append_pair("state", state);
        Ok(url)
    }

    async fn exchange(&self, code: &str) -> Result<UserInfo, ExternalError> {
        // Authorization codes are single use
        self.codes
            .remove(code)
            .map(|(_, info)| info)
            .ok_or(ExternalError::Unauthorized)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_badge_pages_follow_cursor() {
        let platform = MockPlatform::new();
        platform.set_badge_pages(1, vec![100, 100, 7]);

        let first = platform.badge_page(1, None).await.unwrap();
        assert_eq!(first.next_cursor.as_deref(), Some("1"));
        let last = platform.badge_page(1, Some("2")).await.unwrap();
        assert_eq!(last, BadgePage { count: 7, next_cursor: None });
    }

    #[tokio::test]
    async fn test_gateway_grant_and_failure() {
        let gateway = MockGateway::new();
        gateway.grant_privilege(1, 2, 3).await.unwrap();
        assert!(gateway.has_privilege(1, 2, 3).await.unwrap());
        assert_eq!(gateway.grants(), 1);

        gateway.fail_with(ExternalError::Timeout);
        assert_eq!(gateway.has_privilege(1, 2, 3).await, Err(ExternalError::Timeout));
        gateway.clear_failure();
        assert!(gateway.has_privilege(1, 2, 3).await.unwrap());
    }

    #[tokio::test]
    async fn test_oauth_codes_are_single_use() {
        let provider = MockOAuthProvider::new();
        provider.register_code("abc", 42, "Builder");

        let url = provider.authorize_url("tok").unwrap();
        assert!(url.as_str().contains("state=tok"));

        assert_eq!(provider.exchange("abc").await.unwrap().external_user_id(), Ok(42));
        assert_eq!(provider.exchange("abc").await, Err(ExternalError::Unauthorized));
    }
}
