use async_trait::async_trait;
use reqwest::{Client, RequestBuilder, Response, StatusCode};
use serde::de::DeserializeOwned;
use std::time::Duration;
use tracing::{debug, info, warn};

use super::types::*;
use super::ExternalPlatform;
use crate::config::ExternalApiConfig;
use crate::error::ExternalError;

const BADGE_PAGE_SIZE: u32 = 100;

/// Typed, retrying client for the game platform's public and Open Cloud APIs
#[derive(Debug, Clone)]
pub struct RobloxClient {
    http: Client,
    config: ExternalApiConfig,
}

impl RobloxClient {
    pub fn new(config: ExternalApiConfig) -> anyhow::Result<Self> {
        let http = Client::builder()
            .timeout(config.call_timeout())
            .user_agent("RoNexus-Bridge/1.0")
            .use_rustls_tls()
            .build()
            .map_err(|e| anyhow::anyhow!("Failed to create HTTP client: {}", e))?;

        info!(
            timeout_secs = config.call_timeout_secs,
            max_retries = config.max_retries,
            "External platform client ready"
        );

        Ok(Self { http, config })
    }

    /// Send a request, retrying rate limits, 5xx and transport failures with
    /// exponential backoff. `build` is called once per attempt.
    async fn send_with_retry<F>(&self, what: &str, build: F) -> Result<Response, ExternalError>
    where
        F: Fn() -> RequestBuilder,
    {
        let max_attempts = self.config.max_retries.max(1);
        let base_delay = Duration::from_millis(self.config.retry_delay_ms);
        let mut attempt = 0;

        loop {
            attempt += 1;

            let err = match build().send().await {
                Ok(resp) if resp.status().is_success() => return Ok(resp),
                Ok(resp) => ExternalError::from_status(resp.status().as_u16(), retry_after(&resp)),
                Err(e) => ExternalError::from(e),
            };

            if !err.is_retryable() || attempt >= max_attempts {
                debug!(call = what, attempt, error = %err, "External call failed");
                return Err(err);
            }

            let delay = backoff_delay(&err, base_delay, attempt, self.config.call_timeout());
            warn!(
                call = what,
                attempt,
                max_attempts,
                delay_ms = delay.as_millis() as u64,
                error = %err,
                "Retrying external call"
            );
            tokio::time::sleep(delay).await;
        }
    }

    async fn get_json<T: DeserializeOwned>(&self, what: &str, url: &str) -> Result<T, ExternalError> {
        let resp = self.send_with_retry(what, || self.http.get(url)).await?;
        decode(resp).await
    }
}

/// Delay before the next attempt. A server-sent `Retry-After` is honoured up
/// to the per-call timeout.
fn backoff_delay(err: &ExternalError, base: Duration, attempt: u32, cap: Duration) -> Duration {
    match err {
        ExternalError::RateLimited { retry_after: Some(after) } => (*after).min(cap),
        _ => (base * 2u32.saturating_pow(attempt.saturating_sub(1))).min(cap),
    }
}

fn retry_after(resp: &Response) -> Option<Duration> {
    if resp.status() != StatusCode::TOO_MANY_REQUESTS {
        return None;
    }
    resp.headers()
        .get(reqwest::header::RETRY_AFTER)
        .and_then(|v| v.to_str().ok())
        .and_then(|v| v.trim().parse::<u64>().ok())
        .map(Duration::from_secs)
}

async fn decode<T: DeserializeOwned>(resp: Response) -> Result<T, ExternalError> {
    resp.json::<T>()
        .await
        .map_err(|e| ExternalError::Decode(e.to_string()))
}

/// Extract the trailing id from a resource path such as `groups/1/roles/55`
fn trailing_id(path: &str) -> Option<&str> {
    path.rsplit('/').next().filter(|s| !s.is_empty())
}

#[async_trait]
impl ExternalPlatform for RobloxClient {
    async fn resolve_username(&self, username: &str) -> Result<Option<ExternalUser>, ExternalError> {
        let url = format!("{}/v1/usernames/users", self.config.users_url);
        let body = UsernameLookupRequest {
            usernames: [username],
            exclude_banned_users: false,
        };

        let resp = self
            .send_with_retry("resolve_username", || self.http.post(&url).json(&body))
            .await?;
        let envelope: DataEnvelope<UsernameLookupEntry> = decode(resp).await?;

        Ok(envelope.data.into_iter().next().map(|entry| ExternalUser {
            id: entry.id,
            name: entry.name,
            display_name: entry.display_name,
        }))
    }

    async fn get_profile(&self, user_id: u64) -> Result<ExternalProfile, ExternalError> {
        let url = format!("{}/v1/users/{}", self.config.users_url, user_id);
        let details: UserDetails = self.get_json("get_profile", &url).await?;
        Ok(details.into())
    }

    async fn has_premium(&self, user_id: u64) -> Result<bool, ExternalError> {
        let url = format!(
            "{}/v1/users/{}/validate-membership",
            self.config.premium_url, user_id
        );
        self.get_json("has_premium", &url).await
    }

    async fn badge_page(&self, user_id: u64, cursor: Option<&str>) -> Result<BadgePage, ExternalError> {
        let mut url = format!(
            "{}/v1/users/{}/badges?limit={}&sortOrder=Asc",
            self.config.badges_url, user_id, BADGE_PAGE_SIZE
        );
        if let Some(cursor) = cursor {
            url.push_str("&cursor=");
            url.push_str(&urlencoding::encode(cursor));
        }

        let page: BadgePageResponse = self.get_json("badge_page", &url).await?;
        Ok(BadgePage {
            count: page.data.len() as u32,
            next_cursor: page.next_page_cursor.filter(|c| !c.is_empty()),
        })
    }

    async fn friend_count(&self, user_id: u64) -> Result<u64, ExternalError> {
        let url = format!("{}/v1/users/{}/friends/count", self.config.friends_url, user_id);
        let count: CountResponse = self.get_json("friend_count", &url).await?;
        Ok(count.count)
    }

    async fn user_groups(&self, user_id: u64) -> Result<Vec<GroupMembership>, ExternalError> {
        let url = format!("{}/v2/users/{}/groups/roles", self.config.groups_url, user_id);
        let envelope: DataEnvelope<GroupRoleEntry> = self.get_json("user_groups", &url).await?;

        Ok(envelope
            .data
            .into_iter()
            .map(|entry| GroupMembership {
                group_id: entry.group.id,
                group_name: entry.group.name,
                role_id: entry.role.id,
                rank: entry.role.rank,
            })
            .collect())
    }

    async fn set_group_rank(
        &self,
        group_id: u64,
        user_id: u64,
        rank_id: i64,
        api_key: &str,
    ) -> Result<(), ExternalError> {
        let filter = format!("user == 'users/{}'", user_id);
        let lookup_url = format!(
            "{}/cloud/v2/groups/{}/memberships?maxPageSize=1&filter={}",
            self.config.open_cloud_url,
            group_id,
            urlencoding::encode(&filter)
        );

        let resp = self
            .send_with_retry("membership_lookup", || {
                self.http.get(&lookup_url).header("x-api-key", api_key)
            })
            .await?;
        let memberships: MembershipList = decode(resp).await?;

        // No membership row means the user is not in the group
        let membership = memberships
            .group_memberships
            .into_iter()
            .next()
            .ok_or(ExternalError::NotFound)?;

        let target_role = format!("groups/{}/roles/{}", group_id, rank_id);
        if trailing_id(&membership.role) == Some(rank_id.to_string().as_str()) {
            debug!(group = group_id, user = user_id, rank = rank_id, "Rank already applied");
            return Ok(());
        }

        let update_url = format!("{}/cloud/v2/{}", self.config.open_cloud_url, membership.path);
        let body = MembershipUpdate { role: target_role };
        self.send_with_retry("set_group_rank", || {
            self.http
                .patch(&update_url)
                .header("x-api-key", api_key)
                .json(&body)
        })
        .await?;

        info!(group = group_id, user = user_id, rank = rank_id, "Group rank updated");
        Ok(())
    }
}
