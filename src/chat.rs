//! Chat platform privileges (roles)
//!
//! The core only needs two things from the chat platform: whether a member
//! already holds a privilege, and granting one.

use async_trait::async_trait;
use reqwest::Client;
use serde::Deserialize;
use std::time::Duration;
use tracing::{debug, info};

use crate::error::ExternalError;

#[async_trait]
pub trait PrivilegeGateway: Send + Sync {
    async fn has_privilege(&self, guild: u64, user: u64, privilege: u64) -> Result<bool, ExternalError>;

    async fn grant_privilege(&self, guild: u64, user: u64, privilege: u64) -> Result<(), ExternalError>;
}

#[derive(Debug, Deserialize)]
struct GuildMember {
    #[serde(default)]
    roles: Vec<String>,
}

/// Discord REST implementation authenticated with the bot token
pub struct DiscordGateway {
    http: Client,
    api_url: String,
    bot_token: String,
}

impl DiscordGateway {
    pub fn new(api_url: String, bot_token: String, timeout: Duration) -> anyhow::Result<Self> {
        let http = Client::builder()
            .timeout(timeout)
            .user_agent("DiscordBot (https://ronexus.app, 1.0)")
            .use_rustls_tls()
            .build()
            .map_err(|e| anyhow::anyhow!("Failed to create chat client: {}", e))?;

        Ok(Self {
            http,
            api_url: api_url.trim_end_matches('/').to_string(),
            bot_token,
        })
    }

    fn auth_header(&self) -> String {
        format!("Bot {}", self.bot_token)
    }

    fn role_url(&self, guild: u64, user: u64, privilege: u64) -> String {
        format!(
            "{}/guilds/{}/members/{}/roles/{}",
            self.api_url, guild, user, privilege
        )
    }
}

#[async_trait]
impl PrivilegeGateway for DiscordGateway {
    async fn has_privilege(&self, guild: u64, user: u64, privilege: u64) -> Result<bool, ExternalError> {
        let url = format!("{}/guilds/{}/members/{}", self.api_url, guild, user);
        let resp = self
            .http
            .get(&url)
            .header("Authorization", self.auth_header())
            .send()
            .await?;

        let status = resp.status();
        if !status.is_success() {
            return Err(ExternalError::from_status(status.as_u16(), None));
        }

        let member: GuildMember = resp
            .json()
            .await
            .map_err(|e| ExternalError::Decode(e.to_string()))?;
        let wanted = privilege.to_string();
        Ok(member.roles.iter().any(|r| *r == wanted))
    }

    async fn grant_privilege(&self, guild: u64, user: u64, privilege: u64) -> Result<(), ExternalError> {
        let resp = self
            .http
            .put(self.role_url(guild, user, privilege))
            .header("Authorization", self.auth_header())
            .header("X-Audit-Log-Reason", "Rank threshold reached")
            .header("Content-Length", "0")
            .send()
            .await?;

        let status = resp.status();
        if !status.is_success() {
            debug!(guild, user, privilege, status = status.as_u16(), "Role grant rejected");
            return Err(ExternalError::from_status(status.as_u16(), None));
        }

        info!(guild, user, privilege, "Privilege granted");
        Ok(())
    }
}
