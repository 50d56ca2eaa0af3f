//! External game platform integration
//!
//! ```text
//! external/
//! ├── client.rs - RobloxClient: lookups, badges, friends, groups, rank writes
//! ├── oauth.rs  - OAuth authorize URL, code exchange, userinfo
//! └── types.rs  - Typed views of platform responses
//! ```
//!
//! Everything the core needs from the platform goes through the
//! [`ExternalPlatform`] trait so scoring and sync can be exercised without
//! network access.

pub mod client;
pub mod oauth;
pub mod types;

use async_trait::async_trait;

use crate::error::ExternalError;

pub use client::RobloxClient;
pub use oauth::{OAuthClient, OAuthProvider, UserInfo};
pub use types::{BadgePage, ExternalProfile, ExternalUser, GroupMembership};

#[async_trait]
pub trait ExternalPlatform: Send + Sync {
    /// Resolve a username to an account. `Ok(None)` when no such user exists.
    async fn resolve_username(&self, username: &str) -> Result<Option<ExternalUser>, ExternalError>;

    async fn get_profile(&self, user_id: u64) -> Result<ExternalProfile, ExternalError>;

    async fn has_premium(&self, user_id: u64) -> Result<bool, ExternalError>;

    /// One page of the user's badges. `Forbidden` when the inventory is private.
    async fn badge_page(&self, user_id: u64, cursor: Option<&str>) -> Result<BadgePage, ExternalError>;

    async fn friend_count(&self, user_id: u64) -> Result<u64, ExternalError>;

    async fn user_groups(&self, user_id: u64) -> Result<Vec<GroupMembership>, ExternalError>;

    /// Move a group member to `rank_id` using that group's own API key.
    /// Writing the rank the member already holds is a no-op.
    async fn set_group_rank(
        &self,
        group_id: u64,
        user_id: u64,
        rank_id: i64,
        api_key: &str,
    ) -> Result<(), ExternalError>;
}
