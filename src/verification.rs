//! Verification Session Store
//!
//! Short-lived linking tokens binding an opaque OAuth `state` value to the
//! (guild, user) pair that started linking.
//!
//! ## Token Model
//!
//! - 32 bytes from the OS RNG, hex encoded; never derived from guild/user ids
//! - Only the SHA-256 of a token is stored, the raw value lives in the
//!   authorize URL
//! - Consumption is an atomic take: exactly one concurrent caller wins, every
//!   other caller (and every caller after the TTL) sees `NotFound`

use async_trait::async_trait;
use chrono::{DateTime, Duration, Utc};
use dashmap::DashMap;
use rand::RngCore;
use rand::rngs::OsRng;
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use std::sync::Arc;
use tracing::{debug, info};

use crate::error::{StoreResult, VerificationError};

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct VerificationSession {
    /// SHA-256 of the issued token, hex encoded
    pub token_hash: String,
    pub guild_scope: u64,
    pub platform_user_id: u64,
    pub created_at: DateTime<Utc>,
}

/// Token handed back to the caller that started linking
#[derive(Debug, Clone, Serialize)]
pub struct IssuedToken {
    pub token: String,
    pub expires_at: DateTime<Utc>,
}

/// Identity a consumed token was bound to
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct SessionBinding {
    pub guild_scope: u64,
    pub platform_user_id: u64,
}

#[async_trait]
pub trait SessionStore: Send + Sync {
    async fn insert(&self, session: &VerificationSession) -> StoreResult<()>;

    /// Remove and return the session in one atomic step
    async fn take(&self, token_hash: &str) -> StoreResult<Option<VerificationSession>>;

    /// Delete sessions created before `cutoff`, returning how many went away
    async fn purge_created_before(&self, cutoff: DateTime<Utc>) -> StoreResult<u64>;
}

/// In-memory session store keyed by token hash
#[derive(Default)]
pub struct MemorySessionStore {
    sessions: DashMap<String, VerificationSession>,
}

impl MemorySessionStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn len(&self) -> usize {
        self.sessions.len()
    }

    pub fn is_empty(&self) -> bool {
        self.sessions.is_empty()
    }
}

#[async_trait]
impl SessionStore for MemorySessionStore {
    async fn insert(&self, session: &VerificationSession) -> StoreResult<()> {
        self.sessions
            .insert(session.token_hash.clone(), session.clone());
        Ok(())
    }

    async fn take(&self, token_hash: &str) -> StoreResult<Option<VerificationSession>> {
        Ok(self.sessions.remove(token_hash).map(|(_, session)| session))
    }

    async fn purge_created_before(&self, cutoff: DateTime<Utc>) -> StoreResult<u64> {
        let before = self.sessions.len();
        self.sessions.retain(|_, s| s.created_at >= cutoff);
        Ok(before.saturating_sub(self.sessions.len()) as u64)
    }
}

pub fn generate_token() -> String {
    let mut bytes = [0u8; 32];
    OsRng.fill_bytes(&mut bytes);
    hex::encode(bytes)
}

pub fn hash_token(token: &str) -> String {
    let mut hasher = Sha256::new();
    hasher.update(token.as_bytes());
    hex::encode(hasher.finalize())
}

/// Issues and consumes linking tokens
pub struct SessionManager {
    store: Arc<dyn SessionStore>,
    ttl: Duration,
}

impl SessionManager {
    pub fn new(store: Arc<dyn SessionStore>, ttl: Duration) -> Self {
        Self { store, ttl }
    }

    pub fn ttl(&self) -> Duration {
        self.ttl
    }

    pub async fn start_session(
        &self,
        guild_scope: u64,
        platform_user_id: u64,
    ) -> Result<IssuedToken, VerificationError> {
        let token = generate_token();
        let created_at = Utc::now();

        let session = VerificationSession {
            token_hash: hash_token(&token),
            guild_scope,
            platform_user_id,
            created_at,
        };
        self.store.insert(&session).await?;

        debug!(guild = guild_scope, user = platform_user_id, "Verification session started");

        Ok(IssuedToken {
            token,
            expires_at: created_at + self.ttl,
        })
    }

    /// Single-use lookup. The session is gone after this call whether it was
    /// still fresh or not.
    pub async fn consume_session(&self, token: &str) -> Result<SessionBinding, VerificationError> {
        let session = self
            .store
            .take(&hash_token(token))
            .await?
            .ok_or(VerificationError::NotFound)?;

        if Utc::now() - session.created_at >= self.ttl {
            debug!(
                guild = session.guild_scope,
                user = session.platform_user_id,
                "Verification session expired before use"
            );
            return Err(VerificationError::NotFound);
        }

        Ok(SessionBinding {
            guild_scope: session.guild_scope,
            platform_user_id: session.platform_user_id,
        })
    }

    pub async fn purge_expired(&self) -> Result<u64, VerificationError> {
        let purged = self.store.purge_created_before(Utc::now() - self.ttl).await?;
        if purged > 0 {
            info!("Purged {} expired verification sessions", purged);
        }
        Ok(purged)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn manager(ttl: Duration) -> (Arc<MemorySessionStore>, SessionManager) {
        let store = Arc::new(MemorySessionStore::new());
        let manager = SessionManager::new(store.clone(), ttl);
        (store, manager)
    }

    #[test]
    fn test_tokens_are_random_and_hex() {
        let a = generate_token();
        let b = generate_token();
        assert_eq!(a.len(), 64);
        assert!(a.chars().all(|c| c.is_ascii_hexdigit()));
        assert_ne!(a, b);
        assert_ne!(hash_token(&a), a);
    }

    #[tokio::test]
    async fn test_token_is_single_use() {
        let (store, manager) = manager(Duration::minutes(10));
        let issued = manager.start_session(1, 2).await.unwrap();

        let binding = manager.consume_session(&issued.token).await.unwrap();
        assert_eq!(binding, SessionBinding { guild_scope: 1, platform_user_id: 2 });

        assert_eq!(
            manager.consume_session(&issued.token).await,
            Err(VerificationError::NotFound)
        );
        assert!(store.is_empty());
    }

    #[tokio::test]
    async fn test_expired_token_not_found() {
        let (store, manager) = manager(Duration::zero());
        let issued = manager.start_session(1, 2).await.unwrap();

        assert_eq!(
            manager.consume_session(&issued.token).await,
            Err(VerificationError::NotFound)
        );
        // Expired sessions are removed by the failed consume too
        assert!(store.is_empty());
    }

    #[tokio::test]
    async fn test_unknown_token() {
        let (_, manager) = manager(Duration::minutes(10));
        assert_eq!(
            manager.consume_session("not-a-token").await,
            Err(VerificationError::NotFound)
        );
    }

    #[tokio::test]
    async fn test_multiple_tokens_per_user() {
        let (_, manager) = manager(Duration::minutes(10));
        let first = manager.start_session(1, 2).await.unwrap();
        let second = manager.start_session(1, 2).await.unwrap();
        assert_ne!(first.token, second.token);

        assert!(manager.consume_session(&second.token).await.is_ok());
        assert!(manager.consume_session(&first.token).await.is_ok());
    }

    #[tokio::test]
    async fn test_concurrent_consume_has_one_winner() {
        let (_, manager) = manager(Duration::minutes(10));
        let manager = Arc::new(manager);
        let issued = manager.start_session(5, 6).await.unwrap();

        let mut handles = Vec::new();
        for _ in 0..16 {
            let manager = manager.clone();
            let token = issued.token.clone();
            handles.push(tokio::spawn(async move { manager.consume_session(&token).await }));
        }

        let mut winners = 0;
        for handle in handles {
            if handle.await.unwrap().is_ok() {
                winners += 1;
            }
        }
        assert_eq!(winners, 1);
    }

    #[tokio::test]
    async fn test_purge_expired() {
        let store = Arc::new(MemorySessionStore::new());
        store
            .insert(&VerificationSession {
                token_hash: "old".to_string(),
                guild_scope: 1,
                platform_user_id: 1,
                created_at: Utc::now() - Duration::minutes(30),
            })
            .await
            .unwrap();
        let manager = SessionManager::new(store.clone(), Duration::minutes(10));
        manager.start_session(1, 2).await.unwrap();

        assert_eq!(manager.purge_expired().await.unwrap(), 1);
        assert_eq!(store.len(), 1);
    }
}
