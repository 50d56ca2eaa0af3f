//! Point Ledger
//!
//! Per-guild, per-user integer balance. Balances never go negative: removal
//! floors at zero. A missing row is a zero balance.

use async_trait::async_trait;
use dashmap::DashMap;
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tracing::debug;

use crate::error::{LedgerError, StoreResult};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct PointBalance {
    pub guild_scope: u64,
    pub platform_user_id: u64,
    pub points: i64,
}

/// Backends must apply each mutation atomically per (guild, user) row.
#[async_trait]
pub trait PointStore: Send + Sync {
    /// Add `amount` and return the new balance
    async fn add(&self, guild: u64, user: u64, amount: i64) -> StoreResult<i64>;

    /// Subtract `amount`, flooring at zero, and return the new balance
    async fn subtract_floor(&self, guild: u64, user: u64, amount: i64) -> StoreResult<i64>;

    async fn get(&self, guild: u64, user: u64) -> StoreResult<i64>;

    async fn list_guild(&self, guild: u64) -> StoreResult<Vec<PointBalance>>;
}

#[derive(Default)]
pub struct MemoryPointStore {
    balances: DashMap<(u64, u64), i64>,
}

impl MemoryPointStore {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl PointStore for MemoryPointStore {
    async fn add(&self, guild: u64, user: u64, amount: i64) -> StoreResult<i64> {
        // The entry guard holds the shard lock for the whole read-modify-write
        let mut entry = self.balances.entry((guild, user)).or_insert(0);
        *entry = entry.saturating_add(amount);
        Ok(*entry)
    }

    async fn subtract_floor(&self, guild: u64, user: u64, amount: i64) -> StoreResult<i64> {
        let mut entry = self.balances.entry((guild, user)).or_insert(0);
        *entry = entry.saturating_sub(amount).max(0);
        Ok(*entry)
    }

    async fn get(&self, guild: u64, user: u64) -> StoreResult<i64> {
        Ok(self.balances.get(&(guild, user)).map(|b| *b).unwrap_or(0))
    }

    async fn list_guild(&self, guild: u64) -> StoreResult<Vec<PointBalance>> {
        Ok(self
            .balances
            .iter()
            .filter(|entry| entry.key().0 == guild)
            .map(|entry| PointBalance {
                guild_scope: guild,
                platform_user_id: entry.key().1,
                points: *entry.value(),
            })
            .collect())
    }
}

pub struct PointLedger {
    store: Arc<dyn PointStore>,
}

impl PointLedger {
    pub fn new(store: Arc<dyn PointStore>) -> Self {
        Self { store }
    }

    pub async fn add(&self, guild: u64, user: u64, amount: i64) -> Result<i64, LedgerError> {
        if amount <= 0 {
            return Err(LedgerError::InvalidAmount(amount));
        }
        let balance = self.store.add(guild, user, amount).await?;
        debug!(guild, user, amount, balance, "Points added");
        Ok(balance)
    }

    pub async fn remove(&self, guild: u64, user: u64, amount: i64) -> Result<i64, LedgerError> {
        if amount <= 0 {
            return Err(LedgerError::InvalidAmount(amount));
        }
        let balance = self.store.subtract_floor(guild, user, amount).await?;
        debug!(guild, user, amount, balance, "Points removed");
        Ok(balance)
    }

    pub async fn balance(&self, guild: u64, user: u64) -> Result<i64, LedgerError> {
        Ok(self.store.get(guild, user).await?)
    }

    pub async fn balances(&self, guild: u64) -> Result<Vec<PointBalance>, LedgerError> {
        Ok(self.store.list_guild(guild).await?)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn ledger() -> PointLedger {
        PointLedger::new(Arc::new(MemoryPointStore::new()))
    }

    #[tokio::test]
    async fn test_absent_balance_is_zero() {
        assert_eq!(ledger().balance(1, 1).await.unwrap(), 0);
    }

    #[tokio::test]
    async fn test_add_and_remove() {
        let ledger = ledger();
        assert_eq!(ledger.add(1, 1, 100).await.unwrap(), 100);
        assert_eq!(ledger.remove(1, 1, 30).await.unwrap(), 70);
        assert_eq!(ledger.balance(1, 1).await.unwrap(), 70);
    }

    #[tokio::test]
    async fn test_remove_floors_at_zero() {
        let ledger = ledger();
        ledger.add(1, 1, 30).await.unwrap();
        assert_eq!(ledger.remove(1, 1, 50).await.unwrap(), 0);
        // Removing from an absent row also floors
        assert_eq!(ledger.remove(1, 2, 5).await.unwrap(), 0);
    }

    #[tokio::test]
    async fn test_rejects_non_positive_amounts() {
        let ledger = ledger();
        assert_eq!(ledger.add(1, 1, 0).await, Err(LedgerError::InvalidAmount(0)));
        assert_eq!(ledger.remove(1, 1, -5).await, Err(LedgerError::InvalidAmount(-5)));
        assert_eq!(ledger.balance(1, 1).await.unwrap(), 0);
    }

    #[tokio::test]
    async fn test_balance_never_negative_over_sequences() {
        let ledger = ledger();
        let ops: [(bool, i64); 8] = [
            (true, 5),
            (false, 9),
            (true, 3),
            (false, 1),
            (false, 100),
            (true, 40),
            (false, 39),
            (false, 2),
        ];
        let mut expected: i64 = 0;
        for (is_add, amount) in ops {
            let balance = if is_add {
                expected += amount;
                ledger.add(1, 1, amount).await.unwrap()
            } else {
                expected = (expected - amount).max(0);
                ledger.remove(1, 1, amount).await.unwrap()
            };
            assert!(balance >= 0);
            assert_eq!(balance, expected);
        }
    }

    #[tokio::test]
    async fn test_concurrent_adds_lose_nothing() {
        let ledger = Arc::new(ledger());
        let mut handles = Vec::new();
        for _ in 0..50 {
            let ledger = ledger.clone();
            handles.push(tokio::spawn(async move { ledger.add(9, 9, 2).await }));
        }
        for handle in handles {
            handle.await.unwrap().unwrap();
        }
        assert_eq!(ledger.balance(9, 9).await.unwrap(), 100);
    }

    #[tokio::test]
    async fn test_list_guild() {
        let ledger = ledger();
        ledger.add(1, 1, 10).await.unwrap();
        ledger.add(1, 2, 20).await.unwrap();
        ledger.add(2, 1, 30).await.unwrap();

        let mut balances = ledger.balances(1).await.unwrap();
        balances.sort_by_key(|b| b.platform_user_id);
        assert_eq!(balances.len(), 2);
        assert_eq!(balances[1].points, 20);
    }
}
