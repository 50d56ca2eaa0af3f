//! PostgreSQL Database Module
//!
//! One repository per table family, each implementing the matching store
//! trait from the core modules. Platform ids are unsigned 64-bit snowflakes
//! and are stored bit-for-bit in BIGINT columns.

pub mod blacklist;
pub mod identities;
pub mod licenses;
pub mod points;
pub mod pool;
pub mod ranks;
pub mod sessions;

pub use blacklist::BlacklistRepository;
pub use identities::IdentityRepository;
pub use licenses::LicenseRepository;
pub use points::PointRepository;
pub use pool::DatabasePool;
pub use ranks::RankRepository;
pub use sessions::SessionRepository;

pub(crate) fn to_db(id: u64) -> i64 {
    id as i64
}

pub(crate) fn from_db(id: i64) -> u64 {
    id as u64
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_id_round_trip_keeps_high_bit() {
        let snowflake = u64::MAX - 7;
        assert!(to_db(snowflake) < 0);
        assert_eq!(from_db(to_db(snowflake)), snowflake);
    }
}
