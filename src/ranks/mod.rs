//! Local ranks and their external mirrors
//!
//! ```text
//! ranks/
//! ├── catalog.rs   - Rank definitions, external groups, rank mappings
//! ├── engine.rs    - Threshold promotion (single place idempotence is enforced)
//! ├── sync.rs      - Entitlement Sync fan-out to external groups
//! └── reconcile.rs - Periodic re-sync sweep
//! ```

pub mod catalog;
pub mod engine;
pub mod reconcile;
pub mod sync;

pub use catalog::{ExternalGroup, MemoryRankStore, RankDefinition, RankMapping, RankStore, select_rank};
pub use engine::{PointChange, Promotion, PromotionOutcome, RankEngine, SyncOutcome};
pub use reconcile::{ReconcileSummary, Reconciler};
pub use sync::{EntitlementSync, SyncFailure, SyncReport};
