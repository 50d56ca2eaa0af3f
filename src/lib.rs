//! RoNexus Bridge
//!
//! Links chat platform members to external game platform accounts, keeps a
//! per-guild point ledger, promotes members through point-threshold ranks and
//! mirrors those ranks into external groups. Also scores accounts for risk and
//! alt likelihood on demand.
//!
//! ## Module Structure
//!
//! ```text
//! src/
//! ├── lib.rs          - Crate root with re-exports
//! ├── main.rs         - Server entrypoint
//! ├── config.rs       - Configuration and group credentials
//! ├── error.rs        - Error taxonomy
//! ├── verification.rs - Single-use linking sessions
//! ├── identity.rs     - Identity ledger
//! ├── points.rs       - Point ledger
//! ├── licensing.rs    - Guild license activation
//! ├── chat.rs         - Chat platform privileges (roles)
//! ├── mock.rs         - In-process collaborators for tests and local runs
//! ├── external/       - Game platform client and OAuth
//! ├── ranks/          - Rank catalog, promotion, Entitlement Sync, sweep
//! ├── risk/           - Risk and alt-account scoring
//! ├── api/            - HTTP endpoints and security middleware
//! └── database/       - PostgreSQL persistence
//! ```

pub mod api;
pub mod chat;
pub mod config;
pub mod database;
pub mod error;
pub mod external;
pub mod identity;
pub mod licensing;
pub mod mock;
pub mod points;
pub mod ranks;
pub mod risk;
pub mod verification;

// Re-export main types for convenience
pub use config::{BridgeConfig, CredentialManager};
pub use database::DatabasePool;
pub use error::{
    ExternalError, LedgerError, LicenseError, RankError, RiskError, StoreError, VerificationError,
};

pub use chat::{DiscordGateway, PrivilegeGateway};
pub use external::{ExternalPlatform, OAuthClient, OAuthProvider, RobloxClient};
pub use identity::{IdentityLedger, IdentityLink, IdentityStore, MemoryIdentityStore};
pub use licensing::{GuildLicense, License, LicenseService, LicenseStore, MemoryLicenseStore};
pub use points::{MemoryPointStore, PointBalance, PointLedger, PointStore};
pub use verification::{MemorySessionStore, SessionManager, SessionStore, VerificationSession};

// Re-export rank types
pub use ranks::{
    EntitlementSync, ExternalGroup, MemoryRankStore, PointChange, PromotionOutcome,
    RankDefinition, RankEngine, RankMapping, RankStore, Reconciler, SyncOutcome, SyncReport,
};

// Re-export risk types
pub use risk::{
    AltConfidence, Blacklist, BlacklistStore, MemoryBlacklistStore, RiskAssessment, RiskEngine,
    RiskLevel, RiskSettings,
};

// Re-export API types
pub use api::{AppState, SecurityMiddlewareConfig, SecurityState, create_router};
