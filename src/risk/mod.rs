//! Risk and alt-account scoring
//!
//! ```text
//! risk/
//! ├── signals.rs   - Signal availability model and the gathered signal set
//! ├── score.rs     - Pure scoring formulas (risk 0-10, alt likelihood 0-100)
//! ├── blacklist.rs - Static + per-guild group blacklist
//! └── engine.rs    - Concurrent signal gathering, deadline, cache
//! ```
//!
//! Scores are advisory. Nothing here bans or kicks anyone.

pub mod blacklist;
pub mod engine;
pub mod score;
pub mod signals;

pub use blacklist::{Blacklist, BlacklistEntry, BlacklistStore, MemoryBlacklistStore};
pub use engine::{RiskAssessment, RiskEngine, RiskSettings};
pub use score::{AltConfidence, RiskLevel, Scored, alt_score, risk_score};
pub use signals::{BadgeTally, RiskSignals, Signal};
