//! HTTP API for the bridge
//!
//! ```text
//! api/
//! ├── middleware.rs - Auth, rate limiting, body size, security headers, request logs
//! ├── verify.rs     - Account linking (start + OAuth callback)
//! ├── identity.rs   - Link lookups
//! ├── points.rs     - Point mutations with promotion outcome
//! ├── ranks.rs      - Rank catalog, groups, mappings, manual sync
//! ├── risk.rs       - Risk assessment and guild blacklist
//! └── guilds.rs     - License activation
//! ```
//!
//! Handlers return `(StatusCode, String)` on failure. The mapping from the core
//! error types lives in this module so every route answers the same way.

pub mod guilds;
pub mod identity;
pub mod middleware;
pub mod points;
pub mod ranks;
pub mod risk;
pub mod verify;

use axum::{Json, Router, http::StatusCode, routing::get};
use serde::Serialize;
use std::sync::Arc;
use tracing::error;

use crate::error::{
    ExternalError, LedgerError, LicenseError, RankError, RiskError, StoreError, VerificationError,
};
use crate::external::OAuthProvider;
use crate::identity::IdentityLedger;
use crate::licensing::LicenseService;
use crate::ranks::{RankEngine, RankStore};
use crate::risk::RiskEngine;
use crate::verification::SessionManager;

pub use middleware::{
    RateLimiter, SecurityMiddlewareConfig, SecurityState, auth_middleware, body_size_middleware,
    logging_middleware, rate_limit_middleware, security_headers_middleware,
};

/// Shared handles for every route
#[derive(Clone)]
pub struct AppState {
    pub sessions: Arc<SessionManager>,
    pub oauth: Arc<dyn OAuthProvider>,
    pub identities: Arc<IdentityLedger>,
    pub engine: Arc<RankEngine>,
    pub ranks: Arc<dyn RankStore>,
    pub risk: Arc<RiskEngine>,
    pub licenses: Arc<LicenseService>,
}

pub type ApiError = (StatusCode, String);

#[derive(Debug, Serialize)]
pub struct HealthResponse {
    pub status: &'static str,
    pub version: &'static str,
}

pub async fn health() -> Json<HealthResponse> {
    Json(HealthResponse {
        status: "ok",
        version: env!("CARGO_PKG_VERSION"),
    })
}

/// Full router without the security layers; `main` wraps it
pub fn create_router(state: AppState) -> Router {
    Router::new()
        .route("/health", get(health))
        .nest("/verify", verify::create_router(state.clone()))
        .nest("/identity", identity::create_router(state.clone()))
        .nest("/points", points::create_router(state.clone()))
        .nest("/ranks", ranks::create_router(state.clone()))
        .nest("/risk", risk::create_router(state.clone()))
        .nest("/guilds", guilds::create_router(state))
}

pub(crate) fn store_error(err: StoreError) -> ApiError {
    error!("Store failure: {}", err);
    (StatusCode::INTERNAL_SERVER_ERROR, err.to_string())
}

pub(crate) fn external_error(err: ExternalError) -> ApiError {
    let status = match err {
        ExternalError::Timeout => StatusCode::GATEWAY_TIMEOUT,
        ExternalError::RateLimited { .. } => StatusCode::SERVICE_UNAVAILABLE,
        _ => StatusCode::BAD_GATEWAY,
    };
    (status, err.to_string())
}

pub(crate) fn verification_error(err: VerificationError) -> ApiError {
    match err {
        VerificationError::NotFound => (StatusCode::GONE, err.to_string()),
        VerificationError::Storage(e) => store_error(e),
    }
}

pub(crate) fn ledger_error(err: LedgerError) -> ApiError {
    match err {
        LedgerError::NotLinked => (StatusCode::NOT_FOUND, err.to_string()),
        LedgerError::InvalidAmount(_) => (StatusCode::BAD_REQUEST, err.to_string()),
        LedgerError::Storage(e) => store_error(e),
    }
}

pub(crate) fn rank_error(err: RankError) -> ApiError {
    match err {
        RankError::Ledger(e) => ledger_error(e),
        RankError::Gateway(e) => (StatusCode::BAD_GATEWAY, format!("privilege gateway failed: {}", e)),
        RankError::Storage(e) => store_error(e),
    }
}

pub(crate) fn risk_error(err: RiskError) -> ApiError {
    match err {
        RiskError::UnknownUser(_) => (StatusCode::NOT_FOUND, err.to_string()),
        RiskError::Lookup(e) => external_error(e),
    }
}

pub(crate) fn license_error(err: LicenseError) -> ApiError {
    match err {
        LicenseError::UnknownKey => (StatusCode::NOT_FOUND, err.to_string()),
        LicenseError::Inactive => (StatusCode::FORBIDDEN, err.to_string()),
        LicenseError::GuildLimitReached { .. } => (StatusCode::CONFLICT, err.to_string()),
        LicenseError::Storage(e) => store_error(e),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_statuses() {
        assert_eq!(verification_error(VerificationError::NotFound).0, StatusCode::GONE);
        assert_eq!(
            verification_error(VerificationError::NotFound).1,
            "link expired or already used"
        );
        assert_eq!(ledger_error(LedgerError::NotLinked).0, StatusCode::NOT_FOUND);
        assert_eq!(ledger_error(LedgerError::InvalidAmount(0)).0, StatusCode::BAD_REQUEST);
        assert_eq!(
            rank_error(RankError::Gateway(ExternalError::Unauthorized)).0,
            StatusCode::BAD_GATEWAY
        );
        assert_eq!(
            risk_error(RiskError::UnknownUser("ghost".to_string())).0,
            StatusCode::NOT_FOUND
        );
        assert_eq!(
            license_error(LicenseError::GuildLimitReached { max_guilds: 1 }).0,
            StatusCode::CONFLICT
        );
        assert_eq!(external_error(ExternalError::Timeout).0, StatusCode::GATEWAY_TIMEOUT);
    }
}
