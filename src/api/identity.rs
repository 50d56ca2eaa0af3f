//! Identity link lookups

use axum::{
    Json, Router,
    extract::{Path, State},
    routing::get,
};

use super::{ApiError, AppState, ledger_error};
use crate::identity::IdentityLink;

/// GET /identity/{guild}/{user}
pub async fn get_link(
    State(state): State<AppState>,
    Path((guild, user)): Path<(u64, u64)>,
) -> Result<Json<IdentityLink>, ApiError> {
    let link = state.identities.lookup(guild, user).await.map_err(ledger_error)?;
    Ok(Json(link))
}

/// GET /identity/{guild}/external/{external_id}
pub async fn get_link_by_external(
    State(state): State<AppState>,
    Path((guild, external_id)): Path<(u64, u64)>,
) -> Result<Json<IdentityLink>, ApiError> {
    let link = state
        .identities
        .reverse_lookup(guild, external_id)
        .await
        .map_err(ledger_error)?;
    Ok(Json(link))
}

pub fn create_router(state: AppState) -> Router {
    Router::new()
        .route("/{guild}/{user}", get(get_link))
        .route("/{guild}/external/{external_id}", get(get_link_by_external))
        .with_state(state)
}
