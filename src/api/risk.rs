//! Risk assessment and per-guild group blacklist

use axum::{
    Json, Router,
    extract::{Path, State},
    http::StatusCode,
    routing::{delete, post},
};
use serde::{Deserialize, Serialize};

use super::{ApiError, AppState, risk_error, store_error};
use crate::risk::{BlacklistEntry, RiskAssessment};

/// Either an account id or a bare username for a background check
#[derive(Debug, Deserialize)]
pub struct AssessRequest {
    pub external_user_id: Option<u64>,
    pub username: Option<String>,
}

#[derive(Debug, Deserialize)]
pub struct BlacklistRequest {
    pub group_id: u64,
    pub reason: Option<String>,
}

#[derive(Debug, Serialize)]
pub struct UnblacklistResponse {
    pub group_id: u64,
    pub removed: bool,
}

/// POST /risk/{guild}/assess
pub async fn assess(
    State(state): State<AppState>,
    Path(guild): Path<u64>,
    Json(payload): Json<AssessRequest>,
) -> Result<Json<RiskAssessment>, ApiError> {
    let assessment = match (payload.external_user_id, payload.username) {
        (Some(id), _) => state.risk.assess(guild, id).await,
        (None, Some(username)) if !username.trim().is_empty() => {
            state.risk.assess_username(guild, username.trim()).await
        }
        _ => {
            return Err((
                StatusCode::BAD_REQUEST,
                "external_user_id or username is required".to_string(),
            ));
        }
    };

    assessment.map(Json).map_err(risk_error)
}

/// GET /risk/{guild}/blacklist
pub async fn list_blacklist(
    State(state): State<AppState>,
    Path(guild): Path<u64>,
) -> Result<Json<Vec<BlacklistEntry>>, ApiError> {
    let entries = state.risk.blacklisted(guild).await.map_err(store_error)?;
    Ok(Json(entries))
}

/// POST /risk/{guild}/blacklist
pub async fn add_blacklist(
    State(state): State<AppState>,
    Path(guild): Path<u64>,
    Json(payload): Json<BlacklistRequest>,
) -> Result<Json<BlacklistEntry>, ApiError> {
    let reason = payload
        .reason
        .map(|r| r.trim().to_string())
        .filter(|r| !r.is_empty());
    let entry = state
        .risk
        .blacklist_group(guild, payload.group_id, reason)
        .await
        .map_err(store_error)?;
    Ok(Json(entry))
}

/// DELETE /risk/{guild}/blacklist/{group}
pub async fn remove_blacklist(
    State(state): State<AppState>,
    Path((guild, group_id)): Path<(u64, u64)>,
) -> Result<Json<UnblacklistResponse>, ApiError> {
    let removed = state
        .risk
        .unblacklist_group(guild, group_id)
        .await
        .map_err(store_error)?;
    if !removed {
        return Err((
            StatusCode::NOT_FOUND,
            format!("group {} is not blacklisted", group_id),
        ));
    }
    Ok(Json(UnblacklistResponse { group_id, removed }))
}

pub fn create_router(state: AppState) -> Router {
    Router::new()
        .route("/{guild}/assess", post(assess))
        .route("/{guild}/blacklist", post(add_blacklist).get(list_blacklist))
        .route("/{guild}/blacklist/{group}", delete(remove_blacklist))
        .with_state(state)
}
