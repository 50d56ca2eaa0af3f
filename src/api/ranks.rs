//! Rank catalog, external groups, mappings and manual Entitlement Sync

use axum::{
    Json, Router,
    extract::{Path, State},
    http::StatusCode,
    routing::{get, post},
};
use serde::{Deserialize, Serialize};
use tracing::info;

use super::{ApiError, AppState, rank_error, store_error};
use crate::ranks::{ExternalGroup, RankDefinition, RankMapping, SyncReport};

#[derive(Debug, Deserialize)]
pub struct DefineRankRequest {
    pub name: String,
    pub privilege_id: u64,
    pub points_required: i64,
}

#[derive(Debug, Deserialize)]
pub struct RegisterGroupRequest {
    pub group_ref: u64,
    pub name: String,
}

#[derive(Debug, Deserialize)]
pub struct MappingRequest {
    pub group_ref: u64,
    pub privilege_id: u64,
    pub external_rank_id: i64,
}

#[derive(Debug, Serialize)]
#[serde(tag = "status", rename_all = "snake_case")]
pub enum ManualSyncResponse {
    Synced { rank: RankDefinition, report: SyncReport },
    /// No qualifying rank, or the member does not hold it yet
    NothingToSync,
}

/// POST /ranks/{guild}
pub async fn define_rank(
    State(state): State<AppState>,
    Path(guild): Path<u64>,
    Json(payload): Json<DefineRankRequest>,
) -> Result<Json<RankDefinition>, ApiError> {
    let name = payload.name.trim();
    if name.is_empty() {
        return Err((StatusCode::BAD_REQUEST, "rank name must not be empty".to_string()));
    }
    if payload.points_required < 0 {
        return Err((
            StatusCode::BAD_REQUEST,
            "points_required must not be negative".to_string(),
        ));
    }

    let rank = state
        .ranks
        .define_rank(guild, name, payload.privilege_id, payload.points_required)
        .await
        .map_err(store_error)?;

    info!(guild, privilege = rank.local_privilege_id, points = rank.points_required, "Rank defined");
    Ok(Json(rank))
}

/// GET /ranks/{guild}
pub async fn list_ranks(
    State(state): State<AppState>,
    Path(guild): Path<u64>,
) -> Result<Json<Vec<RankDefinition>>, ApiError> {
    let ranks = state.ranks.list_ranks(guild).await.map_err(store_error)?;
    Ok(Json(ranks))
}

/// POST /ranks/{guild}/groups
pub async fn register_group(
    State(state): State<AppState>,
    Path(guild): Path<u64>,
    Json(payload): Json<RegisterGroupRequest>,
) -> Result<Json<ExternalGroup>, ApiError> {
    let group = ExternalGroup {
        group_ref: payload.group_ref,
        guild_scope: guild,
        name: payload.name.trim().to_string(),
    };
    state.ranks.register_group(&group).await.map_err(store_error)?;

    info!(guild, group = group.group_ref, "External group registered");
    Ok(Json(group))
}

/// GET /ranks/{guild}/groups
pub async fn list_groups(
    State(state): State<AppState>,
    Path(guild): Path<u64>,
) -> Result<Json<Vec<ExternalGroup>>, ApiError> {
    let groups = state.ranks.list_groups(guild).await.map_err(store_error)?;
    Ok(Json(groups))
}

/// POST /ranks/{guild}/mappings
pub async fn upsert_mapping(
    State(state): State<AppState>,
    Path(guild): Path<u64>,
    Json(payload): Json<MappingRequest>,
) -> Result<Json<RankMapping>, ApiError> {
    let groups = state.ranks.list_groups(guild).await.map_err(store_error)?;
    if !groups.iter().any(|g| g.group_ref == payload.group_ref) {
        return Err((
            StatusCode::NOT_FOUND,
            format!("group {} is not registered to this guild", payload.group_ref),
        ));
    }

    let mapping = RankMapping {
        external_group_ref: payload.group_ref,
        local_privilege_id: payload.privilege_id,
        external_rank_id: payload.external_rank_id,
    };
    state.ranks.upsert_mapping(&mapping).await.map_err(store_error)?;

    info!(
        guild,
        group = mapping.external_group_ref,
        privilege = mapping.local_privilege_id,
        "Rank mapping saved"
    );
    Ok(Json(mapping))
}

/// POST /ranks/{guild}/sync/{user}
pub async fn sync_member(
    State(state): State<AppState>,
    Path((guild, user)): Path<(u64, u64)>,
) -> Result<Json<ManualSyncResponse>, ApiError> {
    let response = match state.engine.resync_member(guild, user).await.map_err(rank_error)? {
        Some((rank, report)) => ManualSyncResponse::Synced { rank, report },
        None => ManualSyncResponse::NothingToSync,
    };
    Ok(Json(response))
}

pub fn create_router(state: AppState) -> Router {
    Router::new()
        .route("/{guild}", get(list_ranks).post(define_rank))
        .route("/{guild}/groups", get(list_groups).post(register_group))
        .route("/{guild}/mappings", post(upsert_mapping))
        .route("/{guild}/sync/{user}", post(sync_member))
        .with_state(state)
}
