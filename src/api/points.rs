//! Point endpoints
//!
//! Mutations answer with the new balance and what the rank engine did about
//! it. A promotion that could not be completed is reported, not turned into an
//! error: the points were still applied.

use axum::{
    Json, Router,
    extract::{Path, State},
    routing::{get, post},
};
use serde::{Deserialize, Serialize};

use super::{ApiError, AppState, ledger_error};
use crate::points::PointBalance;
use crate::ranks::PointChange;

#[derive(Debug, Deserialize)]
pub struct PointsRequest {
    pub amount: i64,
}

#[derive(Debug, Serialize)]
pub struct LeaderboardResponse {
    pub guild_scope: u64,
    pub balances: Vec<PointBalance>,
}

/// POST /points/{guild}/{user}/add
pub async fn add_points(
    State(state): State<AppState>,
    Path((guild, user)): Path<(u64, u64)>,
    Json(payload): Json<PointsRequest>,
) -> Result<Json<PointChange>, ApiError> {
    let change = state
        .engine
        .add_points(guild, user, payload.amount)
        .await
        .map_err(ledger_error)?;
    Ok(Json(change))
}

/// POST /points/{guild}/{user}/remove
pub async fn remove_points(
    State(state): State<AppState>,
    Path((guild, user)): Path<(u64, u64)>,
    Json(payload): Json<PointsRequest>,
) -> Result<Json<PointChange>, ApiError> {
    let change = state
        .engine
        .remove_points(guild, user, payload.amount)
        .await
        .map_err(ledger_error)?;
    Ok(Json(change))
}

/// GET /points/{guild}/{user}
pub async fn get_balance(
    State(state): State<AppState>,
    Path((guild, user)): Path<(u64, u64)>,
) -> Result<Json<PointBalance>, ApiError> {
    let points = state
        .engine
        .points()
        .balance(guild, user)
        .await
        .map_err(ledger_error)?;
    Ok(Json(PointBalance {
        guild_scope: guild,
        platform_user_id: user,
        points,
    }))
}

/// GET /points/{guild}, highest balance first
pub async fn get_leaderboard(
    State(state): State<AppState>,
    Path(guild): Path<u64>,
) -> Result<Json<LeaderboardResponse>, ApiError> {
    let mut balances = state
        .engine
        .points()
        .balances(guild)
        .await
        .map_err(ledger_error)?;
    balances.sort_by(|a, b| {
        b.points
            .cmp(&a.points)
            .then(a.platform_user_id.cmp(&b.platform_user_id))
    });
    Ok(Json(LeaderboardResponse {
        guild_scope: guild,
        balances,
    }))
}

pub fn create_router(state: AppState) -> Router {
    Router::new()
        .route("/{guild}", get(get_leaderboard))
        .route("/{guild}/{user}", get(get_balance))
        .route("/{guild}/{user}/add", post(add_points))
        .route("/{guild}/{user}/remove", post(remove_points))
        .with_state(state)
}
