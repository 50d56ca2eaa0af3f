//! Guild license activation

use axum::{
    Json, Router,
    extract::{Path, State},
    http::StatusCode,
    routing::{get, post},
};
use serde::Deserialize;

use super::{ApiError, AppState, license_error};
use crate::licensing::GuildLicense;

#[derive(Debug, Deserialize)]
pub struct ActivateRequest {
    pub license_key: String,
}

/// POST /guilds/{guild}/activate
pub async fn activate(
    State(state): State<AppState>,
    Path(guild): Path<u64>,
    Json(payload): Json<ActivateRequest>,
) -> Result<Json<GuildLicense>, ApiError> {
    if payload.license_key.trim().is_empty() {
        return Err((StatusCode::BAD_REQUEST, "license_key is required".to_string()));
    }
    let activation = state
        .licenses
        .activate(guild, &payload.license_key)
        .await
        .map_err(license_error)?;
    Ok(Json(activation))
}

/// GET /guilds/{guild}/license
pub async fn get_license(
    State(state): State<AppState>,
    Path(guild): Path<u64>,
) -> Result<Json<GuildLicense>, ApiError> {
    state
        .licenses
        .license_for(guild)
        .await
        .map_err(license_error)?
        .map(Json)
        .ok_or((StatusCode::NOT_FOUND, "guild is not activated".to_string()))
}

pub fn create_router(state: AppState) -> Router {
    Router::new()
        .route("/{guild}/activate", post(activate))
        .route("/{guild}/license", get(get_license))
        .with_state(state)
}
