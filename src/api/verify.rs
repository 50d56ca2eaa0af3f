//! Account linking endpoints
//!
//! `/start` is called by the bot on behalf of a member and hands back the
//! authorize URL to show them. `/callback` is where the OAuth provider sends the
//! member's browser afterwards; it is the only unauthenticated route besides
//! `/health`, the single-use `state` token is its credential.

use axum::{
    Json, Router,
    extract::{Query, State},
    http::StatusCode,
    routing::get,
};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tracing::{info, warn};

use super::{ApiError, AppState, external_error, ledger_error, verification_error};
use crate::identity::IdentityLink;

#[derive(Debug, Deserialize)]
pub struct StartQuery {
    pub guild: u64,
    pub user: u64,
}

#[derive(Debug, Serialize)]
pub struct StartResponse {
    pub token: String,
    pub authorize_url: String,
    pub expires_at: DateTime<Utc>,
}

#[derive(Debug, Default, Deserialize)]
pub struct CallbackQuery {
    pub code: Option<String>,
    pub state: Option<String>,
    /// Set by the provider when the user declined consent
    pub error: Option<String>,
}

/// GET /verify/start?guild=&user=
pub async fn start_verification(
    State(state): State<AppState>,
    Query(query): Query<StartQuery>,
) -> Result<Json<StartResponse>, ApiError> {
    let issued = state
        .sessions
        .start_session(query.guild, query.user)
        .await
        .map_err(verification_error)?;

    let authorize_url = state
        .oauth
        .authorize_url(&issued.token)
        .map_err(external_error)?;

    Ok(Json(StartResponse {
        token: issued.token,
        authorize_url: authorize_url.to_string(),
        expires_at: issued.expires_at,
    }))
}

/// GET /verify/callback?code=&state=
///
/// The session is consumed before the code exchange, so a failed exchange
/// still burns the token and the member has to start over.
pub async fn verification_callback(
    State(state): State<AppState>,
    Query(query): Query<CallbackQuery>,
) -> Result<Json<IdentityLink>, ApiError> {
    let token = query
        .state
        .filter(|s| !s.is_empty())
        .ok_or((StatusCode::BAD_REQUEST, "missing state parameter".to_string()))?;

    let binding = state
        .sessions
        .consume_session(&token)
        .await
        .map_err(verification_error)?;

    if let Some(error) = query.error {
        warn!(
            guild = binding.guild_scope,
            user = binding.platform_user_id,
            "OAuth authorization declined"
        );
        return Err((StatusCode::BAD_REQUEST, format!("authorization declined: {}", error)));
    }

    let code = query
        .code
        .filter(|c| !c.is_empty())
        .ok_or((StatusCode::BAD_REQUEST, "missing code parameter".to_string()))?;

    let user_info = state.oauth.exchange(&code).await.map_err(external_error)?;
    let external_user_id = user_info.external_user_id().map_err(external_error)?;

    let link = state
        .identities
        .link(
            binding.guild_scope,
            binding.platform_user_id,
            external_user_id,
            &user_info.display_name(),
        )
        .await
        .map_err(ledger_error)?;

    info!(
        guild = link.guild_scope,
        user = link.platform_user_id,
        external = link.external_user_id,
        "Verification completed"
    );
    Ok(Json(link))
}

pub fn create_router(state: AppState) -> Router {
    Router::new()
        .route("/start", get(start_verification))
        .route("/callback", get(verification_callback))
        .with_state(state)
}
