//! Challenge evaluation and status endpoints.

use super::cron_caller;
use crate::application::services::challenges::{
    ChallengeStatusView, EvaluateTarget, EvaluationView,
};
use crate::application::services::trading::Caller;
use crate::application::SharedState;
use crate::auth::{cron_authorized, AuthUser, MaybeAuthUser};
use crate::domain::errors::ApiError;
use axum::{
    extract::{Path, Query, State},
    http::HeaderMap,
    Json,
};
use chrono::Utc;
use serde::Deserialize;

#[derive(Debug, Default, Deserialize)]
pub struct EvaluateRequest {
    pub challenge_id: Option<i64>,
    pub user_id: Option<i64>,
}

fn evaluation_caller(
    state: &SharedState,
    headers: &HeaderMap,
    user: Option<AuthUser>,
) -> Result<Caller, ApiError> {
    if cron_authorized(state, headers) {
        return Ok(cron_caller());
    }
    user.as_ref()
        .map(Caller::from)
        .ok_or_else(|| ApiError::Unauthorized("missing or invalid session token".to_string()))
}

/// POST /challenges/evaluate: evaluate and persist verdicts
pub async fn evaluate(
    State(state): State<SharedState>,
    headers: HeaderMap,
    MaybeAuthUser(user): MaybeAuthUser,
    body: Option<Json<EvaluateRequest>>,
) -> Result<Json<Vec<EvaluationView>>, ApiError> {
    let caller = evaluation_caller(&state, &headers, user)?;
    let req = body.map(|Json(r)| r).unwrap_or_default();
    let target = EvaluateTarget::from_selectors(req.challenge_id, req.user_id)?;
    let views = state
        .challenges
        .evaluate_challenges(&caller, target, true, Utc::now())
        .await?;
    Ok(Json(views))
}

/// GET /challenges/evaluate: dry-run preview, persists nothing
pub async fn evaluate_preview(
    State(state): State<SharedState>,
    headers: HeaderMap,
    MaybeAuthUser(user): MaybeAuthUser,
    Query(req): Query<EvaluateRequest>,
) -> Result<Json<Vec<EvaluationView>>, ApiError> {
    let caller = evaluation_caller(&state, &headers, user)?;
    let target = EvaluateTarget::from_selectors(req.challenge_id, req.user_id)?;
    let views = state
        .challenges
        .evaluate_challenges(&caller, target, false, Utc::now())
        .await?;
    Ok(Json(views))
}

/// GET /challenges/status/:id
pub async fn status(
    State(state): State<SharedState>,
    user: AuthUser,
    Path(challenge_id): Path<i64>,
) -> Result<Json<ChallengeStatusView>, ApiError> {
    let caller = Caller::from(&user);
    let view = state.challenges.status(&caller, challenge_id).await?;
    Ok(Json(view))
}
