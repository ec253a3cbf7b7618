//! Trade execution endpoints.

use crate::application::services::trading::{
    AutoSquareOffOutcome, Caller, ExecuteTrade, TradeOutcome,
};
use crate::application::SharedState;
use crate::auth::{cron_authorized, AuthUser, MaybeAuthUser};
use crate::domain::errors::ApiError;
use axum::{extract::State, http::HeaderMap, Json};
use serde::Deserialize;

#[derive(Debug, Deserialize)]
pub struct ExecuteTradeRequest {
    pub challenge_id: i64,
    pub scrip: String,
    pub quantity: f64,
    pub trade_type: String,
    pub exchange: Option<String>,
}

/// POST /trading/execute
pub async fn execute_trade(
    State(state): State<SharedState>,
    user: AuthUser,
    Json(req): Json<ExecuteTradeRequest>,
) -> Result<Json<TradeOutcome>, ApiError> {
    let caller = Caller::from(&user);
    let outcome = state
        .trading
        .execute(
            &caller,
            ExecuteTrade {
                challenge_id: req.challenge_id,
                scrip: req.scrip,
                quantity: req.quantity,
                trade_type: req.trade_type,
                exchange: req.exchange,
            },
        )
        .await?;
    Ok(Json(outcome))
}

#[derive(Debug, Deserialize)]
pub struct SquareOffRequest {
    pub trade_id: i64,
}

/// POST /trading/square-off
pub async fn square_off(
    State(state): State<SharedState>,
    user: AuthUser,
    Json(req): Json<SquareOffRequest>,
) -> Result<Json<TradeOutcome>, ApiError> {
    let caller = Caller::from(&user);
    let outcome = state.trading.square_off(&caller, req.trade_id).await?;
    Ok(Json(outcome))
}

#[derive(Debug, Default, Deserialize)]
pub struct AutoSquareOffRequest {
    pub challenge_id: Option<i64>,
}

/// POST /trading/auto-square-off
///
/// Reachable by the cron secret or by an admin session; an authenticated
/// trader is refused rather than silently scoped down.
pub async fn auto_square_off(
    State(state): State<SharedState>,
    headers: HeaderMap,
    MaybeAuthUser(user): MaybeAuthUser,
    body: Option<Json<AutoSquareOffRequest>>,
) -> Result<Json<AutoSquareOffOutcome>, ApiError> {
    if !cron_authorized(&state, &headers) {
        match user {
            Some(u) if u.is_admin() => {}
            Some(_) => {
                return Err(ApiError::Forbidden(
                    "auto square-off requires admin access".to_string(),
                ))
            }
            None => {
                return Err(ApiError::Unauthorized(
                    "missing or invalid session token".to_string(),
                ))
            }
        }
    }
    let req = body.map(|Json(r)| r).unwrap_or_default();
    let outcome = state.trading.auto_square_off(req.challenge_id).await?;
    Ok(Json(outcome))
}
