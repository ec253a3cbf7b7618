//! Liveness endpoint with a database ping.

use crate::application::SharedState;
use crate::domain::errors::ApiError;
use axum::{extract::State, Json};
use serde::Serialize;

#[derive(Debug, Serialize)]
pub struct HealthResponse {
    pub status: &'static str,
    pub database: &'static str,
}

/// GET /health
pub async fn health(State(state): State<SharedState>) -> Result<Json<HealthResponse>, ApiError> {
    sqlx::query("SELECT 1")
        .execute(&state.pool)
        .await
        .map_err(ApiError::internal)?;
    Ok(Json(HealthResponse {
        status: "ok",
        database: "ok",
    }))
}
