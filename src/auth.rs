//! Bearer-token authentication extractors.
//!
//! Sessions are opaque tokens stored in the `sessions` table; the extractor
//! resolves the token to a user row on every request.

use crate::application::AppState;
use crate::domain::errors::ApiError;
use crate::persistence::repository::SessionRepository;
use axum::{extract::FromRequestParts, http::request::Parts};
use std::fmt;
use std::str::FromStr;
use std::sync::Arc;
use tracing::warn;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Role {
    Trader,
    Admin,
}

impl FromStr for Role {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "TRADER" => Ok(Role::Trader),
            "ADMIN" => Ok(Role::Admin),
            other => Err(format!("unknown role: {other}")),
        }
    }
}

impl fmt::Display for Role {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Role::Trader => write!(f, "TRADER"),
            Role::Admin => write!(f, "ADMIN"),
        }
    }
}

/// The authenticated caller attached to a request.
#[derive(Debug, Clone)]
pub struct AuthUser {
    pub id: i64,
    pub name: String,
    pub role: Role,
}

impl AuthUser {
    pub fn is_admin(&self) -> bool {
        self.role == Role::Admin
    }
}

fn bearer_token(parts: &Parts) -> Option<&str> {
    parts
        .headers
        .get(axum::http::header::AUTHORIZATION)?
        .to_str()
        .ok()?
        .strip_prefix("Bearer ")
        .map(str::trim)
        .filter(|t| !t.is_empty())
}

async fn resolve_user(state: &AppState, parts: &Parts) -> Result<Option<AuthUser>, ApiError> {
    let Some(token) = bearer_token(parts) else {
        return Ok(None);
    };
    let sessions = SessionRepository::new(state.pool.clone());
    let Some(record) = sessions.user_for_token(token).await? else {
        warn!("rejected request with unknown session token");
        return Ok(None);
    };
    let role = record
        .role
        .parse::<Role>()
        .map_err(ApiError::internal)?;
    Ok(Some(AuthUser {
        id: record.id,
        name: record.name,
        role,
    }))
}

#[axum::async_trait]
impl FromRequestParts<Arc<AppState>> for AuthUser {
    type Rejection = ApiError;

    async fn from_request_parts(
        parts: &mut Parts,
        state: &Arc<AppState>,
    ) -> Result<Self, Self::Rejection> {
        resolve_user(state, parts)
            .await?
            .ok_or_else(|| ApiError::Unauthorized("missing or invalid session token".to_string()))
    }
}

/// Extractor that never rejects; yields `None` when the request carries no
/// valid session. Used on endpoints that also accept the cron secret.
pub struct MaybeAuthUser(pub Option<AuthUser>);

#[axum::async_trait]
impl FromRequestParts<Arc<AppState>> for MaybeAuthUser {
    type Rejection = ApiError;

    async fn from_request_parts(
        parts: &mut Parts,
        state: &Arc<AppState>,
    ) -> Result<Self, Self::Rejection> {
        Ok(MaybeAuthUser(resolve_user(state, parts).await?))
    }
}

/// True when the request carries the configured cron secret. An unset
/// secret denies everything.
pub fn cron_authorized(state: &AppState, parts_headers: &axum::http::HeaderMap) -> bool {
    let Some(expected) = state.config.cron_secret.as_deref() else {
        return false;
    };
    parts_headers
        .get("x-cron-secret")
        .and_then(|v| v.to_str().ok())
        .map(|got| got == expected)
        .unwrap_or(false)
}
