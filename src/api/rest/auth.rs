use std::sync::Arc;

use axum::extract::FromRequestParts;
use axum::http::header::AUTHORIZATION;
use axum::http::request::Parts;

use crate::error::AppError;
use crate::models::identity::Identity;
use crate::state::AppState;

/// Authenticated caller. Rejects with 401 when the token is missing or
/// unknown to the identity provider.
pub struct Caller(pub Identity);

/// Caller for public routes: anonymous when no token is sent, 401 when a
/// token is sent but does not resolve.
pub struct OptionalCaller(pub Option<Identity>);

fn bearer_token(parts: &Parts) -> Option<&str> {
    let raw = parts.headers.get(AUTHORIZATION)?.to_str().ok()?;
    raw.strip_prefix("Bearer ")
        .or_else(|| raw.strip_prefix("Token "))
        .map(str::trim)
        .filter(|token| !token.is_empty())
}

async fn resolve(parts: &Parts, state: &AppState) -> Result<Option<Identity>, AppError> {
    let Some(token) = bearer_token(parts) else {
        return Ok(None);
    };
    match state.identity.resolve(token).await {
        Some(identity) => Ok(Some(identity)),
        None => Err(AppError::Unauthorized),
    }
}

#[axum::async_trait]
impl FromRequestParts<Arc<AppState>> for Caller {
    type Rejection = AppError;

    async fn from_request_parts(
        parts: &mut Parts,
        state: &Arc<AppState>,
    ) -> Result<Self, Self::Rejection> {
        resolve(parts, state)
            .await?
            .map(Caller)
            .ok_or(AppError::Unauthorized)
    }
}

#[axum::async_trait]
impl FromRequestParts<Arc<AppState>> for OptionalCaller {
    type Rejection = AppError;

    async fn from_request_parts(
        parts: &mut Parts,
        state: &Arc<AppState>,
    ) -> Result<Self, Self::Rejection> {
        Ok(OptionalCaller(resolve(parts, state).await?))
    }
}
