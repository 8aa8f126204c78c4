use axum::{
    extract::FromRequestParts,
    http::request::Parts,
};
use std::sync::Arc;
use crate::auth::jwt::TokenKind;
use crate::db::models::user::{User, UserRepository};
use crate::error::AppError;
use crate::api::AppState;

/// Pull the raw token out of an `Authorization: Bearer ...` header.
pub fn bearer_token(parts: &Parts) -> Option<&str> {
    parts
        .headers
        .get("authorization")
        .and_then(|v| v.to_str().ok())
        .and_then(|v| v.strip_prefix("Bearer ").or_else(|| v.strip_prefix("bearer ")))
        .map(str::trim)
        .filter(|t| !t.is_empty())
}

/// Axum extractor that validates a Bearer access token and loads the
/// account it belongs to. Inactive accounts are rejected with 403.
pub struct AuthUser(pub User);

impl FromRequestParts<Arc<AppState>> for AuthUser {
    type Rejection = AppError;

    async fn from_request_parts(parts: &mut Parts, state: &Arc<AppState>) -> Result<Self, Self::Rejection> {
        let token = bearer_token(parts).ok_or(AppError::AuthFailed)?;

        let claims = crate::auth::jwt::verify(token, &state.jwt_secret, TokenKind::Access)
            .map_err(|_| AppError::AuthFailed)?;
        let user_id = claims.user_id().ok_or(AppError::AuthFailed)?;

        let user = UserRepository::get(&state.db, user_id)
            .await?
            .ok_or(AppError::AuthFailed)?;

        if !user.is_active {
            return Err(AppError::Forbidden("Inactive user".to_string()));
        }

        Ok(AuthUser(user))
    }
}
