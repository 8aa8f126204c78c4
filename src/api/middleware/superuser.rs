use axum::extract::FromRequestParts;
use axum::http::request::Parts;
use std::sync::Arc;
use crate::db::models::user::User;
use crate::error::AppError;
use crate::api::AppState;
use super::auth::AuthUser;

/// Axum extractor that requires an active superuser.
/// Returns 403 Forbidden for any other authenticated account.
pub struct SuperUser(pub User);

impl FromRequestParts<Arc<AppState>> for SuperUser {
    type Rejection = AppError;

    async fn from_request_parts(parts: &mut Parts, state: &Arc<AppState>) -> Result<Self, Self::Rejection> {
        let AuthUser(user) = AuthUser::from_request_parts(parts, state).await?;
        if user.is_superuser {
            Ok(SuperUser(user))
        } else {
            Err(AppError::Forbidden("The user doesn't have enough privileges".to_string()))
        }
    }
}
