use axum::{
    extract::{Path, Query, State},
    http::StatusCode,
    Json,
};
use serde_json::{json, Value};
use std::sync::Arc;

use super::Pagination;
use crate::api::middleware::auth::AuthUser;
use crate::api::middleware::superuser::SuperUser;
use crate::api::validators::{BaseUrlValidator, Validator};
use crate::api::AppState;
use crate::db::models::external_system::{
    CallLogRepository, CreateExternalSystem, ExternalSystem, ExternalSystemRepository, UpdateExternalSystem,
};
use crate::error::{is_unique_violation, AppError, AppResult};
use crate::external::{AuthOutcome, AuthSummary, CallRequest, CallResponse, SystemStatus, MAX_SESSION_TIMEOUT};

const MAX_RETRY_COUNT: i64 = 100;

pub async fn create(
    State(state): State<Arc<AppState>>,
    SuperUser(admin): SuperUser,
    Json(body): Json<CreateExternalSystem>,
) -> AppResult<(StatusCode, Json<ExternalSystem>)> {
    if body.name.trim().is_empty() {
        return Err(AppError::Validation("System name cannot be empty".to_string()));
    }
    BaseUrlValidator.validate(&body.base_url)?;
    check_limits(Some(body.session_timeout), Some(body.max_retry_count))?;

    if ExternalSystemRepository::get_by_name(&state.db, body.name.trim()).await?.is_some() {
        return Err(duplicate_name(&body.name));
    }

    let system = ExternalSystemRepository::create(&state.db, &body)
        .await
        .map_err(|e| if is_unique_violation(&e) { duplicate_name(&body.name) } else { AppError::Database(e) })?;

    tracing::info!("External system {} registered by {}", system.name, admin.email);
    Ok((StatusCode::CREATED, Json(system)))
}

pub async fn list(
    State(state): State<Arc<AppState>>,
    _admin: SuperUser,
    Query(page): Query<Pagination>,
) -> AppResult<Json<Value>> {
    let (offset, limit) = page.bounds();
    let (data, total) = ExternalSystemRepository::list(&state.db, offset, limit).await?;
    Ok(Json(json!({ "data": data, "total": total })))
}

pub async fn get(
    State(state): State<Arc<AppState>>,
    _admin: SuperUser,
    Path(id): Path<i64>,
) -> AppResult<Json<ExternalSystem>> {
    let system = ExternalSystemRepository::get(&state.db, id)
        .await?
        .ok_or_else(system_not_found)?;
    Ok(Json(system))
}

pub async fn update(
    State(state): State<Arc<AppState>>,
    _admin: SuperUser,
    Path(id): Path<i64>,
    Json(body): Json<UpdateExternalSystem>,
) -> AppResult<Json<ExternalSystem>> {
    if let Some(url) = &body.base_url {
        BaseUrlValidator.validate(url)?;
    }
    check_limits(body.session_timeout, body.max_retry_count)?;
    let system = ExternalSystemRepository::update(&state.db, id, &body)
        .await?
        .ok_or_else(system_not_found)?;
    Ok(Json(system))
}

pub async fn delete(
    State(state): State<Arc<AppState>>,
    SuperUser(admin): SuperUser,
    Path(id): Path<i64>,
) -> AppResult<StatusCode> {
    if !ExternalSystemRepository::delete(&state.db, id).await? {
        return Err(system_not_found());
    }
    tracing::info!("External system {} deleted by {}", id, admin.email);
    Ok(StatusCode::NO_CONTENT)
}

pub async fn authenticate(
    State(state): State<Arc<AppState>>,
    _admin: SuperUser,
    Path(name): Path<String>,
) -> AppResult<Json<AuthOutcome>> {
    let outcome = state.external.authenticate(&name).await?;
    if !outcome.success {
        return Err(AppError::Validation(outcome.message));
    }
    Ok(Json(outcome))
}

pub async fn authenticate_all(
    State(state): State<Arc<AppState>>,
    _admin: SuperUser,
) -> AppResult<Json<AuthSummary>> {
    Ok(Json(state.external.authenticate_all().await?))
}

pub async fn status_all(
    State(state): State<Arc<AppState>>,
    _auth: AuthUser,
) -> AppResult<Json<Vec<SystemStatus>>> {
    Ok(Json(state.external.status_all().await?))
}

pub async fn status(
    State(state): State<Arc<AppState>>,
    _auth: AuthUser,
    Path(name): Path<String>,
) -> AppResult<Json<SystemStatus>> {
    Ok(Json(state.external.status(&name).await?))
}

pub async fn call(
    State(state): State<Arc<AppState>>,
    _admin: SuperUser,
    Path(name): Path<String>,
    Json(body): Json<CallRequest>,
) -> AppResult<Json<CallResponse>> {
    Ok(Json(state.external.call(&name, &body).await?))
}

pub async fn logs(
    State(state): State<Arc<AppState>>,
    _admin: SuperUser,
    Path(id): Path<i64>,
    Query(page): Query<Pagination>,
) -> AppResult<Json<Value>> {
    ExternalSystemRepository::get(&state.db, id)
        .await?
        .ok_or_else(system_not_found)?;

    let (offset, limit) = page.bounds();
    let data = CallLogRepository::list(&state.db, id, offset, limit).await?;
    let total = CallLogRepository::count(&state.db, id).await?;
    Ok(Json(json!({ "data": data, "total": total })))
}

fn check_limits(session_timeout: Option<i64>, max_retry_count: Option<i64>) -> AppResult<()> {
    if let Some(secs) = session_timeout.filter(|s| !(1..=MAX_SESSION_TIMEOUT).contains(s)) {
        return Err(AppError::Validation(format!(
            "session_timeout must be between 1 and {} seconds, got {}",
            MAX_SESSION_TIMEOUT, secs
        )));
    }
    if let Some(n) = max_retry_count.filter(|n| !(0..=MAX_RETRY_COUNT).contains(n)) {
        return Err(AppError::Validation(format!(
            "max_retry_count must be between 0 and {}, got {}",
            MAX_RETRY_COUNT, n
        )));
    }
    Ok(())
}

fn duplicate_name(name: &str) -> AppError {
    AppError::Validation(format!("External system '{}' already exists", name.trim()))
}

fn system_not_found() -> AppError {
    AppError::NotFound("External system not found".to_string())
}
