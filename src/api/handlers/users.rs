use axum::{
    extract::{Path, Query, State},
    Json,
};
use serde::Deserialize;
use serde_json::{json, Value};
use std::sync::Arc;

use super::Pagination;
use crate::api::handlers::auth::duplicate_email;
use crate::api::middleware::auth::AuthUser;
use crate::api::middleware::superuser::SuperUser;
use crate::api::validators::{EmailValidator, PasswordValidator, Validator};
use crate::api::AppState;
use crate::auth::password;
use crate::db::models::user::{NewUser, User, UserChanges, UserRepository};
use crate::error::{is_unique_violation, AppError, AppResult};

#[derive(Debug, Deserialize)]
pub struct CreateUserRequest {
    pub email: String,
    pub password: String,
    pub first_name: Option<String>,
    pub last_name: Option<String>,
    #[serde(default = "default_true")]
    pub is_active: bool,
    #[serde(default)]
    pub is_superuser: bool,
}

fn default_true() -> bool { true }

#[derive(Debug, Default, Deserialize)]
pub struct UpdateMeRequest {
    pub password: Option<String>,
    pub first_name: Option<String>,
    pub last_name: Option<String>,
}

#[derive(Debug, Default, Deserialize)]
pub struct UpdateUserRequest {
    pub email: Option<String>,
    pub password: Option<String>,
    pub first_name: Option<String>,
    pub last_name: Option<String>,
    pub is_active: Option<bool>,
    pub is_superuser: Option<bool>,
}

#[derive(Debug, Deserialize)]
pub struct ChangePasswordRequest {
    pub current_password: String,
    pub new_password: String,
}

pub async fn list(
    State(state): State<Arc<AppState>>,
    _admin: SuperUser,
    Query(page): Query<Pagination>,
) -> AppResult<Json<Value>> {
    let (offset, limit) = page.bounds();
    let (data, total) = UserRepository::list(&state.db, offset, limit).await?;
    Ok(Json(json!({ "data": data, "total": total })))
}

pub async fn create(
    State(state): State<Arc<AppState>>,
    SuperUser(admin): SuperUser,
    Json(body): Json<CreateUserRequest>,
) -> AppResult<Json<User>> {
    EmailValidator.validate(&body.email)?;
    PasswordValidator.validate(&body.password)?;

    if UserRepository::get_by_email(&state.db, &body.email).await?.is_some() {
        return Err(duplicate_email());
    }

    let user = UserRepository::create(
        &state.db,
        NewUser {
            email: body.email,
            hashed_password: hash(body.password).await?,
            first_name: body.first_name,
            last_name: body.last_name,
            is_active: body.is_active,
            is_superuser: body.is_superuser,
        },
    )
    .await
    .map_err(map_unique)?;

    tracing::info!("User {} created by {}", user.email, admin.email);
    Ok(Json(user))
}

pub async fn me(AuthUser(user): AuthUser) -> Json<User> {
    Json(user)
}

pub async fn update_me(
    State(state): State<Arc<AppState>>,
    AuthUser(user): AuthUser,
    Json(body): Json<UpdateMeRequest>,
) -> AppResult<Json<User>> {
    let hashed_password = match body.password {
        Some(p) => {
            PasswordValidator.validate(&p)?;
            Some(hash(p).await?)
        }
        None => None,
    };

    let changes = UserChanges {
        hashed_password,
        first_name: body.first_name,
        last_name: body.last_name,
        ..Default::default()
    };
    let updated = UserRepository::update(&state.db, user.id, changes)
        .await?
        .ok_or_else(user_not_found)?;
    Ok(Json(updated))
}

pub async fn change_password(
    State(state): State<Arc<AppState>>,
    AuthUser(user): AuthUser,
    Json(body): Json<ChangePasswordRequest>,
) -> AppResult<Json<Value>> {
    if !password::verify_async(body.current_password, user.hashed_password.clone()).await {
        return Err(AppError::Validation("Incorrect password".to_string()));
    }
    PasswordValidator.validate(&body.new_password)?;

    let changes = UserChanges { hashed_password: Some(hash(body.new_password).await?), ..Default::default() };
    UserRepository::update(&state.db, user.id, changes)
        .await?
        .ok_or_else(user_not_found)?;

    tracing::info!("User {} changed their password", user.email);
    Ok(Json(json!({ "message": "Password updated successfully" })))
}

pub async fn get(
    State(state): State<Arc<AppState>>,
    AuthUser(caller): AuthUser,
    Path(id): Path<i64>,
) -> AppResult<Json<User>> {
    if caller.id == id {
        return Ok(Json(caller));
    }
    if !caller.is_superuser {
        return Err(AppError::Forbidden("The user doesn't have enough privileges".to_string()));
    }
    let user = UserRepository::get(&state.db, id).await?.ok_or_else(user_not_found)?;
    Ok(Json(user))
}

pub async fn update(
    State(state): State<Arc<AppState>>,
    _admin: SuperUser,
    Path(id): Path<i64>,
    Json(body): Json<UpdateUserRequest>,
) -> AppResult<Json<User>> {
    if let Some(email) = &body.email {
        EmailValidator.validate(email)?;
    }
    let hashed_password = match body.password {
        Some(p) => {
            PasswordValidator.validate(&p)?;
            Some(hash(p).await?)
        }
        None => None,
    };

    let changes = UserChanges {
        email: body.email.map(|e| e.trim().to_lowercase()),
        hashed_password,
        first_name: body.first_name,
        last_name: body.last_name,
        is_active: body.is_active,
        is_superuser: body.is_superuser,
    };
    let user = UserRepository::update(&state.db, id, changes)
        .await
        .map_err(map_unique)?
        .ok_or_else(user_not_found)?;
    Ok(Json(user))
}

pub async fn activate(
    State(state): State<Arc<AppState>>,
    _admin: SuperUser,
    Path(id): Path<i64>,
) -> AppResult<Json<User>> {
    set_active(&state, id, true).await
}

pub async fn deactivate(
    State(state): State<Arc<AppState>>,
    _admin: SuperUser,
    Path(id): Path<i64>,
) -> AppResult<Json<User>> {
    set_active(&state, id, false).await
}

async fn set_active(state: &AppState, id: i64, active: bool) -> AppResult<Json<User>> {
    let user = UserRepository::set_active(&state.db, id, active)
        .await?
        .ok_or_else(user_not_found)?;
    tracing::info!("User {} {}", user.email, if active { "activated" } else { "deactivated" });
    Ok(Json(user))
}

async fn hash(password: String) -> AppResult<String> {
    password::hash_async(password)
        .await
        .map_err(|e| AppError::Internal(e.to_string()))
}

fn map_unique(e: sqlx::Error) -> AppError {
    if is_unique_violation(&e) { duplicate_email() } else { AppError::Database(e) }
}

fn user_not_found() -> AppError {
    AppError::NotFound("User not found".to_string())
}
