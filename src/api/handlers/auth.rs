use axum::{extract::State, Form, Json};
use serde::Deserialize;
use serde_json::{json, Value};
use std::sync::Arc;
use std::time::Instant;

use crate::api::middleware::auth::AuthUser;
use crate::api::validators::{EmailValidator, PasswordValidator, Validator};
use crate::api::AppState;
use crate::auth::jwt::{self, TokenKind};
use crate::auth::password;
use crate::db::models::user::{NewUser, User, UserRepository};
use crate::error::{is_unique_violation, AppError, AppResult};
use crate::tasks::Task;

const BAD_CREDENTIALS: &str = "Incorrect email or password";

#[derive(Deserialize)]
pub struct LoginForm {
    username: String,
    password: String,
}

#[derive(Deserialize)]
pub struct LoginJson {
    email: String,
    password: String,
}

#[derive(Deserialize)]
pub struct RegisterRequest {
    pub email: String,
    pub password: String,
    pub first_name: Option<String>,
    pub last_name: Option<String>,
}

#[derive(Deserialize)]
pub struct RefreshRequest {
    refresh_token: String,
}

pub async fn register(
    State(state): State<Arc<AppState>>,
    Json(body): Json<RegisterRequest>,
) -> AppResult<Json<User>> {
    EmailValidator.validate(&body.email)?;
    PasswordValidator.validate(&body.password)?;

    if UserRepository::get_by_email(&state.db, &body.email).await?.is_some() {
        return Err(duplicate_email());
    }

    let hashed = password::hash_async(body.password)
        .await
        .map_err(|e| AppError::Internal(e.to_string()))?;

    let user = UserRepository::create(
        &state.db,
        NewUser {
            email: body.email,
            hashed_password: hashed,
            first_name: body.first_name,
            last_name: body.last_name,
            is_active: true,
            is_superuser: false,
        },
    )
    .await
    .map_err(|e| if is_unique_violation(&e) { duplicate_email() } else { AppError::Database(e) })?;

    let job_id = state
        .tasks
        .enqueue(Task::SendWelcomeEmail { email: user.email.clone(), name: user.display_name() })
        .await;
    tracing::info!("Registered user {} (welcome email job {})", user.email, job_id);

    Ok(Json(user))
}

pub fn duplicate_email() -> AppError {
    AppError::Validation("The user with this email already exists in the system.".to_string())
}

/// OAuth2 password form: `username` carries the email.
pub async fn login(
    State(state): State<Arc<AppState>>,
    Form(form): Form<LoginForm>,
) -> AppResult<Json<Value>> {
    let user = check_credentials(&state, &form.username, form.password).await?;
    Ok(Json(token_pair(&state, user.id)?))
}

pub async fn login_json(
    State(state): State<Arc<AppState>>,
    Json(body): Json<LoginJson>,
) -> AppResult<Json<Value>> {
    let user = check_credentials(&state, &body.email, body.password).await?;
    let mut tokens = token_pair(&state, user.id)?;
    tokens["user"] = serde_json::to_value(&user)?;
    Ok(Json(tokens))
}

pub async fn refresh(
    State(state): State<Arc<AppState>>,
    Json(body): Json<RefreshRequest>,
) -> AppResult<Json<Value>> {
    let claims = jwt::verify(&body.refresh_token, &state.jwt_secret, TokenKind::Refresh)
        .map_err(|_| AppError::Unauthorized("Invalid refresh token".to_string()))?;
    let user_id = claims.user_id().ok_or(AppError::AuthFailed)?;

    let user = UserRepository::get(&state.db, user_id)
        .await?
        .filter(|u| u.is_active)
        .ok_or_else(|| AppError::Unauthorized("User not found or inactive".to_string()))?;

    Ok(Json(token_pair(&state, user.id)?))
}

pub async fn test_token(AuthUser(user): AuthUser) -> Json<Value> {
    Json(json!({
        "message": "Token is valid",
        "user_id": user.id,
        "email": user.email,
    }))
}

async fn check_credentials(state: &AppState, email: &str, password: String) -> AppResult<User> {
    let key = email.trim().to_lowercase();
    if is_locked_out(state, &key) {
        tracing::warn!("Login locked out for {}", key);
        return Err(AppError::TooManyRequests);
    }

    let user = UserRepository::get_by_email(&state.db, &key).await?;
    let verified = match &user {
        Some(u) => password::verify_async(password, u.hashed_password.clone()).await,
        None => false,
    };
    let Some(user) = user.filter(|_| verified) else {
        record_failure(state, &key);
        return Err(AppError::Unauthorized(BAD_CREDENTIALS.to_string()));
    };

    if !user.is_active {
        return Err(AppError::Unauthorized("Inactive user".to_string()));
    }

    state.login_attempts.remove(&key);
    Ok(user)
}

fn token_pair(state: &AppState, user_id: i64) -> AppResult<Value> {
    let access = jwt::generate_access(user_id, &state.jwt_secret, state.access_token_minutes)
        .map_err(|e| AppError::Internal(e.to_string()))?;
    let refresh = jwt::generate_refresh(user_id, &state.jwt_secret, state.refresh_token_minutes)
        .map_err(|e| AppError::Internal(e.to_string()))?;
    Ok(json!({
        "access_token": access,
        "refresh_token": refresh,
        "token_type": "bearer",
    }))
}

fn is_locked_out(state: &AppState, key: &str) -> bool {
    let expired = match state.login_attempts.get(key) {
        Some(entry) => {
            let (count, since) = *entry;
            if since.elapsed() < state.login_lockout {
                return count >= state.max_login_failures;
            }
            true
        }
        None => false,
    };
    if expired {
        state.login_attempts.remove(key);
    }
    false
}

fn record_failure(state: &AppState, key: &str) {
    let mut entry = state.login_attempts.entry(key.to_string()).or_insert((0, Instant::now()));
    if entry.1.elapsed() >= state.login_lockout {
        *entry = (0, Instant::now());
    }
    entry.0 += 1;
}
