use axum::{
    extract::{Path, Query, State},
    Json,
};
use serde::Deserialize;
use serde_json::{json, Value};
use std::sync::Arc;

use super::Pagination;
use crate::api::middleware::auth::AuthUser;
use crate::api::AppState;
use crate::db::models::item::{Item, ItemChanges, ItemRepository};
use crate::db::models::user::User;
use crate::error::{AppError, AppResult};
use crate::tasks::Task;

#[derive(Debug, Deserialize)]
pub struct CreateItemRequest {
    pub title: String,
    pub description: Option<String>,
}

#[derive(Debug, Default, Deserialize)]
pub struct UpdateItemRequest {
    pub title: Option<String>,
    pub description: Option<String>,
    pub is_active: Option<bool>,
}

pub async fn list(
    State(state): State<Arc<AppState>>,
    AuthUser(user): AuthUser,
    Query(page): Query<Pagination>,
) -> AppResult<Json<Value>> {
    let (offset, limit) = page.bounds();
    let owner = if user.is_superuser { None } else { Some(user.id) };
    let (data, total) = ItemRepository::list(&state.db, owner, offset, limit).await?;
    Ok(Json(json!({ "data": data, "total": total })))
}

pub async fn create(
    State(state): State<Arc<AppState>>,
    AuthUser(user): AuthUser,
    Json(body): Json<CreateItemRequest>,
) -> AppResult<Json<Item>> {
    let title = required_title(&body.title)?;
    let item = ItemRepository::create(&state.db, user.id, title, body.description.as_deref()).await?;

    state.tasks.enqueue(Task::ProcessItem { item_id: item.id }).await;
    state
        .tasks
        .enqueue(Task::SendItemNotification {
            email: user.email.clone(),
            message: format!("New item created: {}", item.title),
            item_id: item.id,
        })
        .await;

    // inline execution may already have processed it
    let item = ItemRepository::get(&state.db, item.id).await?.unwrap_or(item);
    Ok(Json(item))
}

pub async fn get(
    State(state): State<Arc<AppState>>,
    AuthUser(user): AuthUser,
    Path(id): Path<i64>,
) -> AppResult<Json<Item>> {
    Ok(Json(owned_item(&state, &user, id).await?))
}

pub async fn update(
    State(state): State<Arc<AppState>>,
    AuthUser(user): AuthUser,
    Path(id): Path<i64>,
    Json(body): Json<UpdateItemRequest>,
) -> AppResult<Json<Item>> {
    owned_item(&state, &user, id).await?;

    let title = match &body.title {
        Some(t) => Some(required_title(t)?.to_string()),
        None => None,
    };
    let changes = ItemChanges { title, description: body.description, is_active: body.is_active };
    let item = ItemRepository::update(&state.db, id, changes)
        .await?
        .ok_or_else(item_not_found)?;
    Ok(Json(item))
}

pub async fn delete(
    State(state): State<Arc<AppState>>,
    AuthUser(user): AuthUser,
    Path(id): Path<i64>,
) -> AppResult<Json<Item>> {
    owned_item(&state, &user, id).await?;
    let item = ItemRepository::delete(&state.db, id)
        .await?
        .ok_or_else(item_not_found)?;
    tracing::info!("Item {} deleted by {}", id, user.email);
    Ok(Json(item))
}

async fn owned_item(state: &AppState, user: &User, id: i64) -> AppResult<Item> {
    let item = ItemRepository::get(&state.db, id).await?.ok_or_else(item_not_found)?;
    if !user.can_access(item.owner_id) {
        return Err(AppError::Forbidden("Not enough permissions".to_string()));
    }
    Ok(item)
}

fn required_title(title: &str) -> AppResult<&str> {
    let title = title.trim();
    if title.is_empty() {
        return Err(AppError::Validation("Title cannot be empty".to_string()));
    }
    Ok(title)
}

fn item_not_found() -> AppError {
    AppError::NotFound("Item not found".to_string())
}
