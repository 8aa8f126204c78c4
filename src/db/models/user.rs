use serde::Serialize;
use sqlx::{query_as, query_scalar, SqlitePool};

use crate::db::now;

#[derive(Debug, Clone, Serialize, sqlx::FromRow)]
pub struct User {
    pub id: i64,
    pub email: String,
    #[serde(skip_serializing)]
    pub hashed_password: String,
    pub first_name: Option<String>,
    pub last_name: Option<String>,
    pub is_active: bool,
    pub is_superuser: bool,
    pub created_at: String,
    pub updated_at: String,
}

impl User {
    /// Name used in greetings and notifications.
    pub fn display_name(&self) -> String {
        match (&self.first_name, &self.last_name) {
            (Some(first), Some(last)) => format!("{} {}", first, last),
            (Some(first), None) => first.clone(),
            _ => "User".to_string(),
        }
    }

    pub fn can_access(&self, owner_id: i64) -> bool {
        self.is_superuser || self.id == owner_id
    }
}

#[derive(Debug)]
pub struct NewUser {
    pub email: String,
    pub hashed_password: String,
    pub first_name: Option<String>,
    pub last_name: Option<String>,
    pub is_active: bool,
    pub is_superuser: bool,
}

/// Partial update; `None` leaves the column untouched.
#[derive(Debug, Default)]
pub struct UserChanges {
    pub email: Option<String>,
    pub hashed_password: Option<String>,
    pub first_name: Option<String>,
    pub last_name: Option<String>,
    pub is_active: Option<bool>,
    pub is_superuser: Option<bool>,
}

pub struct UserRepository;

impl UserRepository {
    pub async fn count(pool: &SqlitePool) -> Result<i64, sqlx::Error> {
        query_scalar("SELECT COUNT(*) FROM users").fetch_one(pool).await
    }

    pub async fn get(pool: &SqlitePool, id: i64) -> Result<Option<User>, sqlx::Error> {
        query_as::<_, User>("SELECT * FROM users WHERE id = ?")
            .bind(id)
            .fetch_optional(pool)
            .await
    }

    pub async fn get_by_email(pool: &SqlitePool, email: &str) -> Result<Option<User>, sqlx::Error> {
        query_as::<_, User>("SELECT * FROM users WHERE email = ?")
            .bind(email.trim().to_lowercase())
            .fetch_optional(pool)
            .await
    }

    pub async fn list(pool: &SqlitePool, offset: i64, limit: i64) -> Result<(Vec<User>, i64), sqlx::Error> {
        let rows = query_as::<_, User>("SELECT * FROM users ORDER BY id ASC LIMIT ? OFFSET ?")
            .bind(limit)
            .bind(offset)
            .fetch_all(pool)
            .await?;
        let total = Self::count(pool).await?;
        Ok((rows, total))
    }

    pub async fn create(pool: &SqlitePool, new: NewUser) -> Result<User, sqlx::Error> {
        let now = now();
        query_as::<_, User>(
            "INSERT INTO users
                (email, hashed_password, first_name, last_name, is_active, is_superuser, created_at, updated_at)
             VALUES (?, ?, ?, ?, ?, ?, ?, ?)
             RETURNING *"
        )
        .bind(new.email.trim().to_lowercase())
        .bind(&new.hashed_password)
        .bind(&new.first_name)
        .bind(&new.last_name)
        .bind(new.is_active)
        .bind(new.is_superuser)
        .bind(&now)
        .bind(&now)
        .fetch_one(pool)
        .await
    }

    pub async fn update(pool: &SqlitePool, id: i64, changes: UserChanges) -> Result<Option<User>, sqlx::Error> {
        query_as::<_, User>(
            "UPDATE users SET
                email = COALESCE(?, email),
                hashed_password = COALESCE(?, hashed_password),
                first_name = COALESCE(?, first_name),
                last_name = COALESCE(?, last_name),
                is_active = COALESCE(?, is_active),
                is_superuser = COALESCE(?, is_superuser),
                updated_at = ?
             WHERE id = ?
             RETURNING *"
        )
        .bind(&changes.email)
        .bind(&changes.hashed_password)
        .bind(&changes.first_name)
        .bind(&changes.last_name)
        .bind(changes.is_active)
        .bind(changes.is_superuser)
        .bind(now())
        .bind(id)
        .fetch_optional(pool)
        .await
    }

    pub async fn set_active(pool: &SqlitePool, id: i64, active: bool) -> Result<Option<User>, sqlx::Error> {
        Self::update(pool, id, UserChanges { is_active: Some(active), ..Default::default() }).await
    }
}
