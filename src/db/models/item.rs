use serde::Serialize;
use sqlx::{query_as, query_scalar, SqlitePool};

use crate::db::now;

#[derive(Debug, Clone, Serialize, sqlx::FromRow)]
pub struct Item {
    pub id: i64,
    pub title: String,
    pub description: Option<String>,
    pub owner_id: i64,
    pub is_active: bool,
    pub processed_at: Option<String>,
    pub created_at: String,
    pub updated_at: Option<String>,
}

#[derive(Debug, Default)]
pub struct ItemChanges {
    pub title: Option<String>,
    pub description: Option<String>,
    pub is_active: Option<bool>,
}

/// Per-owner counters used by reports.
#[derive(Debug, Default, Serialize, sqlx::FromRow)]
pub struct ItemStats {
    pub total: i64,
    pub active: i64,
    pub processed: i64,
}

pub struct ItemRepository;

impl ItemRepository {
    pub async fn get(pool: &SqlitePool, id: i64) -> Result<Option<Item>, sqlx::Error> {
        query_as::<_, Item>("SELECT * FROM items WHERE id = ?")
            .bind(id)
            .fetch_optional(pool)
            .await
    }

    /// `owner = None` lists every item.
    pub async fn list(
        pool: &SqlitePool,
        owner: Option<i64>,
        offset: i64,
        limit: i64,
    ) -> Result<(Vec<Item>, i64), sqlx::Error> {
        let rows = query_as::<_, Item>(
            "SELECT * FROM items WHERE (?1 IS NULL OR owner_id = ?1)
             ORDER BY id ASC LIMIT ?2 OFFSET ?3"
        )
        .bind(owner)
        .bind(limit)
        .bind(offset)
        .fetch_all(pool)
        .await?;

        let total: i64 = query_scalar("SELECT COUNT(*) FROM items WHERE (?1 IS NULL OR owner_id = ?1)")
            .bind(owner)
            .fetch_one(pool)
            .await?;

        Ok((rows, total))
    }

    pub async fn create(
        pool: &SqlitePool,
        owner_id: i64,
        title: &str,
        description: Option<&str>,
    ) -> Result<Item, sqlx::Error> {
        query_as::<_, Item>(
            "INSERT INTO items (title, description, owner_id, is_active, created_at)
             VALUES (?, ?, ?, 1, ?)
             RETURNING *"
        )
        .bind(title)
        .bind(description)
        .bind(owner_id)
        .bind(now())
        .fetch_one(pool)
        .await
    }

    pub async fn update(pool: &SqlitePool, id: i64, changes: ItemChanges) -> Result<Option<Item>, sqlx::Error> {
        query_as::<_, Item>(
            "UPDATE items SET
                title = COALESCE(?, title),
                description = COALESCE(?, description),
                is_active = COALESCE(?, is_active),
                updated_at = ?
             WHERE id = ?
             RETURNING *"
        )
        .bind(&changes.title)
        .bind(&changes.description)
        .bind(changes.is_active)
        .bind(now())
        .bind(id)
        .fetch_optional(pool)
        .await
    }

    pub async fn delete(pool: &SqlitePool, id: i64) -> Result<Option<Item>, sqlx::Error> {
        query_as::<_, Item>("DELETE FROM items WHERE id = ? RETURNING *")
            .bind(id)
            .fetch_optional(pool)
            .await
    }

    /// Stores the normalized title and stamps `processed_at`.
    pub async fn mark_processed(pool: &SqlitePool, id: i64, title: &str) -> Result<Option<Item>, sqlx::Error> {
        query_as::<_, Item>(
            "UPDATE items SET title = ?, processed_at = ? WHERE id = ? RETURNING *"
        )
        .bind(title)
        .bind(now())
        .bind(id)
        .fetch_optional(pool)
        .await
    }

    pub async fn stats(pool: &SqlitePool, owner_id: i64, since: Option<&str>) -> Result<ItemStats, sqlx::Error> {
        query_as::<_, ItemStats>(
            "SELECT COUNT(*) AS total,
                    COALESCE(SUM(is_active), 0) AS active,
                    COALESCE(SUM(processed_at IS NOT NULL), 0) AS processed
             FROM items
             WHERE owner_id = ?1 AND (?2 IS NULL OR created_at >= ?2)"
        )
        .bind(owner_id)
        .bind(since)
        .fetch_one(pool)
        .await
    }
}
