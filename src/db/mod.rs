use anyhow::Result;
use chrono::{DateTime, SecondsFormat, Utc};
use sqlx::sqlite::{SqliteConnectOptions, SqlitePoolOptions};
use sqlx::SqlitePool;
use std::str::FromStr;
use crate::config::Config;

pub mod models;

pub type DbPool = SqlitePool;

/// All timestamps are stored in this fixed-width form so that string
/// comparison in SQL orders them correctly.
pub fn timestamp(at: DateTime<Utc>) -> String {
    at.to_rfc3339_opts(SecondsFormat::Millis, true)
}

pub fn now() -> String {
    timestamp(Utc::now())
}

pub async fn init(cfg: &Config) -> Result<DbPool> {
    if cfg.database.path == ":memory:" {
        return memory().await;
    }

    let db_url = format!("sqlite://{}?mode=rwc", cfg.database.path);

    let pool = SqlitePoolOptions::new()
        .max_connections(cfg.database.max_connections)
        .connect_with(
            SqliteConnectOptions::from_str(&db_url)?
                .create_if_missing(true)
                .foreign_keys(true),
        )
        .await?;

    sqlx::migrate!("./src/db/migrations").run(&pool).await?;

    sqlx::query("PRAGMA journal_mode=WAL")
        .execute(&pool)
        .await?;

    sqlx::query("PRAGMA synchronous=NORMAL")
        .execute(&pool)
        .await?;

    sqlx::query("PRAGMA cache_size=-64000")
        .execute(&pool)
        .await?;

    tracing::info!("Database connected: {}", cfg.database.path);
    Ok(pool)
}

/// Single-connection in-memory database with migrations applied.
/// Every connection to `:memory:` is its own database, so the pool is
/// pinned to one connection that never expires.
pub async fn memory() -> Result<DbPool> {
    let pool = SqlitePoolOptions::new()
        .max_connections(1)
        .min_connections(1)
        .idle_timeout(None)
        .max_lifetime(None)
        .connect_with(SqliteConnectOptions::from_str("sqlite::memory:")?.foreign_keys(true))
        .await?;

    sqlx::migrate!("./src/db/migrations").run(&pool).await?;
    Ok(pool)
}

/// Create the configured superuser if the users table is empty.
pub async fn seed_superuser(pool: &DbPool, cfg: &Config) -> Result<()> {
    let count = models::user::UserRepository::count(pool).await?;

    if count == 0 {
        let hashed = crate::auth::password::hash(&cfg.superuser.password)?;
        models::user::UserRepository::create(
            pool,
            models::user::NewUser {
                email: cfg.superuser.email.to_lowercase(),
                hashed_password: hashed,
                first_name: None,
                last_name: None,
                is_active: true,
                is_superuser: true,
            },
        )
        .await?;

        tracing::warn!(
            "Created initial superuser {}. Change the password immediately in production!",
            cfg.superuser.email
        );
    }

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn timestamps_are_fixed_width_and_ordered() {
        let a = timestamp(DateTime::parse_from_rfc3339("2024-01-01T00:00:00Z").unwrap().with_timezone(&Utc));
        let b = timestamp(DateTime::parse_from_rfc3339("2024-01-01T00:00:00.5Z").unwrap().with_timezone(&Utc));
        assert_eq!(a, "2024-01-01T00:00:00.000Z");
        assert_eq!(b, "2024-01-01T00:00:00.500Z");
        assert!(a < b);
    }

    #[tokio::test]
    async fn seed_creates_superuser_once() {
        let pool = memory().await.expect("db");
        let cfg = Config::default();

        seed_superuser(&pool, &cfg).await.expect("seed");
        seed_superuser(&pool, &cfg).await.expect("seed again");

        let count = models::user::UserRepository::count(&pool).await.expect("count");
        assert_eq!(count, 1);

        let admin = models::user::UserRepository::get_by_email(&pool, "admin@example.com")
            .await
            .expect("query")
            .expect("admin exists");
        assert!(admin.is_superuser);
        assert!(crate::auth::password::verify("admin123", &admin.hashed_password));
    }
}
