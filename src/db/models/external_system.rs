use serde::{Deserialize, Serialize};
use serde_json::Value;
use sqlx::{query, query_as, query_scalar, SqlitePool};

use super::json_text;
use crate::db::now;

/// Serialized response bodies longer than this are replaced by a marker.
pub const MAX_LOGGED_RESPONSE_CHARS: usize = 1000;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AuthStatus {
    Inactive,
    Active,
    Error,
}

impl AuthStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            AuthStatus::Inactive => "inactive",
            AuthStatus::Active => "active",
            AuthStatus::Error => "error",
        }
    }
}

#[derive(Debug, Clone, Serialize, sqlx::FromRow)]
pub struct ExternalSystem {
    pub id: i64,
    pub name: String,
    pub display_name: Option<String>,
    pub base_url: String,
    pub auth_url: Option<String>,
    pub username: String,
    /// Replayed to the remote login endpoint, so it cannot be one-way hashed.
    #[serde(skip_serializing)]
    pub password: String,
    pub auth_type: String,
    pub session_timeout: i64,
    pub max_retry_count: i64,
    pub is_active: bool,
    pub last_login_time: Option<String>,
    pub last_error: Option<String>,
    pub auth_status: String,
    #[serde(serialize_with = "json_text")]
    pub extra_config: Option<String>,
    pub created_at: String,
    pub updated_at: String,
}

impl ExternalSystem {
    pub fn login_path(&self) -> &str {
        self.auth_url.as_deref().filter(|p| !p.is_empty()).unwrap_or("/login")
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct CreateExternalSystem {
    pub name: String,
    pub display_name: Option<String>,
    pub base_url: String,
    pub auth_url: Option<String>,
    pub username: String,
    pub password: String,
    #[serde(default = "default_auth_type")]
    pub auth_type: String,
    #[serde(default = "default_session_timeout")]
    pub session_timeout: i64,
    #[serde(default = "default_max_retry_count")]
    pub max_retry_count: i64,
    #[serde(default = "default_active")]
    pub is_active: bool,
    pub extra_config: Option<Value>,
}

fn default_auth_type() -> String { "username_password".to_string() }
fn default_session_timeout() -> i64 { 3600 }
fn default_max_retry_count() -> i64 { 3 }
fn default_active() -> bool { true }

#[derive(Debug, Clone, Default, Deserialize)]
pub struct UpdateExternalSystem {
    pub display_name: Option<String>,
    pub base_url: Option<String>,
    pub auth_url: Option<String>,
    pub username: Option<String>,
    pub password: Option<String>,
    pub auth_type: Option<String>,
    pub session_timeout: Option<i64>,
    pub max_retry_count: Option<i64>,
    pub is_active: Option<bool>,
    pub extra_config: Option<Value>,
}

#[derive(Debug, Clone, Serialize, sqlx::FromRow)]
pub struct ExternalSystemSession {
    pub id: i64,
    pub system_id: i64,
    pub session_token: Option<String>,
    #[serde(serialize_with = "json_text")]
    pub session_data: Option<String>,
    pub is_valid: bool,
    pub expires_at: Option<String>,
    pub request_count: i64,
    pub last_used_at: String,
    pub created_at: String,
    pub updated_at: String,
}

#[derive(Debug, Clone, Serialize, sqlx::FromRow)]
pub struct ExternalSystemLog {
    pub id: i64,
    pub system_id: i64,
    pub operation: String,
    pub endpoint: String,
    pub request_method: String,
    #[serde(serialize_with = "json_text")]
    pub request_data: Option<String>,
    pub response_status: Option<i64>,
    pub response_time: Option<i64>,
    #[serde(serialize_with = "json_text")]
    pub response_data: Option<String>,
    pub is_success: bool,
    pub error_message: Option<String>,
    pub created_at: String,
}

#[derive(Debug, Clone)]
pub struct NewCallLog {
    pub system_id: i64,
    pub operation: &'static str,
    pub endpoint: String,
    pub request_method: String,
    pub request_data: Option<Value>,
    pub response_status: Option<u16>,
    pub response_time_ms: Option<i64>,
    pub response_data: Option<Value>,
    pub is_success: bool,
    pub error_message: Option<String>,
}

/// Replace oversized payloads with `{"truncated": true, "size": n}`.
pub fn truncate_payload(value: &Value) -> Value {
    let text = value.to_string();
    if text.len() > MAX_LOGGED_RESPONSE_CHARS {
        serde_json::json!({ "truncated": true, "size": text.len() })
    } else {
        value.clone()
    }
}

pub struct ExternalSystemRepository;

impl ExternalSystemRepository {
    pub async fn get(pool: &SqlitePool, id: i64) -> Result<Option<ExternalSystem>, sqlx::Error> {
        query_as::<_, ExternalSystem>("SELECT * FROM external_systems WHERE id = ?")
            .bind(id)
            .fetch_optional(pool)
            .await
    }

    pub async fn get_by_name(pool: &SqlitePool, name: &str) -> Result<Option<ExternalSystem>, sqlx::Error> {
        query_as::<_, ExternalSystem>("SELECT * FROM external_systems WHERE name = ?")
            .bind(name)
            .fetch_optional(pool)
            .await
    }

    pub async fn list(pool: &SqlitePool, offset: i64, limit: i64) -> Result<(Vec<ExternalSystem>, i64), sqlx::Error> {
        let rows = query_as::<_, ExternalSystem>("SELECT * FROM external_systems ORDER BY id ASC LIMIT ? OFFSET ?")
            .bind(limit)
            .bind(offset)
            .fetch_all(pool)
            .await?;
        let total: i64 = query_scalar("SELECT COUNT(*) FROM external_systems")
            .fetch_one(pool)
            .await?;
        Ok((rows, total))
    }

    pub async fn list_active(pool: &SqlitePool) -> Result<Vec<ExternalSystem>, sqlx::Error> {
        query_as::<_, ExternalSystem>("SELECT * FROM external_systems WHERE is_active = 1 ORDER BY id ASC")
            .fetch_all(pool)
            .await
    }

    pub async fn create(pool: &SqlitePool, req: &CreateExternalSystem) -> Result<ExternalSystem, sqlx::Error> {
        let now = now();
        let extra = req.extra_config.as_ref().map(|v| v.to_string());

        query_as::<_, ExternalSystem>(
            "INSERT INTO external_systems
                (name, display_name, base_url, auth_url, username, password, auth_type,
                 session_timeout, max_retry_count, is_active, auth_status, extra_config,
                 created_at, updated_at)
             VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?, 'inactive', ?, ?, ?)
             RETURNING *"
        )
        .bind(req.name.trim())
        .bind(&req.display_name)
        .bind(req.base_url.trim())
        .bind(&req.auth_url)
        .bind(&req.username)
        .bind(&req.password)
        .bind(&req.auth_type)
        .bind(req.session_timeout)
        .bind(req.max_retry_count)
        .bind(req.is_active)
        .bind(extra)
        .bind(&now)
        .bind(&now)
        .fetch_one(pool)
        .await
    }

    pub async fn update(
        pool: &SqlitePool,
        id: i64,
        req: &UpdateExternalSystem,
    ) -> Result<Option<ExternalSystem>, sqlx::Error> {
        let extra = req.extra_config.as_ref().map(|v| v.to_string());

        query_as::<_, ExternalSystem>(
            "UPDATE external_systems SET
                display_name = COALESCE(?, display_name),
                base_url = COALESCE(?, base_url),
                auth_url = COALESCE(?, auth_url),
                username = COALESCE(?, username),
                password = COALESCE(?, password),
                auth_type = COALESCE(?, auth_type),
                session_timeout = COALESCE(?, session_timeout),
                max_retry_count = COALESCE(?, max_retry_count),
                is_active = COALESCE(?, is_active),
                extra_config = COALESCE(?, extra_config),
                updated_at = ?
             WHERE id = ?
             RETURNING *"
        )
        .bind(&req.display_name)
        .bind(req.base_url.as_deref().map(str::trim))
        .bind(&req.auth_url)
        .bind(&req.username)
        .bind(req.password.as_deref().filter(|p| !p.is_empty()))
        .bind(&req.auth_type)
        .bind(req.session_timeout)
        .bind(req.max_retry_count)
        .bind(req.is_active)
        .bind(extra)
        .bind(now())
        .bind(id)
        .fetch_optional(pool)
        .await
    }

    /// Removes the system together with its sessions and call logs.
    pub async fn delete(pool: &SqlitePool, id: i64) -> Result<bool, sqlx::Error> {
        let mut tx = pool.begin().await?;
        query("DELETE FROM external_system_logs WHERE system_id = ?")
            .bind(id)
            .execute(&mut *tx)
            .await?;
        query("DELETE FROM external_system_sessions WHERE system_id = ?")
            .bind(id)
            .execute(&mut *tx)
            .await?;
        let result = query("DELETE FROM external_systems WHERE id = ?")
            .bind(id)
            .execute(&mut *tx)
            .await?;
        tx.commit().await?;
        Ok(result.rows_affected() > 0)
    }

    pub async fn update_auth_status(
        pool: &SqlitePool,
        id: i64,
        status: AuthStatus,
        last_error: Option<&str>,
    ) -> Result<(), sqlx::Error> {
        let now = now();
        let login_time = (status == AuthStatus::Active).then(|| now.clone());

        query(
            "UPDATE external_systems SET
                auth_status = ?,
                last_login_time = COALESCE(?, last_login_time),
                last_error = COALESCE(?, last_error),
                updated_at = ?
             WHERE id = ?"
        )
        .bind(status.as_str())
        .bind(login_time)
        .bind(last_error)
        .bind(&now)
        .bind(id)
        .execute(pool)
        .await?;
        Ok(())
    }
}

pub struct SessionRepository;

impl SessionRepository {
    /// Most recent valid, unexpired session.
    pub async fn active(pool: &SqlitePool, system_id: i64) -> Result<Option<ExternalSystemSession>, sqlx::Error> {
        query_as::<_, ExternalSystemSession>(
            "SELECT * FROM external_system_sessions
             WHERE system_id = ? AND is_valid = 1 AND expires_at > ?
             ORDER BY id DESC LIMIT 1"
        )
        .bind(system_id)
        .bind(now())
        .fetch_optional(pool)
        .await
    }

    pub async fn create(
        pool: &SqlitePool,
        system_id: i64,
        token: &str,
        data: Option<&Value>,
        expires_at: &str,
    ) -> Result<ExternalSystemSession, sqlx::Error> {
        let now = now();
        query_as::<_, ExternalSystemSession>(
            "INSERT INTO external_system_sessions
                (system_id, session_token, session_data, is_valid, expires_at,
                 request_count, last_used_at, created_at, updated_at)
             VALUES (?, ?, ?, 1, ?, 0, ?, ?, ?)
             RETURNING *"
        )
        .bind(system_id)
        .bind(token)
        .bind(data.map(|v| v.to_string()))
        .bind(expires_at)
        .bind(&now)
        .bind(&now)
        .bind(&now)
        .fetch_one(pool)
        .await
    }

    pub async fn invalidate(pool: &SqlitePool, session_id: i64) -> Result<(), sqlx::Error> {
        query("UPDATE external_system_sessions SET is_valid = 0, updated_at = ? WHERE id = ?")
            .bind(now())
            .bind(session_id)
            .execute(pool)
            .await?;
        Ok(())
    }

    pub async fn invalidate_all(pool: &SqlitePool, system_id: i64) -> Result<(), sqlx::Error> {
        query("UPDATE external_system_sessions SET is_valid = 0, updated_at = ? WHERE system_id = ? AND is_valid = 1")
            .bind(now())
            .bind(system_id)
            .execute(pool)
            .await?;
        Ok(())
    }

    pub async fn record_use(pool: &SqlitePool, session_id: i64) -> Result<(), sqlx::Error> {
        let now = now();
        query(
            "UPDATE external_system_sessions
             SET request_count = request_count + 1, last_used_at = ?, updated_at = ?
             WHERE id = ?"
        )
        .bind(&now)
        .bind(&now)
        .bind(session_id)
        .execute(pool)
        .await?;
        Ok(())
    }

    /// Drops invalidated or expired sessions; returns the number removed.
    pub async fn purge_stale(pool: &SqlitePool) -> Result<u64, sqlx::Error> {
        let result = query("DELETE FROM external_system_sessions WHERE is_valid = 0 OR expires_at <= ?")
            .bind(now())
            .execute(pool)
            .await?;
        Ok(result.rows_affected())
    }
}

pub struct CallLogRepository;

impl CallLogRepository {
    pub async fn create(pool: &SqlitePool, log: NewCallLog) -> Result<(), sqlx::Error> {
        let response_data = log.response_data.as_ref().map(|v| truncate_payload(v).to_string());

        query(
            "INSERT INTO external_system_logs
                (system_id, operation, endpoint, request_method, request_data, response_status,
                 response_time, response_data, is_success, error_message, created_at)
             VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?)"
        )
        .bind(log.system_id)
        .bind(log.operation)
        .bind(&log.endpoint)
        .bind(&log.request_method)
        .bind(log.request_data.as_ref().map(|v| v.to_string()))
        .bind(log.response_status.map(i64::from))
        .bind(log.response_time_ms)
        .bind(response_data)
        .bind(log.is_success)
        .bind(&log.error_message)
        .bind(now())
        .execute(pool)
        .await?;
        Ok(())
    }

    pub async fn list(
        pool: &SqlitePool,
        system_id: i64,
        offset: i64,
        limit: i64,
    ) -> Result<Vec<ExternalSystemLog>, sqlx::Error> {
        query_as::<_, ExternalSystemLog>(
            "SELECT * FROM external_system_logs WHERE system_id = ?
             ORDER BY id DESC LIMIT ? OFFSET ?"
        )
        .bind(system_id)
        .bind(limit)
        .bind(offset)
        .fetch_all(pool)
        .await
    }

    pub async fn count(pool: &SqlitePool, system_id: i64) -> Result<i64, sqlx::Error> {
        query_scalar("SELECT COUNT(*) FROM external_system_logs WHERE system_id = ?")
            .bind(system_id)
            .fetch_one(pool)
            .await
    }

    pub async fn delete_before(pool: &SqlitePool, cutoff: &str) -> Result<u64, sqlx::Error> {
        let result = query("DELETE FROM external_system_logs WHERE created_at < ?")
            .bind(cutoff)
            .execute(pool)
            .await?;
        Ok(result.rows_affected())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn sample(name: &str) -> CreateExternalSystem {
        serde_json::from_value(json!({
            "name": name,
            "base_url": "http://remote.example",
            "username": "svc",
            "password": "pw",
            "extra_config": {"region": "eu"}
        }))
        .unwrap()
    }

    #[test]
    fn defaults_apply_on_create_payload() {
        let req = sample("crm");
        assert_eq!(req.auth_type, "username_password");
        assert_eq!(req.session_timeout, 3600);
        assert_eq!(req.max_retry_count, 3);
        assert!(req.is_active);
    }

    #[test]
    fn large_payloads_are_truncated() {
        let small = json!({"ok": true});
        assert_eq!(truncate_payload(&small), small);

        let big = json!({"blob": "x".repeat(2000)});
        let t = truncate_payload(&big);
        assert_eq!(t["truncated"], true);
        assert_eq!(t["size"], big.to_string().len());
    }

    #[tokio::test]
    async fn system_serialization_hides_password() {
        let pool = crate::db::memory().await.unwrap();
        let system = ExternalSystemRepository::create(&pool, &sample("crm")).await.unwrap();
        assert_eq!(system.auth_status, "inactive");
        assert_eq!(system.login_path(), "/login");

        let v = serde_json::to_value(&system).unwrap();
        assert!(v.get("password").is_none());
        assert_eq!(v["extra_config"]["region"], "eu");
    }

    #[tokio::test]
    async fn only_latest_valid_session_is_active() {
        let pool = crate::db::memory().await.unwrap();
        let system = ExternalSystemRepository::create(&pool, &sample("erp")).await.unwrap();

        let past = crate::db::timestamp(chrono::Utc::now() - chrono::Duration::seconds(10));
        let future = crate::db::timestamp(chrono::Utc::now() + chrono::Duration::seconds(600));

        SessionRepository::create(&pool, system.id, "expired", None, &past).await.unwrap();
        assert!(SessionRepository::active(&pool, system.id).await.unwrap().is_none());

        let live = SessionRepository::create(&pool, system.id, "live", None, &future).await.unwrap();
        let active = SessionRepository::active(&pool, system.id).await.unwrap().unwrap();
        assert_eq!(active.id, live.id);

        SessionRepository::record_use(&pool, live.id).await.unwrap();
        let active = SessionRepository::active(&pool, system.id).await.unwrap().unwrap();
        assert_eq!(active.request_count, 1);

        SessionRepository::invalidate_all(&pool, system.id).await.unwrap();
        assert!(SessionRepository::active(&pool, system.id).await.unwrap().is_none());
        assert_eq!(SessionRepository::purge_stale(&pool).await.unwrap(), 2);
    }

    #[tokio::test]
    async fn auth_status_transitions() {
        let pool = crate::db::memory().await.unwrap();
        let system = ExternalSystemRepository::create(&pool, &sample("hr")).await.unwrap();

        ExternalSystemRepository::update_auth_status(&pool, system.id, AuthStatus::Error, Some("boom"))
            .await
            .unwrap();
        let s = ExternalSystemRepository::get(&pool, system.id).await.unwrap().unwrap();
        assert_eq!(s.auth_status, "error");
        assert_eq!(s.last_error.as_deref(), Some("boom"));
        assert!(s.last_login_time.is_none());

        ExternalSystemRepository::update_auth_status(&pool, system.id, AuthStatus::Active, None)
            .await
            .unwrap();
        let s = ExternalSystemRepository::get(&pool, system.id).await.unwrap().unwrap();
        assert_eq!(s.auth_status, "active");
        assert!(s.last_login_time.is_some());
    }

    #[tokio::test]
    async fn delete_cascades_to_sessions_and_logs() {
        let pool = crate::db::memory().await.unwrap();
        let system = ExternalSystemRepository::create(&pool, &sample("billing")).await.unwrap();
        let future = crate::db::timestamp(chrono::Utc::now() + chrono::Duration::seconds(600));
        SessionRepository::create(&pool, system.id, "t", None, &future).await.unwrap();
        CallLogRepository::create(
            &pool,
            NewCallLog {
                system_id: system.id,
                operation: "api_call",
                endpoint: "/x".to_string(),
                request_method: "GET".to_string(),
                request_data: None,
                response_status: Some(200),
                response_time_ms: Some(5),
                response_data: Some(json!({"ok": true})),
                is_success: true,
                error_message: None,
            },
        )
        .await
        .unwrap();

        assert!(ExternalSystemRepository::delete(&pool, system.id).await.unwrap());
        assert!(CallLogRepository::list(&pool, system.id, 0, 10).await.unwrap().is_empty());
        assert!(!ExternalSystemRepository::delete(&pool, system.id).await.unwrap());
    }
}
