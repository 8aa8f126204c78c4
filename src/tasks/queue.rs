use chrono::Utc;
use redis::aio::ConnectionManager;
use redis::AsyncCommands;
use serde::Serialize;
use std::collections::HashMap;
use std::sync::Arc;
use tracing::{error, info, warn};

use super::{run, Task, TaskContext};
use crate::metrics::ServiceMetrics;

pub const QUEUE_KEY: &str = "opsdesk:queue";
pub const RECENT_KEY: &str = "opsdesk:jobs:recent";
pub const WORKER_KEY_PREFIX: &str = "opsdesk:worker:";
const RECENT_MAX: isize = 200;

/// Returned instead of a job id when the task ran inline.
pub const SYNC_EXECUTION: &str = "sync_execution";
pub const ERROR_NOT_FOUND: &str = "error_not_found";
pub const ERROR_EXECUTION: &str = "error_execution";

pub fn job_key(id: &str) -> String {
    format!("opsdesk:job:{}", id)
}

#[derive(Debug, Clone, Serialize, PartialEq)]
pub struct JobStatus {
    pub job_id: String,
    pub status: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub function: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub result: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub message: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub enqueue_time: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub start_time: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub finish_time: Option<String>,
}

impl JobStatus {
    fn simple(job_id: &str, status: &str) -> Self {
        Self {
            job_id: job_id.to_string(),
            status: status.to_string(),
            function: None,
            result: None,
            message: None,
            enqueue_time: None,
            start_time: None,
            finish_time: None,
        }
    }

    fn from_hash(job_id: &str, mut hash: HashMap<String, String>) -> Self {
        Self {
            job_id: job_id.to_string(),
            status: hash.remove("status").unwrap_or_default(),
            function: hash.remove("function"),
            result: hash.remove("result"),
            message: None,
            enqueue_time: hash.remove("enqueue_time"),
            start_time: hash.remove("start_time"),
            finish_time: hash.remove("finish_time"),
        }
    }

    pub fn is_not_found(&self) -> bool {
        self.status == "not_found"
    }
}

#[derive(Debug, Serialize)]
pub struct QueueInfo {
    pub queue_length: i64,
    pub active_workers: usize,
    pub redis_connected: bool,
    pub mode: &'static str,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

/// Job queue backed by Redis, degrading to inline execution without it.
pub struct TaskQueue {
    redis: Option<ConnectionManager>,
    ctx: Arc<TaskContext>,
    metrics: Arc<ServiceMetrics>,
}

impl TaskQueue {
    /// Connect to Redis if a URL is given. Connection failures are logged
    /// and leave the queue in synchronous mode.
    pub async fn connect(url: Option<&str>, ctx: Arc<TaskContext>, metrics: Arc<ServiceMetrics>) -> Self {
        let redis = match url {
            Some(url) => match open(url).await {
                Ok(conn) => {
                    info!("Task queue connected to Redis");
                    Some(conn)
                }
                Err(e) => {
                    warn!("Task queue initialization failed: {}; tasks will run synchronously", e);
                    None
                }
            },
            None => {
                info!("No Redis configured; tasks will run synchronously");
                None
            }
        };
        Self { redis, ctx, metrics }
    }

    pub fn sync(ctx: Arc<TaskContext>, metrics: Arc<ServiceMetrics>) -> Self {
        Self { redis: None, ctx, metrics }
    }

    pub fn is_async(&self) -> bool {
        self.redis.is_some()
    }

    /// Queue a task and return its job id, or run it inline and return one
    /// of the synthetic ids.
    pub async fn enqueue(&self, task: Task) -> String {
        self.metrics.inc_enqueued();

        if let Some(conn) = &self.redis {
            match push(conn.clone(), &task).await {
                Ok(id) => {
                    info!("Enqueued {} as job {}", task.name(), id);
                    return id;
                }
                Err(e) => error!("Failed to enqueue {}: {}; running synchronously", task.name(), e),
            }
        }

        self.run_inline(task).await
    }

    async fn run_inline(&self, task: Task) -> String {
        let name = task.name();
        info!("Executing task synchronously: {}", name);
        match run(&self.ctx, task).await {
            Ok(result) => {
                info!("Task {} completed: {}", name, result);
                self.metrics.inc_completed();
                SYNC_EXECUTION.to_string()
            }
            Err(e) => {
                error!("Task {} failed: {}", name, e);
                self.metrics.inc_failed();
                ERROR_EXECUTION.to_string()
            }
        }
    }

    pub async fn job_status(&self, job_id: &str) -> JobStatus {
        if job_id == SYNC_EXECUTION {
            return JobStatus {
                result: Some("Executed synchronously".to_string()),
                message: Some("Task was executed synchronously because the queue is unavailable".to_string()),
                ..JobStatus::simple(job_id, "completed")
            };
        }
        if job_id.starts_with("error_") {
            return JobStatus {
                result: Some("Task execution failed".to_string()),
                message: Some("Task failed during synchronous execution".to_string()),
                ..JobStatus::simple(job_id, "failed")
            };
        }

        let Some(conn) = &self.redis else {
            return JobStatus {
                message: Some("Task queue not available".to_string()),
                ..JobStatus::simple(job_id, "unavailable")
            };
        };

        let mut conn = conn.clone();
        match conn.hgetall::<_, HashMap<String, String>>(job_key(job_id)).await {
            Ok(hash) if !hash.is_empty() => JobStatus::from_hash(job_id, hash),
            Ok(_) => JobStatus::simple(job_id, "not_found"),
            Err(e) => JobStatus {
                message: Some(format!("Task queue error: {}", e)),
                ..JobStatus::simple(job_id, "unavailable")
            },
        }
    }

    pub async fn queue_info(&self) -> QueueInfo {
        let sync = |error: Option<String>| QueueInfo {
            queue_length: 0,
            active_workers: 0,
            redis_connected: false,
            mode: "sync_fallback",
            error,
        };

        let Some(conn) = &self.redis else {
            return sync(None);
        };

        let mut conn = conn.clone();
        let length = conn.llen::<_, i64>(QUEUE_KEY).await;
        let workers = conn.keys::<_, Vec<String>>(format!("{}*", WORKER_KEY_PREFIX)).await;
        match (length, workers) {
            (Ok(queue_length), Ok(workers)) => QueueInfo {
                queue_length,
                active_workers: workers.len(),
                redis_connected: true,
                mode: "async",
                error: None,
            },
            (Err(e), _) | (_, Err(e)) => sync(Some(e.to_string())),
        }
    }

    /// Most recently enqueued jobs, newest first. `limit` is capped at 50.
    pub async fn recent_jobs(&self, limit: usize) -> Vec<JobStatus> {
        let limit = limit.clamp(1, 50);

        let Some(conn) = &self.redis else {
            return vec![JobStatus {
                function: Some("Task queue in sync mode".to_string()),
                message: Some("Redis not available, tasks execute synchronously".to_string()),
                ..JobStatus::simple("sync_mode", "info")
            }];
        };

        let mut conn = conn.clone();
        let ids = match conn.lrange::<_, Vec<String>>(RECENT_KEY, 0, limit as isize - 1).await {
            Ok(ids) => ids,
            Err(e) => {
                warn!("Failed to read recent jobs: {}", e);
                return Vec::new();
            }
        };

        let mut jobs = Vec::with_capacity(ids.len());
        for id in ids {
            if let Ok(hash) = conn.hgetall::<_, HashMap<String, String>>(job_key(&id)).await {
                if !hash.is_empty() {
                    jobs.push(JobStatus::from_hash(&id, hash));
                }
            }
        }
        jobs
    }
}

pub async fn open(url: &str) -> redis::RedisResult<ConnectionManager> {
    let client = redis::Client::open(url)?;
    // The manager retries its first connect with backoff; try once so an
    // unreachable server fails fast.
    client.get_multiplexed_async_connection().await?;
    ConnectionManager::new(client).await
}

async fn push(mut conn: ConnectionManager, task: &Task) -> redis::RedisResult<String> {
    let id = uuid::Uuid::new_v4().simple().to_string();
    let key = job_key(&id);
    let fields = [
        ("function", task.name().to_string()),
        ("args", task.args().to_string()),
        ("status", "queued".to_string()),
        ("enqueue_time", crate::db::timestamp(Utc::now())),
    ];

    redis::pipe()
        .atomic()
        .hset_multiple(&key, &fields)
        .ignore()
        .lpush(QUEUE_KEY, &id)
        .ignore()
        .lpush(RECENT_KEY, &id)
        .ignore()
        .ltrim(RECENT_KEY, 0, RECENT_MAX - 1)
        .ignore()
        .query_async::<()>(&mut conn)
        .await?;

    Ok(id)
}

#[cfg(test)]
mod tests {
    use super::*;

    async fn queue() -> TaskQueue {
        let ctx = Arc::new(crate::tasks::tests::context().await);
        TaskQueue::sync(ctx, Arc::new(ServiceMetrics::default()))
    }

    #[tokio::test]
    async fn sync_mode_runs_inline() {
        let q = queue().await;
        assert!(!q.is_async());

        let id = q.enqueue(Task::CleanupOldData).await;
        assert_eq!(id, SYNC_EXECUTION);

        let id = q.enqueue(Task::ProcessItem { item_id: 12345 }).await;
        assert_eq!(id, ERROR_EXECUTION);

        assert_eq!(q.metrics.jobs_completed.load(std::sync::atomic::Ordering::Relaxed), 1);
        assert_eq!(q.metrics.jobs_failed.load(std::sync::atomic::Ordering::Relaxed), 1);
    }

    #[tokio::test]
    async fn synthetic_job_statuses() {
        let q = queue().await;
        assert_eq!(q.job_status(SYNC_EXECUTION).await.status, "completed");
        assert_eq!(q.job_status(ERROR_NOT_FOUND).await.status, "failed");
        assert_eq!(q.job_status(ERROR_EXECUTION).await.status, "failed");
        assert_eq!(q.job_status("abc123").await.status, "unavailable");
    }

    #[tokio::test]
    async fn info_and_recent_in_sync_mode() {
        let q = queue().await;
        let info = q.queue_info().await;
        assert_eq!(info.mode, "sync_fallback");
        assert!(!info.redis_connected);

        let recent = q.recent_jobs(10).await;
        assert_eq!(recent.len(), 1);
        assert_eq!(recent[0].job_id, "sync_mode");
    }

    #[tokio::test]
    async fn unreachable_redis_falls_back() {
        let ctx = Arc::new(crate::tasks::tests::context().await);
        let q = TaskQueue::connect(Some("redis://127.0.0.1:1/"), ctx, Arc::new(ServiceMetrics::default())).await;
        assert!(!q.is_async());
    }
}
