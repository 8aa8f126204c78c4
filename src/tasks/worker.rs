use anyhow::{Context, Result};
use chrono::Utc;
use redis::aio::{ConnectionManager, MultiplexedConnection};
use redis::{AsyncCommands, RedisResult};
use std::future::Future;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{OwnedSemaphorePermit, Semaphore};
use tracing::{error, info, warn};

use super::queue::{job_key, QUEUE_KEY, WORKER_KEY_PREFIX};
use super::{run, Task, TaskContext};
use crate::config::TaskConfig;
use crate::db::timestamp;

const HEARTBEAT_EVERY: Duration = Duration::from_secs(10);
const HEARTBEAT_TTL_SECS: u64 = 30;
/// `BRPOP` timeout; bounds how long shutdown waits for an idle worker.
const POP_TIMEOUT_SECS: f64 = 1.0;

/// Pulls jobs off the Redis queue and runs them with bounded concurrency.
pub struct Worker {
    id: String,
    client: redis::Client,
    conn: ConnectionManager,
    ctx: Arc<TaskContext>,
    cfg: TaskConfig,
}

impl Worker {
    pub async fn connect(url: &str, ctx: Arc<TaskContext>, cfg: TaskConfig) -> Result<Self> {
        let client = redis::Client::open(url).context("Invalid Redis URL")?;
        let conn = ConnectionManager::new(client.clone())
            .await
            .context("Failed to connect to Redis")?;
        let id = uuid::Uuid::new_v4().simple().to_string();
        Ok(Self { id, client, conn, ctx, cfg })
    }

    pub fn id(&self) -> &str {
        &self.id
    }

    /// Run until `shutdown` resolves, then wait for in-flight jobs.
    pub async fn run(self, shutdown: impl Future<Output = ()>) -> Result<()> {
        info!(
            worker = %self.id,
            max_jobs = self.cfg.max_jobs,
            job_timeout_secs = self.cfg.job_timeout_secs,
            "Worker starting"
        );

        let heartbeat = tokio::spawn(heartbeat(self.conn.clone(), self.id.clone()));

        // BRPOP blocks its connection, so it gets one of its own.
        let mut pop_conn = self
            .client
            .get_multiplexed_async_connection()
            .await
            .context("Failed to open Redis connection for polling")?;

        let permits = Arc::new(Semaphore::new(self.cfg.max_jobs));
        poll_jobs(&mut pop_conn, shutdown, permits.clone(), |job_id, permit| {
            let conn = self.conn.clone();
            let ctx = self.ctx.clone();
            let cfg = self.cfg.clone();
            tokio::spawn(async move {
                execute(conn, ctx, &cfg, &job_id).await;
                drop(permit);
            });
        })
        .await?;

        info!(worker = %self.id, "Worker shutting down; waiting for running jobs");
        let _ = permits.acquire_many(self.cfg.max_jobs as u32).await;
        heartbeat.abort();

        let mut conn = self.conn.clone();
        let _: redis::RedisResult<()> = conn.del(format!("{}{}", WORKER_KEY_PREFIX, self.id)).await;
        Ok(())
    }
}

/// Where the poll loop takes job ids from.
trait JobSource {
    async fn next_job(&mut self) -> RedisResult<Option<String>>;
}

impl JobSource for MultiplexedConnection {
    async fn next_job(&mut self) -> RedisResult<Option<String>> {
        let popped: Option<(String, String)> = self.brpop(QUEUE_KEY, POP_TIMEOUT_SECS).await?;
        Ok(popped.map(|(_, job_id)| job_id))
    }
}

/// Hand popped job ids to `dispatch` until `shutdown` resolves.
///
/// Shutdown is checked before each pop. Once a pop is issued it is awaited
/// to completion: Redis has already removed the id from the queue, so the
/// reply is the only copy of it.
async fn poll_jobs<S, F>(
    source: &mut S,
    shutdown: impl Future<Output = ()>,
    permits: Arc<Semaphore>,
    mut dispatch: F,
) -> Result<()>
where
    S: JobSource,
    F: FnMut(String, OwnedSemaphorePermit),
{
    tokio::pin!(shutdown);

    loop {
        let permit = tokio::select! {
            biased;
            _ = &mut shutdown => return Ok(()),
            permit = permits.clone().acquire_owned() => permit?,
        };

        let pop = source.next_job();
        tokio::pin!(pop);
        let (popped, stopping) = tokio::select! {
            biased;
            popped = &mut pop => (popped, false),
            _ = &mut shutdown => ((&mut pop).await, true),
        };

        match popped {
            Ok(Some(job_id)) => dispatch(job_id, permit),
            Ok(None) => {}
            Err(e) => {
                error!("Queue poll failed: {}", e);
                if !stopping {
                    tokio::time::sleep(Duration::from_secs(1)).await;
                }
            }
        }

        if stopping {
            return Ok(());
        }
    }
}

async fn heartbeat(mut conn: ConnectionManager, id: String) {
    let key = format!("{}{}", WORKER_KEY_PREFIX, id);
    loop {
        let beat: redis::RedisResult<()> = conn.set_ex(&key, timestamp(Utc::now()), HEARTBEAT_TTL_SECS).await;
        if let Err(e) = beat {
            warn!("Worker heartbeat failed: {}", e);
        }
        tokio::time::sleep(HEARTBEAT_EVERY).await;
    }
}

/// Run one job and record the outcome in its hash.
async fn execute(mut conn: ConnectionManager, ctx: Arc<TaskContext>, cfg: &TaskConfig, job_id: &str) {
    let key = job_key(job_id);

    let fields: Result<(Option<String>, Option<String>), _> = redis::cmd("HMGET")
        .arg(&key)
        .arg("function")
        .arg("args")
        .query_async(&mut conn)
        .await;

    let (function, args) = match fields {
        Ok((Some(function), args)) => (function, args.unwrap_or_default()),
        Ok((None, _)) => {
            warn!("Job {} has no hash; skipping", job_id);
            return;
        }
        Err(e) => {
            error!("Failed to load job {}: {}", job_id, e);
            return;
        }
    };

    let started: redis::RedisResult<()> = conn
        .hset_multiple(&key, &[("status", "in_progress".to_string()), ("start_time", timestamp(Utc::now()))])
        .await;
    if let Err(e) = started {
        warn!("Failed to mark job {} as started: {}", job_id, e);
    }

    let outcome = match Task::decode(&function, &args) {
        Ok(task) => {
            info!(job = %job_id, function = %function, "Running job");
            match tokio::time::timeout(Duration::from_secs(cfg.job_timeout_secs), run(&ctx, task)).await {
                Ok(Ok(result)) => Ok(result),
                Ok(Err(e)) => Err(e.to_string()),
                Err(_) => Err(format!("Timed out after {}s", cfg.job_timeout_secs)),
            }
        }
        Err(e) => Err(e.to_string()),
    };

    let (status, result) = match outcome {
        Ok(result) => {
            info!(job = %job_id, "Job completed: {}", result);
            ("completed", result)
        }
        Err(message) => {
            error!(job = %job_id, "Job failed: {}", message);
            ("failed", message)
        }
    };

    let finished: redis::RedisResult<()> = redis::pipe()
        .hset_multiple(
            &key,
            &[
                ("status", status.to_string()),
                ("result", result),
                ("finish_time", timestamp(Utc::now())),
            ],
        )
        .ignore()
        .expire(&key, cfg.keep_result_secs as i64)
        .ignore()
        .query_async(&mut conn)
        .await;
    if let Err(e) = finished {
        error!("Failed to record result of job {}: {}", job_id, e);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::VecDeque;

    /// Answers each pop after `delay` with the next scripted reply.
    struct Scripted {
        replies: VecDeque<Option<String>>,
        delay: Duration,
        pops: usize,
    }

    impl Scripted {
        fn new(replies: &[Option<&str>], delay: Duration) -> Self {
            Self {
                replies: replies.iter().map(|r| r.map(str::to_string)).collect(),
                delay,
                pops: 0,
            }
        }
    }

    impl JobSource for Scripted {
        async fn next_job(&mut self) -> RedisResult<Option<String>> {
            self.pops += 1;
            tokio::time::sleep(self.delay).await;
            Ok(self.replies.pop_front().flatten())
        }
    }

    #[tokio::test(start_paused = true)]
    async fn shutdown_during_a_pop_still_dispatches_its_job() {
        let mut source = Scripted::new(&[Some("job-1"), Some("job-2")], Duration::from_millis(500));
        let mut dispatched = Vec::new();

        poll_jobs(
            &mut source,
            tokio::time::sleep(Duration::from_millis(100)),
            Arc::new(Semaphore::new(4)),
            |job_id, _permit| dispatched.push(job_id),
        )
        .await
        .unwrap();

        assert_eq!(dispatched, ["job-1"]);
        assert_eq!(source.pops, 1);
    }

    #[tokio::test(start_paused = true)]
    async fn no_pop_is_issued_after_shutdown() {
        let mut source = Scripted::new(&[Some("job-1")], Duration::from_millis(500));
        let mut dispatched = Vec::new();

        poll_jobs(&mut source, std::future::ready(()), Arc::new(Semaphore::new(4)), |job_id, _permit| {
            dispatched.push(job_id)
        })
        .await
        .unwrap();

        assert!(dispatched.is_empty());
        assert_eq!(source.pops, 0);
    }

    #[tokio::test(start_paused = true)]
    async fn empty_pops_keep_polling_until_shutdown() {
        let mut source = Scripted::new(&[None, None, Some("job-3")], Duration::from_secs(1));
        let mut dispatched = Vec::new();

        poll_jobs(
            &mut source,
            tokio::time::sleep(Duration::from_millis(3500)),
            Arc::new(Semaphore::new(4)),
            |job_id, _permit| dispatched.push(job_id),
        )
        .await
        .unwrap();

        assert_eq!(dispatched, ["job-3"]);
        assert_eq!(source.pops, 4);
    }
}
