use std::sync::Arc;
use std::time::Duration;
use tokio::task::JoinHandle;
use tracing::{error, info};

use super::{Task, TaskQueue};

const RETRY_AFTER: Duration = Duration::from_secs(60);

/// Enqueue third-party collection every `interval`. A failed run is retried
/// after a minute instead of waiting for the next full interval.
pub fn spawn(queue: Arc<TaskQueue>, interval: Duration) -> JoinHandle<()> {
    info!("Scheduling third-party metrics collection every {}s", interval.as_secs());
    tokio::spawn(async move {
        loop {
            tokio::time::sleep(interval).await;
            loop {
                let job_id = queue.enqueue(Task::CollectThirdPartyMetrics).await;
                if !job_id.starts_with("error_") {
                    info!("Periodic collection triggered: {}", job_id);
                    break;
                }
                error!("Periodic collection failed ({}); retrying in {}s", job_id, RETRY_AFTER.as_secs());
                tokio::time::sleep(RETRY_AFTER).await;
            }
        }
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::metrics::ServiceMetrics;

    #[tokio::test(start_paused = true)]
    async fn fires_after_each_interval() {
        let metrics = Arc::new(ServiceMetrics::default());
        // no sources: the job finishes without touching the network or the database
        let ctx = crate::tasks::TaskContext {
            db: sqlx::SqlitePool::connect_lazy("sqlite::memory:").unwrap(),
            collector: Arc::new(
                crate::monitoring::Collector::with_sources(Vec::new(), 1, &Default::default()).unwrap(),
            ),
            service_name: "opsdesk".to_string(),
            log_retention_days: 30,
        };
        let queue = Arc::new(TaskQueue::sync(Arc::new(ctx), metrics.clone()));

        let handle = spawn(queue, Duration::from_secs(300));
        tokio::time::sleep(Duration::from_secs(299)).await;
        assert_eq!(metrics.jobs_enqueued.load(std::sync::atomic::Ordering::Relaxed), 0);

        tokio::time::sleep(Duration::from_secs(302)).await;
        assert_eq!(metrics.jobs_enqueued.load(std::sync::atomic::Ordering::Relaxed), 2);
        handle.abort();
    }
}
