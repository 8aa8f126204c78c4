use anyhow::{Context, Result};
use std::sync::Arc;
use tracing::info;

use opsdesk::monitoring::Collector;
use opsdesk::tasks::worker::Worker;
use opsdesk::tasks::TaskContext;
use opsdesk::{api, config, db, logging};

#[tokio::main]
async fn main() -> Result<()> {
    let cfg = config::load()?;
    logging::init(&cfg.log)?;
    config::validate(&cfg)?;

    let url = cfg
        .redis
        .url
        .as_deref()
        .context("redis.url must be set to run a worker (OPSDESK__REDIS__URL)")?;

    let db_pool = db::init(&cfg).await?;
    let ctx = Arc::new(TaskContext {
        db: db_pool,
        collector: Arc::new(Collector::new(&cfg.collector, &cfg.pushgateway)?),
        service_name: cfg.server.name.clone(),
        log_retention_days: cfg.tasks.log_retention_days,
    });

    let worker = Worker::connect(url, ctx, cfg.tasks.clone()).await?;
    info!("Worker {} connected to Redis", worker.id());
    worker.run(api::shutdown_signal()).await
}
