use anyhow::Result;
use std::time::Duration;
use tracing::info;

use opsdesk::{api, config, db, logging, tasks};

#[tokio::main]
async fn main() -> Result<()> {
    let cfg = config::load()?;
    logging::init(&cfg.log)?;
    config::validate(&cfg)?;

    info!("Starting {} v{} ({})", cfg.server.name, env!("CARGO_PKG_VERSION"), cfg.server.environment);

    let db_pool = db::init(&cfg).await?;
    info!("Database initialized");

    // Seed the initial superuser if the users table is empty
    db::seed_superuser(&db_pool, &cfg).await?;

    let state = api::build_state(&cfg, db_pool).await?;

    if cfg.collector.enabled {
        tasks::scheduler::spawn(state.tasks.clone(), Duration::from_secs(cfg.collector.interval_secs));
    }

    api::serve(&cfg, state).await
}
