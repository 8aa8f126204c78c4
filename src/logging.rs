use anyhow::Result;
use tracing_subscriber::EnvFilter;

use crate::config::LogConfig;

/// `RUST_LOG` wins; otherwise the crate logs at `log.level` and everything
/// else at `warn`.
pub fn filter(cfg: &LogConfig) -> Result<EnvFilter> {
    let default = format!("warn,opsdesk={},tower_http={}", cfg.level, cfg.level);
    Ok(EnvFilter::try_from_default_env().or_else(|_| EnvFilter::try_new(default))?)
}

pub fn init(cfg: &LogConfig) -> Result<()> {
    let builder = tracing_subscriber::fmt().with_env_filter(filter(cfg)?);
    let installed = if cfg.format == "json" {
        builder.json().try_init()
    } else {
        builder.try_init()
    };
    installed.map_err(|e| anyhow::anyhow!("Failed to install tracing subscriber: {}", e))
}
