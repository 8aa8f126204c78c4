use anyhow::Result;
use serde::Deserialize;
use std::collections::BTreeMap;

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct Config {
    pub server: ServerConfig,
    pub log: LogConfig,
    pub database: DatabaseConfig,
    pub auth: AuthConfig,
    pub superuser: SuperuserConfig,
    pub redis: RedisConfig,
    pub tasks: TaskConfig,
    pub prometheus: PrometheusConfig,
    pub pushgateway: PushgatewayConfig,
    pub collector: CollectorConfig,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct ServerConfig {
    pub name: String,
    pub bind: String,
    pub port: u16,
    /// development, staging, production
    pub environment: String,
    /// Set OPSDESK__SERVER__CORS_ALLOWED_ORIGINS in production.
    pub cors_allowed_origins: Vec<String>,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            name: "opsdesk".to_string(),
            bind: "127.0.0.1".to_string(),
            port: 8000,
            environment: "development".to_string(),
            cors_allowed_origins: vec![
                "http://localhost:3000".to_string(),
                "http://localhost:8080".to_string(),
            ],
        }
    }
}

impl ServerConfig {
    pub fn is_production(&self) -> bool {
        self.environment == "production"
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct LogConfig {
    pub level: String,
    /// "text" or "json"
    pub format: String,
}

impl Default for LogConfig {
    fn default() -> Self {
        Self { level: "info".to_string(), format: "text".to_string() }
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct DatabaseConfig {
    pub path: String,
    pub max_connections: u32,
}

impl Default for DatabaseConfig {
    fn default() -> Self {
        Self { path: "./opsdesk.db".to_string(), max_connections: 20 }
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct AuthConfig {
    pub secret_key: String,
    pub access_token_expire_minutes: u64,
    pub refresh_token_expire_minutes: u64,
    pub max_login_failures: u32,
    pub login_lockout_secs: u64,
}

impl Default for AuthConfig {
    fn default() -> Self {
        Self {
            secret_key: DEFAULT_SECRET_KEY.to_string(),
            access_token_expire_minutes: 60 * 24 * 8,
            refresh_token_expire_minutes: 60 * 24 * 30,
            max_login_failures: 5,
            login_lockout_secs: 300,
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct SuperuserConfig {
    pub email: String,
    pub password: String,
}

impl Default for SuperuserConfig {
    fn default() -> Self {
        Self { email: "admin@example.com".to_string(), password: "admin123".to_string() }
    }
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct RedisConfig {
    /// When unset, jobs run inline in the API process.
    pub url: Option<String>,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct TaskConfig {
    pub max_jobs: usize,
    pub job_timeout_secs: u64,
    pub keep_result_secs: u64,
    pub log_retention_days: i64,
}

impl Default for TaskConfig {
    fn default() -> Self {
        Self { max_jobs: 10, job_timeout_secs: 300, keep_result_secs: 3600, log_retention_days: 30 }
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct PrometheusConfig {
    pub url: String,
    pub query_timeout_secs: u64,
}

impl Default for PrometheusConfig {
    fn default() -> Self {
        Self { url: "http://localhost:9091".to_string(), query_timeout_secs: 30 }
    }
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct PushgatewayConfig {
    /// Metrics are only pushed when a gateway URL is configured.
    pub url: Option<String>,
    pub username: Option<String>,
    pub password: Option<String>,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct CollectorConfig {
    /// Enables the periodic collection schedule; manual triggers always work.
    pub enabled: bool,
    pub interval_secs: u64,
    pub request_timeout_secs: u64,
    /// Empty means the built-in sample set.
    pub apis: Vec<ApiSourceConfig>,
}

impl Default for CollectorConfig {
    fn default() -> Self {
        Self { enabled: false, interval_secs: 300, request_timeout_secs: 30, apis: Vec::new() }
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct ApiSourceConfig {
    pub name: String,
    pub url: String,
    #[serde(default)]
    pub params: BTreeMap<String, String>,
    #[serde(default = "default_api_interval")]
    pub interval_secs: u64,
    #[serde(default)]
    pub enabled: bool,
}

fn default_api_interval() -> u64 { 300 }

pub const DEFAULT_SECRET_KEY: &str = "change-me-in-production";

const MAX_LOG_RETENTION_DAYS: i64 = 36_500;

pub fn validate(cfg: &Config) -> Result<()> {
    if cfg.server.is_production() {
        if cfg.auth.secret_key == DEFAULT_SECRET_KEY {
            anyhow::bail!(
                "SECURITY ERROR: secret key must be changed from default value '{}'. \
                Set OPSDESK__AUTH__SECRET_KEY environment variable with a strong random value.",
                DEFAULT_SECRET_KEY
            );
        }

        if cfg.auth.secret_key.len() < 32 {
            anyhow::bail!(
                "CONFIG ERROR: secret key must be at least 32 characters (current: {})",
                cfg.auth.secret_key.len()
            );
        }
    } else if cfg.auth.secret_key == DEFAULT_SECRET_KEY {
        tracing::warn!("Using the default secret key; set OPSDESK__AUTH__SECRET_KEY before deploying");
    }

    if cfg.auth.access_token_expire_minutes == 0 || cfg.auth.refresh_token_expire_minutes == 0 {
        anyhow::bail!("CONFIG ERROR: token lifetimes must be greater than zero");
    }

    if cfg.tasks.max_jobs == 0 || cfg.tasks.job_timeout_secs == 0 {
        anyhow::bail!("CONFIG ERROR: tasks.max_jobs and tasks.job_timeout_secs must be greater than zero");
    }

    if !(1..=MAX_LOG_RETENTION_DAYS).contains(&cfg.tasks.log_retention_days) {
        anyhow::bail!(
            "CONFIG ERROR: tasks.log_retention_days must be between 1 and {} (current: {})",
            MAX_LOG_RETENTION_DAYS,
            cfg.tasks.log_retention_days
        );
    }

    if cfg.collector.interval_secs == 0 {
        anyhow::bail!("CONFIG ERROR: collector.interval_secs must be greater than zero");
    }

    if cfg.prometheus.query_timeout_secs == 0 {
        anyhow::bail!("CONFIG ERROR: prometheus.query_timeout_secs must be greater than zero");
    }

    if cfg.database.path != ":memory:" {
        if let Some(parent) = std::path::Path::new(&cfg.database.path).parent() {
            if !parent.as_os_str().is_empty() && !parent.exists() {
                anyhow::bail!(
                    "CONFIG ERROR: Database directory does not exist: {}",
                    parent.display()
                );
            }
        }
    }

    tracing::info!("Configuration validation passed");
    Ok(())
}

/// Read `config.*` and `OPSDESK__*` variables. Call [`validate`] once
/// logging is up.
pub fn load() -> Result<Config> {
    let cfg: Config = config::Config::builder()
        .add_source(config::File::with_name("config").required(false))
        .add_source(
            config::Environment::with_prefix("OPSDESK")
                .separator("__")
                .list_separator(",")
                .with_list_parse_key("server.cors_allowed_origins")
                .try_parsing(true),
        )
        .build()?
        .try_deserialize()?;

    Ok(cfg)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_pass_validation_outside_production() {
        let cfg = Config::default();
        assert!(validate(&cfg).is_ok());
        assert_eq!(cfg.auth.access_token_expire_minutes, 11520);
        assert_eq!(cfg.prometheus.url, "http://localhost:9091");
    }

    #[test]
    fn production_rejects_default_secret() {
        let mut cfg = Config::default();
        cfg.server.environment = "production".to_string();
        assert!(validate(&cfg).is_err());
    }

    #[test]
    fn production_rejects_short_secret() {
        let mut cfg = Config::default();
        cfg.server.environment = "production".to_string();
        cfg.auth.secret_key = "too-short".to_string();
        assert!(validate(&cfg).is_err());

        cfg.auth.secret_key = "a-sufficiently-long-secret-key-for-tests".to_string();
        assert!(validate(&cfg).is_ok());
    }

    #[test]
    fn zero_timeouts_are_rejected() {
        let mut cfg = Config::default();
        cfg.tasks.job_timeout_secs = 0;
        assert!(validate(&cfg).is_err());
    }

    #[test]
    fn zero_collector_interval_is_rejected() {
        let mut cfg = Config::default();
        cfg.collector.interval_secs = 0;
        assert!(validate(&cfg).is_err());
    }

    #[test]
    fn log_retention_must_be_in_range() {
        for days in [0, -1, 36_501, i64::MAX] {
            let mut cfg = Config::default();
            cfg.tasks.log_retention_days = days;
            assert!(validate(&cfg).is_err(), "{} days accepted", days);
        }

        let mut cfg = Config::default();
        cfg.tasks.log_retention_days = 36_500;
        assert!(validate(&cfg).is_ok());
    }
}
