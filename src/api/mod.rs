use anyhow::Result;
use axum::Router;
use axum::http::{HeaderValue, Method, header};
use tower_http::cors::CorsLayer;
use tower_http::trace::TraceLayer;
use std::sync::Arc;
use std::time::{Duration, Instant};
use dashmap::DashMap;
use crate::config::Config;
use crate::db::DbPool;
use crate::external::ExternalSystemService;
use crate::metrics::ServiceMetrics;
use crate::monitoring::{Collector, PrometheusClient};
use crate::tasks::{TaskContext, TaskQueue};

pub mod router;
pub mod middleware;
pub mod handlers;
pub mod validators;

pub struct AppState {
    pub db: DbPool,
    pub service_name: String,
    pub jwt_secret: String,
    pub access_token_minutes: u64,
    pub refresh_token_minutes: u64,
    /// Login failure tracking: email -> (failure_count, window_start)
    pub login_attempts: DashMap<String, (u32, Instant)>,
    pub max_login_failures: u32,
    pub login_lockout: Duration,
    pub tasks: Arc<TaskQueue>,
    pub external: ExternalSystemService,
    pub prometheus: PrometheusClient,
    pub collector: Arc<Collector>,
    pub metrics: Arc<ServiceMetrics>,
}

/// Wire every service the API needs. Redis is optional; without it jobs run
/// inline.
pub async fn build_state(cfg: &Config, db: DbPool) -> Result<Arc<AppState>> {
    let metrics = Arc::new(ServiceMetrics::default());
    let collector = Arc::new(Collector::new(&cfg.collector, &cfg.pushgateway)?);

    let ctx = Arc::new(TaskContext {
        db: db.clone(),
        collector: collector.clone(),
        service_name: cfg.server.name.clone(),
        log_retention_days: cfg.tasks.log_retention_days,
    });
    let tasks = Arc::new(TaskQueue::connect(cfg.redis.url.as_deref(), ctx, metrics.clone()).await);

    Ok(Arc::new(AppState {
        external: ExternalSystemService::new(db.clone())?,
        prometheus: PrometheusClient::new(&cfg.prometheus)?,
        db,
        service_name: cfg.server.name.clone(),
        jwt_secret: cfg.auth.secret_key.clone(),
        access_token_minutes: cfg.auth.access_token_expire_minutes,
        refresh_token_minutes: cfg.auth.refresh_token_expire_minutes,
        login_attempts: DashMap::new(),
        max_login_failures: cfg.auth.max_login_failures,
        login_lockout: Duration::from_secs(cfg.auth.login_lockout_secs),
        tasks,
        collector,
        metrics,
    }))
}

pub async fn serve(cfg: &Config, state: Arc<AppState>) -> Result<()> {
    let bind_addr = format!("{}:{}", cfg.server.bind, cfg.server.port);
    let cors = build_cors_layer(&cfg.server.cors_allowed_origins);
    let app = build_app(state, cors);

    let listener = tokio::net::TcpListener::bind(&bind_addr).await?;
    tracing::info!("API listening on http://{}", bind_addr);

    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await?;
    Ok(())
}

pub async fn shutdown_signal() {
    if let Err(e) = tokio::signal::ctrl_c().await {
        tracing::error!("Failed to listen for shutdown signal: {}", e);
        std::future::pending::<()>().await;
    }
    tracing::info!("Shutdown signal received");
}

pub fn build_cors_layer(allowed_origins: &[String]) -> CorsLayer {
    let origins: Vec<HeaderValue> = allowed_origins
        .iter()
        .filter_map(|o| o.parse().ok())
        .collect();

    if origins.is_empty() {
        tracing::warn!("No valid CORS origins configured; CORS will block all cross-origin requests");
        return CorsLayer::new();
    }

    CorsLayer::new()
        .allow_origin(origins)
        .allow_methods([Method::GET, Method::POST, Method::PUT, Method::DELETE])
        .allow_headers([header::AUTHORIZATION, header::CONTENT_TYPE])
        .expose_headers([header::HeaderName::from_static("x-process-time")])
}

pub fn build_app(state: Arc<AppState>, cors: CorsLayer) -> Router {
    Router::new()
        .merge(router::routes(state.clone()))
        .layer(axum::middleware::from_fn_with_state(state, middleware::timing::track))
        .layer(TraceLayer::new_for_http())
        .layer(cors)
}
