use axum::{routing::{get, post, put}, Router};
use std::sync::Arc;
use super::AppState;
use super::handlers;

pub fn routes(state: Arc<AppState>) -> Router {
    Router::new()
        // Health and service metrics (public)
        .route("/", get(handlers::health::root))
        .route("/health", get(handlers::health::health_check))
        .route("/metrics", get(handlers::metrics::prometheus_metrics))
        // Auth (public)
        .route("/api/v1/auth/register", post(handlers::auth::register))
        .route("/api/v1/auth/login", post(handlers::auth::login))
        .route("/api/v1/auth/login-json", post(handlers::auth::login_json))
        .route("/api/v1/auth/refresh", post(handlers::auth::refresh))
        .route("/api/v1/auth/test-token", post(handlers::auth::test_token))
        // Users
        .route("/api/v1/users", get(handlers::users::list).post(handlers::users::create))
        .route("/api/v1/users/me", get(handlers::users::me).put(handlers::users::update_me))
        .route("/api/v1/users/me/password", post(handlers::users::change_password))
        .route("/api/v1/users/{id}", get(handlers::users::get).put(handlers::users::update))
        .route("/api/v1/users/{id}/activate", post(handlers::users::activate))
        .route("/api/v1/users/{id}/deactivate", post(handlers::users::deactivate))
        // Items
        .route("/api/v1/items", get(handlers::items::list).post(handlers::items::create))
        .route(
            "/api/v1/items/{id}",
            get(handlers::items::get).put(handlers::items::update).delete(handlers::items::delete),
        )
        // External systems: `{system}` is the numeric id for CRUD and logs,
        // the system name for authenticate/status/call.
        .route(
            "/api/v1/external-systems",
            get(handlers::external_systems::list).post(handlers::external_systems::create),
        )
        .route("/api/v1/external-systems/status", get(handlers::external_systems::status_all))
        .route("/api/v1/external-systems/authenticate-all", post(handlers::external_systems::authenticate_all))
        .route(
            "/api/v1/external-systems/{system}",
            get(handlers::external_systems::get)
                .put(handlers::external_systems::update)
                .delete(handlers::external_systems::delete),
        )
        .route("/api/v1/external-systems/{system}/authenticate", post(handlers::external_systems::authenticate))
        .route("/api/v1/external-systems/{system}/status", get(handlers::external_systems::status))
        .route("/api/v1/external-systems/{system}/call", post(handlers::external_systems::call))
        .route("/api/v1/external-systems/{system}/logs", get(handlers::external_systems::logs))
        // Background jobs
        .route("/api/v1/tasks/reports/generate", post(handlers::tasks::generate_report))
        .route("/api/v1/tasks/notifications/batch", post(handlers::tasks::batch_notifications))
        .route("/api/v1/tasks/maintenance/cleanup", post(handlers::tasks::cleanup))
        .route("/api/v1/tasks/jobs/recent", get(handlers::tasks::recent_jobs))
        .route("/api/v1/tasks/jobs/{job_id}/status", get(handlers::tasks::job_status))
        .route("/api/v1/tasks/queue/info", get(handlers::tasks::queue_info))
        // Prometheus
        .route("/api/v1/prometheus/health", get(handlers::prometheus::health))
        .route(
            "/api/v1/prometheus/query",
            get(handlers::prometheus::query_get).post(handlers::prometheus::query_post),
        )
        .route(
            "/api/v1/prometheus/query_range",
            get(handlers::prometheus::query_range_get).post(handlers::prometheus::query_range_post),
        )
        .route("/api/v1/prometheus/metrics", get(handlers::prometheus::metrics))
        .route("/api/v1/prometheus/targets", get(handlers::prometheus::targets))
        .route("/api/v1/prometheus/application_metrics", get(handlers::prometheus::application_metrics))
        .route("/api/v1/prometheus/system_metrics", get(handlers::prometheus::system_metrics))
        .route("/api/v1/prometheus/quick/{kind}", get(handlers::prometheus::quick))
        // Third-party collection
        .route("/api/v1/third-party/collect", post(handlers::third_party::collect))
        .route("/api/v1/third-party/collect/{api_name}", post(handlers::third_party::collect_one))
        .route("/api/v1/third-party/config", get(handlers::third_party::config))
        .route("/api/v1/third-party/config/{api_name}/enable", put(handlers::third_party::enable))
        .route("/api/v1/third-party/config/{api_name}/disable", put(handlers::third_party::disable))
        .route("/api/v1/third-party/status", get(handlers::third_party::status))
        .with_state(state)
}
