use axum::{
    extract::{Path, Query, State},
    Json,
};
use serde::Deserialize;
use serde_json::{json, Value};
use std::sync::Arc;

use crate::api::middleware::auth::AuthUser;
use crate::api::middleware::superuser::SuperUser;
use crate::api::validators::{EmailValidator, Validator};
use crate::api::AppState;
use crate::error::{AppError, AppResult};
use crate::tasks::queue::{JobStatus, QueueInfo, SYNC_EXECUTION};
use crate::tasks::{Task, MAX_BATCH_RECIPIENTS, REPORT_TYPES};

const DEFAULT_RECENT_JOBS: usize = 10;

#[derive(Debug, Deserialize)]
pub struct ReportQuery {
    pub report_type: String,
}

#[derive(Debug, Deserialize)]
pub struct BatchNotificationRequest {
    pub message: String,
    pub user_emails: Vec<String>,
}

#[derive(Debug, Deserialize)]
pub struct RecentQuery {
    pub limit: Option<usize>,
}

/// Status reported right after enqueueing, before any worker has looked.
fn accepted_status(job_id: &str) -> &'static str {
    if job_id == SYNC_EXECUTION {
        "completed"
    } else if job_id.starts_with("error_") {
        "failed"
    } else {
        "queued"
    }
}

fn accepted(job_id: String, message: String) -> Json<Value> {
    Json(json!({
        "status": accepted_status(&job_id),
        "job_id": job_id,
        "message": message,
    }))
}

pub async fn generate_report(
    State(state): State<Arc<AppState>>,
    AuthUser(user): AuthUser,
    Query(q): Query<ReportQuery>,
) -> AppResult<Json<Value>> {
    if !REPORT_TYPES.contains(&q.report_type.as_str()) {
        return Err(AppError::Validation(format!(
            "Invalid report type. Must be one of: {}",
            REPORT_TYPES.join(", ")
        )));
    }

    let job_id = state
        .tasks
        .enqueue(Task::GenerateReport { user_id: user.id, report_type: q.report_type.clone() })
        .await;
    Ok(accepted(job_id, format!("Report generation started: {}", q.report_type)))
}

pub async fn batch_notifications(
    State(state): State<Arc<AppState>>,
    _admin: SuperUser,
    Json(body): Json<BatchNotificationRequest>,
) -> AppResult<Json<Value>> {
    if body.user_emails.is_empty() {
        return Err(AppError::Validation("At least one recipient is required".to_string()));
    }
    if body.user_emails.len() > MAX_BATCH_RECIPIENTS {
        return Err(AppError::Validation(format!(
            "Too many recipients. Maximum {} allowed",
            MAX_BATCH_RECIPIENTS
        )));
    }
    for email in &body.user_emails {
        EmailValidator.validate(email)?;
    }

    let count = body.user_emails.len();
    let job_id = state
        .tasks
        .enqueue(Task::SendBatchNotifications { user_emails: body.user_emails, message: body.message })
        .await;
    Ok(accepted(job_id, format!("Batch notification started for {} users", count)))
}

pub async fn cleanup(
    State(state): State<Arc<AppState>>,
    _admin: SuperUser,
) -> AppResult<Json<Value>> {
    let job_id = state.tasks.enqueue(Task::CleanupOldData).await;
    Ok(accepted(job_id, "Data cleanup started".to_string()))
}

pub async fn job_status(
    State(state): State<Arc<AppState>>,
    _auth: AuthUser,
    Path(job_id): Path<String>,
) -> AppResult<Json<JobStatus>> {
    let status = state.tasks.job_status(&job_id).await;
    if status.is_not_found() {
        return Err(AppError::NotFound("Job not found".to_string()));
    }
    Ok(Json(status))
}

pub async fn queue_info(
    State(state): State<Arc<AppState>>,
    _auth: AuthUser,
) -> Json<QueueInfo> {
    Json(state.tasks.queue_info().await)
}

pub async fn recent_jobs(
    State(state): State<Arc<AppState>>,
    _auth: AuthUser,
    Query(q): Query<RecentQuery>,
) -> Json<Value> {
    let jobs = state.tasks.recent_jobs(q.limit.unwrap_or(DEFAULT_RECENT_JOBS)).await;
    let count = jobs.len();
    Json(json!({ "jobs": jobs, "total": count }))
}
