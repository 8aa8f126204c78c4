//! Background jobs.
//!
//! A [`Task`] names a job function and carries its arguments. Jobs go through
//! the Redis queue when one is configured and run inline otherwise.

use anyhow::{anyhow, Result};
use chrono::{Datelike, Duration, TimeZone, Utc};
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};
use std::sync::Arc;
use tracing::info;

use crate::db::models::external_system::{CallLogRepository, SessionRepository};
use crate::db::models::item::ItemRepository;
use crate::db::models::user::UserRepository;
use crate::db::{timestamp, DbPool};
use crate::monitoring::Collector;

pub mod queue;
pub mod scheduler;
pub mod worker;

pub use queue::TaskQueue;

pub const REPORT_TYPES: &[&str] = &["user_activity", "items_summary", "monthly_report"];
pub const MAX_BATCH_RECIPIENTS: usize = 100;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "function", content = "args", rename_all = "snake_case")]
pub enum Task {
    SendWelcomeEmail { email: String, name: String },
    SendItemNotification { email: String, message: String, item_id: i64 },
    ProcessItem { item_id: i64 },
    CleanupOldData,
    GenerateReport { user_id: i64, report_type: String },
    SendBatchNotifications { user_emails: Vec<String>, message: String },
    CollectThirdPartyMetrics,
    CollectSpecificApi { api_name: String },
}

impl Task {
    pub fn name(&self) -> &'static str {
        match self {
            Task::SendWelcomeEmail { .. } => "send_welcome_email",
            Task::SendItemNotification { .. } => "send_item_notification",
            Task::ProcessItem { .. } => "process_item",
            Task::CleanupOldData => "cleanup_old_data",
            Task::GenerateReport { .. } => "generate_report",
            Task::SendBatchNotifications { .. } => "send_batch_notifications",
            Task::CollectThirdPartyMetrics => "collect_third_party_metrics",
            Task::CollectSpecificApi { .. } => "collect_specific_api",
        }
    }

    /// Arguments as stored in the job hash; `null` for argument-less tasks.
    pub fn args(&self) -> Value {
        serde_json::to_value(self)
            .ok()
            .and_then(|mut v| v.get_mut("args").map(Value::take))
            .unwrap_or(Value::Null)
    }

    /// Rebuild a task from the `function` and `args` fields of a job hash.
    pub fn decode(function: &str, args: &str) -> Result<Task> {
        let args: Value = if args.is_empty() { Value::Null } else { serde_json::from_str(args)? };
        let doc = if args.is_null() {
            json!({ "function": function })
        } else {
            json!({ "function": function, "args": args })
        };
        serde_json::from_value(doc).map_err(|e| anyhow!("Unknown task '{}': {}", function, e))
    }
}

/// Everything a job may touch.
pub struct TaskContext {
    pub db: DbPool,
    pub collector: Arc<Collector>,
    pub service_name: String,
    pub log_retention_days: i64,
}

pub async fn run(ctx: &TaskContext, task: Task) -> Result<String> {
    match task {
        Task::SendWelcomeEmail { email, name } => {
            let message = format!("Welcome {}! Thank you for registering with {}", name, ctx.service_name);
            info!(to = %email, "Welcome email: {}", message);
            Ok(format!("Welcome email sent successfully to {}", email))
        }
        Task::SendItemNotification { email, message, item_id } => {
            info!(to = %email, item_id, "Item notification: {}", message);
            Ok(format!("Item notification sent successfully to {}", email))
        }
        Task::ProcessItem { item_id } => process_item(ctx, item_id).await,
        Task::CleanupOldData => cleanup_old_data(ctx).await,
        Task::GenerateReport { user_id, report_type } => generate_report(ctx, user_id, &report_type).await,
        Task::SendBatchNotifications { user_emails, message } => {
            for email in &user_emails {
                info!(to = %email, "Notification: {}", message);
            }
            Ok(format!("Batch notifications sent successfully to {} users", user_emails.len()))
        }
        Task::CollectThirdPartyMetrics => Ok(ctx.collector.run_all().await),
        Task::CollectSpecificApi { api_name } => Ok(ctx.collector.run_one(&api_name).await),
    }
}

/// Collapse runs of whitespace in the title and stamp the item as processed.
async fn process_item(ctx: &TaskContext, item_id: i64) -> Result<String> {
    let item = ItemRepository::get(&ctx.db, item_id)
        .await?
        .ok_or_else(|| anyhow!("Item {} not found", item_id))?;

    let title = item.title.split_whitespace().collect::<Vec<_>>().join(" ");
    ItemRepository::mark_processed(&ctx.db, item_id, &title).await?;
    info!("Item {} processed successfully", item_id);
    Ok(format!("Item {} processed successfully", item_id))
}

async fn cleanup_old_data(ctx: &TaskContext) -> Result<String> {
    let cutoff = Duration::try_days(ctx.log_retention_days)
        .and_then(|age| Utc::now().checked_sub_signed(age))
        .map(timestamp)
        .ok_or_else(|| anyhow!("Log retention of {} days is out of range", ctx.log_retention_days))?;
    let logs = CallLogRepository::delete_before(&ctx.db, &cutoff).await?;
    let sessions = SessionRepository::purge_stale(&ctx.db).await?;
    info!(logs, sessions, "Data cleanup completed");
    Ok(format!(
        "Data cleanup completed: removed {} log entries and {} stale sessions",
        logs, sessions
    ))
}

async fn generate_report(ctx: &TaskContext, user_id: i64, report_type: &str) -> Result<String> {
    let user = UserRepository::get(&ctx.db, user_id)
        .await?
        .ok_or_else(|| anyhow!("User {} not found", user_id))?;

    let now = Utc::now();
    let since = match report_type {
        "items_summary" => None,
        "user_activity" => Some(timestamp(now - Duration::days(30))),
        "monthly_report" => Utc
            .with_ymd_and_hms(now.year(), now.month(), 1, 0, 0, 0)
            .single()
            .map(timestamp),
        other => return Err(anyhow!("Invalid report type: {}", other)),
    };

    let stats = ItemRepository::stats(&ctx.db, user.id, since.as_deref()).await?;
    let filename = format!("report_{}_{}_{}.json", report_type, user_id, now.format("%Y%m%d_%H%M%S"));
    info!(
        user = %user.email,
        total = stats.total,
        active = stats.active,
        processed = stats.processed,
        "Report generated: {}",
        filename
    );
    Ok(format!(
        "Report generated successfully: {} (items: {}, active: {}, processed: {})",
        filename, stats.total, stats.active, stats.processed
    ))
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;
    use crate::config::{CollectorConfig, PushgatewayConfig};
    use crate::db::models::user::NewUser;

    pub(crate) async fn context() -> TaskContext {
        TaskContext {
            db: crate::db::memory().await.unwrap(),
            collector: Arc::new(Collector::new(&CollectorConfig::default(), &PushgatewayConfig::default()).unwrap()),
            service_name: "opsdesk".to_string(),
            log_retention_days: 30,
        }
    }

    async fn user(ctx: &TaskContext) -> i64 {
        UserRepository::create(
            &ctx.db,
            NewUser {
                email: "u@example.com".to_string(),
                hashed_password: "h".to_string(),
                first_name: None,
                last_name: None,
                is_active: true,
                is_superuser: false,
            },
        )
        .await
        .unwrap()
        .id
    }

    #[test]
    fn wire_format_is_function_plus_args() {
        let task = Task::ProcessItem { item_id: 7 };
        assert_eq!(task.name(), "process_item");
        assert_eq!(task.args(), json!({"item_id": 7}));
        assert_eq!(Task::CleanupOldData.args(), Value::Null);

        assert_eq!(Task::decode("process_item", r#"{"item_id":7}"#).unwrap(), task);
        assert_eq!(Task::decode("cleanup_old_data", "null").unwrap(), Task::CleanupOldData);
        assert_eq!(Task::decode("cleanup_old_data", "").unwrap(), Task::CleanupOldData);
        assert!(Task::decode("format_disk", "null").is_err());
    }

    #[tokio::test]
    async fn process_item_normalizes_title() {
        let ctx = context().await;
        let owner = user(&ctx).await;
        let item = ItemRepository::create(&ctx.db, owner, "  messy   title ", None).await.unwrap();

        let out = run(&ctx, Task::ProcessItem { item_id: item.id }).await.unwrap();
        assert_eq!(out, format!("Item {} processed successfully", item.id));

        let item = ItemRepository::get(&ctx.db, item.id).await.unwrap().unwrap();
        assert_eq!(item.title, "messy title");
        assert!(item.processed_at.is_some());

        assert!(run(&ctx, Task::ProcessItem { item_id: 999 }).await.is_err());
    }

    #[tokio::test]
    async fn report_counts_items() {
        let ctx = context().await;
        let owner = user(&ctx).await;
        ItemRepository::create(&ctx.db, owner, "a", None).await.unwrap();

        let out = run(&ctx, Task::GenerateReport { user_id: owner, report_type: "monthly_report".to_string() })
            .await
            .unwrap();
        assert!(out.starts_with("Report generated successfully: report_monthly_report_"));
        assert!(out.contains("items: 1"));

        let err = run(&ctx, Task::GenerateReport { user_id: owner, report_type: "weekly".to_string() }).await;
        assert!(err.is_err());
    }

    #[tokio::test]
    async fn cleanup_reports_counts() {
        let ctx = context().await;
        let out = run(&ctx, Task::CleanupOldData).await.unwrap();
        assert_eq!(out, "Data cleanup completed: removed 0 log entries and 0 stale sessions");
    }

    #[tokio::test]
    async fn cleanup_rejects_out_of_range_retention() {
        let mut ctx = context().await;
        ctx.log_retention_days = i64::MAX;
        let err = run(&ctx, Task::CleanupOldData).await.unwrap_err();
        assert!(err.to_string().contains("out of range"), "{}", err);
    }

    #[tokio::test]
    async fn batch_notification_counts_recipients() {
        let ctx = context().await;
        let out = run(
            &ctx,
            Task::SendBatchNotifications {
                user_emails: vec!["a@x.io".to_string(), "b@x.io".to_string()],
                message: "hi".to_string(),
            },
        )
        .await
        .unwrap();
        assert_eq!(out, "Batch notifications sent successfully to 2 users");
    }
}
