//! Email tasks and their handlers.
//!
//! Handlers resolve the recipient through the user directory (except the
//! welcome mail, which already carries its address) and pass a resolved
//! `Notification` to the sender. Template rendering is the sender's concern.

use std::fmt::Write as _;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::domain::TodoSummary;
use crate::error::TaskerError;
use crate::ports::{Notification, NotificationSender, UserDirectory};
use crate::typed::{BuildError, Handler, RegistryBuilder, TaskContext, TaskPayload, TaskRegistry};

pub const TASK_WELCOME: &str = "email:welcome";
pub const TASK_REMINDER: &str = "email:reminder";
pub const TASK_WEEKLY_REPORT: &str = "email:weekly_report";

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct WelcomeEmail {
    pub to: String,
    pub first_name: String,
}

impl TaskPayload for WelcomeEmail {
    const TYPE: &'static str = TASK_WELCOME;
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ReminderKind {
    DueDateReminder,
    OverdueNotification,
}

impl ReminderKind {
    pub fn as_str(self) -> &'static str {
        match self {
            ReminderKind::DueDateReminder => "due_date_reminder",
            ReminderKind::OverdueNotification => "overdue_notification",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ReminderEmail {
    pub user_id: String,
    pub todo_id: Uuid,
    pub todo_title: String,
    pub due_date: DateTime<Utc>,
    /// Serialized as `task_type` to stay wire-compatible with existing payloads.
    #[serde(rename = "task_type")]
    pub kind: ReminderKind,
}

impl TaskPayload for ReminderEmail {
    const TYPE: &'static str = TASK_REMINDER;
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct WeeklyReportEmail {
    pub user_id: String,
    pub week_start: DateTime<Utc>,
    pub week_end: DateTime<Utc>,
    pub completed_count: u32,
    pub active_count: u32,
    pub overdue_count: u32,
    #[serde(default)]
    pub completed_todos: Vec<TodoSummary>,
    #[serde(default)]
    pub overdue_todos: Vec<TodoSummary>,
}

impl TaskPayload for WeeklyReportEmail {
    const TYPE: &'static str = TASK_WEEKLY_REPORT;
    // report generation is slower than a single mail
    const TIMEOUT: Duration = Duration::from_secs(60);
}

pub struct WelcomeEmailHandler {
    sender: Arc<dyn NotificationSender>,
}

impl WelcomeEmailHandler {
    pub fn new(sender: Arc<dyn NotificationSender>) -> Self {
        Self { sender }
    }
}

#[async_trait]
impl Handler<WelcomeEmail> for WelcomeEmailHandler {
    async fn handle(&self, _ctx: &TaskContext, payload: WelcomeEmail) -> Result<(), TaskerError> {
        tracing::info!(to = %payload.to, "sending welcome email");
        let notification = Notification {
            to: payload.to,
            subject: "Welcome to Tasker!".to_string(),
            body: format!(
                "Hi {},\n\nyour account is ready. Happy planning!\n",
                payload.first_name
            ),
        };
        self.sender.send(notification).await?;
        Ok(())
    }
}

pub struct ReminderEmailHandler {
    directory: Arc<dyn UserDirectory>,
    sender: Arc<dyn NotificationSender>,
}

impl ReminderEmailHandler {
    pub fn new(directory: Arc<dyn UserDirectory>, sender: Arc<dyn NotificationSender>) -> Self {
        Self { directory, sender }
    }
}

#[async_trait]
impl Handler<ReminderEmail> for ReminderEmailHandler {
    async fn handle(&self, _ctx: &TaskContext, payload: ReminderEmail) -> Result<(), TaskerError> {
        let to = self.directory.email_for(&payload.user_id).await?;
        let due = payload.due_date.format("%Y-%m-%d %H:%M UTC").to_string();

        let (subject, body) = match payload.kind {
            ReminderKind::DueDateReminder => (
                format!("Reminder: \"{}\" is due soon", payload.todo_title),
                format!(
                    "Your todo \"{}\" is due on {due}.\n\nTodo id: {}\n",
                    payload.todo_title, payload.todo_id
                ),
            ),
            ReminderKind::OverdueNotification => (
                format!("Overdue: \"{}\"", payload.todo_title),
                format!(
                    "Your todo \"{}\" was due on {due} and is not completed yet.\n\nTodo id: {}\n",
                    payload.todo_title, payload.todo_id
                ),
            ),
        };

        self.sender
            .send(Notification { to, subject, body })
            .await?;
        tracing::info!(
            user_id = %payload.user_id,
            todo_id = %payload.todo_id,
            kind = payload.kind.as_str(),
            "reminder email sent"
        );
        Ok(())
    }
}

pub struct WeeklyReportEmailHandler {
    directory: Arc<dyn UserDirectory>,
    sender: Arc<dyn NotificationSender>,
}

impl WeeklyReportEmailHandler {
    pub fn new(directory: Arc<dyn UserDirectory>, sender: Arc<dyn NotificationSender>) -> Self {
        Self { directory, sender }
    }
}

fn render_report(report: &WeeklyReportEmail) -> String {
    let mut body = String::new();
    let _ = writeln!(
        body,
        "Your week from {} to {}:",
        report.week_start.format("%Y-%m-%d"),
        report.week_end.format("%Y-%m-%d")
    );
    let _ = writeln!(body, "  completed: {}", report.completed_count);
    let _ = writeln!(body, "  active:    {}", report.active_count);
    let _ = writeln!(body, "  overdue:   {}", report.overdue_count);

    if !report.completed_todos.is_empty() {
        let _ = writeln!(body, "\nCompleted:");
        for todo in &report.completed_todos {
            let _ = writeln!(body, "  - {}", todo.title);
        }
    }
    if !report.overdue_todos.is_empty() {
        let _ = writeln!(body, "\nOverdue:");
        for todo in &report.overdue_todos {
            match todo.due_date {
                Some(due) => {
                    let _ = writeln!(body, "  - {} (due {})", todo.title, due.format("%Y-%m-%d"));
                }
                None => {
                    let _ = writeln!(body, "  - {}", todo.title);
                }
            }
        }
    }
    body
}

#[async_trait]
impl Handler<WeeklyReportEmail> for WeeklyReportEmailHandler {
    async fn handle(
        &self,
        _ctx: &TaskContext,
        payload: WeeklyReportEmail,
    ) -> Result<(), TaskerError> {
        tracing::info!(
            user_id = %payload.user_id,
            completed_count = payload.completed_count,
            active_count = payload.active_count,
            overdue_count = payload.overdue_count,
            "processing weekly report"
        );
        let to = self.directory.email_for(&payload.user_id).await?;

        let notification = Notification {
            to,
            subject: "Your weekly todo report".to_string(),
            body: render_report(&payload),
        };
        self.sender.send(notification).await?;
        Ok(())
    }
}

/// Registry with every email handler, checked against the known task types.
pub fn email_registry(
    directory: Arc<dyn UserDirectory>,
    sender: Arc<dyn NotificationSender>,
) -> Result<TaskRegistry, BuildError> {
    Ok(RegistryBuilder::new()
        .register::<WelcomeEmail, _>(WelcomeEmailHandler::new(Arc::clone(&sender)))?
        .register::<ReminderEmail, _>(ReminderEmailHandler::new(
            Arc::clone(&directory),
            Arc::clone(&sender),
        ))?
        .register::<WeeklyReportEmail, _>(WeeklyReportEmailHandler::new(directory, sender))?
        .expect_tasks(&[TASK_WELCOME, TASK_REMINDER, TASK_WEEKLY_REPORT])
        .build()?)
}
