//! Concrete task types enqueued by the batch jobs.

pub mod email;

pub use self::email::{
    ReminderEmail, ReminderEmailHandler, ReminderKind, WeeklyReportEmail, WeeklyReportEmailHandler,
    WelcomeEmail, WelcomeEmailHandler, email_registry,
};
