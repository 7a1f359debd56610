//! NotificationSender port - delivers an already-resolved notification.
//!
//! Templating and transport are the adapter's business; the core only hands
//! over a recipient address and the content.

use async_trait::async_trait;
use thiserror::Error;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Notification {
    pub to: String,
    pub subject: String,
    pub body: String,
}

#[derive(Debug, Error)]
pub enum NotifyError {
    #[error("rejected by provider: {0}")]
    Rejected(String),

    #[error("transport: {0}")]
    Transport(String),
}

#[async_trait]
pub trait NotificationSender: Send + Sync {
    async fn send(&self, notification: Notification) -> Result<(), NotifyError>;
}
