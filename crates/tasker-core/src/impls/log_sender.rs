//! Notification senders that never leave the process.

use std::sync::Mutex;

use async_trait::async_trait;

use crate::ports::{Notification, NotificationSender, NotifyError};

/// Logs notifications instead of delivering them. For local runs.
#[derive(Debug, Default, Clone, Copy)]
pub struct LogNotificationSender;

#[async_trait]
impl NotificationSender for LogNotificationSender {
    async fn send(&self, notification: Notification) -> Result<(), NotifyError> {
        tracing::info!(
            to = %notification.to,
            subject = %notification.subject,
            body_len = notification.body.len(),
            "notification sent"
        );
        Ok(())
    }
}

/// Keeps every notification so tests can inspect what went out.
#[derive(Debug, Default)]
pub struct RecordingNotificationSender {
    sent: Mutex<Vec<Notification>>,
}

impl RecordingNotificationSender {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn sent(&self) -> Vec<Notification> {
        self.sent
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .clone()
    }
}

#[async_trait]
impl NotificationSender for RecordingNotificationSender {
    async fn send(&self, notification: Notification) -> Result<(), NotifyError> {
        self.sent
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .push(notification);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn recording_sender_keeps_order() {
        let sender = RecordingNotificationSender::new();
        for to in ["a@example.com", "b@example.com"] {
            sender
                .send(Notification {
                    to: to.to_string(),
                    subject: "hi".into(),
                    body: String::new(),
                })
                .await
                .unwrap();
        }
        let to: Vec<String> = sender.sent().into_iter().map(|n| n.to).collect();
        assert_eq!(to, vec!["a@example.com", "b@example.com"]);
    }

    #[tokio::test]
    async fn log_sender_accepts_everything() {
        let n = Notification {
            to: "a@example.com".into(),
            subject: "s".into(),
            body: "b".into(),
        };
        assert!(LogNotificationSender.send(n).await.is_ok());
    }
}
