//! UserDirectory port - resolves an internal user id to a notification address.

use async_trait::async_trait;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum DirectoryError {
    #[error("user {0} not found")]
    NotFound(String),

    #[error("directory unavailable: {0}")]
    Transient(String),
}

#[async_trait]
pub trait UserDirectory: Send + Sync {
    async fn email_for(&self, user_id: &str) -> Result<String, DirectoryError>;
}
