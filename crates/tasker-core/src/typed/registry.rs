//! TaskRegistry - Handler の登録と管理
//!
//! 起動時に `RegistryBuilder` で全 handler を登録し、`build()` で検証してから
//! 不変の `TaskRegistry` を dispatcher に渡す（Fail-fast 設計）。
//!
//! ```ignore
//! let registry = RegistryBuilder::new()
//!     .register::<WelcomeEmail, _>(WelcomeEmailHandler::new(directory, sender))?
//!     .expect_tasks(&["email:welcome"])
//!     .build()?;
//! ```

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use super::handler::{DynHandler, Handler, TypedHandler};
use super::task::TaskPayload;
use crate::domain::TaskType;

#[derive(Debug, thiserror::Error)]
pub enum RegistryError {
    #[error("Handler for task type '{0}' is already registered")]
    AlreadyRegistered(String),
}

#[derive(Debug, thiserror::Error)]
pub enum BuildError {
    #[error(transparent)]
    Registry(#[from] RegistryError),

    #[error("Missing task types: {0:?}. These tasks were expected but not registered.")]
    MissingTaskTypes(Vec<String>),
}

/// task type → handler の不変テーブル。全ワーカーで共有する
#[derive(Clone, Default)]
pub struct TaskRegistry {
    handlers: HashMap<TaskType, Arc<dyn DynHandler>>,
}

impl TaskRegistry {
    pub fn builder() -> RegistryBuilder {
        RegistryBuilder::new()
    }

    pub fn get(&self, task_type: &TaskType) -> Option<Arc<dyn DynHandler>> {
        self.handlers.get(task_type).cloned()
    }

    /// ログ出力を安定させるためソート済み
    pub fn registered_types(&self) -> Vec<String> {
        let mut types: Vec<String> = self
            .handlers
            .keys()
            .map(|t| t.as_str().to_string())
            .collect();
        types.sort();
        types
    }

    /// 登録済み handler の中で最長の TIMEOUT。lease はこれより長くないといけない
    pub fn max_timeout(&self) -> Option<Duration> {
        self.handlers.values().map(|h| h.timeout()).max()
    }

    pub fn len(&self) -> usize {
        self.handlers.len()
    }

    pub fn is_empty(&self) -> bool {
        self.handlers.is_empty()
    }
}

#[derive(Default)]
pub struct RegistryBuilder {
    handlers: HashMap<TaskType, Arc<dyn DynHandler>>,
    expected_tasks: Option<Vec<String>>,
}

impl RegistryBuilder {
    pub fn new() -> Self {
        Self::default()
    }

    /// 二重登録は設定ミスなのでエラーにする
    pub fn register<T: TaskPayload, H: Handler<T> + 'static>(
        mut self,
        handler: H,
    ) -> Result<Self, RegistryError> {
        let task_type = T::task_type();
        if self.handlers.contains_key(&task_type) {
            return Err(RegistryError::AlreadyRegistered(task_type.to_string()));
        }
        self.handlers
            .insert(task_type, Arc::new(TypedHandler::<T, H>::new(handler)));
        Ok(self)
    }

    /// `build()` 時点で handler が必須の task type
    pub fn expect_tasks(mut self, task_types: &[&str]) -> Self {
        self.expected_tasks = Some(task_types.iter().map(|t| t.to_string()).collect());
        self
    }

    pub fn build(self) -> Result<TaskRegistry, BuildError> {
        if let Some(expected) = &self.expected_tasks {
            let mut missing: Vec<String> = expected
                .iter()
                .filter(|t| !self.handlers.contains_key(&TaskType::new(t.as_str())))
                .cloned()
                .collect();
            if !missing.is_empty() {
                missing.sort();
                return Err(BuildError::MissingTaskTypes(missing));
            }
        }
        Ok(TaskRegistry {
            handlers: self.handlers,
        })
    }
}
