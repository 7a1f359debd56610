//! Handler trait - Task を実行する Handler の定義
//!
//! - ジェネリック trait (`Handler<T>`): 型付きの表層
//! - Object-safe trait (`DynHandler`): registry に格納する内部表現
//! - `TypedHandler<T, H>` が decode を挟んで両者をつなぐ (type erasure)

use std::marker::PhantomData;
use std::time::Duration;

use async_trait::async_trait;

use super::codec::PayloadCodec;
use super::context::TaskContext;
use super::task::TaskPayload;
use crate::error::TaskerError;

/// 1 つの task type を実行する handler
///
/// - `Handler<ReminderEmail>` は `ReminderEmail` しか受け取れない
/// - `Err` を返すとリトライ状態遷移に入る。即 dead-letter したいときは
///   `TaskerError::Permanent` を返す
#[async_trait]
pub trait Handler<T: TaskPayload>: Send + Sync {
    async fn handle(&self, ctx: &TaskContext, payload: T) -> Result<(), TaskerError>;
}

/// payload の bytes をそのまま受け取る object-safe 版
#[async_trait]
pub trait DynHandler: Send + Sync {
    async fn handle_raw(&self, ctx: &TaskContext, payload: &[u8]) -> Result<(), TaskerError>;

    fn task_type(&self) -> &'static str;

    /// 扱う型の `TaskPayload::TIMEOUT`
    fn timeout(&self) -> Duration;
}

pub struct TypedHandler<T: TaskPayload, H: Handler<T>> {
    handler: H,
    _marker: PhantomData<fn() -> T>,
}

impl<T: TaskPayload, H: Handler<T>> TypedHandler<T, H> {
    pub fn new(handler: H) -> Self {
        Self {
            handler,
            _marker: PhantomData,
        }
    }
}

#[async_trait]
impl<T: TaskPayload, H: Handler<T>> DynHandler for TypedHandler<T, H> {
    async fn handle_raw(&self, ctx: &TaskContext, payload: &[u8]) -> Result<(), TaskerError> {
        let payload: T = PayloadCodec::decode(payload)?;
        self.handler.handle(ctx, payload).await
    }

    fn task_type(&self) -> &'static str {
        T::TYPE
    }

    fn timeout(&self) -> Duration {
        T::TIMEOUT
    }
}
