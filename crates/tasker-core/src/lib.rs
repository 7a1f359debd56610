//! tasker-core
//!
//! タスクキューエンジンと、そこにタスクを積む cron バッチジョブ。
//!
//! # モジュール構成
//! - **domain**: ドメインモデル（ids, Task, TaskState, Todo）
//! - **ports**: 抽象化レイヤー（TodoStore, UserDirectory, NotificationSender, Clock, IdGenerator）
//! - **broker**: at-least-once のタスクストア（InMemoryBroker, SqliteBroker）
//! - **typed**: 型付き Task API（TaskPayload, Handler, TaskRegistry, PayloadCodec）
//! - **producer**: 型付き payload → Task → broker
//! - **dispatcher**: 重み付きキューから lease するワーカープール
//! - **tasks**: メール系タスクとハンドラ
//! - **cron**: バッチジョブ（registry, runner, 4 つのジョブ）
//! - **impls**: ports の実装（SQLite / in-memory / ログ送信）
//! - **config**, **telemetry**, **error**: 設定・ログ初期化・エラー型

pub mod broker;
pub mod config;
pub mod cron;
mod db;
pub mod dispatcher;
pub mod domain;
pub mod error;
pub mod impls;
pub mod ports;
pub mod producer;
pub mod tasks;
pub mod telemetry;
pub mod typed;

pub use config::Config;
pub use error::{ErrorKind, TaskerError};
