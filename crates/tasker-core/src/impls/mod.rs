//! Impls - ports の実装
//!
//! - **InMemoryTodoStore**: テスト・デモ用のストア兼ユーザーディレクトリ
//! - **SqliteTodoStore**: 本番用。`users` テーブルがディレクトリを兼ねる
//! - **LogNotificationSender** / **RecordingNotificationSender**: 送信スタブ

pub mod log_sender;
pub mod memory_store;
pub mod sqlite_store;

pub use self::log_sender::{LogNotificationSender, RecordingNotificationSender};
pub use self::memory_store::InMemoryTodoStore;
pub use self::sqlite_store::SqliteTodoStore;
