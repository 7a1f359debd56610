//! Ports - 外部コラボレータへの抽象化レイヤー
//!
//! 各 trait は外部システム（RDB, 通知送信, ユーザーディレクトリ）への
//! インターフェースで、実装は `impls` と `broker` に置く。

pub mod clock;
pub mod directory;
pub mod id_generator;
pub mod notifier;
pub mod store;

pub use self::clock::{Clock, FixedClock, ManualClock, SystemClock};
pub use self::directory::{DirectoryError, UserDirectory};
pub use self::id_generator::{IdGenerator, UlidGenerator};
pub use self::notifier::{Notification, NotificationSender, NotifyError};
pub use self::store::{StoreError, TodoStore};
