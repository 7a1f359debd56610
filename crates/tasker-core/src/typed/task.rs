//! TaskPayload trait - 型付き Task の定義
//!
//! task_type の文字列と payload の型を 1 対 1 に結びつけ、
//! queue / max_retry / timeout といった per-type ポリシーも型に持たせる。

use std::time::Duration;

use serde::Serialize;
use serde::de::DeserializeOwned;

use crate::domain::{QueueName, TaskType};

/// 1 つの task type の payload
///
/// ```ignore
/// #[derive(Serialize, Deserialize)]
/// struct WelcomeEmail {
///     user_id: String,
/// }
///
/// impl TaskPayload for WelcomeEmail {
///     const TYPE: &'static str = "email:welcome";
/// }
/// ```
///
/// # Trait Bounds
/// - `Serialize` / `DeserializeOwned`: broker に bytes として保存するため
/// - `Send + Sync + 'static`: ワーカー間で共有するため
///
/// ポリシー定数は型ごとに固定で、producer 側からは上書きできない
pub trait TaskPayload: Serialize + DeserializeOwned + Send + Sync + 'static {
    /// `{domain}:{action}` 形式（例: `email:reminder`）
    const TYPE: &'static str;

    const QUEUE: &'static str = "default";

    /// 初回の後に許すリトライ回数。超えたら dead-letter
    const MAX_RETRY: u32 = 3;

    /// handler 1 回分の deadline
    const TIMEOUT: Duration = Duration::from_secs(30);

    fn task_type() -> TaskType {
        TaskType::new(Self::TYPE)
    }

    fn queue() -> QueueName {
        QueueName::new(Self::QUEUE)
    }
}
