//! Typed - 型付き Task API
//!
//! task_type の typo を型で排除し、Handler との対応付けを静的に保証します。
//!
//! # 二層構造
//! - **表層（Typed）**: `TaskPayload` trait, `Handler<T>` trait - 型安全
//! - **内部（Dyn）**: `DynHandler` trait - object-safe, type erasure

pub mod codec;
pub mod context;
pub mod handler;
pub mod registry;
pub mod task;

pub use self::codec::PayloadCodec;
pub use self::context::TaskContext;
pub use self::handler::{DynHandler, Handler, TypedHandler};
pub use self::registry::{BuildError, RegistryBuilder, RegistryError, TaskRegistry};
pub use self::task::TaskPayload;
