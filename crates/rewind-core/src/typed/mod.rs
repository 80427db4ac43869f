//! Typed - タスク・完了ハンドラ・body の契約
//!
//! - **task**: `SyncTask` / `AsyncTask` trait と登録済みハンドル `Task<A, R>`
//! - **handler**: `ResultHandler<R>` - async task の完了通知
//! - **body**: `DriverBody` trait と、1 回の呼び出しに紐づく `Scope`

pub mod body;
pub mod handler;
pub mod task;

pub use self::body::{DriverBody, Scope};
pub use self::handler::ResultHandler;
pub use self::task::{AsyncTask, SyncTask, Task, TaskKind};
