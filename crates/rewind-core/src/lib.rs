//! rewind-core
//!
//! Record/replay driver for writing branching, sequential-looking logic over a
//! mix of synchronous computations and callback-based asynchronous operations.
//!
//! The driver re-runs a body from its start every time an async step
//! completes. Steps that already ran return their recorded result instantly,
//! so the body reads as if it ran once, top to bottom.
//!
//! # モジュール構成
//! - **domain**: ID、履歴、chain の状態、制御フロー（`Halt` / `Step`）
//! - **typed**: `SyncTask` / `AsyncTask` / `ResultHandler` / `DriverBody` の契約
//! - **driver**: `Driver` 本体（launch・dispatch・resume）
//! - **nested**: 内側の chain を 1 ステップとして包む async task
//! - **config**: `DriverConfig`
//! - **observability**: `ChainStats`
//! - **error**: `DriverError`

pub mod config;
pub mod domain;
pub mod driver;
pub mod error;
pub mod nested;
pub mod observability;
pub mod typed;

pub use config::{ConfigError, DriverConfig};
pub use domain::{ChainId, ChainState, ChainStatus, Halt, HistoryRecord, Step, TaskId};
pub use driver::{Driver, OnComplete};
pub use error::DriverError;
pub use observability::ChainStats;
pub use typed::{AsyncTask, DriverBody, ResultHandler, Scope, SyncTask, Task, TaskKind};
