//! Task contracts and the registered task handle.
//!
//! # 二層構造
//! - **契約（trait）**: `SyncTask<A, R>` / `AsyncTask<A, R>` - ユーザーが実装する処理本体
//! - **ハンドル**: `Task<A, R>` - 作成時に `TaskId` を払い出し、Sync/Async を tag 付き enum で保持
//!
//! ドライバはハンドルの `TaskId` でステップの同一性を判定します。
//! 同じハンドル（clone を含む）を body の中で何度使っても構いません。
//! 出現ごとに別ステップとして記録されます。

use std::fmt;
use std::sync::Arc;

use super::handler::ResultHandler;
use crate::domain::TaskId;

/// A unit of work that computes its result immediately.
pub trait SyncTask<A, R>: Send + Sync + 'static {
    fn run(&self, arg: A) -> R;
}

impl<A, R, F> SyncTask<A, R> for F
where
    F: Fn(A) -> R + Send + Sync + 'static,
{
    fn run(&self, arg: A) -> R {
        self(arg)
    }
}

/// A unit of work that starts an operation and reports completion later.
///
/// The implementation must call `ResultHandler::complete` (or
/// `complete_empty`) exactly once, either before `run` returns or later from
/// any other call stack. Errors inside the operation are the task's own
/// business: turn them into a result value instead of dropping the handler.
pub trait AsyncTask<A, R>: Send + Sync + 'static {
    fn run(&self, arg: A, handler: ResultHandler<R>);
}

impl<A, R, F> AsyncTask<A, R> for F
where
    F: Fn(A, ResultHandler<R>) + Send + Sync + 'static,
{
    fn run(&self, arg: A, handler: ResultHandler<R>) {
        self(arg, handler)
    }
}

/// Capability of a task, resolved once when the handle is created.
pub enum TaskKind<A, R> {
    Sync(Arc<dyn SyncTask<A, R>>),
    Async(Arc<dyn AsyncTask<A, R>>),
}

impl<A, R> Clone for TaskKind<A, R> {
    fn clone(&self) -> Self {
        match self {
            TaskKind::Sync(task) => TaskKind::Sync(Arc::clone(task)),
            TaskKind::Async(task) => TaskKind::Async(Arc::clone(task)),
        }
    }
}

/// A registered task: identity + capability (+ an optional name for logs).
///
/// # 使用例
/// ```ignore
/// let has_edit = Task::new_sync(|perms: Permissions| perms.contains("edit"))
///     .named("has_edit_permission");
/// let prompt = Task::new_async(|_: (), handler: ResultHandler<String>| {
///     ui.prompt_for_new_value(move |value| { let _ = handler.complete(value); });
/// });
/// ```
pub struct Task<A, R> {
    id: TaskId,
    name: Option<Arc<str>>,
    kind: TaskKind<A, R>,
}

impl<A: 'static, R: 'static> Task<A, R> {
    /// Build a sync task from a closure.
    pub fn new_sync<F>(f: F) -> Self
    where
        F: Fn(A) -> R + Send + Sync + 'static,
    {
        Self::from_kind(TaskKind::Sync(Arc::new(f)))
    }

    /// Build an async task from a closure receiving the completion handler.
    pub fn new_async<F>(f: F) -> Self
    where
        F: Fn(A, ResultHandler<R>) + Send + Sync + 'static,
    {
        Self::from_kind(TaskKind::Async(Arc::new(f)))
    }

    pub fn from_sync_task(task: impl SyncTask<A, R>) -> Self {
        Self::from_kind(TaskKind::Sync(Arc::new(task)))
    }

    pub fn from_async_task(task: impl AsyncTask<A, R>) -> Self {
        Self::from_kind(TaskKind::Async(Arc::new(task)))
    }

    pub fn from_kind(kind: TaskKind<A, R>) -> Self {
        Self {
            id: TaskId::generate(),
            name: None,
            kind,
        }
    }
}

impl<A, R> Task<A, R> {
    /// Attach a name for logs and history views. Identity is unchanged.
    pub fn named(mut self, name: impl Into<Arc<str>>) -> Self {
        self.name = Some(name.into());
        self
    }

    pub fn id(&self) -> TaskId {
        self.id
    }

    pub fn name(&self) -> Option<&str> {
        self.name.as_deref()
    }

    pub(crate) fn name_arc(&self) -> Option<Arc<str>> {
        self.name.clone()
    }

    pub fn kind(&self) -> &TaskKind<A, R> {
        &self.kind
    }

    pub fn is_async(&self) -> bool {
        matches!(self.kind, TaskKind::Async(_))
    }
}

impl<A, R> Clone for Task<A, R> {
    fn clone(&self) -> Self {
        Self {
            id: self.id,
            name: self.name.clone(),
            kind: self.kind.clone(),
        }
    }
}

impl<A, R> fmt::Debug for Task<A, R> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Task")
            .field("id", &self.id)
            .field("name", &self.name)
            .field("async", &self.is_async())
            .finish()
    }
}

impl<A, R> fmt::Display for Task<A, R> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match &self.name {
            Some(name) => write!(f, "{name} ({})", self.id),
            None => self.id.fmt(f),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    struct Doubler;

    impl SyncTask<i32, i32> for Doubler {
        fn run(&self, arg: i32) -> i32 {
            arg * 2
        }
    }

    #[test]
    fn each_handle_gets_its_own_identity() {
        let a = Task::new_sync(|n: i32| n + 1);
        let b = Task::new_sync(|n: i32| n + 1);
        assert_ne!(a.id(), b.id());
    }

    #[test]
    fn clone_and_rename_keep_identity() {
        let a = Task::new_sync(|n: i32| n + 1);
        let id = a.id();
        let b = a.clone().named("plus_one");
        assert_eq!(b.id(), id);
        assert_eq!(b.name(), Some("plus_one"));
        assert!(b.to_string().starts_with("plus_one (task-"));
    }

    #[test]
    fn capability_is_tagged_at_creation() {
        let sync = Task::from_sync_task(Doubler);
        let deferred: Task<(), u8> = Task::new_async(|_, handler: ResultHandler<u8>| {
            drop(handler);
        });
        assert!(!sync.is_async());
        assert!(deferred.is_async());

        match sync.kind() {
            TaskKind::Sync(task) => assert_eq!(task.run(21), 42),
            TaskKind::Async(_) => panic!("expected a sync task"),
        }
    }
}
