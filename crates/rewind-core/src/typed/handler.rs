//! ResultHandler - async task の完了通知
//!
//! # 学習ポイント
//! - `self` を消費するメソッドで「高々 1 回」を型で保証
//! - Drop で「0 回」（呼ばれずに捨てられた）を検知してログに残す

use std::fmt;
use std::marker::PhantomData;
use std::sync::Arc;

use crate::domain::{ChainId, ChainStatus, HistoryEntry, TaskId};
use crate::driver::{Completion, Driver};
use crate::error::DriverError;

/// The callback an `AsyncTask` uses to report completion.
///
/// Completing records the result as the pending step and re-runs the chain
/// from the top on the caller's stack. The return value is what that
/// resumption produced: a drift failure discovered during replay surfaces
/// here, to whoever reported the completion.
///
/// Completions for one driver must be serialized by the caller; the driver
/// does not order concurrent resumptions.
#[must_use = "an async task must complete its handler, or the chain never resumes"]
pub struct ResultHandler<R> {
    driver: Driver,
    chain: ChainId,
    step: usize,
    task_id: TaskId,
    task_name: Option<Arc<str>>,
    reported: bool,
    _result: PhantomData<fn(R)>,
}

impl<R> ResultHandler<R> {
    pub(crate) fn new(
        driver: Driver,
        chain: ChainId,
        step: usize,
        task_id: TaskId,
        task_name: Option<Arc<str>>,
    ) -> Self {
        Self {
            driver,
            chain,
            step,
            task_id,
            task_name,
            reported: false,
            _result: PhantomData,
        }
    }

    pub fn chain_id(&self) -> ChainId {
        self.chain
    }

    /// The 1-indexed step this handler completes.
    pub fn step(&self) -> usize {
        self.step + 1
    }

    pub fn task_id(&self) -> TaskId {
        self.task_id
    }

    /// Fail the chain at this step instead of completing it.
    ///
    /// Used when the work behind the step is itself a chain that failed. The
    /// invocation that dispatched the step, if still on the stack, reports `err`.
    pub(crate) fn fail(mut self, err: DriverError) -> Result<(), DriverError> {
        self.reported = true;
        self.driver.fail_pending(self.chain, self.step, err)
    }
}

impl<R: Send + 'static> ResultHandler<R> {
    /// Report completion with a value.
    pub fn complete(mut self, result: R) -> Result<ChainStatus, DriverError> {
        self.reported = true;
        let entry = HistoryEntry::new(self.task_id, self.task_name.take(), Box::new(result));
        self.driver.resume(Completion {
            chain: self.chain,
            step: self.step,
            entry,
        })
    }

    /// Report completion without a value; the step caches `R::default()`.
    pub fn complete_empty(self) -> Result<ChainStatus, DriverError>
    where
        R: Default,
    {
        self.complete(R::default())
    }
}

impl<R> Drop for ResultHandler<R> {
    fn drop(&mut self) {
        if !self.reported && self.driver.config().warn_on_dropped_handler {
            tracing::warn!(
                driver = %self.driver.config().name,
                chain = %self.chain,
                step = self.step + 1,
                task = %self.task_id,
                "completion handler dropped without reporting; the chain will not resume"
            );
        }
    }
}

impl<R> fmt::Debug for ResultHandler<R> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ResultHandler")
            .field("chain", &self.chain)
            .field("step", &(self.step + 1))
            .field("task_id", &self.task_id)
            .field("reported", &self.reported)
            .finish()
    }
}
