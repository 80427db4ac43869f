//! Driver - record/replay 実行エンジン
//!
//! # フロー
//! 1. `launch` で body を束縛し、cursor を 0 にして body を呼ぶ
//! 2. body 内の各 dispatch は、記録済みならキャッシュを返し（replay）、
//!    未記録なら task を実行する
//! 3. async task を初めて dispatch すると `Halt::Suspended` が body を抜けて
//!    launch まで戻る
//! 4. 完了ハンドラが結果を履歴に追記し、同じ body を先頭から呼び直す
//! 5. body が最後まで戻ったら chain 完了: body と履歴を捨て、`on_complete` を呼ぶ
//!
//! # 排他
//! 状態は `Mutex` で守りますが、ロックは記帳の間だけ保持します。body・task・
//! `on_complete` はロックの外で呼ぶので、完了ハンドラが同じスタック上で
//! 同期的に呼ばれても（再入しても）デッドロックしません。別スレッドから
//! 完了させる場合、同じ driver への完了通知を直列化するのは呼び出し側の責任です。

mod dispatch;

use std::fmt;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use crate::config::DriverConfig;
use crate::domain::{
    ChainId, ChainState, ChainStatus, Halt, History, HistoryEntry, HistoryRecord, Step,
};
use crate::error::DriverError;
use crate::observability::ChainStats;
use crate::typed::{DriverBody, Scope};

/// Callback fired once when a chain completes.
pub type OnComplete = Box<dyn FnOnce() + Send + 'static>;

/// Callback fired once with the error that failed a chain.
pub(crate) type OnFailure = Box<dyn FnOnce(DriverError) + Send + 'static>;

/// A completion reported by a `ResultHandler`.
pub(crate) struct Completion {
    pub chain: ChainId,
    /// 0-based step the handler was issued for.
    pub step: usize,
    pub entry: HistoryEntry,
}

/// Mutable state of one driver.
#[derive(Default)]
struct DriverState {
    chain: Option<ChainId>,
    state: ChainState,
    body: Option<Arc<dyn DriverBody>>,
    on_complete: Option<OnComplete>,
    on_failure: Option<OnFailure>,
    history: History,
    /// Step index within the current invocation.
    cursor: usize,
    /// Invocation counter; bumped on every (re)invocation of the body.
    invocation: u64,
    /// 0-based step of the async task the chain is waiting on.
    pending_step: Option<usize>,
    failure: Option<DriverError>,
    stats: ChainStats,
}

impl DriverState {
    fn begin_chain(
        &mut self,
        chain: ChainId,
        body: Arc<dyn DriverBody>,
        on_complete: Option<OnComplete>,
        on_failure: Option<OnFailure>,
    ) {
        self.chain = Some(chain);
        self.state = ChainState::Running;
        self.body = Some(body);
        self.on_complete = on_complete;
        self.on_failure = on_failure;
        self.history.clear();
        self.cursor = 0;
        self.invocation = 0;
        self.pending_step = None;
        self.failure = None;
        self.stats.reset_chain();
    }

    fn begin_invocation(&mut self) -> u64 {
        self.cursor = 0;
        self.invocation += 1;
        self.state = ChainState::Running;
        self.pending_step = None;
        self.stats.invocations += 1;
        self.invocation
    }

    /// Chain completed: drop body and history so the driver can be reused.
    fn finish(&mut self) -> Option<OnComplete> {
        self.state = ChainState::Completed;
        self.body = None;
        self.history.clear();
        self.cursor = 0;
        self.pending_step = None;
        self.stats.chains_completed += 1;
        self.on_failure = None;
        self.on_complete.take()
    }

    /// Returns false if the chain had already failed.
    fn mark_failed(&mut self, err: DriverError) -> bool {
        if self.state == ChainState::Failed {
            return false;
        }
        self.state = ChainState::Failed;
        self.body = None;
        self.on_complete = None;
        self.pending_step = None;
        self.failure = Some(err);
        true
    }

    fn is_current(&self, scope: &Scope) -> bool {
        self.chain == Some(scope.chain_id()) && self.invocation == scope.invocation()
    }

    /// Status as seen by an invocation that returned `Halt::Suspended`.
    fn observed_status(&self) -> Result<ChainStatus, DriverError> {
        match self.state {
            ChainState::Completed => Ok(ChainStatus::Completed),
            ChainState::Failed => Err(self.failure_or_chain_failed()),
            ChainState::Idle | ChainState::Running | ChainState::Suspended => {
                Ok(ChainStatus::Suspended)
            }
        }
    }

    fn failure_or_chain_failed(&self) -> DriverError {
        if let Some(err) = &self.failure {
            return err.clone();
        }
        match self.chain {
            Some(chain) => DriverError::ChainFailed(chain),
            None => DriverError::NoChain,
        }
    }

    /// The failure hook of `chain`, once it has failed. Taken at most once.
    fn take_on_failure(&mut self, chain: ChainId) -> Option<OnFailure> {
        if self.chain == Some(chain) && self.state == ChainState::Failed {
            self.on_failure.take()
        } else {
            None
        }
    }
}

struct DriverInner {
    config: DriverConfig,
    state: Mutex<DriverState>,
}

/// The record/replay engine.
///
/// `Driver` is a cheap handle (`Arc`) around the shared state; clones refer to
/// the same driver. One driver runs one chain at a time and can be reused once
/// that chain has completed or failed.
///
/// # 使用例
/// ```ignore
/// let driver = Driver::new();
/// driver.launch_with(
///     move |scope: &Scope| {
///         let perms = scope.execute(&read_permissions, user.clone())?;
///         if !scope.execute(&has_edit_permission, perms)? {
///             scope.call(&notify_permissions_error)?;
///         }
///         Ok(())
///     },
///     || println!("done"),
/// )?;
/// ```
#[derive(Clone)]
pub struct Driver {
    inner: Arc<DriverInner>,
}

impl Driver {
    pub fn new() -> Self {
        Self::with_config(DriverConfig::default())
    }

    pub fn with_config(config: DriverConfig) -> Self {
        Self {
            inner: Arc::new(DriverInner {
                config,
                state: Mutex::new(DriverState::default()),
            }),
        }
    }

    pub fn config(&self) -> &DriverConfig {
        &self.inner.config
    }

    pub fn state(&self) -> ChainState {
        self.lock().state
    }

    /// The current (or last) chain.
    pub fn chain_id(&self) -> Option<ChainId> {
        self.lock().chain
    }

    /// The error that failed the current chain, if it failed.
    pub fn failure(&self) -> Option<DriverError> {
        self.lock().failure.clone()
    }

    /// Recorded steps of the current chain. Empty once the chain completes.
    pub fn history(&self) -> Vec<HistoryRecord> {
        self.lock().history.records()
    }

    pub fn stats(&self) -> ChainStats {
        self.lock().stats
    }

    /// Start a chain.
    ///
    /// Returns once the body has either finished (`Completed`) or dispatched
    /// its first async step (`Suspended`). A drift failure discovered before
    /// that point is returned here.
    pub fn launch<F>(&self, body: F) -> Result<ChainStatus, DriverError>
    where
        F: Fn(&Scope) -> Step<()> + Send + Sync + 'static,
    {
        self.launch_body(Arc::new(body), None)
    }

    /// Start a chain and run `on_complete` once, when it completes.
    pub fn launch_with<F, C>(&self, body: F, on_complete: C) -> Result<ChainStatus, DriverError>
    where
        F: Fn(&Scope) -> Step<()> + Send + Sync + 'static,
        C: FnOnce() + Send + 'static,
    {
        self.launch_body(Arc::new(body), Some(Box::new(on_complete)))
    }

    /// Start a chain from any `DriverBody`.
    pub fn launch_body(
        &self,
        body: Arc<dyn DriverBody>,
        on_complete: Option<OnComplete>,
    ) -> Result<ChainStatus, DriverError> {
        self.start_chain(body, on_complete, None)
    }

    /// `launch_body` plus a hook told about the failure, wherever it is found.
    pub(crate) fn launch_observed(
        &self,
        body: Arc<dyn DriverBody>,
        on_complete: OnComplete,
        on_failure: OnFailure,
    ) -> Result<ChainStatus, DriverError> {
        self.start_chain(body, Some(on_complete), Some(on_failure))
    }

    fn start_chain(
        &self,
        body: Arc<dyn DriverBody>,
        on_complete: Option<OnComplete>,
        on_failure: Option<OnFailure>,
    ) -> Result<ChainStatus, DriverError> {
        let chain = {
            let mut state = self.lock();
            if state.state.is_active()
                && let Some(current) = state.chain
            {
                tracing::warn!(
                    driver = %self.config().name,
                    chain = %current,
                    "launch rejected: a chain is still in progress"
                );
                return Err(DriverError::ChainInProgress(current));
            }
            let chain = ChainId::generate();
            state.begin_chain(chain, Arc::clone(&body), on_complete, on_failure);
            chain
        };

        let span = tracing::info_span!("chain", driver = %self.config().name, chain = %chain);
        let _enter = span.enter();
        tracing::info!("launching chain");
        self.run_chain(chain, body)
    }

    /// Record a completion and re-run the chain from the top.
    pub(crate) fn resume(&self, completion: Completion) -> Result<ChainStatus, DriverError> {
        let Completion { chain, step, entry } = completion;
        let body = {
            let mut state = self.lock();
            if state.chain != Some(chain) {
                tracing::warn!(
                    driver = %self.config().name,
                    chain = %chain,
                    step = step + 1,
                    "completion for a chain that is no longer current"
                );
                return Err(DriverError::StaleCompletion {
                    chain,
                    step: step + 1,
                });
            }
            if state.state == ChainState::Failed {
                tracing::warn!(
                    driver = %self.config().name,
                    chain = %chain,
                    step = step + 1,
                    "completion after the chain failed"
                );
                return Err(DriverError::ChainFailed(chain));
            }
            let expected = state.state == ChainState::Suspended
                && state.pending_step == Some(step)
                && state.history.len() == step;
            let body = match (&state.body, expected) {
                (Some(body), true) => Arc::clone(body),
                _ => {
                    tracing::warn!(
                        driver = %self.config().name,
                        chain = %chain,
                        step = step + 1,
                        state = ?state.state,
                        "completion does not match the pending step"
                    );
                    return Err(DriverError::StaleCompletion {
                        chain,
                        step: step + 1,
                    });
                }
            };
            state.history.append(entry);
            state.pending_step = None;
            body
        };

        let span = tracing::info_span!("chain", driver = %self.config().name, chain = %chain);
        let _enter = span.enter();
        tracing::debug!(step = step + 1, "async step completed; resuming");
        self.run_chain(chain, body)
    }

    /// One invocation of the body, inside the suspension boundary.
    fn run_chain(
        &self,
        chain: ChainId,
        body: Arc<dyn DriverBody>,
    ) -> Result<ChainStatus, DriverError> {
        let invocation = self.lock().begin_invocation();
        let scope = Scope::new(self.clone(), chain, invocation);
        tracing::debug!(invocation, "invoking body");

        match body.run(&scope) {
            Ok(()) => self.complete_chain(&scope),
            Err(Halt::Suspended) => self.lock().observed_status(),
            Err(Halt::Failed(err)) => {
                let on_failure = {
                    let mut state = self.lock();
                    if state.chain == Some(chain) && state.mark_failed(err.clone()) {
                        tracing::error!(error = %err, "chain failed");
                    }
                    state.take_on_failure(chain)
                };
                if let Some(on_failure) = on_failure {
                    on_failure(err.clone());
                }
                Err(err)
            }
        }
    }

    /// Fail the chain while it waits on `step`, as if that step had failed.
    pub(crate) fn fail_pending(
        &self,
        chain: ChainId,
        step: usize,
        err: DriverError,
    ) -> Result<(), DriverError> {
        let on_failure = {
            let mut state = self.lock();
            if state.chain != Some(chain) {
                return Err(DriverError::StaleCompletion {
                    chain,
                    step: step + 1,
                });
            }
            if state.state == ChainState::Failed {
                return Err(DriverError::ChainFailed(chain));
            }
            if state.state != ChainState::Suspended || state.pending_step != Some(step) {
                return Err(DriverError::StaleCompletion {
                    chain,
                    step: step + 1,
                });
            }
            tracing::error!(
                driver = %self.config().name,
                chain = %chain,
                step = step + 1,
                error = %err,
                "chain failed at a pending step"
            );
            state.mark_failed(err.clone());
            state.take_on_failure(chain)
        };
        if let Some(on_failure) = on_failure {
            on_failure(err);
        }
        Ok(())
    }

    fn complete_chain(&self, scope: &Scope) -> Result<ChainStatus, DriverError> {
        let on_complete = {
            let mut state = self.lock();
            if state.state == ChainState::Failed {
                let err = state.failure_or_chain_failed();
                let on_failure = state.take_on_failure(scope.chain_id());
                drop(state);
                if let Some(on_failure) = on_failure {
                    on_failure(err.clone());
                }
                return Err(err);
            }
            if !state.is_current(scope) || state.state != ChainState::Running {
                // A newer invocation already decided the outcome.
                return state.observed_status();
            }
            state.finish()
        };

        tracing::info!(invocation = scope.invocation(), "chain completed");
        if let Some(on_complete) = on_complete {
            on_complete();
        }
        Ok(ChainStatus::Completed)
    }

    fn lock(&self) -> MutexGuard<'_, DriverState> {
        self.inner
            .state
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
    }
}

impl Default for Driver {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Debug for Driver {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let mut out = f.debug_struct("Driver");
        out.field("name", &self.config().name);
        // Debug may run while the state is locked (e.g. from inside a task).
        if let Ok(state) = self.inner.state.try_lock() {
            out.field("chain", &state.chain)
                .field("state", &state.state)
                .field("steps", &state.history.len());
        }
        out.finish_non_exhaustive()
    }
}
