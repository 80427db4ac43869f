//! Step dispatch: replay a recorded step, or run the task for a new one.

use std::sync::Arc;

use super::Driver;
use crate::domain::{ChainState, Halt, HistoryEntry, Step};
use crate::error::DriverError;
use crate::typed::{ResultHandler, Scope, Task, TaskKind};

impl Driver {
    pub(crate) fn dispatch<A, R>(&self, scope: &Scope, task: &Task<A, R>, arg: A) -> Step<R>
    where
        A: Send + 'static,
        R: Clone + Send + 'static,
    {
        let mut state = self.lock();
        if !state.is_current(scope) {
            // This invocation has been superseded by a resumption.
            return Err(Halt::Suspended);
        }
        match state.state {
            ChainState::Running => {}
            ChainState::Failed => return Err(Halt::Failed(state.failure_or_chain_failed())),
            ChainState::Idle | ChainState::Suspended | ChainState::Completed => {
                return Err(Halt::Suspended);
            }
        }

        let cursor = state.cursor;
        let step = cursor + 1;

        // (1) replay
        if let Some(entry) = state.history.get(cursor) {
            if entry.task_id() != task.id() {
                let err = DriverError::Drift {
                    step,
                    recorded: entry.task_id(),
                    requested: task.id(),
                };
                tracing::error!(
                    step,
                    recorded = %entry.task_id(),
                    recorded_name = entry.task_name().unwrap_or("-"),
                    requested = %task,
                    "logic drift: the body took a different path than the recorded one"
                );
                state.mark_failed(err.clone());
                return Err(Halt::Failed(err));
            }
            let Some(result) = entry.result::<R>() else {
                let err = DriverError::ResultTypeMismatch {
                    step,
                    task: task.id(),
                };
                state.mark_failed(err.clone());
                return Err(Halt::Failed(err));
            };
            state.cursor += 1;
            state.stats.replayed_steps += 1;
            tracing::trace!(step, task = %task, "replayed cached step");
            return Ok(result);
        }

        // (2) first time at this step
        if let Some(limit) = self.config().max_steps
            && cursor >= limit
        {
            let err = DriverError::StepLimitExceeded { limit };
            tracing::error!(step, limit, task = %task, "step limit exceeded");
            state.mark_failed(err.clone());
            return Err(Halt::Failed(err));
        }

        match task.kind() {
            TaskKind::Sync(sync_task) => {
                let sync_task = Arc::clone(sync_task);
                drop(state);

                tracing::debug!(step, task = %task, "executing sync step");
                let result = sync_task.run(arg);

                let mut state = self.lock();
                if !state.is_current(scope) {
                    return Err(Halt::Suspended);
                }
                state.history.append(HistoryEntry::new(
                    task.id(),
                    task.name_arc(),
                    Box::new(result.clone()),
                ));
                state.cursor += 1;
                state.stats.executed_steps += 1;
                Ok(result)
            }
            TaskKind::Async(async_task) => {
                let async_task = Arc::clone(async_task);
                state.state = ChainState::Suspended;
                state.pending_step = Some(cursor);
                state.stats.executed_steps += 1;
                state.stats.suspensions += 1;
                drop(state);

                tracing::debug!(step, task = %task, "executing async step; suspending");
                let handler = ResultHandler::new(
                    self.clone(),
                    scope.chain_id(),
                    cursor,
                    task.id(),
                    task.name_arc(),
                );
                async_task.run(arg, handler);

                // The handler may already have resumed the chain on this stack.
                // A failure found there is reported to this invocation's caller too.
                let state = self.lock();
                if state.chain == Some(scope.chain_id()) && state.state == ChainState::Failed {
                    return Err(Halt::Failed(state.failure_or_chain_failed()));
                }
                Err(Halt::Suspended)
            }
        }
    }
}
