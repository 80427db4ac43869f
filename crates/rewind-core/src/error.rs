use thiserror::Error;

use crate::domain::{ChainId, TaskId};

/// Errors raised by the driver engine.
///
/// Step numbers are 1-indexed.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum DriverError {
    /// The body asked for a different task than the one recorded at this step.
    #[error(
        "task #{step} in the execution path differs from the execution history \
         (recorded {recorded}, requested {requested})"
    )]
    Drift {
        step: usize,
        recorded: TaskId,
        requested: TaskId,
    },

    #[error("cached result for step #{step} is not of the type returned by {task}")]
    ResultTypeMismatch { step: usize, task: TaskId },

    #[error("{0} is still in progress; wait for it before launching another chain")]
    ChainInProgress(ChainId),

    #[error("{0} has failed and cannot be resumed")]
    ChainFailed(ChainId),

    /// A completion handler fired for a chain or step that is no longer pending.
    #[error("completion for step #{step} of {chain} does not match the pending step")]
    StaleCompletion { chain: ChainId, step: usize },

    #[error("chain reached the configured limit of {limit} steps")]
    StepLimitExceeded { limit: usize },

    #[error("no chain has been launched on this driver")]
    NoChain,
}

impl DriverError {
    /// Logic drift is a defect in the body, never a transient condition.
    pub fn is_drift(&self) -> bool {
        matches!(self, DriverError::Drift { .. })
    }
}
