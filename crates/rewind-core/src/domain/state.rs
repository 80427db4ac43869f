//! Chain state machine.

use serde::{Deserialize, Serialize};

/// Lifecycle of one chain on a `Driver`.
///
/// State transitions:
/// - Idle -> Running
/// - Running -> Suspended (an async step was dispatched for the first time)
/// - Suspended -> Running (its completion handler fired; the body is replayed)
/// - Running -> Completed (the body returned without suspending)
/// - Running -> Failed (a replayed step did not match the recorded task)
///
/// Completed and Failed are terminal for the chain, but not for the driver:
/// a new chain may be launched from either.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ChainState {
    /// No chain has been launched yet.
    #[default]
    Idle,

    /// The body is being invoked.
    Running,

    /// Waiting for an async step's completion handler.
    Suspended,

    /// The body ran to the end.
    Completed,

    /// Logic drift (or another fatal condition) ended the chain.
    Failed,
}

impl ChainState {
    /// Is this a terminal state (the chain will not resume)?
    pub fn is_terminal(self) -> bool {
        matches!(self, ChainState::Completed | ChainState::Failed)
    }

    /// Does this state own the driver (a new launch would be rejected)?
    pub fn is_active(self) -> bool {
        matches!(self, ChainState::Running | ChainState::Suspended)
    }
}

/// What a launch (or a resumption) left behind once control came back.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ChainStatus {
    /// An async step is in flight; its handler will resume the chain.
    Suspended,

    /// The body ran to the end and `on_complete` has fired.
    Completed,
}

impl From<ChainStatus> for ChainState {
    fn from(status: ChainStatus) -> Self {
        match status {
            ChainStatus::Suspended => ChainState::Suspended,
            ChainStatus::Completed => ChainState::Completed,
        }
    }
}
