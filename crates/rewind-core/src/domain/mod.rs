//! Domain model (IDs, history, chain state, control flow).

pub mod flow;
pub mod history;
pub mod ids;
pub mod state;

pub use flow::{Halt, Step};
pub use history::{CachedResult, History, HistoryEntry, HistoryRecord};
pub use ids::{ChainId, Id, IdMarker, TaskId};
pub use state::{ChainState, ChainStatus};
