//! History store: the ordered, append-only log of completed steps for one chain.
//!
//! Results are stored type-erased. A step is only ever read back through the
//! same `Task<A, R>` handle that recorded it, so the downcast to `R` succeeds
//! whenever the task identities match.

use std::any::Any;
use std::fmt;
use std::sync::Arc;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use super::ids::TaskId;

/// A type-erased cached result.
pub type CachedResult = Box<dyn Any + Send>;

/// One recorded step: `(task identity, result)`.
pub struct HistoryEntry {
    task_id: TaskId,
    task_name: Option<Arc<str>>,
    result: CachedResult,
    recorded_at: DateTime<Utc>,
}

impl HistoryEntry {
    pub fn new(task_id: TaskId, task_name: Option<Arc<str>>, result: CachedResult) -> Self {
        Self {
            task_id,
            task_name,
            result,
            recorded_at: Utc::now(),
        }
    }

    pub fn task_id(&self) -> TaskId {
        self.task_id
    }

    pub fn task_name(&self) -> Option<&str> {
        self.task_name.as_deref()
    }

    pub fn recorded_at(&self) -> DateTime<Utc> {
        self.recorded_at
    }

    /// Clone the cached result out as `R`. `None` if the stored type differs.
    pub fn result<R: Clone + 'static>(&self) -> Option<R> {
        self.result.downcast_ref::<R>().cloned()
    }
}

impl fmt::Debug for HistoryEntry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("HistoryEntry")
            .field("task_id", &self.task_id)
            .field("task_name", &self.task_name)
            .field("recorded_at", &self.recorded_at)
            .finish_non_exhaustive()
    }
}

/// Serializable view of one history entry.
///
/// `step` is 1-indexed, matching the numbering used in drift errors.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct HistoryRecord {
    pub step: usize,
    pub task_id: TaskId,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub task_name: Option<String>,

    pub recorded_at: DateTime<Utc>,
}

/// Append-only within a chain; cleared only when the chain is reset.
#[derive(Debug, Default)]
pub struct History {
    entries: Vec<HistoryEntry>,
}

impl History {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Entry at a 0-based cursor position.
    pub fn get(&self, cursor: usize) -> Option<&HistoryEntry> {
        self.entries.get(cursor)
    }

    /// Append an entry and return the 0-based position it was stored at.
    pub fn append(&mut self, entry: HistoryEntry) -> usize {
        self.entries.push(entry);
        self.entries.len() - 1
    }

    pub fn clear(&mut self) {
        self.entries.clear();
    }

    pub fn records(&self) -> Vec<HistoryRecord> {
        self.entries
            .iter()
            .enumerate()
            .map(|(i, entry)| HistoryRecord {
                step: i + 1,
                task_id: entry.task_id,
                task_name: entry.task_name.as_deref().map(str::to_string),
                recorded_at: entry.recorded_at,
            })
            .collect()
    }
}
