use serde::{Deserialize, Serialize};

/// Counters for the current (or last) chain of a driver.
///
/// `chains_completed` spans the driver's lifetime; the rest restart with
/// every launch.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChainStats {
    pub chains_completed: u64,

    /// Body invocations (the first run plus one per resumption).
    pub invocations: u64,

    /// Dispatches answered from history.
    pub replayed_steps: u64,

    /// Dispatches that ran the underlying task.
    pub executed_steps: u64,

    /// Async steps dispatched (each one suspends the body once).
    pub suspensions: u64,
}

impl ChainStats {
    pub(crate) fn reset_chain(&mut self) {
        *self = Self {
            chains_completed: self.chains_completed,
            ..Self::default()
        };
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn reset_keeps_lifetime_counter() {
        let mut stats = ChainStats {
            chains_completed: 3,
            invocations: 4,
            replayed_steps: 6,
            executed_steps: 4,
            suspensions: 3,
        };
        stats.reset_chain();
        assert_eq!(
            stats,
            ChainStats {
                chains_completed: 3,
                ..ChainStats::default()
            }
        );
    }

    #[test]
    fn stats_serialize_as_flat_object() {
        let v = serde_json::to_value(ChainStats::default()).unwrap();
        assert_eq!(v["invocations"], 0);
        assert_eq!(v["chains_completed"], 0);
    }
}
