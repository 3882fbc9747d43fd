use std::collections::BTreeMap;

use serde::Serialize;

/// Snapshot of one topic's queue state.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct TopicStats {
    pub topic: String,
    pub ready: u64,
    pub leased: u64,
    pub done: u64,
    pub dead_letters: u64,
    /// Ready count keyed by partition id. Partitions with nothing ready are absent.
    pub ready_per_partition: BTreeMap<u32, u64>,
}

impl TopicStats {
    /// Messages not yet completed.
    pub fn in_flight(&self) -> u64 {
        self.ready + self.leased
    }
}
