//! Offset resolution for one batch.

use migrate_core::{CommitPosition, InboundMessage};
use std::collections::BTreeMap;

/// Tracks which messages of a batch have been resolved.
///
/// A batch is committable only once every received message is resolved;
/// the commit position per partition is the highest resolved offset + 1.
#[derive(Debug, Default)]
pub struct OffsetTracker {
    received: usize,
    resolved: usize,
    highest: BTreeMap<(String, i32), i64>,
}

impl OffsetTracker {
    pub fn new(received: usize) -> Self {
        Self {
            received,
            ..Default::default()
        }
    }

    /// Mark a message resolved. Each message must be resolved exactly once.
    pub fn resolve(&mut self, message: &InboundMessage) {
        self.resolved += 1;
        self.highest
            .entry((message.topic.clone(), message.partition))
            .and_modify(|o| *o = (*o).max(message.offset))
            .or_insert(message.offset);
    }

    pub fn resolved(&self) -> usize {
        self.resolved
    }

    pub fn all_resolved(&self) -> bool {
        self.resolved == self.received
    }

    /// Positions to commit, ordered by topic and partition.
    pub fn positions(&self) -> Vec<CommitPosition> {
        self.highest
            .iter()
            .map(|((topic, partition), offset)| CommitPosition {
                topic: topic.clone(),
                partition: *partition,
                next_offset: offset + 1,
            })
            .collect()
    }
}
