//! Consumer-group drain status.

use serde::Serialize;

/// Offsets of one partition as seen by one consumer group.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct PartitionOffsets {
    pub partition: i32,
    /// Low watermark (first retained offset).
    pub log_start: i64,
    /// High watermark (next offset to be written).
    pub log_end: i64,
    /// Next offset the group will read, if it has committed anything.
    pub committed: Option<i64>,
}

impl PartitionOffsets {
    /// Messages still to be consumed. Without a commit the group starts from
    /// the low watermark, and a commit below it counts as the low watermark
    /// since those messages no longer exist.
    pub fn lag(&self) -> i64 {
        let position = self
            .committed
            .map_or(self.log_start, |c| c.max(self.log_start));
        (self.log_end - position).max(0)
    }
}

/// Aggregate drain view of a consumer group on one topic.
///
/// Recomputed on every poll, never persisted.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct DrainStatus {
    pub group_id: String,
    pub log_end_total: i64,
    pub lag_total: i64,
    pub partitions: Vec<PartitionOffsets>,
}

impl DrainStatus {
    pub fn from_partitions(group_id: impl Into<String>, partitions: Vec<PartitionOffsets>) -> Self {
        let log_end_total = partitions.iter().map(|p| p.log_end).sum();
        let lag_total = partitions.iter().map(PartitionOffsets::lag).sum();
        Self {
            group_id: group_id.into(),
            log_end_total,
            lag_total,
            partitions,
        }
    }

    /// Drained when nothing was ever produced or everything was consumed.
    ///
    /// `log_end_total == 0` distinguishes a job with zero source rows from one
    /// whose consumer has not caught up yet.
    pub fn is_drained(&self) -> bool {
        self.log_end_total == 0 || self.lag_total == 0
    }
}
