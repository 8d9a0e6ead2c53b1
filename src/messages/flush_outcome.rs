use crate::scheduler::FlushTrigger;

use super::TopicPartition;

/// Result of a completed flush.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FlushOutcome {
    /// The partition that was flushed.
    pub partition: TopicPartition,
    /// Name of the object the batch was written to.
    pub object_name: String,
    /// Offset of the first record in the object.
    pub base_offset: i64,
    /// Number of records in the object.
    pub record_count: usize,
    /// Watermark committed upstream after the flush (last offset + 1).
    pub committed_offset: i64,
    /// What caused the flush.
    pub trigger: FlushTrigger,
    /// Whether an identical object was already stored under the same name.
    pub already_existed: bool,
}

/// What happened to a record handed to the coordinator.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RecordOutcome {
    /// Buffered in the partition's open batch.
    Appended,
    /// Below the commit watermark, already durable.
    Skipped,
    /// Buffered, and the batch it landed in is now being uploaded.
    FlushScheduled(FlushTrigger),
}

/// How a partition was released on revocation or shutdown.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ReleasedPartition {
    /// Nothing was buffered.
    Empty(TopicPartition),
    /// The buffered batch was flushed before release.
    Flushed(FlushOutcome),
    /// The batch could not be flushed in time and was dropped from local state.
    Dropped {
        /// The released partition.
        partition: TopicPartition,
        /// Number of records dropped, to be redelivered upstream.
        records: usize,
    },
}
