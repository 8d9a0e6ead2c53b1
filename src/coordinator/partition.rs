use tokio::sync::{Mutex, Notify};

use crate::{
    batch::RecordBatch,
    error::SluiceError,
    messages::{FlushOutcome, TopicPartition},
    scheduler::FlushScheduler,
};

/// Everything the coordinator tracks for one owned partition.
#[derive(Debug)]
pub(crate) struct PartitionSlot {
    pub(crate) partition: TopicPartition,
    pub(crate) state: Mutex<PartitionState>,
    /// Signalled whenever an upload of this partition finishes, successfully or not.
    pub(crate) flushed: Notify,
}

#[derive(Debug)]
pub(crate) struct PartitionState {
    pub(crate) batch: RecordBatch,
    pub(crate) scheduler: FlushScheduler,
    /// Next offset to consume; everything below it is durable.
    pub(crate) watermark: Option<i64>,
    /// Offset the next appended record must carry.
    pub(crate) next_offset: Option<i64>,
    /// Records drained into the upload currently in flight.
    pub(crate) in_flight: usize,
    /// Whether an upload task owns this partition's flushes.
    pub(crate) upload_scheduled: bool,
    /// Flushes finished since they were last reported.
    pub(crate) completed: Vec<FlushOutcome>,
    /// The first failure since it was last reported.
    pub(crate) failure: Option<SluiceError>,
}

impl PartitionSlot {
    pub(crate) fn new(
        partition: TopicPartition,
        scheduler: FlushScheduler,
        watermark: Option<i64>,
    ) -> Self {
        Self {
            state: Mutex::new(PartitionState {
                batch: RecordBatch::new(partition.clone()),
                scheduler,
                watermark,
                next_offset: watermark,
                in_flight: 0,
                upload_scheduled: false,
                completed: Vec::new(),
                failure: None,
            }),
            partition,
            flushed: Notify::new(),
        }
    }
}

impl PartitionState {
    /// Records that would be lost if the partition were released now.
    pub(crate) fn pending_records(&self) -> usize {
        self.batch.record_count() + self.in_flight
    }

    /// Moves the watermark forward, never back.
    pub(crate) fn advance_watermark(&mut self, offset: i64) -> i64 {
        let advanced = self.watermark.map_or(offset, |current| current.max(offset));
        self.watermark = Some(advanced);
        advanced
    }
}
