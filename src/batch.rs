//! In-memory accumulation of a single partition's records awaiting flush.

use tokio::time::Instant;

use crate::{
    error::{SluiceError, SluiceResult},
    messages::{Record, TopicPartition},
};

/// An ordered, per-partition batch of records.
///
/// Offsets are strictly increasing; the owning coordinator guarantees that
/// `append` and `drain` never interleave.
#[derive(Debug)]
pub struct RecordBatch {
    partition: TopicPartition,
    records: Vec<Record>,
    size_bytes: u64,
    opened_at: Option<Instant>,
}

impl RecordBatch {
    /// Creates an empty batch for the given partition.
    pub fn new(partition: TopicPartition) -> Self {
        Self {
            partition,
            records: Vec::new(),
            size_bytes: 0,
            opened_at: None,
        }
    }

    /// Appends a record, rejecting anything that is not strictly after the last one.
    ///
    /// On error the batch is left untouched.
    pub fn append(&mut self, record: Record) -> SluiceResult<()> {
        if record.topic != self.partition.0 || record.partition != self.partition.1 {
            return Err(SluiceError::Generic(format!(
                "Record for {}-{} appended to batch of {}",
                record.topic, record.partition, self.partition
            )));
        }

        if let Some(last) = self.last_offset() {
            if record.offset <= last {
                return Err(SluiceError::OrderingViolation {
                    topic: record.topic,
                    partition: record.partition,
                    offset: record.offset,
                    expected: last + 1,
                });
            }
        }

        if self.records.is_empty() {
            self.opened_at = Some(Instant::now());
        }

        self.size_bytes += record.size_estimate();
        self.records.push(record);

        Ok(())
    }

    /// Whether nothing is buffered.
    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }

    /// Running size estimate of the buffered records.
    pub fn size_bytes(&self) -> u64 {
        self.size_bytes
    }

    /// Number of buffered records.
    pub fn record_count(&self) -> usize {
        self.records.len()
    }

    /// Offset of the first buffered record.
    pub fn base_offset(&self) -> Option<i64> {
        self.records.first().map(|r| r.offset)
    }

    /// Offset of the last buffered record.
    pub fn last_offset(&self) -> Option<i64> {
        self.records.last().map(|r| r.offset)
    }

    /// When the first record of this batch was appended.
    pub fn opened_at(&self) -> Option<Instant> {
        self.opened_at
    }

    /// Takes every buffered record, leaving the batch empty.
    pub fn drain(&mut self) -> Vec<Record> {
        self.size_bytes = 0;
        self.opened_at = None;
        std::mem::take(&mut self.records)
    }

    /// Puts records taken by [`RecordBatch::drain`] back in front of whatever was
    /// appended since, after a failed flush.
    pub fn restore(&mut self, mut drained: Vec<Record>) {
        if drained.is_empty() {
            return;
        }

        let restored_size = drained.iter().fold(0, |acc, r| acc + r.size_estimate());

        drained.append(&mut self.records);
        self.records = drained;
        self.size_bytes += restored_size;
        self.opened_at = self.opened_at.or_else(|| Some(Instant::now()));
    }
}
