//! Per-partition flush lifecycle.
//!
//! ```text
//!   Open --(threshold | force)--> FlushPending --(permit + drain)--> Flushing
//!    ^                                 ^                                |
//!    |                                 +-----------(failure)------------+
//!    +-------------------------(upload confirmed)-----------------------+
//!
//!   any state --(revocation | shutdown)--> Closed
//! ```

use std::time::Duration;

use tokio::time::Instant;

use crate::{batch::RecordBatch, config::SinkConfiguration};

/// Why a batch became flush-ready.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FlushTrigger {
    /// The batch reached the configured byte size.
    SizeThreshold(u64),
    /// The batch reached the configured record count.
    RecordThreshold(usize),
    /// The oldest buffered record reached the configured age.
    TimeThreshold(Duration),
    /// The partition is being revoked.
    ForcedByRebalance,
    /// The connector is shutting down.
    ForcedByShutdown,
}

/// State of a partition's flush lifecycle.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FlushState {
    /// Accepting records, evaluating triggers.
    Open,
    /// A trigger fired; waiting for an upload slot.
    FlushPending(FlushTrigger),
    /// The drained batch is being encoded and uploaded.
    Flushing(FlushTrigger),
    /// The partition is no longer owned.
    Closed,
}

/// Decides when a partition's batch is flushed.
#[derive(Debug)]
pub struct FlushScheduler {
    state: FlushState,
    flush_size_in_bytes: u64,
    max_records: Option<usize>,
    flush_interval: Duration,
}

impl FlushScheduler {
    /// Creates an open scheduler with explicit thresholds.
    pub fn new(flush_size_in_bytes: u64, max_records: Option<usize>, flush_interval: Duration) -> Self {
        Self {
            state: FlushState::Open,
            flush_size_in_bytes,
            max_records,
            flush_interval,
        }
    }

    /// Creates an open scheduler with the configured thresholds.
    pub fn from_config(config: &SinkConfiguration) -> Self {
        Self::new(
            config.flush_size_in_bytes,
            config.max_records_per_batch,
            config.flush_interval(),
        )
    }

    /// Current state.
    pub fn state(&self) -> FlushState {
        self.state
    }

    /// Whether an upload for this partition is in flight.
    pub fn is_flushing(&self) -> bool {
        matches!(self.state, FlushState::Flushing(_))
    }

    /// Whether the partition has been released.
    pub fn is_closed(&self) -> bool {
        self.state == FlushState::Closed
    }

    /// Checks the thresholds against the batch.
    ///
    /// Moves `Open` to `FlushPending` when one is met. A batch that is already
    /// pending reports its trigger again, so whoever holds the next upload
    /// permit can pick it up. Size is checked before count, count before age.
    pub fn evaluate(&mut self, batch: &RecordBatch, now: Instant) -> Option<FlushTrigger> {
        match self.state {
            FlushState::Open => {}
            FlushState::FlushPending(trigger) => return Some(trigger),
            FlushState::Flushing(_) | FlushState::Closed => return None,
        }

        if batch.is_empty() {
            return None;
        }

        let trigger = if batch.size_bytes() >= self.flush_size_in_bytes {
            FlushTrigger::SizeThreshold(batch.size_bytes())
        } else if self
            .max_records
            .is_some_and(|max| batch.record_count() >= max)
        {
            FlushTrigger::RecordThreshold(batch.record_count())
        } else if batch
            .opened_at()
            .is_some_and(|opened| now.saturating_duration_since(opened) >= self.flush_interval)
        {
            FlushTrigger::TimeThreshold(self.flush_interval)
        } else {
            return None;
        };

        self.state = FlushState::FlushPending(trigger);

        Some(trigger)
    }

    /// Marks a non-empty batch flush-ready regardless of thresholds.
    ///
    /// Has no effect while a flush is in flight or after close.
    pub fn force(&mut self, trigger: FlushTrigger, batch: &RecordBatch) -> Option<FlushTrigger> {
        match self.state {
            FlushState::Open | FlushState::FlushPending(_) if !batch.is_empty() => {
                self.state = FlushState::FlushPending(trigger);
                Some(trigger)
            }
            _ => None,
        }
    }

    /// `FlushPending -> Flushing`. Returns `None` if someone else already started.
    pub fn begin_flush(&mut self) -> Option<FlushTrigger> {
        match self.state {
            FlushState::FlushPending(trigger) => {
                self.state = FlushState::Flushing(trigger);
                Some(trigger)
            }
            _ => None,
        }
    }

    /// `Flushing -> Open` after a confirmed upload.
    pub fn complete(&mut self) {
        if self.is_flushing() {
            self.state = FlushState::Open;
        }
    }

    /// `Flushing -> FlushPending` after a failed encode or upload.
    pub fn abort(&mut self) {
        if let FlushState::Flushing(trigger) = self.state {
            self.state = FlushState::FlushPending(trigger);
        }
    }

    /// Releases the partition.
    pub fn close(&mut self) {
        self.state = FlushState::Closed;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::messages::{Record, TopicPartition};

    fn batch_with(offsets: std::ops::Range<i64>, value_size: usize) -> RecordBatch {
        let mut batch = RecordBatch::new(TopicPartition::new("t", 0));
        for offset in offsets {
            batch
                .append(Record::new("t", 0, offset, 0, vec![0; value_size]))
                .expect("offsets are increasing");
        }
        batch
    }

    #[test]
    fn test_empty_batch_never_triggers() {
        let mut scheduler = FlushScheduler::new(1, Some(1), Duration::ZERO);
        let batch = batch_with(0..0, 0);

        assert_eq!(scheduler.evaluate(&batch, Instant::now()), None);
        assert_eq!(scheduler.force(FlushTrigger::ForcedByRebalance, &batch), None);
        assert_eq!(scheduler.state(), FlushState::Open);
    }

    #[test]
    fn test_record_threshold() {
        let mut scheduler = FlushScheduler::new(u64::MAX, Some(3), Duration::from_secs(60));
        let now = Instant::now();

        assert_eq!(scheduler.evaluate(&batch_with(10..12, 1), now), None);
        assert_eq!(
            scheduler.evaluate(&batch_with(10..13, 1), now),
            Some(FlushTrigger::RecordThreshold(3))
        );
        assert_eq!(
            scheduler.state(),
            FlushState::FlushPending(FlushTrigger::RecordThreshold(3))
        );
    }

    #[test]
    fn test_size_threshold_wins_ties() {
        let mut scheduler = FlushScheduler::new(10, Some(1), Duration::ZERO);
        let batch = batch_with(0..1, 100);

        assert!(matches!(
            scheduler.evaluate(&batch, Instant::now() + Duration::from_secs(1)),
            Some(FlushTrigger::SizeThreshold(_))
        ));
    }

    #[test]
    fn test_time_threshold() {
        let interval = Duration::from_millis(500);
        let mut scheduler = FlushScheduler::new(u64::MAX, None, interval);
        let batch = batch_with(42..43, 1);
        let opened = batch.opened_at().expect("batch is not empty");

        assert_eq!(scheduler.evaluate(&batch, opened + Duration::from_millis(499)), None);
        assert_eq!(
            scheduler.evaluate(&batch, opened + interval),
            Some(FlushTrigger::TimeThreshold(interval))
        );
    }

    #[test]
    fn test_full_cycle() {
        let mut scheduler = FlushScheduler::new(u64::MAX, Some(1), Duration::from_secs(60));
        let batch = batch_with(0..1, 1);

        let trigger = scheduler.evaluate(&batch, Instant::now());
        assert_eq!(scheduler.begin_flush(), trigger);
        assert!(scheduler.is_flushing());

        // No evaluation, no force and no second flusher while Flushing.
        assert_eq!(scheduler.evaluate(&batch, Instant::now()), None);
        assert_eq!(scheduler.force(FlushTrigger::ForcedByShutdown, &batch), None);
        assert_eq!(scheduler.begin_flush(), None);

        scheduler.complete();
        assert_eq!(scheduler.state(), FlushState::Open);
    }

    #[test]
    fn test_abort_returns_to_pending() {
        let mut scheduler = FlushScheduler::new(u64::MAX, None, Duration::from_secs(60));
        let batch = batch_with(0..2, 1);

        scheduler.force(FlushTrigger::ForcedByRebalance, &batch);
        scheduler.begin_flush();
        scheduler.abort();

        assert_eq!(
            scheduler.state(),
            FlushState::FlushPending(FlushTrigger::ForcedByRebalance)
        );
        assert_eq!(
            scheduler.evaluate(&batch, Instant::now()),
            Some(FlushTrigger::ForcedByRebalance)
        );
    }

    #[test]
    fn test_force_overrides_pending_trigger() {
        let mut scheduler = FlushScheduler::new(u64::MAX, Some(1), Duration::from_secs(60));
        let batch = batch_with(0..1, 1);

        scheduler.evaluate(&batch, Instant::now());

        assert_eq!(
            scheduler.force(FlushTrigger::ForcedByShutdown, &batch),
            Some(FlushTrigger::ForcedByShutdown)
        );
    }

    #[test]
    fn test_closed_is_terminal() {
        let mut scheduler = FlushScheduler::new(1, Some(1), Duration::ZERO);
        let batch = batch_with(0..1, 1);

        scheduler.close();

        assert_eq!(scheduler.evaluate(&batch, Instant::now()), None);
        assert_eq!(scheduler.force(FlushTrigger::ForcedByRebalance, &batch), None);
        assert_eq!(scheduler.begin_flush(), None);
        assert!(scheduler.is_closed());
    }
}
