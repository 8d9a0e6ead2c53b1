//! The pipeline coordinator.
//!
//! [`PipelineCoordinator`] owns the state of every assigned partition, routes
//! records into their batches and schedules flushes: drain, encode, upload,
//! advance the watermark, commit. Uploads run on spawned tasks, so ingestion
//! into a partition continues into a fresh batch while its previous batch is
//! being uploaded, and different partitions upload concurrently.

mod partition;
mod upload;

use std::{sync::Arc, time::Duration};

use dashmap::DashMap;
use futures::future::join_all;
use tokio::{task::JoinHandle, time::Instant};

use partition::{PartitionSlot, PartitionState};
use upload::Uploader;

use crate::{
    blob_store::BlobStore,
    config::SinkConfiguration,
    encoder::Encoder,
    error::{SluiceError, SluiceResult},
    messages::{FlushOutcome, Record, RecordOutcome, ReleasedPartition, TopicPartition},
    naming::NamingPolicy,
    offsets::OffsetCommitter,
    recovery::{RecoveryScanner, resume_offset},
    scheduler::{FlushScheduler, FlushTrigger},
    writer::ObjectWriter,
};

/// Routes records of the assigned partitions into objects.
#[derive(Debug)]
pub struct PipelineCoordinator {
    config: SinkConfiguration,
    partitions: DashMap<TopicPartition, Arc<PartitionSlot>>,
    recovery: RecoveryScanner,
    offsets: Arc<dyn OffsetCommitter>,
    uploader: Arc<Uploader>,
}

impl PipelineCoordinator {
    /// Creates a coordinator that owns no partitions yet.
    ///
    /// # Errors
    /// [`SluiceError::InvalidConfiguration`] if the configuration does not validate.
    pub fn new(
        config: SinkConfiguration,
        store: Arc<dyn BlobStore>,
        offsets: Arc<dyn OffsetCommitter>,
    ) -> SluiceResult<Self> {
        config.validate()?;

        let naming = NamingPolicy::new(
            config.prefix.clone(),
            config.name_template,
            config.compression,
        );
        let encoder = Encoder::from_config(&config);

        Ok(Self {
            partitions: DashMap::new(),
            recovery: RecoveryScanner::new(store.clone(), naming.clone(), encoder.clone()),
            uploader: Arc::new(Uploader::new(
                naming,
                encoder,
                ObjectWriter::new(store, config.retry.clone()),
                offsets.clone(),
                config.max_concurrent_uploads,
            )),
            offsets,
            config,
        })
    }

    /// Takes ownership of the given partitions.
    ///
    /// Each partition resumes at the higher of the end of its newest stored
    /// object and its committed watermark. When the store is ahead (a crash
    /// between upload and commit), the recovered watermark is committed.
    /// Partitions that are already owned are left untouched.
    #[tracing::instrument(skip_all, name = "on_partitions_assigned")]
    pub async fn on_partitions_assigned(
        &self,
        partitions: impl IntoIterator<Item = TopicPartition>,
    ) -> SluiceResult<()> {
        for partition in partitions {
            if self.partitions.contains_key(&partition) {
                tracing::debug!("{} is already assigned.", partition);
                continue;
            }

            let durable = self.recovery.last_durable(&partition).await?;
            let committed = self.offsets.committed(&partition).await?;
            let watermark = resume_offset(durable.as_ref(), committed);

            if let Some(durable) = durable {
                if committed.is_none_or(|committed| durable.end_offset > committed) {
                    tracing::info!(
                        "{} is stored up to {} but committed at {:?}, committing.",
                        partition,
                        durable.end_offset,
                        committed
                    );
                    self.offsets.commit(&partition, durable.end_offset).await?;
                }
            }

            tracing::info!("Assigned {}, resuming at {:?}.", partition, watermark);

            self.partitions.insert(
                partition.clone(),
                Arc::new(PartitionSlot::new(
                    partition,
                    FlushScheduler::from_config(&self.config),
                    watermark,
                )),
            );
        }

        Ok(())
    }

    /// Buffers a record, scheduling an upload of its batch if that makes it
    /// flush-ready.
    ///
    /// Records below the partition's watermark are already durable and are
    /// skipped. Any other offset than the next expected one is an ordering
    /// violation. The upload runs in the background; its outcome is reported
    /// by [`PipelineCoordinator::tick`] or [`PipelineCoordinator::wait_for_uploads`].
    ///
    /// # Errors
    /// [`SluiceError::UnassignedPartition`] for a partition this coordinator
    /// does not own, which is the only recoverable error. A failed upload of
    /// this partition that was not reported yet is returned instead of
    /// buffering the record; the failed batch is kept for the next attempt.
    pub async fn on_record(&self, record: Record) -> SluiceResult<RecordOutcome> {
        let partition = record.topic_partition();

        let Some(slot) = self.slot(&partition) else {
            tracing::warn!("Rejecting record for unassigned {}.", partition);

            return Err(SluiceError::UnassignedPartition {
                topic: record.topic,
                partition: record.partition,
            });
        };

        let mut guard = slot.state.lock().await;
        let state = &mut *guard;

        if state.scheduler.is_closed() {
            return Err(SluiceError::UnassignedPartition {
                topic: record.topic,
                partition: record.partition,
            });
        }

        if let Some(err) = state.failure.take() {
            return Err(err);
        }

        if state.watermark.is_some_and(|watermark| record.offset < watermark) {
            tracing::debug!("Skipping redelivered offset {} of {}.", record.offset, partition);
            return Ok(RecordOutcome::Skipped);
        }

        if let Some(expected) = state.next_offset {
            if record.offset != expected {
                tracing::error!(
                    "Offset {} of {} received, expected {}.",
                    record.offset,
                    partition,
                    expected
                );

                return Err(SluiceError::OrderingViolation {
                    topic: record.topic,
                    partition: record.partition,
                    offset: record.offset,
                    expected,
                });
            }
        }

        let offset = record.offset;
        state.batch.append(record)?;
        state.next_offset = Some(offset + 1);

        Ok(match state.scheduler.evaluate(&state.batch, Instant::now()) {
            Some(trigger) if !state.upload_scheduled => {
                self.uploader.schedule(&slot, state);
                RecordOutcome::FlushScheduled(trigger)
            }
            _ => RecordOutcome::Appended,
        })
    }

    /// Schedules the upload of every partition whose batch is due, and reports
    /// the flushes finished since the last report.
    ///
    /// Meant to be called periodically so that time thresholds fire on idle
    /// partitions and failed batches are retried. Every partition is visited;
    /// the first unreported failure is returned after all of them were.
    #[tracing::instrument(skip_all, name = "tick")]
    pub async fn tick(&self) -> SluiceResult<Vec<FlushOutcome>> {
        let mut report = Report::default();

        for slot in self.slots() {
            let mut guard = slot.state.lock().await;
            let state = &mut *guard;

            report.collect(state);

            if state.scheduler.evaluate(&state.batch, Instant::now()).is_some() {
                self.uploader.schedule(&slot, state);
            }
        }

        report.finish()
    }

    /// Waits until no partition has an upload running, then reports the
    /// flushes finished since the last report.
    ///
    /// Nothing new is scheduled; a batch that is pending after a failure stays
    /// pending.
    #[tracing::instrument(skip_all, name = "wait_for_uploads")]
    pub async fn wait_for_uploads(&self) -> SluiceResult<Vec<FlushOutcome>> {
        let mut report = Report::default();

        for slot in self.slots() {
            loop {
                let finished = slot.flushed.notified();
                let mut state = slot.state.lock().await;

                if !state.upload_scheduled {
                    report.collect(&mut state);
                    break;
                }

                drop(state);
                finished.await;
            }
        }

        report.finish()
    }

    /// Calls [`PipelineCoordinator::tick`] on an interval until the handle is aborted.
    pub fn spawn_ticker(self: &Arc<Self>, interval: Duration) -> JoinHandle<()> {
        let coordinator = self.clone();

        tokio::task::spawn(async move {
            let mut ticker = tokio::time::interval(interval);
            ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);

            loop {
                ticker.tick().await;

                match coordinator.tick().await {
                    Ok(outcomes) => {
                        for outcome in outcomes {
                            tracing::debug!("Reported flush of {}.", outcome.object_name);
                        }
                    }
                    Err(err) => {
                        tracing::error!("Error occurred when trying to flush partitions: {:#?}", err);
                    }
                }
            }
        })
    }

    /// Releases the given partitions, flushing what they buffered first.
    ///
    /// An in-flight flush is awaited, then the remaining batch is flushed with
    /// [`FlushTrigger::ForcedByRebalance`], all within the configured grace
    /// period. Batches that cannot be flushed in time are dropped from local
    /// state; their records are above the watermark and will be redelivered.
    /// Ownership is released in every case.
    #[tracing::instrument(skip_all, name = "on_partitions_revoked")]
    pub async fn on_partitions_revoked(
        &self,
        partitions: impl IntoIterator<Item = TopicPartition>,
    ) -> SluiceResult<Vec<ReleasedPartition>> {
        let partitions = partitions.into_iter().collect::<Vec<_>>();

        self.release(partitions, FlushTrigger::ForcedByRebalance)
            .await
    }

    /// Releases every partition as on revocation, with [`FlushTrigger::ForcedByShutdown`].
    #[tracing::instrument(skip_all, name = "shutdown")]
    pub async fn shutdown(&self) -> SluiceResult<Vec<ReleasedPartition>> {
        let partitions = self.assigned_partitions();

        self.release(partitions, FlushTrigger::ForcedByShutdown)
            .await
    }

    /// The watermark of an owned partition: the next offset to consume.
    pub async fn committed_watermark(&self, partition: &TopicPartition) -> Option<i64> {
        let slot = self.slot(partition)?;
        let state = slot.state.lock().await;

        state.watermark
    }

    /// The partitions currently owned, sorted.
    pub fn assigned_partitions(&self) -> Vec<TopicPartition> {
        let mut partitions = self
            .partitions
            .iter()
            .map(|entry| entry.key().clone())
            .collect::<Vec<_>>();

        partitions.sort();

        partitions
    }

    fn slot(&self, partition: &TopicPartition) -> Option<Arc<PartitionSlot>> {
        self.partitions.get(partition).map(|entry| entry.value().clone())
    }

    fn slots(&self) -> Vec<Arc<PartitionSlot>> {
        self.partitions
            .iter()
            .map(|entry| entry.value().clone())
            .collect()
    }

    async fn release(
        &self,
        partitions: Vec<TopicPartition>,
        trigger: FlushTrigger,
    ) -> SluiceResult<Vec<ReleasedPartition>> {
        let results = join_all(
            partitions
                .into_iter()
                .map(|partition| self.release_partition(partition, trigger)),
        )
        .await;

        let mut released = Vec::new();
        let mut first_error = None;

        for (partition, error) in results {
            released.push(partition);

            if let Some(err) = error {
                first_error.get_or_insert(err);
            }
        }

        match first_error {
            Some(err) => Err(err),
            None => Ok(released),
        }
    }

    async fn release_partition(
        &self,
        partition: TopicPartition,
        trigger: FlushTrigger,
    ) -> (ReleasedPartition, Option<SluiceError>) {
        let Some(slot) = self.slot(&partition) else {
            tracing::debug!("{} is not assigned, nothing to release.", partition);
            return (ReleasedPartition::Empty(partition), None);
        };

        let drained =
            tokio::time::timeout(self.config.grace_period(), self.drain_partition(&slot, trigger))
                .await;

        let mut state = slot.state.lock().await;
        state.scheduler.close();
        self.partitions
            .remove_if(&partition, |_, current| Arc::ptr_eq(current, &slot));

        let pending = state.pending_records();
        drop(state);
        slot.flushed.notify_waiters();

        match drained {
            Ok(Ok(flushed)) if pending == 0 => {
                tracing::info!("Released {}.", partition);

                match flushed {
                    Some(outcome) => (ReleasedPartition::Flushed(outcome), None),
                    None => (ReleasedPartition::Empty(partition), None),
                }
            }
            Ok(Ok(_)) => {
                tracing::warn!("Released {}, dropping {} late record(s).", partition, pending);
                (ReleasedPartition::Dropped { partition, records: pending }, None)
            }
            Ok(Err(err)) => {
                tracing::error!("Released {} after a failed flush: {}", partition, err);
                (
                    ReleasedPartition::Dropped { partition, records: pending },
                    Some(err),
                )
            }
            Err(_) => {
                tracing::warn!(
                    "Grace period elapsed for {}, dropping {} record(s).",
                    partition,
                    pending
                );
                (ReleasedPartition::Dropped { partition, records: pending }, None)
            }
        }
    }

    /// Forces uploads until nothing is buffered or in flight, waiting out
    /// uploads that were already running.
    async fn drain_partition(
        &self,
        slot: &Arc<PartitionSlot>,
        trigger: FlushTrigger,
    ) -> SluiceResult<Option<FlushOutcome>> {
        let mut last = None;

        {
            let mut state = slot.state.lock().await;

            if let Some(err) = state.failure.take() {
                tracing::debug!("Retrying {} after an earlier failure: {}", slot.partition, err);
            }
        }

        loop {
            // Registered before the check so a completion in between is not missed.
            let finished = slot.flushed.notified();

            {
                let mut guard = slot.state.lock().await;
                let state = &mut *guard;

                if let Some(outcome) = state.completed.drain(..).last() {
                    last = Some(outcome);
                }

                if let Some(err) = state.failure.take() {
                    return Err(err);
                }

                if state.scheduler.is_closed() {
                    return Ok(last);
                }

                if !state.upload_scheduled {
                    if state.batch.is_empty() {
                        return Ok(last);
                    }

                    if state.scheduler.force(trigger, &state.batch).is_none() {
                        return Ok(last);
                    }

                    self.uploader.schedule(slot, state);
                }
            }

            finished.await;
        }
    }
}

/// Flush outcomes and the first failure gathered across partitions.
#[derive(Debug, Default)]
struct Report {
    outcomes: Vec<FlushOutcome>,
    first_error: Option<SluiceError>,
}

impl Report {
    fn collect(&mut self, state: &mut PartitionState) {
        self.outcomes.append(&mut state.completed);

        if let Some(err) = state.failure.take() {
            self.first_error.get_or_insert(err);
        }
    }

    fn finish(mut self) -> SluiceResult<Vec<FlushOutcome>> {
        match self.first_error {
            Some(err) => Err(err),
            None => {
                self.outcomes
                    .sort_by(|a, b| (&a.partition, a.base_offset).cmp(&(&b.partition, b.base_offset)));
                Ok(self.outcomes)
            }
        }
    }
}
