use std::sync::Arc;

use tokio::{sync::Semaphore, time::Instant};

use super::partition::{PartitionSlot, PartitionState};
use crate::{
    encoder::Encoder,
    error::SluiceResult,
    messages::FlushOutcome,
    naming::NamingPolicy,
    offsets::OffsetCommitter,
    writer::ObjectWriter,
};

/// Encodes, uploads and commits flush-ready batches on spawned tasks.
///
/// At most one task runs per partition, and at most `permits` uploads are in
/// flight across all partitions. A task outlives whoever scheduled it, so
/// dropping a caller's future never strands a drained batch.
#[derive(Debug)]
pub(crate) struct Uploader {
    naming: NamingPolicy,
    encoder: Encoder,
    writer: ObjectWriter,
    offsets: Arc<dyn OffsetCommitter>,
    permits: Arc<Semaphore>,
}

impl Uploader {
    pub(crate) fn new(
        naming: NamingPolicy,
        encoder: Encoder,
        writer: ObjectWriter,
        offsets: Arc<dyn OffsetCommitter>,
        max_concurrent_uploads: usize,
    ) -> Self {
        Self {
            naming,
            encoder,
            writer,
            offsets,
            permits: Arc::new(Semaphore::new(max_concurrent_uploads)),
        }
    }

    /// Spawns the upload task of a flush-ready partition, unless it already runs.
    ///
    /// Must be called with the slot's state locked.
    pub(crate) fn schedule(self: &Arc<Self>, slot: &Arc<PartitionSlot>, state: &mut PartitionState) {
        if state.upload_scheduled {
            return;
        }

        state.upload_scheduled = true;

        let uploader = self.clone();
        let slot = slot.clone();

        tokio::task::spawn(async move { uploader.run(slot).await });
    }

    /// Flushes until the partition is no longer flush-ready or a flush fails.
    #[tracing::instrument(skip_all, name = "upload", fields(partition = %slot.partition))]
    async fn run(self: Arc<Self>, slot: Arc<PartitionSlot>) {
        loop {
            let result = self.flush_if_ready(&slot).await;

            let mut guard = slot.state.lock().await;
            let state = &mut *guard;

            let again = match result {
                Ok(outcome) => {
                    state.completed.extend(outcome);
                    state.scheduler.evaluate(&state.batch, Instant::now()).is_some()
                }
                Err(err) => {
                    state.failure.get_or_insert(err);
                    false
                }
            };

            if !again {
                state.upload_scheduled = false;
            }

            slot.flushed.notify_waiters();

            if !again {
                return;
            }
        }
    }

    /// Drains a pending batch, encodes it, writes it, then advances and commits
    /// the watermark.
    ///
    /// Returns `None` when the batch was not pending anymore or the partition
    /// was released during the upload. On failure the batch is restored and
    /// left pending.
    async fn flush_if_ready(&self, slot: &PartitionSlot) -> SluiceResult<Option<FlushOutcome>> {
        // Waiting batches stay FlushPending and keep accepting records.
        let _permit = self.permits.clone().acquire_owned().await?;

        let (trigger, records) = {
            let mut state = slot.state.lock().await;

            let Some(trigger) = state.scheduler.begin_flush() else {
                return Ok(None);
            };

            let records = state.batch.drain();
            state.in_flight = records.len();

            (trigger, records)
        };

        let (Some(first), Some(last)) = (records.first(), records.last()) else {
            let mut state = slot.state.lock().await;
            state.in_flight = 0;
            state.scheduler.complete();
            return Ok(None);
        };

        let base_offset = first.offset;
        let last_offset = last.offset;
        let record_count = records.len();
        let name = self.naming.name_for(
            slot.partition.topic(),
            slot.partition.partition(),
            base_offset,
            first.timestamp_millis,
        );

        tracing::debug!(
            "Flushing {} record(s) from offset {} as {} ({:?}).",
            record_count,
            base_offset,
            name,
            trigger
        );

        let records = Arc::new(records);
        let encoder = self.encoder.clone();
        let to_encode = records.clone();

        let written = match tokio::task::spawn_blocking(move || encoder.encode(&to_encode)).await {
            Ok(Ok(payload)) => self.writer.write(&name, payload).await,
            Ok(Err(err)) => Err(err),
            Err(err) => Err(err.into()),
        };

        let mut state = slot.state.lock().await;
        state.in_flight = 0;

        let ack = match written {
            Ok(ack) => ack,
            Err(err) => {
                tracing::error!("Flush of {} failed, keeping the batch: {}", name, err);

                state.batch.restore(Arc::unwrap_or_clone(records));
                state.scheduler.abort();

                return Err(err);
            }
        };

        if state.scheduler.is_closed() {
            tracing::warn!(
                "{} was released during the upload of {}, not committing.",
                slot.partition,
                name
            );
            return Ok(None);
        }

        let committed_offset = state.advance_watermark(last_offset + 1);
        state.scheduler.complete();

        self.offsets.commit(&slot.partition, committed_offset).await?;

        tracing::info!(
            "Flushed {} record(s) to {}, watermark now {}.",
            record_count,
            ack.name,
            committed_offset
        );

        Ok(Some(FlushOutcome {
            partition: slot.partition.clone(),
            object_name: ack.name.into(),
            base_offset,
            record_count,
            committed_offset,
            trigger,
            already_existed: ack.already_existed,
        }))
    }
}
