//! The commit-offset seam.
//!
//! The host's consumer group (or whatever tracks consumption progress) is
//! reached through [`OffsetCommitter`]. The committed value is a watermark:
//! the offset of the next record to consume, one past the last durable record.

mod memory;

pub use memory::InMemoryOffsetCommitter;

use crate::{error::SluiceResult, messages::TopicPartition};

/// Where per-partition commit watermarks are read from and written to.
#[async_trait::async_trait]
pub trait OffsetCommitter
where
    Self: Send + Sync + std::fmt::Debug,
{
    /// The last committed watermark, if anything was ever committed.
    async fn committed(&self, partition: &TopicPartition) -> SluiceResult<Option<i64>>;

    /// Commits a watermark.
    ///
    /// Implementations must be idempotent and must never move a watermark
    /// backwards: committing a value at or below the current one is a no-op.
    async fn commit(&self, partition: &TopicPartition, offset: i64) -> SluiceResult<()>;
}
