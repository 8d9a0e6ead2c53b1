use dashmap::DashMap;

use super::OffsetCommitter;
use crate::{error::SluiceResult, messages::TopicPartition};

/// Process-local [`OffsetCommitter`].
///
/// Watermarks are lost with the process; useful for tests, demos and hosts
/// that persist progress elsewhere.
#[derive(Debug, Default)]
pub struct InMemoryOffsetCommitter {
    offsets: DashMap<TopicPartition, i64>,
}

impl InMemoryOffsetCommitter {
    /// Creates an empty committer.
    pub fn new() -> Self {
        Self::default()
    }

    /// Creates a committer with pre-existing watermarks.
    pub fn with_offsets(offsets: impl IntoIterator<Item = (TopicPartition, i64)>) -> Self {
        Self {
            offsets: offsets.into_iter().collect(),
        }
    }
}

#[async_trait::async_trait]
impl OffsetCommitter for InMemoryOffsetCommitter {
    async fn committed(&self, partition: &TopicPartition) -> SluiceResult<Option<i64>> {
        Ok(self.offsets.get(partition).map(|offset| *offset))
    }

    async fn commit(&self, partition: &TopicPartition, offset: i64) -> SluiceResult<()> {
        self.offsets
            .entry(partition.clone())
            .and_modify(|current| *current = (*current).max(offset))
            .or_insert(offset);

        tracing::debug!("Committed {} at {}.", partition, offset);

        Ok(())
    }
}
