use std::fmt;

/// Merged Topic/Partition identification struct.
#[derive(Debug, Hash, PartialEq, Eq, Clone, Default, PartialOrd, Ord)]
pub struct TopicPartition(pub String, pub i32);

impl TopicPartition {
    /// Creates a new topic/partition pair.
    pub fn new(topic: impl Into<String>, partition: i32) -> Self {
        Self(topic.into(), partition)
    }

    /// The topic name.
    pub fn topic(&self) -> &str {
        &self.0
    }

    /// The partition number.
    pub fn partition(&self) -> i32 {
        self.1
    }
}

impl fmt::Display for TopicPartition {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}-{}", self.0, self.1)
    }
}
