use bytes::Bytes;

use super::TopicPartition;

/// Fixed per-record overhead added to the size estimate (offset + timestamp).
const RECORD_OVERHEAD_BYTES: u64 = 16;

/// A single header attached to a record.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Header {
    /// Header name.
    pub key: String,
    /// Header payload.
    pub value: Bytes,
}

impl Header {
    /// Creates a new header.
    pub fn new(key: impl Into<String>, value: impl Into<Bytes>) -> Self {
        Self {
            key: key.into(),
            value: value.into(),
        }
    }
}

/// A record as delivered by the log-consumption collaborator.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Record {
    /// The topic this record was consumed from.
    pub topic: String,
    /// The partition of the topic.
    pub partition: i32,
    /// Offset within the partition.
    pub offset: i64,
    /// Record timestamp in milliseconds since the epoch.
    pub timestamp_millis: i64,
    /// Optional record key.
    pub key: Option<Bytes>,
    /// Record payload.
    pub value: Bytes,
    /// Ordered record headers.
    pub headers: Vec<Header>,
}

impl Record {
    /// Creates a record without key or headers.
    pub fn new(
        topic: impl Into<String>,
        partition: i32,
        offset: i64,
        timestamp_millis: i64,
        value: impl Into<Bytes>,
    ) -> Self {
        Self {
            topic: topic.into(),
            partition,
            offset,
            timestamp_millis,
            key: None,
            value: value.into(),
            headers: vec![],
        }
    }

    /// Sets the record key.
    pub fn with_key(mut self, key: impl Into<Bytes>) -> Self {
        self.key = Some(key.into());
        self
    }

    /// Appends a header.
    pub fn with_header(mut self, header: Header) -> Self {
        self.headers.push(header);
        self
    }

    /// The topic/partition this record belongs to.
    pub fn topic_partition(&self) -> TopicPartition {
        TopicPartition(self.topic.clone(), self.partition)
    }

    /// Rough in-memory size of this record, used for the size threshold.
    pub fn size_estimate(&self) -> u64 {
        let key = self.key.as_ref().map_or(0, |k| k.len());
        let headers = self
            .headers
            .iter()
            .fold(0, |acc, h| acc + h.key.len() + h.value.len());

        (key + self.value.len() + headers) as u64 + RECORD_OVERHEAD_BYTES
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn size_estimate_counts_key_value_and_headers() {
        let record = Record::new("t", 0, 0, 0, "hello")
            .with_key("k")
            .with_header(Header::new("h", "vv"));

        assert_eq!(record.size_estimate(), 5 + 1 + 1 + 2 + RECORD_OVERHEAD_BYTES);
    }
}
