//! Deterministic object names and their inverse.
//!
//! A name carries the partition and the offset of the first record it holds,
//! so a restarted pipeline can find where it left off by listing the store.

use std::fmt;

use chrono::{DateTime, NaiveDate};
use serde::Deserialize;

use crate::{
    encoder::CompressionType,
    error::{SluiceError, SluiceResult},
    messages::TopicPartition,
};

const DATE_FORMAT: &str = "%Y-%m-%d";

/// Layout of object names below the configured prefix.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum NameTemplate {
    /// `<prefix><topic>-<partition>-<baseOffset><ext>`
    #[default]
    Flat,
    /// `<prefix><YYYY-MM-DD>/<topic>-<partition>-<baseOffset><ext>`, dated by
    /// the timestamp of the first record in UTC.
    Dated,
}

/// The name of a stored object.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct ObjectName(String);

impl ObjectName {
    /// The name as a string slice.
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for ObjectName {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<ObjectName> for String {
    fn from(value: ObjectName) -> Self {
        value.0
    }
}

/// The parts recovered from an object name.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ParsedObjectName {
    /// Topic of the records in the object.
    pub topic: String,
    /// Partition of the records in the object.
    pub partition: i32,
    /// Offset of the first record in the object.
    pub base_offset: i64,
}

impl ParsedObjectName {
    /// The topic/partition the object belongs to.
    pub fn topic_partition(&self) -> TopicPartition {
        TopicPartition(self.topic.clone(), self.partition)
    }
}

/// Maps (topic, partition, base offset, timestamp) to object names and back.
#[derive(Debug, Clone)]
pub struct NamingPolicy {
    prefix: String,
    template: NameTemplate,
    extension: &'static str,
}

impl NamingPolicy {
    /// Creates a policy; the extension follows the compression codec.
    pub fn new(
        prefix: impl Into<String>,
        template: NameTemplate,
        compression: CompressionType,
    ) -> Self {
        Self {
            prefix: prefix.into(),
            template,
            extension: compression.extension(),
        }
    }

    /// Name of the object holding a batch that starts at `base_offset`.
    ///
    /// Offsets are expected to be non-negative; `timestamp_millis` only matters
    /// for [`NameTemplate::Dated`].
    pub fn name_for(
        &self,
        topic: &str,
        partition: i32,
        base_offset: i64,
        timestamp_millis: i64,
    ) -> ObjectName {
        let file = format!("{topic}-{partition}-{base_offset}{}", self.extension);

        match self.template {
            NameTemplate::Flat => ObjectName(format!("{}{file}", self.prefix)),
            NameTemplate::Dated => {
                let date = DateTime::from_timestamp_millis(timestamp_millis)
                    .unwrap_or(DateTime::UNIX_EPOCH)
                    .format(DATE_FORMAT);
                ObjectName(format!("{}{date}/{file}", self.prefix))
            }
        }
    }

    /// Recovers topic, partition and base offset from a name produced by this policy.
    pub fn parse(&self, name: &str) -> SluiceResult<ParsedObjectName> {
        let malformed = |reason: &str| SluiceError::MalformedName {
            name: name.to_string(),
            reason: reason.to_string(),
        };

        let mut rest = name
            .strip_prefix(self.prefix.as_str())
            .ok_or_else(|| malformed("missing prefix"))?;

        if self.template == NameTemplate::Dated {
            let (date, file) = rest
                .split_once('/')
                .ok_or_else(|| malformed("missing date directory"))?;
            NaiveDate::parse_from_str(date, DATE_FORMAT)
                .map_err(|_| malformed("invalid date directory"))?;
            rest = file;
        }

        if rest.contains('/') {
            return Err(malformed("unexpected path separator"));
        }

        let rest = rest
            .strip_suffix(self.extension)
            .ok_or_else(|| malformed("missing compression extension"))?;

        let mut parts = rest.rsplitn(3, '-');
        let (Some(base_offset), Some(partition), Some(topic)) =
            (parts.next(), parts.next(), parts.next())
        else {
            return Err(malformed("expected <topic>-<partition>-<offset>"));
        };

        if topic.is_empty() {
            return Err(malformed("empty topic"));
        }

        let partition: i32 =
            parse_canonical(partition).ok_or_else(|| malformed("invalid partition"))?;
        let base_offset: i64 =
            parse_canonical(base_offset).ok_or_else(|| malformed("invalid base offset"))?;

        Ok(ParsedObjectName {
            topic: topic.to_string(),
            partition,
            base_offset,
        })
    }

    /// Listing prefix under which every object of the partition is found.
    pub fn scan_prefix(&self, partition: &TopicPartition) -> String {
        match self.template {
            NameTemplate::Flat => format!("{}{}-", self.prefix, partition.topic()),
            NameTemplate::Dated => self.prefix.clone(),
        }
    }
}

/// Parses a non-negative decimal without sign or leading zeros.
fn parse_canonical<T>(value: &str) -> Option<T>
where
    T: std::str::FromStr + ToString,
{
    if value.is_empty() || !value.bytes().all(|b| b.is_ascii_digit()) {
        return None;
    }

    let parsed = value.parse::<T>().ok()?;

    (parsed.to_string() == value).then_some(parsed)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn flat(compression: CompressionType) -> NamingPolicy {
        NamingPolicy::new("exports/", NameTemplate::Flat, compression)
    }

    #[test]
    fn test_flat_name_is_bit_exact() {
        let policy = flat(CompressionType::Gzip);

        let name = policy.name_for("test-topic-0", 3, 1024, 0);

        assert_eq!(name.as_str(), "exports/test-topic-0-3-1024.gz");
    }

    #[test]
    fn test_flat_name_without_compression() {
        let policy = NamingPolicy::new("", NameTemplate::Flat, CompressionType::None);

        assert_eq!(policy.name_for("t", 0, 10, 0).as_str(), "t-0-10");
    }

    #[test]
    fn test_dated_name() {
        let policy = NamingPolicy::new("out/", NameTemplate::Dated, CompressionType::Zstd);

        // 2023-11-14T22:13:20Z
        let name = policy.name_for("t", 1, 5, 1_700_000_000_000);

        assert_eq!(name.as_str(), "out/2023-11-14/t-1-5.zst");
    }

    #[test]
    fn test_round_trip() -> Result<(), Box<dyn std::error::Error>> {
        let topics = ["t", "test-topic-0", "a.b_c", "-leading", "trailing-"];
        let partitions = [0, 1, 17, i32::MAX];
        let offsets = [0, 1, 42, 1_000_000, i64::MAX];

        for template in [NameTemplate::Flat, NameTemplate::Dated] {
            for compression in [
                CompressionType::None,
                CompressionType::Gzip,
                CompressionType::Snappy,
                CompressionType::Zstd,
            ] {
                let policy = NamingPolicy::new("p/x-", template, compression);

                for topic in topics {
                    for partition in partitions {
                        for offset in offsets {
                            let name = policy.name_for(topic, partition, offset, 1_700_000_000_000);
                            let parsed = policy.parse(name.as_str())?;

                            assert_eq!(
                                parsed,
                                ParsedObjectName {
                                    topic: topic.to_string(),
                                    partition,
                                    base_offset: offset,
                                }
                            );
                        }
                    }
                }
            }
        }

        Ok(())
    }

    #[test]
    fn test_malformed_names() {
        let policy = flat(CompressionType::Gzip);

        for name in [
            "elsewhere/t-0-10.gz",
            "exports/t-0-10",
            "exports/t-0-10.zst",
            "exports/t-0-x.gz",
            "exports/t-x-10.gz",
            "exports/t-0-010.gz",
            "exports/t-0-+10.gz",
            "exports/0-10.gz",
            "exports/-0-10.gz",
            "exports/nested/t-0-10.gz",
            "exports/t-0-99999999999999999999.gz",
        ] {
            assert!(
                matches!(policy.parse(name), Err(SluiceError::MalformedName { .. })),
                "{name} should not parse"
            );
        }
    }

    #[test]
    fn test_dated_rejects_bad_directory() {
        let policy = NamingPolicy::new("", NameTemplate::Dated, CompressionType::None);

        assert!(policy.parse("t-0-10").is_err());
        assert!(policy.parse("2023-13-40/t-0-10").is_err());
        assert!(policy.parse("2023-11-14/t-0-10").is_ok());
    }

    #[test]
    fn test_scan_prefix() {
        let tp = TopicPartition::new("orders", 2);

        assert_eq!(
            flat(CompressionType::None).scan_prefix(&tp),
            "exports/orders-"
        );
        assert_eq!(
            NamingPolicy::new("exports/", NameTemplate::Dated, CompressionType::None)
                .scan_prefix(&tp),
            "exports/"
        );
    }
}
