//! Configuration consumed by the pipeline.
//!
//! Parsing from a particular source is left to the host; the structs here are
//! `serde`-deserializable with defaults for every field.

use std::time::Duration;

use serde::Deserialize;

use crate::{
    encoder::{CompressionType, OutputField, OutputFormat, ValueEncoding},
    error::{SluiceError, SluiceResult},
    naming::NameTemplate,
};

/// Configuration for the sink pipeline.
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct SinkConfiguration {
    /// Prefix prepended to every object name, e.g. `"exports/"`.
    pub prefix: String,
    /// Layout of object names below the prefix.
    pub name_template: NameTemplate,
    /// Output format of each object.
    pub format: OutputFormat,
    /// Fields written per record by the text formats, in order.
    pub fields: Vec<OutputField>,
    /// How binary keys and values are rendered by the text formats.
    pub value_encoding: ValueEncoding,
    /// Compression applied after formatting.
    pub compression: CompressionType,
    /// Buffered size after which a batch is flushed.
    pub flush_size_in_bytes: u64,
    /// Buffered record count after which a batch is flushed.
    pub max_records_per_batch: Option<usize>,
    /// Maximum age of a non-empty batch before it is flushed.
    pub flush_interval_in_ms: u64,
    /// Upper bound on simultaneous uploads across all partitions.
    pub max_concurrent_uploads: usize,
    /// How long revocation and shutdown wait for flushes before dropping batches.
    pub grace_period_in_ms: u64,
    /// Upload retry policy.
    pub retry: RetryConfiguration,
}

/// Bounded exponential backoff for uploads.
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct RetryConfiguration {
    /// Total attempts per upload, including the first one.
    pub max_attempts: u32,
    /// Delay before the first retry.
    pub base_interval_in_ms: u64,
    /// Cap on any single delay.
    pub max_interval_in_ms: u64,
    /// Growth factor between consecutive delays.
    pub factor: f64,
    /// Randomization between 0.0 and 1.0 applied to each delay.
    pub jitter: f64,
}

impl Default for SinkConfiguration {
    fn default() -> Self {
        Self {
            prefix: String::new(),
            name_template: NameTemplate::default(),
            format: OutputFormat::default(),
            fields: vec![OutputField::Value],
            value_encoding: ValueEncoding::default(),
            compression: CompressionType::default(),
            flush_size_in_bytes: 16 * 1024 * 1024,
            max_records_per_batch: None,
            flush_interval_in_ms: 60_000,
            max_concurrent_uploads: 4,
            grace_period_in_ms: 30_000,
            retry: RetryConfiguration::default(),
        }
    }
}

impl Default for RetryConfiguration {
    fn default() -> Self {
        Self {
            max_attempts: 6,
            base_interval_in_ms: 100,
            max_interval_in_ms: 10_000,
            factor: 2.0,
            jitter: 0.5,
        }
    }
}

impl SinkConfiguration {
    /// Deserializes a configuration from JSON, then validates it.
    pub fn from_json(json: &str) -> SluiceResult<Self> {
        let config: Self = serde_json::from_str(json)?;
        config.validate()?;
        Ok(config)
    }

    /// Checks that the values can drive a pipeline.
    pub fn validate(&self) -> SluiceResult<()> {
        if self.flush_size_in_bytes == 0 {
            return Err(SluiceError::InvalidConfiguration(
                "flush_size_in_bytes must be greater than zero".to_string(),
            ));
        }

        if self.max_records_per_batch == Some(0) {
            return Err(SluiceError::InvalidConfiguration(
                "max_records_per_batch must be greater than zero".to_string(),
            ));
        }

        if self.flush_interval_in_ms == 0 {
            return Err(SluiceError::InvalidConfiguration(
                "flush_interval_in_ms must be greater than zero".to_string(),
            ));
        }

        if self.max_concurrent_uploads == 0 {
            return Err(SluiceError::InvalidConfiguration(
                "max_concurrent_uploads must be greater than zero".to_string(),
            ));
        }

        if self.format.uses_fields() && self.fields.is_empty() {
            return Err(SluiceError::InvalidConfiguration(format!(
                "format {:?} requires at least one output field",
                self.format
            )));
        }

        self.retry.validate()
    }

    /// Maximum age of a non-empty batch.
    pub fn flush_interval(&self) -> Duration {
        Duration::from_millis(self.flush_interval_in_ms)
    }

    /// Grace period for revocation and shutdown.
    pub fn grace_period(&self) -> Duration {
        Duration::from_millis(self.grace_period_in_ms)
    }
}

impl RetryConfiguration {
    fn validate(&self) -> SluiceResult<()> {
        if self.max_attempts == 0 {
            return Err(SluiceError::InvalidConfiguration(
                "retry.max_attempts must be at least 1".to_string(),
            ));
        }

        if !(0.0..=1.0).contains(&self.jitter) {
            return Err(SluiceError::InvalidConfiguration(format!(
                "retry.jitter must be between 0.0 and 1.0, got {}",
                self.jitter
            )));
        }

        if self.factor < 1.0 {
            return Err(SluiceError::InvalidConfiguration(format!(
                "retry.factor must be at least 1.0, got {}",
                self.factor
            )));
        }

        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_configuration_is_valid() {
        assert!(SinkConfiguration::default().validate().is_ok());
    }

    #[test]
    fn from_json_fills_defaults() -> Result<(), Box<dyn std::error::Error>> {
        let config = SinkConfiguration::from_json(
            r#"{
                "prefix": "exports/",
                "format": "jsonl",
                "compression": "zstd",
                "fields": ["key", "value", "offset"],
                "max_records_per_batch": 500,
                "retry": { "max_attempts": 3 }
            }"#,
        )?;

        assert_eq!(config.prefix, "exports/");
        assert_eq!(config.format, OutputFormat::Jsonl);
        assert_eq!(config.compression, CompressionType::Zstd);
        assert_eq!(
            config.fields,
            vec![OutputField::Key, OutputField::Value, OutputField::Offset]
        );
        assert_eq!(config.max_records_per_batch, Some(500));
        assert_eq!(config.retry.max_attempts, 3);
        assert_eq!(config.retry.base_interval_in_ms, 100);
        assert_eq!(config.flush_interval_in_ms, 60_000);

        Ok(())
    }

    #[test]
    fn rejects_invalid_values() {
        let config = SinkConfiguration {
            max_concurrent_uploads: 0,
            ..Default::default()
        };
        assert!(matches!(
            config.validate(),
            Err(SluiceError::InvalidConfiguration(_))
        ));

        let config = SinkConfiguration {
            fields: vec![],
            format: OutputFormat::Csv,
            ..Default::default()
        };
        assert!(config.validate().is_err());

        let config = SinkConfiguration {
            retry: RetryConfiguration {
                jitter: 1.5,
                ..Default::default()
            },
            ..Default::default()
        };
        assert!(config.validate().is_err());
    }

    #[test]
    fn from_json_rejects_unknown_format() {
        let result = SinkConfiguration::from_json(r#"{ "format": "parquet" }"#);

        assert!(matches!(result, Err(SluiceError::JsonError(_))));
    }
}
