//! Serialization of a batch into the bytes of one object.
//!
//! The output format is chosen from a closed set and compression is applied
//! after formatting. Encoding is deterministic: the same records always
//! produce the same bytes, which is what makes re-uploading a batch under its
//! derived name safe.

mod compression;
mod segment;
mod text;

use bytes::Bytes;
use serde::Deserialize;

pub use compression::CompressionType;

use crate::{config::SinkConfiguration, error::SluiceResult, messages::Record};

/// Layout of an encoded object.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum OutputFormat {
    /// Length-prefixed binary frames carrying every record field.
    Raw,
    /// One comma-separated row per record.
    #[default]
    Csv,
    /// One JSON object per line.
    Jsonl,
    /// A single JSON array of row objects.
    Json,
}

impl OutputFormat {
    /// Whether the format honours the configured output fields.
    pub fn uses_fields(&self) -> bool {
        !matches!(self, OutputFormat::Raw)
    }
}

/// A record field written by the text formats.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum OutputField {
    /// The record key.
    Key,
    /// The record value.
    Value,
    /// The partition offset.
    Offset,
    /// The record timestamp in milliseconds.
    Timestamp,
    /// The record headers.
    Headers,
}

/// How binary keys and values are rendered by the text formats.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ValueEncoding {
    /// Bytes are decoded as UTF-8, replacing invalid sequences.
    None,
    /// Standard base64.
    #[default]
    Base64,
}

/// Encodes record batches into object payloads.
#[derive(Debug, Clone)]
pub struct Encoder {
    format: OutputFormat,
    compression: CompressionType,
    fields: Vec<OutputField>,
    value_encoding: ValueEncoding,
}

impl Encoder {
    /// Creates an encoder.
    pub fn new(
        format: OutputFormat,
        compression: CompressionType,
        fields: Vec<OutputField>,
        value_encoding: ValueEncoding,
    ) -> Self {
        Self {
            format,
            compression,
            fields,
            value_encoding,
        }
    }

    /// Creates an encoder from the sink configuration.
    pub fn from_config(config: &SinkConfiguration) -> Self {
        Self::new(
            config.format,
            config.compression,
            config.fields.clone(),
            config.value_encoding,
        )
    }

    /// Formats then compresses the records. The input is never modified.
    pub fn encode(&self, records: &[Record]) -> SluiceResult<Bytes> {
        let formatted: Vec<u8> = match self.format {
            OutputFormat::Raw => segment::write_segment(records)?.to_vec(),
            OutputFormat::Csv => {
                let mut out = String::new();
                for record in records {
                    text::write_csv_row(&mut out, record, &self.fields, self.value_encoding);
                }
                out.into_bytes()
            }
            OutputFormat::Jsonl => {
                let mut out = Vec::new();
                for record in records {
                    text::write_json_row(&mut out, record, &self.fields, self.value_encoding)?;
                    out.push(b'\n');
                }
                out
            }
            OutputFormat::Json => {
                let mut out = b"[\n".to_vec();
                for (i, record) in records.iter().enumerate() {
                    if i > 0 {
                        out.extend_from_slice(b",\n");
                    }
                    text::write_json_row(&mut out, record, &self.fields, self.value_encoding)?;
                }
                out.extend_from_slice(b"\n]");
                out
            }
        };

        if self.compression == CompressionType::None {
            return Ok(Bytes::from(formatted));
        }

        Ok(Bytes::from(compression::compress(
            self.compression,
            &formatted,
        )?))
    }

    /// Number of records in a payload produced by [`Encoder::encode`] with the
    /// same configuration.
    pub fn count_records(&self, payload: &[u8]) -> SluiceResult<usize> {
        let formatted = compression::decompress(self.compression, payload)?;

        match self.format {
            OutputFormat::Raw => segment::count_segment_records(Bytes::from(formatted)),
            OutputFormat::Csv => Ok(text::count_csv_rows(&formatted)),
            OutputFormat::Jsonl => Ok(text::count_json_lines(&formatted)),
            OutputFormat::Json => text::count_json_array(&formatted),
        }
    }
}
