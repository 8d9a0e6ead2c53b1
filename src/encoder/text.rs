//! Delimited text and JSON row renderings of records.

use base64::Engine;
use serde::Serialize;

use crate::{
    error::{SluiceError, SluiceResult},
    messages::Record,
};

use super::{OutputField, ValueEncoding};

const CSV_DELIMITER: char = ',';
const HEADER_SEPARATOR: char = ';';
const HEADER_KEY_VALUE_SEPARATOR: char = ':';

fn render(bytes: &[u8], encoding: ValueEncoding) -> String {
    match encoding {
        ValueEncoding::Base64 => base64::engine::general_purpose::STANDARD.encode(bytes),
        ValueEncoding::None => String::from_utf8_lossy(bytes).into_owned(),
    }
}

fn push_csv_field(row: &mut String, field: &str) {
    if field.contains([CSV_DELIMITER, '"', '\n', '\r']) {
        row.push('"');
        row.push_str(&field.replace('"', "\"\""));
        row.push('"');
    } else {
        row.push_str(field);
    }
}

/// Appends one `\n`-terminated CSV row for the record.
pub fn write_csv_row(
    out: &mut String,
    record: &Record,
    fields: &[OutputField],
    encoding: ValueEncoding,
) {
    for (i, field) in fields.iter().enumerate() {
        if i > 0 {
            out.push(CSV_DELIMITER);
        }

        let rendered = match field {
            OutputField::Key => record
                .key
                .as_ref()
                .map(|k| render(k, encoding))
                .unwrap_or_default(),
            OutputField::Value => render(&record.value, encoding),
            OutputField::Offset => record.offset.to_string(),
            OutputField::Timestamp => record.timestamp_millis.to_string(),
            OutputField::Headers => record
                .headers
                .iter()
                .map(|h| {
                    format!(
                        "{}{HEADER_KEY_VALUE_SEPARATOR}{}",
                        render(h.key.as_bytes(), encoding),
                        render(&h.value, encoding)
                    )
                })
                .collect::<Vec<_>>()
                .join(&HEADER_SEPARATOR.to_string()),
        };

        push_csv_field(out, &rendered);
    }

    out.push('\n');
}

/// Counts CSV rows, ignoring newlines inside quoted fields.
pub fn count_csv_rows(data: &[u8]) -> usize {
    let mut in_quotes = false;
    let mut rows = 0;

    for byte in data {
        match byte {
            b'"' => in_quotes = !in_quotes,
            b'\n' if !in_quotes => rows += 1,
            _ => {}
        }
    }

    rows
}

#[derive(Serialize)]
struct JsonHeader {
    key: String,
    value: String,
}

/// A JSON row. Unselected fields are `None` and omitted; a selected but absent key is `null`.
#[derive(Serialize)]
struct JsonRow {
    #[serde(skip_serializing_if = "Option::is_none")]
    key: Option<Option<String>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    value: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    offset: Option<i64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    timestamp: Option<i64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    headers: Option<Vec<JsonHeader>>,
}

impl JsonRow {
    fn new(record: &Record, fields: &[OutputField], encoding: ValueEncoding) -> Self {
        let mut row = JsonRow {
            key: None,
            value: None,
            offset: None,
            timestamp: None,
            headers: None,
        };

        for field in fields {
            match field {
                OutputField::Key => {
                    row.key = Some(record.key.as_ref().map(|k| render(k, encoding)));
                }
                OutputField::Value => row.value = Some(render(&record.value, encoding)),
                OutputField::Offset => row.offset = Some(record.offset),
                OutputField::Timestamp => row.timestamp = Some(record.timestamp_millis),
                OutputField::Headers => {
                    row.headers = Some(
                        record
                            .headers
                            .iter()
                            .map(|h| JsonHeader {
                                key: h.key.clone(),
                                value: render(&h.value, encoding),
                            })
                            .collect(),
                    );
                }
            }
        }

        row
    }
}

/// Appends one JSON object for the record, without a trailing newline.
pub fn write_json_row(
    out: &mut Vec<u8>,
    record: &Record,
    fields: &[OutputField],
    encoding: ValueEncoding,
) -> SluiceResult<()> {
    serde_json::to_writer(out, &JsonRow::new(record, fields, encoding))?;
    Ok(())
}

/// Counts non-empty lines of a JSON lines object.
pub fn count_json_lines(data: &[u8]) -> usize {
    data.split(|b| *b == b'\n')
        .filter(|line| !line.iter().all(u8::is_ascii_whitespace))
        .count()
}

/// Counts the elements of a JSON array object.
pub fn count_json_array(data: &[u8]) -> SluiceResult<usize> {
    let rows: Vec<serde::de::IgnoredAny> = serde_json::from_slice(data).map_err(|err| {
        SluiceError::Encoding(format!("Object is not a JSON array of rows: {err}"))
    })?;

    Ok(rows.len())
}
