//! Raw binary layout: a versioned header followed by length-prefixed record frames.
//!
//! ```text
//! header: magic u32 | version u32
//! frame:  offset i64 | timestamp i64 | key_len i32 (-1 = null) | key
//!         | value_len u32 | value | header_count u32
//!         | (name_len u16 | name | value_len u32 | value)*
//! ```

use bytes::{Buf, BufMut, Bytes, BytesMut};

use crate::{
    error::{SluiceError, SluiceResult},
    messages::Record,
};

static MAGIC_NUMBER: u32 = 0x534c_4345;
static V1_VERSION_NUMBER: u32 = 1;

pub enum SegmentHeader {
    V1(SegmentHeaderV1),
}

impl TryFrom<&mut Bytes> for SegmentHeader {
    type Error = SluiceError;

    fn try_from(value: &mut Bytes) -> Result<Self, Self::Error> {
        let magic_number = value.try_get_u32().map_err(|err| {
            SluiceError::Encoding(format!("Failed to retrieve u32 from Header: {:#?}", err))
        })?;

        if magic_number != MAGIC_NUMBER {
            return Err(SluiceError::Encoding(format!(
                "Invalid Magic Number: {magic_number}"
            )));
        }

        let version = value.try_get_u32().map_err(|err| {
            SluiceError::Encoding(format!("Failed to retrieve u32 from Header: {:#?}", err))
        })?;

        match version {
            1 => Ok(SegmentHeader::V1(SegmentHeaderV1)),
            _ => Err(SluiceError::Encoding(format!(
                "Invalid Version Number: {version}"
            ))),
        }
    }
}

pub struct SegmentHeaderV1;

impl SegmentHeaderV1 {
    pub const fn version_number() -> u32 {
        V1_VERSION_NUMBER
    }

    pub const fn magic_number() -> u32 {
        MAGIC_NUMBER
    }

    pub const fn size() -> usize {
        std::mem::size_of::<u32>() + std::mem::size_of::<u32>()
    }

    pub fn write(buf: &mut BytesMut) {
        buf.put_u32(Self::magic_number());
        buf.put_u32(Self::version_number());
    }
}

/// Writes the header and one frame per record.
pub fn write_segment(records: &[Record]) -> SluiceResult<BytesMut> {
    let estimated = records
        .iter()
        .fold(SegmentHeaderV1::size(), |acc, r| acc + frame_size_estimate(r));

    let mut buf = BytesMut::with_capacity(estimated);

    SegmentHeaderV1::write(&mut buf);

    for record in records {
        write_frame(record, &mut buf)?;
    }

    Ok(buf)
}

fn frame_size_estimate(record: &Record) -> usize {
    let headers = record
        .headers
        .iter()
        .fold(0, |acc, h| acc + 2 + h.key.len() + 4 + h.value.len());

    8 + 8 + 4 + record.key.as_ref().map_or(0, |k| k.len()) + 4 + record.value.len() + 4 + headers
}

fn write_frame(record: &Record, buf: &mut BytesMut) -> SluiceResult<()> {
    buf.put_i64(record.offset);
    buf.put_i64(record.timestamp_millis);

    match &record.key {
        Some(key) => {
            buf.put_i32(key.len().try_into()?);
            buf.put_slice(key);
        }
        None => buf.put_i32(-1),
    }

    buf.put_u32(record.value.len().try_into()?);
    buf.put_slice(&record.value);

    buf.put_u32(record.headers.len().try_into()?);
    for header in &record.headers {
        buf.put_u16(header.key.len().try_into()?);
        buf.put_slice(header.key.as_bytes());
        buf.put_u32(header.value.len().try_into()?);
        buf.put_slice(&header.value);
    }

    Ok(())
}

/// Counts the frames of a segment, validating that every frame is complete.
pub fn count_segment_records(mut bytes: Bytes) -> SluiceResult<usize> {
    let SegmentHeader::V1(_) = SegmentHeader::try_from(&mut bytes)?;

    let mut count = 0;

    while bytes.has_remaining() {
        skip(&mut bytes, 16)?;

        let key_len = bytes.try_get_i32().map_err(truncated)?;
        if key_len >= 0 {
            skip(&mut bytes, key_len.try_into()?)?;
        }

        let value_len = bytes.try_get_u32().map_err(truncated)?;
        skip(&mut bytes, value_len.try_into()?)?;

        let header_count = bytes.try_get_u32().map_err(truncated)?;
        for _ in 0..header_count {
            let name_len = bytes.try_get_u16().map_err(truncated)?;
            skip(&mut bytes, name_len.into())?;
            let value_len = bytes.try_get_u32().map_err(truncated)?;
            skip(&mut bytes, value_len.try_into()?)?;
        }

        count += 1;
    }

    Ok(count)
}

fn skip(bytes: &mut Bytes, len: usize) -> SluiceResult<()> {
    if bytes.remaining() < len {
        return Err(SluiceError::Encoding(format!(
            "Truncated segment frame: needed {len} bytes, {} remaining",
            bytes.remaining()
        )));
    }

    bytes.advance(len);

    Ok(())
}

fn truncated<E: std::fmt::Display>(err: E) -> SluiceError {
    SluiceError::Encoding(format!("Truncated segment frame: {err}"))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::messages::Header;

    #[test]
    fn test_empty_segment_is_header_only() -> Result<(), Box<dyn std::error::Error>> {
        let segment = write_segment(&[])?;

        assert_eq!(segment.len(), SegmentHeaderV1::size());
        assert_eq!(count_segment_records(segment.freeze())?, 0);

        Ok(())
    }

    #[test]
    fn test_single_record_layout() -> Result<(), Box<dyn std::error::Error>> {
        let record = Record::new("test", 0, 7, 9, vec![1, 2, 3]);

        let segment = write_segment(std::slice::from_ref(&record))?;

        let mut expected = BytesMut::new();
        SegmentHeaderV1::write(&mut expected);
        expected.put_i64(7);
        expected.put_i64(9);
        expected.put_i32(-1);
        expected.put_u32(3);
        expected.put_slice(&[1, 2, 3]);
        expected.put_u32(0);

        assert_eq!(segment.as_ref(), expected.as_ref());

        Ok(())
    }

    #[test]
    fn test_count_with_keys_and_headers() -> Result<(), Box<dyn std::error::Error>> {
        let records = vec![
            Record::new("test", 0, 1, 1, "a").with_key("k1"),
            Record::new("test", 0, 2, 2, "").with_header(Header::new("h", "v")),
            Record::new("test", 0, 3, 3, vec![0; 10_000])
                .with_key("")
                .with_header(Header::new("x", ""))
                .with_header(Header::new("y", "zz")),
        ];

        let segment = write_segment(&records)?;

        assert_eq!(count_segment_records(segment.freeze())?, 3);

        Ok(())
    }

    #[test]
    fn test_bad_magic_number() {
        let result = count_segment_records(Bytes::from_static(&[0, 0, 0, 1, 0, 0, 0, 1]));

        assert!(matches!(result, Err(SluiceError::Encoding(_))));
    }

    #[test]
    fn test_truncated_frame() -> Result<(), Box<dyn std::error::Error>> {
        let segment = write_segment(&[Record::new("test", 0, 1, 1, "hello")])?;
        let truncated = segment.freeze().slice(..SegmentHeaderV1::size() + 20);

        assert!(count_segment_records(truncated).is_err());

        Ok(())
    }

    #[test]
    fn test_oversized_header_name_fails() {
        let record =
            Record::new("test", 0, 1, 1, "v").with_header(Header::new("k".repeat(70_000), "v"));

        assert!(matches!(
            write_segment(&[record]),
            Err(SluiceError::TryFromIntConversionError(_))
        ));
    }
}
