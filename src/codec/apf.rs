//! APF binary format.
//!
//! # Layout
//! ```text
//! u8        endianness marker (1 = little-endian, 0 = big-endian)
//! u64       header length in bytes
//! [u8]      header, UTF-8
//! u64 × 3   dimensions (nx, ny, nz)
//! f64 × 3   size (x, y, z)
//! u32       data reference id (high bit set = payload follows, 0 = null)
//! u64       number of data values
//! f64 × n   data
//! ```
//!
//! # Endianness
//! Writers always emit little-endian with marker `1`.  Readers honour either
//! marker so files produced on big-endian hosts stay readable.  Values are in
//! internal units; no unit conversion is ever applied.

use std::io::{self, Read, Write};

use byteorder::{BigEndian, ByteOrder, LittleEndian, ReadBytesExt, WriteBytesExt};
use tracing::warn;

use crate::error::{FieldError, Result};
use crate::field::{FieldData, FieldQuantity};

pub const MARKER_LITTLE_ENDIAN: u8 = 1;
pub const MARKER_BIG_ENDIAN:    u8 = 0;

/// Reference id for a payload that is serialized inline.
pub const DATA_REF_NEW:  u32 = 0x8000_0001;
/// Flag bit marking the first occurrence of a shared reference.
const DATA_REF_INLINE: u32 = 0x8000_0000;
/// Reference id of a missing payload.
const DATA_REF_NULL:   u32 = 0;

const F64_BYTES: u64 = 8;

/// Decode an APF stream.  `unit` is ignored with a warning when non-empty.
pub fn read<R: Read>(mut reader: R, quantity: FieldQuantity, unit: &str) -> Result<FieldData> {
    if !unit.is_empty() {
        warn!("Units will be ignored, APF file content is interpreted in internal units.");
    }

    let marker = reader.read_u8().map_err(truncated)?;
    let field = match marker {
        MARKER_LITTLE_ENDIAN => read_body::<LittleEndian, _>(&mut reader)?,
        MARKER_BIG_ENDIAN    => read_body::<BigEndian, _>(&mut reader)?,
        other => {
            return Err(FieldError::MalformedHeader(format!("invalid endianness marker {other:#04x}")));
        }
    };

    field.validate(quantity)?;
    Ok(field)
}

fn read_body<B: ByteOrder, R: Read>(reader: &mut R) -> Result<FieldData> {
    let header_len = reader.read_u64::<B>().map_err(truncated)?;
    let header_bytes = read_exact_len(reader, header_len, "header")?;
    let header = String::from_utf8(header_bytes)
        .map_err(|_| FieldError::MalformedHeader("header is not valid UTF-8".to_string()))?;

    let mut dimensions = [0usize; 3];
    for d in &mut dimensions {
        let raw = reader.read_u64::<B>().map_err(truncated)?;
        *d = usize::try_from(raw)
            .map_err(|_| FieldError::MalformedHeader(format!("dimension {raw} out of range")))?;
    }

    let mut size = [0.0f64; 3];
    for s in &mut size {
        *s = reader.read_f64::<B>().map_err(truncated)?;
    }

    let data_ref = reader.read_u32::<B>().map_err(truncated)?;
    let data = if data_ref == DATA_REF_NULL {
        Vec::new()
    } else if data_ref & DATA_REF_INLINE != 0 {
        let count = reader.read_u64::<B>().map_err(truncated)?;
        let byte_len = count.checked_mul(F64_BYTES).ok_or_else(|| {
            FieldError::MalformedHeader(format!("data length {count} out of range"))
        })?;
        let raw = read_exact_len(reader, byte_len, "field data")?;
        raw.chunks_exact(F64_BYTES as usize).map(B::read_f64).collect()
    } else {
        return Err(FieldError::MalformedHeader(format!(
            "data reference {data_ref:#x} points to an earlier record"
        )));
    };

    Ok(FieldData::new(header, dimensions, size, data))
}

/// Read exactly `len` bytes without trusting `len` for the allocation.
fn read_exact_len<R: Read>(reader: &mut R, len: u64, what: &str) -> Result<Vec<u8>> {
    let mut buf = Vec::new();
    reader.by_ref().take(len).read_to_end(&mut buf)?;
    if (buf.len() as u64) != len {
        return Err(FieldError::TruncatedInput(format!(
            "{what} declares {len} bytes, only {} available",
            buf.len()
        )));
    }
    Ok(buf)
}

fn truncated(e: io::Error) -> FieldError {
    if e.kind() == io::ErrorKind::UnexpectedEof {
        FieldError::TruncatedInput("unexpected end of APF stream".to_string())
    } else {
        e.into()
    }
}

/// Encode `field` as little-endian APF.  `unit` is ignored with a warning
/// when non-empty.
pub fn write<W: Write>(field: &FieldData, mut writer: W, quantity: FieldQuantity, unit: &str) -> Result<()> {
    field.validate(quantity)?;
    if !unit.is_empty() {
        warn!("Units will be ignored, APF file content is written in internal units.");
    }

    writer.write_u8(MARKER_LITTLE_ENDIAN)?;

    let header = field.header().as_bytes();
    writer.write_u64::<LittleEndian>(header.len() as u64)?;
    writer.write_all(header)?;

    for d in field.dimensions() {
        writer.write_u64::<LittleEndian>(d as u64)?;
    }
    for s in field.size() {
        writer.write_f64::<LittleEndian>(s)?;
    }

    let data = field.data();
    writer.write_u32::<LittleEndian>(DATA_REF_NEW)?;
    writer.write_u64::<LittleEndian>(data.len() as u64)?;
    for &v in data.iter() {
        writer.write_f64::<LittleEndian>(v)?;
    }
    Ok(())
}
