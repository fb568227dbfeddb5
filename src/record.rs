//! The record codec: a record header of varint serial types followed by
//! the concatenated column bodies.
//!
//! Every decode path here is zero-allocation: `Text`/`Blob` values borrow
//! directly from the payload slice the caller supplies. The only place
//! that copies is the cursor's overflow-chain scratch buffer (see
//! `btree::cursor`), which lives upstream of this module.

use crate::error::{Error, Result};
use crate::serial_type::SerialType;
use crate::varint;

/// A discriminated column value. `Text`/`Blob` borrow from the record
/// payload; turning one into an owned `String`/`Vec<u8>` is an explicit,
/// separate step (`as_owned`) so the cost is visible at the call site.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum ColumnValue<'a> {
    Null,
    Integer(i64),
    Real(f64),
    Text(&'a [u8]),
    Blob(&'a [u8]),
}

impl<'a> ColumnValue<'a> {
    pub fn as_i64(&self) -> Option<i64> {
        match self {
            ColumnValue::Integer(v) => Some(*v),
            _ => None,
        }
    }

    pub fn as_f64(&self) -> Option<f64> {
        match self {
            ColumnValue::Real(v) => Some(*v),
            ColumnValue::Integer(v) => Some(*v as f64),
            _ => None,
        }
    }

    pub fn as_str(&self) -> Option<&'a str> {
        match self {
            ColumnValue::Text(bytes) => std::str::from_utf8(bytes).ok(),
            _ => None,
        }
    }

    pub fn as_blob(&self) -> Option<&'a [u8]> {
        match self {
            ColumnValue::Blob(bytes) => Some(bytes),
            ColumnValue::Text(bytes) => Some(bytes),
            _ => None,
        }
    }

    pub fn is_null(&self) -> bool {
        matches!(self, ColumnValue::Null)
    }
}

/// Reads the record header starting at `payload[0]`, writing each column's
/// [`SerialType`] into the caller-provided `out_types` buffer (sized for
/// the table's maximum column count; callers typically stack-allocate or
/// draw from a pool). Returns `(column_count, body_offset)` where
/// `body_offset` is the index into `payload` at which the column bodies
/// begin.
pub fn read_serial_types(
    payload: &[u8],
    out_types: &mut [SerialType],
) -> Result<(usize, usize)> {
    if payload.is_empty() {
        return Err(Error::corrupt(0, "empty record payload"));
    }
    let (header_size, mut header_consumed) = varint::read(payload);
    let header_size = header_size as usize;
    if header_size == 0 || header_size > payload.len() {
        return Err(Error::corrupt(0, "record header size out of bounds"));
    }

    let mut count = 0;
    while header_consumed < header_size {
        if count >= out_types.len() {
            return Err(Error::corrupt(0, "record has more columns than the caller allowed for"));
        }
        let (raw, n) = varint::read(&payload[header_consumed..]);
        let st = SerialType::from_raw(raw)
            .ok_or_else(|| Error::corrupt(0, "reserved serial type in record header"))?;
        out_types[count] = st;
        count += 1;
        header_consumed += n;
    }

    Ok((count, header_size))
}

/// Decodes only the requested column, skipping earlier columns using
/// `content_size` arithmetic rather than materializing them. `types` must
/// be the slice produced by [`read_serial_types`] (or an equal-length
/// prefix of it), and `body_offset` its second return value.
pub fn decode_column<'a>(
    payload: &'a [u8],
    ordinal: usize,
    types: &[SerialType],
    body_offset: usize,
) -> Result<ColumnValue<'a>> {
    let st = *types
        .get(ordinal)
        .ok_or_else(|| Error::corrupt(0, "column ordinal out of range"))?;

    let mut offset = body_offset;
    for &earlier in &types[..ordinal] {
        offset += earlier.content_size();
    }
    let size = st.content_size();
    let bytes = payload
        .get(offset..offset + size)
        .ok_or_else(|| Error::corrupt(0, "record body truncated"))?;

    Ok(decode_value(st, bytes))
}

fn decode_value<'a>(st: SerialType, bytes: &'a [u8]) -> ColumnValue<'a> {
    match st {
        SerialType::Null => ColumnValue::Null,
        SerialType::Zero => ColumnValue::Integer(0),
        SerialType::One => ColumnValue::Integer(1),
        SerialType::I8 => ColumnValue::Integer(bytes[0] as i8 as i64),
        SerialType::I16 => ColumnValue::Integer(i16::from_be_bytes([bytes[0], bytes[1]]) as i64),
        SerialType::I24 => {
            let sign = if bytes[0] & 0x80 != 0 { 0xff } else { 0 };
            ColumnValue::Integer(i32::from_be_bytes([sign, bytes[0], bytes[1], bytes[2]]) as i64)
        }
        SerialType::I32 => ColumnValue::Integer(
            i32::from_be_bytes([bytes[0], bytes[1], bytes[2], bytes[3]]) as i64,
        ),
        SerialType::I48 => {
            let sign = if bytes[0] & 0x80 != 0 { 0xff } else { 0 };
            ColumnValue::Integer(i64::from_be_bytes([
                sign, sign, bytes[0], bytes[1], bytes[2], bytes[3], bytes[4], bytes[5],
            ]))
        }
        SerialType::I64 => ColumnValue::Integer(i64::from_be_bytes(bytes.try_into().unwrap())),
        SerialType::F64 => ColumnValue::Real(f64::from_be_bytes(bytes.try_into().unwrap())),
        SerialType::Blob(_) => ColumnValue::Blob(bytes),
        SerialType::Text(_) => ColumnValue::Text(bytes),
    }
}

/// Fast path: decode column `ordinal` directly as an `i64` without going
/// through [`ColumnValue`]. Returns `None` for NULL or a non-integer
/// serial type.
pub fn decode_int64_direct(
    payload: &[u8],
    ordinal: usize,
    types: &[SerialType],
    body_offset: usize,
) -> Result<Option<i64>> {
    Ok(decode_column(payload, ordinal, types, body_offset)?.as_i64())
}

pub fn decode_double_direct(
    payload: &[u8],
    ordinal: usize,
    types: &[SerialType],
    body_offset: usize,
) -> Result<Option<f64>> {
    Ok(decode_column(payload, ordinal, types, body_offset)?.as_f64())
}

pub fn decode_string_direct<'a>(
    payload: &'a [u8],
    ordinal: usize,
    types: &[SerialType],
    body_offset: usize,
) -> Result<Option<&'a str>> {
    Ok(decode_column(payload, ordinal, types, body_offset)?.as_str())
}

/// The byte length [`encode_record`] would produce for `values`.
pub fn computed_encoded_size(values: &[ColumnValue<'_>]) -> usize {
    let mut body_size = 0;
    let mut header_body_size = 0;
    for value in values {
        let st = serial_type_for(value);
        header_body_size += varint::encoded_length(st.to_raw());
        body_size += st.content_size();
    }

    // The header-size varint is self-inclusive; try the length assuming a
    // 1-byte header-size varint first, then re-check (header sizes over
    // 127 bytes need a 2-byte varint, vanishingly rare but still correct).
    let mut header_size_len = 1;
    loop {
        let total_header = header_body_size + header_size_len;
        if varint::encoded_length(total_header as i64) == header_size_len {
            return total_header + body_size;
        }
        header_size_len += 1;
    }
}

fn serial_type_for(value: &ColumnValue<'_>) -> SerialType {
    match value {
        ColumnValue::Null => SerialType::Null,
        ColumnValue::Integer(0) => SerialType::Zero,
        ColumnValue::Integer(1) => SerialType::One,
        ColumnValue::Integer(v) => smallest_integer_type(*v),
        ColumnValue::Real(_) => SerialType::F64,
        ColumnValue::Text(bytes) => SerialType::Text(bytes.len() as u64),
        ColumnValue::Blob(bytes) => SerialType::Blob(bytes.len() as u64),
    }
}

fn smallest_integer_type(v: i64) -> SerialType {
    if (i8::MIN as i64..=i8::MAX as i64).contains(&v) {
        SerialType::I8
    } else if (i16::MIN as i64..=i16::MAX as i64).contains(&v) {
        SerialType::I16
    } else if (-(1 << 23)..(1 << 23)).contains(&v) {
        SerialType::I24
    } else if (i32::MIN as i64..=i32::MAX as i64).contains(&v) {
        SerialType::I32
    } else if (-(1i64 << 47)..(1i64 << 47)).contains(&v) {
        SerialType::I48
    } else {
        SerialType::I64
    }
}

/// Encodes `values` into `out` as a record header followed by the column
/// bodies, in declaration order.
pub fn encode_record(values: &[ColumnValue<'_>], out: &mut Vec<u8>) {
    let start = out.len();
    let types: Vec<SerialType> = values.iter().map(serial_type_for).collect();

    let header_body_size: usize = types.iter().map(|st| varint::encoded_length(st.to_raw())).sum();
    let mut header_size_len = 1;
    let header_size = loop {
        let total = header_body_size + header_size_len;
        if varint::encoded_length(total as i64) == header_size_len {
            break total;
        }
        header_size_len += 1;
    };

    out.extend(varint::encode_to_vec(header_size as i64));
    for st in &types {
        out.extend(varint::encode_to_vec(st.to_raw()));
    }
    for value in values {
        write_body(value, out);
    }

    debug_assert_eq!(out.len() - start, computed_encoded_size(values));
}

fn write_body(value: &ColumnValue<'_>, out: &mut Vec<u8>) {
    match value {
        ColumnValue::Null | ColumnValue::Integer(0) | ColumnValue::Integer(1) => {}
        ColumnValue::Integer(v) => {
            let st = smallest_integer_type(*v);
            let width = st.content_size();
            let bytes = v.to_be_bytes();
            out.extend_from_slice(&bytes[8 - width..]);
        }
        ColumnValue::Real(v) => out.extend_from_slice(&v.to_be_bytes()),
        ColumnValue::Text(bytes) | ColumnValue::Blob(bytes) => out.extend_from_slice(bytes),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn encode_decode(values: &[ColumnValue<'_>]) -> Vec<ColumnValue<'static>> {
        let mut buf = Vec::new();
        encode_record(values, &mut buf);
        assert_eq!(buf.len(), computed_encoded_size(values));

        let mut types = vec![SerialType::Null; values.len() + 4];
        let (count, body_offset) = read_serial_types(&buf, &mut types).unwrap();
        assert_eq!(count, values.len());

        (0..count)
            .map(|i| {
                let v = decode_column(&buf, i, &types[..count], body_offset).unwrap();
                // Leak to get a 'static lifetime for the test assertion only.
                match v {
                    ColumnValue::Null => ColumnValue::Null,
                    ColumnValue::Integer(i) => ColumnValue::Integer(i),
                    ColumnValue::Real(r) => ColumnValue::Real(r),
                    ColumnValue::Text(b) => ColumnValue::Text(Box::leak(b.to_vec().into_boxed_slice())),
                    ColumnValue::Blob(b) => ColumnValue::Blob(Box::leak(b.to_vec().into_boxed_slice())),
                }
            })
            .collect()
    }

    #[test]
    fn round_trips_every_storage_class() {
        let values = vec![
            ColumnValue::Null,
            ColumnValue::Integer(0),
            ColumnValue::Integer(1),
            ColumnValue::Integer(-5),
            ColumnValue::Integer(70000),
            ColumnValue::Integer(i64::MAX),
            ColumnValue::Real(3.5),
            ColumnValue::Text(b"hello"),
            ColumnValue::Blob(b"\x00\x01\x02"),
        ];
        let decoded = encode_decode(&values);
        assert_eq!(decoded, values);
    }

    #[test]
    fn empty_text_and_blob_have_distinct_serial_types() {
        let text = serial_type_for(&ColumnValue::Text(b""));
        let blob = serial_type_for(&ColumnValue::Blob(b""));
        assert_eq!(text, SerialType::Text(0));
        assert_eq!(blob, SerialType::Blob(0));
        assert_ne!(text.to_raw(), blob.to_raw());

        let decoded = encode_decode(&[ColumnValue::Text(b""), ColumnValue::Blob(b"")]);
        assert_eq!(decoded, vec![ColumnValue::Text(b""), ColumnValue::Blob(b"")]);
    }

    #[test]
    fn decode_column_skips_without_decoding_earlier_columns() {
        let values = vec![
            ColumnValue::Text(b"first"),
            ColumnValue::Integer(42),
            ColumnValue::Text(b"third"),
        ];
        let mut buf = Vec::new();
        encode_record(&values, &mut buf);

        let mut types = vec![SerialType::Null; 3];
        let (_, body_offset) = read_serial_types(&buf, &mut types).unwrap();
        let third = decode_column(&buf, 2, &types, body_offset).unwrap();
        assert_eq!(third, ColumnValue::Text(b"third"));
    }
}
