//! The serial-type discriminator that precedes every column in a record
//! header.
//!
//! Classification is a pure function of the varint value; implementations
//! are expected to be branch-predictor friendly, so [`SerialType::from_raw`]
//! is a single match over contiguous ranges rather than a search.

/// A column's storage class and on-disk width, decoded from its serial-type
/// varint.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SerialType {
    Null,
    I8,
    I16,
    I24,
    I32,
    I48,
    I64,
    F64,
    Zero,
    One,
    Blob(u64),
    Text(u64),
}

impl SerialType {
    /// Classifies a raw serial-type varint value. Values 10 and 11 are
    /// reserved by the format and never appear in a well-formed record;
    /// callers that meet one are looking at a corrupt page.
    pub fn from_raw(value: i64) -> Option<Self> {
        let value = value as u64;
        Some(match value {
            0 => SerialType::Null,
            1 => SerialType::I8,
            2 => SerialType::I16,
            3 => SerialType::I24,
            4 => SerialType::I32,
            5 => SerialType::I48,
            6 => SerialType::I64,
            7 => SerialType::F64,
            8 => SerialType::Zero,
            9 => SerialType::One,
            10 | 11 => return None,
            n if n % 2 == 0 => SerialType::Blob((n - 12) / 2),
            n => SerialType::Text((n - 13) / 2),
        })
    }

    /// The serial-type value that would encode this discriminant.
    pub fn to_raw(self) -> i64 {
        (match self {
            SerialType::Null => 0,
            SerialType::I8 => 1,
            SerialType::I16 => 2,
            SerialType::I24 => 3,
            SerialType::I32 => 4,
            SerialType::I48 => 5,
            SerialType::I64 => 6,
            SerialType::F64 => 7,
            SerialType::Zero => 8,
            SerialType::One => 9,
            SerialType::Blob(n) => n * 2 + 12,
            SerialType::Text(n) => n * 2 + 13,
        }) as i64
    }

    /// Number of body bytes this serial type occupies (0 for the
    /// zero-width types: NULL and the integer constants 0/1).
    pub fn content_size(self) -> usize {
        match self {
            SerialType::Null | SerialType::Zero | SerialType::One => 0,
            SerialType::I8 => 1,
            SerialType::I16 => 2,
            SerialType::I24 => 3,
            SerialType::I32 => 4,
            SerialType::I48 => 6,
            SerialType::I64 => 8,
            SerialType::F64 => 8,
            SerialType::Blob(n) => n as usize,
            SerialType::Text(n) => n as usize,
        }
    }

    pub fn is_null(self) -> bool {
        matches!(self, SerialType::Null)
    }

    pub fn is_integer(self) -> bool {
        matches!(
            self,
            SerialType::I8
                | SerialType::I16
                | SerialType::I24
                | SerialType::I32
                | SerialType::I48
                | SerialType::I64
                | SerialType::Zero
                | SerialType::One
        )
    }

    pub fn is_real(self) -> bool {
        matches!(self, SerialType::F64)
    }

    pub fn is_text(self) -> bool {
        matches!(self, SerialType::Text(_))
    }

    pub fn is_blob(self) -> bool {
        matches!(self, SerialType::Blob(_))
    }

    /// A 4-bit tag used by the fingerprint's type mask. Distinct storage
    /// classes get distinct tags; width within a class does not change the
    /// tag (only the raw hashed bytes do), so `I8(5)` and `I32(5)` share a
    /// type tag but still hash differently because the serial type itself
    /// is part of the hashed stream (see `fingerprint.rs`).
    pub fn type_tag(self) -> u8 {
        match self {
            SerialType::Null => 0,
            SerialType::I8
            | SerialType::I16
            | SerialType::I24
            | SerialType::I32
            | SerialType::I48
            | SerialType::I64
            | SerialType::Zero
            | SerialType::One => 1,
            SerialType::F64 => 2,
            SerialType::Text(_) => 3,
            SerialType::Blob(_) => 4,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn text_and_blob_distinguish_empty_payloads() {
        let text = SerialType::from_raw(13).unwrap();
        let blob = SerialType::from_raw(12).unwrap();
        assert_eq!(text, SerialType::Text(0));
        assert_eq!(blob, SerialType::Blob(0));
        assert_ne!(text.to_raw(), blob.to_raw());
        assert_eq!(text.content_size(), 0);
        assert_eq!(blob.content_size(), 0);
    }

    #[test]
    fn reserved_values_rejected() {
        assert!(SerialType::from_raw(10).is_none());
        assert!(SerialType::from_raw(11).is_none());
    }

    #[test]
    fn round_trips_through_raw() {
        for st in [
            SerialType::Null,
            SerialType::I8,
            SerialType::I16,
            SerialType::I24,
            SerialType::I32,
            SerialType::I48,
            SerialType::I64,
            SerialType::F64,
            SerialType::Zero,
            SerialType::One,
            SerialType::Blob(0),
            SerialType::Blob(17),
            SerialType::Text(0),
            SerialType::Text(42),
        ] {
            assert_eq!(SerialType::from_raw(st.to_raw()), Some(st));
        }
    }
}
