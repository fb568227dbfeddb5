//! An owned, 'static column value, used wherever the execution engine
//! must hold a value past the lifetime of the page buffer it was decoded
//! from -- a joined row, a group-by key's carried columns, a sorted
//! result set. The zero-copy core (`record::ColumnValue`) never goes
//! through here; only the reader/execution surface above it does.

use crate::record::ColumnValue;

#[derive(Debug, Clone, PartialEq)]
pub enum OwnedValue {
    Null,
    Integer(i64),
    Real(f64),
    Text(String),
    Blob(Vec<u8>),
}

impl OwnedValue {
    pub fn from_column(value: &ColumnValue<'_>) -> Self {
        match value {
            ColumnValue::Null => OwnedValue::Null,
            ColumnValue::Integer(v) => OwnedValue::Integer(*v),
            ColumnValue::Real(v) => OwnedValue::Real(*v),
            ColumnValue::Text(b) => OwnedValue::Text(String::from_utf8_lossy(b).into_owned()),
            ColumnValue::Blob(b) => OwnedValue::Blob(b.to_vec()),
        }
    }

    pub fn as_column(&self) -> ColumnValue<'_> {
        match self {
            OwnedValue::Null => ColumnValue::Null,
            OwnedValue::Integer(v) => ColumnValue::Integer(*v),
            OwnedValue::Real(v) => ColumnValue::Real(*v),
            OwnedValue::Text(s) => ColumnValue::Text(s.as_bytes()),
            OwnedValue::Blob(b) => ColumnValue::Blob(b),
        }
    }

    pub fn is_null(&self) -> bool {
        matches!(self, OwnedValue::Null)
    }

    pub fn as_i64(&self) -> Option<i64> {
        match self {
            OwnedValue::Integer(v) => Some(*v),
            OwnedValue::Real(v) => Some(*v as i64),
            _ => None,
        }
    }

    pub fn as_f64(&self) -> Option<f64> {
        match self {
            OwnedValue::Integer(v) => Some(*v as f64),
            OwnedValue::Real(v) => Some(*v),
            _ => None,
        }
    }

    pub fn as_str(&self) -> Option<&str> {
        match self {
            OwnedValue::Text(s) => Some(s.as_str()),
            _ => None,
        }
    }
}

/// SQLite storage-class ordering (NULL < numeric < text < blob), the same
/// rule `filter::compare` applies between a decoded column and a literal,
/// generalised here to two already-materialized values for `ORDER BY` and
/// the aggregate comparisons `MIN`/`MAX` drive.
pub fn compare_owned(a: &OwnedValue, b: &OwnedValue) -> std::cmp::Ordering {
    use std::cmp::Ordering::*;
    use OwnedValue::*;
    match (a, b) {
        (Null, Null) => Equal,
        (Null, _) => Less,
        (_, Null) => Greater,
        (Integer(x), Integer(y)) => x.cmp(y),
        (Integer(x), Real(y)) => (*x as f64).partial_cmp(y).unwrap_or(Equal),
        (Real(x), Integer(y)) => x.partial_cmp(&(*y as f64)).unwrap_or(Equal),
        (Real(x), Real(y)) => x.partial_cmp(y).unwrap_or(Equal),
        (Integer(_) | Real(_), Text(_) | Blob(_)) => Less,
        (Text(_) | Blob(_), Integer(_) | Real(_)) => Greater,
        (Text(x), Text(y)) => x.cmp(y),
        (Text(_), Blob(_)) => Less,
        (Blob(_), Text(_)) => Greater,
        (Blob(x), Blob(y)) => x.cmp(y),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn null_sorts_before_everything() {
        assert_eq!(compare_owned(&OwnedValue::Null, &OwnedValue::Integer(0)), std::cmp::Ordering::Less);
    }

    #[test]
    fn integer_and_real_compare_numerically() {
        assert_eq!(
            compare_owned(&OwnedValue::Integer(5), &OwnedValue::Real(5.0)),
            std::cmp::Ordering::Equal
        );
    }

    #[test]
    fn round_trips_through_column_value() {
        let owned = OwnedValue::Text("hello".into());
        let col = owned.as_column();
        assert_eq!(OwnedValue::from_column(&col), owned);
    }
}
