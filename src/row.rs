//! Opt-in typed-row sugar over the zero-copy [`ColumnValue`] core.
//!
//! `#[derive(Row)]` (in `sharc-macros`) binds a plain struct's fields to
//! column names (or the rowid alias) and implements [`Row`] for it, the way
//! the teacher derives its own `Table` trait; the struct itself derives
//! `serde::Deserialize` directly, and [`ColumnValue`] is the
//! `serde::Deserializer` a row's columns feed through -- one column, one
//! struct field, positionally, the same record-to-struct bridge the
//! teacher builds over its own record values. This layer never touches the
//! zero-alloc scan/filter hot path -- it copies out (`String`, `Vec<u8>`)
//! by construction, the same trade-off the teacher's `Row`/`serde` bridge
//! makes for its `rows::<T>()` convenience iterator.
//!
//! A struct's rowid-alias field stores `NULL` in its record slot (the real
//! value lives only in the cursor's rowid); mark it with `#[row(rowid)]`
//! and `#[serde(with = "sharc::row::rowid")]` together, the same two-
//! attribute stack the teacher puts on its own rowid fields. The struct is
//! deserialized once with that column defaulted to `0`, then
//! [`Row::set_rowid`] overwrites it unconditionally with the real value.

use std::iter::Copied;
use std::slice::Iter;

use serde::de::value::{Error as SerdeError, SeqDeserializer};
use serde::de::{IntoDeserializer, Visitor};
use serde::Deserializer;

use crate::error::{Error, Result};
use crate::record::ColumnValue;

/// Deserialize helper for a rowid-alias field, referenced as
/// `#[serde(with = "sharc::row::rowid")]`. The underlying column holds
/// `NULL` (an `INTEGER PRIMARY KEY` column's real value lives only in the
/// cursor rowid); this defaults a missing or null value to `0`, and
/// `Row::from_row` overwrites the field with the real rowid right after
/// deserializing.
pub mod rowid {
    use serde::{Deserialize, Deserializer};

    pub fn deserialize<'de, D: Deserializer<'de>>(deserializer: D) -> Result<i64, D::Error> {
        Option::<i64>::deserialize(deserializer).map(|o| o.unwrap_or(0))
    }
}

impl<'de> Deserializer<'de> for ColumnValue<'de> {
    type Error = SerdeError;

    fn deserialize_any<V>(self, visitor: V) -> std::result::Result<V::Value, Self::Error>
    where
        V: Visitor<'de>,
    {
        match self {
            ColumnValue::Null => visitor.visit_none(),
            ColumnValue::Integer(v) => visitor.visit_i64(v),
            ColumnValue::Real(v) => visitor.visit_f64(v),
            ColumnValue::Text(bytes) => match std::str::from_utf8(bytes) {
                Ok(s) => visitor.visit_borrowed_str(s),
                Err(_) => visitor.visit_borrowed_bytes(bytes),
            },
            ColumnValue::Blob(bytes) => visitor.visit_borrowed_bytes(bytes),
        }
    }

    fn deserialize_option<V>(self, visitor: V) -> std::result::Result<V::Value, Self::Error>
    where
        V: Visitor<'de>,
    {
        match self {
            ColumnValue::Null => visitor.visit_none(),
            other => visitor.visit_some(other),
        }
    }

    serde::forward_to_deserialize_any! {
        bool i8 i16 i32 i64 i128 u8 u16 u32 u64 u128 f32 f64 char str string
        bytes byte_buf unit unit_struct newtype_struct seq tuple
        tuple_struct map struct enum identifier ignored_any
    }
}

impl<'de> IntoDeserializer<'de> for ColumnValue<'de> {
    type Deserializer = ColumnValue<'de>;

    fn into_deserializer(self) -> Self::Deserializer {
        self
    }
}

/// Wraps one query result row's (already name-reordered) columns as a
/// positional `serde` deserializer -- the same `SeqDeserializer`-over-
/// column-values shape the teacher builds from a record's serial values.
pub fn columns_deserializer<'c, 'de>(
    columns: &'c [ColumnValue<'de>],
) -> SeqDeserializer<Copied<Iter<'c, ColumnValue<'de>>>, SerdeError> {
    SeqDeserializer::new(columns.iter().copied())
}

/// Derived by `#[derive(Row)]`. `COLUMN_NAMES` lists every field in
/// declaration order, including the rowid-alias field -- `serde`'s derived
/// `Deserialize` impl reads a row positionally, so the actual query
/// result's columns must be reordered to this same order first.
pub trait Row: Sized {
    const TABLE_NAME: &'static str;
    const COLUMN_NAMES: &'static [&'static str];
    const ROWID_COLUMN: Option<&'static str> = None;

    fn from_row(rowid: i64, columns: &[ColumnValue<'_>]) -> Result<Self>;

    fn set_rowid(&mut self, _rowid: i64) {}
}

/// Reorders one query result row's columns to match `T::COLUMN_NAMES` by
/// name (not position -- a `Row`'s derived field order rarely matches a
/// `SELECT`'s projection order) and hands it to `T::from_row`. A rowid
/// field whose column wasn't actually selected is padded with `NULL`
/// rather than rejected; `from_row` defaults it to `0` through the
/// `rowid` deserialize helper, and the rowid extracted below (when the
/// column *was* selected) is layered back on top afterward.
pub fn row_as<T: Row>(columns: &[String], row: &crate::reader::Row) -> Result<T> {
    let rowid = match T::ROWID_COLUMN {
        Some(name) => columns
            .iter()
            .position(|c| c == name)
            .and_then(|idx| row.0[idx].as_i64())
            .unwrap_or(0),
        None => 0,
    };

    let reordered = T::COLUMN_NAMES
        .iter()
        .map(|name| match columns.iter().position(|c| c == name) {
            Some(idx) => Ok(row.0[idx].as_column()),
            None if Some(*name) == T::ROWID_COLUMN => Ok(ColumnValue::Null),
            None => Err(Error::SchemaMismatch(format!(
                "column `{name}` not present in result set; select it to hydrate this row type"
            ))),
        })
        .collect::<Result<Vec<_>>>()?;

    T::from_row(rowid, &reordered)
}

/// Converts every row of a materialized result set the same way as
/// [`row_as`].
pub fn rows_as<T: Row>(columns: &[String], rows: &[crate::reader::Row]) -> Result<Vec<T>> {
    rows.iter().map(|row| row_as(columns, row)).collect()
}

#[cfg(test)]
mod tests {
    use serde::Deserialize;

    use super::*;

    #[test]
    fn column_value_deserializes_option_as_null_aware() {
        assert_eq!(Option::<i64>::deserialize(ColumnValue::Null).unwrap(), None);
        assert_eq!(Option::<i64>::deserialize(ColumnValue::Integer(5)).unwrap(), Some(5));
    }

    #[derive(Debug, Deserialize)]
    struct Person {
        #[serde(with = "rowid")]
        id: i64,
        name: String,
    }

    impl Row for Person {
        const TABLE_NAME: &'static str = "people";
        const COLUMN_NAMES: &'static [&'static str] = &["id", "name"];
        const ROWID_COLUMN: Option<&'static str> = Some("id");

        fn from_row(rowid: i64, columns: &[ColumnValue<'_>]) -> Result<Self> {
            let mut value: Self = Person::deserialize(columns_deserializer(columns))?;
            value.set_rowid(rowid);
            Ok(value)
        }

        fn set_rowid(&mut self, rowid: i64) {
            self.id = rowid;
        }
    }

    #[test]
    fn row_as_reorders_by_name_and_pulls_the_rowid_column() {
        use crate::value::OwnedValue;

        let columns = vec!["name".to_string(), "id".to_string()];
        let row = crate::reader::Row(vec![OwnedValue::Text("Alice".into()), OwnedValue::Integer(7)]);

        let person: Person = row_as(&columns, &row).unwrap();
        assert_eq!(person.id, 7);
        assert_eq!(person.name, "Alice");
    }

    #[test]
    fn row_as_rejects_a_missing_column() {
        use crate::value::OwnedValue;

        let columns = vec!["id".to_string()];
        let row = crate::reader::Row(vec![OwnedValue::Integer(1)]);
        assert!(row_as::<Person>(&columns, &row).is_err());
    }

    #[test]
    fn row_as_defaults_an_unselected_rowid_column_to_zero() {
        use crate::value::OwnedValue;

        let columns = vec!["name".to_string()];
        let row = crate::reader::Row(vec![OwnedValue::Text("Bob".into())]);

        let person: Person = row_as(&columns, &row).unwrap();
        assert_eq!(person.id, 0);
        assert_eq!(person.name, "Bob");
    }
}
