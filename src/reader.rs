//! The streaming reader surface the query executor composes pipelines
//! from.
//!
//! `Reader<'s>` carries an explicit lifetime rather than hiding it behind
//! a bare `dyn Reader` bound, so combinators built on top (joins,
//! predicate wrappers) can be boxed as `Box<dyn Reader<'s> + 's>` and
//! composed freely without an unsafe self-referential struct -- every
//! reader born from one query execution borrows the same page source for
//! the same lifetime `'s`, exactly the lifetime `TableCursor<'s>` and
//! `IndexSeekCursor<'s, C>` already carry.

use std::cmp::Ordering;

use crate::btree::cursor::{IndexSeekCursor, TableCursor};
use crate::error::Result;
use crate::filter::{self, CompiledFilter, Literal};
use crate::query::views::ViewPredicate;
use crate::record::{self, ColumnValue};
use crate::schema::TableDef;
use crate::serial_type::SerialType;
use crate::source::PageSource;
use crate::value::OwnedValue;

/// A materialized row: one [`OwnedValue`] per column, in the producing
/// reader's declared column order.
#[derive(Debug, Clone, PartialEq)]
pub struct Row(pub Vec<OwnedValue>);

pub trait Reader<'s> {
    fn next(&mut self) -> Result<Option<Row>>;
}

fn decode_row(bytes: &[u8], types: &[SerialType], body_offset: usize, rowid: i64, table: &TableDef) -> Result<Row> {
    let mut out = Vec::with_capacity(table.columns.len());
    for (ordinal, column) in table.columns.iter().enumerate() {
        let value = if Some(column.name.as_str()) == table.rowid_alias.as_deref() {
            ColumnValue::Integer(rowid)
        } else {
            record::decode_column(bytes, ordinal, types, body_offset)?
        };
        out.push(OwnedValue::from_column(&value));
    }
    Ok(Row(out))
}

/// A forward scan over one table's b-tree, filtering on raw record bytes
/// before a single [`OwnedValue`] is built -- a row that the filter
/// rejects never leaves `record::decode_column`.
pub struct TableScanReader<'s> {
    cursor: TableCursor<'s>,
    table: TableDef,
    filter: Option<CompiledFilter>,
}

impl<'s> TableScanReader<'s> {
    pub fn new(source: &'s dyn PageSource, table: TableDef, filter: Option<CompiledFilter>) -> Result<Self> {
        let cursor = TableCursor::new(source, table.root_page)?;
        Ok(Self { cursor, table, filter })
    }
}

impl<'s> Reader<'s> for TableScanReader<'s> {
    fn next(&mut self) -> Result<Option<Row>> {
        loop {
            let Some((rowid, payload)) = self.cursor.next_row()? else {
                return Ok(None);
            };
            let bytes = payload.as_slice();
            let mut types = vec![SerialType::Null; self.table.columns.len().max(1)];
            let (_, body_offset) = record::read_serial_types(bytes, &mut types)?;

            if let Some(filter) = &self.filter {
                if !filter.evaluate(bytes, &types, body_offset, rowid)? {
                    continue;
                }
            }
            return Ok(Some(decode_row(bytes, &types, body_offset, rowid, &self.table)?));
        }
    }
}

/// Builds the three-way comparator `IndexSeekCursor` seeks with: it
/// decodes an index key's leading column and compares the probe literal
/// against it, in the "target vs. key" direction the cursor's contract
/// expects. A key this engine can't decode is pushed past rather than
/// failing the whole seek, since the comparator signature has no way to
/// surface an error -- a corrupt index falls back to visiting every key,
/// which the residual filter downstream still catches.
fn probe_comparator(probe: Literal) -> impl FnMut(&[u8]) -> Ordering {
    move |key_bytes: &[u8]| {
        let mut types = [SerialType::Null; 16];
        let Ok((_, body_offset)) = record::read_serial_types(key_bytes, &mut types) else {
            return Ordering::Greater;
        };
        let Ok(value) = record::decode_column(key_bytes, 0, &types, body_offset) else {
            return Ordering::Greater;
        };
        match filter::compare(&value, &probe) {
            Some(ordering) => ordering.reverse(),
            None => Ordering::Greater,
        }
    }
}

/// An index-assisted lookup: seeks the equality run on `index_root` for
/// `probe`, then bookmark-looks-up each matching key's rowid in the base
/// table. `filter` is the full predicate (the index only proved one
/// conjunct), so a false-positive key never escapes as a wrong row.
pub struct IndexSeekReader<'s> {
    cursor: IndexSeekCursor<'s, Box<dyn FnMut(&[u8]) -> Ordering + 's>>,
    source: &'s dyn PageSource,
    table: TableDef,
    filter: Option<CompiledFilter>,
}

impl<'s> IndexSeekReader<'s> {
    pub fn new(
        source: &'s dyn PageSource,
        table: TableDef,
        index_root: u32,
        probe: Literal,
        filter: Option<CompiledFilter>,
    ) -> Result<Self> {
        let comparator: Box<dyn FnMut(&[u8]) -> Ordering + 's> = Box::new(probe_comparator(probe));
        let cursor = IndexSeekCursor::seek(source, index_root, comparator)?;
        Ok(Self {
            cursor,
            source,
            table,
            filter,
        })
    }
}

impl<'s> Reader<'s> for IndexSeekReader<'s> {
    fn next(&mut self) -> Result<Option<Row>> {
        loop {
            let Some(key) = self.cursor.next_key()? else {
                return Ok(None);
            };
            let mut key_types = vec![SerialType::Null; 16];
            let (count, key_body_offset) = record::read_serial_types(&key, &mut key_types)?;
            if count == 0 {
                continue;
            }
            let rowid = record::decode_column(&key, count - 1, &key_types, key_body_offset)?
                .as_i64()
                .unwrap_or(0);

            let mut table_cursor = TableCursor::seek(self.source, self.table.root_page, rowid)?;
            let Some((found_rowid, payload)) = table_cursor.next_row()? else {
                continue;
            };
            if found_rowid != rowid {
                continue;
            }

            let bytes = payload.as_slice();
            let mut types = vec![SerialType::Null; self.table.columns.len().max(1)];
            let (_, body_offset) = record::read_serial_types(bytes, &mut types)?;
            if let Some(filter) = &self.filter {
                if !filter.evaluate(bytes, &types, body_offset, rowid)? {
                    continue;
                }
            }
            return Ok(Some(decode_row(bytes, &types, body_offset, rowid, &self.table)?));
        }
    }
}

/// A naive nested-loop equi-join: for every left row, rescans the right
/// table for a matching value. Adequate for the scale this engine targets
/// (no statistics-driven join ordering or hash-join path); the right side
/// is re-scanned by constructing a fresh `TableScanReader` per left row
/// rather than materializing it once, trading repeat I/O for not needing
/// the right table's full extent held in memory.
pub struct NestedLoopJoinReader<'s> {
    source: &'s dyn PageSource,
    left: Box<dyn Reader<'s> + 's>,
    right_table: TableDef,
    left_column_index: usize,
    right_column_index: usize,
    current_left: Option<Row>,
    right_cursor: Option<TableScanReader<'s>>,
}

impl<'s> NestedLoopJoinReader<'s> {
    pub fn new(
        source: &'s dyn PageSource,
        left: Box<dyn Reader<'s> + 's>,
        left_column_index: usize,
        right_table: TableDef,
        right_column_index: usize,
    ) -> Self {
        Self {
            source,
            left,
            right_table,
            left_column_index,
            right_column_index,
            current_left: None,
            right_cursor: None,
        }
    }
}

impl<'s> Reader<'s> for NestedLoopJoinReader<'s> {
    fn next(&mut self) -> Result<Option<Row>> {
        loop {
            if self.current_left.is_none() {
                match self.left.next()? {
                    Some(row) => {
                        self.current_left = Some(row);
                        self.right_cursor = Some(TableScanReader::new(self.source, self.right_table.clone(), None)?);
                    }
                    None => return Ok(None),
                }
            }

            let left_row = self.current_left.as_ref().expect("just populated above");
            let right_cursor = self.right_cursor.as_mut().expect("populated alongside current_left");

            match right_cursor.next()? {
                Some(right_row) => {
                    if crate::value::compare_owned(
                        &left_row.0[self.left_column_index],
                        &right_row.0[self.right_column_index],
                    ) == Ordering::Equal
                    {
                        let mut combined = left_row.0.clone();
                        combined.extend(right_row.0);
                        return Ok(Some(Row(combined)));
                    }
                }
                None => {
                    self.current_left = None;
                    self.right_cursor = None;
                }
            }
        }
    }
}

/// Applies a registered view's Rust-closure residual predicate after the
/// base scan/seek has already applied its own filter.
pub struct ViewPredicateReader<'s> {
    inner: Box<dyn Reader<'s> + 's>,
    predicate: ViewPredicate,
}

impl<'s> ViewPredicateReader<'s> {
    pub fn new(inner: Box<dyn Reader<'s> + 's>, predicate: ViewPredicate) -> Self {
        Self { inner, predicate }
    }
}

impl<'s> Reader<'s> for ViewPredicateReader<'s> {
    fn next(&mut self) -> Result<Option<Row>> {
        while let Some(row) = self.inner.next()? {
            if (self.predicate)(&row.0) {
                return Ok(Some(row));
            }
        }
        Ok(None)
    }
}
