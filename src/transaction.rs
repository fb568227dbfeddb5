//! A single write transaction: the programmatic insert/update/delete API
//! (spec's DDL/DML surface puts row writes here, not in SQL text) plus
//! the DDL pass-through and the commit/rollback protocol.
//!
//! Every top-level call builds a short-lived [`Mutator`] borrowing the
//! transaction's [`ShadowSource`] and the freelist state carried on
//! `self.header`; the mutator is dropped at the end of the call and its
//! freelist trunk/leaf count written back, so nothing here needs to hold
//! a self-referential `Mutator` alongside the shadow it borrows from.

use std::sync::MutexGuard;

use log::debug;

use crate::btree::mutator::Mutator;
use crate::database::Database;
use crate::ddl;
use crate::error::{Error, Result};
use crate::filter::Literal;
use crate::freelist::FreelistManager;
use crate::header::DatabaseHeader;
use crate::query::exec::{self, QueryOutput};
use crate::record::{encode_record, ColumnValue};
use crate::row::{rows_as, Row};
use crate::schema::{self, Schema};
use crate::source::proxy::ProxySource;
use crate::source::shadow::ShadowSource;
use crate::source::PageSource;

/// A table or index mutation committed by this transaction, handed to
/// commit observers as `(table_name, rowid)` once the journal is deleted.
pub type Mutation = (String, i64);

pub struct Transaction<'db> {
    db: &'db Database,
    shadow: ShadowSource<'db, ProxySource>,
    header: DatabaseHeader,
    schema: Schema,
    mutations: Vec<Mutation>,
    finished: bool,
    _write_guard: MutexGuard<'db, ()>,
}

impl<'db> Transaction<'db> {
    pub(crate) fn new(db: &'db Database, guard: MutexGuard<'db, ()>, header: DatabaseHeader, schema: Schema) -> Self {
        Self {
            db,
            shadow: ShadowSource::new(db.read_source()),
            header,
            schema,
            mutations: Vec::new(),
            finished: false,
            _write_guard: guard,
        }
    }

    fn with_mutator<R>(&mut self, f: impl FnOnce(&mut Mutator<'_, ProxySource>) -> Result<R>) -> Result<R> {
        let freelist = FreelistManager::new(
            &self.shadow,
            self.header.usable_page_size(),
            self.header.freelist_trunk_page(),
            self.header.freelist_page_count(),
        );
        let mut mutator = Mutator::new(&self.shadow, freelist, self.header.usable_page_size());
        let result = f(&mut mutator)?;
        self.header.set_freelist_trunk_page(mutator.freelist().first_trunk_page());
        self.header.set_freelist_page_count(mutator.freelist().leaf_count());
        Ok(result)
    }

    /// Reads the current in-memory schema. A `Transaction` carries its own
    /// copy taken at `begin_transaction`, seeing its own uncommitted DDL
    /// immediately (read-your-writes) without affecting readers on other
    /// handles until commit.
    pub fn schema(&self) -> &Schema {
        &self.schema
    }

    /// Runs a query against this transaction's shadow, so an uncommitted
    /// insert/update/delete is visible to a `SELECT` issued before commit.
    pub fn query(&self, sql: &str) -> Result<QueryOutput> {
        self.query_with_params(sql, &std::collections::HashMap::new())
    }

    pub fn query_with_params(&self, sql: &str, params: &std::collections::HashMap<String, Literal>) -> Result<QueryOutput> {
        let intent = crate::query::parser::parse(sql)?;
        self.query_with_params_from_intent(&intent, params)
    }

    /// Like [`Self::query_with_params`], but for a [`crate::query::intent::Intent`]
    /// already parsed once by a [`crate::prepared::PreparedQuery`] -- lets a
    /// prepared statement re-run against an open transaction's shadow
    /// without re-parsing its SQL text on every call.
    pub(crate) fn query_with_params_from_intent(
        &self,
        intent: &crate::query::intent::Intent,
        params: &std::collections::HashMap<String, Literal>,
    ) -> Result<QueryOutput> {
        let views = self.db.views();
        let plan = self.db.plan_cache().get_or_compile(intent, &self.schema, &views)?;
        drop(views);
        exec::execute(&plan, &self.shadow, params)
    }

    pub fn query_as<T: Row>(&self, sql: &str) -> Result<Vec<T>> {
        match self.query(sql)? {
            QueryOutput::Rows { columns, rows } => rows_as(&columns, &rows),
            QueryOutput::Explain(_) => Err(Error::InvalidOperation("EXPLAIN output cannot be hydrated into a row type".into())),
        }
    }

    /// Appends a row to `table`, maintaining every index declared on it.
    /// `values` must be in the table's declared column order; a column
    /// aliasing the rowid is still passed (its value becomes the rowid),
    /// matching how `schema::parse_table_for_ddl` lays out `TableDef::columns`.
    pub fn insert(&mut self, table: &str, rowid: i64, values: &[ColumnValue<'_>]) -> Result<()> {
        let table_def = self
            .schema
            .tables
            .get(table)
            .ok_or_else(|| Error::SchemaMismatch(format!("no such table `{table}`")))?
            .clone();

        let mut payload = Vec::new();
        encode_record(values, &mut payload);

        let root = table_def.root_page;
        let new_root = self.with_mutator(|mutator| mutator.insert(root, rowid, &payload))?;
        if let Some(new_root) = new_root {
            self.sync_root("table", table, new_root)?;
        }

        self.maintain_indexes_on_insert(&table_def.name, values, rowid)?;
        self.mutations.push((table.to_string(), rowid));
        debug!("inserted rowid {rowid} into `{table}`");
        Ok(())
    }

    pub fn update(&mut self, table: &str, rowid: i64, values: &[ColumnValue<'_>]) -> Result<()> {
        let table_def = self
            .schema
            .tables
            .get(table)
            .ok_or_else(|| Error::SchemaMismatch(format!("no such table `{table}`")))?
            .clone();

        let old = self.read_row_for_index_maintenance(&table_def, rowid)?;

        let mut payload = Vec::new();
        encode_record(values, &mut payload);
        let root = table_def.root_page;
        let new_root = self.with_mutator(|mutator| mutator.update(root, rowid, &payload))?;
        if let Some(new_root) = new_root {
            self.sync_root("table", table, new_root)?;
        }

        if let Some(old_values) = old {
            self.maintain_indexes_on_delete(&table_def.name, &old_values, rowid)?;
        }
        self.maintain_indexes_on_insert(&table_def.name, values, rowid)?;

        self.mutations.push((table.to_string(), rowid));
        debug!("updated rowid {rowid} in `{table}`");
        Ok(())
    }

    pub fn delete(&mut self, table: &str, rowid: i64) -> Result<()> {
        let table_def = self
            .schema
            .tables
            .get(table)
            .ok_or_else(|| Error::SchemaMismatch(format!("no such table `{table}`")))?
            .clone();

        let old = self.read_row_for_index_maintenance(&table_def, rowid)?;

        let root = table_def.root_page;
        let new_root = self.with_mutator(|mutator| mutator.delete(root, rowid))?;
        if let Some(new_root) = new_root {
            self.sync_root("table", table, new_root)?;
        }

        if let Some(old_values) = old {
            self.maintain_indexes_on_delete(&table_def.name, &old_values, rowid)?;
        }

        self.mutations.push((table.to_string(), rowid));
        debug!("deleted rowid {rowid} from `{table}`");
        Ok(())
    }

    /// Decodes the current on-disk row (through the shadow, so it sees
    /// this transaction's own prior writes) for index maintenance ahead
    /// of an update/delete. `None` if the row doesn't exist (nothing to
    /// retract from an index).
    fn read_row_for_index_maintenance(&self, table: &schema::TableDef, rowid: i64) -> Result<Option<Vec<crate::value::OwnedValue>>> {
        let mut cursor = crate::btree::cursor::TableCursor::seek(&self.shadow, table.root_page, rowid)?;
        let Some((found_rowid, payload)) = cursor.next_row()? else {
            return Ok(None);
        };
        if found_rowid != rowid {
            return Ok(None);
        }
        let bytes = payload.as_slice();
        let mut types = vec![crate::serial_type::SerialType::Null; table.columns.len().max(1)];
        let (_, body_offset) = crate::record::read_serial_types(bytes, &mut types)?;
        let mut out = Vec::with_capacity(table.columns.len());
        for ordinal in 0..table.columns.len() {
            let value = crate::record::decode_column(bytes, ordinal, &types, body_offset)?;
            out.push(crate::value::OwnedValue::from_column(&value));
        }
        Ok(Some(out))
    }

    fn indexes_on(&self, table: &str) -> Vec<schema::IndexDef> {
        self.schema
            .indexes
            .values()
            .filter(|index| index.table_name == table)
            .cloned()
            .collect()
    }

    fn maintain_indexes_on_insert(&mut self, table: &str, values: &[ColumnValue<'_>], rowid: i64) -> Result<()> {
        for index in self.indexes_on(table) {
            let key = self.build_index_key(&index, values, rowid)?;
            let root = index.root_page;
            if let Some(new_root) = self.with_mutator(|mutator| mutator.insert_index(root, &key))? {
                self.sync_root("index", &index.name, new_root)?;
            }
        }
        Ok(())
    }

    fn maintain_indexes_on_delete(&mut self, table: &str, old_values: &[crate::value::OwnedValue], rowid: i64) -> Result<()> {
        for index in self.indexes_on(table) {
            let owned: Vec<ColumnValue<'_>> = old_values.iter().map(|v| v.as_column()).collect();
            let key = self.build_index_key(&index, &owned, rowid)?;
            let root = index.root_page;
            if let Some(new_root) = self.with_mutator(|mutator| mutator.delete_index(root, &key))? {
                self.sync_root("index", &index.name, new_root)?;
            }
        }
        Ok(())
    }

    /// An index key is the indexed column's value followed by the row's
    /// rowid (`reader::IndexSeekReader` decodes the last column of a key
    /// as the bookmark rowid), so a unique value still sorts deterministically
    /// against duplicates in the same index.
    fn build_index_key(&self, index: &schema::IndexDef, values: &[ColumnValue<'_>], rowid: i64) -> Result<Vec<u8>> {
        let table = self
            .schema
            .tables
            .get(&index.table_name)
            .ok_or_else(|| Error::SchemaMismatch(format!("no such table `{}`", index.table_name)))?;
        let columns = schema::parse_index_columns(&index.sql)?;
        let column_name = columns
            .first()
            .ok_or_else(|| Error::corrupt(index.root_page, "index has no indexed columns"))?;
        let ordinal = table
            .columns
            .iter()
            .position(|c| &c.name == column_name)
            .ok_or_else(|| Error::SchemaMismatch(format!("no such column `{column_name}` on `{}`", index.table_name)))?;

        let indexed_value = values
            .get(ordinal)
            .copied()
            .ok_or_else(|| Error::InvalidOperation("fewer values supplied than the table declares columns".into()))?;

        let mut key = Vec::new();
        encode_record(&[indexed_value, ColumnValue::Integer(rowid)], &mut key);
        Ok(key)
    }

    /// Re-encodes the schema row for `name` with its new root page after a
    /// split. Built directly rather than through [`Self::with_mutator`]:
    /// `ddl::sync_root_page` also needs `&self.shadow` as the page source
    /// to walk, which a closure passed to `with_mutator` can't capture
    /// alongside the `&mut self` the call itself requires.
    fn sync_root(&mut self, kind: &str, name: &str, new_root: u32) -> Result<()> {
        let freelist = FreelistManager::new(
            &self.shadow,
            self.header.usable_page_size(),
            self.header.freelist_trunk_page(),
            self.header.freelist_page_count(),
        );
        let mut mutator = Mutator::new(&self.shadow, freelist, self.header.usable_page_size());
        ddl::sync_root_page(&mut mutator, &self.shadow, kind, name, new_root)?;
        self.header.set_freelist_trunk_page(mutator.freelist().first_trunk_page());
        self.header.set_freelist_page_count(mutator.freelist().leaf_count());
        Ok(())
    }

    /// Dispatches one DDL statement through `ddl::execute`, keeping this
    /// transaction's header/schema copies and the commit's schema-cookie
    /// bump in lock-step with the rows it writes to the schema b-tree.
    pub fn execute_ddl(&mut self, sql: &str) -> Result<()> {
        let shadow = &self.shadow;
        let header = &mut self.header;
        let schema = &mut self.schema;
        let freelist = FreelistManager::new(shadow, header.usable_page_size(), header.freelist_trunk_page(), header.freelist_page_count());
        let mut mutator = Mutator::new(shadow, freelist, header.usable_page_size());
        ddl::execute(&mut mutator, shadow, header, schema, sql)?;
        header.set_freelist_trunk_page(mutator.freelist().first_trunk_page());
        header.set_freelist_page_count(mutator.freelist().leaf_count());
        Ok(())
    }

    /// Flushes dirty pages to the base source via the rollback journal
    /// protocol (spec section 6.1/4.9): write a journal of pre-images,
    /// fsync it, then overwrite the base pages in ascending order and
    /// fsync again, finally deleting the journal. A crash at any point
    /// before the journal is deleted leaves enough on disk for
    /// `journal::recover` to restore the pre-transaction state on the
    /// next open.
    pub fn commit(mut self) -> Result<Vec<Mutation>> {
        self.finished = true;
        let dirty = self.shadow.dirty_page_numbers();
        if dirty.is_empty() {
            self.db.replace_schema(self.schema, self.header);
            return Ok(self.mutations);
        }

        let base = self.db.write_base();
        let page_size = self.header.page_size();

        if let Some(journal_path) = self.db.journal_path() {
            crate::journal::write_journal(journal_path, page_size, &dirty, |page_number| {
                let mut out = vec![0u8; page_size as usize];
                base.read_page(page_number, &mut out)?;
                Ok(out)
            })?;
        }

        if base.page_count() < self.shadow.page_count() {
            base.set_page_count(self.shadow.page_count())?;
        }
        for (page_number, data) in self.shadow.drain_dirty_pages() {
            base.write_page(page_number, &data)?;
        }
        base.sync()?;

        if let Some(journal_path) = self.db.journal_path() {
            crate::journal::delete(journal_path)?;
        }

        self.header.set_page_count(self.shadow.page_count());
        self.db.replace_schema(self.schema.clone(), self.header.clone());
        self.db.notify_commit(&self.mutations);
        debug!("committed {} dirty page(s), {} mutation(s)", dirty.len(), self.mutations.len());
        Ok(self.mutations)
    }

    /// Drops the shadow without touching the base source. Implicit on
    /// `Drop` if `commit` was never called.
    pub fn rollback(mut self) {
        self.finished = true;
    }
}

impl<'db> Drop for Transaction<'db> {
    fn drop(&mut self) {
        if !self.finished {
            debug!("transaction dropped without commit: rolling back");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn insert_then_query_sees_uncommitted_row_before_commit() {
        let db = Database::create_in_memory(4096).unwrap();
        let mut txn = db.begin_transaction().unwrap();
        txn.execute_ddl("CREATE TABLE t (id INTEGER PRIMARY KEY, name TEXT)").unwrap();
        txn.insert("t", 1, &[ColumnValue::Null, ColumnValue::Text(b"Alice")]).unwrap();

        match txn.query("SELECT name FROM t WHERE id = 1").unwrap() {
            QueryOutput::Rows { rows, .. } => assert_eq!(rows.len(), 1),
            QueryOutput::Explain(_) => panic!("expected rows"),
        }
        txn.commit().unwrap();

        match db.query("SELECT name FROM t WHERE id = 1").unwrap() {
            QueryOutput::Rows { rows, .. } => assert_eq!(rows.len(), 1),
            QueryOutput::Explain(_) => panic!("expected rows"),
        }
    }

    #[test]
    fn rollback_leaves_the_base_untouched() {
        let db = Database::create_in_memory(4096).unwrap();
        {
            let mut txn = db.begin_transaction().unwrap();
            txn.execute_ddl("CREATE TABLE t (id INTEGER PRIMARY KEY, name TEXT)").unwrap();
            txn.commit().unwrap();
        }

        let mut txn = db.begin_transaction().unwrap();
        txn.insert("t", 1, &[ColumnValue::Null, ColumnValue::Text(b"Bob")]).unwrap();
        txn.rollback();

        match db.query("SELECT name FROM t").unwrap() {
            QueryOutput::Rows { rows, .. } => assert!(rows.is_empty()),
            QueryOutput::Explain(_) => panic!("expected rows"),
        }
    }
}
