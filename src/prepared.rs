//! A parsed-once, repeatedly-executable query handle.
//!
//! `PreparedQuery` amortizes SQL parsing across repeated calls: parsing
//! happens exactly once in [`PreparedQuery::new`], and each `execute` call
//! only has to look up (or compile, on a schema change) a plan from the
//! database's own [`crate::query::planner::PlanCache`]. This mirrors the
//! teacher's `TableHandle` -- a handle minted once and reused across many
//! `rows()` calls rather than re-resolved from the schema every time.

use std::collections::HashMap;

use crate::database::Database;
use crate::error::{Error, Result};
use crate::filter::Literal;
use crate::pool::{acquire_row_buffer, release_row_buffer};
use crate::query::exec::{self, QueryOutput};
use crate::query::intent::Intent;
use crate::query::parser;
use crate::row::{rows_as, Row};

pub struct PreparedQuery {
    intent: Intent,
}

impl PreparedQuery {
    pub fn new(sql: &str) -> Result<Self> {
        let intent = parser::parse(sql)?;
        Ok(Self { intent })
    }

    pub fn execute(&self, db: &Database) -> Result<QueryOutput> {
        self.execute_with_params(db, &HashMap::new())
    }

    pub fn execute_with_params(&self, db: &Database, params: &HashMap<String, Literal>) -> Result<QueryOutput> {
        let schema = db.schema();
        let views = db.views();
        let plan = db.plan_cache().get_or_compile(&self.intent, &schema, &views)?;
        drop(views);
        drop(schema);
        exec::execute(&plan, db.read_source(), params)
    }

    pub fn execute_as<T: Row>(&self, db: &Database) -> Result<Vec<T>> {
        match self.execute(db)? {
            QueryOutput::Rows { columns, rows } => rows_as(&columns, &rows),
            QueryOutput::Explain(_) => Err(Error::InvalidOperation("EXPLAIN output cannot be hydrated into a row type".into())),
        }
    }

    /// Runs this prepared statement against a transaction's shadow instead
    /// of the database's committed snapshot, so an uncommitted write made
    /// earlier in the same transaction is visible to the query.
    pub fn execute_in_transaction(
        &self,
        txn: &crate::transaction::Transaction<'_>,
        params: &HashMap<String, Literal>,
    ) -> Result<QueryOutput> {
        txn.query_with_params_from_intent(&self.intent, params)
    }
}

/// Materializes a result set's rows into a pooled buffer and runs `with`
/// over them, returning the buffer to the thread-local pool afterwards.
/// Amortizes the `Vec<Row>` allocation `QueryOutput::Rows` would otherwise
/// make fresh on every call to a repeatedly-executed `PreparedQuery`.
pub fn with_pooled_rows<R>(output: QueryOutput, with: impl FnOnce(&[String], &[crate::reader::Row]) -> R) -> R {
    match output {
        QueryOutput::Rows { columns, rows } => {
            let mut buffer = acquire_row_buffer();
            buffer.extend(rows);
            let result = with(&columns, &buffer);
            release_row_buffer(buffer);
            result
        }
        QueryOutput::Explain(text) => with(&[], &[crate::reader::Row(vec![crate::value::OwnedValue::Text(text)])]),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn prepared_query_executes_repeatedly_against_a_changing_table() {
        let db = Database::create_in_memory(4096).unwrap();
        let mut txn = db.begin_transaction().unwrap();
        txn.execute_ddl("CREATE TABLE t (id INTEGER PRIMARY KEY, v TEXT)").unwrap();
        txn.insert("t", 1, &[crate::record::ColumnValue::Null, crate::record::ColumnValue::Text(b"a")])
            .unwrap();
        txn.commit().unwrap();

        let prepared = PreparedQuery::new("SELECT v FROM t").unwrap();
        match prepared.execute(&db).unwrap() {
            QueryOutput::Rows { rows, .. } => assert_eq!(rows.len(), 1),
            QueryOutput::Explain(_) => panic!("expected rows"),
        }

        let mut txn = db.begin_transaction().unwrap();
        txn.insert("t", 2, &[crate::record::ColumnValue::Null, crate::record::ColumnValue::Text(b"b")])
            .unwrap();
        txn.commit().unwrap();

        match prepared.execute(&db).unwrap() {
            QueryOutput::Rows { rows, .. } => assert_eq!(rows.len(), 2),
            QueryOutput::Explain(_) => panic!("expected rows"),
        }
    }

    #[test]
    fn explain_is_not_hydratable_into_a_row_type() {
        struct AnyRow;
        impl Row for AnyRow {
            const TABLE_NAME: &'static str = "t";
            const COLUMN_NAMES: &'static [&'static str] = &[];
            fn from_row(_rowid: i64, _columns: &[crate::record::ColumnValue<'_>]) -> Result<Self> {
                Ok(AnyRow)
            }
        }

        let db = Database::create_in_memory(4096).unwrap();
        let mut txn = db.begin_transaction().unwrap();
        txn.execute_ddl("CREATE TABLE t (id INTEGER PRIMARY KEY, v TEXT)").unwrap();
        txn.commit().unwrap();

        let prepared = PreparedQuery::new("EXPLAIN SELECT v FROM t").unwrap();
        assert!(prepared.execute_as::<AnyRow>(&db).is_err());
    }
}
