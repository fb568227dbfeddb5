//! Parsing and in-memory representation of the schema b-tree.
//!
//! The schema b-tree lives at root page 1, right after the 100-byte
//! database header; each row is a five-column record `(type, name,
//! tbl_name, rootpage, sql)`. `Schema::load` walks it with a plain
//! `TableCursor` and parses every `CREATE TABLE`/`CREATE INDEX`/
//! `CREATE VIEW` statement with the small recursive-descent grammar in
//! this module (the query dialect's own `pest` grammar is reserved for
//! `SELECT`/DML text, see `query/grammar.pest`).

use std::collections::HashMap;

use crate::btree::cursor::TableCursor;
use crate::error::{Error, Result};
use crate::record::{self, ColumnValue};
use crate::serial_type::SerialType;
use crate::source::PageSource;

pub const SCHEMA_ROOT_PAGE: u32 = 1;

#[derive(Debug, Clone)]
pub struct ColumnDef {
    pub name: String,
    pub declared_type: String,
    pub ordinal: usize,
    pub is_primary_key: bool,
    pub is_not_null: bool,
}

#[derive(Debug, Clone)]
pub struct TableDef {
    pub name: String,
    pub root_page: u32,
    pub sql: String,
    pub columns: Vec<ColumnDef>,
    pub without_rowid: bool,
    /// The column name serving as the rowid alias, if the table has an
    /// `INTEGER PRIMARY KEY` column (rowid-backed tables only).
    pub rowid_alias: Option<String>,
}

#[derive(Debug, Clone)]
pub struct IndexDef {
    pub name: String,
    pub table_name: String,
    pub root_page: u32,
    pub sql: String,
}

#[derive(Debug, Clone)]
pub struct ViewDef {
    pub name: String,
    pub sql: String,
}

#[derive(Debug, Clone, Default)]
pub struct Schema {
    pub tables: HashMap<String, TableDef>,
    pub indexes: HashMap<String, IndexDef>,
    pub views: HashMap<String, ViewDef>,
}

impl Schema {
    /// Reads every row of the schema b-tree and parses it into the
    /// in-memory structure readers and the planner consult.
    pub fn load(source: &dyn PageSource) -> Result<Self> {
        let mut schema = Schema::default();
        let mut cursor = TableCursor::new(source, SCHEMA_ROOT_PAGE)?;

        while let Some((_rowid, payload)) = cursor.next_row()? {
            let bytes = payload.as_slice();
            let mut types = [SerialType::Null; 5];
            let (count, body_offset) = record::read_serial_types(bytes, &mut types)?;
            if count != 5 {
                return Err(Error::corrupt(SCHEMA_ROOT_PAGE, "schema row does not have 5 columns"));
            }

            let kind = text_column(bytes, 0, &types, body_offset)?;
            let name = text_column(bytes, 1, &types, body_offset)?;
            let tbl_name = text_column(bytes, 2, &types, body_offset)?;
            let root_page = record::decode_column(bytes, 3, &types, body_offset)?
                .as_i64()
                .unwrap_or(0) as u32;
            let sql = text_column(bytes, 4, &types, body_offset)?;

            match kind.as_str() {
                "table" => {
                    let table = parse_create_table(&sql, &name, root_page)?;
                    schema.tables.insert(name, table);
                }
                "index" => {
                    schema.indexes.insert(
                        name.clone(),
                        IndexDef {
                            name,
                            table_name: tbl_name,
                            root_page,
                            sql,
                        },
                    );
                }
                "view" => {
                    schema.views.insert(name.clone(), ViewDef { name, sql });
                }
                _ => {}
            }
        }

        Ok(schema)
    }
}

fn text_column(bytes: &[u8], ordinal: usize, types: &[SerialType], body_offset: usize) -> Result<String> {
    match record::decode_column(bytes, ordinal, types, body_offset)? {
        ColumnValue::Text(t) => Ok(String::from_utf8_lossy(t).into_owned()),
        ColumnValue::Null => Ok(String::new()),
        _ => Err(Error::corrupt(SCHEMA_ROOT_PAGE, "expected a text column in schema row")),
    }
}

/// Public entry point for the DDL layer: parses a `CREATE TABLE` string
/// into a [`TableDef`] for a table whose root page is already known
/// (newly allocated, or carried over from an `ALTER TABLE`).
pub fn parse_table_for_ddl(sql: &str, table_name: &str, root_page: u32) -> Result<TableDef> {
    parse_create_table(sql, table_name, root_page)
}

/// A small recursive-descent parser for `CREATE TABLE` column lists,
/// covering declared type, `PRIMARY KEY`, `NOT NULL`, and a trailing
/// `WITHOUT ROWID` table modifier. Not a general SQL parser -- the query
/// dialect's own grammar (see `query/grammar.pest`) handles `SELECT`.
fn parse_create_table(sql: &str, table_name: &str, root_page: u32) -> Result<TableDef> {
    let open = sql
        .find('(')
        .ok_or_else(|| Error::ParseError(format!("CREATE TABLE `{table_name}` missing column list")))?;
    let close = sql
        .rfind(')')
        .ok_or_else(|| Error::ParseError(format!("CREATE TABLE `{table_name}` missing closing paren")))?;
    if close <= open {
        return Err(Error::ParseError(format!("CREATE TABLE `{table_name}` has an empty column list")));
    }

    let body = &sql[open + 1..close];
    let without_rowid = sql[close + 1..].to_ascii_uppercase().contains("WITHOUT ROWID");

    let mut columns = Vec::new();
    let mut rowid_alias = None;

    for (ordinal, raw_def) in split_top_level(body).into_iter().enumerate() {
        let def = raw_def.trim();
        if def.is_empty() {
            continue;
        }
        let upper = def.to_ascii_uppercase();
        if upper.starts_with("PRIMARY KEY")
            || upper.starts_with("UNIQUE")
            || upper.starts_with("FOREIGN KEY")
            || upper.starts_with("CHECK")
        {
            // Table-level constraint, not a column definition.
            continue;
        }

        let mut tokens = def.split_whitespace();
        let name = tokens
            .next()
            .ok_or_else(|| Error::ParseError(format!("empty column definition in `{table_name}`")))?
            .trim_matches(['"', '`', '[', ']'])
            .to_string();
        let declared_type = tokens.next().unwrap_or("").to_string();

        let is_primary_key = upper.contains("PRIMARY KEY");
        let is_not_null = upper.contains("NOT NULL");

        if is_primary_key && declared_type.to_ascii_uppercase() == "INTEGER" && !without_rowid {
            rowid_alias = Some(name.clone());
        }

        columns.push(ColumnDef {
            name,
            declared_type,
            ordinal,
            is_primary_key,
            is_not_null,
        });
    }

    Ok(TableDef {
        name: table_name.to_string(),
        root_page,
        sql: sql.to_string(),
        columns,
        without_rowid,
        rowid_alias,
    })
}

/// Extracts the indexed column list out of a stored `CREATE INDEX name ON
/// table (col, ...)` string -- `IndexDef` only keeps the raw SQL, so the
/// planner calls this once per candidate index during sargable selection
/// rather than every row of every scan.
pub fn parse_index_columns(sql: &str) -> Result<Vec<String>> {
    let open = sql
        .find('(')
        .ok_or_else(|| Error::ParseError("CREATE INDEX missing column list".into()))?;
    let close = sql
        .rfind(')')
        .ok_or_else(|| Error::ParseError("CREATE INDEX missing closing paren".into()))?;
    if close <= open {
        return Err(Error::ParseError("CREATE INDEX has an empty column list".into()));
    }
    Ok(split_top_level(&sql[open + 1..close])
        .into_iter()
        .map(|c| c.trim().trim_matches(['"', '`', '[', ']']).to_string())
        .filter(|c| !c.is_empty())
        .collect())
}

/// Splits a column-definition list on top-level commas, respecting
/// parenthesis nesting (e.g. `NUMERIC(10, 2)`).
fn split_top_level(body: &str) -> Vec<String> {
    let mut parts = Vec::new();
    let mut depth = 0i32;
    let mut current = String::new();
    for ch in body.chars() {
        match ch {
            '(' => {
                depth += 1;
                current.push(ch);
            }
            ')' => {
                depth -= 1;
                current.push(ch);
            }
            ',' if depth == 0 => {
                parts.push(std::mem::take(&mut current));
            }
            _ => current.push(ch),
        }
    }
    if !current.trim().is_empty() {
        parts.push(current);
    }
    parts
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_columns_with_rowid_alias() {
        let table = parse_create_table(
            "CREATE TABLE t (id INTEGER PRIMARY KEY, name TEXT NOT NULL)",
            "t",
            2,
        )
        .unwrap();
        assert_eq!(table.columns.len(), 2);
        assert_eq!(table.rowid_alias.as_deref(), Some("id"));
        assert!(table.columns[1].is_not_null);
        assert!(!table.without_rowid);
    }

    #[test]
    fn without_rowid_suppresses_the_rowid_alias() {
        let table = parse_create_table(
            "CREATE TABLE t (id INTEGER PRIMARY KEY, name TEXT) WITHOUT ROWID",
            "t",
            2,
        )
        .unwrap();
        assert!(table.without_rowid);
        assert_eq!(table.rowid_alias, None);
    }

    #[test]
    fn nested_parens_in_declared_type_do_not_split_columns() {
        let table = parse_create_table("CREATE TABLE t (price NUMERIC(10, 2), name TEXT)", "t", 2).unwrap();
        assert_eq!(table.columns.len(), 2);
        assert_eq!(table.columns[0].name, "price");
    }

    #[test]
    fn parses_indexed_columns_out_of_create_index_sql() {
        let columns = parse_index_columns("CREATE INDEX idx_score ON players (team, score)").unwrap();
        assert_eq!(columns, vec!["team".to_string(), "score".to_string()]);
    }

    #[test]
    fn table_level_primary_key_constraint_is_skipped_as_a_column() {
        let table = parse_create_table(
            "CREATE TABLE t (a INTEGER, b INTEGER, PRIMARY KEY (a, b)) WITHOUT ROWID",
            "t",
            2,
        )
        .unwrap();
        assert_eq!(table.columns.len(), 2);
    }
}
