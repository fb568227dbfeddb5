//! Compiled filter predicates evaluated directly against record payload
//! bytes, without building an intermediate `ColumnValue` for columns the
//! predicate doesn't touch.
//!
//! A [`FilterNode`] tree (built by the query planner from parsed `WHERE`
//! clauses) is [`compile`]d once per plan into a [`CompiledFilter`] that
//! resolves column names to record ordinals up front, then
//! [`CompiledFilter::evaluate`] is called once per candidate row on the
//! scan hot path.

use crate::error::{Error, Result};
use crate::record::{self, ColumnValue};
use crate::serial_type::SerialType;

/// An uncompiled filter expression tree, as produced by the query parser.
#[derive(Debug, Clone)]
pub enum FilterNode {
    Compare {
        column: String,
        op: CompareOp,
        literal: Literal,
    },
    Between {
        column: String,
        low: Literal,
        high: Literal,
    },
    IsNull(String),
    IsNotNull(String),
    StartsWith { column: String, prefix: String },
    EndsWith { column: String, suffix: String },
    Contains { column: String, needle: String },
    In { column: String, values: Vec<Literal> },
    NotIn { column: String, values: Vec<Literal> },
    And(Box<FilterNode>, Box<FilterNode>),
    Or(Box<FilterNode>, Box<FilterNode>),
    Not(Box<FilterNode>),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CompareOp {
    Eq,
    Ne,
    Lt,
    Le,
    Gt,
    Ge,
}

#[derive(Debug, Clone, PartialEq)]
pub enum Literal {
    Integer(i64),
    Real(f64),
    Text(String),
    Null,
}

/// A filter tree with every column reference resolved to a record ordinal
/// (or to the rowid, for rowid-alias columns, which never appear in the
/// stored payload).
#[derive(Debug, Clone)]
pub enum CompiledFilter {
    Compare {
        slot: Slot,
        op: CompareOp,
        literal: Literal,
    },
    Between { slot: Slot, low: Literal, high: Literal },
    IsNull(Slot),
    IsNotNull(Slot),
    StartsWith { slot: Slot, prefix: String },
    EndsWith { slot: Slot, suffix: String },
    Contains { slot: Slot, needle: String },
    In { slot: Slot, values: Vec<Literal> },
    NotIn { slot: Slot, values: Vec<Literal> },
    And(Box<CompiledFilter>, Box<CompiledFilter>),
    Or(Box<CompiledFilter>, Box<CompiledFilter>),
    Not(Box<CompiledFilter>),
}

/// Where a compiled predicate reads its operand from.
#[derive(Debug, Clone, Copy)]
pub enum Slot {
    /// An ordinal into the record's column list.
    Ordinal(usize),
    /// The cursor's current rowid, bypassing the record payload entirely
    /// (used for `INTEGER PRIMARY KEY` rowid-alias columns).
    Rowid,
}

/// Resolves every column name in `tree` against `columns` (in declaration
/// order), treating a name equal to `rowid_alias` (if any) as [`Slot::Rowid`].
pub fn compile(tree: &FilterNode, columns: &[String], rowid_alias: Option<&str>) -> Result<CompiledFilter> {
    let resolve = |name: &str| -> Result<Slot> {
        if Some(name) == rowid_alias {
            return Ok(Slot::Rowid);
        }
        columns
            .iter()
            .position(|c| c == name)
            .map(Slot::Ordinal)
            .ok_or_else(|| Error::SchemaMismatch(format!("unknown column `{name}` in filter")))
    };

    Ok(match tree {
        FilterNode::Compare { column, op, literal } => CompiledFilter::Compare {
            slot: resolve(column)?,
            op: *op,
            literal: literal.clone(),
        },
        FilterNode::Between { column, low, high } => CompiledFilter::Between {
            slot: resolve(column)?,
            low: low.clone(),
            high: high.clone(),
        },
        FilterNode::IsNull(c) => CompiledFilter::IsNull(resolve(c)?),
        FilterNode::IsNotNull(c) => CompiledFilter::IsNotNull(resolve(c)?),
        FilterNode::StartsWith { column, prefix } => CompiledFilter::StartsWith {
            slot: resolve(column)?,
            prefix: prefix.clone(),
        },
        FilterNode::EndsWith { column, suffix } => CompiledFilter::EndsWith {
            slot: resolve(column)?,
            suffix: suffix.clone(),
        },
        FilterNode::Contains { column, needle } => CompiledFilter::Contains {
            slot: resolve(column)?,
            needle: needle.clone(),
        },
        FilterNode::In { column, values } => CompiledFilter::In {
            slot: resolve(column)?,
            values: values.clone(),
        },
        FilterNode::NotIn { column, values } => CompiledFilter::NotIn {
            slot: resolve(column)?,
            values: values.clone(),
        },
        FilterNode::And(l, r) => CompiledFilter::And(
            Box::new(compile(l, columns, rowid_alias)?),
            Box::new(compile(r, columns, rowid_alias)?),
        ),
        FilterNode::Or(l, r) => CompiledFilter::Or(
            Box::new(compile(l, columns, rowid_alias)?),
            Box::new(compile(r, columns, rowid_alias)?),
        ),
        FilterNode::Not(inner) => CompiledFilter::Not(Box::new(compile(inner, columns, rowid_alias)?)),
    })
}

impl CompiledFilter {
    /// Evaluates the predicate against one row. `types`/`body_offset` are
    /// the outputs of [`record::read_serial_types`] for `payload`; `rowid`
    /// is the cursor's current rowid. NULL comparisons are false throughout
    /// (three-valued logic collapsed to boolean, matching SQL semantics for
    /// a plain `WHERE` clause), except `IS NULL`/`IS NOT NULL`.
    pub fn evaluate(
        &self,
        payload: &[u8],
        types: &[SerialType],
        body_offset: usize,
        rowid: i64,
    ) -> Result<bool> {
        Ok(match self {
            CompiledFilter::Compare { slot, op, literal } => {
                let value = self.read(*slot, payload, types, body_offset, rowid)?;
                match compare(&value, literal) {
                    Some(ordering) => matches_op(*op, ordering),
                    None => false,
                }
            }
            CompiledFilter::Between { slot, low, high } => {
                let value = self.read(*slot, payload, types, body_offset, rowid)?;
                match (compare(&value, low), compare(&value, high)) {
                    (Some(lo), Some(hi)) => {
                        lo != std::cmp::Ordering::Less && hi != std::cmp::Ordering::Greater
                    }
                    _ => false,
                }
            }
            CompiledFilter::IsNull(slot) => {
                self.read(*slot, payload, types, body_offset, rowid)?.is_null()
            }
            CompiledFilter::IsNotNull(slot) => {
                !self.read(*slot, payload, types, body_offset, rowid)?.is_null()
            }
            CompiledFilter::StartsWith { slot, prefix } => {
                let value = self.read(*slot, payload, types, body_offset, rowid)?;
                value.as_str().map(|s| s.starts_with(prefix.as_str())).unwrap_or(false)
            }
            CompiledFilter::EndsWith { slot, suffix } => {
                let value = self.read(*slot, payload, types, body_offset, rowid)?;
                value.as_str().map(|s| s.ends_with(suffix.as_str())).unwrap_or(false)
            }
            CompiledFilter::Contains { slot, needle } => {
                let value = self.read(*slot, payload, types, body_offset, rowid)?;
                value.as_str().map(|s| s.contains(needle.as_str())).unwrap_or(false)
            }
            CompiledFilter::In { slot, values } => {
                let value = self.read(*slot, payload, types, body_offset, rowid)?;
                values.iter().any(|lit| compare(&value, lit) == Some(std::cmp::Ordering::Equal))
            }
            CompiledFilter::NotIn { slot, values } => {
                let value = self.read(*slot, payload, types, body_offset, rowid)?;
                !values.iter().any(|lit| compare(&value, lit) == Some(std::cmp::Ordering::Equal))
            }
            CompiledFilter::And(l, r) => {
                l.evaluate(payload, types, body_offset, rowid)?
                    && r.evaluate(payload, types, body_offset, rowid)?
            }
            CompiledFilter::Or(l, r) => {
                l.evaluate(payload, types, body_offset, rowid)?
                    || r.evaluate(payload, types, body_offset, rowid)?
            }
            CompiledFilter::Not(inner) => !inner.evaluate(payload, types, body_offset, rowid)?,
        })
    }

    fn read<'a>(
        &self,
        slot: Slot,
        payload: &'a [u8],
        types: &[SerialType],
        body_offset: usize,
        rowid: i64,
    ) -> Result<ColumnValue<'a>> {
        match slot {
            Slot::Rowid => Ok(ColumnValue::Integer(rowid)),
            Slot::Ordinal(ordinal) => record::decode_column(payload, ordinal, types, body_offset),
        }
    }
}

fn matches_op(op: CompareOp, ordering: std::cmp::Ordering) -> bool {
    use std::cmp::Ordering::*;
    match op {
        CompareOp::Eq => ordering == Equal,
        CompareOp::Ne => ordering != Equal,
        CompareOp::Lt => ordering == Less,
        CompareOp::Le => ordering != Greater,
        CompareOp::Gt => ordering == Greater,
        CompareOp::Ge => ordering != Less,
    }
}

/// SQLite's storage-class ordering: NULL < numeric < text < blob, with
/// integers and reals compared numerically across the two numeric serial
/// types. Returns `None` whenever either side is NULL (a NULL comparison
/// is never true, `IS [NOT] NULL` aside).
pub(crate) fn compare(value: &ColumnValue<'_>, literal: &Literal) -> Option<std::cmp::Ordering> {
    use std::cmp::Ordering;
    match (value, literal) {
        (ColumnValue::Null, _) | (_, Literal::Null) => None,
        (ColumnValue::Integer(a), Literal::Integer(b)) => Some(a.cmp(b)),
        (ColumnValue::Integer(a), Literal::Real(b)) => (*a as f64).partial_cmp(b),
        (ColumnValue::Real(a), Literal::Integer(b)) => a.partial_cmp(&(*b as f64)),
        (ColumnValue::Real(a), Literal::Real(b)) => a.partial_cmp(b),
        (ColumnValue::Text(a), Literal::Text(b)) => std::str::from_utf8(a).ok().map(|s| s.cmp(b.as_str())),
        (ColumnValue::Integer(_) | ColumnValue::Real(_), Literal::Text(_)) => Some(Ordering::Less),
        (ColumnValue::Text(_), Literal::Integer(_) | Literal::Real(_)) => Some(Ordering::Greater),
        (ColumnValue::Blob(a), Literal::Text(b)) => Some(a.as_ref().cmp(b.as_bytes())),
        _ => None,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::record::encode_record;

    fn row(values: &[ColumnValue<'_>]) -> (Vec<u8>, Vec<SerialType>, usize) {
        let mut buf = Vec::new();
        encode_record(values, &mut buf);
        let mut types = vec![SerialType::Null; values.len()];
        let (_, body_offset) = record::read_serial_types(&buf, &mut types).unwrap();
        (buf, types, body_offset)
    }

    fn columns() -> Vec<String> {
        vec!["id".into(), "name".into(), "score".into()]
    }

    #[test]
    fn equality_and_short_circuit_and() {
        let tree = FilterNode::And(
            Box::new(FilterNode::Compare {
                column: "name".into(),
                op: CompareOp::Eq,
                literal: Literal::Text("alice".into()),
            }),
            Box::new(FilterNode::Compare {
                column: "score".into(),
                op: CompareOp::Gt,
                literal: Literal::Integer(10),
            }),
        );
        let compiled = compile(&tree, &columns(), None).unwrap();

        let (buf, types, body_offset) = row(&[
            ColumnValue::Integer(1),
            ColumnValue::Text(b"alice"),
            ColumnValue::Integer(20),
        ]);
        assert!(compiled.evaluate(&buf, &types, body_offset, 1).unwrap());

        let (buf, types, body_offset) = row(&[
            ColumnValue::Integer(1),
            ColumnValue::Text(b"bob"),
            ColumnValue::Integer(20),
        ]);
        assert!(!compiled.evaluate(&buf, &types, body_offset, 1).unwrap());
    }

    #[test]
    fn null_comparisons_are_false() {
        let tree = FilterNode::Compare {
            column: "name".into(),
            op: CompareOp::Eq,
            literal: Literal::Text("alice".into()),
        };
        let compiled = compile(&tree, &columns(), None).unwrap();
        let (buf, types, body_offset) = row(&[
            ColumnValue::Integer(1),
            ColumnValue::Null,
            ColumnValue::Integer(20),
        ]);
        assert!(!compiled.evaluate(&buf, &types, body_offset, 1).unwrap());
    }

    #[test]
    fn is_null_sees_through_the_false_default() {
        let tree = FilterNode::IsNull("name".into());
        let compiled = compile(&tree, &columns(), None).unwrap();
        let (buf, types, body_offset) = row(&[
            ColumnValue::Integer(1),
            ColumnValue::Null,
            ColumnValue::Integer(20),
        ]);
        assert!(compiled.evaluate(&buf, &types, body_offset, 1).unwrap());
    }

    #[test]
    fn rowid_alias_reads_the_cursor_rowid_not_the_payload() {
        let tree = FilterNode::Compare {
            column: "id".into(),
            op: CompareOp::Eq,
            literal: Literal::Integer(42),
        };
        let compiled = compile(&tree, &columns(), Some("id")).unwrap();
        let (buf, types, body_offset) = row(&[
            ColumnValue::Null,
            ColumnValue::Text(b"alice"),
            ColumnValue::Integer(20),
        ]);
        assert!(compiled.evaluate(&buf, &types, body_offset, 42).unwrap());
        assert!(!compiled.evaluate(&buf, &types, body_offset, 7).unwrap());
    }

    #[test]
    fn between_is_inclusive() {
        let tree = FilterNode::Between {
            column: "score".into(),
            low: Literal::Integer(10),
            high: Literal::Integer(20),
        };
        let compiled = compile(&tree, &columns(), None).unwrap();
        for (score, expected) in [(9, false), (10, true), (15, true), (20, true), (21, false)] {
            let (buf, types, body_offset) =
                row(&[ColumnValue::Integer(1), ColumnValue::Text(b"x"), ColumnValue::Integer(score)]);
            assert_eq!(compiled.evaluate(&buf, &types, body_offset, 1).unwrap(), expected);
        }
    }
}
