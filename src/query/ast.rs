//! The query layer's expression tree.
//!
//! `filter::FilterNode` is the zero-alloc execution core and must stay
//! free of anything but concrete literals; `Expr` sits one layer above it
//! and adds `$name` bind parameters and a `LIKE` surface the planner
//! lowers into `filter`'s `StartsWith`/`EndsWith`/`Contains` triad. Every
//! `Expr` eventually becomes a `FilterNode` via [`bind`], after which the
//! parameter layer is gone and the scan hot path never sees it again.

use std::collections::HashMap;

use crate::error::{Error, Result};
use crate::filter::{CompareOp, FilterNode, Literal};
use crate::query::intent::{AggArg, AggFunc};

#[derive(Debug, Clone)]
pub enum Expr {
    Column(String),
    Param(String),
    Literal(Literal),
    /// An aggregate function reference appearing in a `HAVING` clause,
    /// e.g. `COUNT(*)` in `HAVING COUNT(*) > 2`. Never valid inside a
    /// `WHERE` clause -- `bind` rejects it, since a plain row-level
    /// filter has no group to aggregate over.
    Agg(AggFunc, AggArg),
    Compare(Box<Expr>, CompareOp, Box<Expr>),
    Between(Box<Expr>, Box<Expr>, Box<Expr>),
    IsNull(Box<Expr>),
    IsNotNull(Box<Expr>),
    Like(Box<Expr>, String),
    In(Box<Expr>, Vec<Expr>),
    NotIn(Box<Expr>, Vec<Expr>),
    And(Box<Expr>, Box<Expr>),
    Or(Box<Expr>, Box<Expr>),
    Not(Box<Expr>),
}

/// Resolves every `Param` against `params` and lowers the tree into a
/// `FilterNode`. Column/literal shape is otherwise preserved one-to-one;
/// `LIKE` is the only node that changes shape, since `filter::FilterNode`
/// has no general pattern-match variant.
pub fn bind(expr: &Expr, params: &HashMap<String, Literal>) -> Result<FilterNode> {
    Ok(match expr {
        Expr::Column(_) | Expr::Param(_) | Expr::Literal(_) => {
            return Err(Error::ParseError("a bare value is not a boolean predicate".into()))
        }
        Expr::Agg(..) => {
            return Err(Error::UnsupportedFeature(
                "aggregate expressions are only valid in HAVING, not WHERE".into(),
            ))
        }
        Expr::Compare(lhs, op, rhs) => {
            let (column, literal) = column_and_literal(lhs, rhs, params)?;
            FilterNode::Compare {
                column,
                op: *op,
                literal,
            }
        }
        Expr::Between(value, low, high) => FilterNode::Between {
            column: column_name(value)?,
            low: resolve_scalar(low, params)?,
            high: resolve_scalar(high, params)?,
        },
        Expr::IsNull(value) => FilterNode::IsNull(column_name(value)?),
        Expr::IsNotNull(value) => FilterNode::IsNotNull(column_name(value)?),
        Expr::Like(value, pattern) => lower_like(column_name(value)?, pattern)?,
        Expr::In(value, list) => FilterNode::In {
            column: column_name(value)?,
            values: list.iter().map(|e| resolve_scalar(e, params)).collect::<Result<_>>()?,
        },
        Expr::NotIn(value, list) => FilterNode::NotIn {
            column: column_name(value)?,
            values: list.iter().map(|e| resolve_scalar(e, params)).collect::<Result<_>>()?,
        },
        Expr::And(l, r) => FilterNode::And(Box::new(bind(l, params)?), Box::new(bind(r, params)?)),
        Expr::Or(l, r) => FilterNode::Or(Box::new(bind(l, params)?), Box::new(bind(r, params)?)),
        Expr::Not(inner) => FilterNode::Not(Box::new(bind(inner, params)?)),
    })
}

fn column_name(expr: &Expr) -> Result<String> {
    match expr {
        Expr::Column(name) => Ok(name.clone()),
        _ => Err(Error::ParseError("expected a column reference".into())),
    }
}

fn resolve_scalar(expr: &Expr, params: &HashMap<String, Literal>) -> Result<Literal> {
    match expr {
        Expr::Literal(lit) => Ok(lit.clone()),
        Expr::Param(name) => params
            .get(name)
            .cloned()
            .ok_or_else(|| Error::ParseError(format!("unbound parameter `${name}`"))),
        _ => Err(Error::ParseError("expected a literal or a bind parameter".into())),
    }
}

/// A `Compare` node's two sides may appear in either order (`col = $x` or
/// `$x = col`); exactly one side must be a column and the other a scalar.
fn column_and_literal(lhs: &Expr, rhs: &Expr, params: &HashMap<String, Literal>) -> Result<(String, Literal)> {
    match (lhs, rhs) {
        (Expr::Column(name), other) => Ok((name.clone(), resolve_scalar(other, params)?)),
        (other, Expr::Column(name)) => Ok((name.clone(), resolve_scalar(other, params)?)),
        _ => Err(Error::ParseError("a comparison needs exactly one column operand".into())),
    }
}

/// Lowers a `LIKE` pattern into the one of three shapes `filter` supports:
/// a single leading or trailing `%` or one wrapping the whole pattern. A
/// `%` in the middle, or more than one elsewhere, has no zero-alloc
/// equivalent and is rejected rather than silently mis-evaluated.
fn lower_like(column: String, pattern: &str) -> Result<FilterNode> {
    let starts = pattern.starts_with('%');
    let ends = pattern.ends_with('%');
    let inner = &pattern[starts as usize..pattern.len() - ends as usize];
    if inner.contains('%') {
        return Err(Error::UnsupportedFeature(format!(
            "LIKE pattern `{pattern}` has a wildcard this engine can't evaluate without full decoding"
        )));
    }
    Ok(match (starts, ends) {
        (false, false) => FilterNode::Compare {
            column,
            op: CompareOp::Eq,
            literal: Literal::Text(pattern.to_string()),
        },
        (false, true) => FilterNode::StartsWith {
            column,
            prefix: inner.to_string(),
        },
        (true, false) => FilterNode::EndsWith {
            column,
            suffix: inner.to_string(),
        },
        (true, true) => FilterNode::Contains {
            column,
            needle: inner.to_string(),
        },
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn binds_a_named_parameter_into_a_literal() {
        let expr = Expr::Compare(
            Box::new(Expr::Column("name".into())),
            CompareOp::Eq,
            Box::new(Expr::Param("who".into())),
        );
        let mut params = HashMap::new();
        params.insert("who".to_string(), Literal::Text("alice".into()));
        let filter = bind(&expr, &params).unwrap();
        assert!(matches!(filter, FilterNode::Compare { .. }));
    }

    #[test]
    fn unbound_parameter_is_an_error() {
        let expr = Expr::Compare(
            Box::new(Expr::Column("name".into())),
            CompareOp::Eq,
            Box::new(Expr::Param("who".into())),
        );
        assert!(bind(&expr, &HashMap::new()).is_err());
    }

    #[test]
    fn like_with_trailing_percent_becomes_starts_with() {
        let expr = Expr::Like(Box::new(Expr::Column("name".into())), "al%".into());
        let filter = bind(&expr, &HashMap::new()).unwrap();
        assert!(matches!(filter, FilterNode::StartsWith { .. }));
    }

    #[test]
    fn like_with_middle_wildcard_is_rejected() {
        let expr = Expr::Like(Box::new(Expr::Column("name".into())), "a%b%c".into());
        assert!(bind(&expr, &HashMap::new()).is_err());
    }
}
