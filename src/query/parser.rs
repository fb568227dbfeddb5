//! Parses the SELECT dialect (`query/grammar.pest`) into an [`Intent`].
//!
//! Grounded in the tree-walking shape of a `pest`-based SQL front end:
//! each grammar rule is matched and its `.into_inner()` pairs walked by
//! hand rather than built up through a generic visitor, the same style a
//! small embedded dialect's parser takes when the grammar is this close
//! to the AST it produces.

use pest::iterators::Pair;
use pest::Parser;
use pest_derive::Parser as PestParser;

use crate::error::{Error, Result};
use crate::filter::{CompareOp, Literal};
use crate::query::ast::Expr;
use crate::query::intent::{
    AggArg, AggFunc, CompoundOp, FromSpec, Intent, NamedSubquery, OrderKey, ProjectionItem, QueryHint, SelectCore,
    TableRef,
};

#[derive(PestParser)]
#[grammar = "query/grammar.pest"]
struct SqlParser;

pub fn parse(sql: &str) -> Result<Intent> {
    let mut pairs = SqlParser::parse(Rule::statement, sql).map_err(|e| Error::ParseError(e.to_string()))?;
    let statement = pairs.next().ok_or_else(|| Error::ParseError("empty statement".into()))?;

    let mut explain = false;
    let mut hint = None;
    let mut ctes = Vec::new();
    let mut cores = Vec::new();
    let mut compound_ops = Vec::new();
    let mut order_by = Vec::new();
    let mut limit = None;
    let mut offset = None;

    for pair in statement.into_inner() {
        match pair.as_rule() {
            Rule::explain_kw => explain = true,
            Rule::hint => {
                hint = Some(if pair.as_str().eq_ignore_ascii_case("cached") {
                    QueryHint::Cached
                } else {
                    QueryHint::Jit
                })
            }
            Rule::with_clause => ctes = parse_with_clause(pair)?,
            Rule::compound_select => {
                let (parsed_cores, parsed_ops, parsed_order, parsed_limit, parsed_offset) =
                    parse_compound_select(pair)?;
                cores = parsed_cores;
                compound_ops = parsed_ops;
                order_by = parsed_order;
                limit = parsed_limit;
                offset = parsed_offset;
            }
            Rule::EOI => {}
            _ => {}
        }
    }

    Ok(Intent {
        explain,
        hint,
        ctes,
        cores,
        compound_ops,
        order_by,
        limit,
        offset,
    })
}

fn parse_with_clause(pair: Pair<Rule>) -> Result<Vec<NamedSubquery>> {
    let mut ctes = Vec::new();
    for cte in pair.into_inner() {
        let mut inner = cte.into_inner();
        let name = inner
            .next()
            .ok_or_else(|| Error::ParseError("CTE missing a name".into()))?
            .as_str()
            .to_string();
        let body = inner
            .next()
            .ok_or_else(|| Error::ParseError("CTE missing a body".into()))?;
        let (cores, compound_ops, order_by, limit, offset) = parse_compound_select(body)?;
        ctes.push(NamedSubquery {
            name,
            intent: Box::new(Intent {
                explain: false,
                hint: None,
                ctes: Vec::new(),
                cores,
                compound_ops,
                order_by,
                limit,
                offset,
            }),
        });
    }
    Ok(ctes)
}

type CompoundParts = (Vec<SelectCore>, Vec<CompoundOp>, Vec<OrderKey>, Option<i64>, Option<i64>);

/// `ORDER BY`/`LIMIT`/`OFFSET` only ever appear after the final
/// `select_core` in this dialect (mirroring SQLite's own compound-select
/// grammar), so whichever core's clauses are present become the
/// statement-level ones.
fn parse_compound_select(pair: Pair<Rule>) -> Result<CompoundParts> {
    let mut cores = Vec::new();
    let mut ops = Vec::new();
    let mut order_by = Vec::new();
    let mut limit = None;
    let mut offset = None;

    for part in pair.into_inner() {
        match part.as_rule() {
            Rule::select_core => {
                let (core, core_order, core_limit, core_offset) = parse_select_core(part)?;
                cores.push(core);
                if !core_order.is_empty() {
                    order_by = core_order;
                }
                if core_limit.is_some() {
                    limit = core_limit;
                }
                if core_offset.is_some() {
                    offset = core_offset;
                }
            }
            Rule::compound_op => ops.push(parse_compound_op(part)),
            _ => {}
        }
    }

    Ok((cores, ops, order_by, limit, offset))
}

fn parse_compound_op(pair: Pair<Rule>) -> CompoundOp {
    let inner = pair.into_inner().next().expect("compound_op always has exactly one alternative");
    match inner.as_rule() {
        Rule::union_op => {
            if inner.as_str().to_ascii_uppercase().contains("ALL") {
                CompoundOp::UnionAll
            } else {
                CompoundOp::Union
            }
        }
        Rule::intersect_op => CompoundOp::Intersect,
        Rule::except_op => CompoundOp::Except,
        _ => unreachable!("grammar only derives compound_op from the three listed alternatives"),
    }
}

type SelectCoreParts = (SelectCore, Vec<OrderKey>, Option<i64>, Option<i64>);

fn parse_select_core(pair: Pair<Rule>) -> Result<SelectCoreParts> {
    let mut distinct = false;
    let mut projection = Vec::new();
    let mut from = None;
    let mut filter = None;
    let mut group_by = Vec::new();
    let mut having = None;
    let mut order_by = Vec::new();
    let mut limit = None;
    let mut offset = None;

    for part in pair.into_inner() {
        match part.as_rule() {
            Rule::distinct_kw => distinct = true,
            Rule::select_list => {
                for item in part.into_inner() {
                    projection.push(parse_select_item(item)?);
                }
            }
            Rule::from_clause => from = Some(parse_from_clause(part)?),
            Rule::where_clause => {
                let expr_pair = part
                    .into_inner()
                    .next()
                    .ok_or_else(|| Error::ParseError("WHERE with no expression".into()))?;
                filter = Some(parse_bool_expr(expr_pair)?);
            }
            Rule::group_by_clause => {
                group_by = part.into_inner().map(|p| p.as_str().to_string()).collect();
            }
            Rule::having_clause => {
                let expr_pair = part
                    .into_inner()
                    .next()
                    .ok_or_else(|| Error::ParseError("HAVING with no expression".into()))?;
                having = Some(parse_bool_expr(expr_pair)?);
            }
            Rule::order_by_clause => order_by = parse_order_by(part),
            Rule::limit_clause => {
                let mut inner = part.into_inner();
                limit = inner.next().map(|p| p.as_str().parse().unwrap_or_default());
                offset = inner.next().map(|p| p.as_str().parse().unwrap_or_default());
            }
            _ => {}
        }
    }

    let core = SelectCore {
        distinct,
        projection,
        from: from.ok_or_else(|| Error::ParseError("SELECT missing a FROM clause".into()))?,
        filter,
        group_by,
        having,
    };
    Ok((core, order_by, limit, offset))
}

fn parse_select_item(pair: Pair<Rule>) -> Result<ProjectionItem> {
    match pair.as_str() {
        "*" => return Ok(ProjectionItem::Star),
        _ => {}
    }
    let inner = pair
        .into_inner()
        .next()
        .ok_or_else(|| Error::ParseError("empty select item".into()))?;
    match inner.as_rule() {
        Rule::agg_expr => parse_agg_expr(inner),
        Rule::qualified_ident => {
            let (table, name) = split_qualified(inner.as_str());
            Ok(ProjectionItem::Column { table, name, alias: None })
        }
        _ => Err(Error::ParseError(format!("unexpected select item `{}`", inner.as_str()))),
    }
}

fn parse_agg_expr(pair: Pair<Rule>) -> Result<ProjectionItem> {
    let (func, arg) = parse_agg_func_and_arg(pair)?;
    Ok(ProjectionItem::Agg { func, arg, alias: None })
}

/// Shared by a projected `COUNT(*)`-style item and a `HAVING COUNT(*) > 2`
/// aggregate reference -- the grammar's `agg_expr` rule is the same in
/// both positions, only what wraps it differs.
fn parse_agg_func_and_arg(pair: Pair<Rule>) -> Result<(AggFunc, AggArg)> {
    let mut inner = pair.into_inner();
    let func_pair = inner.next().ok_or_else(|| Error::ParseError("missing aggregate function".into()))?;
    let func = match func_pair.as_str().to_ascii_uppercase().as_str() {
        "COUNT" => AggFunc::Count,
        "SUM" => AggFunc::Sum,
        "AVG" => AggFunc::Avg,
        "MIN" => AggFunc::Min,
        "MAX" => AggFunc::Max,
        other => return Err(Error::ParseError(format!("unknown aggregate function `{other}`"))),
    };
    let arg_pair = inner.next().ok_or_else(|| Error::ParseError("missing aggregate argument".into()))?;
    let arg = if arg_pair.as_str() == "*" {
        AggArg::Star
    } else {
        AggArg::Column(arg_pair.as_str().to_string())
    };
    Ok((func, arg))
}

fn parse_from_clause(pair: Pair<Rule>) -> Result<FromSpec> {
    let mut inner = pair.into_inner();
    let left = parse_table_ref(
        inner
            .next()
            .ok_or_else(|| Error::ParseError("FROM with no table".into()))?,
    );

    match inner.next() {
        None => Ok(FromSpec::Table(left)),
        Some(join) => {
            let mut join_inner = join.into_inner();
            let right = parse_table_ref(
                join_inner
                    .next()
                    .ok_or_else(|| Error::ParseError("JOIN with no table".into()))?,
            );
            let left_col = join_inner
                .next()
                .ok_or_else(|| Error::ParseError("JOIN ON missing left column".into()))?
                .as_str()
                .to_string();
            let right_col = join_inner
                .next()
                .ok_or_else(|| Error::ParseError("JOIN ON missing right column".into()))?
                .as_str()
                .to_string();
            Ok(FromSpec::Join {
                left,
                right,
                left_column: left_col,
                right_column: right_col,
            })
        }
    }
}

fn parse_table_ref(pair: Pair<Rule>) -> TableRef {
    let mut idents = pair.into_inner();
    let name = idents.next().map(|p| p.as_str().to_string()).unwrap_or_default();
    let alias = idents.next().map(|p| p.as_str().to_string());
    TableRef { name, alias }
}

fn parse_order_by(pair: Pair<Rule>) -> Vec<OrderKey> {
    pair.into_inner()
        .map(|item| {
            let mut inner = item.into_inner();
            let column = inner.next().map(|p| p.as_str().to_string()).unwrap_or_default();
            let descending = inner
                .next()
                .map(|p| p.as_str().eq_ignore_ascii_case("desc"))
                .unwrap_or(false);
            OrderKey { column, descending }
        })
        .collect()
}

fn split_qualified(text: &str) -> (Option<String>, String) {
    match text.split_once('.') {
        Some((table, name)) => (Some(table.to_string()), name.to_string()),
        None => (None, text.to_string()),
    }
}

fn parse_bool_expr(pair: Pair<Rule>) -> Result<Expr> {
    match pair.as_rule() {
        Rule::bool_expr => {
            let mut ands = pair.into_inner();
            let mut expr = parse_bool_expr(ands.next().ok_or_else(|| Error::ParseError("empty OR chain".into()))?)?;
            for and_expr in ands {
                expr = Expr::Or(Box::new(expr), Box::new(parse_bool_expr(and_expr)?));
            }
            Ok(expr)
        }
        Rule::and_expr => {
            let mut atoms = pair.into_inner();
            let mut expr = parse_bool_expr(atoms.next().ok_or_else(|| Error::ParseError("empty AND chain".into()))?)?;
            for atom in atoms {
                expr = Expr::And(Box::new(expr), Box::new(parse_bool_expr(atom)?));
            }
            Ok(expr)
        }
        Rule::bool_atom => {
            let inner = pair
                .into_inner()
                .next()
                .ok_or_else(|| Error::ParseError("empty boolean atom".into()))?;
            parse_bool_expr(inner)
        }
        Rule::not_expr => {
            let inner = pair
                .into_inner()
                .next()
                .ok_or_else(|| Error::ParseError("NOT with no operand".into()))?;
            Ok(Expr::Not(Box::new(parse_bool_expr(inner)?)))
        }
        Rule::predicate => {
            let inner = pair
                .into_inner()
                .next()
                .ok_or_else(|| Error::ParseError("empty predicate".into()))?;
            parse_predicate(inner)
        }
        other => Err(Error::ParseError(format!("unexpected expression node {other:?}"))),
    }
}

fn parse_predicate(pair: Pair<Rule>) -> Result<Expr> {
    match pair.as_rule() {
        Rule::compare_pred => {
            let mut inner = pair.into_inner();
            let lhs = parse_scalar(inner.next().ok_or_else(|| Error::ParseError("missing LHS".into()))?)?;
            let op = parse_compare_op(inner.next().ok_or_else(|| Error::ParseError("missing operator".into()))?)?;
            let rhs = parse_scalar(inner.next().ok_or_else(|| Error::ParseError("missing RHS".into()))?)?;
            Ok(Expr::Compare(Box::new(lhs), op, Box::new(rhs)))
        }
        Rule::between_pred => {
            let mut inner = pair.into_inner();
            let value = parse_scalar(inner.next().ok_or_else(|| Error::ParseError("BETWEEN missing value".into()))?)?;
            let low = parse_scalar(inner.next().ok_or_else(|| Error::ParseError("BETWEEN missing low bound".into()))?)?;
            let high =
                parse_scalar(inner.next().ok_or_else(|| Error::ParseError("BETWEEN missing high bound".into()))?)?;
            Ok(Expr::Between(Box::new(value), Box::new(low), Box::new(high)))
        }
        Rule::is_null_pred => {
            let value = parse_scalar(
                pair.into_inner()
                    .next()
                    .ok_or_else(|| Error::ParseError("IS NULL missing value".into()))?,
            )?;
            Ok(Expr::IsNull(Box::new(value)))
        }
        Rule::is_not_null_pred => {
            let value = parse_scalar(
                pair.into_inner()
                    .next()
                    .ok_or_else(|| Error::ParseError("IS NOT NULL missing value".into()))?,
            )?;
            Ok(Expr::IsNotNull(Box::new(value)))
        }
        Rule::like_pred => {
            let mut inner = pair.into_inner();
            let value = parse_scalar(inner.next().ok_or_else(|| Error::ParseError("LIKE missing value".into()))?)?;
            let pattern = inner
                .next()
                .ok_or_else(|| Error::ParseError("LIKE missing pattern".into()))?
                .as_str();
            Ok(Expr::Like(Box::new(value), strip_quotes(pattern)))
        }
        Rule::in_pred => {
            let mut inner = pair.into_inner();
            let value = parse_scalar(inner.next().ok_or_else(|| Error::ParseError("IN missing value".into()))?)?;
            let list_pair = inner.next().ok_or_else(|| Error::ParseError("IN missing list".into()))?;
            let list = list_pair.into_inner().map(parse_scalar).collect::<Result<Vec<_>>>()?;
            Ok(Expr::In(Box::new(value), list))
        }
        Rule::not_in_pred => {
            let mut inner = pair.into_inner();
            let value = parse_scalar(inner.next().ok_or_else(|| Error::ParseError("NOT IN missing value".into()))?)?;
            let list_pair = inner.next().ok_or_else(|| Error::ParseError("NOT IN missing list".into()))?;
            let list = list_pair.into_inner().map(parse_scalar).collect::<Result<Vec<_>>>()?;
            Ok(Expr::NotIn(Box::new(value), list))
        }
        other => Err(Error::ParseError(format!("unexpected predicate node {other:?}"))),
    }
}

fn parse_compare_op(pair: Pair<Rule>) -> Result<CompareOp> {
    Ok(match pair.as_str() {
        "=" => CompareOp::Eq,
        "<>" | "!=" => CompareOp::Ne,
        "<" => CompareOp::Lt,
        "<=" => CompareOp::Le,
        ">" => CompareOp::Gt,
        ">=" => CompareOp::Ge,
        other => return Err(Error::ParseError(format!("unknown comparison operator `{other}`"))),
    })
}

fn parse_scalar(pair: Pair<Rule>) -> Result<Expr> {
    let inner = pair
        .into_inner()
        .next()
        .ok_or_else(|| Error::ParseError("empty scalar".into()))?;
    match inner.as_rule() {
        Rule::param => Ok(Expr::Param(inner.as_str().trim_start_matches('$').to_string())),
        Rule::literal => Ok(Expr::Literal(parse_literal(inner)?)),
        Rule::agg_expr => {
            let (func, arg) = parse_agg_func_and_arg(inner)?;
            Ok(Expr::Agg(func, arg))
        }
        Rule::qualified_ident => Ok(Expr::Column(inner.as_str().to_string())),
        other => Err(Error::ParseError(format!("unexpected scalar node {other:?}"))),
    }
}

fn parse_literal(pair: Pair<Rule>) -> Result<Literal> {
    let inner = pair
        .into_inner()
        .next()
        .ok_or_else(|| Error::ParseError("empty literal".into()))?;
    Ok(match inner.as_rule() {
        Rule::int_lit => Literal::Integer(
            inner
                .as_str()
                .parse()
                .map_err(|_| Error::ParseError(format!("bad integer literal `{}`", inner.as_str())))?,
        ),
        Rule::float_lit => Literal::Real(
            inner
                .as_str()
                .parse()
                .map_err(|_| Error::ParseError(format!("bad real literal `{}`", inner.as_str())))?,
        ),
        Rule::string_lit => Literal::Text(strip_quotes(inner.as_str())),
        Rule::null_lit => Literal::Null,
        other => return Err(Error::ParseError(format!("unexpected literal node {other:?}"))),
    })
}

fn strip_quotes(text: &str) -> String {
    text.trim_matches('\'').to_string()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_a_plain_select_with_where() {
        let intent = parse("SELECT id, name FROM users WHERE score > 10").unwrap();
        assert_eq!(intent.cores.len(), 1);
        assert_eq!(intent.cores[0].projection.len(), 2);
        assert!(intent.cores[0].filter.is_some());
    }

    #[test]
    fn parses_a_bind_parameter() {
        let intent = parse("SELECT * FROM users WHERE name = $who").unwrap();
        match &intent.cores[0].filter {
            Some(Expr::Compare(_, CompareOp::Eq, rhs)) => assert!(matches!(**rhs, Expr::Param(_))),
            other => panic!("unexpected filter shape: {other:?}"),
        }
    }

    #[test]
    fn parses_union_all_with_trailing_limit() {
        let intent = parse("SELECT id FROM a UNION ALL SELECT id FROM b ORDER BY id LIMIT 10 OFFSET 5").unwrap();
        assert_eq!(intent.cores.len(), 2);
        assert_eq!(intent.compound_ops, vec![CompoundOp::UnionAll]);
        assert_eq!(intent.limit, Some(10));
        assert_eq!(intent.offset, Some(5));
    }

    #[test]
    fn parses_group_by_and_aggregate_projection() {
        let intent = parse("SELECT team, COUNT(*) FROM players GROUP BY team HAVING COUNT(*) > 2").unwrap();
        assert_eq!(intent.cores[0].group_by, vec!["team".to_string()]);
        assert!(intent.cores[0].having.is_some());
    }

    #[test]
    fn parses_a_join() {
        let intent = parse("SELECT a.id FROM orders AS a JOIN customers AS c ON a.customer_id = c.id").unwrap();
        assert!(matches!(intent.cores[0].from, FromSpec::Join { .. }));
    }

    #[test]
    fn parses_explain_prefix() {
        let intent = parse("EXPLAIN SELECT * FROM users").unwrap();
        assert!(intent.explain);
    }
}
