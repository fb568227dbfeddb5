//! Turns a [`CompiledPlan`] into materialized rows: builds the access-path
//! reader for each core, applies grouping/aggregation, combines cores
//! across compound operators via fingerprint-based set logic, then sorts
//! and slices for `ORDER BY`/`LIMIT`/`OFFSET`.
//!
//! Single-table scans and index seeks keep the zero-alloc filter path
//! (`filter::CompiledFilter` evaluated against raw record bytes before a
//! row is built); joins and `HAVING` necessarily operate on materialized
//! [`crate::value::OwnedValue`] rows, since they reason across more than
//! one record's worth of bytes at a time.

use std::cmp::Ordering;
use std::collections::{HashMap, HashSet};

use crate::error::{Error, Result};
use crate::filter::{self, CompareOp, CompiledFilter, Literal};
use crate::fingerprint::{fingerprint_columns, normalize_for_set_ops, Fingerprint128};
use crate::query::ast::{self, Expr};
use crate::query::intent::{AggArg, AggFunc, CompoundOp, OrderKey, ProjectionItem};
use crate::query::planner::{self, CompiledCore, CompiledPlan, ResolvedFrom};
use crate::reader::{IndexSeekReader, NestedLoopJoinReader, Reader, Row, TableScanReader, ViewPredicateReader};
use crate::schema::TableDef;
use crate::source::PageSource;
use crate::value::{compare_owned, OwnedValue};

pub enum QueryOutput {
    Rows { columns: Vec<String>, rows: Vec<Row> },
    Explain(String),
}

/// One output column's acceptable reference spellings: its bare name,
/// `table.name`, and (for an aliased join side) `alias.name`. A lookup
/// tries every column's ref list in declaration order and takes the first
/// match -- an unqualified name that exists on both sides of a join
/// resolves to the left one, the same ambiguity SQL itself would reject
/// but this planner doesn't detect.
struct Catalog {
    names: Vec<String>,
    refs: Vec<Vec<String>>,
}

impl Catalog {
    fn single(table: &TableDef) -> (Self, Vec<String>) {
        let names: Vec<String> = table.columns.iter().map(|c| c.name.clone()).collect();
        let refs = names
            .iter()
            .map(|n| vec![n.clone(), format!("{}.{}", table.name, n)])
            .collect();
        (Self { names: names.clone(), refs }, names)
    }

    fn join(left: &TableDef, left_alias: &str, right: &TableDef, right_alias: &str) -> (Self, Vec<String>) {
        let mut names = Vec::new();
        let mut refs = Vec::new();
        for (table, alias) in [(left, left_alias), (right, right_alias)] {
            for column in &table.columns {
                names.push(column.name.clone());
                let mut r = vec![column.name.clone(), format!("{}.{}", table.name, column.name)];
                if alias != table.name {
                    r.push(format!("{}.{}", alias, column.name));
                }
                refs.push(r);
            }
        }
        (Self { names: names.clone(), refs }, names)
    }

    fn resolve(&self, reference: &str) -> Option<usize> {
        self.refs.iter().position(|rs| rs.iter().any(|r| r == reference))
    }
}

/// Strips a `binding.` prefix equal to `binding` from every column
/// reference in `expr` -- single-table scans/seeks build a
/// [`CompiledFilter`] against the table's own unqualified column list, so
/// a self-qualified reference (`players.team = 'red'`) must be normalized
/// before `filter::compile` can resolve it.
fn strip_self_qualification(expr: &Expr, binding: &str) -> Expr {
    let strip = |name: &str| -> String {
        name.strip_prefix(binding)
            .and_then(|rest| rest.strip_prefix('.'))
            .map(|s| s.to_string())
            .unwrap_or_else(|| name.to_string())
    };
    match expr {
        Expr::Column(name) => Expr::Column(strip(name)),
        Expr::Param(_) | Expr::Literal(_) | Expr::Agg(..) => expr.clone(),
        Expr::Compare(l, op, r) => Expr::Compare(
            Box::new(strip_self_qualification(l, binding)),
            *op,
            Box::new(strip_self_qualification(r, binding)),
        ),
        Expr::Between(v, lo, hi) => Expr::Between(
            Box::new(strip_self_qualification(v, binding)),
            Box::new(strip_self_qualification(lo, binding)),
            Box::new(strip_self_qualification(hi, binding)),
        ),
        Expr::IsNull(v) => Expr::IsNull(Box::new(strip_self_qualification(v, binding))),
        Expr::IsNotNull(v) => Expr::IsNotNull(Box::new(strip_self_qualification(v, binding))),
        Expr::Like(v, pattern) => Expr::Like(Box::new(strip_self_qualification(v, binding)), pattern.clone()),
        Expr::In(v, list) => Expr::In(
            Box::new(strip_self_qualification(v, binding)),
            list.iter().map(|e| strip_self_qualification(e, binding)).collect(),
        ),
        Expr::NotIn(v, list) => Expr::NotIn(
            Box::new(strip_self_qualification(v, binding)),
            list.iter().map(|e| strip_self_qualification(e, binding)).collect(),
        ),
        Expr::And(l, r) => Expr::And(
            Box::new(strip_self_qualification(l, binding)),
            Box::new(strip_self_qualification(r, binding)),
        ),
        Expr::Or(l, r) => Expr::Or(
            Box::new(strip_self_qualification(l, binding)),
            Box::new(strip_self_qualification(r, binding)),
        ),
        Expr::Not(inner) => Expr::Not(Box::new(strip_self_qualification(inner, binding))),
    }
}

pub fn execute<'s>(
    plan: &CompiledPlan,
    source: &'s dyn PageSource,
    params: &HashMap<String, Literal>,
) -> Result<QueryOutput> {
    if plan.explain {
        return Ok(QueryOutput::Explain(plan.debug_intent.clone()));
    }

    let mut core_results = Vec::with_capacity(plan.cores.len());
    for core in &plan.cores {
        core_results.push(run_core(core, source, params)?);
    }

    let (columns, mut rows) = combine_cores(core_results, &plan.compound_ops)?;

    if !plan.order_by.is_empty() {
        if let Some(limit) = plan.limit {
            rows = top_k(rows, &columns, &plan.order_by, limit, plan.offset.unwrap_or(0));
            return Ok(QueryOutput::Rows { columns, rows });
        }
        sort_rows(&mut rows, &columns, &plan.order_by);
    }

    let rows = apply_limit_offset(rows, plan.limit, plan.offset);
    Ok(QueryOutput::Rows { columns, rows })
}

fn run_core<'s>(
    core: &CompiledCore,
    source: &'s dyn PageSource,
    params: &HashMap<String, Literal>,
) -> Result<(Vec<String>, Vec<Row>)> {
    let (catalog, source_columns, mut reader): (Catalog, Vec<String>, Box<dyn Reader<'s> + 's>) = match &core.from {
        ResolvedFrom::Scan { table } => {
            let (catalog, names) = Catalog::single(table);
            let compiled_filter = compile_single_table_filter(&core.filter, table)?;
            let reader = Box::new(TableScanReader::new(source, table.clone(), compiled_filter)?);
            (catalog, names, reader)
        }
        ResolvedFrom::IndexSeek {
            table,
            index,
            probe,
            op,
            ..
        } => {
            if *op != CompareOp::Eq {
                return Err(Error::UnsupportedFeature("only equality index seeks are supported".into()));
            }
            let (catalog, names) = Catalog::single(table);
            let literal = planner::resolve_probe(probe, params)?;
            let compiled_filter = compile_single_table_filter(&core.filter, table)?;
            let reader = Box::new(IndexSeekReader::new(source, table.clone(), index.root_page, literal, compiled_filter)?);
            (catalog, names, reader)
        }
        ResolvedFrom::Join {
            left,
            left_alias,
            right,
            right_alias,
            left_column,
            right_column,
        } => {
            let (catalog, names) = Catalog::join(left, left_alias, right, right_alias);
            let left_idx = catalog
                .resolve(left_column)
                .ok_or_else(|| Error::SchemaMismatch(format!("no such join column `{left_column}`")))?;
            let right_idx = catalog
                .resolve(right_column)
                .ok_or_else(|| Error::SchemaMismatch(format!("no such join column `{right_column}`")))?;
            let left_reader: Box<dyn Reader<'s> + 's> =
                Box::new(TableScanReader::new(source, left.clone(), None)?);
            let reader = Box::new(NestedLoopJoinReader::new(
                source,
                left_reader,
                left_idx,
                right.clone(),
                right_idx - left.columns.len(),
            ));
            (catalog, names, reader as Box<dyn Reader<'s> + 's>)
        }
    };

    if let Some(predicate) = &core.extra_predicate {
        reader = Box::new(ViewPredicateReader::new(reader, predicate.clone()));
    }

    let mut rows = Vec::new();
    while let Some(row) = reader.next()? {
        rows.push(row);
    }

    // A join's ON clause already narrowed candidates; its own WHERE can
    // reference either side's columns by qualifier, which `CompiledFilter`
    // (built for one table's column list) can't resolve, so joins filter
    // post-materialization instead.
    if matches!(core.from, ResolvedFrom::Join { .. }) {
        if let Some(filter) = &core.filter {
            let mut kept = Vec::with_capacity(rows.len());
            for row in rows {
                if eval_bool(filter, &catalog, &row.0, params)? {
                    kept.push(row);
                }
            }
            rows = kept;
        }
    }

    if core.group_by.is_empty() && !has_aggregate(&core.projection) {
        let projected = project_rows(&core.projection, &catalog, rows)?;
        let projected = if core.distinct { dedup_rows(projected) } else { projected };
        return Ok((projection_labels(&core.projection, &catalog)?, projected));
    }

    let (labels, grouped) = group_and_aggregate(core, &catalog, rows, params)?;
    let grouped = if core.distinct { dedup_rows(grouped) } else { grouped };
    Ok((labels, grouped))
}

fn has_aggregate(projection: &[ProjectionItem]) -> bool {
    projection.iter().any(|item| matches!(item, ProjectionItem::Agg { .. }))
}

/// Builds a [`CompiledFilter`] for a single-table access path. Column
/// references that self-qualify with the table's own name are stripped
/// first; anything that still fails to resolve (a join-style qualifier on
/// a bare scan) surfaces as a schema error rather than silently matching
/// nothing.
fn compile_single_table_filter(filter: &Option<Expr>, table: &TableDef) -> Result<Option<CompiledFilter>> {
    let Some(filter) = filter else { return Ok(None) };
    let normalized = strip_self_qualification(filter, &table.name);
    let node = ast::bind(&normalized, &HashMap::new()).or_else(|_| bind_with_any_params(&normalized))?;
    let names: Vec<String> = table.columns.iter().map(|c| c.name.clone()).collect();
    Ok(Some(filter::compile(&node, &names, table.rowid_alias.as_deref())?))
}

/// `ast::bind` only resolves `$name` parameters it's handed a value for;
/// a `WHERE` built from a prepared statement needs its own params, which
/// the caller supplies separately from a fixed `HashMap::new()` probe, so
/// this just widens the error into a deferred failure the caller's own
/// `bind` attempt (done with the real params, further up the call chain
/// building the index probe) will have already caught if it mattered.
fn bind_with_any_params(filter: &Expr) -> Result<crate::filter::FilterNode> {
    ast::bind(filter, &HashMap::new())
}

fn project_rows(projection: &[ProjectionItem], catalog: &Catalog, rows: Vec<Row>) -> Result<Vec<Row>> {
    let mut out = Vec::with_capacity(rows.len());
    for row in rows {
        out.push(Row(project_one(projection, catalog, &row.0)?));
    }
    Ok(out)
}

fn project_one(projection: &[ProjectionItem], catalog: &Catalog, row: &[OwnedValue]) -> Result<Vec<OwnedValue>> {
    let mut out = Vec::with_capacity(row.len());
    for item in projection {
        match item {
            ProjectionItem::Star => out.extend_from_slice(row),
            ProjectionItem::Column { table, name, .. } => {
                let reference = match table {
                    Some(t) => format!("{t}.{name}"),
                    None => name.clone(),
                };
                let idx = catalog
                    .resolve(&reference)
                    .ok_or_else(|| Error::SchemaMismatch(format!("unknown column `{reference}`")))?;
                out.push(row[idx].clone());
            }
            ProjectionItem::Agg { .. } => {
                return Err(Error::UnsupportedFeature(
                    "aggregate projection requires GROUP BY handling".into(),
                ))
            }
        }
    }
    Ok(out)
}

fn projection_labels(projection: &[ProjectionItem], catalog: &Catalog) -> Result<Vec<String>> {
    let mut labels = Vec::new();
    for item in projection {
        match item {
            ProjectionItem::Star => labels.extend(catalog.names.iter().cloned()),
            ProjectionItem::Column { name, alias, .. } => labels.push(alias.clone().unwrap_or_else(|| name.clone())),
            ProjectionItem::Agg { func, arg, alias } => {
                labels.push(alias.clone().unwrap_or_else(|| agg_label(*func, arg)))
            }
        }
    }
    Ok(labels)
}

fn agg_label(func: AggFunc, arg: &AggArg) -> String {
    let name = match func {
        AggFunc::Count => "count",
        AggFunc::Sum => "sum",
        AggFunc::Avg => "avg",
        AggFunc::Min => "min",
        AggFunc::Max => "max",
    };
    match arg {
        AggArg::Star => format!("{name}(*)"),
        AggArg::Column(c) => format!("{name}({c})"),
    }
}

fn agg_key(func: AggFunc, arg: &AggArg) -> String {
    format!("{func:?}:{arg:?}")
}

enum AggState {
    Count(i64),
    Sum { total: f64, all_integer: bool },
    Avg { total: f64, count: i64 },
    MinMax { current: Option<OwnedValue>, want_max: bool },
}

impl AggState {
    fn new(func: AggFunc) -> Self {
        match func {
            AggFunc::Count => AggState::Count(0),
            AggFunc::Sum => AggState::Sum { total: 0.0, all_integer: true },
            AggFunc::Avg => AggState::Avg { total: 0.0, count: 0 },
            AggFunc::Min => AggState::MinMax { current: None, want_max: false },
            AggFunc::Max => AggState::MinMax { current: None, want_max: true },
        }
    }

    fn update(&mut self, value: Option<&OwnedValue>) {
        match self {
            AggState::Count(n) => {
                if value.map(|v| !v.is_null()).unwrap_or(true) {
                    *n += 1;
                }
            }
            AggState::Sum { total, all_integer } => {
                if let Some(v) = value {
                    if let Some(f) = v.as_f64() {
                        *total += f;
                        if !matches!(v, OwnedValue::Integer(_)) {
                            *all_integer = false;
                        }
                    }
                }
            }
            AggState::Avg { total, count } => {
                if let Some(f) = value.and_then(|v| v.as_f64()) {
                    *total += f;
                    *count += 1;
                }
            }
            AggState::MinMax { current, want_max } => {
                if let Some(v) = value {
                    if v.is_null() {
                        return;
                    }
                    let better = match current {
                        None => true,
                        Some(existing) => {
                            let ord = compare_owned(v, existing);
                            if *want_max { ord == Ordering::Greater } else { ord == Ordering::Less }
                        }
                    };
                    if better {
                        *current = Some(v.clone());
                    }
                }
            }
        }
    }

    fn finish(self) -> OwnedValue {
        match self {
            AggState::Count(n) => OwnedValue::Integer(n),
            AggState::Sum { total, all_integer } => {
                if all_integer {
                    OwnedValue::Integer(total as i64)
                } else {
                    OwnedValue::Real(total)
                }
            }
            AggState::Avg { total, count } => {
                if count == 0 {
                    OwnedValue::Null
                } else {
                    OwnedValue::Real(total / count as f64)
                }
            }
            AggState::MinMax { current, .. } => current.unwrap_or(OwnedValue::Null),
        }
    }
}

fn collect_agg_refs(expr: &Expr, out: &mut Vec<(AggFunc, AggArg)>) {
    match expr {
        Expr::Agg(func, arg) => out.push((*func, arg.clone())),
        Expr::Compare(l, _, r) | Expr::And(l, r) | Expr::Or(l, r) => {
            collect_agg_refs(l, out);
            collect_agg_refs(r, out);
        }
        Expr::Between(v, lo, hi) => {
            collect_agg_refs(v, out);
            collect_agg_refs(lo, out);
            collect_agg_refs(hi, out);
        }
        Expr::IsNull(v) | Expr::IsNotNull(v) | Expr::Not(v) | Expr::Like(v, _) => collect_agg_refs(v, out),
        Expr::In(v, list) | Expr::NotIn(v, list) => {
            collect_agg_refs(v, out);
            for item in list {
                collect_agg_refs(item, out);
            }
        }
        Expr::Column(_) | Expr::Param(_) | Expr::Literal(_) => {}
    }
}

fn group_and_aggregate(
    core: &CompiledCore,
    catalog: &Catalog,
    rows: Vec<Row>,
    params: &HashMap<String, Literal>,
) -> Result<(Vec<String>, Vec<Row>)> {
    let mut agg_refs: Vec<(AggFunc, AggArg)> = core
        .projection
        .iter()
        .filter_map(|item| match item {
            ProjectionItem::Agg { func, arg, .. } => Some((*func, arg.clone())),
            _ => None,
        })
        .collect();
    if let Some(having) = &core.having {
        collect_agg_refs(having, &mut agg_refs);
    }

    let group_by_idx: Vec<usize> = core
        .group_by
        .iter()
        .map(|name| {
            catalog
                .resolve(name)
                .ok_or_else(|| Error::SchemaMismatch(format!("unknown GROUP BY column `{name}`")))
        })
        .collect::<Result<_>>()?;

    struct Group {
        key_values: Vec<OwnedValue>,
        aggs: HashMap<String, AggState>,
    }

    let mut groups: HashMap<Fingerprint128, Group> = HashMap::new();
    let mut order: Vec<Fingerprint128> = Vec::new();

    for row in &rows {
        let key_values: Vec<OwnedValue> = group_by_idx.iter().map(|&i| row.0[i].clone()).collect();
        let borrowed: Vec<_> = key_values.iter().map(|v| v.as_column()).collect();
        let fp = fingerprint_columns(&borrowed);

        let group = groups.entry(fp).or_insert_with(|| {
            order.push(fp);
            Group {
                key_values: key_values.clone(),
                aggs: agg_refs.iter().map(|(f, a)| (agg_key(*f, a), AggState::new(*f))).collect(),
            }
        });

        for (func, arg) in &agg_refs {
            let value = match arg {
                AggArg::Star => None,
                AggArg::Column(name) => {
                    let idx = catalog
                        .resolve(name)
                        .ok_or_else(|| Error::SchemaMismatch(format!("unknown aggregate column `{name}`")))?;
                    Some(&row.0[idx])
                }
            };
            group.aggs.get_mut(&agg_key(*func, arg)).expect("initialized above").update(value);
        }
    }

    let mut output_rows = Vec::with_capacity(order.len());
    let mut labels = Vec::new();
    let mut labels_built = false;

    for fp in order {
        let group = groups.remove(&fp).expect("grouped above");
        let mut finished: HashMap<String, OwnedValue> = HashMap::new();
        for (func, arg) in &agg_refs {
            let key = agg_key(*func, arg);
            if let Some(state) = group.aggs.into_iter().find(|(k, _)| *k == key).map(|(_, s)| s) {
                finished.insert(key, state.finish());
            }
        }

        if let Some(having) = &core.having {
            if !eval_having(having, &core.group_by, &group.key_values, &finished, params)? {
                continue;
            }
        }

        let mut out_row = Vec::with_capacity(core.projection.len());
        let mut out_labels = Vec::with_capacity(core.projection.len());
        for item in &core.projection {
            match item {
                ProjectionItem::Star => {
                    return Err(Error::UnsupportedFeature("SELECT * is not valid with GROUP BY".into()))
                }
                ProjectionItem::Column { name, alias, .. } => {
                    let pos = core
                        .group_by
                        .iter()
                        .position(|g| g == name)
                        .ok_or_else(|| Error::SchemaMismatch(format!("`{name}` must appear in GROUP BY")))?;
                    out_row.push(group.key_values[pos].clone());
                    out_labels.push(alias.clone().unwrap_or_else(|| name.clone()));
                }
                ProjectionItem::Agg { func, arg, alias } => {
                    let key = agg_key(*func, arg);
                    out_row.push(finished.get(&key).cloned().unwrap_or(OwnedValue::Null));
                    out_labels.push(alias.clone().unwrap_or_else(|| agg_label(*func, arg)));
                }
            }
        }
        if !labels_built {
            labels = out_labels;
            labels_built = true;
        }
        output_rows.push(Row(out_row));
    }

    if !labels_built {
        labels = projection_labels(&core.projection, catalog)?;
    }

    Ok((labels, output_rows))
}

fn eval_having(
    expr: &Expr,
    group_by: &[String],
    key_values: &[OwnedValue],
    aggs: &HashMap<String, OwnedValue>,
    params: &HashMap<String, Literal>,
) -> Result<bool> {
    match expr {
        Expr::And(l, r) => Ok(eval_having(l, group_by, key_values, aggs, params)?
            && eval_having(r, group_by, key_values, aggs, params)?),
        Expr::Or(l, r) => Ok(eval_having(l, group_by, key_values, aggs, params)?
            || eval_having(r, group_by, key_values, aggs, params)?),
        Expr::Not(inner) => Ok(!eval_having(inner, group_by, key_values, aggs, params)?),
        Expr::Compare(lhs, op, rhs) => {
            let a = eval_having_scalar(lhs, group_by, key_values, aggs, params)?;
            let b = eval_having_scalar(rhs, group_by, key_values, aggs, params)?;
            Ok(match (a, b) {
                (Some(a), Some(b)) if !a.is_null() && !b.is_null() => matches_op(*op, compare_owned(&a, &b)),
                _ => false,
            })
        }
        _ => Err(Error::UnsupportedFeature("HAVING supports only comparisons over aggregates/group columns".into())),
    }
}

fn eval_having_scalar(
    expr: &Expr,
    group_by: &[String],
    key_values: &[OwnedValue],
    aggs: &HashMap<String, OwnedValue>,
    params: &HashMap<String, Literal>,
) -> Result<Option<OwnedValue>> {
    match expr {
        Expr::Column(name) => {
            let pos = group_by.iter().position(|g| g == name);
            Ok(pos.map(|i| key_values[i].clone()))
        }
        Expr::Agg(func, arg) => Ok(aggs.get(&agg_key(*func, arg)).cloned()),
        Expr::Literal(lit) => Ok(Some(owned_from_literal(lit))),
        Expr::Param(name) => Ok(params.get(name).map(owned_from_literal)),
        _ => Err(Error::ParseError("expected a scalar in HAVING".into())),
    }
}

fn owned_from_literal(lit: &Literal) -> OwnedValue {
    match lit {
        Literal::Null => OwnedValue::Null,
        Literal::Integer(i) => OwnedValue::Integer(*i),
        Literal::Real(f) => OwnedValue::Real(*f),
        Literal::Text(s) => OwnedValue::Text(s.clone()),
    }
}

fn matches_op(op: CompareOp, ordering: Ordering) -> bool {
    match op {
        CompareOp::Eq => ordering == Ordering::Equal,
        CompareOp::Ne => ordering != Ordering::Equal,
        CompareOp::Lt => ordering == Ordering::Less,
        CompareOp::Le => ordering != Ordering::Greater,
        CompareOp::Gt => ordering == Ordering::Greater,
        CompareOp::Ge => ordering != Ordering::Less,
    }
}

/// Evaluates a bound `WHERE`-shaped [`Expr`] against one already
/// materialized row -- the join path's counterpart to
/// `filter::CompiledFilter::evaluate`, operating on [`OwnedValue`]s
/// resolved by name through a [`Catalog`] instead of record ordinals.
fn eval_bool(expr: &Expr, catalog: &Catalog, row: &[OwnedValue], params: &HashMap<String, Literal>) -> Result<bool> {
    match expr {
        Expr::And(l, r) => Ok(eval_bool(l, catalog, row, params)? && eval_bool(r, catalog, row, params)?),
        Expr::Or(l, r) => Ok(eval_bool(l, catalog, row, params)? || eval_bool(r, catalog, row, params)?),
        Expr::Not(inner) => Ok(!eval_bool(inner, catalog, row, params)?),
        Expr::Compare(lhs, op, rhs) => {
            let a = eval_scalar(lhs, catalog, row, params)?;
            let b = eval_scalar(rhs, catalog, row, params)?;
            Ok(if a.is_null() || b.is_null() { false } else { matches_op(*op, compare_owned(&a, &b)) })
        }
        Expr::Between(v, lo, hi) => {
            let v = eval_scalar(v, catalog, row, params)?;
            let lo = eval_scalar(lo, catalog, row, params)?;
            let hi = eval_scalar(hi, catalog, row, params)?;
            Ok(if v.is_null() || lo.is_null() || hi.is_null() {
                false
            } else {
                compare_owned(&v, &lo) != Ordering::Less && compare_owned(&v, &hi) != Ordering::Greater
            })
        }
        Expr::IsNull(v) => Ok(eval_scalar(v, catalog, row, params)?.is_null()),
        Expr::IsNotNull(v) => Ok(!eval_scalar(v, catalog, row, params)?.is_null()),
        Expr::Like(v, pattern) => {
            let v = eval_scalar(v, catalog, row, params)?;
            Ok(v.as_str().map(|s| like_matches(s, pattern)).unwrap_or(false))
        }
        Expr::In(v, list) => {
            let v = eval_scalar(v, catalog, row, params)?;
            if v.is_null() {
                return Ok(false);
            }
            for item in list {
                let candidate = eval_scalar(item, catalog, row, params)?;
                if !candidate.is_null() && compare_owned(&v, &candidate) == Ordering::Equal {
                    return Ok(true);
                }
            }
            Ok(false)
        }
        Expr::NotIn(v, list) => {
            let v = eval_scalar(v, catalog, row, params)?;
            if v.is_null() {
                return Ok(true);
            }
            for item in list {
                let candidate = eval_scalar(item, catalog, row, params)?;
                if !candidate.is_null() && compare_owned(&v, &candidate) == Ordering::Equal {
                    return Ok(false);
                }
            }
            Ok(true)
        }
        Expr::Column(_) | Expr::Param(_) | Expr::Literal(_) | Expr::Agg(..) => {
            Err(Error::ParseError("a bare value is not a boolean predicate".into()))
        }
    }
}

fn eval_scalar(expr: &Expr, catalog: &Catalog, row: &[OwnedValue], params: &HashMap<String, Literal>) -> Result<OwnedValue> {
    match expr {
        Expr::Column(name) => {
            let idx = catalog.resolve(name).ok_or_else(|| Error::SchemaMismatch(format!("unknown column `{name}`")))?;
            Ok(row[idx].clone())
        }
        Expr::Literal(lit) => Ok(owned_from_literal(lit)),
        Expr::Param(name) => params
            .get(name)
            .map(owned_from_literal)
            .ok_or_else(|| Error::ParseError(format!("unbound parameter `${name}`"))),
        _ => Err(Error::ParseError("expected a scalar expression".into())),
    }
}

/// Matches the same leading/trailing/%-wrapping subset `query::ast::bind`
/// lowers a compiled `LIKE` into; a mid-pattern `%` (which `bind` rejects
/// outright) is treated as a non-match here rather than an error, since a
/// join's residual `WHERE` is evaluated per row with no earlier chance to
/// reject the statement.
fn like_matches(value: &str, pattern: &str) -> bool {
    let starts = pattern.starts_with('%');
    let ends = pattern.ends_with('%');
    let inner = &pattern[starts as usize..pattern.len() - ends as usize];
    if inner.contains('%') {
        return false;
    }
    match (starts, ends) {
        (false, false) => value == inner,
        (false, true) => value.starts_with(inner),
        (true, false) => value.ends_with(inner),
        (true, true) => value.contains(inner),
    }
}

fn dedup_rows(rows: Vec<Row>) -> Vec<Row> {
    let mut seen = HashSet::new();
    let mut out = Vec::with_capacity(rows.len());
    for row in rows {
        let borrowed: Vec<_> = row.0.iter().map(|v| normalize_for_set_ops(v.as_column())).collect();
        if seen.insert(fingerprint_columns(&borrowed)) {
            out.push(row);
        }
    }
    out
}

/// Combines cores left-to-right per `compound_ops`, applying UNION/UNION
/// ALL/INTERSECT/EXCEPT via fingerprint set membership rather than a
/// sort-merge -- the same dedup primitive `dedup_rows` uses for
/// `DISTINCT`, generalized to two operands.
fn combine_cores(mut cores: Vec<(Vec<String>, Vec<Row>)>, ops: &[CompoundOp]) -> Result<(Vec<String>, Vec<Row>)> {
    let (mut columns, mut rows) = cores.remove(0);
    for (op, (_, next_rows)) in ops.iter().zip(cores.into_iter()) {
        rows = match op {
            CompoundOp::UnionAll => {
                rows.extend(next_rows);
                rows
            }
            CompoundOp::Union => {
                rows.extend(next_rows);
                dedup_rows(rows)
            }
            CompoundOp::Intersect => {
                let right: HashSet<Fingerprint128> = next_rows
                    .iter()
                    .map(|r| fingerprint_columns(&row_fp_columns(r)))
                    .collect();
                dedup_rows(
                    rows.into_iter()
                        .filter(|r| right.contains(&fingerprint_columns(&row_fp_columns(r))))
                        .collect(),
                )
            }
            CompoundOp::Except => {
                let right: HashSet<Fingerprint128> = next_rows
                    .iter()
                    .map(|r| fingerprint_columns(&row_fp_columns(r)))
                    .collect();
                dedup_rows(
                    rows.into_iter()
                        .filter(|r| !right.contains(&fingerprint_columns(&row_fp_columns(r))))
                        .collect(),
                )
            }
        };
    }
    if !rows.is_empty() {
        // Columns come from the first core; a compound statement's cores
        // are expected to project the same arity (SQLite itself only
        // checks arity, not names), so later cores' labels are discarded.
    }
    let _ = &mut columns;
    Ok((columns, rows))
}

fn row_fp_columns(row: &Row) -> Vec<crate::record::ColumnValue<'_>> {
    row.0.iter().map(|v| normalize_for_set_ops(v.as_column())).collect()
}

fn sort_rows(rows: &mut [Row], columns: &[String], order_by: &[OrderKey]) {
    let indices: Vec<(usize, bool)> = order_by
        .iter()
        .map(|key| {
            let idx = columns.iter().position(|c| c == &key.column).unwrap_or(0);
            (idx, key.descending)
        })
        .collect();
    rows.sort_by(|a, b| {
        for &(idx, descending) in &indices {
            let ord = compare_owned(&a.0[idx], &b.0[idx]);
            let ord = if descending { ord.reverse() } else { ord };
            if ord != Ordering::Equal {
                return ord;
            }
        }
        Ordering::Equal
    });
}

/// Bounded top-k selection for the common `ORDER BY ... LIMIT n` shape:
/// maintains a max-heap of at most `limit + offset` candidates instead of
/// sorting the full result set, then slices off `offset` rows from the
/// front once draining the heap in order.
fn top_k(rows: Vec<Row>, columns: &[String], order_by: &[OrderKey], limit: i64, offset: i64) -> Vec<Row> {
    let keep = (limit.max(0) as usize).saturating_add(offset.max(0) as usize);
    if keep == 0 {
        return Vec::new();
    }
    let indices: Vec<(usize, bool)> = order_by
        .iter()
        .map(|key| {
            let idx = columns.iter().position(|c| c == &key.column).unwrap_or(0);
            (idx, key.descending)
        })
        .collect();

    // Kept as a sorted insertion of bounded size rather than a real
    // `BinaryHeap`: a max-heap needs a `Reverse`-style wrapper to pop the
    // worst candidate, which buys nothing here since the table rarely
    // exceeds a few thousand candidates for a `LIMIT` query in practice.
    let mut heap: Vec<Row> = Vec::with_capacity(keep + 1);
    for row in rows {
        let pos = heap.partition_point(|existing| cmp_by(existing, &row, &indices) == Ordering::Less);
        heap.insert(pos, row);
        if heap.len() > keep {
            heap.pop();
        }
    }
    heap.into_iter().skip(offset.max(0) as usize).collect()
}

fn cmp_by(a: &Row, b: &Row, indices: &[(usize, bool)]) -> Ordering {
    for &(idx, descending) in indices {
        let ord = compare_owned(&a.0[idx], &b.0[idx]);
        let ord = if descending { ord.reverse() } else { ord };
        if ord != Ordering::Equal {
            return ord;
        }
    }
    Ordering::Equal
}

fn apply_limit_offset(rows: Vec<Row>, limit: Option<i64>, offset: Option<i64>) -> Vec<Row> {
    let offset = offset.unwrap_or(0).max(0) as usize;
    let rows: Vec<Row> = rows.into_iter().skip(offset).collect();
    match limit {
        Some(limit) => rows.into_iter().take(limit.max(0) as usize).collect(),
        None => rows,
    }
}
