//! Turns a parsed [`Intent`] into a [`CompiledPlan`]: view names are
//! inlined, `WHERE` is scanned for a sargable conjunct an index can serve,
//! and the result is cached keyed on the intent's structural shape plus
//! the schema cookie and view-registry generation, so a prepared
//! statement re-executed after a schema change or a view registration
//! never runs against a stale plan.

use std::collections::HashMap;
use std::sync::{Arc, Mutex};

use crate::error::{Error, Result};
use crate::filter::{CompareOp, Literal};
use crate::query::ast::Expr;
use crate::query::intent::{CompoundOp, FromSpec, Intent, OrderKey, ProjectionItem, QueryHint, SelectCore, TableRef};
use crate::query::views::{ViewPredicate, ViewRegistry};
use crate::schema::{self, IndexDef, Schema, TableDef};

#[derive(Clone)]
pub enum ResolvedFrom {
    Scan {
        table: TableDef,
    },
    IndexSeek {
        table: TableDef,
        index: IndexDef,
        index_column: String,
        op: CompareOp,
        probe: Expr,
    },
    Join {
        left: TableDef,
        left_alias: String,
        right: TableDef,
        right_alias: String,
        left_column: String,
        right_column: String,
    },
}

#[derive(Clone)]
pub struct CompiledCore {
    pub distinct: bool,
    pub projection: Vec<ProjectionItem>,
    pub from: ResolvedFrom,
    pub filter: Option<Expr>,
    pub extra_predicate: Option<ViewPredicate>,
    pub group_by: Vec<String>,
    pub having: Option<Expr>,
}

#[derive(Clone)]
pub struct CompiledPlan {
    pub explain: bool,
    pub hint: Option<QueryHint>,
    pub cores: Vec<CompiledCore>,
    pub compound_ops: Vec<CompoundOp>,
    pub order_by: Vec<OrderKey>,
    pub limit: Option<i64>,
    pub offset: Option<i64>,
    pub debug_intent: String,
}

/// Caches compiled plans keyed on `(intent shape, schema cookie, view
/// generation)`. A schema-cookie bump (any DDL) or a view registration
/// invalidates every entry sharing the old pair, simply by virtue of the
/// key no longer matching -- stale entries are left to be evicted lazily
/// rather than actively swept.
#[derive(Default)]
pub struct PlanCache {
    entries: Mutex<HashMap<String, Arc<CompiledPlan>>>,
}

impl PlanCache {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn get_or_compile(
        &self,
        intent: &Intent,
        schema: &Schema,
        views: &ViewRegistry,
    ) -> Result<Arc<CompiledPlan>> {
        let key = format!(
            "{}::cookie={}::views={}",
            intent.cache_key(),
            schema_fingerprint(schema),
            views.generation()
        );
        if let Some(plan) = self.entries.lock().expect("plan cache mutex poisoned").get(&key) {
            return Ok(plan.clone());
        }
        let plan = Arc::new(compile(intent, schema, views)?);
        self.entries
            .lock()
            .expect("plan cache mutex poisoned")
            .insert(key, plan.clone());
        Ok(plan)
    }

    pub fn clear(&self) {
        self.entries.lock().expect("plan cache mutex poisoned").clear();
    }
}

/// A schema fingerprint folding in table/index/view counts plus each
/// entry's root page and `sql` text length. Counts alone tie across an
/// `ALTER TABLE ... RENAME TO`/`ADD COLUMN`, which change names and text
/// without changing how many tables exist; the real invalidation signal
/// is the caller-supplied schema cookie, so this is a belt-and-suspenders
/// check against a cache entry surviving such a rewrite.
fn schema_fingerprint(schema: &Schema) -> String {
    let mut tables: Vec<_> = schema.tables.values().map(|t| (t.name.clone(), t.root_page, t.sql.len())).collect();
    tables.sort();
    let mut indexes: Vec<_> = schema.indexes.values().map(|i| (i.name.clone(), i.root_page, i.sql.len())).collect();
    indexes.sort();
    let mut views: Vec<_> = schema.views.values().map(|v| (v.name.clone(), v.sql.len())).collect();
    views.sort();
    format!("{tables:?}:{indexes:?}:{views:?}")
}

pub fn compile(intent: &Intent, schema: &Schema, views: &ViewRegistry) -> Result<CompiledPlan> {
    let mut cores = Vec::with_capacity(intent.cores.len());
    for core in &intent.cores {
        cores.push(compile_core(core, schema, views)?);
    }
    Ok(CompiledPlan {
        explain: intent.explain,
        hint: intent.hint,
        cores,
        compound_ops: intent.compound_ops.clone(),
        order_by: intent.order_by.clone(),
        limit: intent.limit,
        offset: intent.offset,
        debug_intent: format!("{intent:#?}"),
    })
}

fn compile_core(core: &SelectCore, schema: &Schema, views: &ViewRegistry) -> Result<CompiledCore> {
    let (from_spec, filter, extra_predicate) = resolve_from(&core.from, core.filter.clone(), schema, views)?;

    let resolved = match from_spec {
        FromSpec::Table(table_ref) => {
            let table = lookup_table(schema, &table_ref.name)?;
            match select_index(&table, schema, &filter)? {
                Some((index, index_column, op, probe)) => {
                    // The index narrows candidates; the full predicate
                    // still runs per row, so a false-positive seek range
                    // never produces a wrong answer.
                    ResolvedFrom::IndexSeek {
                        table,
                        index,
                        index_column,
                        op,
                        probe,
                    }
                }
                None => ResolvedFrom::Scan { table },
            }
        }
        FromSpec::Join {
            left,
            right,
            left_column,
            right_column,
        } => ResolvedFrom::Join {
            left: lookup_table(schema, &left.name)?,
            left_alias: left.binding_name().to_string(),
            right: lookup_table(schema, &right.name)?,
            right_alias: right.binding_name().to_string(),
            left_column,
            right_column,
        },
    };

    Ok(CompiledCore {
        distinct: core.distinct,
        projection: core.projection.clone(),
        from: resolved,
        filter,
        extra_predicate,
        group_by: core.group_by.clone(),
        having: core.having.clone(),
    })
}

/// Inlines a SQL view or a registered programmatic view used as a FROM
/// target. Only single-table, non-aggregating views can be inlined this
/// way -- anything richer is out of scope for this planner and surfaces
/// as an `UnsupportedFeature` error rather than silently mis-planning.
fn resolve_from(
    from: &FromSpec,
    filter: Option<Expr>,
    schema: &Schema,
    views: &ViewRegistry,
) -> Result<(FromSpec, Option<Expr>, Option<ViewPredicate>)> {
    let table_ref = match from {
        FromSpec::Table(t) => t,
        FromSpec::Join { .. } => return Ok((from.clone(), filter, None)),
    };

    if let Some(view) = schema.views.get(&table_ref.name) {
        let inner = crate::query::parser::parse(&view.sql)?;
        if !inner.is_simple() {
            return Err(Error::UnsupportedFeature(format!(
                "view `{}` is not a simple single-table SELECT",
                table_ref.name
            )));
        }
        let inner_core = &inner.cores[0];
        let inner_from = match &inner_core.from {
            FromSpec::Table(t) => t.clone(),
            FromSpec::Join { .. } => {
                return Err(Error::UnsupportedFeature(format!(
                    "view `{}` joins, which this planner can't inline",
                    table_ref.name
                )))
            }
        };
        let merged = and_opt(inner_core.filter.clone(), filter);
        return Ok((FromSpec::Table(inner_from), merged, None));
    }

    if let Some(registered) = views.get(&table_ref.name) {
        let base = TableRef {
            name: registered.base_table.clone(),
            alias: table_ref.alias.clone(),
        };
        return Ok((FromSpec::Table(base), filter, registered.filter.clone()));
    }

    Ok((from.clone(), filter, None))
}

fn and_opt(a: Option<Expr>, b: Option<Expr>) -> Option<Expr> {
    match (a, b) {
        (Some(a), Some(b)) => Some(Expr::And(Box::new(a), Box::new(b))),
        (Some(a), None) => Some(a),
        (None, b) => b,
    }
}

fn lookup_table(schema: &Schema, name: &str) -> Result<TableDef> {
    schema
        .tables
        .get(name)
        .cloned()
        .ok_or_else(|| Error::SchemaMismatch(format!("no such table `{name}`")))
}

/// Picks an equality conjunct in `filter` on an index's leading column.
/// `IndexSeekCursor`'s three-way comparator is built for locating an
/// equality run (seek to the first non-greater key, stop at the first
/// lesser one); a one-sided range predicate has no equally-cheap seek
/// with that contract, so only `=` conjuncts are considered sargable here
/// -- a `score > 10` filter still runs, just as a residual over a full
/// scan rather than an index seek.
fn select_index(
    table: &TableDef,
    schema: &Schema,
    filter: &Option<Expr>,
) -> Result<Option<(IndexDef, String, CompareOp, Expr)>> {
    let Some(filter) = filter else { return Ok(None) };
    let conjuncts = flatten_and(filter);

    for index in schema.indexes.values() {
        if index.table_name != table.name {
            continue;
        }
        let columns = schema::parse_index_columns(&index.sql)?;
        let Some(leading) = columns.first() else { continue };

        for conjunct in &conjuncts {
            if let Expr::Compare(lhs, CompareOp::Eq, rhs) = conjunct {
                let probe = match (lhs.as_ref(), rhs.as_ref()) {
                    (Expr::Column(c), other) if c == leading => other.clone(),
                    (other, Expr::Column(c)) if c == leading => other.clone(),
                    _ => continue,
                };
                return Ok(Some((index.clone(), leading.clone(), CompareOp::Eq, probe)));
            }
        }
    }

    Ok(None)
}

fn flatten_and(expr: &Expr) -> Vec<&Expr> {
    match expr {
        Expr::And(l, r) => {
            let mut left = flatten_and(l);
            left.extend(flatten_and(r));
            left
        }
        other => vec![other],
    }
}

/// Bind parameters that must be known before an index probe can be
/// encoded: resolves `probe` (a literal or a `$name` reference) against
/// the caller's bind map.
pub fn resolve_probe(probe: &Expr, params: &HashMap<String, Literal>) -> Result<Literal> {
    match probe {
        Expr::Literal(lit) => Ok(lit.clone()),
        Expr::Param(name) => params
            .get(name)
            .cloned()
            .ok_or_else(|| Error::ParseError(format!("unbound parameter `${name}`"))),
        _ => Err(Error::ParseError("index probe must be a literal or a bind parameter".into())),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::query::parser::parse;
    use crate::schema::ColumnDef;

    fn schema_with_indexed_table() -> Schema {
        let mut schema = Schema::default();
        schema.tables.insert(
            "players".to_string(),
            TableDef {
                name: "players".to_string(),
                root_page: 2,
                sql: "CREATE TABLE players (id INTEGER PRIMARY KEY, team TEXT, score INTEGER)".to_string(),
                columns: vec![
                    ColumnDef {
                        name: "id".into(),
                        declared_type: "INTEGER".into(),
                        ordinal: 0,
                        is_primary_key: true,
                        is_not_null: false,
                    },
                    ColumnDef {
                        name: "team".into(),
                        declared_type: "TEXT".into(),
                        ordinal: 1,
                        is_primary_key: false,
                        is_not_null: false,
                    },
                ],
                without_rowid: false,
                rowid_alias: Some("id".into()),
            },
        );
        schema.indexes.insert(
            "idx_team".to_string(),
            IndexDef {
                name: "idx_team".to_string(),
                table_name: "players".to_string(),
                root_page: 3,
                sql: "CREATE INDEX idx_team ON players (team)".to_string(),
            },
        );
        schema
    }

    #[test]
    fn picks_an_equality_index_over_a_full_scan() {
        let schema = schema_with_indexed_table();
        let views = ViewRegistry::new();
        let intent = parse("SELECT * FROM players WHERE team = 'red'").unwrap();
        let plan = compile(&intent, &schema, &views).unwrap();
        assert!(matches!(plan.cores[0].from, ResolvedFrom::IndexSeek { .. }));
    }

    #[test]
    fn falls_back_to_a_scan_without_a_matching_index() {
        let schema = schema_with_indexed_table();
        let views = ViewRegistry::new();
        let intent = parse("SELECT * FROM players WHERE score > 10").unwrap();
        let plan = compile(&intent, &schema, &views).unwrap();
        assert!(matches!(plan.cores[0].from, ResolvedFrom::Scan { .. }));
    }

    #[test]
    fn plan_cache_hits_on_repeated_identical_intent() {
        let schema = schema_with_indexed_table();
        let views = ViewRegistry::new();
        let cache = PlanCache::new();
        let intent = parse("SELECT * FROM players WHERE team = $t").unwrap();
        let first = cache.get_or_compile(&intent, &schema, &views).unwrap();
        let second = cache.get_or_compile(&intent, &schema, &views).unwrap();
        assert!(Arc::ptr_eq(&first, &second));
    }
}
