//! The structural, cache-keyable shape a parsed statement is reduced to.
//!
//! `Intent` is deliberately separate from the `pest` parse tree: two
//! textually different statements (`WHERE score > $min` bound to `7` vs.
//! `WHERE score > 7` typed literally) normalize to the same `Intent`
//! modulo bind-parameter names, so the plan cache (`query::planner`) can
//! hit on repeated prepared-statement execution without re-parsing or
//! re-selecting an index every time.

use crate::query::ast::Expr;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum QueryHint {
    Cached,
    Jit,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CompoundOp {
    Union,
    UnionAll,
    Intersect,
    Except,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AggFunc {
    Count,
    Sum,
    Avg,
    Min,
    Max,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum AggArg {
    Star,
    Column(String),
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ProjectionItem {
    Star,
    Column { table: Option<String>, name: String, alias: Option<String> },
    Agg { func: AggFunc, arg: AggArg, alias: Option<String> },
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TableRef {
    pub name: String,
    pub alias: Option<String>,
}

impl TableRef {
    /// The name a column qualifier or a downstream row-label refers to
    /// this table by: the alias if one was given, the table name otherwise.
    pub fn binding_name(&self) -> &str {
        self.alias.as_deref().unwrap_or(&self.name)
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum FromSpec {
    Table(TableRef),
    Join {
        left: TableRef,
        right: TableRef,
        left_column: String,
        right_column: String,
    },
}

#[derive(Debug, Clone, PartialEq)]
pub struct OrderKey {
    pub column: String,
    pub descending: bool,
}

#[derive(Debug, Clone, PartialEq)]
pub struct SelectCore {
    pub distinct: bool,
    pub projection: Vec<ProjectionItem>,
    pub from: FromSpec,
    pub filter: Option<Expr>,
    pub group_by: Vec<String>,
    pub having: Option<Expr>,
}

#[derive(Debug, Clone, PartialEq)]
pub struct NamedSubquery {
    pub name: String,
    pub intent: Box<Intent>,
}

/// A fully-parsed statement, normalized to the shape the planner consumes.
/// `ORDER BY`/`LIMIT`/`OFFSET` bind to the statement as a whole (SQLite's
/// own rule for a compound `SELECT`), so they live here rather than on
/// each `SelectCore`.
#[derive(Debug, Clone, PartialEq)]
pub struct Intent {
    pub explain: bool,
    pub hint: Option<QueryHint>,
    pub ctes: Vec<NamedSubquery>,
    pub cores: Vec<SelectCore>,
    pub compound_ops: Vec<CompoundOp>,
    pub order_by: Vec<OrderKey>,
    pub limit: Option<i64>,
    pub offset: Option<i64>,
}

impl Intent {
    /// A single `SelectCore` and no compound operators -- the common case.
    pub fn is_simple(&self) -> bool {
        self.cores.len() == 1
    }

    /// A normalized string key for the plan cache: two intents that are
    /// structurally identical (same shape, same literals, differing only
    /// in which bind-parameter names feed which slot) produce the same
    /// key, since `Expr::Param` carries no literal value to vary the
    /// `Debug` rendering. `Intent` itself can't derive `Eq`/`Hash`
    /// directly (its `Expr` tree holds `f64` literals), so the cache
    /// keys on this rendering rather than the struct itself.
    pub fn cache_key(&self) -> String {
        format!("{self:?}")
    }
}
