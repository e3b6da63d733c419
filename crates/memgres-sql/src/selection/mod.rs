//! Relational operators.
//!
//! A [`Selection`] is an immutable query plan: it exposes a fixed list of
//! output [`Column`]s and can be enumerated any number of times, against any
//! transaction, through a fresh [`Cursor`]. Cursors are lazy: rows are
//! pulled one by one, and operators that need the whole input (sorting,
//! grouping) consume it on their first pull.
//!
//! ```text
//!   SELECT b, count(*) FROM t WHERE a > 1 GROUP BY b ORDER BY 2 DESC LIMIT 3
//!
//!   Limit(3)
//!   └── Project(b, count)
//!       └── Order(count DESC)
//!           └── GroupBy(keys=[b], aggs=[count(*)])
//!               └── Filter(a > 1)
//!                   └── TableScan(t)
//! ```
//!
//! Operators that forward rows unchanged (filter, distinct, order, limit)
//! also forward their source's columns as-is, so an expression compiled
//! against the source is valid against the operator and is recognized as
//! the same computation.

pub mod distinct;
pub mod filter;
pub mod group;
pub mod join;
pub mod limit;
pub mod order;
pub mod project;
pub mod scan;
pub mod union;
pub mod values;

use std::fmt;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use crate::error::SqlResult;
use crate::expr::{EvalContext, Evaluator};
use crate::storage::{Row, TableDef};
use crate::types::Type;

pub use distinct::Distinct;
pub use filter::Filter;
pub use group::{GroupBy, GroupScope};
pub use join::{Join, JoinKind};
pub use limit::Limit;
pub use order::{Order, OrderKey};
pub use project::{Alias, Project};
pub use scan::TableScan;
pub use union::Union;
pub use values::{Materialized, Values};

/// An output column of a selection.
#[derive(Debug, Clone)]
pub struct Column {
    /// Output name.
    pub name: String,
    /// Qualifier usable in `t.col` references.
    pub table: Option<String>,
    /// Reads the column from an output row.
    pub eval: Evaluator,
    /// Excluded from unqualified resolution and from `*` (the right-hand
    /// copy of a `USING` column).
    pub hidden: bool,
}

impl Column {
    /// Creates a visible column.
    pub fn new(name: impl Into<String>, table: Option<String>, eval: Evaluator) -> Self {
        Self {
            name: name.into(),
            table,
            eval,
            hidden: false,
        }
    }

    /// Type of the column.
    pub fn ty(&self) -> &Type {
        self.eval.ty()
    }
}

/// A re-enumerable query plan.
pub trait Selection: fmt::Debug + Send + Sync {
    /// Identity of the rows this selection produces.
    fn id(&self) -> u64;

    /// Output columns, in row order.
    fn columns(&self) -> &[Column];

    /// Starts a new enumeration.
    fn open(&self) -> Box<dyn Cursor + '_>;

    /// The table, when this is a bare table scan.
    fn as_table(&self) -> Option<&Arc<TableDef>> {
        None
    }

    /// True when output column `idx` is a literal constant in every row.
    fn is_literal(&self, _idx: usize) -> bool {
        false
    }
}

/// One enumeration of a selection.
pub trait Cursor {
    /// Pulls the next row.
    fn next(&mut self, ctx: &mut EvalContext<'_>) -> SqlResult<Option<Row>>;
}

/// Allocates a fresh selection identity.
pub fn next_selection_id() -> u64 {
    static NEXT: AtomicU64 = AtomicU64::new(1);
    NEXT.fetch_add(1, Ordering::Relaxed)
}

/// Builds plain column readers for a new row shape.
pub(crate) fn output_columns(
    id: u64,
    shape: impl IntoIterator<Item = (String, Option<String>, Type)>,
) -> Vec<Column> {
    shape
        .into_iter()
        .enumerate()
        .map(|(idx, (name, table, ty))| {
            let sql = match &table {
                Some(t) => format!("{}.{}", t, name),
                None => name.clone(),
            };
            Column::new(name, table, Evaluator::column(id, idx, ty, sql))
        })
        .collect()
}

/// Enumerates a whole selection.
pub fn collect(selection: &dyn Selection, ctx: &mut EvalContext<'_>) -> SqlResult<Vec<Row>> {
    let mut cursor = selection.open();
    let mut rows = Vec::new();
    while let Some(row) = cursor.next(ctx)? {
        rows.push(row);
    }
    Ok(rows)
}

/// Assigns output names: a name is kept the first time it appears; missing
/// and repeated names get a numeric suffix (`column0`, `a0`, ...) unique
/// among all names.
pub fn build_column_ids(suggested: &[Option<String>]) -> Vec<String> {
    use std::collections::HashSet;
    let exists: HashSet<&str> = suggested.iter().flatten().map(String::as_str).collect();
    let mut got: HashSet<String> = HashSet::new();
    let mut cid = 0;
    suggested
        .iter()
        .map(|name| {
            if let Some(n) = name {
                if got.insert(n.clone()) {
                    return n.clone();
                }
            }
            let base = name.as_deref().unwrap_or("column");
            loop {
                let candidate = format!("{}{}", base, cid);
                cid += 1;
                if !exists.contains(candidate.as_str()) && !got.contains(&candidate) {
                    got.insert(candidate.clone());
                    return candidate;
                }
            }
        })
        .collect()
}
