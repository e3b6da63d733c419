//! `GROUP BY` and aggregation.
//!
//! Grouped queries compile their select list, `HAVING` and `ORDER BY` in a
//! [`GroupScope`]: column references resolve against the ungrouped source,
//! aggregate calls are registered with the scope, and once an expression is
//! complete every sub-expression equal to a grouping key is replaced by a
//! read of that key from the group row.
//!
//! ```text
//!   group row = [ key_0 .. key_n | agg_0 .. agg_m ]
//! ```

use std::cell::RefCell;
use std::collections::BTreeMap;
use std::sync::Arc;

use tracing::trace;

use crate::error::{SqlError, SqlResult};
use crate::expr::{Accumulator, AggregateCall, EvalContext, Evaluator, Op, Scope};
use crate::selection::Column;
use crate::storage::Row;
use crate::types::compare::canonical;
use crate::types::{SortKey, Value};

use super::{next_selection_id, Cursor, Selection};

// ============================================================================
// Scope
// ============================================================================

/// Name resolution for grouped queries.
pub struct GroupScope<'a> {
    id: u64,
    source: &'a dyn Scope,
    keys: Vec<Evaluator>,
    aggregates: RefCell<Vec<AggregateCall>>,
}

impl<'a> GroupScope<'a> {
    /// Creates a scope grouping `source` by `keys` (compiled against the
    /// source).
    pub fn new(source: &'a dyn Scope, keys: Vec<Evaluator>) -> Self {
        Self {
            id: next_selection_id(),
            source,
            keys,
            aggregates: RefCell::new(Vec::new()),
        }
    }

    /// Identity of the group rows.
    pub fn id(&self) -> u64 {
        self.id
    }

    /// Number of aggregate calls registered so far.
    pub fn aggregate_count(&self) -> usize {
        self.aggregates.borrow().len()
    }

    /// Builds the grouping operator over `source`, with every aggregate
    /// registered while compiling.
    pub fn into_selection(self, source: Arc<dyn Selection>) -> GroupBy {
        GroupBy {
            id: self.id,
            source,
            keys: self.keys,
            aggregates: self.aggregates.into_inner(),
            columns: Vec::new(),
        }
    }

    fn rewrite(&self, e: &Evaluator) -> Evaluator {
        let id = self.id;
        let keys = &self.keys;
        e.map(&mut |node| {
            if node.is_constant() {
                return None;
            }
            keys.iter().position(|k| k.hash() == node.hash()).map(|i| {
                Evaluator::column(id, i, node.ty().clone(), node.sql())
            })
        })
    }
}

impl Scope for GroupScope<'_> {
    fn column(&self, qualifier: Option<&str>, name: &str) -> SqlResult<Option<Evaluator>> {
        self.source.column(qualifier, name)
    }

    fn has_qualifier(&self, qualifier: &str) -> bool {
        self.source.has_qualifier(qualifier)
    }

    fn star(&self, qualifier: Option<&str>) -> Vec<Column> {
        self.source.star(qualifier)
    }

    fn aggregate_source(&self) -> Option<&dyn Scope> {
        Some(self.source)
    }

    fn register_aggregate(&self, call: AggregateCall) -> SqlResult<Evaluator> {
        let mut aggregates = self.aggregates.borrow_mut();
        let position = match aggregates.iter().position(|a| a.hash == call.hash) {
            Some(p) => p,
            None => {
                aggregates.push(call.clone());
                aggregates.len() - 1
            }
        };
        let sql = match &call.arg {
            Some(arg) => format!("{}({})", call.func.name(), arg.sql()),
            None => format!("{}(*)", call.func.name()),
        };
        Ok(Evaluator::column(
            self.id,
            self.keys.len() + position,
            call.ty.clone(),
            sql,
        ))
    }

    fn finish(&self, e: Evaluator) -> SqlResult<Evaluator> {
        let rewritten = self.rewrite(&e);
        let mut stray = None;
        rewritten.walk(&mut |node| {
            if let Op::Column { origin, .. } = node.op() {
                if *origin != self.id && stray.is_none() {
                    stray = Some(node.sql().to_string());
                }
            }
        });
        match stray {
            Some(column) => Err(SqlError::query(format!(
                "column \"{}\" must appear in the GROUP BY clause or be used in an aggregate function",
                column
            ))),
            None => Ok(rewritten),
        }
    }
}

// ============================================================================
// Operator
// ============================================================================

/// Partitions source rows by key and computes aggregates per partition.
///
/// Without keys, all rows form one group, which exists even when the source
/// is empty.
#[derive(Debug)]
pub struct GroupBy {
    id: u64,
    source: Arc<dyn Selection>,
    keys: Vec<Evaluator>,
    aggregates: Vec<AggregateCall>,
    columns: Vec<Column>,
}

impl GroupBy {
    /// Grouping keys.
    pub fn keys(&self) -> &[Evaluator] {
        &self.keys
    }

    /// Aggregate calls.
    pub fn aggregates(&self) -> &[AggregateCall] {
        &self.aggregates
    }

    fn compute(&self, ctx: &mut EvalContext<'_>) -> SqlResult<Vec<Row>> {
        let mut index: BTreeMap<SortKey, usize> = BTreeMap::new();
        let mut groups: Vec<(Row, Vec<Accumulator>)> = Vec::new();
        let mut cursor = self.source.open();
        while let Some(row) = cursor.next(ctx)? {
            let key_values = self
                .keys
                .iter()
                .map(|k| k.get(&row, ctx))
                .collect::<SqlResult<Row>>()?;
            let sort_key = SortKey(
                self.keys
                    .iter()
                    .zip(&key_values)
                    .map(|(k, v)| canonical(k.ty(), v))
                    .collect(),
            );
            let slot = match index.get(&sort_key) {
                Some(slot) => *slot,
                None => {
                    groups.push((key_values, self.aggregates.iter().map(Accumulator::new).collect()));
                    index.insert(sort_key, groups.len() - 1);
                    groups.len() - 1
                }
            };
            for (call, acc) in self.aggregates.iter().zip(groups[slot].1.iter_mut()) {
                let value = match &call.arg {
                    Some(arg) => arg.get(&row, ctx)?,
                    None => Value::Null,
                };
                acc.accumulate(value)?;
            }
        }
        if groups.is_empty() && self.keys.is_empty() {
            groups.push((Vec::new(), self.aggregates.iter().map(Accumulator::new).collect()));
        }
        trace!(groups = groups.len(), "grouped");
        Ok(groups
            .into_iter()
            .map(|(mut key, accumulators)| {
                for (call, acc) in self.aggregates.iter().zip(accumulators) {
                    key.push(acc.finish(call.separator.as_deref()));
                }
                key
            })
            .collect())
    }
}

impl Selection for GroupBy {
    fn id(&self) -> u64 {
        self.id
    }

    /// Group rows are only read through expressions compiled in the
    /// [`GroupScope`] that built this operator.
    fn columns(&self) -> &[Column] {
        &self.columns
    }

    fn open(&self) -> Box<dyn Cursor + '_> {
        Box::new(GroupCursor {
            group: self,
            rows: None,
        })
    }
}

struct GroupCursor<'s> {
    group: &'s GroupBy,
    rows: Option<std::vec::IntoIter<Row>>,
}

impl Cursor for GroupCursor<'_> {
    fn next(&mut self, ctx: &mut EvalContext<'_>) -> SqlResult<Option<Row>> {
        if self.rows.is_none() {
            self.rows = Some(self.group.compute(ctx)?.into_iter());
        }
        Ok(self.rows.as_mut().and_then(Iterator::next))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::expr::{AggregateFunc, ColumnScope};
    use crate::selection::tests::{ints, Fixture};
    use crate::types::Type;

    #[test]
    fn test_group_by_key_with_count() {
        let mut f = Fixture::new(
            &[("a", Type::integer()), ("b", Type::integer())],
            vec![ints(&[1, 10]), ints(&[2, 20]), ints(&[1, 30])],
        );
        let scan: Arc<dyn Selection> = Arc::new(f.scan());
        let source = ColumnScope::of(scan.as_ref());
        let a = source.column(None, "a").unwrap().unwrap();
        let b = source.column(None, "b").unwrap().unwrap();
        let scope = GroupScope::new(&source, vec![a.clone()]);

        let sum = scope
            .register_aggregate(AggregateCall {
                func: AggregateFunc::Sum,
                arg: Some(b.clone()),
                separator: None,
                distinct: false,
                ty: Type::integer(),
                hash: 1,
            })
            .unwrap();
        assert_eq!(sum.column_index(), Some(1));
        let key = scope.finish(a).unwrap();
        assert_eq!(key.column_index(), Some(0));
        let err = scope.finish(b).unwrap_err();
        assert!(err.to_string().contains("must appear in the GROUP BY clause"));

        let group = scope.into_selection(scan);
        assert_eq!(f.run(&group), vec![ints(&[1, 40]), ints(&[2, 20])]);
    }

    #[test]
    fn test_empty_source_single_group() {
        let mut f = Fixture::new(&[("a", Type::integer())], vec![]);
        let scan: Arc<dyn Selection> = Arc::new(f.scan());
        let source = ColumnScope::of(scan.as_ref());
        let scope = GroupScope::new(&source, vec![]);
        scope
            .register_aggregate(AggregateCall {
                func: AggregateFunc::CountStar,
                arg: None,
                separator: None,
                distinct: false,
                ty: Type::integer(),
                hash: 7,
            })
            .unwrap();
        let group = scope.into_selection(scan);
        assert_eq!(f.run(&group), vec![ints(&[0])]);
    }
}
