//! Joins.
//!
//! Output rows are the left row followed by the right row. The side driving
//! the loop (left, or right for `RIGHT JOIN`) is pulled lazily; the other
//! side is read once per enumeration, or looked up through an index when the
//! condition is an equality on an indexed column of a bare table.

use std::sync::Arc;

use tracing::trace;

use crate::error::SqlResult;
use crate::expr::{BinaryOp, EvalContext, Evaluator, Op};
use crate::storage::{table_data, Row, TableDef};
use crate::types::Value;

use super::{collect, next_selection_id, Column, Cursor, Selection};

/// Join flavours.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum JoinKind {
    /// `INNER JOIN` / `JOIN`.
    Inner,
    /// `LEFT [OUTER] JOIN`.
    Left,
    /// `RIGHT [OUTER] JOIN`.
    Right,
    /// `FULL [OUTER] JOIN`.
    Full,
    /// `CROSS JOIN` / `FROM a, b`.
    Cross,
}

#[derive(Debug)]
struct IndexLookup {
    table: Arc<TableDef>,
    index: u32,
    /// Key computed from the left row.
    key: Evaluator,
}

/// Combines two selections.
#[derive(Debug)]
pub struct Join {
    id: u64,
    left: Arc<dyn Selection>,
    right: Arc<dyn Selection>,
    kind: JoinKind,
    condition: Option<Evaluator>,
    columns: Vec<Column>,
    lookup: Option<IndexLookup>,
}

impl Join {
    /// Creates a join without condition. Left columns are forwarded as-is;
    /// right columns are re-read at their position in the combined row.
    pub fn new(left: Arc<dyn Selection>, right: Arc<dyn Selection>, kind: JoinKind) -> Self {
        let id = next_selection_id();
        let offset = left.columns().len();
        let mut columns = left.columns().to_vec();
        columns.extend(right.columns().iter().enumerate().map(|(j, c)| Column {
            name: c.name.clone(),
            table: c.table.clone(),
            eval: Evaluator::column(id, offset + j, c.ty().clone(), c.eval.sql()),
            hidden: c.hidden,
        }));
        Self {
            id,
            left,
            right,
            kind,
            condition: None,
            columns,
            lookup: None,
        }
    }

    /// Hides the right-hand column `name` from unqualified resolution and
    /// from `*`, as `USING` does.
    pub fn hide_right(&mut self, name: &str) {
        let offset = self.left.columns().len();
        for c in self.columns[offset..].iter_mut().filter(|c| c.name == name) {
            c.hidden = true;
        }
    }

    /// Sets the join condition, compiled against this join's columns.
    #[must_use]
    pub fn with_condition(mut self, condition: Evaluator) -> Self {
        self.lookup = self.index_lookup(&condition);
        if self.lookup.is_some() {
            trace!(join = self.id, "join through index");
        }
        self.condition = Some(condition);
        self
    }

    /// Join flavour.
    pub fn kind(&self) -> JoinKind {
        self.kind
    }

    fn index_lookup(&self, condition: &Evaluator) -> Option<IndexLookup> {
        if !matches!(self.kind, JoinKind::Inner | JoinKind::Left) {
            return None;
        }
        let table = self.right.as_table()?;
        let Op::Compare {
            op: BinaryOp::Eq,
            left,
            right,
            ty,
        } = condition.op()
        else {
            return None;
        };
        let offset = self.left.columns().len();
        let right_column = |e: &Evaluator| match e.op() {
            Op::Column { origin, idx } if *origin == self.id && *idx >= offset => Some(idx - offset),
            _ => None,
        };
        let left_only = |e: &Evaluator| e.columns_used().iter().all(|i| *i < offset);
        let (column, key) = match (right_column(left), right_column(right)) {
            (Some(c), None) if left_only(right) => (c, right.clone()),
            (None, Some(c)) if left_only(left) => (c, left.clone()),
            _ => return None,
        };
        if table.columns.get(column).map(|c| &c.ty) != Some(ty) {
            return None;
        }
        let index = table.indexes.iter().find(|i| i.columns == [column])?;
        Some(IndexLookup {
            table: table.clone(),
            index: index.id,
            key,
        })
    }
}

impl Selection for Join {
    fn id(&self) -> u64 {
        self.id
    }

    fn columns(&self) -> &[Column] {
        &self.columns
    }

    fn open(&self) -> Box<dyn Cursor + '_> {
        let swapped = self.kind == JoinKind::Right;
        let (outer, inner) = if swapped {
            (&self.right, &self.left)
        } else {
            (&self.left, &self.right)
        };
        Box::new(JoinCursor {
            join: self,
            swapped,
            outer: outer.open(),
            inner: inner.as_ref(),
            inner_rows: None,
            current: None,
            candidates: Vec::new(),
            position: 0,
            matched: false,
            inner_matched: Vec::new(),
            leftovers: None,
        })
    }
}

struct JoinCursor<'s> {
    join: &'s Join,
    swapped: bool,
    outer: Box<dyn Cursor + 's>,
    inner: &'s dyn Selection,
    /// Inner side, read on first use.
    inner_rows: Option<Vec<Row>>,
    current: Option<Row>,
    /// Inner rows to try against `current`, as positions in `inner_rows`
    /// or as rows fetched through the index.
    candidates: Vec<Candidate>,
    position: usize,
    matched: bool,
    /// For `FULL JOIN`: inner rows that matched at least once.
    inner_matched: Vec<bool>,
    /// For `FULL JOIN`: position in the unmatched inner rows phase.
    leftovers: Option<usize>,
}

enum Candidate {
    Position(usize),
    Fetched(Row),
}

impl JoinCursor<'_> {
    fn combine(&self, outer: &[Value], inner: &[Value]) -> Row {
        let (l, r) = if self.swapped {
            (inner, outer)
        } else {
            (outer, inner)
        };
        l.iter().chain(r.iter()).cloned().collect()
    }

    fn nulls(count: usize) -> Vec<Value> {
        vec![Value::Null; count]
    }

    fn load_inner(&mut self, ctx: &mut EvalContext<'_>) -> SqlResult<()> {
        if self.inner_rows.is_none() && self.join.lookup.is_none() {
            let rows = collect(self.inner, ctx)?;
            self.inner_matched = vec![false; rows.len()];
            self.inner_rows = Some(rows);
        }
        Ok(())
    }

    fn candidates_for(&self, outer: &Row, ctx: &mut EvalContext<'_>) -> SqlResult<Vec<Candidate>> {
        if let Some(lookup) = &self.join.lookup {
            let key = lookup.key.get(outer, ctx)?;
            if key.is_null() {
                return Ok(Vec::new());
            }
            let Some(data) = table_data(ctx.data, lookup.table.id) else {
                return Ok(Vec::new());
            };
            let ids = data.lookup(&lookup.table, lookup.index, &[key]);
            return Ok(ids
                .iter()
                .filter_map(|id| data.get(*id).cloned())
                .map(Candidate::Fetched)
                .collect());
        }
        let count = self.inner_rows.as_ref().map_or(0, Vec::len);
        Ok((0..count).map(Candidate::Position).collect())
    }

    fn next_leftover(&mut self) -> Option<Row> {
        let rows = self.inner_rows.as_ref()?;
        let start = self.leftovers?;
        let outer_width = self.inner.columns().len();
        let outer_width = self.join.columns.len() - outer_width;
        for i in start..rows.len() {
            if !self.inner_matched.get(i).copied().unwrap_or(true) {
                self.leftovers = Some(i + 1);
                return Some(self.combine(&Self::nulls(outer_width), &rows[i]));
            }
        }
        self.leftovers = Some(rows.len());
        None
    }
}

impl Cursor for JoinCursor<'_> {
    fn next(&mut self, ctx: &mut EvalContext<'_>) -> SqlResult<Option<Row>> {
        if self.leftovers.is_some() {
            return Ok(self.next_leftover());
        }
        self.load_inner(ctx)?;
        loop {
            let Some(outer) = self.current.clone() else {
                match self.outer.next(ctx)? {
                    Some(row) => {
                        self.candidates = self.candidates_for(&row, ctx)?;
                        self.position = 0;
                        self.matched = false;
                        self.current = Some(row);
                        continue;
                    }
                    None if self.join.kind == JoinKind::Full => {
                        self.leftovers = Some(0);
                        return Ok(self.next_leftover());
                    }
                    None => return Ok(None),
                }
            };

            while self.position < self.candidates.len() {
                let candidate = &self.candidates[self.position];
                self.position += 1;
                let (inner, slot) = match candidate {
                    Candidate::Fetched(row) => (row.clone(), None),
                    Candidate::Position(i) => match self.inner_rows.as_ref().and_then(|r| r.get(*i)) {
                        Some(row) => (row.clone(), Some(*i)),
                        None => continue,
                    },
                };
                let combined = self.combine(&outer, &inner);
                let keep = match &self.join.condition {
                    Some(c) => c.is_true(&combined, ctx)?,
                    None => true,
                };
                if keep {
                    self.matched = true;
                    if let Some(flag) = slot.and_then(|i| self.inner_matched.get_mut(i)) {
                        *flag = true;
                    }
                    return Ok(Some(combined));
                }
            }

            self.current = None;
            if !self.matched && self.join.kind != JoinKind::Inner && self.join.kind != JoinKind::Cross {
                let width = self.inner.columns().len();
                return Ok(Some(self.combine(&outer, &Self::nulls(width))));
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::selection::tests::{ints, Fixture};
    use crate::selection::values::Materialized;
    use crate::selection::output_columns;
    use crate::types::Type;

    fn right_side(rows: Vec<Row>) -> Arc<dyn Selection> {
        let id = next_selection_id();
        let columns = output_columns(
            id,
            vec![
                ("id".to_string(), Some("r".to_string()), Type::integer()),
                ("v".to_string(), Some("r".to_string()), Type::integer()),
            ],
        );
        Arc::new(Materialized::new(id, columns, rows))
    }

    fn on_ids(join: &Join) -> Evaluator {
        let l = join.columns()[0].eval.clone();
        let r = join.columns()[1].eval.clone();
        Evaluator::new(
            Op::Compare {
                op: BinaryOp::Eq,
                left: l,
                right: r,
                ty: Type::integer(),
            },
            Type::bool(),
            "t.a = r.id",
        )
    }

    #[test]
    fn test_left_join_pads_with_nulls() {
        let mut f = Fixture::new(&[("a", Type::integer())], vec![ints(&[1]), ints(&[2])]);
        let left: Arc<dyn Selection> = Arc::new(f.scan());
        let right = right_side(vec![ints(&[1, 10]), ints(&[1, 11])]);
        let join = Join::new(left, right, JoinKind::Left);
        let on = on_ids(&join);
        let join = join.with_condition(on);
        assert_eq!(
            f.run(&join),
            vec![
                ints(&[1, 1, 10]),
                ints(&[1, 1, 11]),
                vec![Value::Int(2), Value::Null, Value::Null],
            ]
        );
    }

    #[test]
    fn test_right_and_full_join() {
        let mut f = Fixture::new(&[("a", Type::integer())], vec![ints(&[1]), ints(&[2])]);
        let left: Arc<dyn Selection> = Arc::new(f.scan());
        let right = right_side(vec![ints(&[1, 10]), ints(&[3, 30])]);

        let join = Join::new(left.clone(), right.clone(), JoinKind::Right);
        let on = on_ids(&join);
        let join = join.with_condition(on);
        assert_eq!(
            f.run(&join),
            vec![ints(&[1, 1, 10]), vec![Value::Null, Value::Int(3), Value::Int(30)]]
        );

        let join = Join::new(left, right, JoinKind::Full);
        let on = on_ids(&join);
        let join = join.with_condition(on);
        assert_eq!(
            f.run(&join),
            vec![
                ints(&[1, 1, 10]),
                vec![Value::Int(2), Value::Null, Value::Null],
                vec![Value::Null, Value::Int(3), Value::Int(30)],
            ]
        );
    }

    #[test]
    fn test_cross_join() {
        let mut f = Fixture::new(&[("a", Type::integer())], vec![ints(&[1]), ints(&[2])]);
        let left: Arc<dyn Selection> = Arc::new(f.scan());
        let right = right_side(vec![ints(&[7, 8])]);
        let join = Join::new(left, right, JoinKind::Cross);
        assert_eq!(f.run(&join), vec![ints(&[1, 7, 8]), ints(&[2, 7, 8])]);
    }
}
