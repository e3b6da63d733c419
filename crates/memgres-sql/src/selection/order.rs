//! `ORDER BY`.

use std::cmp::Ordering;
use std::sync::Arc;

use crate::error::SqlResult;
use crate::expr::{EvalContext, Evaluator};
use crate::storage::Row;
use crate::types::compare::compare;
use crate::types::Value;

use super::{next_selection_id, Column, Cursor, Selection};

/// One sort criterion.
#[derive(Debug, Clone)]
pub struct OrderKey {
    /// Sorted expression.
    pub eval: Evaluator,
    /// Descending order.
    pub desc: bool,
    /// Explicit `NULLS FIRST` / `NULLS LAST`. By default NULL sorts as the
    /// smallest value: first ascending, last descending.
    pub nulls_first: Option<bool>,
}

impl OrderKey {
    /// Ascending key with default null placement.
    pub fn asc(eval: Evaluator) -> Self {
        Self {
            eval,
            desc: false,
            nulls_first: None,
        }
    }

    fn cmp(&self, a: &Value, b: &Value) -> Ordering {
        let nulls_first = self.nulls_first.unwrap_or(!self.desc);
        match (a.is_null(), b.is_null()) {
            (true, true) => Ordering::Equal,
            (true, false) if nulls_first => Ordering::Less,
            (true, false) => Ordering::Greater,
            (false, true) if nulls_first => Ordering::Greater,
            (false, true) => Ordering::Less,
            (false, false) => {
                let ord = compare(self.eval.ty(), a, b).unwrap_or(Ordering::Equal);
                if self.desc {
                    ord.reverse()
                } else {
                    ord
                }
            }
        }
    }
}

/// Stable sort of the source rows.
#[derive(Debug)]
pub struct Order {
    id: u64,
    source: Arc<dyn Selection>,
    keys: Vec<OrderKey>,
}

impl Order {
    /// Sorts `source` by `keys`, compiled against the source.
    pub fn new(source: Arc<dyn Selection>, keys: Vec<OrderKey>) -> Self {
        Self {
            id: next_selection_id(),
            source,
            keys,
        }
    }

    fn sorted(&self, ctx: &mut EvalContext<'_>) -> SqlResult<Vec<Row>> {
        let mut keyed = Vec::new();
        let mut cursor = self.source.open();
        while let Some(row) = cursor.next(ctx)? {
            let key = self
                .keys
                .iter()
                .map(|k| k.eval.get(&row, ctx))
                .collect::<SqlResult<Vec<_>>>()?;
            keyed.push((key, row));
        }
        keyed.sort_by(|(a, _), (b, _)| {
            self.keys
                .iter()
                .zip(a.iter().zip(b.iter()))
                .map(|(k, (x, y))| k.cmp(x, y))
                .find(|o| o.is_ne())
                .unwrap_or(Ordering::Equal)
        });
        Ok(keyed.into_iter().map(|(_, row)| row).collect())
    }
}

impl Selection for Order {
    fn id(&self) -> u64 {
        self.id
    }

    fn columns(&self) -> &[Column] {
        self.source.columns()
    }

    fn is_literal(&self, idx: usize) -> bool {
        self.source.is_literal(idx)
    }

    fn open(&self) -> Box<dyn Cursor + '_> {
        Box::new(OrderCursor {
            order: self,
            rows: None,
        })
    }
}

struct OrderCursor<'s> {
    order: &'s Order,
    rows: Option<std::vec::IntoIter<Row>>,
}

impl Cursor for OrderCursor<'_> {
    fn next(&mut self, ctx: &mut EvalContext<'_>) -> SqlResult<Option<Row>> {
        if self.rows.is_none() {
            self.rows = Some(self.order.sorted(ctx)?.into_iter());
        }
        Ok(self.rows.as_mut().and_then(Iterator::next))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::selection::tests::{ints, Fixture};
    use crate::types::Type;

    #[test]
    fn test_order_is_stable_with_null_placement() {
        let mut f = Fixture::new(
            &[("a", Type::integer()), ("b", Type::integer())],
            vec![
                ints(&[2, 1]),
                vec![Value::Null, Value::Int(2)],
                ints(&[1, 3]),
                ints(&[2, 4]),
            ],
        );
        let scan: Arc<dyn Selection> = Arc::new(f.scan());
        let a = scan.columns()[0].eval.clone();

        let asc = Order::new(scan.clone(), vec![OrderKey::asc(a.clone())]);
        let b: Vec<Value> = f.run(&asc).into_iter().map(|r| r[1].clone()).collect();
        assert_eq!(b, ints(&[2, 3, 1, 4]));

        let desc = Order::new(
            scan.clone(),
            vec![OrderKey {
                eval: a.clone(),
                desc: true,
                nulls_first: None,
            }],
        );
        let b: Vec<Value> = f.run(&desc).into_iter().map(|r| r[1].clone()).collect();
        assert_eq!(b, ints(&[1, 4, 3, 2]));

        let nulls_last = Order::new(
            scan,
            vec![OrderKey {
                eval: a,
                desc: false,
                nulls_first: Some(false),
            }],
        );
        let b: Vec<Value> = f.run(&nulls_last).into_iter().map(|r| r[1].clone()).collect();
        assert_eq!(b, ints(&[3, 1, 4, 2]));
    }
}
