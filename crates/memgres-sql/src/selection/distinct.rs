//! `DISTINCT` and `DISTINCT ON`.

use std::collections::BTreeSet;
use std::sync::Arc;

use crate::error::SqlResult;
use crate::expr::{EvalContext, Evaluator};
use crate::storage::Row;
use crate::types::compare::canonical;
use crate::types::SortKey;

use super::{next_selection_id, Column, Cursor, Selection};

/// Drops rows whose key was already seen, keeping the first one.
#[derive(Debug)]
pub struct Distinct {
    id: u64,
    source: Arc<dyn Selection>,
    /// `None` compares whole rows.
    keys: Option<Vec<Evaluator>>,
}

impl Distinct {
    /// Deduplicates whole rows.
    pub fn rows(source: Arc<dyn Selection>) -> Self {
        Self {
            id: next_selection_id(),
            source,
            keys: None,
        }
    }

    /// Deduplicates by `keys`, compiled against the source.
    pub fn on(source: Arc<dyn Selection>, keys: Vec<Evaluator>) -> Self {
        Self {
            id: next_selection_id(),
            source,
            keys: Some(keys),
        }
    }
}

impl Selection for Distinct {
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
        Box::new(DistinctCursor {
            distinct: self,
            source: self.source.open(),
            seen: BTreeSet::new(),
        })
    }
}

struct DistinctCursor<'s> {
    distinct: &'s Distinct,
    source: Box<dyn Cursor + 's>,
    seen: BTreeSet<SortKey>,
}

impl DistinctCursor<'_> {
    fn key(&self, row: &Row, ctx: &mut EvalContext<'_>) -> SqlResult<SortKey> {
        let values = match &self.distinct.keys {
            Some(keys) => keys
                .iter()
                .map(|k| Ok(canonical(k.ty(), &k.get(row, ctx)?)))
                .collect::<SqlResult<Vec<_>>>()?,
            None => self
                .distinct
                .source
                .columns()
                .iter()
                .zip(row)
                .map(|(c, v)| canonical(c.ty(), v))
                .collect(),
        };
        Ok(SortKey(values))
    }
}

impl Cursor for DistinctCursor<'_> {
    fn next(&mut self, ctx: &mut EvalContext<'_>) -> SqlResult<Option<Row>> {
        while let Some(row) = self.source.next(ctx)? {
            let key = self.key(&row, ctx)?;
            if self.seen.insert(key) {
                return Ok(Some(row));
            }
        }
        Ok(None)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::selection::tests::{ints, Fixture};
    use crate::types::{Type, Value};

    #[test]
    fn test_distinct_rows_and_on() {
        let mut f = Fixture::new(
            &[("a", Type::integer()), ("b", Type::text())],
            vec![
                vec![Value::Int(1), Value::text("x")],
                vec![Value::Int(1), Value::text("y")],
                vec![Value::Int(1), Value::text("x")],
                vec![Value::Int(2), Value::text("z")],
            ],
        );
        let scan: Arc<dyn Selection> = Arc::new(f.scan());
        assert_eq!(f.run(&Distinct::rows(scan.clone())).len(), 3);

        let a = scan.columns()[0].eval.clone();
        let on = Distinct::on(scan, vec![a]);
        assert_eq!(
            f.run(&on),
            vec![
                vec![Value::Int(1), Value::text("x")],
                vec![Value::Int(2), Value::text("z")],
            ]
        );
    }

    #[test]
    fn test_distinct_nulls_are_equal() {
        let mut f = Fixture::new(
            &[("a", Type::integer())],
            vec![vec![Value::Null], vec![Value::Null], ints(&[1])],
        );
        let scan: Arc<dyn Selection> = Arc::new(f.scan());
        assert_eq!(f.run(&Distinct::rows(scan)).len(), 2);
    }
}
