//! `UNION [ALL]`.

use std::collections::BTreeSet;
use std::sync::Arc;

use crate::error::{SqlError, SqlResult};
use crate::expr::EvalContext;
use crate::storage::Row;
use crate::types::compare::canonical;
use crate::types::SortKey;

use super::{next_selection_id, output_columns, Column, Cursor, Selection};

/// Rows of `left` followed by rows of `right`, deduplicated unless `ALL`.
#[derive(Debug)]
pub struct Union {
    id: u64,
    left: Arc<dyn Selection>,
    right: Arc<dyn Selection>,
    all: bool,
    columns: Vec<Column>,
}

impl Union {
    /// Creates a union. Both sides must have the same column types; names
    /// come from the left side.
    pub fn new(left: Arc<dyn Selection>, right: Arc<dyn Selection>, all: bool) -> SqlResult<Self> {
        let (l, r) = (left.columns(), right.columns());
        if l.len() != r.len() {
            return Err(SqlError::query(
                "each UNION query must have the same number of columns",
            ));
        }
        if let Some((a, b)) = l.iter().zip(r).find(|(a, b)| a.ty() != b.ty()) {
            return Err(SqlError::cast(b.ty().kind(), a.ty().kind()));
        }
        let id = next_selection_id();
        let columns = output_columns(id, l.iter().map(|c| (c.name.clone(), None, c.ty().clone())));
        Ok(Self {
            id,
            left,
            right,
            all,
            columns,
        })
    }
}

impl Selection for Union {
    fn id(&self) -> u64 {
        self.id
    }

    fn columns(&self) -> &[Column] {
        &self.columns
    }

    fn open(&self) -> Box<dyn Cursor + '_> {
        Box::new(UnionCursor {
            union: self,
            current: self.left.open(),
            on_right: false,
            seen: BTreeSet::new(),
        })
    }
}

struct UnionCursor<'s> {
    union: &'s Union,
    current: Box<dyn Cursor + 's>,
    on_right: bool,
    seen: BTreeSet<SortKey>,
}

impl Cursor for UnionCursor<'_> {
    fn next(&mut self, ctx: &mut EvalContext<'_>) -> SqlResult<Option<Row>> {
        loop {
            let Some(row) = self.current.next(ctx)? else {
                if self.on_right {
                    return Ok(None);
                }
                self.on_right = true;
                self.current = self.union.right.open();
                continue;
            };
            if self.union.all {
                return Ok(Some(row));
            }
            let key = SortKey(
                self.union
                    .columns
                    .iter()
                    .zip(&row)
                    .map(|(c, v)| canonical(c.ty(), v))
                    .collect(),
            );
            if self.seen.insert(key) {
                return Ok(Some(row));
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::selection::tests::{ints, Fixture};
    use crate::selection::Materialized;
    use crate::types::Type;

    fn side(rows: Vec<Row>) -> Arc<dyn Selection> {
        Arc::new(Materialized::from_rows(vec!["a".into()], vec![Type::integer()], rows))
    }

    #[test]
    fn test_union_dedupes_unless_all() {
        let mut f = Fixture::new(&[], vec![]);
        let l = side(vec![ints(&[1]), ints(&[2]), ints(&[1])]);
        let r = side(vec![ints(&[2]), ints(&[3])]);
        let u = Union::new(l.clone(), r.clone(), false).unwrap();
        assert_eq!(f.run(&u), vec![ints(&[1]), ints(&[2]), ints(&[3])]);
        let u = Union::new(l, r, true).unwrap();
        assert_eq!(f.run(&u).len(), 5);
    }

    #[test]
    fn test_union_shape_mismatch() {
        let l = side(vec![]);
        let r: Arc<dyn Selection> = Arc::new(Materialized::from_rows(
            vec!["a".into(), "b".into()],
            vec![Type::integer(), Type::integer()],
            vec![],
        ));
        assert!(Union::new(l, r, false).is_err());
    }
}
