//! `LIMIT` / `OFFSET`.

use std::sync::Arc;

use crate::error::SqlResult;
use crate::expr::EvalContext;
use crate::storage::Row;

use super::{next_selection_id, Column, Cursor, Selection};

/// Skips `offset` rows then yields at most `limit` rows.
#[derive(Debug)]
pub struct Limit {
    id: u64,
    source: Arc<dyn Selection>,
    limit: Option<usize>,
    offset: usize,
}

impl Limit {
    /// Creates the operator.
    pub fn new(source: Arc<dyn Selection>, limit: Option<usize>, offset: usize) -> Self {
        Self {
            id: next_selection_id(),
            source,
            limit,
            offset,
        }
    }
}

impl Selection for Limit {
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
        Box::new(LimitCursor {
            source: self.source.open(),
            skip: self.offset,
            remaining: self.limit,
        })
    }
}

struct LimitCursor<'s> {
    source: Box<dyn Cursor + 's>,
    skip: usize,
    remaining: Option<usize>,
}

impl Cursor for LimitCursor<'_> {
    fn next(&mut self, ctx: &mut EvalContext<'_>) -> SqlResult<Option<Row>> {
        if self.remaining == Some(0) {
            return Ok(None);
        }
        while self.skip > 0 {
            if self.source.next(ctx)?.is_none() {
                return Ok(None);
            }
            self.skip -= 1;
        }
        let row = self.source.next(ctx)?;
        if row.is_some() {
            if let Some(r) = &mut self.remaining {
                *r -= 1;
            }
        }
        Ok(row)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::selection::tests::{ints, Fixture};
    use crate::types::Type;

    #[test]
    fn test_limit_offset() {
        let rows: Vec<Row> = (1..=5).map(|i| ints(&[i])).collect();
        let mut f = Fixture::new(&[("a", Type::integer())], rows);
        let scan: Arc<dyn Selection> = Arc::new(f.scan());
        assert_eq!(f.run(&Limit::new(scan.clone(), Some(2), 1)), vec![ints(&[2]), ints(&[3])]);
        assert_eq!(f.run(&Limit::new(scan.clone(), None, 4)), vec![ints(&[5])]);
        assert!(f.run(&Limit::new(scan, Some(0), 0)).is_empty());
    }
}
