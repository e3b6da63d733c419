//! `WHERE` / `HAVING`.

use std::sync::Arc;

use crate::error::SqlResult;
use crate::expr::{EvalContext, Evaluator};
use crate::storage::Row;

use super::{next_selection_id, Column, Cursor, Selection};

/// Keeps the rows for which a predicate is true.
#[derive(Debug)]
pub struct Filter {
    id: u64,
    source: Arc<dyn Selection>,
    predicate: Evaluator,
}

impl Filter {
    /// Filters `source` by `predicate`, compiled against the source.
    pub fn new(source: Arc<dyn Selection>, predicate: Evaluator) -> Self {
        Self {
            id: next_selection_id(),
            source,
            predicate,
        }
    }

    /// The predicate.
    pub fn predicate(&self) -> &Evaluator {
        &self.predicate
    }
}

impl Selection for Filter {
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
        Box::new(FilterCursor {
            source: self.source.open(),
            predicate: &self.predicate,
        })
    }
}

struct FilterCursor<'s> {
    source: Box<dyn Cursor + 's>,
    predicate: &'s Evaluator,
}

impl Cursor for FilterCursor<'_> {
    fn next(&mut self, ctx: &mut EvalContext<'_>) -> SqlResult<Option<Row>> {
        while let Some(row) = self.source.next(ctx)? {
            if self.predicate.is_true(&row, ctx)? {
                return Ok(Some(row));
            }
        }
        Ok(None)
    }
}
