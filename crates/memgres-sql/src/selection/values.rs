//! Row sources that are not tables: `VALUES` lists and materialized rows.

use crate::error::SqlResult;
use crate::expr::{EvalContext, Evaluator};
use crate::storage::Row;

use super::{next_selection_id, output_columns, Column, Cursor, Selection};
use crate::types::Type;

/// `VALUES (..), (..)`: every row is computed on enumeration.
#[derive(Debug)]
pub struct Values {
    id: u64,
    rows: Vec<Vec<Evaluator>>,
    columns: Vec<Column>,
}

impl Values {
    /// Creates a `VALUES` selection. All rows must have one expression per
    /// name, already converted to the column types.
    pub fn new(names: Vec<String>, types: Vec<Type>, rows: Vec<Vec<Evaluator>>) -> Self {
        let id = next_selection_id();
        let columns = output_columns(id, names.into_iter().zip(types).map(|(n, t)| (n, None, t)));
        Self { id, rows, columns }
    }

    /// A single row without columns, the source of a `SELECT` without
    /// `FROM`.
    pub fn unit() -> Self {
        Self::new(Vec::new(), Vec::new(), vec![Vec::new()])
    }
}

impl Selection for Values {
    fn id(&self) -> u64 {
        self.id
    }

    fn columns(&self) -> &[Column] {
        &self.columns
    }

    fn is_literal(&self, idx: usize) -> bool {
        !self.rows.is_empty()
            && self
                .rows
                .iter()
                .all(|row| row.get(idx).is_some_and(Evaluator::is_constant))
    }

    fn open(&self) -> Box<dyn Cursor + '_> {
        Box::new(ValuesCursor {
            rows: &self.rows,
            position: 0,
        })
    }
}

struct ValuesCursor<'s> {
    rows: &'s [Vec<Evaluator>],
    position: usize,
}

impl Cursor for ValuesCursor<'_> {
    fn next(&mut self, ctx: &mut EvalContext<'_>) -> SqlResult<Option<Row>> {
        let Some(exprs) = self.rows.get(self.position) else {
            return Ok(None);
        };
        self.position += 1;
        exprs
            .iter()
            .map(|e| e.get(&[], ctx))
            .collect::<SqlResult<Row>>()
            .map(Some)
    }
}

/// Rows computed ahead of time, such as the output of a data-modifying
/// `WITH` binding.
#[derive(Debug)]
pub struct Materialized {
    id: u64,
    columns: Vec<Column>,
    rows: Vec<Row>,
}

impl Materialized {
    /// Wraps rows. `columns` must read positions of rows identified by `id`.
    pub fn new(id: u64, columns: Vec<Column>, rows: Vec<Row>) -> Self {
        Self { id, columns, rows }
    }

    /// Wraps rows under fresh columns of the given names and types.
    pub fn from_rows(names: Vec<String>, types: Vec<Type>, rows: Vec<Row>) -> Self {
        let id = next_selection_id();
        let columns = output_columns(id, names.into_iter().zip(types).map(|(n, t)| (n, None, t)));
        Self::new(id, columns, rows)
    }
}

impl Selection for Materialized {
    fn id(&self) -> u64 {
        self.id
    }

    fn columns(&self) -> &[Column] {
        &self.columns
    }

    fn open(&self) -> Box<dyn Cursor + '_> {
        Box::new(MaterializedCursor {
            rows: self.rows.iter(),
        })
    }
}

struct MaterializedCursor<'s> {
    rows: std::slice::Iter<'s, Row>,
}

impl Cursor for MaterializedCursor<'_> {
    fn next(&mut self, _ctx: &mut EvalContext<'_>) -> SqlResult<Option<Row>> {
        Ok(self.rows.next().cloned())
    }
}
