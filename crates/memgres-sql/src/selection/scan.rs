//! Table scans.

use std::sync::Arc;

use crate::error::SqlResult;
use crate::expr::EvalContext;
use crate::storage::{table_data, Row, RowId, TableDef};

use super::{next_selection_id, output_columns, Column, Cursor, Selection};

/// Enumerates the rows of a table, in insertion order.
#[derive(Debug)]
pub struct TableScan {
    id: u64,
    table: Arc<TableDef>,
    columns: Vec<Column>,
}

impl TableScan {
    /// Creates a scan. Columns are qualified by `alias`, or by the table
    /// name.
    pub fn new(table: Arc<TableDef>, alias: Option<String>) -> Self {
        let id = next_selection_id();
        let qualifier = alias.unwrap_or_else(|| table.name.clone());
        let columns = output_columns(
            id,
            table
                .columns
                .iter()
                .map(|c| (c.name.clone(), Some(qualifier.clone()), c.ty.clone())),
        );
        Self { id, table, columns }
    }

    /// The scanned table.
    pub fn table(&self) -> &Arc<TableDef> {
        &self.table
    }

    /// Reads rows `ids`, skipping those gone since.
    pub(crate) fn fetch(&self, ctx: &EvalContext<'_>, ids: &[RowId]) -> Vec<Row> {
        match table_data(ctx.data, self.table.id) {
            Some(data) => ids.iter().filter_map(|id| data.get(*id).cloned()).collect(),
            None => Vec::new(),
        }
    }
}

impl Selection for TableScan {
    fn id(&self) -> u64 {
        self.id
    }

    fn columns(&self) -> &[Column] {
        &self.columns
    }

    fn open(&self) -> Box<dyn Cursor + '_> {
        Box::new(ScanCursor {
            table: self.table.id,
            last: None,
        })
    }

    fn as_table(&self) -> Option<&Arc<TableDef>> {
        Some(&self.table)
    }
}

struct ScanCursor {
    table: u32,
    last: Option<RowId>,
}

impl Cursor for ScanCursor {
    fn next(&mut self, ctx: &mut EvalContext<'_>) -> SqlResult<Option<Row>> {
        let Some(data) = table_data(ctx.data, self.table) else {
            return Ok(None);
        };
        Ok(data.after(self.last).map(|(id, row)| {
            self.last = Some(id);
            row.clone()
        }))
    }
}
