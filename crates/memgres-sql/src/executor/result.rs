//! Statement results.

use crate::error::StatementLocation;
use crate::selection::Selection;
use crate::storage::Row;
use crate::types::Value;

/// Describes one output column.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FieldInfo {
    /// Output name.
    pub name: String,
    /// Type name, as `pg_typeof` would print it.
    pub type_name: String,
}

/// Result of one statement of a batch.
#[derive(Debug, Clone, Default)]
pub struct QueryResult {
    /// Command tag (`SELECT`, `INSERT`, `CREATE`, ...).
    pub command: String,
    /// Returned rows (query output or `RETURNING` rows).
    pub rows: Vec<Row>,
    /// Rows affected by a data-modifying statement, or returned by a query.
    pub row_count: usize,
    /// Output columns.
    pub fields: Vec<FieldInfo>,
    /// Where the statement starts in the submitted text.
    pub location: StatementLocation,
    /// True when the statement was accepted but had no effect.
    pub ignored: bool,
}

impl QueryResult {
    /// A result without rows.
    pub fn command(command: impl Into<String>) -> Self {
        Self {
            command: command.into(),
            ..Self::default()
        }
    }

    /// A statement accepted and skipped.
    pub fn ignored(command: impl Into<String>) -> Self {
        Self {
            ignored: true,
            ..Self::command(command)
        }
    }

    /// A result carrying rows shaped like `selection`.
    pub fn rows(command: impl Into<String>, selection: &dyn Selection, rows: Vec<Row>) -> Self {
        let fields = fields_of(selection);
        Self {
            command: command.into(),
            row_count: rows.len(),
            rows,
            fields,
            ..Self::default()
        }
    }

    /// Sets the affected row count.
    #[must_use]
    pub fn with_row_count(mut self, count: usize) -> Self {
        self.row_count = count;
        self
    }

    /// Value at `column` of the first row.
    pub fn scalar(&self, column: usize) -> Option<&Value> {
        self.rows.first().and_then(|r| r.get(column))
    }

    /// Position of the column named `name`.
    pub fn field_index(&self, name: &str) -> Option<usize> {
        self.fields.iter().position(|f| f.name == name)
    }
}

/// Output columns of a selection, hidden ones excluded.
pub fn fields_of(selection: &dyn Selection) -> Vec<FieldInfo> {
    selection
        .columns()
        .iter()
        .map(|c| FieldInfo {
            name: c.name.clone(),
            type_name: c.ty().name(),
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::selection::Materialized;
    use crate::types::Type;

    #[test]
    fn test_rows_result_describes_fields() {
        let m = Materialized::from_rows(
            vec!["a".into(), "b".into()],
            vec![Type::integer(), Type::varchar(3)],
            vec![vec![Value::Int(1), Value::text("x")]],
        );
        let r = QueryResult::rows("SELECT", &m, vec![vec![Value::Int(1), Value::text("x")]]);
        assert_eq!(r.row_count, 1);
        assert_eq!(r.fields[1].name, "b");
        assert_eq!(r.field_index("b"), Some(1));
        assert_eq!(r.scalar(0), Some(&Value::Int(1)));
        assert!(!r.ignored);
        assert!(QueryResult::ignored("SET").ignored);
    }
}
