//! Projection and renaming.

use std::sync::Arc;

use crate::error::{SqlError, SqlResult};
use crate::expr::{EvalContext, Evaluator};
use crate::storage::Row;

use super::{next_selection_id, output_columns, Column, Cursor, Selection};

/// Computes the final select list.
#[derive(Debug)]
pub struct Project {
    id: u64,
    source: Arc<dyn Selection>,
    exprs: Vec<Evaluator>,
    columns: Vec<Column>,
}

impl Project {
    /// Projects `source` to `(name, expression)` pairs, the expressions being
    /// compiled against the source.
    pub fn new(source: Arc<dyn Selection>, items: Vec<(String, Evaluator)>) -> Self {
        let id = next_selection_id();
        let columns = output_columns(
            id,
            items.iter().map(|(name, e)| (name.clone(), None, e.ty().clone())),
        );
        Self {
            id,
            source,
            exprs: items.into_iter().map(|(_, e)| e).collect(),
            columns,
        }
    }

    /// Projected expressions, in output order.
    pub fn exprs(&self) -> &[Evaluator] {
        &self.exprs
    }
}

impl Selection for Project {
    fn id(&self) -> u64 {
        self.id
    }

    fn columns(&self) -> &[Column] {
        &self.columns
    }

    fn is_literal(&self, idx: usize) -> bool {
        self.exprs.get(idx).is_some_and(Evaluator::is_constant)
    }

    fn open(&self) -> Box<dyn Cursor + '_> {
        Box::new(ProjectCursor {
            source: self.source.open(),
            exprs: &self.exprs,
        })
    }
}

struct ProjectCursor<'s> {
    source: Box<dyn Cursor + 's>,
    exprs: &'s [Evaluator],
}

impl Cursor for ProjectCursor<'_> {
    fn next(&mut self, ctx: &mut EvalContext<'_>) -> SqlResult<Option<Row>> {
        let Some(row) = self.source.next(ctx)? else {
            return Ok(None);
        };
        self.exprs
            .iter()
            .map(|e| e.get(&row, ctx))
            .collect::<SqlResult<Row>>()
            .map(Some)
    }
}

/// `(subquery) AS alias (c1, c2, ..)`: same rows, columns qualified by the
/// alias and optionally renamed.
#[derive(Debug)]
pub struct Alias {
    id: u64,
    source: Arc<dyn Selection>,
    columns: Vec<Column>,
}

impl Alias {
    /// Renames `source`. `names` may rename a prefix of the columns.
    pub fn new(source: Arc<dyn Selection>, alias: &str, names: &[String]) -> SqlResult<Self> {
        let visible: Vec<&Column> = source.columns().iter().collect();
        if names.len() > visible.len() {
            return Err(SqlError::query(format!(
                "table \"{}\" has {} columns available but {} columns specified",
                alias,
                visible.len(),
                names.len()
            )));
        }
        let id = next_selection_id();
        let columns = output_columns(
            id,
            visible.iter().enumerate().map(|(i, c)| {
                let name = names.get(i).cloned().unwrap_or_else(|| c.name.clone());
                (name, Some(alias.to_string()), c.ty().clone())
            }),
        );
        Ok(Self {
            id,
            source,
            columns,
        })
    }
}

impl Selection for Alias {
    fn id(&self) -> u64 {
        self.id
    }

    fn columns(&self) -> &[Column] {
        &self.columns
    }

    fn open(&self) -> Box<dyn Cursor + '_> {
        self.source.open()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::expr::{BinaryOp, Op};
    use crate::selection::tests::{ints, Fixture};
    use crate::types::{Type, Value};

    #[test]
    fn test_project_and_alias() {
        let mut f = Fixture::new(
            &[("a", Type::integer()), ("b", Type::integer())],
            vec![ints(&[1, 2]), ints(&[3, 4])],
        );
        let scan: Arc<dyn Selection> = Arc::new(f.scan());
        let a = scan.columns()[0].eval.clone();
        let b = scan.columns()[1].eval.clone();
        let sum = Evaluator::new(
            Op::Arith {
                op: BinaryOp::Add,
                left: a,
                right: b.clone(),
            },
            Type::integer(),
            "a + b",
        );
        let project: Arc<dyn Selection> = Arc::new(Project::new(
            scan,
            vec![("s".into(), sum), ("b".into(), b)],
        ));
        assert_eq!(f.run(project.as_ref()), vec![ints(&[3, 2]), ints(&[7, 4])]);

        let alias = Alias::new(project, "x", &["total".to_string()]).unwrap();
        assert_eq!(alias.columns()[0].name, "total");
        assert_eq!(alias.columns()[1].name, "b");
        assert_eq!(alias.columns()[1].table.as_deref(), Some("x"));
        assert_eq!(f.run(&alias)[1], vec![Value::Int(7), Value::Int(4)]);
    }
}
