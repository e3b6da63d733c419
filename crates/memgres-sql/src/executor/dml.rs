//! Data-modifying statements: `INSERT`, `UPDATE` and `DELETE`.
//!
//! Expressions are compiled once against the target table, then applied row
//! by row through the table's storage contract:
//!
//! ```text
//!   source rows ─► defaults ─► CHECK ─► TableData::insert / update / delete
//!                                            │
//!                                            └─► RETURNING rows
//! ```
//!
//! Not-null and unique constraints are enforced by the storage layer.

use std::sync::Arc;

use sqlparser::ast;
use tracing::trace;

use crate::catalog::{ident, Catalog, QName};
use crate::error::{SqlError, SqlResult};
use crate::expr::{ColumnScope, EvalContext, Evaluator, ExprBuilder};
use crate::selection::{collect, Column, Materialized, Project, TableScan};
use crate::storage::{table_data, table_data_mut, Row, RowId, TableDef};
use crate::types::{Type, Value};

use super::result::QueryResult;
use super::select::Planner;

/// What a data-modifying statement did.
#[derive(Debug)]
pub(crate) struct Modified {
    /// Command tag.
    pub command: &'static str,
    /// Affected rows.
    pub count: usize,
    /// `RETURNING` rows, when the statement has the clause.
    pub returning: Option<Returned>,
}

/// Rows produced by a `RETURNING` clause.
#[derive(Debug)]
pub(crate) struct Returned {
    names: Vec<String>,
    types: Vec<Type>,
    rows: Vec<Row>,
}

impl Returned {
    /// The rows as a re-enumerable selection.
    pub fn selection(&self) -> Materialized {
        Materialized::from_rows(self.names.clone(), self.types.clone(), self.rows.clone())
    }
}

impl Modified {
    /// Converts to a statement result.
    pub fn into_result(self) -> QueryResult {
        match self.returning {
            Some(returned) => {
                let shape = returned.selection();
                QueryResult::rows(self.command, &shape, returned.rows).with_row_count(self.count)
            }
            None => QueryResult::command(self.command).with_row_count(self.count),
        }
    }
}

// ============================================================================
// Shared pieces
// ============================================================================

/// `DEFAULT` in a `VALUES` list or a `SET` clause.
fn is_default(expr: &ast::Expr) -> bool {
    matches!(expr, ast::Expr::Identifier(i) if i.quote_style.is_none() && i.value.eq_ignore_ascii_case("default"))
}

/// Converts a value headed for a column: constants and numbers follow
/// explicit cast rules, anything else must convert implicitly.
fn assign(e: Evaluator, ty: &Type, catalog: &Catalog) -> SqlResult<Evaluator> {
    let explicit = e.is_constant() || (e.ty().is_numeric() && ty.is_numeric());
    e.convert(ty, explicit, catalog)
}

/// A table being written, with its defaults and checks compiled.
struct Target {
    table: Arc<TableDef>,
    scope: ColumnScope,
    defaults: Vec<Option<Evaluator>>,
    checks: Vec<(String, Evaluator)>,
}

impl Target {
    fn new(planner: &Planner<'_>, table: Arc<TableDef>, alias: Option<String>) -> SqlResult<Self> {
        let catalog = planner.catalog();
        let scope = ColumnScope::of(&TableScan::new(table.clone(), alias));
        let empty = ColumnScope::default();
        let constants = planner.expr(&empty, &[]);
        let defaults = table
            .columns
            .iter()
            .map(|c| {
                c.default
                    .as_ref()
                    .map(|d| assign(constants.build(d)?, &c.ty, catalog))
                    .transpose()
            })
            .collect::<SqlResult<Vec<_>>>()?;
        let builder = planner.expr(&scope, &[]);
        let checks = table
            .checks
            .iter()
            .map(|c| Ok((c.name.clone(), builder.build_predicate(&c.expr)?)))
            .collect::<SqlResult<Vec<_>>>()?;
        Ok(Self {
            table,
            scope,
            defaults,
            checks,
        })
    }

    fn default_value(&self, column: usize, ctx: &mut EvalContext<'_>) -> SqlResult<Value> {
        match self.defaults.get(column).and_then(Option::as_ref) {
            Some(e) => e.get(&[], ctx),
            None => Ok(Value::Null),
        }
    }

    /// Default expression of a column, NULL when it has none.
    fn default_expr(&self, column: usize) -> Evaluator {
        match self.defaults.get(column).and_then(Option::as_ref) {
            Some(e) => e.clone(),
            None => Evaluator::constant(Value::Null, self.table.columns[column].ty.clone()),
        }
    }

    fn check(&self, row: &Row, ctx: &mut EvalContext<'_>) -> SqlResult<()> {
        for (name, e) in &self.checks {
            if matches!(e.get(row, ctx)?, Value::Bool(false)) {
                return Err(SqlError::query(format!(
                    "new row for relation \"{}\" violates check constraint \"{}\"",
                    self.table.name, name
                )));
            }
        }
        Ok(())
    }

    /// Compiles a `RETURNING` list against the table row.
    fn returning(
        &self,
        planner: &Planner<'_>,
        items: Option<&Vec<ast::SelectItem>>,
    ) -> SqlResult<Option<Vec<(String, Evaluator)>>> {
        let Some(items) = items else {
            return Ok(None);
        };
        let builder = planner.expr(&self.scope, &[]);
        planner.select_items(&builder, &self.scope, items).map(Some)
    }

    fn snapshot(&self, ctx: &EvalContext<'_>) -> Vec<(RowId, Row)> {
        table_data(ctx.data, self.table.id)
            .map(|d| d.rows().map(|(id, r)| (id, r.clone())).collect())
            .unwrap_or_default()
    }
}

/// Collects `RETURNING` rows as they are written.
struct Collector {
    items: Option<Vec<(String, Evaluator)>>,
    rows: Vec<Row>,
}

impl Collector {
    fn new(items: Option<Vec<(String, Evaluator)>>) -> Self {
        Self {
            items,
            rows: Vec::new(),
        }
    }

    fn push(&mut self, row: &Row, ctx: &mut EvalContext<'_>) -> SqlResult<()> {
        if let Some(items) = &self.items {
            let out = items
                .iter()
                .map(|(_, e)| e.get(row, ctx))
                .collect::<SqlResult<Row>>()?;
            self.rows.push(out);
        }
        Ok(())
    }

    fn finish(self, command: &'static str, count: usize) -> Modified {
        let returning = self.items.map(|items| Returned {
            names: items.iter().map(|(n, _)| n.clone()).collect(),
            types: items.iter().map(|(_, e)| e.ty().clone()).collect(),
            rows: self.rows,
        });
        Modified {
            command,
            count,
            returning,
        }
    }
}

/// Resolves the single table an `UPDATE` / `DELETE` targets.
fn single_table(planner: &Planner<'_>, from: &ast::TableWithJoins, what: &str) -> SqlResult<(Arc<TableDef>, Option<String>)> {
    if !from.joins.is_empty() {
        return Err(SqlError::not_supported(format!("{} with joins", what)));
    }
    match &from.relation {
        ast::TableFactor::Table { name, alias, .. } => {
            let table = planner.catalog().table(&QName::from_object_name(name)?)?;
            Ok((table, alias.as_ref().map(|a| ident(&a.name))))
        }
        _ => Err(SqlError::not_supported(format!("{} on a non-table source", what))),
    }
}

// ============================================================================
// INSERT
// ============================================================================

/// `ON CONFLICT` handling, resolved against the table's indexes.
enum OnConflict {
    Fail,
    Nothing {
        index: Option<u32>,
    },
    Update {
        index: Option<u32>,
        sets: Vec<(usize, Evaluator)>,
        filter: Option<Evaluator>,
    },
}

/// Runs an `INSERT`.
pub(crate) fn insert(planner: &Planner<'_>, ctx: &mut EvalContext<'_>, stmt: &ast::Statement) -> SqlResult<Modified> {
    let ast::Statement::Insert {
        table_name,
        columns,
        source,
        on,
        returning,
        ..
    } = stmt
    else {
        return Err(SqlError::Internal("INSERT expected".into()));
    };
    let catalog = planner.catalog();
    let table = catalog.table(&QName::from_object_name(table_name)?)?;
    let targets = target_columns(&table, columns)?;
    let target = Target::new(planner, table.clone(), None)?;
    let conflict = on_conflict(planner, &target, on.as_ref())?;
    let mut collector = Collector::new(target.returning(planner, returning.as_ref())?);

    let candidates = source_rows(planner, ctx, &table, &targets, source.as_deref())?;
    let mut count = 0;
    for candidate in candidates {
        let mut slots: Vec<Option<Value>> = vec![None; table.columns.len()];
        for (value, &col) in candidate.into_iter().zip(&targets) {
            slots[col] = value;
        }
        let mut row = Vec::with_capacity(slots.len());
        for (i, slot) in slots.into_iter().enumerate() {
            row.push(match slot {
                Some(v) => v,
                None => target.default_value(i, ctx)?,
            });
        }

        match &conflict {
            OnConflict::Nothing { index } => {
                if find_conflict(ctx, &table, &row, *index).is_some() {
                    trace!(table = %table.name, "conflicting row skipped");
                    continue;
                }
            }
            OnConflict::Update { index, sets, filter } => {
                if let Some(existing) = find_conflict(ctx, &table, &row, *index) {
                    if let Some(updated) = conflict_update(ctx, &target, existing, &row, sets, filter.as_ref())? {
                        collector.push(&updated, ctx)?;
                        count += 1;
                    }
                    continue;
                }
            }
            OnConflict::Fail => {}
        }

        target.check(&row, ctx)?;
        table_data_mut(ctx.data, table.id).insert(&table, row.clone())?;
        collector.push(&row, ctx)?;
        count += 1;
    }
    Ok(collector.finish("INSERT", count))
}

/// Positions of the columns an `INSERT` lists, or every column.
fn target_columns(table: &TableDef, columns: &[ast::Ident]) -> SqlResult<Vec<usize>> {
    if columns.is_empty() {
        return Ok((0..table.columns.len()).collect());
    }
    let mut positions = Vec::with_capacity(columns.len());
    for c in columns {
        let name = ident(c);
        let idx = table.column(&name)?;
        if positions.contains(&idx) {
            return Err(SqlError::query(format!(
                "column \"{}\" specified more than once",
                name
            )));
        }
        positions.push(idx);
    }
    Ok(positions)
}

/// Computes the rows to insert, one slot per target column; `None` stands
/// for `DEFAULT`.
fn source_rows(
    planner: &Planner<'_>,
    ctx: &mut EvalContext<'_>,
    table: &TableDef,
    targets: &[usize],
    source: Option<&ast::Query>,
) -> SqlResult<Vec<Vec<Option<Value>>>> {
    let catalog = planner.catalog();
    let Some(query) = source else {
        return Ok(vec![vec![None; targets.len()]]);
    };

    let plain_values = match query.body.as_ref() {
        ast::SetExpr::Values(values)
            if query.with.is_none() && query.order_by.is_empty() && query.limit.is_none() && query.offset.is_none() =>
        {
            Some(values)
        }
        _ => None,
    };

    if let Some(values) = plain_values {
        let empty = ColumnScope::default();
        let builder = planner.expr(&empty, &[]);
        let mut rows = Vec::with_capacity(values.rows.len());
        for exprs in &values.rows {
            check_width(exprs.len(), targets.len())?;
            let mut row = Vec::with_capacity(exprs.len());
            for (expr, &col) in exprs.iter().zip(targets) {
                if is_default(expr) {
                    row.push(None);
                    continue;
                }
                let e = assign(builder.build(expr)?, &table.columns[col].ty, catalog)?;
                row.push(Some(e.get(&[], ctx)?));
            }
            rows.push(row);
        }
        return Ok(rows);
    }

    let rows = planner.plan_query(query, &[])?;
    check_width(rows.columns().len(), targets.len())?;
    let items = rows
        .columns()
        .iter()
        .zip(targets)
        .map(|(c, &col)| Ok((c.name.clone(), assign(c.eval.clone(), &table.columns[col].ty, catalog)?)))
        .collect::<SqlResult<Vec<_>>>()?;
    let converted = Project::new(rows, items);
    Ok(collect(&converted, ctx)?
        .into_iter()
        .map(|r| r.into_iter().map(Some).collect())
        .collect())
}

fn check_width(values: usize, targets: usize) -> SqlResult<()> {
    if values > targets {
        return Err(SqlError::query("INSERT has more expressions than target columns"));
    }
    if values < targets {
        return Err(SqlError::query("INSERT has more target columns than expressions"));
    }
    Ok(())
}

fn on_conflict(planner: &Planner<'_>, target: &Target, on: Option<&ast::OnInsert>) -> SqlResult<OnConflict> {
    let conflict = match on {
        None => return Ok(OnConflict::Fail),
        Some(ast::OnInsert::OnConflict(c)) => c,
        Some(_) => return Err(SqlError::not_supported("ON DUPLICATE KEY UPDATE")),
    };
    let table = &target.table;
    let index = match &conflict.conflict_target {
        None => None,
        Some(ast::ConflictTarget::Columns(columns)) => {
            let positions = columns
                .iter()
                .map(|c| table.column(&ident(c)))
                .collect::<SqlResult<Vec<_>>>()?;
            let index = table.unique_index_on(&positions).ok_or_else(|| {
                SqlError::query(
                    "there is no unique or exclusion constraint matching the ON CONFLICT specification",
                )
            })?;
            Some(index.id)
        }
        Some(ast::ConflictTarget::OnConstraint(name)) => {
            let name = name.0.last().map(ident).unwrap_or_default();
            let index = table
                .indexes
                .iter()
                .find(|i| i.unique && i.name == name)
                .ok_or_else(|| {
                    SqlError::query(format!(
                        "constraint \"{}\" for table \"{}\" does not exist",
                        name, table.name
                    ))
                })?;
            Some(index.id)
        }
    };

    let update = match &conflict.action {
        ast::OnConflictAction::DoNothing => return Ok(OnConflict::Nothing { index }),
        ast::OnConflictAction::DoUpdate(update) => update,
    };
    if index.is_none() {
        return Err(SqlError::query(
            "ON CONFLICT DO UPDATE requires inference specification or constraint name",
        ));
    }

    // the existing row, then the row that was about to be inserted
    let width = table.columns.len();
    let excluded_id = crate::selection::next_selection_id();
    let mut columns: Vec<Column> = target.scope.columns().to_vec();
    columns.extend(table.columns.iter().enumerate().map(|(i, c)| {
        Column::new(
            c.name.clone(),
            Some("excluded".to_string()),
            Evaluator::column(excluded_id, width + i, c.ty.clone(), format!("excluded.{}", c.name)),
        )
    }));
    let scope = ColumnScope::new(columns);
    let builder = planner.expr(&scope, &[]);
    let sets = assignments(planner, &builder, table, &update.assignments, |col| {
        Ok(target.default_expr(col))
    })?;
    let filter = update
        .selection
        .as_ref()
        .map(|e| builder.build_predicate(e))
        .transpose()?;
    Ok(OnConflict::Update { index, sets, filter })
}

/// Row colliding with `row` on `index`, or on any unique index.
fn find_conflict(ctx: &EvalContext<'_>, table: &TableDef, row: &Row, index: Option<u32>) -> Option<RowId> {
    let data = table_data(ctx.data, table.id)?;
    let Some(index) = index else {
        return data.conflict(table, row, None).map(|(_, id)| id);
    };
    let def = table.index(index)?;
    let values: Vec<Value> = def.columns.iter().map(|&c| row[c].clone()).collect();
    if values.iter().any(Value::is_null) {
        return None;
    }
    data.lookup(table, index, &values).into_iter().next()
}

fn conflict_update(
    ctx: &mut EvalContext<'_>,
    target: &Target,
    existing: RowId,
    excluded: &Row,
    sets: &[(usize, Evaluator)],
    filter: Option<&Evaluator>,
) -> SqlResult<Option<Row>> {
    let table = &target.table;
    let Some(current) = table_data(ctx.data, table.id).and_then(|d| d.get(existing)).cloned() else {
        return Ok(None);
    };
    let mut joined = current.clone();
    joined.extend(excluded.iter().cloned());
    if let Some(filter) = filter {
        if !filter.is_true(&joined, ctx)? {
            return Ok(None);
        }
    }
    let mut updated = current;
    for (col, e) in sets {
        updated[*col] = e.get(&joined, ctx)?;
    }
    target.check(&updated, ctx)?;
    table_data_mut(ctx.data, table.id).update(table, existing, updated.clone())?;
    Ok(Some(updated))
}

/// Compiles a `SET` list. `default` supplies the value of `col = DEFAULT`.
fn assignments(
    planner: &Planner<'_>,
    builder: &ExprBuilder<'_>,
    table: &TableDef,
    list: &[ast::Assignment],
    default: impl Fn(usize) -> SqlResult<Evaluator>,
) -> SqlResult<Vec<(usize, Evaluator)>> {
    let mut sets: Vec<(usize, Evaluator)> = Vec::with_capacity(list.len());
    for a in list {
        let name = a.id.last().map(ident).unwrap_or_default();
        let col = table.column(&name)?;
        if sets.iter().any(|(c, _)| *c == col) {
            return Err(SqlError::query(format!(
                "multiple assignments to same column \"{}\"",
                name
            )));
        }
        let value = if is_default(&a.value) {
            default(col)?
        } else {
            assign(builder.build(&a.value)?, &table.columns[col].ty, planner.catalog())?
        };
        sets.push((col, value));
    }
    Ok(sets)
}

// ============================================================================
// UPDATE
// ============================================================================

/// Runs an `UPDATE`.
pub(crate) fn update(planner: &Planner<'_>, ctx: &mut EvalContext<'_>, stmt: &ast::Statement) -> SqlResult<Modified> {
    let ast::Statement::Update {
        table,
        assignments: list,
        from,
        selection,
        returning,
        ..
    } = stmt
    else {
        return Err(SqlError::Internal("UPDATE expected".into()));
    };
    if from.is_some() {
        return Err(SqlError::not_supported("UPDATE ... FROM"));
    }
    let (def, alias) = single_table(planner, table, "UPDATE")?;
    let target = Target::new(planner, def.clone(), alias)?;
    let builder = planner.expr(&target.scope, &[]);
    let predicate = selection.as_ref().map(|e| builder.build_predicate(e)).transpose()?;
    let sets = assignments(planner, &builder, &def, list, |col| Ok(target.default_expr(col)))?;
    let mut collector = Collector::new(target.returning(planner, returning.as_ref())?);

    let mut count = 0;
    for (id, row) in target.snapshot(ctx) {
        if let Some(p) = &predicate {
            if !p.is_true(&row, ctx)? {
                continue;
            }
        }
        let mut updated = row.clone();
        for (col, e) in &sets {
            updated[*col] = e.get(&row, ctx)?;
        }
        target.check(&updated, ctx)?;
        table_data_mut(ctx.data, def.id).update(&def, id, updated.clone())?;
        collector.push(&updated, ctx)?;
        count += 1;
    }
    Ok(collector.finish("UPDATE", count))
}

// ============================================================================
// DELETE
// ============================================================================

/// Runs a `DELETE`.
pub(crate) fn delete(planner: &Planner<'_>, ctx: &mut EvalContext<'_>, stmt: &ast::Statement) -> SqlResult<Modified> {
    let ast::Statement::Delete {
        from,
        using,
        selection,
        returning,
        ..
    } = stmt
    else {
        return Err(SqlError::Internal("DELETE expected".into()));
    };
    if using.is_some() {
        return Err(SqlError::not_supported("DELETE ... USING"));
    }
    let [from] = from.as_slice() else {
        return Err(SqlError::not_supported("DELETE from several tables"));
    };
    let (def, alias) = single_table(planner, from, "DELETE")?;
    let target = Target::new(planner, def.clone(), alias)?;
    let builder = planner.expr(&target.scope, &[]);
    let predicate = selection.as_ref().map(|e| builder.build_predicate(e)).transpose()?;
    let mut collector = Collector::new(target.returning(planner, returning.as_ref())?);

    let mut count = 0;
    for (id, row) in target.snapshot(ctx) {
        if let Some(p) = &predicate {
            if !p.is_true(&row, ctx)? {
                continue;
            }
        }
        if table_data_mut(ctx.data, def.id).delete(&def, id).is_some() {
            collector.push(&row, ctx)?;
            count += 1;
        }
    }
    Ok(collector.finish("DELETE", count))
}

#[cfg(test)]
mod tests {
    use crate::error::ErrorKind;
    use crate::types::Value;
    use crate::Database;

    fn db() -> Database {
        let mut db = Database::new().unwrap();
        db.execute(
            "CREATE TABLE item (id serial PRIMARY KEY, name text NOT NULL, qty int DEFAULT 1 CHECK (qty >= 0));",
        )
        .unwrap();
        db
    }

    #[test]
    fn test_insert_defaults_and_returning() {
        let mut db = db();
        let r = db
            .query("INSERT INTO item (name) VALUES ('a'), ('b') RETURNING id, qty")
            .unwrap();
        assert_eq!(r.row_count, 2);
        assert_eq!(r.rows, vec![vec![Value::Int(1), Value::Int(1)], vec![Value::Int(2), Value::Int(1)]]);
        db.execute("INSERT INTO item (name, qty) VALUES ('c', DEFAULT), ('d', 7)").unwrap();
        assert_eq!(
            db.many("SELECT id, qty FROM item WHERE name > 'b' ORDER BY id").unwrap(),
            vec![vec![Value::Int(3), Value::Int(1)], vec![Value::Int(4), Value::Int(7)]]
        );
    }

    #[test]
    fn test_insert_constraint_errors() {
        let mut db = db();
        let err = db.execute("INSERT INTO item (name, qty) VALUES ('a', -1)").unwrap_err();
        assert_eq!(
            err.error.to_string(),
            "new row for relation \"item\" violates check constraint \"item_qty_check\""
        );
        let err = db.execute("INSERT INTO item (qty) VALUES (2)").unwrap_err();
        assert_eq!(
            err.error.to_string(),
            "null value in column \"name\" violates not-null constraint"
        );
        let err = db.execute("INSERT INTO item (name) VALUES ('a', 1)").unwrap_err();
        assert_eq!(err.kind(), ErrorKind::Query);
        db.execute("INSERT INTO item (id, name) VALUES (5, 'x')").unwrap();
        let err = db.execute("INSERT INTO item (id, name) VALUES (5, 'y')").unwrap_err();
        assert_eq!(
            err.error.to_string(),
            "duplicate key value violates unique constraint \"item_pkey\""
        );
    }

    #[test]
    fn test_insert_select() {
        let mut db = db();
        db.execute("INSERT INTO item (name) VALUES ('a'), ('b')").unwrap();
        let r = db
            .query("INSERT INTO item (name, qty) SELECT name || '2', qty + 1 FROM item")
            .unwrap();
        assert_eq!(r.row_count, 2);
        assert_eq!(db.one("SELECT count(*) FROM item WHERE qty = 2").unwrap(), vec![Value::Int(2)]);
    }

    #[test]
    fn test_on_conflict() {
        let mut db = db();
        db.execute("INSERT INTO item (id, name) VALUES (1, 'a')").unwrap();
        let r = db
            .query("INSERT INTO item (id, name) VALUES (1, 'b'), (2, 'c') ON CONFLICT (id) DO NOTHING RETURNING name")
            .unwrap();
        assert_eq!(r.row_count, 1);
        assert_eq!(r.rows, vec![vec![Value::text("c")]]);

        let r = db
            .query("INSERT INTO item (id, name, qty) VALUES (1, 'z', 5) ON CONFLICT (id) DO UPDATE SET name = excluded.name, qty = item.qty + excluded.qty")
            .unwrap();
        assert_eq!(r.row_count, 1);
        assert_eq!(
            db.one("SELECT name, qty FROM item WHERE id = 1").unwrap(),
            vec![Value::text("z"), Value::Int(6)]
        );

        let err = db
            .execute("INSERT INTO item (id, name) VALUES (1, 'q') ON CONFLICT (name) DO NOTHING")
            .unwrap_err();
        assert!(err.error.to_string().contains("no unique or exclusion constraint"));
    }

    #[test]
    fn test_update_and_delete() {
        let mut db = db();
        db.execute("INSERT INTO item (name, qty) VALUES ('a', 1), ('b', 2), ('c', 3)").unwrap();
        let r = db
            .query("UPDATE item SET qty = qty * 10 WHERE qty >= 2 RETURNING name, qty")
            .unwrap();
        assert_eq!(r.row_count, 2);
        assert_eq!(r.rows[0], vec![Value::text("b"), Value::Int(20)]);
        let err = db.execute("UPDATE item SET qty = -5").unwrap_err();
        assert!(err.error.to_string().contains("violates check constraint"));
        assert_eq!(db.one("SELECT sum(qty) FROM item").unwrap(), vec![Value::Int(51)]);

        let r = db.query("DELETE FROM item i WHERE i.qty > 10 RETURNING id").unwrap();
        assert_eq!(r.rows, vec![vec![Value::Int(2)], vec![Value::Int(3)]]);
        let r = db.query("DELETE FROM item").unwrap();
        assert_eq!(r.row_count, 1);
        assert_eq!(r.command, "DELETE");
    }

    #[test]
    fn test_update_from_is_not_supported() {
        let mut db = db();
        db.execute("CREATE TABLE other (id int)").unwrap();
        let err = db
            .execute("UPDATE item SET qty = 1 FROM other WHERE other.id = item.id")
            .unwrap_err();
        assert_eq!(err.kind(), ErrorKind::NotSupported);
    }
}
