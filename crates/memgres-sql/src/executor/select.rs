//! Query planning: turns a parsed query into a [`Selection`] tree.
//!
//! A plain `SELECT` is assembled in this order:
//!
//! ```text
//!   FROM / JOIN ─► WHERE ─► DISTINCT ON ─► ORDER BY ─► select list ─► DISTINCT
//! ```
//!
//! A grouped one resolves `HAVING`, `ORDER BY` and `DISTINCT ON` against the
//! group rows instead of the source rows:
//!
//! ```text
//!   FROM / JOIN ─► WHERE ─► GROUP BY ─► HAVING ─► ORDER BY ─► DISTINCT ON
//!                                                 ─► select list ─► DISTINCT
//! ```
//!
//! `LIMIT` / `OFFSET` always come last.

use std::collections::{HashMap, HashSet};
use std::sync::Arc;

use sqlparser::ast;
use tracing::trace;

use crate::catalog::{ident, Catalog, QName};
use crate::error::{SqlError, SqlResult};
use crate::expr::build::{comparison, contains_aggregate, suggest_column_name};
use crate::expr::{BinaryOp, ColumnScope, Evaluator, ExprBuilder, Op, Scope};
use crate::selection::{
    build_column_ids, Alias, Distinct, Filter, GroupScope, Join, JoinKind, Limit, Order,
    OrderKey, Project, Selection, TableScan, Union, Values,
};
use crate::types::{reconcile, Type, Value};

/// What a `WITH` name stands for while its statement is planned.
#[derive(Debug, Clone)]
pub enum Binding {
    /// Rows of a query, or the `RETURNING` rows of a data-modifying binding.
    Rows(Arc<dyn Selection>),
    /// A data-modifying binding without `RETURNING`.
    NoReturning,
}

/// Plans queries against a catalog.
pub struct Planner<'a> {
    catalog: &'a Catalog,
    bindings: HashMap<String, Binding>,
}

impl<'a> Planner<'a> {
    /// Creates a planner without `WITH` bindings.
    pub fn new(catalog: &'a Catalog) -> Self {
        Self {
            catalog,
            bindings: HashMap::new(),
        }
    }

    /// The catalog names resolve against.
    pub fn catalog(&self) -> &'a Catalog {
        self.catalog
    }

    /// Binds a `WITH` name. Names must be unique within one `WITH` list.
    pub fn bind(&mut self, name: String, binding: Binding) -> SqlResult<()> {
        if self.bindings.contains_key(&name) {
            return Err(SqlError::query(format!(
                "WITH query name \"{}\" specified more than once",
                name
            )));
        }
        self.bindings.insert(name, binding);
        Ok(())
    }

    /// An expression compiler over `scope`.
    pub fn expr<'s>(&'s self, scope: &'s dyn Scope, outer: &'s [&'s dyn Scope]) -> ExprBuilder<'s> {
        ExprBuilder::new(self, scope, outer)
    }

    // ------------------------------------------------------------------------
    // Queries
    // ------------------------------------------------------------------------

    /// Plans a complete query. `outer` lists the scopes of enclosing queries,
    /// innermost first, for correlated references.
    pub fn plan_query(&self, query: &ast::Query, outer: &[&dyn Scope]) -> SqlResult<Arc<dyn Selection>> {
        let Some(with) = &query.with else {
            return self.plan_body(query, outer);
        };
        if with.recursive {
            return Err(SqlError::not_supported("WITH RECURSIVE"));
        }
        let mut child = Planner {
            catalog: self.catalog,
            bindings: self.bindings.clone(),
        };
        let mut seen = HashSet::new();
        for cte in &with.cte_tables {
            let name = ident(&cte.alias.name);
            if !seen.insert(name.clone()) {
                return Err(SqlError::query(format!(
                    "WITH query name \"{}\" specified more than once",
                    name
                )));
            }
            if matches!(cte.query.body.as_ref(), ast::SetExpr::Insert(_) | ast::SetExpr::Update(_)) {
                return Err(SqlError::not_supported(
                    "WITH clause containing a data-modifying statement must be at the top level",
                ));
            }
            let rows = child.plan_query(&cte.query, outer)?;
            let columns: Vec<String> = cte.alias.columns.iter().map(ident).collect();
            let aliased: Arc<dyn Selection> = Arc::new(Alias::new(rows, &name, &columns)?);
            child.bindings.insert(name, Binding::Rows(aliased));
        }
        child.plan_body(query, outer)
    }

    /// Plans a query ignoring its `WITH` list, whose names must already be
    /// bound.
    pub fn plan_body(&self, query: &ast::Query, outer: &[&dyn Scope]) -> SqlResult<Arc<dyn Selection>> {
        if query.fetch.is_some() {
            return Err(SqlError::not_supported("FETCH"));
        }
        let mut current = match query.body.as_ref() {
            ast::SetExpr::Select(select) => self.plan_select(select, &query.order_by, outer)?,
            other => {
                let rows = self.plan_set_expr(other, outer)?;
                self.order_output(rows, &query.order_by, outer)?
            }
        };
        let limit = match &query.limit {
            Some(e) => self.constant_count(e, "LIMIT", outer)?,
            None => None,
        };
        let offset = match &query.offset {
            Some(o) => self.constant_count(&o.value, "OFFSET", outer)?.unwrap_or(0),
            None => 0,
        };
        if limit.is_some() || offset > 0 {
            current = Arc::new(Limit::new(current, limit, offset));
        }
        Ok(current)
    }

    fn constant_count(&self, expr: &ast::Expr, clause: &str, outer: &[&dyn Scope]) -> SqlResult<Option<usize>> {
        let empty = ColumnScope::default();
        let e = self
            .expr(&empty, outer)
            .build(expr)?
            .coerce(&Type::integer(), self.catalog)?;
        match e.constant_value() {
            Some(Value::Null) => Ok(None),
            Some(Value::Int(n)) => usize::try_from(*n)
                .map(Some)
                .map_err(|_| SqlError::query(format!("{} must not be negative", clause))),
            _ => Err(SqlError::not_supported(format!("non-constant {}", clause))),
        }
    }

    fn plan_set_expr(&self, body: &ast::SetExpr, outer: &[&dyn Scope]) -> SqlResult<Arc<dyn Selection>> {
        match body {
            ast::SetExpr::Select(select) => self.plan_select(select, &[], outer),
            ast::SetExpr::Query(query) => self.plan_query(query, outer),
            ast::SetExpr::Values(values) => self.plan_values(values, outer),
            ast::SetExpr::SetOperation {
                op,
                set_quantifier,
                left,
                right,
            } => {
                if !matches!(op, ast::SetOperator::Union) {
                    return Err(SqlError::not_supported(op.to_string()));
                }
                let all = matches!(set_quantifier, ast::SetQuantifier::All);
                let left = self.plan_set_expr(left, outer)?;
                let right = self.plan_set_expr(right, outer)?;
                let (left, right) = self.align(left, right)?;
                Ok(Arc::new(Union::new(left, right, all)?))
            }
            ast::SetExpr::Insert(_) | ast::SetExpr::Update(_) => Err(SqlError::not_supported(
                "data-modifying statement used as a subquery",
            )),
            other => Err(SqlError::not_supported(format!("query {}", other))),
        }
    }

    /// Converts both sides of a `UNION` to common column types.
    fn align(
        &self,
        left: Arc<dyn Selection>,
        right: Arc<dyn Selection>,
    ) -> SqlResult<(Arc<dyn Selection>, Arc<dyn Selection>)> {
        if left.columns().len() != right.columns().len() {
            return Err(SqlError::query(
                "each UNION query must have the same number of columns",
            ));
        }
        let mut types = Vec::with_capacity(left.columns().len());
        for (idx, (l, r)) in left.columns().iter().zip(right.columns()).enumerate() {
            let candidates = [
                (l.ty().clone(), left.is_literal(idx)),
                (r.ty().clone(), right.is_literal(idx)),
            ];
            types.push(reconcile(&candidates, false)?.unwrap_or_else(Type::text));
        }
        Ok((self.convert_columns(left, &types)?, self.convert_columns(right, &types)?))
    }

    fn convert_columns(&self, source: Arc<dyn Selection>, types: &[Type]) -> SqlResult<Arc<dyn Selection>> {
        if source.columns().iter().zip(types).all(|(c, t)| c.ty() == t) {
            return Ok(source);
        }
        let items = source
            .columns()
            .iter()
            .zip(types)
            .enumerate()
            .map(|(idx, (c, t))| {
                let eval = c.eval.convert(t, source.is_literal(idx), self.catalog)?;
                Ok((c.name.clone(), eval))
            })
            .collect::<SqlResult<Vec<_>>>()?;
        Ok(Arc::new(Project::new(source, items)))
    }

    /// `ORDER BY` over the output of a set operation or `VALUES`: keys are
    /// output positions, output names or expressions over output columns.
    fn order_output(
        &self,
        source: Arc<dyn Selection>,
        order_by: &[ast::OrderByExpr],
        outer: &[&dyn Scope],
    ) -> SqlResult<Arc<dyn Selection>> {
        if order_by.is_empty() {
            return Ok(source);
        }
        let scope = ColumnScope::of(source.as_ref());
        let builder = self.expr(&scope, outer);
        let outputs: Vec<(String, Evaluator)> = source
            .columns()
            .iter()
            .map(|c| (c.name.clone(), c.eval.clone()))
            .collect();
        let keys = order_by
            .iter()
            .map(|o| {
                let eval = match output_reference(&o.expr, &outputs)? {
                    Some(e) => e,
                    None => builder.build(&o.expr)?,
                };
                Ok(order_key(eval, o))
            })
            .collect::<SqlResult<Vec<_>>>()?;
        Ok(Arc::new(Order::new(source, keys)))
    }

    fn plan_values(&self, values: &ast::Values, outer: &[&dyn Scope]) -> SqlResult<Arc<dyn Selection>> {
        let empty = ColumnScope::default();
        let builder = self.expr(&empty, outer);
        let width = values.rows.first().map_or(0, Vec::len);
        let mut rows = Vec::with_capacity(values.rows.len());
        for row in &values.rows {
            if row.len() != width {
                return Err(SqlError::query("VALUES lists must all be the same length"));
            }
            rows.push(row.iter().map(|e| builder.build(e)).collect::<SqlResult<Vec<_>>>()?);
        }
        let mut types = Vec::with_capacity(width);
        for i in 0..width {
            let candidates: Vec<(Type, bool)> = rows
                .iter()
                .map(|r| (r[i].ty().clone(), r[i].is_constant()))
                .collect();
            types.push(reconcile(&candidates, false)?.unwrap_or_else(Type::text));
        }
        let rows = rows
            .into_iter()
            .map(|row| {
                row.iter()
                    .zip(&types)
                    .map(|(e, t)| e.coerce(t, self.catalog))
                    .collect::<SqlResult<Vec<_>>>()
            })
            .collect::<SqlResult<Vec<_>>>()?;
        let names = (1..=width).map(|i| format!("column{}", i)).collect();
        Ok(Arc::new(Values::new(names, types, rows)))
    }

    // ------------------------------------------------------------------------
    // FROM
    // ------------------------------------------------------------------------

    /// Plans a `FROM` list; items separated by commas are cross joined.
    pub fn plan_from(&self, from: &[ast::TableWithJoins], outer: &[&dyn Scope]) -> SqlResult<Arc<dyn Selection>> {
        let mut current: Option<Arc<dyn Selection>> = None;
        for item in from {
            let mut joined = self.plan_table_factor(&item.relation, outer)?;
            for join in &item.joins {
                joined = self.plan_join(joined, join, outer)?;
            }
            current = Some(match current {
                None => joined,
                Some(previous) => Arc::new(Join::new(previous, joined, JoinKind::Cross)),
            });
        }
        Ok(current.unwrap_or_else(|| Arc::new(Values::unit())))
    }

    fn plan_table_factor(&self, factor: &ast::TableFactor, outer: &[&dyn Scope]) -> SqlResult<Arc<dyn Selection>> {
        match factor {
            ast::TableFactor::Table {
                name, alias, args, ..
            } => {
                if args.is_some() {
                    return Err(SqlError::not_supported(format!("table function {}", name)));
                }
                let qname = QName::from_object_name(name)?;
                let alias_name = alias.as_ref().map(|a| ident(&a.name));
                let bound = match &qname.schema {
                    None => self.bindings.get(&qname.name),
                    Some(_) => None,
                };
                let source: Arc<dyn Selection> = match bound {
                    Some(Binding::Rows(rows)) => {
                        let label = alias_name.as_deref().unwrap_or(&qname.name);
                        Arc::new(Alias::new(rows.clone(), label, &[])?)
                    }
                    Some(Binding::NoReturning) => {
                        return Err(SqlError::query(format!(
                            "WITH query \"{}\" does not have a RETURNING clause",
                            qname.name
                        )))
                    }
                    None => {
                        let table = self.catalog.table(&qname)?;
                        trace!(table = %qname, "scan");
                        Arc::new(TableScan::new(table, alias_name.clone()))
                    }
                };
                match alias {
                    Some(a) if !a.columns.is_empty() => {
                        let names: Vec<String> = a.columns.iter().map(ident).collect();
                        Ok(Arc::new(Alias::new(source, &ident(&a.name), &names)?))
                    }
                    _ => Ok(source),
                }
            }
            ast::TableFactor::Derived {
                lateral,
                subquery,
                alias,
                ..
            } => {
                if *lateral {
                    return Err(SqlError::not_supported("LATERAL"));
                }
                let rows = self.plan_query(subquery, outer)?;
                self.aliased(rows, alias.as_ref())
            }
            ast::TableFactor::NestedJoin {
                table_with_joins,
                alias,
                ..
            } => {
                let rows = self.plan_from(std::slice::from_ref(table_with_joins.as_ref()), outer)?;
                self.aliased(rows, alias.as_ref())
            }
            other => Err(SqlError::not_supported(format!("FROM item {}", other))),
        }
    }

    fn aliased(&self, rows: Arc<dyn Selection>, alias: Option<&ast::TableAlias>) -> SqlResult<Arc<dyn Selection>> {
        match alias {
            Some(a) => {
                let names: Vec<String> = a.columns.iter().map(ident).collect();
                Ok(Arc::new(Alias::new(rows, &ident(&a.name), &names)?))
            }
            None => Ok(rows),
        }
    }

    fn plan_join(&self, left: Arc<dyn Selection>, join: &ast::Join, outer: &[&dyn Scope]) -> SqlResult<Arc<dyn Selection>> {
        use ast::JoinOperator as J;
        let right = self.plan_table_factor(&join.relation, outer)?;
        let (kind, constraint) = match &join.join_operator {
            J::Inner(c) => (JoinKind::Inner, Some(c)),
            J::LeftOuter(c) => (JoinKind::Left, Some(c)),
            J::RightOuter(c) => (JoinKind::Right, Some(c)),
            J::FullOuter(c) => (JoinKind::Full, Some(c)),
            J::CrossJoin => (JoinKind::Cross, None),
            other => return Err(SqlError::not_supported(format!("join {:?}", other))),
        };
        let split = left.columns().len();
        let mut joined = Join::new(left, right, kind);
        match constraint {
            None | Some(ast::JoinConstraint::None) => Ok(Arc::new(joined)),
            Some(ast::JoinConstraint::On(e)) => {
                let scope = ColumnScope::of(&joined);
                let condition = self.expr(&scope, outer).build_predicate(e)?;
                Ok(Arc::new(joined.with_condition(condition)))
            }
            Some(ast::JoinConstraint::Using(names)) => {
                let mut condition: Option<Evaluator> = None;
                let mut hidden = Vec::with_capacity(names.len());
                for name in names.iter().map(ident) {
                    let columns = joined.columns();
                    let pick = |side: &[crate::selection::Column], which: &str| {
                        side.iter()
                            .find(|c| c.name == name && !c.hidden)
                            .map(|c| c.eval.clone())
                            .ok_or_else(|| {
                                SqlError::query(format!(
                                    "column \"{}\" specified in USING clause does not exist in {} table",
                                    name, which
                                ))
                            })
                    };
                    let l = pick(&columns[..split], "left")?;
                    let r = pick(&columns[split..], "right")?;
                    let eq = comparison(BinaryOp::Eq, l, r, self.catalog)?;
                    condition = Some(match condition {
                        None => eq,
                        Some(previous) => {
                            let sql = format!("{} AND {}", previous.sql(), eq.sql());
                            Evaluator::new(
                                Op::Logic {
                                    and: true,
                                    left: previous,
                                    right: eq,
                                },
                                Type::bool(),
                                sql,
                            )
                        }
                    });
                    hidden.push(name);
                }
                for name in &hidden {
                    joined.hide_right(name);
                }
                Ok(Arc::new(match condition {
                    Some(c) => joined.with_condition(c),
                    None => joined,
                }))
            }
            Some(ast::JoinConstraint::Natural) => Err(SqlError::not_supported("NATURAL JOIN")),
        }
    }

    // ------------------------------------------------------------------------
    // SELECT
    // ------------------------------------------------------------------------

    fn plan_select(
        &self,
        select: &ast::Select,
        order_by: &[ast::OrderByExpr],
        outer: &[&dyn Scope],
    ) -> SqlResult<Arc<dyn Selection>> {
        if select.into.is_some() {
            return Err(SqlError::not_supported("SELECT INTO"));
        }
        let group_by = match &select.group_by {
            ast::GroupByExpr::Expressions(exprs) => exprs.as_slice(),
            ast::GroupByExpr::All => return Err(SqlError::not_supported("GROUP BY ALL")),
        };
        let mut source = self.plan_from(&select.from, outer)?;
        let scope = ColumnScope::of(source.as_ref());
        if let Some(predicate) = &select.selection {
            let predicate = self.expr(&scope, outer).build_predicate(predicate)?;
            source = Arc::new(Filter::new(source, predicate));
        }

        let grouped = !group_by.is_empty()
            || select.having.is_some()
            || select.projection.iter().any(|item| match item {
                ast::SelectItem::UnnamedExpr(e) | ast::SelectItem::ExprWithAlias { expr: e, .. } => {
                    contains_aggregate(e)
                }
                _ => false,
            })
            || order_by.iter().any(|o| contains_aggregate(&o.expr));

        let (distinct, distinct_on) = match &select.distinct {
            None => (false, None),
            Some(ast::Distinct::Distinct) => (true, None),
            Some(ast::Distinct::On(keys)) => (false, Some(keys.as_slice())),
        };

        if !grouped {
            let builder = self.expr(&scope, outer);
            let items = self.select_items(&builder, &scope, &select.projection)?;
            if let Some(keys) = distinct_on {
                let keys = keys
                    .iter()
                    .map(|k| self.resolve_key(&builder, k, &items))
                    .collect::<SqlResult<Vec<_>>>()?;
                source = Arc::new(Distinct::on(source, keys));
            }
            if !order_by.is_empty() {
                let keys = order_by
                    .iter()
                    .map(|o| Ok(order_key(self.resolve_key(&builder, &o.expr, &items)?, o)))
                    .collect::<SqlResult<Vec<_>>>()?;
                source = Arc::new(Order::new(source, keys));
            }
            return Ok(finish_projection(source, items, distinct));
        }

        let keys = {
            let builder = self.expr(&scope, outer);
            group_by
                .iter()
                .map(|k| self.group_key(&builder, k, &select.projection))
                .collect::<SqlResult<Vec<_>>>()?
        };
        let group = GroupScope::new(&scope, keys);
        let (items, having, order, on) = {
            let builder = self.expr(&group, outer);
            let items = self.select_items(&builder, &group, &select.projection)?;
            let having = select
                .having
                .as_ref()
                .map(|h| builder.build_predicate(h))
                .transpose()?;
            let order = order_by
                .iter()
                .map(|o| Ok(order_key(self.resolve_key(&builder, &o.expr, &items)?, o)))
                .collect::<SqlResult<Vec<_>>>()?;
            let on = distinct_on
                .map(|keys| {
                    keys.iter()
                        .map(|k| self.resolve_key(&builder, k, &items))
                        .collect::<SqlResult<Vec<_>>>()
                })
                .transpose()?;
            (items, having, order, on)
        };
        trace!(aggregates = group.aggregate_count(), "grouped select");
        let mut current: Arc<dyn Selection> = Arc::new(group.into_selection(source));
        if let Some(h) = having {
            current = Arc::new(Filter::new(current, h));
        }
        if !order.is_empty() {
            current = Arc::new(Order::new(current, order));
        }
        if let Some(keys) = on {
            current = Arc::new(Distinct::on(current, keys));
        }
        Ok(finish_projection(current, items, distinct))
    }

    /// Compiles a select list (or a `RETURNING` list), expanding `*` and
    /// naming every output column.
    pub fn select_items(
        &self,
        builder: &ExprBuilder<'_>,
        scope: &dyn Scope,
        projection: &[ast::SelectItem],
    ) -> SqlResult<Vec<(String, Evaluator)>> {
        let mut suggested = Vec::new();
        let mut evals = Vec::new();
        for item in projection {
            match item {
                ast::SelectItem::UnnamedExpr(e) => {
                    evals.push(builder.build(e)?);
                    suggested.push(suggest_column_name(e));
                }
                ast::SelectItem::ExprWithAlias { expr, alias } => {
                    evals.push(builder.build(expr)?);
                    suggested.push(Some(ident(alias)));
                }
                ast::SelectItem::Wildcard(_) => {
                    for c in scope.star(None) {
                        evals.push(scope.finish(c.eval)?);
                        suggested.push(Some(c.name));
                    }
                }
                ast::SelectItem::QualifiedWildcard(name, _) => {
                    let qualifier = name.0.last().map(ident).unwrap_or_default();
                    if !scope.has_qualifier(&qualifier) {
                        return Err(SqlError::query(format!(
                            "missing FROM-clause entry for table \"{}\"",
                            qualifier
                        )));
                    }
                    for c in scope.star(Some(&qualifier)) {
                        evals.push(scope.finish(c.eval)?);
                        suggested.push(Some(c.name));
                    }
                }
            }
        }
        Ok(build_column_ids(&suggested).into_iter().zip(evals).collect())
    }

    /// Resolves an `ORDER BY` / `DISTINCT ON` key: an output position, an
    /// output name, or an expression.
    fn resolve_key(
        &self,
        builder: &ExprBuilder<'_>,
        key: &ast::Expr,
        items: &[(String, Evaluator)],
    ) -> SqlResult<Evaluator> {
        match output_reference(key, items)? {
            Some(e) => Ok(e),
            None => builder.build(key),
        }
    }

    /// Resolves a `GROUP BY` key against the source: positions and output
    /// names refer to select list expressions.
    fn group_key(
        &self,
        builder: &ExprBuilder<'_>,
        key: &ast::Expr,
        projection: &[ast::SelectItem],
    ) -> SqlResult<Evaluator> {
        let item_expr = |i: usize| match projection.get(i) {
            Some(ast::SelectItem::UnnamedExpr(e)) | Some(ast::SelectItem::ExprWithAlias { expr: e, .. }) => Ok(e),
            _ => Err(SqlError::query(format!(
                "GROUP BY position {} is not in select list",
                i + 1
            ))),
        };
        if let Some(position) = position_of(key)? {
            return builder.build(item_expr(position)?);
        }
        if let ast::Expr::Identifier(i) = key {
            match builder.build(key) {
                Ok(e) => return Ok(e),
                Err(SqlError::Query(_)) => {
                    let name = ident(i);
                    let aliased = projection.iter().find_map(|item| match item {
                        ast::SelectItem::ExprWithAlias { expr, alias } if ident(alias) == name => Some(expr),
                        _ => None,
                    });
                    if let Some(expr) = aliased {
                        return builder.build(expr);
                    }
                }
                Err(e) => return Err(e),
            }
        }
        builder.build(key)
    }
}

/// `ORDER BY 2` / `ORDER BY name` over already compiled output items.
fn output_reference(key: &ast::Expr, items: &[(String, Evaluator)]) -> SqlResult<Option<Evaluator>> {
    if let Some(position) = position_of(key)? {
        return items
            .get(position)
            .map(|(_, e)| Some(e.clone()))
            .ok_or_else(|| {
                SqlError::query(format!(
                    "ORDER BY position {} is not in select list",
                    position + 1
                ))
            });
    }
    if let ast::Expr::Identifier(i) = key {
        let name = ident(i);
        let mut matching = items.iter().filter(|(n, _)| *n == name);
        if let Some((_, first)) = matching.next() {
            if matching.any(|(_, e)| e.hash() != first.hash()) {
                return Err(SqlError::query(format!(
                    "ORDER BY \"{}\" is ambiguous",
                    name
                )));
            }
            return Ok(Some(first.clone()));
        }
    }
    Ok(None)
}

/// Zero-based position of an integer literal key.
fn position_of(key: &ast::Expr) -> SqlResult<Option<usize>> {
    match key {
        ast::Expr::Value(ast::Value::Number(n, _)) => match n.parse::<usize>() {
            Ok(p) if p >= 1 => Ok(Some(p - 1)),
            _ => Err(SqlError::query(format!(
                "position {} is not in select list",
                n
            ))),
        },
        _ => Ok(None),
    }
}

fn order_key(eval: Evaluator, o: &ast::OrderByExpr) -> OrderKey {
    OrderKey {
        eval,
        desc: o.asc == Some(false),
        nulls_first: o.nulls_first,
    }
}

fn finish_projection(
    source: Arc<dyn Selection>,
    items: Vec<(String, Evaluator)>,
    distinct: bool,
) -> Arc<dyn Selection> {
    let projected: Arc<dyn Selection> = Arc::new(Project::new(source, items));
    if distinct {
        Arc::new(Distinct::rows(projected))
    } else {
        projected
    }
}

#[cfg(test)]
mod tests {
    use crate::types::Value;
    use crate::Database;

    fn db() -> Database {
        let mut db = Database::new().unwrap();
        db.execute(
            "CREATE TABLE emp (id int, dept text, salary int);
             INSERT INTO emp VALUES (1, 'a', 10), (2, 'b', 20), (3, 'a', 30), (4, 'c', NULL);",
        )
        .unwrap();
        db
    }

    fn ints(rows: Vec<Vec<Value>>) -> Vec<Vec<i64>> {
        rows.into_iter()
            .map(|r| r.into_iter().map(|v| v.as_int().unwrap_or(-1)).collect())
            .collect()
    }

    #[test]
    fn test_order_by_position_alias_and_expression() {
        let mut db = db();
        let by_position = db.many("SELECT id FROM emp ORDER BY 1 DESC").unwrap();
        assert_eq!(ints(by_position), vec![vec![4], vec![3], vec![2], vec![1]]);
        let by_alias = db.many("SELECT id AS k FROM emp ORDER BY k DESC LIMIT 2").unwrap();
        assert_eq!(ints(by_alias), vec![vec![4], vec![3]]);
        let by_hidden = db
            .many("SELECT id FROM emp WHERE salary IS NOT NULL ORDER BY salary DESC")
            .unwrap();
        assert_eq!(ints(by_hidden), vec![vec![3], vec![2], vec![1]]);
    }

    #[test]
    fn test_group_order_resolves_against_group_rows() {
        let mut db = db();
        let rows = db
            .many("SELECT dept, count(*) FROM emp GROUP BY dept ORDER BY count(*) DESC, dept")
            .unwrap();
        assert_eq!(rows[0], vec![Value::text("a"), Value::Int(2)]);
        assert_eq!(rows.len(), 3);
        let err = db.query("SELECT id, count(*) FROM emp GROUP BY dept").unwrap_err();
        assert!(err.to_string().contains("must appear in the GROUP BY clause"));
    }

    #[test]
    fn test_implicit_single_group_and_having() {
        let mut db = db();
        assert_eq!(
            db.one("SELECT count(*), sum(salary) FROM emp").unwrap(),
            vec![Value::Int(4), Value::Int(60)]
        );
        let rows = db
            .many("SELECT dept FROM emp GROUP BY 1 HAVING count(*) > 1")
            .unwrap();
        assert_eq!(rows, vec![vec![Value::text("a")]]);
        assert_eq!(
            db.one("SELECT count(*) FROM emp WHERE false").unwrap(),
            vec![Value::Int(0)]
        );
    }

    #[test]
    fn test_union_and_values() {
        let mut db = db();
        let rows = db
            .many("SELECT id FROM emp WHERE id < 3 UNION SELECT 2 UNION ALL SELECT 9 ORDER BY 1")
            .unwrap();
        assert_eq!(ints(rows), vec![vec![1], vec![2], vec![9]]);
        let result = db.query("SELECT * FROM (VALUES (1, 'x'), (2, NULL)) AS v(n, s)").unwrap();
        assert_eq!(result.fields[0].name, "n");
        assert_eq!(result.fields[1].type_name, "text");
        assert_eq!(result.rows.len(), 2);
    }

    #[test]
    fn test_union_coerces_literals() {
        let mut db = db();
        let result = db.query("SELECT 1 UNION SELECT '2' ORDER BY 1").unwrap();
        assert_eq!(result.fields[0].type_name, "integer");
        assert_eq!(ints(result.rows), vec![vec![1], vec![2]]);
        let rows = db
            .many("SELECT id FROM emp WHERE id = 1 UNION SELECT '7' ORDER BY 1")
            .unwrap();
        assert_eq!(ints(rows), vec![vec![1], vec![7]]);
        assert!(db.execute("SELECT id FROM emp UNION SELECT dept FROM emp").is_err());
        assert!(db.execute("SELECT 1 UNION SELECT 'x'").is_err());
    }

    #[test]
    fn test_subqueries() {
        let mut db = db();
        let rows = db
            .many(
                "SELECT id FROM emp e WHERE EXISTS (SELECT 1 FROM emp o WHERE o.dept = e.dept AND o.id <> e.id) ORDER BY id",
            )
            .unwrap();
        assert_eq!(ints(rows), vec![vec![1], vec![3]]);
        let rows = db
            .many("SELECT id FROM emp WHERE dept IN (SELECT dept FROM emp WHERE salary > 15) ORDER BY id")
            .unwrap();
        assert_eq!(ints(rows), vec![vec![1], vec![2], vec![3]]);
        assert_eq!(
            db.one("SELECT (SELECT max(salary) FROM emp)").unwrap(),
            vec![Value::Int(30)]
        );
    }

    #[test]
    fn test_select_with_bindings() {
        let mut db = db();
        let rows = db
            .many("WITH rich AS (SELECT * FROM emp WHERE salary >= 20) SELECT id FROM rich ORDER BY id")
            .unwrap();
        assert_eq!(ints(rows), vec![vec![2], vec![3]]);
        let err = db
            .query("WITH x AS (SELECT 1), x AS (SELECT 2) SELECT * FROM x")
            .unwrap_err();
        assert_eq!(err.error.to_string(), "WITH query name \"x\" specified more than once");
    }

    #[test]
    fn test_using_join_hides_right_column() {
        let mut db = db();
        db.execute("CREATE TABLE dept (dept text, label text); INSERT INTO dept VALUES ('a', 'Alpha');")
            .unwrap();
        let result = db
            .query("SELECT * FROM emp JOIN dept USING (dept) ORDER BY id")
            .unwrap();
        let names: Vec<&str> = result.fields.iter().map(|f| f.name.as_str()).collect();
        assert_eq!(names, vec!["id", "dept", "salary", "label"]);
        assert_eq!(result.rows.len(), 2);
    }
}
