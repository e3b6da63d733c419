//! Compilation of parsed expressions into [`Evaluator`] trees.
//!
//! Names resolve against the builder's [`Scope`] first, then against the
//! scopes of enclosing queries (innermost first), which turns a reference
//! to an enclosing row into an [`Op::Outer`] read:
//!
//! ```text
//!   SELECT * FROM t WHERE EXISTS (SELECT 1 FROM u WHERE u.a = t.a)
//!
//!   scope  = [u.a, ...]          u.a  -> Column(scan(u), 0)
//!   outer  = [[t.a, ...]]        t.a  -> Outer(depth=1, 0)
//! ```
//!
//! Operand types are reconciled the same way everywhere (comparisons, `IN`,
//! `CASE` branches, `coalesce`): see [`unify`].

use std::collections::hash_map::DefaultHasher;
use std::hash::{Hash, Hasher};
use std::sync::Arc;

use sqlparser::ast;

use crate::catalog::{ident, Catalog, QName};
use crate::error::{SqlError, SqlResult};
use crate::executor::select::Planner;
use crate::selection::{Project, Selection};
use crate::types::cast::RegResolver;
use crate::types::{reconcile, Type, TypeKind, Value};

use super::aggregate::{AggregateCall, AggregateFunc};
use super::functions::{resolve_overload, Builtin};
use super::like::LikePattern;
use super::{BinaryOp, Evaluator, Op, Scope};

/// Reconciles the types of `args` and converts every argument to the
/// winner. Constants are converted as if cast explicitly.
pub(crate) fn unify(
    args: &[Evaluator],
    resolver: &dyn RegResolver,
) -> SqlResult<(Type, Vec<Evaluator>)> {
    let candidates: Vec<(Type, bool)> = args
        .iter()
        .map(|a| (a.ty().clone(), a.is_constant()))
        .collect();
    let ty = reconcile(&candidates, false)?.unwrap_or_else(Type::text);
    let converted = args
        .iter()
        .map(|a| a.coerce(&ty, resolver))
        .collect::<SqlResult<Vec<_>>>()?;
    Ok((ty, converted))
}

/// Builds a comparison after reconciling both operand types.
pub(crate) fn comparison(
    op: BinaryOp,
    left: Evaluator,
    right: Evaluator,
    resolver: &dyn RegResolver,
) -> SqlResult<Evaluator> {
    let sql = format!("{} {} {}", left.sql(), op.as_str(), right.sql());
    let (ty, mut operands) = unify(&[left, right], resolver)?;
    let right = operands.pop().unwrap_or_else(Evaluator::null);
    let left = operands.pop().unwrap_or_else(Evaluator::null);
    Ok(Evaluator::new(
        Op::Compare {
            op,
            left,
            right,
            ty,
        },
        Type::bool(),
        sql,
    ))
}

/// Compiles expressions against a scope.
pub struct ExprBuilder<'a> {
    planner: &'a Planner<'a>,
    scope: &'a dyn Scope,
    outer: &'a [&'a dyn Scope],
}

impl<'a> ExprBuilder<'a> {
    /// Creates a builder resolving names in `scope`, then in the enclosing
    /// query scopes `outer` (innermost first).
    pub fn new(planner: &'a Planner<'a>, scope: &'a dyn Scope, outer: &'a [&'a dyn Scope]) -> Self {
        Self {
            planner,
            scope,
            outer,
        }
    }

    fn catalog(&self) -> &'a Catalog {
        self.planner.catalog()
    }

    /// Compiles a complete expression.
    pub fn build(&self, expr: &ast::Expr) -> SqlResult<Evaluator> {
        let e = self.build_inner(expr)?;
        self.scope.finish(e)
    }

    /// Compiles a complete expression and converts it to `ty`.
    pub fn build_as(&self, expr: &ast::Expr, ty: &Type) -> SqlResult<Evaluator> {
        self.build(expr)?.coerce(ty, self.catalog())
    }

    /// Compiles a condition (`WHERE`, `ON`, `HAVING`, `CHECK`).
    pub fn build_predicate(&self, expr: &ast::Expr) -> SqlResult<Evaluator> {
        let e = self.build(expr)?;
        self.boolean(e)
    }

    fn boolean(&self, e: Evaluator) -> SqlResult<Evaluator> {
        if e.ty().kind() == TypeKind::Bool {
            return Ok(e);
        }
        if e.is_constant() || e.ty().is_null() {
            return e.convert(&Type::bool(), true, self.catalog());
        }
        Err(SqlError::query(format!(
            "argument of boolean expression must be type boolean, not type {}",
            e.ty().name()
        )))
    }

    /// Compiles without the scope's final rewrite; sub-expressions are built
    /// this way.
    pub fn build_inner(&self, expr: &ast::Expr) -> SqlResult<Evaluator> {
        use ast::Expr as E;
        let sql = expr.to_string();
        match expr {
            E::Identifier(i) => self.identifier(i),
            E::CompoundIdentifier(parts) => self.compound(parts),
            E::Value(v) => literal(v),
            E::Nested(inner) => self.build_inner(inner),
            E::TypedString { data_type, value } => {
                let ty = self.catalog().resolve_data_type(data_type)?;
                Evaluator::constant(Value::text(value.clone()), Type::text()).convert(
                    &ty,
                    true,
                    self.catalog(),
                )
            }
            E::Cast {
                expr: inner,
                data_type,
                ..
            } => {
                let ty = self.catalog().resolve_data_type(data_type)?;
                let source = self.build_inner(inner)?;
                let converted = source.convert(&ty, true, self.catalog())?;
                Ok(if converted.is_constant() {
                    converted.with_sql(sql)
                } else {
                    converted
                })
            }
            E::UnaryOp { op, expr: inner } => self.unary(op, inner, sql),
            E::BinaryOp { left, op, right } => self.binary(left, op, right, sql),
            E::IsNull(inner) | E::IsNotNull(inner) => Ok(Evaluator::new(
                Op::IsNull {
                    arg: self.build_inner(inner)?,
                    negated: matches!(expr, E::IsNotNull(_)),
                },
                Type::bool(),
                sql,
            )),
            E::IsTrue(inner) | E::IsNotTrue(inner) | E::IsFalse(inner) | E::IsNotFalse(inner) => {
                let arg = self.boolean(self.build_inner(inner)?)?;
                Ok(Evaluator::new(
                    Op::IsBool {
                        arg,
                        value: matches!(expr, E::IsTrue(_) | E::IsNotTrue(_)),
                        negated: matches!(expr, E::IsNotTrue(_) | E::IsNotFalse(_)),
                    },
                    Type::bool(),
                    sql,
                ))
            }
            E::InList {
                expr: inner,
                list,
                negated,
            } => {
                let mut all = vec![self.build_inner(inner)?];
                for item in list {
                    all.push(self.build_inner(item)?);
                }
                let (ty, mut all) = unify(&all, self.catalog())?;
                let arg = all.remove(0);
                Ok(Evaluator::new(
                    Op::InList {
                        arg,
                        list: all,
                        negated: *negated,
                        ty,
                    },
                    Type::bool(),
                    sql,
                ))
            }
            E::InSubquery {
                expr: inner,
                subquery,
                negated,
            } => {
                let arg = self.build_inner(inner)?;
                let selection = self.single_column(subquery)?;
                let column_ty = selection.columns()[0].ty().clone();
                let ty = reconcile(&[(arg.ty().clone(), arg.is_constant()), (column_ty.clone(), false)], false)?
                    .unwrap_or_else(Type::text);
                let arg = arg.coerce(&ty, self.catalog())?;
                let selection = if column_ty == ty {
                    selection
                } else {
                    let column = &selection.columns()[0];
                    let converted = column.eval.convert(&ty, false, self.catalog())?;
                    let name = column.name.clone();
                    Arc::new(Project::new(selection.clone(), vec![(name, converted)]))
                };
                Ok(Evaluator::new(
                    Op::InSelection {
                        arg,
                        selection,
                        negated: *negated,
                        ty,
                    },
                    Type::bool(),
                    sql,
                ))
            }
            E::Exists { subquery, negated } => {
                let selection = self.subquery(subquery)?;
                Ok(Evaluator::new(
                    Op::Exists {
                        selection,
                        negated: *negated,
                    },
                    Type::bool(),
                    sql,
                ))
            }
            E::Subquery(query) => {
                let selection = self.single_column(query)?;
                let ty = selection.columns()[0].ty().clone();
                Ok(Evaluator::new(Op::Scalar(selection), ty, sql))
            }
            E::Between {
                expr: inner,
                negated,
                low,
                high,
            } => {
                let operands = [
                    self.build_inner(inner)?,
                    self.build_inner(low)?,
                    self.build_inner(high)?,
                ];
                let (ty, operands) = unify(&operands, self.catalog())?;
                let [arg, low, high]: [Evaluator; 3] = operands
                    .try_into()
                    .map_err(|_| SqlError::Internal("BETWEEN lost an operand".into()))?;
                Ok(Evaluator::new(
                    Op::Between {
                        arg,
                        low,
                        high,
                        negated: *negated,
                        ty,
                    },
                    Type::bool(),
                    sql,
                ))
            }
            E::Like {
                negated,
                expr: inner,
                pattern,
                escape_char,
            } => self.like(inner, pattern, *escape_char, *negated, false, sql),
            E::ILike {
                negated,
                expr: inner,
                pattern,
                escape_char,
            } => self.like(inner, pattern, *escape_char, *negated, true, sql),
            E::Case {
                operand,
                conditions,
                results,
                else_result,
            } => self.case(operand.as_deref(), conditions, results, else_result.as_deref(), sql),
            E::Function(f) => self.function(f, sql),
            E::ArrayAgg(agg) => {
                if agg.order_by.is_some() || agg.limit.is_some() || agg.within_group {
                    return Err(SqlError::not_supported("array_agg with ORDER BY or LIMIT"));
                }
                self.aggregate(AggregateFunc::ArrayAgg, Some(agg.expr.as_ref()), None, agg.distinct, sql)
            }
            E::Array(array) => {
                let items = array
                    .elem
                    .iter()
                    .map(|e| self.build_inner(e))
                    .collect::<SqlResult<Vec<_>>>()?;
                let (ty, items) = unify(&items, self.catalog())?;
                Ok(Evaluator::new(Op::Array(items), Type::array_of(&ty), sql))
            }
            E::ArrayIndex { obj, indexes } => {
                let mut current = self.build_inner(obj)?;
                for index in indexes {
                    let Some(element) = current.ty().element().cloned() else {
                        return Err(SqlError::query(format!(
                            "cannot subscript type {} because it is not an array",
                            current.ty().name()
                        )));
                    };
                    let index = self.build_inner(index)?.coerce(&Type::integer(), self.catalog())?;
                    let text = format!("{}[{}]", current.sql(), index.sql());
                    current = Evaluator::new(
                        Op::Subscript {
                            array: current,
                            index,
                        },
                        element,
                        text,
                    );
                }
                Ok(current)
            }
            E::JsonAccess {
                left,
                operator,
                right,
            } => {
                let as_text = match operator {
                    ast::JsonOperator::Arrow => false,
                    ast::JsonOperator::LongArrow => true,
                    other => {
                        return Err(SqlError::not_supported(format!("operator {}", other)));
                    }
                };
                let mut doc = self.build_inner(left)?;
                if !matches!(doc.ty().kind(), TypeKind::Json | TypeKind::Jsonb) {
                    if !doc.is_constant() {
                        return Err(SqlError::query(format!(
                            "operator does not exist: {} {} unknown",
                            doc.ty().name(),
                            operator
                        )));
                    }
                    doc = doc.convert(&Type::jsonb(), true, self.catalog())?;
                }
                let key = self.build_inner(right)?;
                let key = match key.ty().kind() {
                    TypeKind::Integer => key,
                    _ => key.convert(&Type::text(), true, self.catalog())?,
                };
                let ty = if as_text { Type::text() } else { doc.ty().clone() };
                Ok(Evaluator::new(Op::JsonGet { doc, key, as_text }, ty, sql))
            }
            other => Err(SqlError::not_supported(format!("expression {}", other))),
        }
    }

    // ------------------------------------------------------------------------
    // Names
    // ------------------------------------------------------------------------

    fn identifier(&self, i: &ast::Ident) -> SqlResult<Evaluator> {
        let name = ident(i);
        match self.resolve(None, &name) {
            Err(SqlError::Query(_)) if i.quote_style.is_none() => {
                // keywords the parser leaves as bare names
                match name.as_str() {
                    "current_schema" => self.builtin(Builtin::CurrentSchema, Vec::new(), name),
                    "current_timestamp" | "localtimestamp" => {
                        self.builtin(Builtin::Now, Vec::new(), name)
                    }
                    _ => self.resolve(None, &name),
                }
            }
            other => other,
        }
    }

    fn compound(&self, parts: &[ast::Ident]) -> SqlResult<Evaluator> {
        match parts {
            [table, column] => self.resolve(Some(&ident(table)), &ident(column)),
            [_schema, table, column] => self.resolve(Some(&ident(table)), &ident(column)),
            _ => Err(SqlError::not_supported(format!(
                "column reference {}",
                ast::ObjectName(parts.to_vec())
            ))),
        }
    }

    fn resolve(&self, qualifier: Option<&str>, name: &str) -> SqlResult<Evaluator> {
        if let Some(e) = self.scope.column(qualifier, name)? {
            return Ok(e);
        }
        for (i, scope) in self.outer.iter().enumerate() {
            let Some(e) = scope.column(qualifier, name)? else {
                continue;
            };
            if scope.aggregate_source().is_some() {
                return Err(SqlError::not_supported(
                    "correlated reference to a grouped query",
                ));
            }
            let Op::Column { idx, .. } = e.op() else {
                return Err(SqlError::not_supported(format!(
                    "correlated reference to {}",
                    e.sql()
                )));
            };
            return Ok(Evaluator::new(
                Op::Outer {
                    depth: i + 1,
                    idx: *idx,
                },
                e.ty().clone(),
                e.sql(),
            ));
        }
        match qualifier {
            Some(q)
                if !self.scope.has_qualifier(q) && !self.outer.iter().any(|s| s.has_qualifier(q)) =>
            {
                Err(SqlError::query(format!(
                    "missing FROM-clause entry for table \"{}\"",
                    q
                )))
            }
            Some(q) => Err(SqlError::query(format!(
                "column {}.{} does not exist",
                q, name
            ))),
            None => Err(SqlError::query(format!("column \"{}\" does not exist", name))),
        }
    }

    // ------------------------------------------------------------------------
    // Operators
    // ------------------------------------------------------------------------

    fn unary(&self, op: &ast::UnaryOperator, inner: &ast::Expr, sql: String) -> SqlResult<Evaluator> {
        let arg = self.build_inner(inner)?;
        match op {
            ast::UnaryOperator::Plus => Ok(arg),
            ast::UnaryOperator::Minus => {
                let arg = match arg.ty().kind() {
                    TypeKind::Integer | TypeKind::Float => arg,
                    _ if arg.is_constant() => arg.convert(&Type::float(), true, self.catalog())?,
                    _ => {
                        return Err(SqlError::query(format!(
                            "operator does not exist: - {}",
                            arg.ty().name()
                        )))
                    }
                };
                match arg.constant_value() {
                    Some(Value::Int(i)) => {
                        let negated = i
                            .checked_neg()
                            .ok_or_else(|| SqlError::query("integer out of range"))?;
                        Ok(Evaluator::new(Op::Constant(Value::Int(negated)), Type::integer(), sql))
                    }
                    Some(Value::Float(f)) => {
                        Ok(Evaluator::new(Op::Constant(Value::Float(-f)), Type::float(), sql))
                    }
                    _ => {
                        let ty = arg.ty().clone();
                        Ok(Evaluator::new(Op::Neg(arg), ty, sql))
                    }
                }
            }
            ast::UnaryOperator::Not => {
                let arg = self.boolean(arg)?;
                Ok(Evaluator::new(Op::Not(arg), Type::bool(), sql))
            }
            other => Err(SqlError::not_supported(format!("operator {}", other))),
        }
    }

    fn binary(
        &self,
        left: &ast::Expr,
        op: &ast::BinaryOperator,
        right: &ast::Expr,
        sql: String,
    ) -> SqlResult<Evaluator> {
        use ast::BinaryOperator as B;
        let l = self.build_inner(left)?;
        let r = self.build_inner(right)?;
        let compare = |op: BinaryOp| comparison(op, l.clone(), r.clone(), self.catalog()).map(|e| e.with_sql(sql.clone()));
        match op {
            B::Eq => compare(BinaryOp::Eq),
            B::NotEq => compare(BinaryOp::NotEq),
            B::Lt => compare(BinaryOp::Lt),
            B::LtEq => compare(BinaryOp::LtEq),
            B::Gt => compare(BinaryOp::Gt),
            B::GtEq => compare(BinaryOp::GtEq),
            B::And | B::Or => Ok(Evaluator::new(
                Op::Logic {
                    and: matches!(op, B::And),
                    left: self.boolean(l)?,
                    right: self.boolean(r)?,
                },
                Type::bool(),
                sql,
            )),
            B::Plus => self.arith(BinaryOp::Add, l, r, sql),
            B::Minus => self.arith(BinaryOp::Sub, l, r, sql),
            B::Multiply => self.arith(BinaryOp::Mul, l, r, sql),
            B::Divide => self.arith(BinaryOp::Div, l, r, sql),
            B::Modulo => self.arith(BinaryOp::Mod, l, r, sql),
            B::StringConcat => self.concat(l, r, sql),
            other => Err(SqlError::not_supported(format!("operator {}", other))),
        }
    }

    fn arith(&self, op: BinaryOp, l: Evaluator, r: Evaluator, sql: String) -> SqlResult<Evaluator> {
        let (ty, mut operands) = unify(&[l.clone(), r.clone()], self.catalog()).map_err(|_| {
            SqlError::query(format!(
                "operator does not exist: {} {} {}",
                l.ty().name(),
                op.as_str(),
                r.ty().name()
            ))
        })?;
        let ty = match ty.kind() {
            TypeKind::Integer | TypeKind::Float => ty,
            // two untyped literals, as in `'1' + '2'`
            TypeKind::Text if l.is_constant() && r.is_constant() => {
                let (ty, converted) = unify(
                    &[
                        l.convert(&Type::float(), true, self.catalog())?,
                        r.convert(&Type::float(), true, self.catalog())?,
                    ],
                    self.catalog(),
                )?;
                operands = converted;
                ty
            }
            _ => {
                return Err(SqlError::query(format!(
                    "operator does not exist: {} {} {}",
                    l.ty().name(),
                    op.as_str(),
                    r.ty().name()
                )))
            }
        };
        let right = operands.pop().unwrap_or_else(Evaluator::null);
        let left = operands.pop().unwrap_or_else(Evaluator::null);
        Ok(Evaluator::new(Op::Arith { op, left, right }, ty, sql))
    }

    fn concat(&self, l: Evaluator, r: Evaluator, sql: String) -> SqlResult<Evaluator> {
        let array = l
            .ty()
            .element()
            .map(|_| l.ty().clone())
            .or_else(|| r.ty().element().map(|_| r.ty().clone()));
        if let Some(array_ty) = array {
            let element = array_ty.element().cloned().unwrap_or_else(Type::text);
            let side = |e: Evaluator| -> SqlResult<Evaluator> {
                if e.ty().element().is_some() {
                    e.coerce(&array_ty, self.catalog())
                } else {
                    e.coerce(&element, self.catalog())
                }
            };
            return Ok(Evaluator::new(Op::Concat(side(l)?, side(r)?), array_ty, sql));
        }
        let text = |e: Evaluator| e.convert(&Type::text(), true, self.catalog());
        Ok(Evaluator::new(Op::Concat(text(l)?, text(r)?), Type::text(), sql))
    }

    fn like(
        &self,
        inner: &ast::Expr,
        pattern: &ast::Expr,
        escape: Option<char>,
        negated: bool,
        insensitive: bool,
        sql: String,
    ) -> SqlResult<Evaluator> {
        if escape.is_some() {
            return Err(SqlError::not_supported("LIKE ... ESCAPE"));
        }
        let arg = self.build_inner(inner)?;
        let case_insensitive = insensitive || arg.ty().kind() == TypeKind::Citext;
        let to_text = |e: Evaluator| -> SqlResult<Evaluator> {
            if e.ty().is_text() || e.ty().is_null() || e.is_constant() {
                e.convert(&Type::text(), true, self.catalog())
            } else {
                Err(SqlError::query(format!(
                    "operator does not exist: {} ~~ text",
                    e.ty().name()
                )))
            }
        };
        let arg = to_text(arg)?;
        let pattern = to_text(self.build_inner(pattern)?)?;
        let compiled = match pattern.constant_value() {
            Some(Value::Text(p)) => Some(LikePattern::new(p, case_insensitive)),
            _ => None,
        };
        Ok(Evaluator::new(
            Op::Like {
                arg,
                pattern,
                compiled,
                case_insensitive,
                negated,
            },
            Type::bool(),
            sql,
        ))
    }

    fn case(
        &self,
        operand: Option<&ast::Expr>,
        conditions: &[ast::Expr],
        results: &[ast::Expr],
        otherwise: Option<&ast::Expr>,
        sql: String,
    ) -> SqlResult<Evaluator> {
        let operand = operand.map(|o| self.build_inner(o)).transpose()?;
        let mut tests = Vec::with_capacity(conditions.len());
        for condition in conditions {
            let c = self.build_inner(condition)?;
            tests.push(match &operand {
                Some(o) => comparison(BinaryOp::Eq, o.clone(), c, self.catalog())?,
                None => self.boolean(c)?,
            });
        }
        let mut values = results
            .iter()
            .map(|r| self.build_inner(r))
            .collect::<SqlResult<Vec<_>>>()?;
        if let Some(o) = otherwise {
            values.push(self.build_inner(o)?);
        }
        let (ty, mut values) = unify(&values, self.catalog())?;
        let otherwise = if otherwise.is_some() { values.pop() } else { None };
        Ok(Evaluator::new(
            Op::Case {
                branches: tests.into_iter().zip(values).collect(),
                otherwise,
            },
            ty,
            sql,
        ))
    }

    // ------------------------------------------------------------------------
    // Functions
    // ------------------------------------------------------------------------

    fn function(&self, f: &ast::Function, sql: String) -> SqlResult<Evaluator> {
        if f.over.is_some() {
            return Err(SqlError::not_supported("window functions"));
        }
        let qname = QName::from_object_name(&f.name)?;
        let name = qname.name.to_lowercase();
        let system = matches!(qname.schema.as_deref(), None | Some(crate::catalog::PG_CATALOG));

        if system {
            if let Some(func) = AggregateFunc::from_name(&name) {
                return self.aggregate_call(func, f, sql);
            }
        }
        if f.distinct {
            return Err(SqlError::query(format!(
                "DISTINCT specified, but {} is not an aggregate function",
                name
            )));
        }

        let mut args = Vec::with_capacity(f.args.len());
        for arg in &f.args {
            match arg {
                ast::FunctionArg::Unnamed(ast::FunctionArgExpr::Expr(e)) => {
                    args.push(self.build_inner(e)?)
                }
                _ => {
                    return Err(SqlError::not_supported(format!(
                        "argument {} of {}",
                        arg, name
                    )))
                }
            }
        }

        let candidates = self.catalog().functions(&qname);
        if !candidates.is_empty() {
            let (def, args) = resolve_overload(&name, &candidates, &args, self.catalog())?;
            let ty = def.returns.clone();
            return Ok(Evaluator::new(Op::Call { def, args }, ty, sql));
        }
        match Builtin::from_name(&name).filter(|_| system) {
            Some(func) => self.builtin(func, args, sql),
            None => {
                let types: Vec<String> = args.iter().map(|a| a.ty().name()).collect();
                Err(SqlError::query(format!(
                    "function {}({}) does not exist",
                    name,
                    types.join(", ")
                )))
            }
        }
    }

    fn builtin(&self, func: Builtin, args: Vec<Evaluator>, sql: String) -> SqlResult<Evaluator> {
        let (args, ty) = func.prepare(args, self.catalog())?;
        Ok(Evaluator::new(Op::Builtin { func, args }, ty, sql))
    }

    fn aggregate_call(&self, func: AggregateFunc, f: &ast::Function, sql: String) -> SqlResult<Evaluator> {
        let exprs: Vec<&ast::FunctionArgExpr> = f
            .args
            .iter()
            .map(|a| match a {
                ast::FunctionArg::Unnamed(e) => e,
                ast::FunctionArg::Named { arg, .. } => arg,
            })
            .collect();
        match (func, exprs.as_slice()) {
            (AggregateFunc::Count, [ast::FunctionArgExpr::Wildcard]) => {
                self.aggregate(AggregateFunc::CountStar, None, None, false, sql)
            }
            (AggregateFunc::StringAgg, [ast::FunctionArgExpr::Expr(e), ast::FunctionArgExpr::Expr(sep)]) => {
                let separator = match self.build_inner(sep)?.constant_value() {
                    Some(Value::Text(s)) => s.clone(),
                    Some(Value::Null) => String::new(),
                    _ => {
                        return Err(SqlError::not_supported(
                            "string_agg with a non-constant separator",
                        ))
                    }
                };
                self.aggregate(func, Some(e), Some(separator), f.distinct, sql)
            }
            (_, [ast::FunctionArgExpr::Expr(e)]) if func != AggregateFunc::StringAgg => {
                self.aggregate(func, Some(e), None, f.distinct, sql)
            }
            _ => Err(SqlError::query(format!(
                "function {}({}) does not exist",
                func.name(),
                exprs.iter().map(|e| e.to_string()).collect::<Vec<_>>().join(", ")
            ))),
        }
    }

    fn aggregate(
        &self,
        func: AggregateFunc,
        arg: Option<&ast::Expr>,
        separator: Option<String>,
        distinct: bool,
        sql: String,
    ) -> SqlResult<Evaluator> {
        let Some(source) = self.scope.aggregate_source() else {
            return Err(SqlError::query(format!(
                "aggregate functions are not allowed here: {}",
                func.name()
            )));
        };
        let arg = match arg {
            Some(e) => {
                let inner = ExprBuilder::new(self.planner, source, self.outer);
                Some(source.finish(inner.build_inner(e)?)?)
            }
            None => None,
        };
        let ty = func.result_type(arg.as_ref().map(Evaluator::ty))?;
        let mut h = DefaultHasher::new();
        func.hash(&mut h);
        arg.as_ref().map(Evaluator::hash).hash(&mut h);
        separator.hash(&mut h);
        distinct.hash(&mut h);
        let call = AggregateCall {
            func,
            arg,
            separator,
            distinct,
            ty,
            hash: h.finish(),
        };
        Ok(self.scope.register_aggregate(call)?.with_sql(sql))
    }

    // ------------------------------------------------------------------------
    // Subqueries
    // ------------------------------------------------------------------------

    fn subquery(&self, query: &ast::Query) -> SqlResult<Arc<dyn Selection>> {
        let mut chain: Vec<&dyn Scope> = Vec::with_capacity(self.outer.len() + 1);
        chain.push(self.scope);
        chain.extend_from_slice(self.outer);
        self.planner.plan_query(query, &chain)
    }

    fn single_column(&self, query: &ast::Query) -> SqlResult<Arc<dyn Selection>> {
        let selection = self.subquery(query)?;
        match selection.columns().len() {
            1 => Ok(selection),
            0 => Err(SqlError::query("subquery must return a column")),
            _ => Err(SqlError::query("subquery must return only one column")),
        }
    }
}

/// Compiles a literal.
fn literal(v: &ast::Value) -> SqlResult<Evaluator> {
    use ast::Value as V;
    let sql = v.to_string();
    let (value, ty) = match v {
        V::Number(n, _) => match n.parse::<i64>() {
            Ok(i) => (Value::Int(i), Type::integer()),
            Err(_) => match n.parse::<f64>() {
                Ok(f) => (Value::Float(f), Type::float()),
                Err(_) => {
                    return Err(SqlError::query(format!(
                        "invalid input syntax for type numeric: {}",
                        n
                    )))
                }
            },
        },
        V::SingleQuotedString(s) | V::EscapedStringLiteral(s) => (Value::text(s.clone()), Type::text()),
        V::DollarQuotedString(d) => (Value::text(d.value.clone()), Type::text()),
        V::Boolean(b) => (Value::Bool(*b), Type::bool()),
        V::Null => return Ok(Evaluator::null()),
        V::Placeholder(p) => {
            return Err(SqlError::not_supported(format!("query parameter {}", p)));
        }
        other => return Err(SqlError::not_supported(format!("literal {}", other))),
    };
    Ok(Evaluator::new(Op::Constant(value), ty, sql))
}

// ============================================================================
// Syntactic helpers
// ============================================================================

/// Returns true if `expr` calls an aggregate outside of any subquery.
pub(crate) fn contains_aggregate(expr: &ast::Expr) -> bool {
    use ast::Expr as E;
    match expr {
        E::Function(f) => {
            let name = f
                .name
                .0
                .last()
                .map(|i| i.value.to_lowercase())
                .unwrap_or_default();
            (f.over.is_none() && f.name.0.len() == 1 && AggregateFunc::from_name(&name).is_some())
                || f.args.iter().any(|a| match a {
                    ast::FunctionArg::Unnamed(ast::FunctionArgExpr::Expr(e))
                    | ast::FunctionArg::Named {
                        arg: ast::FunctionArgExpr::Expr(e),
                        ..
                    } => contains_aggregate(e),
                    _ => false,
                })
        }
        E::ArrayAgg(_) => true,
        E::Nested(e)
        | E::UnaryOp { expr: e, .. }
        | E::Cast { expr: e, .. }
        | E::IsNull(e)
        | E::IsNotNull(e)
        | E::IsTrue(e)
        | E::IsNotTrue(e)
        | E::IsFalse(e)
        | E::IsNotFalse(e)
        | E::InSubquery { expr: e, .. } => contains_aggregate(e),
        E::BinaryOp { left, right, .. } | E::JsonAccess { left, right, .. } => {
            contains_aggregate(left) || contains_aggregate(right)
        }
        E::Like { expr, pattern, .. } | E::ILike { expr, pattern, .. } => {
            contains_aggregate(expr) || contains_aggregate(pattern)
        }
        E::Between {
            expr, low, high, ..
        } => contains_aggregate(expr) || contains_aggregate(low) || contains_aggregate(high),
        E::InList { expr, list, .. } => {
            contains_aggregate(expr) || list.iter().any(contains_aggregate)
        }
        E::Case {
            operand,
            conditions,
            results,
            else_result,
        } => {
            operand.as_deref().map_or(false, contains_aggregate)
                || conditions.iter().any(contains_aggregate)
                || results.iter().any(contains_aggregate)
                || else_result.as_deref().map_or(false, contains_aggregate)
        }
        E::Array(a) => a.elem.iter().any(contains_aggregate),
        E::ArrayIndex { obj, indexes } => {
            contains_aggregate(obj) || indexes.iter().any(contains_aggregate)
        }
        _ => false,
    }
}

/// Output name Postgres would give to an unaliased select item.
pub(crate) fn suggest_column_name(expr: &ast::Expr) -> Option<String> {
    use ast::Expr as E;
    match expr {
        E::Identifier(i) => Some(ident(i)),
        E::CompoundIdentifier(parts) => parts.last().map(ident),
        E::Nested(e) => suggest_column_name(e),
        E::Function(f) => f.name.0.last().map(|i| i.value.to_lowercase()),
        E::ArrayAgg(_) => Some("array_agg".into()),
        E::Cast { expr, data_type, .. } => match expr.as_ref() {
            E::Identifier(_) | E::CompoundIdentifier(_) | E::Function(_) | E::Cast { .. } => {
                suggest_column_name(expr)
            }
            _ => Some(
                data_type
                    .to_string()
                    .split('(')
                    .next()
                    .unwrap_or_default()
                    .trim()
                    .to_lowercase(),
            ),
        },
        E::TypedString { data_type, .. } => Some(data_type.to_string().to_lowercase()),
        E::Case { .. } => Some("case".into()),
        E::Exists { .. } => Some("exists".into()),
        E::Array(_) => Some("array".into()),
        E::ArrayIndex { obj, .. } => suggest_column_name(obj),
        E::JsonAccess { right, .. } => match right.as_ref() {
            E::Value(ast::Value::SingleQuotedString(s)) => Some(s.clone()),
            _ => None,
        },
        E::Subquery(q) => match q.body.as_ref() {
            ast::SetExpr::Select(s) if s.projection.len() == 1 => match &s.projection[0] {
                ast::SelectItem::ExprWithAlias { alias, .. } => Some(ident(alias)),
                ast::SelectItem::UnnamedExpr(e) => suggest_column_name(e),
                _ => None,
            },
            _ => None,
        },
        _ => None,
    }
}
