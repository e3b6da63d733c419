//! Typed value expressions.
//!
//! An [`Evaluator`] is an immutable, shareable node computing a value from a
//! row. Each node carries its [`Type`], the SQL text it was built from and a
//! structural hash; two nodes computing the same thing over the same source
//! hash the same, which is how `GROUP BY` keys are matched against the
//! select list and how identical aggregate calls share one accumulator.
//!
//! ```text
//!   a + 1 > 3
//!
//!   Compare(>, int)
//!   ├── Arith(+)
//!   │   ├── Column(origin=scan#7, idx=0)      "a"
//!   │   └── Constant(1)
//!   └── Constant(3)
//! ```
//!
//! Casting wraps a node in a `Convert` node holding a planned
//! [`Conversion`]; casts of constants are folded when built.
//!
//! Evaluation threads an explicit [`EvalContext`] (catalog, the transaction
//! holding the data, the statement clock) rather than relying on any global
//! state.

pub mod aggregate;
pub mod build;
pub mod functions;
pub mod like;

use std::collections::hash_map::DefaultHasher;
use std::fmt;
use std::hash::{Hash, Hasher};
use std::sync::Arc;

use chrono::NaiveDateTime;

use crate::catalog::Catalog;
use crate::error::{SqlError, SqlResult};
use crate::selection::{Column, Selection};
use crate::storage::{DataTx, Row};
use crate::types::cast::RegResolver;
use crate::types::compare::compare;
use crate::types::{plan_cast, Conversion, Type, TypeKind, Value};

pub use aggregate::{Accumulator, AggregateCall, AggregateFunc};
pub use build::ExprBuilder;
pub use functions::{Builtin, FunctionDef};
pub use like::LikePattern;

// ============================================================================
// Evaluation context
// ============================================================================

/// Everything an evaluator may need besides the row.
pub struct EvalContext<'a> {
    /// Catalog, for registry lookups and sequences.
    pub catalog: &'a Catalog,
    /// Transaction holding the data.
    pub data: &'a mut DataTx,
    /// Statement timestamp, returned by `now()`.
    pub now: NaiveDateTime,
    outer: Vec<Row>,
}

impl<'a> EvalContext<'a> {
    /// Creates a context.
    pub fn new(catalog: &'a Catalog, data: &'a mut DataTx, now: NaiveDateTime) -> Self {
        Self {
            catalog,
            data,
            now,
            outer: Vec::new(),
        }
    }

    /// Runs `f` with `row` visible to correlated subqueries.
    fn with_outer<R>(&mut self, row: &[Value], f: impl FnOnce(&mut Self) -> R) -> R {
        self.outer.push(row.to_vec());
        let result = f(self);
        self.outer.pop();
        result
    }
}

// ============================================================================
// Operators
// ============================================================================

/// Binary operators.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum BinaryOp {
    /// `+`.
    Add,
    /// `-`.
    Sub,
    /// `*`.
    Mul,
    /// `/`.
    Div,
    /// `%`.
    Mod,
    /// `=`.
    Eq,
    /// `<>`.
    NotEq,
    /// `<`.
    Lt,
    /// `<=`.
    LtEq,
    /// `>`.
    Gt,
    /// `>=`.
    GtEq,
}

impl BinaryOp {
    /// SQL spelling.
    pub fn as_str(&self) -> &'static str {
        match self {
            BinaryOp::Add => "+",
            BinaryOp::Sub => "-",
            BinaryOp::Mul => "*",
            BinaryOp::Div => "/",
            BinaryOp::Mod => "%",
            BinaryOp::Eq => "=",
            BinaryOp::NotEq => "<>",
            BinaryOp::Lt => "<",
            BinaryOp::LtEq => "<=",
            BinaryOp::Gt => ">",
            BinaryOp::GtEq => ">=",
        }
    }

    /// Returns true for comparison operators.
    pub fn is_comparison(&self) -> bool {
        !matches!(
            self,
            BinaryOp::Add | BinaryOp::Sub | BinaryOp::Mul | BinaryOp::Div | BinaryOp::Mod
        )
    }
}

/// The computation of a node.
#[derive(Debug, Clone)]
pub enum Op {
    /// A constant.
    Constant(Value),
    /// A value of the current row. `origin` identifies the row shape the
    /// index refers to.
    Column {
        /// Identity of the row producer.
        origin: u64,
        /// Position in the row.
        idx: usize,
    },
    /// A value of an enclosing query's row, for correlated subqueries.
    Outer {
        /// Number of query levels up (1 = direct parent).
        depth: usize,
        /// Position in that row.
        idx: usize,
    },
    /// A type conversion.
    Convert {
        /// Converted node.
        source: Evaluator,
        /// Planned conversion.
        conversion: Conversion,
    },
    /// Arithmetic; both operands have the node's type.
    Arith {
        /// Operator.
        op: BinaryOp,
        /// Left operand.
        left: Evaluator,
        /// Right operand.
        right: Evaluator,
    },
    /// Comparison; both operands have type `ty`.
    Compare {
        /// Operator.
        op: BinaryOp,
        /// Left operand.
        left: Evaluator,
        /// Right operand.
        right: Evaluator,
        /// Type both operands were reconciled to.
        ty: Type,
    },
    /// `AND` / `OR` with three-valued logic.
    Logic {
        /// True for `AND`.
        and: bool,
        /// Left operand.
        left: Evaluator,
        /// Right operand.
        right: Evaluator,
    },
    /// Arithmetic negation.
    Neg(Evaluator),
    /// Boolean negation.
    Not(Evaluator),
    /// `||` over texts, or over arrays.
    Concat(Evaluator, Evaluator),
    /// `->` / `->>`.
    JsonGet {
        /// Document.
        doc: Evaluator,
        /// Key or index.
        key: Evaluator,
        /// `->>` returns text.
        as_text: bool,
    },
    /// `IS [NOT] NULL`.
    IsNull {
        /// Tested value.
        arg: Evaluator,
        /// `IS NOT NULL`.
        negated: bool,
    },
    /// `IS [NOT] TRUE|FALSE`.
    IsBool {
        /// Tested value.
        arg: Evaluator,
        /// `TRUE` or `FALSE`.
        value: bool,
        /// `IS NOT`.
        negated: bool,
    },
    /// `[NOT] IN (list)`.
    InList {
        /// Tested value.
        arg: Evaluator,
        /// Candidates.
        list: Vec<Evaluator>,
        /// `NOT IN`.
        negated: bool,
        /// Comparison type.
        ty: Type,
    },
    /// `[NOT] IN (subquery)`.
    InSelection {
        /// Tested value.
        arg: Evaluator,
        /// Single-column subquery.
        selection: Arc<dyn Selection>,
        /// `NOT IN`.
        negated: bool,
        /// Comparison type.
        ty: Type,
    },
    /// `[NOT] EXISTS (subquery)`.
    Exists {
        /// Subquery.
        selection: Arc<dyn Selection>,
        /// `NOT EXISTS`.
        negated: bool,
    },
    /// `(subquery)` used as a value.
    Scalar(Arc<dyn Selection>),
    /// `[NOT] BETWEEN low AND high`.
    Between {
        /// Tested value.
        arg: Evaluator,
        /// Lower bound.
        low: Evaluator,
        /// Upper bound.
        high: Evaluator,
        /// `NOT BETWEEN`.
        negated: bool,
        /// Comparison type.
        ty: Type,
    },
    /// `[NOT] [I]LIKE`.
    Like {
        /// Tested text.
        arg: Evaluator,
        /// Pattern text.
        pattern: Evaluator,
        /// Pattern compiled up front when constant.
        compiled: Option<LikePattern>,
        /// `ILIKE`.
        case_insensitive: bool,
        /// `NOT LIKE`.
        negated: bool,
    },
    /// `CASE WHEN .. THEN .. ELSE .. END`.
    Case {
        /// Conditions and results.
        branches: Vec<(Evaluator, Evaluator)>,
        /// `ELSE` result.
        otherwise: Option<Evaluator>,
    },
    /// Builtin scalar function.
    Builtin {
        /// Function.
        func: Builtin,
        /// Arguments.
        args: Vec<Evaluator>,
    },
    /// Host-registered function.
    Call {
        /// Definition.
        def: Arc<FunctionDef>,
        /// Arguments, converted to the declared types.
        args: Vec<Evaluator>,
    },
    /// `ARRAY[...]`.
    Array(Vec<Evaluator>),
    /// `array[i]` (1-based).
    Subscript {
        /// Array.
        array: Evaluator,
        /// Position.
        index: Evaluator,
    },
}

impl Op {
    /// Child nodes, in a fixed order.
    pub fn children(&self) -> Vec<&Evaluator> {
        match self {
            Op::Constant(_) | Op::Column { .. } | Op::Outer { .. } => Vec::new(),
            Op::Exists { .. } | Op::Scalar(_) => Vec::new(),
            Op::Convert { source, .. } => vec![source],
            Op::Arith { left, right, .. }
            | Op::Compare { left, right, .. }
            | Op::Logic { left, right, .. } => vec![left, right],
            Op::Neg(a) | Op::Not(a) => vec![a],
            Op::Concat(a, b) => vec![a, b],
            Op::JsonGet { doc, key, .. } => vec![doc, key],
            Op::IsNull { arg, .. } | Op::IsBool { arg, .. } => vec![arg],
            Op::InList { arg, list, .. } => std::iter::once(arg).chain(list.iter()).collect(),
            Op::InSelection { arg, .. } => vec![arg],
            Op::Between { arg, low, high, .. } => vec![arg, low, high],
            Op::Like { arg, pattern, .. } => vec![arg, pattern],
            Op::Case {
                branches,
                otherwise,
            } => branches
                .iter()
                .flat_map(|(c, r)| [c, r])
                .chain(otherwise.iter())
                .collect(),
            Op::Builtin { args, .. } | Op::Call { args, .. } => args.iter().collect(),
            Op::Array(items) => items.iter().collect(),
            Op::Subscript { array, index } => vec![array, index],
        }
    }

    /// Same operation over new children, given in [`Op::children`] order.
    fn with_children(&self, children: Vec<Evaluator>) -> Op {
        let mut it = children.into_iter();
        let mut next = || it.next();
        macro_rules! take {
            ($fallback:expr) => {
                next().unwrap_or_else(|| $fallback.clone())
            };
        }
        match self {
            Op::Constant(_) | Op::Column { .. } | Op::Outer { .. } => self.clone(),
            Op::Exists { .. } | Op::Scalar(_) => self.clone(),
            Op::Convert { source, conversion } => Op::Convert {
                source: take!(source),
                conversion: conversion.clone(),
            },
            Op::Arith { op, left, right } => Op::Arith {
                op: *op,
                left: take!(left),
                right: take!(right),
            },
            Op::Compare { op, left, right, ty } => Op::Compare {
                op: *op,
                left: take!(left),
                right: take!(right),
                ty: ty.clone(),
            },
            Op::Logic { and, left, right } => Op::Logic {
                and: *and,
                left: take!(left),
                right: take!(right),
            },
            Op::Neg(a) => Op::Neg(take!(a)),
            Op::Not(a) => Op::Not(take!(a)),
            Op::Concat(a, b) => Op::Concat(take!(a), take!(b)),
            Op::JsonGet { doc, key, as_text } => Op::JsonGet {
                doc: take!(doc),
                key: take!(key),
                as_text: *as_text,
            },
            Op::IsNull { arg, negated } => Op::IsNull {
                arg: take!(arg),
                negated: *negated,
            },
            Op::IsBool {
                arg,
                value,
                negated,
            } => Op::IsBool {
                arg: take!(arg),
                value: *value,
                negated: *negated,
            },
            Op::InList {
                arg,
                list,
                negated,
                ty,
            } => Op::InList {
                arg: take!(arg),
                list: list.iter().map(|l| take!(l)).collect(),
                negated: *negated,
                ty: ty.clone(),
            },
            Op::InSelection {
                arg,
                selection,
                negated,
                ty,
            } => Op::InSelection {
                arg: take!(arg),
                selection: selection.clone(),
                negated: *negated,
                ty: ty.clone(),
            },
            Op::Between {
                arg,
                low,
                high,
                negated,
                ty,
            } => Op::Between {
                arg: take!(arg),
                low: take!(low),
                high: take!(high),
                negated: *negated,
                ty: ty.clone(),
            },
            Op::Like {
                arg,
                pattern,
                compiled,
                case_insensitive,
                negated,
            } => Op::Like {
                arg: take!(arg),
                pattern: take!(pattern),
                compiled: compiled.clone(),
                case_insensitive: *case_insensitive,
                negated: *negated,
            },
            Op::Case {
                branches,
                otherwise,
            } => Op::Case {
                branches: branches.iter().map(|(c, r)| (take!(c), take!(r))).collect(),
                otherwise: otherwise.as_ref().map(|o| take!(o)),
            },
            Op::Builtin { func, args } => Op::Builtin {
                func: *func,
                args: args.iter().map(|a| take!(a)).collect(),
            },
            Op::Call { def, args } => Op::Call {
                def: def.clone(),
                args: args.iter().map(|a| take!(a)).collect(),
            },
            Op::Array(items) => Op::Array(items.iter().map(|i| take!(i)).collect()),
            Op::Subscript { array, index } => Op::Subscript {
                array: take!(array),
                index: take!(index),
            },
        }
    }

    fn hash_into(&self, h: &mut DefaultHasher) {
        std::mem::discriminant(self).hash(h);
        match self {
            Op::Constant(v) => {
                v.to_string().hash(h);
                v.is_null().hash(h);
            }
            Op::Column { origin, idx } => {
                origin.hash(h);
                idx.hash(h);
            }
            Op::Outer { depth, idx } => {
                depth.hash(h);
                idx.hash(h);
            }
            Op::Convert { conversion, .. } => format!("{:?}", conversion).hash(h),
            Op::Arith { op, .. } | Op::Compare { op, .. } => op.hash(h),
            Op::Logic { and, .. } => and.hash(h),
            Op::JsonGet { as_text, .. } => as_text.hash(h),
            Op::IsNull { negated, .. } | Op::InList { negated, .. } => negated.hash(h),
            Op::IsBool { value, negated, .. } => (value, negated).hash(h),
            Op::InSelection {
                selection, negated, ..
            }
            | Op::Exists { selection, negated } => (selection.id(), negated).hash(h),
            Op::Scalar(selection) => selection.id().hash(h),
            Op::Between { negated, .. } => negated.hash(h),
            Op::Like {
                case_insensitive,
                negated,
                ..
            } => (case_insensitive, negated).hash(h),
            Op::Case { otherwise, .. } => otherwise.is_some().hash(h),
            Op::Builtin { func, .. } => func.hash(h),
            Op::Call { def, .. } => (Arc::as_ptr(def) as usize).hash(h),
            Op::Neg(_) | Op::Not(_) | Op::Concat(..) | Op::Array(_) | Op::Subscript { .. } => {}
        }
        for child in self.children() {
            child.hash().hash(h);
        }
    }
}

// ============================================================================
// Evaluator
// ============================================================================

struct Node {
    ty: Type,
    sql: String,
    hash: u64,
    op: Op,
}

/// A typed, immutable computation over a row.
#[derive(Clone)]
pub struct Evaluator(Arc<Node>);

impl Evaluator {
    /// Creates a node.
    pub fn new(op: Op, ty: Type, sql: impl Into<String>) -> Self {
        let mut h = DefaultHasher::new();
        op.hash_into(&mut h);
        ty.hash(&mut h);
        Self(Arc::new(Node {
            hash: h.finish(),
            ty,
            sql: sql.into(),
            op,
        }))
    }

    /// A constant.
    pub fn constant(value: Value, ty: Type) -> Self {
        let sql = match &value {
            Value::Null => "NULL".to_string(),
            Value::Text(s) => format!("'{}'", s.replace('\'', "''")),
            v => v.to_string(),
        };
        Self::new(Op::Constant(value), ty, sql)
    }

    /// The NULL constant.
    pub fn null() -> Self {
        Self::constant(Value::Null, Type::null())
    }

    /// A reference to position `idx` of rows produced by `origin`.
    pub fn column(origin: u64, idx: usize, ty: Type, sql: impl Into<String>) -> Self {
        Self::new(Op::Column { origin, idx }, ty, sql)
    }

    /// Result type.
    pub fn ty(&self) -> &Type {
        &self.0.ty
    }

    /// SQL text of the expression.
    pub fn sql(&self) -> &str {
        &self.0.sql
    }

    /// Structural hash.
    pub fn hash(&self) -> u64 {
        self.0.hash
    }

    /// The computation.
    pub fn op(&self) -> &Op {
        &self.0.op
    }

    /// Returns true if both handles are the same node.
    pub fn ptr_eq(a: &Evaluator, b: &Evaluator) -> bool {
        Arc::ptr_eq(&a.0, &b.0)
    }

    /// Returns true for constants.
    pub fn is_constant(&self) -> bool {
        matches!(self.0.op, Op::Constant(_))
    }

    /// Value of a constant.
    pub fn constant_value(&self) -> Option<&Value> {
        match &self.0.op {
            Op::Constant(v) => Some(v),
            _ => None,
        }
    }

    /// Position read by a plain column reference.
    pub fn column_index(&self) -> Option<usize> {
        match self.0.op {
            Op::Column { idx, .. } => Some(idx),
            _ => None,
        }
    }

    /// Same node under another SQL text.
    pub fn with_sql(&self, sql: impl Into<String>) -> Self {
        Self(Arc::new(Node {
            ty: self.0.ty.clone(),
            sql: sql.into(),
            hash: self.0.hash,
            op: self.0.op.clone(),
        }))
    }

    /// Converts to `to`. Explicit conversions follow `CAST` rules; implicit
    /// ones only the implicit subset. Constants are converted right away.
    pub fn convert(&self, to: &Type, explicit: bool, resolver: &dyn RegResolver) -> SqlResult<Self> {
        if self.ty() == to {
            return Ok(self.clone());
        }
        let conversion = plan_cast(self.ty(), to, explicit)
            .ok_or_else(|| SqlError::cast(self.ty().kind(), to.kind()))?;
        if let Some(value) = self.constant_value() {
            let converted = conversion.apply(value.clone(), resolver)?;
            return Ok(Self::new(Op::Constant(converted), to.clone(), self.sql()));
        }
        Ok(Self::new(
            Op::Convert {
                source: self.clone(),
                conversion,
            },
            to.clone(),
            format!("{}::{}", self.sql(), to.name()),
        ))
    }

    /// Converts to `to`, implicitly unless this is a constant (constants are
    /// coerced as if cast explicitly).
    pub fn coerce(&self, to: &Type, resolver: &dyn RegResolver) -> SqlResult<Self> {
        let explicit = self.is_constant();
        self.convert(to, explicit, resolver)
    }

    /// Rebuilds the tree bottom-up, replacing every node for which `f`
    /// returns a replacement.
    pub fn map(&self, f: &mut dyn FnMut(&Evaluator) -> Option<Evaluator>) -> Evaluator {
        if let Some(replaced) = f(self) {
            return replaced;
        }
        let children = self.op().children();
        if children.is_empty() {
            return self.clone();
        }
        let mapped: Vec<Evaluator> = children.iter().map(|c| c.map(f)).collect();
        if mapped
            .iter()
            .zip(children.iter())
            .all(|(m, c)| Evaluator::ptr_eq(m, c))
        {
            return self.clone();
        }
        Evaluator::new(self.op().with_children(mapped), self.ty().clone(), self.sql())
    }

    /// Visits every node, parents first.
    pub fn walk(&self, f: &mut dyn FnMut(&Evaluator)) {
        f(self);
        for child in self.op().children() {
            child.walk(f);
        }
    }

    /// Positions of the current row read anywhere in the tree.
    pub fn columns_used(&self) -> Vec<usize> {
        let mut used = Vec::new();
        self.walk(&mut |e| {
            if let Op::Column { idx, .. } = e.op() {
                used.push(*idx);
            }
        });
        used
    }

    // ------------------------------------------------------------------------
    // Evaluation
    // ------------------------------------------------------------------------

    /// Computes the value over `row`.
    pub fn get(&self, row: &[Value], ctx: &mut EvalContext<'_>) -> SqlResult<Value> {
        match self.op() {
            Op::Constant(v) => Ok(v.clone()),
            Op::Column { idx, .. } => row.get(*idx).cloned().ok_or_else(|| {
                SqlError::Internal(format!("column {} read from a row of {}", idx, row.len()))
            }),
            Op::Outer { depth, idx } => ctx
                .outer
                .len()
                .checked_sub(*depth)
                .and_then(|level| ctx.outer.get(level))
                .and_then(|r| r.get(*idx))
                .cloned()
                .ok_or_else(|| SqlError::Internal(format!("outer column {} unavailable", idx))),
            Op::Convert { source, conversion } => {
                let v = source.get(row, ctx)?;
                conversion.apply(v, ctx.catalog)
            }
            Op::Arith { op, left, right } => {
                let l = left.get(row, ctx)?;
                let r = right.get(row, ctx)?;
                arith(*op, self.ty(), l, r)
            }
            Op::Compare { op, left, right, ty } => {
                let l = left.get(row, ctx)?;
                let r = right.get(row, ctx)?;
                Ok(match compare(ty, &l, &r) {
                    None => Value::Null,
                    Some(ord) => Value::Bool(match op {
                        BinaryOp::Eq => ord.is_eq(),
                        BinaryOp::NotEq => ord.is_ne(),
                        BinaryOp::Lt => ord.is_lt(),
                        BinaryOp::LtEq => ord.is_le(),
                        BinaryOp::Gt => ord.is_gt(),
                        _ => ord.is_ge(),
                    }),
                })
            }
            Op::Logic { and, left, right } => {
                let l = left.get(row, ctx)?.as_bool();
                // short circuit on the deciding value
                if l == Some(!*and) {
                    return Ok(Value::Bool(!*and));
                }
                let r = right.get(row, ctx)?.as_bool();
                Ok(match (l, r) {
                    (_, Some(b)) if b != *and => Value::Bool(b),
                    (Some(_), Some(_)) => Value::Bool(*and),
                    _ => Value::Null,
                })
            }
            Op::Neg(a) => match a.get(row, ctx)? {
                Value::Int(i) => i
                    .checked_neg()
                    .map(Value::Int)
                    .ok_or_else(|| SqlError::query("integer out of range")),
                Value::Float(f) => Ok(Value::Float(-f)),
                _ => Ok(Value::Null),
            },
            Op::Not(a) => Ok(match a.get(row, ctx)?.as_bool() {
                Some(b) => Value::Bool(!b),
                None => Value::Null,
            }),
            Op::Concat(a, b) => {
                let l = a.get(row, ctx)?;
                let r = b.get(row, ctx)?;
                Ok(match (l, r) {
                    (Value::Null, _) | (_, Value::Null) => Value::Null,
                    (Value::Array(mut x), Value::Array(y)) => {
                        x.extend(y);
                        Value::Array(x)
                    }
                    (Value::Array(mut x), v) => {
                        x.push(v);
                        Value::Array(x)
                    }
                    (v, Value::Array(mut y)) => {
                        y.insert(0, v);
                        Value::Array(y)
                    }
                    (x, y) => Value::Text(format!("{}{}", x, y)),
                })
            }
            Op::JsonGet { doc, key, as_text } => {
                let d = doc.get(row, ctx)?;
                let k = key.get(row, ctx)?;
                Ok(json_get(d, k, *as_text))
            }
            Op::IsNull { arg, negated } => {
                Ok(Value::Bool(arg.get(row, ctx)?.is_null() != *negated))
            }
            Op::IsBool {
                arg,
                value,
                negated,
            } => {
                let v = arg.get(row, ctx)?.as_bool();
                Ok(Value::Bool((v == Some(*value)) != *negated))
            }
            Op::InList {
                arg,
                list,
                negated,
                ty,
            } => {
                let v = arg.get(row, ctx)?;
                if v.is_null() {
                    return Ok(Value::Null);
                }
                let mut saw_null = false;
                for item in list {
                    let candidate = item.get(row, ctx)?;
                    match compare(ty, &v, &candidate) {
                        Some(ord) if ord.is_eq() => return Ok(Value::Bool(!*negated)),
                        None => saw_null = true,
                        _ => {}
                    }
                }
                Ok(if saw_null {
                    Value::Null
                } else {
                    Value::Bool(*negated)
                })
            }
            Op::InSelection {
                arg,
                selection,
                negated,
                ty,
            } => {
                let v = arg.get(row, ctx)?;
                if v.is_null() {
                    return Ok(Value::Null);
                }
                ctx.with_outer(row, |ctx| {
                    let mut cursor = selection.open();
                    let mut saw_null = false;
                    while let Some(candidate) = cursor.next(ctx)? {
                        let candidate = candidate.into_iter().next().unwrap_or(Value::Null);
                        match compare(ty, &v, &candidate) {
                            Some(ord) if ord.is_eq() => return Ok(Value::Bool(!*negated)),
                            None => saw_null = true,
                            _ => {}
                        }
                    }
                    Ok(if saw_null {
                        Value::Null
                    } else {
                        Value::Bool(*negated)
                    })
                })
            }
            Op::Exists { selection, negated } => ctx.with_outer(row, |ctx| {
                let mut cursor = selection.open();
                let found = cursor.next(ctx)?.is_some();
                Ok(Value::Bool(found != *negated))
            }),
            Op::Scalar(selection) => ctx.with_outer(row, |ctx| {
                let mut cursor = selection.open();
                let first = match cursor.next(ctx)? {
                    Some(r) => r.into_iter().next().unwrap_or(Value::Null),
                    None => return Ok(Value::Null),
                };
                if cursor.next(ctx)?.is_some() {
                    return Err(SqlError::query(
                        "more than one row returned by a subquery used as an expression",
                    ));
                }
                Ok(first)
            }),
            Op::Between {
                arg,
                low,
                high,
                negated,
                ty,
            } => {
                let v = arg.get(row, ctx)?;
                let lo = low.get(row, ctx)?;
                let hi = high.get(row, ctx)?;
                let above = compare(ty, &v, &lo).map(|o| o.is_ge());
                let below = compare(ty, &v, &hi).map(|o| o.is_le());
                Ok(match (above, below) {
                    (Some(a), Some(b)) => Value::Bool((a && b) != *negated),
                    (Some(false), _) | (_, Some(false)) => Value::Bool(*negated),
                    _ => Value::Null,
                })
            }
            Op::Like {
                arg,
                pattern,
                compiled,
                case_insensitive,
                negated,
            } => {
                let v = arg.get(row, ctx)?;
                let Value::Text(text) = v else {
                    return Ok(Value::Null);
                };
                let matched = match compiled {
                    Some(p) => p.matches(&text),
                    None => match pattern.get(row, ctx)? {
                        Value::Text(p) => LikePattern::new(&p, *case_insensitive).matches(&text),
                        _ => return Ok(Value::Null),
                    },
                };
                Ok(Value::Bool(matched != *negated))
            }
            Op::Case {
                branches,
                otherwise,
            } => {
                for (condition, result) in branches {
                    if condition.get(row, ctx)?.as_bool() == Some(true) {
                        return result.get(row, ctx);
                    }
                }
                match otherwise {
                    Some(o) => o.get(row, ctx),
                    None => Ok(Value::Null),
                }
            }
            Op::Builtin { func, args } => functions::call_builtin(*func, args, self.ty(), row, ctx),
            Op::Call { def, args } => {
                let values = args
                    .iter()
                    .map(|a| a.get(row, ctx))
                    .collect::<SqlResult<Vec<_>>>()?;
                def.invoke(&values)
            }
            Op::Array(items) => Ok(Value::Array(
                items
                    .iter()
                    .map(|i| i.get(row, ctx))
                    .collect::<SqlResult<Vec<_>>>()?,
            )),
            Op::Subscript { array, index } => {
                let a = array.get(row, ctx)?;
                let i = index.get(row, ctx)?;
                Ok(match (a, i.as_int()) {
                    (Value::Array(items), Some(i)) if i >= 1 => {
                        items.into_iter().nth((i - 1) as usize).unwrap_or(Value::Null)
                    }
                    _ => Value::Null,
                })
            }
        }
    }

    /// Evaluates a predicate: only `true` passes, NULL does not.
    pub fn is_true(&self, row: &[Value], ctx: &mut EvalContext<'_>) -> SqlResult<bool> {
        Ok(self.get(row, ctx)?.as_bool() == Some(true))
    }
}

impl fmt::Debug for Evaluator {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} :: {}", self.sql(), self.ty())
    }
}

fn arith(op: BinaryOp, ty: &Type, l: Value, r: Value) -> SqlResult<Value> {
    if l.is_null() || r.is_null() {
        return Ok(Value::Null);
    }
    if ty.kind() == TypeKind::Integer {
        let (a, b) = (l.as_int().unwrap_or(0), r.as_int().unwrap_or(0));
        let result = match op {
            BinaryOp::Add => a.checked_add(b),
            BinaryOp::Sub => a.checked_sub(b),
            BinaryOp::Mul => a.checked_mul(b),
            BinaryOp::Div | BinaryOp::Mod if b == 0 => {
                return Err(SqlError::query("division by zero"))
            }
            BinaryOp::Div => a.checked_div(b),
            BinaryOp::Mod => a.checked_rem(b),
            _ => None,
        };
        return result
            .map(Value::Int)
            .ok_or_else(|| SqlError::query("integer out of range"));
    }
    let (a, b) = (l.as_float().unwrap_or(0.0), r.as_float().unwrap_or(0.0));
    let result = match op {
        BinaryOp::Add => a + b,
        BinaryOp::Sub => a - b,
        BinaryOp::Mul => a * b,
        BinaryOp::Div | BinaryOp::Mod if b == 0.0 => {
            return Err(SqlError::query("division by zero"))
        }
        BinaryOp::Div => a / b,
        BinaryOp::Mod => a % b,
        _ => return Err(SqlError::Internal(format!("{} is not arithmetic", op.as_str()))),
    };
    Ok(Value::Float(result))
}

fn json_get(doc: Value, key: Value, as_text: bool) -> Value {
    let Value::Json(doc) = doc else {
        return Value::Null;
    };
    let found = match &key {
        Value::Int(i) if *i >= 0 => doc.get(*i as usize),
        Value::Text(k) => doc.get(k.as_str()),
        _ => None,
    };
    match found {
        None | Some(serde_json::Value::Null) if as_text => Value::Null,
        None => Value::Null,
        Some(serde_json::Value::String(s)) if as_text => Value::Text(s.clone()),
        Some(v) if as_text => Value::Text(v.to_string()),
        Some(v) => Value::Json(v.clone()),
    }
}

// ============================================================================
// Scopes
// ============================================================================

/// Name resolution for the expression compiler.
pub trait Scope {
    /// Resolves a column reference. `Ok(None)` when nothing matches.
    fn column(&self, qualifier: Option<&str>, name: &str) -> SqlResult<Option<Evaluator>>;

    /// Returns true if some column is qualified by `qualifier`.
    fn has_qualifier(&self, qualifier: &str) -> bool;

    /// Columns `*` expands to (qualified by `qualifier` when given).
    fn star(&self, qualifier: Option<&str>) -> Vec<Column>;

    /// Scope aggregate arguments are compiled in, when aggregates are
    /// allowed here.
    fn aggregate_source(&self) -> Option<&dyn Scope> {
        None
    }

    /// Registers an aggregate call and returns the node reading its result.
    fn register_aggregate(&self, call: AggregateCall) -> SqlResult<Evaluator> {
        Err(SqlError::query(format!(
            "aggregate functions are not allowed here: {}",
            call.func.name()
        )))
    }

    /// Post-processes a fully built top-level expression.
    fn finish(&self, e: Evaluator) -> SqlResult<Evaluator> {
        Ok(e)
    }
}

/// A scope over a list of columns, as exposed by a selection.
#[derive(Debug, Clone, Default)]
pub struct ColumnScope {
    columns: Vec<Column>,
}

impl ColumnScope {
    /// Creates a scope.
    pub fn new(columns: Vec<Column>) -> Self {
        Self { columns }
    }

    /// Scope over the output of a selection.
    pub fn of(selection: &dyn Selection) -> Self {
        Self::new(selection.columns().to_vec())
    }

    /// The columns.
    pub fn columns(&self) -> &[Column] {
        &self.columns
    }
}

impl Scope for ColumnScope {
    fn column(&self, qualifier: Option<&str>, name: &str) -> SqlResult<Option<Evaluator>> {
        let mut found = self.columns.iter().filter(|c| {
            c.name == name
                && match qualifier {
                    Some(q) => c.table.as_deref() == Some(q),
                    None => !c.hidden,
                }
        });
        let first = match found.next() {
            Some(c) => c,
            None => return Ok(None),
        };
        if found.any(|c| !Evaluator::ptr_eq(&c.eval, &first.eval)) {
            return Err(SqlError::query(format!(
                "column reference \"{}\" is ambiguous",
                name
            )));
        }
        Ok(Some(first.eval.clone()))
    }

    fn has_qualifier(&self, qualifier: &str) -> bool {
        self.columns
            .iter()
            .any(|c| c.table.as_deref() == Some(qualifier))
    }

    fn star(&self, qualifier: Option<&str>) -> Vec<Column> {
        self.columns
            .iter()
            .filter(|c| match qualifier {
                Some(q) => c.table.as_deref() == Some(q),
                None => !c.hidden,
            })
            .cloned()
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::DbOptions;

    fn run(e: &Evaluator, row: &[Value]) -> SqlResult<Value> {
        let catalog = Catalog::new(&DbOptions::default()).unwrap();
        let mut data = DataTx::root();
        let mut ctx = EvalContext::new(&catalog, &mut data, chrono::NaiveDateTime::MIN);
        e.get(row, &mut ctx)
    }

    fn col(idx: usize, ty: Type) -> Evaluator {
        Evaluator::column(1, idx, ty, format!("c{}", idx))
    }

    #[test]
    fn test_structural_hash() {
        let a = col(0, Type::integer());
        let b = col(0, Type::integer());
        assert_eq!(a.hash(), b.hash());
        assert_ne!(a.hash(), col(1, Type::integer()).hash());
        assert_ne!(a.hash(), Evaluator::column(2, 0, Type::integer(), "c0").hash());
    }

    #[test]
    fn test_three_valued_logic() {
        let and = |l: Value, r: Value| {
            let e = Evaluator::new(
                Op::Logic {
                    and: true,
                    left: col(0, Type::bool()),
                    right: col(1, Type::bool()),
                },
                Type::bool(),
                "c0 AND c1",
            );
            run(&e, &[l, r]).unwrap()
        };
        assert_eq!(and(Value::Null, Value::Bool(false)), Value::Bool(false));
        assert_eq!(and(Value::Null, Value::Bool(true)), Value::Null);
        assert_eq!(and(Value::Bool(true), Value::Bool(true)), Value::Bool(true));
    }

    #[test]
    fn test_constant_conversion_is_folded() {
        let c = Evaluator::constant(Value::text("42"), Type::text());
        let folded = c
            .convert(&Type::integer(), true, &crate::types::cast::tests::Builtins)
            .unwrap();
        assert_eq!(folded.constant_value(), Some(&Value::Int(42)));
        let err = Evaluator::constant(Value::text("3.7"), Type::text())
            .convert(&Type::integer(), true, &crate::types::cast::tests::Builtins)
            .unwrap_err();
        assert_eq!(err.to_string(), "invalid input syntax for integer: 3.7");
    }

    #[test]
    fn test_integer_division() {
        let e = Evaluator::new(
            Op::Arith {
                op: BinaryOp::Div,
                left: col(0, Type::integer()),
                right: col(1, Type::integer()),
            },
            Type::integer(),
            "c0 / c1",
        );
        assert_eq!(run(&e, &[Value::Int(7), Value::Int(2)]).unwrap(), Value::Int(3));
        assert!(run(&e, &[Value::Int(7), Value::Int(0)]).is_err());
    }

    #[test]
    fn test_map_replaces_matching_subtrees() {
        let sum = Evaluator::new(
            Op::Arith {
                op: BinaryOp::Add,
                left: col(0, Type::integer()),
                right: Evaluator::constant(Value::Int(1), Type::integer()),
            },
            Type::integer(),
            "c0 + 1",
        );
        let target = col(0, Type::integer()).hash();
        let mapped = sum.map(&mut |e| {
            (e.hash() == target).then(|| Evaluator::column(9, 3, Type::integer(), "g"))
        });
        assert_eq!(mapped.columns_used(), vec![3]);
        assert_eq!(run(&mapped, &[Value::Null, Value::Null, Value::Null, Value::Int(4)]).unwrap(), Value::Int(5));
    }

    #[test]
    fn test_json_get() {
        let doc = Value::Json(serde_json::json!({"a": {"b": "x"}, "n": [1, 2]}));
        assert_eq!(
            json_get(doc.clone(), Value::text("a"), false),
            Value::Json(serde_json::json!({"b": "x"}))
        );
        assert_eq!(json_get(doc.clone(), Value::text("zz"), true), Value::Null);
        let inner = Value::Json(serde_json::json!({"b": "x"}));
        assert_eq!(json_get(inner, Value::text("b"), true), Value::text("x"));
    }
}
