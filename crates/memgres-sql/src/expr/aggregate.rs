//! Aggregate functions.

use std::collections::BTreeSet;

use crate::error::{SqlError, SqlResult};
use crate::types::compare::{canonical, compare};
use crate::types::{SortKey, Type, TypeKind, Value};

use super::Evaluator;

/// Supported aggregate functions.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum AggregateFunc {
    /// `count(*)`.
    CountStar,
    /// `count(x)`.
    Count,
    /// `sum(x)`.
    Sum,
    /// `avg(x)`.
    Avg,
    /// `min(x)`.
    Min,
    /// `max(x)`.
    Max,
    /// `array_agg(x)`.
    ArrayAgg,
    /// `bool_and(x)`.
    BoolAnd,
    /// `bool_or(x)`.
    BoolOr,
    /// `string_agg(x, separator)`.
    StringAgg,
}

impl AggregateFunc {
    /// Recognizes an aggregate by function name.
    pub fn from_name(name: &str) -> Option<Self> {
        Some(match name {
            "count" => AggregateFunc::Count,
            "sum" => AggregateFunc::Sum,
            "avg" => AggregateFunc::Avg,
            "min" => AggregateFunc::Min,
            "max" => AggregateFunc::Max,
            "array_agg" => AggregateFunc::ArrayAgg,
            "bool_and" | "every" => AggregateFunc::BoolAnd,
            "bool_or" => AggregateFunc::BoolOr,
            "string_agg" => AggregateFunc::StringAgg,
            _ => return None,
        })
    }

    /// Name, as written in SQL and used for output column names.
    pub fn name(&self) -> &'static str {
        match self {
            AggregateFunc::CountStar | AggregateFunc::Count => "count",
            AggregateFunc::Sum => "sum",
            AggregateFunc::Avg => "avg",
            AggregateFunc::Min => "min",
            AggregateFunc::Max => "max",
            AggregateFunc::ArrayAgg => "array_agg",
            AggregateFunc::BoolAnd => "bool_and",
            AggregateFunc::BoolOr => "bool_or",
            AggregateFunc::StringAgg => "string_agg",
        }
    }

    /// Result type for an argument of type `arg`.
    pub fn result_type(&self, arg: Option<&Type>) -> SqlResult<Type> {
        let arg_kind = arg.map(Type::kind);
        match self {
            AggregateFunc::CountStar | AggregateFunc::Count => Ok(Type::integer()),
            AggregateFunc::Sum => match arg_kind {
                Some(TypeKind::Integer) => Ok(Type::integer()),
                Some(TypeKind::Float) | Some(TypeKind::Null) => Ok(Type::float()),
                _ => Err(self.no_such(arg)),
            },
            AggregateFunc::Avg => match arg_kind {
                Some(k) if k.is_numeric() || k == TypeKind::Null => Ok(Type::float()),
                _ => Err(self.no_such(arg)),
            },
            AggregateFunc::Min | AggregateFunc::Max => match arg {
                Some(t) if t.kind() != TypeKind::Json => Ok(t.clone()),
                _ => Err(self.no_such(arg)),
            },
            AggregateFunc::ArrayAgg => match arg {
                Some(t) => Ok(Type::array_of(t)),
                None => Err(self.no_such(arg)),
            },
            AggregateFunc::BoolAnd | AggregateFunc::BoolOr => match arg_kind {
                Some(TypeKind::Bool) | Some(TypeKind::Null) => Ok(Type::bool()),
                _ => Err(self.no_such(arg)),
            },
            AggregateFunc::StringAgg => match arg {
                Some(t) if t.is_text() || t.is_null() => Ok(Type::text()),
                _ => Err(self.no_such(arg)),
            },
        }
    }

    fn no_such(&self, arg: Option<&Type>) -> SqlError {
        SqlError::query(format!(
            "function {}({}) does not exist",
            self.name(),
            arg.map(Type::name).unwrap_or_default()
        ))
    }
}

/// An aggregate call found in a select list, `HAVING` or `ORDER BY`.
#[derive(Debug, Clone)]
pub struct AggregateCall {
    /// Function.
    pub func: AggregateFunc,
    /// Argument, compiled against the grouped source. `None` for `count(*)`.
    pub arg: Option<Evaluator>,
    /// Separator of `string_agg`.
    pub separator: Option<String>,
    /// `DISTINCT` inside the call.
    pub distinct: bool,
    /// Result type.
    pub ty: Type,
    /// Identity of the call, used to share one accumulator between
    /// identical calls.
    pub hash: u64,
}

/// Running state of one aggregate over one group.
#[derive(Debug, Clone)]
pub struct Accumulator {
    func: AggregateFunc,
    arg_type: Option<Type>,
    seen: Option<BTreeSet<SortKey>>,
    state: AccumulatorState,
}

#[derive(Debug, Clone)]
enum AccumulatorState {
    Count(i64),
    SumInt(Option<i64>),
    SumFloat(Option<f64>),
    Avg { sum: f64, count: i64 },
    Extreme(Option<Value>),
    Array(Vec<Value>),
    BoolAnd(Option<bool>),
    BoolOr(Option<bool>),
    Strings(Vec<String>),
}

impl Accumulator {
    /// Creates an empty accumulator for `call`.
    pub fn new(call: &AggregateCall) -> Self {
        let arg_type = call.arg.as_ref().map(|a| a.ty().clone());
        let state = match call.func {
            AggregateFunc::CountStar | AggregateFunc::Count => AccumulatorState::Count(0),
            AggregateFunc::Sum if call.ty.kind() == TypeKind::Integer => {
                AccumulatorState::SumInt(None)
            }
            AggregateFunc::Sum => AccumulatorState::SumFloat(None),
            AggregateFunc::Avg => AccumulatorState::Avg { sum: 0.0, count: 0 },
            AggregateFunc::Min | AggregateFunc::Max => AccumulatorState::Extreme(None),
            AggregateFunc::ArrayAgg => AccumulatorState::Array(Vec::new()),
            AggregateFunc::BoolAnd => AccumulatorState::BoolAnd(None),
            AggregateFunc::BoolOr => AccumulatorState::BoolOr(None),
            AggregateFunc::StringAgg => AccumulatorState::Strings(Vec::new()),
        };
        Self {
            func: call.func,
            arg_type,
            seen: call.distinct.then(BTreeSet::new),
            state,
        }
    }

    /// Feeds one row's argument value (`Value::Null` for `count(*)`).
    pub fn accumulate(&mut self, value: Value) -> SqlResult<()> {
        if self.func == AggregateFunc::CountStar {
            if let AccumulatorState::Count(count) = &mut self.state {
                *count += 1;
            }
            return Ok(());
        }
        // array_agg keeps NULLs, every other aggregate skips them
        if value.is_null() && self.func != AggregateFunc::ArrayAgg {
            return Ok(());
        }
        if let Some(seen) = &mut self.seen {
            let key = match &self.arg_type {
                Some(t) => canonical(t, &value),
                None => value.clone(),
            };
            if !seen.insert(SortKey(vec![key])) {
                return Ok(());
            }
        }

        match &mut self.state {
            AccumulatorState::Count(count) => *count += 1,
            AccumulatorState::SumInt(sum) => {
                let v = value.as_int().unwrap_or(0);
                *sum = Some(
                    sum.unwrap_or(0)
                        .checked_add(v)
                        .ok_or_else(|| SqlError::query("integer out of range"))?,
                );
            }
            AccumulatorState::SumFloat(sum) => {
                if let Some(v) = value.as_float() {
                    *sum = Some(sum.unwrap_or(0.0) + v);
                }
            }
            AccumulatorState::Avg { sum, count } => {
                if let Some(v) = value.as_float() {
                    *sum += v;
                    *count += 1;
                }
            }
            AccumulatorState::Extreme(current) => {
                let replace = match (current.as_ref(), &self.arg_type) {
                    (None, _) => true,
                    (Some(c), Some(t)) => {
                        let ord = compare(t, &value, c);
                        match self.func {
                            AggregateFunc::Min => ord.map_or(false, |o| o.is_lt()),
                            _ => ord.map_or(false, |o| o.is_gt()),
                        }
                    }
                    (Some(_), None) => false,
                };
                if replace {
                    *current = Some(value);
                }
            }
            AccumulatorState::Array(items) => items.push(value),
            AccumulatorState::BoolAnd(result) => {
                if let Some(b) = value.as_bool() {
                    *result = Some(result.unwrap_or(true) && b);
                }
            }
            AccumulatorState::BoolOr(result) => {
                if let Some(b) = value.as_bool() {
                    *result = Some(result.unwrap_or(false) || b);
                }
            }
            AccumulatorState::Strings(values) => values.push(value.to_string()),
        }
        Ok(())
    }

    /// Final value. Empty groups yield 0 for counts and NULL otherwise.
    pub fn finish(self, separator: Option<&str>) -> Value {
        match self.state {
            AccumulatorState::Count(count) => Value::Int(count),
            AccumulatorState::SumInt(sum) => sum.map(Value::Int).unwrap_or(Value::Null),
            AccumulatorState::SumFloat(sum) => sum.map(Value::Float).unwrap_or(Value::Null),
            AccumulatorState::Avg { sum, count } => {
                if count == 0 {
                    Value::Null
                } else {
                    Value::Float(sum / count as f64)
                }
            }
            AccumulatorState::Extreme(v) => v.unwrap_or(Value::Null),
            AccumulatorState::Array(items) if items.is_empty() => Value::Null,
            AccumulatorState::Array(items) => Value::Array(items),
            AccumulatorState::BoolAnd(r) | AccumulatorState::BoolOr(r) => {
                r.map(Value::Bool).unwrap_or(Value::Null)
            }
            AccumulatorState::Strings(values) if values.is_empty() => Value::Null,
            AccumulatorState::Strings(values) => {
                Value::Text(values.join(separator.unwrap_or(",")))
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn call(func: AggregateFunc, ty: Type, distinct: bool) -> AggregateCall {
        let arg = Evaluator::constant(Value::Null, ty.clone());
        AggregateCall {
            func,
            ty: func.result_type(Some(&ty)).unwrap(),
            arg: Some(arg),
            separator: None,
            distinct,
            hash: 0,
        }
    }

    fn run(call: &AggregateCall, values: Vec<Value>) -> Value {
        let mut acc = Accumulator::new(call);
        for v in values {
            acc.accumulate(v).unwrap();
        }
        acc.finish(call.separator.as_deref())
    }

    #[test]
    fn test_count_skips_nulls() {
        let c = call(AggregateFunc::Count, Type::integer(), false);
        assert_eq!(run(&c, vec![Value::Int(1), Value::Null, Value::Int(1)]), Value::Int(2));
        let c = call(AggregateFunc::Count, Type::integer(), true);
        assert_eq!(run(&c, vec![Value::Int(1), Value::Null, Value::Int(1)]), Value::Int(1));
        assert_eq!(run(&c, vec![]), Value::Int(0));
    }

    #[test]
    fn test_sum_keeps_integer_type() {
        let c = call(AggregateFunc::Sum, Type::integer(), false);
        assert_eq!(c.ty, Type::integer());
        assert_eq!(run(&c, vec![Value::Int(1), Value::Int(2)]), Value::Int(3));
        assert_eq!(run(&c, vec![]), Value::Null);
        let c = call(AggregateFunc::Avg, Type::integer(), false);
        assert_eq!(run(&c, vec![Value::Int(1), Value::Int(2)]), Value::Float(1.5));
    }

    #[test]
    fn test_min_max_follow_type() {
        let c = call(AggregateFunc::Max, Type::citext(), false);
        assert_eq!(
            run(&c, vec![Value::text("b"), Value::text("A"), Value::text("C")]),
            Value::text("C")
        );
        let c = call(AggregateFunc::Min, Type::integer(), false);
        assert_eq!(run(&c, vec![Value::Int(3), Value::Null, Value::Int(-1)]), Value::Int(-1));
    }

    #[test]
    fn test_array_and_bool_aggregates() {
        let c = call(AggregateFunc::ArrayAgg, Type::integer(), false);
        assert_eq!(
            run(&c, vec![Value::Int(1), Value::Null]),
            Value::Array(vec![Value::Int(1), Value::Null])
        );
        let c = call(AggregateFunc::BoolAnd, Type::bool(), false);
        assert_eq!(run(&c, vec![true.into(), false.into()]), Value::Bool(false));
        let c = call(AggregateFunc::BoolOr, Type::bool(), false);
        assert_eq!(run(&c, vec![true.into(), false.into()]), Value::Bool(true));
    }

    #[test]
    fn test_unsupported_argument_type() {
        let err = AggregateFunc::Sum.result_type(Some(&Type::text())).unwrap_err();
        assert_eq!(err.to_string(), "function sum(text) does not exist");
    }
}
