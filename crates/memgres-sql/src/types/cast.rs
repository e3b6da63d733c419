//! Conversion rules between types.
//!
//! [`plan_cast`] decides whether a conversion exists and returns it as a
//! [`Conversion`] value. Conversions are plain data: the expression layer
//! wraps them in a `Convert` node, so a cast chain is a small DAG of nodes
//! rather than a stack of closures.
//!
//! ```text
//!                  implicit                      explicit only
//!   text ──▶ bool, uuid, bytea, citext    text ──▶ int, float, timestamp, json, ...
//!   int  ──▶ float, regtype, regclass     any  ──▶ text
//!   float ─▶ int (rounds)                 timestamp ──▶ date, time
//! ```

use tracing::trace;

use crate::error::{SqlError, SqlResult};

use super::literal::{self, ArrayItem};
use super::{DataType, EnumType, RegRef, Type, TypeKind, Value};

/// Catalog services needed by the registry-reference conversions.
pub trait RegResolver {
    /// Resolves a type name as written in SQL.
    fn type_by_name(&self, name: &str) -> SqlResult<Type>;
    /// Looks a type up by numeric id.
    fn type_by_oid(&self, oid: u32) -> Option<Type>;
    /// Numeric id of a type.
    fn type_oid(&self, ty: &Type) -> Option<u32>;
    /// Looks a relation up by class id, returning its id and name.
    fn relation_by_id(&self, id: u32) -> Option<(u32, String)>;
    /// Looks a relation up by (possibly qualified) name, raising when absent.
    fn relation_by_name(&self, name: &str) -> SqlResult<(u32, String)>;
}

/// A planned conversion from one type to another.
#[derive(Debug, Clone, PartialEq)]
pub enum Conversion {
    /// The representation does not change.
    Retag,
    /// Integer to float.
    IntToFloat,
    /// Float to integer, rounding to nearest.
    FloatToInt,
    /// Boolean to integer.
    BoolToInt,
    /// Integer to boolean.
    IntToBool,
    /// Length check for bounded text.
    BoundText(u32),
    /// Render any value as text.
    ToText,
    /// Text to boolean.
    TextToBool,
    /// Text to integer.
    TextToInt,
    /// Text to float.
    TextToFloat,
    /// Text to UUID.
    TextToUuid,
    /// Text to byte array.
    TextToBytea,
    /// Text to timestamp.
    TextToTimestamp,
    /// Text to date.
    TextToDate,
    /// Text to time.
    TextToTime,
    /// Text to JSON.
    TextToJson,
    /// Text to a type handle.
    TextToRegType,
    /// Text to a relation handle.
    TextToRegClass,
    /// Text to an enum label.
    TextToEnum(EnumType),
    /// Text to a geometric kind.
    TextToGeometry(TypeKind),
    /// Array literal to the given array type.
    TextToArray(Type),
    /// Timestamp to date.
    TimestampToDate,
    /// Timestamp to time.
    TimestampToTime,
    /// Date to timestamp.
    DateToTimestamp,
    /// Integer to a type handle.
    IntToRegType,
    /// Integer to a relation handle.
    IntToRegClass,
    /// Type handle to its id.
    RegTypeToInt,
    /// Relation handle to its id.
    RegClassToInt,
    /// Element-wise conversion of an array.
    Elements(Box<Conversion>),
    /// Two conversions applied in order.
    Then(Box<Conversion>, Box<Conversion>),
}

/// Plans a conversion from `from` to `to`. Returns `None` when there is none
/// (for implicit conversions when `explicit` is false).
pub fn plan_cast(from: &Type, to: &Type, explicit: bool) -> Option<Conversion> {
    if from == to || from.is_null() {
        return Some(Conversion::Retag);
    }
    if let Some(conv) = plan_implicit(from, to) {
        return Some(conv);
    }
    if !explicit {
        return None;
    }
    plan_explicit(from, to)
}

fn text_bound(from: &Type, to_len: Option<u32>) -> Conversion {
    match (from.text_len(), to_len) {
        (_, None) => Conversion::Retag,
        (Some(from_len), Some(to_len)) if from_len <= to_len => Conversion::Retag,
        (_, Some(to_len)) => Conversion::BoundText(to_len),
    }
}

fn plan_implicit(from: &Type, to: &Type) -> Option<Conversion> {
    use DataType as D;
    let conv = match (from.data(), to.data()) {
        (D::Text(_) | D::Citext | D::Enum(_), D::Text(len)) => text_bound(from, *len),
        (D::Text(_), D::Citext) => Conversion::Retag,
        (D::Text(_) | D::Citext, D::Bool) => Conversion::TextToBool,
        (D::Text(_) | D::Citext, D::Uuid) => Conversion::TextToUuid,
        (D::Text(_) | D::Citext, D::Bytea) => Conversion::TextToBytea,
        (D::Integer, D::Float) => Conversion::IntToFloat,
        (D::Float, D::Integer) => Conversion::FloatToInt,
        (D::Integer, D::RegType) => Conversion::IntToRegType,
        (D::Integer, D::RegClass) => Conversion::IntToRegClass,
        (D::Array(a), D::Array(b)) => elements(plan_cast(a, b, false)?),
        _ => return None,
    };
    Some(conv)
}

fn plan_explicit(from: &Type, to: &Type) -> Option<Conversion> {
    use DataType as D;
    let conv = match (from.data(), to.data()) {
        (D::Text(_) | D::Citext, target) => match target {
            D::Integer => Conversion::TextToInt,
            D::Float => Conversion::TextToFloat,
            D::Timestamp => Conversion::TextToTimestamp,
            D::Date => Conversion::TextToDate,
            D::Time => Conversion::TextToTime,
            D::Json | D::Jsonb => Conversion::TextToJson,
            D::RegType => Conversion::TextToRegType,
            D::RegClass => Conversion::TextToRegClass,
            D::Enum(def) => Conversion::TextToEnum(def.clone()),
            D::Point | D::Lseg | D::Box | D::Circle => Conversion::TextToGeometry(to.kind()),
            D::Array(elem) => {
                plan_cast(&Type::text(), elem, true)?;
                Conversion::TextToArray(to.clone())
            }
            _ => return None,
        },
        (_, D::Text(len)) => match len {
            Some(n) => Conversion::Then(
                Box::new(Conversion::ToText),
                Box::new(Conversion::BoundText(*n)),
            ),
            None => Conversion::ToText,
        },
        (_, D::Citext) => Conversion::ToText,
        (D::Timestamp, D::Date) => Conversion::TimestampToDate,
        (D::Timestamp, D::Time) => Conversion::TimestampToTime,
        (D::Date, D::Timestamp) => Conversion::DateToTimestamp,
        (D::Json, D::Jsonb) | (D::Jsonb, D::Json) => Conversion::Retag,
        (D::RegType, D::Integer) => Conversion::RegTypeToInt,
        (D::RegClass, D::Integer) => Conversion::RegClassToInt,
        (D::Bool, D::Integer) => Conversion::BoolToInt,
        (D::Integer, D::Bool) => Conversion::IntToBool,
        (D::Array(a), D::Array(b)) => elements(plan_cast(a, b, true)?),
        _ => return None,
    };
    Some(conv)
}

fn elements(inner: Conversion) -> Conversion {
    match inner {
        Conversion::Retag => Conversion::Retag,
        other => Conversion::Elements(Box::new(other)),
    }
}

fn bad_literal(to: TypeKind, text: &str) -> SqlError {
    SqlError::cast_in(TypeKind::Text, to, format!("string: \"{}\"", text))
}

fn mismatch(value: &Value, to: TypeKind) -> SqlError {
    SqlError::Internal(format!("cannot convert {:?} to {}", value, to))
}

impl Conversion {
    /// Returns true if the conversion leaves values untouched.
    pub fn is_retag(&self) -> bool {
        matches!(self, Conversion::Retag)
    }

    /// Applies the conversion to a value. NULL converts to NULL.
    pub fn apply(&self, value: Value, resolver: &dyn RegResolver) -> SqlResult<Value> {
        if value.is_null() {
            return Ok(Value::Null);
        }
        let converted = match (self, value) {
            (Conversion::Retag, v) => v,
            (Conversion::Then(first, second), v) => {
                let v = first.apply(v, resolver)?;
                second.apply(v, resolver)?
            }
            (Conversion::IntToFloat, Value::Int(i)) => Value::Float(i as f64),
            (Conversion::FloatToInt, Value::Float(f)) => Value::Int(f.round() as i64),
            (Conversion::FloatToInt, Value::Int(i)) => Value::Int(i),
            (Conversion::BoolToInt, Value::Bool(b)) => Value::Int(b as i64),
            (Conversion::IntToBool, Value::Int(i)) => Value::Bool(i != 0),
            (Conversion::BoundText(len), Value::Text(s)) => {
                if s.chars().count() > *len as usize {
                    return Err(SqlError::query(format!(
                        "value too long for type character varying({})",
                        len
                    )));
                }
                Value::Text(s)
            }
            (Conversion::ToText, Value::Text(s)) => Value::Text(s),
            (Conversion::ToText, v) => Value::Text(v.to_string()),
            (Conversion::TextToBool, Value::Text(s)) => {
                Value::Bool(literal::parse_bool(&s).ok_or_else(|| bad_literal(TypeKind::Bool, &s))?)
            }
            (Conversion::TextToInt, Value::Text(s)) => {
                Value::Int(s.trim().parse::<i64>().map_err(|_| {
                    SqlError::query(format!("invalid input syntax for integer: {}", s))
                })?)
            }
            (Conversion::TextToFloat, Value::Text(s)) => {
                Value::Float(s.trim().parse::<f64>().map_err(|_| {
                    SqlError::query(format!("invalid input syntax for float: {}", s))
                })?)
            }
            (Conversion::TextToUuid, Value::Text(s)) => {
                Value::Uuid(literal::parse_uuid(&s).ok_or_else(|| bad_literal(TypeKind::Uuid, &s))?)
            }
            (Conversion::TextToBytea, Value::Text(s)) => Value::Bytea(
                literal::parse_bytea(&s).ok_or_else(|| bad_literal(TypeKind::Bytea, &s))?,
            ),
            (Conversion::TextToTimestamp, Value::Text(s)) => {
                Value::Timestamp(literal::parse_timestamp(&s).ok_or_else(|| {
                    SqlError::query(format!("Invalid timestamp format: {}", s))
                })?)
            }
            (Conversion::TextToDate, Value::Text(s)) => Value::Date(
                literal::parse_date(&s)
                    .ok_or_else(|| SqlError::query(format!("Invalid date format: {}", s)))?,
            ),
            (Conversion::TextToTime, Value::Text(s)) => Value::Time(
                literal::parse_time(&s)
                    .ok_or_else(|| SqlError::query(format!("Invalid time format: {}", s)))?,
            ),
            (Conversion::TextToJson, Value::Text(s)) => {
                Value::Json(serde_json::from_str(&s).map_err(|e| {
                    SqlError::query(format!("invalid input syntax for type json: {}", e))
                })?)
            }
            (Conversion::TextToEnum(def), Value::Text(s)) => {
                if def.position(&s).is_none() {
                    return Err(SqlError::query(format!(
                        "invalid input value for enum {}: \"{}\"",
                        def.name, s
                    )));
                }
                Value::Text(s)
            }
            (Conversion::TextToGeometry(kind), Value::Text(s)) => {
                let parsed = match kind {
                    TypeKind::Point => literal::parse_point(&s).map(Value::Point),
                    TypeKind::Lseg => literal::parse_lseg(&s).map(Value::Lseg),
                    TypeKind::Box => literal::parse_box(&s).map(Value::Box),
                    TypeKind::Circle => literal::parse_circle(&s).map(Value::Circle),
                    _ => None,
                };
                parsed.ok_or_else(|| bad_literal(*kind, &s))?
            }
            (Conversion::TextToArray(target), Value::Text(s)) => {
                let items = literal::parse_array_literal(&s)
                    .ok_or_else(|| SqlError::query(format!("malformed array literal: \"{}\"", s)))?;
                array_from_items(items, target, resolver)?
            }
            (Conversion::TextToRegType, Value::Text(s)) => {
                let name = s.trim();
                let name = name.strip_prefix("pg_catalog.").unwrap_or(name);
                Value::Reg(RegRef::Name(resolver.type_by_name(name)?.name()))
            }
            (Conversion::TextToRegClass, Value::Text(s)) => {
                let s = s.trim();
                match s.parse::<u32>() {
                    Ok(id) => match resolver.relation_by_id(id) {
                        Some((_, name)) => Value::Reg(RegRef::Name(name)),
                        None => Value::Reg(RegRef::Id(id)),
                    },
                    Err(_) => Value::Reg(RegRef::Name(resolver.relation_by_name(s)?.1)),
                }
            }
            (Conversion::TimestampToDate, Value::Timestamp(ts)) => Value::Date(ts.date()),
            (Conversion::TimestampToTime, Value::Timestamp(ts)) => {
                Value::Time(literal::whole_seconds(ts.time()))
            }
            (Conversion::DateToTimestamp, Value::Date(d)) => {
                Value::Timestamp(d.and_time(chrono::NaiveTime::MIN))
            }
            (Conversion::IntToRegType, Value::Int(i)) => {
                let ty = u32::try_from(i)
                    .ok()
                    .and_then(|oid| resolver.type_by_oid(oid))
                    .ok_or_else(|| SqlError::cast(TypeKind::Integer, TypeKind::RegType))?;
                Value::Reg(RegRef::Name(ty.name()))
            }
            (Conversion::IntToRegClass, Value::Int(i)) => {
                let id = u32::try_from(i)
                    .map_err(|_| SqlError::cast(TypeKind::Integer, TypeKind::RegClass))?;
                Value::Reg(RegRef::Id(id))
            }
            (Conversion::RegTypeToInt, Value::Reg(reg)) => match reg {
                RegRef::Id(id) => Value::Int(id as i64),
                RegRef::Name(name) => {
                    let ty = resolver.type_by_name(&name)?;
                    let oid = resolver
                        .type_oid(&ty)
                        .ok_or_else(|| SqlError::cast(TypeKind::RegType, TypeKind::Integer))?;
                    Value::Int(oid as i64)
                }
            },
            (Conversion::RegClassToInt, Value::Reg(reg)) => match reg {
                RegRef::Id(id) => Value::Int(
                    resolver.relation_by_id(id).map_or(id, |(found, _)| found) as i64,
                ),
                RegRef::Name(name) => Value::Int(resolver.relation_by_name(&name)?.0 as i64),
            },
            (Conversion::Elements(inner), Value::Array(items)) => Value::Array(
                items
                    .into_iter()
                    .map(|item| match item {
                        Value::Array(_) if !matches!(**inner, Conversion::Elements(_)) => {
                            Conversion::Elements(inner.clone()).apply(item, resolver)
                        }
                        other => inner.apply(other, resolver),
                    })
                    .collect::<SqlResult<_>>()?,
            ),
            (conv, v) => {
                trace!(?conv, "conversion applied to unexpected value");
                return Err(mismatch(&v, conv.target_kind()));
            }
        };
        Ok(converted)
    }

    fn target_kind(&self) -> TypeKind {
        match self {
            Conversion::Retag | Conversion::Then(..) | Conversion::Elements(_) => TypeKind::Null,
            Conversion::IntToFloat | Conversion::TextToFloat => TypeKind::Float,
            Conversion::FloatToInt
            | Conversion::BoolToInt
            | Conversion::TextToInt
            | Conversion::RegTypeToInt
            | Conversion::RegClassToInt => TypeKind::Integer,
            Conversion::IntToBool | Conversion::TextToBool => TypeKind::Bool,
            Conversion::BoundText(_) | Conversion::ToText => TypeKind::Text,
            Conversion::TextToUuid => TypeKind::Uuid,
            Conversion::TextToBytea => TypeKind::Bytea,
            Conversion::TextToTimestamp | Conversion::DateToTimestamp => TypeKind::Timestamp,
            Conversion::TextToDate | Conversion::TimestampToDate => TypeKind::Date,
            Conversion::TextToTime | Conversion::TimestampToTime => TypeKind::Time,
            Conversion::TextToJson => TypeKind::Json,
            Conversion::TextToRegType | Conversion::IntToRegType => TypeKind::RegType,
            Conversion::TextToRegClass | Conversion::IntToRegClass => TypeKind::RegClass,
            Conversion::TextToEnum(_) => TypeKind::Enum,
            Conversion::TextToGeometry(kind) => *kind,
            Conversion::TextToArray(_) => TypeKind::Array,
        }
    }
}

fn array_from_items(
    items: Vec<ArrayItem>,
    target: &Type,
    resolver: &dyn RegResolver,
) -> SqlResult<Value> {
    let elem = target
        .element()
        .ok_or_else(|| SqlError::cast(TypeKind::Text, target.kind()))?;
    let scalar = match elem.kind() {
        TypeKind::Array => None,
        _ => Some(
            plan_cast(&Type::text(), elem, true)
                .ok_or_else(|| SqlError::cast(TypeKind::Text, elem.kind()))?,
        ),
    };
    let values = items
        .into_iter()
        .map(|item| match item {
            ArrayItem::Null => Ok(Value::Null),
            ArrayItem::Nested(inner) => match elem.kind() {
                TypeKind::Array => array_from_items(inner, elem, resolver),
                _ => array_from_items(inner, target, resolver),
            },
            ArrayItem::Text(s) => match &scalar {
                Some(conv) => conv.apply(Value::Text(s), resolver),
                None => Err(SqlError::query(format!("malformed array literal: \"{}\"", s))),
            },
        })
        .collect::<SqlResult<Vec<_>>>()?;
    Ok(Value::Array(values))
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;

    /// Resolver that knows only built-in types and no relations.
    pub(crate) struct Builtins;

    impl RegResolver for Builtins {
        fn type_by_name(&self, name: &str) -> SqlResult<Type> {
            super::super::builtin_type(&super::super::TypeName::parse(name))
                .ok_or_else(|| SqlError::TypeNotFound(name.to_string()))
        }
        fn type_by_oid(&self, oid: u32) -> Option<Type> {
            Type::builtins().into_iter().find(|t| t.oid() == Some(oid))
        }
        fn type_oid(&self, ty: &Type) -> Option<u32> {
            ty.oid()
        }
        fn relation_by_id(&self, _id: u32) -> Option<(u32, String)> {
            None
        }
        fn relation_by_name(&self, name: &str) -> SqlResult<(u32, String)> {
            Err(SqlError::RelationNotFound(name.to_string()))
        }
    }

    fn cast(value: Value, from: &Type, to: &Type) -> SqlResult<Value> {
        plan_cast(from, to, true)
            .ok_or_else(|| SqlError::cast(from.kind(), to.kind()))?
            .apply(value, &Builtins)
    }

    #[test]
    fn test_implicit_subset() {
        assert!(Type::text().can_convert_implicit(&Type::bool()));
        assert!(Type::text().can_convert_implicit(&Type::uuid()));
        assert!(Type::integer().can_convert_implicit(&Type::float()));
        assert!(Type::integer().can_convert_implicit(&Type::regclass()));
        assert!(!Type::text().can_convert_implicit(&Type::integer()));
        assert!(Type::text().can_cast_explicit(&Type::integer()));
        assert!(!Type::bool().can_cast_explicit(&Type::uuid()));
        assert!(Type::uuid().can_cast_explicit(&Type::text()));
    }

    #[test]
    fn test_float_to_int_rounds() {
        let v = cast(Value::Float(2.6), &Type::float(), &Type::integer()).unwrap();
        assert_eq!(v, Value::Int(3));
        let v = cast(Value::Float(-2.4), &Type::float(), &Type::integer()).unwrap();
        assert_eq!(v, Value::Int(-2));
    }

    #[test]
    fn test_text_to_int_rejects_decimals() {
        let err = cast(Value::text("3.7"), &Type::text(), &Type::integer()).unwrap_err();
        assert_eq!(err.kind(), crate::error::ErrorKind::Query);
        assert!(err.to_string().contains("invalid input syntax for integer"));
    }

    #[test]
    fn test_bounded_text() {
        assert_eq!(
            plan_cast(&Type::varchar(3), &Type::varchar(10), false),
            Some(Conversion::Retag)
        );
        assert_eq!(
            plan_cast(&Type::text(), &Type::varchar(3), false),
            Some(Conversion::BoundText(3))
        );
        let ok = cast(Value::text("abc"), &Type::text(), &Type::varchar(3)).unwrap();
        assert_eq!(ok, Value::text("abc"));
        let err = cast(Value::text("abcd"), &Type::text(), &Type::varchar(3)).unwrap_err();
        assert_eq!(err.to_string(), "value too long for type character varying(3)");
    }

    #[test]
    fn test_uuid_and_bool_literals() {
        let v = cast(
            Value::text("{A0EEBC99-9C0B-4EF8-BB6D-6BB9BD380A11}"),
            &Type::text(),
            &Type::uuid(),
        )
        .unwrap();
        assert_eq!(v.to_string(), "a0eebc99-9c0b-4ef8-bb6d-6bb9bd380a11");
        let err = cast(Value::text("nope"), &Type::text(), &Type::bool()).unwrap_err();
        assert_eq!(err.kind(), crate::error::ErrorKind::Cast);
    }

    #[test]
    fn test_text_to_array() {
        let to = Type::array_of(&Type::integer());
        let v = cast(Value::text("{1,2,NULL}"), &Type::text(), &to).unwrap();
        assert_eq!(
            v,
            Value::Array(vec![Value::Int(1), Value::Int(2), Value::Null])
        );
    }

    #[test]
    fn test_regtype_round_trip() {
        let v = cast(Value::text("int4"), &Type::text(), &Type::regtype()).unwrap();
        assert_eq!(v, Value::Reg(RegRef::Name("integer".into())));
        let id = cast(v, &Type::regtype(), &Type::integer()).unwrap();
        assert_eq!(id, Value::Int(23));
        let back = cast(id, &Type::integer(), &Type::regtype()).unwrap();
        assert_eq!(back.to_string(), "integer");
    }

    #[test]
    fn test_null_converts_to_null() {
        let v = cast(Value::Null, &Type::text(), &Type::integer()).unwrap();
        assert!(v.is_null());
    }

    #[test]
    fn test_timestamp_truncations() {
        let ts = cast(
            Value::text("2020-05-06 07:08:09"),
            &Type::text(),
            &Type::timestamp(),
        )
        .unwrap();
        let d = cast(ts.clone(), &Type::timestamp(), &Type::date()).unwrap();
        assert_eq!(d.to_string(), "2020-05-06");
        let t = cast(ts, &Type::timestamp(), &Type::time()).unwrap();
        assert_eq!(t.to_string(), "07:08:09");
        let err = cast(Value::text("garbage"), &Type::text(), &Type::timestamp()).unwrap_err();
        assert!(err.to_string().starts_with("Invalid timestamp format"));
    }

    mod props {
        use super::*;
        use proptest::prelude::*;

        proptest! {
            #[test]
            fn prop_int_text_round_trip(i in any::<i64>()) {
                let text = cast(Value::Int(i), &Type::integer(), &Type::text()).unwrap();
                let back = cast(text, &Type::text(), &Type::integer()).unwrap();
                prop_assert_eq!(back, Value::Int(i));
            }

            #[test]
            fn prop_bool_text_round_trip(b in any::<bool>()) {
                let text = cast(Value::Bool(b), &Type::bool(), &Type::text()).unwrap();
                let back = cast(text, &Type::text(), &Type::bool()).unwrap();
                prop_assert_eq!(back, Value::Bool(b));
            }

            #[test]
            fn prop_int_float_round_trip(i in -1_000_000_000i64..1_000_000_000) {
                let f = cast(Value::Int(i), &Type::integer(), &Type::float()).unwrap();
                let back = cast(f, &Type::float(), &Type::integer()).unwrap();
                prop_assert_eq!(back, Value::Int(i));
            }

            #[test]
            fn prop_text_array_round_trip(items in proptest::collection::vec("[a-z ]{0,6}", 0..5)) {
                let to = Type::array_of(&Type::text());
                let value = Value::Array(items.iter().map(|s| Value::text(s.clone())).collect());
                let text = cast(value.clone(), &to, &Type::text()).unwrap();
                let back = cast(text, &Type::text(), &to).unwrap();
                prop_assert_eq!(back, value);
            }
        }
    }
}
