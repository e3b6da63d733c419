//! Equality and ordering predicates over runtime values.
//!
//! Comparison is type-directed: the same `Value::Text` compares
//! case-insensitively under `citext` and by declaration order under an enum.

use std::cmp::Ordering;

use serde_json::Value as Json;

use super::{DataType, Type, Value};

/// Tolerance under which two JSON numbers are equal.
const JSON_NUMBER_DELTA: f64 = 0.0001;

/// Maximum nesting walked by [`json_cmp`].
const JSON_MAX_DEPTH: usize = 10;

/// Compares two values of type `ty`. Returns `None` when either is NULL.
pub fn compare(ty: &Type, a: &Value, b: &Value) -> Option<Ordering> {
    if a.is_null() || b.is_null() {
        return None;
    }
    Some(compare_non_null(ty, a, b))
}

fn compare_non_null(ty: &Type, a: &Value, b: &Value) -> Ordering {
    match (ty.data(), a, b) {
        (DataType::Citext, Value::Text(x), Value::Text(y)) => {
            x.to_lowercase().cmp(&y.to_lowercase())
        }
        (DataType::Enum(def), Value::Text(x), Value::Text(y)) => {
            match (def.position(x), def.position(y)) {
                (Some(i), Some(j)) => i.cmp(&j),
                _ => x.cmp(y),
            }
        }
        (DataType::Array(elem), Value::Array(x), Value::Array(y)) => x
            .iter()
            .zip(y.iter())
            .map(|(p, q)| match (p.is_null(), q.is_null()) {
                (true, true) => Ordering::Equal,
                (true, false) => Ordering::Less,
                (false, true) => Ordering::Greater,
                (false, false) => compare_non_null(elem, p, q),
            })
            .find(|o| o.is_ne())
            .unwrap_or_else(|| x.len().cmp(&y.len())),
        _ => a.total_cmp(b),
    }
}

/// Equality under `ty`. Returns `None` when either side is NULL.
pub fn equals(ty: &Type, a: &Value, b: &Value) -> Option<bool> {
    compare(ty, a, b).map(Ordering::is_eq)
}

/// Canonical form of a value for use in keys: values equal under `ty` map
/// to values equal under [`Value::total_cmp`].
pub fn canonical(ty: &Type, value: &Value) -> Value {
    match (ty.data(), value) {
        (DataType::Citext, Value::Text(s)) => Value::Text(s.to_lowercase()),
        (DataType::Enum(def), Value::Text(s)) => match def.position(s) {
            Some(pos) => Value::Int(pos as i64),
            None => value.clone(),
        },
        (DataType::Array(elem), Value::Array(items)) => {
            Value::Array(items.iter().map(|v| canonical(elem, v)).collect())
        }
        _ => value.clone(),
    }
}

/// Structural, non-strict ordering of JSON documents.
///
/// Falsy leaves (`null`, `false`, `0`, `""`) are all equal, numbers are equal
/// within a small tolerance, arrays order by length first, and objects are
/// compared over the union of their keys, a missing key reading as `null`.
pub fn json_cmp(a: &Json, b: &Json) -> Ordering {
    json_cmp_depth(a, b, JSON_MAX_DEPTH)
}

fn is_falsy(v: &Json) -> bool {
    match v {
        Json::Null => true,
        Json::Bool(b) => !b,
        Json::Number(n) => n.as_f64() == Some(0.0),
        Json::String(s) => s.is_empty(),
        _ => false,
    }
}

fn json_rank(v: &Json) -> u8 {
    match v {
        Json::Null => 0,
        Json::Number(_) => 1,
        Json::String(_) => 2,
        Json::Bool(_) => 3,
        Json::Array(_) => 4,
        Json::Object(_) => 5,
    }
}

fn json_cmp_depth(a: &Json, b: &Json, depth: usize) -> Ordering {
    if a == b || (is_falsy(a) && is_falsy(b)) {
        return Ordering::Equal;
    }
    if depth == 0 {
        return json_rank(a).cmp(&json_rank(b));
    }
    match (a, b) {
        (Json::Array(x), Json::Array(y)) => x.len().cmp(&y.len()).then_with(|| {
            x.iter()
                .zip(y.iter())
                .map(|(p, q)| json_cmp_depth(p, q, depth - 1))
                .find(|o| o.is_ne())
                .unwrap_or(Ordering::Equal)
        }),
        (Json::Number(x), Json::Number(y)) => {
            let (x, y) = (x.as_f64().unwrap_or(0.0), y.as_f64().unwrap_or(0.0));
            if (x - y).abs() <= JSON_NUMBER_DELTA {
                Ordering::Equal
            } else {
                x.total_cmp(&y)
            }
        }
        (Json::String(x), Json::String(y)) => x.cmp(y),
        (Json::Bool(x), Json::Bool(y)) => x.cmp(y),
        (Json::Object(x), Json::Object(y)) => {
            let mut keys: Vec<&String> = x.keys().chain(y.keys()).collect();
            keys.sort();
            keys.dedup();
            keys.into_iter()
                .map(|k| {
                    json_cmp_depth(
                        x.get(k).unwrap_or(&Json::Null),
                        y.get(k).unwrap_or(&Json::Null),
                        depth - 1,
                    )
                })
                .find(|o| o.is_ne())
                .unwrap_or(Ordering::Equal)
        }
        _ => json_rank(a).cmp(&json_rank(b)),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::EnumType;
    use serde_json::json;

    #[test]
    fn test_null_is_incomparable() {
        assert_eq!(compare(&Type::integer(), &Value::Null, &Value::Int(1)), None);
        assert_eq!(equals(&Type::text(), &Value::Null, &Value::Null), None);
    }

    #[test]
    fn test_citext_ignores_case() {
        let t = Type::citext();
        assert_eq!(equals(&t, &Value::text("Abc"), &Value::text("aBC")), Some(true));
        assert_eq!(
            equals(&Type::text(), &Value::text("Abc"), &Value::text("aBC")),
            Some(false)
        );
    }

    #[test]
    fn test_enum_follows_declaration_order() {
        let t = Type::enumeration(EnumType {
            oid: 90001,
            name: "mood".into(),
            labels: vec!["sad".into(), "ok".into(), "happy".into()],
        });
        assert_eq!(
            compare(&t, &Value::text("sad"), &Value::text("happy")),
            Some(Ordering::Less)
        );
    }

    #[test]
    fn test_array_shorter_wins_tiebreak() {
        let t = Type::array_of(&Type::integer());
        let short = Value::Array(vec![Value::Int(1)]);
        let long = Value::Array(vec![Value::Int(1), Value::Int(0)]);
        assert_eq!(compare(&t, &short, &long), Some(Ordering::Less));
        let big = Value::Array(vec![Value::Int(2)]);
        assert_eq!(compare(&t, &long, &big), Some(Ordering::Less));
    }

    #[test]
    fn test_json_deep_compare() {
        assert_eq!(json_cmp(&json!({"a": 1}), &json!({"a": 1.00001})), Ordering::Equal);
        assert_eq!(json_cmp(&json!({"a": null}), &json!({})), Ordering::Equal);
        assert_eq!(json_cmp(&json!(0), &json!(false)), Ordering::Equal);
        assert_eq!(json_cmp(&json!([1, 2]), &json!([5])), Ordering::Greater);
        assert_eq!(json_cmp(&json!({"a": 1}), &json!({"a": 2})), Ordering::Less);
        assert_eq!(json_cmp(&json!("a"), &json!("b")), Ordering::Less);
    }

    #[test]
    fn test_canonical_keys() {
        assert_eq!(
            canonical(&Type::citext(), &Value::text("ABC")),
            Value::text("abc")
        );
        assert_eq!(canonical(&Type::text(), &Value::text("ABC")), Value::text("ABC"));
    }
}
