//! Runtime values.

use std::cmp::Ordering;
use std::fmt;

use bytes::Bytes;
use chrono::{NaiveDate, NaiveDateTime, NaiveTime, Timelike};
use uuid::Uuid;

use super::compare::json_cmp;

/// A runtime value.
///
/// Values are untyped on their own: the [`Type`](super::Type) of the
/// expression that produced a value decides how it compares (citext and
/// enums share the `Text` representation with plain text).
#[derive(Debug, Clone, PartialEq)]
pub enum Value {
    /// SQL NULL.
    Null,
    /// Boolean.
    Bool(bool),
    /// Integer.
    Int(i64),
    /// Float.
    Float(f64),
    /// Text, citext and enum labels.
    Text(String),
    /// Byte array.
    Bytea(Bytes),
    /// Timestamp.
    Timestamp(NaiveDateTime),
    /// Date.
    Date(NaiveDate),
    /// Time of day.
    Time(NaiveTime),
    /// UUID.
    Uuid(Uuid),
    /// JSON and JSONB documents.
    Json(serde_json::Value),
    /// Array.
    Array(Vec<Value>),
    /// Point.
    Point(Point),
    /// Line segment.
    Lseg(Lseg),
    /// Box.
    Box(GeoBox),
    /// Circle.
    Circle(Circle),
    /// Type or relation handle.
    Reg(RegRef),
}

/// A geometric point.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Point {
    /// Abscissa.
    pub x: f64,
    /// Ordinate.
    pub y: f64,
}

/// A line segment.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Lseg {
    /// First end.
    pub a: Point,
    /// Second end.
    pub b: Point,
}

/// A box, stored upper-right corner first.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct GeoBox {
    /// Upper-right corner.
    pub high: Point,
    /// Lower-left corner.
    pub low: Point,
}

/// A circle.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Circle {
    /// Center.
    pub center: Point,
    /// Radius.
    pub radius: f64,
}

/// A regtype/regclass handle: either a numeric id or a name.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum RegRef {
    /// Numeric id.
    Id(u32),
    /// Name.
    Name(String),
}

impl fmt::Display for RegRef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            RegRef::Id(id) => write!(f, "{}", id),
            RegRef::Name(name) => f.write_str(name),
        }
    }
}

impl Value {
    /// Creates a text value.
    pub fn text(s: impl Into<String>) -> Self {
        Value::Text(s.into())
    }

    /// Returns true if this value is NULL.
    pub fn is_null(&self) -> bool {
        matches!(self, Value::Null)
    }

    /// Boolean content.
    pub fn as_bool(&self) -> Option<bool> {
        match self {
            Value::Bool(b) => Some(*b),
            _ => None,
        }
    }

    /// Integer content; floats are not truncated.
    pub fn as_int(&self) -> Option<i64> {
        match self {
            Value::Int(i) => Some(*i),
            _ => None,
        }
    }

    /// Numeric content as a float.
    pub fn as_float(&self) -> Option<f64> {
        match self {
            Value::Int(i) => Some(*i as f64),
            Value::Float(f) => Some(*f),
            _ => None,
        }
    }

    /// Text content.
    pub fn as_text(&self) -> Option<&str> {
        match self {
            Value::Text(s) => Some(s),
            _ => None,
        }
    }

    fn rank(&self) -> u8 {
        match self {
            Value::Null => 0,
            Value::Bool(_) => 1,
            Value::Int(_) | Value::Float(_) => 2,
            Value::Text(_) => 3,
            Value::Bytea(_) => 4,
            Value::Timestamp(_) => 5,
            Value::Date(_) => 6,
            Value::Time(_) => 7,
            Value::Uuid(_) => 8,
            Value::Json(_) => 9,
            Value::Array(_) => 10,
            Value::Point(_) => 11,
            Value::Lseg(_) => 12,
            Value::Box(_) => 13,
            Value::Circle(_) => 14,
            Value::Reg(_) => 15,
        }
    }

    /// Total order over values regardless of their type. Used for keys of
    /// groups, distinct sets and indexes.
    pub fn total_cmp(&self, other: &Value) -> Ordering {
        match (self, other) {
            (Value::Null, Value::Null) => Ordering::Equal,
            (Value::Bool(a), Value::Bool(b)) => a.cmp(b),
            (Value::Int(a), Value::Int(b)) => a.cmp(b),
            (Value::Int(_) | Value::Float(_), Value::Int(_) | Value::Float(_)) => {
                let (a, b) = (self.as_float().unwrap_or(0.0), other.as_float().unwrap_or(0.0));
                a.total_cmp(&b)
            }
            (Value::Text(a), Value::Text(b)) => a.cmp(b),
            (Value::Bytea(a), Value::Bytea(b)) => a.cmp(b),
            (Value::Timestamp(a), Value::Timestamp(b)) => a.cmp(b),
            (Value::Date(a), Value::Date(b)) => a.cmp(b),
            (Value::Time(a), Value::Time(b)) => a.cmp(b),
            (Value::Uuid(a), Value::Uuid(b)) => a.cmp(b),
            (Value::Json(a), Value::Json(b)) => json_cmp(a, b),
            (Value::Array(a), Value::Array(b)) => a
                .iter()
                .zip(b.iter())
                .map(|(x, y)| x.total_cmp(y))
                .find(|o| o.is_ne())
                .unwrap_or_else(|| a.len().cmp(&b.len())),
            (Value::Point(a), Value::Point(b)) => point_cmp(a, b),
            (Value::Lseg(a), Value::Lseg(b)) => point_cmp(&a.a, &b.a).then(point_cmp(&a.b, &b.b)),
            (Value::Box(a), Value::Box(b)) => {
                point_cmp(&a.high, &b.high).then(point_cmp(&a.low, &b.low))
            }
            (Value::Circle(a), Value::Circle(b)) => point_cmp(&a.center, &b.center)
                .then(a.radius.total_cmp(&b.radius)),
            (Value::Reg(a), Value::Reg(b)) => match (a, b) {
                (RegRef::Id(x), RegRef::Id(y)) => x.cmp(y),
                (RegRef::Name(x), RegRef::Name(y)) => x.cmp(y),
                (RegRef::Id(_), RegRef::Name(_)) => Ordering::Less,
                (RegRef::Name(_), RegRef::Id(_)) => Ordering::Greater,
            },
            _ => self.rank().cmp(&other.rank()),
        }
    }

    /// Converts to a JSON document, as used by [`QueryResult::to_json`].
    ///
    /// [`QueryResult::to_json`]: crate::QueryResult::to_json
    pub fn to_json(&self) -> serde_json::Value {
        use serde_json::{json, Value as Json};
        match self {
            Value::Null => Json::Null,
            Value::Bool(b) => Json::Bool(*b),
            Value::Int(i) => json!(i),
            Value::Float(f) => serde_json::Number::from_f64(*f)
                .map(Json::Number)
                .unwrap_or(Json::Null),
            Value::Json(j) => j.clone(),
            Value::Array(items) => Json::Array(items.iter().map(Value::to_json).collect()),
            Value::Point(p) => json!({ "x": p.x, "y": p.y }),
            Value::Reg(RegRef::Id(id)) => json!(id),
            other => Json::String(other.to_string()),
        }
    }
}

fn point_cmp(a: &Point, b: &Point) -> Ordering {
    a.x.total_cmp(&b.x).then(a.y.total_cmp(&b.y))
}

impl From<bool> for Value {
    fn from(v: bool) -> Self {
        Value::Bool(v)
    }
}

impl From<i64> for Value {
    fn from(v: i64) -> Self {
        Value::Int(v)
    }
}

impl From<i32> for Value {
    fn from(v: i32) -> Self {
        Value::Int(v as i64)
    }
}

impl From<f64> for Value {
    fn from(v: f64) -> Self {
        Value::Float(v)
    }
}

impl From<&str> for Value {
    fn from(v: &str) -> Self {
        Value::Text(v.to_string())
    }
}

impl From<String> for Value {
    fn from(v: String) -> Self {
        Value::Text(v)
    }
}

impl<T: Into<Value>> From<Option<T>> for Value {
    fn from(v: Option<T>) -> Self {
        v.map(Into::into).unwrap_or(Value::Null)
    }
}

impl fmt::Display for Point {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "({},{})", self.x, self.y)
    }
}

impl fmt::Display for Value {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Value::Null => f.write_str("NULL"),
            Value::Bool(b) => write!(f, "{}", b),
            Value::Int(i) => write!(f, "{}", i),
            Value::Float(v) => write!(f, "{}", v),
            Value::Text(s) => f.write_str(s),
            Value::Bytea(b) => {
                f.write_str("\\x")?;
                b.iter().try_for_each(|byte| write!(f, "{:02x}", byte))
            }
            Value::Timestamp(ts) => {
                if ts.nanosecond() == 0 {
                    write!(f, "{}", ts.format("%Y-%m-%d %H:%M:%S"))
                } else {
                    write!(f, "{}", ts.format("%Y-%m-%d %H:%M:%S%.6f"))
                }
            }
            Value::Date(d) => write!(f, "{}", d.format("%Y-%m-%d")),
            Value::Time(t) => write!(f, "{}", t.format("%H:%M:%S")),
            Value::Uuid(u) => write!(f, "{}", u),
            Value::Json(j) => write!(f, "{}", j),
            Value::Array(items) => {
                f.write_str("{")?;
                for (i, item) in items.iter().enumerate() {
                    if i > 0 {
                        f.write_str(",")?;
                    }
                    write_array_item(f, item)?;
                }
                f.write_str("}")
            }
            Value::Point(p) => write!(f, "{}", p),
            Value::Lseg(l) => write!(f, "[{},{}]", l.a, l.b),
            Value::Box(b) => write!(f, "{},{}", b.high, b.low),
            Value::Circle(c) => write!(f, "<{},{}>", c.center, c.radius),
            Value::Reg(r) => write!(f, "{}", r),
        }
    }
}

fn write_array_item(f: &mut fmt::Formatter<'_>, item: &Value) -> fmt::Result {
    match item {
        Value::Null => f.write_str("NULL"),
        Value::Array(_) => write!(f, "{}", item),
        other => {
            let text = other.to_string();
            let needs_quotes = text.is_empty()
                || text.eq_ignore_ascii_case("null")
                || text
                    .chars()
                    .any(|c| matches!(c, '{' | '}' | ',' | '"' | '\\') || c.is_whitespace());
            if needs_quotes {
                let escaped = text.replace('\\', "\\\\").replace('"', "\\\"");
                write!(f, "\"{}\"", escaped)
            } else {
                f.write_str(&text)
            }
        }
    }
}

/// A row of values, ordered by a total order. Used as a map key wherever
/// rows are grouped, deduplicated or indexed.
#[derive(Debug, Clone)]
pub struct SortKey(pub Vec<Value>);

impl PartialEq for SortKey {
    fn eq(&self, other: &Self) -> bool {
        self.cmp(other) == Ordering::Equal
    }
}

impl Eq for SortKey {}

impl PartialOrd for SortKey {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl Ord for SortKey {
    fn cmp(&self, other: &Self) -> Ordering {
        self.0
            .iter()
            .zip(other.0.iter())
            .map(|(a, b)| a.total_cmp(b))
            .find(|o| o.is_ne())
            .unwrap_or_else(|| self.0.len().cmp(&other.0.len()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_display_scalars() {
        assert_eq!(Value::Float(1.0).to_string(), "1");
        assert_eq!(Value::Float(2.5).to_string(), "2.5");
        assert_eq!(Value::Bytea(Bytes::from_static(b"\x01\xab")).to_string(), "\\x01ab");
        let ts = NaiveDate::from_ymd_opt(2020, 1, 2)
            .unwrap()
            .and_hms_opt(3, 4, 5)
            .unwrap();
        assert_eq!(Value::Timestamp(ts).to_string(), "2020-01-02 03:04:05");
    }

    #[test]
    fn test_display_array_quotes() {
        let v = Value::Array(vec![
            Value::text("a"),
            Value::text("b c"),
            Value::Null,
            Value::text(""),
            Value::Array(vec![Value::Int(1)]),
        ]);
        assert_eq!(v.to_string(), "{a,\"b c\",NULL,\"\",{1}}");
    }

    #[test]
    fn test_total_cmp_mixes_numbers() {
        assert_eq!(Value::Int(1).total_cmp(&Value::Float(1.0)), Ordering::Equal);
        assert_eq!(Value::Int(1).total_cmp(&Value::Float(1.5)), Ordering::Less);
        assert_eq!(Value::Null.total_cmp(&Value::Int(0)), Ordering::Less);
    }

    #[test]
    fn test_sort_key_order() {
        let a = SortKey(vec![Value::Int(1), Value::text("b")]);
        let b = SortKey(vec![Value::Int(1), Value::text("c")]);
        assert!(a < b);
        assert_eq!(a.clone(), a);
    }
}
