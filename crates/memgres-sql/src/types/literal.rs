//! Parsing of text representations into runtime values.
//!
//! These are the building blocks of the `text -> X` conversions. Each parser
//! returns `None` on invalid input and lets the caller pick the error.

use bytes::Bytes;
use chrono::{DateTime, NaiveDate, NaiveDateTime, NaiveTime, Timelike};
use uuid::Uuid;

use super::value::{Circle, GeoBox, Lseg, Point};

/// Parses a boolean: any case-insensitive unique prefix of `true`, `false`,
/// `yes`, `no`, plus `on`, `off`, `1` and `0`.
pub fn parse_bool(text: &str) -> Option<bool> {
    let text = text.trim().to_ascii_lowercase();
    if text.is_empty() {
        return None;
    }
    match text.as_str() {
        "on" | "1" => return Some(true),
        "off" | "0" => return Some(false),
        _ => {}
    }
    if "true".starts_with(&text) || "yes".starts_with(&text) {
        Some(true)
    } else if "false".starts_with(&text) || "no".starts_with(&text) {
        Some(false)
    } else {
        None
    }
}

/// Parses a UUID in hyphenated, braced or bare-hex form.
pub fn parse_uuid(text: &str) -> Option<Uuid> {
    Uuid::parse_str(text.trim()).ok()
}

const TIMESTAMP_FORMATS: &[&str] = &[
    "%Y-%m-%d %H:%M:%S%.f",
    "%Y-%m-%dT%H:%M:%S%.f",
    "%Y-%m-%d %H:%M",
    "%Y-%m-%dT%H:%M",
];

/// Parses a timestamp. Time zone offsets are accepted and normalized to UTC;
/// a bare date means midnight.
pub fn parse_timestamp(text: &str) -> Option<NaiveDateTime> {
    let text = text.trim();
    parse_date_time(text).or_else(|| {
        NaiveDate::parse_from_str(text, "%Y-%m-%d")
            .ok()
            .and_then(|d| d.and_hms_opt(0, 0, 0))
    })
}

fn parse_date_time(text: &str) -> Option<NaiveDateTime> {
    for format in TIMESTAMP_FORMATS {
        if let Ok(ts) = NaiveDateTime::parse_from_str(text, format) {
            return Some(ts);
        }
    }
    if let Ok(ts) = DateTime::parse_from_rfc3339(text) {
        return Some(ts.naive_utc());
    }
    for format in ["%Y-%m-%d %H:%M:%S%.f%#z", "%Y-%m-%dT%H:%M:%S%.f%#z"] {
        if let Ok(ts) = DateTime::parse_from_str(text, format) {
            return Some(ts.naive_utc());
        }
    }
    None
}

/// Parses a date, dropping any time part.
pub fn parse_date(text: &str) -> Option<NaiveDate> {
    let text = text.trim();
    if let Ok(d) = NaiveDate::parse_from_str(text, "%Y-%m-%d") {
        return Some(d);
    }
    parse_date_time(text).map(|ts| ts.date())
}

/// Parses a time of day, keeping whole seconds.
pub fn parse_time(text: &str) -> Option<NaiveTime> {
    let text = text.trim();
    for format in ["%H:%M:%S%.f", "%H:%M"] {
        if let Ok(t) = NaiveTime::parse_from_str(text, format) {
            return Some(whole_seconds(t));
        }
    }
    parse_timestamp(text).map(|ts| whole_seconds(ts.time()))
}

/// Drops the fractional part of a time of day; `time` has second precision.
pub fn whole_seconds(t: NaiveTime) -> NaiveTime {
    t.with_nanosecond(0).unwrap_or(t)
}

/// Parses a byte array: `\x` followed by hex digits, or raw text.
pub fn parse_bytea(text: &str) -> Option<Bytes> {
    match text.strip_prefix("\\x") {
        Some(hex) => {
            if hex.len() % 2 != 0 {
                return None;
            }
            (0..hex.len())
                .step_by(2)
                .map(|i| u8::from_str_radix(hex.get(i..i + 2)?, 16).ok())
                .collect::<Option<Vec<u8>>>()
                .map(Bytes::from)
        }
        None => Some(Bytes::copy_from_slice(text.as_bytes())),
    }
}

/// An item of a Postgres array literal.
#[derive(Debug, Clone, PartialEq)]
pub enum ArrayItem {
    /// Unquoted `NULL`.
    Null,
    /// A scalar element, unescaped.
    Text(String),
    /// A nested array.
    Nested(Vec<ArrayItem>),
}

/// Parses a Postgres array literal such as `{a,"b c",NULL,{1,2}}`.
pub fn parse_array_literal(text: &str) -> Option<Vec<ArrayItem>> {
    let chars: Vec<char> = text.trim().chars().collect();
    let mut pos = 0;
    let items = parse_array_body(&chars, &mut pos)?;
    if pos == chars.len() {
        Some(items)
    } else {
        None
    }
}

fn parse_array_body(chars: &[char], pos: &mut usize) -> Option<Vec<ArrayItem>> {
    if chars.get(*pos) != Some(&'{') {
        return None;
    }
    *pos += 1;
    let mut items = Vec::new();
    if chars.get(*pos) == Some(&'}') {
        *pos += 1;
        return Some(items);
    }
    loop {
        skip_ws(chars, pos);
        let item = match chars.get(*pos)? {
            '{' => ArrayItem::Nested(parse_array_body(chars, pos)?),
            '"' => {
                *pos += 1;
                let mut s = String::new();
                loop {
                    match chars.get(*pos)? {
                        '\\' => {
                            s.push(*chars.get(*pos + 1)?);
                            *pos += 2;
                        }
                        '"' => {
                            *pos += 1;
                            break;
                        }
                        c => {
                            s.push(*c);
                            *pos += 1;
                        }
                    }
                }
                ArrayItem::Text(s)
            }
            _ => {
                let mut s = String::new();
                while let Some(c) = chars.get(*pos) {
                    if *c == ',' || *c == '}' {
                        break;
                    }
                    s.push(*c);
                    *pos += 1;
                }
                let s = s.trim().to_string();
                if s.eq_ignore_ascii_case("null") {
                    ArrayItem::Null
                } else {
                    ArrayItem::Text(s)
                }
            }
        };
        items.push(item);
        skip_ws(chars, pos);
        match chars.get(*pos)? {
            ',' => *pos += 1,
            '}' => {
                *pos += 1;
                return Some(items);
            }
            _ => return None,
        }
    }
}

fn skip_ws(chars: &[char], pos: &mut usize) {
    while chars.get(*pos).map_or(false, |c| c.is_whitespace()) {
        *pos += 1;
    }
}

fn numbers(text: &str) -> Option<Vec<f64>> {
    text.split(|c: char| matches!(c, '(' | ')' | '[' | ']' | '<' | '>' | ','))
        .map(str::trim)
        .filter(|s| !s.is_empty())
        .map(|s| s.parse::<f64>().ok())
        .collect()
}

/// Parses `(x,y)` or `x,y`.
pub fn parse_point(text: &str) -> Option<Point> {
    match numbers(text)?.as_slice() {
        [x, y] => Some(Point { x: *x, y: *y }),
        _ => None,
    }
}

/// Parses `[(x1,y1),(x2,y2)]` or `(x1,y1),(x2,y2)`.
pub fn parse_lseg(text: &str) -> Option<Lseg> {
    match numbers(text)?.as_slice() {
        [x1, y1, x2, y2] => Some(Lseg {
            a: Point { x: *x1, y: *y1 },
            b: Point { x: *x2, y: *y2 },
        }),
        _ => None,
    }
}

/// Parses a box from two opposite corners, normalizing corner order.
pub fn parse_box(text: &str) -> Option<GeoBox> {
    let seg = parse_lseg(text)?;
    Some(GeoBox {
        high: Point {
            x: seg.a.x.max(seg.b.x),
            y: seg.a.y.max(seg.b.y),
        },
        low: Point {
            x: seg.a.x.min(seg.b.x),
            y: seg.a.y.min(seg.b.y),
        },
    })
}

/// Parses `<(x,y),r>`, `((x,y),r)` or `(x,y),r`.
pub fn parse_circle(text: &str) -> Option<Circle> {
    match numbers(text)?.as_slice() {
        [x, y, r] if *r >= 0.0 => Some(Circle {
            center: Point { x: *x, y: *y },
            radius: *r,
        }),
        _ => None,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_bool_prefixes() {
        assert_eq!(parse_bool("t"), Some(true));
        assert_eq!(parse_bool("TRU"), Some(true));
        assert_eq!(parse_bool("y"), Some(true));
        assert_eq!(parse_bool("f"), Some(false));
        assert_eq!(parse_bool("No"), Some(false));
        assert_eq!(parse_bool("o"), None);
        assert_eq!(parse_bool("maybe"), None);
        assert_eq!(parse_bool(""), None);
    }

    #[test]
    fn test_parse_uuid_forms() {
        let canonical = "a0eebc99-9c0b-4ef8-bb6d-6bb9bd380a11";
        for form in [
            "A0EEBC99-9C0B-4EF8-BB6D-6BB9BD380A11",
            "{a0eebc99-9c0b-4ef8-bb6d-6bb9bd380a11}",
            "a0eebc999c0b4ef8bb6d6bb9bd380a11",
        ] {
            assert_eq!(parse_uuid(form).unwrap().to_string(), canonical);
        }
        assert!(parse_uuid("not-a-uuid").is_none());
    }

    #[test]
    fn test_parse_temporal() {
        let ts = parse_timestamp("2021-03-04 05:06:07").unwrap();
        assert_eq!(ts.to_string(), "2021-03-04 05:06:07");
        assert!(parse_timestamp("2021-03-04T05:06:07Z").is_some());
        assert_eq!(
            parse_timestamp("2021-03-04").unwrap().to_string(),
            "2021-03-04 00:00:00"
        );
        assert_eq!(
            parse_date("2021-03-04 05:06:07").unwrap().to_string(),
            "2021-03-04"
        );
        assert_eq!(parse_time("12:30").unwrap().to_string(), "12:30:00");
        assert_eq!(parse_time("03:04:05.678").unwrap().to_string(), "03:04:05");
        assert_eq!(
            parse_time("2020-01-02 03:04:05.999").unwrap().to_string(),
            "03:04:05"
        );
        assert!(parse_timestamp("yesterday-ish").is_none());
    }

    #[test]
    fn test_parse_array_literal() {
        let items = parse_array_literal("{a, \"b c\",NULL,{1,2}}").unwrap();
        assert_eq!(
            items,
            vec![
                ArrayItem::Text("a".into()),
                ArrayItem::Text("b c".into()),
                ArrayItem::Null,
                ArrayItem::Nested(vec![
                    ArrayItem::Text("1".into()),
                    ArrayItem::Text("2".into())
                ]),
            ]
        );
        assert_eq!(parse_array_literal("{}").unwrap(), vec![]);
        assert!(parse_array_literal("{a,b").is_none());
    }

    #[test]
    fn test_parse_geometry() {
        assert_eq!(parse_point("(1,2)"), Some(Point { x: 1.0, y: 2.0 }));
        let b = parse_box("(0,0),(2,3)").unwrap();
        assert_eq!(b.high, Point { x: 2.0, y: 3.0 });
        assert_eq!(parse_circle("<(1,1),5>").unwrap().radius, 5.0);
        assert!(parse_point("(1,2,3)").is_none());
    }

    #[test]
    fn test_parse_bytea() {
        assert_eq!(parse_bytea("\\x0aff").unwrap().as_ref(), &[0x0a, 0xff]);
        assert_eq!(parse_bytea("ab").unwrap().as_ref(), b"ab");
        assert!(parse_bytea("\\x0").is_none());
    }
}
