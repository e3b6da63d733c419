//! Casts, literals and typed columns.

use memgres_sql::{ErrorKind, Value};
use memgres_test::{fresh, int, seeded, text};

#[test]
fn test_explicit_casts() {
    let mut db = fresh().unwrap();
    assert_eq!(db.one("SELECT '42'::int").unwrap(), vec![int(42)]);
    assert_eq!(db.one("SELECT CAST(7 AS text)").unwrap(), vec![text("7")]);
    assert_eq!(db.one("SELECT 'yes'::bool").unwrap(), vec![Value::Bool(true)]);
    assert_eq!(db.one("SELECT 2.6::int").unwrap(), vec![int(3)]);
    assert_eq!(db.one("SELECT pg_typeof(1)::text").unwrap(), vec![text("integer")]);
}

#[test]
fn test_bad_literals() {
    let mut db = fresh().unwrap();
    let err = db.execute("SELECT 'abc'::int").unwrap_err();
    assert_eq!(err.kind(), ErrorKind::Query);
    let err = db.execute("SELECT 'noon'::timestamp").unwrap_err();
    assert!(err.error.to_string().starts_with("Invalid timestamp format"));
    assert!(db.execute("SELECT 'not-a-uuid'::uuid").is_err());
}

#[test]
fn test_bounded_text() {
    let mut db = seeded("CREATE TABLE t (code varchar(3))").unwrap();
    db.execute("INSERT INTO t VALUES ('abc')").unwrap();
    let err = db.execute("INSERT INTO t VALUES ('abcd')").unwrap_err();
    assert_eq!(
        err.error.to_string(),
        "value too long for type character varying(3)"
    );
    let r = db.query("SELECT code FROM t").unwrap();
    assert_eq!(r.fields[0].type_name, "character varying(3)");
}

#[test]
fn test_json_and_uuid_columns() {
    let mut db = seeded("CREATE TABLE doc (id uuid, body jsonb)").unwrap();
    db.execute(
        "INSERT INTO doc VALUES ('a0eebc99-9c0b-4ef8-bb6d-6bb9bd380a11', '{\"k\": [1, 2]}')",
    )
    .unwrap();
    let row = db.one("SELECT id::text, body::text FROM doc").unwrap();
    assert_eq!(row[0], text("a0eebc99-9c0b-4ef8-bb6d-6bb9bd380a11"));
    assert_eq!(row[1], text("{\"k\":[1,2]}"));
    assert!(db.execute("INSERT INTO doc VALUES (NULL, '{oops')").is_err());
}

#[test]
fn test_array_literals() {
    let mut db = fresh().unwrap();
    let row = db.one("SELECT '{1,2,3}'::int[]").unwrap();
    assert_eq!(row, vec![Value::Array(vec![int(1), int(2), int(3)])]);
    let row = db.one("SELECT ARRAY['a', 'b'][2]").unwrap();
    assert_eq!(row, vec![text("b")]);
}

#[test]
fn test_timestamps() {
    let mut db = seeded("CREATE TABLE ev (at timestamp)").unwrap();
    db.execute("INSERT INTO ev VALUES ('2024-03-01 10:20:30')").unwrap();
    assert_eq!(
        db.one("SELECT at::date::text FROM ev").unwrap(),
        vec![text("2024-03-01")]
    );
    let row = db
        .one("SELECT '2020-01-02 03:04:05.678'::timestamp::time::text, '10:20:30.9'::time::text")
        .unwrap();
    assert_eq!(row, vec![text("03:04:05"), text("10:20:30")]);
}

#[test]
fn test_case_insensitive_text() {
    let mut db = seeded(
        "CREATE TABLE u (email citext);
         INSERT INTO u VALUES ('Someone@Example.com');",
    )
    .unwrap();
    assert_eq!(
        db.one("SELECT count(*) FROM u WHERE email = 'someone@example.com'").unwrap(),
        vec![int(1)]
    );
}

#[test]
fn test_unknown_type() {
    let mut db = fresh().unwrap();
    let err = db.execute("CREATE TABLE t (a nonsense)").unwrap_err();
    assert_eq!(err.kind(), ErrorKind::TypeNotFound);
}
