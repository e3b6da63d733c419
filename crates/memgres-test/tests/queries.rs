//! Queries and data changes over a small shop schema.

use memgres_sql::{Database, ErrorKind, FunctionDef, Type, Value};
use memgres_test::{int, seeded, text};

fn shop() -> Database {
    seeded(
        "CREATE TABLE customer (id serial PRIMARY KEY, name text NOT NULL, city text);
         CREATE TABLE orders (id serial PRIMARY KEY, customer int, amount int DEFAULT 0);
         INSERT INTO customer (name, city) VALUES ('ann', 'paris'), ('bob', 'rome'), ('cid', 'paris');
         INSERT INTO orders (customer, amount) VALUES (1, 10), (1, 15), (2, 7), (3, DEFAULT);",
    )
    .unwrap()
}

#[test]
fn test_join_and_aggregate() {
    let mut db = shop();
    let rows = db
        .many(
            "SELECT c.name, sum(o.amount) AS total
             FROM customer c JOIN orders o ON o.customer = c.id
             GROUP BY c.name
             HAVING sum(o.amount) > 0
             ORDER BY total DESC",
        )
        .unwrap();
    assert_eq!(
        rows,
        vec![vec![text("ann"), int(25)], vec![text("bob"), int(7)]]
    );
}

#[test]
fn test_aggregates() {
    let mut db = shop();
    let row = db
        .one("SELECT count(*), count(DISTINCT customer), min(amount), max(amount) FROM orders")
        .unwrap();
    assert_eq!(row, vec![int(4), int(3), int(0), int(15)]);
    let row = db
        .one("SELECT array_agg(name) FROM customer WHERE city = 'paris'")
        .unwrap();
    assert_eq!(row, vec![Value::Array(vec![text("ann"), text("cid")])]);
    let row = db
        .one("SELECT bool_and(amount > 5), bool_or(amount > 12) FROM orders")
        .unwrap();
    assert_eq!(row, vec![Value::Bool(false), Value::Bool(true)]);
}

#[test]
fn test_abs_of_smallest_integer() {
    let mut db = seeded(
        "CREATE TABLE n (a int);
         INSERT INTO n VALUES (-9223372036854775807 - 1), (-4);",
    )
    .unwrap();
    let err = db.execute("SELECT abs(a) FROM n").unwrap_err();
    assert_eq!(err.kind(), ErrorKind::Query);
    assert_eq!(err.error.to_string(), "integer out of range");
    assert_eq!(
        db.one("SELECT abs(a) FROM n WHERE a > -5").unwrap(),
        vec![int(4)]
    );
}

#[test]
fn test_distinct_and_limits() {
    let mut db = shop();
    let rows = db
        .many("SELECT DISTINCT city FROM customer ORDER BY city")
        .unwrap();
    assert_eq!(rows, vec![vec![text("paris")], vec![text("rome")]]);
    let rows = db
        .many("SELECT id FROM orders ORDER BY id LIMIT 2 OFFSET 1")
        .unwrap();
    assert_eq!(rows, vec![vec![int(2)], vec![int(3)]]);
}

#[test]
fn test_expressions_in_select_list() {
    let mut db = shop();
    let r = db
        .query(
            "SELECT upper(name) || '!' AS shout,
                    CASE WHEN city = 'paris' THEN 'fr' ELSE 'it' END,
                    coalesce(NULL, id) + 1
             FROM customer WHERE name LIKE 'a%'",
        )
        .unwrap();
    assert_eq!(r.fields[0].name, "shout");
    assert_eq!(r.rows, vec![vec![text("ANN!"), text("fr"), int(2)]]);
}

#[test]
fn test_insert_select_and_returning() {
    let mut db = shop();
    db.execute("CREATE TABLE archive (customer int, amount int)").unwrap();
    let r = db
        .query("INSERT INTO archive SELECT customer, amount FROM orders WHERE amount >= 10 RETURNING amount")
        .unwrap();
    assert_eq!(r.row_count, 2);
    assert_eq!(r.rows, vec![vec![int(10)], vec![int(15)]]);
}

#[test]
fn test_update_and_delete() {
    let mut db = shop();
    let r = db
        .query("UPDATE orders SET amount = amount * 2 WHERE customer = 1 RETURNING id, amount")
        .unwrap();
    assert_eq!(r.rows, vec![vec![int(1), int(20)], vec![int(2), int(30)]]);
    let r = db.query("DELETE FROM orders WHERE amount < 10").unwrap();
    assert_eq!(r.row_count, 2);
    assert_eq!(db.one("SELECT sum(amount) FROM orders").unwrap(), vec![int(50)]);
    let err = db
        .execute("UPDATE orders SET amount = 1 FROM customer WHERE customer.id = orders.customer")
        .unwrap_err();
    assert_eq!(err.kind(), ErrorKind::NotSupported);
}

#[test]
fn test_on_conflict_do_nothing() {
    let mut db = shop();
    let r = db
        .query(
            "INSERT INTO customer (id, name) VALUES (1, 'dup'), (9, 'new')
             ON CONFLICT (id) DO NOTHING RETURNING name",
        )
        .unwrap();
    assert_eq!(r.row_count, 1);
    assert_eq!(r.rows, vec![vec![text("new")]]);
    let err = db
        .execute("INSERT INTO customer (name, city) VALUES ('x', 'y') ON CONFLICT (city) DO NOTHING")
        .unwrap_err();
    assert!(err.error.to_string().contains("no unique or exclusion constraint"));
}

#[test]
fn test_with_bindings() {
    let mut db = shop();
    let rows = db
        .many(
            "WITH big AS (SELECT customer FROM orders WHERE amount > 8)
             SELECT name FROM customer WHERE id IN (SELECT customer FROM big) ORDER BY name",
        )
        .unwrap();
    assert_eq!(rows, vec![vec![text("ann")]]);

    let rows = db
        .many(
            "WITH moved AS (UPDATE customer SET city = 'oslo' WHERE city = 'rome' RETURNING id)
             SELECT count(*) FROM moved",
        )
        .unwrap();
    assert_eq!(rows, vec![vec![int(1)]]);
    assert_eq!(
        db.one("SELECT city FROM customer WHERE name = 'bob'").unwrap(),
        vec![text("oslo")]
    );
}

#[test]
fn test_ambiguous_and_missing_columns() {
    let mut db = shop();
    let err = db
        .execute("SELECT id FROM customer JOIN orders ON true")
        .unwrap_err();
    assert_eq!(err.kind(), ErrorKind::Query);
    assert!(err.error.to_string().contains("ambiguous"));
    let err = db.execute("SELECT nope FROM customer").unwrap_err();
    assert_eq!(err.kind(), ErrorKind::Query);
    let err = db.execute("SELECT * FROM nowhere").unwrap_err();
    assert_eq!(err.kind(), ErrorKind::RelationNotFound);
    assert_eq!(err.error.to_string(), "relation \"nowhere\" does not exist");
}

#[test]
fn test_host_function() {
    let mut db = shop();
    db.register_function(
        None,
        FunctionDef::new("twice", vec![Type::integer()], Type::integer(), |args| {
            Ok(Value::Int(args[0].as_int().unwrap_or(0) * 2))
        }),
    )
    .unwrap();
    assert_eq!(
        db.one("SELECT twice(amount) FROM orders WHERE id = 2").unwrap(),
        vec![int(30)]
    );
}
