//! Reference scenarios run end to end through `Database::execute`.

use memgres_sql::ErrorKind;
use memgres_test::{fresh, int, int_text_rows, seeded, text};

#[test]
fn test_filtered_select() {
    let mut db = seeded(
        "CREATE TABLE t (a int, b text);
         INSERT INTO t VALUES (1, 'x'), (2, 'y');",
    )
    .unwrap();
    let rows = db.many("SELECT * FROM t WHERE a > 1").unwrap();
    assert_eq!(rows, int_text_rows(&[(2, "y")]));
}

#[test]
fn test_on_conflict_do_update_uses_excluded() {
    let mut db = seeded(
        "CREATE TABLE t (a int, b text);
         CREATE UNIQUE INDEX t_a ON t (a);
         INSERT INTO t VALUES (1, 'x');",
    )
    .unwrap();
    let result = db
        .query("INSERT INTO t VALUES (1, 'z') ON CONFLICT (a) DO UPDATE SET b = excluded.b")
        .unwrap();
    assert_eq!(result.row_count, 1);
    assert_eq!(db.many("SELECT * FROM t").unwrap(), int_text_rows(&[(1, "z")]));
}

#[test]
fn test_non_integral_text_to_int() {
    let mut db = fresh().unwrap();
    let err = db.execute("SELECT CAST('3.7' AS int)").unwrap_err();
    assert_eq!(err.kind(), ErrorKind::Query);
    assert!(err.error.to_string().contains("invalid input syntax"));
}

#[test]
fn test_left_join_fills_nulls() {
    let mut db = seeded(
        "CREATE TABLE t1 (id int, a text);
         CREATE TABLE t2 (id int, c text);
         INSERT INTO t1 VALUES (1, 'one'), (2, 'two'), (3, 'three');
         INSERT INTO t2 VALUES (1, 'uno'), (3, 'tres');",
    )
    .unwrap();
    let rows = db
        .many("SELECT t1.a, t2.c FROM t1 LEFT JOIN t2 ON t1.id = t2.id ORDER BY t1.id")
        .unwrap();
    assert_eq!(rows.len(), 3);
    assert_eq!(rows[0], vec![text("one"), text("uno")]);
    assert!(rows[1][1].is_null());
    assert_eq!(rows[2], vec![text("three"), text("tres")]);
}

#[test]
fn test_rollback_restores_row_count() {
    let mut db = seeded(
        "CREATE TABLE t (a int, b text);
         INSERT INTO t VALUES (1, 'x');",
    )
    .unwrap();
    db.execute("BEGIN; INSERT INTO t VALUES (2, 'y'), (3, 'z'); ROLLBACK;")
        .unwrap();
    assert_eq!(db.one("SELECT count(*) FROM t").unwrap(), vec![int(1)]);
}

#[test]
fn test_distinct_on_keeps_first_row_per_key() {
    let mut db = seeded(
        "CREATE TABLE t (a int, b text);
         INSERT INTO t VALUES (1, 'x'), (1, 'y'), (2, 'z');",
    )
    .unwrap();
    let rows = db
        .many("SELECT DISTINCT ON (a) a, b FROM t ORDER BY a")
        .unwrap();
    assert_eq!(rows, int_text_rows(&[(1, "x"), (2, "z")]));
}

#[test]
fn test_grouped_order_by_aggregate() {
    let mut db = seeded(
        "CREATE TABLE t (dept text, name text);
         INSERT INTO t VALUES ('a', 'x'), ('b', 'y'), ('a', 'z'), ('c', 'w'), ('a', 'v'), ('b', 'u');",
    )
    .unwrap();
    let rows = db
        .many("SELECT dept, count(*) FROM t GROUP BY dept ORDER BY count(*) DESC")
        .unwrap();
    assert_eq!(
        rows,
        vec![
            vec![text("a"), int(3)],
            vec![text("b"), int(2)],
            vec![text("c"), int(1)],
        ]
    );
}
