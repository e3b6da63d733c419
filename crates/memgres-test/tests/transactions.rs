//! Transaction control across statements and calls.

use memgres_sql::ErrorKind;
use memgres_test::{int, seeded};

fn count(db: &mut memgres_sql::Database, table: &str) -> i64 {
    db.one(&format!("SELECT count(*) FROM {}", table))
        .unwrap()
        .remove(0)
        .as_int()
        .unwrap()
}

#[test]
fn test_statements_of_a_batch_share_one_commit() {
    let mut db = seeded("CREATE TABLE t (a int)").unwrap();
    db.execute("INSERT INTO t VALUES (1); INSERT INTO t VALUES (2); SELECT * FROM t;")
        .unwrap();
    assert_eq!(count(&mut db, "t"), 2);
}

#[test]
fn test_explicit_transaction_spans_calls() {
    let mut db = seeded("CREATE TABLE t (a int)").unwrap();
    db.execute("BEGIN").unwrap();
    db.execute("INSERT INTO t VALUES (1)").unwrap();
    db.execute("INSERT INTO t VALUES (2)").unwrap();
    assert!(db.in_transaction());
    db.execute("ROLLBACK").unwrap();
    assert_eq!(count(&mut db, "t"), 0);

    db.execute("START TRANSACTION; INSERT INTO t VALUES (3);").unwrap();
    db.execute("COMMIT").unwrap();
    assert_eq!(count(&mut db, "t"), 1);
}

#[test]
fn test_error_inside_transaction_keeps_it_open() {
    let mut db = seeded("CREATE TABLE t (a int UNIQUE)").unwrap();
    db.execute("BEGIN; INSERT INTO t VALUES (1);").unwrap();
    let err = db.execute("INSERT INTO t VALUES (1)").unwrap_err();
    assert_eq!(err.kind(), ErrorKind::Query);
    assert!(db.in_transaction());
    db.execute("INSERT INTO t VALUES (2); COMMIT;").unwrap();
    assert_eq!(
        db.many("SELECT a FROM t ORDER BY a").unwrap(),
        vec![vec![int(1)], vec![int(2)]]
    );
}

#[test]
fn test_error_outside_transaction_keeps_earlier_statements() {
    let mut db = seeded("CREATE TABLE t (a int NOT NULL)").unwrap();
    let err = db
        .execute("INSERT INTO t VALUES (1); INSERT INTO t VALUES (NULL); INSERT INTO t VALUES (3);")
        .unwrap_err();
    assert!(err
        .error
        .to_string()
        .contains("null value in column \"a\" violates not-null constraint"));
    assert_eq!(err.location.map(|l| l.line), Some(1));
    assert_eq!(count(&mut db, "t"), 1);
}

#[test]
fn test_schema_changes_commit_immediately() {
    let mut db = seeded("CREATE TABLE t (a int)").unwrap();
    db.execute("BEGIN; INSERT INTO t VALUES (1); CREATE TABLE u (b int);")
        .unwrap();
    assert!(!db.in_transaction());
    db.execute("ROLLBACK").unwrap();
    assert_eq!(count(&mut db, "t"), 1);
    assert_eq!(count(&mut db, "u"), 0);
}

#[test]
fn test_sequences_follow_rollback() {
    let mut db = seeded("CREATE SEQUENCE s").unwrap();
    db.execute("SELECT nextval('s')").unwrap();
    db.execute("BEGIN; SELECT nextval('s'); SELECT nextval('s'); ROLLBACK;")
        .unwrap();
    assert_eq!(db.one("SELECT nextval('s')").unwrap(), vec![int(2)]);
}

#[test]
fn test_settings_follow_rollback() {
    let mut db = seeded("SET application_name = 'before'").unwrap();
    db.execute("BEGIN; SET application_name = 'inside'; ROLLBACK;")
        .unwrap();
    assert_eq!(
        db.one("SELECT current_setting('application_name')").unwrap(),
        vec![memgres_test::text("before")]
    );
}
