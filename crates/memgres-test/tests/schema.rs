//! Schema statements and constraint enforcement.

use memgres_sql::{DbOptions, ErrorKind, Value};
use memgres_test::{fresh, int, seeded, text, with_options};

#[test]
fn test_constraints() {
    let mut db = seeded(
        "CREATE TABLE acct (
            id int PRIMARY KEY,
            owner text NOT NULL,
            balance int CHECK (balance >= 0),
            UNIQUE (owner)
        )",
    )
    .unwrap();
    db.execute("INSERT INTO acct VALUES (1, 'ann', 5)").unwrap();

    let err = db.execute("INSERT INTO acct VALUES (1, 'bob', 5)").unwrap_err();
    assert_eq!(
        err.error.to_string(),
        "duplicate key value violates unique constraint \"acct_pkey\""
    );
    let err = db.execute("INSERT INTO acct VALUES (2, 'ann', 5)").unwrap_err();
    assert!(err.error.to_string().contains("\"acct_owner_key\""));
    let err = db.execute("INSERT INTO acct VALUES (2, NULL, 5)").unwrap_err();
    assert!(err.error.to_string().contains("not-null"));
    let err = db.execute("UPDATE acct SET balance = -1").unwrap_err();
    assert_eq!(
        err.error.to_string(),
        "new row for relation \"acct\" violates check constraint \"acct_balance_check\""
    );
    assert_eq!(db.one("SELECT balance FROM acct").unwrap(), vec![int(5)]);
}

#[test]
fn test_alter_table_round() {
    let mut db = seeded(
        "CREATE TABLE p (id serial PRIMARY KEY, name text);
         INSERT INTO p (name) VALUES ('a'), ('b');",
    )
    .unwrap();
    db.execute(
        "ALTER TABLE p ADD COLUMN score int DEFAULT 0;
         ALTER TABLE p ALTER COLUMN score SET DEFAULT 10;
         INSERT INTO p (name) VALUES ('c');",
    )
    .unwrap();
    assert_eq!(
        db.many("SELECT id, score FROM p ORDER BY id").unwrap(),
        vec![
            vec![int(1), int(0)],
            vec![int(2), int(0)],
            vec![int(3), int(10)]
        ]
    );
    db.execute("ALTER TABLE p RENAME TO people; ALTER TABLE people DROP COLUMN name;")
        .unwrap();
    let r = db.query("SELECT * FROM people WHERE id = 3").unwrap();
    let names: Vec<&str> = r.fields.iter().map(|f| f.name.as_str()).collect();
    assert_eq!(names, vec!["id", "score"]);
    let err = db.execute("SELECT * FROM p").unwrap_err();
    assert_eq!(err.kind(), ErrorKind::RelationNotFound);
}

#[test]
fn test_failed_alter_table_leaves_table_intact() {
    let mut db = seeded(
        "CREATE TABLE t (a int);
         INSERT INTO t VALUES (1);",
    )
    .unwrap();
    let err = db
        .execute("ALTER TABLE t ADD COLUMN c int, ADD COLUMN a int")
        .unwrap_err();
    assert!(err.error.to_string().contains("already exists"));

    let r = db.query("SELECT * FROM t").unwrap();
    let names: Vec<&str> = r.fields.iter().map(|f| f.name.as_str()).collect();
    assert_eq!(names, vec!["a"]);
    assert_eq!(r.rows, vec![vec![int(1)]]);
    db.execute("ALTER TABLE t ADD COLUMN c int").unwrap();
    assert_eq!(db.one("SELECT a, c FROM t").unwrap(), vec![int(1), Value::Null]);
}

#[test]
fn test_unique_constraint_added_later() {
    let mut db = seeded(
        "CREATE TABLE k (a int, b int);
         INSERT INTO k VALUES (1, 1), (1, 2);",
    )
    .unwrap();
    assert!(db.execute("ALTER TABLE k ADD CONSTRAINT k_a UNIQUE (a)").is_err());
    db.execute("ALTER TABLE k ADD CONSTRAINT k_b UNIQUE (b)").unwrap();
    assert!(db.execute("INSERT INTO k VALUES (5, 2)").is_err());
    db.execute("ALTER TABLE k DROP CONSTRAINT k_b; INSERT INTO k VALUES (5, 2);")
        .unwrap();
    assert_eq!(db.one("SELECT count(*) FROM k").unwrap(), vec![int(3)]);
}

#[test]
fn test_drop_statements() {
    let mut db = seeded(
        "CREATE TABLE d (id serial, v int);
         CREATE INDEX d_v ON d (v);
         CREATE SEQUENCE free_seq;",
    )
    .unwrap();
    db.execute("DROP INDEX d_v; DROP SEQUENCE free_seq; DROP TABLE d;")
        .unwrap();
    assert!(db.list_tables().is_empty());
    assert!(db.execute("DROP TABLE d").is_err());
    assert!(db.query("DROP TABLE IF EXISTS d").unwrap().ignored);
    let err = db.execute("SELECT nextval('d_id_seq')").unwrap_err();
    assert_eq!(err.kind(), ErrorKind::RelationNotFound);
}

#[test]
fn test_sequence_options() {
    let mut db = seeded("CREATE SEQUENCE s AS integer INCREMENT BY -1 MINVALUE 1 MAXVALUE 3 START 3 CYCLE")
        .unwrap();
    let values: Vec<Value> = (0..4)
        .map(|_| db.one("SELECT nextval('s')").unwrap().remove(0))
        .collect();
    assert_eq!(values, vec![int(3), int(2), int(1), int(3)]);
    assert_eq!(db.one("SELECT setval('s', 2)").unwrap(), vec![int(2)]);
    assert_eq!(db.one("SELECT nextval('s')").unwrap(), vec![int(1)]);
}

#[test]
fn test_schemas_and_read_only_catalog() {
    let mut db = fresh().unwrap();
    db.execute("CREATE SCHEMA IF NOT EXISTS app; CREATE TABLE app.item (v int);")
        .unwrap();
    assert!(db.query("CREATE SCHEMA IF NOT EXISTS app").unwrap().ignored);
    let err = db.execute("CREATE TABLE pg_catalog.mine (v int)").unwrap_err();
    assert_eq!(err.kind(), ErrorKind::PermissionDenied);
    assert_eq!(
        db.one("SELECT current_schema()").unwrap(),
        vec![text("public")]
    );
}

#[test]
fn test_default_schema_option() {
    let mut db = with_options(
        DbOptions::new()
            .with_default_schema("main")
            .with_search_path(["pg_catalog", "main"]),
    )
    .unwrap();
    db.execute("CREATE TABLE t (a int); INSERT INTO t VALUES (1);").unwrap();
    assert!(db.schema("main").is_some());
    assert_eq!(db.one("SELECT count(*) FROM main.t").unwrap(), vec![int(1)]);
}

#[test]
fn test_enum_columns() {
    let mut db = seeded(
        "CREATE TYPE size AS ENUM ('s', 'm', 'l');
         CREATE TABLE shirt (sz size);
         INSERT INTO shirt VALUES ('l'), ('s'), ('m');",
    )
    .unwrap();
    assert_eq!(
        db.many("SELECT sz FROM shirt WHERE sz > 's' ORDER BY sz").unwrap(),
        vec![vec![text("m")], vec![text("l")]]
    );
}
