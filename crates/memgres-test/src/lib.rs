//! # memgres-test
//!
//! End-to-end tests for memgres, driven through [`Database`].
//!
//! This crate contains:
//! - Shared fixtures (`fresh`, `seeded`) and logging setup for the tests
//! - Row-building helpers that keep expected results short

#![warn(missing_docs)]
#![warn(clippy::all)]

use std::sync::Once;

use anyhow::Context;
use memgres_sql::{Database, DbOptions, Value};
use tracing_subscriber::EnvFilter;

static LOGGING: Once = Once::new();

/// Installs a test log subscriber once per process. `RUST_LOG` overrides
/// the default filter.
pub fn init_logging() {
    LOGGING.call_once(|| {
        let filter = EnvFilter::try_from_default_env()
            .or_else(|_| EnvFilter::try_new("memgres_sql=warn,memgres_txn=warn"))
            .unwrap_or_else(|_| EnvFilter::new("warn"));
        let _ = tracing_subscriber::fmt()
            .with_env_filter(filter)
            .with_test_writer()
            .with_target(true)
            .try_init();
    });
}

/// A database with default options.
pub fn fresh() -> anyhow::Result<Database> {
    init_logging();
    Ok(Database::new()?)
}

/// A database with `options`.
pub fn with_options(options: DbOptions) -> anyhow::Result<Database> {
    init_logging();
    Ok(Database::with_options(options)?)
}

/// A database on which `sql` already ran.
pub fn seeded(sql: &str) -> anyhow::Result<Database> {
    let mut db = fresh()?;
    db.execute(sql).context("seeding the database")?;
    Ok(db)
}

/// Shorthand for a text value.
pub fn text(s: &str) -> Value {
    Value::text(s)
}

/// Shorthand for an integer value.
pub fn int(i: i64) -> Value {
    Value::Int(i)
}

/// Rows of `(integer, text)` pairs.
pub fn int_text_rows(rows: &[(i64, &str)]) -> Vec<Vec<Value>> {
    rows.iter().map(|(i, s)| vec![int(*i), text(s)]).collect()
}
