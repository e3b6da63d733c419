//! # memgres-sql
//!
//! An in-memory relational SQL engine with PostgreSQL-flavoured semantics,
//! meant for tests and prototypes that need a database without running one.
//!
//! This crate implements:
//! - Typed values and the type registry (casts, reconciliation, comparison)
//! - Compiled expressions and scalar/aggregate functions
//! - Lazy, restartable relational operators (scan, filter, join, group, ...)
//! - Row storage with unique indexes and sequences, versioned through
//!   [`memgres_txn::Transaction`]
//! - The catalog, the statement dispatcher and the parse cache
//!
//! # Example
//!
//! ```
//! use memgres_sql::{Database, Value};
//!
//! let mut db = Database::new().unwrap();
//! db.execute(
//!     "CREATE TABLE t (a int PRIMARY KEY, b text);
//!      INSERT INTO t VALUES (1, 'x');
//!      INSERT INTO t VALUES (1, 'z') ON CONFLICT (a) DO UPDATE SET b = excluded.b;",
//! )
//! .unwrap();
//! assert_eq!(db.one("SELECT b FROM t").unwrap(), vec![Value::text("z")]);
//! ```

#![warn(missing_docs)]
#![warn(clippy::all)]

/// Schemas and name resolution
pub mod catalog;

/// Database options
pub mod config;

/// Error taxonomy
pub mod error;

/// Statement dispatch
pub mod executor;

/// Compiled expressions and functions
pub mod expr;

/// SQL text to statements, with the parse cache
pub mod parser;

/// Relational operators
pub mod selection;

/// Table rows, indexes and sequences
pub mod storage;

/// Types and values
pub mod types;

pub use config::DbOptions;
pub use error::{ErrorKind, ExecError, SqlError, SqlResult, StatementLocation};
pub use executor::{Database, ExtensionInstaller, FieldInfo, QueryResult};
pub use expr::FunctionDef;
pub use types::{Type, Value};
