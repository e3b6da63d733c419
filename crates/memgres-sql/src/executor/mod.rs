//! Statement dispatch.
//!
//! A [`Database`] holds the catalog and one transaction of the version tree.
//! Outside of an explicit transaction the held transaction is a child of the
//! root; `BEGIN` forks it once more:
//!
//! ```text
//!   root ── batch ──┬─ savepoint (statement 1) ── commit into batch
//!                   ├─ savepoint (statement 2) ── rollback on error
//!                   └─ ...
//!   end of batch: full commit, fork a fresh batch
//! ```
//!
//! Schema statements commit everything up to the root before they run and
//! fork again afterwards, so they cannot be rolled back by a later
//! statement.

pub mod select;

mod ddl;
mod dml;
mod result;

use std::collections::{HashMap, HashSet};
use std::fmt;
use std::sync::Arc;

use chrono::NaiveDateTime;
use sqlparser::ast;
use tracing::{debug, debug_span, warn};

use crate::catalog::{ident, Catalog, Schema};
use crate::config::DbOptions;
use crate::error::{ExecError, SqlError, SqlResult};
use crate::expr::functions::FunctionDef;
use crate::expr::EvalContext;
use crate::parser::{parse_cached, ParsedStatement, Statement};
use crate::selection::{collect, Alias, Selection};
use crate::storage::{DataTx, Row, TableDef};

use ddl::Ddl;
use dml::Modified;
pub use result::{fields_of, FieldInfo, QueryResult};
use select::{Binding, Planner};

/// Installs an extension into a schema.
pub type ExtensionInstaller = Arc<dyn Fn(&mut Database, &str) -> SqlResult<()> + Send + Sync>;

/// An in-memory database.
///
/// # Example
///
/// ```
/// use memgres_sql::{Database, Value};
///
/// let mut db = Database::new().unwrap();
/// db.execute("CREATE TABLE t (a int, b text); INSERT INTO t VALUES (1, 'x'), (2, 'y');")
///     .unwrap();
/// let row = db.one("SELECT b FROM t WHERE a > 1").unwrap();
/// assert_eq!(row, vec![Value::text("y")]);
/// ```
pub struct Database {
    catalog: Catalog,
    /// Held transaction. Always a child of the root between calls.
    data: DataTx,
    /// Whether `BEGIN` opened the held transaction.
    explicit: bool,
    options: DbOptions,
    extensions: HashMap<String, ExtensionInstaller>,
    installed: HashSet<String>,
}

impl fmt::Debug for Database {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Database")
            .field("current_schema", &self.catalog.current_schema())
            .field("depth", &self.data.depth())
            .field("explicit", &self.explicit)
            .field("extensions", &self.extensions.keys().collect::<Vec<_>>())
            .finish()
    }
}

impl Database {
    /// Creates a database with default options.
    pub fn new() -> SqlResult<Self> {
        Self::with_options(DbOptions::default())
    }

    /// Creates a database.
    pub fn with_options(options: DbOptions) -> SqlResult<Self> {
        options.validate()?;
        let catalog = Catalog::new(&options)?;
        debug!(schema = %options.default_schema, "database created");
        Ok(Self {
            catalog,
            data: DataTx::root().fork(),
            explicit: false,
            options,
            extensions: HashMap::new(),
            installed: HashSet::new(),
        })
    }

    /// The options this database was created with.
    pub fn options(&self) -> &DbOptions {
        &self.options
    }

    /// Read access to the catalog.
    pub fn catalog(&self) -> &Catalog {
        &self.catalog
    }

    /// Returns true while a transaction opened by `BEGIN` is pending.
    pub fn in_transaction(&self) -> bool {
        self.explicit
    }

    // ------------------------------------------------------------------------
    // Execution
    // ------------------------------------------------------------------------

    /// Runs a batch of `;`-separated statements and returns one result per
    /// statement.
    ///
    /// The first failing statement stops the batch. Outside of an explicit
    /// transaction the statements before it stay applied.
    pub fn execute(&mut self, sql: &str) -> Result<Vec<QueryResult>, ExecError> {
        let batch = parse_cached(sql, self.options.parse_cache_capacity)?;
        let now = chrono::Utc::now().naive_utc();
        let mut results = Vec::with_capacity(batch.len());
        for parsed in batch.iter() {
            let span = debug_span!("statement", kind = parsed.statement.kind());
            let _enter = span.enter();
            match self.run(parsed, now) {
                Ok(mut result) => {
                    result.location = parsed.location;
                    results.push(result);
                }
                Err(error) => {
                    debug!(error = %error, "statement failed");
                    if !self.explicit {
                        self.commit_batch();
                    }
                    return Err(self.diagnose(error, parsed));
                }
            }
        }
        if !self.explicit {
            self.commit_batch();
        }
        Ok(results)
    }

    /// Runs a batch and returns the result of its last statement.
    pub fn query(&mut self, sql: &str) -> Result<QueryResult, ExecError> {
        Ok(self.execute(sql)?.pop().unwrap_or_default())
    }

    /// Runs a batch and returns the rows of its last statement.
    pub fn many(&mut self, sql: &str) -> Result<Vec<Row>, ExecError> {
        Ok(self.query(sql)?.rows)
    }

    /// Runs a batch and returns the first row of its last statement.
    pub fn one(&mut self, sql: &str) -> Result<Row, ExecError> {
        self.query(sql)?
            .rows
            .into_iter()
            .next()
            .ok_or_else(|| ExecError::bare(SqlError::query("query returned no rows")))
    }

    fn diagnose(&self, error: SqlError, parsed: &ParsedStatement) -> ExecError {
        ExecError {
            error,
            location: Some(parsed.location),
            statement: self.options.error_diagnostics.then(|| parsed.sql.clone()),
        }
    }

    fn take_data(&mut self) -> DataTx {
        std::mem::replace(&mut self.data, DataTx::root())
    }

    fn commit_batch(&mut self) {
        let root = self.take_data().full_commit();
        self.data = root.fork();
    }

    fn run(&mut self, parsed: &ParsedStatement, now: NaiveDateTime) -> SqlResult<QueryResult> {
        let stmt = match &parsed.statement {
            Statement::Sql(stmt) => stmt.as_ref(),
            Statement::CreateExtension {
                name,
                if_not_exists,
                schema,
            } => return self.create_extension(name, *if_not_exists, schema.as_deref()),
            Statement::CreateSequence {
                name,
                if_not_exists,
                options,
            } => return self.schema_change(now, |ddl| ddl.create_sequence(name, *if_not_exists, options)),
            Statement::AlterSequence {
                name,
                if_exists,
                options,
            } => return self.schema_change(now, |ddl| ddl.alter_sequence(name, *if_exists, options)),
            Statement::CreateEnum { name, labels } => {
                return self.schema_change(now, |ddl| ddl.create_enum(name, labels));
            }
            Statement::AlterTableOwner { table } => {
                return self.schema_change(now, |ddl| ddl.alter_owner(table));
            }
        };

        match stmt {
            ast::Statement::StartTransaction { .. } => Ok(self.begin()),
            ast::Statement::Commit { .. } => Ok(self.commit()),
            ast::Statement::Rollback { .. } => Ok(self.rollback()),

            ast::Statement::CreateTable { .. } => self.schema_change(now, |ddl| ddl.create_table(stmt)),
            ast::Statement::CreateIndex { .. } => self.schema_change(now, |ddl| ddl.create_index(stmt)),
            ast::Statement::AlterTable { .. } => self.schema_change(now, |ddl| ddl.alter_table(stmt)),
            ast::Statement::Drop { .. } => self.schema_change(now, |ddl| ddl.drop(stmt)),
            ast::Statement::CreateSchema { .. } => self.schema_change(now, |ddl| ddl.create_schema(stmt)),

            ast::Statement::Query(query) => {
                self.in_savepoint(|catalog, data| run_query(catalog, data, now, query))
            }
            ast::Statement::Insert { .. } | ast::Statement::Update { .. } | ast::Statement::Delete { .. } => {
                self.in_savepoint(|catalog, data| {
                    let planner = Planner::new(catalog);
                    let mut ctx = EvalContext::new(catalog, data, now);
                    Ok(modify(&planner, &mut ctx, stmt)?.into_result())
                })
            }
            ast::Statement::Truncate { .. } => {
                self.in_savepoint(|catalog, data| ddl::truncate(catalog, data, stmt))
            }
            ast::Statement::SetVariable { .. } | ast::Statement::SetTimeZone { .. } => {
                self.in_savepoint(|catalog, data| ddl::set(catalog, data, stmt))
            }
            ast::Statement::ShowVariable { .. } => {
                self.in_savepoint(|catalog, data| ddl::show(catalog, data, stmt))
            }
            other => Err(SqlError::not_supported(first_words(&other.to_string()))),
        }
    }

    /// Runs `f` in a savepoint of the held transaction.
    fn in_savepoint(
        &mut self,
        f: impl FnOnce(&mut Catalog, &mut DataTx) -> SqlResult<QueryResult>,
    ) -> SqlResult<QueryResult> {
        let tx = self.take_data();
        let catalog = &mut self.catalog;
        let (tx, result) = tx.savepoint(|data| f(catalog, data));
        self.data = tx;
        result
    }

    /// Commits everything, runs `f` against the root, and forks again.
    fn schema_change(
        &mut self,
        now: NaiveDateTime,
        f: impl FnOnce(&mut Ddl<'_>) -> SqlResult<QueryResult>,
    ) -> SqlResult<QueryResult> {
        if self.explicit {
            debug!("schema change commits the open transaction");
            self.explicit = false;
        }
        let root = self.take_data().full_commit();
        // the catalog is not versioned: a failing statement restores it by hand
        let snapshot = self.catalog.clone();
        let catalog = &mut self.catalog;
        let options = &self.options;
        let (root, result) = root.savepoint(|data| {
            let mut ddl = Ddl {
                catalog,
                data,
                options,
                now,
            };
            f(&mut ddl)
        });
        self.data = root.fork();
        if result.is_err() {
            self.catalog = snapshot;
        }
        result
    }

    // ------------------------------------------------------------------------
    // Transaction control
    // ------------------------------------------------------------------------

    fn begin(&mut self) -> QueryResult {
        if self.explicit {
            warn!("there is already a transaction in progress");
            return QueryResult::ignored("BEGIN");
        }
        self.data = self.take_data().fork();
        self.explicit = true;
        debug!(depth = self.data.depth(), "transaction started");
        QueryResult::command("BEGIN")
    }

    fn commit(&mut self) -> QueryResult {
        if !self.explicit {
            warn!("there is no transaction in progress");
            return QueryResult::ignored("COMMIT");
        }
        self.explicit = false;
        self.data = match self.take_data().commit() {
            Ok(parent) => parent,
            Err(e) => e.into_transaction(),
        };
        if !self.data.is_child() {
            self.data = self.take_data().fork();
        }
        debug!(depth = self.data.depth(), "transaction committed");
        QueryResult::command("COMMIT")
    }

    fn rollback(&mut self) -> QueryResult {
        if !self.explicit {
            warn!("there is no transaction in progress");
            return QueryResult::ignored("ROLLBACK");
        }
        self.explicit = false;
        self.data = match self.take_data().rollback() {
            Ok(parent) => parent,
            Err(e) => e.into_transaction(),
        };
        if !self.data.is_child() {
            self.data = self.take_data().fork();
        }
        debug!(depth = self.data.depth(), "transaction rolled back");
        QueryResult::command("ROLLBACK")
    }

    // ------------------------------------------------------------------------
    // Extensions
    // ------------------------------------------------------------------------

    /// Makes `CREATE EXTENSION name` available. The installer receives the
    /// target schema.
    pub fn register_extension<F>(&mut self, name: impl Into<String>, install: F)
    where
        F: Fn(&mut Database, &str) -> SqlResult<()> + Send + Sync + 'static,
    {
        self.extensions.insert(name.into(), Arc::new(install));
    }

    fn create_extension(&mut self, name: &str, if_not_exists: bool, schema: Option<&str>) -> SqlResult<QueryResult> {
        let install = self
            .extensions
            .get(name)
            .cloned()
            .ok_or_else(|| SqlError::query(format!("extension \"{}\" is not available", name)))?;
        let schema = match schema {
            Some(s) => {
                if self.catalog.schema(s).is_none() {
                    return Err(SqlError::query(format!("schema \"{}\" does not exist", s)));
                }
                s.to_string()
            }
            None => self.catalog.current_schema().to_string(),
        };
        if self.installed.contains(name) {
            if if_not_exists {
                return Ok(QueryResult::ignored("CREATE EXTENSION"));
            }
            return Err(SqlError::query("Extension already created !"));
        }

        self.explicit = false;
        let root = self.take_data().full_commit();
        self.data = root.fork();
        install(self, &schema)?;
        self.commit_batch();
        self.installed.insert(name.to_string());
        debug!(extension = name, schema = %schema, "extension installed");
        Ok(QueryResult::command("CREATE EXTENSION"))
    }

    // ------------------------------------------------------------------------
    // Catalog helpers
    // ------------------------------------------------------------------------

    /// Registers a host function in `schema`, or the current schema.
    pub fn register_function(&mut self, schema: Option<&str>, def: FunctionDef) -> SqlResult<()> {
        self.catalog.register_function(schema, def)
    }

    /// Looks up a schema.
    pub fn schema(&self, name: &str) -> Option<&Schema> {
        self.catalog.schema(name)
    }

    /// Creates a schema. Returns false when it already existed and
    /// `if_not_exists` was set.
    pub fn create_schema(&mut self, name: &str, if_not_exists: bool) -> SqlResult<bool> {
        self.catalog.create_schema(name, if_not_exists)
    }

    /// Replaces the search path.
    pub fn set_search_path<I, S>(&mut self, path: I)
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.catalog
            .set_search_path(path.into_iter().map(Into::into).collect());
    }

    /// Tables of every schema.
    pub fn list_tables(&self) -> Vec<Arc<TableDef>> {
        self.catalog.tables()
    }
}

// ============================================================================
// Queries and data changes
// ============================================================================

fn modify(planner: &Planner<'_>, ctx: &mut EvalContext<'_>, stmt: &ast::Statement) -> SqlResult<Modified> {
    match stmt {
        ast::Statement::Insert { .. } => dml::insert(planner, ctx, stmt),
        ast::Statement::Update { .. } => dml::update(planner, ctx, stmt),
        ast::Statement::Delete { .. } => dml::delete(planner, ctx, stmt),
        other => Err(SqlError::not_supported(first_words(&other.to_string()))),
    }
}

/// Runs a query, binding its `WITH` list first. Data-modifying bindings run
/// exactly once, before the body, in declaration order.
fn run_query(catalog: &Catalog, data: &mut DataTx, now: NaiveDateTime, query: &ast::Query) -> SqlResult<QueryResult> {
    let mut planner = Planner::new(catalog);
    if let Some(with) = &query.with {
        if with.recursive {
            return Err(SqlError::not_supported("WITH RECURSIVE"));
        }
        for cte in &with.cte_tables {
            let name = ident(&cte.alias.name);
            let columns: Vec<String> = cte.alias.columns.iter().map(ident).collect();
            let source: Arc<dyn Selection> = match cte.query.body.as_ref() {
                ast::SetExpr::Insert(stmt) | ast::SetExpr::Update(stmt) => {
                    let modified = {
                        let mut ctx = EvalContext::new(catalog, data, now);
                        modify(&planner, &mut ctx, stmt)?
                    };
                    match modified.returning {
                        Some(returned) => Arc::new(returned.selection()),
                        None => {
                            planner.bind(name, Binding::NoReturning)?;
                            continue;
                        }
                    }
                }
                _ => planner.plan_query(&cte.query, &[])?,
            };
            let aliased = Alias::new(source, &name, &columns)?;
            planner.bind(name, Binding::Rows(Arc::new(aliased)))?;
        }
    }

    match query.body.as_ref() {
        ast::SetExpr::Insert(stmt) | ast::SetExpr::Update(stmt) => {
            let mut ctx = EvalContext::new(catalog, data, now);
            Ok(modify(&planner, &mut ctx, stmt)?.into_result())
        }
        _ => {
            let selection = planner.plan_body(query, &[])?;
            let mut ctx = EvalContext::new(catalog, data, now);
            let rows = collect(selection.as_ref(), &mut ctx)?;
            Ok(QueryResult::rows("SELECT", selection.as_ref(), rows))
        }
    }
}

/// Leading keywords of a statement, for "not supported" messages.
fn first_words(sql: &str) -> String {
    sql.split_whitespace()
        .take_while(|w| w.chars().all(|c| c.is_ascii_alphabetic()))
        .take(3)
        .collect::<Vec<_>>()
        .join(" ")
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::ErrorKind;
    use crate::types::{Type, Value};

    fn db_with_table() -> Database {
        let mut db = Database::new().unwrap();
        db.execute("CREATE TABLE t (a int, b text)").unwrap();
        db
    }

    fn count(db: &mut Database) -> Value {
        db.one("SELECT count(*) FROM t").unwrap().remove(0)
    }

    #[test]
    fn test_results_per_statement() {
        let mut db = db_with_table();
        let results = db
            .execute("INSERT INTO t VALUES (1, 'x');\nSELECT * FROM t; SELECT 1")
            .unwrap();
        assert_eq!(results.len(), 3);
        assert_eq!(results[0].command, "INSERT");
        assert_eq!(results[0].row_count, 1);
        assert_eq!(results[1].rows, vec![vec![Value::Int(1), Value::text("x")]]);
        assert_eq!(results[1].location.line, 2);
        assert_eq!(results[1].fields[1].name, "b");
    }

    #[test]
    fn test_begin_rollback() {
        let mut db = db_with_table();
        db.execute("INSERT INTO t VALUES (1, 'x')").unwrap();
        db.execute("BEGIN; INSERT INTO t VALUES (2, 'y');").unwrap();
        assert!(db.in_transaction());
        assert_eq!(count(&mut db), Value::Int(2));
        db.execute("ROLLBACK").unwrap();
        assert!(!db.in_transaction());
        assert_eq!(count(&mut db), Value::Int(1));
    }

    #[test]
    fn test_begin_commit_across_calls() {
        let mut db = db_with_table();
        db.execute("BEGIN").unwrap();
        db.execute("INSERT INTO t VALUES (1, 'x')").unwrap();
        db.execute("COMMIT").unwrap();
        db.execute("BEGIN; ROLLBACK;").unwrap();
        assert_eq!(count(&mut db), Value::Int(1));
    }

    #[test]
    fn test_transaction_control_outside_transaction_is_ignored() {
        let mut db = db_with_table();
        assert!(db.query("COMMIT").unwrap().ignored);
        assert!(db.query("ROLLBACK").unwrap().ignored);
        let results = db.execute("BEGIN; BEGIN;").unwrap();
        assert!(!results[0].ignored);
        assert!(results[1].ignored);
        db.execute("ROLLBACK").unwrap();
    }

    #[test]
    fn test_failing_statement_keeps_earlier_ones() {
        let mut db = db_with_table();
        let err = db
            .execute("INSERT INTO t VALUES (1, 'x'); INSERT INTO t VALUES ('nope', 'y');")
            .unwrap_err();
        assert_eq!(err.kind(), ErrorKind::Query);
        assert_eq!(err.location.map(|l| l.column), Some(32));
        assert_eq!(err.statement.as_deref(), Some("INSERT INTO t VALUES ('nope', 'y')"));
        assert_eq!(count(&mut db), Value::Int(1));
    }

    #[test]
    fn test_failing_statement_is_atomic() {
        let mut db = Database::new().unwrap();
        db.execute("CREATE TABLE u (a int UNIQUE)").unwrap();
        let err = db.execute("INSERT INTO u VALUES (1), (2), (1)").unwrap_err();
        assert!(err.error.to_string().contains("u_a_key"));
        assert_eq!(db.one("SELECT count(*) FROM u").unwrap(), vec![Value::Int(0)]);
    }

    #[test]
    fn test_schema_change_survives_rollback() {
        let mut db = Database::new().unwrap();
        db.execute("BEGIN; CREATE TABLE t (a int); INSERT INTO t VALUES (1);")
            .unwrap();
        assert!(!db.in_transaction());
        assert!(db.query("ROLLBACK").unwrap().ignored);
        assert_eq!(db.one("SELECT count(*) FROM t").unwrap(), vec![Value::Int(1)]);
    }

    #[test]
    fn test_truncate_rolls_back() {
        let mut db = db_with_table();
        db.execute("INSERT INTO t VALUES (1, 'x'); BEGIN; TRUNCATE t; ROLLBACK;")
            .unwrap();
        assert_eq!(count(&mut db), Value::Int(1));
    }

    #[test]
    fn test_with_data_modifying_binding() {
        let mut db = db_with_table();
        let r = db
            .query(
                "WITH ins AS (INSERT INTO t VALUES (1, 'x'), (2, 'y') RETURNING a)
                 SELECT sum(a) FROM ins",
            )
            .unwrap();
        assert_eq!(r.rows, vec![vec![Value::Int(3)]]);
        assert_eq!(count(&mut db), Value::Int(2));

        let err = db
            .execute("WITH up AS (UPDATE t SET b = 'z') SELECT * FROM up")
            .unwrap_err();
        assert_eq!(err.kind(), ErrorKind::Query);
        // the failing statement rolled back its binding
        assert_eq!(db.many("SELECT b FROM t WHERE b = 'z'").unwrap().len(), 0);
    }

    #[test]
    fn test_unsupported_statement() {
        let mut db = Database::new().unwrap();
        let err = db.execute("CREATE VIEW v AS SELECT 1").unwrap_err();
        assert_eq!(err.kind(), ErrorKind::NotSupported);
    }

    #[test]
    fn test_extensions() {
        let mut db = Database::new().unwrap();
        db.register_extension("answer", |db: &mut Database, schema: &str| {
            db.register_function(
                Some(schema),
                FunctionDef::new("answer", vec![], Type::integer(), |_| Ok(Value::Int(42))),
            )
        });
        db.execute("CREATE EXTENSION answer").unwrap();
        assert_eq!(db.one("SELECT answer()").unwrap(), vec![Value::Int(42)]);
        let err = db.execute("CREATE EXTENSION answer").unwrap_err();
        assert_eq!(err.error.to_string(), "Extension already created !");
        assert!(db.query("CREATE EXTENSION IF NOT EXISTS answer").unwrap().ignored);
        assert!(db.execute("CREATE EXTENSION nope").is_err());
    }

    #[test]
    fn test_diagnostics_can_be_disabled() {
        let mut db =
            Database::with_options(DbOptions::new().with_error_diagnostics(false)).unwrap();
        let err = db.execute("SELECT * FROM missing").unwrap_err();
        assert_eq!(err.kind(), ErrorKind::RelationNotFound);
        assert!(err.statement.is_none());
        assert!(err.location.is_some());
    }

    #[test]
    fn test_search_path() {
        let mut db = Database::new().unwrap();
        db.execute("CREATE SCHEMA app; CREATE TABLE app.t (a int); INSERT INTO app.t VALUES (5);")
            .unwrap();
        assert!(db.execute("SELECT a FROM t").is_err());
        db.execute("SET search_path = app, public").unwrap();
        assert_eq!(db.one("SELECT a FROM t").unwrap(), vec![Value::Int(5)]);
        assert!(db.schema("app").is_some());
        assert_eq!(db.list_tables().len(), 1);
    }
}
