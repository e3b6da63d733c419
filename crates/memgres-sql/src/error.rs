//! Error types for memgres.
//!
//! Every failure raised while compiling or running a statement is a
//! [`SqlError`]. At the [`Database`](crate::Database) boundary it is wrapped
//! in an [`ExecError`] carrying the location and text of the failing
//! statement.

use std::fmt;

use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::types::TypeKind;

/// Stable classification of errors, for programmatic handling.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum ErrorKind {
    /// No valid conversion between two types, or a literal that does not
    /// parse as the target type.
    Cast,
    /// Syntactically valid statement that cannot be executed.
    Query,
    /// Recognized but unimplemented feature.
    NotSupported,
    /// Catalog miss on a relation.
    RelationNotFound,
    /// Catalog miss on a type.
    TypeNotFound,
    /// Mutation of a read-only schema.
    PermissionDenied,
    /// Text rejected by the SQL parser.
    Parse,
    /// Broken internal invariant.
    Internal,
}

impl fmt::Display for ErrorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:?}", self)
    }
}

/// Errors raised while compiling or executing SQL.
#[derive(Debug, Clone, PartialEq, Error)]
pub enum SqlError {
    /// Conversion between two types is impossible, or the runtime value
    /// cannot be parsed as the target type.
    #[error("cannot cast type {from} to {to}{}", in_context(.context))]
    Cast {
        /// Source kind.
        from: TypeKind,
        /// Target kind.
        to: TypeKind,
        /// What was being converted, when known.
        context: Option<String>,
    },

    /// Semantically invalid statement.
    #[error("{0}")]
    Query(String),

    /// Feature that is recognized but not implemented.
    #[error("not supported{}", in_feature(.0))]
    NotSupported(String),

    /// Relation lookup failed.
    #[error("relation \"{0}\" does not exist")]
    RelationNotFound(String),

    /// Type lookup failed.
    #[error("type \"{0}\" does not exist")]
    TypeNotFound(String),

    /// Attempt to mutate a read-only schema.
    #[error("permission denied: schema \"{0}\" is read-only")]
    PermissionDenied(String),

    /// The SQL text could not be parsed.
    #[error("syntax error: {0}")]
    Parse(String),

    /// Internal invariant violation.
    #[error("internal error: {0}")]
    Internal(String),
}

fn in_context(context: &Option<String>) -> String {
    context
        .as_ref()
        .map(|c| format!(" in {}", c))
        .unwrap_or_default()
}

fn in_feature(what: &str) -> String {
    if what.is_empty() {
        String::new()
    } else {
        format!(": {}", what)
    }
}

impl SqlError {
    /// Creates a query error.
    pub fn query(message: impl Into<String>) -> Self {
        SqlError::Query(message.into())
    }

    /// Creates a not-supported error.
    pub fn not_supported(what: impl Into<String>) -> Self {
        SqlError::NotSupported(what.into())
    }

    /// Creates a cast error.
    pub fn cast(from: TypeKind, to: TypeKind) -> Self {
        SqlError::Cast {
            from,
            to,
            context: None,
        }
    }

    /// Creates a cast error naming what was being converted.
    pub fn cast_in(from: TypeKind, to: TypeKind, context: impl Into<String>) -> Self {
        SqlError::Cast {
            from,
            to,
            context: Some(context.into()),
        }
    }

    /// Returns the error classification.
    pub fn kind(&self) -> ErrorKind {
        match self {
            SqlError::Cast { .. } => ErrorKind::Cast,
            SqlError::Query(_) => ErrorKind::Query,
            SqlError::NotSupported(_) => ErrorKind::NotSupported,
            SqlError::RelationNotFound(_) => ErrorKind::RelationNotFound,
            SqlError::TypeNotFound(_) => ErrorKind::TypeNotFound,
            SqlError::PermissionDenied(_) => ErrorKind::PermissionDenied,
            SqlError::Parse(_) => ErrorKind::Parse,
            SqlError::Internal(_) => ErrorKind::Internal,
        }
    }
}

impl From<sqlparser::parser::ParserError> for SqlError {
    fn from(err: sqlparser::parser::ParserError) -> Self {
        SqlError::Parse(err.to_string())
    }
}

/// Result type for SQL operations.
pub type SqlResult<T> = Result<T, SqlError>;

/// Where a statement starts in the submitted text (1-based).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct StatementLocation {
    /// Line number.
    pub line: u64,
    /// Column number.
    pub column: u64,
}

impl fmt::Display for StatementLocation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "line {}, column {}", self.line, self.column)
    }
}

/// An error raised by a statement of a batch, with where it happened.
#[derive(Debug, Clone)]
pub struct ExecError {
    /// The underlying error.
    pub error: SqlError,
    /// Location of the failing statement, when known.
    pub location: Option<StatementLocation>,
    /// Text of the failing statement, when diagnostics are enabled.
    pub statement: Option<String>,
}

impl ExecError {
    /// Wraps an error raised outside of any statement.
    pub fn bare(error: SqlError) -> Self {
        Self {
            error,
            location: None,
            statement: None,
        }
    }

    /// Returns the error classification.
    pub fn kind(&self) -> ErrorKind {
        self.error.kind()
    }
}

impl fmt::Display for ExecError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.error)?;
        if let Some(location) = &self.location {
            write!(f, " (at {})", location)?;
        }
        if let Some(statement) = &self.statement {
            write!(f, "\n  failed statement: {}", statement)?;
        }
        Ok(())
    }
}

impl std::error::Error for ExecError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        Some(&self.error)
    }
}

impl From<SqlError> for ExecError {
    fn from(error: SqlError) -> Self {
        ExecError::bare(error)
    }
}
