//! Database configuration.

use serde::{Deserialize, Serialize};

use crate::error::{SqlError, SqlResult};

/// Default capacity of the process-wide parse cache.
pub const DEFAULT_PARSE_CACHE_CAPACITY: usize = 1000;

/// Options of a [`Database`](crate::Database).
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct DbOptions {
    /// Schema that receives unqualified DDL.
    pub default_schema: String,

    /// Schemas tried, in order, for unqualified lookups.
    pub search_path: Vec<String>,

    /// Number of parsed batches kept by the parse cache.
    pub parse_cache_capacity: usize,

    /// Accept and ignore indexes using a method other than btree. When
    /// false, such indexes are rejected as not supported.
    pub ignore_unsupported_indices: bool,

    /// Attach the text of the failing statement to errors.
    pub error_diagnostics: bool,
}

impl Default for DbOptions {
    fn default() -> Self {
        Self {
            default_schema: "public".to_string(),
            search_path: vec!["pg_catalog".to_string(), "public".to_string()],
            parse_cache_capacity: DEFAULT_PARSE_CACHE_CAPACITY,
            ignore_unsupported_indices: true,
            error_diagnostics: true,
        }
    }
}

impl DbOptions {
    /// Creates the default options.
    pub fn new() -> Self {
        Self::default()
    }

    /// Sets the default schema.
    #[must_use]
    pub fn with_default_schema(mut self, schema: impl Into<String>) -> Self {
        self.default_schema = schema.into();
        self
    }

    /// Sets the search path.
    #[must_use]
    pub fn with_search_path<I, S>(mut self, path: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.search_path = path.into_iter().map(Into::into).collect();
        self
    }

    /// Sets the parse cache capacity.
    #[must_use]
    pub fn with_parse_cache_capacity(mut self, capacity: usize) -> Self {
        self.parse_cache_capacity = capacity;
        self
    }

    /// Sets whether unsupported index methods are ignored.
    #[must_use]
    pub fn with_ignore_unsupported_indices(mut self, ignore: bool) -> Self {
        self.ignore_unsupported_indices = ignore;
        self
    }

    /// Sets whether errors carry the failing statement's text.
    #[must_use]
    pub fn with_error_diagnostics(mut self, enabled: bool) -> Self {
        self.error_diagnostics = enabled;
        self
    }

    /// Validates the options.
    pub fn validate(&self) -> SqlResult<()> {
        if self.default_schema.trim().is_empty() {
            return Err(SqlError::query("default schema name must not be empty"));
        }
        if self.search_path.iter().any(|s| s.trim().is_empty()) {
            return Err(SqlError::query("search path entries must not be empty"));
        }
        if self.parse_cache_capacity == 0 {
            return Err(SqlError::query("parse cache capacity must be positive"));
        }
        Ok(())
    }
}
