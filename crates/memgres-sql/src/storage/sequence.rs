//! Sequences.
//!
//! The definition (bounds, increment, cycling) lives in the catalog; the
//! counter is versioned state, so a rolled-back transaction also rolls back
//! the values it drew.

use crate::error::{SqlError, SqlResult};

/// One clause of `CREATE SEQUENCE` / `ALTER SEQUENCE`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SequenceOption {
    /// `AS smallint|integer|bigint`.
    As(String),
    /// `INCREMENT [BY] n`.
    Increment(i64),
    /// `MINVALUE n`, or `NO MINVALUE` as `None`.
    MinValue(Option<i64>),
    /// `MAXVALUE n`, or `NO MAXVALUE` as `None`.
    MaxValue(Option<i64>),
    /// `START [WITH] n`.
    Start(i64),
    /// `RESTART [WITH n]`.
    Restart(Option<i64>),
    /// `CACHE n`.
    Cache(i64),
    /// `[NO] CYCLE`.
    Cycle(bool),
    /// `OWNED BY table.column`, or `OWNED BY NONE` as `None`.
    OwnedBy(Option<String>),
}

/// Resolved sequence parameters.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SequenceOptions {
    /// Name of the value type (`bigint` unless declared otherwise).
    pub data_type: String,
    /// Step between values.
    pub increment: i64,
    /// Lowest value.
    pub min: i64,
    /// Highest value.
    pub max: i64,
    /// First value.
    pub start: i64,
    /// Number of values preallocated (recorded, not used).
    pub cache: i64,
    /// Wrap around at the bounds.
    pub cycle: bool,
    /// Owning column, as `table.column`.
    pub owned_by: Option<String>,
}

impl Default for SequenceOptions {
    fn default() -> Self {
        Self {
            data_type: "bigint".to_string(),
            increment: 1,
            min: 1,
            max: i64::MAX,
            start: 1,
            cache: 1,
            cycle: false,
            owned_by: None,
        }
    }
}

fn type_bound(data_type: &str) -> SqlResult<i64> {
    match data_type {
        "smallint" | "int2" => Ok(i16::MAX as i64),
        "integer" | "int" | "int4" => Ok(i32::MAX as i64),
        "bigint" | "int8" => Ok(i64::MAX),
        other => Err(SqlError::query(
            format!("sequence type must be smallint, integer, or bigint, got {}", other),
        )),
    }
}

impl SequenceOptions {
    /// Resolves the clauses of `CREATE SEQUENCE`.
    pub fn create(options: &[SequenceOption]) -> SqlResult<Self> {
        let mut resolved = SequenceOptions::default();
        resolved.merge(options, true)?;
        Ok(resolved)
    }

    /// Applies the clauses of `ALTER SEQUENCE` on top of `self`. Returns the
    /// value a `RESTART` clause asked for, if any: `Some(None)` restarts at
    /// the start value.
    pub fn alter(&mut self, options: &[SequenceOption]) -> SqlResult<Option<Option<i64>>> {
        self.merge(options, false)
    }

    fn merge(&mut self, options: &[SequenceOption], creating: bool) -> SqlResult<Option<Option<i64>>> {
        let mut restart = None;
        let mut min = None;
        let mut max = None;
        let mut start = None;
        for option in options {
            match option {
                SequenceOption::As(t) => {
                    type_bound(t)?;
                    self.data_type = t.clone();
                }
                SequenceOption::Increment(i) => self.increment = *i,
                SequenceOption::MinValue(v) => min = Some(*v),
                SequenceOption::MaxValue(v) => max = Some(*v),
                SequenceOption::Start(v) => start = Some(*v),
                SequenceOption::Restart(v) => restart = Some(*v),
                SequenceOption::Cache(v) => self.cache = *v,
                SequenceOption::Cycle(c) => self.cycle = *c,
                SequenceOption::OwnedBy(o) => self.owned_by = o.clone(),
            }
        }
        if self.increment == 0 {
            return Err(SqlError::query("INCREMENT must not be zero"));
        }
        let bound = type_bound(&self.data_type)?;
        let ascending = self.increment > 0;
        self.min = match min {
            Some(Some(v)) => v,
            None if !creating => self.min,
            _ => default_min(ascending, bound),
        };
        self.max = match max {
            Some(Some(v)) => v,
            None if !creating => self.max,
            _ => default_max(ascending, bound),
        };
        self.start = match start {
            Some(v) => v,
            None if !creating => self.start,
            None if ascending => self.min,
            None => self.max,
        };
        if self.min >= self.max {
            return Err(SqlError::query(format!(
                "MINVALUE ({}) must be less than MAXVALUE ({})",
                self.min, self.max
            )));
        }
        if self.start < self.min {
            return Err(SqlError::query(format!(
                "START value ({}) cannot be less than MINVALUE ({})",
                self.start, self.min
            )));
        }
        if self.start > self.max {
            return Err(SqlError::query(format!(
                "START value ({}) cannot be greater than MAXVALUE ({})",
                self.start, self.max
            )));
        }
        if self.cache < 1 {
            return Err(SqlError::query(format!(
                "CACHE ({}) must be greater than zero",
                self.cache
            )));
        }
        Ok(restart)
    }
}

fn default_min(ascending: bool, bound: i64) -> i64 {
    if ascending {
        1
    } else {
        -bound
    }
}

fn default_max(ascending: bool, bound: i64) -> i64 {
    if ascending {
        bound
    } else {
        -1
    }
}

/// A sequence registered in the catalog.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SequenceDef {
    /// Catalog id.
    pub id: u32,
    /// Owning schema.
    pub schema: String,
    /// Sequence name.
    pub name: String,
    /// Parameters.
    pub options: SequenceOptions,
}

/// Counter state of a sequence.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SequenceState {
    /// Last value handed out (or the value the next call returns when
    /// `is_called` is false).
    pub last_value: i64,
    /// Whether `last_value` was already handed out.
    pub is_called: bool,
    /// Value returned by the last `nextval`, for `currval`.
    pub current: Option<i64>,
}

impl SequenceState {
    /// Fresh state for a sequence.
    pub fn new(options: &SequenceOptions) -> Self {
        Self {
            last_value: options.start,
            is_called: false,
            current: None,
        }
    }
}

impl SequenceDef {
    /// Advances the counter and returns the new value.
    pub fn next(&self, state: &mut SequenceState) -> SqlResult<i64> {
        let o = &self.options;
        let value = if !state.is_called {
            state.last_value
        } else {
            match state.last_value.checked_add(o.increment) {
                Some(v) if v >= o.min && v <= o.max => v,
                _ if !o.cycle => {
                    let (which, bound) = if o.increment > 0 {
                        ("maximum", o.max)
                    } else {
                        ("minimum", o.min)
                    };
                    return Err(SqlError::query(format!(
                        "nextval: reached {} value of sequence \"{}\" ({})",
                        which, self.name, bound
                    )));
                }
                _ if o.increment > 0 => o.min,
                _ => o.max,
            }
        };
        state.last_value = value;
        state.is_called = true;
        state.current = Some(value);
        Ok(value)
    }

    /// Value of the last `nextval` call.
    pub fn current(&self, state: Option<&SequenceState>) -> SqlResult<i64> {
        state.and_then(|s| s.current).ok_or_else(|| {
            SqlError::query(format!(
                "currval of sequence \"{}\" is not yet defined in this session",
                self.name
            ))
        })
    }

    /// Moves the counter. With `is_called`, the next value is the one after
    /// `value`; without, it is `value` itself.
    pub fn set(&self, state: &mut SequenceState, value: i64, is_called: bool) -> SqlResult<()> {
        let o = &self.options;
        if value < o.min || value > o.max {
            return Err(SqlError::query(format!(
                "setval: value {} is out of bounds for sequence \"{}\" ({}..{})",
                value, self.name, o.min, o.max
            )));
        }
        state.last_value = value;
        state.is_called = is_called;
        Ok(())
    }

    /// Restarts the counter at `value`, or at the start value.
    pub fn restart(&self, state: &mut SequenceState, value: Option<i64>) {
        state.last_value = value.unwrap_or(self.options.start);
        state.is_called = false;
    }
}
