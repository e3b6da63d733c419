//! Scalar functions: the builtin set and host-registered definitions.

use std::fmt;
use std::sync::Arc;

use crate::catalog::{Catalog, QName};
use crate::error::{SqlError, SqlResult};
use crate::storage::{self, DataKey, DataTx, DataValue, SequenceState};
use crate::types::cast::RegResolver;
use crate::types::{RegRef, Type, TypeKind, Value};

use super::build::unify;
use super::{EvalContext, Evaluator};

// ============================================================================
// Host functions
// ============================================================================

type Implementation = Arc<dyn Fn(&[Value]) -> SqlResult<Value> + Send + Sync>;

/// A function registered by the host program.
///
/// ```ignore
/// db.register_function(
///     FunctionDef::new("add_one", vec![Type::integer()], Type::integer(), |args| {
///         Ok(Value::Int(args[0].as_int().unwrap_or(0) + 1))
///     }),
/// )?;
/// ```
#[derive(Clone)]
pub struct FunctionDef {
    /// Name, matched case-insensitively.
    pub name: String,
    /// Declared argument types.
    pub args: Vec<Type>,
    /// Type of extra trailing arguments, when variadic.
    pub variadic: Option<Type>,
    /// Result type.
    pub returns: Type,
    /// Whether the result may differ between calls with equal arguments.
    pub impure: bool,
    /// Whether NULL arguments reach the implementation. When false, any
    /// NULL argument yields NULL without calling it.
    pub allow_null_arguments: bool,
    implementation: Implementation,
}

impl FunctionDef {
    /// Creates a definition.
    pub fn new<F>(name: impl Into<String>, args: Vec<Type>, returns: Type, f: F) -> Self
    where
        F: Fn(&[Value]) -> SqlResult<Value> + Send + Sync + 'static,
    {
        Self {
            name: name.into(),
            args,
            variadic: None,
            returns,
            impure: false,
            allow_null_arguments: false,
            implementation: Arc::new(f),
        }
    }

    /// Accepts any number of extra arguments of type `ty`.
    #[must_use]
    pub fn with_variadic(mut self, ty: Type) -> Self {
        self.variadic = Some(ty);
        self
    }

    /// Marks the function as impure.
    #[must_use]
    pub fn with_impure(mut self, impure: bool) -> Self {
        self.impure = impure;
        self
    }

    /// Lets NULL arguments through to the implementation.
    #[must_use]
    pub fn with_null_arguments(mut self, allow: bool) -> Self {
        self.allow_null_arguments = allow;
        self
    }

    /// Returns true if the function accepts `count` arguments.
    pub fn accepts_arity(&self, count: usize) -> bool {
        count == self.args.len() || (self.variadic.is_some() && count > self.args.len())
    }

    /// Declared type of argument `i`.
    pub fn arg_type(&self, i: usize) -> Option<&Type> {
        self.args.get(i).or(self.variadic.as_ref())
    }

    /// Calls the implementation.
    pub fn invoke(&self, args: &[Value]) -> SqlResult<Value> {
        if !self.allow_null_arguments && args.iter().any(Value::is_null) {
            return Ok(Value::Null);
        }
        (self.implementation)(args)
    }
}

impl fmt::Debug for FunctionDef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("FunctionDef")
            .field("name", &self.name)
            .field("args", &self.args)
            .field("variadic", &self.variadic)
            .field("returns", &self.returns)
            .finish_non_exhaustive()
    }
}

/// Picks the overload of `candidates` matching `args`: first by arity, then
/// by implicit convertibility of every argument. Returns the definition and
/// the converted arguments.
pub fn resolve_overload(
    name: &str,
    candidates: &[Arc<FunctionDef>],
    args: &[Evaluator],
    resolver: &dyn RegResolver,
) -> SqlResult<(Arc<FunctionDef>, Vec<Evaluator>)> {
    'candidates: for def in candidates.iter().filter(|d| d.accepts_arity(args.len())) {
        let mut converted = Vec::with_capacity(args.len());
        for (i, arg) in args.iter().enumerate() {
            let Some(want) = def.arg_type(i) else {
                continue 'candidates;
            };
            let ok = arg.ty() == want
                || arg.ty().can_convert_implicit(want)
                || (arg.is_constant() && arg.ty().can_cast_explicit(want));
            if !ok {
                continue 'candidates;
            }
            converted.push(arg.coerce(want, resolver)?);
        }
        return Ok((def.clone(), converted));
    }
    Err(no_such_function(name, args))
}

fn no_such_function(name: &str, args: &[Evaluator]) -> SqlError {
    let types: Vec<String> = args.iter().map(|a| a.ty().name()).collect();
    SqlError::query(format!(
        "function {}({}) does not exist",
        name,
        types.join(", ")
    ))
}

// ============================================================================
// Builtins
// ============================================================================

/// Builtin scalar functions.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Builtin {
    /// `lower(text)`.
    Lower,
    /// `upper(text)`.
    Upper,
    /// `length(text)`.
    Length,
    /// `concat(any...)`.
    Concat,
    /// `coalesce(a, b, ...)`.
    Coalesce,
    /// `nullif(a, b)`.
    NullIf,
    /// `abs(number)`.
    Abs,
    /// `now()`.
    Now,
    /// `gen_random_uuid()`.
    GenRandomUuid,
    /// `nextval(sequence)`.
    NextVal,
    /// `currval(sequence)`.
    CurrVal,
    /// `setval(sequence, value [, is_called])`.
    SetVal,
    /// `current_schema()`.
    CurrentSchema,
    /// `current_setting(name)`.
    CurrentSetting,
    /// `pg_typeof(any)`.
    PgTypeof,
    /// `version()`.
    Version,
}

impl Builtin {
    /// Recognizes a builtin by (lowercase) name.
    pub fn from_name(name: &str) -> Option<Self> {
        Some(match name {
            "lower" => Builtin::Lower,
            "upper" => Builtin::Upper,
            "length" | "char_length" | "character_length" => Builtin::Length,
            "concat" => Builtin::Concat,
            "coalesce" => Builtin::Coalesce,
            "nullif" => Builtin::NullIf,
            "abs" => Builtin::Abs,
            "now" | "current_timestamp" | "localtimestamp" => Builtin::Now,
            "gen_random_uuid" => Builtin::GenRandomUuid,
            "nextval" => Builtin::NextVal,
            "currval" => Builtin::CurrVal,
            "setval" => Builtin::SetVal,
            "current_schema" => Builtin::CurrentSchema,
            "current_setting" => Builtin::CurrentSetting,
            "pg_typeof" => Builtin::PgTypeof,
            "version" => Builtin::Version,
            _ => return None,
        })
    }

    /// Name as written in SQL.
    pub fn name(&self) -> &'static str {
        match self {
            Builtin::Lower => "lower",
            Builtin::Upper => "upper",
            Builtin::Length => "length",
            Builtin::Concat => "concat",
            Builtin::Coalesce => "coalesce",
            Builtin::NullIf => "nullif",
            Builtin::Abs => "abs",
            Builtin::Now => "now",
            Builtin::GenRandomUuid => "gen_random_uuid",
            Builtin::NextVal => "nextval",
            Builtin::CurrVal => "currval",
            Builtin::SetVal => "setval",
            Builtin::CurrentSchema => "current_schema",
            Builtin::CurrentSetting => "current_setting",
            Builtin::PgTypeof => "pg_typeof",
            Builtin::Version => "version",
        }
    }

    /// Returns true for functions whose result depends on more than their
    /// arguments.
    pub fn is_impure(&self) -> bool {
        matches!(
            self,
            Builtin::Now
                | Builtin::GenRandomUuid
                | Builtin::NextVal
                | Builtin::CurrVal
                | Builtin::SetVal
                | Builtin::CurrentSetting
        )
    }

    /// Type-checks `args`, converting them as needed, and returns the result
    /// type.
    pub fn prepare(
        &self,
        args: Vec<Evaluator>,
        resolver: &dyn RegResolver,
    ) -> SqlResult<(Vec<Evaluator>, Type)> {
        let arity_ok = match self {
            Builtin::Now | Builtin::GenRandomUuid | Builtin::CurrentSchema | Builtin::Version => {
                args.is_empty()
            }
            Builtin::Lower
            | Builtin::Upper
            | Builtin::Length
            | Builtin::Abs
            | Builtin::NextVal
            | Builtin::CurrVal
            | Builtin::CurrentSetting
            | Builtin::PgTypeof => args.len() == 1,
            Builtin::NullIf => args.len() == 2,
            Builtin::SetVal => args.len() == 2 || args.len() == 3,
            Builtin::Concat | Builtin::Coalesce => !args.is_empty(),
        };
        if !arity_ok {
            return Err(no_such_function(self.name(), &args));
        }

        let text = |a: &Evaluator| -> SqlResult<Evaluator> {
            if a.ty().is_text() {
                Ok(a.clone())
            } else if a.is_constant() || a.ty().kind() == TypeKind::RegClass {
                a.convert(&Type::text(), true, resolver)
            } else {
                Err(no_such_function(self.name(), std::slice::from_ref(a)))
            }
        };

        Ok(match self {
            Builtin::Lower | Builtin::Upper => {
                let ty = if args[0].ty().kind() == TypeKind::Citext {
                    Type::citext()
                } else {
                    Type::text()
                };
                (vec![text(&args[0])?], ty)
            }
            Builtin::Length => (vec![text(&args[0])?], Type::integer()),
            Builtin::Concat => {
                let converted = args
                    .iter()
                    .map(|a| a.convert(&Type::text(), true, resolver))
                    .collect::<SqlResult<Vec<_>>>()?;
                (converted, Type::text())
            }
            Builtin::Coalesce | Builtin::NullIf => {
                let (ty, converted) = unify(&args, resolver)?;
                (converted, ty)
            }
            Builtin::Abs => {
                let arg = &args[0];
                let ty = match arg.ty().kind() {
                    TypeKind::Integer => Type::integer(),
                    TypeKind::Float => Type::float(),
                    _ if arg.is_constant() => Type::float(),
                    _ => return Err(no_such_function(self.name(), &args)),
                };
                (vec![arg.coerce(&ty, resolver)?], ty)
            }
            Builtin::Now => (args, Type::timestamp()),
            Builtin::GenRandomUuid => (args, Type::uuid()),
            Builtin::NextVal | Builtin::CurrVal => (vec![text(&args[0])?], Type::integer()),
            Builtin::SetVal => {
                let mut converted = vec![text(&args[0])?, args[1].coerce(&Type::integer(), resolver)?];
                if let Some(called) = args.get(2) {
                    converted.push(called.coerce(&Type::bool(), resolver)?);
                }
                (converted, Type::integer())
            }
            Builtin::CurrentSchema | Builtin::Version => (args, Type::text()),
            Builtin::CurrentSetting => (vec![text(&args[0])?], Type::text()),
            Builtin::PgTypeof => (args, Type::regtype()),
        })
    }
}

/// Evaluates a builtin call.
pub(crate) fn call_builtin(
    func: Builtin,
    args: &[Evaluator],
    ty: &Type,
    row: &[Value],
    ctx: &mut EvalContext<'_>,
) -> SqlResult<Value> {
    // lazy ones first
    match func {
        Builtin::Coalesce => {
            for arg in args {
                let v = arg.get(row, ctx)?;
                if !v.is_null() {
                    return Ok(v);
                }
            }
            return Ok(Value::Null);
        }
        Builtin::PgTypeof => {
            return Ok(Value::Reg(RegRef::Name(
                args.first().map(|a| a.ty().name()).unwrap_or_default(),
            )))
        }
        _ => {}
    }

    let values = args
        .iter()
        .map(|a| a.get(row, ctx))
        .collect::<SqlResult<Vec<_>>>()?;
    let first = values.first().cloned().unwrap_or(Value::Null);

    Ok(match func {
        Builtin::Lower => match first {
            Value::Text(s) => Value::Text(s.to_lowercase()),
            _ => Value::Null,
        },
        Builtin::Upper => match first {
            Value::Text(s) => Value::Text(s.to_uppercase()),
            _ => Value::Null,
        },
        Builtin::Length => match first {
            Value::Text(s) => Value::Int(s.chars().count() as i64),
            _ => Value::Null,
        },
        Builtin::Concat => Value::Text(
            values
                .iter()
                .filter(|v| !v.is_null())
                .map(|v| v.to_string())
                .collect(),
        ),
        Builtin::NullIf => {
            let second = values.get(1).cloned().unwrap_or(Value::Null);
            match crate::types::compare::compare(ty, &first, &second) {
                Some(ord) if ord.is_eq() => Value::Null,
                _ => first,
            }
        }
        Builtin::Abs => match first {
            Value::Int(i) => Value::Int(
                i.checked_abs()
                    .ok_or_else(|| SqlError::query("integer out of range"))?,
            ),
            Value::Float(f) => Value::Float(f.abs()),
            _ => Value::Null,
        },
        Builtin::Now => Value::Timestamp(ctx.now),
        Builtin::GenRandomUuid => Value::Uuid(uuid::Uuid::new_v4()),
        Builtin::NextVal | Builtin::CurrVal | Builtin::SetVal => {
            let Value::Text(name) = first else {
                return Ok(Value::Null);
            };
            sequence_call(func, &name, &values[1..], ctx)?
        }
        Builtin::CurrentSchema => Value::Text(ctx.catalog.current_schema().to_string()),
        Builtin::CurrentSetting => match first {
            Value::Text(name) => Value::Text(read_setting(ctx.data, ctx.catalog, &name)?),
            _ => Value::Null,
        },
        Builtin::Version => Value::Text(format!(
            "PostgreSQL {} (memgres {})",
            SERVER_VERSION,
            env!("CARGO_PKG_VERSION")
        )),
        Builtin::Coalesce | Builtin::PgTypeof => Value::Null,
    })
}

fn sequence_call(
    func: Builtin,
    name: &str,
    rest: &[Value],
    ctx: &mut EvalContext<'_>,
) -> SqlResult<Value> {
    let seq = ctx.catalog.sequence(&QName::parse(name))?;
    let key = DataKey::Sequence(seq.id);
    if func == Builtin::CurrVal {
        let state = match ctx.data.get(&key) {
            Some(DataValue::Sequence(s)) => Some(s),
            _ => None,
        };
        return seq.current(state).map(Value::Int);
    }
    let slot = ctx
        .data
        .get_or_insert_with(&key, || DataValue::Sequence(SequenceState::new(&seq.options)));
    let DataValue::Sequence(state) = slot else {
        return Err(SqlError::Internal(format!(
            "sequence \"{}\" holds foreign data",
            seq.name
        )));
    };
    match func {
        Builtin::NextVal => seq.next(state).map(Value::Int),
        _ => {
            let Some(value) = rest.first().and_then(Value::as_int) else {
                return Ok(Value::Null);
            };
            let is_called = rest.get(1).and_then(Value::as_bool).unwrap_or(true);
            seq.set(state, value, is_called)?;
            Ok(Value::Int(value))
        }
    }
}

// ============================================================================
// Settings
// ============================================================================

/// Version reported to clients.
pub const SERVER_VERSION: &str = "12.2";

/// Reads a configuration parameter: a value set with `SET` wins, then the
/// built-in default.
pub fn read_setting(data: &DataTx, catalog: &Catalog, name: &str) -> SqlResult<String> {
    let name = name.to_lowercase();
    if let Some(v) = storage::setting(data, &name) {
        return Ok(v.to_string());
    }
    Ok(match name.as_str() {
        "server_version" => SERVER_VERSION.to_string(),
        "server_version_num" => "120002".to_string(),
        "timezone" => "UTC".to_string(),
        "search_path" => catalog.search_path().join(", "),
        "client_encoding" | "server_encoding" => "UTF8".to_string(),
        "datestyle" => "ISO, MDY".to_string(),
        "standard_conforming_strings" => "on".to_string(),
        "transaction_isolation" => "read committed".to_string(),
        _ => {
            return Err(SqlError::query(format!(
                "unrecognized configuration parameter \"{}\"",
                name
            )))
        }
    })
}
