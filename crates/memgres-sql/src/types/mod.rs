//! Type registry.
//!
//! Every value flowing through memgres carries a [`Type`]. Types are built
//! from a closed set of primary kinds ([`TypeKind`]) plus a parameter for the
//! parametrized ones (bounded text, arrays, user enums):
//!
//! ```text
//!   DataType::Text(Some(10))  ──intern──▶  Type(Arc<..>)  (one instance per parameter)
//!   DataType::Array(int)      ──intern──▶  Type(Arc<..>)
//! ```
//!
//! Interning means two requests for `varchar(10)` return the same `Arc`, so
//! type identity is a pointer comparison.
//!
//! Conversion rules live in [`cast`], value predicates in [`compare`] and the
//! reconciliation of several candidate types in [`reconcile`].

pub mod cast;
pub mod compare;
pub mod literal;
pub mod reconcile;
pub mod value;

use std::fmt;
use std::hash::{Hash, Hasher};
use std::sync::{Arc, OnceLock};

use dashmap::DashMap;

pub use cast::{plan_cast, Conversion};
pub use reconcile::reconcile;
pub use value::{Circle, GeoBox, Lseg, Point, RegRef, SortKey, Value};

// ============================================================================
// Kinds
// ============================================================================

/// Primary kind of a type.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum TypeKind {
    /// The type of a bare `NULL`.
    Null,
    /// Boolean.
    Bool,
    /// 64-bit integer.
    Integer,
    /// Double precision float (also used for decimal/numeric).
    Float,
    /// Text, optionally bounded.
    Text,
    /// Case-insensitive text.
    Citext,
    /// Byte array.
    Bytea,
    /// Timestamp without time zone.
    Timestamp,
    /// Calendar date.
    Date,
    /// Time of day.
    Time,
    /// UUID.
    Uuid,
    /// JSON document.
    Json,
    /// Binary JSON document.
    Jsonb,
    /// Handle on a type.
    RegType,
    /// Handle on a relation.
    RegClass,
    /// Geometric point.
    Point,
    /// Geometric line segment.
    Lseg,
    /// Geometric box.
    Box,
    /// Geometric circle.
    Circle,
    /// User-declared enum.
    Enum,
    /// Array of another type.
    Array,
}

impl TypeKind {
    /// Lower-case name used in messages.
    pub fn as_str(&self) -> &'static str {
        match self {
            TypeKind::Null => "null",
            TypeKind::Bool => "bool",
            TypeKind::Integer => "integer",
            TypeKind::Float => "float",
            TypeKind::Text => "text",
            TypeKind::Citext => "citext",
            TypeKind::Bytea => "bytea",
            TypeKind::Timestamp => "timestamp",
            TypeKind::Date => "date",
            TypeKind::Time => "time",
            TypeKind::Uuid => "uuid",
            TypeKind::Json => "json",
            TypeKind::Jsonb => "jsonb",
            TypeKind::RegType => "regtype",
            TypeKind::RegClass => "regclass",
            TypeKind::Point => "point",
            TypeKind::Lseg => "lseg",
            TypeKind::Box => "box",
            TypeKind::Circle => "circle",
            TypeKind::Enum => "enum",
            TypeKind::Array => "array",
        }
    }

    /// Returns true for integer and float.
    pub fn is_numeric(&self) -> bool {
        matches!(self, TypeKind::Integer | TypeKind::Float)
    }

    /// Returns true for text and citext.
    pub fn is_text(&self) -> bool {
        matches!(self, TypeKind::Text | TypeKind::Citext)
    }

    /// Returns true for the geometric kinds.
    pub fn is_geometric(&self) -> bool {
        matches!(
            self,
            TypeKind::Point | TypeKind::Lseg | TypeKind::Box | TypeKind::Circle
        )
    }
}

impl fmt::Display for TypeKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

// ============================================================================
// Types
// ============================================================================

/// A user-declared enum.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct EnumType {
    /// Type id assigned by the catalog.
    pub oid: u32,
    /// Declared name.
    pub name: String,
    /// Labels in declaration order; comparison follows this order.
    pub labels: Vec<String>,
}

impl EnumType {
    /// Position of a label, if it belongs to the enum.
    pub fn position(&self, label: &str) -> Option<usize> {
        self.labels.iter().position(|l| l == label)
    }
}

/// Structural description of a type. Use [`Type`] to get the interned form.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum DataType {
    /// Unknown/null.
    Null,
    /// Boolean.
    Bool,
    /// Integer.
    Integer,
    /// Float.
    Float,
    /// Text with an optional length bound.
    Text(Option<u32>),
    /// Case-insensitive text.
    Citext,
    /// Byte array.
    Bytea,
    /// Timestamp.
    Timestamp,
    /// Date.
    Date,
    /// Time.
    Time,
    /// UUID.
    Uuid,
    /// JSON.
    Json,
    /// JSONB.
    Jsonb,
    /// Type handle.
    RegType,
    /// Relation handle.
    RegClass,
    /// Point.
    Point,
    /// Line segment.
    Lseg,
    /// Box.
    Box,
    /// Circle.
    Circle,
    /// User enum.
    Enum(EnumType),
    /// Array of an element type.
    Array(Type),
}

/// An interned type.
#[derive(Clone)]
pub struct Type(Arc<DataType>);

fn interner() -> &'static DashMap<DataType, Type> {
    static INTERNER: OnceLock<DashMap<DataType, Type>> = OnceLock::new();
    INTERNER.get_or_init(DashMap::new)
}

impl Type {
    /// Returns the unique instance for `data`.
    pub fn intern(data: DataType) -> Type {
        if let Some(existing) = interner().get(&data) {
            return existing.value().clone();
        }
        interner()
            .entry(data.clone())
            .or_insert_with(|| Type(Arc::new(data)))
            .value()
            .clone()
    }

    /// The null type.
    pub fn null() -> Type {
        Type::intern(DataType::Null)
    }

    /// Boolean.
    pub fn bool() -> Type {
        Type::intern(DataType::Bool)
    }

    /// Integer.
    pub fn integer() -> Type {
        Type::intern(DataType::Integer)
    }

    /// Float.
    pub fn float() -> Type {
        Type::intern(DataType::Float)
    }

    /// Unbounded text.
    pub fn text() -> Type {
        Type::intern(DataType::Text(None))
    }

    /// Text bounded to `len` characters.
    pub fn varchar(len: u32) -> Type {
        Type::intern(DataType::Text(Some(len)))
    }

    /// Case-insensitive text.
    pub fn citext() -> Type {
        Type::intern(DataType::Citext)
    }

    /// Byte array.
    pub fn bytea() -> Type {
        Type::intern(DataType::Bytea)
    }

    /// Timestamp.
    pub fn timestamp() -> Type {
        Type::intern(DataType::Timestamp)
    }

    /// Date.
    pub fn date() -> Type {
        Type::intern(DataType::Date)
    }

    /// Time.
    pub fn time() -> Type {
        Type::intern(DataType::Time)
    }

    /// UUID.
    pub fn uuid() -> Type {
        Type::intern(DataType::Uuid)
    }

    /// JSON.
    pub fn json() -> Type {
        Type::intern(DataType::Json)
    }

    /// JSONB.
    pub fn jsonb() -> Type {
        Type::intern(DataType::Jsonb)
    }

    /// Type handle.
    pub fn regtype() -> Type {
        Type::intern(DataType::RegType)
    }

    /// Relation handle.
    pub fn regclass() -> Type {
        Type::intern(DataType::RegClass)
    }

    /// Array of `element`.
    pub fn array_of(element: &Type) -> Type {
        Type::intern(DataType::Array(element.clone()))
    }

    /// User enum.
    pub fn enumeration(def: EnumType) -> Type {
        Type::intern(DataType::Enum(def))
    }

    /// Structural description.
    pub fn data(&self) -> &DataType {
        &self.0
    }

    /// Returns true if both handles are the same interned instance.
    pub fn ptr_eq(a: &Type, b: &Type) -> bool {
        Arc::ptr_eq(&a.0, &b.0)
    }

    /// Primary kind.
    pub fn kind(&self) -> TypeKind {
        match self.data() {
            DataType::Null => TypeKind::Null,
            DataType::Bool => TypeKind::Bool,
            DataType::Integer => TypeKind::Integer,
            DataType::Float => TypeKind::Float,
            DataType::Text(_) => TypeKind::Text,
            DataType::Citext => TypeKind::Citext,
            DataType::Bytea => TypeKind::Bytea,
            DataType::Timestamp => TypeKind::Timestamp,
            DataType::Date => TypeKind::Date,
            DataType::Time => TypeKind::Time,
            DataType::Uuid => TypeKind::Uuid,
            DataType::Json => TypeKind::Json,
            DataType::Jsonb => TypeKind::Jsonb,
            DataType::RegType => TypeKind::RegType,
            DataType::RegClass => TypeKind::RegClass,
            DataType::Point => TypeKind::Point,
            DataType::Lseg => TypeKind::Lseg,
            DataType::Box => TypeKind::Box,
            DataType::Circle => TypeKind::Circle,
            DataType::Enum(_) => TypeKind::Enum,
            DataType::Array(_) => TypeKind::Array,
        }
    }

    /// Element type of an array.
    pub fn element(&self) -> Option<&Type> {
        match self.data() {
            DataType::Array(inner) => Some(inner),
            _ => None,
        }
    }

    /// Length bound of a bounded text type.
    pub fn text_len(&self) -> Option<u32> {
        match self.data() {
            DataType::Text(len) => *len,
            _ => None,
        }
    }

    /// Enum definition, for enum types.
    pub fn as_enum(&self) -> Option<&EnumType> {
        match self.data() {
            DataType::Enum(def) => Some(def),
            _ => None,
        }
    }

    /// Returns true for the null type.
    pub fn is_null(&self) -> bool {
        self.kind() == TypeKind::Null
    }

    /// Returns true for integer and float.
    pub fn is_numeric(&self) -> bool {
        self.kind().is_numeric()
    }

    /// Returns true for text and citext.
    pub fn is_text(&self) -> bool {
        self.kind().is_text()
    }

    /// Display name, as in `pg_typeof` and column descriptors.
    pub fn name(&self) -> String {
        match self.data() {
            DataType::Text(Some(len)) => format!("character varying({})", len),
            DataType::Array(inner) => format!("{}[]", inner.name()),
            DataType::Enum(def) => def.name.clone(),
            _ => self.kind().as_str().to_string(),
        }
    }

    /// Numeric type id for built-in types and their arrays, and for enums.
    pub fn oid(&self) -> Option<u32> {
        let oid = match self.data() {
            DataType::Null => 705,
            DataType::Bool => 16,
            DataType::Bytea => 17,
            DataType::Integer => 23,
            DataType::Text(None) => 25,
            DataType::Json => 114,
            DataType::Point => 600,
            DataType::Lseg => 601,
            DataType::Box => 603,
            DataType::Float => 701,
            DataType::Circle => 718,
            DataType::Text(Some(_)) => 1043,
            DataType::Date => 1082,
            DataType::Time => 1083,
            DataType::Timestamp => 1114,
            DataType::RegClass => 2205,
            DataType::RegType => 2206,
            DataType::Uuid => 2950,
            DataType::Jsonb => 3802,
            DataType::Enum(def) => def.oid,
            DataType::Citext => return None,
            DataType::Array(inner) => match inner.data() {
                DataType::Json => 199,
                DataType::Bool => 1000,
                DataType::Bytea => 1001,
                DataType::Integer => 1007,
                DataType::Text(None) => 1009,
                DataType::Text(Some(_)) => 1015,
                DataType::Float => 1022,
                DataType::Timestamp => 1115,
                DataType::Date => 1182,
                DataType::Time => 1183,
                DataType::Uuid => 2951,
                DataType::Jsonb => 3807,
                _ => return None,
            },
        };
        Some(oid)
    }

    /// Returns true if `self` converts explicitly (`CAST`) into `to`.
    pub fn can_cast_explicit(&self, to: &Type) -> bool {
        plan_cast(self, to, true).is_some()
    }

    /// Returns true if `self` converts implicitly into `to`.
    pub fn can_convert_implicit(&self, to: &Type) -> bool {
        plan_cast(self, to, false).is_some()
    }

    /// Picks the winner between two candidate types, if any.
    pub fn prefer(&self, other: &Type) -> Option<Type> {
        reconcile::prefer(self, other)
    }

    /// Built-in types registered in `pg_catalog` at bootstrap.
    pub fn builtins() -> Vec<Type> {
        let scalars = vec![
            Type::bool(),
            Type::integer(),
            Type::float(),
            Type::text(),
            Type::bytea(),
            Type::timestamp(),
            Type::date(),
            Type::time(),
            Type::uuid(),
            Type::json(),
            Type::jsonb(),
            Type::regtype(),
            Type::regclass(),
            Type::intern(DataType::Point),
            Type::intern(DataType::Lseg),
            Type::intern(DataType::Box),
            Type::intern(DataType::Circle),
        ];
        let arrays: Vec<Type> = scalars
            .iter()
            .map(Type::array_of)
            .filter(|t| t.oid().is_some())
            .collect();
        scalars.into_iter().chain(arrays).collect()
    }
}

impl PartialEq for Type {
    fn eq(&self, other: &Self) -> bool {
        Arc::ptr_eq(&self.0, &other.0) || self.0 == other.0
    }
}

impl Eq for Type {}

impl Hash for Type {
    fn hash<H: Hasher>(&self, state: &mut H) {
        self.0.hash(state)
    }
}

impl fmt::Debug for Type {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Type({})", self.name())
    }
}

impl fmt::Display for Type {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.name())
    }
}

// ============================================================================
// Type names
// ============================================================================

/// A type reference as written in SQL, split into its parts.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TypeName {
    /// Schema qualifier.
    pub schema: Option<String>,
    /// Base name, lower-cased unless it was quoted.
    pub base: String,
    /// Length/precision parameters.
    pub params: Vec<u32>,
    /// Number of `[]` suffixes.
    pub array_dims: usize,
}

impl TypeName {
    /// Splits a textual type reference such as `character varying(10)[]` or
    /// `public."Mood"`.
    pub fn parse(text: &str) -> TypeName {
        let mut rest = text.trim();
        let mut array_dims = 0;
        while let Some(stripped) = rest.strip_suffix(']') {
            match stripped.rfind('[') {
                Some(pos) => {
                    rest = stripped[..pos].trim_end();
                    array_dims += 1;
                }
                None => break,
            }
        }

        let mut params: Vec<u32> = Vec::new();
        let mut base = String::new();
        let mut depth = 0;
        let mut param = String::new();
        for c in rest.chars() {
            match c {
                '(' => depth += 1,
                ')' => {
                    depth -= 1;
                    params.extend(param.split(',').filter_map(|p| p.trim().parse::<u32>().ok()));
                    param.clear();
                }
                _ if depth > 0 => param.push(c),
                _ => base.push(c),
            }
        }

        let (schema, base) = split_qualified(&base);
        TypeName {
            schema,
            base,
            params,
            array_dims,
        }
    }

    /// Returns true for the `serial` family.
    pub fn is_serial(&self) -> bool {
        matches!(
            self.base.as_str(),
            "serial" | "bigserial" | "smallserial" | "serial2" | "serial4" | "serial8"
        )
    }
}

pub(crate) fn split_qualified(text: &str) -> (Option<String>, String) {
    let mut parts = Vec::new();
    let mut current = String::new();
    let mut quoted = false;
    let mut was_quoted = false;
    for c in text.chars() {
        match c {
            '"' => {
                quoted = !quoted;
                was_quoted = true;
            }
            '.' if !quoted => {
                parts.push(normalize_part(&current, was_quoted));
                current.clear();
                was_quoted = false;
            }
            _ => current.push(c),
        }
    }
    parts.push(normalize_part(&current, was_quoted));
    let base = parts.pop().unwrap_or_default();
    (parts.pop(), base)
}

fn normalize_part(part: &str, quoted: bool) -> String {
    if quoted {
        part.to_string()
    } else {
        part.split_whitespace()
            .collect::<Vec<_>>()
            .join(" ")
            .to_lowercase()
    }
}

/// Resolves a built-in type name, including synonyms, with its parameters.
pub fn builtin_type(name: &TypeName) -> Option<Type> {
    let base = match name.base.as_str() {
        "varchar" | "char" | "character" | "character varying" | "bpchar" | "nvarchar" => {
            match name.params.first() {
                Some(len) => Type::varchar(*len),
                None => Type::text(),
            }
        }
        "text" | "string" | "name" => Type::text(),
        "int" | "int2" | "int4" | "int8" | "integer" | "smallint" | "bigint" | "oid"
        | "serial" | "bigserial" | "smallserial" | "serial2" | "serial4" | "serial8" => {
            Type::integer()
        }
        "decimal" | "numeric" | "real" | "money" | "double precision" | "double" | "float"
        | "float4" | "float8" => Type::float(),
        "timestamp" | "timestamptz" | "timestamp with time zone"
        | "timestamp without time zone" | "datetime" => Type::timestamp(),
        "date" => Type::date(),
        "time" | "timetz" | "time with time zone" | "time without time zone" => Type::time(),
        "bool" | "boolean" => Type::bool(),
        "uuid" => Type::uuid(),
        "json" => Type::json(),
        "jsonb" => Type::jsonb(),
        "bytea" => Type::bytea(),
        "regtype" => Type::regtype(),
        "regclass" => Type::regclass(),
        "citext" => Type::citext(),
        "point" => Type::intern(DataType::Point),
        "lseg" => Type::intern(DataType::Lseg),
        "box" => Type::intern(DataType::Box),
        "circle" => Type::intern(DataType::Circle),
        _ => return None,
    };
    Some(wrap_array(base, name.array_dims))
}

/// Wraps `base` in `dims` array levels.
pub fn wrap_array(base: Type, dims: usize) -> Type {
    (0..dims).fold(base, |t, _| Type::array_of(&t))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_interning_returns_same_instance() {
        let a = Type::varchar(10);
        let b = Type::varchar(10);
        assert!(Type::ptr_eq(&a, &b));
        assert!(!Type::ptr_eq(&a, &Type::varchar(11)));
        assert!(Type::ptr_eq(
            &Type::array_of(&Type::integer()),
            &Type::array_of(&Type::integer())
        ));
    }

    #[test]
    fn test_names() {
        assert_eq!(Type::varchar(3).name(), "character varying(3)");
        assert_eq!(Type::array_of(&Type::text()).name(), "text[]");
        assert_eq!(Type::integer().name(), "integer");
    }

    #[test]
    fn test_parse_type_name() {
        let name = TypeName::parse("CHARACTER VARYING(10)[]");
        assert_eq!(name.base, "character varying");
        assert_eq!(name.params, vec![10]);
        assert_eq!(name.array_dims, 1);

        let name = TypeName::parse("public.\"Mood\"");
        assert_eq!(name.schema.as_deref(), Some("public"));
        assert_eq!(name.base, "Mood");

        let name = TypeName::parse("TIMESTAMP(3) WITH TIME ZONE");
        assert_eq!(name.base, "timestamp with time zone");
    }

    #[test]
    fn test_builtin_synonyms() {
        let resolve = |s: &str| builtin_type(&TypeName::parse(s));
        assert_eq!(resolve("int4"), Some(Type::integer()));
        assert_eq!(resolve("bigserial"), Some(Type::integer()));
        assert_eq!(resolve("double precision"), Some(Type::float()));
        assert_eq!(resolve("varchar(5)"), Some(Type::varchar(5)));
        assert_eq!(resolve("text[][]"), Some(wrap_array(Type::text(), 2)));
        assert_eq!(resolve("mood"), None);
        assert!(TypeName::parse("serial").is_serial());
    }

    #[test]
    fn test_builtins_have_oids() {
        for t in Type::builtins() {
            assert!(t.oid().is_some(), "{} has no oid", t);
        }
    }
}
