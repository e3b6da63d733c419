//! Schema-level registries.
//!
//! Each schema maps relation names (case-sensitive, plus a lower-cased map
//! enforcing case-insensitive uniqueness) to class ids, and type ids to the
//! class id of the type relation:
//!
//! ```text
//!   Catalog
//!   ├── pg_catalog (read-only)   builtin types at their fixed ids
//!   ├── public                   tables, indexes, sequences, enums
//!   └── ...                      CREATE SCHEMA
//! ```
//!
//! Class ids of user relations are handed out by one counter for the whole
//! catalog, so an id lookup never needs a schema. Definitions are not
//! versioned: DDL runs against a fully committed transaction and cannot be
//! rolled back.

use std::collections::{BTreeMap, HashMap};
use std::fmt;
use std::sync::Arc;

use sqlparser::ast;
use tracing::debug;

use crate::config::DbOptions;
use crate::error::{SqlError, SqlResult};
use crate::expr::functions::FunctionDef;
use crate::storage::{SequenceDef, TableDef};
use crate::types::cast::RegResolver;
use crate::types::{builtin_type, split_qualified, wrap_array, Type, TypeName};

/// Name of the read-only system schema.
pub const PG_CATALOG: &str = "pg_catalog";

/// First id handed out to user relations.
pub const FIRST_USER_ID: u32 = 16384;

/// Normalizes an identifier: unquoted identifiers fold to lower case.
pub fn ident(i: &ast::Ident) -> String {
    match i.quote_style {
        Some(_) => i.value.clone(),
        None => i.value.to_lowercase(),
    }
}

// ============================================================================
// Qualified names
// ============================================================================

/// A possibly schema-qualified relation name.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct QName {
    /// Schema, when qualified.
    pub schema: Option<String>,
    /// Relation name.
    pub name: String,
}

impl QName {
    /// Unqualified name.
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            schema: None,
            name: name.into(),
        }
    }

    /// Qualified name.
    pub fn qualified(schema: impl Into<String>, name: impl Into<String>) -> Self {
        Self {
            schema: Some(schema.into()),
            name: name.into(),
        }
    }

    /// Converts a parsed object name, normalizing each part.
    pub fn from_object_name(name: &ast::ObjectName) -> SqlResult<Self> {
        let parts: Vec<String> = name.0.iter().map(ident).collect();
        match parts.as_slice() {
            [name] => Ok(QName::new(name.clone())),
            [schema, name] => Ok(QName::qualified(schema.clone(), name.clone())),
            [_, schema, name] => Ok(QName::qualified(schema.clone(), name.clone())),
            _ => Err(SqlError::query(format!(
                "improper qualified name (too many dotted names): {}",
                name
            ))),
        }
    }

    /// Parses `name`, `schema.name` or quoted forms.
    pub fn parse(text: &str) -> Self {
        let (schema, name) = split_qualified(text);
        Self { schema, name }
    }
}

impl fmt::Display for QName {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match &self.schema {
            Some(s) => write!(f, "{}.{}", s, self.name),
            None => f.write_str(&self.name),
        }
    }
}

// ============================================================================
// Relations
// ============================================================================

/// A named catalog entry.
#[derive(Debug, Clone)]
pub enum Relation {
    /// A table.
    Table(Arc<TableDef>),
    /// An index; its shape lives in the table definition.
    Index {
        /// Owning table.
        table: u32,
        /// Index name.
        name: String,
    },
    /// A sequence.
    Sequence(Arc<SequenceDef>),
    /// A type.
    Type(Type),
}

impl Relation {
    /// Registered name.
    pub fn name(&self) -> String {
        match self {
            Relation::Table(t) => t.name.clone(),
            Relation::Index { name, .. } => name.clone(),
            Relation::Sequence(s) => s.name.clone(),
            Relation::Type(t) => t.name(),
        }
    }

    /// Kind, as used in messages.
    pub fn kind(&self) -> &'static str {
        match self {
            Relation::Table(_) => "table",
            Relation::Index { .. } => "index",
            Relation::Sequence(_) => "sequence",
            Relation::Type(_) => "type",
        }
    }

    fn rename(&mut self, name: &str) {
        match self {
            Relation::Table(t) => Arc::make_mut(t).name = name.to_string(),
            Relation::Index { name: n, .. } => *n = name.to_string(),
            Relation::Sequence(s) => Arc::make_mut(s).name = name.to_string(),
            Relation::Type(_) => {}
        }
    }
}

/// A schema.
#[derive(Debug, Clone, Default)]
pub struct Schema {
    name: String,
    read_only: bool,
    by_name: HashMap<String, u32>,
    by_lower: HashMap<String, u32>,
    relations: BTreeMap<u32, Relation>,
    by_type_id: HashMap<u32, u32>,
    functions: HashMap<String, Vec<Arc<FunctionDef>>>,
}

impl Schema {
    fn new(name: &str) -> Self {
        Self {
            name: name.to_string(),
            ..Self::default()
        }
    }

    /// Schema name.
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Returns true if DDL against this schema is rejected.
    pub fn is_read_only(&self) -> bool {
        self.read_only
    }

    /// Relation registered under `name`.
    pub fn get(&self, name: &str) -> Option<(u32, &Relation)> {
        let id = *self.by_name.get(name)?;
        self.relations.get(&id).map(|r| (id, r))
    }

    /// Relation with class id `id`.
    pub fn by_id(&self, id: u32) -> Option<&Relation> {
        self.relations.get(&id)
    }

    /// Type with type id `oid`.
    pub fn type_by_oid(&self, oid: u32) -> Option<&Type> {
        let id = self.by_type_id.get(&oid)?;
        match self.relations.get(id) {
            Some(Relation::Type(t)) => Some(t),
            _ => None,
        }
    }

    /// Every relation, by id.
    pub fn relations(&self) -> impl Iterator<Item = (u32, &Relation)> {
        self.relations.iter().map(|(id, r)| (*id, r))
    }

    /// Tables, in creation order.
    pub fn tables(&self) -> impl Iterator<Item = &Arc<TableDef>> {
        self.relations.values().filter_map(|r| match r {
            Relation::Table(t) => Some(t),
            _ => None,
        })
    }

    fn insert(&mut self, id: u32, relation: Relation) -> SqlResult<()> {
        let name = relation.name();
        if self.by_lower.contains_key(&name.to_lowercase()) {
            return Err(SqlError::query(format!(
                "relation \"{}\" already exists",
                name
            )));
        }
        if let Relation::Type(t) = &relation {
            if let Some(oid) = t.oid() {
                self.by_type_id.insert(oid, id);
            }
        }
        self.by_lower.insert(name.to_lowercase(), id);
        self.by_name.insert(name, id);
        self.relations.insert(id, relation);
        Ok(())
    }

    fn remove(&mut self, id: u32) -> Option<Relation> {
        let relation = self.relations.remove(&id)?;
        let name = relation.name();
        self.by_name.remove(&name);
        self.by_lower.remove(&name.to_lowercase());
        self.by_type_id.retain(|_, v| *v != id);
        Some(relation)
    }
}

// ============================================================================
// Catalog
// ============================================================================

/// All schemas of a database plus the name resolution rules.
#[derive(Debug, Clone)]
pub struct Catalog {
    schemas: BTreeMap<String, Schema>,
    search_path: Vec<String>,
    current: String,
    next_id: u32,
}

impl Catalog {
    /// Creates a catalog holding `pg_catalog` with the builtin types, and the
    /// default schema.
    pub fn new(options: &DbOptions) -> SqlResult<Self> {
        options.validate()?;
        let mut pg = Schema::new(PG_CATALOG);
        for ty in Type::builtins() {
            if let Some(oid) = ty.oid() {
                pg.insert(oid, Relation::Type(ty))?;
            }
        }
        pg.read_only = true;

        let mut schemas = BTreeMap::new();
        schemas.insert(PG_CATALOG.to_string(), pg);
        schemas.insert(
            options.default_schema.clone(),
            Schema::new(&options.default_schema),
        );
        Ok(Self {
            schemas,
            search_path: options.search_path.clone(),
            current: options.default_schema.clone(),
            next_id: FIRST_USER_ID,
        })
    }

    /// Schema receiving unqualified DDL.
    pub fn current_schema(&self) -> &str {
        &self.current
    }

    /// Schemas tried for unqualified lookups.
    pub fn search_path(&self) -> &[String] {
        &self.search_path
    }

    /// Replaces the search path. The first existing schema of the path that
    /// is not `pg_catalog` becomes the current schema.
    pub fn set_search_path(&mut self, path: Vec<String>) {
        if let Some(first) = path
            .iter()
            .find(|s| s.as_str() != PG_CATALOG && self.schemas.contains_key(*s))
        {
            self.current = first.clone();
        }
        self.search_path = path;
    }

    /// Looks a schema up.
    pub fn schema(&self, name: &str) -> Option<&Schema> {
        self.schemas.get(name)
    }

    /// Creates a schema. Returns false when it existed and `if_not_exists`
    /// was given.
    pub fn create_schema(&mut self, name: &str, if_not_exists: bool) -> SqlResult<bool> {
        if self.schemas.contains_key(name) {
            if if_not_exists {
                return Ok(false);
            }
            return Err(SqlError::query(format!("schema \"{}\" already exists", name)));
        }
        self.schemas.insert(name.to_string(), Schema::new(name));
        debug!(schema = name, "schema created");
        Ok(true)
    }

    fn writable(&mut self, name: &str) -> SqlResult<&mut Schema> {
        let schema = self
            .schemas
            .get_mut(name)
            .ok_or_else(|| SqlError::query(format!("schema \"{}\" does not exist", name)))?;
        if schema.read_only {
            return Err(SqlError::PermissionDenied(name.to_string()));
        }
        Ok(schema)
    }

    /// Schema a DDL statement on `name` targets.
    pub fn target_schema(&self, name: &QName) -> String {
        name.schema.clone().unwrap_or_else(|| self.current.clone())
    }

    /// Finds a relation. Qualified names look in their schema only;
    /// unqualified names walk the search path, then the current schema.
    pub fn find(&self, name: &QName) -> Option<(&Schema, u32, &Relation)> {
        if let Some(schema) = &name.schema {
            let s = self.schemas.get(schema)?;
            return s.get(&name.name).map(|(id, r)| (s, id, r));
        }
        self.search_path
            .iter()
            .chain(std::iter::once(&self.current))
            .filter_map(|s| self.schemas.get(s))
            .find_map(|s| s.get(&name.name).map(|(id, r)| (s, id, r)))
    }

    /// Relation by class id.
    pub fn relation(&self, id: u32) -> Option<(&Schema, &Relation)> {
        self.schemas
            .values()
            .find_map(|s| s.by_id(id).map(|r| (s, r)))
    }

    /// Table by name, if it exists.
    pub fn find_table(&self, name: &QName) -> Option<Arc<TableDef>> {
        match self.find(name) {
            Some((_, _, Relation::Table(t))) => Some(t.clone()),
            _ => None,
        }
    }

    /// Table by name.
    pub fn table(&self, name: &QName) -> SqlResult<Arc<TableDef>> {
        match self.find(name) {
            Some((_, _, Relation::Table(t))) => Ok(t.clone()),
            Some((_, _, other)) => Err(SqlError::query(format!(
                "\"{}\" is not a table but a {}",
                name.name,
                other.kind()
            ))),
            None => Err(SqlError::RelationNotFound(name.name.clone())),
        }
    }

    /// Table by class id.
    pub fn table_by_id(&self, id: u32) -> SqlResult<Arc<TableDef>> {
        match self.relation(id) {
            Some((_, Relation::Table(t))) => Ok(t.clone()),
            _ => Err(SqlError::Internal(format!("table {} is gone", id))),
        }
    }

    /// Sequence by name.
    pub fn sequence(&self, name: &QName) -> SqlResult<Arc<SequenceDef>> {
        match self.find(name) {
            Some((_, _, Relation::Sequence(s))) => Ok(s.clone()),
            Some((_, _, other)) => Err(SqlError::query(format!(
                "\"{}\" is not a sequence but a {}",
                name.name,
                other.kind()
            ))),
            None => Err(SqlError::RelationNotFound(name.name.clone())),
        }
    }

    /// Every table of every schema.
    pub fn tables(&self) -> Vec<Arc<TableDef>> {
        self.schemas
            .values()
            .flat_map(|s| s.tables().cloned())
            .collect()
    }

    /// Resolves a type reference: builtins (with their synonyms) first,
    /// then user types along the search path.
    pub fn resolve_type(&self, name: &TypeName) -> SqlResult<Type> {
        let builtin_scope = matches!(name.schema.as_deref(), None | Some(PG_CATALOG));
        if builtin_scope {
            if let Some(t) = builtin_type(name) {
                return Ok(t);
            }
        }
        let qname = QName {
            schema: name.schema.clone(),
            name: name.base.clone(),
        };
        match self.find(&qname) {
            Some((_, _, Relation::Type(t))) => Ok(wrap_array(t.clone(), name.array_dims)),
            _ => Err(SqlError::TypeNotFound(name.base.clone())),
        }
    }

    /// Resolves a parsed data type.
    pub fn resolve_data_type(&self, data_type: &ast::DataType) -> SqlResult<Type> {
        self.resolve_type(&TypeName::parse(&data_type.to_string()))
    }

    /// Allocates a class id.
    pub fn allocate_id(&mut self) -> u32 {
        let id = self.next_id;
        self.next_id += 1;
        id
    }

    /// Registers a relation built from its freshly allocated id.
    pub fn register(
        &mut self,
        schema: &str,
        make: impl FnOnce(u32) -> Relation,
    ) -> SqlResult<u32> {
        self.writable(schema)?;
        let id = self.allocate_id();
        self.register_with_id(schema, id, make(id))?;
        Ok(id)
    }

    /// Registers a relation under an id allocated beforehand.
    pub fn register_with_id(&mut self, schema: &str, id: u32, relation: Relation) -> SqlResult<()> {
        let kind = relation.kind();
        let name = relation.name();
        self.writable(schema)?.insert(id, relation)?;
        debug!(schema, name = %name, id, kind, "relation registered");
        Ok(())
    }

    /// Returns true if `name` is free in `schema`.
    pub fn is_free(&self, schema: &str, name: &str) -> bool {
        self.schemas
            .get(schema)
            .map_or(true, |s| !s.by_lower.contains_key(&name.to_lowercase()))
    }

    /// Replaces the definition of a table in place.
    pub fn replace_table(&mut self, table: TableDef) -> SqlResult<Arc<TableDef>> {
        let def = Arc::new(table);
        let schema = self.writable(&def.schema)?;
        match schema.relations.get_mut(&def.id) {
            Some(slot @ Relation::Table(_)) => {
                *slot = Relation::Table(def.clone());
                Ok(def)
            }
            _ => Err(SqlError::Internal(format!("table {} is gone", def.id))),
        }
    }

    /// Replaces the definition of a sequence in place.
    pub fn replace_sequence(&mut self, sequence: SequenceDef) -> SqlResult<Arc<SequenceDef>> {
        let def = Arc::new(sequence);
        let schema = self.writable(&def.schema)?;
        match schema.relations.get_mut(&def.id) {
            Some(slot @ Relation::Sequence(_)) => {
                *slot = Relation::Sequence(def.clone());
                Ok(def)
            }
            _ => Err(SqlError::Internal(format!("sequence {} is gone", def.id))),
        }
    }

    /// Renames a relation.
    pub fn rename(&mut self, id: u32, name: &str) -> SqlResult<()> {
        let schema_name = self
            .relation(id)
            .map(|(s, _)| s.name.clone())
            .ok_or_else(|| SqlError::Internal(format!("relation {} is gone", id)))?;
        let schema = self.writable(&schema_name)?;
        let mut relation = schema
            .remove(id)
            .ok_or_else(|| SqlError::Internal(format!("relation {} is gone", id)))?;
        let old = relation.name();
        relation.rename(name);
        if let Err(e) = schema.insert(id, relation.clone()) {
            relation.rename(&old);
            schema.insert(id, relation)?;
            return Err(e);
        }
        debug!(id, from = %old, to = name, "relation renamed");
        Ok(())
    }

    /// Removes a relation.
    pub fn drop(&mut self, id: u32) -> SqlResult<Relation> {
        let schema_name = self
            .relation(id)
            .map(|(s, _)| s.name.clone())
            .ok_or_else(|| SqlError::Internal(format!("relation {} is gone", id)))?;
        let relation = self
            .writable(&schema_name)?
            .remove(id)
            .ok_or_else(|| SqlError::Internal(format!("relation {} is gone", id)))?;
        debug!(id, name = %relation.name(), kind = relation.kind(), "relation dropped");
        Ok(relation)
    }

    /// Sequences owned by a column of `table`.
    pub fn owned_sequences(&self, table: &TableDef) -> Vec<u32> {
        let prefix = format!("{}.", table.name);
        self.schemas
            .get(&table.schema)
            .map(|s| {
                s.relations()
                    .filter_map(|(id, r)| match r {
                        Relation::Sequence(seq)
                            if seq
                                .options
                                .owned_by
                                .as_deref()
                                .map_or(false, |o| o.starts_with(&prefix)) =>
                        {
                            Some(id)
                        }
                        _ => None,
                    })
                    .collect()
            })
            .unwrap_or_default()
    }

    // ------------------------------------------------------------------------
    // Functions
    // ------------------------------------------------------------------------

    /// Registers a host function in `schema`, or the current schema.
    pub fn register_function(&mut self, schema: Option<&str>, def: FunctionDef) -> SqlResult<()> {
        let schema = schema.map(str::to_string).unwrap_or_else(|| self.current.clone());
        let name = def.name.to_lowercase();
        debug!(schema = %schema, function = %name, "function registered");
        self.writable(&schema)?
            .functions
            .entry(name)
            .or_default()
            .push(Arc::new(def));
        Ok(())
    }

    /// Host functions named `name`, visible along the search path.
    pub fn functions(&self, name: &QName) -> Vec<Arc<FunctionDef>> {
        let lower = name.name.to_lowercase();
        let schemas: Vec<&String> = match &name.schema {
            Some(s) => vec![s],
            None => self
                .search_path
                .iter()
                .chain(std::iter::once(&self.current))
                .collect(),
        };
        let mut seen = Vec::new();
        let mut found = Vec::new();
        for s in schemas {
            if seen.contains(&s) {
                continue;
            }
            seen.push(s);
            if let Some(defs) = self.schemas.get(s).and_then(|s| s.functions.get(&lower)) {
                found.extend(defs.iter().cloned());
            }
        }
        found
    }
}

impl RegResolver for Catalog {
    fn type_by_name(&self, name: &str) -> SqlResult<Type> {
        self.resolve_type(&TypeName::parse(name))
    }

    fn type_by_oid(&self, oid: u32) -> Option<Type> {
        self.schemas
            .values()
            .find_map(|s| s.type_by_oid(oid).cloned())
    }

    fn type_oid(&self, ty: &Type) -> Option<u32> {
        ty.oid()
    }

    fn relation_by_id(&self, id: u32) -> Option<(u32, String)> {
        self.relation(id).map(|(_, r)| (id, r.name()))
    }

    fn relation_by_name(&self, name: &str) -> SqlResult<(u32, String)> {
        let qname = QName::parse(name);
        self.find(&qname)
            .map(|(_, id, r)| (id, r.name()))
            .ok_or_else(|| SqlError::RelationNotFound(qname.name.clone()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::storage::ColumnDef;
    use crate::types::EnumType;

    fn catalog() -> Catalog {
        Catalog::new(&DbOptions::default()).unwrap()
    }

    fn add_table(catalog: &mut Catalog, schema: &str, name: &str) -> SqlResult<u32> {
        catalog.register(schema, |id| {
            Relation::Table(Arc::new(TableDef {
                id,
                schema: schema.to_string(),
                name: name.to_string(),
                columns: vec![ColumnDef {
                    name: "a".into(),
                    ty: Type::integer(),
                    not_null: false,
                    default: None,
                }],
                checks: Vec::new(),
                indexes: Vec::new(),
            }))
        })
    }

    #[test]
    fn test_ids_start_after_system_range() {
        let mut c = catalog();
        let id = add_table(&mut c, "public", "t").unwrap();
        assert_eq!(id, FIRST_USER_ID);
        assert_eq!(c.table(&QName::new("t")).unwrap().id, id);
        assert_eq!(c.relation_by_id(id), Some((id, "t".to_string())));
    }

    #[test]
    fn test_names_unique_case_insensitively() {
        let mut c = catalog();
        add_table(&mut c, "public", "Users").unwrap();
        let err = add_table(&mut c, "public", "users").unwrap_err();
        assert_eq!(err.to_string(), "relation \"users\" already exists");
        assert!(c.find(&QName::new("users")).is_none());
        assert!(c.find(&QName::new("Users")).is_some());
    }

    #[test]
    fn test_search_path_order() {
        let mut c = catalog();
        c.create_schema("other", false).unwrap();
        add_table(&mut c, "other", "t").unwrap();
        assert!(c.find_table(&QName::new("t")).is_none());
        c.set_search_path(vec!["other".into(), "public".into()]);
        assert_eq!(c.find_table(&QName::new("t")).unwrap().schema, "other");
        assert_eq!(c.current_schema(), "other");
        assert!(c.find_table(&QName::qualified("public", "t")).is_none());
    }

    #[test]
    fn test_pg_catalog_is_read_only() {
        let mut c = catalog();
        let err = add_table(&mut c, PG_CATALOG, "t").unwrap_err();
        assert!(matches!(err, SqlError::PermissionDenied(_)));
    }

    #[test]
    fn test_type_resolution() {
        let mut c = catalog();
        assert_eq!(c.type_by_name("int4").unwrap(), Type::integer());
        assert_eq!(c.type_by_oid(23), Some(Type::integer()));
        assert!(matches!(
            c.type_by_name("mood"),
            Err(SqlError::TypeNotFound(_))
        ));

        let id = c.allocate_id();
        let mood = Type::enumeration(EnumType {
            oid: id,
            name: "mood".into(),
            labels: vec!["sad".into(), "ok".into()],
        });
        c.register_with_id("public", id, Relation::Type(mood.clone())).unwrap();
        assert_eq!(c.type_by_name("mood").unwrap(), mood);
        assert_eq!(c.type_by_name("mood[]").unwrap(), Type::array_of(&mood));
        assert_eq!(c.type_by_oid(id), Some(mood));
    }

    #[test]
    fn test_rename_and_drop() {
        let mut c = catalog();
        let a = add_table(&mut c, "public", "a").unwrap();
        add_table(&mut c, "public", "b").unwrap();
        assert!(c.rename(a, "b").is_err());
        assert!(c.find_table(&QName::new("a")).is_some());
        c.rename(a, "c").unwrap();
        assert_eq!(c.table_by_id(a).unwrap().name, "c");
        c.drop(a).unwrap();
        assert!(matches!(
            c.table(&QName::new("c")),
            Err(SqlError::RelationNotFound(_))
        ));
    }

    #[test]
    fn test_regclass_lookup_by_name() {
        let mut c = catalog();
        let id = add_table(&mut c, "public", "t").unwrap();
        assert_eq!(c.relation_by_name("public.t").unwrap().0, id);
        assert_eq!(c.relation_by_name("T").unwrap().0, id);
        assert!(c.relation_by_name("nope").is_err());
    }
}
