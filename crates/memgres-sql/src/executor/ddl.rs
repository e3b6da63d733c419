//! Schema statements and session settings.
//!
//! Every statement here mutates the catalog, which is not versioned. The
//! dispatcher commits the held transaction all the way up before running
//! one, so what DDL writes to table data (new indexes, dropped columns)
//! lands on top of committed state. Each statement validates what it can
//! before touching the catalog.

use std::collections::HashSet;
use std::sync::Arc;

use chrono::NaiveDateTime;
use sqlparser::ast;
use tracing::{debug, warn};

use crate::catalog::{ident, Catalog, QName, Relation};
use crate::config::DbOptions;
use crate::error::{SqlError, SqlResult};
use crate::expr::functions::read_setting;
use crate::expr::{ColumnScope, EvalContext};
use crate::parser::parse_expr;
use crate::selection::{Materialized, TableScan};
use crate::storage::{
    self, table_data, table_data_mut, CheckDef, ColumnDef, DataKey, DataTx, DataValue, IndexDef,
    SequenceDef, SequenceOption, SequenceOptions, SequenceState, TableDef,
};
use crate::types::{EnumType, Type, TypeName, Value};

use super::result::QueryResult;
use super::select::Planner;

/// Runs schema statements against a committed transaction.
pub(crate) struct Ddl<'a> {
    pub catalog: &'a mut Catalog,
    pub data: &'a mut DataTx,
    pub options: &'a DbOptions,
    pub now: NaiveDateTime,
}

/// A unique key declared on a table, before it gets an id.
#[derive(Debug)]
struct KeySpec {
    name: String,
    columns: Vec<usize>,
    primary: bool,
}

/// Columns and constraints of a `CREATE TABLE` / `ADD COLUMN`.
#[derive(Debug, Default)]
struct TableLayout {
    table: String,
    columns: Vec<ColumnDef>,
    serials: Vec<(usize, String)>,
    keys: Vec<KeySpec>,
    checks: Vec<CheckDef>,
}

impl TableLayout {
    fn new(table: &TableDef) -> Self {
        Self {
            table: table.name.clone(),
            columns: table.columns.clone(),
            ..Self::default()
        }
    }

    fn add_column(&mut self, catalog: &Catalog, schema: &str, col: &ast::ColumnDef) -> SqlResult<usize> {
        let name = ident(&col.name);
        if self.columns.iter().any(|c| c.name == name) {
            return Err(SqlError::query(format!(
                "column \"{}\" specified more than once",
                name
            )));
        }
        let type_name = TypeName::parse(&col.data_type.to_string());
        let position = self.columns.len();
        let mut def = ColumnDef {
            name: name.clone(),
            ty: Type::integer(),
            not_null: false,
            default: None,
        };
        if type_name.is_serial() {
            let sequence = format!("{}_{}_seq", self.table, name);
            def.default = Some(parse_expr(&format!(
                "nextval('\"{}\".\"{}\"')",
                schema.replace('\'', "''"),
                sequence.replace('\'', "''")
            ))?);
            def.not_null = true;
            self.serials.push((position, sequence));
        } else {
            def.ty = catalog.resolve_type(&type_name)?;
        }

        for option in &col.options {
            match &option.option {
                ast::ColumnOption::Null => def.not_null = false,
                ast::ColumnOption::NotNull => def.not_null = true,
                ast::ColumnOption::Default(e) => def.default = Some(e.clone()),
                ast::ColumnOption::Unique { is_primary, .. } => {
                    let name = option.name.as_ref().map(ident);
                    self.keys.push(self.key(name, vec![position], *is_primary, &[def.name.clone()]));
                    if *is_primary {
                        def.not_null = true;
                    }
                }
                ast::ColumnOption::Check(e) => {
                    let name = option
                        .name
                        .as_ref()
                        .map(ident)
                        .unwrap_or_else(|| format!("{}_{}_check", self.table, def.name));
                    self.checks.push(CheckDef {
                        name,
                        expr: e.clone(),
                    });
                }
                ast::ColumnOption::ForeignKey { .. } => {
                    return Err(SqlError::not_supported("foreign keys"));
                }
                other => {
                    return Err(SqlError::not_supported(format!("column option {}", other)));
                }
            }
        }
        self.columns.push(def);
        Ok(position)
    }

    fn add_constraint(&mut self, constraint: &ast::TableConstraint) -> SqlResult<()> {
        match constraint {
            ast::TableConstraint::Unique {
                name,
                columns,
                is_primary,
                ..
            } => {
                let names: Vec<String> = columns.iter().map(ident).collect();
                let mut positions = Vec::with_capacity(names.len());
                for n in &names {
                    let pos = self
                        .columns
                        .iter()
                        .position(|c| &c.name == n)
                        .ok_or_else(|| {
                            SqlError::query(format!(
                                "column \"{}\" named in key does not exist",
                                n
                            ))
                        })?;
                    if *is_primary {
                        self.columns[pos].not_null = true;
                    }
                    positions.push(pos);
                }
                let key = self.key(name.as_ref().map(ident), positions, *is_primary, &names);
                self.keys.push(key);
            }
            ast::TableConstraint::Check { name, expr } => {
                let name = match name {
                    Some(n) => ident(n),
                    None => self.free_check_name(),
                };
                self.checks.push(CheckDef {
                    name,
                    expr: expr.as_ref().clone(),
                });
            }
            ast::TableConstraint::ForeignKey { .. } => {
                return Err(SqlError::not_supported("foreign keys"));
            }
            other => return Err(SqlError::not_supported(format!("constraint {}", other))),
        }
        Ok(())
    }

    fn key(&self, name: Option<String>, columns: Vec<usize>, primary: bool, names: &[String]) -> KeySpec {
        let name = name.unwrap_or_else(|| {
            if primary {
                format!("{}_pkey", self.table)
            } else {
                format!("{}_{}_key", self.table, names.join("_"))
            }
        });
        KeySpec {
            name,
            columns,
            primary,
        }
    }

    fn free_check_name(&self) -> String {
        let base = format!("{}_check", self.table);
        let taken = |n: &str| self.checks.iter().any(|c| c.name == n);
        if !taken(&base) {
            return base;
        }
        (1..)
            .map(|i| format!("{}{}", base, i))
            .find(|n| !taken(n))
            .unwrap_or(base)
    }

    fn validate(&self, existing: &[IndexDef]) -> SqlResult<()> {
        let primaries = self.keys.iter().filter(|k| k.primary).count()
            + existing.iter().filter(|i| i.primary).count();
        if primaries > 1 {
            return Err(SqlError::query(format!(
                "multiple primary keys for table \"{}\" are not allowed",
                self.table
            )));
        }
        Ok(())
    }
}

impl Ddl<'_> {
    fn planner(&self) -> Planner<'_> {
        Planner::new(self.catalog)
    }

    fn ensure_free(&self, schema: &str, names: &[&str]) -> SqlResult<()> {
        let mut seen = HashSet::new();
        for name in names {
            if !self.catalog.is_free(schema, name) || !seen.insert(name.to_lowercase()) {
                return Err(SqlError::query(format!("relation \"{}\" already exists", name)));
            }
        }
        Ok(())
    }

    /// Registers the indexes and serial sequences a layout declares.
    fn register_parts(&mut self, table: &TableDef, layout: &TableLayout, indexes: &[IndexDef]) -> SqlResult<()> {
        for index in indexes {
            self.catalog.register_with_id(
                &table.schema,
                index.id,
                Relation::Index {
                    table: table.id,
                    name: index.name.clone(),
                },
            )?;
        }
        for (position, sequence) in &layout.serials {
            let options = SequenceOptions::create(&[SequenceOption::OwnedBy(Some(format!(
                "{}.{}",
                table.name, layout.columns[*position].name
            )))])?;
            let schema = table.schema.clone();
            let name = sequence.clone();
            self.catalog.register(&table.schema, |id| {
                Relation::Sequence(Arc::new(SequenceDef {
                    id,
                    schema,
                    name,
                    options,
                }))
            })?;
        }
        Ok(())
    }

    fn allocate_indexes(&mut self, keys: &[KeySpec]) -> Vec<IndexDef> {
        keys.iter()
            .map(|k| IndexDef {
                id: self.catalog.allocate_id(),
                name: k.name.clone(),
                columns: k.columns.clone(),
                unique: true,
                primary: k.primary,
            })
            .collect()
    }

    // ------------------------------------------------------------------------
    // Tables
    // ------------------------------------------------------------------------

    /// `CREATE TABLE`.
    pub fn create_table(&mut self, stmt: &ast::Statement) -> SqlResult<QueryResult> {
        let ast::Statement::CreateTable {
            name,
            columns,
            constraints,
            if_not_exists,
            query,
            ..
        } = stmt
        else {
            return Err(SqlError::Internal("CREATE TABLE expected".into()));
        };
        if query.is_some() {
            return Err(SqlError::not_supported("CREATE TABLE ... AS"));
        }
        let qname = QName::from_object_name(name)?;
        let schema = self.catalog.target_schema(&qname);
        if !self.catalog.is_free(&schema, &qname.name) {
            if *if_not_exists {
                debug!(table = %qname, "table exists, skipped");
                return Ok(QueryResult::ignored("CREATE TABLE"));
            }
            return Err(SqlError::query(format!(
                "relation \"{}\" already exists",
                qname.name
            )));
        }

        let mut layout = TableLayout {
            table: qname.name.clone(),
            ..TableLayout::default()
        };
        for c in columns {
            layout.add_column(self.catalog, &schema, c)?;
        }
        for c in constraints {
            layout.add_constraint(c)?;
        }
        layout.validate(&[])?;
        let mut names: Vec<&str> = vec![&qname.name];
        names.extend(layout.keys.iter().map(|k| k.name.as_str()));
        names.extend(layout.serials.iter().map(|(_, s)| s.as_str()));
        self.ensure_free(&schema, &names)?;

        let id = self.catalog.allocate_id();
        let indexes = self.allocate_indexes(&layout.keys);
        let def = TableDef {
            id,
            schema: schema.clone(),
            name: qname.name.clone(),
            columns: layout.columns.clone(),
            checks: layout.checks.clone(),
            indexes: indexes.clone(),
        };
        self.catalog
            .register_with_id(&schema, id, Relation::Table(Arc::new(def.clone())))?;
        self.register_parts(&def, &layout, &indexes)?;
        table_data_mut(self.data, id);
        debug!(table = %qname, id, columns = def.columns.len(), "table created");
        Ok(QueryResult::command("CREATE TABLE"))
    }

    /// `CREATE [UNIQUE] INDEX`.
    pub fn create_index(&mut self, stmt: &ast::Statement) -> SqlResult<QueryResult> {
        let ast::Statement::CreateIndex {
            name,
            table_name,
            using,
            columns,
            unique,
            if_not_exists,
            ..
        } = stmt
        else {
            return Err(SqlError::Internal("CREATE INDEX expected".into()));
        };
        if let Some(method) = using.as_ref().map(ident) {
            if method != "btree" {
                if self.options.ignore_unsupported_indices {
                    warn!(method = %method, "index method not supported, index ignored");
                    return Ok(QueryResult::ignored("CREATE INDEX"));
                }
                return Err(SqlError::not_supported(format!("index method {}", method)));
            }
        }
        let table = self.catalog.table(&QName::from_object_name(table_name)?)?;
        let mut positions = Vec::with_capacity(columns.len());
        let mut names = Vec::with_capacity(columns.len());
        for c in columns {
            let column = match &c.expr {
                ast::Expr::Identifier(i) => ident(i),
                ast::Expr::CompoundIdentifier(parts) => parts.last().map(ident).unwrap_or_default(),
                other => {
                    return Err(SqlError::not_supported(format!("index on expression {}", other)))
                }
            };
            positions.push(table.column(&column)?);
            names.push(column);
        }
        let index_name = match name {
            Some(n) => n.0.last().map(ident).unwrap_or_default(),
            None => format!("{}_{}_idx", table.name, names.join("_")),
        };
        if !self.catalog.is_free(&table.schema, &index_name) {
            if *if_not_exists {
                return Ok(QueryResult::ignored("CREATE INDEX"));
            }
            return Err(SqlError::query(format!(
                "relation \"{}\" already exists",
                index_name
            )));
        }

        let index = IndexDef {
            id: self.catalog.allocate_id(),
            name: index_name,
            columns: positions,
            unique: *unique,
            primary: false,
        };
        let mut def = table.as_ref().clone();
        def.indexes.push(index.clone());
        table_data_mut(self.data, def.id).create_index(&def, &index)?;
        self.catalog.register_with_id(
            &def.schema,
            index.id,
            Relation::Index {
                table: def.id,
                name: index.name.clone(),
            },
        )?;
        self.catalog.replace_table(def)?;
        debug!(index = %index.name, table = %table.name, unique = index.unique, "index created");
        Ok(QueryResult::command("CREATE INDEX"))
    }

    /// `ALTER TABLE`.
    pub fn alter_table(&mut self, stmt: &ast::Statement) -> SqlResult<QueryResult> {
        let ast::Statement::AlterTable {
            name,
            if_exists,
            operations,
            ..
        } = stmt
        else {
            return Err(SqlError::Internal("ALTER TABLE expected".into()));
        };
        let qname = QName::from_object_name(name)?;
        let table = match self.catalog.table(&qname) {
            Ok(t) => t,
            Err(SqlError::RelationNotFound(_)) if *if_exists => {
                return Ok(QueryResult::ignored("ALTER TABLE"));
            }
            Err(e) => return Err(e),
        };
        for op in operations {
            self.alter_one(table.id, op)?;
        }
        Ok(QueryResult::command("ALTER TABLE"))
    }

    fn alter_one(&mut self, id: u32, op: &ast::AlterTableOperation) -> SqlResult<()> {
        use ast::AlterTableOperation as Op;
        let table = self.catalog.table_by_id(id)?;
        match op {
            Op::RenameTable { table_name } => {
                let new = table_name.0.last().map(ident).unwrap_or_default();
                self.catalog.rename(id, &new)?;
                debug!(from = %table.name, to = %new, "table renamed");
            }
            Op::AddColumn {
                if_not_exists,
                column_def,
                ..
            } => {
                let name = ident(&column_def.name);
                if table.column_index(&name).is_some() {
                    if *if_not_exists {
                        return Ok(());
                    }
                    return Err(SqlError::query(format!(
                        "column \"{}\" of relation \"{}\" already exists",
                        name, table.name
                    )));
                }
                self.add_column(&table, column_def)?;
            }
            Op::DropColumn {
                column_name,
                if_exists,
                ..
            } => {
                let name = ident(column_name);
                match table.column_index(&name) {
                    Some(idx) => self.drop_column(&table, idx)?,
                    None if *if_exists => {}
                    None => {
                        table.column(&name)?;
                    }
                }
            }
            Op::RenameColumn {
                old_column_name,
                new_column_name,
            } => {
                let idx = table.column(&ident(old_column_name))?;
                let new = ident(new_column_name);
                if table.column_index(&new).is_some() {
                    return Err(SqlError::query(format!(
                        "column \"{}\" of relation \"{}\" already exists",
                        new, table.name
                    )));
                }
                let mut def = table.as_ref().clone();
                def.columns[idx].name = new;
                self.catalog.replace_table(def)?;
            }
            Op::AlterColumn { column_name, op } => {
                let idx = table.column(&ident(column_name))?;
                let mut def = table.as_ref().clone();
                match op {
                    ast::AlterColumnOperation::SetNotNull => {
                        let has_null = table_data(self.data, id)
                            .map_or(false, |d| d.rows().any(|(_, r)| r[idx].is_null()));
                        if has_null {
                            return Err(SqlError::query(format!(
                                "column \"{}\" of relation \"{}\" contains null values",
                                def.columns[idx].name, def.name
                            )));
                        }
                        def.columns[idx].not_null = true;
                    }
                    ast::AlterColumnOperation::DropNotNull => {
                        if table.primary_key().map_or(false, |k| k.columns.contains(&idx)) {
                            return Err(SqlError::query(format!(
                                "column \"{}\" is in a primary key",
                                def.columns[idx].name
                            )));
                        }
                        def.columns[idx].not_null = false;
                    }
                    ast::AlterColumnOperation::SetDefault { value } => {
                        def.columns[idx].default = Some(value.clone());
                    }
                    ast::AlterColumnOperation::DropDefault => def.columns[idx].default = None,
                    other => {
                        return Err(SqlError::not_supported(format!("ALTER COLUMN {}", other)));
                    }
                }
                self.catalog.replace_table(def)?;
            }
            Op::AddConstraint(constraint) => self.add_constraint(&table, constraint)?,
            Op::DropConstraint {
                name, if_exists, ..
            } => {
                let name = ident(name);
                let mut def = table.as_ref().clone();
                if let Some(pos) = def.indexes.iter().position(|i| i.name == name) {
                    let index = def.indexes.remove(pos);
                    table_data_mut(self.data, id).drop_index(index.id);
                    self.catalog.drop(index.id)?;
                } else if let Some(pos) = def.checks.iter().position(|c| c.name == name) {
                    def.checks.remove(pos);
                } else if *if_exists {
                    return Ok(());
                } else {
                    return Err(SqlError::query(format!(
                        "constraint \"{}\" of relation \"{}\" does not exist",
                        name, table.name
                    )));
                }
                self.catalog.replace_table(def)?;
            }
            other => return Err(SqlError::not_supported(format!("ALTER TABLE {}", other))),
        }
        Ok(())
    }

    fn add_column(&mut self, table: &Arc<TableDef>, column: &ast::ColumnDef) -> SqlResult<()> {
        let mut layout = TableLayout::new(table);
        let position = layout.add_column(self.catalog, &table.schema, column)?;
        layout.validate(&table.indexes)?;
        let mut names: Vec<&str> = layout.keys.iter().map(|k| k.name.as_str()).collect();
        names.extend(layout.serials.iter().map(|(_, s)| s.as_str()));
        self.ensure_free(&table.schema, &names)?;

        let mut def = table.as_ref().clone();
        def.columns = layout.columns.clone();
        def.checks.extend(layout.checks.iter().cloned());

        let rows = table_data(self.data, table.id).map_or(0, |d| d.len());
        let value = match (&def.columns[position].default, layout.serials.is_empty()) {
            (Some(e), true) if rows > 0 => {
                let e = {
                    let planner = self.planner();
                    let empty = ColumnScope::default();
                    planner.expr(&empty, &[]).build_as(e, &def.columns[position].ty)?
                };
                let mut ctx = EvalContext::new(self.catalog, self.data, self.now);
                e.get(&[], &mut ctx)?
            }
            _ => Value::Null,
        };
        if def.columns[position].not_null && rows > 0 && value.is_null() {
            return Err(SqlError::query(format!(
                "column \"{}\" of relation \"{}\" contains null values",
                def.columns[position].name, def.name
            )));
        }

        let indexes = self.allocate_indexes(&layout.keys);
        def.indexes.extend(indexes.iter().cloned());
        {
            let data = table_data_mut(self.data, def.id);
            data.add_column(&value);
            for index in &indexes {
                data.create_index(&def, index)?;
            }
        }
        self.register_parts(&def, &layout, &indexes)?;
        self.catalog.replace_table(def)?;
        Ok(())
    }

    fn drop_column(&mut self, table: &Arc<TableDef>, idx: usize) -> SqlResult<()> {
        let mut def = table.as_ref().clone();
        let column = def.columns.remove(idx);
        let mut dropped = Vec::new();
        def.indexes.retain(|i| {
            let keep = !i.columns.contains(&idx);
            if !keep {
                dropped.push(i.id);
            }
            keep
        });
        for index in &mut def.indexes {
            for c in &mut index.columns {
                if *c > idx {
                    *c -= 1;
                }
            }
        }
        def.checks.retain(|c| !mentions(&c.expr, &column.name));

        let owner = format!("{}.{}", table.name, column.name);
        let sequences: Vec<u32> = self
            .catalog
            .owned_sequences(table)
            .into_iter()
            .filter(|id| {
                matches!(self.catalog.relation(*id), Some((_, Relation::Sequence(s))) if s.options.owned_by.as_deref() == Some(owner.as_str()))
            })
            .collect();

        table_data_mut(self.data, def.id).drop_column(&def, idx);
        for id in dropped.into_iter().chain(sequences) {
            self.catalog.drop(id)?;
            self.data.remove(&DataKey::Sequence(id));
        }
        self.catalog.replace_table(def)?;
        debug!(table = %table.name, column = %column.name, "column dropped");
        Ok(())
    }

    fn add_constraint(&mut self, table: &Arc<TableDef>, constraint: &ast::TableConstraint) -> SqlResult<()> {
        let mut layout = TableLayout::new(table);
        layout.checks = table.checks.clone();
        layout.add_constraint(constraint)?;
        layout.validate(&table.indexes)?;
        let names: Vec<&str> = layout.keys.iter().map(|k| k.name.as_str()).collect();
        self.ensure_free(&table.schema, &names)?;

        let mut def = table.as_ref().clone();
        def.columns = layout.columns.clone();
        let new_checks: Vec<CheckDef> = layout.checks[table.checks.len()..].to_vec();
        if !new_checks.is_empty() {
            let compiled = {
                let planner = self.planner();
                let scope = ColumnScope::of(&TableScan::new(table.clone(), None));
                let builder = planner.expr(&scope, &[]);
                new_checks
                    .iter()
                    .map(|c| builder.build_predicate(&c.expr))
                    .collect::<SqlResult<Vec<_>>>()?
            };
            let rows: Vec<_> = table_data(self.data, table.id)
                .map(|d| d.rows().map(|(_, r)| r.clone()).collect())
                .unwrap_or_default();
            let mut ctx = EvalContext::new(self.catalog, self.data, self.now);
            for (check, e) in new_checks.iter().zip(&compiled) {
                for row in &rows {
                    if matches!(e.get(row, &mut ctx)?, Value::Bool(false)) {
                        return Err(SqlError::query(format!(
                            "check constraint \"{}\" of relation \"{}\" is violated by some row",
                            check.name, table.name
                        )));
                    }
                }
            }
            def.checks.extend(new_checks);
        }
        for (pos, column) in def.columns.iter().enumerate() {
            if column.not_null && !table.columns[pos].not_null {
                let has_null = table_data(self.data, table.id)
                    .map_or(false, |d| d.rows().any(|(_, r)| r[pos].is_null()));
                if has_null {
                    return Err(SqlError::query(format!(
                        "column \"{}\" of relation \"{}\" contains null values",
                        column.name, table.name
                    )));
                }
            }
        }

        let indexes = self.allocate_indexes(&layout.keys);
        def.indexes.extend(indexes.iter().cloned());
        for index in &indexes {
            table_data_mut(self.data, def.id).create_index(&def, index)?;
        }
        self.register_parts(&def, &layout, &indexes)?;
        self.catalog.replace_table(def)?;
        Ok(())
    }

    /// `ALTER TABLE ... OWNER TO`: checks the table exists, then ignores the
    /// statement.
    pub fn alter_owner(&mut self, table: &QName) -> SqlResult<QueryResult> {
        self.catalog.table(table)?;
        warn!(table = %table, "ALTER TABLE ... OWNER TO ignored");
        Ok(QueryResult::ignored("ALTER TABLE"))
    }

    // ------------------------------------------------------------------------
    // Drop / truncate
    // ------------------------------------------------------------------------

    /// `DROP TABLE | INDEX | SEQUENCE`.
    pub fn drop(&mut self, stmt: &ast::Statement) -> SqlResult<QueryResult> {
        let ast::Statement::Drop {
            object_type,
            if_exists,
            names,
            ..
        } = stmt
        else {
            return Err(SqlError::Internal("DROP expected".into()));
        };
        let (tag, kind) = match object_type {
            ast::ObjectType::Table => ("DROP TABLE", "table"),
            ast::ObjectType::Index => ("DROP INDEX", "index"),
            ast::ObjectType::Sequence => ("DROP SEQUENCE", "sequence"),
            other => return Err(SqlError::not_supported(format!("DROP {}", other))),
        };
        let mut targets = Vec::with_capacity(names.len());
        for name in names {
            let qname = QName::from_object_name(name)?;
            match self.catalog.find(&qname) {
                Some((_, id, relation)) if relation.kind() == kind => targets.push((id, relation.clone())),
                Some((_, _, relation)) => {
                    return Err(SqlError::query(format!(
                        "\"{}\" is not a {} but a {}",
                        qname.name,
                        kind,
                        relation.kind()
                    )))
                }
                None if *if_exists => {
                    debug!(name = %qname, kind, "nothing to drop");
                }
                None => return Err(SqlError::RelationNotFound(qname.name)),
            }
        }
        if targets.is_empty() {
            return Ok(QueryResult::ignored(tag));
        }
        for (id, relation) in targets {
            match relation {
                Relation::Table(def) => self.drop_table(&def)?,
                Relation::Index { table, .. } => {
                    let mut def = self.catalog.table_by_id(table)?.as_ref().clone();
                    def.indexes.retain(|i| i.id != id);
                    table_data_mut(self.data, table).drop_index(id);
                    self.catalog.drop(id)?;
                    self.catalog.replace_table(def)?;
                }
                Relation::Sequence(_) => {
                    self.catalog.drop(id)?;
                    self.data.remove(&DataKey::Sequence(id));
                }
                Relation::Type(_) => {}
            }
        }
        Ok(QueryResult::command(tag))
    }

    fn drop_table(&mut self, def: &TableDef) -> SqlResult<()> {
        for index in &def.indexes {
            self.catalog.drop(index.id)?;
        }
        for id in self.catalog.owned_sequences(def) {
            self.catalog.drop(id)?;
            self.data.remove(&DataKey::Sequence(id));
        }
        self.catalog.drop(def.id)?;
        self.data.remove(&DataKey::Table(def.id));
        debug!(table = %def.name, "table dropped");
        Ok(())
    }

    // ------------------------------------------------------------------------
    // Sequences, types, schemas
    // ------------------------------------------------------------------------

    /// `CREATE SEQUENCE`.
    pub fn create_sequence(&mut self, name: &QName, if_not_exists: bool, options: &[SequenceOption]) -> SqlResult<QueryResult> {
        let schema = self.catalog.target_schema(name);
        if !self.catalog.is_free(&schema, &name.name) {
            if if_not_exists {
                return Ok(QueryResult::ignored("CREATE SEQUENCE"));
            }
            return Err(SqlError::query(format!(
                "relation \"{}\" already exists",
                name.name
            )));
        }
        let options = SequenceOptions::create(options)?;
        let sequence = name.name.clone();
        let owner = schema.clone();
        let id = self.catalog.register(&schema, |id| {
            Relation::Sequence(Arc::new(SequenceDef {
                id,
                schema: owner,
                name: sequence,
                options,
            }))
        })?;
        debug!(sequence = %name, id, "sequence created");
        Ok(QueryResult::command("CREATE SEQUENCE"))
    }

    /// `ALTER SEQUENCE`.
    pub fn alter_sequence(&mut self, name: &QName, if_exists: bool, options: &[SequenceOption]) -> SqlResult<QueryResult> {
        let current = match self.catalog.sequence(name) {
            Ok(s) => s,
            Err(SqlError::RelationNotFound(_)) if if_exists => {
                return Ok(QueryResult::ignored("ALTER SEQUENCE"));
            }
            Err(e) => return Err(e),
        };
        let mut def = current.as_ref().clone();
        let restart = def.options.alter(options)?;
        let def = self.catalog.replace_sequence(def)?;
        if let Some(value) = restart {
            let slot = self.data.get_or_insert_with(&DataKey::Sequence(def.id), || {
                DataValue::Sequence(SequenceState::new(&def.options))
            });
            if let DataValue::Sequence(state) = slot {
                def.restart(state, value);
            }
        }
        Ok(QueryResult::command("ALTER SEQUENCE"))
    }

    /// `CREATE TYPE ... AS ENUM`.
    pub fn create_enum(&mut self, name: &QName, labels: &[String]) -> SqlResult<QueryResult> {
        let schema = self.catalog.target_schema(name);
        let mut seen = HashSet::new();
        if let Some(dup) = labels.iter().find(|l| !seen.insert(l.as_str())) {
            return Err(SqlError::query(format!(
                "enum label \"{}\" used more than once",
                dup
            )));
        }
        if !self.catalog.is_free(&schema, &name.name) {
            return Err(SqlError::query(format!(
                "type \"{}\" already exists",
                name.name
            )));
        }
        let id = self.catalog.allocate_id();
        let ty = Type::enumeration(EnumType {
            oid: id,
            name: name.name.clone(),
            labels: labels.to_vec(),
        });
        self.catalog.register_with_id(&schema, id, Relation::Type(ty))?;
        debug!(name = %name, labels = labels.len(), "enum created");
        Ok(QueryResult::command("CREATE TYPE"))
    }

    /// `CREATE SCHEMA`.
    pub fn create_schema(&mut self, stmt: &ast::Statement) -> SqlResult<QueryResult> {
        let ast::Statement::CreateSchema {
            schema_name,
            if_not_exists,
        } = stmt
        else {
            return Err(SqlError::Internal("CREATE SCHEMA expected".into()));
        };
        let name = match schema_name {
            ast::SchemaName::Simple(name) => name.0.last().map(ident).unwrap_or_default(),
            _ => return Err(SqlError::not_supported("CREATE SCHEMA ... AUTHORIZATION")),
        };
        if self.catalog.create_schema(&name, *if_not_exists)? {
            Ok(QueryResult::command("CREATE SCHEMA"))
        } else {
            Ok(QueryResult::ignored("CREATE SCHEMA"))
        }
    }
}

// ============================================================================
// Data-only statements
// ============================================================================

/// `TRUNCATE [TABLE] name`. Runs in the held transaction.
pub(crate) fn truncate(catalog: &Catalog, data: &mut DataTx, stmt: &ast::Statement) -> SqlResult<QueryResult> {
    let ast::Statement::Truncate { table_name, .. } = stmt else {
        return Err(SqlError::Internal("TRUNCATE expected".into()));
    };
    let table = catalog.table(&QName::from_object_name(table_name)?)?;
    table_data_mut(data, table.id).truncate();
    Ok(QueryResult::command("TRUNCATE TABLE"))
}

/// `SET name = value`. `search_path` reshapes name resolution; anything
/// else is stored for `SHOW` and `current_setting`.
pub(crate) fn set(catalog: &mut Catalog, data: &mut DataTx, stmt: &ast::Statement) -> SqlResult<QueryResult> {
    match stmt {
        ast::Statement::SetTimeZone { .. } => {
            warn!("SET TIME ZONE ignored");
            Ok(QueryResult::ignored("SET"))
        }
        ast::Statement::SetVariable { variable, value, .. } => {
            let name = variable.to_string().to_lowercase();
            let values: Vec<String> = value.iter().map(setting_text).collect();
            if name == "search_path" {
                catalog.set_search_path(values);
                debug!(path = ?catalog.search_path(), "search path changed");
            } else {
                storage::set_setting(data, &name, &values.join(", "));
            }
            Ok(QueryResult::command("SET"))
        }
        _ => Err(SqlError::Internal("SET expected".into())),
    }
}

fn setting_text(e: &ast::Expr) -> String {
    match e {
        ast::Expr::Value(ast::Value::SingleQuotedString(s)) => s.clone(),
        ast::Expr::Identifier(i) => ident(i),
        other => other.to_string(),
    }
}

/// `SHOW name`.
pub(crate) fn show(catalog: &Catalog, data: &DataTx, stmt: &ast::Statement) -> SqlResult<QueryResult> {
    let ast::Statement::ShowVariable { variable } = stmt else {
        return Err(SqlError::Internal("SHOW expected".into()));
    };
    let words: Vec<String> = variable.iter().map(ident).collect();
    let name = match words.join(" ").as_str() {
        "transaction isolation level" => "transaction_isolation".to_string(),
        "time zone" => "timezone".to_string(),
        other => other.replace(' ', "_"),
    };
    let value = read_setting(data, catalog, &name)?;
    let rows = vec![vec![Value::text(value)]];
    let shape = Materialized::from_rows(vec![name], vec![Type::text()], rows.clone());
    Ok(QueryResult::rows("SHOW", &shape, rows))
}

/// Returns true if `expr` refers to a column named `column`.
fn mentions(expr: &ast::Expr, column: &str) -> bool {
    expr.to_string()
        .split(|c: char| !(c.is_alphanumeric() || c == '_'))
        .any(|word| word.eq_ignore_ascii_case(column))
}

#[cfg(test)]
mod tests {
    use crate::error::ErrorKind;
    use crate::types::Value;
    use crate::{Database, DbOptions};

    #[test]
    fn test_serial_owns_sequence() {
        let mut db = Database::new().unwrap();
        db.execute("CREATE TABLE t (id serial, v text); INSERT INTO t (v) VALUES ('a'), ('b');")
            .unwrap();
        assert_eq!(db.one("SELECT currval('t_id_seq')").unwrap(), vec![Value::Int(2)]);
        db.execute("DROP TABLE t").unwrap();
        let err = db.execute("SELECT nextval('t_id_seq')").unwrap_err();
        assert_eq!(err.kind(), ErrorKind::RelationNotFound);
    }

    #[test]
    fn test_create_table_errors() {
        let mut db = Database::new().unwrap();
        db.execute("CREATE TABLE t (a int)").unwrap();
        let err = db.execute("CREATE TABLE t (b int)").unwrap_err();
        assert_eq!(err.error.to_string(), "relation \"t\" already exists");
        let r = db.query("CREATE TABLE IF NOT EXISTS t (b int)").unwrap();
        assert!(r.ignored);
        let err = db
            .execute("CREATE TABLE u (a int PRIMARY KEY, b int PRIMARY KEY)")
            .unwrap_err();
        assert!(err.error.to_string().contains("multiple primary keys"));
        let err = db
            .execute("CREATE TABLE u (a int REFERENCES t (a))")
            .unwrap_err();
        assert_eq!(err.kind(), ErrorKind::NotSupported);
        assert!(db.execute("CREATE TABLE u (a nope)").is_err());
    }

    #[test]
    fn test_indexes() {
        let mut db = Database::new().unwrap();
        db.execute("CREATE TABLE t (a int, b text); INSERT INTO t VALUES (1, 'x'), (1, 'y');")
            .unwrap();
        let err = db.execute("CREATE UNIQUE INDEX t_a ON t (a)").unwrap_err();
        assert!(err.error.to_string().contains("could not create unique index"));
        db.execute("CREATE UNIQUE INDEX t_b ON t (b)").unwrap();
        let err = db.execute("INSERT INTO t VALUES (2, 'x')").unwrap_err();
        assert!(err.error.to_string().contains("\"t_b\""));
        assert!(db.query("CREATE INDEX IF NOT EXISTS t_b ON t (a)").unwrap().ignored);
        assert!(db.query("CREATE INDEX g ON t USING gin (b)").unwrap().ignored);
        db.execute("DROP INDEX t_b; INSERT INTO t VALUES (2, 'x');").unwrap();

        let mut strict = Database::with_options(DbOptions::new().with_ignore_unsupported_indices(false)).unwrap();
        strict.execute("CREATE TABLE t (a int)").unwrap();
        let err = strict.execute("CREATE INDEX g ON t USING gin (a)").unwrap_err();
        assert_eq!(err.kind(), ErrorKind::NotSupported);
    }

    #[test]
    fn test_alter_table() {
        let mut db = Database::new().unwrap();
        db.execute("CREATE TABLE t (a int, b text); INSERT INTO t VALUES (1, 'x'), (2, NULL);")
            .unwrap();
        db.execute("ALTER TABLE t ADD COLUMN c int DEFAULT 7").unwrap();
        assert_eq!(
            db.many("SELECT c FROM t").unwrap(),
            vec![vec![Value::Int(7)], vec![Value::Int(7)]]
        );
        let err = db.execute("ALTER TABLE t ALTER COLUMN b SET NOT NULL").unwrap_err();
        assert!(err.error.to_string().contains("contains null values"));
        db.execute("ALTER TABLE t DROP COLUMN b").unwrap();
        let r = db.query("SELECT * FROM t").unwrap();
        assert_eq!(r.fields.len(), 2);
        assert_eq!(r.rows[1], vec![Value::Int(2), Value::Int(7)]);
        db.execute("ALTER TABLE t RENAME COLUMN c TO d; ALTER TABLE t RENAME TO u;")
            .unwrap();
        assert_eq!(db.one("SELECT sum(d) FROM u").unwrap(), vec![Value::Int(14)]);
        db.execute("ALTER TABLE u ADD CONSTRAINT a_small CHECK (a < 10)").unwrap();
        let err = db.execute("INSERT INTO u VALUES (11, 0)").unwrap_err();
        assert!(err.error.to_string().contains("\"a_small\""));
        db.execute("ALTER TABLE u DROP CONSTRAINT a_small; INSERT INTO u VALUES (11, 0);")
            .unwrap();
        assert!(db.query("ALTER TABLE u OWNER TO someone").unwrap().ignored);
    }

    #[test]
    fn test_sequences() {
        let mut db = Database::new().unwrap();
        db.execute("CREATE SEQUENCE s START 10 INCREMENT BY 5").unwrap();
        assert_eq!(db.one("SELECT nextval('s')").unwrap(), vec![Value::Int(10)]);
        assert_eq!(db.one("SELECT nextval('s')").unwrap(), vec![Value::Int(15)]);
        db.execute("ALTER SEQUENCE s RESTART WITH 100").unwrap();
        assert_eq!(db.one("SELECT nextval('s')").unwrap(), vec![Value::Int(100)]);
        assert!(db.query("CREATE SEQUENCE IF NOT EXISTS s").unwrap().ignored);
        db.execute("DROP SEQUENCE s").unwrap();
        assert!(db.query("DROP SEQUENCE IF EXISTS s").unwrap().ignored);
    }

    #[test]
    fn test_enum_type() {
        let mut db = Database::new().unwrap();
        db.execute("CREATE TYPE mood AS ENUM ('sad', 'ok', 'happy'); CREATE TABLE p (m mood);")
            .unwrap();
        db.execute("INSERT INTO p VALUES ('ok'), ('happy'), ('sad')").unwrap();
        assert_eq!(
            db.many("SELECT m FROM p ORDER BY m").unwrap(),
            vec![
                vec![Value::text("sad")],
                vec![Value::text("ok")],
                vec![Value::text("happy")]
            ]
        );
        let err = db.execute("INSERT INTO p VALUES ('angry')").unwrap_err();
        assert_eq!(err.kind(), ErrorKind::Query);
    }

    #[test]
    fn test_set_and_show() {
        let mut db = Database::new().unwrap();
        db.execute("SET application_name = 'tests'").unwrap();
        assert_eq!(
            db.one("SHOW application_name").unwrap(),
            vec![Value::text("tests")]
        );
        assert_eq!(db.one("SHOW server_version").unwrap(), vec![Value::text("12.2")]);
        let err = db.execute("SHOW nope").unwrap_err();
        assert_eq!(
            err.error.to_string(),
            "unrecognized configuration parameter \"nope\""
        );
        assert!(db.query("SET TIME ZONE 'UTC'").unwrap().ignored);
    }

    #[test]
    fn test_truncate() {
        let mut db = Database::new().unwrap();
        db.execute("CREATE TABLE t (a int); INSERT INTO t VALUES (1), (2); TRUNCATE TABLE t;")
            .unwrap();
        assert_eq!(db.one("SELECT count(*) FROM t").unwrap(), vec![Value::Int(0)]);
    }
}
