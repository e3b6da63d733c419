//! Table definitions and table content.
//!
//! [`TableDef`] is the catalog side (columns, constraints, index shapes);
//! [`TableData`] is the versioned side (rows and index entries). Every
//! mutation of [`TableData`] takes the definition it must honor, and
//! enforces not-null and unique constraints. Check constraints need the
//! expression compiler and are enforced by the executor before the row gets
//! here.

use std::collections::{BTreeMap, HashMap};

use sqlparser::ast;

use crate::error::{SqlError, SqlResult};
use crate::types::compare::canonical;
use crate::types::{SortKey, Type, Value};

use super::index::{IndexData, IndexDef};
use super::Row;

/// Position of a row in its table. Assigned in insertion order, never
/// reused.
pub type RowId = u64;

/// A table column.
#[derive(Debug, Clone)]
pub struct ColumnDef {
    /// Column name.
    pub name: String,
    /// Declared type.
    pub ty: Type,
    /// Rejects NULL.
    pub not_null: bool,
    /// Default value expression, compiled when a row is inserted.
    pub default: Option<ast::Expr>,
}

/// A check constraint.
#[derive(Debug, Clone)]
pub struct CheckDef {
    /// Constraint name.
    pub name: String,
    /// Boolean expression over the table's columns.
    pub expr: ast::Expr,
}

/// A table registered in the catalog.
#[derive(Debug, Clone)]
pub struct TableDef {
    /// Catalog id.
    pub id: u32,
    /// Owning schema.
    pub schema: String,
    /// Table name.
    pub name: String,
    /// Columns, in order.
    pub columns: Vec<ColumnDef>,
    /// Check constraints.
    pub checks: Vec<CheckDef>,
    /// Indexes.
    pub indexes: Vec<IndexDef>,
}

impl TableDef {
    /// Position of a column.
    pub fn column_index(&self, name: &str) -> Option<usize> {
        self.columns.iter().position(|c| c.name == name)
    }

    /// Position of a column, raising when absent.
    pub fn column(&self, name: &str) -> SqlResult<usize> {
        self.column_index(name).ok_or_else(|| {
            SqlError::query(format!(
                "column \"{}\" of relation \"{}\" does not exist",
                name, self.name
            ))
        })
    }

    /// Index by catalog id.
    pub fn index(&self, id: u32) -> Option<&IndexDef> {
        self.indexes.iter().find(|i| i.id == id)
    }

    /// The primary key index, if any.
    pub fn primary_key(&self) -> Option<&IndexDef> {
        self.indexes.iter().find(|i| i.primary)
    }

    /// Unique index covering exactly `columns`.
    pub fn unique_index_on(&self, columns: &[usize]) -> Option<&IndexDef> {
        self.indexes.iter().find(|i| i.unique && i.covers(columns))
    }

    /// Index key of a row, in canonical form.
    pub fn key_of(&self, index: &IndexDef, row: &Row) -> SortKey {
        SortKey(
            index
                .columns
                .iter()
                .map(|&c| canonical(&self.columns[c].ty, &row[c]))
                .collect(),
        )
    }

    /// Canonical key built from raw values of the index columns.
    pub fn key_from(&self, index: &IndexDef, values: &[Value]) -> SortKey {
        SortKey(
            index
                .columns
                .iter()
                .zip(values)
                .map(|(&c, v)| canonical(&self.columns[c].ty, v))
                .collect(),
        )
    }
}

/// Rows and index entries of a table.
#[derive(Debug, Clone, Default)]
pub struct TableData {
    rows: BTreeMap<RowId, Row>,
    /// Next id to hand out.
    pub next_row_id: RowId,
    indexes: HashMap<u32, IndexData>,
}

impl TableData {
    /// Number of rows.
    pub fn len(&self) -> usize {
        self.rows.len()
    }

    /// Returns true if the table holds no row.
    pub fn is_empty(&self) -> bool {
        self.rows.is_empty()
    }

    /// Reads a row.
    pub fn get(&self, id: RowId) -> Option<&Row> {
        self.rows.get(&id)
    }

    /// All rows in insertion order.
    pub fn rows(&self) -> impl Iterator<Item = (RowId, &Row)> {
        self.rows.iter().map(|(id, row)| (*id, row))
    }

    /// First row after `last` (or the first row). Scans resume from a
    /// position rather than holding an iterator, so the table may change
    /// between two calls.
    pub fn after(&self, last: Option<RowId>) -> Option<(RowId, &Row)> {
        let mut range = match last {
            Some(last) => self.rows.range(last + 1..),
            None => self.rows.range(..),
        };
        range.next().map(|(id, row)| (*id, row))
    }

    /// Rows whose key in `index` starts with `prefix`.
    pub fn lookup(&self, def: &TableDef, index: u32, prefix: &[Value]) -> Vec<RowId> {
        let Some(index_def) = def.index(index) else {
            return Vec::new();
        };
        let key = def.key_from(index_def, prefix);
        match self.indexes.get(&index) {
            Some(data) => data.prefix(&key.0),
            None => Vec::new(),
        }
    }

    /// First unique index entry of another row colliding with `row`.
    pub fn conflict<'d>(
        &self,
        def: &'d TableDef,
        row: &Row,
        except: Option<RowId>,
    ) -> Option<(&'d IndexDef, RowId)> {
        for index in def.indexes.iter().filter(|i| i.unique) {
            let key = def.key_of(index, row);
            if key.0.iter().any(Value::is_null) {
                continue;
            }
            let Some(data) = self.indexes.get(&index.id) else {
                continue;
            };
            if let Some(other) = data.get(&key).find(|id| Some(*id) != except) {
                return Some((index, other));
            }
        }
        None
    }

    fn check(&self, def: &TableDef, row: &Row, except: Option<RowId>) -> SqlResult<()> {
        if row.len() != def.columns.len() {
            return Err(SqlError::Internal(format!(
                "row of {} values for {} columns of \"{}\"",
                row.len(),
                def.columns.len(),
                def.name
            )));
        }
        for (col, value) in def.columns.iter().zip(row) {
            if col.not_null && value.is_null() {
                return Err(SqlError::query(format!(
                    "null value in column \"{}\" violates not-null constraint",
                    col.name
                )));
            }
        }
        if let Some((index, _)) = self.conflict(def, row, except) {
            return Err(SqlError::query(format!(
                "duplicate key value violates unique constraint \"{}\"",
                index.name
            )));
        }
        Ok(())
    }

    fn index_row(&mut self, def: &TableDef, id: RowId, row: &Row) {
        for index in &def.indexes {
            let key = def.key_of(index, row);
            self.indexes.entry(index.id).or_default().add(key, id);
        }
    }

    fn unindex_row(&mut self, def: &TableDef, id: RowId, row: &Row) {
        for index in &def.indexes {
            let key = def.key_of(index, row);
            if let Some(data) = self.indexes.get_mut(&index.id) {
                data.remove(&key, id);
            }
        }
    }

    /// Inserts a row after checking not-null and unique constraints.
    pub fn insert(&mut self, def: &TableDef, row: Row) -> SqlResult<RowId> {
        self.check(def, &row, None)?;
        let id = self.next_row_id;
        self.next_row_id += 1;
        self.index_row(def, id, &row);
        self.rows.insert(id, row);
        Ok(id)
    }

    /// Replaces a row, returning the previous version.
    pub fn update(&mut self, def: &TableDef, id: RowId, row: Row) -> SqlResult<Row> {
        let previous = self
            .rows
            .get(&id)
            .cloned()
            .ok_or_else(|| SqlError::Internal(format!("row {} of \"{}\" is gone", id, def.name)))?;
        self.check(def, &row, Some(id))?;
        self.unindex_row(def, id, &previous);
        self.index_row(def, id, &row);
        self.rows.insert(id, row);
        Ok(previous)
    }

    /// Deletes a row, returning it.
    pub fn delete(&mut self, def: &TableDef, id: RowId) -> Option<Row> {
        let row = self.rows.remove(&id)?;
        self.unindex_row(def, id, &row);
        Some(row)
    }

    /// Removes every row.
    pub fn truncate(&mut self) {
        self.rows.clear();
        for data in self.indexes.values_mut() {
            *data = IndexData::default();
        }
    }

    /// Builds the entries of a new index, rejecting duplicates when it is
    /// unique.
    pub fn create_index(&mut self, def: &TableDef, index: &IndexDef) -> SqlResult<()> {
        let mut data = IndexData::default();
        for (id, row) in &self.rows {
            let key = def.key_of(index, row);
            if index.unique
                && !key.0.iter().any(Value::is_null)
                && data.get(&key).next().is_some()
            {
                return Err(SqlError::query(format!(
                    "could not create unique index \"{}\"",
                    index.name
                )));
            }
            data.add(key, *id);
        }
        self.indexes.insert(index.id, data);
        Ok(())
    }

    /// Drops the entries of an index.
    pub fn drop_index(&mut self, index: u32) {
        self.indexes.remove(&index);
    }

    /// Appends a column to every row.
    pub fn add_column(&mut self, value: &Value) {
        for row in self.rows.values_mut() {
            row.push(value.clone());
        }
    }

    /// Removes a column from every row, then rebuilds the indexes of the
    /// new definition (positions have shifted).
    pub fn drop_column(&mut self, def: &TableDef, column: usize) {
        for row in self.rows.values_mut() {
            if column < row.len() {
                row.remove(column);
            }
        }
        self.reindex(def);
    }

    /// Rebuilds every index of `def` from the rows.
    pub fn reindex(&mut self, def: &TableDef) {
        self.indexes.clear();
        let rows: Vec<(RowId, Row)> = self.rows.iter().map(|(i, r)| (*i, r.clone())).collect();
        for index in &def.indexes {
            self.indexes.insert(index.id, IndexData::default());
        }
        for (id, row) in rows {
            self.index_row(def, id, &row);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn table() -> TableDef {
        TableDef {
            id: 1,
            schema: "public".into(),
            name: "t".into(),
            columns: vec![
                ColumnDef {
                    name: "a".into(),
                    ty: Type::integer(),
                    not_null: true,
                    default: None,
                },
                ColumnDef {
                    name: "b".into(),
                    ty: Type::citext(),
                    not_null: false,
                    default: None,
                },
            ],
            checks: Vec::new(),
            indexes: vec![
                IndexDef {
                    id: 2,
                    name: "t_pkey".into(),
                    columns: vec![0],
                    unique: true,
                    primary: true,
                },
                IndexDef {
                    id: 3,
                    name: "t_b_key".into(),
                    columns: vec![1],
                    unique: true,
                    primary: false,
                },
            ],
        }
    }

    fn row(a: i64, b: Option<&str>) -> Row {
        vec![Value::Int(a), b.map(Value::text).unwrap_or(Value::Null)]
    }

    #[test]
    fn test_insert_and_scan_positions() {
        let def = table();
        let mut data = TableData::default();
        let first = data.insert(&def, row(1, Some("x"))).unwrap();
        let second = data.insert(&def, row(2, Some("y"))).unwrap();
        assert_eq!(data.after(None).map(|(id, _)| id), Some(first));
        assert_eq!(data.after(Some(first)).map(|(id, _)| id), Some(second));
        assert!(data.after(Some(second)).is_none());
    }

    #[test]
    fn test_not_null_violation() {
        let def = table();
        let mut data = TableData::default();
        let err = data.insert(&def, vec![Value::Null, Value::Null]).unwrap_err();
        assert_eq!(
            err.to_string(),
            "null value in column \"a\" violates not-null constraint"
        );
    }

    #[test]
    fn test_unique_uses_column_type() {
        let def = table();
        let mut data = TableData::default();
        data.insert(&def, row(1, Some("abc"))).unwrap();
        let err = data.insert(&def, row(2, Some("ABC"))).unwrap_err();
        assert_eq!(
            err.to_string(),
            "duplicate key value violates unique constraint \"t_b_key\""
        );
        // NULLs never collide
        data.insert(&def, row(3, None)).unwrap();
        data.insert(&def, row(4, None)).unwrap();
        assert_eq!(data.len(), 3);
    }

    #[test]
    fn test_update_reindexes() {
        let def = table();
        let mut data = TableData::default();
        let id = data.insert(&def, row(1, Some("x"))).unwrap();
        data.update(&def, id, row(1, Some("z"))).unwrap();
        assert_eq!(data.lookup(&def, 3, &[Value::text("Z")]), vec![id]);
        assert!(data.lookup(&def, 3, &[Value::text("x")]).is_empty());
        data.insert(&def, row(2, Some("x"))).unwrap();
    }

    #[test]
    fn test_delete_and_truncate() {
        let def = table();
        let mut data = TableData::default();
        let id = data.insert(&def, row(1, None)).unwrap();
        assert!(data.delete(&def, id).is_some());
        data.insert(&def, row(1, None)).unwrap();
        data.truncate();
        assert!(data.is_empty());
        data.insert(&def, row(1, None)).unwrap();
    }

    #[test]
    fn test_create_unique_index_on_duplicates_fails() {
        let mut def = table();
        def.indexes.clear();
        let mut data = TableData::default();
        data.insert(&def, row(1, Some("x"))).unwrap();
        data.insert(&def, row(1, Some("y"))).unwrap();
        let index = IndexDef {
            id: 9,
            name: "t_a_idx".into(),
            columns: vec![0],
            unique: true,
            primary: false,
        };
        assert!(data.create_index(&def, &index).is_err());
        let index = IndexDef {
            unique: false,
            ..index
        };
        data.create_index(&def, &index).unwrap();
        def.indexes.push(index);
        assert_eq!(data.lookup(&def, 9, &[Value::Int(1)]).len(), 2);
    }
}
