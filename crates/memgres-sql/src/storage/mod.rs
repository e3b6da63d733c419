//! Row storage on top of the transaction store.
//!
//! Every mutable piece of engine state lives in one [`DataTx`], keyed by
//! what it belongs to:
//!
//! ```text
//! ┌──────────────────────────────────────────────────────────────┐
//! │                      Transaction<DataKey, DataValue>          │
//! │  ┌──────────────────┐  ┌──────────────────┐  ┌────────────┐  │
//! │  │ Table(id)        │  │ Sequence(id)     │  │ Settings   │  │
//! │  │ rows + indexes   │  │ counter state    │  │ SET values │  │
//! │  └──────────────────┘  └──────────────────┘  └────────────┘  │
//! └──────────────────────────────────────────────────────────────┘
//! ```
//!
//! Definitions (columns, constraints, index shapes) live in the catalog and
//! are not versioned; only the data they describe is.

pub mod index;
pub mod sequence;
pub mod table;

use std::collections::BTreeMap;

use memgres_txn::Transaction;

pub use index::{IndexData, IndexDef};
pub use sequence::{SequenceDef, SequenceOption, SequenceOptions, SequenceState};
pub use table::{CheckDef, ColumnDef, RowId, TableData, TableDef};

use crate::types::Value;

/// A row: one value per column, in column order.
pub type Row = Vec<Value>;

/// Identifies a piece of versioned state.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum DataKey {
    /// Rows and index entries of a table.
    Table(u32),
    /// Counter of a sequence.
    Sequence(u32),
    /// Session settings.
    Settings,
}

/// Versioned state.
#[derive(Debug, Clone)]
pub enum DataValue {
    /// Table content.
    Table(TableData),
    /// Sequence counter.
    Sequence(SequenceState),
    /// Settings changed with `SET`.
    Settings(BTreeMap<String, String>),
}

/// The transaction type holding all engine data.
pub type DataTx = Transaction<DataKey, DataValue>;

/// Reads the content of a table. A table nobody wrote to yet is empty.
pub fn table_data(tx: &DataTx, table: u32) -> Option<&TableData> {
    match tx.get(&DataKey::Table(table)) {
        Some(DataValue::Table(data)) => Some(data),
        _ => None,
    }
}

/// Mutable content of a table, created empty on first access.
pub fn table_data_mut(tx: &mut DataTx, table: u32) -> &mut TableData {
    let slot = tx.get_or_insert_with(&DataKey::Table(table), || {
        DataValue::Table(TableData::default())
    });
    if !matches!(slot, DataValue::Table(_)) {
        *slot = DataValue::Table(TableData::default());
    }
    match slot {
        DataValue::Table(data) => data,
        _ => unreachable!("slot was just set to a table"),
    }
}

/// Reads a setting.
pub fn setting<'a>(tx: &'a DataTx, name: &str) -> Option<&'a str> {
    match tx.get(&DataKey::Settings) {
        Some(DataValue::Settings(map)) => map.get(name).map(String::as_str),
        _ => None,
    }
}

/// Writes a setting.
pub fn set_setting(tx: &mut DataTx, name: &str, value: &str) {
    let slot = tx.get_or_insert_with(&DataKey::Settings, || DataValue::Settings(BTreeMap::new()));
    if let DataValue::Settings(map) = slot {
        map.insert(name.to_string(), value.to_string());
    }
}
