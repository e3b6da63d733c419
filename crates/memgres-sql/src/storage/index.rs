//! Btree indexes over table columns.

use std::collections::{BTreeMap, BTreeSet};

use crate::types::SortKey;

use super::RowId;

/// Shape of an index.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct IndexDef {
    /// Catalog id.
    pub id: u32,
    /// Index name, also used as the constraint name in messages.
    pub name: String,
    /// Indexed column positions.
    pub columns: Vec<usize>,
    /// Rejects duplicate keys.
    pub unique: bool,
    /// Backs the table's primary key.
    pub primary: bool,
}

impl IndexDef {
    /// Returns true if the index covers exactly these columns, in any order.
    pub fn covers(&self, columns: &[usize]) -> bool {
        let mut mine = self.columns.clone();
        let mut theirs = columns.to_vec();
        mine.sort_unstable();
        theirs.sort_unstable();
        mine == theirs
    }
}

/// Entries of one index: canonical key to the rows holding it.
#[derive(Debug, Clone, Default)]
pub struct IndexData {
    entries: BTreeMap<SortKey, BTreeSet<RowId>>,
}

impl IndexData {
    /// Adds an entry.
    pub fn add(&mut self, key: SortKey, row: RowId) {
        self.entries.entry(key).or_default().insert(row);
    }

    /// Removes an entry.
    pub fn remove(&mut self, key: &SortKey, row: RowId) {
        if let Some(rows) = self.entries.get_mut(key) {
            rows.remove(&row);
            if rows.is_empty() {
                self.entries.remove(key);
            }
        }
    }

    /// Rows holding exactly `key`.
    pub fn get(&self, key: &SortKey) -> impl Iterator<Item = RowId> + '_ {
        self.entries.get(key).into_iter().flatten().copied()
    }

    /// Rows whose key starts with `prefix`, in key order.
    pub fn prefix(&self, prefix: &[crate::types::Value]) -> Vec<RowId> {
        let start = SortKey(prefix.to_vec());
        self.entries
            .range(start..)
            .take_while(|(k, _)| {
                k.0.len() >= prefix.len()
                    && k.0[..prefix.len()]
                        .iter()
                        .zip(prefix)
                        .all(|(a, b)| a.total_cmp(b).is_eq())
            })
            .flat_map(|(_, rows)| rows.iter().copied())
            .collect()
    }

    /// Number of distinct keys.
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    /// Returns true if the index holds no entry.
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}
