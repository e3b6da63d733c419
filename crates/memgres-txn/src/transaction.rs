//! Nested transactions over a copy-on-write key/value overlay.
//!
//! The root transaction owns the committed base state. Every child owns its
//! parent (`fork` moves the parent into the child), and records its writes in
//! an overlay map. A key that was never written by a child is read through
//! from its ancestors; the first mutable access copies the visible value up
//! into the child's overlay.
//!
//! # Transaction States
//!
//! ```text
//! ┌─────────────┐  fork()   ┌────────────┐
//! │ open (root) │──────────▶│ open child │──fork()──▶ ...
//! └─────────────┘           └────────────┘
//!        ▲                     │       │
//!        │          commit()   │       │ rollback()
//!        └─────────────────────┴───────┘
//!          (child consumed, parent returned)
//! ```

use std::collections::HashMap;
use std::fmt;
use std::hash::Hash;
use std::sync::atomic::{AtomicU64, Ordering};

use thiserror::Error;
use tracing::debug;

/// Source of transaction ids, unique for the lifetime of the process.
static NEXT_TXN_ID: AtomicU64 = AtomicU64::new(1);

/// Transaction identifier.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct TxnId(u64);

impl TxnId {
    fn next() -> Self {
        Self(NEXT_TXN_ID.fetch_add(1, Ordering::Relaxed))
    }

    /// Returns the raw id.
    pub fn as_u64(&self) -> u64 {
        self.0
    }
}

impl fmt::Display for TxnId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "txn_{}", self.0)
    }
}

/// Errors raised by transaction transitions.
///
/// A failed transition hands the transaction back so the caller keeps its
/// state.
#[derive(Error)]
pub enum TransactionError<K, V> {
    /// Commit or rollback was requested on the root transaction.
    #[error("{} is the root transaction and has no parent to resolve into", .0.id())]
    NoParent(Transaction<K, V>),
}

impl<K, V> TransactionError<K, V> {
    /// Returns the transaction the transition was attempted on.
    pub fn into_transaction(self) -> Transaction<K, V> {
        match self {
            TransactionError::NoParent(txn) => txn,
        }
    }
}

impl<K, V> fmt::Debug for TransactionError<K, V> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            TransactionError::NoParent(txn) => f.debug_tuple("NoParent").field(&txn.id).finish(),
        }
    }
}

/// Result type for transaction transitions.
pub type TxnResult<T, K, V> = Result<T, TransactionError<K, V>>;

/// A node of the transaction tree.
///
/// `K` identifies a piece of state (a table's rows, a sequence counter, ...)
/// and `V` is its value. Values are cloned when a child first mutates a key
/// it inherited, so `V` should be cheap enough to clone once per
/// transaction.
pub struct Transaction<K, V> {
    id: TxnId,
    depth: usize,
    parent: Option<Box<Transaction<K, V>>>,
    /// Base state for the root, write overlay for children. `None` marks a
    /// key removed by a child; the root only holds `Some`.
    writes: HashMap<K, Option<V>>,
}

impl<K, V> Transaction<K, V> {
    /// Returns this transaction's id.
    pub fn id(&self) -> TxnId {
        self.id
    }

    /// Nesting depth; the root is at depth 0.
    pub fn depth(&self) -> usize {
        self.depth
    }

    /// Returns true if this transaction has a parent.
    pub fn is_child(&self) -> bool {
        self.parent.is_some()
    }

    /// Number of keys written at this level.
    pub fn write_count(&self) -> usize {
        self.writes.len()
    }
}

impl<K, V> Transaction<K, V>
where
    K: Eq + Hash + Clone,
    V: Clone,
{
    /// Creates an empty root transaction.
    pub fn root() -> Self {
        Self {
            id: TxnId::next(),
            depth: 0,
            parent: None,
            writes: HashMap::new(),
        }
    }

    /// Creates a child transaction. The parent is moved into the child and
    /// comes back when the child is committed or rolled back.
    pub fn fork(self) -> Self {
        let depth = self.depth + 1;
        let child = Self {
            id: TxnId::next(),
            depth,
            parent: Some(Box::new(self)),
            writes: HashMap::new(),
        };
        debug!(txn = %child.id, depth, "fork");
        child
    }

    /// Merges this transaction's writes into its parent and returns the
    /// parent. Later writes to a key override earlier ones.
    pub fn commit(mut self) -> TxnResult<Self, K, V> {
        match self.parent.take() {
            Some(parent) => Ok(self.merge_into(*parent)),
            None => Err(TransactionError::NoParent(self)),
        }
    }

    /// Discards this transaction's writes and returns the untouched parent.
    pub fn rollback(mut self) -> TxnResult<Self, K, V> {
        match self.parent.take() {
            Some(parent) => {
                debug!(txn = %self.id, depth = self.depth, discarded = self.writes.len(), "rollback");
                Ok(*parent)
            }
            None => Err(TransactionError::NoParent(self)),
        }
    }

    /// Runs `f` in a child transaction that is committed when `f` succeeds
    /// and rolled back when it fails. Returns this transaction either way.
    pub fn savepoint<R, E>(self, f: impl FnOnce(&mut Self) -> Result<R, E>) -> (Self, Result<R, E>) {
        let mut child = self.fork();
        let result = f(&mut child);
        let parent = match child.parent.take() {
            Some(parent) => *parent,
            None => return (child, result),
        };
        match result {
            Ok(value) => (child.merge_into(parent), Ok(value)),
            Err(e) => {
                debug!(
                    txn = %child.id,
                    depth = child.depth,
                    discarded = child.writes.len(),
                    "savepoint rollback"
                );
                (parent, Err(e))
            }
        }
    }

    /// Commits every level up to the root and returns the root.
    pub fn full_commit(self) -> Self {
        let mut current = self;
        while let Some(parent) = current.parent.take() {
            current = current.merge_into(*parent);
        }
        current
    }

    /// Rolls back every level and returns the root untouched.
    pub fn rollback_all(self) -> Self {
        let mut current = self;
        while let Some(parent) = current.parent.take() {
            current = *parent;
        }
        current
    }

    /// Reads the value visible to this transaction.
    pub fn get(&self, key: &K) -> Option<&V> {
        let mut current = self;
        loop {
            match current.writes.get(key) {
                Some(slot) => return slot.as_ref(),
                None => match &current.parent {
                    Some(parent) => current = parent,
                    None => return None,
                },
            }
        }
    }

    /// Returns true if a value is visible for `key`.
    pub fn contains_key(&self, key: &K) -> bool {
        self.get(key).is_some()
    }

    /// Mutable access to the visible value, copying it into this
    /// transaction's overlay on first access.
    pub fn get_mut(&mut self, key: &K) -> Option<&mut V> {
        if !self.writes.contains_key(key) {
            let inherited = self.parent.as_ref().and_then(|p| p.get(key)).cloned()?;
            self.writes.insert(key.clone(), Some(inherited));
        }
        self.writes.get_mut(key).and_then(Option::as_mut)
    }

    /// Mutable access to the value for `key`, inserting `init()` when no
    /// value is visible.
    pub fn get_or_insert_with(&mut self, key: &K, init: impl FnOnce() -> V) -> &mut V {
        let inherited = match self.writes.contains_key(key) {
            true => None,
            false => self.parent.as_ref().and_then(|p| p.get(key)).cloned(),
        };
        self.writes
            .entry(key.clone())
            .or_insert(inherited)
            .get_or_insert_with(init)
    }

    /// Writes a value.
    pub fn set(&mut self, key: K, value: V) {
        self.writes.insert(key, Some(value));
    }

    /// Removes the value for `key`, returning the previously visible value.
    pub fn remove(&mut self, key: &K) -> Option<V> {
        let previous = self.get(key).cloned();
        if self.parent.is_some() {
            self.writes.insert(key.clone(), None);
        } else {
            self.writes.remove(key);
        }
        previous
    }

    /// Keys with a visible value, in no particular order.
    pub fn keys(&self) -> Vec<K> {
        let mut seen: HashMap<&K, bool> = HashMap::new();
        let mut current = Some(self);
        while let Some(txn) = current {
            for (key, slot) in &txn.writes {
                // the nearest level decides
                seen.entry(key).or_insert(slot.is_some());
            }
            current = txn.parent.as_deref();
        }
        seen.into_iter()
            .filter(|(_, visible)| *visible)
            .map(|(key, _)| key.clone())
            .collect()
    }

    fn merge_into(self, mut parent: Self) -> Self {
        debug!(
            txn = %self.id,
            depth = self.depth,
            writes = self.writes.len(),
            into = %parent.id,
            "commit"
        );
        for (key, slot) in self.writes {
            parent.apply(key, slot);
        }
        parent
    }

    fn apply(&mut self, key: K, slot: Option<V>) {
        if self.parent.is_some() {
            self.writes.insert(key, slot);
            return;
        }
        match slot {
            Some(value) => {
                self.writes.insert(key, Some(value));
            }
            None => {
                self.writes.remove(&key);
            }
        }
    }
}

impl<K, V> fmt::Debug for Transaction<K, V> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Transaction")
            .field("id", &self.id)
            .field("depth", &self.depth)
            .field("writes", &self.writes.len())
            .finish()
    }
}

impl<K, V> Default for Transaction<K, V>
where
    K: Eq + Hash + Clone,
    V: Clone,
{
    fn default() -> Self {
        Self::root()
    }
}
