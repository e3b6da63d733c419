//! # memgres-txn
//!
//! Versioned key/value store backing every mutable piece of memgres state.
//!
//! Transactions form a strictly nested tree. A child is forked from an open
//! parent, sees everything the parent sees, and keeps its own writes in an
//! overlay until it is resolved:
//!
//! ```text
//!   root ──fork──▶ child ──fork──▶ grandchild
//!    ▲               ▲                 │
//!    │               └──── commit ─────┘  (writes merged into child)
//!    └── full_commit (commit all the way up)
//! ```
//!
//! Resolving a transaction (`commit`, `rollback`, `full_commit`) consumes it,
//! so using a transaction after it has been resolved does not compile.
//!
//! # Example
//!
//! ```rust
//! use memgres_txn::Transaction;
//!
//! let mut root: Transaction<&str, i32> = Transaction::root();
//! root.set("a", 1);
//!
//! let mut child = root.fork();
//! child.set("a", 2);
//! assert_eq!(child.get(&"a"), Some(&2));
//!
//! let root = child.rollback().unwrap();
//! assert_eq!(root.get(&"a"), Some(&1));
//! ```

#![warn(missing_docs)]
#![warn(clippy::all)]

pub mod transaction;

pub use transaction::{Transaction, TransactionError, TxnId, TxnResult};
