//! Core library for jsondb, an embedded, schema-validated JSON document store.
//!
//! The primary entry point is [`Database`], which owns a set of typed tables
//! and answers queries written as JSON arrays:
//!
//! ```rust
//! use jsondb_core::Database;
//! use serde_json::json;
//!
//! let mut db = Database::new("shop", "1.0").unwrap();
//! db.query(&json!(["createTable", {
//!     "name": "items",
//!     "fields": [{"name": "label", "type": "string", "unique": true}]
//! }])).unwrap();
//! db.query(&json!(["insert", "items", {"label": "pen"}])).unwrap();
//! let found = db.query(&json!(["select", "items", ["$label", "=", "pen"]])).unwrap();
//! assert_eq!(found, json!([{"label": "pen"}]));
//! ```
//!
//! Types are re-exported from their respective sub-modules for convenience;
//! consumers should import from the crate root rather than the `core` module.

pub mod core;

// Re-export commonly used types.
#[doc(inline)]
pub use core::{
    database::{Database, DatabaseDefinition},
    entry::{Entry, EntryId},
    error::{JsonDbError, Result},
    field::{Field, FieldDefinition, FieldType},
    filter::{Filter, Predicate, MATCH_ALL},
    operation::{lookup as lookup_operation, Operation, OPERATIONS},
    order::{Orderer, SortKey, SortKind},
    storage::{MemoryPersister, Persister, Storage, StorageOptions},
    table::{Table, TableDefinition, UniqueIndex},
    transaction::{atomically, Snapshot, Transaction},
    value::{FieldValue, IndexKey, ID_ALPHABET, ID_LENGTH},
};
