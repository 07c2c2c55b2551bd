//! Internal domain modules for the jsondb core library.
//!
//! All public types from these modules are re-exported at the crate root
//! with `#[doc(inline)]`; import from there in preference to this module.

pub mod database;
pub mod entry;
pub mod error;
pub mod field;
pub mod filter;
pub mod operation;
pub mod order;
pub mod storage;
pub mod table;
pub mod transaction;
pub mod value;

#[doc(inline)]
pub use database::{Database, DatabaseDefinition};
#[doc(inline)]
pub use entry::{Entry, EntryId};
#[doc(inline)]
pub use error::{JsonDbError, Result};
#[doc(inline)]
pub use field::{Field, FieldDefinition, FieldType};
#[doc(inline)]
pub use filter::{Filter, Predicate, MATCH_ALL};
#[doc(inline)]
pub use operation::{lookup, Operation, OPERATIONS};
#[doc(inline)]
pub use order::{Orderer, SortKey, SortKind};
#[doc(inline)]
pub use storage::{MemoryPersister, Persister, Storage, StorageOptions};
#[doc(inline)]
pub use table::{Table, TableDefinition, UniqueIndex};
#[doc(inline)]
pub use transaction::{atomically, Snapshot, Transaction};
#[doc(inline)]
pub use value::{FieldValue, IndexKey, ID_ALPHABET, ID_LENGTH};
