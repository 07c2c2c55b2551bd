//! Error types for the jsondb core library.

use thiserror::Error;

/// All errors that can occur within the jsondb core library.
#[derive(Debug, Error)]
pub enum JsonDbError {
    /// A database, table or field definition is malformed.
    #[error("Schema error: {0}")]
    Schema(String),

    /// A value does not satisfy the type or constraints of its field.
    #[error("Validation failed: {0}")]
    ValidationFailed(String),

    /// An insert or update would give two entries the same unique value.
    #[error("Unique constraint violated: an entry with field '{field}' = {value} already exists")]
    UniqueConflict { field: String, value: String },

    /// A table name was requested that does not exist in the database.
    #[error("Table not found: {0}")]
    TableNotFound(String),

    /// A table with this name is already registered.
    #[error("Table already exists: {0}")]
    TableExists(String),

    /// A field name does not belong to the table's schema.
    #[error("Unknown field '{field}' in table '{table}'")]
    FieldNotFound { table: String, field: String },

    /// The query names an operation that is not in the registry.
    #[error("Unknown query operation '{0}'")]
    UnknownOperation(String),

    /// An operation received the wrong number of arguments.
    #[error("Invalid number of arguments for operation '{operation}': got {got}, but expected {expected}")]
    Arity {
        operation: String,
        got: usize,
        expected: String,
    },

    /// A filter expression could not be compiled.
    #[error("Invalid filter: {0}")]
    InvalidFilter(String),

    /// An orderer expression could not be compiled.
    #[error("Invalid orderer: {0}")]
    InvalidOrderer(String),

    /// A query parameter has the wrong shape or range.
    #[error("Invalid argument: {0}")]
    InvalidArgument(String),

    /// `restore_state` or `ignore_state` was called without a saved snapshot.
    #[error("{0}: states stack is empty")]
    EmptySnapshotStack(&'static str),

    /// A dispatched operation failed; carries the query context.
    #[error("jsondb query failure\nDatabase: '{database}'\nOperation: '{operation}'\nMessage: {{{source}}}\n\nQuery: '{query}'")]
    QueryFailed {
        database: String,
        operation: String,
        #[source]
        source: Box<JsonDbError>,
        query: String,
    },

    /// A query inside a batch failed.
    #[error("Query [{index}]: {source}")]
    BatchFailed {
        index: usize,
        #[source]
        source: Box<JsonDbError>,
    },

    /// The persistence collaborator failed to store the document.
    #[error("Persistence error: {0}")]
    Persistence(String),

    /// Serialized text could not be parsed as JSON.
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),
}

/// Convenience alias that pins the error type to [`JsonDbError`].
pub type Result<T> = std::result::Result<T, JsonDbError>;

impl JsonDbError {
    /// Returns the innermost error, looking through query and batch wrappers.
    #[must_use]
    pub fn root(&self) -> &JsonDbError {
        match self {
            Self::QueryFailed { source, .. } | Self::BatchFailed { source, .. } => source.root(),
            other => other,
        }
    }

    /// Returns a short, human-readable message suitable for display to the end user.
    #[must_use]
    pub fn user_message(&self) -> String {
        match self {
            Self::Schema(msg) => format!("Invalid definition: {msg}"),
            Self::ValidationFailed(msg) => msg.clone(),
            Self::UniqueConflict { field, value } => {
                format!("The value {value} is already used for '{field}'")
            }
            Self::TableNotFound(name) => format!("Unknown table: {name}"),
            Self::TableExists(name) => format!("Table '{name}' already exists"),
            Self::FieldNotFound { field, .. } => format!("Unknown field: {field}"),
            Self::UnknownOperation(op) => format!("Unknown operation: {op}"),
            Self::Arity { operation, expected, .. } => {
                format!("'{operation}' expects {expected} argument(s)")
            }
            Self::InvalidFilter(msg) => format!("Filter error: {msg}"),
            Self::InvalidOrderer(msg) => format!("Ordering error: {msg}"),
            Self::InvalidArgument(msg) => msg.clone(),
            Self::EmptySnapshotStack(_) => "Internal transaction error".to_string(),
            Self::QueryFailed { .. } | Self::BatchFailed { .. } => self.root().user_message(),
            Self::Persistence(e) => format!("Failed to save: {e}"),
            Self::Json(e) => format!("Data format error: {e}"),
        }
    }
}
