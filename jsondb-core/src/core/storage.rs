//! Persistence boundary: keeps a [`Database`] and hands its serialized form
//! to a [`Persister`] after every query that changed it.
//!
//! The core never performs I/O itself. Loading means passing stored text to
//! [`Storage::open`]; saving means implementing [`Persister::save`].

use crate::{Database, JsonDbError, Result};
use serde::{Deserialize, Serialize};
use serde_json::Value;

/// How [`Storage`] serializes and when it saves.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct StorageOptions {
    /// Indent the saved document.
    pub pretty: bool,
    /// Save after every query that advanced the database's `updated` timestamp.
    pub save_on_change: bool,
}

impl Default for StorageOptions {
    fn default() -> Self {
        Self {
            pretty: true,
            save_on_change: true,
        }
    }
}

/// Destination of the serialized document.
pub trait Persister {
    /// Durably stores `text`, the full serialized database.
    ///
    /// # Errors
    ///
    /// Implementations report failures as [`JsonDbError::Persistence`].
    fn save(&mut self, text: &str) -> Result<()>;

    /// Asked after each changing query; returning `false` skips that save.
    fn should_save(&self, _db: &Database) -> bool {
        true
    }

    /// Called once by [`Storage::open`] when the stored version differs from
    /// the application version.
    ///
    /// # Errors
    ///
    /// Any error aborts opening.
    fn upgrade(&mut self, _db: &mut Database, _stored: &str, _current: &str) -> Result<()> {
        Ok(())
    }
}

/// A [`Persister`] that keeps the last saved document in memory.
#[derive(Debug, Default, Clone)]
pub struct MemoryPersister {
    pub last: Option<String>,
    pub saves: usize,
}

impl Persister for MemoryPersister {
    fn save(&mut self, text: &str) -> Result<()> {
        self.last = Some(text.to_string());
        self.saves += 1;
        Ok(())
    }
}

/// An open database together with the collaborator that persists it.
pub struct Storage<P: Persister> {
    db: Database,
    persister: P,
    options: StorageOptions,
}

impl<P: Persister> Storage<P> {
    /// Parses `text` and opens the database it describes.
    ///
    /// # Errors
    ///
    /// - [`JsonDbError::InvalidArgument`] if `app_version` is empty.
    /// - [`JsonDbError::Json`] / [`JsonDbError::Schema`] for unreadable text.
    /// - Any error returned by [`Persister::upgrade`].
    pub fn open(app_version: &str, text: &str, mut persister: P, options: StorageOptions) -> Result<Self> {
        if app_version.is_empty() {
            return Err(JsonDbError::InvalidArgument(
                "application version must be a non-empty string".to_string(),
            ));
        }
        let mut db = Database::from_json_str(text)?;
        if db.version() != app_version {
            let stored = db.version().to_string();
            log::info!("Upgrading database '{}' from {stored} to {app_version}", db.name());
            persister.upgrade(&mut db, &stored, app_version)?;
        }
        Ok(Self { db, persister, options })
    }

    #[must_use]
    pub fn database(&self) -> &Database {
        &self.db
    }

    #[must_use]
    pub fn persister(&self) -> &P {
        &self.persister
    }

    #[must_use]
    pub fn options(&self) -> &StorageOptions {
        &self.options
    }

    /// Gives back the database and the persister.
    #[must_use]
    pub fn into_parts(self) -> (Database, P) {
        (self.db, self.persister)
    }

    /// See [`Database::query`].
    ///
    /// # Errors
    ///
    /// Returns the query error, or a save error if the query succeeded.
    pub fn query(&mut self, query: &Value) -> Result<Value> {
        self.tracked(|db| db.query(query))
    }

    /// See [`Database::atomic_query`].
    ///
    /// # Errors
    ///
    /// Returns the query error, or a save error if the query succeeded.
    pub fn atomic_query(&mut self, query: &Value) -> Result<Value> {
        self.tracked(|db| db.atomic_query(query))
    }

    /// See [`Database::queries`].
    ///
    /// # Errors
    ///
    /// Returns the batch error, or a save error if the batch succeeded.
    pub fn queries(&mut self, queries: &Value) -> Result<Value> {
        self.tracked(|db| db.queries(queries))
    }

    /// See [`Database::atomic_queries`].
    ///
    /// # Errors
    ///
    /// Returns the batch error, or a save error if the batch succeeded.
    pub fn atomic_queries(&mut self, queries: &Value) -> Result<Value> {
        self.tracked(|db| db.atomic_queries(queries))
    }

    /// Serializes the database and saves it unconditionally.
    ///
    /// # Errors
    ///
    /// Returns [`JsonDbError::Json`] or the persister's error.
    pub fn save(&mut self) -> Result<()> {
        let text = if self.options.pretty {
            serde_json::to_string_pretty(&self.db)?
        } else {
            serde_json::to_string(&self.db)?
        };
        log::info!("Saving database '{}' ({} bytes)", self.db.name(), text.len());
        self.persister.save(&text)
    }

    /// Runs `f`, then saves if it advanced `updated`. Partial changes left
    /// by a failed non-atomic batch are saved too; if that save also fails,
    /// the query error wins and the save error is logged.
    fn tracked<F>(&mut self, f: F) -> Result<Value>
    where
        F: FnOnce(&mut Database) -> Result<Value>,
    {
        let before = self.db.updated();
        let result = f(&mut self.db);
        if self.db.updated() != before
            && self.options.save_on_change
            && self.persister.should_save(&self.db)
        {
            if let Err(save_err) = self.save() {
                if result.is_ok() {
                    return Err(save_err);
                }
                log::error!("Failed to save database '{}' after a failed query: {save_err}", self.db.name());
            }
        }
        result
    }
}
