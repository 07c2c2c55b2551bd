//! Stack-based snapshot/restore and the guard that drives it.

use crate::Result;
use std::ops::{Deref, DerefMut};

/// State that can be pushed, restored and discarded as a stack of snapshots.
pub trait Snapshot {
    /// Pushes a deep copy of the mutable state.
    fn save_state(&mut self);

    /// Pops the most recent snapshot and makes it the current state.
    ///
    /// # Errors
    ///
    /// Returns [`crate::JsonDbError::EmptySnapshotStack`] if nothing was saved.
    fn restore_state(&mut self) -> Result<()>;

    /// Pops the most recent snapshot without applying it.
    ///
    /// # Errors
    ///
    /// Returns [`crate::JsonDbError::EmptySnapshotStack`] if nothing was saved.
    fn ignore_state(&mut self) -> Result<()>;

    /// Number of snapshots currently on the stack.
    fn saved_states(&self) -> usize;
}

/// An open atomic section over `T`.
///
/// Creating the guard saves a snapshot. [`commit`](Self::commit) discards it;
/// dropping the guard without committing restores it, so every early return
/// through `?` rolls the state back.
///
/// ```rust
/// use jsondb_core::{Database, Transaction};
/// use serde_json::json;
///
/// let mut db = Database::new("shop", "1.0").unwrap();
/// {
///     let mut tx = Transaction::begin(&mut db);
///     tx.query(&json!(["name=", "renamed"])).unwrap();
///     // dropped without commit
/// }
/// assert_eq!(db.name(), "shop");
/// ```
pub struct Transaction<'a, T: Snapshot> {
    target: &'a mut T,
    open: bool,
}

impl<'a, T: Snapshot> Transaction<'a, T> {
    pub fn begin(target: &'a mut T) -> Self {
        target.save_state();
        Self { target, open: true }
    }

    /// Keeps every change made through the guard.
    ///
    /// # Errors
    ///
    /// Fails only if the snapshot stack was emptied behind the guard's back.
    pub fn commit(mut self) -> Result<()> {
        self.open = false;
        self.target.ignore_state()
    }

    /// Restores the state saved when the guard was created.
    ///
    /// # Errors
    ///
    /// Fails only if the snapshot stack was emptied behind the guard's back.
    pub fn rollback(mut self) -> Result<()> {
        self.open = false;
        self.target.restore_state()
    }
}

impl<T: Snapshot> Deref for Transaction<'_, T> {
    type Target = T;

    fn deref(&self) -> &T {
        self.target
    }
}

impl<T: Snapshot> DerefMut for Transaction<'_, T> {
    fn deref_mut(&mut self) -> &mut T {
        self.target
    }
}

impl<T: Snapshot> Drop for Transaction<'_, T> {
    fn drop(&mut self) {
        if self.open {
            if let Err(e) = self.target.restore_state() {
                log::error!("Failed to roll back transaction: {e}");
            }
        }
    }
}

/// Runs `f` atomically against `target`: on error the state is restored
/// before the error is returned.
///
/// # Errors
///
/// Returns whatever `f` returns.
pub fn atomically<T, R, F>(target: &mut T, f: F) -> Result<R>
where
    T: Snapshot,
    F: FnOnce(&mut T) -> Result<R>,
{
    let mut tx = Transaction::begin(target);
    match f(&mut *tx) {
        Ok(value) => {
            tx.commit()?;
            Ok(value)
        }
        Err(e) => {
            log::warn!("Rolling back after failure: {e}");
            tx.rollback()?;
            Err(e)
        }
    }
}
