//! Collaborator contract for the ordered key/value engine.
//!
//! The graph layer never touches storage directly. It opens sessions on an
//! [`Engine`], creates tables and indices through a [`Session`], and drives
//! positionable [`Cursor`]s. Two engines are provided: an in-process
//! [`MemoryEngine`] and a [`SqliteEngine`] that maps each declared table onto
//! a SQLite table.
//!
//! All traits are object safe; contexts hold `Box<dyn Session>` and
//! `Box<dyn Cursor>` so the backend can be picked at runtime.

pub mod memory;
pub mod sqlite;

pub use memory::MemoryEngine;
pub use sqlite::SqliteEngine;

use crate::errors::AtomGraphError;
use crate::schema::{ColumnType, CreateIndex, CreateTable, Tuple, check_tuple};

/// Outcome of [`Cursor::search_near`].
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum NearMatch {
    /// No key at or after the target exists; the cursor sits on the last key.
    Before,
    /// The cursor sits on the smallest key greater than or equal to the target.
    AtOrAfter,
    /// The table or index is empty.
    NotFound,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Default)]
pub enum CursorMode {
    #[default]
    Standard,
    /// Inserts ignore the set key and receive the next surrogate id.
    Append,
}

pub trait Engine: Send + Sync {
    fn name(&self) -> &'static str;

    fn open_session(&self) -> Result<Box<dyn Session>, AtomGraphError>;
}

pub trait Session {
    /// Create a table. Re-creating it with an identical layout is a no-op.
    fn create_table(&mut self, table: &CreateTable) -> Result<(), AtomGraphError>;

    /// Create an index. Existing rows are indexed immediately.
    fn create_index(&mut self, index: &CreateIndex) -> Result<(), AtomGraphError>;

    fn open_cursor(&mut self, uri: &str, mode: CursorMode)
    -> Result<Box<dyn Cursor>, AtomGraphError>;

    fn begin(&mut self) -> Result<(), AtomGraphError>;

    fn commit(&mut self) -> Result<(), AtomGraphError>;

    fn rollback(&mut self) -> Result<(), AtomGraphError>;

    fn in_transaction(&self) -> bool;
}

/// A positionable handle over one table or index.
///
/// Keys and values are typed tuples. Index cursors are read-only: their key
/// is the index columns and their value is the projection requested in the
/// cursor URI.
pub trait Cursor {
    fn uri(&self) -> &str;

    fn key_types(&self) -> &[ColumnType];

    fn value_types(&self) -> &[ColumnType];

    fn set_key(&mut self, key: Tuple);

    fn set_value(&mut self, value: Tuple);

    /// Position on the row whose key equals the set key.
    fn search(&mut self) -> Result<bool, AtomGraphError>;

    /// Position near the set key, which may be a prefix of the full key.
    fn search_near(&mut self) -> Result<NearMatch, AtomGraphError>;

    /// Advance one row. An unpositioned cursor moves to the first row.
    fn next(&mut self) -> Result<bool, AtomGraphError>;

    fn key(&self) -> Result<Tuple, AtomGraphError>;

    fn value(&self) -> Result<Tuple, AtomGraphError>;

    fn insert(&mut self) -> Result<(), AtomGraphError>;

    fn update(&mut self) -> Result<(), AtomGraphError>;

    fn remove(&mut self) -> Result<(), AtomGraphError>;

    /// Drop the position and any set key or value.
    fn reset(&mut self) -> Result<(), AtomGraphError>;
}

/// A positioned row: its physical ordering key, its visible key and its value.
#[derive(Clone, Debug, PartialEq, Eq)]
pub(crate) struct Row {
    pub physical: Tuple,
    pub key: Tuple,
    pub value: Tuple,
}

/// Position and pending-argument bookkeeping shared by both engines.
#[derive(Debug, Default)]
pub(crate) struct CursorState {
    pending_key: Option<Tuple>,
    pending_value: Option<Tuple>,
    position: Option<Row>,
}

impl CursorState {
    pub fn set_key(&mut self, key: Tuple) {
        self.pending_key = Some(key);
    }

    pub fn set_value(&mut self, value: Tuple) {
        self.pending_value = Some(value);
    }

    pub fn discard_key(&mut self) {
        self.pending_key = None;
    }

    /// The set key, checked against `types`. Shorter keys are allowed.
    pub fn take_key(
        &mut self,
        uri: &str,
        types: &[ColumnType],
    ) -> Result<Tuple, AtomGraphError> {
        let key = self
            .pending_key
            .take()
            .ok_or_else(|| AtomGraphError::invalid_input(format!("{uri}: no key set")))?;
        check_tuple(&key, types, "key")?;
        Ok(key)
    }

    /// The set key, which must cover every key column.
    pub fn take_full_key(
        &mut self,
        uri: &str,
        types: &[ColumnType],
    ) -> Result<Tuple, AtomGraphError> {
        let key = self.take_key(uri, types)?;
        if key.len() != types.len() {
            return Err(AtomGraphError::invalid_input(format!(
                "{uri}: expected {} key fields, got {}",
                types.len(),
                key.len()
            )));
        }
        Ok(key)
    }

    /// The set key if there is one, otherwise the key of the current row.
    pub fn target_key(
        &mut self,
        uri: &str,
        types: &[ColumnType],
    ) -> Result<Tuple, AtomGraphError> {
        if self.pending_key.is_some() {
            return self.take_full_key(uri, types);
        }
        self.position
            .as_ref()
            .map(|row| row.key.clone())
            .ok_or_else(|| AtomGraphError::invalid_input(format!("{uri}: no key set")))
    }

    pub fn take_value(
        &mut self,
        uri: &str,
        types: &[ColumnType],
    ) -> Result<Tuple, AtomGraphError> {
        let value = self.pending_value.take().unwrap_or_default();
        check_tuple(&value, types, "value")?;
        if value.len() != types.len() {
            return Err(AtomGraphError::invalid_input(format!(
                "{uri}: expected {} value fields, got {}",
                types.len(),
                value.len()
            )));
        }
        Ok(value)
    }

    pub fn position(&self) -> Option<&Row> {
        self.position.as_ref()
    }

    pub fn place(&mut self, row: Option<Row>) -> bool {
        self.position = row;
        self.position.is_some()
    }

    pub fn key(&self, uri: &str) -> Result<Tuple, AtomGraphError> {
        self.position
            .as_ref()
            .map(|row| row.key.clone())
            .ok_or_else(|| AtomGraphError::invalid_input(format!("{uri}: cursor not positioned")))
    }

    pub fn value(&self, uri: &str) -> Result<Tuple, AtomGraphError> {
        self.position
            .as_ref()
            .map(|row| row.value.clone())
            .ok_or_else(|| AtomGraphError::invalid_input(format!("{uri}: cursor not positioned")))
    }

    pub fn reset(&mut self) {
        self.pending_key = None;
        self.pending_value = None;
        self.position = None;
    }
}

pub(crate) fn read_only(uri: &str) -> AtomGraphError {
    AtomGraphError::invalid_input(format!("{uri}: index cursors are read-only"))
}
