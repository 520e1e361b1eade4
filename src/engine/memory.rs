//! In-process ordered engine backed by `BTreeMap`s.
//!
//! Every session shares one store behind a `parking_lot::RwLock`. Writes are
//! visible to other sessions at once. While a transaction is open, a session
//! journals the prior state of every row it touches, and `rollback` replays
//! that journal backwards, so other sessions' writes survive it. Append ids
//! are never handed out twice, even after a rollback. Table and index
//! creation is not journaled.

use std::collections::{BTreeMap, BTreeSet};
use std::ops::Bound;
use std::sync::Arc;

use ahash::AHashMap;
use parking_lot::{Mutex, RwLock};

use crate::errors::AtomGraphError;
use crate::schema::{
    ColumnType, CreateIndex, CreateTable, CursorTarget, Tuple, Value, display_tuple,
    parse_cursor_uri,
};

use super::{Cursor, CursorMode, CursorState, Engine, NearMatch, Row, Session, read_only};

#[derive(Clone, Default)]
pub struct MemoryEngine {
    store: Arc<RwLock<MemoryStore>>,
}

impl MemoryEngine {
    pub fn new() -> Self {
        Self::default()
    }
}

impl Engine for MemoryEngine {
    fn name(&self) -> &'static str {
        "memory"
    }

    fn open_session(&self) -> Result<Box<dyn Session>, AtomGraphError> {
        Ok(Box::new(MemorySession {
            store: Arc::clone(&self.store),
            journal: Journal::default(),
        }))
    }
}

#[derive(Default)]
struct MemoryStore {
    tables: AHashMap<String, MemoryTable>,
}

impl MemoryStore {
    fn table(&self, name: &str) -> Result<&MemoryTable, AtomGraphError> {
        self.tables
            .get(name)
            .ok_or_else(|| AtomGraphError::not_found(format!("table:{name}")))
    }

    fn table_mut(&mut self, name: &str) -> Result<&mut MemoryTable, AtomGraphError> {
        self.tables
            .get_mut(name)
            .ok_or_else(|| AtomGraphError::not_found(format!("table:{name}")))
    }
}

struct MemoryTable {
    layout: CreateTable,
    key_types: Vec<ColumnType>,
    value_types: Vec<ColumnType>,
    rows: BTreeMap<Tuple, Tuple>,
    last_id: u64,
    indices: AHashMap<String, MemoryIndex>,
}

impl MemoryTable {
    /// Position of a column within the concatenated key and value tuple.
    fn column_position(&self, column: &str) -> Option<usize> {
        self.layout.columns.iter().position(|c| c == column)
    }

    fn field<'a>(key: &'a Tuple, value: &'a Tuple, pos: usize) -> &'a Value {
        if pos < key.len() {
            &key[pos]
        } else {
            &value[pos - key.len()]
        }
    }

    /// Store a row, returning the value it replaced.
    fn put(&mut self, key: Tuple, value: Tuple) -> Option<Tuple> {
        let old = self.rows.remove(&key);
        for index in self.indices.values_mut() {
            if let Some(old) = &old {
                let stale = index.entry(&key, old);
                index.entries.remove(&stale);
            }
            let entry = index.entry(&key, &value);
            index.entries.insert(entry);
        }
        self.rows.insert(key, value);
        old
    }

    fn delete(&mut self, key: &Tuple) -> Option<Tuple> {
        let old = self.rows.remove(key)?;
        for index in self.indices.values_mut() {
            let stale = index.entry(key, &old);
            index.entries.remove(&stale);
        }
        Some(old)
    }
}

/// Prior state of one row, `None` when the row did not exist.
struct UndoEntry {
    table: String,
    key: Tuple,
    prior: Option<Tuple>,
}

/// Undo log of the open transaction, shared by a session and its cursors.
#[derive(Clone, Default)]
struct Journal(Arc<Mutex<Option<Vec<UndoEntry>>>>);

impl Journal {
    fn record(&self, table: &str, key: &Tuple, prior: Option<Tuple>) {
        if let Some(entries) = self.0.lock().as_mut() {
            entries.push(UndoEntry {
                table: table.to_string(),
                key: key.clone(),
                prior,
            });
        }
    }

    fn is_open(&self) -> bool {
        self.0.lock().is_some()
    }
}

struct MemoryIndex {
    layout: CreateIndex,
    positions: Vec<usize>,
    /// Index fields followed by the primary key, so duplicates stay ordered.
    entries: BTreeSet<Tuple>,
}

impl MemoryIndex {
    fn entry(&self, key: &Tuple, value: &Tuple) -> Tuple {
        let mut entry: Tuple = self
            .positions
            .iter()
            .map(|&pos| MemoryTable::field(key, value, pos).clone())
            .collect();
        entry.extend(key.iter().cloned());
        entry
    }
}

struct MemorySession {
    store: Arc<RwLock<MemoryStore>>,
    journal: Journal,
}

impl Session for MemorySession {
    fn create_table(&mut self, table: &CreateTable) -> Result<(), AtomGraphError> {
        let key_types = table.key_types()?;
        let value_types = table.value_types()?;
        if table.columns.len() != key_types.len() + value_types.len() {
            return Err(AtomGraphError::schema(format!(
                "{}: {} columns named for {} formats",
                table.uri(),
                table.columns.len(),
                key_types.len() + value_types.len()
            )));
        }
        let mut store = self.store.write();
        if let Some(existing) = store.tables.get(&table.name) {
            if existing.layout == *table {
                return Ok(());
            }
            return Err(AtomGraphError::already_exists(format!(
                "{} with config {}",
                table.uri(),
                existing.layout.config()
            )));
        }
        store.tables.insert(
            table.name.clone(),
            MemoryTable {
                layout: table.clone(),
                key_types,
                value_types,
                rows: BTreeMap::new(),
                last_id: 0,
                indices: AHashMap::new(),
            },
        );
        Ok(())
    }

    fn create_index(&mut self, index: &CreateIndex) -> Result<(), AtomGraphError> {
        let mut store = self.store.write();
        let table = store.table_mut(&index.table)?;
        if let Some(existing) = table.indices.get(&index.name) {
            if existing.layout == *index {
                return Ok(());
            }
            return Err(AtomGraphError::already_exists(index.uri()));
        }
        let positions = index
            .columns
            .iter()
            .map(|col| {
                table.column_position(col).ok_or_else(|| {
                    AtomGraphError::schema(format!("{}: unknown column '{col}'", index.uri()))
                })
            })
            .collect::<Result<Vec<_>, _>>()?;
        let mut built = MemoryIndex {
            layout: index.clone(),
            positions,
            entries: BTreeSet::new(),
        };
        for (key, value) in &table.rows {
            let entry = built.entry(key, value);
            built.entries.insert(entry);
        }
        table.indices.insert(index.name.clone(), built);
        Ok(())
    }

    fn open_cursor(
        &mut self,
        uri: &str,
        mode: CursorMode,
    ) -> Result<Box<dyn Cursor>, AtomGraphError> {
        let target = parse_cursor_uri(uri)?;
        let store = self.store.read();
        let cursor = match target {
            CursorTarget::Table(name) => {
                let table = store.table(&name)?;
                if mode == CursorMode::Append && !table.layout.is_append() {
                    return Err(AtomGraphError::invalid_input(format!(
                        "{uri}: append mode needs a record id key"
                    )));
                }
                MemoryCursor {
                    store: Arc::clone(&self.store),
                    journal: self.journal.clone(),
                    uri: uri.to_string(),
                    table: name,
                    index: None,
                    mode,
                    key_types: table.key_types.clone(),
                    value_types: table.value_types.clone(),
                    state: CursorState::default(),
                }
            }
            CursorTarget::Index {
                table,
                index,
                projection,
            } => {
                if mode == CursorMode::Append {
                    return Err(read_only(uri));
                }
                let mem_table = store.table(&table)?;
                let mem_index = mem_table
                    .indices
                    .get(&index)
                    .ok_or_else(|| AtomGraphError::not_found(format!("index:{table}:{index}")))?;
                let all_types: Vec<ColumnType> = mem_table
                    .key_types
                    .iter()
                    .chain(&mem_table.value_types)
                    .copied()
                    .collect();
                let key_types = mem_index.positions.iter().map(|&p| all_types[p]).collect();
                let projected = projection
                    .iter()
                    .map(|col| {
                        mem_table.column_position(col).ok_or_else(|| {
                            AtomGraphError::schema(format!("{uri}: unknown column '{col}'"))
                        })
                    })
                    .collect::<Result<Vec<_>, _>>()?;
                let value_types = projected.iter().map(|&p| all_types[p]).collect();
                MemoryCursor {
                    store: Arc::clone(&self.store),
                    journal: self.journal.clone(),
                    uri: uri.to_string(),
                    table,
                    index: Some(IndexTarget {
                        name: index,
                        key_len: mem_index.positions.len(),
                        projection: projected,
                    }),
                    mode,
                    key_types,
                    value_types,
                    state: CursorState::default(),
                }
            }
        };
        Ok(Box::new(cursor))
    }

    fn begin(&mut self) -> Result<(), AtomGraphError> {
        let mut journal = self.journal.0.lock();
        if journal.is_some() {
            return Err(AtomGraphError::transaction("transaction already open"));
        }
        *journal = Some(Vec::new());
        Ok(())
    }

    fn commit(&mut self) -> Result<(), AtomGraphError> {
        self.journal
            .0
            .lock()
            .take()
            .map(|_| ())
            .ok_or_else(|| AtomGraphError::transaction("commit without open transaction"))
    }

    fn rollback(&mut self) -> Result<(), AtomGraphError> {
        let entries = self
            .journal
            .0
            .lock()
            .take()
            .ok_or_else(|| AtomGraphError::transaction("rollback without open transaction"))?;
        let mut store = self.store.write();
        for entry in entries.into_iter().rev() {
            let table = store.table_mut(&entry.table)?;
            match entry.prior {
                Some(prior) => {
                    table.put(entry.key, prior);
                }
                None => {
                    table.delete(&entry.key);
                }
            }
        }
        Ok(())
    }

    fn in_transaction(&self) -> bool {
        self.journal.is_open()
    }
}

struct IndexTarget {
    name: String,
    key_len: usize,
    projection: Vec<usize>,
}

struct MemoryCursor {
    store: Arc<RwLock<MemoryStore>>,
    journal: Journal,
    uri: String,
    table: String,
    index: Option<IndexTarget>,
    mode: CursorMode,
    key_types: Vec<ColumnType>,
    value_types: Vec<ColumnType>,
    state: CursorState,
}

impl MemoryCursor {
    /// Find the first physical key within `lower`, or the last one when `last` is set.
    fn locate(
        &self,
        lower: Bound<&Tuple>,
        last: bool,
    ) -> Result<Option<Row>, AtomGraphError> {
        let store = self.store.read();
        let table = store.table(&self.table)?;
        match &self.index {
            None => {
                let found = if last {
                    table.rows.iter().next_back()
                } else {
                    table.rows.range::<Tuple, _>((lower, Bound::Unbounded)).next()
                };
                Ok(found.map(|(key, value)| Row {
                    physical: key.clone(),
                    key: key.clone(),
                    value: value.clone(),
                }))
            }
            Some(target) => {
                let index = table
                    .indices
                    .get(&target.name)
                    .ok_or_else(|| AtomGraphError::not_found(self.uri.clone()))?;
                let found = if last {
                    index.entries.iter().next_back()
                } else {
                    index.entries.range::<Tuple, _>((lower, Bound::Unbounded)).next()
                };
                match found {
                    Some(entry) => {
                        let pk = entry[target.key_len..].to_vec();
                        let value = table.rows.get(&pk).ok_or_else(|| {
                            AtomGraphError::engine(
                                "index lookup",
                                format!("{} points at missing row {}", self.uri, display_tuple(&pk)),
                            )
                        })?;
                        let projected = target
                            .projection
                            .iter()
                            .map(|&pos| MemoryTable::field(&pk, value, pos).clone())
                            .collect();
                        Ok(Some(Row {
                            physical: entry.clone(),
                            key: entry[..target.key_len].to_vec(),
                            value: projected,
                        }))
                    }
                    None => Ok(None),
                }
            }
        }
    }

    fn ensure_writable(&self) -> Result<(), AtomGraphError> {
        if self.index.is_some() {
            return Err(read_only(&self.uri));
        }
        Ok(())
    }
}

impl Cursor for MemoryCursor {
    fn uri(&self) -> &str {
        &self.uri
    }

    fn key_types(&self) -> &[ColumnType] {
        &self.key_types
    }

    fn value_types(&self) -> &[ColumnType] {
        &self.value_types
    }

    fn set_key(&mut self, key: Tuple) {
        self.state.set_key(key);
    }

    fn set_value(&mut self, value: Tuple) {
        self.state.set_value(value);
    }

    fn search(&mut self) -> Result<bool, AtomGraphError> {
        let key = self.state.take_full_key(&self.uri, &self.key_types)?;
        let row = self
            .locate(Bound::Included(&key), false)?
            .filter(|row| row.key == key);
        Ok(self.state.place(row))
    }

    fn search_near(&mut self) -> Result<NearMatch, AtomGraphError> {
        let target = self.state.take_key(&self.uri, &self.key_types)?;
        if let Some(row) = self.locate(Bound::Included(&target), false)? {
            self.state.place(Some(row));
            return Ok(NearMatch::AtOrAfter);
        }
        match self.locate(Bound::Unbounded, true)? {
            Some(row) => {
                self.state.place(Some(row));
                Ok(NearMatch::Before)
            }
            None => {
                self.state.place(None);
                Ok(NearMatch::NotFound)
            }
        }
    }

    fn next(&mut self) -> Result<bool, AtomGraphError> {
        let row = match self.state.position() {
            Some(current) => {
                let after = current.physical.clone();
                self.locate(Bound::Excluded(&after), false)?
            }
            None => self.locate(Bound::Unbounded, false)?,
        };
        Ok(self.state.place(row))
    }

    fn key(&self) -> Result<Tuple, AtomGraphError> {
        self.state.key(&self.uri)
    }

    fn value(&self) -> Result<Tuple, AtomGraphError> {
        self.state.value(&self.uri)
    }

    fn insert(&mut self) -> Result<(), AtomGraphError> {
        self.ensure_writable()?;
        let value = self.state.take_value(&self.uri, &self.value_types)?;
        let mut store = self.store.write();
        let table = store.table_mut(&self.table)?;
        let key = match self.mode {
            CursorMode::Append => {
                self.state.discard_key();
                table.last_id += 1;
                vec![Value::RecordId(table.last_id)]
            }
            CursorMode::Standard => {
                let key = self.state.take_full_key(&self.uri, &self.key_types)?;
                if table.rows.contains_key(&key) {
                    return Err(AtomGraphError::already_exists(format!(
                        "{} key {}",
                        self.uri,
                        display_tuple(&key)
                    )));
                }
                if let Some(id) = key.first().and_then(|f| match f {
                    Value::RecordId(id) => Some(*id),
                    _ => None,
                }) {
                    table.last_id = table.last_id.max(id);
                }
                key
            }
        };
        let prior = table.put(key.clone(), value.clone());
        self.journal.record(&self.table, &key, prior);
        self.state.place(Some(Row {
            physical: key.clone(),
            key,
            value,
        }));
        Ok(())
    }

    fn update(&mut self) -> Result<(), AtomGraphError> {
        self.ensure_writable()?;
        let key = self.state.target_key(&self.uri, &self.key_types)?;
        let value = self.state.take_value(&self.uri, &self.value_types)?;
        let mut store = self.store.write();
        let table = store.table_mut(&self.table)?;
        if !table.rows.contains_key(&key) {
            return Err(AtomGraphError::not_found(format!(
                "{} key {}",
                self.uri,
                display_tuple(&key)
            )));
        }
        let prior = table.put(key.clone(), value.clone());
        self.journal.record(&self.table, &key, prior);
        self.state.place(Some(Row {
            physical: key.clone(),
            key,
            value,
        }));
        Ok(())
    }

    fn remove(&mut self) -> Result<(), AtomGraphError> {
        self.ensure_writable()?;
        let key = self.state.target_key(&self.uri, &self.key_types)?;
        let mut store = self.store.write();
        let table = store.table_mut(&self.table)?;
        let Some(prior) = table.delete(&key) else {
            return Err(AtomGraphError::not_found(format!(
                "{} key {}",
                self.uri,
                display_tuple(&key)
            )));
        };
        self.journal.record(&self.table, &key, Some(prior));
        self.state.place(None);
        Ok(())
    }

    fn reset(&mut self) -> Result<(), AtomGraphError> {
        self.state.reset();
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::schema::{IndexDecl, TableDecl, compile};

    fn session_with(decl: TableDecl) -> Box<dyn Session> {
        let engine = MemoryEngine::new();
        let mut session = engine.open_session().unwrap();
        compile(&[decl]).unwrap().apply(session.as_mut()).unwrap();
        session
    }

    #[test]
    fn test_append_ids_increase_after_remove() {
        let mut session = session_with(
            TableDecl::new("notes")
                .key("id", ColumnType::RecordId)
                .value("body", ColumnType::Str),
        );
        let mut append = session
            .open_cursor("table:notes", CursorMode::Append)
            .unwrap();
        let mut ids = Vec::new();
        for body in ["a", "b", "c"] {
            append.set_value(vec![Value::Str(body.into())]);
            append.insert().unwrap();
            ids.push(append.key().unwrap()[0].as_u64().unwrap());
        }
        assert_eq!(ids, vec![1, 2, 3]);

        let mut table = session
            .open_cursor("table:notes", CursorMode::Standard)
            .unwrap();
        table.set_key(vec![Value::RecordId(3)]);
        table.remove().unwrap();

        append.set_value(vec![Value::Str("d".into())]);
        append.insert().unwrap();
        assert_eq!(append.key().unwrap(), vec![Value::RecordId(4)]);
    }

    #[test]
    fn test_search_near_reports_before_past_the_end() {
        let mut session = session_with(TableDecl::new("t").key("a", ColumnType::Int));
        let mut cursor = session.open_cursor("table:t", CursorMode::Standard).unwrap();
        cursor.set_key(vec![Value::Int(5)]);
        assert_eq!(cursor.search_near().unwrap(), NearMatch::NotFound);

        cursor.set_key(vec![Value::Int(1)]);
        cursor.set_value(vec![]);
        cursor.insert().unwrap();
        cursor.set_key(vec![Value::Int(5)]);
        assert_eq!(cursor.search_near().unwrap(), NearMatch::Before);
        assert_eq!(cursor.key().unwrap(), vec![Value::Int(1)]);
        assert!(!cursor.next().unwrap());
    }

    #[test]
    fn test_index_cursor_is_read_only_and_projects() {
        let mut session = session_with(
            TableDecl::new("people")
                .key("id", ColumnType::RecordId)
                .value("name", ColumnType::Str)
                .value("age", ColumnType::UInt)
                .index(IndexDecl::new("by_age", ["age"]).project(["id", "name"])),
        );
        let mut append = session
            .open_cursor("table:people", CursorMode::Append)
            .unwrap();
        append.set_value(vec![Value::Str("ann".into()), Value::UInt(40)]);
        append.insert().unwrap();

        let mut index = session
            .open_cursor("index:people:by_age(id,name)", CursorMode::Standard)
            .unwrap();
        assert!(index.next().unwrap());
        assert_eq!(index.key().unwrap(), vec![Value::UInt(40)]);
        assert_eq!(
            index.value().unwrap(),
            vec![Value::RecordId(1), Value::Str("ann".into())]
        );
        assert!(index.remove().is_err());
    }

    #[test]
    fn test_rollback_restores_rows() {
        let mut session = session_with(TableDecl::new("t").key("a", ColumnType::Int));
        let mut cursor = session.open_cursor("table:t", CursorMode::Standard).unwrap();
        session.begin().unwrap();
        cursor.set_key(vec![Value::Int(7)]);
        cursor.insert().unwrap();
        session.rollback().unwrap();
        cursor.set_key(vec![Value::Int(7)]);
        assert!(!cursor.search().unwrap());
    }

    #[test]
    fn test_rollback_restores_updated_and_removed_rows() {
        let mut session = session_with(
            TableDecl::new("t")
                .key("a", ColumnType::Int)
                .value("b", ColumnType::Str)
                .index(IndexDecl::new("by_b", ["b"])),
        );
        let mut cursor = session.open_cursor("table:t", CursorMode::Standard).unwrap();
        for (a, b) in [(1, "one"), (2, "two")] {
            cursor.set_key(vec![Value::Int(a)]);
            cursor.set_value(vec![Value::Str(b.into())]);
            cursor.insert().unwrap();
        }
        session.begin().unwrap();
        cursor.set_key(vec![Value::Int(1)]);
        cursor.set_value(vec![Value::Str("uno".into())]);
        cursor.update().unwrap();
        cursor.set_key(vec![Value::Int(2)]);
        cursor.remove().unwrap();
        cursor.set_key(vec![Value::Int(2)]);
        cursor.set_value(vec![Value::Str("dos".into())]);
        cursor.insert().unwrap();
        session.rollback().unwrap();

        let mut index = session
            .open_cursor("index:t:by_b", CursorMode::Standard)
            .unwrap();
        let mut keys = Vec::new();
        while index.next().unwrap() {
            keys.push(index.key().unwrap());
        }
        assert_eq!(
            keys,
            vec![vec![Value::Str("one".into())], vec![Value::Str("two".into())]]
        );
    }

    #[test]
    fn test_rollback_keeps_other_session_writes() {
        let engine = MemoryEngine::new();
        let mut first = engine.open_session().unwrap();
        compile(&[TableDecl::new("t").key("a", ColumnType::Int)])
            .unwrap()
            .apply(first.as_mut())
            .unwrap();
        let mut second = engine.open_session().unwrap();
        let mut mine = first.open_cursor("table:t", CursorMode::Standard).unwrap();
        let mut theirs = second.open_cursor("table:t", CursorMode::Standard).unwrap();

        first.begin().unwrap();
        mine.set_key(vec![Value::Int(1)]);
        mine.insert().unwrap();
        theirs.set_key(vec![Value::Int(2)]);
        theirs.insert().unwrap();
        first.rollback().unwrap();

        theirs.set_key(vec![Value::Int(1)]);
        assert!(!theirs.search().unwrap());
        theirs.set_key(vec![Value::Int(2)]);
        assert!(theirs.search().unwrap());
    }

    #[test]
    fn test_rolled_back_append_id_is_not_reissued() {
        let mut session = session_with(
            TableDecl::new("notes")
                .key("id", ColumnType::RecordId)
                .value("body", ColumnType::Str),
        );
        let mut append = session
            .open_cursor("table:notes", CursorMode::Append)
            .unwrap();
        session.begin().unwrap();
        append.set_value(vec![Value::Str("lost".into())]);
        append.insert().unwrap();
        assert_eq!(append.key().unwrap(), vec![Value::RecordId(1)]);
        session.rollback().unwrap();

        append.set_value(vec![Value::Str("kept".into())]);
        append.insert().unwrap();
        assert_eq!(append.key().unwrap(), vec![Value::RecordId(2)]);
    }
}
