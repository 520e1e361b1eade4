//! Ordered engine over SQLite.
//!
//! Each declared table becomes a SQLite table whose primary key is the
//! declared key; append tables use `INTEGER PRIMARY KEY AUTOINCREMENT` so
//! surrogate ids are never reused after a remove. `sqlite_sequence` rolls
//! back with the transaction, so the engine also keeps the highest id it has
//! handed out per table and never issues one at or below it. That mark lives
//! in the engine value: ids from a rolled-back transaction may come back
//! after the database is reopened by a new engine. Each declared index becomes a SQL index
//! over the index columns followed by the primary key, which is also the
//! order index cursors walk in. A catalog table records every layout so a
//! fresh session can reopen cursors without the original declarations.
//!
//! Every session owns its own connection. Cursors share it through an `Rc`,
//! which keeps a session and its cursors on one thread.

use std::collections::BTreeMap;
use std::path::Path;
use std::rc::Rc;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use ahash::AHashMap;
use parking_lot::Mutex;
use rusqlite::types::Value as SqlValue;
use rusqlite::{Connection, OpenFlags, OptionalExtension, params, params_from_iter};

use crate::config::SqliteConfig;
use crate::errors::AtomGraphError;
use crate::schema::{
    ColumnType, CreateIndex, CreateTable, CursorTarget, Tuple, Value, display_tuple,
    ensure_identifier, parse_cursor_uri,
};

use super::{Cursor, CursorMode, CursorState, Engine, NearMatch, Row, Session, read_only};

static MEMORY_DB_COUNTER: AtomicU64 = AtomicU64::new(0);

/// Highest append id handed out per table, shared by every session of an engine.
type IssuedIds = Arc<Mutex<AHashMap<String, u64>>>;

const CATALOG_DDL: &str = r#"
    CREATE TABLE IF NOT EXISTS atomgraph_catalog (
        uri          TEXT PRIMARY KEY,
        kind         TEXT NOT NULL,
        table_name   TEXT NOT NULL,
        key_format   TEXT NOT NULL,
        value_format TEXT NOT NULL,
        columns      TEXT NOT NULL
    );
"#;

pub struct SqliteEngine {
    location: String,
    config: SqliteConfig,
    // Keeps a shared-cache in-memory database alive between sessions.
    anchor: Mutex<Option<Connection>>,
    issued: IssuedIds,
}

impl SqliteEngine {
    pub fn open<P: AsRef<Path>>(path: P, config: &SqliteConfig) -> Result<Self, AtomGraphError> {
        let engine = Self {
            location: path.as_ref().to_string_lossy().into_owned(),
            config: config.clone(),
            anchor: Mutex::new(None),
            issued: IssuedIds::default(),
        };
        engine.connect()?;
        Ok(engine)
    }

    pub fn open_in_memory(config: &SqliteConfig) -> Result<Self, AtomGraphError> {
        let n = MEMORY_DB_COUNTER.fetch_add(1, Ordering::Relaxed);
        let engine = Self {
            location: format!(
                "file:atomgraph-mem-{}-{n}?mode=memory&cache=shared",
                std::process::id()
            ),
            config: config.clone(),
            anchor: Mutex::new(None),
            issued: IssuedIds::default(),
        };
        let anchor = engine.connect()?;
        *engine.anchor.lock() = Some(anchor);
        Ok(engine)
    }

    fn connect(&self) -> Result<Connection, AtomGraphError> {
        let conn = Connection::open_with_flags(&self.location, OpenFlags::default())
            .map_err(|e| AtomGraphError::engine("open", e))?;
        conn.set_prepared_statement_cache_capacity(128);
        if let Some(ms) = self.config.busy_timeout_ms {
            conn.busy_timeout(Duration::from_millis(ms))
                .map_err(|e| AtomGraphError::engine("busy_timeout", e))?;
        }
        let pragmas: BTreeMap<&String, &String> = self.config.pragma_settings.iter().collect();
        for (key, value) in pragmas {
            let pragma_sql = format!("PRAGMA {key} = {value}");
            match conn.execute(&pragma_sql, []) {
                Ok(_) => {}
                // Some PRAGMAs report their new value as a result row.
                Err(rusqlite::Error::ExecuteReturnedResults) => {}
                Err(e) => {
                    return Err(AtomGraphError::engine(
                        "pragma",
                        format!("PRAGMA {key} = {value}: {e}"),
                    ));
                }
            }
        }
        conn.execute_batch(CATALOG_DDL)
            .map_err(|e| AtomGraphError::engine("catalog", e))?;
        Ok(conn)
    }
}

impl Engine for SqliteEngine {
    fn name(&self) -> &'static str {
        "sqlite"
    }

    fn open_session(&self) -> Result<Box<dyn Session>, AtomGraphError> {
        Ok(Box::new(SqliteSession {
            conn: Rc::new(self.connect()?),
            issued: Arc::clone(&self.issued),
            in_tx: false,
        }))
    }
}

struct SqliteSession {
    conn: Rc<Connection>,
    issued: IssuedIds,
    in_tx: bool,
}

impl Session for SqliteSession {
    fn create_table(&mut self, table: &CreateTable) -> Result<(), AtomGraphError> {
        ensure_identifier(&table.name, "table")?;
        for column in &table.columns {
            ensure_identifier(column, "column")?;
        }
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
        if let Some(existing) = find_table(&self.conn, &table.name)? {
            if existing == *table {
                return Ok(());
            }
            return Err(AtomGraphError::already_exists(format!(
                "{} with config {}",
                table.uri(),
                existing.config()
            )));
        }
        self.conn
            .execute_batch(&table_ddl(table, &key_types, &value_types))
            .map_err(|e| AtomGraphError::engine("create table", e))?;
        self.conn
            .execute(
                "INSERT INTO atomgraph_catalog(uri, kind, table_name, key_format, value_format, columns)
                 VALUES(?1, 'table', ?2, ?3, ?4, ?5)",
                params![
                    table.uri(),
                    table.name,
                    table.key_format,
                    table.value_format,
                    table.columns.join(","),
                ],
            )
            .map_err(|e| AtomGraphError::engine("create table", e))?;
        Ok(())
    }

    fn create_index(&mut self, index: &CreateIndex) -> Result<(), AtomGraphError> {
        ensure_identifier(&index.name, "index")?;
        let table = load_table(&self.conn, &index.table)?;
        for column in &index.columns {
            if !table.columns.contains(column) {
                return Err(AtomGraphError::schema(format!(
                    "{}: unknown column '{column}'",
                    index.uri()
                )));
            }
        }
        if let Some(existing) = find_index(&self.conn, &index.table, &index.name)? {
            if existing == *index {
                return Ok(());
            }
            return Err(AtomGraphError::already_exists(index.uri()));
        }
        let ordered: Vec<String> = index
            .columns
            .iter()
            .chain(table.key_columns())
            .map(|c| quote(c))
            .collect();
        let ddl = format!(
            "CREATE INDEX IF NOT EXISTS {} ON {} ({})",
            quote(&format!("{}__{}", index.table, index.name)),
            quote(&index.table),
            ordered.join(", ")
        );
        self.conn
            .execute_batch(&ddl)
            .map_err(|e| AtomGraphError::engine("create index", e))?;
        self.conn
            .execute(
                "INSERT INTO atomgraph_catalog(uri, kind, table_name, key_format, value_format, columns)
                 VALUES(?1, 'index', ?2, '', '', ?3)",
                params![index.uri(), index.table, index.columns.join(",")],
            )
            .map_err(|e| AtomGraphError::engine("create index", e))?;
        Ok(())
    }

    fn open_cursor(
        &mut self,
        uri: &str,
        mode: CursorMode,
    ) -> Result<Box<dyn Cursor>, AtomGraphError> {
        let cursor = match parse_cursor_uri(uri)? {
            CursorTarget::Table(name) => {
                let layout = load_table(&self.conn, &name)?;
                if mode == CursorMode::Append && !layout.is_append() {
                    return Err(AtomGraphError::invalid_input(format!(
                        "{uri}: append mode needs a record id key"
                    )));
                }
                SqliteCursor::for_table(
                    Rc::clone(&self.conn),
                    Arc::clone(&self.issued),
                    uri,
                    &layout,
                    mode,
                )?
            }
            CursorTarget::Index {
                table,
                index,
                projection,
            } => {
                if mode == CursorMode::Append {
                    return Err(read_only(uri));
                }
                let layout = load_table(&self.conn, &table)?;
                let index = find_index(&self.conn, &table, &index)?
                    .ok_or_else(|| AtomGraphError::not_found(format!("index:{table}:{index}")))?;
                SqliteCursor::for_index(
                    Rc::clone(&self.conn),
                    Arc::clone(&self.issued),
                    uri,
                    &layout,
                    &index,
                    &projection,
                )?
            }
        };
        Ok(Box::new(cursor))
    }

    fn begin(&mut self) -> Result<(), AtomGraphError> {
        if self.in_tx {
            return Err(AtomGraphError::transaction("transaction already open"));
        }
        self.conn
            .execute_batch("BEGIN")
            .map_err(|e| AtomGraphError::transaction(e.to_string()))?;
        self.in_tx = true;
        Ok(())
    }

    fn commit(&mut self) -> Result<(), AtomGraphError> {
        if !self.in_tx {
            return Err(AtomGraphError::transaction("commit without open transaction"));
        }
        // A failed COMMIT leaves the transaction open for the caller to roll back.
        self.conn
            .execute_batch("COMMIT")
            .map_err(|e| AtomGraphError::transaction(e.to_string()))?;
        self.in_tx = false;
        Ok(())
    }

    fn rollback(&mut self) -> Result<(), AtomGraphError> {
        if !self.in_tx {
            return Err(AtomGraphError::transaction(
                "rollback without open transaction",
            ));
        }
        self.in_tx = false;
        self.conn
            .execute_batch("ROLLBACK")
            .map_err(|e| AtomGraphError::transaction(e.to_string()))
    }

    fn in_transaction(&self) -> bool {
        self.in_tx
    }
}

fn table_ddl(table: &CreateTable, key_types: &[ColumnType], value_types: &[ColumnType]) -> String {
    let mut defs = Vec::new();
    if table.is_append() {
        defs.push(format!(
            "{} INTEGER PRIMARY KEY AUTOINCREMENT",
            quote(&table.columns[0])
        ));
    } else {
        for (name, ty) in table.key_columns().iter().zip(key_types) {
            defs.push(format!("{} {} NOT NULL", quote(name), sql_type(*ty)));
        }
    }
    for (name, ty) in table.value_columns().iter().zip(value_types) {
        defs.push(format!("{} {} NOT NULL", quote(name), sql_type(*ty)));
    }
    if !table.is_append() {
        let pk: Vec<String> = table.key_columns().iter().map(|c| quote(c)).collect();
        defs.push(format!("PRIMARY KEY ({})", pk.join(", ")));
    }
    format!(
        "CREATE TABLE IF NOT EXISTS {} ({})",
        quote(&table.name),
        defs.join(", ")
    )
}

fn sql_type(ty: ColumnType) -> &'static str {
    match ty {
        ColumnType::RecordId | ColumnType::UInt | ColumnType::Int => "INTEGER",
        ColumnType::Str => "TEXT",
        ColumnType::Bytes => "BLOB",
    }
}

fn quote(name: &str) -> String {
    format!("\"{name}\"")
}

fn split_columns(columns: &str) -> Vec<String> {
    if columns.is_empty() {
        Vec::new()
    } else {
        columns.split(',').map(str::to_string).collect()
    }
}

fn find_table(conn: &Connection, name: &str) -> Result<Option<CreateTable>, AtomGraphError> {
    conn.query_row(
        "SELECT table_name, key_format, value_format, columns FROM atomgraph_catalog
         WHERE uri=?1 AND kind='table'",
        params![format!("table:{name}")],
        |row| {
            Ok(CreateTable {
                name: row.get(0)?,
                key_format: row.get(1)?,
                value_format: row.get(2)?,
                columns: split_columns(&row.get::<_, String>(3)?),
            })
        },
    )
    .optional()
    .map_err(|e| AtomGraphError::engine("catalog lookup", e))
}

fn load_table(conn: &Connection, name: &str) -> Result<CreateTable, AtomGraphError> {
    find_table(conn, name)?.ok_or_else(|| AtomGraphError::not_found(format!("table:{name}")))
}

fn find_index(
    conn: &Connection,
    table: &str,
    name: &str,
) -> Result<Option<CreateIndex>, AtomGraphError> {
    conn.query_row(
        "SELECT columns FROM atomgraph_catalog WHERE uri=?1 AND kind='index'",
        params![format!("index:{table}:{name}")],
        |row| {
            Ok(CreateIndex {
                table: table.to_string(),
                name: name.to_string(),
                columns: split_columns(&row.get::<_, String>(0)?),
            })
        },
    )
    .optional()
    .map_err(|e| AtomGraphError::engine("catalog lookup", e))
}

fn to_sql(value: &Value) -> Result<SqlValue, AtomGraphError> {
    Ok(match value {
        Value::RecordId(v) | Value::UInt(v) => SqlValue::Integer(i64::try_from(*v).map_err(
            |_| AtomGraphError::invalid_input(format!("unsigned value {v} exceeds i64::MAX")),
        )?),
        Value::Int(v) => SqlValue::Integer(*v),
        Value::Str(v) => SqlValue::Text(v.clone()),
        Value::Bytes(v) => SqlValue::Blob(v.clone()),
    })
}

fn from_sql(raw: SqlValue, ty: ColumnType) -> Result<Value, AtomGraphError> {
    match (raw, ty) {
        (SqlValue::Integer(v), ColumnType::RecordId) => u64::try_from(v)
            .map(Value::RecordId)
            .map_err(|_| AtomGraphError::engine("decode", format!("negative record id {v}"))),
        (SqlValue::Integer(v), ColumnType::UInt) => u64::try_from(v)
            .map(Value::UInt)
            .map_err(|_| AtomGraphError::engine("decode", format!("negative unsigned {v}"))),
        (SqlValue::Integer(v), ColumnType::Int) => Ok(Value::Int(v)),
        (SqlValue::Text(v), ColumnType::Str) => Ok(Value::Str(v)),
        (SqlValue::Blob(v), ColumnType::Bytes) => Ok(Value::Bytes(v)),
        (other, ty) => Err(AtomGraphError::engine(
            "decode",
            format!("stored {other:?} does not fit a {ty} column"),
        )),
    }
}

fn to_sql_all(tuple: &[Value]) -> Result<Vec<SqlValue>, AtomGraphError> {
    tuple.iter().map(to_sql).collect()
}

fn column_list(columns: &[String]) -> String {
    columns.iter().map(|c| quote(c)).collect::<Vec<_>>().join(", ")
}

fn placeholders(count: usize, first: usize) -> String {
    (first..first + count)
        .map(|n| format!("?{n}"))
        .collect::<Vec<_>>()
        .join(", ")
}

fn equals_clause(columns: &[String], first: usize) -> String {
    columns
        .iter()
        .enumerate()
        .map(|(i, c)| format!("{} = ?{}", quote(c), first + i))
        .collect::<Vec<_>>()
        .join(" AND ")
}

struct SqliteCursor {
    conn: Rc<Connection>,
    issued: IssuedIds,
    uri: String,
    table: String,
    mode: CursorMode,
    writable: bool,
    /// Columns the cursor walks in: the key, or the index columns then the primary key.
    order_columns: Vec<String>,
    order_types: Vec<ColumnType>,
    key_types: Vec<ColumnType>,
    value_columns: Vec<String>,
    value_types: Vec<ColumnType>,
    state: CursorState,
}

impl SqliteCursor {
    fn for_table(
        conn: Rc<Connection>,
        issued: IssuedIds,
        uri: &str,
        layout: &CreateTable,
        mode: CursorMode,
    ) -> Result<Self, AtomGraphError> {
        let key_types = layout.key_types()?;
        Ok(Self {
            conn,
            issued,
            uri: uri.to_string(),
            table: layout.name.clone(),
            mode,
            writable: true,
            order_columns: layout.key_columns().to_vec(),
            order_types: key_types.clone(),
            key_types,
            value_columns: layout.value_columns().to_vec(),
            value_types: layout.value_types()?,
            state: CursorState::default(),
        })
    }

    fn for_index(
        conn: Rc<Connection>,
        issued: IssuedIds,
        uri: &str,
        layout: &CreateTable,
        index: &CreateIndex,
        projection: &[String],
    ) -> Result<Self, AtomGraphError> {
        let all_types: Vec<ColumnType> = layout
            .key_types()?
            .into_iter()
            .chain(layout.value_types()?)
            .collect();
        let type_of = |column: &String| -> Result<ColumnType, AtomGraphError> {
            layout
                .columns
                .iter()
                .position(|c| c == column)
                .map(|pos| all_types[pos])
                .ok_or_else(|| AtomGraphError::schema(format!("{uri}: unknown column '{column}'")))
        };
        let key_types = index
            .columns
            .iter()
            .map(&type_of)
            .collect::<Result<Vec<_>, _>>()?;
        let mut order_columns = index.columns.clone();
        order_columns.extend(layout.key_columns().iter().cloned());
        let order_types = order_columns
            .iter()
            .map(&type_of)
            .collect::<Result<Vec<_>, _>>()?;
        let value_types = projection
            .iter()
            .map(&type_of)
            .collect::<Result<Vec<_>, _>>()?;
        Ok(Self {
            conn,
            issued,
            uri: uri.to_string(),
            table: layout.name.clone(),
            mode: CursorMode::Standard,
            writable: false,
            order_columns,
            order_types,
            key_types,
            value_columns: projection.to_vec(),
            value_types,
            state: CursorState::default(),
        })
    }

    fn key_columns(&self) -> &[String] {
        &self.order_columns[..self.key_types.len()]
    }

    fn fetch_one(
        &self,
        filter: Option<String>,
        binds: &[SqlValue],
        descending: bool,
    ) -> Result<Option<Row>, AtomGraphError> {
        let direction = if descending { " DESC" } else { "" };
        let order = self
            .order_columns
            .iter()
            .map(|c| format!("{}{direction}", quote(c)))
            .collect::<Vec<_>>()
            .join(", ");
        let mut selected = self.order_columns.clone();
        selected.extend(self.value_columns.iter().cloned());
        let sql = format!(
            "SELECT {} FROM {}{} ORDER BY {order} LIMIT 1",
            column_list(&selected),
            quote(&self.table),
            filter.map(|f| format!(" WHERE {f}")).unwrap_or_default(),
        );
        let mut stmt = self
            .conn
            .prepare_cached(&sql)
            .map_err(|e| AtomGraphError::engine("prepare", e))?;
        let width = selected.len();
        let raw: Option<Vec<SqlValue>> = stmt
            .query_row(params_from_iter(binds.iter()), |row| {
                (0..width).map(|i| row.get::<_, SqlValue>(i)).collect()
            })
            .optional()
            .map_err(|e| AtomGraphError::engine("cursor read", e))?;
        let Some(raw) = raw else {
            return Ok(None);
        };
        let mut fields = Vec::with_capacity(width);
        for (value, ty) in raw
            .into_iter()
            .zip(self.order_types.iter().chain(&self.value_types))
        {
            fields.push(from_sql(value, *ty)?);
        }
        let value = fields.split_off(self.order_columns.len());
        Ok(Some(Row {
            key: fields[..self.key_types.len()].to_vec(),
            physical: fields,
            value,
        }))
    }

    fn fetch_exact(&self, key: &Tuple) -> Result<Option<Row>, AtomGraphError> {
        self.fetch_one(
            Some(equals_clause(self.key_columns(), 1)),
            &to_sql_all(key)?,
            false,
        )
    }

    /// One past the larger of `floor` and the table's `sqlite_sequence` entry.
    fn next_append_id(&self, floor: u64) -> Result<u64, AtomGraphError> {
        let seq: i64 = self
            .conn
            .prepare_cached("SELECT COALESCE(MAX(seq), 0) FROM sqlite_sequence WHERE name = ?1")
            .and_then(|mut stmt| stmt.query_row(params![self.table], |row| row.get(0)))
            .map_err(|e| AtomGraphError::engine("append", e))?;
        let seq = u64::try_from(seq).map_err(|e| AtomGraphError::engine("append", e))?;
        Ok(floor.max(seq) + 1)
    }

    fn ensure_writable(&self) -> Result<(), AtomGraphError> {
        if !self.writable {
            return Err(read_only(&self.uri));
        }
        Ok(())
    }

    fn missing(&self, key: &Tuple) -> AtomGraphError {
        AtomGraphError::not_found(format!("{} key {}", self.uri, display_tuple(key)))
    }
}

impl Cursor for SqliteCursor {
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
        let row = self.fetch_exact(&key)?;
        Ok(self.state.place(row))
    }

    fn search_near(&mut self) -> Result<NearMatch, AtomGraphError> {
        let target = self.state.take_key(&self.uri, &self.key_types)?;
        let filter = if target.is_empty() {
            None
        } else {
            Some(format!(
                "({}) >= ({})",
                column_list(&self.order_columns[..target.len()]),
                placeholders(target.len(), 1)
            ))
        };
        if let Some(row) = self.fetch_one(filter, &to_sql_all(&target)?, false)? {
            self.state.place(Some(row));
            return Ok(NearMatch::AtOrAfter);
        }
        match self.fetch_one(None, &[], true)? {
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
                let filter = format!(
                    "({}) > ({})",
                    column_list(&self.order_columns),
                    placeholders(self.order_columns.len(), 1)
                );
                self.fetch_one(Some(filter), &to_sql_all(&current.physical)?, false)?
            }
            None => self.fetch_one(None, &[], false)?,
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
        let key = match self.mode {
            CursorMode::Append => {
                self.state.discard_key();
                let mut issued = self.issued.lock();
                let floor = issued.get(&self.table).copied().unwrap_or(0);
                let id = self.next_append_id(floor)?;
                let mut columns = self.order_columns.clone();
                columns.extend(self.value_columns.iter().cloned());
                let sql = format!(
                    "INSERT INTO {} ({}) VALUES ({})",
                    quote(&self.table),
                    column_list(&columns),
                    placeholders(columns.len(), 1)
                );
                let key = vec![Value::RecordId(id)];
                let mut binds = to_sql_all(&key)?;
                binds.extend(to_sql_all(&value)?);
                self.conn
                    .prepare_cached(&sql)
                    .and_then(|mut stmt| stmt.execute(params_from_iter(binds.iter())))
                    .map_err(|e| AtomGraphError::engine("append", e))?;
                issued.insert(self.table.clone(), id);
                key
            }
            CursorMode::Standard => {
                let key = self.state.take_full_key(&self.uri, &self.key_types)?;
                if self.fetch_exact(&key)?.is_some() {
                    return Err(AtomGraphError::already_exists(format!(
                        "{} key {}",
                        self.uri,
                        display_tuple(&key)
                    )));
                }
                let mut columns = self.order_columns.clone();
                columns.extend(self.value_columns.iter().cloned());
                let sql = format!(
                    "INSERT INTO {} ({}) VALUES ({})",
                    quote(&self.table),
                    column_list(&columns),
                    placeholders(columns.len(), 1)
                );
                let mut binds = to_sql_all(&key)?;
                binds.extend(to_sql_all(&value)?);
                self.conn
                    .prepare_cached(&sql)
                    .and_then(|mut stmt| stmt.execute(params_from_iter(binds.iter())))
                    .map_err(|e| AtomGraphError::engine("insert", e))?;
                key
            }
        };
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
        if self.value_columns.is_empty() {
            if self.fetch_exact(&key)?.is_none() {
                return Err(self.missing(&key));
            }
        } else {
            let assignments = self
                .value_columns
                .iter()
                .enumerate()
                .map(|(i, c)| format!("{} = ?{}", quote(c), i + 1))
                .collect::<Vec<_>>()
                .join(", ");
            let sql = format!(
                "UPDATE {} SET {assignments} WHERE {}",
                quote(&self.table),
                equals_clause(self.key_columns(), self.value_columns.len() + 1)
            );
            let mut binds = to_sql_all(&value)?;
            binds.extend(to_sql_all(&key)?);
            let affected = self
                .conn
                .prepare_cached(&sql)
                .and_then(|mut stmt| stmt.execute(params_from_iter(binds.iter())))
                .map_err(|e| AtomGraphError::engine("update", e))?;
            if affected == 0 {
                return Err(self.missing(&key));
            }
        }
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
        let sql = format!(
            "DELETE FROM {} WHERE {}",
            quote(&self.table),
            equals_clause(self.key_columns(), 1)
        );
        let binds = to_sql_all(&key)?;
        let affected = self
            .conn
            .prepare_cached(&sql)
            .and_then(|mut stmt| stmt.execute(params_from_iter(binds.iter())))
            .map_err(|e| AtomGraphError::engine("remove", e))?;
        if affected == 0 {
            return Err(self.missing(&key));
        }
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

    #[test]
    fn test_catalog_survives_new_session() {
        let engine = SqliteEngine::open_in_memory(&SqliteConfig::default()).unwrap();
        let decl = TableDecl::new("notes")
            .key("id", ColumnType::RecordId)
            .value("body", ColumnType::Str)
            .index(IndexDecl::new("by_body", ["body"]));
        {
            let mut session = engine.open_session().unwrap();
            compile(&[decl.clone()]).unwrap().apply(session.as_mut()).unwrap();
            let mut append = session
                .open_cursor("table:notes", CursorMode::Append)
                .unwrap();
            append.set_value(vec![Value::Str("hello".into())]);
            append.insert().unwrap();
        }
        let mut session = engine.open_session().unwrap();
        let mut index = session
            .open_cursor("index:notes:by_body", CursorMode::Standard)
            .unwrap();
        assert!(index.next().unwrap());
        assert_eq!(index.key().unwrap(), vec![Value::Str("hello".into())]);
        assert!(index.value().unwrap().is_empty());
    }

    #[test]
    fn test_recreating_table_with_other_layout_fails() {
        let engine = SqliteEngine::open_in_memory(&SqliteConfig::default()).unwrap();
        let mut session = engine.open_session().unwrap();
        let first = TableDecl::new("t").key("a", ColumnType::Int);
        compile(&[first.clone()]).unwrap().apply(session.as_mut()).unwrap();
        compile(&[first]).unwrap().apply(session.as_mut()).unwrap();
        let second = TableDecl::new("t").key("a", ColumnType::Str);
        let err = compile(&[second]).unwrap().apply(session.as_mut()).unwrap_err();
        assert!(matches!(err, AtomGraphError::AlreadyExists(_)));
    }

    #[test]
    fn test_unsigned_overflow_rejected() {
        let engine = SqliteEngine::open_in_memory(&SqliteConfig::default()).unwrap();
        let mut session = engine.open_session().unwrap();
        compile(&[TableDecl::new("t").key("a", ColumnType::UInt)])
            .unwrap()
            .apply(session.as_mut())
            .unwrap();
        let mut cursor = session.open_cursor("table:t", CursorMode::Standard).unwrap();
        cursor.set_key(vec![Value::UInt(u64::MAX)]);
        assert!(matches!(
            cursor.insert(),
            Err(AtomGraphError::InvalidInput(_))
        ));
    }
}
