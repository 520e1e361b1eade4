//! Execution contexts: one session plus one named cursor per table, per
//! index, and per append-keyed table.
//!
//! A context is used by one thread. Each table or index has exactly one
//! cursor here; callers needing two independent positions on the same table
//! open a second context on a second session.

use std::panic::{self, AssertUnwindSafe};
use std::sync::Arc;
use std::thread;

use ahash::AHashMap;

use crate::engine::{Cursor, CursorMode, Session};
use crate::errors::AtomGraphError;
use crate::metrics::{GraphMetrics, GraphMetricsSnapshot};
use crate::scan::{ScanRow, counted_scan};
use crate::schema::{TableDecl, Value, compile, index_cursor_uri};

/// A cursor a context opens: its name in the context, its URI and its mode.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct CursorDecl {
    pub name: String,
    pub uri: String,
    pub mode: CursorMode,
}

/// Cursors for `tables`: `table`, then `table-index` per index, then `table-append`.
pub fn cursor_decls(tables: &[TableDecl]) -> Vec<CursorDecl> {
    let mut decls = Vec::new();
    for table in tables {
        decls.push(CursorDecl {
            name: table.name.clone(),
            uri: format!("table:{}", table.name),
            mode: CursorMode::Standard,
        });
        for index in &table.indices {
            decls.push(CursorDecl {
                name: format!("{}-{}", table.name, index.name),
                uri: index_cursor_uri(&table.name, index),
                mode: CursorMode::Standard,
            });
        }
        if table.is_append() {
            decls.push(CursorDecl {
                name: format!("{}-append", table.name),
                uri: format!("table:{}", table.name),
                mode: CursorMode::Append,
            });
        }
    }
    decls
}

pub struct Context {
    session: Box<dyn Session>,
    cursors: AHashMap<String, Box<dyn Cursor>>,
    metrics: Arc<GraphMetrics>,
}

impl Context {
    /// Open cursors for tables that already exist in the session's store.
    pub fn open(session: Box<dyn Session>, tables: &[TableDecl]) -> Result<Self, AtomGraphError> {
        let mut ctx = Self {
            session,
            cursors: AHashMap::new(),
            metrics: Arc::new(GraphMetrics::default()),
        };
        for decl in cursor_decls(tables) {
            let cursor = ctx.session.open_cursor(&decl.uri, decl.mode)?;
            ctx.metrics.record_cursor_open();
            ctx.cursors.insert(decl.name, cursor);
        }
        tracing::debug!(cursors = ctx.cursors.len(), "context opened");
        Ok(ctx)
    }

    /// Compile `tables`, create them through `session`, then open the context.
    pub fn create(
        mut session: Box<dyn Session>,
        tables: &[TableDecl],
    ) -> Result<Self, AtomGraphError> {
        compile(tables)?.apply(session.as_mut())?;
        Self::open(session, tables)
    }

    pub fn cursor(&mut self, name: &str) -> Result<&mut dyn Cursor, AtomGraphError> {
        match self.cursors.get_mut(name) {
            Some(cursor) => Ok(cursor.as_mut()),
            None => Err(AtomGraphError::not_found(format!("cursor '{name}'"))),
        }
    }

    pub fn has_cursor(&self, name: &str) -> bool {
        self.cursors.contains_key(name)
    }

    /// Cursor names in ascending order.
    pub fn cursor_names(&self) -> Vec<&str> {
        let mut names: Vec<&str> = self.cursors.keys().map(String::as_str).collect();
        names.sort_unstable();
        names
    }

    /// Run [`range_scan`](crate::scan::range_scan) on the named cursor.
    pub fn scan(&mut self, name: &str, prefix: &[Value]) -> Result<Vec<ScanRow>, AtomGraphError> {
        let (rows, visited) = counted_scan(self.cursor(name)?, prefix)?;
        self.metrics.record_scan(visited, rows.len());
        Ok(rows)
    }

    pub fn session(&mut self) -> &mut dyn Session {
        self.session.as_mut()
    }

    pub fn in_transaction(&self) -> bool {
        self.session.in_transaction()
    }

    /// Run `work` against the named cursor, resetting it afterwards whether
    /// or not `work` succeeded.
    pub fn with_cursor<T, F>(&mut self, name: &str, work: F) -> Result<T, AtomGraphError>
    where
        F: FnOnce(&mut dyn Cursor) -> Result<T, AtomGraphError>,
    {
        let cursor = self.cursor(name)?;
        let outcome = work(&mut *cursor);
        let reset = cursor.reset();
        let value = outcome?;
        reset?;
        Ok(value)
    }

    /// Run `work` inside a transaction.
    ///
    /// Commits when `work` returns `Ok`. Rolls back when it returns `Err`
    /// or panics; a panic is resumed once the rollback has run. Transactions
    /// do not nest.
    pub fn transaction<T, F>(&mut self, work: F) -> Result<T, AtomGraphError>
    where
        F: FnOnce(&mut Context) -> Result<T, AtomGraphError>,
    {
        scoped(self, |ctx| ctx, work)
    }

    fn begin_scope(&mut self) -> Result<(), AtomGraphError> {
        if self.session.in_transaction() {
            return Err(AtomGraphError::transaction(
                "nested transactions are not supported",
            ));
        }
        self.session.begin()?;
        self.metrics.record_begin();
        Ok(())
    }

    fn finish_scope<T>(
        &mut self,
        outcome: thread::Result<Result<T, AtomGraphError>>,
    ) -> Result<T, AtomGraphError> {
        match outcome {
            Ok(Ok(value)) => match self.session.commit() {
                Ok(()) => {
                    self.metrics.record_commit();
                    Ok(value)
                }
                Err(err) => {
                    self.abort(&err.to_string());
                    Err(err)
                }
            },
            Ok(Err(err)) => {
                self.abort(&err.to_string());
                Err(err)
            }
            Err(payload) => {
                self.abort("panic");
                panic::resume_unwind(payload)
            }
        }
    }

    /// Roll back and reset every cursor. Failures here are logged so the
    /// error that caused the abort reaches the caller.
    fn abort(&mut self, reason: &str) {
        tracing::warn!(reason, "rolling back transaction");
        if self.session.in_transaction() {
            match self.session.rollback() {
                Ok(()) => self.metrics.record_rollback(),
                Err(err) => tracing::warn!(error = %err, "rollback failed"),
            }
        }
        for cursor in self.cursors.values_mut() {
            if let Err(err) = cursor.reset() {
                tracing::warn!(cursor = cursor.uri(), error = %err, "cursor reset failed");
            }
        }
    }

    pub fn metrics_snapshot(&self) -> GraphMetricsSnapshot {
        self.metrics.snapshot()
    }

    pub fn reset_metrics(&self) {
        self.metrics.reset();
    }
}

/// Run `work` on `host` inside a transaction of the context `context` reaches.
pub(crate) fn scoped<H, T, F>(
    host: &mut H,
    context: fn(&mut H) -> &mut Context,
    work: F,
) -> Result<T, AtomGraphError>
where
    F: FnOnce(&mut H) -> Result<T, AtomGraphError>,
{
    context(host).begin_scope()?;
    let outcome = panic::catch_unwind(AssertUnwindSafe(|| work(&mut *host)));
    context(host).finish_scope(outcome)
}
