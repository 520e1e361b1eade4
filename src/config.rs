//! Configuration for backend selection, backend options and id generation.

use std::collections::HashMap;
use std::path::Path;
use std::sync::Arc;

use crate::engine::{Engine, MemoryEngine, SqliteEngine};
use crate::errors::AtomGraphError;
use crate::graph::Graph;

/// Backend selection enum for choosing between engine implementations.
///
/// # Examples
///
/// ```rust
/// use atomgraph::{BackendKind, GraphConfig};
///
/// let cfg = GraphConfig::new(BackendKind::Memory);
/// assert_eq!(cfg.backend, BackendKind::Memory);
/// assert_eq!(GraphConfig::default().backend, BackendKind::SQLite);
/// ```
#[derive(Clone, Copy, Debug, PartialEq, Eq, Default)]
pub enum BackendKind {
    /// SQLite tables and indices, one connection per session.
    #[default]
    SQLite,
    /// In-process `BTreeMap` store. Nothing is written to disk.
    Memory,
}

/// Options applied to every SQLite session connection.
///
/// ```rust
/// use atomgraph::SqliteConfig;
/// let config = SqliteConfig::default();
/// assert!(config.pragma_settings.is_empty());
/// assert!(config.busy_timeout_ms.is_none());
/// ```
#[derive(Clone, Debug, Default)]
pub struct SqliteConfig {
    /// Additional PRAGMA settings, applied in key order after the connection opens.
    ///
    /// ```rust
    /// use atomgraph::GraphConfig;
    ///
    /// let mut cfg = GraphConfig::sqlite();
    /// cfg.sqlite.pragma_settings.insert("journal_mode".to_string(), "WAL".to_string());
    /// cfg.sqlite.pragma_settings.insert("synchronous".to_string(), "NORMAL".to_string());
    /// ```
    pub pragma_settings: HashMap<String, String>,

    /// How long a connection waits on a locked database before failing.
    pub busy_timeout_ms: Option<u64>,
}

/// Options for the UID generator used by namespace tables.
#[derive(Clone, Debug)]
pub struct UidConfig {
    /// Draws attempted before giving up with `IdSpaceExhausted`.
    pub max_attempts: u32,
    /// Fixed seed for a deterministic id stream; `None` seeds from entropy.
    pub seed: Option<u64>,
}

impl Default for UidConfig {
    fn default() -> Self {
        Self {
            max_attempts: 64,
            seed: None,
        }
    }
}

/// Complete configuration for opening a graph.
///
/// ```rust
/// use atomgraph::{BackendKind, GraphConfig};
///
/// let mut cfg = GraphConfig::memory();
/// cfg.uid.seed = Some(7);
/// cfg.uid.max_attempts = 16;
/// assert_eq!(cfg.backend, BackendKind::Memory);
/// ```
#[derive(Clone, Debug, Default)]
pub struct GraphConfig {
    pub backend: BackendKind,
    /// Only used when `backend` is [`BackendKind::SQLite`].
    pub sqlite: SqliteConfig,
    pub uid: UidConfig,
}

impl GraphConfig {
    pub fn new(backend: BackendKind) -> Self {
        Self {
            backend,
            ..Self::default()
        }
    }

    pub fn sqlite() -> Self {
        Self::new(BackendKind::SQLite)
    }

    pub fn memory() -> Self {
        Self::new(BackendKind::Memory)
    }
}

/// Open the engine selected by `cfg`. The memory backend ignores `path`.
pub fn open_engine<P: AsRef<Path>>(
    path: P,
    cfg: &GraphConfig,
) -> Result<Arc<dyn Engine>, AtomGraphError> {
    match cfg.backend {
        BackendKind::SQLite => Ok(Arc::new(SqliteEngine::open(path, &cfg.sqlite)?)),
        BackendKind::Memory => Ok(Arc::new(MemoryEngine::new())),
    }
}

/// Open an engine, start a session on it and bind a graph to that session.
///
/// ```rust
/// use atomgraph::{Atom, GraphConfig, open_graph};
///
/// let mut graph = open_graph("unused-for-memory", &GraphConfig::memory())?;
/// let saved = graph.save(&Atom::new().set("name", "alpha"))?;
/// assert!(saved.id().is_some());
/// # Ok::<(), atomgraph::AtomGraphError>(())
/// ```
pub fn open_graph<P: AsRef<Path>>(path: P, cfg: &GraphConfig) -> Result<Graph, AtomGraphError> {
    let engine = open_engine(path, cfg)?;
    Graph::open(engine.as_ref(), cfg)
}
