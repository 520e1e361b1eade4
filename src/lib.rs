//! A small atom/arrow graph store layered over an ordered key/value engine.
//!
//! Tables and indices are declared with [`schema::TableDecl`], compiled into
//! engine creation commands and driven through named cursors held by a
//! [`context::Context`]. Prefix range scans ([`scan::range_scan`]) treat zero
//! fields as wildcards. [`Graph`] stores atoms and arrows on top of those
//! pieces. Two engines ship: SQLite and an in-process memory store.
//!
//! Run Criterion benchmarks with `cargo bench` to inspect reports under `target/criterion`.

pub mod config;
pub mod context;
pub mod engine;
pub mod errors;
pub mod graph;
pub mod metrics;
pub mod scan;
pub mod schema;
pub mod uid;

pub use crate::config::{BackendKind, GraphConfig, SqliteConfig, UidConfig, open_engine, open_graph};
pub use crate::context::Context;
pub use crate::engine::{Cursor, CursorMode, Engine, MemoryEngine, NearMatch, Session, SqliteEngine};
pub use crate::errors::AtomGraphError;
pub use crate::graph::{Arrow, Atom, Graph, Namespace, NamespaceNode};
pub use crate::metrics::GraphMetricsSnapshot;
pub use crate::scan::{ScanRow, range_scan};
pub use crate::schema::{ColumnType, IndexDecl, TableDecl, Value};
pub use crate::uid::UidGenerator;
