//! The atom/arrow graph built on a [`Context`].

mod arrow_ops;
mod atom_ops;
mod namespace;
mod types;

pub use namespace::{Namespace, NamespaceNode};
pub use types::{ARROWS, ATOMS, Arrow, Atom, graph_schema};

use crate::config::{GraphConfig, UidConfig};
use crate::context::{Context, scoped};
use crate::engine::{Engine, Session};
use crate::errors::AtomGraphError;
use crate::metrics::GraphMetricsSnapshot;
use crate::uid::UidGenerator;

/// A graph bound to one session. Use one per thread.
pub struct Graph {
    ctx: Context,
    uids: UidGenerator,
}

impl Graph {
    /// Open a new session on `engine` and create the graph tables if needed.
    pub fn open(engine: &dyn Engine, cfg: &GraphConfig) -> Result<Self, AtomGraphError> {
        let session = engine.open_session()?;
        tracing::debug!(engine = engine.name(), "opening graph");
        Self::from_session(session, &cfg.uid)
    }

    pub fn from_session(
        session: Box<dyn Session>,
        uid: &UidConfig,
    ) -> Result<Self, AtomGraphError> {
        Ok(Self {
            ctx: Context::create(session, &graph_schema())?,
            uids: UidGenerator::from_config(uid),
        })
    }

    /// Run `work` in a transaction; see [`Context::transaction`].
    pub fn transaction<T, F>(&mut self, work: F) -> Result<T, AtomGraphError>
    where
        F: FnOnce(&mut Graph) -> Result<T, AtomGraphError>,
    {
        scoped(self, |graph| &mut graph.ctx, work)
    }

    /// Run `work` in a transaction unless one is already open.
    fn atomically<T, F>(&mut self, work: F) -> Result<T, AtomGraphError>
    where
        F: FnOnce(&mut Graph) -> Result<T, AtomGraphError>,
    {
        if self.ctx.in_transaction() {
            work(self)
        } else {
            self.transaction(work)
        }
    }

    pub fn context(&mut self) -> &mut Context {
        &mut self.ctx
    }

    pub fn metrics_snapshot(&self) -> GraphMetricsSnapshot {
        self.ctx.metrics_snapshot()
    }
}
