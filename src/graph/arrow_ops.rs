//! Arrow creation, removal and neighbor queries.

use crate::errors::AtomGraphError;
use crate::schema::Value;

use super::{
    Graph,
    types::{ARROWS, Arrow, Atom, id_field, row_to_arrow},
};

#[derive(Clone, Copy)]
enum Direction {
    Outgoing,
    Incoming,
}

impl Direction {
    fn cursor(self) -> &'static str {
        match self {
            Direction::Outgoing => "arrows-outgoing",
            Direction::Incoming => "arrows-incoming",
        }
    }

    /// Build the arrow from an index row: key is the scanned endpoint,
    /// value is `(arrow id, other endpoint)`.
    fn arrow(self, anchor: u64, projected: &[Value]) -> Result<Arrow, AtomGraphError> {
        let id = id_field(projected, 0)?;
        let peer = id_field(projected, 1)?;
        Ok(match self {
            Direction::Outgoing => Arrow {
                id,
                start: anchor,
                end: peer,
            },
            Direction::Incoming => Arrow {
                id,
                start: peer,
                end: anchor,
            },
        })
    }
}

impl Graph {
    /// Append an arrow from `start` to `end`. Both atoms must be stored.
    pub fn link(&mut self, start: &Atom, end: &Atom) -> Result<Arrow, AtomGraphError> {
        let start = start.require_id()?;
        let end = end.require_id()?;
        for id in [start, end] {
            if !self.contains(id)? {
                return Err(AtomGraphError::not_found(format!("atom {id}")));
            }
        }
        let key = self.ctx.with_cursor("arrows-append", |cursor| {
            cursor.set_value(vec![Value::UInt(start), Value::UInt(end)]);
            cursor.insert()?;
            cursor.key()
        })?;
        let arrow = Arrow {
            id: id_field(&key, 0)?,
            start,
            end,
        };
        tracing::trace!(id = arrow.id, start, end, "arrow linked");
        Ok(arrow)
    }

    /// Remove every arrow from `start` to `end`, returning how many went.
    pub fn unlink(&mut self, start: &Atom, end: &Atom) -> Result<usize, AtomGraphError> {
        let end = end.require_id()?;
        self.atomically(|graph| {
            let doomed: Vec<u64> = graph
                .outgoing_arrows(start)?
                .into_iter()
                .filter(|arrow| arrow.end == end)
                .map(|arrow| arrow.id)
                .collect();
            for id in &doomed {
                graph.remove_arrow(*id)?;
            }
            Ok(doomed.len())
        })
    }

    pub fn arrow(&mut self, id: u64) -> Result<Arrow, AtomGraphError> {
        self.ctx.with_cursor(ARROWS, |cursor| {
            cursor.set_key(vec![Value::RecordId(id)]);
            if !cursor.search()? {
                return Err(AtomGraphError::not_found(format!("arrow {id}")));
            }
            row_to_arrow(&cursor.key()?, &cursor.value()?)
        })
    }

    /// Arrows starting at `atom`, in link order.
    pub fn outgoing_arrows(&mut self, atom: &Atom) -> Result<Vec<Arrow>, AtomGraphError> {
        self.arrows(atom, Direction::Outgoing)
    }

    /// Arrows ending at `atom`, in link order.
    pub fn incoming_arrows(&mut self, atom: &Atom) -> Result<Vec<Arrow>, AtomGraphError> {
        self.arrows(atom, Direction::Incoming)
    }

    /// Atoms `atom` points at, one per arrow, in link order.
    pub fn outgoing(&mut self, atom: &Atom) -> Result<Vec<Atom>, AtomGraphError> {
        let arrows = self.outgoing_arrows(atom)?;
        arrows.iter().map(|arrow| self.get(arrow.end)).collect()
    }

    /// Atoms pointing at `atom`, one per arrow, in link order.
    pub fn incoming(&mut self, atom: &Atom) -> Result<Vec<Atom>, AtomGraphError> {
        let arrows = self.incoming_arrows(atom)?;
        arrows.iter().map(|arrow| self.get(arrow.start)).collect()
    }

    fn arrows(&mut self, atom: &Atom, direction: Direction) -> Result<Vec<Arrow>, AtomGraphError> {
        let id = atom.require_id()?;
        self.ctx
            .scan(direction.cursor(), &[Value::UInt(id)])?
            .iter()
            .map(|(_, projected)| direction.arrow(id, projected))
            .collect()
    }
}
