//! Atom save, lookup and cascading delete.

use ahash::AHashSet;

use crate::errors::AtomGraphError;
use crate::schema::Value;

use super::{
    Graph,
    types::{ARROWS, ATOMS, Atom, encode_properties, id_field, row_to_atom},
};

impl Graph {
    /// Insert a new atom or replace the properties of an existing one.
    ///
    /// An atom without an id goes through the append cursor and comes back
    /// bound to its new id. An atom with an id must already be stored.
    pub fn save(&mut self, atom: &Atom) -> Result<Atom, AtomGraphError> {
        let data = encode_properties(atom.properties())?;
        match atom.id() {
            None => {
                let key = self.ctx.with_cursor("atoms-append", |cursor| {
                    cursor.set_value(vec![Value::Bytes(data)]);
                    cursor.insert()?;
                    cursor.key()
                })?;
                let id = id_field(&key, 0)?;
                tracing::trace!(id, "atom inserted");
                Ok(Atom::bound(id, atom.properties().to_vec()))
            }
            Some(_) => {
                let id = atom.require_id()?;
                self.ctx
                    .with_cursor(ATOMS, |cursor| {
                        cursor.set_key(vec![Value::RecordId(id)]);
                        cursor.set_value(vec![Value::Bytes(data)]);
                        cursor.update()
                    })
                    .map_err(|err| missing_atom(err, id))?;
                Ok(atom.clone())
            }
        }
    }

    pub fn get(&mut self, id: u64) -> Result<Atom, AtomGraphError> {
        self.ctx
            .with_cursor(ATOMS, |cursor| {
                cursor.set_key(vec![Value::RecordId(id)]);
                if !cursor.search()? {
                    return Err(AtomGraphError::not_found(format!("atom {id}")));
                }
                row_to_atom(&cursor.key()?, &cursor.value()?)
            })
    }

    pub fn contains(&mut self, id: u64) -> Result<bool, AtomGraphError> {
        self.ctx.with_cursor(ATOMS, |cursor| {
            cursor.set_key(vec![Value::RecordId(id)]);
            cursor.search()
        })
    }

    /// Remove the atom and every arrow that starts or ends at it.
    ///
    /// Returns how many arrows were removed. Runs in its own transaction
    /// unless one is already open.
    pub fn delete(&mut self, atom: &Atom) -> Result<usize, AtomGraphError> {
        let id = atom.require_id()?;
        self.atomically(|graph| {
            graph
                .ctx
                .with_cursor(ATOMS, |cursor| {
                    cursor.set_key(vec![Value::RecordId(id)]);
                    cursor.remove()
                })
                .map_err(|err| missing_atom(err, id))?;

            let prefix = [Value::UInt(id)];
            let mut arrow_ids = AHashSet::new();
            for index in ["arrows-outgoing", "arrows-incoming"] {
                for (_, projected) in graph.ctx.scan(index, &prefix)? {
                    arrow_ids.insert(id_field(&projected, 0)?);
                }
            }
            for arrow_id in &arrow_ids {
                graph.remove_arrow(*arrow_id)?;
            }
            tracing::debug!(id, arrows = arrow_ids.len(), "atom deleted");
            Ok(arrow_ids.len())
        })
    }

    pub(super) fn remove_arrow(&mut self, arrow_id: u64) -> Result<(), AtomGraphError> {
        self.ctx.with_cursor(ARROWS, |cursor| {
            cursor.set_key(vec![Value::RecordId(arrow_id)]);
            cursor.remove()
        })
    }
}

fn missing_atom(err: AtomGraphError, id: u64) -> AtomGraphError {
    if err.is_not_found() {
        AtomGraphError::not_found(format!("atom {id}"))
    } else {
        err
    }
}
