//! Named trees of revisions and cultures.
//!
//! Each node is keyed by an 8-character uid and records its parent's uid.
//! Roots store an empty parent, which is also the scan wildcard, so roots
//! are found by a full scan rather than through the `children` index.

use ahash::AHashSet;
use serde::{Deserialize, Serialize};

use crate::errors::AtomGraphError;
use crate::schema::Value;

use super::{Graph, types::str_field};

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Namespace {
    Revisions,
    Cultures,
}

impl Namespace {
    pub const ALL: [Namespace; 2] = [Namespace::Revisions, Namespace::Cultures];

    pub fn table(self) -> &'static str {
        match self {
            Namespace::Revisions => "revisions",
            Namespace::Cultures => "cultures",
        }
    }

    fn children_cursor(self) -> &'static str {
        match self {
            Namespace::Revisions => "revisions-children",
            Namespace::Cultures => "cultures-children",
        }
    }
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct NamespaceNode {
    pub uid: String,
    pub name: String,
    pub parent: Option<String>,
}

impl NamespaceNode {
    fn from_row(key: &[Value], value: &[Value]) -> Result<Self, AtomGraphError> {
        let parent = str_field(value, 1)?;
        Ok(Self {
            uid: str_field(key, 0)?,
            name: str_field(value, 0)?,
            parent: (!parent.is_empty()).then_some(parent),
        })
    }
}

impl Graph {
    /// Add a node under `parent`, or a root when `parent` is `None`.
    pub fn namespace_insert(
        &mut self,
        ns: Namespace,
        name: &str,
        parent: Option<&str>,
    ) -> Result<NamespaceNode, AtomGraphError> {
        if name.is_empty() {
            return Err(AtomGraphError::invalid_input("namespace name must be set"));
        }
        if let Some(parent) = parent {
            self.namespace_get(ns, parent)?;
        }
        let table = ns.table();
        let Graph { ctx, uids } = self;
        let uid = uids.generate(|candidate| {
            ctx.with_cursor(table, |cursor| {
                cursor.set_key(vec![Value::Str(candidate.to_string())]);
                cursor.search()
            })
        })?;
        let node = NamespaceNode {
            uid,
            name: name.to_string(),
            parent: parent.map(str::to_string),
        };
        self.ctx.with_cursor(table, |cursor| {
            cursor.set_key(vec![Value::Str(node.uid.clone())]);
            cursor.set_value(vec![
                Value::Str(node.name.clone()),
                Value::Str(node.parent.clone().unwrap_or_default()),
            ]);
            cursor.insert()
        })?;
        tracing::debug!(namespace = table, uid = %node.uid, "namespace node added");
        Ok(node)
    }

    pub fn namespace_get(
        &mut self,
        ns: Namespace,
        uid: &str,
    ) -> Result<NamespaceNode, AtomGraphError> {
        if uid.is_empty() {
            return Err(AtomGraphError::invalid_input("namespace uid must be set"));
        }
        self.ctx.with_cursor(ns.table(), |cursor| {
            cursor.set_key(vec![Value::Str(uid.to_string())]);
            if !cursor.search()? {
                return Err(AtomGraphError::not_found(format!("{} {uid}", ns.table())));
            }
            NamespaceNode::from_row(&cursor.key()?, &cursor.value()?)
        })
    }

    /// Direct children of `uid`, ordered by uid.
    pub fn namespace_children(
        &mut self,
        ns: Namespace,
        uid: &str,
    ) -> Result<Vec<NamespaceNode>, AtomGraphError> {
        if uid.is_empty() {
            return Err(AtomGraphError::invalid_input("namespace uid must be set"));
        }
        self.ctx
            .scan(ns.children_cursor(), &[Value::Str(uid.to_string())])?
            .iter()
            .map(|(_, projected)| {
                Ok(NamespaceNode {
                    uid: str_field(projected, 0)?,
                    name: str_field(projected, 1)?,
                    parent: Some(uid.to_string()),
                })
            })
            .collect()
    }

    /// Nodes without a parent, ordered by uid.
    pub fn namespace_roots(&mut self, ns: Namespace) -> Result<Vec<NamespaceNode>, AtomGraphError> {
        let mut roots = Vec::new();
        for (key, value) in self.ctx.scan(ns.table(), &[])? {
            let node = NamespaceNode::from_row(&key, &value)?;
            if node.parent.is_none() {
                roots.push(node);
            }
        }
        Ok(roots)
    }

    /// The chain from the root down to `uid`, inclusive.
    pub fn namespace_path(
        &mut self,
        ns: Namespace,
        uid: &str,
    ) -> Result<Vec<NamespaceNode>, AtomGraphError> {
        let mut path = Vec::new();
        let mut seen = AHashSet::new();
        let mut next = Some(uid.to_string());
        while let Some(current) = next {
            if !seen.insert(current.clone()) {
                return Err(AtomGraphError::invalid_input(format!(
                    "{} {current} is its own ancestor",
                    ns.table()
                )));
            }
            let node = self.namespace_get(ns, &current)?;
            next = node.parent.clone();
            path.push(node);
        }
        path.reverse();
        Ok(path)
    }
}
