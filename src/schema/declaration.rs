//! Abstract table and index declarations.

use serde::{Deserialize, Serialize};

use super::column::ColumnType;

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct ColumnDecl {
    pub name: String,
    #[serde(rename = "type")]
    pub ty: ColumnType,
}

impl ColumnDecl {
    pub fn new(name: impl Into<String>, ty: ColumnType) -> Self {
        Self {
            name: name.into(),
            ty,
        }
    }
}

/// Secondary index over a table.
///
/// `columns` form the index key. `projection` lists the columns an index
/// cursor returns as its value; an empty projection returns nothing beyond
/// the index key.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct IndexDecl {
    pub name: String,
    pub columns: Vec<String>,
    #[serde(default)]
    pub projection: Vec<String>,
}

impl IndexDecl {
    pub fn new<I, S>(name: impl Into<String>, columns: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self {
            name: name.into(),
            columns: columns.into_iter().map(Into::into).collect(),
            projection: Vec::new(),
        }
    }

    pub fn project<I, S>(mut self, columns: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.projection = columns.into_iter().map(Into::into).collect();
        self
    }
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct TableDecl {
    pub name: String,
    pub key: Vec<ColumnDecl>,
    #[serde(default)]
    pub value: Vec<ColumnDecl>,
    #[serde(default)]
    pub indices: Vec<IndexDecl>,
}

impl TableDecl {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            key: Vec::new(),
            value: Vec::new(),
            indices: Vec::new(),
        }
    }

    pub fn key(mut self, name: impl Into<String>, ty: ColumnType) -> Self {
        self.key.push(ColumnDecl::new(name, ty));
        self
    }

    pub fn value(mut self, name: impl Into<String>, ty: ColumnType) -> Self {
        self.value.push(ColumnDecl::new(name, ty));
        self
    }

    pub fn index(mut self, index: IndexDecl) -> Self {
        self.indices.push(index);
        self
    }

    /// A table keyed by a single auto-increment column gets an append cursor.
    pub fn is_append(&self) -> bool {
        matches!(self.key.as_slice(), [only] if only.ty == ColumnType::RecordId)
    }

    pub fn key_types(&self) -> Vec<ColumnType> {
        self.key.iter().map(|c| c.ty).collect()
    }

    pub fn value_types(&self) -> Vec<ColumnType> {
        self.value.iter().map(|c| c.ty).collect()
    }

    /// Key columns followed by value columns, in declaration order.
    pub fn columns(&self) -> impl Iterator<Item = &ColumnDecl> {
        self.key.iter().chain(self.value.iter())
    }

    pub fn column(&self, name: &str) -> Option<&ColumnDecl> {
        self.columns().find(|c| c.name == name)
    }
}
