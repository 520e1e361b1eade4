use ahash::AHashSet;
use serde::{Deserialize, Serialize};

use crate::errors::AtomGraphError;
use crate::schema::{ColumnType, IndexDecl, TableDecl, Value};

pub const ATOMS: &str = "atoms";
pub const ARROWS: &str = "arrows";

/// A graph node: a surrogate id, absent until the first save, and an ordered
/// property map with unique keys.
///
/// Atoms are plain values. They carry no handle to the graph they came from;
/// changes are persisted by passing the atom back to [`Graph::save`].
///
/// [`Graph::save`]: super::Graph::save
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(try_from = "AtomRecord")]
pub struct Atom {
    id: Option<u64>,
    properties: Vec<(String, serde_json::Value)>,
}

/// Unchecked wire form of an [`Atom`].
#[derive(Deserialize)]
struct AtomRecord {
    id: Option<u64>,
    properties: Vec<(String, serde_json::Value)>,
}

impl TryFrom<AtomRecord> for Atom {
    type Error = AtomGraphError;

    fn try_from(record: AtomRecord) -> Result<Self, Self::Error> {
        ensure_unique_keys(&record.properties)?;
        Ok(Atom {
            id: record.id,
            properties: record.properties,
        })
    }
}

impl Atom {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn id(&self) -> Option<u64> {
        self.id
    }

    pub fn properties(&self) -> &[(String, serde_json::Value)] {
        &self.properties
    }

    pub fn get(&self, key: &str) -> Option<&serde_json::Value> {
        self.properties
            .iter()
            .find(|(name, _)| name == key)
            .map(|(_, value)| value)
    }

    /// A copy with `key` moved to the end of the map and bound to `value`.
    /// Nothing is written until the copy is saved.
    pub fn set(&self, key: impl Into<String>, value: impl Into<serde_json::Value>) -> Atom {
        let key = key.into();
        let mut properties: Vec<_> = self
            .properties
            .iter()
            .filter(|(name, _)| *name != key)
            .cloned()
            .collect();
        properties.push((key, value.into()));
        Atom {
            id: self.id,
            properties,
        }
    }

    pub(crate) fn bound(id: u64, properties: Vec<(String, serde_json::Value)>) -> Self {
        Self {
            id: Some(id),
            properties,
        }
    }

    pub(crate) fn require_id(&self) -> Result<u64, AtomGraphError> {
        match self.id {
            Some(id) if id > 0 => Ok(id),
            Some(id) => Err(AtomGraphError::invalid_input(format!(
                "atom id must be positive, got {id}"
            ))),
            None => Err(AtomGraphError::invalid_input(
                "atom has no id; save it first",
            )),
        }
    }
}

/// A directed edge between two atom ids. Arrows are never updated.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Arrow {
    pub id: u64,
    pub start: u64,
    pub end: u64,
}

/// Tables backing a graph: atoms, arrows with their two direction indices,
/// and the two namespace trees.
pub fn graph_schema() -> Vec<TableDecl> {
    let mut tables = vec![
        TableDecl::new(ATOMS)
            .key("id", ColumnType::RecordId)
            .value("data", ColumnType::Bytes),
        TableDecl::new(ARROWS)
            .key("id", ColumnType::RecordId)
            .value("start", ColumnType::UInt)
            .value("end", ColumnType::UInt)
            .index(IndexDecl::new("outgoing", ["start"]).project(["id", "end"]))
            .index(IndexDecl::new("incoming", ["end"]).project(["id", "start"])),
    ];
    for ns in super::Namespace::ALL {
        tables.push(
            TableDecl::new(ns.table())
                .key("uid", ColumnType::Str)
                .value("name", ColumnType::Str)
                .value("parent", ColumnType::Str)
                .index(IndexDecl::new("children", ["parent"]).project(["uid", "name"])),
        );
    }
    tables
}

pub(crate) fn encode_properties(
    properties: &[(String, serde_json::Value)],
) -> Result<Vec<u8>, AtomGraphError> {
    serde_json::to_vec(properties).map_err(|e| AtomGraphError::codec(e.to_string()))
}

pub(crate) fn decode_properties(
    data: &[u8],
) -> Result<Vec<(String, serde_json::Value)>, AtomGraphError> {
    let properties: Vec<(String, serde_json::Value)> =
        serde_json::from_slice(data).map_err(|e| AtomGraphError::codec(e.to_string()))?;
    ensure_unique_keys(&properties)?;
    Ok(properties)
}

fn ensure_unique_keys(properties: &[(String, serde_json::Value)]) -> Result<(), AtomGraphError> {
    let mut seen = AHashSet::with_capacity(properties.len());
    for (name, _) in properties {
        if !seen.insert(name.as_str()) {
            return Err(AtomGraphError::codec(format!(
                "property '{name}' appears more than once"
            )));
        }
    }
    Ok(())
}

pub(crate) fn row_to_atom(key: &[Value], value: &[Value]) -> Result<Atom, AtomGraphError> {
    let id = id_field(key, 0)?;
    let data = value
        .first()
        .and_then(Value::as_bytes)
        .ok_or_else(|| AtomGraphError::codec("atom row has no data blob"))?;
    Ok(Atom::bound(id, decode_properties(data)?))
}

pub(crate) fn row_to_arrow(key: &[Value], value: &[Value]) -> Result<Arrow, AtomGraphError> {
    Ok(Arrow {
        id: id_field(key, 0)?,
        start: id_field(value, 0)?,
        end: id_field(value, 1)?,
    })
}

pub(crate) fn id_field(tuple: &[Value], at: usize) -> Result<u64, AtomGraphError> {
    tuple
        .get(at)
        .and_then(Value::as_u64)
        .ok_or_else(|| AtomGraphError::codec(format!("expected an id at field {at}")))
}

pub(crate) fn str_field(tuple: &[Value], at: usize) -> Result<String, AtomGraphError> {
    tuple
        .get(at)
        .and_then(Value::as_str)
        .map(str::to_owned)
        .ok_or_else(|| AtomGraphError::codec(format!("expected a string at field {at}")))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::schema::compile;
    use serde_json::json;

    #[test]
    fn test_set_replaces_and_moves_to_end() {
        let atom = Atom::new().set("a", 1).set("b", 2).set("a", 3);
        assert_eq!(
            atom.properties(),
            &[("b".to_string(), json!(2)), ("a".to_string(), json!(3))]
        );
    }

    #[test]
    fn test_set_leaves_original_untouched() {
        let original = Atom::new().set("name", "x");
        let changed = original.set("name", "y");
        assert_eq!(original.get("name"), Some(&json!("x")));
        assert_eq!(changed.get("name"), Some(&json!("y")));
    }

    #[test]
    fn test_properties_codec_keeps_order() {
        let atom = Atom::new().set("z", "last").set("a", json!({"nested": [1, 2]}));
        let data = encode_properties(atom.properties()).unwrap();
        assert_eq!(decode_properties(&data).unwrap(), atom.properties());
    }

    #[test]
    fn test_decode_rejects_garbage() {
        let err = decode_properties(b"not json").unwrap_err();
        assert!(matches!(err, AtomGraphError::Codec(_)));
    }

    #[test]
    fn test_duplicate_property_keys_rejected() {
        let err = decode_properties(br#"[["a", 1], ["a", 2]]"#).unwrap_err();
        assert!(matches!(err, AtomGraphError::Codec(_)));

        let parsed: Result<Atom, _> =
            serde_json::from_str(r#"{"id": 3, "properties": [["k", 1], ["k", 2]]}"#);
        assert!(parsed.is_err());

        let atom: Atom =
            serde_json::from_str(r#"{"id": 3, "properties": [["k", 1], ["j", 2]]}"#).unwrap();
        assert_eq!(atom.id(), Some(3));
        assert_eq!(atom.get("j"), Some(&json!(2)));
    }

    #[test]
    fn test_require_id() {
        assert!(Atom::new().require_id().is_err());
        assert!(Atom::bound(0, Vec::new()).require_id().is_err());
        assert_eq!(Atom::bound(5, Vec::new()).require_id().unwrap(), 5);
    }

    #[test]
    fn test_graph_schema_compiles() {
        let plan = compile(&graph_schema()).unwrap();
        let strings = plan.to_strings();
        assert!(strings.contains(
            &"create table:arrows key_format=r,value_format=QQ,columns=(id,start,end)".to_string()
        ));
        assert!(strings.contains(&"create index:arrows:outgoing columns=(start)".to_string()));
        assert_eq!(plan.tables().count(), 4);
        assert_eq!(plan.indices().count(), 4);
    }
}
