//! Column types, their physical format codes, and the field values stored in them.

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

use crate::errors::AtomGraphError;

/// Closed set of column types a table or index may declare.
///
/// Each variant maps to exactly one single-character format code. The set
/// is exhaustive: there is no fallback code for an unrecognised symbol.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub enum ColumnType {
    /// Engine-assigned auto-increment record id. Only valid as the sole key column.
    RecordId,
    Str,
    UInt,
    Int,
    Bytes,
}

impl ColumnType {
    pub const ALL: [ColumnType; 5] = [
        ColumnType::RecordId,
        ColumnType::Str,
        ColumnType::UInt,
        ColumnType::Int,
        ColumnType::Bytes,
    ];

    pub const fn format_code(self) -> char {
        match self {
            ColumnType::RecordId => 'r',
            ColumnType::Str => 'S',
            ColumnType::UInt => 'Q',
            ColumnType::Int => 'q',
            ColumnType::Bytes => 'u',
        }
    }

    pub const fn symbol(self) -> &'static str {
        match self {
            ColumnType::RecordId => "record",
            ColumnType::Str => "string",
            ColumnType::UInt => "uint",
            ColumnType::Int => "int",
            ColumnType::Bytes => "bytes",
        }
    }

    pub fn from_code(code: char) -> Result<Self, AtomGraphError> {
        Self::ALL
            .into_iter()
            .find(|ty| ty.format_code() == code)
            .ok_or_else(|| AtomGraphError::schema(format!("unknown column format code '{code}'")))
    }

    /// Decode a whole format string such as `"rSQ"` into column types.
    pub fn parse_format(format: &str) -> Result<Vec<Self>, AtomGraphError> {
        format.chars().map(Self::from_code).collect()
    }

    /// The value this type treats as "don't care" inside a scan prefix.
    pub fn zero_value(self) -> Value {
        match self {
            ColumnType::RecordId => Value::RecordId(0),
            ColumnType::Str => Value::Str(String::new()),
            ColumnType::UInt => Value::UInt(0),
            ColumnType::Int => Value::Int(0),
            ColumnType::Bytes => Value::Bytes(Vec::new()),
        }
    }
}

impl FromStr for ColumnType {
    type Err = AtomGraphError;

    fn from_str(symbol: &str) -> Result<Self, Self::Err> {
        Self::ALL
            .into_iter()
            .find(|ty| ty.symbol() == symbol)
            .ok_or_else(|| AtomGraphError::schema(format!("unknown column type '{symbol}'")))
    }
}

impl TryFrom<String> for ColumnType {
    type Error = AtomGraphError;

    fn try_from(symbol: String) -> Result<Self, Self::Error> {
        symbol.parse()
    }
}

impl From<ColumnType> for String {
    fn from(ty: ColumnType) -> Self {
        ty.symbol().to_string()
    }
}

impl fmt::Display for ColumnType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.symbol())
    }
}

/// One field of a key or value tuple.
///
/// Ordering is only meaningful between values of the same variant, which is
/// always the case for two fields of the same column.
#[derive(Clone, Debug, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub enum Value {
    RecordId(u64),
    Str(String),
    UInt(u64),
    Int(i64),
    Bytes(Vec<u8>),
}

/// An ordered key or value tuple.
pub type Tuple = Vec<Value>;

impl Value {
    pub fn column_type(&self) -> ColumnType {
        match self {
            Value::RecordId(_) => ColumnType::RecordId,
            Value::Str(_) => ColumnType::Str,
            Value::UInt(_) => ColumnType::UInt,
            Value::Int(_) => ColumnType::Int,
            Value::Bytes(_) => ColumnType::Bytes,
        }
    }

    /// True for 0, the empty string and the empty blob.
    pub fn is_zero(&self) -> bool {
        match self {
            Value::RecordId(v) | Value::UInt(v) => *v == 0,
            Value::Int(v) => *v == 0,
            Value::Str(v) => v.is_empty(),
            Value::Bytes(v) => v.is_empty(),
        }
    }

    pub fn as_u64(&self) -> Option<u64> {
        match self {
            Value::RecordId(v) | Value::UInt(v) => Some(*v),
            _ => None,
        }
    }

    pub fn as_str(&self) -> Option<&str> {
        match self {
            Value::Str(v) => Some(v),
            _ => None,
        }
    }

    pub fn as_bytes(&self) -> Option<&[u8]> {
        match self {
            Value::Bytes(v) => Some(v),
            _ => None,
        }
    }
}

impl fmt::Display for Value {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Value::RecordId(v) => write!(f, "#{v}"),
            Value::Str(v) => write!(f, "{v:?}"),
            Value::UInt(v) => write!(f, "{v}"),
            Value::Int(v) => write!(f, "{v}"),
            Value::Bytes(v) => write!(f, "<{} bytes>", v.len()),
        }
    }
}

/// Render a tuple as `(a, b, c)` for error messages.
pub fn display_tuple(tuple: &[Value]) -> String {
    let fields: Vec<String> = tuple.iter().map(Value::to_string).collect();
    format!("({})", fields.join(", "))
}

/// Check that every field in `tuple` has the type declared at the same position.
///
/// `tuple` may be shorter than `types`; extra fields are rejected.
pub fn check_tuple(tuple: &[Value], types: &[ColumnType], what: &str) -> Result<(), AtomGraphError> {
    if tuple.len() > types.len() {
        return Err(AtomGraphError::invalid_input(format!(
            "{what} has {} fields but only {} columns are declared",
            tuple.len(),
            types.len()
        )));
    }
    for (idx, (field, ty)) in tuple.iter().zip(types).enumerate() {
        if field.column_type() != *ty {
            return Err(AtomGraphError::invalid_input(format!(
                "{what} field {idx} is {} but column is {ty}",
                field.column_type()
            )));
        }
    }
    Ok(())
}
